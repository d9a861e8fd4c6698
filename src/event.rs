use crate::error::{CloseReason, TransportError};
use crate::message::Msg;

/// 连接ID，每次建立新连接时递增
pub type ChannelId = u64;

/// 连接事件循环上报给客户端的事件
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// 收到一条完整消息
    MessageReceived { channel_id: ChannelId, msg: Msg },

    /// 读空闲（规定时间内没有任何入站数据）
    ReaderIdle { channel_id: ChannelId },

    /// 写空闲（规定时间内没有任何出站数据）
    WriterIdle { channel_id: ChannelId },

    /// 连接被对端关闭或断开
    Inactive { channel_id: ChannelId, reason: CloseReason },

    /// 读写/解码异常，连接已终止
    Exception { channel_id: ChannelId, error: TransportError },
}

impl ChannelEvent {
    /// 获取事件所属的连接ID
    pub fn channel_id(&self) -> ChannelId {
        match self {
            ChannelEvent::MessageReceived { channel_id, .. } => *channel_id,
            ChannelEvent::ReaderIdle { channel_id } => *channel_id,
            ChannelEvent::WriterIdle { channel_id } => *channel_id,
            ChannelEvent::Inactive { channel_id, .. } => *channel_id,
            ChannelEvent::Exception { channel_id, .. } => *channel_id,
        }
    }
}
