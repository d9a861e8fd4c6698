/// 心跳机制
///
/// 连接上安装读/写空闲检测：写空闲（1 倍心跳间隔）时发送心跳，
/// 读空闲（3 倍心跳间隔）时认为连接已断开。心跳响应在入站链中被静默消费。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::READER_IDLE_HEARTBEAT_MULTIPLIER;
use crate::connection::Channel;
use crate::handler::{InboundAction, InboundContext, Interceptor};
use crate::message::Msg;

/// 空闲检测配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleConfig {
    pub reader_idle: Duration,
    pub writer_idle: Duration,
}

impl IdleConfig {
    /// 根据心跳间隔生成：读空闲 3 倍，写空闲 1 倍
    pub fn from_heartbeat_interval(interval: Duration) -> Self {
        Self {
            reader_idle: interval.saturating_mul(READER_IDLE_HEARTBEAT_MULTIPLIER),
            writer_idle: interval,
        }
    }
}

/// 心跳响应拦截器：消息类型与心跳消息一致时消费掉
pub struct HeartbeatRespInterceptor;

impl Interceptor for HeartbeatRespInterceptor {
    fn name(&self) -> &'static str {
        "heartbeat_resp"
    }

    fn intercept(&self, ctx: &dyn InboundContext, msg: Msg) -> InboundAction {
        let heartbeat_type = ctx.listener().heartbeat_msg().msg_type();
        if heartbeat_type.is_some() && msg.msg_type() == heartbeat_type {
            trace!(msg_id = msg.msg_id(), "💓 收到心跳响应");
            InboundAction::Consumed
        } else {
            InboundAction::Pass(msg)
        }
    }
}

/// 写空闲时提交到 work 池的心跳发送任务
pub struct HeartbeatTask {
    channel: Arc<Channel>,
    heartbeat: Msg,
    interval: Duration,
}

impl HeartbeatTask {
    pub fn new(channel: Arc<Channel>, heartbeat: Msg, interval: Duration) -> Self {
        Self { channel, heartbeat, interval }
    }

    /// 连接仍然可用时发送心跳，不加入超时管理器
    pub async fn run(self) {
        if !self.channel.is_active() {
            return;
        }
        debug!(
            msg_id = self.heartbeat.msg_id(),
            interval_ms = self.interval.as_millis() as u64,
            "💓 发送心跳"
        );
        if let Err(e) = self.channel.send(self.heartbeat) {
            debug!(channel_id = self.channel.id(), "💓 心跳发送失败: {}", e);
        }
    }
}
