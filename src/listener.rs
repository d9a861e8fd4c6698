/// 应用层协作接口
///
/// 客户端不关心业务协议：握手/心跳消息、状态报告类型、各项间隔都由应用通过
/// `EventListener` 提供，连接状态变化通过 `ConnectStatusCallback` 回调通知。

use crate::message::Msg;

/// 应用事件监听器
///
/// 所有整型 getter 返回 0（或负值）表示使用内置默认值。
pub trait EventListener: Send + Sync + 'static {
    /// 分发入站消息给应用层
    fn dispatch_msg(&self, msg: Msg);

    /// 当前网络是否可用
    fn is_network_available(&self) -> bool {
        true
    }

    /// 重连退避间隔（毫秒）
    fn reconnect_interval(&self) -> i64 {
        0
    }

    /// 连接超时（毫秒）
    fn connect_timeout(&self) -> i64 {
        0
    }

    /// 前台心跳间隔（毫秒）
    fn foreground_heartbeat_interval(&self) -> i64 {
        0
    }

    /// 后台心跳间隔（毫秒）
    fn background_heartbeat_interval(&self) -> i64 {
        0
    }

    /// 超时重发次数
    fn resend_count(&self) -> i64 {
        0
    }

    /// 超时重发间隔（毫秒）
    fn resend_interval(&self) -> i64 {
        0
    }

    /// 握手消息
    fn handshake_msg(&self) -> Msg;

    /// 心跳消息
    fn heartbeat_msg(&self) -> Msg;

    /// 服务端发送的消息状态报告类型
    fn server_sent_report_msg_type(&self) -> i32;

    /// 客户端接收的消息状态报告类型
    fn client_received_report_msg_type(&self) -> i32;
}

/// 连接状态回调
pub trait ConnectStatusCallback: Send + Sync + 'static {
    fn on_connecting(&self);

    fn on_connected(&self);

    fn on_connect_failed(&self);
}
