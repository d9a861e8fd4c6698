/// 入站消息处理链
///
/// 解码后的消息按顺序经过拦截器：握手响应 -> 心跳响应 -> 通用读处理。
/// 每个拦截器要么消费消息，要么原样交给下一个。

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::config::REPORT_SUCCESSFUL;
use crate::dispatcher::MsgDispatcher;
use crate::heartbeat::HeartbeatRespInterceptor;
use crate::listener::EventListener;
use crate::message::Msg;
use crate::timeout::MsgTimeoutManager;

/// 握手响应解析失败时的状态码
pub const HANDSHAKE_STATUS_FAILED: i64 = -1;

/// 拦截结果
#[derive(Debug)]
pub enum InboundAction {
    /// 已处理，停止向后传递
    Consumed,
    /// 未处理，交给下一个拦截器
    Pass(Msg),
}

/// 拦截器可以访问的客户端能力
pub trait InboundContext: Send + Sync {
    fn listener(&self) -> &Arc<dyn EventListener>;

    fn dispatcher(&self) -> &MsgDispatcher;

    fn timeout_manager(&self) -> &MsgTimeoutManager;

    fn send_msg(&self, msg: Msg, join_timeout_manager: bool);

    /// 握手成功后安装心跳空闲检测
    fn install_heartbeat(&self);

    /// 握手被服务端拒绝
    fn on_handshake_rejected(&self, status: i64);
}

/// 入站消息拦截器
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn intercept(&self, ctx: &dyn InboundContext, msg: Msg) -> InboundAction;
}

/// 握手响应拦截器
///
/// 握手状态在扩展字段 JSON 的 `status` 中，1 表示成功。
pub struct HandshakeRespInterceptor;

impl HandshakeRespInterceptor {
    /// 解析握手状态，JSON 非法或缺少字段时返回 -1
    pub fn parse_status(extend: &str) -> i64 {
        serde_json::from_str::<Value>(extend)
            .ok()
            .and_then(|json| {
                let status = json.get("status")?;
                status.as_i64().or_else(|| status.as_str()?.trim().parse().ok())
            })
            .unwrap_or(HANDSHAKE_STATUS_FAILED)
    }
}

impl Interceptor for HandshakeRespInterceptor {
    fn name(&self) -> &'static str {
        "handshake_resp"
    }

    fn intercept(&self, ctx: &dyn InboundContext, msg: Msg) -> InboundAction {
        let handshake_type = ctx.listener().handshake_msg().msg_type();
        if handshake_type.is_none() || msg.msg_type() != handshake_type {
            return InboundAction::Pass(msg);
        }

        let status = Self::parse_status(msg.extend());
        if status == REPORT_SUCCESSFUL as i64 {
            info!("🤝 握手成功");
            // 先重发未确认的消息，再立即发送一条心跳，之后的心跳由空闲检测驱动
            ctx.timeout_manager().on_reset_connected();
            ctx.send_msg(ctx.listener().heartbeat_msg(), false);
            ctx.install_heartbeat();
        } else {
            warn!(status, extend = msg.extend(), "🤝 握手失败");
            ctx.on_handshake_rejected(status);
        }
        InboundAction::Consumed
    }
}

/// 通用读处理
///
/// 服务端状态报告：成功时移出超时管理器；其它消息：回复接收状态报告。
/// 两种情况下消息都会转发给应用层。
pub struct ReadHandler;

impl Interceptor for ReadHandler {
    fn name(&self) -> &'static str {
        "read"
    }

    fn intercept(&self, ctx: &dyn InboundContext, msg: Msg) -> InboundAction {
        let listener = ctx.listener();
        if msg.msg_type() == Some(listener.server_sent_report_msg_type()) {
            debug!(msg_id = msg.msg_id(), status = ?msg.status_report(), "📬 收到服务端状态报告");
            if msg.is_report_successful() {
                ctx.timeout_manager().remove(msg.msg_id());
            }
        } else if let Some(report) = Msg::received_report(msg.msg_id(), listener.client_received_report_msg_type()) {
            ctx.send_msg(report, true);
        }

        ctx.dispatcher().received_msg(msg);
        InboundAction::Consumed
    }
}

/// 有序的拦截器链
pub struct InboundPipeline {
    interceptors: Vec<Box<dyn Interceptor>>,
}

impl InboundPipeline {
    pub fn new() -> Self {
        Self { interceptors: Vec::new() }
    }

    /// 标准处理链：握手响应 -> 心跳响应 -> 通用读处理
    pub fn standard() -> Self {
        Self::new()
            .with(HandshakeRespInterceptor)
            .with(HeartbeatRespInterceptor)
            .with(ReadHandler)
    }

    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Box::new(interceptor));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// 依次执行拦截器，没有消息头的消息直接丢弃
    pub fn handle(&self, ctx: &dyn InboundContext, msg: Msg) {
        if msg.head.is_none() {
            trace!("丢弃没有消息头的入站消息");
            return;
        }

        let mut current = msg;
        for interceptor in &self.interceptors {
            match interceptor.intercept(ctx, current) {
                InboundAction::Consumed => return,
                InboundAction::Pass(msg) => current = msg,
            }
        }
        trace!(msg_id = current.msg_id(), "入站消息未被任何拦截器处理");
    }
}

impl Default for InboundPipeline {
    fn default() -> Self {
        Self::standard()
    }
}
