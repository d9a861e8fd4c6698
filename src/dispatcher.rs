use std::sync::Arc;

use tracing::trace;

use crate::listener::EventListener;
use crate::message::Msg;

/// 消息转发器：把解码后的入站消息交给应用层 listener
#[derive(Clone)]
pub struct MsgDispatcher {
    listener: Arc<dyn EventListener>,
}

impl MsgDispatcher {
    pub fn new(listener: Arc<dyn EventListener>) -> Self {
        Self { listener }
    }

    /// 接收消息并转发
    pub fn received_msg(&self, msg: Msg) {
        trace!(msg_id = msg.msg_id(), msg_type = ?msg.msg_type(), "📨 分发消息");
        self.listener.dispatch_msg(msg);
    }

    pub fn listener(&self) -> &Arc<dyn EventListener> {
        &self.listener
    }
}

impl std::fmt::Debug for MsgDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgDispatcher").finish_non_exhaustive()
    }
}
