//! 单元测试共用的 listener

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::listener::EventListener;
use crate::message::Msg;

pub const HANDSHAKE_TYPE: i32 = 1001;
pub const HEARTBEAT_TYPE: i32 = 1002;
pub const SERVER_REPORT_TYPE: i32 = 1009;
pub const CLIENT_REPORT_TYPE: i32 = 1010;
pub const CHAT_TYPE: i32 = 2001;

pub struct TestListener {
    pub dispatched: Mutex<Vec<Msg>>,
    pub network: AtomicBool,
    pub resend_count: i64,
    pub resend_interval: i64,
    pub heartbeat_interval: i64,
}

impl Default for TestListener {
    fn default() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            network: AtomicBool::new(true),
            resend_count: 0,
            resend_interval: 0,
            heartbeat_interval: 0,
        }
    }
}

impl TestListener {
    pub fn dispatched(&self) -> Vec<Msg> {
        self.dispatched.lock().clone()
    }
}

impl EventListener for TestListener {
    fn dispatch_msg(&self, msg: Msg) {
        self.dispatched.lock().push(msg);
    }

    fn is_network_available(&self) -> bool {
        self.network.load(Ordering::SeqCst)
    }

    fn foreground_heartbeat_interval(&self) -> i64 {
        self.heartbeat_interval
    }

    fn resend_count(&self) -> i64 {
        self.resend_count
    }

    fn resend_interval(&self) -> i64 {
        self.resend_interval
    }

    fn handshake_msg(&self) -> Msg {
        Msg::new("handshake", HANDSHAKE_TYPE).with_extend(r#"{"token":"t"}"#)
    }

    fn heartbeat_msg(&self) -> Msg {
        Msg::new("heartbeat", HEARTBEAT_TYPE)
    }

    fn server_sent_report_msg_type(&self) -> i32 {
        SERVER_REPORT_TYPE
    }

    fn client_received_report_msg_type(&self) -> i32 {
        CLIENT_REPORT_TYPE
    }
}
