#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use imtrans::{ConnectStatusCallback, EventListener, ImConfig, Msg, MsgCodec};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, FramedWrite};

pub const HANDSHAKE_TYPE: i32 = 1001;
pub const HEARTBEAT_TYPE: i32 = 1002;
pub const SERVER_REPORT_TYPE: i32 = 1009;
pub const CLIENT_REPORT_TYPE: i32 = 1010;
pub const CHAT_TYPE: i32 = 2001;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 测试用内置配置：缩短重连周期与失败停顿
pub fn fast_config() -> ImConfig {
    ImConfig::default()
        .with_reconnect_interval(Duration::from_millis(100))
        .with_connect_failure_pause(Duration::from_millis(10))
        .with_network_poll_interval(Duration::from_millis(50))
}

/// 等待条件成立，超时返回 false
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub struct AppListener {
    pub dispatched: Mutex<Vec<Msg>>,
    pub network: AtomicBool,
    pub reconnect_interval: i64,
    pub foreground_heartbeat: i64,
    pub background_heartbeat: i64,
    pub resend_count: i64,
    pub resend_interval: i64,
}

impl Default for AppListener {
    fn default() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            network: AtomicBool::new(true),
            reconnect_interval: 20,
            foreground_heartbeat: 100,
            background_heartbeat: 400,
            resend_count: 2,
            resend_interval: 100,
        }
    }
}

impl AppListener {
    pub fn dispatched(&self) -> Vec<Msg> {
        self.dispatched.lock().clone()
    }
}

impl EventListener for AppListener {
    fn dispatch_msg(&self, msg: Msg) {
        self.dispatched.lock().push(msg);
    }

    fn is_network_available(&self) -> bool {
        self.network.load(Ordering::SeqCst)
    }

    fn reconnect_interval(&self) -> i64 {
        self.reconnect_interval
    }

    fn connect_timeout(&self) -> i64 {
        500
    }

    fn foreground_heartbeat_interval(&self) -> i64 {
        self.foreground_heartbeat
    }

    fn background_heartbeat_interval(&self) -> i64 {
        self.background_heartbeat
    }

    fn resend_count(&self) -> i64 {
        self.resend_count
    }

    fn resend_interval(&self) -> i64 {
        self.resend_interval
    }

    fn handshake_msg(&self) -> Msg {
        Msg::new("handshake", HANDSHAKE_TYPE).with_extend(r#"{"token":"secret"}"#)
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

#[derive(Default)]
pub struct StatusRecorder {
    pub connecting: AtomicUsize,
    pub connected: AtomicUsize,
    pub failed: AtomicUsize,
}

impl StatusRecorder {
    pub fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn connecting(&self) -> usize {
        self.connecting.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl ConnectStatusCallback for StatusRecorder {
    fn on_connecting(&self) {
        self.connecting.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connected(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connect_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

/// 模拟服务端的行为
#[derive(Clone)]
pub struct ServerBehavior {
    /// 握手响应中的 status
    pub handshake_status: i64,
    /// 是否对业务消息回复成功状态报告
    pub ack: bool,
    /// 握手成功后主动推送给客户端的消息
    pub push_after_handshake: Option<Msg>,
    /// 第一条连接握手后立即断开
    pub drop_first_connection: bool,
    /// 第一条连接握手后不再回复心跳
    pub mute_first_connection: bool,
}

impl Default for ServerBehavior {
    fn default() -> Self {
        Self {
            handshake_status: 1,
            ack: true,
            push_after_handshake: None,
            drop_first_connection: false,
            mute_first_connection: false,
        }
    }
}

/// 进程内模拟 IM 服务端，使用与客户端相同的帧格式
pub struct MockServer {
    pub port: u16,
    pub accepted: Arc<AtomicUsize>,
    pub received: Arc<Mutex<Vec<Msg>>>,
}

impl MockServer {
    pub async fn start(behavior: ServerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let accepted_clone = accepted.clone();
        let received_clone = received.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let index = accepted_clone.fetch_add(1, Ordering::SeqCst);
                let behavior = behavior.clone();
                let received = received_clone.clone();
                tokio::spawn(async move {
                    let (r, w) = stream.into_split();
                    let mut reader = FramedRead::new(r, MsgCodec::new());
                    let mut writer = FramedWrite::new(w, MsgCodec::new());

                    while let Some(Ok(msg)) = reader.next().await {
                        received.lock().push(msg.clone());
                        match msg.msg_type() {
                            Some(HANDSHAKE_TYPE) => {
                                let extend = format!(r#"{{"status":{}}}"#, behavior.handshake_status);
                                let resp = Msg::new("handshake-resp", HANDSHAKE_TYPE).with_extend(extend);
                                if writer.send(resp).await.is_err() {
                                    break;
                                }
                                if behavior.drop_first_connection && index == 0 {
                                    break;
                                }
                                if let Some(push) = behavior.push_after_handshake.clone() {
                                    let _ = writer.send(push).await;
                                }
                            }
                            Some(HEARTBEAT_TYPE) if !(behavior.mute_first_connection && index == 0) => {
                                let _ = writer.send(Msg::new("heartbeat-resp", HEARTBEAT_TYPE)).await;
                            }
                            Some(CHAT_TYPE) if behavior.ack => {
                                let report = Msg::new(msg.msg_id(), SERVER_REPORT_TYPE).with_status_report(1);
                                let _ = writer.send(report).await;
                            }
                            _ => {}
                        }
                    }
                });
            }
        });

        Self { port, accepted, received }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Msg> {
        self.received.lock().clone()
    }

    pub fn received_of_type(&self, msg_type: i32) -> Vec<Msg> {
        self.received()
            .into_iter()
            .filter(|m| m.msg_type() == Some(msg_type))
            .collect()
    }
}

/// 绑定后立即释放的端口，连接会被拒绝
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
