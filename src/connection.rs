/// TCP 连接
///
/// 每个 `Channel` 对应一条 TCP 连接和一个基于 `tokio::select!` 的事件循环：
/// 读取并解码入站帧、写出出站消息、执行读/写空闲检测，事件统一上报给客户端。

use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::codec::{CodecError, MsgCodec};
use crate::config::EffectiveConfig;
use crate::error::{CloseReason, TransportError};
use crate::event::{ChannelEvent, ChannelId};
use crate::heartbeat::IdleConfig;
use crate::message::Msg;

/// 服务器地址
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// 解析 `"host port"` 格式的地址，例如 `"127.0.0.1 8860"`
    pub fn parse(value: &str) -> Result<Self, TransportError> {
        let mut parts = value.split_whitespace();
        let (Some(host), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(TransportError::config_error("server_address", format!("invalid address '{}'", value)));
        };
        let port = port
            .parse::<u16>()
            .map_err(|e| TransportError::config_error("server_address", format!("invalid port in '{}': {}", value, e)))?;
        Ok(Self::new(host, port))
    }

    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<(&str, u16)> for ServerAddress {
    fn from((host, port): (&str, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<(String, u16)> for ServerAddress {
    fn from((host, port): (String, u16)) -> Self {
        Self::new(host, port)
    }
}

/// 一条活跃的 TCP 连接
pub struct Channel {
    id: ChannelId,
    address: ServerAddress,
    peer_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Msg>,
    shutdown: mpsc::UnboundedSender<()>,
    idle: watch::Sender<Option<IdleConfig>>,
    active: Arc<AtomicBool>,
    event_loop: JoinHandle<()>,
}

impl Channel {
    /// 连接服务器并启动事件循环
    ///
    /// 连接超时取 `config.connect_timeout`，按配置设置 TCP_NODELAY / SO_KEEPALIVE。
    pub async fn connect(
        id: ChannelId,
        address: &ServerAddress,
        config: &EffectiveConfig,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<Self, TransportError> {
        debug!("🔌 TCP客户端连接到: {} (连接 #{})", address, id);

        let stream = tokio::time::timeout(config.connect_timeout, open_stream(address, config))
            .await
            .map_err(|_| TransportError::timeout_error(format!("connect {}", address), config.connect_timeout))??;
        stream.set_nodelay(config.nodelay)?;
        let peer_addr = stream.peer_addr()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (idle_tx, idle_rx) = watch::channel(None);
        let active = Arc::new(AtomicBool::new(true));

        let event_loop = tokio::spawn(run_event_loop(
            id,
            stream,
            outbound_rx,
            shutdown_rx,
            idle_rx,
            events,
            active.clone(),
        ));

        info!("✅ TCP连接建立成功: {} ({})", address, peer_addr);
        Ok(Self {
            id,
            address: address.clone(),
            peer_addr,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            idle: idle_tx,
            active,
            event_loop,
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// 将消息放入发送队列，由事件循环写出
    pub fn send(&self, msg: Msg) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::connection_error("channel is not active", true));
        }
        self.outbound
            .send(msg)
            .map_err(|_| TransportError::connection_error("channel event loop stopped", true))
    }

    /// 安装（或替换）空闲检测，新配置从当前时刻开始计时
    pub fn install_idle(&self, idle: IdleConfig) {
        debug!(
            reader_idle_ms = idle.reader_idle.as_millis() as u64,
            writer_idle_ms = idle.writer_idle.as_millis() as u64,
            "💓 安装空闲检测 (连接 #{})",
            self.id
        );
        self.idle.send_replace(Some(idle));
    }

    /// 当前生效的空闲检测配置
    pub fn idle_config(&self) -> Option<IdleConfig> {
        *self.idle.borrow()
    }

    /// 主动关闭，不会再上报 Inactive 事件
    pub fn close(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            debug!("🔗 关闭TCP连接 (连接 #{})", self.id);
            let _ = self.shutdown.send(());
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.event_loop.abort();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("active", &self.is_active())
            .finish()
    }
}

async fn open_stream(address: &ServerAddress, config: &EffectiveConfig) -> Result<TcpStream, TransportError> {
    let mut last_error = None;
    for addr in tokio::net::lookup_host((address.host.as_str(), address.port)).await? {
        let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_keepalive(config.keepalive)?;
        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => e.into(),
        None => TransportError::connection_error(format!("no address resolved for {}", address), true),
    })
}

async fn run_event_loop(
    id: ChannelId,
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Msg>,
    mut shutdown: mpsc::UnboundedReceiver<()>,
    mut idle_rx: watch::Receiver<Option<IdleConfig>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    active: Arc<AtomicBool>,
) {
    debug!("🚀 TCP事件循环启动 (连接 #{})", id);

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, MsgCodec::new());
    let mut writer = FramedWrite::new(write_half, MsgCodec::new());

    let mut idle: Option<IdleConfig> = *idle_rx.borrow();
    let mut last_read = Instant::now();
    let mut last_write = Instant::now();

    let terminal = loop {
        let reader_deadline = idle.and_then(|c| last_read.checked_add(c.reader_idle));
        let writer_deadline = idle.and_then(|c| last_write.checked_add(c.writer_idle));

        tokio::select! {
            frame = reader.next() => match frame {
                Some(Ok(msg)) => {
                    last_read = Instant::now();
                    let _ = events.send(ChannelEvent::MessageReceived { channel_id: id, msg });
                }
                Some(Err(e)) => {
                    warn!("📥 TCP读取/解码错误: {} (连接 #{})", e, id);
                    break Some(read_failure_event(id, e));
                }
                None => {
                    debug!("📥 对端关闭TCP连接 (连接 #{})", id);
                    break Some(ChannelEvent::Inactive { channel_id: id, reason: CloseReason::Normal });
                }
            },

            msg = outbound.recv() => match msg {
                Some(msg) => {
                    let msg_id = msg.msg_id().to_string();
                    match writer.send(msg).await {
                        Ok(()) => last_write = Instant::now(),
                        Err(e) => {
                            warn!(msg_id = %msg_id, "📤 TCP发送错误: {} (连接 #{})", e, id);
                            break Some(ChannelEvent::Exception { channel_id: id, error: e.into() });
                        }
                    }
                }
                None => break None,
            },

            _ = shutdown.recv() => {
                // 主动关闭不上报事件
                break None;
            }

            changed = idle_rx.changed() => {
                if changed.is_err() {
                    break None;
                }
                idle = *idle_rx.borrow_and_update();
                last_read = Instant::now();
                last_write = Instant::now();
            }

            _ = sleep_until(reader_deadline.unwrap_or(last_read)), if reader_deadline.is_some() => {
                last_read = Instant::now();
                let _ = events.send(ChannelEvent::ReaderIdle { channel_id: id });
            }

            _ = sleep_until(writer_deadline.unwrap_or(last_write)), if writer_deadline.is_some() => {
                last_write = Instant::now();
                let _ = events.send(ChannelEvent::WriterIdle { channel_id: id });
            }
        }
    };

    // 主动关闭时 active 已被置为 false，只有被动断开才上报
    let was_active = active.swap(false, Ordering::SeqCst);
    if let Some(event) = terminal {
        if was_active {
            let _ = events.send(event);
        }
    }

    debug!("✅ TCP事件循环已结束 (连接 #{})", id);
}

/// 连接被重置/中断视为断开，其余读取或解码错误视为异常
fn read_failure_event(id: ChannelId, error: CodecError) -> ChannelEvent {
    match error {
        CodecError::Io(e)
            if matches!(
                e.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::UnexpectedEof
            ) =>
        {
            ChannelEvent::Inactive { channel_id: id, reason: CloseReason::Error(e.to_string()) }
        }
        other => ChannelEvent::Exception { channel_id: id, error: other.into() },
    }
}
