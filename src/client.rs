/// IM 客户端（连接管理器）
///
/// 负责首次连接与断线重连、握手、消息发送、前后台心跳切换，
/// 并把连接事件驱动到入站处理链、心跳任务和超时管理器。
///
/// ```text
///  send_msg ──► MsgTimeoutManager(可选) ──► Channel ──► socket
///  socket ──► Channel ──► ChannelEvent ──► InboundPipeline ──► MsgDispatcher ──► EventListener
///                                └─ 空闲/断开 ──► 心跳任务 / reset_connect
/// ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::backoff::LinearBackoff;
use crate::config::{AppStatus, EffectiveConfig, ImConfig};
use crate::connection::{Channel, ServerAddress};
use crate::dispatcher::MsgDispatcher;
use crate::error::TransportError;
use crate::event::ChannelEvent;
use crate::executor::ExecutorSupervisor;
use crate::handler::{InboundContext, InboundPipeline};
use crate::heartbeat::{HeartbeatTask, IdleConfig};
use crate::listener::{ConnectStatusCallback, EventListener};
use crate::message::Msg;
use crate::timeout::{MsgTimeoutManager, TimeoutHost};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// 尚未连接或已关闭
    Disconnected,
    /// 连接中
    Connecting,
    /// 连接成功
    Connected,
    /// 连接失败
    Failed,
}

/// 一轮地址遍历的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectResult {
    Successful,
    Failure,
}

/// 客户端构建器
#[derive(Debug, Clone, Default)]
pub struct ImClientBuilder {
    config: ImConfig,
    addresses: Vec<ServerAddress>,
}

impl ImClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置内置配置
    pub fn config(mut self, config: ImConfig) -> Self {
        self.config = config;
        self
    }

    /// 追加一个服务器地址
    pub fn server(mut self, address: impl Into<ServerAddress>) -> Self {
        self.addresses.push(address.into());
        self
    }

    /// 追加多个服务器地址（按顺序尝试）
    pub fn servers<I>(mut self, addresses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ServerAddress>,
    {
        self.addresses.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// 追加 `"host port"` 格式的地址
    pub fn server_url(self, url: &str) -> Result<Self, TransportError> {
        Ok(self.server(ServerAddress::parse(url)?))
    }

    /// 初始化客户端并发起首次连接
    ///
    /// 必须在 tokio 运行时内调用。首次连接在后台进行，结果通过 `ConnectStatusCallback` 回调。
    pub async fn init(
        self,
        listener: Arc<dyn EventListener>,
        callback: Arc<dyn ConnectStatusCallback>,
    ) -> Result<ImClient, TransportError> {
        self.config.validate()?;
        if self.addresses.is_empty() {
            return Err(TransportError::config_error("servers", "server address list is empty"));
        }

        let effective = self.config.resolve(listener.as_ref(), AppStatus::Foreground);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let host: Weak<dyn TimeoutHost> = weak.clone();
            ClientInner {
                weak_self: weak.clone(),
                addresses: RwLock::new(self.addresses),
                dispatcher: MsgDispatcher::new(listener.clone()),
                listener,
                callback,
                base_config: RwLock::new(self.config),
                effective: RwLock::new(effective),
                timeouts: MsgTimeoutManager::new(host),
                executors: ExecutorSupervisor::new(),
                pipeline: InboundPipeline::standard(),
                channel: RwLock::new(None),
                connect_status: RwLock::new(ConnectStatus::Disconnected),
                closed: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                reconnect_lock: Mutex::new(()),
                next_channel_id: AtomicU64::new(0),
                events_tx,
                event_pump: Mutex::new(None),
            }
        });

        let pump = tokio::spawn(run_event_pump(Arc::downgrade(&inner), events_rx));
        *inner.event_pump.lock() = Some(pump);

        inner.executors.start_boss();
        info!("🚀 IM 客户端初始化，服务器: {:?}", inner.addresses.read());
        inner.reset_connect(true).await;

        Ok(ImClient { inner })
    }
}

/// IM 客户端句柄，可以廉价克隆并在任务之间共享
#[derive(Clone)]
pub struct ImClient {
    inner: Arc<ClientInner>,
}

impl ImClient {
    pub fn builder() -> ImClientBuilder {
        ImClientBuilder::new()
    }

    /// 使用默认配置初始化
    pub async fn init<I>(
        addresses: I,
        listener: Arc<dyn EventListener>,
        callback: Arc<dyn ConnectStatusCallback>,
    ) -> Result<Self, TransportError>
    where
        I: IntoIterator,
        I::Item: Into<ServerAddress>,
    {
        ImClientBuilder::new().servers(addresses).init(listener, callback).await
    }

    /// 发送消息，默认加入超时管理器
    pub fn send(&self, msg: Msg) {
        self.inner.send_msg(msg, true);
    }

    /// 发送消息
    ///
    /// `join_timeout_manager` 为 true 且消息ID非空时，先登记到超时管理器再写出；
    /// 写出失败只记录日志，由超时重发保证送达。
    pub fn send_msg(&self, msg: Msg, join_timeout_manager: bool) {
        self.inner.send_msg(msg, join_timeout_manager);
    }

    /// 触发一次重连（非首次）
    pub async fn reset_connect(&self) {
        self.inner.reset_connect(false).await;
    }

    /// 关闭客户端，重复调用无副作用
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// 切换前后台状态，立即以新的心跳间隔重新安装空闲检测
    pub fn set_app_status(&self, status: AppStatus) {
        self.inner.refresh_config(Some(status));
        self.inner.install_idle();
    }

    pub fn app_status(&self) -> AppStatus {
        self.inner.effective.read().app_status
    }

    /// 重新从 listener 解析生效配置
    pub fn reload_config(&self) {
        self.inner.refresh_config(None);
    }

    /// 替换内置配置并重新解析，客户端关闭后返回 `TransportError::Closed`
    pub fn update_config(&self, config: ImConfig) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        config.validate()?;
        *self.inner.base_config.write() = config;
        self.inner.refresh_config(None);
        Ok(())
    }

    /// 当前生效配置快照
    pub fn effective_config(&self) -> EffectiveConfig {
        self.inner.effective()
    }

    pub fn reconnect_interval(&self) -> Duration {
        self.inner.effective.read().reconnect_interval
    }

    pub fn connect_timeout(&self) -> Duration {
        self.inner.effective.read().connect_timeout
    }

    /// 当前前后台状态下的心跳间隔
    pub fn heartbeat_interval(&self) -> Duration {
        self.inner.effective.read().heartbeat_interval()
    }

    pub fn foreground_heartbeat_interval(&self) -> Duration {
        self.inner.effective.read().foreground_heartbeat_interval
    }

    pub fn background_heartbeat_interval(&self) -> Duration {
        self.inner.effective.read().background_heartbeat_interval
    }

    pub fn resend_count(&self) -> i64 {
        self.inner.effective.read().resend_count
    }

    pub fn resend_interval(&self) -> Duration {
        self.inner.effective.read().resend_interval
    }

    pub fn dispatcher(&self) -> &MsgDispatcher {
        &self.inner.dispatcher
    }

    pub fn timeout_manager(&self) -> &MsgTimeoutManager {
        &self.inner.timeouts
    }

    pub fn connect_status(&self) -> ConnectStatus {
        *self.inner.connect_status.read()
    }

    /// 当前连接的服务器地址
    pub fn current_address(&self) -> Option<ServerAddress> {
        self.inner.channel.read().as_ref().map(|c| c.address().clone())
    }

    /// 当前连接是否可用
    pub fn is_active(&self) -> bool {
        self.inner.channel.read().as_ref().is_some_and(|c| c.is_active())
    }

    /// 当前连接上的空闲检测配置
    pub fn idle_config(&self) -> Option<IdleConfig> {
        self.inner.channel.read().as_ref().and_then(|c| c.idle_config())
    }
}

impl fmt::Debug for ImClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImClient")
            .field("status", &self.connect_status())
            .field("closed", &self.is_closed())
            .field("address", &self.current_address())
            .finish()
    }
}

struct ClientInner {
    weak_self: Weak<ClientInner>,
    addresses: RwLock<Vec<ServerAddress>>,
    listener: Arc<dyn EventListener>,
    callback: Arc<dyn ConnectStatusCallback>,
    base_config: RwLock<ImConfig>,
    effective: RwLock<EffectiveConfig>,
    dispatcher: MsgDispatcher,
    timeouts: MsgTimeoutManager,
    executors: ExecutorSupervisor,
    pipeline: InboundPipeline,
    channel: RwLock<Option<Arc<Channel>>>,
    connect_status: RwLock<ConnectStatus>,
    closed: AtomicBool,
    reconnecting: AtomicBool,
    reconnect_lock: Mutex<()>,
    next_channel_id: AtomicU64,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

/// 重连流程退出（包括被中断）时清除重连标识
struct ReconnectingGuard<'a>(&'a AtomicBool);

impl Drop for ReconnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ClientInner {
    fn effective(&self) -> EffectiveConfig {
        self.effective.read().clone()
    }

    fn refresh_config(&self, app_status: Option<AppStatus>) {
        let status = app_status.unwrap_or_else(|| self.effective.read().app_status);
        let effective = self.base_config.read().resolve(self.listener.as_ref(), status);
        debug!(?status, heartbeat_ms = effective.heartbeat_interval().as_millis() as u64, "⚙️ 刷新生效配置");
        *self.effective.write() = effective;
    }

    fn current_channel(&self) -> Option<Arc<Channel>> {
        self.channel.read().clone()
    }

    /// 重连入口，首次连接也走这里
    ///
    /// 非首次调用先等待一个重连周期，用于合并短时间内的多次断线信号。
    async fn reset_connect(&self, is_first: bool) {
        if !is_first {
            tokio::time::sleep(self.effective().reconnect_cycle_interval).await;
        }
        self.begin_reconnect(is_first);
    }

    fn begin_reconnect(&self, is_first: bool) {
        if self.is_closed() || self.reconnecting.load(Ordering::SeqCst) {
            return;
        }

        let _lock = self.reconnect_lock.lock();
        if self.is_closed() || self.reconnecting.load(Ordering::SeqCst) {
            return;
        }
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };

        self.reconnecting.store(true, Ordering::SeqCst);
        self.update_status(ConnectStatus::Connecting);
        self.close_channel();

        if !self.executors.exec_boss(this.reconnect_loop(is_first)) {
            self.reconnecting.store(false, Ordering::SeqCst);
        }
    }

    /// 在 boss 池中执行，直到连接成功或客户端关闭
    async fn reconnect_loop(self: Arc<Self>, is_first: bool) {
        let _guard = ReconnectingGuard(&self.reconnecting);

        if !is_first {
            self.update_status(ConnectStatus::Failed);
        }
        // 重连期间不发送心跳
        self.executors.stop_work();

        while !self.is_closed() {
            let config = self.effective();
            if !self.listener.is_network_available() {
                debug!("📶 网络不可用，{}ms 后重试", config.network_poll_interval.as_millis());
                tokio::time::sleep(config.network_poll_interval).await;
                continue;
            }

            match self.connect_server(&config).await {
                ConnectResult::Successful => {
                    self.update_status(ConnectStatus::Connected);
                    break;
                }
                ConnectResult::Failure => {
                    if self.is_closed() {
                        break;
                    }
                    self.update_status(ConnectStatus::Failed);
                    tokio::time::sleep(config.reconnect_cycle_interval).await;
                }
            }
        }
    }

    /// 按顺序遍历服务器地址，每个地址按线性退避尝试若干次
    async fn connect_server(&self, config: &EffectiveConfig) -> ConnectResult {
        let addresses = self.addresses.read().clone();
        if addresses.is_empty() {
            return ConnectResult::Failure;
        }

        let backoff = LinearBackoff::new(config.reconnect_interval, config.reconnect_count);
        for address in &addresses {
            if self.is_closed() {
                break;
            }
            if !address.is_valid() {
                warn!(%address, "❌ 服务器地址无效");
                return ConnectResult::Failure;
            }

            for attempt in backoff.attempts() {
                if self.is_closed() || !self.listener.is_network_available() {
                    return ConnectResult::Failure;
                }
                if *self.connect_status.read() != ConnectStatus::Connecting {
                    self.update_status(ConnectStatus::Connecting);
                }

                let delay = backoff.delay_for(attempt);
                info!(
                    %address,
                    attempt,
                    max_attempts = backoff.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "🔌 正在进行第 {}/{} 次连接",
                    attempt,
                    backoff.max_attempts()
                );
                if self.to_server(address, config).await {
                    return ConnectResult::Successful;
                }
                tokio::time::sleep(delay).await;
            }
        }

        ConnectResult::Failure
    }

    /// 建立一次 TCP 连接，成功后替换当前连接
    async fn to_server(&self, address: &ServerAddress, config: &EffectiveConfig) -> bool {
        let id = self.next_channel_id.fetch_add(1, Ordering::SeqCst) + 1;
        match Channel::connect(id, address, config, self.events_tx.clone()).await {
            Ok(channel) => {
                if self.is_closed() {
                    channel.close();
                    return false;
                }
                *self.channel.write() = Some(Arc::new(channel));
                true
            }
            Err(e) => {
                warn!(
                    %address,
                    code = e.error_code(),
                    retryable = e.is_retryable(),
                    "❌ 连接服务器失败: {}",
                    e
                );
                tokio::time::sleep(config.connect_failure_pause).await;
                false
            }
        }
    }

    fn update_status(&self, status: ConnectStatus) {
        *self.connect_status.write() = status;
        match status {
            ConnectStatus::Connecting => {
                info!("⏳ IM 连接中...");
                self.callback.on_connecting();
            }
            ConnectStatus::Connected => {
                let address = self.current_channel().map(|c| c.address().to_string());
                info!(address = ?address, "✅ IM 连接成功");
                self.callback.on_connected();

                let handshake = self.listener.handshake_msg();
                debug!(msg_id = handshake.msg_id(), "🤝 发送握手消息");
                self.send_msg(handshake, false);
            }
            ConnectStatus::Failed => {
                warn!("❌ IM 连接失败");
                self.callback.on_connect_failed();
            }
            ConnectStatus::Disconnected => {}
        }
    }

    fn send_msg(&self, msg: Msg, join_timeout_manager: bool) {
        if msg.head.is_none() {
            warn!("发送消息失败，消息头为空");
            return;
        }
        if join_timeout_manager && !msg.msg_id().is_empty() {
            self.timeouts.add(&msg);
        }

        let Some(channel) = self.current_channel() else {
            warn!(msg_id = msg.msg_id(), "发送消息失败，当前没有连接");
            return;
        };
        let msg_id = msg.msg_id().to_string();
        if let Err(e) = channel.send(msg) {
            warn!(msg_id = %msg_id, "发送消息失败: {}", e);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close_channel(&self) {
        if let Some(channel) = self.channel.write().take() {
            channel.close();
        }
    }

    /// 安装（或替换）当前连接上的心跳空闲检测
    fn install_idle(&self) {
        let Some(channel) = self.current_channel() else {
            return;
        };
        if channel.is_active() {
            let interval = self.effective.read().heartbeat_interval();
            channel.install_idle(IdleConfig::from_heartbeat_interval(interval));
        }
    }

    fn spawn_reset_connect(&self) {
        if self.is_closed() {
            return;
        }
        if let Some(this) = self.weak_self.upgrade() {
            tokio::spawn(async move { this.reset_connect(false).await });
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("🛑 关闭 IM 客户端");

        self.close_channel();
        self.executors.destroy();
        self.timeouts.clear();
        self.reconnecting.store(false, Ordering::SeqCst);
        *self.connect_status.write() = ConnectStatus::Disconnected;
        if let Some(pump) = self.event_pump.lock().take() {
            pump.abort();
        }
    }

    fn handle_channel_event(&self, event: ChannelEvent) {
        let current = self.current_channel();
        let Some(channel) = current.filter(|c| c.id() == event.channel_id()) else {
            trace!(channel_id = event.channel_id(), "忽略过期连接的事件");
            return;
        };

        match event {
            ChannelEvent::MessageReceived { msg, .. } => {
                self.pipeline.handle(self, msg);
            }
            ChannelEvent::WriterIdle { .. } => {
                let heartbeat = self.listener.heartbeat_msg();
                let interval = self.effective.read().heartbeat_interval();
                self.executors.exec_work(HeartbeatTask::new(channel, heartbeat, interval).run());
            }
            ChannelEvent::ReaderIdle { .. } => {
                warn!(channel_id = channel.id(), "💔 读空闲超时，连接可能已断开，准备重连");
                self.spawn_reset_connect();
            }
            ChannelEvent::Inactive { reason, .. } => {
                warn!(channel_id = channel.id(), ?reason, "🔗 连接已断开，准备重连");
                self.close_channel();
                self.spawn_reset_connect();
            }
            ChannelEvent::Exception { error, .. } => {
                warn!(channel_id = channel.id(), code = error.error_code(), "🔗 连接异常: {}，准备重连", error);
                self.close_channel();
                self.spawn_reset_connect();
            }
        }
    }
}

impl InboundContext for ClientInner {
    fn listener(&self) -> &Arc<dyn EventListener> {
        &self.listener
    }

    fn dispatcher(&self) -> &MsgDispatcher {
        &self.dispatcher
    }

    fn timeout_manager(&self) -> &MsgTimeoutManager {
        &self.timeouts
    }

    fn send_msg(&self, msg: Msg, join_timeout_manager: bool) {
        ClientInner::send_msg(self, msg, join_timeout_manager);
    }

    fn install_heartbeat(&self) {
        self.install_idle();
    }

    fn on_handshake_rejected(&self, status: i64) {
        warn!(status, "🤝 握手被拒绝，准备重连");
        self.spawn_reset_connect();
    }
}

impl TimeoutHost for ClientInner {
    fn is_closed(&self) -> bool {
        ClientInner::is_closed(self)
    }

    fn resend_count(&self) -> i64 {
        self.effective.read().resend_count
    }

    fn resend_interval(&self) -> Duration {
        self.effective.read().resend_interval
    }

    fn event_listener(&self) -> Arc<dyn EventListener> {
        self.listener.clone()
    }

    fn resend(&self, msg: Msg) {
        ClientInner::send_msg(self, msg, false);
    }

    fn deliver_failure(&self, report: Msg) {
        self.dispatcher.received_msg(report);
    }

    fn on_resend_exhausted(&self) {
        self.spawn_reset_connect();
    }
}

async fn run_event_pump(client: Weak<ClientInner>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        let Some(client) = client.upgrade() else {
            break;
        };
        client.handle_channel_event(event);
    }
    debug!("连接事件处理任务退出");
}
