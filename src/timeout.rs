/// 消息发送超时管理
///
/// 需要服务端确认的消息在发送前登记到这里，每隔 resend_interval 重发一次，
/// 超过 resend_count 次仍未收到确认则合成一条失败状态报告交给应用层，并触发重连。
///
/// 所有条目共用一个 `DelayQueue` 调度任务，条目本身保存在 `DashMap` 中，
/// 确认（remove）与重发互不阻塞。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, warn};

use crate::listener::EventListener;
use crate::message::Msg;

/// 单次重发等待的上限，`DelayQueue` 不接受超过约 2^36 毫秒的延时
pub const MAX_RESEND_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// 超时管理器依赖的客户端能力
pub trait TimeoutHost: Send + Sync + 'static {
    fn is_closed(&self) -> bool;

    fn resend_count(&self) -> i64;

    fn resend_interval(&self) -> Duration;

    fn event_listener(&self) -> Arc<dyn EventListener>;

    /// 重发消息（不再登记到超时管理器）
    fn resend(&self, msg: Msg);

    /// 把合成的失败状态报告交给转发器
    fn deliver_failure(&self, report: Msg);

    /// 重发次数耗尽，连接视为不可用
    fn on_resend_exhausted(&self);
}

#[derive(Debug, Clone)]
struct TimeoutEntry {
    msg: Msg,
    retry_count: i64,
    generation: u64,
}

enum SchedulerCommand {
    Arm {
        msg_id: String,
        generation: u64,
        delay: Duration,
    },
    Cancel(String),
    Clear,
}

/// 消息发送超时管理器
pub struct MsgTimeoutManager {
    entries: Arc<DashMap<String, TimeoutEntry>>,
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    host: Weak<dyn TimeoutHost>,
    generation: AtomicU64,
    scheduler: JoinHandle<()>,
}

impl MsgTimeoutManager {
    /// 创建管理器并启动调度任务，必须在 tokio 运行时内调用
    pub fn new(host: Weak<dyn TimeoutHost>) -> Self {
        let entries = Arc::new(DashMap::new());
        let (commands, receiver) = mpsc::unbounded_channel();
        let scheduler = tokio::spawn(run_scheduler(receiver, entries.clone(), host.clone()));

        Self {
            entries,
            commands,
            host,
            generation: AtomicU64::new(0),
            scheduler,
        }
    }

    /// 登记消息
    ///
    /// 握手、心跳、客户端接收状态报告不需要重发，直接忽略；已登记的消息ID不重复登记。
    pub fn add(&self, msg: &Msg) {
        let Some(head) = msg.head.as_ref() else {
            return;
        };
        if head.msg_id.is_empty() {
            return;
        }
        let Some(host) = self.host.upgrade() else {
            return;
        };

        let listener = host.event_listener();
        let untracked = [
            listener.handshake_msg().msg_type(),
            listener.heartbeat_msg().msg_type(),
            Some(listener.client_received_report_msg_type()),
        ];
        if untracked.contains(&Some(head.msg_type)) {
            return;
        }

        if let dashmap::mapref::entry::Entry::Vacant(vacant) = self.entries.entry(head.msg_id.clone()) {
            let generation = self.generation.fetch_add(1, Ordering::Relaxed);
            vacant.insert(TimeoutEntry {
                msg: msg.clone(),
                retry_count: 0,
                generation,
            });
            let _ = self.commands.send(SchedulerCommand::Arm {
                msg_id: head.msg_id.clone(),
                generation,
                delay: host.resend_interval(),
            });
        }
        debug!(msg_id = %head.msg_id, tracked = self.entries.len(), "⏱️ 消息加入超时管理器");
    }

    /// 移除消息并停止其定时器，未知ID直接忽略
    pub fn remove(&self, msg_id: &str) -> bool {
        if msg_id.is_empty() {
            return false;
        }
        match self.entries.remove(msg_id) {
            Some(_) => {
                let _ = self.commands.send(SchedulerCommand::Cancel(msg_id.to_string()));
                debug!(msg_id, tracked = self.entries.len(), "⏱️ 消息移出超时管理器");
                true
            }
            None => false,
        }
    }

    /// 重连并握手成功后，立即重发所有未确认消息一次（不影响各自的重发计数）
    pub fn on_reset_connected(&self) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        let pending: Vec<Msg> = self.entries.iter().map(|entry| entry.msg.clone()).collect();
        if !pending.is_empty() {
            info!("🔁 重连成功，重发 {} 条未确认消息", pending.len());
        }
        for msg in pending {
            host.resend(msg);
        }
    }

    /// 清空全部条目
    pub fn clear(&self) {
        self.entries.clear();
        let _ = self.commands.send(SchedulerCommand::Clear);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, msg_id: &str) -> bool {
        self.entries.contains_key(msg_id)
    }
}

impl Drop for MsgTimeoutManager {
    fn drop(&mut self) {
        self.scheduler.abort();
    }
}

async fn run_scheduler(
    mut commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    entries: Arc<DashMap<String, TimeoutEntry>>,
    host: Weak<dyn TimeoutHost>,
) {
    let mut queue: DelayQueue<(String, u64)> = DelayQueue::new();
    let mut keys: HashMap<String, delay_queue::Key> = HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SchedulerCommand::Arm { msg_id, generation, delay }) => {
                    if let Some(key) = keys.remove(&msg_id) {
                        queue.remove(&key);
                    }
                    arm(&mut queue, &mut keys, msg_id, generation, delay);
                }
                Some(SchedulerCommand::Cancel(msg_id)) => {
                    if let Some(key) = keys.remove(&msg_id) {
                        queue.remove(&key);
                    }
                }
                Some(SchedulerCommand::Clear) => {
                    queue.clear();
                    keys.clear();
                }
                None => break,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let (msg_id, generation) = expired.into_inner();
                keys.remove(&msg_id);
                if let Some(delay) = on_timer_fired(&entries, &host, &msg_id, generation) {
                    arm(&mut queue, &mut keys, msg_id, generation, delay);
                }
            }
        }
    }
}

fn arm(
    queue: &mut DelayQueue<(String, u64)>,
    keys: &mut HashMap<String, delay_queue::Key>,
    msg_id: String,
    generation: u64,
    delay: Duration,
) {
    if delay > MAX_RESEND_DELAY {
        warn!(msg_id = %msg_id, delay_ms = ?delay.as_millis(), "⏱️ 重发间隔过大，按上限处理");
    }
    let key = queue.insert((msg_id.clone(), generation), delay.min(MAX_RESEND_DELAY));
    keys.insert(msg_id, key);
}

/// 处理一次定时器触发，返回下一次触发的间隔；返回 None 表示条目已结束
fn on_timer_fired(
    entries: &DashMap<String, TimeoutEntry>,
    host: &Weak<dyn TimeoutHost>,
    msg_id: &str,
    generation: u64,
) -> Option<Duration> {
    let Some(host) = host.upgrade() else {
        entries.remove(msg_id);
        return None;
    };

    if host.is_closed() {
        entries.remove(msg_id);
        return None;
    }

    let (retry_count, msg) = {
        let mut entry = entries.get_mut(msg_id)?;
        if entry.generation != generation {
            return None;
        }
        entry.retry_count += 1;
        (entry.retry_count, entry.msg.clone())
    };

    if retry_count > host.resend_count() {
        // 可能已被并发确认，只有真正移除的一方才上报失败
        if entries.remove(msg_id).is_some() {
            warn!(msg_id, retry_count, "❌ 消息重发次数耗尽，通知应用层发送失败");
            let report_type = host.event_listener().server_sent_report_msg_type();
            host.deliver_failure(Msg::failure_report(msg_id, report_type));
            host.on_resend_exhausted();
        }
        None
    } else {
        debug!(msg_id, retry_count, "🔁 消息发送超时，重发");
        host.resend(msg);
        Some(host.resend_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::REPORT_FAILURE;
    use crate::test_support::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct MockHost {
        listener: Arc<TestListener>,
        closed: AtomicBool,
        resent: Mutex<Vec<String>>,
        failures: Mutex<Vec<Msg>>,
        reconnects: AtomicUsize,
        interval: Duration,
    }

    impl MockHost {
        fn new() -> Arc<Self> {
            Self::with_interval(Duration::from_millis(100))
        }

        fn with_interval(interval: Duration) -> Arc<Self> {
            Arc::new(Self {
                listener: Arc::new(TestListener::default()),
                closed: AtomicBool::new(false),
                resent: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
                reconnects: AtomicUsize::new(0),
                interval,
            })
        }

        fn resent(&self) -> Vec<String> {
            self.resent.lock().clone()
        }
    }

    impl TimeoutHost for MockHost {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
        fn resend_count(&self) -> i64 {
            3
        }
        fn resend_interval(&self) -> Duration {
            self.interval
        }
        fn event_listener(&self) -> Arc<dyn EventListener> {
            self.listener.clone()
        }
        fn resend(&self, msg: Msg) {
            self.resent.lock().push(msg.msg_id().to_string());
        }
        fn deliver_failure(&self, report: Msg) {
            self.failures.lock().push(report);
        }
        fn on_resend_exhausted(&self) {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager_for(host: &Arc<MockHost>) -> MsgTimeoutManager {
        let weak: Weak<MockHost> = Arc::downgrade(host);
        MsgTimeoutManager::new(weak)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_then_failure_report() {
        let host = MockHost::new();
        let manager = manager_for(&host);

        manager.add(&Msg::new("abc", CHAT_TYPE));
        assert!(manager.contains("abc"));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(host.resent(), vec!["abc", "abc", "abc"]);
        assert!(host.failures.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let failures = host.failures.lock().clone();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].msg_id(), "abc");
        assert_eq!(failures[0].msg_type(), Some(SERVER_REPORT_TYPE));
        assert_eq!(failures[0].status_report(), Some(REPORT_FAILURE));
        assert_eq!(host.reconnects.load(Ordering::SeqCst), 1);
        assert!(!manager.contains("abc"));

        // 条目结束后不再触发
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(host.resent().len(), 3);
        assert_eq!(host.failures.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_stops_timer() {
        let host = MockHost::new();
        let manager = manager_for(&host);

        manager.add(&Msg::new("abc", CHAT_TYPE));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(manager.remove("abc"));
        assert!(!manager.remove("abc"));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(host.resent().len(), 1);
        assert!(host.failures.lock().is_empty());
        assert_eq!(host.reconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_messages_never_tracked() {
        let host = MockHost::new();
        let manager = manager_for(&host);

        manager.add(&Msg::new("hs", HANDSHAKE_TYPE));
        manager.add(&Msg::new("hb", HEARTBEAT_TYPE));
        manager.add(&Msg::new("rr", CLIENT_REPORT_TYPE));
        manager.add(&Msg::new("", CHAT_TYPE));
        manager.add(&Msg::default());

        assert!(manager.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_add_keeps_single_timer() {
        let host = MockHost::new();
        let manager = manager_for(&host);

        let msg = Msg::new("abc", CHAT_TYPE);
        manager.add(&msg);
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.add(&msg);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.len(), 1);
        assert_eq!(host.resent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_host_drops_entry_without_resend() {
        let host = MockHost::new();
        let manager = manager_for(&host);

        manager.add(&Msg::new("abc", CHAT_TYPE));
        host.closed.store(true, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(host.resent().is_empty());
        assert!(!manager.contains("abc"));
        assert!(host.failures.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_reset_connected_resends_all_once() {
        let host = MockHost::new();
        let manager = manager_for(&host);

        manager.add(&Msg::new("a", CHAT_TYPE));
        manager.add(&Msg::new("b", CHAT_TYPE));
        manager.on_reset_connected();

        let mut resent = host.resent();
        resent.sort();
        assert_eq!(resent, vec!["a", "b"]);
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_removes_everything() {
        let host = MockHost::new();
        let manager = manager_for(&host);

        manager.add(&Msg::new("a", CHAT_TYPE));
        manager.add(&Msg::new("b", CHAT_TYPE));
        manager.clear();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(manager.is_empty());
        assert!(host.resent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_interval_is_capped() {
        let host = MockHost::with_interval(Duration::from_millis(100_000_000_000));
        let manager = manager_for(&host);

        manager.add(&Msg::new("abc", CHAT_TYPE));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!manager.scheduler.is_finished());

        // 调度任务仍然存活，后续登记与确认照常工作
        manager.add(&Msg::new("def", CHAT_TYPE));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.remove("def"));
        assert!(!manager.scheduler.is_finished());

        tokio::time::sleep(MAX_RESEND_DELAY).await;
        assert_eq!(host.resent(), vec!["abc"]);
        assert!(manager.contains("abc"));
    }
}
