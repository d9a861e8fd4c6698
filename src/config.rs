/// IM 客户端配置
///
/// 内置默认值 + 可序列化的 `ImConfig`，以及根据应用层 listener
/// 覆盖后得到的不可变快照 `EffectiveConfig`。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::listener::EventListener;

/// 默认重连周期间隔（毫秒）
pub const DEFAULT_RECONNECT_INTERVAL: u64 = 3 * 1000;
/// 默认连接超时（毫秒）
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10 * 1000;
/// 默认每个地址的重连次数
pub const DEFAULT_RECONNECT_COUNT: u32 = 3;
/// 默认重连起始延时（毫秒），第 n 次失败后延时 n * 起始延时
pub const DEFAULT_RECONNECT_BASE_DELAY_TIME: u64 = 3 * 1000;
/// 默认消息发送超时重发次数
pub const DEFAULT_RESEND_COUNT: u32 = 3;
/// 默认消息重发间隔（毫秒）
pub const DEFAULT_RESEND_INTERVAL: u64 = 8 * 1000;
/// 默认前台心跳间隔（毫秒）
pub const DEFAULT_HEARTBEAT_INTERVAL_FOREGROUND: u64 = 3 * 1000;
/// 默认后台心跳间隔（毫秒）
pub const DEFAULT_HEARTBEAT_INTERVAL_BACKGROUND: u64 = 30 * 1000;
/// 网络不可用时的轮询间隔（毫秒）
pub const DEFAULT_NETWORK_POLL_INTERVAL: u64 = 2 * 1000;
/// 单次 socket 连接失败后的停顿（毫秒）
pub const DEFAULT_CONNECT_FAILURE_PAUSE: u64 = 500;

/// 状态报告：成功
pub const REPORT_SUCCESSFUL: i32 = 1;
/// 状态报告：失败
pub const REPORT_FAILURE: i32 = 0;

/// 读空闲阈值 = 心跳间隔 * 3（3 次心跳无任何入站数据即认为连接已断开）
pub const READER_IDLE_HEARTBEAT_MULTIPLIER: u32 = 3;

/// 应用前后台状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Foreground,
    Background,
}

/// 客户端内置配置
///
/// 字段单位均为毫秒；listener 返回的正值会覆盖对应字段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImConfig {
    /// 重连周期间隔：非首次重连前的去抖等待，以及一轮地址全部失败后的等待
    pub reconnect_interval_ms: u64,
    /// 连接超时
    pub connect_timeout_ms: u64,
    /// 每个地址最大连接次数
    pub reconnect_count: u32,
    /// 线性退避的起始延时
    pub reconnect_base_delay_ms: u64,
    /// 超时重发次数
    pub resend_count: u32,
    /// 超时重发间隔
    pub resend_interval_ms: u64,
    /// 前台心跳间隔
    pub foreground_heartbeat_interval_ms: u64,
    /// 后台心跳间隔
    pub background_heartbeat_interval_ms: u64,
    /// 网络不可用时的轮询间隔
    pub network_poll_interval_ms: u64,
    /// 单次连接失败后的停顿
    pub connect_failure_pause_ms: u64,
    /// TCP_NODELAY
    pub nodelay: bool,
    /// SO_KEEPALIVE
    pub keepalive: bool,
}

impl Default for ImConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT,
            reconnect_count: DEFAULT_RECONNECT_COUNT,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_TIME,
            resend_count: DEFAULT_RESEND_COUNT,
            resend_interval_ms: DEFAULT_RESEND_INTERVAL,
            foreground_heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_FOREGROUND,
            background_heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_BACKGROUND,
            network_poll_interval_ms: DEFAULT_NETWORK_POLL_INTERVAL,
            connect_failure_pause_ms: DEFAULT_CONNECT_FAILURE_PAUSE,
            nodelay: true,
            keepalive: true,
        }
    }
}

/// 毫秒数，超出 u64 范围时取 u64::MAX
fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl ImConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置重连周期间隔
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = duration_ms(interval);
        self
    }

    /// 设置连接超时
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// 设置每个地址的最大连接次数
    pub fn with_reconnect_count(mut self, count: u32) -> Self {
        self.reconnect_count = count;
        self
    }

    /// 设置线性退避起始延时
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay_ms = duration_ms(delay);
        self
    }

    /// 设置超时重发次数
    pub fn with_resend_count(mut self, count: u32) -> Self {
        self.resend_count = count;
        self
    }

    /// 设置超时重发间隔
    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval_ms = duration_ms(interval);
        self
    }

    /// 设置前后台心跳间隔
    pub fn with_heartbeat_intervals(mut self, foreground: Duration, background: Duration) -> Self {
        self.foreground_heartbeat_interval_ms = duration_ms(foreground);
        self.background_heartbeat_interval_ms = duration_ms(background);
        self
    }

    /// 设置网络轮询间隔
    pub fn with_network_poll_interval(mut self, interval: Duration) -> Self {
        self.network_poll_interval_ms = duration_ms(interval);
        self
    }

    /// 设置连接失败停顿
    pub fn with_connect_failure_pause(mut self, pause: Duration) -> Self {
        self.connect_failure_pause_ms = duration_ms(pause);
        self
    }

    /// 设置 TCP_NODELAY
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 设置 SO_KEEPALIVE
    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), TransportError> {
        let positive = [
            ("reconnect_interval_ms", self.reconnect_interval_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("reconnect_base_delay_ms", self.reconnect_base_delay_ms),
            ("resend_interval_ms", self.resend_interval_ms),
            ("foreground_heartbeat_interval_ms", self.foreground_heartbeat_interval_ms),
            ("background_heartbeat_interval_ms", self.background_heartbeat_interval_ms),
            ("network_poll_interval_ms", self.network_poll_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(TransportError::config_error(field, "must be > 0"));
            }
        }
        if self.reconnect_count == 0 {
            return Err(TransportError::config_error("reconnect_count", "must be > 0"));
        }
        Ok(())
    }

    /// 根据 listener 解析出生效配置快照
    ///
    /// 重连退避间隔、连接超时、心跳间隔、重发间隔：listener 返回正值时覆盖；
    /// 重发次数：listener 返回非零值时覆盖（负值表示首次超时即上报失败）。
    /// 重连周期间隔不受 listener 影响。
    pub fn resolve(&self, listener: &dyn EventListener, app_status: AppStatus) -> EffectiveConfig {
        let positive_or = |value: i64, default: u64| if value > 0 { value as u64 } else { default };

        let resend_count = match listener.resend_count() {
            0 => self.resend_count as i64,
            n => n,
        };
        let resend_interval_ms = positive_or(listener.resend_interval(), self.resend_interval_ms);

        EffectiveConfig {
            reconnect_cycle_interval: Duration::from_millis(self.reconnect_interval_ms),
            reconnect_interval: Duration::from_millis(positive_or(
                listener.reconnect_interval(),
                self.reconnect_base_delay_ms,
            )),
            connect_timeout: Duration::from_millis(positive_or(
                listener.connect_timeout(),
                self.connect_timeout_ms,
            )),
            reconnect_count: self.reconnect_count,
            resend_count,
            resend_interval: Duration::from_millis(resend_interval_ms),
            foreground_heartbeat_interval: Duration::from_millis(positive_or(
                listener.foreground_heartbeat_interval(),
                self.foreground_heartbeat_interval_ms,
            )),
            background_heartbeat_interval: Duration::from_millis(positive_or(
                listener.background_heartbeat_interval(),
                self.background_heartbeat_interval_ms,
            )),
            network_poll_interval: Duration::from_millis(self.network_poll_interval_ms),
            connect_failure_pause: Duration::from_millis(self.connect_failure_pause_ms),
            nodelay: self.nodelay,
            keepalive: self.keepalive,
            app_status,
        }
    }
}

/// 生效配置快照，只在 init / set_app_status / reload_config 时刷新
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub reconnect_cycle_interval: Duration,
    pub reconnect_interval: Duration,
    pub connect_timeout: Duration,
    pub reconnect_count: u32,
    pub resend_count: i64,
    pub resend_interval: Duration,
    pub foreground_heartbeat_interval: Duration,
    pub background_heartbeat_interval: Duration,
    pub network_poll_interval: Duration,
    pub connect_failure_pause: Duration,
    pub nodelay: bool,
    pub keepalive: bool,
    pub app_status: AppStatus,
}

impl EffectiveConfig {
    /// 当前前后台状态对应的心跳间隔
    pub fn heartbeat_interval(&self) -> Duration {
        match self.app_status {
            AppStatus::Foreground => self.foreground_heartbeat_interval,
            AppStatus::Background => self.background_heartbeat_interval,
        }
    }
}
