use std::time::Duration;

/// 单个地址的线性重连退避
///
/// 第 n 次连接失败后等待 `n * interval`，每个地址最多尝试 `max_attempts` 次，
/// 换到下一个地址时重新计数。
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    interval: Duration,
    max_attempts: u32,
}

impl LinearBackoff {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self { interval, max_attempts }
    }

    /// 尝试次数序列 1..=max_attempts
    pub fn attempts(&self) -> std::ops::RangeInclusive<u32> {
        1..=self.max_attempts
    }

    /// 第 `attempt` 次失败后的等待时长
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.interval.saturating_mul(attempt)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
