use std::time::Duration;

use chrono::{DateTime, Utc};
use sms_core::config::RetryConfig;

/// 发送重试策略
///
/// 指数退避加随机抖动，供应商返回 `Retry-After` 时以其为下限。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// 已发出 `attempts` 次调用后是否还允许再试
    pub fn can_retry(&self, attempts: i32) -> bool {
        let retries_used = attempts.saturating_sub(1).max(0) as u32;
        retries_used < self.config.max_retries
    }

    /// 第 `attempts` 次调用失败后的等待时间
    pub fn backoff(&self, attempts: i32, retry_after: Option<Duration>) -> Duration {
        let base_interval = self.config.base_interval_seconds as f64;
        let max_interval = self.config.max_interval_seconds as f64;
        let exponent = attempts.saturating_sub(1).clamp(0, 30);

        let exponential_interval = base_interval * self.config.backoff_multiplier.powi(exponent);
        let capped_interval = exponential_interval.min(max_interval);

        // 随机抖动，避免大量任务在同一时刻重试
        let jitter =
            capped_interval * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let interval = Duration::from_secs_f64((capped_interval + jitter).max(base_interval));

        match retry_after {
            Some(hint) => interval.max(hint.min(Duration::from_secs(self.config.max_interval_seconds))),
            None => interval,
        }
    }

    pub fn next_attempt_at(
        &self,
        attempts: i32,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let wait = self.backoff(attempts, retry_after);
        now + chrono::Duration::from_std(wait).unwrap_or(chrono::Duration::seconds(60))
    }
}
