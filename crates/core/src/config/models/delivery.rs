use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;

/// 供应商发送速率
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub tokens_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tokens_per_second: 10.0,
            burst: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tokens_per_second <= 0.0 {
            return Err(anyhow::anyhow!("每秒令牌数必须大于0"));
        }

        if self.burst == 0 {
            return Err(anyhow::anyhow!("突发容量必须大于0"));
        }

        Ok(())
    }
}

/// 投递 worker 池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// worker ID 前缀，实际ID为 `{prefix}-{hostname}-{n}`
    pub worker_id_prefix: String,
    pub workers: usize,
    pub poll_interval_ms: u64,
    /// 熔断器打开时的空闲等待
    pub circuit_open_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_id_prefix: "sms-worker".to_string(),
            workers: 4,
            poll_interval_ms: 500,
            circuit_open_backoff_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id_prefix.is_empty() {
            return Err(anyhow::anyhow!("Worker ID前缀不能为空"));
        }

        if self.workers == 0 {
            return Err(anyhow::anyhow!("Worker数量必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn circuit_open_backoff(&self) -> Duration {
        Duration::from_millis(self.circuit_open_backoff_ms)
    }
}

/// 重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 发送失败后最多重试的次数
    pub max_retries: u32,
    pub base_interval_seconds: u64,
    pub max_interval_seconds: u64,
    pub backoff_multiplier: f64,
    /// 抖动系数 (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_interval_seconds: 2,
            max_interval_seconds: 300,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_interval_seconds == 0 {
            return Err(anyhow::anyhow!("基础重试间隔必须大于0"));
        }

        if self.max_interval_seconds < self.base_interval_seconds {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }

        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1.0"));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动系数必须在0.0到1.0之间"));
        }

        Ok(())
    }
}

/// 供应商熔断器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: usize,
    pub recovery_timeout_seconds: u64,
    pub success_threshold: usize,
    pub backoff_multiplier: f64,
    pub max_recovery_timeout_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 30,
            success_threshold: 2,
            backoff_multiplier: 2.0,
            max_recovery_timeout_seconds: 300,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(anyhow::anyhow!("熔断器阈值必须大于0"));
        }

        if self.recovery_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("熔断恢复时间必须大于0"));
        }

        if self.max_recovery_timeout_seconds < self.recovery_timeout_seconds {
            return Err(anyhow::anyhow!("最大熔断恢复时间不能小于初始恢复时间"));
        }

        Ok(())
    }

    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_seconds),
            success_threshold: self.success_threshold,
            backoff_multiplier: self.backoff_multiplier,
            max_recovery_timeout: Duration::from_secs(self.max_recovery_timeout_seconds),
        }
    }
}
