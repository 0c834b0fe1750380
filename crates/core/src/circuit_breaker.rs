use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// 正常放行
    Closed,
    /// 供应商视为不可用，调用直接失败
    Open,
    /// 冷却结束，放行试探调用
    HalfOpen,
}

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后熔断
    pub failure_threshold: usize,
    /// 第一次试探前的冷却时间
    pub recovery_timeout: Duration,
    /// 半开状态下连续成功多少次后恢复
    pub success_threshold: usize,
    /// 试探失败后冷却时间的放大倍数
    pub backoff_multiplier: f64,
    pub max_recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
            backoff_multiplier: 2.0,
            max_recovery_timeout: Duration::from_secs(300),
        }
    }
}

/// 熔断器统计
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub consecutive_successes: usize,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// 熔断期间被拒绝的调用
    pub rejected_calls: u64,
    pub last_state_change: Instant,
    pub current_recovery_timeout: Duration,
}

impl CircuitBreakerStats {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            last_state_change: Instant::now(),
            current_recovery_timeout: config.recovery_timeout,
        }
    }

    fn cool_down_elapsed(&self) -> bool {
        self.last_state_change.elapsed() >= self.current_recovery_timeout
    }
}

/// 保护短信供应商的熔断器
///
/// 调用方负责判断结果是否反映供应商健康状况，
/// 见 [`crate::DispatchError::counts_against_breaker`]。
/// 单个号码被供应商拒绝属于正常响应。
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    stats: Arc<RwLock<CircuitBreakerStats>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new("vendor")
    }
}

impl CircuitBreaker {
    pub fn new(name: &str) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: &str, config: CircuitBreakerConfig) -> Self {
        let stats = CircuitBreakerStats::new(&config);
        Self {
            name: name.to_string(),
            config,
            stats: Arc::new(RwLock::new(stats)),
        }
    }

    /// 当前是否会放行调用，不改变状态
    pub async fn allows_calls(&self) -> bool {
        let stats = self.stats.read().await;
        match stats.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => stats.cool_down_elapsed(),
        }
    }

    /// 申请一次调用；冷却结束后 Open 转为 HalfOpen
    pub async fn try_acquire(&self) -> bool {
        let mut stats = self.stats.write().await;
        match stats.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open if stats.cool_down_elapsed() => {
                stats.state = CircuitState::HalfOpen;
                stats.last_state_change = Instant::now();
                stats.consecutive_successes = 0;
                info!(breaker = %self.name, "熔断器半开，开始试探供应商");
                true
            }
            CircuitState::Open => {
                stats.rejected_calls += 1;
                false
            }
        }
    }

    pub async fn record_success(&self) {
        let mut stats = self.stats.write().await;

        stats.total_calls += 1;
        stats.successful_calls += 1;
        stats.consecutive_successes += 1;
        stats.consecutive_failures = 0;

        if stats.state == CircuitState::HalfOpen
            && stats.consecutive_successes >= self.config.success_threshold
        {
            stats.state = CircuitState::Closed;
            stats.last_state_change = Instant::now();
            stats.current_recovery_timeout = self.config.recovery_timeout;
            info!(breaker = %self.name, "熔断器已恢复");
        }
    }

    pub async fn record_failure(&self) {
        let mut stats = self.stats.write().await;

        stats.total_calls += 1;
        stats.failed_calls += 1;
        stats.consecutive_failures += 1;
        stats.consecutive_successes = 0;

        match stats.state {
            CircuitState::Closed
                if stats.consecutive_failures >= self.config.failure_threshold =>
            {
                stats.state = CircuitState::Open;
                stats.last_state_change = Instant::now();
                stats.current_recovery_timeout = self.config.recovery_timeout;
                warn!(
                    breaker = %self.name,
                    failures = stats.consecutive_failures,
                    "熔断器已打开"
                );
            }
            CircuitState::HalfOpen => {
                // 试探失败，加长冷却时间后重新熔断
                stats.state = CircuitState::Open;
                stats.last_state_change = Instant::now();
                stats.current_recovery_timeout = std::cmp::min(
                    Duration::from_millis(
                        (stats.current_recovery_timeout.as_millis() as f64
                            * self.config.backoff_multiplier) as u64,
                    ),
                    self.config.max_recovery_timeout,
                );
                warn!(
                    breaker = %self.name,
                    cool_down_ms = stats.current_recovery_timeout.as_millis() as u64,
                    "试探失败，熔断器重新打开"
                );
            }
            _ => {}
        }
    }

    pub async fn get_state(&self) -> CircuitState {
        self.stats.read().await.state
    }

    pub async fn get_stats(&self) -> CircuitBreakerStats {
        self.stats.read().await.clone()
    }

    /// 强制熔断，用于维护
    pub async fn force_open(&self) {
        let mut stats = self.stats.write().await;
        stats.state = CircuitState::Open;
        stats.last_state_change = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_circuit_breaker_closed_state() {
        let cb = CircuitBreaker::default();

        assert_eq!(cb.get_state().await, CircuitState::Closed);
        assert!(cb.try_acquire().await);
        cb.record_success().await;
        assert_eq!(cb.get_state().await, CircuitState::Closed);
        assert_eq!(cb.get_stats().await.successful_calls, 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_open_state() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let cb = CircuitBreaker::with_config("vendor", config);

        for _ in 0..3 {
            assert!(cb.try_acquire().await);
            cb.record_failure().await;
        }

        assert_eq!(cb.get_state().await, CircuitState::Open);
        assert!(!cb.allows_calls().await);
        assert!(!cb.try_acquire().await);
        assert_eq!(cb.get_stats().await.rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let cb = CircuitBreaker::with_config("vendor", config);

        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;

        assert_eq!(cb.get_state().await, CircuitState::Closed);
        assert_eq!(cb.get_stats().await.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_circuit_breaker_recovery() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(100),
            success_threshold: 2,
            ..Default::default()
        };
        let cb = CircuitBreaker::with_config("vendor", config);

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.get_state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cb.allows_calls().await);

        assert!(cb.try_acquire().await);
        assert_eq!(cb.get_state().await, CircuitState::HalfOpen);
        cb.record_success().await;
        assert_eq!(cb.get_state().await, CircuitState::HalfOpen);

        assert!(cb.try_acquire().await);
        cb.record_success().await;
        assert_eq!(cb.get_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_breaker_exponential_backoff() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_recovery_timeout: Duration::from_millis(300),
            ..Default::default()
        };
        let cb = CircuitBreaker::with_config("vendor", config);

        cb.record_failure().await;
        assert_eq!(cb.get_state().await, CircuitState::Open);
        assert_eq!(
            cb.get_stats().await.current_recovery_timeout,
            Duration::from_millis(100)
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cb.try_acquire().await);
        cb.record_failure().await;
        assert_eq!(cb.get_state().await, CircuitState::Open);
        assert_eq!(
            cb.get_stats().await.current_recovery_timeout,
            Duration::from_millis(200)
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(cb.try_acquire().await);
        cb.record_failure().await;
        // 不超过上限
        assert_eq!(
            cb.get_stats().await.current_recovery_timeout,
            Duration::from_millis(300)
        );
    }
}
