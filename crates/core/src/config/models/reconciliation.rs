use serde::{Deserialize, Serialize};

/// 对账与超时配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// unconfirmed 任务停留超过该时间后开始查询供应商
    pub unconfirmed_after_seconds: u64,
    /// in_flight 任务停留超过该时间视为 worker 已崩溃
    pub stale_in_flight_seconds: u64,
    pub max_attempts: u32,
    /// sending 状态的活动超过该时间后强制结束
    pub campaign_timeout_seconds: u64,
    /// sent 任务超过该时间仍未收到回执时主动查询投递结果
    pub delivery_check_after_seconds: u64,
    /// 只查询发送时间在该窗口内的 sent 任务
    pub delivery_window_seconds: u64,
    pub batch_size: i64,
    pub schedule_scan_interval_seconds: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 30,
            unconfirmed_after_seconds: 60,
            stale_in_flight_seconds: 300,
            max_attempts: 5,
            campaign_timeout_seconds: 24 * 3600,
            delivery_check_after_seconds: 300,
            delivery_window_seconds: 24 * 3600,
            batch_size: 200,
            schedule_scan_interval_seconds: 10,
        }
    }
}

impl ReconciliationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_seconds == 0 {
            return Err(anyhow::anyhow!("对账间隔必须大于0"));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大对账次数必须大于0"));
        }

        if self.campaign_timeout_seconds <= self.stale_in_flight_seconds {
            return Err(anyhow::anyhow!("活动超时时间必须大于in_flight超时阈值"));
        }

        if self.delivery_check_after_seconds == 0 {
            return Err(anyhow::anyhow!("回执查询等待时间必须大于0"));
        }

        if self.delivery_window_seconds <= self.delivery_check_after_seconds {
            return Err(anyhow::anyhow!("回执查询窗口必须大于回执查询等待时间"));
        }

        if self.batch_size <= 0 {
            return Err(anyhow::anyhow!("对账批量大小必须大于0"));
        }

        if self.schedule_scan_interval_seconds == 0 {
            return Err(anyhow::anyhow!("计划活动扫描间隔必须大于0"));
        }

        Ok(())
    }
}
