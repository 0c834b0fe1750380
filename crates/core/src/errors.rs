use std::time::Duration;

use thiserror::Error;

use crate::models::CampaignStatus;

/// 投递核心错误类型定义
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("营销活动未找到: {id}")]
    CampaignNotFound { id: i64 },

    #[error("投递任务未找到: {id}")]
    DeliveryTaskNotFound { id: i64 },

    #[error("短信模板未找到: {id}")]
    TemplateNotFound { id: i64 },

    /// 解析后的收件人列表为空，发送被拒绝
    #[error("营销活动 {campaign_id} 没有可发送的收件人 (无效号码 {invalid_count} 个, 退订 {opted_out_count} 个)")]
    EmptyAudience {
        campaign_id: i64,
        invalid_count: usize,
        opted_out_count: usize,
    },

    /// 当前状态不允许该操作，例如重复发送一个正在发送的活动
    #[error("营销活动 {campaign_id} 当前状态为 {status}，不允许执行 {action}")]
    InvalidState {
        campaign_id: i64,
        status: CampaignStatus,
        action: String,
    },

    /// 可重试的供应商错误（超时以外的网络错误、5xx）
    #[error("供应商临时错误: {0}")]
    TransientVendor(String),

    /// 不可重试的供应商错误（号码无效、内容被拒绝）
    #[error("供应商拒绝发送: {message} (code: {code:?})")]
    TerminalVendor {
        code: Option<String>,
        message: String,
    },

    /// 请求可能已经到达供应商，但无法确认是否被接受，不能直接重发
    #[error("供应商发送结果未知: {0}")]
    OutcomeUnknown(String),

    #[error("供应商限流 (retry_after: {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("供应商熔断器已打开，暂停发送")]
    CircuitOpen,

    #[error("投递任务 {task_id} 对账超时，已尝试 {attempts} 次仍无法确认结果")]
    ReconciliationTimeout { task_id: i64, attempts: i32 },

    #[error("短信内容过长: 需要 {segments} 段，最多允许 {max} 段")]
    MessageTooLong { segments: usize, max: usize },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn invalid_state(campaign_id: i64, status: CampaignStatus, action: &str) -> Self {
        Self::InvalidState {
            campaign_id,
            status,
            action: action.to_string(),
        }
    }

    /// 是否可以在退避后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientVendor(_) | Self::RateLimited { .. } | Self::CircuitOpen | Self::Network(_)
        )
    }

    /// 是否计入供应商熔断器的连续失败次数
    ///
    /// 终态拒绝只与单个号码相关，不代表供应商不可用。
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            Self::TransientVendor(_)
                | Self::RateLimited { .. }
                | Self::Network(_)
                | Self::OutcomeUnknown(_)
        )
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
