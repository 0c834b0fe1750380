use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{impl_sqlite_text_enum, RenderedMessage, Recipient};

/// 单个收件人的投递任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryTask {
    pub id: i64,
    pub campaign_id: i64,
    pub snapshot_id: i64,
    pub contact_id: i64,
    pub phone: String,
    /// 发给供应商的幂等键，超时后按它查询真实结果
    pub client_reference: String,
    pub message: RenderedMessage,
    pub status: TaskStatus,
    /// 实际发出的供应商调用次数
    pub attempt_count: i32,
    pub reconcile_attempts: i32,
    pub vendor_message_id: Option<String>,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryTask {
    pub fn new(
        campaign_id: i64,
        snapshot_id: i64,
        recipient: &Recipient,
        message: RenderedMessage,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            campaign_id,
            snapshot_id,
            contact_id: recipient.contact_id,
            phone: recipient.phone.clone(),
            client_reference: Uuid::new_v4().to_string(),
            message,
            status: TaskStatus::Pending,
            attempt_count: 0,
            reconcile_attempts: 0,
            vendor_message_id: None,
            last_error: None,
            next_attempt_at: now,
            claimed_by: None,
            claimed_at: None,
            sent_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 创建时即失败的任务，例如内容超过最大分段数
    pub fn failed_at_creation(mut self, reason: &str) -> Self {
        self.status = TaskStatus::Failed;
        self.last_error = Some(reason.to_string());
        self.completed_at = Some(self.created_at);
        self
    }

    pub fn segment_count(&self) -> usize {
        self.message.segment_count()
    }
}

/// 投递任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    /// 已被某个 worker 认领，正在调用供应商
    InFlight,
    /// 供应商已接受
    Sent,
    /// 调用超时，供应商侧结果未知，等待对账
    Unconfirmed,
    Retrying,
    Delivered,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// 占用 (campaign, contact) 唯一约束的状态
    pub const ACTIVE: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InFlight,
        TaskStatus::Unconfirmed,
        TaskStatus::Retrying,
    ];

    /// 可以被 worker 认领的状态
    pub const CLAIMABLE: [TaskStatus; 2] = [TaskStatus::Pending, TaskStatus::Retrying];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InFlight => "in_flight",
            TaskStatus::Sent => "sent",
            TaskStatus::Unconfirmed => "unconfirmed",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Delivered => "delivered",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// 活动完成判定时视为已结束；sent 仍可被回执推进
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TaskStatus::Sent | TaskStatus::Delivered | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Delivered | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending | Retrying, InFlight)
                | (Pending | Retrying, Cancelled)
                | (Pending | Retrying, Failed)
                | (InFlight, Sent)
                | (InFlight, Unconfirmed)
                | (InFlight, Retrying)
                | (InFlight, Failed)
                | (Unconfirmed, Sent)
                | (Unconfirmed, Delivered)
                | (Unconfirmed, Retrying)
                | (Unconfirmed, Failed)
                | (Sent, Delivered)
                | (Sent, Failed)
        )
    }

    /// 能迁移到 `next` 的所有前置状态
    pub fn predecessors_of(next: TaskStatus) -> Vec<TaskStatus> {
        Self::all()
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    pub fn all() -> [TaskStatus; 8] {
        [
            TaskStatus::Pending,
            TaskStatus::InFlight,
            TaskStatus::Sent,
            TaskStatus::Unconfirmed,
            TaskStatus::Retrying,
            TaskStatus::Delivered,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_flight" => Ok(TaskStatus::InFlight),
            "sent" => Ok(TaskStatus::Sent),
            "unconfirmed" => Ok(TaskStatus::Unconfirmed),
            "retrying" => Ok(TaskStatus::Retrying),
            "delivered" => Ok(TaskStatus::Delivered),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

impl_sqlite_text_enum!(TaskStatus);

/// 条件状态迁移时一并写入的字段
///
/// `None` 表示保持原值。
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
    pub count_attempt: bool,
    pub count_reconcile_attempt: bool,
    pub vendor_message_id: Option<String>,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn new(status: TaskStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            at,
            count_attempt: false,
            count_reconcile_attempt: false,
            vendor_message_id: None,
            last_error: None,
            next_attempt_at: None,
        }
    }

    /// 本次迁移对应一次实际发出的供应商调用
    pub fn counting_attempt(mut self) -> Self {
        self.count_attempt = true;
        self
    }

    pub fn counting_reconcile_attempt(mut self) -> Self {
        self.count_reconcile_attempt = true;
        self
    }

    pub fn with_vendor_message_id(mut self, id: impl Into<String>) -> Self {
        self.vendor_message_id = Some(id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn retry_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_attempt_at = Some(at);
        self
    }

    /// 迁移到 sent 时记录首次接受时间
    pub fn sets_sent_at(&self) -> bool {
        self.status == TaskStatus::Sent
    }

    pub fn sets_completed_at(&self) -> bool {
        self.status.is_terminal()
    }

    /// 把更新应用到内存中的任务，供内存仓储和测试使用
    pub fn apply_to(&self, task: &mut DeliveryTask) {
        task.status = self.status;
        task.updated_at = self.at;
        if self.count_attempt {
            task.attempt_count += 1;
        }
        if self.count_reconcile_attempt {
            task.reconcile_attempts += 1;
        }
        if let Some(id) = &self.vendor_message_id {
            task.vendor_message_id = Some(id.clone());
        }
        if let Some(error) = &self.last_error {
            task.last_error = Some(error.clone());
        }
        if let Some(at) = self.next_attempt_at {
            task.next_attempt_at = at;
        }
        if self.sets_sent_at() && task.sent_at.is_none() {
            task.sent_at = Some(self.at);
        }
        if self.sets_completed_at() {
            task.completed_at = Some(self.at);
        }
    }
}

/// 某个活动下各状态的任务数
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: u64,
    pub in_flight: u64,
    pub sent: u64,
    pub unconfirmed: u64,
    pub retrying: u64,
    pub delivered: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_segments: u64,
}

impl TaskCounts {
    pub fn add(&mut self, status: TaskStatus, count: u64) {
        match status {
            TaskStatus::Pending => self.pending += count,
            TaskStatus::InFlight => self.in_flight += count,
            TaskStatus::Sent => self.sent += count,
            TaskStatus::Unconfirmed => self.unconfirmed += count,
            TaskStatus::Retrying => self.retrying += count,
            TaskStatus::Delivered => self.delivered += count,
            TaskStatus::Failed => self.failed += count,
            TaskStatus::Cancelled => self.cancelled += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending
            + self.in_flight
            + self.sent
            + self.unconfirmed
            + self.retrying
            + self.delivered
            + self.failed
            + self.cancelled
    }

    /// 尚未结束的任务数
    pub fn active(&self) -> u64 {
        self.pending + self.in_flight + self.unconfirmed + self.retrying
    }

    /// 供应商已接受的任务数，包括已送达
    pub fn accepted(&self) -> u64 {
        self.sent + self.delivered
    }
}
