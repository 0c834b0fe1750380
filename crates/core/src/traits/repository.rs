//! 数据仓储层接口定义
//!
//! 投递核心依赖的持久化抽象：
//! - `CampaignRepository` - 营销活动、收件人快照，以及发送开始时的原子写入
//! - `DeliveryTaskRepository` - 投递任务，即持久化的发送队列
//! - `VendorResponseRepository` - 供应商响应审计记录
//!
//! 所有状态修改都是条件更新：调用方给出期望的前置状态，
//! 状态已被其他参与者改变时返回 `None`，由调用方视为竞争失败。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::DispatchResult;
use crate::models::{
    Campaign, CampaignContentUpdate, CampaignStatus, DeliveryTask, RecipientSnapshot, TaskCounts,
    TaskStatus, TaskUpdate, VendorResponseRecord,
};

/// `start_send` 成功后的结果
#[derive(Debug, Clone)]
pub struct StartedSend {
    pub campaign: Campaign,
    pub snapshot_id: i64,
    pub task_count: usize,
}

/// 营销活动仓储
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, campaign: &Campaign) -> DispatchResult<Campaign>;

    async fn get_by_id(&self, id: i64) -> DispatchResult<Option<Campaign>>;

    /// 修改内容字段，活动离开 draft/scheduled 后返回 `InvalidState`
    async fn update_content(
        &self,
        id: i64,
        update: &CampaignContentUpdate,
        now: DateTime<Utc>,
    ) -> DispatchResult<Campaign>;

    /// 条件迁移活动状态
    ///
    /// 迁移到终态时写入 `completed_at`，`last_error` 存在时一并写入。
    async fn transition_status(
        &self,
        id: i64,
        expected: &[CampaignStatus],
        next: CampaignStatus,
        last_error: Option<&str>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<Campaign>>;

    /// 设置计划发送时间并迁移到 scheduled
    async fn schedule(
        &self,
        id: i64,
        expected: &[CampaignStatus],
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<Campaign>>;

    /// 在同一事务中保存快照、写入全部投递任务并把活动迁移到 sending
    ///
    /// 活动已不在 `expected` 状态时不写入任何数据并返回 `None`。
    async fn start_send(
        &self,
        campaign_id: i64,
        expected: &[CampaignStatus],
        snapshot: &RecipientSnapshot,
        tasks: &[DeliveryTask],
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<StartedSend>>;

    async fn get_snapshot(&self, snapshot_id: i64) -> DispatchResult<Option<RecipientSnapshot>>;

    /// 计划时间已到的 scheduled 活动
    async fn find_due_scheduled(&self, now: DateTime<Utc>) -> DispatchResult<Vec<Campaign>>;

    async fn find_by_status(&self, status: CampaignStatus) -> DispatchResult<Vec<Campaign>>;
}

/// 投递任务仓储
#[async_trait]
pub trait DeliveryTaskRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> DispatchResult<Option<DeliveryTask>>;

    async fn find_by_vendor_message_id(
        &self,
        vendor_message_id: &str,
    ) -> DispatchResult<Option<DeliveryTask>>;

    async fn find_by_campaign(
        &self,
        campaign_id: i64,
        status: Option<TaskStatus>,
    ) -> DispatchResult<Vec<DeliveryTask>>;

    /// 原子认领一个到期的 pending/retrying 任务并迁移到 in_flight
    ///
    /// 同一任务只会被一个 worker 认领。
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<DeliveryTask>>;

    /// 比较并设置任务状态
    ///
    /// 任务当前状态不在 `expected` 中时返回 `None`。
    async fn transition(
        &self,
        id: i64,
        expected: &[TaskStatus],
        update: &TaskUpdate,
    ) -> DispatchResult<Option<DeliveryTask>>;

    /// 把活动下所有 pending/retrying 任务迁移到 cancelled，返回受影响的行数
    async fn cancel_pending(&self, campaign_id: i64, now: DateTime<Utc>) -> DispatchResult<u64>;

    /// 在给定状态下停留超过 `older_than` 的任务
    async fn find_stale(
        &self,
        statuses: &[TaskStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<DeliveryTask>>;

    /// 发送时间不早于 `sent_since`、且超过 `older_than` 未更新的 sent 任务
    async fn find_awaiting_delivery(
        &self,
        sent_since: DateTime<Utc>,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<DeliveryTask>>;

    async fn count_by_status(&self, campaign_id: i64) -> DispatchResult<TaskCounts>;
}

/// 供应商响应审计仓储
#[async_trait]
pub trait VendorResponseRepository: Send + Sync {
    async fn record(&self, record: &VendorResponseRecord) -> DispatchResult<i64>;

    async fn find_by_task(&self, task_id: i64) -> DispatchResult<Vec<VendorResponseRecord>>;
}
