//! 对账
//!
//! 周期性地处理结果未知的任务：
//! 1. worker 崩溃遗留的 in_flight 任务转为 unconfirmed，不会直接重发；
//! 2. 轮询供应商确认 unconfirmed 任务的真实结果；
//! 3. 长时间收不到回执的 sent 任务在投递窗口内主动查询；
//! 4. 超过活动截止时间的 sending 活动强制结束。

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use sms_core::config::ReconciliationConfig;
use sms_core::models::{
    CampaignStatus, DeliveryTask, StatusQuery, TaskStatus, TaskUpdate, VendorResponseKind,
    VendorResponseRecord, VendorStatus,
};
use sms_core::traits::{
    CampaignRepository, DeliveryTaskRepository, SmsGateway, VendorResponseRepository,
};
use sms_core::{Clock, DispatchError, DispatchResult};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::outcome::DeliveryOutcomeResolver;
use crate::state_machine::CampaignStateMachine;

/// 一次对账的统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub stale_in_flight: usize,
    pub polled: usize,
    pub resolved: usize,
    pub delivery_checked: usize,
    pub timed_out: usize,
    pub campaigns_finalized: usize,
}

pub struct ReconciliationService {
    campaign_repo: Arc<dyn CampaignRepository>,
    task_repo: Arc<dyn DeliveryTaskRepository>,
    response_repo: Arc<dyn VendorResponseRepository>,
    gateway: Arc<dyn SmsGateway>,
    resolver: Arc<DeliveryOutcomeResolver>,
    state_machine: Arc<CampaignStateMachine>,
    config: ReconciliationConfig,
    poll_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl ReconciliationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaign_repo: Arc<dyn CampaignRepository>,
        task_repo: Arc<dyn DeliveryTaskRepository>,
        response_repo: Arc<dyn VendorResponseRepository>,
        gateway: Arc<dyn SmsGateway>,
        resolver: Arc<DeliveryOutcomeResolver>,
        state_machine: Arc<CampaignStateMachine>,
        config: ReconciliationConfig,
        poll_timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaign_repo,
            task_repo,
            response_repo,
            gateway,
            resolver,
            state_machine,
            config,
            poll_timeout,
            clock,
        }
    }

    fn seconds_ago(&self, seconds: u64) -> chrono::DateTime<chrono::Utc> {
        self.clock.now() - chrono::Duration::seconds(seconds as i64)
    }

    /// 执行一次完整的对账
    pub async fn run_once(&self) -> DispatchResult<ReconciliationReport> {
        let mut report = ReconciliationReport::default();
        self.recover_stale_in_flight(&mut report).await?;
        self.poll_unconfirmed(&mut report).await?;
        self.check_sent_deliveries(&mut report).await?;
        self.sweep_campaigns(&mut report).await?;

        if report != ReconciliationReport::default() {
            info!(
                stale_in_flight = report.stale_in_flight,
                polled = report.polled,
                resolved = report.resolved,
                delivery_checked = report.delivery_checked,
                timed_out = report.timed_out,
                campaigns_finalized = report.campaigns_finalized,
                "对账完成"
            );
        }
        Ok(report)
    }

    /// worker 在调用供应商后、记录结果前崩溃，供应商侧结果未知
    async fn recover_stale_in_flight(&self, report: &mut ReconciliationReport) -> DispatchResult<()> {
        let stale = self
            .task_repo
            .find_stale(
                &[TaskStatus::InFlight],
                self.seconds_ago(self.config.stale_in_flight_seconds),
                self.config.batch_size,
            )
            .await?;

        for task in stale {
            let update = TaskUpdate::new(TaskStatus::Unconfirmed, self.clock.now())
                .counting_attempt()
                .with_error("worker 未记录发送结果");
            if self
                .task_repo
                .transition(task.id, &[TaskStatus::InFlight], &update)
                .await?
                .is_some()
            {
                warn!(
                    task_id = task.id,
                    worker_id = task.claimed_by.as_deref().unwrap_or_default(),
                    "in_flight 任务超时未结束，转为待确认"
                );
                counter!("sms_tasks_unconfirmed_total").increment(1);
                report.stale_in_flight += 1;
            }
        }
        Ok(())
    }

    async fn poll_unconfirmed(&self, report: &mut ReconciliationReport) -> DispatchResult<()> {
        let due = self
            .task_repo
            .find_stale(
                &[TaskStatus::Unconfirmed],
                self.seconds_ago(self.config.unconfirmed_after_seconds),
                self.config.batch_size,
            )
            .await?;

        for task in due {
            if task.reconcile_attempts >= self.config.max_attempts as i32 {
                if self.fail_unresolved(&task).await? {
                    report.timed_out += 1;
                }
                continue;
            }

            report.polled += 1;
            match self.poll(&task).await {
                Ok(Some(status)) if status.status != VendorStatus::Unknown => {
                    let vendor_message_id = status
                        .vendor_message_id
                        .as_deref()
                        .or(task.vendor_message_id.as_deref());
                    if self
                        .resolver
                        .resolve(&task, &status.status, vendor_message_id)
                        .await?
                        .is_some()
                    {
                        report.resolved += 1;
                    }
                }
                Ok(_) => self.count_reconcile_attempt(&task, None).await?,
                Err(e) => {
                    debug!(task_id = task.id, error = %e, "查询供应商状态失败");
                    self.count_reconcile_attempt(&task, Some(e.to_string()))
                        .await?
                }
            }
        }
        Ok(())
    }

    /// 回执丢失时 sent 任务永远不会结束，在窗口内补查一次最终结果
    async fn check_sent_deliveries(&self, report: &mut ReconciliationReport) -> DispatchResult<()> {
        let due = self
            .task_repo
            .find_awaiting_delivery(
                self.seconds_ago(self.config.delivery_window_seconds),
                self.seconds_ago(self.config.delivery_check_after_seconds),
                self.config.batch_size,
            )
            .await?;

        for task in due {
            report.delivery_checked += 1;
            match self.poll(&task).await {
                Ok(Some(status))
                    if matches!(
                        status.status,
                        VendorStatus::Delivered | VendorStatus::Failed { .. }
                    ) =>
                {
                    let vendor_message_id = status
                        .vendor_message_id
                        .as_deref()
                        .or(task.vendor_message_id.as_deref());
                    if self
                        .resolver
                        .resolve(&task, &status.status, vendor_message_id)
                        .await?
                        .is_some()
                    {
                        report.resolved += 1;
                    }
                }
                Ok(_) => self.defer_delivery_check(&task, None).await?,
                Err(e) => {
                    debug!(task_id = task.id, error = %e, "查询投递结果失败");
                    self.defer_delivery_check(&task, Some(e.to_string())).await?
                }
            }
        }
        Ok(())
    }

    /// 供应商仍未给出最终结果，推迟下一次查询
    async fn defer_delivery_check(
        &self,
        task: &DeliveryTask,
        error: Option<String>,
    ) -> DispatchResult<()> {
        let mut update = TaskUpdate::new(TaskStatus::Sent, self.clock.now());
        if let Some(error) = error {
            update = update.with_error(error);
        }
        self.task_repo
            .transition(task.id, &[TaskStatus::Sent], &update)
            .await?;
        Ok(())
    }

    /// 查询供应商，超时返回 `Ok(None)`；每次结果都写入审计记录
    async fn poll(
        &self,
        task: &DeliveryTask,
    ) -> DispatchResult<Option<sms_core::models::VendorStatusReport>> {
        let query = StatusQuery {
            client_reference: task.client_reference.clone(),
            vendor_message_id: task.vendor_message_id.clone(),
        };

        let report = match tokio::time::timeout(self.poll_timeout, self.gateway.query_status(&query))
            .await
        {
            Ok(result) => result?,
            Err(_) => return Ok(None),
        };

        let error_code = match &report.status {
            VendorStatus::Failed { error_code } => error_code.clone(),
            _ => None,
        };
        let record = VendorResponseRecord::new(
            Some(task.id),
            report.vendor_message_id.clone(),
            VendorResponseKind::Poll,
            report.status.label(),
            self.clock.now(),
        )
        .with_error_code(error_code)
        .with_payload(serde_json::to_value(&report)?);
        self.response_repo.record(&record).await?;

        Ok(Some(report))
    }

    /// 本次无法确认结果，任务保持 unconfirmed 并推迟下一次查询
    async fn count_reconcile_attempt(
        &self,
        task: &DeliveryTask,
        error: Option<String>,
    ) -> DispatchResult<()> {
        let mut update =
            TaskUpdate::new(TaskStatus::Unconfirmed, self.clock.now()).counting_reconcile_attempt();
        if let Some(error) = error {
            update = update.with_error(error);
        }
        self.task_repo
            .transition(task.id, &[TaskStatus::Unconfirmed], &update)
            .await?;
        Ok(())
    }

    async fn fail_unresolved(&self, task: &DeliveryTask) -> DispatchResult<bool> {
        let err = DispatchError::ReconciliationTimeout {
            task_id: task.id,
            attempts: task.reconcile_attempts,
        };
        let failed = self.fail_task(task, &[TaskStatus::Unconfirmed], &err).await?;
        if failed {
            self.state_machine.on_task_settled(task.campaign_id).await?;
        }
        Ok(failed)
    }

    async fn fail_task(
        &self,
        task: &DeliveryTask,
        expected: &[TaskStatus],
        err: &DispatchError,
    ) -> DispatchResult<bool> {
        let update = TaskUpdate::new(TaskStatus::Failed, self.clock.now()).with_error(err.to_string());
        let failed = self.task_repo.transition(task.id, expected, &update).await?;
        if failed.is_some() {
            warn!(task_id = task.id, campaign_id = task.campaign_id, error = %err, "投递任务无法确认，标记为失败");
            counter!("sms_tasks_failed_total").increment(1);
        }
        Ok(failed.is_some())
    }

    /// 结束超过截止时间的活动，并补做遗漏的完成判定
    async fn sweep_campaigns(&self, report: &mut ReconciliationReport) -> DispatchResult<()> {
        let deadline = chrono::Duration::seconds(self.config.campaign_timeout_seconds as i64);
        let now = self.clock.now();

        for campaign in self
            .campaign_repo
            .find_by_status(CampaignStatus::Sending)
            .await?
        {
            let expired = campaign
                .started_at
                .is_some_and(|started| now - started > deadline);

            if expired {
                let active = self.task_repo.find_by_campaign(campaign.id, None).await?;
                for task in active.iter().filter(|t| t.status.is_active()) {
                    let err = DispatchError::ReconciliationTimeout {
                        task_id: task.id,
                        attempts: task.reconcile_attempts,
                    };
                    self.fail_task(task, &[task.status], &err).await?;
                }
                warn!(campaign_id = campaign.id, "营销活动超过截止时间，剩余任务已标记失败");
            }

            if self
                .state_machine
                .on_task_settled(campaign.id)
                .await?
                .is_some()
            {
                report.campaigns_finalized += 1;
            }
        }
        Ok(())
    }

    /// 按固定间隔运行，直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_seconds));
        info!(interval_seconds = self.config.interval_seconds, "对账服务已启动");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "对账失败");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("对账服务收到关闭信号");
                    break;
                }
            }
        }
    }
}
