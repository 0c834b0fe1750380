use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use sms_core::models::{
    DeliveryTask, OutboundSms, SendOutcome, TaskStatus, TaskUpdate, VendorResponseKind,
    VendorResponseRecord,
};
use sms_core::traits::{
    CampaignRepository, DeliveryTaskRepository, RateLimiter, VendorResponseRepository,
};
use sms_core::{Clock, DispatchError, DispatchResult};
use sms_dispatcher::{CampaignStateMachine, RetryPolicy};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, instrument, warn};

use crate::gateway_client::VendorGatewayClient;

/// 所有 worker 共享的依赖
pub struct WorkerContext {
    pub campaign_repo: Arc<dyn CampaignRepository>,
    pub task_repo: Arc<dyn DeliveryTaskRepository>,
    pub response_repo: Arc<dyn VendorResponseRepository>,
    pub gateway: Arc<VendorGatewayClient>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub retry_policy: RetryPolicy,
    pub state_machine: Arc<CampaignStateMachine>,
    pub clock: Arc<dyn Clock>,
    pub work_available: Arc<Notify>,
    pub poll_interval: Duration,
    pub circuit_open_backoff: Duration,
}

/// 一次轮询的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStep {
    Processed,
    Idle,
    CircuitOpen,
}

/// 投递 worker：认领任务、等待令牌、调用供应商、记录结果
pub struct DeliveryWorker {
    id: String,
    ctx: Arc<WorkerContext>,
}

impl DeliveryWorker {
    pub fn new(id: impl Into<String>, ctx: Arc<WorkerContext>) -> Self {
        Self { id: id.into(), ctx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 熔断器打开时不认领任务
    pub async fn process_next(&self) -> DispatchResult<WorkerStep> {
        if !self.ctx.gateway.allows_calls().await {
            return Ok(WorkerStep::CircuitOpen);
        }

        let Some(task) = self
            .ctx
            .task_repo
            .claim_next(&self.id, self.ctx.clock.now())
            .await?
        else {
            return Ok(WorkerStep::Idle);
        };

        self.deliver(task).await?;
        Ok(WorkerStep::Processed)
    }

    /// 发送一个已认领 (in_flight) 的任务并记录结果
    ///
    /// 返回更新后的任务；任务已被对账等其他流程改变时返回 `None`。
    #[instrument(skip(self, task), fields(worker_id = %self.id, task_id = task.id, campaign_id = task.campaign_id))]
    pub async fn deliver(&self, task: DeliveryTask) -> DispatchResult<Option<DeliveryTask>> {
        let Some(campaign) = self.ctx.campaign_repo.get_by_id(task.campaign_id).await? else {
            let update = TaskUpdate::new(TaskStatus::Failed, self.ctx.clock.now())
                .with_error(DispatchError::CampaignNotFound { id: task.campaign_id }.to_string());
            return self.finish(&task, update).await;
        };

        self.ctx.rate_limiter.acquire().await;

        let sms = OutboundSms {
            from: campaign.sender_id.clone(),
            to: task.phone.clone(),
            client_reference: task.client_reference.clone(),
            encoding: task.message.encoding,
            parts: task.message.segments.clone(),
        };
        let attempt = task.attempt_count + 1;
        debug!(attempt, parts = sms.parts.len(), "调用供应商发送短信");

        let result = self.ctx.gateway.send(&sms).await;
        let now = self.ctx.clock.now();

        let update = match result {
            Ok(SendOutcome::Accepted(ack)) => {
                let record = VendorResponseRecord::new(
                    Some(task.id),
                    Some(ack.vendor_message_id.clone()),
                    VendorResponseKind::Ack,
                    ack.status.as_deref().unwrap_or("accepted"),
                    now,
                )
                .with_payload(serde_json::to_value(&ack)?);
                self.ctx.response_repo.record(&record).await?;

                TaskUpdate::new(TaskStatus::Sent, now)
                    .counting_attempt()
                    .with_vendor_message_id(ack.vendor_message_id)
            }
            Ok(SendOutcome::Unknown) => TaskUpdate::new(TaskStatus::Unconfirmed, now)
                .counting_attempt()
                .with_error("供应商发送结果未知，等待对账确认"),
            Err(DispatchError::CircuitOpen) => {
                // 没有真正调用供应商，不消耗重试次数
                TaskUpdate::new(TaskStatus::Retrying, now)
                    .with_error(DispatchError::CircuitOpen.to_string())
                    .retry_at(now + chrono_duration(self.ctx.circuit_open_backoff))
            }
            Err(e) if e.is_retryable() && self.ctx.retry_policy.can_retry(attempt) => {
                let retry_after = match &e {
                    DispatchError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                let next = self
                    .ctx
                    .retry_policy
                    .next_attempt_at(attempt, retry_after, now);
                TaskUpdate::new(TaskStatus::Retrying, now)
                    .counting_attempt()
                    .with_error(e.to_string())
                    .retry_at(next)
            }
            Err(e) => TaskUpdate::new(TaskStatus::Failed, now)
                .counting_attempt()
                .with_error(e.to_string()),
        };

        self.finish(&task, update).await
    }

    async fn finish(
        &self,
        task: &DeliveryTask,
        update: TaskUpdate,
    ) -> DispatchResult<Option<DeliveryTask>> {
        let Some(updated) = self
            .ctx
            .task_repo
            .transition(task.id, &[TaskStatus::InFlight], &update)
            .await?
        else {
            warn!(task_id = task.id, "任务已不在 in_flight 状态，发送结果未记录");
            return Ok(None);
        };

        match updated.status {
            TaskStatus::Sent => {
                counter!("sms_tasks_sent_total").increment(1);
                debug!(
                    task_id = updated.id,
                    vendor_message_id = updated.vendor_message_id.as_deref().unwrap_or_default(),
                    "短信已被供应商接受"
                );
            }
            TaskStatus::Unconfirmed => {
                counter!("sms_tasks_unconfirmed_total").increment(1);
            }
            TaskStatus::Retrying => {
                counter!("sms_tasks_retried_total").increment(1);
                info!(
                    task_id = updated.id,
                    attempt = updated.attempt_count,
                    next_attempt_at = %updated.next_attempt_at,
                    error = updated.last_error.as_deref().unwrap_or_default(),
                    "发送失败，稍后重试"
                );
            }
            TaskStatus::Failed => {
                counter!("sms_tasks_failed_total").increment(1);
                warn!(
                    task_id = updated.id,
                    attempt = updated.attempt_count,
                    error = updated.last_error.as_deref().unwrap_or_default(),
                    "投递失败"
                );
            }
            _ => {}
        }

        if updated.status.is_settled() {
            self.ctx
                .state_machine
                .on_task_settled(updated.campaign_id)
                .await?;
        }
        Ok(Some(updated))
    }

    /// 持续处理任务直到收到关闭信号，正在进行的发送会先完成
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = %self.id, "投递 worker 已启动");

        loop {
            let wait = match self.process_next().await {
                Ok(WorkerStep::Processed) => match shutdown_rx.try_recv() {
                    Err(TryRecvError::Empty) => continue,
                    _ => break,
                },
                Ok(WorkerStep::Idle) => self.ctx.poll_interval,
                Ok(WorkerStep::CircuitOpen) => {
                    debug!(worker_id = %self.id, "熔断器打开，暂停认领任务");
                    self.ctx.circuit_open_backoff
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "处理投递任务失败");
                    self.ctx.poll_interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.ctx.work_available.notified() => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!(worker_id = %self.id, "投递 worker 已停止");
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::seconds(1))
}
