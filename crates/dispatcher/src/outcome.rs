use std::sync::Arc;

use metrics::counter;
use sms_core::models::{DeliveryTask, TaskStatus, TaskUpdate, VendorStatus};
use sms_core::traits::DeliveryTaskRepository;
use sms_core::{Clock, DispatchResult};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::retry_policy::RetryPolicy;
use crate::state_machine::CampaignStateMachine;

/// 把供应商报告的状态应用到投递任务
///
/// 回执和对账轮询共用这一入口。所有迁移都是条件更新，
/// 重放的报告或与 worker 的竞争只会让更新落空，不会重复计数。
pub struct DeliveryOutcomeResolver {
    task_repo: Arc<dyn DeliveryTaskRepository>,
    state_machine: Arc<CampaignStateMachine>,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    work_available: Arc<Notify>,
}

impl DeliveryOutcomeResolver {
    pub fn new(
        task_repo: Arc<dyn DeliveryTaskRepository>,
        state_machine: Arc<CampaignStateMachine>,
        retry_policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        work_available: Arc<Notify>,
    ) -> Self {
        Self {
            task_repo,
            state_machine,
            retry_policy,
            clock,
            work_available,
        }
    }

    /// 返回更新后的任务；状态已不允许该迁移时返回 `None`
    pub async fn resolve(
        &self,
        task: &DeliveryTask,
        status: &VendorStatus,
        vendor_message_id: Option<&str>,
    ) -> DispatchResult<Option<DeliveryTask>> {
        let now = self.clock.now();

        let (expected, mut update) = match status {
            VendorStatus::Delivered => (
                vec![TaskStatus::Sent, TaskStatus::Unconfirmed],
                TaskUpdate::new(TaskStatus::Delivered, now),
            ),
            VendorStatus::Accepted => (
                vec![TaskStatus::Unconfirmed],
                TaskUpdate::new(TaskStatus::Sent, now),
            ),
            VendorStatus::Failed { error_code } => {
                let reason = match error_code {
                    Some(code) => format!("供应商报告投递失败 (code: {code})"),
                    None => "供应商报告投递失败".to_string(),
                };
                (
                    vec![TaskStatus::Sent, TaskStatus::Unconfirmed],
                    TaskUpdate::new(TaskStatus::Failed, now).with_error(reason),
                )
            }
            VendorStatus::NotFound => {
                // 供应商从未收到这条消息，可以安全地重新发送
                if task.status != TaskStatus::Unconfirmed {
                    return Ok(None);
                }
                if self.retry_policy.can_retry(task.attempt_count) {
                    (
                        vec![TaskStatus::Unconfirmed],
                        TaskUpdate::new(TaskStatus::Retrying, now)
                            .with_error("供应商没有该消息的记录")
                            .retry_at(now),
                    )
                } else {
                    (
                        vec![TaskStatus::Unconfirmed],
                        TaskUpdate::new(TaskStatus::Failed, now)
                            .with_error("供应商没有该消息的记录且重试次数已用完"),
                    )
                }
            }
            VendorStatus::Unknown => return Ok(None),
        };

        if let Some(id) = vendor_message_id {
            update = update.with_vendor_message_id(id);
        }

        let Some(updated) = self.task_repo.transition(task.id, &expected, &update).await? else {
            debug!(
                task_id = task.id,
                status = %task.status,
                reported = status.label(),
                "任务状态已变化，忽略供应商报告"
            );
            return Ok(None);
        };

        match updated.status {
            TaskStatus::Retrying => {
                counter!("sms_tasks_retried_total").increment(1);
                info!(task_id = updated.id, "供应商未收到消息，任务重新排队");
                self.work_available.notify_waiters();
            }
            TaskStatus::Failed => {
                counter!("sms_tasks_failed_total").increment(1);
                warn!(
                    task_id = updated.id,
                    campaign_id = updated.campaign_id,
                    error = updated.last_error.as_deref().unwrap_or_default(),
                    "投递失败"
                );
            }
            TaskStatus::Sent => {
                counter!("sms_tasks_sent_total").increment(1);
            }
            _ => {}
        }

        if updated.status.is_settled() {
            self.state_machine.on_task_settled(updated.campaign_id).await?;
        }

        Ok(Some(updated))
    }
}
