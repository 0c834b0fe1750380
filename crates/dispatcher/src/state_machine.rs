use std::sync::Arc;

use sms_core::models::{Campaign, CampaignStatus, TaskCounts};
use sms_core::traits::{CampaignRepository, DeliveryTaskRepository};
use sms_core::{Clock, DispatchError, DispatchResult};
use sms_domain::CampaignOutcomeService;
use tracing::{debug, info, instrument};

/// 活动级状态机
///
/// 所有迁移都是基于期望前置状态的条件更新，迁移规则由
/// `CampaignStatus::can_transition_to` 给出。
pub struct CampaignStateMachine {
    campaign_repo: Arc<dyn CampaignRepository>,
    task_repo: Arc<dyn DeliveryTaskRepository>,
    clock: Arc<dyn Clock>,
}

impl CampaignStateMachine {
    pub fn new(
        campaign_repo: Arc<dyn CampaignRepository>,
        task_repo: Arc<dyn DeliveryTaskRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaign_repo,
            task_repo,
            clock,
        }
    }

    /// 以活动当前状态为期望前置状态迁移到 `next`
    ///
    /// 不合法的迁移直接返回 `InvalidState`；条件更新失败说明状态已被并发修改，
    /// 同样返回 `InvalidState`，携带最新状态。
    pub async fn transition(
        &self,
        campaign: &Campaign,
        next: CampaignStatus,
        action: &str,
        last_error: Option<&str>,
    ) -> DispatchResult<Campaign> {
        if !campaign.status.can_transition_to(next) {
            return Err(DispatchError::invalid_state(
                campaign.id,
                campaign.status,
                action,
            ));
        }

        match self
            .campaign_repo
            .transition_status(
                campaign.id,
                &[campaign.status],
                next,
                last_error,
                self.clock.now(),
            )
            .await?
        {
            Some(updated) => Ok(updated),
            None => {
                let current = self
                    .campaign_repo
                    .get_by_id(campaign.id)
                    .await?
                    .ok_or(DispatchError::CampaignNotFound { id: campaign.id })?;
                Err(DispatchError::invalid_state(
                    campaign.id,
                    current.status,
                    action,
                ))
            }
        }
    }

    /// 某个任务结束后重新评估活动状态
    ///
    /// 只有 sending 状态的活动会被推进；活动已是终态时迟到的回执只更新计数。
    #[instrument(skip(self))]
    pub async fn on_task_settled(&self, campaign_id: i64) -> DispatchResult<Option<Campaign>> {
        let counts = self.task_repo.count_by_status(campaign_id).await?;
        self.finalize_if_settled(campaign_id, &counts).await
    }

    pub async fn finalize_if_settled(
        &self,
        campaign_id: i64,
        counts: &TaskCounts,
    ) -> DispatchResult<Option<Campaign>> {
        let Some(outcome) = CampaignOutcomeService::evaluate(counts) else {
            debug!(campaign_id, active = counts.active(), "活动仍有未结束的任务");
            return Ok(None);
        };

        let finalized = self
            .campaign_repo
            .transition_status(
                campaign_id,
                &[CampaignStatus::Sending],
                outcome,
                None,
                self.clock.now(),
            )
            .await?;

        if let Some(campaign) = &finalized {
            info!(
                campaign_id,
                status = %campaign.status,
                delivered = counts.delivered,
                sent = counts.sent,
                failed = counts.failed,
                cancelled = counts.cancelled,
                "营销活动发送结束"
            );
        }
        Ok(finalized)
    }
}
