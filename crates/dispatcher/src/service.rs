//! 营销活动投递服务
//!
//! 对外暴露的操作入口：发送、计划发送、取消、状态查询和供应商回执处理。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sms_core::models::{
    Campaign, CampaignContentUpdate, CampaignStatus, DeliveryTask, RecipientSnapshot,
    RenderedMessage, TaskStatus, VendorResponseKind, VendorResponseRecord, VendorStatus,
};
use sms_core::traits::{
    AudienceSource, CampaignRepository, DeliveryTaskRepository, TemplateSource,
    VendorResponseRepository,
};
use sms_core::{Clock, DispatchError, DispatchResult};
use sms_domain::{
    concat_reference, detect_encoding, MessageRenderer, MessageTemplate, RecipientResolver,
};
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

use crate::outcome::DeliveryOutcomeResolver;
use crate::state_machine::CampaignStateMachine;

/// 发送请求已被接受
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAccepted {
    pub campaign_id: i64,
    pub snapshot_id: i64,
    pub task_count: usize,
    pub invalid_count: usize,
    pub duplicate_count: usize,
    pub opted_out_count: usize,
    /// 例如缺失的合并字段、超长被判失败的收件人
    pub warnings: Vec<String>,
}

/// 取消结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelReport {
    pub campaign_id: i64,
    pub status: CampaignStatus,
    pub cancelled_tasks: u64,
    /// 取消时仍在调用供应商的任务，结果照常记录
    pub in_flight_tasks: u64,
    /// 留给对账确认的任务
    pub unconfirmed_tasks: u64,
}

/// 活动投递进度
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignStatusReport {
    pub campaign_id: i64,
    pub status: CampaignStatus,
    pub total: u64,
    pub pending: u64,
    pub in_flight: u64,
    pub unconfirmed: u64,
    pub retrying: u64,
    /// 供应商已接受的数量，包括已送达
    pub sent_count: u64,
    pub delivered_count: u64,
    pub failed_count: u64,
    pub cancelled_count: u64,
    pub total_segments: u64,
    /// 按分段单价估算的费用
    pub estimated_cost: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// 回执处理结果
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    Applied,
    /// 重放、状态已变化或无法识别的状态词
    Ignored,
    UnknownMessage,
}

pub struct CampaignDispatchService {
    campaign_repo: Arc<dyn CampaignRepository>,
    task_repo: Arc<dyn DeliveryTaskRepository>,
    response_repo: Arc<dyn VendorResponseRepository>,
    audience: Arc<dyn AudienceSource>,
    templates: Arc<dyn TemplateSource>,
    state_machine: Arc<CampaignStateMachine>,
    resolver: Arc<DeliveryOutcomeResolver>,
    renderer: MessageRenderer,
    clock: Arc<dyn Clock>,
    work_available: Arc<Notify>,
    price_per_segment: f64,
}

impl CampaignDispatchService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaign_repo: Arc<dyn CampaignRepository>,
        task_repo: Arc<dyn DeliveryTaskRepository>,
        response_repo: Arc<dyn VendorResponseRepository>,
        audience: Arc<dyn AudienceSource>,
        templates: Arc<dyn TemplateSource>,
        state_machine: Arc<CampaignStateMachine>,
        resolver: Arc<DeliveryOutcomeResolver>,
        renderer: MessageRenderer,
        clock: Arc<dyn Clock>,
        work_available: Arc<Notify>,
    ) -> Self {
        Self {
            campaign_repo,
            task_repo,
            response_repo,
            audience,
            templates,
            state_machine,
            resolver,
            renderer,
            clock,
            work_available,
            price_per_segment: 0.0,
        }
    }

    /// 设置供应商的分段单价
    pub fn with_segment_price(mut self, price_per_segment: f64) -> Self {
        self.price_per_segment = price_per_segment;
        self
    }

    async fn load_campaign(&self, campaign_id: i64) -> DispatchResult<Campaign> {
        self.campaign_repo
            .get_by_id(campaign_id)
            .await?
            .ok_or(DispatchError::CampaignNotFound { id: campaign_id })
    }

    /// 模板优先于内联正文
    async fn message_body(&self, campaign: &Campaign) -> DispatchResult<String> {
        if let Some(template_id) = campaign.template_id {
            return self
                .templates
                .template_body(template_id)
                .await?
                .ok_or(DispatchError::TemplateNotFound { id: template_id });
        }
        campaign.body.clone().ok_or_else(|| {
            DispatchError::invalid_state(campaign.id, campaign.status, "send (no message body)")
        })
    }

    /// 开始发送一个活动
    ///
    /// 解析收件人、渲染每条短信，并在同一事务中保存快照、写入投递任务、
    /// 把活动迁移到 sending。活动不在 draft/scheduled 时返回 `InvalidState`，
    /// 重复调用不会产生第二批任务。
    #[instrument(skip(self))]
    pub async fn send_campaign(&self, campaign_id: i64) -> DispatchResult<SendAccepted> {
        let campaign = self.load_campaign(campaign_id).await?;
        if !matches!(
            campaign.status,
            CampaignStatus::Draft | CampaignStatus::Scheduled
        ) {
            return Err(DispatchError::invalid_state(
                campaign_id,
                campaign.status,
                "send",
            ));
        }

        let body = self.message_body(&campaign).await?;
        let template = MessageTemplate::parse(&body);

        let contacts = self.audience.group_members(campaign.group_id).await?;
        let audience = RecipientResolver::resolve(&contacts);

        if audience.is_empty() {
            warn!(
                campaign_id,
                invalid = audience.invalid_count,
                opted_out = audience.opted_out_count,
                "没有可发送的收件人"
            );
            let err = DispatchError::EmptyAudience {
                campaign_id,
                invalid_count: audience.invalid_count,
                opted_out_count: audience.opted_out_count,
            };
            self.state_machine
                .transition(
                    &campaign,
                    CampaignStatus::Failed,
                    "send",
                    Some(&err.to_string()),
                )
                .await?;
            return Err(err);
        }

        let now = self.clock.now();
        let mut warnings = Vec::new();
        let mut tasks = Vec::with_capacity(audience.recipients.len());
        let mut missing_fields: Vec<String> = Vec::new();
        let mut too_long = 0usize;

        for recipient in &audience.recipients {
            let reference = concat_reference(campaign_id, recipient.contact_id);
            match self.renderer.render(&template, recipient, reference) {
                Ok(message) => {
                    for field in &message.missing_fields {
                        if !missing_fields.contains(field) {
                            missing_fields.push(field.clone());
                        }
                    }
                    tasks.push(DeliveryTask::new(campaign_id, 0, recipient, message, now));
                }
                Err(err @ DispatchError::MessageTooLong { .. }) => {
                    too_long += 1;
                    let (text, missing) = template.substitute(recipient);
                    let message = RenderedMessage {
                        encoding: detect_encoding(&text),
                        text,
                        segments: Vec::new(),
                        missing_fields: missing,
                    };
                    tasks.push(
                        DeliveryTask::new(campaign_id, 0, recipient, message, now)
                            .failed_at_creation(&err.to_string()),
                    );
                }
                Err(err) => return Err(err),
            }
        }

        if !missing_fields.is_empty() {
            warnings.push(format!("缺失的合并字段按空值处理: {}", missing_fields.join(", ")));
        }
        if too_long > 0 {
            warnings.push(format!("{too_long} 个收件人的短信超过最大分段数，已标记为失败"));
        }

        let snapshot = RecipientSnapshot {
            id: 0,
            campaign_id,
            recipients: audience.recipients.clone(),
            invalid_count: audience.invalid_count,
            duplicate_count: audience.duplicate_count,
            opted_out_count: audience.opted_out_count,
            created_at: now,
        };

        let Some(started) = self
            .campaign_repo
            .start_send(
                campaign_id,
                &[CampaignStatus::Draft, CampaignStatus::Scheduled],
                &snapshot,
                &tasks,
                now,
            )
            .await?
        else {
            // 并发的另一次发送已经开始
            let current = self.load_campaign(campaign_id).await?;
            return Err(DispatchError::invalid_state(
                campaign_id,
                current.status,
                "send",
            ));
        };

        info!(
            campaign_id,
            snapshot_id = started.snapshot_id,
            tasks = started.task_count,
            invalid = audience.invalid_count,
            duplicates = audience.duplicate_count,
            opted_out = audience.opted_out_count,
            "营销活动已进入发送队列"
        );

        self.work_available.notify_waiters();
        // 全部任务在创建时即失败的情况下不会再有任务结束事件
        self.state_machine.on_task_settled(campaign_id).await?;

        Ok(SendAccepted {
            campaign_id,
            snapshot_id: started.snapshot_id,
            task_count: started.task_count,
            invalid_count: audience.invalid_count,
            duplicate_count: audience.duplicate_count,
            opted_out_count: audience.opted_out_count,
            warnings,
        })
    }

    /// 设置计划发送时间，已计划的活动可以改期
    pub async fn schedule_campaign(
        &self,
        campaign_id: i64,
        at: DateTime<Utc>,
    ) -> DispatchResult<Campaign> {
        let campaign = self.load_campaign(campaign_id).await?;
        if !campaign.status.accepts_content_edits() {
            return Err(DispatchError::invalid_state(
                campaign_id,
                campaign.status,
                "schedule",
            ));
        }

        let scheduled = self
            .campaign_repo
            .schedule(campaign_id, &[campaign.status], at, self.clock.now())
            .await?;
        match scheduled {
            Some(campaign) => {
                info!(campaign_id, scheduled_at = %at, "营销活动已计划发送");
                Ok(campaign)
            }
            None => {
                let current = self.load_campaign(campaign_id).await?;
                Err(DispatchError::invalid_state(
                    campaign_id,
                    current.status,
                    "schedule",
                ))
            }
        }
    }

    /// 取消计划，活动回到 draft
    pub async fn unschedule_campaign(&self, campaign_id: i64) -> DispatchResult<Campaign> {
        let campaign = self.load_campaign(campaign_id).await?;
        self.state_machine
            .transition(&campaign, CampaignStatus::Draft, "unschedule", None)
            .await
    }

    /// 取消活动
    ///
    /// pending/retrying 任务立即取消；in_flight 的调用照常完成并记录结果，
    /// unconfirmed 的任务交给对账确认。终态活动返回 `InvalidState`。
    #[instrument(skip(self))]
    pub async fn cancel_campaign(&self, campaign_id: i64) -> DispatchResult<CancelReport> {
        let campaign = self.load_campaign(campaign_id).await?;
        let cancelled = self
            .state_machine
            .transition(&campaign, CampaignStatus::Cancelled, "cancel", None)
            .await?;

        let cancelled_tasks = if campaign.status == CampaignStatus::Sending {
            self.task_repo
                .cancel_pending(campaign_id, self.clock.now())
                .await?
        } else {
            0
        };

        let counts = self.task_repo.count_by_status(campaign_id).await?;
        info!(
            campaign_id,
            cancelled_tasks,
            in_flight = counts.in_flight,
            unconfirmed = counts.unconfirmed,
            "营销活动已取消"
        );

        Ok(CancelReport {
            campaign_id,
            status: cancelled.status,
            cancelled_tasks,
            in_flight_tasks: counts.in_flight,
            unconfirmed_tasks: counts.unconfirmed,
        })
    }

    pub async fn get_campaign_status(
        &self,
        campaign_id: i64,
    ) -> DispatchResult<CampaignStatusReport> {
        let campaign = self.load_campaign(campaign_id).await?;
        let counts = self.task_repo.count_by_status(campaign_id).await?;

        Ok(CampaignStatusReport {
            campaign_id,
            status: campaign.status,
            total: counts.total(),
            pending: counts.pending,
            in_flight: counts.in_flight,
            unconfirmed: counts.unconfirmed,
            retrying: counts.retrying,
            sent_count: counts.accepted(),
            delivered_count: counts.delivered,
            failed_count: counts.failed,
            cancelled_count: counts.cancelled,
            total_segments: counts.total_segments,
            estimated_cost: counts.total_segments as f64 * self.price_per_segment,
            started_at: campaign.started_at,
            completed_at: campaign.completed_at,
            last_error: campaign.last_error,
        })
    }

    pub async fn list_campaign_tasks(
        &self,
        campaign_id: i64,
        status: Option<TaskStatus>,
    ) -> DispatchResult<Vec<DeliveryTask>> {
        self.load_campaign(campaign_id).await?;
        self.task_repo.find_by_campaign(campaign_id, status).await
    }

    pub async fn get_snapshot(&self, campaign_id: i64) -> DispatchResult<Option<RecipientSnapshot>> {
        let campaign = self.load_campaign(campaign_id).await?;
        match campaign.snapshot_id {
            Some(snapshot_id) => self.campaign_repo.get_snapshot(snapshot_id).await,
            None => Ok(None),
        }
    }

    /// 修改活动内容，进入 sending 后被拒绝
    pub async fn update_campaign_content(
        &self,
        campaign_id: i64,
        update: &CampaignContentUpdate,
    ) -> DispatchResult<Campaign> {
        self.campaign_repo
            .update_content(campaign_id, update, self.clock.now())
            .await
    }

    /// 处理供应商投递回执
    ///
    /// 每条回执都写入审计记录。重放的回执不会改变任何状态。
    #[instrument(skip(self, payload))]
    pub async fn on_vendor_callback(
        &self,
        vendor_message_id: &str,
        status: &str,
        error_code: Option<&str>,
        payload: serde_json::Value,
    ) -> DispatchResult<CallbackOutcome> {
        let now = self.clock.now();
        let task = self
            .task_repo
            .find_by_vendor_message_id(vendor_message_id)
            .await?;

        let record = VendorResponseRecord::new(
            task.as_ref().map(|t| t.id),
            Some(vendor_message_id.to_string()),
            VendorResponseKind::Callback,
            status,
            now,
        )
        .with_error_code(error_code.map(str::to_string))
        .with_payload(payload);
        self.response_repo.record(&record).await?;

        let Some(task) = task else {
            warn!(vendor_message_id, status, "收到未知消息的回执");
            counter!("sms_callbacks_total", "outcome" => "unknown_message").increment(1);
            return Ok(CallbackOutcome::UnknownMessage);
        };

        let vendor_status = VendorStatus::from_vendor(status, error_code);
        let outcome = match self.resolve_outcome(&task, &vendor_status).await? {
            Some(_) => CallbackOutcome::Applied,
            None => CallbackOutcome::Ignored,
        };

        let label = match outcome {
            CallbackOutcome::Applied => "applied",
            CallbackOutcome::Ignored => "ignored",
            CallbackOutcome::UnknownMessage => "unknown_message",
        };
        counter!("sms_callbacks_total", "outcome" => label).increment(1);

        Ok(outcome)
    }

    /// 把供应商状态应用到任务，回执和轮询共用
    pub async fn resolve_outcome(
        &self,
        task: &DeliveryTask,
        status: &VendorStatus,
    ) -> DispatchResult<Option<DeliveryTask>> {
        self.resolver
            .resolve(task, status, task.vendor_message_id.as_deref())
            .await
    }
}
