//! 内存存储
//!
//! 实现全部仓储接口和联系人/模板来源，用于单元测试和不需要持久化的本地运行。
//! 条件更新和唯一约束的语义与 SQLite 实现一致。

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sms_core::models::{
    Campaign, CampaignContentUpdate, CampaignStatus, Contact, DeliveryTask, RecipientSnapshot,
    TaskCounts, TaskStatus, TaskUpdate, VendorResponseRecord,
};
use sms_core::traits::{
    AudienceSource, CampaignRepository, DeliveryTaskRepository, StartedSend, TemplateSource,
    VendorResponseRepository,
};
use sms_core::{DispatchError, DispatchResult};

#[derive(Default)]
struct State {
    campaigns: BTreeMap<i64, Campaign>,
    snapshots: HashMap<i64, RecipientSnapshot>,
    tasks: BTreeMap<i64, DeliveryTask>,
    responses: Vec<VendorResponseRecord>,
    contacts: BTreeMap<i64, Contact>,
    templates: HashMap<i64, String>,
    next_campaign_id: i64,
    next_snapshot_id: i64,
    next_task_id: i64,
}

impl State {
    fn has_active_task(&self, campaign_id: i64, contact_id: i64) -> bool {
        self.tasks.values().any(|t| {
            t.campaign_id == campaign_id && t.contact_id == contact_id && t.status.is_active()
        })
    }
}

/// 内存存储，克隆后共享同一份数据
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_contact(&self, contact: Contact) {
        self.lock().contacts.insert(contact.id, contact);
    }

    /// 修改联系人，用于验证快照不受后续修改影响
    pub fn update_contact(&self, contact: Contact) {
        self.add_contact(contact);
    }

    pub fn remove_contact(&self, contact_id: i64) {
        self.lock().contacts.remove(&contact_id);
    }

    pub fn add_template(&self, template_id: i64, content: &str) {
        self.lock().templates.insert(template_id, content.to_string());
    }

    pub fn all_tasks(&self) -> Vec<DeliveryTask> {
        self.lock().tasks.values().cloned().collect()
    }

    pub fn all_responses(&self) -> Vec<VendorResponseRecord> {
        self.lock().responses.clone()
    }

    /// 直接改写任务的更新时间，模拟任务在某个状态停留过久
    pub fn backdate_task(&self, task_id: i64, updated_at: DateTime<Utc>) {
        if let Some(task) = self.lock().tasks.get_mut(&task_id) {
            task.updated_at = updated_at;
        }
    }
}

#[async_trait]
impl CampaignRepository for InMemoryStore {
    async fn create(&self, campaign: &Campaign) -> DispatchResult<Campaign> {
        let mut state = self.lock();
        state.next_campaign_id += 1;
        let mut created = campaign.clone();
        created.id = state.next_campaign_id;
        state.campaigns.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> DispatchResult<Option<Campaign>> {
        Ok(self.lock().campaigns.get(&id).cloned())
    }

    async fn update_content(
        &self,
        id: i64,
        update: &CampaignContentUpdate,
        now: DateTime<Utc>,
    ) -> DispatchResult<Campaign> {
        let mut state = self.lock();
        let campaign = state
            .campaigns
            .get_mut(&id)
            .ok_or(DispatchError::CampaignNotFound { id })?;
        if !campaign.is_editable() {
            return Err(DispatchError::invalid_state(
                id,
                campaign.status,
                "update_content",
            ));
        }

        if let Some(name) = &update.name {
            campaign.name = name.clone();
        }
        if let Some(body) = &update.body {
            campaign.body = Some(body.clone());
        }
        if let Some(template_id) = update.template_id {
            campaign.template_id = Some(template_id);
        }
        if let Some(group_id) = update.group_id {
            campaign.group_id = group_id;
        }
        if let Some(sender_id) = &update.sender_id {
            campaign.sender_id = sender_id.clone();
        }
        campaign.updated_at = now;
        Ok(campaign.clone())
    }

    async fn transition_status(
        &self,
        id: i64,
        expected: &[CampaignStatus],
        next: CampaignStatus,
        last_error: Option<&str>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<Campaign>> {
        let mut state = self.lock();
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&campaign.status) {
            return Ok(None);
        }

        campaign.status = next;
        campaign.updated_at = now;
        if let Some(error) = last_error {
            campaign.last_error = Some(error.to_string());
        }
        if next.is_terminal() {
            campaign.completed_at = Some(now);
        }
        Ok(Some(campaign.clone()))
    }

    async fn schedule(
        &self,
        id: i64,
        expected: &[CampaignStatus],
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<Campaign>> {
        let mut state = self.lock();
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&campaign.status) {
            return Ok(None);
        }

        campaign.status = CampaignStatus::Scheduled;
        campaign.scheduled_at = Some(scheduled_at);
        campaign.updated_at = now;
        Ok(Some(campaign.clone()))
    }

    async fn start_send(
        &self,
        campaign_id: i64,
        expected: &[CampaignStatus],
        snapshot: &RecipientSnapshot,
        tasks: &[DeliveryTask],
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<StartedSend>> {
        let mut state = self.lock();
        match state.campaigns.get(&campaign_id) {
            Some(campaign) if expected.contains(&campaign.status) => {}
            _ => return Ok(None),
        }

        // 先检查唯一约束，失败时不留下任何数据
        let mut seen = std::collections::HashSet::new();
        for task in tasks.iter().filter(|t| t.status.is_active()) {
            if !seen.insert(task.contact_id) || state.has_active_task(campaign_id, task.contact_id)
            {
                return Err(DispatchError::DatabaseOperation(format!(
                    "活动 {campaign_id} 的联系人 {} 已存在未结束的投递任务",
                    task.contact_id
                )));
            }
        }

        state.next_snapshot_id += 1;
        let snapshot_id = state.next_snapshot_id;
        let mut stored = snapshot.clone();
        stored.id = snapshot_id;
        stored.campaign_id = campaign_id;
        state.snapshots.insert(snapshot_id, stored);

        for task in tasks {
            state.next_task_id += 1;
            let mut task = task.clone();
            task.id = state.next_task_id;
            task.snapshot_id = snapshot_id;
            state.tasks.insert(task.id, task);
        }

        let Some(campaign) = state.campaigns.get_mut(&campaign_id) else {
            return Ok(None);
        };
        campaign.status = CampaignStatus::Sending;
        campaign.snapshot_id = Some(snapshot_id);
        campaign.started_at = Some(now);
        campaign.updated_at = now;

        Ok(Some(StartedSend {
            campaign: campaign.clone(),
            snapshot_id,
            task_count: tasks.len(),
        }))
    }

    async fn get_snapshot(&self, snapshot_id: i64) -> DispatchResult<Option<RecipientSnapshot>> {
        Ok(self.lock().snapshots.get(&snapshot_id).cloned())
    }

    async fn find_due_scheduled(&self, now: DateTime<Utc>) -> DispatchResult<Vec<Campaign>> {
        let mut due: Vec<Campaign> = self
            .lock()
            .campaigns
            .values()
            .filter(|c| {
                c.status == CampaignStatus::Scheduled
                    && c.scheduled_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|c| (c.scheduled_at, c.id));
        Ok(due)
    }

    async fn find_by_status(&self, status: CampaignStatus) -> DispatchResult<Vec<Campaign>> {
        Ok(self
            .lock()
            .campaigns
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DeliveryTaskRepository for InMemoryStore {
    async fn get_by_id(&self, id: i64) -> DispatchResult<Option<DeliveryTask>> {
        Ok(self.lock().tasks.get(&id).cloned())
    }

    async fn find_by_vendor_message_id(
        &self,
        vendor_message_id: &str,
    ) -> DispatchResult<Option<DeliveryTask>> {
        Ok(self
            .lock()
            .tasks
            .values()
            .rev()
            .find(|t| t.vendor_message_id.as_deref() == Some(vendor_message_id))
            .cloned())
    }

    async fn find_by_campaign(
        &self,
        campaign_id: i64,
        status: Option<TaskStatus>,
    ) -> DispatchResult<Vec<DeliveryTask>> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|t| t.campaign_id == campaign_id && status.map_or(true, |s| t.status == s))
            .cloned()
            .collect())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<DeliveryTask>> {
        let mut state = self.lock();
        let next_id = state
            .tasks
            .values()
            .filter(|t| TaskStatus::CLAIMABLE.contains(&t.status) && t.next_attempt_at <= now)
            .min_by_key(|t| (t.next_attempt_at, t.id))
            .map(|t| t.id);

        let Some(task) = next_id.and_then(|id| state.tasks.get_mut(&id)) else {
            return Ok(None);
        };
        task.status = TaskStatus::InFlight;
        task.claimed_by = Some(worker_id.to_string());
        task.claimed_at = Some(now);
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn transition(
        &self,
        id: i64,
        expected: &[TaskStatus],
        update: &TaskUpdate,
    ) -> DispatchResult<Option<DeliveryTask>> {
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&task.status) {
            return Ok(None);
        }
        update.apply_to(task);
        Ok(Some(task.clone()))
    }

    async fn cancel_pending(&self, campaign_id: i64, now: DateTime<Utc>) -> DispatchResult<u64> {
        let mut state = self.lock();
        let mut cancelled = 0;
        for task in state.tasks.values_mut().filter(|t| {
            t.campaign_id == campaign_id && TaskStatus::CLAIMABLE.contains(&t.status)
        }) {
            TaskUpdate::new(TaskStatus::Cancelled, now).apply_to(task);
            cancelled += 1;
        }
        Ok(cancelled)
    }

    async fn find_stale(
        &self,
        statuses: &[TaskStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<DeliveryTask>> {
        let mut stale: Vec<DeliveryTask> = self
            .lock()
            .tasks
            .values()
            .filter(|t| statuses.contains(&t.status) && t.updated_at <= older_than)
            .cloned()
            .collect();
        stale.sort_by_key(|t| (t.updated_at, t.id));
        stale.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(stale)
    }

    async fn find_awaiting_delivery(
        &self,
        sent_since: DateTime<Utc>,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<DeliveryTask>> {
        let mut due: Vec<DeliveryTask> = self
            .lock()
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Sent
                    && t.updated_at <= older_than
                    && t.sent_at.is_some_and(|sent| sent >= sent_since)
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.updated_at, t.id));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn count_by_status(&self, campaign_id: i64) -> DispatchResult<TaskCounts> {
        let mut counts = TaskCounts::default();
        for task in self
            .lock()
            .tasks
            .values()
            .filter(|t| t.campaign_id == campaign_id)
        {
            counts.add(task.status, 1);
            counts.total_segments += task.segment_count() as u64;
        }
        Ok(counts)
    }
}

#[async_trait]
impl VendorResponseRepository for InMemoryStore {
    async fn record(&self, record: &VendorResponseRecord) -> DispatchResult<i64> {
        let mut state = self.lock();
        let mut stored = record.clone();
        stored.id = state.responses.len() as i64 + 1;
        state.responses.push(stored);
        Ok(state.responses.len() as i64)
    }

    async fn find_by_task(&self, task_id: i64) -> DispatchResult<Vec<VendorResponseRecord>> {
        Ok(self
            .lock()
            .responses
            .iter()
            .filter(|r| r.task_id == Some(task_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AudienceSource for InMemoryStore {
    async fn group_members(&self, group_id: i64) -> DispatchResult<Vec<Contact>> {
        Ok(self
            .lock()
            .contacts
            .values()
            .filter(|c| c.group_id == group_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TemplateSource for InMemoryStore {
    async fn template_body(&self, template_id: i64) -> DispatchResult<Option<String>> {
        Ok(self.lock().templates.get(&template_id).cloned())
    }
}
