#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sms_core::config::{ReconciliationConfig, RetryConfig};
use sms_core::models::{
    Campaign, Contact, DeliveryTask, OutboundSms, StatusQuery, TaskStatus, TaskUpdate, VendorAck,
    VendorStatus, VendorStatusReport,
};
use sms_core::traits::{CampaignRepository, DeliveryTaskRepository, SmsGateway};
use sms_core::{Clock, DispatchResult, ManualClock};
use sms_dispatcher::{
    CampaignDispatchService, CampaignStateMachine, DeliveryOutcomeResolver,
    ReconciliationService, RetryPolicy,
};
use sms_domain::MessageRenderer;
use sms_infrastructure::InMemoryStore;
use tokio::sync::Notify;

pub const GROUP: i64 = 10;

/// 测试用的组装：内存存储 + 手动时钟
pub struct Harness {
    pub store: InMemoryStore,
    pub clock: Arc<ManualClock>,
    pub state_machine: Arc<CampaignStateMachine>,
    pub resolver: Arc<DeliveryOutcomeResolver>,
    pub service: Arc<CampaignDispatchService>,
    pub notify: Arc<Notify>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_retry(RetryConfig::default())
    }

    pub fn with_retry(retry: RetryConfig) -> Self {
        let store = InMemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let notify = Arc::new(Notify::new());
        let repo = Arc::new(store.clone());

        let state_machine = Arc::new(CampaignStateMachine::new(
            repo.clone(),
            repo.clone(),
            shared_clock.clone(),
        ));
        let resolver = Arc::new(DeliveryOutcomeResolver::new(
            repo.clone(),
            state_machine.clone(),
            RetryPolicy::new(retry),
            shared_clock.clone(),
            notify.clone(),
        ));
        let service = Arc::new(CampaignDispatchService::new(
            repo.clone(),
            repo.clone(),
            repo.clone(),
            repo.clone(),
            repo,
            state_machine.clone(),
            resolver.clone(),
            MessageRenderer::default(),
            shared_clock,
            notify.clone(),
        )
        .with_segment_price(0.01));

        Self {
            store,
            clock,
            state_machine,
            resolver,
            service,
            notify,
        }
    }

    pub fn reconciliation(
        &self,
        gateway: Arc<dyn SmsGateway>,
        config: ReconciliationConfig,
    ) -> ReconciliationService {
        let repo = Arc::new(self.store.clone());
        ReconciliationService::new(
            repo.clone(),
            repo.clone(),
            repo,
            gateway,
            self.resolver.clone(),
            self.state_machine.clone(),
            config,
            Duration::from_secs(1),
            self.clock.clone(),
        )
    }

    pub fn add_contacts(&self, contacts: &[(i64, &str)]) {
        for (id, phone) in contacts {
            self.store
                .add_contact(Contact::new(*id, &format!("contact-{id}"), phone, GROUP));
        }
    }

    pub async fn draft_campaign(&self, body: &str) -> Campaign {
        self.store
            .create(&Campaign::new(1, "spring sale", GROUP, "ACME").with_body(body))
            .await
            .unwrap()
    }

    pub async fn task(&self, task_id: i64) -> DeliveryTask {
        DeliveryTaskRepository::get_by_id(&self.store, task_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn campaign(&self, campaign_id: i64) -> Campaign {
        CampaignRepository::get_by_id(&self.store, campaign_id)
            .await
            .unwrap()
            .unwrap()
    }

    /// 模拟 worker：认领一个任务
    pub async fn claim(&self) -> DeliveryTask {
        self.store
            .claim_next("test-worker", self.clock.now())
            .await
            .unwrap()
            .expect("a claimable task")
    }

    /// 模拟 worker：供应商接受
    pub async fn accept(&self, task: &DeliveryTask, vendor_message_id: &str) -> DeliveryTask {
        let update = TaskUpdate::new(TaskStatus::Sent, self.clock.now())
            .counting_attempt()
            .with_vendor_message_id(vendor_message_id);
        let sent = self
            .store
            .transition(task.id, &[TaskStatus::InFlight], &update)
            .await
            .unwrap()
            .unwrap();
        self.state_machine
            .on_task_settled(task.campaign_id)
            .await
            .unwrap();
        sent
    }

    /// 模拟 worker：供应商拒绝
    pub async fn reject(&self, task: &DeliveryTask, reason: &str) -> DeliveryTask {
        let update = TaskUpdate::new(TaskStatus::Failed, self.clock.now())
            .counting_attempt()
            .with_error(reason);
        let failed = self
            .store
            .transition(task.id, &[TaskStatus::InFlight], &update)
            .await
            .unwrap()
            .unwrap();
        self.state_machine
            .on_task_settled(task.campaign_id)
            .await
            .unwrap();
        failed
    }

    /// 模拟 worker：调用超时
    pub async fn time_out(&self, task: &DeliveryTask) -> DeliveryTask {
        let update = TaskUpdate::new(TaskStatus::Unconfirmed, self.clock.now())
            .counting_attempt()
            .with_error("vendor call timed out");
        self.store
            .transition(task.id, &[TaskStatus::InFlight], &update)
            .await
            .unwrap()
            .unwrap()
    }
}

/// 只实现状态查询的供应商，按 client_reference 返回预设结果
#[derive(Default)]
pub struct ScriptedStatusGateway {
    statuses: Mutex<HashMap<String, VendorStatusReport>>,
    pub queries: Mutex<Vec<String>>,
}

impl ScriptedStatusGateway {
    pub fn set(&self, client_reference: &str, status: VendorStatus, vendor_message_id: Option<&str>) {
        self.statuses.lock().unwrap().insert(
            client_reference.to_string(),
            VendorStatusReport {
                vendor_message_id: vendor_message_id.map(str::to_string),
                status,
            },
        );
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl SmsGateway for ScriptedStatusGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, _sms: &OutboundSms) -> DispatchResult<VendorAck> {
        unreachable!("reconciliation never sends")
    }

    async fn query_status(&self, query: &StatusQuery) -> DispatchResult<VendorStatusReport> {
        self.queries
            .lock()
            .unwrap()
            .push(query.client_reference.clone());
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&query.client_reference)
            .cloned()
            .unwrap_or(VendorStatusReport {
                vendor_message_id: None,
                status: VendorStatus::Unknown,
            }))
    }
}
