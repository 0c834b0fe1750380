#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sms_core::config::{ReconciliationConfig, RetryConfig};
use sms_core::models::{
    Campaign, Contact, DeliveryTask, OutboundSms, StatusQuery, VendorAck, VendorStatus,
    VendorStatusReport,
};
use sms_core::traits::{CampaignRepository, DeliveryTaskRepository, SmsGateway};
use sms_core::{CircuitBreaker, CircuitBreakerConfig, Clock, DispatchError, DispatchResult, ManualClock};
use sms_dispatcher::{
    CampaignDispatchService, CampaignStateMachine, DeliveryOutcomeResolver,
    ReconciliationService, RetryPolicy,
};
use sms_domain::MessageRenderer;
use sms_infrastructure::{InMemoryStore, TokenBucket};
use sms_worker::{DeliveryWorker, VendorGatewayClient, WorkerContext};
use tokio::sync::Notify;

pub const GROUP: i64 = 10;

pub enum Reply {
    Accept(&'static str),
    Hang,
    Transient,
    RateLimited(Option<Duration>),
    Terminal,
    Garbled,
}

/// 按脚本回复的供应商；脚本用完后接受所有请求
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Reply>>,
    statuses: Mutex<HashMap<String, VendorStatus>>,
    pub sent: Mutex<Vec<OutboundSms>>,
}

impl ScriptedGateway {
    pub fn script(&self, replies: Vec<Reply>) {
        self.replies.lock().unwrap().extend(replies);
    }

    pub fn set_status(&self, client_reference: &str, status: VendorStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(client_reference.to_string(), status);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl SmsGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, sms: &OutboundSms) -> DispatchResult<VendorAck> {
        let n = {
            let mut sent = self.sent.lock().unwrap();
            sent.push(sms.clone());
            sent.len()
        };
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Accept(id)) => Ok(VendorAck {
                vendor_message_id: id.to_string(),
                status: Some("queued".to_string()),
            }),
            None => Ok(VendorAck {
                vendor_message_id: format!("SM-auto-{n}"),
                status: Some("queued".to_string()),
            }),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Err(DispatchError::Internal("the client should have timed out".to_string()))
            }
            Some(Reply::Transient) => Err(DispatchError::TransientVendor("503".to_string())),
            Some(Reply::RateLimited(retry_after)) => Err(DispatchError::RateLimited { retry_after }),
            Some(Reply::Terminal) => Err(DispatchError::TerminalVendor {
                code: Some("21211".to_string()),
                message: "invalid destination".to_string(),
            }),
            Some(Reply::Garbled) => Err(DispatchError::OutcomeUnknown(
                "无法解析供应商的 2xx 响应".to_string(),
            )),
        }
    }

    async fn query_status(&self, query: &StatusQuery) -> DispatchResult<VendorStatusReport> {
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(&query.client_reference)
            .cloned()
            .unwrap_or(VendorStatus::Unknown);
        Ok(VendorStatusReport {
            vendor_message_id: None,
            status,
        })
    }
}

pub struct Harness {
    pub store: InMemoryStore,
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<ScriptedGateway>,
    pub breaker: Arc<CircuitBreaker>,
    pub ctx: Arc<WorkerContext>,
    pub worker: DeliveryWorker,
    pub service: Arc<CampaignDispatchService>,
    pub resolver: Arc<DeliveryOutcomeResolver>,
    pub state_machine: Arc<CampaignStateMachine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(RetryConfig::default(), 5)
    }

    pub fn with(retry: RetryConfig, failure_threshold: usize) -> Self {
        let store = InMemoryStore::new();
        let clock = Arc::new(ManualClock::default());
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let notify = Arc::new(Notify::new());
        let repo = Arc::new(store.clone());
        let gateway = Arc::new(ScriptedGateway::default());
        let breaker = Arc::new(CircuitBreaker::with_config(
            "vendor",
            CircuitBreakerConfig {
                failure_threshold,
                ..Default::default()
            },
        ));

        let state_machine = Arc::new(CampaignStateMachine::new(
            repo.clone(),
            repo.clone(),
            shared_clock.clone(),
        ));
        let resolver = Arc::new(DeliveryOutcomeResolver::new(
            repo.clone(),
            state_machine.clone(),
            RetryPolicy::new(retry.clone()),
            shared_clock.clone(),
            notify.clone(),
        ));
        let service = Arc::new(CampaignDispatchService::new(
            repo.clone(),
            repo.clone(),
            repo.clone(),
            repo.clone(),
            repo.clone(),
            state_machine.clone(),
            resolver.clone(),
            MessageRenderer::default(),
            shared_clock.clone(),
            notify.clone(),
        ));

        let ctx = Arc::new(WorkerContext {
            campaign_repo: repo.clone(),
            task_repo: repo.clone(),
            response_repo: repo,
            gateway: Arc::new(VendorGatewayClient::new(
                gateway.clone(),
                breaker.clone(),
                Duration::from_millis(50),
            )),
            rate_limiter: Arc::new(TokenBucket::new(1000.0, 1000, shared_clock.clone())),
            retry_policy: RetryPolicy::new(retry),
            state_machine: state_machine.clone(),
            clock: shared_clock,
            work_available: notify,
            poll_interval: Duration::from_millis(10),
            circuit_open_backoff: Duration::from_secs(5),
        });
        let worker = DeliveryWorker::new("test-worker-0", ctx.clone());

        Self {
            store,
            clock,
            gateway,
            breaker,
            ctx,
            worker,
            service,
            resolver,
            state_machine,
        }
    }

    pub fn reconciliation(&self) -> ReconciliationService {
        let repo = Arc::new(self.store.clone());
        ReconciliationService::new(
            repo.clone(),
            repo.clone(),
            repo,
            self.gateway.clone(),
            self.resolver.clone(),
            self.state_machine.clone(),
            ReconciliationConfig::default(),
            Duration::from_secs(1),
            self.clock.clone(),
        )
    }

    /// 创建一个活动并开始发送，每个号码对应一个联系人
    pub async fn sending_campaign(&self, phones: &[&str]) -> Campaign {
        for (i, phone) in phones.iter().enumerate() {
            let id = i as i64 + 1;
            self.store
                .add_contact(Contact::new(id, &format!("contact-{id}"), phone, GROUP));
        }
        let campaign = self
            .store
            .create(&Campaign::new(1, "flash sale", GROUP, "ACME").with_body("Hi {name}"))
            .await
            .unwrap();
        self.service.send_campaign(campaign.id).await.unwrap();
        self.campaign(campaign.id).await
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
}
