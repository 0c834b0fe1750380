//! 营销活动调度
//!
//! 发送入口、活动状态机、重试策略、对账和计划发送扫描。

pub mod outcome;
pub mod reconciliation;
pub mod retry_policy;
pub mod scheduler;
pub mod service;
pub mod state_machine;

pub use outcome::DeliveryOutcomeResolver;
pub use reconciliation::{ReconciliationReport, ReconciliationService};
pub use retry_policy::RetryPolicy;
pub use scheduler::ScheduledCampaignScanner;
pub use service::{
    CallbackOutcome, CampaignDispatchService, CampaignStatusReport, CancelReport, SendAccepted,
};
pub use state_machine::CampaignStateMachine;
