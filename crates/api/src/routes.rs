use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sms_dispatcher::CampaignDispatchService;

use crate::handlers::{
    campaigns::{
        cancel_campaign, get_campaign_snapshot, get_campaign_status, list_campaign_tasks,
        schedule_campaign, send_campaign, unschedule_campaign,
    },
    health::health_check,
    metrics::prometheus_metrics,
    webhooks::{delivery_report, twilio_status_callback},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CampaignDispatchService>,
    pub metrics: Option<PrometheusHandle>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        // 营销活动
        .route("/api/campaigns/{id}/send", post(send_campaign))
        .route("/api/campaigns/{id}/schedule", post(schedule_campaign))
        .route("/api/campaigns/{id}/unschedule", post(unschedule_campaign))
        .route("/api/campaigns/{id}/cancel", post(cancel_campaign))
        .route("/api/campaigns/{id}/status", get(get_campaign_status))
        .route("/api/campaigns/{id}/tasks", get(list_campaign_tasks))
        .route("/api/campaigns/{id}/snapshot", get(get_campaign_snapshot))
        // 供应商回执
        .route("/webhooks/delivery-report", post(delivery_report))
        .route("/webhooks/twilio", post(twilio_status_callback))
        .with_state(state)
}
