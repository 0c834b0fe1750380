//! # 短信投递 API
//!
//! 营销短信发送核心的 HTTP 接口，基于 Axum。
//!
//! - `POST /api/campaigns/{id}/send` 开始发送 (202)
//! - `POST /api/campaigns/{id}/schedule`、`/unschedule`、`/cancel`
//! - `GET /api/campaigns/{id}/status`、`/tasks?status=`、`/snapshot`
//! - `POST /webhooks/delivery-report`、`/webhooks/twilio` 供应商回执
//! - `GET /health`、`GET /metrics`
//!
//! 成功响应统一为 `{success, data, message, timestamp}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::time::Duration;

use axum::Router;
use sms_core::config::ApiConfig;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::AppState;
use routes::create_routes;

/// 创建完整的API应用
pub fn create_app(state: AppState, config: &ApiConfig) -> Router {
    let router = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.request_timeout_seconds,
            ))),
    );

    if config.cors_enabled {
        router.layer(cors_layer(config))
    } else {
        router
    }
}
