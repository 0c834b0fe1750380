use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sms_core::models::TaskStatus;
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    response::{accepted, success},
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct TaskQueryParams {
    pub status: Option<String>,
}

/// 开始发送，任务入队后立即返回 202
pub async fn send_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let result = state.service.send_campaign(id).await?;
    info!(campaign_id = id, tasks = result.task_count, "发送请求已受理");
    let message = format!("{} 条短信已进入发送队列", result.task_count);
    Ok(accepted(result, message))
}

pub async fn schedule_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ScheduleRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.scheduled_at <= Utc::now() {
        return Err(ApiError::BadRequest("计划发送时间必须晚于当前时间".to_string()));
    }
    let campaign = state
        .service
        .schedule_campaign(id, request.scheduled_at)
        .await?;
    Ok(success(campaign))
}

pub async fn unschedule_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let campaign = state.service.unschedule_campaign(id).await?;
    Ok(success(campaign))
}

pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let report = state.service.cancel_campaign(id).await?;
    Ok(success(report))
}

pub async fn get_campaign_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let report = state.service.get_campaign_status(id).await?;
    Ok(success(report))
}

pub async fn list_campaign_tasks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<TaskQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let tasks = state.service.list_campaign_tasks(id, status).await?;
    Ok(success(tasks))
}

pub async fn get_campaign_snapshot(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .service
        .get_snapshot(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(success(snapshot))
}
