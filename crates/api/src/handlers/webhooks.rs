//! 供应商投递回执
//!
//! 回执可能是 JSON 也可能是表单。未知消息同样返回 200，避免供应商反复重投。

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{FromRequest, Request, State},
    http::header,
    response::IntoResponse,
    Form,
};
use serde_json::{Map, Value};

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

const MESSAGE_ID_FIELDS: [&str; 3] = ["message_id", "sid", "id"];
const STATUS_FIELDS: [&str; 2] = ["status", "delivery_status"];

/// 通用格式的投递回执
pub async fn delivery_report(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<impl IntoResponse> {
    let payload = read_payload(request).await?;

    let message_id = first_field(&payload, &MESSAGE_ID_FIELDS)
        .ok_or_else(|| ApiError::BadRequest("缺少消息ID (message_id/sid/id)".to_string()))?;
    let status = first_field(&payload, &STATUS_FIELDS)
        .ok_or_else(|| ApiError::BadRequest("缺少投递状态 (status/delivery_status)".to_string()))?;
    let error_code = first_field(&payload, &["error_code"]);

    let outcome = state
        .service
        .on_vendor_callback(&message_id, &status, error_code.as_deref(), payload)
        .await?;
    Ok(success(outcome))
}

/// Twilio 的状态回调，字段为 `MessageSid`、`MessageStatus`、`ErrorCode`
pub async fn twilio_status_callback(
    State(state): State<AppState>,
    Form(fields): Form<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let payload = form_to_value(fields);

    let message_id = first_field(&payload, &["MessageSid"])
        .ok_or_else(|| ApiError::BadRequest("缺少 MessageSid".to_string()))?;
    let status = first_field(&payload, &["MessageStatus"])
        .ok_or_else(|| ApiError::BadRequest("缺少 MessageStatus".to_string()))?;
    let error_code = first_field(&payload, &["ErrorCode"]);

    let outcome = state
        .service
        .on_vendor_callback(&message_id, &status, error_code.as_deref(), payload)
        .await?;
    Ok(success(outcome))
}

async fn read_payload(request: Request) -> ApiResult<Value> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        return Ok(form_to_value(fields));
    }

    let body = Bytes::from_request(request, &())
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?;
    serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn form_to_value(fields: HashMap<String, String>) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect::<Map<String, Value>>(),
    )
}

/// 按顺序取第一个非空字段，数字按字符串处理
fn first_field(payload: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match payload.get(*name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
