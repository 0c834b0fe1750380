use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sms_core::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Dispatch(#[from] DispatchError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Dispatch(err) => match err {
                DispatchError::CampaignNotFound { .. } => (StatusCode::NOT_FOUND, "CAMPAIGN_NOT_FOUND"),
                DispatchError::DeliveryTaskNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "DELIVERY_TASK_NOT_FOUND")
                }
                DispatchError::TemplateNotFound { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "TEMPLATE_NOT_FOUND")
                }
                DispatchError::InvalidState { .. } => (StatusCode::CONFLICT, "INVALID_STATE"),
                DispatchError::EmptyAudience { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "EMPTY_AUDIENCE")
                }
                DispatchError::MessageTooLong { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "MESSAGE_TOO_LONG")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "DISPATCH_ERROR"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        if status.is_server_error() {
            tracing::error!(error = %self, "请求处理失败");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use sms_core::models::CampaignStatus;

    use super::*;

    #[test]
    fn test_dispatch_error_status_mapping() {
        let cases = [
            (DispatchError::CampaignNotFound { id: 1 }, StatusCode::NOT_FOUND),
            (
                DispatchError::invalid_state(1, CampaignStatus::Sending, "send"),
                StatusCode::CONFLICT,
            ),
            (
                DispatchError::EmptyAudience {
                    campaign_id: 1,
                    invalid_count: 2,
                    opted_out_count: 0,
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                DispatchError::DatabaseOperation("disk full".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_bad_request() {
        let response = ApiError::BadRequest("missing status".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
