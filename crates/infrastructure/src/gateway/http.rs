use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sms_core::config::VendorConfig;
use sms_core::models::{OutboundSms, StatusQuery, VendorAck, VendorStatus, VendorStatusReport};
use sms_core::traits::SmsGateway;
use sms_core::{DispatchError, DispatchResult};
use tracing::{debug, warn};

/// 供应商接受发送时的响应体
#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(alias = "id", alias = "sid")]
    message_id: String,
    #[serde(default)]
    status: Option<String>,
}

/// 状态查询响应体
#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default, alias = "id", alias = "sid")]
    message_id: Option<String>,
    status: String,
    #[serde(default)]
    error_code: Option<String>,
}

/// 错误响应体，字段都可能缺失
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

/// 基于 HTTP JSON 接口的短信供应商
///
/// 只设置连接超时：连接建立后的调用超时由上层的网关客户端处理，
/// 这样已经发出的请求不会在这里被当作可重试的错误。
pub struct HttpSmsGateway {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    send_path: String,
    status_path: String,
}

impl HttpSmsGateway {
    pub fn new(config: &VendorConfig) -> DispatchResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| DispatchError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            send_path: config.send_path.clone(),
            status_path: config.status_path.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 查询请求的错误归类，查询可以随时重复
    fn map_request_error(e: reqwest::Error) -> DispatchError {
        if e.is_connect() {
            DispatchError::TransientVendor(format!("无法连接供应商: {e}"))
        } else {
            DispatchError::Network(e.to_string())
        }
    }

    /// 发送请求的错误归类
    ///
    /// 只有连接失败能确定请求没有到达供应商；连接建立后的错误
    /// 都可能发生在供应商已经接受之后，结果未知。
    fn map_send_error(e: reqwest::Error) -> DispatchError {
        if e.is_connect() {
            DispatchError::TransientVendor(format!("无法连接供应商: {e}"))
        } else if e.is_builder() {
            DispatchError::Internal(format!("构建供应商请求失败: {e}"))
        } else {
            DispatchError::OutcomeUnknown(e.to_string())
        }
    }

    fn retry_after(response: &Response) -> Option<Duration> {
        response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// 非 2xx 响应的分类：429 限流，5xx 临时错误，其余 4xx 为终态拒绝
    async fn error_from_response(response: Response) -> DispatchError {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return DispatchError::RateLimited {
                retry_after: Self::retry_after(&response),
            };
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            return DispatchError::TransientVendor(format!("HTTP {status}: {body}"));
        }

        let parsed: ErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        let code = parsed.code.map(|c| match c {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        });
        DispatchError::TerminalVendor {
            code,
            message: parsed
                .message
                .unwrap_or_else(|| format!("HTTP {status}: {body}")),
        }
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, sms: &OutboundSms) -> DispatchResult<VendorAck> {
        let body = json!({
            "from": sms.from,
            "to": sms.to,
            "client_reference": sms.client_reference,
            "encoding": sms.encoding,
            "parts": sms.parts,
        });

        let response = self
            .http_client
            .post(self.url(&self.send_path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            let err = Self::error_from_response(response).await;
            warn!(client_reference = %sms.client_reference, error = %err, "供应商拒绝发送请求");
            return Err(err);
        }

        // 2xx 说明供应商已经收下请求，响应体读不出来也不能重发
        let parsed: SendResponse = response.json().await.map_err(|e| {
            DispatchError::OutcomeUnknown(format!("无法解析供应商的 2xx 响应: {e}"))
        })?;

        debug!(
            client_reference = %sms.client_reference,
            vendor_message_id = %parsed.message_id,
            "供应商已接受短信"
        );

        Ok(VendorAck {
            vendor_message_id: parsed.message_id,
            status: parsed.status,
        })
    }

    async fn query_status(&self, query: &StatusQuery) -> DispatchResult<VendorStatusReport> {
        let mut params = vec![("client_reference", query.client_reference.as_str())];
        if let Some(id) = &query.vendor_message_id {
            params.push(("message_id", id.as_str()));
        }

        let response = self
            .http_client
            .get(self.url(&self.status_path))
            .bearer_auth(&self.api_key)
            .query(&params)
            .send()
            .await
            .map_err(Self::map_request_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(VendorStatusReport {
                vendor_message_id: query.vendor_message_id.clone(),
                status: VendorStatus::NotFound,
            });
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let parsed: StatusResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::TransientVendor(format!("无法解析供应商响应: {e}")))?;

        Ok(VendorStatusReport {
            vendor_message_id: parsed
                .message_id
                .or_else(|| query.vendor_message_id.clone()),
            status: VendorStatus::from_vendor(&parsed.status, parsed.error_code.as_deref()),
        })
    }
}
