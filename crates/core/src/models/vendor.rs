use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{impl_sqlite_text_enum, MessageEncoding, MessageSegment};

/// 发往供应商的一条短信，长短信的所有分段在同一个请求中按序发送
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundSms {
    pub from: String,
    pub to: String,
    pub client_reference: String,
    pub encoding: MessageEncoding,
    pub parts: Vec<MessageSegment>,
}

/// 供应商接受发送后的确认
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VendorAck {
    pub vendor_message_id: String,
    /// 供应商返回的原始状态
    pub status: Option<String>,
}

/// 发送调用的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted(VendorAck),
    /// 请求超时，供应商可能已经发出，也可能没有
    Unknown,
}

/// 状态查询条件，超时的任务只有 client_reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusQuery {
    pub client_reference: String,
    pub vendor_message_id: Option<String>,
}

/// 归一化后的供应商状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VendorStatus {
    Accepted,
    Delivered,
    Failed { error_code: Option<String> },
    /// 供应商没有这条消息的记录
    NotFound,
    Unknown,
}

impl VendorStatus {
    /// 把供应商的状态词汇映射为内部状态
    pub fn from_vendor(status: &str, error_code: Option<&str>) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "delivered" => VendorStatus::Delivered,
            "sent" | "accepted" | "queued" | "pending" | "sending" => VendorStatus::Accepted,
            "failed" | "undelivered" | "rejected" | "expired" => VendorStatus::Failed {
                error_code: error_code.map(str::to_string),
            },
            _ => VendorStatus::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VendorStatus::Accepted => "accepted",
            VendorStatus::Delivered => "delivered",
            VendorStatus::Failed { .. } => "failed",
            VendorStatus::NotFound => "not_found",
            VendorStatus::Unknown => "unknown",
        }
    }
}

/// 状态查询结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VendorStatusReport {
    pub vendor_message_id: Option<String>,
    pub status: VendorStatus,
}

/// 供应商响应的来源
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VendorResponseKind {
    Ack,
    Callback,
    Poll,
}

impl VendorResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorResponseKind::Ack => "ack",
            VendorResponseKind::Callback => "callback",
            VendorResponseKind::Poll => "poll",
        }
    }
}

impl fmt::Display for VendorResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VendorResponseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ack" => Ok(VendorResponseKind::Ack),
            "callback" => Ok(VendorResponseKind::Callback),
            "poll" => Ok(VendorResponseKind::Poll),
            _ => Err(format!("Invalid vendor response kind: {s}")),
        }
    }
}

impl_sqlite_text_enum!(VendorResponseKind);

/// 供应商响应审计记录，只追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorResponseRecord {
    pub id: i64,
    /// 未知的消息ID也会被记录
    pub task_id: Option<i64>,
    pub vendor_message_id: Option<String>,
    pub kind: VendorResponseKind,
    pub status: String,
    pub error_code: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl VendorResponseRecord {
    pub fn new(
        task_id: Option<i64>,
        vendor_message_id: Option<String>,
        kind: VendorResponseKind,
        status: &str,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            task_id,
            vendor_message_id,
            kind,
            status: status.to_string(),
            error_code: None,
            payload: serde_json::Value::Null,
            received_at,
        }
    }

    pub fn with_error_code(mut self, code: Option<String>) -> Self {
        self.error_code = code;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_status_mapping() {
        assert_eq!(VendorStatus::from_vendor("delivered", None), VendorStatus::Delivered);
        assert_eq!(VendorStatus::from_vendor("Queued", None), VendorStatus::Accepted);
        assert_eq!(VendorStatus::from_vendor("sent", None), VendorStatus::Accepted);
        assert_eq!(
            VendorStatus::from_vendor("undelivered", Some("30003")),
            VendorStatus::Failed {
                error_code: Some("30003".to_string())
            }
        );
        assert_eq!(VendorStatus::from_vendor("read", None), VendorStatus::Unknown);
    }
}
