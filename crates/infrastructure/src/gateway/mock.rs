use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sms_core::models::{OutboundSms, StatusQuery, VendorAck, VendorStatus, VendorStatusReport};
use sms_core::traits::SmsGateway;
use sms_core::DispatchResult;
use tracing::info;
use uuid::Uuid;

/// 开发用供应商，模拟网络延迟后接受所有短信，不实际发送
pub struct MockSmsGateway {
    latency: Duration,
    /// client_reference -> vendor_message_id
    accepted: Mutex<HashMap<String, String>>,
}

impl MockSmsGateway {
    pub fn new(latency_ms: u64) -> Self {
        Self {
            latency: Duration::from_millis(latency_ms),
            accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SmsGateway for MockSmsGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, sms: &OutboundSms) -> DispatchResult<VendorAck> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());
        // 同一 client_reference 重复发送时返回同一个消息ID
        let vendor_message_id = accepted
            .entry(sms.client_reference.clone())
            .or_insert_with(|| format!("mock-{}", Uuid::new_v4()))
            .clone();

        info!(
            to = %sms.to,
            parts = sms.parts.len(),
            vendor_message_id = %vendor_message_id,
            "模拟发送短信"
        );

        Ok(VendorAck {
            vendor_message_id,
            status: Some("sent".to_string()),
        })
    }

    async fn query_status(&self, query: &StatusQuery) -> DispatchResult<VendorStatusReport> {
        let accepted = self.accepted.lock().unwrap_or_else(|e| e.into_inner());
        let report = match accepted.get(&query.client_reference) {
            Some(id) => VendorStatusReport {
                vendor_message_id: Some(id.clone()),
                status: VendorStatus::Delivered,
            },
            None => VendorStatusReport {
                vendor_message_id: None,
                status: VendorStatus::NotFound,
            },
        };
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sms_core::models::MessageEncoding;

    fn sms(reference: &str) -> OutboundSms {
        OutboundSms {
            from: "ACME".to_string(),
            to: "+15551234567".to_string(),
            client_reference: reference.to_string(),
            encoding: MessageEncoding::Gsm7,
            parts: vec![],
        }
    }

    #[tokio::test]
    async fn test_mock_send_is_idempotent_per_reference() {
        let gateway = MockSmsGateway::new(0);
        let first = gateway.send(&sms("ref-1")).await.unwrap();
        let again = gateway.send(&sms("ref-1")).await.unwrap();
        assert_eq!(first.vendor_message_id, again.vendor_message_id);
        assert!(first.vendor_message_id.starts_with("mock-"));
        assert_eq!(gateway.accepted_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_status_query() {
        let gateway = MockSmsGateway::new(0);
        gateway.send(&sms("ref-1")).await.unwrap();

        let known = gateway
            .query_status(&StatusQuery {
                client_reference: "ref-1".to_string(),
                vendor_message_id: None,
            })
            .await
            .unwrap();
        assert_eq!(known.status, VendorStatus::Delivered);

        let unknown = gateway
            .query_status(&StatusQuery {
                client_reference: "ref-2".to_string(),
                vendor_message_id: None,
            })
            .await
            .unwrap();
        assert_eq!(unknown.status, VendorStatus::NotFound);
    }
}
