use std::sync::Arc;
use std::time::Duration;

use sms_core::models::{OutboundSms, SendOutcome};
use sms_core::traits::SmsGateway;
use sms_core::{CircuitBreaker, CircuitState, DispatchError, DispatchResult};
use tracing::{debug, warn};

/// 带超时和熔断的供应商客户端
///
/// 调用超时或响应无法确认时不会被当作失败重发：供应商可能已经发出，
/// 结果为 `SendOutcome::Unknown`，由对账确认。超时、临时错误和限流计入熔断器，
/// 终态拒绝不计入。
pub struct VendorGatewayClient {
    gateway: Arc<dyn SmsGateway>,
    breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl VendorGatewayClient {
    pub fn new(gateway: Arc<dyn SmsGateway>, breaker: Arc<CircuitBreaker>, timeout: Duration) -> Self {
        Self {
            gateway,
            breaker,
            timeout,
        }
    }

    pub fn vendor(&self) -> &str {
        self.gateway.name()
    }

    pub async fn allows_calls(&self) -> bool {
        self.breaker.allows_calls().await
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.get_state().await
    }

    pub async fn send(&self, sms: &OutboundSms) -> DispatchResult<SendOutcome> {
        if !self.breaker.try_acquire().await {
            return Err(DispatchError::CircuitOpen);
        }

        match tokio::time::timeout(self.timeout, self.gateway.send(sms)).await {
            Ok(Ok(ack)) => {
                self.breaker.record_success().await;
                debug!(
                    client_reference = %sms.client_reference,
                    vendor_message_id = %ack.vendor_message_id,
                    "供应商已接受"
                );
                Ok(SendOutcome::Accepted(ack))
            }
            Ok(Err(DispatchError::OutcomeUnknown(reason))) => {
                self.breaker.record_failure().await;
                warn!(
                    client_reference = %sms.client_reference,
                    vendor = self.vendor(),
                    reason = %reason,
                    "供应商响应无法确认，发送结果未知"
                );
                Ok(SendOutcome::Unknown)
            }
            Ok(Err(e)) => {
                if e.counts_against_breaker() {
                    self.breaker.record_failure().await;
                } else {
                    self.breaker.record_success().await;
                }
                Err(e)
            }
            Err(_) => {
                self.breaker.record_failure().await;
                warn!(
                    client_reference = %sms.client_reference,
                    timeout_ms = self.timeout.as_millis() as u64,
                    vendor = self.vendor(),
                    "供应商调用超时，发送结果未知"
                );
                Ok(SendOutcome::Unknown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sms_core::models::{
        MessageEncoding, StatusQuery, VendorAck, VendorStatus, VendorStatusReport,
    };
    use sms_core::CircuitBreakerConfig;

    use super::*;

    enum Behaviour {
        Accept,
        Hang,
        Garbled,
        Transient,
        Terminal,
    }

    struct FakeGateway {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl FakeGateway {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SmsGateway for FakeGateway {
        fn name(&self) -> &str {
            "fake"
        }

        async fn send(&self, _sms: &OutboundSms) -> DispatchResult<VendorAck> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Accept => Ok(VendorAck {
                    vendor_message_id: "SM1".to_string(),
                    status: Some("queued".to_string()),
                }),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    unreachable!("the client times out first")
                }
                Behaviour::Garbled => Err(DispatchError::OutcomeUnknown(
                    "无法解析供应商的 2xx 响应".to_string(),
                )),
                Behaviour::Transient => Err(DispatchError::TransientVendor("503".to_string())),
                Behaviour::Terminal => Err(DispatchError::TerminalVendor {
                    code: Some("21211".to_string()),
                    message: "invalid number".to_string(),
                }),
            }
        }

        async fn query_status(&self, _query: &StatusQuery) -> DispatchResult<VendorStatusReport> {
            Ok(VendorStatusReport {
                vendor_message_id: None,
                status: VendorStatus::Unknown,
            })
        }
    }

    fn sms() -> OutboundSms {
        OutboundSms {
            from: "ACME".to_string(),
            to: "+15550000001".to_string(),
            client_reference: "c1-r1".to_string(),
            encoding: MessageEncoding::Gsm7,
            parts: Vec::new(),
        }
    }

    fn client(gateway: Arc<FakeGateway>, failure_threshold: usize) -> VendorGatewayClient {
        let breaker = CircuitBreaker::with_config(
            "vendor",
            CircuitBreakerConfig {
                failure_threshold,
                ..Default::default()
            },
        );
        VendorGatewayClient::new(gateway, Arc::new(breaker), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_accepted_send() {
        let client = client(FakeGateway::new(Behaviour::Accept), 2);
        let outcome = client.send(&sms()).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Accepted(ack) if ack.vendor_message_id == "SM1"));
        assert_eq!(client.circuit_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_timeout_is_unknown_and_counts_against_breaker() {
        let client = client(FakeGateway::new(Behaviour::Hang), 2);

        assert_eq!(client.send(&sms()).await.unwrap(), SendOutcome::Unknown);
        assert_eq!(client.circuit_state().await, CircuitState::Closed);
        assert_eq!(client.send(&sms()).await.unwrap(), SendOutcome::Unknown);
        assert_eq!(client.circuit_state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let gateway = FakeGateway::new(Behaviour::Transient);
        let client = client(gateway.clone(), 2);

        for _ in 0..2 {
            let err = client.send(&sms()).await.unwrap_err();
            assert!(matches!(err, DispatchError::TransientVendor(_)));
        }
        assert!(!client.allows_calls().await);

        let err = client.send(&sms()).await.unwrap_err();
        assert!(matches!(err, DispatchError::CircuitOpen));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminal_rejections_keep_circuit_closed() {
        let client = client(FakeGateway::new(Behaviour::Terminal), 1);
        for _ in 0..3 {
            let err = client.send(&sms()).await.unwrap_err();
            assert!(matches!(err, DispatchError::TerminalVendor { .. }));
        }
        assert_eq!(client.circuit_state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_unreadable_reply_is_unknown_not_error() {
        let gateway = FakeGateway::new(Behaviour::Garbled);
        let client = client(gateway.clone(), 2);

        assert_eq!(client.send(&sms()).await.unwrap(), SendOutcome::Unknown);
        assert_eq!(client.send(&sms()).await.unwrap(), SendOutcome::Unknown);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
        assert_eq!(client.circuit_state().await, CircuitState::Open);
    }
}
