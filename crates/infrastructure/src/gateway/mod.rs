//! 短信供应商实现

pub mod http;
pub mod mock;

use std::sync::Arc;

use sms_core::config::{VendorConfig, VendorKind};
use sms_core::traits::SmsGateway;
use sms_core::DispatchResult;

pub use http::HttpSmsGateway;
pub use mock::MockSmsGateway;

/// 按配置创建供应商实现
pub fn build_gateway(config: &VendorConfig) -> DispatchResult<Arc<dyn SmsGateway>> {
    let gateway: Arc<dyn SmsGateway> = match config.kind {
        VendorKind::Http => Arc::new(HttpSmsGateway::new(config)?),
        VendorKind::Mock => Arc::new(MockSmsGateway::new(config.mock_latency_ms)),
    };
    Ok(gateway)
}
