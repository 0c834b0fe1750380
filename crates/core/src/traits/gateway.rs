use async_trait::async_trait;

use crate::errors::DispatchResult;
use crate::models::{OutboundSms, StatusQuery, VendorAck, VendorStatusReport};

/// 短信供应商接口
///
/// 实现需要把供应商错误归类为 `TransientVendor`、`TerminalVendor`
/// 或 `RateLimited`，调用超时由上层处理。
#[async_trait]
pub trait SmsGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, sms: &OutboundSms) -> DispatchResult<VendorAck>;

    async fn query_status(&self, query: &StatusQuery) -> DispatchResult<VendorStatusReport>;
}
