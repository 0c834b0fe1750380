use std::time::Duration;

use async_trait::async_trait;

/// 供应商发送速率限制
///
/// 所有 worker 和活动共享同一个实例。等待中的调用只会被延迟，不会被丢弃。
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// 立即尝试取一个令牌，失败时返回距离下一个令牌的时间
    fn try_acquire(&self) -> Result<(), Duration>;

    /// 等待直到取得一个令牌
    async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            tokio::time::sleep(wait).await;
        }
    }
}
