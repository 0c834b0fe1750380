use std::sync::Arc;

use sms_core::config::WorkerConfig;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::worker::{DeliveryWorker, WorkerContext};

/// 固定数量的投递 worker
///
/// 所有 worker 共享同一个供应商客户端（熔断器）和同一个速率限制器。
pub struct DeliveryWorkerPool {
    ctx: Arc<WorkerContext>,
    config: WorkerConfig,
    hostname: String,
}

impl DeliveryWorkerPool {
    pub fn new(ctx: Arc<WorkerContext>, config: WorkerConfig) -> Self {
        Self {
            ctx,
            config,
            hostname: hostname::get()
                .unwrap_or_else(|_| "unknown".into())
                .to_string_lossy()
                .to_string(),
        }
    }

    pub fn worker_ids(&self) -> Vec<String> {
        (0..self.config.workers)
            .map(|n| format!("{}-{}-{}", self.config.worker_id_prefix, self.hostname, n))
            .collect()
    }

    /// 启动全部 worker，关闭信号发出后等待返回的句柄即可完成优雅退出
    pub fn start(&self, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let handles: Vec<JoinHandle<()>> = self
            .worker_ids()
            .into_iter()
            .map(|id| {
                let worker = DeliveryWorker::new(id, Arc::clone(&self.ctx));
                tokio::spawn(worker.run(shutdown_tx.subscribe()))
            })
            .collect();

        info!(
            workers = handles.len(),
            vendor = self.ctx.gateway.vendor(),
            "投递 worker 池已启动"
        );
        handles
    }
}
