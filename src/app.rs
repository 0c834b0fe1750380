use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use sms_api::{create_app, AppState};
use sms_core::traits::{
    AudienceSource, CampaignRepository, DeliveryTaskRepository, RateLimiter, TemplateSource,
    VendorResponseRepository,
};
use sms_core::{AppConfig, CircuitBreaker, Clock, SystemClock};
use sms_dispatcher::{
    CampaignDispatchService, CampaignStateMachine, DeliveryOutcomeResolver, ReconciliationService,
    RetryPolicy, ScheduledCampaignScanner,
};
use sms_domain::MessageRenderer;
use sms_infrastructure::{
    build_gateway, DatabaseManager, SqliteAudienceSource, SqliteCampaignRepository,
    SqliteDeliveryTaskRepository, SqliteTemplateSource, SqliteVendorResponseRepository,
    TokenBucket,
};
use sms_worker::{DeliveryWorkerPool, VendorGatewayClient, WorkerContext};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::shutdown::ShutdownManager;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AppMode {
    /// 仅运行HTTP接口
    Api,
    /// 投递 worker、对账和计划发送扫描
    Worker,
    /// 运行所有组件
    All,
}

impl AppMode {
    fn runs_api(self) -> bool {
        matches!(self, AppMode::Api | AppMode::All)
    }

    fn runs_workers(self) -> bool {
        matches!(self, AppMode::Worker | AppMode::All)
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    database: DatabaseManager,
    service: Arc<CampaignDispatchService>,
    worker_pool: DeliveryWorkerPool,
    reconciliation: Arc<ReconciliationService>,
    scanner: Arc<ScheduledCampaignScanner>,
    metrics: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(
        config: AppConfig,
        mode: AppMode,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let database = DatabaseManager::new(&config.database).await?;
        database.migrate().await.context("初始化数据库表结构失败")?;

        let pool = database.pool().clone();
        let campaign_repo: Arc<dyn CampaignRepository> =
            Arc::new(SqliteCampaignRepository::new(pool.clone()));
        let task_repo: Arc<dyn DeliveryTaskRepository> =
            Arc::new(SqliteDeliveryTaskRepository::new(pool.clone()));
        let response_repo: Arc<dyn VendorResponseRepository> =
            Arc::new(SqliteVendorResponseRepository::new(pool.clone()));
        let audience: Arc<dyn AudienceSource> = Arc::new(SqliteAudienceSource::new(pool.clone()));
        let templates: Arc<dyn TemplateSource> = Arc::new(SqliteTemplateSource::new(pool));

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let work_available = Arc::new(tokio::sync::Notify::new());
        let retry_policy = RetryPolicy::new(config.retry.clone());

        let state_machine = Arc::new(CampaignStateMachine::new(
            Arc::clone(&campaign_repo),
            Arc::clone(&task_repo),
            Arc::clone(&clock),
        ));
        let resolver = Arc::new(DeliveryOutcomeResolver::new(
            Arc::clone(&task_repo),
            Arc::clone(&state_machine),
            retry_policy.clone(),
            Arc::clone(&clock),
            Arc::clone(&work_available),
        ));
        let service = Arc::new(CampaignDispatchService::new(
            Arc::clone(&campaign_repo),
            Arc::clone(&task_repo),
            Arc::clone(&response_repo),
            audience,
            templates,
            Arc::clone(&state_machine),
            Arc::clone(&resolver),
            MessageRenderer::new(config.segmentation.clone()),
            Arc::clone(&clock),
            Arc::clone(&work_available),
        )
        .with_segment_price(config.vendor.price_per_segment));

        let gateway = build_gateway(&config.vendor).context("创建短信供应商客户端失败")?;
        let vendor_timeout = Duration::from_secs(config.vendor.request_timeout_seconds);
        let breaker = Arc::new(CircuitBreaker::with_config(
            gateway.name(),
            config.circuit_breaker.to_breaker_config(),
        ));
        let rate_limiter: Arc<dyn RateLimiter> =
            Arc::new(TokenBucket::from_config(&config.rate_limit, Arc::clone(&clock)));

        let worker_ctx = Arc::new(WorkerContext {
            campaign_repo: Arc::clone(&campaign_repo),
            task_repo: Arc::clone(&task_repo),
            response_repo: Arc::clone(&response_repo),
            gateway: Arc::new(VendorGatewayClient::new(
                Arc::clone(&gateway),
                breaker,
                vendor_timeout,
            )),
            rate_limiter,
            retry_policy,
            state_machine: Arc::clone(&state_machine),
            clock: Arc::clone(&clock),
            work_available,
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
            circuit_open_backoff: Duration::from_millis(config.worker.circuit_open_backoff_ms),
        });
        let worker_pool = DeliveryWorkerPool::new(worker_ctx, config.worker.clone());

        let reconciliation = Arc::new(ReconciliationService::new(
            Arc::clone(&campaign_repo),
            task_repo,
            response_repo,
            gateway,
            resolver,
            state_machine,
            config.reconciliation.clone(),
            vendor_timeout,
            Arc::clone(&clock),
        ));
        let scanner = Arc::new(ScheduledCampaignScanner::new(
            campaign_repo,
            Arc::clone(&service),
            clock,
            Duration::from_secs(config.reconciliation.schedule_scan_interval_seconds),
        ));

        Ok(Self {
            config,
            mode,
            database,
            service,
            worker_pool,
            reconciliation,
            scanner,
            metrics,
        })
    }

    /// 运行直到收到关闭信号，返回前等待所有后台任务退出
    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        if self.mode.runs_workers() {
            if self.config.worker.enabled {
                handles.extend(self.worker_pool.start(shutdown.sender()));
            } else {
                info!("投递 worker 已在配置中禁用");
            }

            if self.config.reconciliation.enabled {
                let reconciliation = Arc::clone(&self.reconciliation);
                handles.push(tokio::spawn(reconciliation.run(shutdown.subscribe())));
            }

            let scanner = Arc::clone(&self.scanner);
            handles.push(tokio::spawn(scanner.run(shutdown.subscribe())));
        }

        let served = if self.mode.runs_api() && self.config.api.enabled {
            self.run_api(shutdown.clone()).await
        } else {
            let mut shutdown_rx = shutdown.subscribe();
            let _ = shutdown_rx.recv().await;
            Ok(())
        };

        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务退出异常: {e}");
            }
        }

        self.database.close().await;
        info!("应用程序已停止");
        served
    }

    async fn run_api(&self, shutdown: ShutdownManager) -> Result<()> {
        let state = AppState {
            service: Arc::clone(&self.service),
            metrics: self.metrics.clone(),
        };
        let app = create_app(state, &self.config.api);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器监听地址: {}", self.config.api.bind_address);

        let mut shutdown_rx = shutdown.subscribe();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败");

        // 监听失败时也要让后台任务退出
        if served.is_err() {
            shutdown.shutdown();
        }
        served
    }
}
