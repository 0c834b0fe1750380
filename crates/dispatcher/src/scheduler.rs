use std::sync::Arc;
use std::time::Duration;

use sms_core::traits::CampaignRepository;
use sms_core::{Clock, DispatchError, DispatchResult};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::service::CampaignDispatchService;

/// 扫描计划时间已到的活动并开始发送
pub struct ScheduledCampaignScanner {
    campaign_repo: Arc<dyn CampaignRepository>,
    service: Arc<CampaignDispatchService>,
    clock: Arc<dyn Clock>,
    scan_interval: Duration,
}

impl ScheduledCampaignScanner {
    pub fn new(
        campaign_repo: Arc<dyn CampaignRepository>,
        service: Arc<CampaignDispatchService>,
        clock: Arc<dyn Clock>,
        scan_interval: Duration,
    ) -> Self {
        Self {
            campaign_repo,
            service,
            clock,
            scan_interval,
        }
    }

    /// 返回本次开始发送的活动数
    pub async fn scan_once(&self) -> DispatchResult<usize> {
        let due = self
            .campaign_repo
            .find_due_scheduled(self.clock.now())
            .await?;

        let mut started = 0;
        for campaign in due {
            match self.service.send_campaign(campaign.id).await {
                Ok(accepted) => {
                    info!(
                        campaign_id = campaign.id,
                        tasks = accepted.task_count,
                        "计划发送的营销活动已开始"
                    );
                    started += 1;
                }
                // 其他实例已经开始发送
                Err(DispatchError::InvalidState { .. }) => {}
                Err(e) => warn!(campaign_id = campaign.id, error = %e, "计划发送失败"),
            }
        }
        Ok(started)
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.scan_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.scan_once().await {
                        error!(error = %e, "扫描计划发送的营销活动失败");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("计划发送扫描器收到关闭信号");
                    break;
                }
            }
        }
    }
}
