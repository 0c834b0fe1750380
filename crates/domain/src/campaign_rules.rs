use sms_core::models::{CampaignStatus, TaskCounts};

/// 活动完成判定
pub struct CampaignOutcomeService;

impl CampaignOutcomeService {
    /// 所有任务都已结束时给出活动的最终状态，否则返回 `None`
    ///
    /// 没有失败为 completed，部分失败为 completed_with_failures，
    /// 未被取消的任务全部失败为 failed。
    pub fn evaluate(counts: &TaskCounts) -> Option<CampaignStatus> {
        if counts.total() == 0 || counts.active() > 0 {
            return None;
        }

        let attempted = counts.total() - counts.cancelled;
        let status = if attempted == 0 {
            CampaignStatus::Cancelled
        } else if counts.failed == 0 {
            CampaignStatus::Completed
        } else if counts.failed < attempted {
            CampaignStatus::CompletedWithFailures
        } else {
            CampaignStatus::Failed
        };

        Some(status)
    }
}
