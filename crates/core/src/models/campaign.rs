use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::impl_sqlite_text_enum;

/// 营销活动
///
/// 由CRUD层创建，投递核心只通过状态机迁移修改它。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    /// 内联短信正文，未指定模板时使用
    pub body: Option<String>,
    /// 模板ID，存在时优先于内联正文
    pub template_id: Option<i64>,
    pub group_id: i64,
    pub sender_id: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
    /// 当前发送批次的收件人快照
    pub snapshot_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(owner_id: i64, name: &str, group_id: i64, sender_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由存储层生成
            owner_id,
            name: name.to_string(),
            body: None,
            template_id: None,
            group_id,
            sender_id: sender_id.to_string(),
            scheduled_at: None,
            status: CampaignStatus::Draft,
            snapshot_id: None,
            started_at: None,
            completed_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub fn with_template(mut self, template_id: i64) -> Self {
        self.template_id = Some(template_id);
        self
    }

    /// 内容字段是否仍可编辑
    pub fn is_editable(&self) -> bool {
        self.status.accepts_content_edits()
    }
}

/// 活动内容的可编辑字段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignContentUpdate {
    pub name: Option<String>,
    pub body: Option<String>,
    pub template_id: Option<i64>,
    pub group_id: Option<i64>,
    pub sender_id: Option<String>,
}

/// 活动级状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    CompletedWithFailures,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::CompletedWithFailures => "completed_with_failures",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed
                | CampaignStatus::CompletedWithFailures
                | CampaignStatus::Failed
                | CampaignStatus::Cancelled
        )
    }

    /// 进入 sending 之后活动内容冻结
    pub fn accepts_content_edits(&self) -> bool {
        matches!(self, CampaignStatus::Draft | CampaignStatus::Scheduled)
    }

    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Scheduled, Draft)
                | (Draft | Scheduled, Sending)
                | (Draft | Scheduled, Failed)
                | (Draft | Scheduled, Cancelled)
                | (Sending, Completed)
                | (Sending, CompletedWithFailures)
                | (Sending, Failed)
                | (Sending, Cancelled)
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "scheduled" => Ok(CampaignStatus::Scheduled),
            "sending" => Ok(CampaignStatus::Sending),
            "completed" => Ok(CampaignStatus::Completed),
            "completed_with_failures" => Ok(CampaignStatus::CompletedWithFailures),
            "failed" => Ok(CampaignStatus::Failed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            _ => Err(format!("Invalid campaign status: {s}")),
        }
    }
}

impl_sqlite_text_enum!(CampaignStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_campaign_transitions() {
        use CampaignStatus::*;
        assert!(Draft.can_transition_to(Sending));
        assert!(Scheduled.can_transition_to(Sending));
        assert!(Sending.can_transition_to(CompletedWithFailures));
        assert!(!Sending.can_transition_to(Sending));
        assert!(!Completed.can_transition_to(Sending));
        assert!(!Failed.can_transition_to(Draft));
    }

    #[test]
    fn test_content_frozen_after_sending() {
        let mut campaign = Campaign::new(1, "spring sale", 3, "SMSAPP").with_body("hi {name}");
        assert!(campaign.is_editable());
        campaign.status = CampaignStatus::Sending;
        assert!(!campaign.is_editable());
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::CompletedWithFailures,
            CampaignStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<CampaignStatus>().unwrap(), status);
        }
        assert!("active".parse::<CampaignStatus>().is_err());
    }
}
