pub mod audience_source;
pub mod campaign_repository;
pub mod delivery_task_repository;
pub mod vendor_response_repository;

pub use audience_source::{SqliteAudienceSource, SqliteTemplateSource};
pub use campaign_repository::SqliteCampaignRepository;
pub use delivery_task_repository::SqliteDeliveryTaskRepository;
pub use vendor_response_repository::SqliteVendorResponseRepository;

/// 为 `IN (...)` 生成 `?` 占位符列表
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }
}
