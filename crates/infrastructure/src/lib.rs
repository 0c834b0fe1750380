pub mod database;
pub mod gateway;
pub mod in_memory;
pub mod rate_limiter;

pub use database::sqlite::{
    SqliteAudienceSource, SqliteCampaignRepository, SqliteDeliveryTaskRepository,
    SqliteTemplateSource, SqliteVendorResponseRepository,
};
pub use database::DatabaseManager;
pub use gateway::{build_gateway, HttpSmsGateway, MockSmsGateway};
pub use in_memory::InMemoryStore;
pub use rate_limiter::TokenBucket;
