pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod delivery;
pub mod reconciliation;
pub mod vendor;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use delivery::{CircuitBreakerSettings, RateLimitConfig, RetryConfig, WorkerConfig};
pub use reconciliation::ReconciliationConfig;
pub use vendor::{SegmentationConfig, VendorConfig, VendorKind};
