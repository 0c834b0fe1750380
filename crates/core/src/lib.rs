pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use circuit_breaker::*;
pub use clock::*;
pub use config::AppConfig;
pub use errors::*;
