pub mod audience;
pub mod gateway;
pub mod rate_limiter;
pub mod repository;

pub use audience::*;
pub use gateway::*;
pub use rate_limiter::*;
pub use repository::*;
