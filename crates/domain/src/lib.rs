pub mod campaign_rules;
pub mod phone;
pub mod recipients;
pub mod renderer;
pub mod segmenter;

pub use campaign_rules::*;
pub use phone::{normalize_phone, phone_key};
pub use recipients::*;
pub use renderer::*;
pub use segmenter::*;
