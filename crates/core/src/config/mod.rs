//! 配置管理
//!
//! `AppConfig` 由默认值、TOML 配置文件和 `SMS_DISPATCH__` 前缀的环境变量依次合并而成，
//! 加载后逐节校验。各节的默认值即为生产推荐值。

pub mod models;

#[cfg(test)]
mod tests;

pub use models::*;
