use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    database::DatabaseConfig,
    delivery::{CircuitBreakerSettings, RateLimitConfig, RetryConfig, WorkerConfig},
    reconciliation::ReconciliationConfig,
    vendor::{SegmentationConfig, VendorConfig},
};

/// 环境变量前缀，例如 `SMS_DISPATCH__WORKER__WORKERS=8`
pub const ENV_PREFIX: &str = "SMS_DISPATCH";

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/sms-dispatch.toml",
    "sms-dispatch.toml",
    "/etc/sms-dispatch/config.toml",
];

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub vendor: VendorConfig,
    pub rate_limit: RateLimitConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub reconciliation: ReconciliationConfig,
    pub segmentation: SegmentationConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 内置默认值
    /// 2. 配置文件（TOML）
    /// 3. 环境变量覆盖（前缀 SMS_DISPATCH__）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(*path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 把配置序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.vendor.validate().context("供应商配置验证失败")?;
        self.rate_limit.validate().context("限流配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.retry.validate().context("重试配置验证失败")?;
        self.circuit_breaker
            .validate()
            .context("熔断器配置验证失败")?;
        self.reconciliation
            .validate()
            .context("对账配置验证失败")?;
        self.segmentation.validate().context("分段配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}
