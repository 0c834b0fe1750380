pub mod schema;
pub mod sqlite;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sms_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的数据库URL: {}", config.url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));

        // 内存数据库的每个连接都是独立的库，只能保持唯一一个常驻连接
        let in_memory = config.url.contains(":memory:");
        let (pool_options, max_connections) = if in_memory {
            let options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
            (options, 1)
        } else {
            let options = pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections.min(config.max_connections))
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                .max_lifetime(Duration::from_secs(1800));
            (options, config.max_connections)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("连接数据库失败")?;

        info!(url = %config.url, max_connections, "数据库连接池已创建");

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        schema::bootstrap(&self.pool).await
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
