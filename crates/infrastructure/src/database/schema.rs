use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

/// 投递核心自有的表和索引，外加 CRUD 层的联系人和模板表
///
/// 联系人和模板表通常已由 CRUD 层创建，这里只在缺失时补建，方便独立部署和测试。
const STATEMENTS: &[(&str, &str)] = &[
    (
        "创建营销活动表失败",
        r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            body TEXT,
            template_id INTEGER,
            group_id INTEGER NOT NULL,
            sender_id TEXT NOT NULL,
            scheduled_at TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            snapshot_id INTEGER,
            started_at TEXT,
            completed_at TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "创建收件人快照表失败",
        r#"
        CREATE TABLE IF NOT EXISTS recipient_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id INTEGER NOT NULL,
            recipients TEXT NOT NULL,
            invalid_count INTEGER NOT NULL DEFAULT 0,
            duplicate_count INTEGER NOT NULL DEFAULT 0,
            opted_out_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (campaign_id) REFERENCES campaigns (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "创建投递任务表失败",
        r#"
        CREATE TABLE IF NOT EXISTS delivery_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id INTEGER NOT NULL,
            snapshot_id INTEGER NOT NULL,
            contact_id INTEGER NOT NULL,
            phone TEXT NOT NULL,
            client_reference TEXT NOT NULL UNIQUE,
            message TEXT NOT NULL,
            segment_count INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            reconcile_attempts INTEGER NOT NULL DEFAULT 0,
            vendor_message_id TEXT,
            last_error TEXT,
            next_attempt_at TEXT NOT NULL,
            claimed_by TEXT,
            claimed_at TEXT,
            sent_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (campaign_id) REFERENCES campaigns (id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "创建投递任务唯一索引失败",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS ux_delivery_tasks_active_contact
        ON delivery_tasks (campaign_id, contact_id)
        WHERE status IN ('pending', 'in_flight', 'unconfirmed', 'retrying')
        "#,
    ),
    (
        "创建投递任务认领索引失败",
        "CREATE INDEX IF NOT EXISTS idx_delivery_tasks_claim ON delivery_tasks (status, next_attempt_at)",
    ),
    (
        "创建投递任务状态索引失败",
        "CREATE INDEX IF NOT EXISTS idx_delivery_tasks_stale ON delivery_tasks (status, updated_at)",
    ),
    (
        "创建投递任务活动索引失败",
        "CREATE INDEX IF NOT EXISTS idx_delivery_tasks_campaign ON delivery_tasks (campaign_id, status)",
    ),
    (
        "创建供应商消息ID索引失败",
        "CREATE INDEX IF NOT EXISTS idx_delivery_tasks_vendor_id ON delivery_tasks (vendor_message_id)",
    ),
    (
        "创建供应商响应表失败",
        r#"
        CREATE TABLE IF NOT EXISTS vendor_responses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER,
            vendor_message_id TEXT,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            error_code TEXT,
            payload TEXT NOT NULL DEFAULT 'null',
            received_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "创建供应商响应索引失败",
        "CREATE INDEX IF NOT EXISTS idx_vendor_responses_task ON vendor_responses (task_id)",
    ),
    (
        "创建联系人表失败",
        r#"
        CREATE TABLE IF NOT EXISTS contacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            phone TEXT NOT NULL,
            group_id INTEGER NOT NULL,
            opted_out INTEGER NOT NULL DEFAULT 0,
            fields TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    ),
    (
        "创建联系人组索引失败",
        "CREATE INDEX IF NOT EXISTS idx_contacts_group ON contacts (group_id)",
    ),
    (
        "创建短信模板表失败",
        r#"
        CREATE TABLE IF NOT EXISTS sms_templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL
        )
        "#,
    ),
];

/// 创建缺失的表和索引，可重复执行
pub async fn bootstrap(pool: &SqlitePool) -> Result<()> {
    info!("初始化SQLite数据库表结构");

    for (context, statement) in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context(*context)?;
    }

    Ok(())
}
