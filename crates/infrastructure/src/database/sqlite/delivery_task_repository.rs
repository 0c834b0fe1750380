use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sms_core::models::{DeliveryTask, RenderedMessage, TaskCounts, TaskStatus, TaskUpdate};
use sms_core::traits::DeliveryTaskRepository;
use sms_core::{DispatchError, DispatchResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, instrument};

use super::placeholders;

pub(crate) const TASK_COLUMNS: &str = "id, campaign_id, snapshot_id, contact_id, phone, \
    client_reference, message, status, attempt_count, reconcile_attempts, vendor_message_id, \
    last_error, next_attempt_at, claimed_by, claimed_at, sent_at, completed_at, created_at, updated_at";

pub struct SqliteDeliveryTaskRepository {
    pool: SqlitePool,
}

impl SqliteDeliveryTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn row_to_task(row: &SqliteRow) -> DispatchResult<DeliveryTask> {
        let message: String = row.try_get("message")?;
        let message: RenderedMessage = serde_json::from_str(&message)?;

        Ok(DeliveryTask {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            snapshot_id: row.try_get("snapshot_id")?,
            contact_id: row.try_get("contact_id")?,
            phone: row.try_get("phone")?,
            client_reference: row.try_get("client_reference")?,
            message,
            status: row.try_get("status")?,
            attempt_count: row.try_get("attempt_count")?,
            reconcile_attempts: row.try_get("reconcile_attempts")?,
            vendor_message_id: row.try_get("vendor_message_id")?,
            last_error: row.try_get("last_error")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            claimed_by: row.try_get("claimed_by")?,
            claimed_at: row.try_get("claimed_at")?,
            sent_at: row.try_get("sent_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// 在调用方的事务中写入任务，`snapshot_id` 以参数为准
    pub(crate) async fn insert_task(
        conn: &mut SqliteConnection,
        task: &DeliveryTask,
        snapshot_id: i64,
    ) -> DispatchResult<i64> {
        let message = serde_json::to_string(&task.message)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO delivery_tasks (campaign_id, snapshot_id, contact_id, phone, client_reference,
                                        message, segment_count, status, attempt_count, reconcile_attempts,
                                        last_error, next_attempt_at, completed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(task.campaign_id)
        .bind(snapshot_id)
        .bind(task.contact_id)
        .bind(&task.phone)
        .bind(&task.client_reference)
        .bind(message)
        .bind(task.segment_count() as i64)
        .bind(task.status)
        .bind(task.attempt_count)
        .bind(task.reconcile_attempts)
        .bind(&task.last_error)
        .bind(task.next_attempt_at)
        .bind(task.completed_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .fetch_one(&mut *conn)
        .await?;

        Ok(id)
    }
}

#[async_trait]
impl DeliveryTaskRepository for SqliteDeliveryTaskRepository {
    async fn get_by_id(&self, id: i64) -> DispatchResult<Option<DeliveryTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM delivery_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DispatchError::Database)?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn find_by_vendor_message_id(
        &self,
        vendor_message_id: &str,
    ) -> DispatchResult<Option<DeliveryTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM delivery_tasks WHERE vendor_message_id = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(vendor_message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn find_by_campaign(
        &self,
        campaign_id: i64,
        status: Option<TaskStatus>,
    ) -> DispatchResult<Vec<DeliveryTask>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM delivery_tasks WHERE campaign_id = ? AND status = ? ORDER BY id"
                ))
                .bind(campaign_id)
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM delivery_tasks WHERE campaign_id = ? ORDER BY id"
                ))
                .bind(campaign_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self), fields(worker_id = %worker_id))]
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<DeliveryTask>> {
        // 单条 UPDATE 完成选择和认领，SQLite 串行化写入保证同一任务只被认领一次
        let row = sqlx::query(&format!(
            r#"
            UPDATE delivery_tasks
            SET status = 'in_flight', claimed_by = ?, claimed_at = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM delivery_tasks
                WHERE status IN ('pending', 'retrying') AND next_attempt_at <= ?
                ORDER BY next_attempt_at, id
                LIMIT 1
            )
            AND status IN ('pending', 'retrying')
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let task = row.as_ref().map(Self::row_to_task).transpose()?;
        if let Some(task) = &task {
            debug!(task_id = task.id, campaign_id = task.campaign_id, "认领投递任务");
        }
        Ok(task)
    }

    async fn transition(
        &self,
        id: i64,
        expected: &[TaskStatus],
        update: &TaskUpdate,
    ) -> DispatchResult<Option<DeliveryTask>> {
        let sql = format!(
            r#"
            UPDATE delivery_tasks
            SET status = ?,
                updated_at = ?,
                attempt_count = attempt_count + ?,
                reconcile_attempts = reconcile_attempts + ?,
                vendor_message_id = COALESCE(?, vendor_message_id),
                last_error = COALESCE(?, last_error),
                next_attempt_at = COALESCE(?, next_attempt_at),
                sent_at = CASE WHEN ? AND sent_at IS NULL THEN ? ELSE sent_at END,
                completed_at = CASE WHEN ? THEN ? ELSE completed_at END
            WHERE id = ? AND status IN ({})
            RETURNING {TASK_COLUMNS}
            "#,
            placeholders(expected.len())
        );

        let mut query = sqlx::query(&sql)
            .bind(update.status)
            .bind(update.at)
            .bind(i32::from(update.count_attempt))
            .bind(i32::from(update.count_reconcile_attempt))
            .bind(&update.vendor_message_id)
            .bind(&update.last_error)
            .bind(update.next_attempt_at)
            .bind(update.sets_sent_at())
            .bind(update.at)
            .bind(update.sets_completed_at())
            .bind(update.at)
            .bind(id);
        for status in expected {
            query = query.bind(*status);
        }

        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn cancel_pending(&self, campaign_id: i64, now: DateTime<Utc>) -> DispatchResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_tasks
            SET status = 'cancelled', completed_at = ?, updated_at = ?
            WHERE campaign_id = ? AND status IN ('pending', 'retrying')
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_stale(
        &self,
        statuses: &[TaskStatus],
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<DeliveryTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM delivery_tasks \
             WHERE status IN ({}) AND updated_at <= ? ORDER BY updated_at, id LIMIT ?",
            placeholders(statuses.len())
        );

        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(*status);
        }
        let rows = query
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn find_awaiting_delivery(
        &self,
        sent_since: DateTime<Utc>,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> DispatchResult<Vec<DeliveryTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM delivery_tasks \
             WHERE status = 'sent' AND sent_at >= ? AND updated_at <= ? \
             ORDER BY updated_at, id LIMIT ?"
        );

        let rows = sqlx::query(&sql)
            .bind(sent_since)
            .bind(older_than)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn count_by_status(&self, campaign_id: i64) -> DispatchResult<TaskCounts> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS task_count, COALESCE(SUM(segment_count), 0) AS segments
            FROM delivery_tasks
            WHERE campaign_id = ?
            GROUP BY status
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = TaskCounts::default();
        for row in rows {
            let status: TaskStatus = row.try_get("status")?;
            let count: i64 = row.try_get("task_count")?;
            let segments: i64 = row.try_get("segments")?;
            counts.add(status, count as u64);
            counts.total_segments += segments as u64;
        }

        Ok(counts)
    }
}
