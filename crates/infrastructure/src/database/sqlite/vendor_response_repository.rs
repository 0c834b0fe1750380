use async_trait::async_trait;
use sms_core::models::VendorResponseRecord;
use sms_core::traits::VendorResponseRepository;
use sms_core::DispatchResult;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

pub struct SqliteVendorResponseRepository {
    pool: SqlitePool,
}

impl SqliteVendorResponseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &SqliteRow) -> DispatchResult<VendorResponseRecord> {
        let payload: String = row.try_get("payload")?;
        Ok(VendorResponseRecord {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            vendor_message_id: row.try_get("vendor_message_id")?,
            kind: row.try_get("kind")?,
            status: row.try_get("status")?,
            error_code: row.try_get("error_code")?,
            payload: serde_json::from_str(&payload)?,
            received_at: row.try_get("received_at")?,
        })
    }
}

#[async_trait]
impl VendorResponseRepository for SqliteVendorResponseRepository {
    async fn record(&self, record: &VendorResponseRecord) -> DispatchResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO vendor_responses (task_id, vendor_message_id, kind, status, error_code,
                                          payload, received_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(record.task_id)
        .bind(&record.vendor_message_id)
        .bind(record.kind)
        .bind(&record.status)
        .bind(&record.error_code)
        .bind(serde_json::to_string(&record.payload)?)
        .bind(record.received_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_by_task(&self, task_id: i64) -> DispatchResult<Vec<VendorResponseRecord>> {
        let rows = sqlx::query(
            "SELECT id, task_id, vendor_message_id, kind, status, error_code, payload, received_at \
             FROM vendor_responses WHERE task_id = ? ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
