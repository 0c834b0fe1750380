use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sms_core::models::{
    Campaign, CampaignContentUpdate, CampaignStatus, DeliveryTask, RecipientSnapshot,
};
use sms_core::traits::{CampaignRepository, StartedSend};
use sms_core::{DispatchError, DispatchResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, instrument};

use super::delivery_task_repository::SqliteDeliveryTaskRepository;
use super::placeholders;

const CAMPAIGN_COLUMNS: &str = "id, owner_id, name, body, template_id, group_id, sender_id, \
    scheduled_at, status, snapshot_id, started_at, completed_at, last_error, created_at, updated_at";

pub struct SqliteCampaignRepository {
    pool: SqlitePool,
}

impl SqliteCampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_campaign(row: &SqliteRow) -> DispatchResult<Campaign> {
        Ok(Campaign {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            name: row.try_get("name")?,
            body: row.try_get("body")?,
            template_id: row.try_get("template_id")?,
            group_id: row.try_get("group_id")?,
            sender_id: row.try_get("sender_id")?,
            scheduled_at: row.try_get("scheduled_at")?,
            status: row.try_get("status")?,
            snapshot_id: row.try_get("snapshot_id")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_snapshot(row: &SqliteRow) -> DispatchResult<RecipientSnapshot> {
        let recipients: String = row.try_get("recipients")?;
        let invalid_count: i64 = row.try_get("invalid_count")?;
        let duplicate_count: i64 = row.try_get("duplicate_count")?;
        let opted_out_count: i64 = row.try_get("opted_out_count")?;

        Ok(RecipientSnapshot {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            recipients: serde_json::from_str(&recipients)?,
            invalid_count: invalid_count as usize,
            duplicate_count: duplicate_count as usize,
            opted_out_count: opted_out_count as usize,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl CampaignRepository for SqliteCampaignRepository {
    #[instrument(skip(self, campaign), fields(name = %campaign.name))]
    async fn create(&self, campaign: &Campaign) -> DispatchResult<Campaign> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO campaigns (owner_id, name, body, template_id, group_id, sender_id,
                                   scheduled_at, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        ))
        .bind(campaign.owner_id)
        .bind(&campaign.name)
        .bind(&campaign.body)
        .bind(campaign.template_id)
        .bind(campaign.group_id)
        .bind(&campaign.sender_id)
        .bind(campaign.scheduled_at)
        .bind(campaign.status)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .fetch_one(&self.pool)
        .await?;

        let created = Self::row_to_campaign(&row)?;
        debug!(campaign_id = created.id, "创建营销活动成功");
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> DispatchResult<Option<Campaign>> {
        let row = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_campaign).transpose()
    }

    async fn update_content(
        &self,
        id: i64,
        update: &CampaignContentUpdate,
        now: DateTime<Utc>,
    ) -> DispatchResult<Campaign> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE campaigns
            SET name = COALESCE(?, name),
                body = COALESCE(?, body),
                template_id = COALESCE(?, template_id),
                group_id = COALESCE(?, group_id),
                sender_id = COALESCE(?, sender_id),
                updated_at = ?
            WHERE id = ? AND status IN ('draft', 'scheduled')
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        ))
        .bind(&update.name)
        .bind(&update.body)
        .bind(update.template_id)
        .bind(update.group_id)
        .bind(&update.sender_id)
        .bind(now)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_campaign(&row),
            None => match self.get_by_id(id).await? {
                Some(campaign) => Err(DispatchError::invalid_state(
                    id,
                    campaign.status,
                    "update_content",
                )),
                None => Err(DispatchError::CampaignNotFound { id }),
            },
        }
    }

    async fn transition_status(
        &self,
        id: i64,
        expected: &[CampaignStatus],
        next: CampaignStatus,
        last_error: Option<&str>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<Campaign>> {
        let sql = format!(
            r#"
            UPDATE campaigns
            SET status = ?,
                last_error = COALESCE(?, last_error),
                completed_at = CASE WHEN ? THEN ? ELSE completed_at END,
                updated_at = ?
            WHERE id = ? AND status IN ({})
            RETURNING {CAMPAIGN_COLUMNS}
            "#,
            placeholders(expected.len())
        );

        let mut query = sqlx::query(&sql)
            .bind(next)
            .bind(last_error)
            .bind(next.is_terminal())
            .bind(now)
            .bind(now)
            .bind(id);
        for status in expected {
            query = query.bind(*status);
        }

        let row = query.fetch_optional(&self.pool).await?;
        let campaign = row.as_ref().map(Self::row_to_campaign).transpose()?;
        if campaign.is_some() {
            info!(campaign_id = id, status = %next, "营销活动状态变更");
        }
        Ok(campaign)
    }

    async fn schedule(
        &self,
        id: i64,
        expected: &[CampaignStatus],
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<Campaign>> {
        let sql = format!(
            r#"
            UPDATE campaigns
            SET status = 'scheduled', scheduled_at = ?, updated_at = ?
            WHERE id = ? AND status IN ({})
            RETURNING {CAMPAIGN_COLUMNS}
            "#,
            placeholders(expected.len())
        );

        let mut query = sqlx::query(&sql).bind(scheduled_at).bind(now).bind(id);
        for status in expected {
            query = query.bind(*status);
        }

        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_campaign).transpose()
    }

    #[instrument(skip(self, snapshot, tasks), fields(task_count = tasks.len()))]
    async fn start_send(
        &self,
        campaign_id: i64,
        expected: &[CampaignStatus],
        snapshot: &RecipientSnapshot,
        tasks: &[DeliveryTask],
        now: DateTime<Utc>,
    ) -> DispatchResult<Option<StartedSend>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE campaigns
            SET status = 'sending', started_at = ?, updated_at = ?
            WHERE id = ? AND status IN ({})
            RETURNING id
            "#,
            placeholders(expected.len())
        );
        let mut query = sqlx::query(&sql).bind(now).bind(now).bind(campaign_id);
        for status in expected {
            query = query.bind(*status);
        }
        if query.fetch_optional(&mut *tx).await?.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let snapshot_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO recipient_snapshots (campaign_id, recipients, invalid_count,
                                             duplicate_count, opted_out_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(campaign_id)
        .bind(serde_json::to_string(&snapshot.recipients)?)
        .bind(snapshot.invalid_count as i64)
        .bind(snapshot.duplicate_count as i64)
        .bind(snapshot.opted_out_count as i64)
        .bind(snapshot.created_at)
        .fetch_one(&mut *tx)
        .await?;

        for task in tasks {
            SqliteDeliveryTaskRepository::insert_task(&mut *tx, task, snapshot_id).await?;
        }

        let row = sqlx::query(&format!(
            "UPDATE campaigns SET snapshot_id = ? WHERE id = ? RETURNING {CAMPAIGN_COLUMNS}"
        ))
        .bind(snapshot_id)
        .bind(campaign_id)
        .fetch_one(&mut *tx)
        .await?;
        let campaign = Self::row_to_campaign(&row)?;

        tx.commit().await?;

        info!(
            campaign_id,
            snapshot_id,
            task_count = tasks.len(),
            "营销活动开始发送"
        );

        Ok(Some(StartedSend {
            campaign,
            snapshot_id,
            task_count: tasks.len(),
        }))
    }

    async fn get_snapshot(&self, snapshot_id: i64) -> DispatchResult<Option<RecipientSnapshot>> {
        let row = sqlx::query(
            "SELECT id, campaign_id, recipients, invalid_count, duplicate_count, opted_out_count, created_at \
             FROM recipient_snapshots WHERE id = ?",
        )
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_snapshot).transpose()
    }

    async fn find_due_scheduled(&self, now: DateTime<Utc>) -> DispatchResult<Vec<Campaign>> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns \
             WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ? \
             ORDER BY scheduled_at, id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_campaign).collect()
    }

    async fn find_by_status(&self, status: CampaignStatus) -> DispatchResult<Vec<Campaign>> {
        let rows = sqlx::query(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = ? ORDER BY id"
        ))
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_campaign).collect()
    }
}
