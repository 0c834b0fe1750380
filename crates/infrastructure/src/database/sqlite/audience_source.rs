use std::collections::BTreeMap;

use async_trait::async_trait;
use sms_core::models::Contact;
use sms_core::traits::{AudienceSource, TemplateSource};
use sms_core::DispatchResult;
use sqlx::{Row, SqlitePool};
use tracing::warn;

/// 从 CRUD 层的 `contacts` 表读取联系人组
pub struct SqliteAudienceSource {
    pool: SqlitePool,
}

impl SqliteAudienceSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// 合并字段存为 JSON 对象，非字符串值按其 JSON 文本使用
fn parse_fields(contact_id: i64, raw: &str) -> BTreeMap<String, String> {
    match serde_json::from_str::<BTreeMap<String, serde_json::Value>>(raw) {
        Ok(values) => values
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        Err(e) => {
            warn!(contact_id, error = %e, "联系人合并字段不是合法的JSON对象，已忽略");
            BTreeMap::new()
        }
    }
}

#[async_trait]
impl AudienceSource for SqliteAudienceSource {
    async fn group_members(&self, group_id: i64) -> DispatchResult<Vec<Contact>> {
        let rows = sqlx::query(
            "SELECT id, name, phone, group_id, opted_out, fields FROM contacts \
             WHERE group_id = ? ORDER BY id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                let fields: String = row.try_get("fields")?;
                Ok(Contact {
                    id,
                    name: row.try_get("name")?,
                    phone: row.try_get("phone")?,
                    group_id: row.try_get("group_id")?,
                    opted_out: row.try_get("opted_out")?,
                    fields: parse_fields(id, &fields),
                })
            })
            .collect()
    }
}

/// 从 CRUD 层的 `sms_templates` 表读取模板
pub struct SqliteTemplateSource {
    pool: SqlitePool,
}

impl SqliteTemplateSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateSource for SqliteTemplateSource {
    async fn template_body(&self, template_id: i64) -> DispatchResult<Option<String>> {
        let content = sqlx::query_scalar("SELECT content FROM sms_templates WHERE id = ?")
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        let fields = parse_fields(1, r#"{"code": "SAVE10", "points": 120, "note": null}"#);
        assert_eq!(fields.get("code").map(String::as_str), Some("SAVE10"));
        assert_eq!(fields.get("points").map(String::as_str), Some("120"));
        assert!(!fields.contains_key("note"));

        assert!(parse_fields(2, "not json").is_empty());
    }
}
