use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// CRUD层维护的联系人，投递核心只读
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub group_id: i64,
    pub opted_out: bool,
    /// 自定义合并字段
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Contact {
    pub fn new(id: i64, name: &str, phone: &str, group_id: i64) -> Self {
        Self {
            id,
            name: name.to_string(),
            phone: phone.to_string(),
            group_id,
            opted_out: false,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    pub fn opted_out(mut self) -> Self {
        self.opted_out = true;
        self
    }
}

/// 快照中的收件人，号码已规范化
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub contact_id: i64,
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// 一次发送的收件人快照
///
/// 发送开始时生成，之后不再变化，联系人组的后续修改不影响进行中的发送。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientSnapshot {
    pub id: i64,
    pub campaign_id: i64,
    pub recipients: Vec<Recipient>,
    pub invalid_count: usize,
    pub duplicate_count: usize,
    pub opted_out_count: usize,
    pub created_at: DateTime<Utc>,
}

impl RecipientSnapshot {
    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}
