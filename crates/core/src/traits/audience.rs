use async_trait::async_trait;

use crate::errors::DispatchResult;
use crate::models::Contact;

/// 联系人组成员来源，由CRUD层提供
#[async_trait]
pub trait AudienceSource: Send + Sync {
    /// 按联系人ID升序返回组内所有成员，包括已退订的
    async fn group_members(&self, group_id: i64) -> DispatchResult<Vec<Contact>>;
}

/// 短信模板来源
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn template_body(&self, template_id: i64) -> DispatchResult<Option<String>>;
}
