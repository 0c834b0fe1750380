use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use sms_core::models::{Contact, Recipient};

use crate::phone::{normalize_phone, phone_key};

/// 收件人解析结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedAudience {
    pub recipients: Vec<Recipient>,
    pub invalid_count: usize,
    pub duplicate_count: usize,
    pub opted_out_count: usize,
}

impl ResolvedAudience {
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

/// 收件人解析器
///
/// 把联系人组转换为去重后的可达收件人列表，无效号码只计数。
pub struct RecipientResolver;

impl RecipientResolver {
    /// 解析联系人组
    ///
    /// 按联系人ID升序处理，同一号码只保留第一个联系人及其号码写法。
    /// 号码按纯数字比较，有没有 `+` 前缀都算同一个号码。
    /// 退订对号码生效：任一联系人退订后，同号码的其他联系人也不会收到。
    pub fn resolve(contacts: &[Contact]) -> ResolvedAudience {
        let mut ordered: Vec<&Contact> = contacts.iter().collect();
        ordered.sort_by_key(|c| c.id);

        let mut normalized: Vec<(&Contact, Option<String>)> = ordered
            .into_iter()
            .map(|c| (c, normalize_phone(&c.phone)))
            .collect();

        let opted_out_phones: HashSet<String> = normalized
            .iter()
            .filter(|(c, _)| c.opted_out)
            .filter_map(|(_, phone)| phone.as_deref().map(phone_key))
            .collect();

        let mut audience = ResolvedAudience::default();
        let mut seen = HashSet::new();

        for (contact, phone) in normalized.drain(..) {
            if contact.opted_out {
                audience.opted_out_count += 1;
                continue;
            }

            let Some(phone) = phone else {
                audience.invalid_count += 1;
                continue;
            };

            let key = phone_key(&phone);
            if opted_out_phones.contains(&key) {
                audience.opted_out_count += 1;
                continue;
            }

            if !seen.insert(key) {
                audience.duplicate_count += 1;
                continue;
            }

            audience.recipients.push(Recipient {
                contact_id: contact.id,
                name: contact.name.clone(),
                phone,
                fields: contact.fields.clone(),
            });
        }

        debug!(
            recipients = audience.recipients.len(),
            invalid = audience.invalid_count,
            duplicates = audience.duplicate_count,
            opted_out = audience.opted_out_count,
            "收件人解析完成"
        );

        audience
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_keeps_lowest_contact_id() {
        let contacts = vec![
            Contact::new(7, "Later", "+1 555 123 4567", 1),
            Contact::new(3, "First", "+1-555-123-4567", 1),
            Contact::new(5, "Other", "+15559876543", 1),
        ];

        let audience = RecipientResolver::resolve(&contacts);

        assert_eq!(audience.recipients.len(), 2);
        assert_eq!(audience.duplicate_count, 1);
        assert_eq!(audience.recipients[0].contact_id, 3);
        assert_eq!(audience.recipients[0].name, "First");
        assert_eq!(audience.recipients[1].contact_id, 5);
    }

    #[test]
    fn test_leading_plus_does_not_split_duplicates() {
        let contacts = vec![
            Contact::new(1, "Plus", "+15551234567", 1),
            Contact::new(2, "Bare", "15551234567", 1),
        ];

        let audience = RecipientResolver::resolve(&contacts);

        assert_eq!(audience.recipients.len(), 1);
        assert_eq!(audience.duplicate_count, 1);
        assert_eq!(audience.recipients[0].contact_id, 1);
        assert_eq!(audience.recipients[0].phone, "+15551234567");
    }

    #[test]
    fn test_opt_out_matches_without_plus() {
        let contacts = vec![
            Contact::new(1, "Bare", "15551234567", 1),
            Contact::new(2, "Plus", "+1 555 123 4567", 1).opted_out(),
        ];

        let audience = RecipientResolver::resolve(&contacts);

        assert!(audience.is_empty());
        assert_eq!(audience.opted_out_count, 2);
    }

    #[test]
    fn test_invalid_and_opted_out_are_counted() {
        let contacts = vec![
            Contact::new(1, "Ok", "5551234567", 1),
            Contact::new(2, "Short", "12345", 1),
            Contact::new(3, "Zeros", "0000000000", 1),
            Contact::new(4, "Gone", "5559990000", 1).opted_out(),
        ];

        let audience = RecipientResolver::resolve(&contacts);

        assert_eq!(audience.recipients.len(), 1);
        assert_eq!(audience.invalid_count, 2);
        assert_eq!(audience.opted_out_count, 1);
        assert_eq!(audience.duplicate_count, 0);
    }

    #[test]
    fn test_opt_out_applies_to_the_number() {
        let contacts = vec![
            Contact::new(1, "Shared", "5551234567", 1),
            Contact::new(2, "Shared again", "(555) 123-4567", 1).opted_out(),
        ];

        let audience = RecipientResolver::resolve(&contacts);

        assert!(audience.is_empty());
        assert_eq!(audience.opted_out_count, 2);
    }

    #[test]
    fn test_merge_fields_are_carried() {
        let contacts = vec![Contact::new(1, "Ada", "5551234567", 1).with_field("code", "SAVE10")];

        let audience = RecipientResolver::resolve(&contacts);

        assert_eq!(
            audience.recipients[0].fields.get("code").map(String::as_str),
            Some("SAVE10")
        );
    }
}
