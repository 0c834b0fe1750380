use sms_core::models::{Contact, MessageEncoding};
use sms_domain::{concat_reference, MessageRenderer, MessageTemplate, RecipientResolver};

fn group() -> Vec<Contact> {
    vec![
        Contact::new(1, "Ana", "+351 912 345 678", 10).with_field("coupon", "A1"),
        Contact::new(2, "Bruno", "+351-912-345-678", 10),
        Contact::new(3, "Chen", "555 010 9999", 10).with_field("coupon", "C3"),
        Contact::new(4, "Dara", "not a number", 10),
        Contact::new(5, "Eli", "5550108888", 10).opted_out(),
        Contact::new(6, "Zoe", "+44 7700 900123", 10),
    ]
}

#[test]
fn test_one_message_per_deduplicated_valid_recipient() {
    let audience = RecipientResolver::resolve(&group());

    assert_eq!(audience.recipients.len(), 3);
    assert_eq!(audience.duplicate_count, 1);
    assert_eq!(audience.invalid_count, 1);
    assert_eq!(audience.opted_out_count, 1);

    let template = MessageTemplate::parse("{name}, your code is {coupon}");
    let renderer = MessageRenderer::default();
    let messages = audience
        .recipients
        .iter()
        .map(|r| renderer.render(&template, r, concat_reference(99, r.contact_id)))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    assert_eq!(messages.len(), audience.recipients.len());
    assert_eq!(messages[0].text, "Ana, your code is A1");
    assert_eq!(messages[2].text, "Zoe, your code is ");
    assert_eq!(messages[2].missing_fields, vec!["coupon".to_string()]);
    assert_eq!(messages[2].encoding, MessageEncoding::Gsm7);
}

#[test]
fn test_non_gsm_name_switches_to_ucs2() {
    let contacts = vec![Contact::new(1, "Дарья", "5551234567", 1)];
    let audience = RecipientResolver::resolve(&contacts);
    let template = MessageTemplate::parse("Hello {name}");

    let message = MessageRenderer::default()
        .render(&template, &audience.recipients[0], 7)
        .unwrap();

    assert_eq!(message.encoding, MessageEncoding::Ucs2);
}

#[test]
fn test_rendered_message_round_trips_through_json() {
    let contacts = vec![Contact::new(1, "Ana", "5551234567", 1)];
    let audience = RecipientResolver::resolve(&contacts);
    let template = MessageTemplate::parse(&"long text ".repeat(40));
    let message = MessageRenderer::default()
        .render(&template, &audience.recipients[0], 3)
        .unwrap();

    let json = serde_json::to_string(&message).unwrap();
    let back: sms_core::models::RenderedMessage = serde_json::from_str(&json).unwrap();

    assert_eq!(back, message);
    assert!(back.is_multipart());
}
