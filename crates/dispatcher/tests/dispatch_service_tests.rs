mod common;

use chrono::Duration;
use common::{Harness, GROUP};
use sms_core::models::{Campaign, CampaignContentUpdate, CampaignStatus, Contact, TaskStatus};
use sms_core::traits::CampaignRepository;
use sms_core::DispatchError;
use sms_dispatcher::{CallbackOutcome, ScheduledCampaignScanner};

#[tokio::test]
async fn test_send_creates_one_task_per_valid_unique_recipient() {
    let h = Harness::new();
    h.add_contacts(&[
        (1, "+1 555 000 0001"),
        (2, "+15550000002"),
        (3, "+1-555-000-0001"), // 与联系人1号码相同
        (4, "12345"),           // 无效号码
    ]);
    h.store
        .add_contact(Contact::new(5, "Eve", "+15550000005", GROUP).opted_out());
    let campaign = h.draft_campaign("Hi {name}").await;

    let accepted = h.service.send_campaign(campaign.id).await.unwrap();
    assert_eq!(accepted.task_count, 2);
    assert_eq!(accepted.invalid_count, 1);
    assert_eq!(accepted.duplicate_count, 1);
    assert_eq!(accepted.opted_out_count, 1);

    let tasks = h.service.list_campaign_tasks(campaign.id, None).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].message.text, "Hi contact-1");
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));

    let campaign = h.campaign(campaign.id).await;
    assert_eq!(campaign.status, CampaignStatus::Sending);
    assert_eq!(campaign.snapshot_id, Some(accepted.snapshot_id));
}

#[tokio::test]
async fn test_second_send_is_rejected_without_new_tasks() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001"), (2, "+15550000002")]);
    let campaign = h.draft_campaign("hello").await;

    h.service.send_campaign(campaign.id).await.unwrap();
    let err = h.service.send_campaign(campaign.id).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::InvalidState {
            status: CampaignStatus::Sending,
            ..
        }
    ));
    assert_eq!(h.store.all_tasks().len(), 2);
}

#[tokio::test]
async fn test_empty_audience_fails_campaign() {
    let h = Harness::new();
    h.add_contacts(&[(1, "not-a-phone")]);
    h.store
        .add_contact(Contact::new(2, "Bob", "+15550000002", GROUP).opted_out());
    let campaign = h.draft_campaign("hello").await;

    let err = h.service.send_campaign(campaign.id).await.unwrap_err();
    assert!(matches!(
        err,
        DispatchError::EmptyAudience {
            invalid_count: 1,
            opted_out_count: 1,
            ..
        }
    ));

    let campaign = h.campaign(campaign.id).await;
    assert_eq!(campaign.status, CampaignStatus::Failed);
    assert!(campaign.last_error.is_some());
    assert!(h.store.all_tasks().is_empty());
}

#[tokio::test]
async fn test_unknown_campaign_and_missing_template() {
    let h = Harness::new();
    let err = h.service.send_campaign(404).await.unwrap_err();
    assert!(matches!(err, DispatchError::CampaignNotFound { id: 404 }));

    h.add_contacts(&[(1, "+15550000001")]);
    let campaign = h
        .store
        .create(&Campaign::new(1, "tpl", GROUP, "ACME").with_template(9))
        .await
        .unwrap();
    let err = h.service.send_campaign(campaign.id).await.unwrap_err();
    assert!(matches!(err, DispatchError::TemplateNotFound { id: 9 }));

    h.store.add_template(9, "Code {code} for {name}");
    let accepted = h.service.send_campaign(campaign.id).await.unwrap();
    assert_eq!(accepted.task_count, 1);
    assert_eq!(accepted.warnings.len(), 1);
    assert!(accepted.warnings[0].contains("code"));
}

#[tokio::test]
async fn test_all_accepted_completes_campaign() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001"), (2, "+15550000002"), (3, "+15550000003")]);
    let campaign = h.draft_campaign("hello").await;
    h.service.send_campaign(campaign.id).await.unwrap();

    for i in 0..3 {
        let task = h.claim().await;
        h.accept(&task, &format!("SM{i}")).await;
    }

    let status = h.service.get_campaign_status(campaign.id).await.unwrap();
    assert_eq!(status.status, CampaignStatus::Completed);
    assert_eq!(status.sent_count, 3);
    assert_eq!(status.failed_count, 0);
    assert!(status.completed_at.is_some());
}

#[tokio::test]
async fn test_status_reports_estimated_cost() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001"), (2, "+15550000002")]);
    // 200 个 GSM-7 字符拆成两段
    let campaign = h.draft_campaign(&"a".repeat(200)).await;
    h.service.send_campaign(campaign.id).await.unwrap();

    let status = h.service.get_campaign_status(campaign.id).await.unwrap();
    assert_eq!(status.total_segments, 4);
    assert!((status.estimated_cost - 0.04).abs() < 1e-9);
}

#[tokio::test]
async fn test_one_terminal_reject_completes_with_failures() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001"), (2, "+15550000002"), (3, "+15550000003")]);
    let campaign = h.draft_campaign("hello").await;
    h.service.send_campaign(campaign.id).await.unwrap();

    let first = h.claim().await;
    h.reject(&first, "invalid destination").await;
    for i in 0..2 {
        let task = h.claim().await;
        h.accept(&task, &format!("SM{i}")).await;
    }

    let status = h.service.get_campaign_status(campaign.id).await.unwrap();
    assert_eq!(status.status, CampaignStatus::CompletedWithFailures);
    assert_eq!(status.failed_count, 1);
    assert_eq!(status.sent_count, 2);
}

#[tokio::test]
async fn test_cancel_after_one_of_three_started() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001"), (2, "+15550000002"), (3, "+15550000003")]);
    let campaign = h.draft_campaign("hello").await;
    h.service.send_campaign(campaign.id).await.unwrap();

    let in_flight = h.claim().await;
    let report = h.service.cancel_campaign(campaign.id).await.unwrap();
    assert_eq!(report.status, CampaignStatus::Cancelled);
    assert_eq!(report.cancelled_tasks, 2);
    assert_eq!(report.in_flight_tasks, 1);

    // 进行中的调用照常完成并记录结果
    h.accept(&in_flight, "SM1").await;

    let status = h.service.get_campaign_status(campaign.id).await.unwrap();
    assert_eq!(status.status, CampaignStatus::Cancelled);
    assert_eq!(status.sent_count, 1);
    assert_eq!(status.cancelled_count, 2);
    assert_eq!(status.total, 3);

    let err = h.service.cancel_campaign(campaign.id).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState { .. }));
}

#[tokio::test]
async fn test_cancel_draft_campaign() {
    let h = Harness::new();
    let campaign = h.draft_campaign("hello").await;
    let report = h.service.cancel_campaign(campaign.id).await.unwrap();
    assert_eq!(report.status, CampaignStatus::Cancelled);
    assert_eq!(report.cancelled_tasks, 0);
}

#[tokio::test]
async fn test_callback_replay_is_idempotent() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001")]);
    let campaign = h.draft_campaign("hello").await;
    h.service.send_campaign(campaign.id).await.unwrap();
    let task = h.claim().await;
    h.accept(&task, "SM-42").await;

    let payload = serde_json::json!({"sid": "SM-42", "status": "delivered"});
    let first = h
        .service
        .on_vendor_callback("SM-42", "delivered", None, payload.clone())
        .await
        .unwrap();
    let replay = h
        .service
        .on_vendor_callback("SM-42", "delivered", None, payload)
        .await
        .unwrap();
    assert_eq!(first, CallbackOutcome::Applied);
    assert_eq!(replay, CallbackOutcome::Ignored);

    let task = h.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Delivered);
    assert_eq!(task.attempt_count, 1);

    let status = h.service.get_campaign_status(campaign.id).await.unwrap();
    assert_eq!(status.delivered_count, 1);
    assert_eq!(status.sent_count, 1);

    let unknown = h
        .service
        .on_vendor_callback("SM-nope", "delivered", None, serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(unknown, CallbackOutcome::UnknownMessage);

    // 每条回执都有审计记录
    assert_eq!(h.store.all_responses().len(), 3);
}

#[tokio::test]
async fn test_late_failure_after_completion_updates_counts_only() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001"), (2, "+15550000002")]);
    let campaign = h.draft_campaign("hello").await;
    h.service.send_campaign(campaign.id).await.unwrap();
    for i in 0..2 {
        let task = h.claim().await;
        h.accept(&task, &format!("SM{i}")).await;
    }
    assert_eq!(h.campaign(campaign.id).await.status, CampaignStatus::Completed);

    let outcome = h
        .service
        .on_vendor_callback("SM0", "undelivered", Some("30003"), serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Applied);

    let status = h.service.get_campaign_status(campaign.id).await.unwrap();
    assert_eq!(status.status, CampaignStatus::Completed);
    assert_eq!(status.failed_count, 1);
}

#[tokio::test]
async fn test_unrecognised_callback_status_is_ignored() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001")]);
    let campaign = h.draft_campaign("hello").await;
    h.service.send_campaign(campaign.id).await.unwrap();
    let task = h.claim().await;
    h.accept(&task, "SM-1").await;

    let outcome = h
        .service
        .on_vendor_callback("SM-1", "read", None, serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(outcome, CallbackOutcome::Ignored);
    assert_eq!(h.task(task.id).await.status, TaskStatus::Sent);
}

#[tokio::test]
async fn test_snapshot_is_immutable_after_send() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001"), (2, "+15550000002")]);
    let campaign = h.draft_campaign("hello {name}").await;
    h.service.send_campaign(campaign.id).await.unwrap();

    h.store
        .update_contact(Contact::new(1, "Renamed", "+15559999999", GROUP));
    h.store.remove_contact(2);
    h.add_contacts(&[(3, "+15550000003")]);

    let snapshot = h.service.get_snapshot(campaign.id).await.unwrap().unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.recipients[0].phone, "+15550000001");
    assert_eq!(snapshot.recipients[0].name, "contact-1");

    let tasks = h.service.list_campaign_tasks(campaign.id, None).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].message.text, "hello contact-1");
}

#[tokio::test]
async fn test_content_is_frozen_once_sending() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001")]);
    let campaign = h.draft_campaign("hello").await;

    let update = CampaignContentUpdate {
        body: Some("changed".to_string()),
        ..Default::default()
    };
    let updated = h
        .service
        .update_campaign_content(campaign.id, &update)
        .await
        .unwrap();
    assert_eq!(updated.body.as_deref(), Some("changed"));

    h.service.send_campaign(campaign.id).await.unwrap();
    let err = h
        .service
        .update_campaign_content(campaign.id, &update)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState { .. }));
}

#[tokio::test]
async fn test_message_too_long_is_failed_at_creation() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001")]);
    let body = "x".repeat(153 * 256);
    let campaign = h.draft_campaign(&body).await;

    let accepted = h.service.send_campaign(campaign.id).await.unwrap();
    assert_eq!(accepted.task_count, 1);
    assert!(!accepted.warnings.is_empty());

    let tasks = h.store.all_tasks();
    assert_eq!(tasks[0].status, TaskStatus::Failed);

    // 没有任何活跃任务，活动直接结束
    assert_eq!(h.campaign(campaign.id).await.status, CampaignStatus::Failed);
}

#[tokio::test]
async fn test_schedule_unschedule_and_scan() {
    let h = Harness::new();
    h.add_contacts(&[(1, "+15550000001")]);
    let campaign = h.draft_campaign("hello").await;
    let at = sms_core::Clock::now(h.clock.as_ref()) + Duration::minutes(10);

    let scheduled = h.service.schedule_campaign(campaign.id, at).await.unwrap();
    assert_eq!(scheduled.status, CampaignStatus::Scheduled);
    assert_eq!(scheduled.scheduled_at, Some(at));

    let draft = h.service.unschedule_campaign(campaign.id).await.unwrap();
    assert_eq!(draft.status, CampaignStatus::Draft);

    h.service.schedule_campaign(campaign.id, at).await.unwrap();
    let scanner = ScheduledCampaignScanner::new(
        std::sync::Arc::new(h.store.clone()),
        h.service.clone(),
        h.clock.clone(),
        std::time::Duration::from_secs(1),
    );

    assert_eq!(scanner.scan_once().await.unwrap(), 0);
    h.clock.advance(Duration::minutes(11));
    assert_eq!(scanner.scan_once().await.unwrap(), 1);
    assert_eq!(h.campaign(campaign.id).await.status, CampaignStatus::Sending);
    assert_eq!(h.store.all_tasks().len(), 1);

    let err = h.service.schedule_campaign(campaign.id, at).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidState { .. }));
}
