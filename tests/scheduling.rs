//! Scheduling Integration Tests
//!
//! Tests for cadence slot assignment, FIFO order, photo/video alternation,
//! slot collisions between store handles, and review reminders.

mod common;

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use common::{Harness, ScriptedPublisher};
use maestro::core::{
    CadencePolicy, ContentStore, ManualClock, PipelineError, RetryPolicy, Scheduler, SlotTime,
};
use maestro::domain::{
    ContentItem, ContentKind, ContentState, Decision, NotificationEvent, Platform, PrivilegeLevel,
    Reviewer,
};
use tempfile::TempDir;
use uuid::Uuid;

fn admin() -> Reviewer {
    Reviewer::new("alice", PrivilegeLevel::Admin)
}

/// Approve items in order, one minute apart
async fn approve_in_order(h: &Harness, engine: &maestro::Engine, kinds: &[ContentKind]) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for kind in kinds {
        let item = h.insert(Platform::Instagram, *kind, ContentState::PendingReview);
        engine
            .review()
            .decide(item.id, Decision::Approve, &admin())
            .await
            .unwrap();
        h.clock.advance(Duration::minutes(1));
        ids.push(item.id);
    }
    ids
}

#[tokio::test]
async fn test_fifo_order_across_days() {
    let h = Harness::new();
    let policy = CadencePolicy {
        alternate_kinds: false,
        ..Default::default()
    };
    let engine = h.engine_with(
        Arc::new(ScriptedPublisher::new(Platform::Instagram)),
        policy,
        RetryPolicy::default(),
    );

    let ids = approve_in_order(&h, &engine, &[ContentKind::Photo; 3]).await;
    let assignments = engine.scheduler().assign().unwrap();

    let order: Vec<Uuid> = assignments.iter().map(|a| a.item_id).collect();
    assert_eq!(order, ids);
    assert_eq!(assignments[0].scheduled_for, Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
    assert_eq!(assignments[1].scheduled_for, Utc.with_ymd_and_hms(2024, 3, 4, 17, 0, 0).unwrap());
    assert_eq!(assignments[2].scheduled_for, Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap());
}

#[tokio::test]
async fn test_photo_then_video_fill_one_day() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Instagram)));

    let ids = approve_in_order(&h, &engine, &[ContentKind::Photo, ContentKind::Video]).await;
    let assignments = engine.scheduler().assign().unwrap();

    assert_eq!(assignments.len(), 2);
    assert_eq!(assignments[0].item_id, ids[0]);
    assert_eq!(assignments[0].scheduled_for, Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
    assert_eq!(assignments[1].item_id, ids[1]);
    assert_eq!(assignments[1].scheduled_for, Utc.with_ymd_and_hms(2024, 3, 4, 17, 0, 0).unwrap());
}

#[tokio::test]
async fn test_photo_video_alternation() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Instagram)));

    // Queue: photo A, photo B, video C
    let ids = approve_in_order(
        &h,
        &engine,
        &[ContentKind::Photo, ContentKind::Photo, ContentKind::Video],
    )
    .await;
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    let assignments = engine.scheduler().assign().unwrap();
    let slot_of = |id: Uuid| {
        assignments
            .iter()
            .find(|x| x.item_id == id)
            .map(|x| x.scheduled_for)
            .unwrap()
    };

    // Video C jumps ahead of photo B for the second slot of day one
    assert_eq!(slot_of(a), Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap());
    assert_eq!(slot_of(c), Utc.with_ymd_and_hms(2024, 3, 4, 17, 0, 0).unwrap());
    assert_eq!(slot_of(b), Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap());
}

#[tokio::test]
async fn test_alternation_falls_back_when_only_one_kind_is_queued() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Instagram)));

    approve_in_order(&h, &engine, &[ContentKind::Video, ContentKind::Video]).await;
    let assignments = engine.scheduler().assign().unwrap();

    // No photo to alternate with; both slots of day one are still used
    assert_eq!(assignments.len(), 2);
    assert!(assignments
        .iter()
        .all(|a| a.scheduled_for.date_naive() == h.clock_now().date_naive()));
}

#[tokio::test]
async fn test_never_scheduled_in_the_past() {
    let h = Harness::at(Utc.with_ymd_and_hms(2024, 3, 4, 18, 30, 0).unwrap());
    let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Instagram)));

    approve_in_order(&h, &engine, &[ContentKind::Photo, ContentKind::Video]).await;
    let now = h.clock_now();
    let assignments = engine.scheduler().assign().unwrap();

    assert_eq!(assignments.len(), 2);
    for a in &assignments {
        assert!(a.scheduled_for >= now);
        let item = h.store.get(a.item_id).unwrap();
        assert_eq!(item.state, ContentState::Scheduled);
        assert_eq!(item.scheduled_for, Some(a.scheduled_for));
    }
    assert_eq!(assignments[0].scheduled_for, Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap());
}

#[tokio::test]
async fn test_occupied_slots_and_weekends_are_skipped() {
    // Friday evening
    let h = Harness::at(Utc.with_ymd_and_hms(2024, 3, 8, 12, 0, 0).unwrap());
    let policy = CadencePolicy {
        posts_per_day: 1,
        slot_times: vec![SlotTime::new(17, 0).unwrap()],
        alternate_kinds: false,
        skip_weekends: true,
    };
    let engine = h.engine_with(
        Arc::new(ScriptedPublisher::new(Platform::Twitter)),
        policy,
        RetryPolicy::default(),
    );

    // Friday's slot is already taken
    let mut taken = maestro::ContentItem::new(Platform::Twitter, ContentKind::Text, "t", ContentState::Scheduled);
    taken.scheduled_for = Some(Utc.with_ymd_and_hms(2024, 3, 8, 17, 0, 0).unwrap());
    h.store.insert(taken, "test", None).unwrap();

    let item = h.insert(Platform::Twitter, ContentKind::Text, ContentState::PendingReview);
    engine
        .review()
        .decide(item.id, Decision::Approve, &admin())
        .await
        .unwrap();

    let assignments = engine.scheduler().assign().unwrap();
    assert_eq!(assignments.len(), 1);
    // Monday, not Friday (taken) or the weekend
    assert_eq!(assignments[0].scheduled_for, Utc.with_ymd_and_hms(2024, 3, 11, 17, 0, 0).unwrap());
}

#[tokio::test]
async fn test_platforms_are_scheduled_independently() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Instagram)));

    for platform in [Platform::Instagram, Platform::Linkedin] {
        let item = h.insert(platform, ContentKind::Text, ContentState::PendingReview);
        engine
            .review()
            .decide(item.id, Decision::Approve, &admin())
            .await
            .unwrap();
    }

    let assignments = engine.scheduler().assign().unwrap();
    assert_eq!(assignments.len(), 2);
    assert_eq!(assignments[0].scheduled_for, assignments[1].scheduled_for);
}

#[tokio::test]
async fn test_slot_taken_by_another_handle_is_not_reused() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("content.jsonl");
    let clock = Arc::new(ManualClock::new(common::monday_morning()));
    let serve = Arc::new(ContentStore::open(&path, clock.clone()).unwrap());
    let cli = Arc::new(ContentStore::open(&path, clock.clone()).unwrap());

    let approved = |store: &ContentStore, kind: ContentKind| {
        let mut item = ContentItem::new(Platform::Instagram, kind, "post", ContentState::Approved);
        item.approved_at = Some(store.now());
        store.insert(item, "test", None).unwrap()
    };
    let a = approved(&*serve, ContentKind::Photo);
    let b = approved(&*cli, ContentKind::Video);
    let nine = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();

    // `serve` takes 09:00 for A
    let mut next = serve.get(a.id).unwrap();
    next.state = ContentState::Scheduled;
    next.scheduled_for = Some(nine);
    serve.commit_slot(next, "scheduler").unwrap();

    // `cli` still believes 09:00 is free
    let mut clash = cli.get(b.id).unwrap();
    clash.state = ContentState::Scheduled;
    clash.scheduled_for = Some(nine);
    match cli.commit_slot(clash, "scheduler") {
        Err(PipelineError::SlotTaken { kind, .. }) => assert_eq!(kind, ContentKind::Photo),
        other => panic!("expected SlotTaken, got {other:?}"),
    }

    let assignments = Scheduler::new(cli.clone(), CadencePolicy::default()).assign().unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].item_id, b.id);
    assert_eq!(assignments[0].scheduled_for, Utc.with_ymd_and_hms(2024, 3, 4, 17, 0, 0).unwrap());

    serve.refresh().unwrap();
    let mut slots: Vec<_> = serve
        .all()
        .into_iter()
        .filter(|i| i.state == ContentState::Scheduled)
        .filter_map(|i| i.scheduled_for)
        .collect();
    slots.sort();
    slots.dedup();
    assert_eq!(slots.len(), 2);
}

#[test]
fn test_reviewers_are_reminded_once_per_cycle() {
    tokio_test::block_on(async {
        let h = Harness::new();
        let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Facebook)));
        let item = h.insert(Platform::Facebook, ContentKind::Photo, ContentState::Draft);
        engine.review().submit_for_review(item.id, "drafter").await.unwrap();

        let after = Duration::hours(4);
        let notifier = h.notifier();

        h.clock.advance(Duration::hours(3));
        assert_eq!(engine.scheduler().remind_reviewers(notifier.as_ref(), after).await.unwrap(), 0);

        h.clock.advance(Duration::hours(2));
        assert_eq!(engine.scheduler().remind_reviewers(notifier.as_ref(), after).await.unwrap(), 1);
        assert_eq!(engine.scheduler().remind_reviewers(notifier.as_ref(), after).await.unwrap(), 0);
        assert_eq!(h.notifier.count(NotificationEvent::ReviewReminder, item.id), 1);

        // Still under review (flagged), still reminded only once
        engine.review().add_feedback(item.id, "bob", "needs a hook").await.unwrap();
        h.clock.advance(Duration::hours(10));
        assert_eq!(engine.scheduler().remind_reviewers(notifier.as_ref(), after).await.unwrap(), 0);
    });
}
