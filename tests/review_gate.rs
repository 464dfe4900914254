//! Review Gate Integration Tests
//!
//! Tests for legal and illegal review transitions, feedback flagging and
//! cancellation of scheduled items.

mod common;

use std::sync::Arc;

use common::{Harness, ScriptedPublisher};
use maestro::core::{ingest, PipelineError, ScrapedCandidate};
use maestro::domain::{
    ContentKind, ContentState, Decision, NotificationEvent, Platform, PrivilegeLevel, Reviewer,
};

fn alice() -> Reviewer {
    Reviewer::new("alice", PrivilegeLevel::Reviewer)
}

#[tokio::test]
async fn test_scraped_post_through_approval() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Instagram)));

    let outcome = ingest(
        &h.store,
        ScrapedCandidate {
            platform: Platform::Instagram,
            kind: ContentKind::Photo,
            body: "Golden hour at the harbour".to_string(),
            source_url: "https://example.com/p/1".to_string(),
            media: None,
        },
    )
    .unwrap();
    assert!(outcome.is_new());
    let id = outcome.item().id;

    let item = engine.review().submit_for_review(id, "scraper").await.unwrap();
    assert_eq!(item.state, ContentState::PendingReview);
    assert_eq!(h.notifier.count(NotificationEvent::ReviewRequested, id), 1);

    let item = engine.review().decide(id, Decision::Approve, &alice()).await.unwrap();
    assert_eq!(item.state, ContentState::Approved);

    let assignments = engine.scheduler().assign().unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(h.store.get(id).unwrap().state, ContentState::Scheduled);

    let kinds: Vec<_> = h.store.history(id).iter().map(|r| r.kind).collect();
    assert_eq!(kinds.len(), 4);
}

#[tokio::test]
async fn test_ingest_is_idempotent_per_source() {
    let h = Harness::new();
    let candidate = ScrapedCandidate {
        platform: Platform::Twitter,
        kind: ContentKind::Text,
        body: "thread".to_string(),
        source_url: "https://example.com/t/9".to_string(),
        media: None,
    };

    let first = ingest(&h.store, candidate.clone()).unwrap();
    let second = ingest(&h.store, candidate).unwrap();

    assert!(first.is_new());
    assert!(!second.is_new());
    assert_eq!(first.item().id, second.item().id);
    assert_eq!(h.store.status().total(), 1);
}

#[tokio::test]
async fn test_illegal_edges_leave_item_unchanged() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Instagram)));

    for state in [
        ContentState::Scraped,
        ContentState::Draft,
        ContentState::Approved,
        ContentState::Scheduled,
        ContentState::Published,
        ContentState::Rejected,
        ContentState::Failed,
    ] {
        let item = h.insert(Platform::Instagram, ContentKind::Photo, state);
        let err = engine
            .review()
            .decide(item.id, Decision::Approve, &alice())
            .await
            .unwrap_err();
        assert!(
            matches!(err, PipelineError::InvalidTransition { .. }),
            "approve from {state} should be refused, got {err}"
        );

        let after = h.store.get(item.id).unwrap();
        assert_eq!(after.state, state);
        assert_eq!(after.version, item.version);
    }
}

#[tokio::test]
async fn test_published_item_cannot_be_rejected() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Linkedin)));
    let item = h.insert(Platform::Linkedin, ContentKind::Text, ContentState::Published);

    let err = engine
        .review()
        .decide(item.id, Decision::Reject, &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    assert_eq!(h.store.get(item.id).unwrap().state, ContentState::Published);
}

#[tokio::test]
async fn test_first_comment_flags_and_later_comments_keep_flag() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Facebook)));
    let item = h.insert(Platform::Facebook, ContentKind::Photo, ContentState::PendingReview);

    let flagged = engine
        .review()
        .add_feedback(item.id, "bob", "crop the logo")
        .await
        .unwrap();
    assert_eq!(flagged.state, ContentState::Flagged);

    let still = engine
        .review()
        .add_feedback(item.id, "carol", "and fix the typo")
        .await
        .unwrap();
    assert_eq!(still.state, ContentState::Flagged);
    assert_eq!(still.review_feedback.len(), 2);
    assert_eq!(still.review_feedback[1].reviewer, "carol");

    // Flagged items can still be approved
    let approved = engine
        .review()
        .decide(item.id, Decision::Approve, &alice())
        .await
        .unwrap();
    assert_eq!(approved.state, ContentState::Approved);

    // Feedback after approval is recorded without moving the item
    let noted = engine
        .review()
        .add_feedback(item.id, "dave", "nice")
        .await
        .unwrap();
    assert_eq!(noted.state, ContentState::Approved);
}

#[tokio::test]
async fn test_viewer_is_refused() {
    let h = Harness::new();
    let engine = h.engine(Arc::new(ScriptedPublisher::new(Platform::Twitter)));
    let item = h.insert(Platform::Twitter, ContentKind::Text, ContentState::PendingReview);

    let viewer = Reviewer::new("intern", PrivilegeLevel::Viewer);
    let err = engine
        .review()
        .decide(item.id, Decision::Reject, &viewer)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Unauthorized { .. }));
    assert_eq!(h.store.get(item.id).unwrap().state, ContentState::PendingReview);
}

#[tokio::test]
async fn test_rejecting_scheduled_item_prevents_dispatch() {
    let h = Harness::new();
    let publisher = Arc::new(ScriptedPublisher::new(Platform::Instagram));
    let engine = h.engine(publisher.clone());
    let item = h.insert_due(Platform::Instagram);

    engine
        .review()
        .decide(item.id, Decision::Reject, &alice())
        .await
        .unwrap();

    let report = engine.sweep().await.unwrap();
    assert_eq!(report.dispatched(), 0);
    assert_eq!(publisher.calls(), 0);

    let item = h.store.get(item.id).unwrap();
    assert_eq!(item.state, ContentState::Rejected);
    assert!(item.scheduled_for.is_none());
}

#[tokio::test]
async fn test_reject_during_publish_is_a_conflict() {
    let h = Harness::new();
    let publisher = Arc::new(ScriptedPublisher::new(Platform::Instagram));
    let engine = h.engine(publisher.clone());
    let item = h.insert_due(Platform::Instagram);

    let mut claims = engine.scheduler().claim_due().unwrap();
    assert_eq!(claims.len(), 1);

    let err = engine
        .review()
        .decide(item.id, Decision::Reject, &alice())
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    engine.dispatcher().publish(claims.remove(0)).await.unwrap();
    assert_eq!(publisher.calls(), 1);
    assert_eq!(h.store.get(item.id).unwrap().state, ContentState::Published);

    // Once published the item stays published
    let err = engine
        .review()
        .decide(item.id, Decision::Reject, &alice())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidTransition { .. }));
}
