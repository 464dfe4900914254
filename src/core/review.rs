//! Review gate: the approval state machine.
//!
//! ```text
//! scraped ─┐
//!          ├─submit─▶ pending_review ─feedback─▶ flagged
//! draft ───┘               │                        │
//!                          ├──────approve───────────┤──▶ approved ─▶ (scheduler)
//!                          └──────reject────────────┴──▶ rejected
//! approved / scheduled ──reject (cancel)──▶ rejected
//! failed ──reset──▶ draft
//! ```
//!
//! The gate never re-derives privilege: callers pass a `Reviewer` whose
//! level was resolved by the authorization collaborator.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::Notifier;
use crate::domain::{
    ContentItem, ContentState, Decision, NotificationEvent, PrivilegeLevel, ReviewFeedback,
    Reviewer, TransitionKind,
};

use super::error::{PipelineError, PipelineResult};
use super::store::ContentStore;

/// Approval state machine over the content store
pub struct ReviewGate {
    store: Arc<ContentStore>,
    notifier: Arc<dyn Notifier>,
    /// "Ready to schedule" events for the scheduler
    ready_tx: Option<mpsc::UnboundedSender<Uuid>>,
}

impl ReviewGate {
    pub fn new(store: Arc<ContentStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            ready_tx: None,
        }
    }

    /// Emit approved item IDs on this channel
    pub fn with_ready_channel(mut self, ready_tx: mpsc::UnboundedSender<Uuid>) -> Self {
        self.ready_tx = Some(ready_tx);
        self
    }

    /// Move a scraped or drafted item into review
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn submit_for_review(&self, id: Uuid, actor: &str) -> PipelineResult<ContentItem> {
        let current = self.store.get(id)?;
        if !matches!(current.state, ContentState::Scraped | ContentState::Draft) {
            return Err(PipelineError::InvalidTransition {
                id,
                from: current.state,
                action: "submit for review",
            });
        }

        let now = self.store.now();
        let mut next = current;
        next.state = ContentState::PendingReview;
        next.review_feedback.clear();
        next.submitted_at = Some(now);
        next.reminded_at = None;

        let item = self
            .store
            .commit(next, TransitionKind::Submitted, actor, None)?;
        info!("Submitted for review");

        self.notify(NotificationEvent::ReviewRequested, &item, "awaiting review")
            .await;
        Ok(item)
    }

    /// Append a reviewer comment. Always legal; the first comment on a fresh
    /// `pending_review` item also flags it.
    #[instrument(skip(self, comment), fields(item_id = %id))]
    pub async fn add_feedback(&self, id: Uuid, reviewer: &str, comment: &str) -> PipelineResult<ContentItem> {
        if comment.trim().is_empty() {
            return Err(PipelineError::InvalidInput(
                "feedback comment cannot be empty".to_string(),
            ));
        }

        let current = self.store.get(id)?;
        let mut next = current;
        next.review_feedback.push(ReviewFeedback {
            reviewer: reviewer.to_string(),
            comment: comment.trim().to_string(),
            timestamp: self.store.now(),
        });
        if next.state == ContentState::PendingReview {
            next.state = ContentState::Flagged;
        }

        let item = self
            .store
            .commit(next, TransitionKind::FeedbackAdded, reviewer, Some(comment.trim()))?;
        info!(state = %item.state, "Feedback added");
        Ok(item)
    }

    /// Approve or reject.
    ///
    /// Approve requires `pending_review` or `flagged`. Reject additionally
    /// cancels `approved` and `scheduled` items; a published item can never
    /// be rejected.
    #[instrument(skip(self, reviewer), fields(item_id = %id, reviewer = %reviewer.name))]
    pub async fn decide(&self, id: Uuid, decision: Decision, reviewer: &Reviewer) -> PipelineResult<ContentItem> {
        require_privilege(reviewer, PrivilegeLevel::Reviewer)?;

        let current = self.store.get(id)?;
        match decision {
            Decision::Approve => self.approve(current, reviewer),
            Decision::Reject => self.reject(current, reviewer),
        }
    }

    fn approve(&self, current: ContentItem, reviewer: &Reviewer) -> PipelineResult<ContentItem> {
        if !current.state.is_under_review() {
            return Err(PipelineError::InvalidTransition {
                id: current.id,
                from: current.state,
                action: "approve",
            });
        }

        let mut next = current;
        next.state = ContentState::Approved;
        next.approved_at = Some(self.store.now());

        let item = self
            .store
            .commit(next, TransitionKind::Approved, &reviewer.name, None)?;
        info!("Approved");

        if let Some(ref tx) = self.ready_tx {
            if tx.send(item.id).is_err() {
                warn!(item_id = %item.id, "Scheduler channel closed; item waits for next pass");
            }
        }
        Ok(item)
    }

    fn reject(&self, current: ContentItem, reviewer: &Reviewer) -> PipelineResult<ContentItem> {
        let cancellable = matches!(
            current.state,
            ContentState::PendingReview
                | ContentState::Flagged
                | ContentState::Approved
                | ContentState::Scheduled
        );
        if !cancellable {
            return Err(PipelineError::InvalidTransition {
                id: current.id,
                from: current.state,
                action: "reject",
            });
        }

        let from = current.state;
        let mut next = current;
        next.state = ContentState::Rejected;
        next.scheduled_for = None;
        next.on_hold = false;

        let item = self
            .store
            .commit(next, TransitionKind::Rejected, &reviewer.name, None)?;
        info!(%from, "Rejected");
        Ok(item)
    }

    /// Start a fresh cycle for a failed item: back to `draft` with
    /// `attempt_count = 0`.
    #[instrument(skip(self, reviewer), fields(item_id = %id, reviewer = %reviewer.name))]
    pub async fn reset(&self, id: Uuid, reviewer: &Reviewer) -> PipelineResult<ContentItem> {
        require_privilege(reviewer, PrivilegeLevel::Reviewer)?;

        let current = self.store.get(id)?;
        if current.state != ContentState::Failed {
            return Err(PipelineError::InvalidTransition {
                id,
                from: current.state,
                action: "reset",
            });
        }

        let previous_attempts = current.attempt_count;
        let mut next = current;
        next.state = ContentState::Draft;
        next.attempt_count = 0;
        next.scheduled_for = None;
        next.approved_at = None;
        next.submitted_at = None;
        next.reminded_at = None;
        next.last_error = None;
        next.on_hold = false;

        let note = format!("reset after {} attempts", previous_attempts);
        let item = self
            .store
            .commit(next, TransitionKind::Reset, &reviewer.name, Some(&note))?;
        info!(previous_attempts, "Reset failed item");
        Ok(item)
    }

    async fn notify(&self, event: NotificationEvent, item: &ContentItem, detail: &str) {
        if let Err(e) = self.notifier.notify(event, item, detail).await {
            warn!(item_id = %item.id, ?event, error = %e, "Notification failed");
        }
    }
}

fn require_privilege(reviewer: &Reviewer, required: PrivilegeLevel) -> PipelineResult<()> {
    if reviewer.privilege < required {
        return Err(PipelineError::Unauthorized {
            reviewer: reviewer.name.clone(),
            actual: reviewer.privilege,
            required,
        });
    }
    Ok(())
}
