//! Transition records for the append-only content journal, and the
//! notification events emitted to humans.
//!
//! Every committed state change is recorded as an immutable
//! `TransitionRecord` carrying a full snapshot of the item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::{ContentItem, ContentState};

/// A single line in the content journal.
///
/// The current state of any item is the snapshot of its last record;
/// the full list of records for an item is its audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Unique identifier for this record
    pub id: Uuid,

    /// When the transition was committed
    pub timestamp: DateTime<Utc>,

    /// The item this record belongs to
    pub item_id: Uuid,

    /// What happened
    pub kind: TransitionKind,

    /// State before the transition (None on creation)
    pub from: Option<ContentState>,

    /// State after the transition
    pub to: ContentState,

    /// Who or what performed it (reviewer name, "scheduler", "dispatcher")
    pub actor: String,

    /// Human-readable note (NO secrets)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Item after the transition
    pub snapshot: ContentItem,
}

impl TransitionRecord {
    pub fn new(
        kind: TransitionKind,
        from: Option<ContentState>,
        actor: impl Into<String>,
        snapshot: ContentItem,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: snapshot.updated_at,
            item_id: snapshot.id,
            kind,
            from,
            to: snapshot.state,
            actor: actor.into(),
            note: None,
            snapshot,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Types of committed changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    /// Item created by the scraper or drafter
    Created,

    /// Submitted for review
    Submitted,

    /// Reviewer comment appended (may flag)
    FeedbackAdded,

    Approved,

    Rejected,

    /// Publish slot assigned
    Scheduled,

    Published,

    /// Dispatch lease taken before a publish attempt
    Claimed,

    /// Dispatch lease given back without an outcome
    ClaimReleased,

    /// Publish attempt failed, slot pushed forward
    RetryScheduled,

    /// Terminal publish failure
    Failed,

    /// Parked after AuthExpired
    Held,

    /// Operator released an AuthExpired hold
    HoldReleased,

    /// Failed item reset to a fresh cycle
    Reset,

    /// Review reminder sent
    Reminded,
}

/// Events the pipeline reports to humans through the notifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    /// An item entered review
    ReviewRequested,

    /// An item has waited in review too long
    ReviewReminder,

    /// An item was delivered to its platform
    Published,

    /// An item reached terminal failure
    Failed,

    /// A platform credential needs re-authentication
    AuthExpired,
}
