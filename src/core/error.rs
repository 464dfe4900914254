//! Error taxonomy for the content pipeline.
//!
//! State-machine and authorization errors are surfaced synchronously and
//! never retried silently. `ConcurrentModification` means the caller lost a
//! race on the same item and should reload before retrying.

use thiserror::Error;
use uuid::Uuid;

use chrono::{DateTime, Utc};

use crate::domain::{ContentKind, ContentState, Platform, PrivilegeLevel};

/// Errors raised by the store, review gate, scheduler and dispatcher
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Content item not found: {0}")]
    NotFound(Uuid),

    #[error("Content item already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Source already ingested as item {0}")]
    DuplicateSource(Uuid),

    #[error("Invalid transition for {id}: cannot {action} from {from}")]
    InvalidTransition {
        id: Uuid,
        from: ContentState,
        action: &'static str,
    },

    #[error("Reviewer '{reviewer}' is {actual}, needs {required}")]
    Unauthorized {
        reviewer: String,
        actual: PrivilegeLevel,
        required: PrivilegeLevel,
    },

    #[error("Concurrent modification of {id}: {detail}")]
    ConcurrentModification { id: Uuid, detail: String },

    /// Another item on the platform already holds the publish slot
    #[error("Slot {at} on {platform} is already taken")]
    SlotTaken {
        platform: Platform,
        at: DateTime<Utc>,
        /// Kind of the item holding the slot
        kind: ContentKind,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Journal IO error: {0}")]
    Journal(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// True when reloading and retrying may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, PipelineError::ConcurrentModification { .. })
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
