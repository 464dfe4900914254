//! Domain types for the maestro content pipeline.
//!
//! This module contains the core data structures:
//! - Content: items, platforms, kinds, lifecycle states
//! - Review: feedback, decisions, privilege levels
//! - Events: journal records and notification events

pub mod content;
pub mod events;
pub mod review;

// Re-export commonly used types
pub use content::{
    ClaimLease, ContentItem, ContentKind, ContentState, MediaRef, Platform, PublishErrorKind,
    PublishFailure,
};
pub use events::{NotificationEvent, TransitionKind, TransitionRecord};
pub use review::{Decision, PrivilegeLevel, ReviewFeedback, Reviewer};
