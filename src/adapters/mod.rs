//! Interfaces to external collaborators.
//!
//! The pipeline core only talks to the outside world through these traits:
//! platform publishing, notifications, AI drafting and authorization.

pub mod auth;
pub mod fabric;
pub mod notifier;
pub mod publisher;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    ContentItem, ContentKind, NotificationEvent, Platform, PrivilegeLevel, PublishErrorKind,
};

pub use auth::RoleAuthorizer;
pub use fabric::FabricDrafter;
pub use notifier::LogNotifier;
pub use publisher::{DryRunPublisher, WebhookPublisher};

/// Result of one platform publish call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
    pub success: bool,

    /// Platform-side post ID (on success)
    pub platform_post_id: Option<String>,

    /// Failure classification (None on failure means transient)
    pub error_kind: Option<PublishErrorKind>,

    /// Platform message, if any
    pub message: Option<String>,
}

impl PublishResult {
    pub fn published(platform_post_id: impl Into<String>) -> Self {
        Self {
            success: true,
            platform_post_id: Some(platform_post_id.into()),
            error_kind: None,
            message: None,
        }
    }

    pub fn failed(kind: PublishErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            platform_post_id: None,
            error_kind: Some(kind),
            message: Some(message.into()),
        }
    }
}

/// Platform-specific posting surface. All platforms are polymorphic over
/// this one capability.
///
/// Returning `Err` is treated as a transient failure.
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    /// Human-readable publisher name
    fn name(&self) -> &str;

    /// Platform this publisher posts to
    fn platform(&self) -> Platform;

    /// Deliver one item
    async fn publish(&self, item: &ContentItem) -> Result<PublishResult>;
}

/// Human notifications. Fire-and-forget: a failed notification never rolls
/// back a content transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent, item: &ContentItem, detail: &str) -> Result<()>;
}

/// AI text generation for drafts
#[async_trait]
pub trait Drafter: Send + Sync {
    fn name(&self) -> &str;

    async fn draft(&self, prompt: &str, platform: Platform, kind: ContentKind) -> Result<String>;
}

/// Resolves a user's review privilege
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn reviewer_privilege(&self, user: &str) -> Result<PrivilegeLevel>;
}
