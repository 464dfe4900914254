//! Content items and their lifecycle states.
//!
//! A `ContentItem` is one logical post on one platform. Cross-posting the
//! same idea to two platforms produces two items.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::review::ReviewFeedback;

/// Target social platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Instagram,
    Twitter,
    Linkedin,
    Facebook,
}

impl Platform {
    /// All supported platforms
    pub const ALL: [Platform; 4] = [
        Platform::Instagram,
        Platform::Twitter,
        Platform::Linkedin,
        Platform::Facebook,
    ];
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Instagram => write!(f, "instagram"),
            Platform::Twitter => write!(f, "twitter"),
            Platform::Linkedin => write!(f, "linkedin"),
            Platform::Facebook => write!(f, "facebook"),
        }
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "instagram" | "ig" => Ok(Platform::Instagram),
            "twitter" | "x" => Ok(Platform::Twitter),
            "linkedin" => Ok(Platform::Linkedin),
            "facebook" | "fb" => Ok(Platform::Facebook),
            _ => anyhow::bail!("Unknown platform: {}", s),
        }
    }
}

/// Kind of post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Photo,
    Video,
    Text,
}

impl ContentKind {
    /// The kind the cadence policy alternates to after this one.
    ///
    /// Only photo and video alternate; text has no partner.
    pub fn alternate(self) -> Option<ContentKind> {
        match self {
            ContentKind::Photo => Some(ContentKind::Video),
            ContentKind::Video => Some(ContentKind::Photo),
            ContentKind::Text => None,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Photo => write!(f, "photo"),
            ContentKind::Video => write!(f, "video"),
            ContentKind::Text => write!(f, "text"),
        }
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "photo" | "image" => Ok(ContentKind::Photo),
            "video" | "reel" => Ok(ContentKind::Video),
            "text" => Ok(ContentKind::Text),
            _ => anyhow::bail!("Unknown content kind: {}", s),
        }
    }
}

/// Lifecycle state of a content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentState {
    /// Pulled in by the scraper collector
    Scraped,

    /// Produced by the AI drafter
    Draft,

    /// Waiting for a reviewer decision
    PendingReview,

    /// A reviewer raised a concern; still actionable
    Flagged,

    /// Approved, waiting for a publish slot
    Approved,

    /// Rejected by a reviewer (terminal)
    Rejected,

    /// Has a publish slot
    Scheduled,

    /// Delivered to the platform (terminal)
    Published,

    /// Retry ceiling reached or rejected by the platform (terminal)
    Failed,
}

impl ContentState {
    /// Terminal states have no outgoing edges except a manual reset.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ContentState::Rejected | ContentState::Published | ContentState::Failed
        )
    }

    /// States in which a reviewer can still approve or reject.
    pub fn is_under_review(self) -> bool {
        matches!(self, ContentState::PendingReview | ContentState::Flagged)
    }
}

impl fmt::Display for ContentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentState::Scraped => "scraped",
            ContentState::Draft => "draft",
            ContentState::PendingReview => "pending_review",
            ContentState::Flagged => "flagged",
            ContentState::Approved => "approved",
            ContentState::Rejected => "rejected",
            ContentState::Scheduled => "scheduled",
            ContentState::Published => "published",
            ContentState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ContentState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "scraped" => Ok(ContentState::Scraped),
            "draft" => Ok(ContentState::Draft),
            "pending_review" | "pending" => Ok(ContentState::PendingReview),
            "flagged" => Ok(ContentState::Flagged),
            "approved" => Ok(ContentState::Approved),
            "rejected" => Ok(ContentState::Rejected),
            "scheduled" => Ok(ContentState::Scheduled),
            "published" => Ok(ContentState::Published),
            "failed" => Ok(ContentState::Failed),
            _ => anyhow::bail!("Unknown content state: {}", s),
        }
    }
}

/// Reference to media held in external storage (never the bytes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Storage URI or URL
    pub uri: String,

    /// Alt text / description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Classification of a publish-time failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishErrorKind {
    /// Content violates platform rules; retrying is futile
    PlatformRejected,

    /// Network or rate-limit problem; retried per policy
    TransientError,

    /// Platform credential is invalid; needs operator re-authentication
    AuthExpired,
}

impl fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishErrorKind::PlatformRejected => write!(f, "platform_rejected"),
            PublishErrorKind::TransientError => write!(f, "transient_error"),
            PublishErrorKind::AuthExpired => write!(f, "auth_expired"),
        }
    }
}

/// Last publish failure recorded on an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishFailure {
    pub kind: PublishErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Dispatch lease recorded in the journal while a publish attempt is in
/// flight. Every store handle on the journal honours it until it expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimLease {
    pub id: Uuid,

    /// Store handle that took the lease
    pub holder: Uuid,

    pub expires_at: DateTime<Utc>,
}

impl ClaimLease {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// The central entity: one logical post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// Immutable identifier
    pub id: Uuid,

    pub platform: Platform,

    pub kind: ContentKind,

    /// Caption or script
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,

    /// URL the scraper found this at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// SHA256("{platform}:{source_url}")[0:16], used to dedupe ingests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,

    pub state: ContentState,

    /// Optimistic concurrency version, bumped by the store on every commit
    pub version: u64,

    /// Publish slot (kept after publish/failure for audit)
    pub scheduled_for: Option<DateTime<Utc>>,

    /// Publish attempts in the current cycle
    pub attempt_count: u32,

    /// Append-only reviewer comments
    #[serde(default)]
    pub review_feedback: Vec<ReviewFeedback>,

    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,

    /// Orders the scheduler's FIFO queue
    #[serde(default)]
    pub approved_at: Option<DateTime<Utc>>,

    /// Set once a review reminder went out for the current review cycle
    #[serde(default)]
    pub reminded_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub platform_post_id: Option<String>,

    #[serde(default)]
    pub last_error: Option<PublishFailure>,

    /// Parked after AuthExpired until an operator releases the platform
    #[serde(default)]
    pub on_hold: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<ClaimLease>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ContentItem {
    /// Build a new, not-yet-stored item. The store stamps version and timestamps.
    pub fn new(platform: Platform, kind: ContentKind, body: impl Into<String>, state: ContentState) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            platform,
            kind,
            body: body.into(),
            media: None,
            source_url: None,
            source_hash: None,
            state,
            version: 0,
            scheduled_for: None,
            attempt_count: 0,
            review_feedback: Vec::new(),
            submitted_at: None,
            approved_at: None,
            reminded_at: None,
            published_at: None,
            platform_post_id: None,
            last_error: None,
            on_hold: false,
            claim: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self
    }

    /// Is this item due for dispatch at `now`?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == ContentState::Scheduled
            && !self.on_hold
            && self.scheduled_for.map_or(false, |at| at <= now)
    }

    /// Is a publish attempt holding this item at `now`?
    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        self.claim.as_ref().map_or(false, |lease| lease.is_active(now))
    }

    /// One-line summary for logs and CLI output (NO full body)
    pub fn summary(&self) -> String {
        let mut preview: String = self.body.chars().take(48).collect();
        if self.body.chars().count() > 48 {
            preview.push('…');
        }
        format!(
            "{} [{}] {}/{} \"{}\"",
            self.id, self.state, self.platform, self.kind, preview
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_display() {
        for state in [
            ContentState::Scraped,
            ContentState::PendingReview,
            ContentState::Flagged,
            ContentState::Failed,
        ] {
            let parsed: ContentState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(ContentState::Published.is_terminal());
        assert!(ContentState::Rejected.is_terminal());
        assert!(ContentState::Failed.is_terminal());
        assert!(!ContentState::Scheduled.is_terminal());
        assert!(!ContentState::Flagged.is_terminal());
    }

    #[test]
    fn test_kind_alternation() {
        assert_eq!(ContentKind::Photo.alternate(), Some(ContentKind::Video));
        assert_eq!(ContentKind::Video.alternate(), Some(ContentKind::Photo));
        assert_eq!(ContentKind::Text.alternate(), None);
    }

    #[test]
    fn test_due_requires_scheduled_and_not_held() {
        let now = Utc::now();
        let mut item = ContentItem::new(Platform::Twitter, ContentKind::Text, "hi", ContentState::Scheduled);
        item.scheduled_for = Some(now - chrono::Duration::minutes(1));
        assert!(item.is_due(now));

        item.on_hold = true;
        assert!(!item.is_due(now));

        item.on_hold = false;
        item.scheduled_for = Some(now + chrono::Duration::minutes(1));
        assert!(!item.is_due(now));
    }

    #[test]
    fn test_platform_parsing_aliases() {
        assert_eq!("IG".parse::<Platform>().unwrap(), Platform::Instagram);
        assert_eq!("x".parse::<Platform>().unwrap(), Platform::Twitter);
        assert!("myspace".parse::<Platform>().is_err());
    }
}
