//! Platform publishers.
//!
//! `WebhookPublisher` posts items to a per-platform HTTP endpoint (a
//! platform API gateway) with a bearer token. `DryRunPublisher` only logs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::domain::{ContentItem, ContentKind, MediaRef, Platform, PublishErrorKind};

use super::{PlatformPublisher, PublishResult};

/// HTTP publisher for one platform
pub struct WebhookPublisher {
    platform: Platform,
    /// Endpoint receiving the post
    endpoint: String,
    /// Bearer token (None for unauthenticated gateways)
    token: Option<String>,
    /// HTTP client
    client: reqwest::Client,
}

/// Request body sent to the endpoint
#[derive(Debug, Serialize)]
struct PostRequest<'a> {
    id: Uuid,
    platform: Platform,
    kind: ContentKind,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<&'a MediaRef>,
}

/// Response from the endpoint
#[derive(Debug, Default, Deserialize)]
struct PostResponse {
    #[serde(alias = "id")]
    post_id: Option<String>,
    #[serde(alias = "error")]
    message: Option<String>,
}

impl WebhookPublisher {
    pub fn new(platform: Platform, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            platform,
            endpoint: endpoint.into(),
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Map a non-success HTTP status to a failure kind
    pub fn classify_status(status: StatusCode) -> PublishErrorKind {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PublishErrorKind::AuthExpired,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                PublishErrorKind::PlatformRejected
            }
            _ => PublishErrorKind::TransientError,
        }
    }
}

#[async_trait]
impl PlatformPublisher for WebhookPublisher {
    fn name(&self) -> &str {
        "webhook"
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(&self, item: &ContentItem) -> Result<PublishResult> {
        let request = PostRequest {
            id: item.id,
            platform: item.platform,
            kind: item.kind,
            body: &item.body,
            media: item.media.as_ref(),
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to reach {} endpoint", self.platform))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let parsed: PostResponse = serde_json::from_str(&text).unwrap_or_default();

        if status.is_success() {
            let post_id = parsed.post_id.unwrap_or_else(|| item.id.to_string());
            return Ok(PublishResult::published(post_id));
        }

        let message = parsed
            .message
            .unwrap_or_else(|| format!("{} returned HTTP {}", self.platform, status));
        Ok(PublishResult::failed(Self::classify_status(status), message))
    }
}

/// Publisher that logs instead of posting
pub struct DryRunPublisher {
    platform: Platform,
}

impl DryRunPublisher {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl PlatformPublisher for DryRunPublisher {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(&self, item: &ContentItem) -> Result<PublishResult> {
        info!(item_id = %item.id, platform = %self.platform, "Dry run: not posting");
        Ok(PublishResult::published(format!("dry-run-{}", item.id.simple())))
    }
}
