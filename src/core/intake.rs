//! Entry points for new content: scraped candidates and AI drafts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::adapters::Drafter;
use crate::domain::{ContentItem, ContentKind, ContentState, MediaRef, Platform};

use super::error::{PipelineError, PipelineResult};
use super::store::ContentStore;

/// A post found by the scraper collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedCandidate {
    pub platform: Platform,
    pub kind: ContentKind,
    pub body: String,
    pub source_url: String,
    #[serde(default)]
    pub media: Option<MediaRef>,
}

/// Result of ingesting a candidate
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// New `scraped` item
    Created(ContentItem),

    /// The same source was already ingested
    Existing(ContentItem),
}

impl IngestOutcome {
    pub fn item(&self) -> &ContentItem {
        match self {
            Self::Created(item) | Self::Existing(item) => item,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Dedupe key for a scraped source (first 16 hex chars of SHA256)
pub fn source_hash(platform: Platform, source_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", platform, source_url.trim()).as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Create a `scraped` item from a candidate (idempotent per source)
pub fn ingest(store: &ContentStore, candidate: ScrapedCandidate) -> PipelineResult<IngestOutcome> {
    if candidate.body.trim().is_empty() {
        return Err(PipelineError::InvalidInput(
            "scraped candidate has an empty body".to_string(),
        ));
    }

    let hash = source_hash(candidate.platform, &candidate.source_url);
    if let Some(existing) = store.find_by_source(&hash) {
        return Ok(IngestOutcome::Existing(existing));
    }

    let mut item = ContentItem::new(
        candidate.platform,
        candidate.kind,
        candidate.body,
        ContentState::Scraped,
    );
    item.media = candidate.media;
    item.source_url = Some(candidate.source_url);
    item.source_hash = Some(hash);

    match store.insert(item, "scraper", None) {
        Ok(item) => {
            info!(item_id = %item.id, platform = %item.platform, "Ingested scraped content");
            Ok(IngestOutcome::Created(item))
        }
        // Lost a race with a concurrent ingest of the same source
        Err(PipelineError::DuplicateSource(existing)) => {
            Ok(IngestOutcome::Existing(store.get(existing)?))
        }
        Err(e) => Err(e),
    }
}

/// Ask the drafter for a post and store it as a `draft` item
pub async fn create_draft(
    store: &ContentStore,
    drafter: &dyn Drafter,
    prompt: &str,
    platform: Platform,
    kind: ContentKind,
) -> Result<ContentItem> {
    if prompt.trim().is_empty() {
        anyhow::bail!("Draft prompt cannot be empty");
    }

    let body = drafter
        .draft(prompt, platform, kind)
        .await
        .with_context(|| format!("Drafter '{}' failed", drafter.name()))?;

    let body = body.trim().to_string();
    if body.is_empty() {
        anyhow::bail!("Drafter '{}' returned an empty draft", drafter.name());
    }

    let item = ContentItem::new(platform, kind, body, ContentState::Draft);
    let note = format!("drafted by {}", drafter.name());
    let item = store.insert(item, "drafter", Some(&note))?;

    info!(item_id = %item.id, %platform, %kind, "Created AI draft");
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoDrafter;

    #[async_trait]
    impl Drafter for EchoDrafter {
        fn name(&self) -> &str {
            "echo"
        }

        async fn draft(&self, prompt: &str, platform: Platform, _kind: ContentKind) -> Result<String> {
            Ok(format!("[{}] {}\n", platform, prompt))
        }
    }

    fn candidate(url: &str) -> ScrapedCandidate {
        ScrapedCandidate {
            platform: Platform::Instagram,
            kind: ContentKind::Photo,
            body: "trending sunset".to_string(),
            source_url: url.to_string(),
            media: None,
        }
    }

    #[test]
    fn test_source_hash_format() {
        let hash = source_hash(Platform::Instagram, "https://example.com/p/1");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, source_hash(Platform::Twitter, "https://example.com/p/1"));
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let store = ContentStore::in_memory(Arc::new(SystemClock));

        let first = ingest(&store, candidate("https://example.com/p/1")).unwrap();
        let second = ingest(&store, candidate("https://example.com/p/1")).unwrap();

        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.item().id, second.item().id);
        assert_eq!(first.item().state, ContentState::Scraped);
        assert_eq!(store.status().total(), 1);
    }

    #[test]
    fn test_ingest_rejects_empty_body() {
        let store = ContentStore::in_memory(Arc::new(SystemClock));
        let mut c = candidate("https://example.com/p/2");
        c.body = "   ".to_string();
        assert!(matches!(ingest(&store, c), Err(PipelineError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_create_draft_stores_trimmed_body() {
        let store = ContentStore::in_memory(Arc::new(SystemClock));
        let item = create_draft(&store, &EchoDrafter, "spring launch", Platform::Linkedin, ContentKind::Text)
            .await
            .unwrap();

        assert_eq!(item.state, ContentState::Draft);
        assert_eq!(item.body, "[linkedin] spring launch");
        assert_eq!(item.attempt_count, 0);
    }
}
