//! Publisher dispatcher: delivers due items and records the outcome.
//!
//! Each claimed item gets one publish call under a timeout. The result is
//! classified and committed in the same step that clears the in-flight
//! marker:
//!
//! - success: `published`
//! - transient error: retried at `now + backoff` until `max_attempts`, then `failed`
//! - platform rejection: `failed` at once
//! - expired credentials: parked (`on_hold`) without consuming an attempt

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{Notifier, PlatformPublisher, PublishResult};
use crate::domain::{
    ContentItem, ContentState, NotificationEvent, Platform, PublishErrorKind, PublishFailure,
    TransitionKind,
};

use super::error::{PipelineError, PipelineResult};
use super::store::{ContentStore, DispatchClaim};

/// Attempts to record one outcome when losing optimistic races
const MAX_RECORD_ATTEMPTS: u32 = 5;

const ACTOR: &str = "dispatcher";

/// How the wait between publish attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay every time
    Fixed,
    /// Delay multiplied after each failure, capped
    Exponential,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Fixed
    }
}

/// Retry policy for transient publish failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Delay after the first failure, in seconds
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,

    /// Upper bound for exponential delays, in seconds
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_seconds() -> u64 {
    300
}
fn default_max_backoff_seconds() -> u64 {
    3600
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: BackoffStrategy::default(),
            backoff_seconds: default_backoff_seconds(),
            max_backoff_seconds: default_max_backoff_seconds(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay after a given failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => Duration::from_secs(self.backoff_seconds),
            BackoffStrategy::Exponential => {
                if attempt <= 1 {
                    return Duration::from_secs(self.backoff_seconds);
                }
                let delay =
                    self.backoff_seconds as f64 * self.multiplier.powi((attempt - 1) as i32);
                let capped = delay.min(self.max_backoff_seconds as f64) as u64;
                Duration::from_secs(capped)
            }
        }
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// What happened to one claimed item
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published { post_id: String },
    RetryScheduled { attempt: u32, next_at: DateTime<Utc> },
    Failed { kind: PublishErrorKind },
    Held,
}

/// Tally of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub assigned: usize,
    pub reminded: usize,
    pub published: usize,
    pub retried: usize,
    pub failed: usize,
    pub held: usize,
    /// Outcomes that could not be recorded
    pub errors: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &PublishOutcome) {
        match outcome {
            PublishOutcome::Published { .. } => self.published += 1,
            PublishOutcome::RetryScheduled { .. } => self.retried += 1,
            PublishOutcome::Failed { .. } => self.failed += 1,
            PublishOutcome::Held => self.held += 1,
        }
    }

    /// Number of items a publish was attempted for
    pub fn dispatched(&self) -> usize {
        self.published + self.retried + self.failed + self.held + self.errors
    }
}

/// Raw result of one publish call, before it is applied to the item
enum Attempt {
    Delivered(String),
    Failed(PublishErrorKind, String),
}

impl From<PublishResult> for Attempt {
    fn from(result: PublishResult) -> Self {
        if result.success {
            return Attempt::Delivered(result.platform_post_id.unwrap_or_default());
        }
        let kind = result.error_kind.unwrap_or(PublishErrorKind::TransientError);
        let message = result
            .message
            .unwrap_or_else(|| "platform reported failure".to_string());
        Attempt::Failed(kind, message)
    }
}

/// Publish worker pool over the content store
pub struct Dispatcher {
    store: Arc<ContentStore>,
    publishers: HashMap<Platform, Arc<dyn PlatformPublisher>>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    publish_timeout: Duration,
    workers: usize,
}

impl Dispatcher {
    pub fn new(store: Arc<ContentStore>, notifier: Arc<dyn Notifier>, retry: RetryPolicy) -> Self {
        Self {
            store,
            publishers: HashMap::new(),
            notifier,
            retry,
            publish_timeout: Duration::from_secs(30),
            workers: 4,
        }
    }

    /// Register the publisher for its platform (replaces any previous one)
    pub fn with_publisher(mut self, publisher: Arc<dyn PlatformPublisher>) -> Self {
        self.publishers.insert(publisher.platform(), publisher);
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Maximum concurrent publish calls
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Publish every claimed item, at most `workers` at a time
    pub async fn dispatch_all(self: &Arc<Self>, claims: Vec<DispatchClaim>) -> SweepReport {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for claim in claims {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let dispatcher = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                let id = claim.id();
                (id, dispatcher.publish(claim).await)
            });
        }

        let mut report = SweepReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.record(&outcome),
                Ok((id, Err(e))) => {
                    error!(item_id = %id, error = %e, "Failed to record publish outcome");
                    report.errors += 1;
                }
                Err(e) => {
                    error!(error = %e, "Publish task aborted");
                    report.errors += 1;
                }
            }
        }

        report
    }

    /// Make one publish attempt for a claimed item and record the outcome
    #[instrument(skip(self, claim), fields(item_id = %claim.id(), platform = %claim.item().platform))]
    pub async fn publish(&self, mut claim: DispatchClaim) -> PipelineResult<PublishOutcome> {
        let item = claim.item().clone();

        // The call must finish before the lease lets another sweep in
        let timeout = chrono::Duration::from_std(self.publish_timeout).unwrap_or_else(|_| chrono::Duration::days(1));
        if claim.lease().expires_at <= self.store.now() + timeout {
            return Err(PipelineError::ConcurrentModification {
                id: item.id,
                detail: "dispatch lease would expire during the publish call".to_string(),
            });
        }

        let attempt = self.attempt(&item).await;

        let (item, outcome) = self.record(&mut claim, &attempt)?;
        self.announce(&item, &outcome).await;
        Ok(outcome)
    }

    async fn attempt(&self, item: &ContentItem) -> Attempt {
        let Some(publisher) = self.publishers.get(&item.platform) else {
            return Attempt::Failed(
                PublishErrorKind::AuthExpired,
                format!("no publisher configured for {}", item.platform),
            );
        };

        debug!(publisher = publisher.name(), "Publishing");
        match tokio::time::timeout(self.publish_timeout, publisher.publish(item)).await {
            Ok(Ok(result)) => result.into(),
            Ok(Err(e)) => Attempt::Failed(PublishErrorKind::TransientError, format!("{:#}", e)),
            Err(_) => Attempt::Failed(
                PublishErrorKind::TransientError,
                format!("publish timed out after {}s", self.publish_timeout.as_secs()),
            ),
        }
    }

    /// Apply an attempt to the latest snapshot and commit it under the claim
    fn record(
        &self,
        claim: &mut DispatchClaim,
        attempt: &Attempt,
    ) -> PipelineResult<(ContentItem, PublishOutcome)> {
        let id = claim.id();
        let mut tries = 0u32;
        loop {
            tries += 1;
            let current = self.store.get(id)?;
            if current.state != ContentState::Scheduled {
                // Another process sharing the journal got there first
                return Err(PipelineError::ConcurrentModification {
                    id,
                    detail: format!("outcome already recorded as {}", current.state),
                });
            }
            let (next, kind, outcome) = self.apply(current, attempt);
            let note = match attempt {
                Attempt::Failed(_, message) => Some(message.as_str()),
                Attempt::Delivered(_) => None,
            };

            match self.store.commit_claimed(claim, next, kind, ACTOR, note) {
                Ok(item) => return Ok((item, outcome)),
                Err(e) if e.is_conflict() && tries < MAX_RECORD_ATTEMPTS => {
                    debug!(item_id = %id, error = %e, "Outcome commit raced; reloading");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn apply(&self, mut item: ContentItem, attempt: &Attempt) -> (ContentItem, TransitionKind, PublishOutcome) {
        let now = self.store.now();
        match attempt {
            Attempt::Delivered(post_id) => {
                item.state = ContentState::Published;
                item.published_at = Some(now);
                item.platform_post_id = Some(post_id.clone());
                item.last_error = None;
                let outcome = PublishOutcome::Published {
                    post_id: post_id.clone(),
                };
                (item, TransitionKind::Published, outcome)
            }
            Attempt::Failed(kind, message) => {
                item.last_error = Some(PublishFailure {
                    kind: *kind,
                    message: message.clone(),
                    at: now,
                });
                match kind {
                    PublishErrorKind::AuthExpired => {
                        item.on_hold = true;
                        (item, TransitionKind::Held, PublishOutcome::Held)
                    }
                    PublishErrorKind::PlatformRejected => {
                        item.attempt_count += 1;
                        item.state = ContentState::Failed;
                        let outcome = PublishOutcome::Failed { kind: *kind };
                        (item, TransitionKind::Failed, outcome)
                    }
                    PublishErrorKind::TransientError => {
                        item.attempt_count += 1;
                        if self.retry.should_retry(item.attempt_count) {
                            let delay = self.retry.delay_for_attempt(item.attempt_count);
                            let delay = chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::seconds(default_backoff_seconds() as i64));
                            let next_at = now + delay;
                            item.scheduled_for = Some(next_at);
                            let outcome = PublishOutcome::RetryScheduled {
                                attempt: item.attempt_count,
                                next_at,
                            };
                            (item, TransitionKind::RetryScheduled, outcome)
                        } else {
                            item.state = ContentState::Failed;
                            let outcome = PublishOutcome::Failed { kind: *kind };
                            (item, TransitionKind::Failed, outcome)
                        }
                    }
                }
            }
        }
    }

    async fn announce(&self, item: &ContentItem, outcome: &PublishOutcome) {
        let (event, detail) = match outcome {
            PublishOutcome::Published { post_id } => {
                info!(%post_id, "Published");
                (NotificationEvent::Published, format!("published as {}", post_id))
            }
            PublishOutcome::RetryScheduled { attempt, next_at } => {
                warn!(attempt, max_attempts = self.retry.max_attempts, %next_at, "Publish failed; retry scheduled");
                return;
            }
            PublishOutcome::Failed { kind } => {
                error!(%kind, attempts = item.attempt_count, "Publish failed permanently");
                (NotificationEvent::Failed, failure_detail(item))
            }
            PublishOutcome::Held => {
                warn!(platform = %item.platform, "Credentials expired; item held");
                (NotificationEvent::AuthExpired, failure_detail(item))
            }
        };

        if let Err(e) = self.notifier.notify(event, item, &detail).await {
            warn!(item_id = %item.id, ?event, error = %e, "Notification failed");
        }
    }

    /// Release every AuthExpired hold on a platform after re-authentication.
    /// Returns the number of items released.
    #[instrument(skip(self))]
    pub fn release_holds(&self, platform: Platform) -> PipelineResult<usize> {
        let held: Vec<Uuid> = self
            .store
            .all()
            .into_iter()
            .filter(|i| i.platform == platform && i.on_hold && i.state == ContentState::Scheduled)
            .map(|i| i.id)
            .collect();

        let mut released = 0;
        for id in held {
            let mut item = self.store.get(id)?;
            if !item.on_hold {
                continue;
            }
            item.on_hold = false;
            match self.store.commit(item, TransitionKind::HoldReleased, "operator", None) {
                Ok(_) => released += 1,
                Err(e) if e.is_conflict() => {
                    warn!(item_id = %id, error = %e, "Hold changed concurrently; skipped");
                }
                Err(e) => return Err(e),
            }
        }

        if released > 0 {
            info!(%platform, released, "Released held items");
        }
        Ok(released)
    }
}

fn failure_detail(item: &ContentItem) -> String {
    match item.last_error {
        Some(ref failure) => format!("{}: {}", failure.kind, failure.message),
        None => "unknown failure".to_string(),
    }
}
