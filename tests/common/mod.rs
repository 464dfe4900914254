//! Shared fixtures for integration tests: a manual clock, an in-memory
//! store, and recording publisher/notifier doubles.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use maestro::adapters::{Notifier, PlatformPublisher, PublishResult};
use maestro::core::{CadencePolicy, ContentStore, Dispatcher, Engine, ManualClock, RetryPolicy};
use maestro::domain::{ContentItem, ContentKind, ContentState, NotificationEvent, Platform};

/// Monday 2024-03-04 08:00 UTC
pub fn monday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap()
}

/// Notifier that remembers every event
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(NotificationEvent, Uuid)>>,
}

impl RecordingNotifier {
    pub fn count(&self, event: NotificationEvent, id: Uuid) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, i)| *e == event && *i == id)
            .count()
    }

    pub fn total(&self, event: NotificationEvent) -> usize {
        self.events.lock().unwrap().iter().filter(|(e, _)| *e == event).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: NotificationEvent, item: &ContentItem, _detail: &str) -> Result<()> {
        self.events.lock().unwrap().push((event, item.id));
        Ok(())
    }
}

/// Publisher that replays scripted results, then succeeds
pub struct ScriptedPublisher {
    platform: Platform,
    script: Mutex<VecDeque<PublishResult>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedPublisher {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            script: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, result: PublishResult) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformPublisher for ScriptedPublisher {
    fn name(&self) -> &str {
        "scripted"
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(&self, item: &ContentItem) -> Result<PublishResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| PublishResult::published(format!("post-{}", item.id.simple()))))
    }
}

/// Store, clock and notifier shared by one test
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<ContentStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::at(monday_morning())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(ContentStore::in_memory(clock.clone()));
        Self {
            clock,
            store,
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    pub fn insert(&self, platform: Platform, kind: ContentKind, state: ContentState) -> ContentItem {
        let item = ContentItem::new(platform, kind, "post body", state);
        self.store.insert(item, "test", None).unwrap()
    }

    /// A scheduled item due right now
    pub fn insert_due(&self, platform: Platform) -> ContentItem {
        let mut item = ContentItem::new(platform, ContentKind::Text, "due post", ContentState::Scheduled);
        item.scheduled_for = Some(self.clock_now());
        self.store.insert(item, "test", None).unwrap()
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.store.now()
    }

    pub fn engine(&self, publisher: Arc<ScriptedPublisher>) -> Engine {
        self.engine_with(publisher, CadencePolicy::default(), RetryPolicy::default())
    }

    pub fn engine_with(
        &self,
        publisher: Arc<ScriptedPublisher>,
        cadence: CadencePolicy,
        retry: RetryPolicy,
    ) -> Engine {
        let dispatcher = Dispatcher::new(self.store.clone(), self.notifier(), retry).with_publisher(publisher);
        Engine::new(self.store.clone(), self.notifier(), cadence, dispatcher)
    }
}
