//! Engine: wires the review gate, scheduler and dispatcher over one store
//! and drives them, either one sweep at a time or as a long-running loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::adapters::Notifier;

use super::dispatcher::{Dispatcher, SweepReport};
use super::error::PipelineResult;
use super::review::ReviewGate;
use super::scheduler::{CadencePolicy, Scheduler};
use super::store::ContentStore;

/// Content pipeline engine
pub struct Engine {
    store: Arc<ContentStore>,
    review: ReviewGate,
    scheduler: Scheduler,
    dispatcher: Arc<Dispatcher>,
    notifier: Arc<dyn Notifier>,

    /// Approvals waiting for slot assignment
    ready_rx: Option<mpsc::UnboundedReceiver<Uuid>>,

    sweep_interval: Duration,
    reminder_after: chrono::Duration,
}

impl Engine {
    pub fn new(
        store: Arc<ContentStore>,
        notifier: Arc<dyn Notifier>,
        cadence: CadencePolicy,
        dispatcher: Dispatcher,
    ) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let review = ReviewGate::new(Arc::clone(&store), Arc::clone(&notifier)).with_ready_channel(ready_tx);
        let scheduler = Scheduler::new(Arc::clone(&store), cadence);

        Self {
            store,
            review,
            scheduler,
            dispatcher: Arc::new(dispatcher),
            notifier,
            ready_rx: Some(ready_rx),
            sweep_interval: Duration::from_secs(3600),
            reminder_after: chrono::Duration::hours(4),
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Remind reviewers once an item has waited this long
    pub fn with_reminder_after(mut self, after: chrono::Duration) -> Self {
        self.reminder_after = after;
        self
    }

    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    pub fn review(&self) -> &ReviewGate {
        &self.review
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// One full pass: assign slots, send reminders, publish what is due
    pub async fn sweep(&self) -> PipelineResult<SweepReport> {
        self.store.refresh()?;

        // Neither step may hold up publishing what is already due
        let assigned = match self.scheduler.assign() {
            Ok(assignments) => assignments.len(),
            Err(e) => {
                error!(error = %e, "Slot assignment failed");
                0
            }
        };
        let reminded = match self
            .scheduler
            .remind_reviewers(self.notifier.as_ref(), self.reminder_after)
            .await
        {
            Ok(sent) => sent,
            Err(e) => {
                error!(error = %e, "Review reminders failed");
                0
            }
        };
        let claims = self.scheduler.claim_due()?;

        let mut report = self.dispatcher.dispatch_all(claims).await;
        report.assigned = assigned;
        report.reminded = reminded;

        info!(
            assigned = report.assigned,
            reminded = report.reminded,
            published = report.published,
            retried = report.retried,
            failed = report.failed,
            held = report.held,
            "Sweep complete"
        );
        Ok(report)
    }

    /// Sweep on an interval until Ctrl-C
    pub async fn serve(mut self) -> Result<()> {
        self.serve_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Sweep on an interval until `shutdown` resolves. Approvals made through
    /// this engine's review gate are scheduled immediately.
    pub async fn serve_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ready_rx = self
            .ready_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("Engine is already serving"))?;

        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(interval_secs = self.sweep_interval.as_secs(), "Engine started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Sweep failed");
                    }
                }
                Some(id) = ready_rx.recv() => {
                    debug!(item_id = %id, "Approved item ready");
                    if let Err(e) = self.scheduler.assign() {
                        error!(error = %e, "Slot assignment failed");
                    }
                }
            }
        }

        self.ready_rx = Some(ready_rx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DryRunPublisher, LogNotifier};
    use crate::core::clock::ManualClock;
    use crate::core::dispatcher::RetryPolicy;
    use crate::domain::{ContentItem, ContentKind, ContentState, Decision, Platform, PrivilegeLevel, Reviewer};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_approval_is_scheduled_while_serving() {
        let now = Utc.with_ymd_and_hms(2024, 6, 3, 8, 0, 0).unwrap();
        let store = Arc::new(ContentStore::in_memory(Arc::new(ManualClock::new(now))));
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let dispatcher = Dispatcher::new(Arc::clone(&store), Arc::clone(&notifier), RetryPolicy::default())
            .with_publisher(Arc::new(DryRunPublisher::new(Platform::Instagram)));
        let mut engine = Engine::new(Arc::clone(&store), notifier, CadencePolicy::default(), dispatcher)
            .with_sweep_interval(Duration::from_secs(3600));

        let item = ContentItem::new(Platform::Instagram, ContentKind::Photo, "p", ContentState::PendingReview);
        let item = store.insert(item, "test", None).unwrap();
        let reviewer = Reviewer::new("alice", PrivilegeLevel::Admin);
        engine.review().decide(item.id, Decision::Approve, &reviewer).await.unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let watched = Arc::clone(&store);
        let id = item.id;
        tokio::spawn(async move {
            for _ in 0..100 {
                if watched.get(id).map(|i| i.state == ContentState::Scheduled).unwrap_or(false) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let _ = stop_tx.send(());
        });

        engine
            .serve_until(async {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();

        let scheduled = store.get(item.id).unwrap();
        assert_eq!(scheduled.state, ContentState::Scheduled);
        assert_eq!(scheduled.scheduled_for, Some(Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()));
    }
}
