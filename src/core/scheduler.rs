//! Scheduler: cadence-based slot assignment and due-item scanning.
//!
//! Approved items wait in a per-platform FIFO queue ordered by approval
//! time. Assignment walks forward from "now" across the configured daily
//! slot times, skipping disallowed days and slots already taken, and hands
//! each free slot the next queued item for that platform.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::Notifier;
use crate::domain::{ContentItem, ContentKind, ContentState, NotificationEvent, Platform, TransitionKind};

use super::error::{PipelineError, PipelineResult};
use super::store::{ContentStore, DispatchClaim};

/// How far ahead assignment may look before giving up
const MAX_HORIZON_DAYS: i64 = 366;

/// Attempts to commit one assignment when losing optimistic races
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Time of day in UTC, written as "HH:MM" in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotTime(NaiveTime);

impl SlotTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn time(self) -> NaiveTime {
        self.0
    }
}

impl TryFrom<String> for SlotTime {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        NaiveTime::parse_from_str(value.trim(), "%H:%M")
            .map(Self)
            .map_err(|e| format!("invalid slot time '{}': {}", value, e))
    }
}

impl From<SlotTime> for String {
    fn from(slot: SlotTime) -> Self {
        slot.to_string()
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

/// Cadence policy: how many posts per day and when
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadencePolicy {
    /// Posts per platform per day (default: 2)
    #[serde(default = "default_posts_per_day")]
    pub posts_per_day: u32,

    /// Daily slot times in UTC (default: 09:00, 17:00)
    #[serde(default = "default_slot_times")]
    pub slot_times: Vec<SlotTime>,

    /// Alternate photo/video within a day when possible
    #[serde(default = "default_alternate_kinds")]
    pub alternate_kinds: bool,

    /// Never schedule on Saturday or Sunday
    #[serde(default)]
    pub skip_weekends: bool,
}

fn default_posts_per_day() -> u32 {
    2
}

fn default_alternate_kinds() -> bool {
    true
}

fn default_slot_times() -> Vec<SlotTime> {
    vec![
        SlotTime(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN)),
        SlotTime(NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN)),
    ]
}

impl Default for CadencePolicy {
    fn default() -> Self {
        Self {
            posts_per_day: default_posts_per_day(),
            slot_times: default_slot_times(),
            alternate_kinds: default_alternate_kinds(),
            skip_weekends: false,
        }
    }
}

impl CadencePolicy {
    /// Validate the policy
    pub fn validate(&self) -> Result<()> {
        if self.posts_per_day == 0 {
            anyhow::bail!("Cadence must allow at least one post per day");
        }
        let mut distinct: Vec<NaiveTime> = self.slot_times.iter().map(|s| s.time()).collect();
        distinct.sort();
        distinct.dedup();
        if distinct.len() < self.posts_per_day as usize {
            anyhow::bail!(
                "Cadence needs {} distinct slot times for {} posts per day, found {}",
                self.posts_per_day,
                self.posts_per_day,
                distinct.len()
            );
        }
        Ok(())
    }

    /// The slot times used each day, earliest first
    pub fn daily_slots(&self) -> Vec<NaiveTime> {
        let mut slots: Vec<NaiveTime> = self.slot_times.iter().map(|s| s.time()).collect();
        slots.sort();
        slots.dedup();
        slots.truncate(self.posts_per_day as usize);
        slots
    }

    /// Is publishing allowed on this day?
    pub fn allows(&self, day: NaiveDate) -> bool {
        !(self.skip_weekends && matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
    }
}

/// One slot handed to one item
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub item_id: Uuid,
    pub platform: Platform,
    pub kind: ContentKind,
    pub scheduled_for: DateTime<Utc>,
}

/// Where one scheduling attempt left an item
enum Placement {
    Assigned(Assignment),
    /// The item left `approved` meanwhile
    Gone,
    /// Another writer filled the slot first; carries the holder's kind
    SlotTaken(ContentKind),
}

/// FIFO order of the approval queue
fn fifo_key(item: &ContentItem) -> (Option<DateTime<Utc>>, DateTime<Utc>, Uuid) {
    (item.approved_at, item.created_at, item.id)
}

/// Put an item back at its FIFO position
fn requeue(queue: &mut VecDeque<ContentItem>, item: ContentItem) {
    let key = fifo_key(&item);
    let pos = queue.iter().position(|q| fifo_key(q) > key).unwrap_or(queue.len());
    queue.insert(pos, item);
}

/// Slot assigner and due-item scanner
pub struct Scheduler {
    store: Arc<ContentStore>,
    policy: CadencePolicy,
}

impl Scheduler {
    pub fn new(store: Arc<ContentStore>, policy: CadencePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &CadencePolicy {
        &self.policy
    }

    /// Assign publish slots to every approved item.
    ///
    /// An item that cannot be scheduled is logged and left for the next
    /// pass; it never holds up the rest of the queue.
    #[instrument(skip(self))]
    pub fn assign(&self) -> PipelineResult<Vec<Assignment>> {
        self.store.refresh()?;
        let now = self.store.now();
        let items = self.store.all();

        let mut queues: BTreeMap<Platform, Vec<ContentItem>> = BTreeMap::new();
        let mut occupied: HashMap<Platform, BTreeMap<DateTime<Utc>, ContentKind>> = HashMap::new();

        for item in items {
            match item.state {
                ContentState::Approved => queues.entry(item.platform).or_default().push(item),
                ContentState::Scheduled => {
                    if let Some(at) = item.scheduled_for {
                        occupied.entry(item.platform).or_default().insert(at, item.kind);
                    }
                }
                _ => {}
            }
        }

        let mut assignments = Vec::new();
        for (platform, mut queue) in queues {
            // FIFO: earliest-approved first
            queue.sort_by_key(fifo_key);
            let taken = occupied.remove(&platform).unwrap_or_default();
            assignments.extend(self.assign_platform(platform, queue.into(), taken, now));
        }

        if !assignments.is_empty() {
            info!(count = assignments.len(), "Assigned publish slots");
        }
        Ok(assignments)
    }

    fn assign_platform(
        &self,
        platform: Platform,
        mut queue: VecDeque<ContentItem>,
        mut taken: BTreeMap<DateTime<Utc>, ContentKind>,
        now: DateTime<Utc>,
    ) -> Vec<Assignment> {
        let slots = self.policy.daily_slots();
        let mut assignments = Vec::new();
        let mut day = now.date_naive();
        let last_day = day + Duration::days(MAX_HORIZON_DAYS);

        while !queue.is_empty() {
            if day > last_day {
                warn!(%platform, remaining = queue.len(), "No free slot within scheduling horizon");
                break;
            }
            if !self.policy.allows(day) {
                day = day + Duration::days(1);
                continue;
            }

            let mut previous_kind: Option<ContentKind> = None;
            for slot in &slots {
                let at = day.and_time(*slot).and_utc();
                if at < now {
                    continue;
                }
                if let Some(kind) = taken.get(&at) {
                    previous_kind = Some(*kind);
                    continue;
                }

                // Items that left `approved` meanwhile do not consume the slot
                while let Some(item) = self.next_for_slot(&mut queue, previous_kind) {
                    match self.schedule_item(item.id, at) {
                        Ok(Placement::Assigned(assignment)) => {
                            previous_kind = Some(assignment.kind);
                            taken.insert(at, assignment.kind);
                            assignments.push(assignment);
                            break;
                        }
                        Ok(Placement::Gone) => {}
                        Ok(Placement::SlotTaken(kind)) => {
                            debug!(item_id = %item.id, %at, "Slot filled by another writer");
                            previous_kind = Some(kind);
                            taken.insert(at, kind);
                            requeue(&mut queue, item);
                            break;
                        }
                        Err(e) => {
                            warn!(item_id = %item.id, error = %e, "Could not schedule item; left for next pass");
                        }
                    }
                }
                if queue.is_empty() {
                    break;
                }
            }

            day = day + Duration::days(1);
        }

        assignments
    }

    /// Pick the next queued item, alternating photo/video when asked to.
    /// Falls back to the queue head rather than leaving a slot empty.
    fn next_for_slot(
        &self,
        queue: &mut VecDeque<ContentItem>,
        previous_kind: Option<ContentKind>,
    ) -> Option<ContentItem> {
        if self.policy.alternate_kinds {
            if let Some(wanted) = previous_kind.and_then(ContentKind::alternate) {
                if let Some(pos) = queue.iter().position(|i| i.kind == wanted) {
                    return queue.remove(pos);
                }
            }
        }
        queue.pop_front()
    }

    /// Commit `approved -> scheduled`, reloading on optimistic conflicts
    fn schedule_item(&self, id: Uuid, at: DateTime<Utc>) -> PipelineResult<Placement> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let current = self.store.get(id)?;
            if current.state != ContentState::Approved {
                debug!(item_id = %id, state = %current.state, "Item left the queue before scheduling");
                return Ok(Placement::Gone);
            }

            let mut next = current;
            next.state = ContentState::Scheduled;
            next.scheduled_for = Some(at);
            next.last_error = None;

            match self.store.commit_slot(next, "scheduler") {
                Ok(item) => {
                    debug!(item_id = %id, platform = %item.platform, %at, "Slot assigned");
                    return Ok(Placement::Assigned(Assignment {
                        item_id: item.id,
                        platform: item.platform,
                        kind: item.kind,
                        scheduled_for: at,
                    }));
                }
                Err(PipelineError::SlotTaken { kind, .. }) => return Ok(Placement::SlotTaken(kind)),
                Err(e) if e.is_conflict() && attempt < MAX_COMMIT_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Claim every due item for dispatch.
    ///
    /// Each claim re-checks the item's state under the journal lock, so an
    /// item rejected or claimed elsewhere after the scan started is never
    /// handed out.
    pub fn claim_due(&self) -> PipelineResult<Vec<DispatchClaim>> {
        self.store.refresh()?;
        let now = self.store.now();
        let mut due: Vec<ContentItem> = self
            .store
            .all()
            .into_iter()
            .filter(|i| i.is_due(now))
            .collect();
        due.sort_by_key(|i| i.scheduled_for);

        let mut claims = Vec::with_capacity(due.len());
        for item in due {
            match self.store.try_claim(item.id) {
                Ok(Some(claim)) => claims.push(claim),
                Ok(None) => {}
                Err(e) => warn!(item_id = %item.id, error = %e, "Could not claim due item"),
            }
        }

        debug!(claimed = claims.len(), "Due scan complete");
        Ok(claims)
    }

    /// Remind reviewers about items waiting longer than `after`, at most
    /// once per review cycle. Returns the number of reminders sent.
    pub async fn remind_reviewers(&self, notifier: &dyn Notifier, after: Duration) -> PipelineResult<usize> {
        let now = self.store.now();
        let stale: Vec<ContentItem> = self
            .store
            .all()
            .into_iter()
            .filter(|i| i.state.is_under_review() && i.reminded_at.is_none())
            .filter(|i| i.submitted_at.map_or(false, |at| at + after <= now))
            .collect();

        let mut sent = 0;
        for item in stale {
            let id = item.id;
            let mut next = item;
            next.reminded_at = Some(now);
            let item = match self
                .store
                .commit(next, TransitionKind::Reminded, "scheduler", None)
            {
                Ok(item) => item,
                // Someone acted on it meanwhile; skip until next pass
                Err(e) if e.is_conflict() => continue,
                Err(e) => {
                    warn!(item_id = %id, error = %e, "Could not record reminder");
                    continue;
                }
            };

            let waited = item
                .submitted_at
                .map(|at| (now - at).num_hours())
                .unwrap_or_default();
            let detail = format!("waiting for review for {}h", waited);
            if let Err(e) = notifier
                .notify(NotificationEvent::ReviewReminder, &item, &detail)
                .await
            {
                warn!(item_id = %item.id, error = %e, "Reminder notification failed");
            }
            sent += 1;
        }

        Ok(sent)
    }
}
