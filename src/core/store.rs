//! Content store: the single source of truth for content items.
//!
//! Every committed change is appended to a newline-delimited JSON journal
//! (one `TransitionRecord` per line, carrying a full snapshot). Opening a
//! store replays the journal; the last snapshot per item wins.
//!
//! Transitions are serialized per item with an optimistic version check:
//! a commit built from a stale snapshot fails with `ConcurrentModification`.
//! Items handed to the dispatcher carry a `ClaimLease` written to the
//! journal; while it is active, only the holder of the `DispatchClaim` may
//! change the item's state, whichever process the other writer runs in.

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{
    ClaimLease, ContentItem, ContentState, Platform, TransitionKind, TransitionRecord,
};

use super::clock::Clock;
use super::error::{PipelineError, PipelineResult};

/// Default lifetime of a dispatch lease
pub const DEFAULT_CLAIM_LEASE_SECS: i64 = 900;

const DISPATCH_ACTOR: &str = "dispatcher";

/// Versioned, journal-backed content store
pub struct ContentStore {
    state: Mutex<StoreState>,

    /// Path to the content.jsonl journal (None for in-memory stores)
    journal_path: Option<PathBuf>,

    clock: Arc<dyn Clock>,

    /// Identifies this handle in the leases it takes
    handle_id: Uuid,

    claim_lease: Duration,
}

#[derive(Default)]
struct StoreState {
    items: HashMap<Uuid, ContentItem>,
    by_source: HashMap<String, Uuid>,
    history: Vec<TransitionRecord>,
    /// Bytes of the journal already applied
    journal_offset: u64,
}

impl StoreState {
    fn apply(&mut self, record: TransitionRecord) {
        let snapshot = record.snapshot.clone();
        if let Some(ref hash) = snapshot.source_hash {
            self.by_source.insert(hash.clone(), snapshot.id);
        }
        self.items.insert(snapshot.id, snapshot);
        self.history.push(record);
    }
}

/// What a commit does to the item's dispatch lease
enum LeaseChange {
    /// Carry the stored lease over; refuse state changes while it is active
    Keep,
    /// Take a new lease
    Take(ClaimLease),
    /// Drop the lease with this id, which the committer must hold
    Clear(Uuid),
}

impl ContentStore {
    /// Create a store that keeps nothing on disk
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            journal_path: None,
            clock,
            handle_id: Uuid::new_v4(),
            claim_lease: Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
        }
    }

    /// Open (or create) a journal-backed store and replay its history
    pub fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> PipelineResult<Self> {
        let journal_path = path.into();
        if let Some(parent) = journal_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let store = Self {
            state: Mutex::new(StoreState::default()),
            journal_path: Some(journal_path.clone()),
            clock,
            handle_id: Uuid::new_v4(),
            claim_lease: Duration::seconds(DEFAULT_CLAIM_LEASE_SECS),
        };
        let replayed = store.refresh()?;

        debug!(
            path = %journal_path.display(),
            records = replayed,
            "Content journal replayed"
        );
        Ok(store)
    }

    /// How long a dispatch lease holds off other sweeps and writers
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Apply journal records appended by other processes.
    /// Returns the number of records applied.
    pub fn refresh(&self) -> PipelineResult<usize> {
        let mut state = self.lock();
        let before = state.history.len();
        if let Some(file) = self.lock_journal(&mut state)? {
            let _ = file.unlock();
        }
        Ok(state.history.len() - before)
    }

    /// Get the journal path, if any
    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The store's clock
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock the journal exclusively and catch up on records written since
    /// our last read. The returned file stays locked until `append` or drop.
    fn lock_journal(&self, state: &mut StoreState) -> PipelineResult<Option<File>> {
        let Some(ref path) = self.journal_path else {
            return Ok(None);
        };

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        file.lock_exclusive()?;

        if let Err(e) = catch_up(&mut file, state) {
            let _ = file.unlock();
            return Err(e);
        }
        Ok(Some(file))
    }

    /// Append a record to the locked journal, then apply it in memory
    fn append(
        &self,
        state: &mut StoreState,
        journal: Option<File>,
        record: TransitionRecord,
    ) -> PipelineResult<()> {
        if let Some(mut file) = journal {
            let line = format!("{}\n", serde_json::to_string(&record)?);
            let written = file
                .write_all(line.as_bytes())
                .and_then(|_| file.flush());
            let _ = file.unlock();
            written?;
            state.journal_offset += line.len() as u64;
        }
        state.apply(record);
        Ok(())
    }

    /// Store a newly created item (version 1).
    ///
    /// Fails with `DuplicateSource` when an item with the same source hash
    /// already exists.
    pub fn insert(&self, mut item: ContentItem, actor: &str, note: Option<&str>) -> PipelineResult<ContentItem> {
        let mut state = self.lock();
        let journal = self.lock_journal(&mut state)?;

        if state.items.contains_key(&item.id) {
            return Err(PipelineError::AlreadyExists(item.id));
        }
        if let Some(ref hash) = item.source_hash {
            if let Some(existing) = state.by_source.get(hash) {
                return Err(PipelineError::DuplicateSource(*existing));
            }
        }

        let now = self.clock.now();
        item.version = 1;
        item.created_at = now;
        item.updated_at = now;

        let mut record = TransitionRecord::new(TransitionKind::Created, None, actor, item.clone());
        if let Some(note) = note {
            record = record.with_note(note);
        }
        self.append(&mut state, journal, record)?;

        Ok(item)
    }

    /// Commit a modified snapshot.
    ///
    /// `item.version` must equal the stored version. While the item holds an
    /// active dispatch lease, commits that change its state are refused.
    pub fn commit(
        &self,
        item: ContentItem,
        kind: TransitionKind,
        actor: &str,
        note: Option<&str>,
    ) -> PipelineResult<ContentItem> {
        let mut state = self.lock();
        let journal = self.lock_journal(&mut state)?;
        self.commit_journaled(&mut state, journal, item, kind, actor, note, LeaseChange::Keep)
    }

    /// Commit `approved -> scheduled` unless another item on the same
    /// platform already holds the slot. The check runs under the journal
    /// lock, after catching up on other writers.
    pub fn commit_slot(&self, item: ContentItem, actor: &str) -> PipelineResult<ContentItem> {
        let mut state = self.lock();
        let journal = self.lock_journal(&mut state)?;

        if let Some(at) = item.scheduled_for {
            let holder = state.items.values().find(|other| {
                other.id != item.id
                    && other.platform == item.platform
                    && other.state == ContentState::Scheduled
                    && other.scheduled_for == Some(at)
            });
            if let Some(holder) = holder {
                return Err(PipelineError::SlotTaken {
                    platform: item.platform,
                    at,
                    kind: holder.kind,
                });
            }
        }

        self.commit_journaled(
            &mut state,
            journal,
            item,
            TransitionKind::Scheduled,
            actor,
            None,
            LeaseChange::Keep,
        )
    }

    /// Commit the outcome of a dispatch and clear the lease in the same
    /// record.
    pub fn commit_claimed(
        &self,
        claim: &mut DispatchClaim,
        item: ContentItem,
        kind: TransitionKind,
        actor: &str,
        note: Option<&str>,
    ) -> PipelineResult<ContentItem> {
        if claim.released || claim.item.id != item.id {
            return Err(PipelineError::ConcurrentModification {
                id: item.id,
                detail: "dispatch claim does not cover this item".to_string(),
            });
        }

        let mut state = self.lock();
        let journal = self.lock_journal(&mut state)?;
        let committed = self.commit_journaled(
            &mut state,
            journal,
            item,
            kind,
            actor,
            note,
            LeaseChange::Clear(claim.lease.id),
        )?;
        claim.released = true;

        Ok(committed)
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_journaled(
        &self,
        state: &mut StoreState,
        journal: Option<File>,
        mut item: ContentItem,
        kind: TransitionKind,
        actor: &str,
        note: Option<&str>,
        lease: LeaseChange,
    ) -> PipelineResult<ContentItem> {
        let now = self.clock.now();
        let current = state
            .items
            .get(&item.id)
            .ok_or(PipelineError::NotFound(item.id))?;

        if current.version != item.version {
            return Err(PipelineError::ConcurrentModification {
                id: item.id,
                detail: format!(
                    "expected version {}, found {}",
                    item.version, current.version
                ),
            });
        }

        match lease {
            LeaseChange::Keep => {
                if current.is_claimed(now) && item.state != current.state {
                    return Err(PipelineError::ConcurrentModification {
                        id: item.id,
                        detail: "a publish attempt is in flight".to_string(),
                    });
                }
                item.claim = current.claim.clone();
            }
            LeaseChange::Take(taken) => item.claim = Some(taken),
            LeaseChange::Clear(lease_id) => {
                if current.claim.as_ref().map(|l| l.id) != Some(lease_id) {
                    return Err(PipelineError::ConcurrentModification {
                        id: item.id,
                        detail: "dispatch lease is no longer held".to_string(),
                    });
                }
                item.claim = None;
            }
        }

        let from = current.state;
        item.version += 1;
        item.updated_at = now;

        let mut record = TransitionRecord::new(kind, Some(from), actor, item.clone());
        if let Some(note) = note {
            record = record.with_note(note);
        }
        self.append(state, journal, record)?;

        Ok(item)
    }

    /// Take a dispatch lease on a due item.
    ///
    /// The lease is a journal record, so every handle on the journal sees
    /// it. Returns `None` when the item is no longer due (rejected,
    /// rescheduled, held) or an unexpired lease is already out on it.
    pub fn try_claim(self: &Arc<Self>, id: Uuid) -> PipelineResult<Option<DispatchClaim>> {
        let now = self.clock.now();
        let mut state = self.lock();
        let journal = self.lock_journal(&mut state)?;

        let current = state.items.get(&id).ok_or(PipelineError::NotFound(id))?;
        if !current.is_due(now) || current.is_claimed(now) {
            return Ok(None);
        }

        let lease = ClaimLease {
            id: Uuid::new_v4(),
            holder: self.handle_id,
            expires_at: now + self.claim_lease,
        };
        let item = current.clone();
        let item = self.commit_journaled(
            &mut state,
            journal,
            item,
            TransitionKind::Claimed,
            DISPATCH_ACTOR,
            None,
            LeaseChange::Take(lease.clone()),
        )?;

        Ok(Some(DispatchClaim {
            store: Arc::clone(self),
            item,
            lease,
            released: false,
        }))
    }

    /// Give a lease back without an outcome
    fn release_claim(&self, id: Uuid, lease_id: Uuid) -> PipelineResult<()> {
        let mut state = self.lock();
        let journal = self.lock_journal(&mut state)?;

        let Some(current) = state.items.get(&id) else {
            return Ok(());
        };
        if current.claim.as_ref().map(|l| l.id) != Some(lease_id) {
            return Ok(());
        }

        let item = current.clone();
        self.commit_journaled(
            &mut state,
            journal,
            item,
            TransitionKind::ClaimReleased,
            DISPATCH_ACTOR,
            None,
            LeaseChange::Clear(lease_id),
        )?;
        Ok(())
    }

    /// Is a publish attempt in flight for this item, as far as this handle
    /// has read the journal?
    pub fn is_in_flight(&self, id: Uuid) -> bool {
        let now = self.clock.now();
        self.lock()
            .items
            .get(&id)
            .map_or(false, |item| item.is_claimed(now))
    }

    /// Get an item by ID
    pub fn get(&self, id: Uuid) -> PipelineResult<ContentItem> {
        self.lock()
            .items
            .get(&id)
            .cloned()
            .ok_or(PipelineError::NotFound(id))
    }

    /// Find the item ingested from a given source hash
    pub fn find_by_source(&self, source_hash: &str) -> Option<ContentItem> {
        let state = self.lock();
        state
            .by_source
            .get(source_hash)
            .and_then(|id| state.items.get(id))
            .cloned()
    }

    /// All items, oldest first
    pub fn all(&self) -> Vec<ContentItem> {
        let mut items: Vec<ContentItem> = self.lock().items.values().cloned().collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        items
    }

    /// Filtered listing, newest first
    pub fn list(&self, filter: &ListFilter) -> Vec<ContentItem> {
        let mut items: Vec<ContentItem> = self
            .lock()
            .items
            .values()
            .filter(|i| filter.state.map_or(true, |s| i.state == s))
            .filter(|i| filter.platform.map_or(true, |p| i.platform == p))
            .cloned()
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        items
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect()
    }

    /// Audit history of one item, in commit order
    pub fn history(&self, id: Uuid) -> Vec<TransitionRecord> {
        self.lock()
            .history
            .iter()
            .filter(|r| r.item_id == id)
            .cloned()
            .collect()
    }

    /// Count of items per state
    pub fn status(&self) -> StoreStatus {
        let now = self.clock.now();
        let state = self.lock();
        let mut status = StoreStatus::default();
        for item in state.items.values() {
            *status.counts.entry(item.state).or_insert(0) += 1;
            if item.is_claimed(now) {
                status.in_flight += 1;
            }
        }
        status
    }
}

/// Read journal lines past `state.journal_offset` and apply them
fn catch_up(file: &mut File, state: &mut StoreState) -> PipelineResult<()> {
    file.seek(SeekFrom::Start(state.journal_offset))?;
    let mut reader = BufReader::new(file);
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        state.journal_offset += read as u64;
        if line.trim().is_empty() {
            continue;
        }
        let record: TransitionRecord = serde_json::from_str(line.trim())?;
        state.apply(record);
    }
    Ok(())
}

/// Proof that this handle holds the dispatch lease on an item.
///
/// The lease is cleared exactly once: by `commit_claimed` in the outcome
/// record, or by a `ClaimReleased` record on drop if the publish attempt
/// never got that far. A lease that cannot be released expires on its own.
pub struct DispatchClaim {
    store: Arc<ContentStore>,
    item: ContentItem,
    lease: ClaimLease,
    released: bool,
}

impl DispatchClaim {
    /// Snapshot taken when the claim was made
    pub fn item(&self) -> &ContentItem {
        &self.item
    }

    pub fn id(&self) -> Uuid {
        self.item.id
    }

    pub fn lease(&self) -> &ClaimLease {
        &self.lease
    }
}

impl Drop for DispatchClaim {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.release_claim(self.item.id, self.lease.id) {
            warn!(
                item_id = %self.item.id,
                expires_at = %self.lease.expires_at,
                error = %e,
                "Failed to release dispatch lease; it will expire"
            );
        }
    }
}

impl std::fmt::Debug for DispatchClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchClaim")
            .field("item", &self.item.id)
            .field("lease", &self.lease.id)
            .field("released", &self.released)
            .finish()
    }
}

/// Listing filter
#[derive(Debug, Clone)]
pub struct ListFilter {
    pub state: Option<ContentState>,
    pub platform: Option<Platform>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            state: None,
            platform: None,
            limit: 25,
            offset: 0,
        }
    }
}

/// Store summary
#[derive(Debug, Clone, Default)]
pub struct StoreStatus {
    pub counts: BTreeMap<ContentState, usize>,
    pub in_flight: usize,
}

impl StoreStatus {
    pub fn count(&self, state: ContentState) -> usize {
        self.counts.get(&state).copied().unwrap_or(0)
    }

    /// Total items in the store
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}
