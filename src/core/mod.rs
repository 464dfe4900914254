//! Core pipeline logic.
//!
//! This module contains:
//! - ContentStore: versioned, journal-backed item storage
//! - Intake: scraped candidates and AI drafts
//! - ReviewGate: the approval state machine
//! - Scheduler: cadence slots and due-item scanning
//! - Dispatcher: publishing with retry
//! - Engine: wiring and the sweep loop

pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod intake;
pub mod review;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{BackoffStrategy, Dispatcher, PublishOutcome, RetryPolicy, SweepReport};
pub use engine::Engine;
pub use error::{PipelineError, PipelineResult};
pub use intake::{create_draft, ingest, source_hash, IngestOutcome, ScrapedCandidate};
pub use review::ReviewGate;
pub use scheduler::{Assignment, CadencePolicy, Scheduler, SlotTime};
pub use store::{ContentStore, DispatchClaim, ListFilter, StoreStatus};
