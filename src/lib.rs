//! maestro - Social content review, scheduling and publishing
//!
//! Content moves from a scraper or an AI drafter through a human review
//! gate, gets a publish slot from a cadence-based scheduler, and is
//! delivered by a dispatcher that retries transient platform failures.
//!
//! # Architecture
//!
//! Every state change is a versioned commit against the content store:
//! - Commits built from a stale snapshot are refused
//! - Each commit is appended to a JSONL journal with a full snapshot
//! - Items being published carry a dispatch lease in the journal, so no
//!   other sweep or rejection, in this process or another, can race a publish
//!
//! # Modules
//!
//! - `adapters`: External collaborators (publishers, notifier, Fabric, auth)
//! - `core`: Store, review gate, scheduler, dispatcher, engine
//! - `domain`: Data structures (ContentItem, TransitionRecord, Reviewer)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Feed a scraped post in and send it to review
//! echo "Golden hour at the harbour" | maestro ingest https://example.com/p/1 -p instagram -k photo
//! maestro submit <id>
//!
//! # Approve and let the scheduler assign a slot
//! maestro approve <id> --reviewer alice
//!
//! # Publish everything that is due
//! maestro sweep
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{ContentStore, Dispatcher, Engine, PipelineError, ReviewGate, Scheduler};
pub use domain::{ContentItem, ContentKind, ContentState, Platform, TransitionRecord};
