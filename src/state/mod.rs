//! State management module for the Keel reconciliation engine.
//!
//! This module provides persistent storage of the last-applied state of every
//! managed resource, advisory locking, and run history.

mod ledger;
mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use ledger::StateLedger;
pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, LockLease, generate_holder_id};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{AppliedState, HistoryEntry, MAX_HISTORY, RunKind, STATE_VERSION, StateDocument};
