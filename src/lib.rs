//! Spaced-repetition stage tracking for practiced problems.
//!
//! Each (user, sheet, item) entry climbs a fixed ladder of review stages.
//! [`engine`] decides single transitions, [`tracker::Tracker`] runs them
//! against an [`store::EntryStore`] with optimistic per-entry versioning.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod store;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, Result, TrackerError};
pub use models::{
    EntryKey, MoveReason, MoveReport, Movement, ReviewEntry, SheetSummary, Stage, StageBoard,
    StageListing, StageSummary,
};
pub use store::{EntryStore, MemoryStore, SqliteStore};
pub use tracker::Tracker;
