//! Core domain model, identity tracking and reconciliation for devbot.
//!
//! Nothing in this crate performs I/O. Fetching, persistence and
//! notification delivery live in the adapter crates and feed snapshots in
//! and take actions out.

pub mod identity;
pub mod message;
pub mod permit;
pub mod reconcile;
pub mod record;
pub mod rezoning;

pub use identity::{annotate, assign_guid, history_summary, most_recent_timestamp, update_history};
pub use message::FeedEntry;
pub use permit::DevelopmentPermit;
pub use reconcile::{apply_manual_closures, derive_actions, find_by_key, find_by_key_mut, upsert, Action, ActionKind};
pub use record::{Point, RecordKind, StateChange, TrackedRecord, Tracking, UnknownRecordKind};
pub use rezoning::{Multipoint, RezoningApplication};

pub const CRATE_NAME: &str = "devbot-core";
