//! # Seismonet Event Store
//!
//! Append-only catalog of classified events:
//! - a length-prefixed JSON log with a leading `{magic, version, schema_id}`
//!   header record and a per-record content digest
//! - an id index (event id -> log offset) and a time index
//!   ((trigger instant, event id) -> log offset), both rebuilt by scanning
//!   the log on open
//! - a live tail: subscribers resume from a monotonic storage-id cursor
//!   and then follow a broadcast channel; storage ids are assigned at
//!   append and survive compaction, so held cursors never silently skip
//!   events when the log is rewritten
//!
//! Durability: an acknowledged append survives process restart. `per_write`
//! fsyncs on every append; `periodic` bounds data loss to the sync
//! interval. A torn trailing record is truncated on open with a warning;
//! corruption anywhere else is fatal (exit code 2 taxonomy).

pub mod log;
pub mod query;
pub mod store;

pub use query::{EventFilter, StoreStats};
pub use store::{EventStore, FsyncPolicy, StoreConfig, Tail};
