// ABOUTME: Library interface for the agency-sync transform and load engine
// ABOUTME: Re-exports the pipeline types commands and tests build on

pub mod batch;
pub mod commands;
pub mod config;
pub mod error;
pub mod schema;
pub mod store;
pub mod sync;
pub mod transform;
pub mod validate;
pub mod window;

pub use batch::{BatchPhase, BatchRecord, BatchTracker};
pub use error::SyncError;
pub use schema::{load_order, schema_for, EntityKind, EntitySchema};
pub use store::Store;
pub use sync::{admit, CancelToken, Decision, LoadOutcome, LoadStage, LoadStats, SkipReason, SyncResolver};
pub use transform::{transform_record, Finding, TransformStage, TransformStats, TransformedEntity};
pub use validate::FailureKind;
pub use window::SyncWindow;
