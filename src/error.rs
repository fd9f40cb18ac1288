// ABOUTME: Error taxonomy for the sync engine
// ABOUTME: Storage faults, batch lifecycle violations, and batch-fatal conditions

use crate::batch::BatchPhase;
use crate::schema::EntityKind;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sqlite error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown entity kind '{0}'")]
    UnknownKind(String),

    #[error("batch {0} not found")]
    BatchNotFound(String),

    #[error("batch {batch_id}: invalid phase transition {from} -> {to}")]
    InvalidTransition {
        batch_id: String,
        from: BatchPhase,
        to: BatchPhase,
    },

    #[error("batch {batch_id} is in phase {phase} and cannot be retried")]
    NotRetryable { batch_id: String, phase: BatchPhase },

    #[error("sync window start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("cannot parse '{0}' as a window bound (expected RFC 3339 or YYYY-MM-DD)")]
    BadWindowBound(String),

    #[error("entity {kind}/{source_id} is missing natural key column '{column}'")]
    MissingNaturalKey {
        kind: EntityKind,
        source_id: String,
        column: String,
    },

    #[error("store schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },

    #[error("{0}")]
    BatchFatal(String),
}
