// ABOUTME: Batch lifecycle state machine and its persistence in sync_batches
// ABOUTME: Failed batches are terminal; retries spawn a new linked batch

use crate::error::{Result, SyncError};
use crate::store::{ts_from_sql, ts_to_sql, Store};
use crate::window::SyncWindow;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Created,
    Extracting,
    Extracted,
    Transforming,
    Transformed,
    Loading,
    Completed,
    Failed,
}

impl BatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchPhase::Created => "created",
            BatchPhase::Extracting => "extracting",
            BatchPhase::Extracted => "extracted",
            BatchPhase::Transforming => "transforming",
            BatchPhase::Transformed => "transformed",
            BatchPhase::Loading => "loading",
            BatchPhase::Completed => "completed",
            BatchPhase::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(BatchPhase::Created),
            "extracting" => Some(BatchPhase::Extracting),
            "extracted" => Some(BatchPhase::Extracted),
            "transforming" => Some(BatchPhase::Transforming),
            "transformed" => Some(BatchPhase::Transformed),
            "loading" => Some(BatchPhase::Loading),
            "completed" => Some(BatchPhase::Completed),
            "failed" => Some(BatchPhase::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchPhase::Completed | BatchPhase::Failed)
    }

    /// The forward chain advances one phase at a time; any non-terminal
    /// phase may fall to Failed.
    pub fn can_transition_to(self, next: BatchPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == BatchPhase::Failed {
            return true;
        }
        matches!(
            (self, next),
            (BatchPhase::Created, BatchPhase::Extracting)
                | (BatchPhase::Extracting, BatchPhase::Extracted)
                | (BatchPhase::Extracted, BatchPhase::Transforming)
                | (BatchPhase::Transforming, BatchPhase::Transformed)
                | (BatchPhase::Transformed, BatchPhase::Loading)
                | (BatchPhase::Loading, BatchPhase::Completed)
        )
    }
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub batch_id: String,
    pub phase: BatchPhase,
    pub window: SyncWindow,
    pub extracted_count: u64,
    pub transformed_count: u64,
    pub loaded_count: u64,
    pub skipped_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub retry_of: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const BATCH_COLUMNS: &str = "batch_id, phase, window_start, window_end, extracted_count, \
     transformed_count, loaded_count, skipped_count, error_count, last_error, retry_of, \
     created_at, updated_at";

pub struct BatchTracker<'a> {
    store: &'a Store,
}

impl<'a> BatchTracker<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    pub fn create(&self, window: SyncWindow, retry_of: Option<&str>) -> Result<BatchRecord> {
        let batch_id = Uuid::new_v4().to_string();
        let now = ts_to_sql(Utc::now());
        self.store.conn().execute(
            "INSERT INTO sync_batches (batch_id, phase, window_start, window_end, last_error, \
             retry_of, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6, ?6)",
            params![
                batch_id,
                BatchPhase::Created.as_str(),
                ts_to_sql(window.start),
                ts_to_sql(window.end),
                retry_of,
                now
            ],
        )?;
        tracing::info!("Created batch {} over window {}", batch_id, window);
        self.get(&batch_id)
    }

    pub fn get(&self, batch_id: &str) -> Result<BatchRecord> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM sync_batches WHERE batch_id = ?1");
        self.store
            .conn()
            .query_row(&sql, params![batch_id], map_batch_row)
            .optional()?
            .ok_or_else(|| SyncError::BatchNotFound(batch_id.to_string()))
    }

    pub fn list_recent(&self, limit: u32) -> Result<Vec<BatchRecord>> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM sync_batches ORDER BY created_at DESC, batch_id DESC \
             LIMIT ?1"
        );
        let mut stmt = self.store.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![limit], map_batch_row)?;
        let mut batches = Vec::new();
        for row in rows {
            batches.push(row?);
        }
        Ok(batches)
    }

    pub fn latest_in_phase(&self, phase: BatchPhase) -> Result<Option<BatchRecord>> {
        let sql = format!(
            "SELECT {BATCH_COLUMNS} FROM sync_batches WHERE phase = ?1 \
             ORDER BY created_at DESC, batch_id DESC LIMIT 1"
        );
        Ok(self
            .store
            .conn()
            .query_row(&sql, params![phase.as_str()], map_batch_row)
            .optional()?)
    }

    pub fn begin_extract(&self, batch_id: &str) -> Result<BatchRecord> {
        self.transition(batch_id, BatchPhase::Extracting)
    }

    pub fn mark_extracted(&self, batch_id: &str, extracted: u64) -> Result<BatchRecord> {
        let current = self.get(batch_id)?;
        self.ensure(&current, BatchPhase::Extracted)?;
        self.store.conn().execute(
            "UPDATE sync_batches SET phase = ?1, extracted_count = ?2, updated_at = ?3 \
             WHERE batch_id = ?4",
            params![
                BatchPhase::Extracted.as_str(),
                extracted as i64,
                ts_to_sql(Utc::now()),
                batch_id
            ],
        )?;
        self.get(batch_id)
    }

    pub fn begin_transform(&self, batch_id: &str) -> Result<BatchRecord> {
        self.transition(batch_id, BatchPhase::Transforming)
    }

    pub fn mark_transformed(
        &self,
        batch_id: &str,
        transformed: u64,
        new_errors: u64,
    ) -> Result<BatchRecord> {
        let current = self.get(batch_id)?;
        self.ensure(&current, BatchPhase::Transformed)?;
        self.store.conn().execute(
            "UPDATE sync_batches SET phase = ?1, transformed_count = ?2, \
             error_count = error_count + ?3, updated_at = ?4 WHERE batch_id = ?5",
            params![
                BatchPhase::Transformed.as_str(),
                transformed as i64,
                new_errors as i64,
                ts_to_sql(Utc::now()),
                batch_id
            ],
        )?;
        self.get(batch_id)
    }

    pub fn begin_load(&self, batch_id: &str) -> Result<BatchRecord> {
        self.transition(batch_id, BatchPhase::Loading)
    }

    /// Settles the load counters without touching the phase, so the failure
    /// and cancellation paths can record partial progress.
    pub fn add_load_counts(
        &self,
        batch_id: &str,
        loaded: u64,
        skipped: u64,
        new_errors: u64,
    ) -> Result<()> {
        let affected = self.store.conn().execute(
            "UPDATE sync_batches SET loaded_count = ?1, skipped_count = ?2, \
             error_count = error_count + ?3, updated_at = ?4 WHERE batch_id = ?5",
            params![
                loaded as i64,
                skipped as i64,
                new_errors as i64,
                ts_to_sql(Utc::now()),
                batch_id
            ],
        )?;
        if affected == 0 {
            return Err(SyncError::BatchNotFound(batch_id.to_string()));
        }
        Ok(())
    }

    pub fn mark_loaded(&self, batch_id: &str) -> Result<BatchRecord> {
        self.transition(batch_id, BatchPhase::Completed)
    }

    pub fn mark_failed(&self, batch_id: &str, summary: &str) -> Result<BatchRecord> {
        let current = self.get(batch_id)?;
        self.ensure(&current, BatchPhase::Failed)?;
        self.store.conn().execute(
            "UPDATE sync_batches SET phase = ?1, last_error = ?2, updated_at = ?3 \
             WHERE batch_id = ?4",
            params![
                BatchPhase::Failed.as_str(),
                summary,
                ts_to_sql(Utc::now()),
                batch_id
            ],
        )?;
        tracing::warn!("Batch {} failed: {}", batch_id, summary);
        self.get(batch_id)
    }

    /// Spawns a fresh batch linked to a failed one. The window defaults to
    /// the failed batch's window but may be re-supplied.
    pub fn retry(&self, batch_id: &str, window: Option<SyncWindow>) -> Result<BatchRecord> {
        let failed = self.get(batch_id)?;
        if failed.phase != BatchPhase::Failed {
            return Err(SyncError::NotRetryable {
                batch_id: batch_id.to_string(),
                phase: failed.phase,
            });
        }
        self.create(window.unwrap_or(failed.window), Some(batch_id))
    }

    fn transition(&self, batch_id: &str, next: BatchPhase) -> Result<BatchRecord> {
        let current = self.get(batch_id)?;
        self.ensure(&current, next)?;
        self.store.conn().execute(
            "UPDATE sync_batches SET phase = ?1, updated_at = ?2 WHERE batch_id = ?3",
            params![next.as_str(), ts_to_sql(Utc::now()), batch_id],
        )?;
        self.get(batch_id)
    }

    fn ensure(&self, current: &BatchRecord, next: BatchPhase) -> Result<()> {
        if !current.phase.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                batch_id: current.batch_id.clone(),
                from: current.phase,
                to: next,
            });
        }
        Ok(())
    }
}

fn map_batch_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BatchRecord> {
    let phase_raw: String = row.get(1)?;
    let phase = BatchPhase::parse(&phase_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown batch phase '{phase_raw}'").into(),
        )
    })?;
    let start = parse_ts_column(row, 2)?;
    let end = parse_ts_column(row, 3)?;
    Ok(BatchRecord {
        batch_id: row.get(0)?,
        phase,
        window: SyncWindow { start, end },
        extracted_count: row.get::<_, i64>(4)? as u64,
        transformed_count: row.get::<_, i64>(5)? as u64,
        loaded_count: row.get::<_, i64>(6)? as u64,
        skipped_count: row.get::<_, i64>(7)? as u64,
        error_count: row.get::<_, i64>(8)? as u64,
        last_error: row.get(9)?,
        retry_of: row.get(10)?,
        created_at: parse_ts_column(row, 11)?,
        updated_at: parse_ts_column(row, 12)?,
    })
}

fn parse_ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    ts_from_sql(&raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}
