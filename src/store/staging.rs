// ABOUTME: Staging-side store access: raw records, transformed entities,
// ABOUTME: and the persisted validation error log

use crate::error::{Result, SyncError};
use crate::schema::EntityKind;
use crate::store::{ts_to_sql, Store};
use crate::transform::{Finding, TransformedEntity};
use crate::validate::FailureKind;
use chrono::{DateTime, Utc};
use rusqlite::params;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStatus {
    Pending,
    Transformed,
    ValidationError,
    Error,
}

impl RawStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawStatus::Pending => "pending",
            RawStatus::Transformed => "transformed",
            RawStatus::ValidationError => "validation_error",
            RawStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RawStatus::Pending),
            "transformed" => Some(RawStatus::Transformed),
            "validation_error" => Some(RawStatus::ValidationError),
            "error" => Some(RawStatus::Error),
            _ => None,
        }
    }
}

/// One staged payload as extracted from the source system. The entity kind
/// is kept as raw text; the transform stage parses it and treats an unknown
/// kind as batch-fatal.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub id: i64,
    pub entity_kind: String,
    pub source_id: String,
    pub batch_id: String,
    pub payload: serde_json::Value,
    pub captured_at: DateTime<Utc>,
    pub status: RawStatus,
    pub error_message: Option<String>,
    pub retry_count: i64,
}

#[derive(Debug, Clone)]
pub struct ValidationErrorRow {
    pub id: i64,
    pub batch_id: String,
    pub entity_kind: String,
    pub source_id: String,
    pub field: String,
    pub failure_kind: FailureKind,
    pub raw_value: Option<String>,
    pub blocking: bool,
    pub recorded_at: DateTime<Utc>,
}

impl Store {
    /// Stages one raw payload. Re-staging the same (kind, source id) within
    /// a batch keeps the last occurrence and resets it to pending.
    pub fn stage_raw_record(
        &self,
        kind: EntityKind,
        source_id: &str,
        batch_id: &str,
        payload: &serde_json::Value,
        captured_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO raw_records (entity_kind, source_id, batch_id, payload, captured_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (entity_kind, source_id, batch_id) DO UPDATE SET \
             payload = excluded.payload, captured_at = excluded.captured_at, \
             status = 'pending', error_message = NULL",
            params![
                kind.as_str(),
                source_id,
                batch_id,
                serde_json::to_string(payload)?,
                ts_to_sql(captured_at)
            ],
        )?;
        Ok(())
    }

    pub fn pending_raw_records(&self, batch_id: &str) -> Result<Vec<RawRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, entity_kind, source_id, batch_id, payload, captured_at, status, \
             error_message, retry_count FROM raw_records \
             WHERE batch_id = ?1 AND status = 'pending' ORDER BY id",
        )?;
        let rows = stmt.query_map(params![batch_id], map_raw_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn staged_record_count(&self, batch_id: &str) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM raw_records WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn mark_raw_transformed(&self, record_id: i64) -> Result<()> {
        self.set_raw_status(record_id, RawStatus::Transformed, None, false)
    }

    pub fn mark_raw_validation_error(&self, record_id: i64, message: &str) -> Result<()> {
        self.set_raw_status(record_id, RawStatus::ValidationError, Some(message), false)
    }

    pub fn mark_raw_error(&self, record_id: i64, message: &str) -> Result<()> {
        self.set_raw_status(record_id, RawStatus::Error, Some(message), true)
    }

    fn set_raw_status(
        &self,
        record_id: i64,
        status: RawStatus,
        message: Option<&str>,
        bump_retry: bool,
    ) -> Result<()> {
        let retry_bump = i64::from(bump_retry);
        let affected = self.conn().execute(
            "UPDATE raw_records SET status = ?1, error_message = ?2, \
             retry_count = retry_count + ?3 WHERE id = ?4",
            params![status.as_str(), message, retry_bump, record_id],
        )?;
        if affected == 0 {
            return Err(SyncError::BatchFatal(format!(
                "raw record {record_id} disappeared from staging"
            )));
        }
        Ok(())
    }

    /// The load stage holds entities, not staging row ids, so its status
    /// updates address records by batch and natural identity.
    pub fn mark_raw_error_by_key(
        &self,
        batch_id: &str,
        kind: EntityKind,
        source_id: &str,
        message: &str,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE raw_records SET status = 'error', error_message = ?1, \
             retry_count = retry_count + 1 \
             WHERE batch_id = ?2 AND entity_kind = ?3 AND source_id = ?4",
            params![message, batch_id, kind.as_str(), source_id],
        )?;
        Ok(())
    }

    pub fn mark_raw_validation_error_by_key(
        &self,
        batch_id: &str,
        kind: EntityKind,
        source_id: &str,
        message: &str,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE raw_records SET status = 'validation_error', error_message = ?1 \
             WHERE batch_id = ?2 AND entity_kind = ?3 AND source_id = ?4",
            params![message, batch_id, kind.as_str(), source_id],
        )?;
        Ok(())
    }

    /// Re-stages a failed batch's unprocessed records under a new batch.
    /// Records that already transformed cleanly and loaded are not copied;
    /// retry counts carry over.
    pub fn copy_unprocessed_raw(&self, from_batch: &str, to_batch: &str) -> Result<u64> {
        let copied = self.conn().execute(
            "INSERT INTO raw_records (entity_kind, source_id, batch_id, payload, captured_at, \
             status, error_message, retry_count) \
             SELECT entity_kind, source_id, ?2, payload, captured_at, 'pending', NULL, \
             retry_count FROM raw_records \
             WHERE batch_id = ?1 AND status IN ('pending', 'error')",
            params![from_batch, to_batch],
        )?;
        Ok(copied as u64)
    }

    pub fn insert_transformed(&self, entity: &TransformedEntity) -> Result<()> {
        self.conn().execute(
            "INSERT INTO transformed_entities (entity_kind, source_id, batch_id, modified_at, \
             entity) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (entity_kind, source_id, batch_id) DO UPDATE SET \
             modified_at = excluded.modified_at, entity = excluded.entity",
            params![
                entity.kind.as_str(),
                entity.source_id,
                entity.batch_id,
                ts_to_sql(entity.modified_at),
                serde_json::to_string(entity)?
            ],
        )?;
        Ok(())
    }

    /// Entities of one kind ready for loading, ordered by (modified_at,
    /// source_id) ascending so the newest version of a duplicate wins last.
    pub fn transformed_for_load(
        &self,
        batch_id: &str,
        kind: EntityKind,
    ) -> Result<Vec<TransformedEntity>> {
        let mut stmt = self.conn().prepare(
            "SELECT entity FROM transformed_entities \
             WHERE batch_id = ?1 AND entity_kind = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![batch_id, kind.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        let mut entities: Vec<TransformedEntity> = Vec::new();
        for row in rows {
            entities.push(serde_json::from_str(&row?)?);
        }
        entities.sort_by(|a, b| {
            (a.modified_at, a.source_id.as_str()).cmp(&(b.modified_at, b.source_id.as_str()))
        });
        Ok(entities)
    }

    pub fn record_findings(
        &self,
        batch_id: &str,
        kind: EntityKind,
        source_id: &str,
        findings: &[Finding],
    ) -> Result<()> {
        let now = ts_to_sql(Utc::now());
        let mut stmt = self.conn().prepare(
            "INSERT INTO validation_errors (batch_id, entity_kind, source_id, field, \
             failure_kind, raw_value, blocking, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for finding in findings {
            stmt.execute(params![
                batch_id,
                kind.as_str(),
                source_id,
                finding.field,
                finding.kind.as_str(),
                finding.value,
                i64::from(finding.blocking),
                now
            ])?;
        }
        Ok(())
    }

    pub fn validation_errors_for_batch(&self, batch_id: &str) -> Result<Vec<ValidationErrorRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, batch_id, entity_kind, source_id, field, failure_kind, raw_value, \
             blocking, recorded_at FROM validation_errors WHERE batch_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![batch_id], map_validation_row)?;
        let mut errors = Vec::new();
        for row in rows {
            errors.push(row?);
        }
        Ok(errors)
    }
}

fn map_raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    let payload_raw: String = row.get(4)?;
    let payload = serde_json::from_str(&payload_raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(err))
    })?;
    let status_raw: String = row.get(6)?;
    let status = RawStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown raw record status '{status_raw}'").into(),
        )
    })?;
    Ok(RawRecord {
        id: row.get(0)?,
        entity_kind: row.get(1)?,
        source_id: row.get(2)?,
        batch_id: row.get(3)?,
        payload,
        captured_at: parse_ts_column(row, 5)?,
        status,
        error_message: row.get(7)?,
        retry_count: row.get(8)?,
    })
}

fn map_validation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ValidationErrorRow> {
    let kind_raw: String = row.get(5)?;
    let failure_kind = FailureKind::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown failure kind '{kind_raw}'").into(),
        )
    })?;
    Ok(ValidationErrorRow {
        id: row.get(0)?,
        batch_id: row.get(1)?,
        entity_kind: row.get(2)?,
        source_id: row.get(3)?,
        field: row.get(4)?,
        failure_kind,
        raw_value: row.get(6)?,
        blocking: row.get::<_, i64>(7)? != 0,
        recorded_at: parse_ts_column(row, 8)?,
    })
}

fn parse_ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    crate::store::ts_from_sql(&raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}
