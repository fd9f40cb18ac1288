// ABOUTME: Transform stage: drives staged records through the transformer
// ABOUTME: Persists clean entities, records findings, and settles the batch phase

use crate::batch::BatchTracker;
use crate::error::{Result, SyncError};
use crate::schema::{schema_for, EntityKind};
use crate::store::Store;
use crate::transform::entity::{Finding, TransformedEntity};
use crate::transform::transformer::transform_record;
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct TransformStats {
    pub records: u64,
    pub transformed: u64,
    pub blocked: u64,
    pub child_blocked: u64,
    pub duration_ms: u64,
}

pub struct TransformStage<'a> {
    store: &'a Store,
}

impl<'a> TransformStage<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Transforms every pending record in the batch. Per-record validation
    /// failures are recorded and skipped; an unknown entity kind in staging
    /// means the extraction contract is broken and fails the whole batch.
    pub fn run(&self, batch_id: &str) -> Result<TransformStats> {
        let started = Instant::now();
        let tracker = BatchTracker::new(self.store);
        tracker.begin_transform(batch_id)?;

        let records = self.store.pending_raw_records(batch_id)?;
        tracing::info!("Transforming batch {}: {} staged records", batch_id, records.len());

        let mut stats = TransformStats {
            records: records.len() as u64,
            ..TransformStats::default()
        };
        let mut misplaced_children: u64 = 0;

        for record in &records {
            let kind = match EntityKind::parse(&record.entity_kind) {
                Some(kind) => kind,
                None => {
                    let summary = format!(
                        "unknown entity kind '{}' in staging (record {})",
                        record.entity_kind, record.id
                    );
                    tracker.mark_failed(batch_id, &summary)?;
                    return Err(SyncError::UnknownKind(record.entity_kind.clone()));
                }
            };
            if kind.is_child() {
                self.store.mark_raw_error(
                    record.id,
                    "child kind staged at the top level; children arrive embedded in a policy detail",
                )?;
                misplaced_children += 1;
                continue;
            }

            let schema = schema_for(kind);
            let mut entity = transform_record(
                schema,
                &record.source_id,
                &record.payload,
                batch_id,
                record.captured_at,
            );

            if entity.is_blocked() {
                self.store
                    .record_findings(batch_id, kind, &record.source_id, &entity.findings)?;
                let summary = summarize_blocking(&entity.findings);
                tracing::warn!("{}/{} failed validation: {}", kind, record.source_id, summary);
                self.store.mark_raw_validation_error(record.id, &summary)?;
                stats.blocked += 1;
                continue;
            }

            // blocked children are dropped here; the parent still loads
            let children = std::mem::take(&mut entity.children);
            let (kept, dropped): (Vec<TransformedEntity>, Vec<TransformedEntity>) =
                children.into_iter().partition(|child| !child.is_blocked());
            entity.children = kept;
            for child in &dropped {
                self.store
                    .record_findings(batch_id, child.kind, &child.source_id, &child.findings)?;
                tracing::warn!(
                    "{}/{} embedded in {}/{} failed validation: {}",
                    child.kind,
                    child.source_id,
                    kind,
                    record.source_id,
                    summarize_blocking(&child.findings)
                );
                stats.child_blocked += 1;
            }

            if !entity.findings.is_empty() {
                self.store
                    .record_findings(batch_id, kind, &record.source_id, &entity.findings)?;
            }
            for child in &entity.children {
                if !child.findings.is_empty() {
                    self.store
                        .record_findings(batch_id, child.kind, &child.source_id, &child.findings)?;
                }
            }

            self.store.insert_transformed(&entity)?;
            self.store.mark_raw_transformed(record.id)?;
            stats.transformed += 1;
        }

        let new_errors = stats.blocked + stats.child_blocked + misplaced_children;
        tracker.mark_transformed(batch_id, stats.transformed, new_errors)?;
        stats.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Transform finished for batch {}: {} transformed, {} blocked in {}ms",
            batch_id,
            stats.transformed,
            stats.blocked,
            stats.duration_ms
        );
        Ok(stats)
    }
}

fn summarize_blocking(findings: &[Finding]) -> String {
    let parts: Vec<String> = findings
        .iter()
        .filter(|f| f.blocking)
        .map(|f| format!("{}: {}", f.field, f.kind))
        .collect();
    parts.join("; ")
}
