// ABOUTME: Load stage: applies transformed entities in dependency order
// ABOUTME: Resolves references, honors cancellation, and settles the batch

use crate::batch::{BatchPhase, BatchTracker};
use crate::error::Result;
use crate::schema::{load_order, schema_for, EntityKind};
use crate::store::{production, Store};
use crate::sync::resolver::{LoadOutcome, SyncResolver};
use crate::transform::{Finding, TransformedEntity};
use crate::validate::FailureKind;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared cancellation flag. Cloning hands out another handle to the same
/// flag, so a signal handler or another thread can stop an in-flight load.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    pub loaded: u64,
    pub skipped: u64,
    pub unresolved: u64,
    pub errors: Vec<String>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

enum Resolution {
    Resolved(BTreeMap<String, String>),
    Unresolved(Finding),
}

pub struct LoadStage<'a> {
    store: &'a Store,
    cancel: CancelToken,
}

impl<'a> LoadStage<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store, cancel: CancelToken::new() }
    }

    pub fn with_cancel(store: &'a Store, cancel: CancelToken) -> Self {
        Self { store, cancel }
    }

    /// Loads a transformed batch into production, one entity kind at a time
    /// in dependency order. Entity-level failures are recorded and skipped;
    /// any application error leaves the batch failed at the end of the run.
    pub fn run(&self, batch_id: &str, kinds: Option<&[EntityKind]>) -> Result<LoadStats> {
        let started = Instant::now();
        let tracker = BatchTracker::new(self.store);
        let batch = tracker.begin_load(batch_id)?;
        let resolver = SyncResolver::new(self.store, batch.window);
        let mut stats = LoadStats::default();

        'kinds: for kind in load_order() {
            if kind.is_child() {
                // children load inside their parent detail
                continue;
            }
            if let Some(filter) = kinds {
                if !filter.contains(&kind) {
                    continue;
                }
            }
            let entities = self.store.transformed_for_load(batch_id, kind)?;
            if entities.is_empty() {
                continue;
            }
            tracing::info!("Loading {} {} entities", entities.len(), kind);
            for entity in &entities {
                if self.should_stop(&tracker, batch_id)? {
                    stats.cancelled = true;
                    break 'kinds;
                }
                self.apply_entity(&resolver, batch_id, kind, entity, &mut stats)?;
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        let new_errors = stats.unresolved + stats.errors.len() as u64;
        tracker.add_load_counts(batch_id, stats.loaded, stats.skipped, new_errors)?;
        if stats.cancelled {
            if tracker.get(batch_id)?.phase != BatchPhase::Failed {
                tracker.mark_failed(batch_id, "load cancelled before completion")?;
            }
        } else if stats.errors.is_empty() {
            tracker.mark_loaded(batch_id)?;
        } else {
            let summary = format!(
                "{} entities failed to apply; first: {}",
                stats.errors.len(),
                stats.errors[0]
            );
            tracker.mark_failed(batch_id, &summary)?;
        }
        tracing::info!(
            "Load finished for batch {}: {} loaded, {} skipped, {} errors in {}ms",
            batch_id,
            stats.loaded,
            stats.skipped,
            new_errors,
            stats.duration_ms
        );
        Ok(stats)
    }

    /// Stops between entities when the in-process token fires or when the
    /// persisted phase was externally moved to failed (cross-process cancel).
    fn should_stop(&self, tracker: &BatchTracker<'_>, batch_id: &str) -> Result<bool> {
        if self.cancel.is_cancelled() {
            tracing::warn!("Cancellation requested; stopping load of batch {}", batch_id);
            return Ok(true);
        }
        if tracker.get(batch_id)?.phase == BatchPhase::Failed {
            tracing::warn!("Batch {} was failed externally; stopping load", batch_id);
            return Ok(true);
        }
        Ok(false)
    }

    fn apply_entity(
        &self,
        resolver: &SyncResolver<'_>,
        batch_id: &str,
        kind: EntityKind,
        entity: &TransformedEntity,
        stats: &mut LoadStats,
    ) -> Result<()> {
        match self.resolve_references(entity)? {
            Resolution::Unresolved(finding) => {
                tracing::warn!(
                    "{}/{}: reference {} -> '{}' cannot be resolved",
                    kind,
                    entity.source_id,
                    finding.field,
                    finding.value.as_deref().unwrap_or("")
                );
                self.store
                    .record_findings(batch_id, kind, &entity.source_id, &[finding.clone()])?;
                self.store.mark_raw_validation_error_by_key(
                    batch_id,
                    kind,
                    &entity.source_id,
                    &format!("{}: {}", finding.field, finding.kind),
                )?;
                stats.unresolved += 1;
            }
            Resolution::Resolved(refs) => match resolver.apply(entity, &refs, batch_id) {
                Ok(LoadOutcome::Inserted) | Ok(LoadOutcome::Updated) => {
                    stats.loaded += 1;
                }
                Ok(LoadOutcome::Skipped(reason)) => {
                    tracing::debug!("Skipping {}/{}: {}", kind, entity.source_id, reason);
                    stats.skipped += 1;
                }
                Err(err) => {
                    let message = format!("{}/{}: {}", kind, entity.source_id, err);
                    tracing::error!("Failed to apply {}", message);
                    self.store.mark_raw_error_by_key(
                        batch_id,
                        kind,
                        &entity.source_id,
                        &err.to_string(),
                    )?;
                    stats.errors.push(message);
                }
            },
        }
        Ok(())
    }

    fn resolve_references(&self, entity: &TransformedEntity) -> Result<Resolution> {
        let schema = schema_for(entity.kind);
        let mut resolved = BTreeMap::new();
        for (column, target) in &entity.refs {
            let target_schema = schema_for(target.kind);
            match production::resolve_reference(self.store.conn(), target_schema, &target.source_id)? {
                Some(id) => {
                    resolved.insert(column.clone(), id);
                }
                None => {
                    let field = reference_field_name(schema, column);
                    return Ok(Resolution::Unresolved(Finding {
                        field,
                        kind: FailureKind::UnresolvedReference,
                        value: Some(target.source_id.clone()),
                        blocking: true,
                    }));
                }
            }
        }
        Ok(Resolution::Resolved(resolved))
    }
}

/// Findings name the payload key the operator saw, not the column.
fn reference_field_name(schema: &crate::schema::EntitySchema, column: &str) -> String {
    if let Some(reference) = schema.references.iter().find(|r| r.column == column) {
        return reference.key.to_string();
    }
    if let Some(poly) = &schema.poly_reference {
        if column == "entity_id" {
            return poly.id_key.to_string();
        }
    }
    column.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::transform::TransformStage;
    use crate::window::SyncWindow;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn captured() -> DateTime<Utc> {
        "2024-01-15T12:00:00Z".parse().unwrap()
    }

    fn transformed_batch(store: &Store, records: &[(EntityKind, &str, serde_json::Value)]) -> String {
        let tracker = BatchTracker::new(store);
        let window = SyncWindow::parse("2024-01-01", "2024-01-31").unwrap();
        let batch = tracker.create(window, None).unwrap();
        tracker.begin_extract(&batch.batch_id).unwrap();
        for (kind, source_id, payload) in records {
            store
                .stage_raw_record(*kind, source_id, &batch.batch_id, payload, captured())
                .unwrap();
        }
        tracker
            .mark_extracted(&batch.batch_id, records.len() as u64)
            .unwrap();
        TransformStage::new(store).run(&batch.batch_id).unwrap();
        batch.batch_id
    }

    fn contact_payload(email: &str) -> serde_json::Value {
        json!({
            "email": email,
            "type": "INDIVIDUAL",
            "status": "ACTIVE",
            "updatedAt": "2024-01-10T00:00:00Z"
        })
    }

    #[test]
    fn test_run_loads_dependent_kinds_in_order() {
        let store = Store::open_in_memory().unwrap();
        let batch_id = transformed_batch(
            &store,
            &[
                (
                    EntityKind::Policy,
                    "P1",
                    json!({
                        "policyNumber": "POL-1001",
                        "contactId": "C1",
                        "status": "ACTIVE",
                        "updatedAt": "2024-01-12T00:00:00Z"
                    }),
                ),
                (EntityKind::Contact, "C1", contact_payload("a@example.com")),
            ],
        );

        let stats = LoadStage::new(&store).run(&batch_id, None).unwrap();
        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.skipped, 0);
        assert!(stats.errors.is_empty());

        let policy = store.find_entity(EntityKind::Policy, "P1").unwrap().unwrap();
        let contact = store.find_entity(EntityKind::Contact, "C1").unwrap().unwrap();
        assert_eq!(policy["contact_id"], contact["id"]);

        let batch = BatchTracker::new(&store).get(&batch_id).unwrap();
        assert_eq!(batch.phase, BatchPhase::Completed);
        assert_eq!(batch.loaded_count, 2);
    }

    #[test]
    fn test_unresolved_reference_is_a_validation_error() {
        let store = Store::open_in_memory().unwrap();
        let batch_id = transformed_batch(
            &store,
            &[(
                EntityKind::Claim,
                "CL1",
                json!({
                    "claimNumber": "CLM-5001",
                    "policyId": "P-MISSING",
                    "status": "OPEN"
                }),
            )],
        );

        let stats = LoadStage::new(&store).run(&batch_id, None).unwrap();
        assert_eq!(stats.loaded, 0);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(store.entity_count(EntityKind::Claim).unwrap(), 0);

        let errors = store.validation_errors_for_batch(&batch_id).unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "policyId");
        assert_eq!(errors[0].failure_kind, FailureKind::UnresolvedReference);
        assert_eq!(errors[0].raw_value.as_deref(), Some("P-MISSING"));

        // validation errors alone do not fail the batch
        let batch = BatchTracker::new(&store).get(&batch_id).unwrap();
        assert_eq!(batch.phase, BatchPhase::Completed);
        assert_eq!(batch.error_count, 1);
    }

    #[test]
    fn test_kind_filter_limits_what_loads() {
        let store = Store::open_in_memory().unwrap();
        let batch_id = transformed_batch(
            &store,
            &[
                (EntityKind::Contact, "C1", contact_payload("a@example.com")),
                (
                    EntityKind::Policy,
                    "P1",
                    json!({
                        "policyNumber": "POL-1001",
                        "contactId": "C1",
                        "status": "ACTIVE"
                    }),
                ),
            ],
        );

        let only_contacts = [EntityKind::Contact];
        let stats = LoadStage::new(&store)
            .run(&batch_id, Some(&only_contacts))
            .unwrap();
        assert_eq!(stats.loaded, 1);
        assert_eq!(store.entity_count(EntityKind::Contact).unwrap(), 1);
        assert_eq!(store.entity_count(EntityKind::Policy).unwrap(), 0);
    }

    #[test]
    fn test_pre_cancelled_token_stops_before_any_entity() {
        let store = Store::open_in_memory().unwrap();
        let batch_id = transformed_batch(
            &store,
            &[(EntityKind::Contact, "C1", contact_payload("a@example.com"))],
        );

        let token = CancelToken::new();
        token.cancel();
        let stats = LoadStage::with_cancel(&store, token)
            .run(&batch_id, None)
            .unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.loaded, 0);
        assert_eq!(store.entity_count(EntityKind::Contact).unwrap(), 0);

        let batch = BatchTracker::new(&store).get(&batch_id).unwrap();
        assert_eq!(batch.phase, BatchPhase::Failed);
        assert!(batch.last_error.unwrap().contains("cancelled"));
    }

    #[test]
    fn test_run_requires_a_transformed_batch() {
        let store = Store::open_in_memory().unwrap();
        let tracker = BatchTracker::new(&store);
        let window = SyncWindow::parse("2024-01-01", "2024-01-31").unwrap();
        let batch = tracker.create(window, None).unwrap();
        let result = LoadStage::new(&store).run(&batch.batch_id, None);
        assert!(matches!(result, Err(SyncError::InvalidTransition { .. })));
    }

    #[test]
    fn test_second_run_over_the_same_content_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let payload = contact_payload("a@example.com");
        let first = transformed_batch(&store, &[(EntityKind::Contact, "C1", payload.clone())]);
        LoadStage::new(&store).run(&first, None).unwrap();

        let second = transformed_batch(&store, &[(EntityKind::Contact, "C1", payload)]);
        let stats = LoadStage::new(&store).run(&second, None).unwrap();
        assert_eq!(stats.loaded, 0);
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.entity_count(EntityKind::Contact).unwrap(), 1);

        let row = store.find_entity(EntityKind::Contact, "C1").unwrap().unwrap();
        assert_eq!(row["last_batch_id"], first);
    }
}
