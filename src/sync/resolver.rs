// ABOUTME: Window-based admission and idempotent merge for one entity tree
// ABOUTME: Applies insert/update/skip against production inside a transaction

use crate::error::Result;
use crate::schema::schema_for;
use crate::store::production::{
    find_by_natural_key, insert_entity, natural_key_values, update_entity,
};
use crate::store::Store;
use crate::transform::TransformedEntity;
use crate::window::SyncWindow;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The stored version is already at or past the window end; replaying
    /// this window cannot carry anything newer.
    AlreadyCurrent,
    /// The incoming watermark falls outside the batch window.
    OutsideWindow,
    /// The incoming version is not newer than the stored one.
    NotNewer,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyCurrent => "already_current",
            SkipReason::OutsideWindow => "outside_window",
            SkipReason::NotNewer => "not_newer",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Apply,
    Skip(SkipReason),
}

/// Admission for a version of an entity that already has a production row.
/// A row that has never been synced always admits; otherwise the stored
/// watermark and the window bounds decide.
pub fn admit(
    window: &SyncWindow,
    incoming: DateTime<Utc>,
    last_synced: Option<DateTime<Utc>>,
) -> Decision {
    let Some(last_synced) = last_synced else {
        return Decision::Apply;
    };
    if last_synced >= window.end {
        return Decision::Skip(SkipReason::AlreadyCurrent);
    }
    if !window.contains(incoming) {
        return Decision::Skip(SkipReason::OutsideWindow);
    }
    if incoming <= last_synced {
        return Decision::Skip(SkipReason::NotNewer);
    }
    Decision::Apply
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Inserted,
    Updated,
    Skipped(SkipReason),
}

pub struct SyncResolver<'a> {
    store: &'a Store,
    window: SyncWindow,
}

impl<'a> SyncResolver<'a> {
    pub fn new(store: &'a Store, window: SyncWindow) -> Self {
        Self { store, window }
    }

    /// Applies one entity and its embedded children atomically. The outcome
    /// reflects the top-level entity; children are reconciled under the same
    /// admission rules but do not change it.
    pub fn apply(
        &self,
        entity: &TransformedEntity,
        resolved_refs: &BTreeMap<String, String>,
        batch_id: &str,
    ) -> Result<LoadOutcome> {
        let tx = self.store.conn().unchecked_transaction()?;
        let outcome = apply_tree(&tx, self.window, entity, resolved_refs, batch_id)?;
        tx.commit()?;
        Ok(outcome)
    }
}

fn apply_tree(
    conn: &Connection,
    window: SyncWindow,
    entity: &TransformedEntity,
    resolved_refs: &BTreeMap<String, String>,
    batch_id: &str,
) -> Result<LoadOutcome> {
    let schema = schema_for(entity.kind);
    let key = natural_key_values(schema, entity, resolved_refs)?;
    let existing = find_by_natural_key(conn, schema, &key)?;
    let now = Utc::now();
    match existing {
        None => {
            let row_id = Uuid::new_v4().to_string();
            insert_entity(conn, schema, &row_id, entity, resolved_refs, batch_id, now)?;
            apply_children(conn, window, entity, &row_id, batch_id)?;
            Ok(LoadOutcome::Inserted)
        }
        Some(row) => match admit(&window, entity.modified_at, row.last_synced_at) {
            Decision::Skip(reason) => Ok(LoadOutcome::Skipped(reason)),
            Decision::Apply => {
                if update_entity(conn, schema, &row.id, entity, resolved_refs, batch_id, now)? {
                    apply_children(conn, window, entity, &row.id, batch_id)?;
                    Ok(LoadOutcome::Updated)
                } else {
                    // another writer advanced the watermark after the read
                    Ok(LoadOutcome::Skipped(SkipReason::NotNewer))
                }
            }
        },
    }
}

/// Children resolve their parent linkage structurally: the column named by
/// the parent-link reference is filled with the parent's row id. Duplicate
/// children sharing one natural key collapse to a single winner before
/// applying: the latest watermark wins, and exact ties go to the greater
/// source id.
fn apply_children(
    conn: &Connection,
    window: SyncWindow,
    parent: &TransformedEntity,
    parent_row_id: &str,
    batch_id: &str,
) -> Result<()> {
    let mut winners: BTreeMap<(&str, Vec<String>), (&TransformedEntity, BTreeMap<String, String>)> =
        BTreeMap::new();
    for child in &parent.children {
        let child_schema = schema_for(child.kind);
        let mut refs: BTreeMap<String, String> = BTreeMap::new();
        for reference in child_schema.references {
            if reference.parent_link && reference.target == parent.kind {
                refs.insert(reference.column.to_string(), parent_row_id.to_string());
            }
        }
        let key = (
            child.kind.as_str(),
            natural_key_values(child_schema, child, &refs)?
                .iter()
                .map(key_text)
                .collect(),
        );
        if let Some((kept, _)) = winners.get(&key) {
            if (kept.modified_at, kept.source_id.as_str())
                > (child.modified_at, child.source_id.as_str())
            {
                continue;
            }
        }
        winners.insert(key, (child, refs));
    }
    for (child, refs) in winners.values() {
        apply_tree(conn, window, child, refs, batch_id)?;
    }
    Ok(())
}

fn key_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Text(text) => text.clone(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Null | SqlValue::Blob(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityKind;
    use serde_json::json;

    fn window() -> SyncWindow {
        SyncWindow::parse("2024-01-01", "2024-01-31").unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_admit_never_synced_row() {
        // even an out-of-window version beats an unsynced row
        assert_eq!(admit(&window(), ts("2023-06-01T00:00:00Z"), None), Decision::Apply);
        assert_eq!(admit(&window(), ts("2024-01-15T00:00:00Z"), None), Decision::Apply);
    }

    #[test]
    fn test_admit_skips_rows_already_past_the_window() {
        let decision = admit(
            &window(),
            ts("2024-01-15T00:00:00Z"),
            Some(ts("2024-02-10T00:00:00Z")),
        );
        assert_eq!(decision, Decision::Skip(SkipReason::AlreadyCurrent));
        // exactly at the window end counts as current
        let decision = admit(
            &window(),
            ts("2024-01-15T00:00:00Z"),
            Some(window().end),
        );
        assert_eq!(decision, Decision::Skip(SkipReason::AlreadyCurrent));
    }

    #[test]
    fn test_admit_skips_out_of_window_versions() {
        let decision = admit(
            &window(),
            ts("2023-12-01T00:00:00Z"),
            Some(ts("2024-01-10T00:00:00Z")),
        );
        assert_eq!(decision, Decision::Skip(SkipReason::OutsideWindow));
    }

    #[test]
    fn test_admit_skips_non_newer_versions() {
        let decision = admit(
            &window(),
            ts("2024-01-10T00:00:00Z"),
            Some(ts("2024-01-10T00:00:00Z")),
        );
        assert_eq!(decision, Decision::Skip(SkipReason::NotNewer));
        let decision = admit(
            &window(),
            ts("2024-01-05T00:00:00Z"),
            Some(ts("2024-01-10T00:00:00Z")),
        );
        assert_eq!(decision, Decision::Skip(SkipReason::NotNewer));
    }

    #[test]
    fn test_admit_applies_newer_in_window_versions() {
        let decision = admit(
            &window(),
            ts("2024-01-20T00:00:00Z"),
            Some(ts("2024-01-10T00:00:00Z")),
        );
        assert_eq!(decision, Decision::Apply);
        // window bounds are inclusive for the incoming watermark
        let decision = admit(&window(), window().start, Some(ts("2023-12-30T00:00:00Z")));
        assert_eq!(decision, Decision::Apply);
        let decision = admit(&window(), window().end, Some(ts("2024-01-10T00:00:00Z")));
        assert_eq!(decision, Decision::Apply);
    }

    fn contact(source_id: &str, email: &str, modified: &str) -> TransformedEntity {
        let mut columns = BTreeMap::new();
        columns.insert("email".to_string(), json!(email));
        columns.insert("contact_type".to_string(), json!("INDIVIDUAL"));
        columns.insert("status".to_string(), json!("ACTIVE"));
        TransformedEntity {
            kind: EntityKind::Contact,
            source_id: source_id.to_string(),
            batch_id: "b1".to_string(),
            modified_at: ts(modified),
            columns,
            refs: BTreeMap::new(),
            children: Vec::new(),
            findings: Vec::new(),
        }
    }

    fn detail_with_driver(modified: &str, license: &str) -> TransformedEntity {
        let driver = TransformedEntity {
            kind: EntityKind::Driver,
            source_id: "D1".to_string(),
            batch_id: "b1".to_string(),
            modified_at: ts(modified),
            columns: BTreeMap::from([("license_number".to_string(), json!(license))]),
            refs: BTreeMap::new(),
            children: Vec::new(),
            findings: Vec::new(),
        };
        TransformedEntity {
            kind: EntityKind::PolicyDetail,
            source_id: "PD1".to_string(),
            batch_id: "b1".to_string(),
            modified_at: ts(modified),
            columns: BTreeMap::new(),
            refs: BTreeMap::new(),
            children: vec![driver],
            findings: Vec::new(),
        }
    }

    #[test]
    fn test_apply_inserts_then_updates_then_skips() {
        let store = Store::open_in_memory().unwrap();
        let resolver = SyncResolver::new(&store, window());
        let refs = BTreeMap::new();

        let first = contact("C1", "a@example.com", "2024-01-10T00:00:00Z");
        assert_eq!(resolver.apply(&first, &refs, "b1").unwrap(), LoadOutcome::Inserted);

        let newer = contact("C1", "b@example.com", "2024-01-20T00:00:00Z");
        assert_eq!(resolver.apply(&newer, &refs, "b2").unwrap(), LoadOutcome::Updated);

        // replaying the same version is a no-op
        assert_eq!(
            resolver.apply(&newer, &refs, "b3").unwrap(),
            LoadOutcome::Skipped(SkipReason::NotNewer)
        );

        let row = store.find_entity(EntityKind::Contact, "C1").unwrap().unwrap();
        assert_eq!(row["email"], "b@example.com");
        assert_eq!(row["last_batch_id"], "b2");
        assert_eq!(store.entity_count(EntityKind::Contact).unwrap(), 1);
    }

    #[test]
    fn test_apply_reconciles_children_with_the_parent_row_id() {
        let store = Store::open_in_memory().unwrap();
        let resolver = SyncResolver::new(&store, window());

        // the detail's required policy reference resolves ahead of apply
        let detail = detail_with_driver("2024-01-10T00:00:00Z", "DL-11111");
        let policy = policy_row(&store);
        let mut resolved = BTreeMap::new();
        resolved.insert("policy_id".to_string(), policy);
        assert_eq!(
            resolver.apply(&detail, &resolved, "b1").unwrap(),
            LoadOutcome::Inserted
        );

        let detail_row = store.find_entity(EntityKind::PolicyDetail, "PD1").unwrap().unwrap();
        let driver_row = store.find_entity(EntityKind::Driver, "D1").unwrap().unwrap();
        assert_eq!(driver_row["detail_id"], detail_row["id"]);
        assert_eq!(driver_row["license_number"], "DL-11111");

        // a newer version of the same driver updates in place
        let newer = detail_with_driver("2024-01-20T00:00:00Z", "DL-11111");
        assert_eq!(
            resolver.apply(&newer, &resolved, "b2").unwrap(),
            LoadOutcome::Updated
        );
        assert_eq!(store.entity_count(EntityKind::Driver).unwrap(), 1);
        let driver_row = store.find_entity(EntityKind::Driver, "D1").unwrap().unwrap();
        assert_eq!(driver_row["last_batch_id"], "b2");
    }

    fn policy_row(store: &Store) -> String {
        // seed a minimal policy so detail rows have a parent to point at
        store
            .conn()
            .execute(
                "INSERT INTO policies (id, source_id, contact_id, policy_number, status, \
                 modified_at, last_synced_at, last_batch_id, row_updated_at) VALUES \
                 ('pol-row-1', 'P1', 'con-row-1', 'POL-1001', 'ACTIVE', \
                 '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z', 'b0', \
                 '2024-01-01T00:00:00.000000Z')",
                [],
            )
            .unwrap();
        "pol-row-1".to_string()
    }

    #[test]
    fn test_stale_child_is_left_alone_when_parent_updates() {
        let store = Store::open_in_memory().unwrap();
        let resolver = SyncResolver::new(&store, window());
        policy_row(&store);
        let mut resolved = BTreeMap::new();
        resolved.insert("policy_id".to_string(), "pol-row-1".to_string());

        let detail = detail_with_driver("2024-01-10T00:00:00Z", "DL-11111");
        resolver.apply(&detail, &resolved, "b1").unwrap();

        // same child watermark, newer parent: the parent updates, the child skips
        let mut mixed = detail_with_driver("2024-01-10T00:00:00Z", "DL-11111");
        mixed.modified_at = ts("2024-01-20T00:00:00Z");
        assert_eq!(
            resolver.apply(&mixed, &resolved, "b2").unwrap(),
            LoadOutcome::Updated
        );
        let driver_row = store.find_entity(EntityKind::Driver, "D1").unwrap().unwrap();
        assert_eq!(driver_row["last_batch_id"], "b1");
    }

    #[test]
    fn test_tied_duplicate_children_collapse_to_the_greater_source_id() {
        let store = Store::open_in_memory().unwrap();
        let resolver = SyncResolver::new(&store, window());
        policy_row(&store);
        let mut resolved = BTreeMap::new();
        resolved.insert("policy_id".to_string(), "pol-row-1".to_string());

        // two drivers carry the same license at the same watermark
        let mut detail = detail_with_driver("2024-01-10T00:00:00Z", "DL-11111");
        let mut twin = detail.children[0].clone();
        twin.source_id = "D2".to_string();
        twin.columns.insert("first_name".to_string(), json!("Kept"));
        detail.children.push(twin);

        resolver.apply(&detail, &resolved, "b1").unwrap();

        assert_eq!(store.entity_count(EntityKind::Driver).unwrap(), 1);
        let driver_row = store.find_entity(EntityKind::Driver, "D2").unwrap().unwrap();
        assert_eq!(driver_row["first_name"], "Kept");
        assert!(store.find_entity(EntityKind::Driver, "D1").unwrap().is_none());
    }

    #[test]
    fn test_newer_duplicate_child_wins_regardless_of_payload_order() {
        let store = Store::open_in_memory().unwrap();
        let resolver = SyncResolver::new(&store, window());
        policy_row(&store);
        let mut resolved = BTreeMap::new();
        resolved.insert("policy_id".to_string(), "pol-row-1".to_string());

        // the stale duplicate is listed after the current one
        let mut detail = detail_with_driver("2024-01-20T00:00:00Z", "DL-11111");
        let mut stale = detail.children[0].clone();
        stale.source_id = "D2".to_string();
        stale.modified_at = ts("2024-01-05T00:00:00Z");
        detail.children.push(stale);

        resolver.apply(&detail, &resolved, "b1").unwrap();

        assert_eq!(store.entity_count(EntityKind::Driver).unwrap(), 1);
        assert!(store.find_entity(EntityKind::Driver, "D1").unwrap().is_some());
        assert!(store.find_entity(EntityKind::Driver, "D2").unwrap().is_none());
    }
}
