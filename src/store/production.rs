// ABOUTME: Production table access driven by the entity schema registry
// ABOUTME: Natural-key lookup, reference resolution, and watermark-guarded writes

use crate::error::{Result, SyncError};
use crate::schema::{EntityKind, EntitySchema};
use crate::store::{ts_from_sql, ts_to_sql, Store};
use crate::transform::TransformedEntity;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;

/// The production-side identity of an existing row: its internal id and the
/// watermark of the last version applied to it.
#[derive(Debug, Clone)]
pub struct ProductionRow {
    pub id: String,
    pub last_synced_at: Option<DateTime<Utc>>,
}

pub fn find_by_natural_key(
    conn: &Connection,
    schema: &EntitySchema,
    key_values: &[SqlValue],
) -> Result<Option<ProductionRow>> {
    let sql = build_find_sql(schema);
    let row = conn
        .query_row(&sql, params_from_iter(key_values.iter()), |row| {
            let raw: Option<String> = row.get(1)?;
            let last_synced_at = raw
                .map(|value| {
                    ts_from_sql(&value).map_err(|err| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            Box::new(err),
                        )
                    })
                })
                .transpose()?;
            Ok(ProductionRow { id: row.get(0)?, last_synced_at })
        })
        .optional()?;
    Ok(row)
}

/// Maps a referenced source id to the internal id of its production row.
pub fn resolve_reference(
    conn: &Connection,
    target: &EntitySchema,
    source_id: &str,
) -> Result<Option<String>> {
    let sql = format!(
        "SELECT \"id\" FROM \"{}\" WHERE \"source_id\" = ?1 LIMIT 1",
        target.table
    );
    Ok(conn.query_row(&sql, [source_id], |row| row.get(0)).optional()?)
}

/// The entity's natural key as SQL values, in schema order. Reference
/// columns named in the key use the resolved internal id.
pub fn natural_key_values(
    schema: &EntitySchema,
    entity: &TransformedEntity,
    resolved_refs: &BTreeMap<String, String>,
) -> Result<Vec<SqlValue>> {
    schema
        .natural_key
        .iter()
        .map(|column| {
            if *column == "source_id" {
                return Ok(SqlValue::Text(entity.source_id.clone()));
            }
            if let Some(id) = resolved_refs.get(*column) {
                return Ok(SqlValue::Text(id.clone()));
            }
            match entity.columns.get(*column) {
                Some(value) => Ok(json_to_sql(value)),
                None => Err(SyncError::MissingNaturalKey {
                    kind: entity.kind,
                    source_id: entity.source_id.clone(),
                    column: (*column).to_string(),
                }),
            }
        })
        .collect()
}

pub fn insert_entity(
    conn: &Connection,
    schema: &EntitySchema,
    row_id: &str,
    entity: &TransformedEntity,
    resolved_refs: &BTreeMap<String, String>,
    batch_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let (mut columns, mut values) = writable_columns(schema, entity, resolved_refs);
    columns.insert(0, "id");
    values.insert(0, SqlValue::Text(row_id.to_string()));
    push_sync_columns(&mut columns, &mut values, entity, batch_id, now);
    let sql = build_insert_sql(schema.table, &columns);
    conn.execute(&sql, params_from_iter(values.iter()))?;
    Ok(())
}

/// Applies the new version over an existing row, guarded in SQL by the
/// stored watermark. Returns false when the guard rejects the write, which
/// means a newer version was applied since the row was read.
pub fn update_entity(
    conn: &Connection,
    schema: &EntitySchema,
    row_id: &str,
    entity: &TransformedEntity,
    resolved_refs: &BTreeMap<String, String>,
    batch_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let (columns, values) = writable_columns(schema, entity, resolved_refs);
    let mut set_columns: Vec<&str> = Vec::new();
    let mut set_values: Vec<SqlValue> = Vec::new();
    for (column, value) in columns.into_iter().zip(values) {
        // natural key columns identify the row and stay put
        if schema.natural_key.contains(&column) {
            continue;
        }
        set_columns.push(column);
        set_values.push(value);
    }
    push_sync_columns(&mut set_columns, &mut set_values, entity, batch_id, now);

    let sql = build_update_sql(schema.table, &set_columns);
    set_values.push(SqlValue::Text(row_id.to_string()));
    set_values.push(SqlValue::Text(ts_to_sql(entity.modified_at)));
    let affected = conn.execute(&sql, params_from_iter(set_values.iter()))?;
    Ok(affected > 0)
}

fn push_sync_columns(
    columns: &mut Vec<&'static str>,
    values: &mut Vec<SqlValue>,
    entity: &TransformedEntity,
    batch_id: &str,
    now: DateTime<Utc>,
) {
    columns.push("modified_at");
    values.push(SqlValue::Text(ts_to_sql(entity.modified_at)));
    columns.push("last_synced_at");
    values.push(SqlValue::Text(ts_to_sql(entity.modified_at)));
    columns.push("last_batch_id");
    values.push(SqlValue::Text(batch_id.to_string()));
    columns.push("row_updated_at");
    values.push(SqlValue::Text(ts_to_sql(now)));
}

fn writable_columns(
    schema: &EntitySchema,
    entity: &TransformedEntity,
    resolved_refs: &BTreeMap<String, String>,
) -> (Vec<&'static str>, Vec<SqlValue>) {
    let mut columns: Vec<&'static str> = vec!["source_id"];
    let mut values: Vec<SqlValue> = vec![SqlValue::Text(entity.source_id.clone())];
    for reference in schema.references {
        columns.push(reference.column);
        values.push(match resolved_refs.get(reference.column) {
            Some(id) => SqlValue::Text(id.clone()),
            None => SqlValue::Null,
        });
    }
    if schema.poly_reference.is_some() {
        columns.push("entity_type");
        values.push(
            entity
                .columns
                .get("entity_type")
                .map(json_to_sql)
                .unwrap_or(SqlValue::Null),
        );
        columns.push("entity_id");
        values.push(match resolved_refs.get("entity_id") {
            Some(id) => SqlValue::Text(id.clone()),
            None => SqlValue::Null,
        });
    }
    for field in schema.fields {
        columns.push(field.column);
        values.push(
            entity
                .columns
                .get(field.column)
                .map(json_to_sql)
                .unwrap_or(SqlValue::Null),
        );
    }
    (columns, values)
}

/// Builds a find-by-natural-key query.
///
/// Example for policies:
/// SELECT "id", "last_synced_at" FROM "policies"
/// WHERE "source_id" = ?1 AND "policy_number" = ?2
fn build_find_sql(schema: &EntitySchema) -> String {
    let predicates: Vec<String> = schema
        .natural_key
        .iter()
        .enumerate()
        .map(|(idx, column)| format!("\"{}\" = ?{}", column, idx + 1))
        .collect();
    format!(
        "SELECT \"id\", \"last_synced_at\" FROM \"{}\" WHERE {}",
        schema.table,
        predicates.join(" AND ")
    )
}

/// Builds an insert statement with one positional parameter per column.
///
/// Example:
/// INSERT INTO "contacts" ("id", "source_id", "email") VALUES (?1, ?2, ?3)
fn build_insert_sql(table: &str, columns: &[&str]) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        table,
        quoted.join(", "),
        placeholders.join(", ")
    )
}

/// Builds the guarded update. The id and the incoming watermark bind after
/// the SET parameters.
///
/// Example for two SET columns:
/// UPDATE "contacts" SET "email" = ?1, "status" = ?2
/// WHERE "id" = ?3 AND ("last_synced_at" IS NULL OR "last_synced_at" < ?4)
fn build_update_sql(table: &str, set_columns: &[&str]) -> String {
    let assignments: Vec<String> = set_columns
        .iter()
        .enumerate()
        .map(|(idx, column)| format!("\"{}\" = ?{}", column, idx + 1))
        .collect();
    let id_idx = set_columns.len() + 1;
    let watermark_idx = set_columns.len() + 2;
    format!(
        "UPDATE \"{}\" SET {} WHERE \"id\" = ?{} AND (\"last_synced_at\" IS NULL OR \
         \"last_synced_at\" < ?{})",
        table,
        assignments.join(", "),
        id_idx,
        watermark_idx
    )
}

pub(crate) fn json_to_sql(value: &serde_json::Value) -> SqlValue {
    match value {
        serde_json::Value::Null => SqlValue::Null,
        serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    match value {
        rusqlite::types::ValueRef::Null => serde_json::Value::Null,
        rusqlite::types::ValueRef::Integer(i) => serde_json::Value::from(i),
        rusqlite::types::ValueRef::Real(f) => serde_json::Value::from(f),
        rusqlite::types::ValueRef::Text(text) => {
            serde_json::Value::String(String::from_utf8_lossy(text).into_owned())
        }
        rusqlite::types::ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

impl Store {
    /// Fetches a production row by source id as a column-name-to-value map.
    /// Diagnostic surface used by tests and ad-hoc inspection.
    pub fn find_entity(
        &self,
        kind: EntityKind,
        source_id: &str,
    ) -> Result<Option<serde_json::Map<String, serde_json::Value>>> {
        let schema = crate::schema::schema_for(kind);
        let sql = format!(
            "SELECT * FROM \"{}\" WHERE \"source_id\" = ?1 LIMIT 1",
            schema.table
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|name| name.to_string()).collect();
        let mut rows = stmt.query([source_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let mut object = serde_json::Map::new();
        for (idx, name) in column_names.iter().enumerate() {
            object.insert(name.clone(), sql_to_json(row.get_ref(idx)?));
        }
        Ok(Some(object))
    }

    pub fn entity_count(&self, kind: EntityKind) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", kind.table());
        let count: i64 = self.conn().query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
