// ABOUTME: Store DDL: fixed pipeline tables plus generated production tables
// ABOUTME: Production DDL is derived from the entity schema registry

use crate::schema::{schema_for, EntityKind, EntitySchema, FieldType};

pub const SCHEMA_VERSION: i64 = 1;

const FIXED_TABLES: &str = "\
CREATE TABLE IF NOT EXISTS sync_batches (
    batch_id TEXT PRIMARY KEY,
    phase TEXT NOT NULL,
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    extracted_count INTEGER NOT NULL DEFAULT 0,
    transformed_count INTEGER NOT NULL DEFAULT 0,
    loaded_count INTEGER NOT NULL DEFAULT 0,
    skipped_count INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    retry_of TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS raw_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_kind TEXT NOT NULL,
    source_id TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE (entity_kind, source_id, batch_id)
);
CREATE INDEX IF NOT EXISTS idx_raw_records_batch ON raw_records (batch_id, status);

CREATE TABLE IF NOT EXISTS transformed_entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_kind TEXT NOT NULL,
    source_id TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    entity TEXT NOT NULL,
    UNIQUE (entity_kind, source_id, batch_id)
);
CREATE INDEX IF NOT EXISTS idx_transformed_entities_batch
    ON transformed_entities (batch_id, entity_kind);

CREATE TABLE IF NOT EXISTS validation_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL,
    entity_kind TEXT NOT NULL,
    source_id TEXT NOT NULL,
    field TEXT NOT NULL,
    failure_kind TEXT NOT NULL,
    raw_value TEXT,
    blocking INTEGER NOT NULL DEFAULT 1,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_validation_errors_batch ON validation_errors (batch_id);

";

/// Full DDL for a fresh store: the pipeline tables plus one production
/// table per entity kind, each with a unique index over its natural key.
pub fn bootstrap_ddl() -> String {
    let mut ddl = String::from(FIXED_TABLES);
    for kind in EntityKind::ALL {
        ddl.push_str(&production_table_ddl(schema_for(kind)));
    }
    ddl
}

fn column_type(ftype: FieldType) -> &'static str {
    match ftype {
        FieldType::Integer => "INTEGER",
        _ => "TEXT",
    }
}

fn production_table_ddl(schema: &EntitySchema) -> String {
    let mut columns: Vec<String> = vec![
        "\"id\" TEXT PRIMARY KEY".to_string(),
        "\"source_id\" TEXT NOT NULL".to_string(),
    ];
    for reference in schema.references {
        let not_null = if reference.required { " NOT NULL" } else { "" };
        columns.push(format!("\"{}\" TEXT{}", reference.column, not_null));
    }
    if schema.poly_reference.is_some() {
        columns.push("\"entity_type\" TEXT NOT NULL".to_string());
        columns.push("\"entity_id\" TEXT NOT NULL".to_string());
    }
    for field in schema.fields {
        let not_null = if field.required { " NOT NULL" } else { "" };
        columns.push(format!(
            "\"{}\" {}{}",
            field.column,
            column_type(field.ftype),
            not_null
        ));
    }
    columns.push("\"modified_at\" TEXT NOT NULL".to_string());
    columns.push("\"last_synced_at\" TEXT".to_string());
    columns.push("\"last_batch_id\" TEXT".to_string());
    columns.push("\"row_updated_at\" TEXT NOT NULL".to_string());

    let key_columns = schema
        .natural_key
        .iter()
        .map(|column| format!("\"{column}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (\n    {columns}\n);\n\
         CREATE UNIQUE INDEX IF NOT EXISTS \"idx_{table}_natural_key\" \
         ON \"{table}\" ({key_columns});\n\n",
        table = schema.table,
        columns = columns.join(",\n    "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_ddl_executes_cleanly() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        conn.execute_batch(&bootstrap_ddl()).expect("ddl executes");
    }

    #[test]
    fn test_production_ddl_includes_sync_columns() {
        let ddl = production_table_ddl(schema_for(EntityKind::Contact));
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS \"contacts\""));
        assert!(ddl.contains("\"email\" TEXT NOT NULL"));
        assert!(ddl.contains("\"last_synced_at\" TEXT"));
        assert!(ddl.contains("\"last_batch_id\" TEXT"));
        assert!(ddl.contains(
            "CREATE UNIQUE INDEX IF NOT EXISTS \"idx_contacts_natural_key\" \
             ON \"contacts\" (\"source_id\")"
        ));
    }

    #[test]
    fn test_composite_natural_keys_are_indexed_together() {
        let ddl = production_table_ddl(schema_for(EntityKind::Policy));
        assert!(ddl.contains("ON \"policies\" (\"source_id\", \"policy_number\")"));
        let ddl = production_table_ddl(schema_for(EntityKind::Driver));
        assert!(ddl.contains("ON \"drivers\" (\"detail_id\", \"license_number\")"));
    }

    #[test]
    fn test_integer_fields_get_integer_affinity() {
        let ddl = production_table_ddl(schema_for(EntityKind::Vehicle));
        assert!(ddl.contains("\"model_year\" INTEGER"));
        assert!(ddl.contains("\"vin\" TEXT NOT NULL"));
    }

    #[test]
    fn test_poly_reference_columns_are_emitted() {
        let ddl = production_table_ddl(schema_for(EntityKind::Document));
        assert!(ddl.contains("\"entity_type\" TEXT NOT NULL"));
        assert!(ddl.contains("\"entity_id\" TEXT NOT NULL"));
    }

    #[test]
    fn test_required_references_are_not_null() {
        let ddl = production_table_ddl(schema_for(EntityKind::Quote));
        assert!(ddl.contains("\"contact_id\" TEXT NOT NULL"));
        assert!(ddl.contains("\"policy_id\" TEXT,"));
    }
}
