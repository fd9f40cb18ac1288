// ABOUTME: Normalized entity produced by the transformer
// ABOUTME: Carries column values, reference targets, embedded children, and findings

use crate::schema::EntityKind;
use crate::validate::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One rejected or suspect field value. Blocking findings keep the whole
/// entity out of the load stage; advisory ones only land in the error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub field: String,
    pub kind: FailureKind,
    pub value: Option<String>,
    pub blocking: bool,
}

impl Finding {
    pub fn new(
        field: &str,
        kind: FailureKind,
        raw: Option<&serde_json::Value>,
        blocking: bool,
    ) -> Self {
        Self {
            field: field.to_string(),
            kind,
            value: raw.map(render_raw),
            blocking,
        }
    }
}

fn render_raw(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A reference by source id, resolved to an internal row id at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefTarget {
    pub kind: EntityKind,
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformedEntity {
    pub kind: EntityKind,
    pub source_id: String,
    pub batch_id: String,
    /// Source-side modification watermark used for window admission.
    pub modified_at: DateTime<Utc>,
    pub columns: BTreeMap<String, serde_json::Value>,
    pub refs: BTreeMap<String, RefTarget>,
    #[serde(default)]
    pub children: Vec<TransformedEntity>,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

impl TransformedEntity {
    pub fn is_blocked(&self) -> bool {
        self.findings.iter().any(|f| f.blocking)
    }

    pub fn column_str(&self, column: &str) -> Option<&str> {
        self.columns.get(column).and_then(|v| v.as_str())
    }
}
