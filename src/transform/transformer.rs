// ABOUTME: Maps a staged raw payload onto one normalized entity plus findings
// ABOUTME: Pure and deterministic; reference resolution happens in the load stage

use crate::schema::{schema_for, EntitySchema, FieldType};
use crate::transform::entity::{Finding, RefTarget, TransformedEntity};
use crate::validate::{self, FailureKind};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Payload keys consulted for the modification watermark, in priority
/// order. Entities that carry none fall back to their capture timestamp,
/// children to their parent's watermark.
pub const MODIFIED_AT_KEYS: [&str; 3] = ["updatedAt", "modifiedAt", "createdAt"];

pub fn extract_modified_at(payload: &Value) -> Option<DateTime<Utc>> {
    MODIFIED_AT_KEYS.iter().find_map(|key| {
        payload
            .get(*key)
            .and_then(Value::as_str)
            .and_then(validate::parse_flexible_timestamp)
    })
}

/// Transforms one staged record into a normalized entity. Always returns an
/// entity; rejection is expressed through blocking findings so the caller
/// can persist the full failure detail.
pub fn transform_record(
    schema: &EntitySchema,
    source_id: &str,
    payload: &Value,
    batch_id: &str,
    captured_at: DateTime<Utc>,
) -> TransformedEntity {
    transform_with_default(schema, source_id, payload, batch_id, captured_at)
}

fn transform_with_default(
    schema: &EntitySchema,
    source_id: &str,
    payload: &Value,
    batch_id: &str,
    default_modified: DateTime<Utc>,
) -> TransformedEntity {
    let mut columns: BTreeMap<String, Value> = BTreeMap::new();
    let mut refs: BTreeMap<String, RefTarget> = BTreeMap::new();
    let mut findings: Vec<Finding> = Vec::new();

    for field in schema.fields {
        match payload.get(field.key) {
            None | Some(Value::Null) => {
                if field.required {
                    findings.push(Finding::new(field.key, FailureKind::MissingRequired, None, true));
                }
            }
            Some(raw) => match apply_validator(field.ftype, raw) {
                Ok(Some(normalized)) => {
                    columns.insert(field.column.to_string(), normalized);
                }
                // blank text collapses to absent
                Ok(None) => {
                    if field.required {
                        findings.push(Finding::new(
                            field.key,
                            FailureKind::MissingRequired,
                            Some(raw),
                            true,
                        ));
                    }
                }
                Err(kind) => {
                    findings.push(Finding::new(field.key, kind, Some(raw), field.required));
                }
            },
        }
    }

    for reference in schema.references {
        if reference.parent_link {
            continue;
        }
        match payload.get(reference.key).and_then(value_as_id) {
            Some(id) => {
                refs.insert(
                    reference.column.to_string(),
                    RefTarget { kind: reference.target, source_id: id },
                );
            }
            None => {
                if reference.required {
                    findings.push(Finding::new(
                        reference.key,
                        FailureKind::MissingRequired,
                        payload.get(reference.key),
                        true,
                    ));
                }
            }
        }
    }

    if let Some(poly) = &schema.poly_reference {
        extract_poly_reference(poly, payload, &mut columns, &mut refs, &mut findings);
    }

    let modified_at = extract_modified_at(payload).unwrap_or(default_modified);

    let mut children: Vec<TransformedEntity> = Vec::new();
    for child in schema.children {
        match payload.get(child.key) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                let child_schema = schema_for(child.kind);
                for item in items {
                    if !item.is_object() {
                        findings.push(Finding::new(
                            child.key,
                            FailureKind::FormatInvalid,
                            Some(item),
                            false,
                        ));
                        continue;
                    }
                    let child_source = child_source_id(child_schema, item);
                    children.push(transform_with_default(
                        child_schema,
                        &child_source,
                        item,
                        batch_id,
                        modified_at,
                    ));
                }
            }
            Some(other) => {
                findings.push(Finding::new(child.key, FailureKind::FormatInvalid, Some(other), false));
            }
        }
    }

    TransformedEntity {
        kind: schema.kind,
        source_id: source_id.to_string(),
        batch_id: batch_id.to_string(),
        modified_at,
        columns,
        refs,
        children,
        findings,
    }
}

fn extract_poly_reference(
    poly: &crate::schema::PolyReferenceSpec,
    payload: &Value,
    columns: &mut BTreeMap<String, Value>,
    refs: &mut BTreeMap<String, RefTarget>,
    findings: &mut Vec<Finding>,
) {
    let target_kind = match payload.get(poly.type_key).and_then(Value::as_str) {
        None => {
            findings.push(Finding::new(poly.type_key, FailureKind::MissingRequired, None, true));
            return;
        }
        Some(raw) => match crate::schema::EntityKind::parse(raw) {
            Some(kind) if poly.allowed.contains(&kind) => kind,
            _ => {
                findings.push(Finding::new(
                    poly.type_key,
                    FailureKind::OutOfDomain,
                    payload.get(poly.type_key),
                    true,
                ));
                return;
            }
        },
    };
    match payload.get(poly.id_key).and_then(value_as_id) {
        Some(id) => {
            columns.insert("entity_type".to_string(), Value::String(target_kind.as_str().to_string()));
            refs.insert("entity_id".to_string(), RefTarget { kind: target_kind, source_id: id });
        }
        None => {
            findings.push(Finding::new(
                poly.id_key,
                FailureKind::MissingRequired,
                payload.get(poly.id_key),
                true,
            ));
        }
    }
}

/// Source ids arrive as strings or bare numbers depending on the endpoint.
fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Embedded children usually carry their own id; failing that, the first
/// natural-key field stands in so findings stay attributable.
fn child_source_id(schema: &EntitySchema, payload: &Value) -> String {
    for key in ["id", "sourceId"] {
        if let Some(id) = payload.get(key).and_then(value_as_id) {
            return id;
        }
    }
    for column in schema.natural_key {
        if let Some(field) = schema.fields.iter().find(|f| f.column == *column) {
            if let Some(id) = payload.get(field.key).and_then(value_as_id) {
                return id;
            }
        }
    }
    String::new()
}

fn text_value(raw: &Value) -> Result<&str, FailureKind> {
    raw.as_str().ok_or(FailureKind::FormatInvalid)
}

fn apply_validator(ftype: FieldType, raw: &Value) -> Result<Option<Value>, FailureKind> {
    match ftype {
        FieldType::Json => Ok(Some(raw.clone())),
        FieldType::Integer => validate::validate_integer(raw).map(|i| Some(Value::from(i))),
        FieldType::Currency { signed } => validate::validate_currency(raw, signed)
            .map(|amount| Some(Value::String(amount.to_string()))),
        FieldType::Text => Ok(validate::clean_text(text_value(raw)?).map(Value::String)),
        FieldType::Email => {
            validate::validate_email(text_value(raw)?).map(|v| Some(Value::String(v)))
        }
        FieldType::Phone => {
            validate::validate_phone(text_value(raw)?).map(|v| Some(Value::String(v)))
        }
        FieldType::Zip => validate::validate_zip(text_value(raw)?).map(|v| Some(Value::String(v))),
        FieldType::StateCode => {
            validate::validate_state(text_value(raw)?).map(|v| Some(Value::String(v)))
        }
        FieldType::Status(allowed) => {
            validate::validate_status(text_value(raw)?, allowed).map(|v| Some(Value::String(v)))
        }
        FieldType::Identifier => {
            validate::validate_identifier(text_value(raw)?).map(|v| Some(Value::String(v)))
        }
        FieldType::Date => validate::validate_date(text_value(raw)?)
            .map(|date| Some(Value::String(date.to_string()))),
        FieldType::DateTime => validate::validate_datetime(text_value(raw)?)
            .map(|ts| Some(Value::String(ts.to_rfc3339()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityKind;
    use serde_json::json;

    fn captured() -> DateTime<Utc> {
        "2024-01-15T12:00:00Z".parse().unwrap()
    }

    fn transform_kind(kind: EntityKind, source_id: &str, payload: Value) -> TransformedEntity {
        transform_record(schema_for(kind), source_id, &payload, "b1", captured())
    }

    #[test]
    fn test_contact_happy_path_normalizes_fields() {
        let entity = transform_kind(
            EntityKind::Contact,
            "C100",
            json!({
                "firstName": "  Maria ",
                "lastName": "Lopez",
                "email": "Maria.Lopez@Example.COM",
                "phone": "(217) 555-0134",
                "state": "il",
                "zipCode": "62704",
                "type": "individual",
                "status": "active",
                "updatedAt": "2024-01-10T08:30:00Z"
            }),
        );
        assert!(!entity.is_blocked());
        assert_eq!(entity.column_str("first_name"), Some("Maria"));
        assert_eq!(entity.column_str("email"), Some("maria.lopez@example.com"));
        assert_eq!(entity.column_str("phone"), Some("217-555-0134"));
        assert_eq!(entity.column_str("state"), Some("IL"));
        assert_eq!(entity.column_str("contact_type"), Some("INDIVIDUAL"));
        assert_eq!(entity.column_str("status"), Some("ACTIVE"));
        assert_eq!(entity.modified_at, "2024-01-10T08:30:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_missing_required_field_blocks() {
        let entity = transform_kind(
            EntityKind::Contact,
            "C101",
            json!({"type": "INDIVIDUAL", "status": "ACTIVE"}),
        );
        assert!(entity.is_blocked());
        let finding = entity.findings.iter().find(|f| f.field == "email").unwrap();
        assert_eq!(finding.kind, FailureKind::MissingRequired);
        assert!(finding.blocking);
    }

    #[test]
    fn test_invalid_required_field_blocks_with_format_kind() {
        let entity = transform_kind(
            EntityKind::Contact,
            "C102",
            json!({"email": "not-an-email", "type": "INDIVIDUAL", "status": "ACTIVE"}),
        );
        assert!(entity.is_blocked());
        let finding = entity.findings.iter().find(|f| f.field == "email").unwrap();
        assert_eq!(finding.kind, FailureKind::FormatInvalid);
        assert_eq!(finding.value.as_deref(), Some("not-an-email"));
    }

    #[test]
    fn test_invalid_optional_field_is_advisory() {
        let entity = transform_kind(
            EntityKind::Contact,
            "C103",
            json!({
                "email": "a@example.com",
                "phone": "123",
                "type": "INDIVIDUAL",
                "status": "ACTIVE"
            }),
        );
        assert!(!entity.is_blocked());
        let finding = entity.findings.iter().find(|f| f.field == "phone").unwrap();
        assert!(!finding.blocking);
        // the bad value never lands in the columns
        assert!(entity.columns.get("phone").is_none());
    }

    #[test]
    fn test_blank_required_text_counts_as_missing() {
        let entity = transform_kind(
            EntityKind::Equipment,
            "E1",
            json!({"description": "   ", "value": "100.00"}),
        );
        let finding = entity.findings.iter().find(|f| f.field == "description").unwrap();
        assert_eq!(finding.kind, FailureKind::MissingRequired);
        assert!(finding.blocking);
    }

    #[test]
    fn test_unknown_status_is_out_of_domain() {
        let entity = transform_kind(
            EntityKind::Policy,
            "P1",
            json!({
                "policyNumber": "POL-1001",
                "contactId": "C100",
                "status": "SUSPENDED"
            }),
        );
        assert!(entity.is_blocked());
        let finding = entity.findings.iter().find(|f| f.field == "status").unwrap();
        assert_eq!(finding.kind, FailureKind::OutOfDomain);
    }

    #[test]
    fn test_references_accept_numeric_source_ids() {
        let entity = transform_kind(
            EntityKind::Policy,
            "P1",
            json!({
                "policyNumber": "POL-1001",
                "contactId": 1234,
                "status": "ACTIVE",
                "premium": "1,250.00"
            }),
        );
        assert!(!entity.is_blocked());
        let target = entity.refs.get("contact_id").unwrap();
        assert_eq!(target.kind, EntityKind::Contact);
        assert_eq!(target.source_id, "1234");
        assert_eq!(entity.column_str("premium"), Some("1250.00"));
    }

    #[test]
    fn test_missing_required_reference_blocks() {
        let entity = transform_kind(
            EntityKind::Policy,
            "P2",
            json!({"policyNumber": "POL-1002", "status": "ACTIVE"}),
        );
        assert!(entity.is_blocked());
        let finding = entity.findings.iter().find(|f| f.field == "contactId").unwrap();
        assert_eq!(finding.kind, FailureKind::MissingRequired);
    }

    #[test]
    fn test_modified_at_falls_back_to_captured_at() {
        let entity = transform_kind(
            EntityKind::Contact,
            "C104",
            json!({"email": "a@example.com", "type": "INDIVIDUAL", "status": "ACTIVE"}),
        );
        assert_eq!(entity.modified_at, captured());
    }

    #[test]
    fn test_modified_at_prefers_updated_at_over_created_at() {
        let entity = transform_kind(
            EntityKind::Contact,
            "C105",
            json!({
                "email": "a@example.com",
                "type": "INDIVIDUAL",
                "status": "ACTIVE",
                "createdAt": "2023-06-01T00:00:00Z",
                "updatedAt": "2024-01-10T00:00:00Z"
            }),
        );
        assert_eq!(
            entity.modified_at,
            "2024-01-10T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn test_children_inherit_the_parent_watermark() {
        let entity = transform_kind(
            EntityKind::PolicyDetail,
            "PD1",
            json!({
                "policyId": "P1",
                "updatedAt": "2024-01-12T00:00:00Z",
                "drivers": [
                    {"id": "D1", "licenseNumber": "DL-99881"},
                    {"licenseNumber": "DL-77665", "updatedAt": "2024-01-13T00:00:00Z"}
                ],
                "vehicles": [{"vin": "1HGBH41JXMN109186", "modelYear": 2021}]
            }),
        );
        assert!(!entity.is_blocked());
        assert_eq!(entity.children.len(), 3);

        let first = &entity.children[0];
        assert_eq!(first.kind, EntityKind::Driver);
        assert_eq!(first.source_id, "D1");
        assert_eq!(first.modified_at, entity.modified_at);

        // a child with its own watermark keeps it
        let second = &entity.children[1];
        assert_eq!(second.source_id, "DL-77665");
        assert_eq!(
            second.modified_at,
            "2024-01-13T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );

        let vehicle = &entity.children[2];
        assert_eq!(vehicle.kind, EntityKind::Vehicle);
        assert_eq!(vehicle.columns.get("model_year"), Some(&json!(2021)));
    }

    #[test]
    fn test_blocked_child_does_not_block_the_parent() {
        let entity = transform_kind(
            EntityKind::PolicyDetail,
            "PD2",
            json!({
                "policyId": "P1",
                "drivers": [{"id": "D1"}]
            }),
        );
        assert!(!entity.is_blocked());
        assert!(entity.children[0].is_blocked());
    }

    #[test]
    fn test_non_array_children_value_is_an_advisory_finding() {
        let entity = transform_kind(
            EntityKind::PolicyDetail,
            "PD3",
            json!({"policyId": "P1", "drivers": "none"}),
        );
        assert!(!entity.is_blocked());
        let finding = entity.findings.iter().find(|f| f.field == "drivers").unwrap();
        assert_eq!(finding.kind, FailureKind::FormatInvalid);
        assert!(!finding.blocking);
    }

    #[test]
    fn test_document_poly_reference() {
        let entity = transform_kind(
            EntityKind::Document,
            "DOC1",
            json!({
                "entityType": "policy",
                "entityId": "P1",
                "title": "Declarations page",
                "fileName": "dec.pdf"
            }),
        );
        assert!(!entity.is_blocked());
        assert_eq!(entity.column_str("entity_type"), Some("policy"));
        let target = entity.refs.get("entity_id").unwrap();
        assert_eq!(target.kind, EntityKind::Policy);
        assert_eq!(target.source_id, "P1");
    }

    #[test]
    fn test_document_rejects_unsupported_owner_kind() {
        let entity = transform_kind(
            EntityKind::Document,
            "DOC2",
            json!({"entityType": "vehicle", "entityId": "V1"}),
        );
        assert!(entity.is_blocked());
        let finding = entity.findings.iter().find(|f| f.field == "entityType").unwrap();
        assert_eq!(finding.kind, FailureKind::OutOfDomain);
    }

    #[test]
    fn test_document_requires_owner_id() {
        let entity = transform_kind(
            EntityKind::Document,
            "DOC3",
            json!({"entityType": "contact"}),
        );
        assert!(entity.is_blocked());
        let finding = entity.findings.iter().find(|f| f.field == "entityId").unwrap();
        assert_eq!(finding.kind, FailureKind::MissingRequired);
    }

    #[test]
    fn test_acord_form_carries_optional_owners_and_form_json() {
        let entity = transform_kind(
            EntityKind::AcordForm,
            "AF1",
            json!({
                "apiFormId": 125,
                "customerId": "C100",
                "policyId": "P1",
                "templateId": 9,
                "formData": {"form": "ACORD 25", "insured": "Lopez Farms"},
                "description": "Certificate of liability",
                "createdAt": "2024-01-08T00:00:00Z"
            }),
        );
        assert!(!entity.is_blocked());
        assert_eq!(entity.columns.get("api_form_id"), Some(&json!(125)));
        assert_eq!(entity.refs.get("customer_id").unwrap().kind, EntityKind::Contact);
        assert_eq!(entity.refs.get("policy_id").unwrap().kind, EntityKind::Policy);
        assert_eq!(
            entity.columns.get("form_data"),
            Some(&json!({"form": "ACORD 25", "insured": "Lopez Farms"}))
        );
        // forms carry no updatedAt; the creation stamp is the watermark
        assert_eq!(entity.modified_at, "2024-01-08T00:00:00Z".parse::<DateTime<Utc>>().unwrap());

        let bare = transform_kind(EntityKind::AcordForm, "AF2", json!({"templateId": 9}));
        assert!(!bare.is_blocked());
        assert!(bare.refs.is_empty());
    }

    #[test]
    fn test_json_fields_pass_through_untouched() {
        let entity = transform_kind(
            EntityKind::Quote,
            "Q1",
            json!({
                "contactId": "C1",
                "status": "ISSUED",
                "quoteData": {"tier": "preferred", "discounts": [1, 2]}
            }),
        );
        assert_eq!(
            entity.columns.get("quote_data"),
            Some(&json!({"tier": "preferred", "discounts": [1, 2]}))
        );
    }

    #[test]
    fn test_signed_currency_only_where_allowed() {
        let billing = transform_kind(
            EntityKind::BillingRecord,
            "B1",
            json!({"contactId": "C1", "billingDate": "2024-01-05", "amount": "-25.00"}),
        );
        assert!(!billing.is_blocked());
        assert_eq!(billing.column_str("amount"), Some("-25.00"));

        let policy = transform_kind(
            EntityKind::Policy,
            "P9",
            json!({
                "policyNumber": "POL-9999",
                "contactId": "C1",
                "status": "ACTIVE",
                "premium": "-10.00"
            }),
        );
        assert!(!policy.is_blocked());
        let finding = policy.findings.iter().find(|f| f.field == "premium").unwrap();
        assert_eq!(finding.kind, FailureKind::OutOfDomain);
        assert!(!finding.blocking);
    }
}
