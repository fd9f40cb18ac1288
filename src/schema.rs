// ABOUTME: Declarative registry of the sixteen synced entity kinds
// ABOUTME: Field specs, references, natural keys, and the dependency load order

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Contact,
    Policy,
    Quote,
    Application,
    PolicyDetail,
    Driver,
    Vehicle,
    Coverage,
    Equipment,
    Claim,
    Renewal,
    Termination,
    BillingRecord,
    Commission,
    AcordForm,
    Document,
}

impl EntityKind {
    pub const ALL: [EntityKind; 16] = [
        EntityKind::Contact,
        EntityKind::Policy,
        EntityKind::Quote,
        EntityKind::Application,
        EntityKind::PolicyDetail,
        EntityKind::Driver,
        EntityKind::Vehicle,
        EntityKind::Coverage,
        EntityKind::Equipment,
        EntityKind::Claim,
        EntityKind::Renewal,
        EntityKind::Termination,
        EntityKind::BillingRecord,
        EntityKind::Commission,
        EntityKind::AcordForm,
        EntityKind::Document,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Policy => "policy",
            EntityKind::Quote => "quote",
            EntityKind::Application => "application",
            EntityKind::PolicyDetail => "policy_detail",
            EntityKind::Driver => "driver",
            EntityKind::Vehicle => "vehicle",
            EntityKind::Coverage => "coverage",
            EntityKind::Equipment => "equipment",
            EntityKind::Claim => "claim",
            EntityKind::Renewal => "renewal",
            EntityKind::Termination => "termination",
            EntityKind::BillingRecord => "billing_record",
            EntityKind::Commission => "commission",
            EntityKind::AcordForm => "acord_form",
            EntityKind::Document => "document",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        EntityKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
    }

    /// Child kinds arrive embedded in a policy detail payload and are never
    /// staged at the top level.
    pub fn is_child(&self) -> bool {
        matches!(
            self,
            EntityKind::Driver | EntityKind::Vehicle | EntityKind::Coverage | EntityKind::Equipment
        )
    }

    pub fn table(&self) -> &'static str {
        schema_for(*self).table
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validator applied to a field on its way from payload to column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Email,
    Phone,
    Zip,
    StateCode,
    Currency { signed: bool },
    Date,
    DateTime,
    Status(&'static [&'static str]),
    Identifier,
    Integer,
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub column: &'static str,
    pub key: &'static str,
    pub ftype: FieldType,
    pub required: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ReferenceSpec {
    pub column: &'static str,
    pub key: &'static str,
    pub target: EntityKind,
    pub required: bool,
    /// Parent-linkage references on child kinds are satisfied structurally
    /// by the embedding payload, never read from the child payload itself.
    pub parent_link: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ChildSpec {
    pub key: &'static str,
    pub kind: EntityKind,
}

/// Documents attach to one of several owner kinds; the payload names the
/// owner kind in `entityType` and its source id in `entityId`.
#[derive(Debug, Clone, Copy)]
pub struct PolyReferenceSpec {
    pub type_key: &'static str,
    pub id_key: &'static str,
    pub allowed: &'static [EntityKind],
}

#[derive(Debug)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub table: &'static str,
    pub fields: &'static [FieldSpec],
    pub references: &'static [ReferenceSpec],
    /// Columns that identify one source entity across batches. Reference
    /// columns named here are compared by resolved internal id.
    pub natural_key: &'static [&'static str],
    pub children: &'static [ChildSpec],
    pub poly_reference: Option<PolyReferenceSpec>,
}

const fn field(
    column: &'static str,
    key: &'static str,
    ftype: FieldType,
    required: bool,
) -> FieldSpec {
    FieldSpec {
        column,
        key,
        ftype,
        required,
    }
}

const fn reference(
    column: &'static str,
    key: &'static str,
    target: EntityKind,
    required: bool,
) -> ReferenceSpec {
    ReferenceSpec {
        column,
        key,
        target,
        required,
        parent_link: false,
    }
}

const fn parent_link(column: &'static str, target: EntityKind) -> ReferenceSpec {
    ReferenceSpec {
        column,
        key: "",
        target,
        required: true,
        parent_link: true,
    }
}

pub const CONTACT_TYPES: &[&str] = &["INDIVIDUAL", "BUSINESS"];
pub const CONTACT_STATUSES: &[&str] = &["ACTIVE", "INACTIVE", "PENDING"];
pub const POLICY_STATUSES: &[&str] =
    &["QUOTED", "APPLIED", "BOUND", "ACTIVE", "EXPIRED", "TERMINATED"];
pub const QUOTE_STATUSES: &[&str] = &["DRAFT", "ISSUED", "EXPIRED", "REVISED"];
pub const APPLICATION_STATUSES: &[&str] = &["PENDING", "UNDERWRITING", "APPROVED", "DECLINED"];
pub const CLAIM_STATUSES: &[&str] = &["OPEN", "INVESTIGATING", "RESERVED", "PAID", "CLOSED"];
pub const RENEWAL_STATUSES: &[&str] = &["OFFERED", "ACCEPTED", "DECLINED"];
pub const TERMINATION_TYPES: &[&str] = &["VOLUNTARY", "NONRENEWAL", "LAPSE", "CANCELLATION"];

static CONTACT: EntitySchema = EntitySchema {
    kind: EntityKind::Contact,
    table: "contacts",
    fields: &[
        field("first_name", "firstName", FieldType::Text, false),
        field("last_name", "lastName", FieldType::Text, false),
        field("email", "email", FieldType::Email, true),
        field("phone", "phone", FieldType::Phone, false),
        field("address", "address", FieldType::Text, false),
        field("city", "city", FieldType::Text, false),
        field("state", "state", FieldType::StateCode, false),
        field("zip_code", "zipCode", FieldType::Zip, false),
        field("contact_type", "type", FieldType::Status(CONTACT_TYPES), true),
        field("status", "status", FieldType::Status(CONTACT_STATUSES), true),
        field("created_at", "createdAt", FieldType::DateTime, false),
        field("updated_at", "updatedAt", FieldType::DateTime, false),
    ],
    references: &[],
    natural_key: &["source_id"],
    children: &[],
    poly_reference: None,
};

static POLICY: EntitySchema = EntitySchema {
    kind: EntityKind::Policy,
    table: "policies",
    fields: &[
        field("policy_number", "policyNumber", FieldType::Identifier, true),
        field("carrier", "carrier", FieldType::Text, false),
        field("line_of_business", "lineOfBusiness", FieldType::Text, false),
        field("status", "status", FieldType::Status(POLICY_STATUSES), true),
        field("effective_date", "effectiveDate", FieldType::Date, false),
        field("expiration_date", "expirationDate", FieldType::Date, false),
        field("premium", "premium", FieldType::Currency { signed: false }, false),
    ],
    references: &[reference("contact_id", "contactId", EntityKind::Contact, true)],
    natural_key: &["source_id", "policy_number"],
    children: &[],
    poly_reference: None,
};

static QUOTE: EntitySchema = EntitySchema {
    kind: EntityKind::Quote,
    table: "quotes",
    fields: &[
        field("quote_date", "quoteDate", FieldType::Date, false),
        field("valid_until", "validUntil", FieldType::Date, false),
        field("status", "status", FieldType::Status(QUOTE_STATUSES), true),
        field("premium", "premium", FieldType::Currency { signed: false }, false),
        field("quote_data", "quoteData", FieldType::Json, false),
    ],
    references: &[
        reference("contact_id", "contactId", EntityKind::Contact, true),
        reference("policy_id", "policyId", EntityKind::Policy, false),
    ],
    natural_key: &["source_id"],
    children: &[],
    poly_reference: None,
};

static APPLICATION: EntitySchema = EntitySchema {
    kind: EntityKind::Application,
    table: "applications",
    fields: &[
        field("submitted_at", "submittedAt", FieldType::DateTime, false),
        field("status", "status", FieldType::Status(APPLICATION_STATUSES), true),
        field("application_data", "applicationData", FieldType::Json, false),
    ],
    references: &[
        reference("quote_id", "quoteId", EntityKind::Quote, true),
        reference("contact_id", "contactId", EntityKind::Contact, true),
    ],
    natural_key: &["source_id"],
    children: &[],
    poly_reference: None,
};

static POLICY_DETAIL: EntitySchema = EntitySchema {
    kind: EntityKind::PolicyDetail,
    table: "policy_details",
    fields: &[field("detail_data", "detailData", FieldType::Json, false)],
    references: &[reference("policy_id", "policyId", EntityKind::Policy, true)],
    natural_key: &["source_id"],
    children: &[
        ChildSpec { key: "drivers", kind: EntityKind::Driver },
        ChildSpec { key: "vehicles", kind: EntityKind::Vehicle },
        ChildSpec { key: "coverages", kind: EntityKind::Coverage },
        ChildSpec { key: "equipment", kind: EntityKind::Equipment },
    ],
    poly_reference: None,
};

static DRIVER: EntitySchema = EntitySchema {
    kind: EntityKind::Driver,
    table: "drivers",
    fields: &[
        field("license_number", "licenseNumber", FieldType::Identifier, true),
        field("first_name", "firstName", FieldType::Text, false),
        field("last_name", "lastName", FieldType::Text, false),
        field("birth_date", "birthDate", FieldType::Date, false),
    ],
    references: &[parent_link("detail_id", EntityKind::PolicyDetail)],
    natural_key: &["detail_id", "license_number"],
    children: &[],
    poly_reference: None,
};

static VEHICLE: EntitySchema = EntitySchema {
    kind: EntityKind::Vehicle,
    table: "vehicles",
    fields: &[
        field("vin", "vin", FieldType::Identifier, true),
        field("make", "make", FieldType::Text, false),
        field("model", "model", FieldType::Text, false),
        field("model_year", "modelYear", FieldType::Integer, false),
    ],
    references: &[parent_link("detail_id", EntityKind::PolicyDetail)],
    natural_key: &["detail_id", "vin"],
    children: &[],
    poly_reference: None,
};

static COVERAGE: EntitySchema = EntitySchema {
    kind: EntityKind::Coverage,
    table: "coverages",
    fields: &[
        field("code", "code", FieldType::Text, true),
        field("limit_amount", "limit", FieldType::Currency { signed: false }, false),
        field("deductible", "deductible", FieldType::Currency { signed: false }, false),
        field("premium", "premium", FieldType::Currency { signed: false }, false),
    ],
    references: &[parent_link("detail_id", EntityKind::PolicyDetail)],
    natural_key: &["detail_id", "code"],
    children: &[],
    poly_reference: None,
};

static EQUIPMENT: EntitySchema = EntitySchema {
    kind: EntityKind::Equipment,
    table: "equipment",
    fields: &[
        field("description", "description", FieldType::Text, true),
        field("value", "value", FieldType::Currency { signed: false }, false),
        field("year", "year", FieldType::Integer, false),
    ],
    references: &[parent_link("detail_id", EntityKind::PolicyDetail)],
    natural_key: &["detail_id", "description"],
    children: &[],
    poly_reference: None,
};

static CLAIM: EntitySchema = EntitySchema {
    kind: EntityKind::Claim,
    table: "claims",
    fields: &[
        field("claim_number", "claimNumber", FieldType::Identifier, true),
        field("status", "status", FieldType::Status(CLAIM_STATUSES), true),
        field("amount", "amount", FieldType::Currency { signed: false }, false),
        field("incident_date", "incidentDate", FieldType::Date, false),
        field("report_date", "reportDate", FieldType::Date, false),
        field("description", "description", FieldType::Text, false),
    ],
    references: &[reference("policy_id", "policyId", EntityKind::Policy, true)],
    natural_key: &["source_id", "claim_number"],
    children: &[],
    poly_reference: None,
};

static RENEWAL: EntitySchema = EntitySchema {
    kind: EntityKind::Renewal,
    table: "renewals",
    fields: &[
        field("status", "status", FieldType::Status(RENEWAL_STATUSES), true),
        field("offer_date", "offerDate", FieldType::Date, false),
        field("new_effective_date", "newEffectiveDate", FieldType::Date, false),
        field("new_expiration_date", "newExpirationDate", FieldType::Date, false),
        field("premium_offered", "premiumOffered", FieldType::Currency { signed: false }, false),
        field("renewal_data", "renewalData", FieldType::Json, false),
    ],
    references: &[reference("policy_id", "policyId", EntityKind::Policy, true)],
    natural_key: &["source_id"],
    children: &[],
    poly_reference: None,
};

static TERMINATION: EntitySchema = EntitySchema {
    kind: EntityKind::Termination,
    table: "terminations",
    fields: &[
        field("termination_date", "terminationDate", FieldType::Date, true),
        field(
            "termination_type",
            "terminationType",
            FieldType::Status(TERMINATION_TYPES),
            true,
        ),
        field("reason", "reason", FieldType::Text, false),
        field("notes", "notes", FieldType::Text, false),
    ],
    references: &[reference("policy_id", "policyId", EntityKind::Policy, true)],
    natural_key: &["source_id"],
    children: &[],
    poly_reference: None,
};

static BILLING_RECORD: EntitySchema = EntitySchema {
    kind: EntityKind::BillingRecord,
    table: "billing_records",
    fields: &[
        field("billing_type", "billingType", FieldType::Text, false),
        field("billing_date", "billingDate", FieldType::Date, true),
        field("amount", "amount", FieldType::Currency { signed: true }, false),
        field("description", "description", FieldType::Text, false),
    ],
    references: &[
        reference("contact_id", "contactId", EntityKind::Contact, true),
        reference("policy_id", "policyId", EntityKind::Policy, false),
    ],
    natural_key: &["source_id"],
    children: &[],
    poly_reference: None,
};

static COMMISSION: EntitySchema = EntitySchema {
    kind: EntityKind::Commission,
    table: "commissions",
    fields: &[
        field("amount", "amount", FieldType::Currency { signed: true }, false),
        field("rate", "rate", FieldType::Currency { signed: false }, false),
        field("statement_date", "statementDate", FieldType::Date, false),
        field("carrier", "carrier", FieldType::Text, false),
    ],
    references: &[reference("policy_id", "policyId", EntityKind::Policy, false)],
    natural_key: &["source_id"],
    children: &[],
    poly_reference: None,
};

static ACORD_FORM: EntitySchema = EntitySchema {
    kind: EntityKind::AcordForm,
    table: "acord_forms",
    fields: &[
        field("api_form_id", "apiFormId", FieldType::Integer, false),
        field("template_id", "templateId", FieldType::Integer, false),
        field("form_data", "formData", FieldType::Json, false),
        field("description", "description", FieldType::Text, false),
        field("created_at", "createdAt", FieldType::DateTime, false),
    ],
    references: &[
        reference("customer_id", "customerId", EntityKind::Contact, false),
        reference("policy_id", "policyId", EntityKind::Policy, false),
    ],
    natural_key: &["source_id"],
    children: &[],
    poly_reference: None,
};

static DOCUMENT: EntitySchema = EntitySchema {
    kind: EntityKind::Document,
    table: "documents",
    fields: &[
        field("title", "title", FieldType::Text, false),
        field("file_name", "fileName", FieldType::Text, false),
        field("content_type", "contentType", FieldType::Text, false),
        field("created_at", "createdAt", FieldType::DateTime, false),
    ],
    references: &[],
    natural_key: &["source_id"],
    children: &[],
    poly_reference: Some(PolyReferenceSpec {
        type_key: "entityType",
        id_key: "entityId",
        allowed: &[
            EntityKind::Contact,
            EntityKind::Policy,
            EntityKind::Claim,
            EntityKind::Quote,
            EntityKind::Application,
        ],
    }),
};

pub fn schema_for(kind: EntityKind) -> &'static EntitySchema {
    match kind {
        EntityKind::Contact => &CONTACT,
        EntityKind::Policy => &POLICY,
        EntityKind::Quote => &QUOTE,
        EntityKind::Application => &APPLICATION,
        EntityKind::PolicyDetail => &POLICY_DETAIL,
        EntityKind::Driver => &DRIVER,
        EntityKind::Vehicle => &VEHICLE,
        EntityKind::Coverage => &COVERAGE,
        EntityKind::Equipment => &EQUIPMENT,
        EntityKind::Claim => &CLAIM,
        EntityKind::Renewal => &RENEWAL,
        EntityKind::Termination => &TERMINATION,
        EntityKind::BillingRecord => &BILLING_RECORD,
        EntityKind::Commission => &COMMISSION,
        EntityKind::AcordForm => &ACORD_FORM,
        EntityKind::Document => &DOCUMENT,
    }
}

fn dependencies(kind: EntityKind) -> Vec<EntityKind> {
    let schema = schema_for(kind);
    let mut deps: Vec<EntityKind> = schema.references.iter().map(|r| r.target).collect();
    if let Some(poly) = &schema.poly_reference {
        deps.extend(poly.allowed.iter().copied());
    }
    deps
}

/// Kinds in reference-dependency order: every kind appears after everything
/// it can reference. Ties keep declaration order.
pub fn load_order() -> Vec<EntityKind> {
    let mut remaining: Vec<EntityKind> = EntityKind::ALL.to_vec();
    let mut placed: Vec<EntityKind> = Vec::new();
    while !remaining.is_empty() {
        let mut progressed = false;
        let mut idx = 0;
        while idx < remaining.len() {
            let kind = remaining[idx];
            if dependencies(kind).iter().all(|dep| placed.contains(dep)) {
                placed.push(remaining.remove(idx));
                progressed = true;
            } else {
                idx += 1;
            }
        }
        if !progressed {
            // a reference cycle in the registry would be a programming error
            placed.extend(remaining.drain(..));
        }
    }
    placed
}
