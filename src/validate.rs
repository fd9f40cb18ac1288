// ABOUTME: Field validators shared by the transformer and the CLI
// ABOUTME: Each validator normalizes on success and reports a FailureKind on rejection

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a field value was rejected. `missing_required` and `format_invalid`
/// cover absent and malformed values; `out_of_domain` covers well-formed
/// values outside the allowed set; `unresolved_reference` is recorded by the
/// load stage when a referenced parent cannot be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingRequired,
    FormatInvalid,
    OutOfDomain,
    UnresolvedReference,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MissingRequired => "missing_required",
            FailureKind::FormatInvalid => "format_invalid",
            FailureKind::OutOfDomain => "out_of_domain",
            FailureKind::UnresolvedReference => "unresolved_reference",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "missing_required" => Some(FailureKind::MissingRequired),
            "format_invalid" => Some(FailureKind::FormatInvalid),
            "out_of_domain" => Some(FailureKind::OutOfDomain),
            "unresolved_reference" => Some(FailureKind::UnresolvedReference),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Two-letter postal abbreviations accepted by the state validator: the 50
/// states plus DC and the inhabited territories.
pub const US_STATE_CODES: [&str; 56] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY", "DC", "PR", "VI", "GU", "MP", "AS",
];

/// Lowercases and checks the usual local@domain.tld shape. The domain must
/// end in an alphabetic TLD of at least two characters.
pub fn validate_email(raw: &str) -> Result<String, FailureKind> {
    let value = raw.trim().to_ascii_lowercase();
    let (local, domain) = value.split_once('@').ok_or(FailureKind::FormatInvalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "._%+-".contains(c))
    {
        return Err(FailureKind::FormatInvalid);
    }
    let (host, tld) = domain.rsplit_once('.').ok_or(FailureKind::FormatInvalid)?;
    if host.is_empty()
        || tld.len() < 2
        || !tld.chars().all(|c| c.is_ascii_alphabetic())
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(FailureKind::FormatInvalid);
    }
    Ok(value)
}

/// Strips punctuation and normalizes US phone numbers to NNN-NNN-NNNN.
/// Accepts ten digits, or eleven with a leading country code 1.
pub fn validate_phone(raw: &str) -> Result<String, FailureKind> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let digits = match digits.len() {
        10 => digits.as_str(),
        11 if digits.starts_with('1') => &digits[1..],
        _ => return Err(FailureKind::FormatInvalid),
    };
    Ok(format!("{}-{}-{}", &digits[..3], &digits[3..6], &digits[6..]))
}

/// Accepts 5-digit and ZIP+4 forms.
pub fn validate_zip(raw: &str) -> Result<String, FailureKind> {
    let value = raw.trim();
    let ok = match value.len() {
        5 => value.chars().all(|c| c.is_ascii_digit()),
        10 => {
            value.as_bytes()[5] == b'-'
                && value
                    .chars()
                    .enumerate()
                    .all(|(i, c)| i == 5 || c.is_ascii_digit())
        }
        _ => false,
    };
    if ok {
        Ok(value.to_string())
    } else {
        Err(FailureKind::FormatInvalid)
    }
}

pub fn validate_state(raw: &str) -> Result<String, FailureKind> {
    let code = raw.trim().to_ascii_uppercase();
    if US_STATE_CODES.contains(&code.as_str()) {
        Ok(code)
    } else {
        Err(FailureKind::OutOfDomain)
    }
}

/// Monetary amounts arrive as JSON numbers or as strings with optional
/// thousands separators. Normalized to two decimal places, half-up.
/// Negative amounts are out of domain unless the column is signed.
pub fn validate_currency(raw: &serde_json::Value, signed: bool) -> Result<Decimal, FailureKind> {
    let parsed = match raw {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(Decimal::from_f64_retain)
            }
        }
        serde_json::Value::String(s) => {
            let cleaned = s.replace(',', "");
            let cleaned = cleaned.trim();
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse::<Decimal>().ok()
            }
        }
        _ => None,
    };
    let amount = parsed.ok_or(FailureKind::FormatInvalid)?;
    if amount.is_sign_negative() && !signed {
        return Err(FailureKind::OutOfDomain);
    }
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    Ok(rounded)
}

/// Timestamps arrive in several shapes depending on the upstream endpoint:
/// RFC 3339, naive ISO with or without fractional seconds, or a plain date.
/// Naive values are taken as UTC.
pub fn parse_flexible_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|ts| ts.and_utc());
    }
    None
}

pub fn validate_datetime(raw: &str) -> Result<DateTime<Utc>, FailureKind> {
    let ts = parse_flexible_timestamp(raw).ok_or(FailureKind::FormatInvalid)?;
    if !(1900..=2100).contains(&ts.year()) {
        return Err(FailureKind::OutOfDomain);
    }
    Ok(ts)
}

pub fn validate_date(raw: &str) -> Result<NaiveDate, FailureKind> {
    let value = raw.trim();
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_flexible_timestamp(value).map(|ts| ts.date_naive()))
        .ok_or(FailureKind::FormatInvalid)?;
    if !(1900..=2100).contains(&date.year()) {
        return Err(FailureKind::OutOfDomain);
    }
    Ok(date)
}

/// Uppercases and checks membership in the column's allowed status set.
pub fn validate_status(raw: &str, allowed: &[&str]) -> Result<String, FailureKind> {
    let status = raw.trim().to_ascii_uppercase();
    if allowed.contains(&status.as_str()) {
        Ok(status)
    } else {
        Err(FailureKind::OutOfDomain)
    }
}

/// Source-system identifiers such as policy and claim numbers: uppercased,
/// 5 to 20 characters from [A-Z0-9-].
pub fn validate_identifier(raw: &str) -> Result<String, FailureKind> {
    let id = raw.trim().to_ascii_uppercase();
    if (5..=20).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
    {
        Ok(id)
    } else {
        Err(FailureKind::FormatInvalid)
    }
}

/// Hyphenated UUID, normalized to lowercase. Used for batch ids on the CLI.
pub fn validate_uuid(raw: &str) -> Result<String, FailureKind> {
    let value = raw.trim();
    if value.len() != 36 {
        return Err(FailureKind::FormatInvalid);
    }
    uuid::Uuid::parse_str(value)
        .map(|id| id.to_string())
        .map_err(|_| FailureKind::FormatInvalid)
}

/// Collapses runs of whitespace to single spaces. Empty results become None
/// so blank strings land as NULL instead of empty text.
pub fn clean_text(raw: &str) -> Option<String> {
    let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Whole numbers from JSON numbers or digit strings. Floats are accepted
/// only when they carry no fractional part.
pub fn validate_integer(raw: &serde_json::Value) -> Result<i64, FailureKind> {
    match raw {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                    .map(|f| f as i64)
            })
            .ok_or(FailureKind::FormatInvalid),
        serde_json::Value::String(s) => {
            s.trim().parse::<i64>().map_err(|_| FailureKind::FormatInvalid)
        }
        _ => Err(FailureKind::FormatInvalid),
    }
}
