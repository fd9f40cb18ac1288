// ABOUTME: Sync window over source-side modification timestamps
// ABOUTME: Admission checks treat both bounds as inclusive

use crate::error::SyncError;
use crate::validate;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, SyncError> {
        if start > end {
            return Err(SyncError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse a window from CLI-style bounds. Each bound accepts RFC 3339 or a
    /// plain date; a plain date expands to midnight UTC for the start bound
    /// and to the last second of the day for the end bound.
    pub fn parse(start: &str, end: &str) -> Result<Self, SyncError> {
        let start_ts =
            parse_bound(start, false).ok_or_else(|| SyncError::BadWindowBound(start.to_string()))?;
        let end_ts =
            parse_bound(end, true).ok_or_else(|| SyncError::BadWindowBound(end.to_string()))?;
        Self::new(start_ts, end_ts)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

fn parse_bound(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        return time.map(|ts| ts.and_utc());
    }
    validate::parse_flexible_timestamp(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_contains_is_inclusive_on_both_bounds() {
        let window =
            SyncWindow::parse("2024-01-01T00:00:00Z", "2024-01-31T23:59:59Z").unwrap();
        assert!(window.contains(ts("2024-01-01T00:00:00Z")));
        assert!(window.contains(ts("2024-01-31T23:59:59Z")));
        assert!(window.contains(ts("2024-01-15T12:00:00Z")));
        assert!(!window.contains(ts("2023-12-31T23:59:59Z")));
        assert!(!window.contains(ts("2024-02-01T00:00:00Z")));
    }

    #[test]
    fn test_plain_date_bounds_expand_to_full_days() {
        let window = SyncWindow::parse("2024-01-01", "2024-01-31").unwrap();
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap());
    }

    #[test]
    fn test_start_after_end_is_rejected() {
        let result = SyncWindow::parse("2024-02-01", "2024-01-01");
        assert!(matches!(result, Err(SyncError::InvalidWindow { .. })));
    }

    #[test]
    fn test_garbage_bound_is_rejected() {
        let result = SyncWindow::parse("januaryish", "2024-01-31");
        assert!(matches!(result, Err(SyncError::BadWindowBound(_))));
    }
}
