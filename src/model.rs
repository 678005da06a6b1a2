//! Canonical alert record shared by every ingestion path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder used when the upstream payload names no scenario or origin.
pub const UNKNOWN: &str = "unknown";

/// Severity assigned when the alert metadata carries none.
pub const DEFAULT_SEVERITY: &str = "info";

/// One normalized detection event, as persisted and served to the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Dedup key. Upstream `uuid`/`id` when present, generated otherwise.
    pub id: String,
    /// Name of the scenario that fired. Never empty.
    pub event: String,
    pub source_ip: String,
    /// Open vocabulary (`info`, `low`, `high`, ...).
    pub severity: String,
    /// Serialized as RFC 3339 with a `Z` suffix.
    pub timestamp: DateTime<Utc>,
}

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    /// A record with the same id was already stored; nothing was written.
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_serializes_with_utc_marker() {
        let record = AlertRecord {
            id: "a1".to_string(),
            event: "ssh-bf".to_string(),
            source_ip: "1.2.3.4".to_string(),
            severity: "high".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["timestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(json["id"], "a1");
    }
}
