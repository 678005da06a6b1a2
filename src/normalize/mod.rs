//! Schema normalization: any supported raw alert shape -> [`AlertRecord`].
//!
//! Every field is resolved independently with first-match-wins lookups and a
//! default, so a partially malformed alert still yields a record. The only
//! rejection is a raw value that is not a JSON object.

pub mod meta;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use self::meta::{scalar_text, Meta, MetaMap};
use crate::model::{AlertRecord, DEFAULT_SEVERITY, UNKNOWN};

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("raw alert is not a JSON object (got {0})")]
    NotAnObject(&'static str),
}

/// How to mint an id for alerts that carry neither `uuid` nor `id`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdFallback {
    /// Fresh UUIDv4 on every normalization. Re-delivered events are stored again.
    #[default]
    Random,
    /// UUIDv5 over `(event, source_ip, created_at)` when `created_at` is present;
    /// random otherwise.
    ContentHash,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    id_fallback: IdFallback,
}

impl Normalizer {
    pub fn new(id_fallback: IdFallback) -> Self {
        Self { id_fallback }
    }

    pub fn normalize(&self, raw: &Value) -> Result<AlertRecord, NormalizeError> {
        if !raw.is_object() {
            return Err(NormalizeError::NotAnObject(json_kind(raw)));
        }

        let meta = resolve_meta(raw);

        let event = text_field(raw, "scenario")
            .or_else(|| text_field(raw, "event"))
            .unwrap_or_else(|| UNKNOWN.to_string());

        let source_ip = raw
            .get("source")
            .and_then(|s| s.get("ip"))
            .and_then(non_empty_text)
            .or_else(|| meta_field(&meta, "source_ip"))
            .or_else(|| text_field(raw, "source_ip"))
            .or_else(|| text_field(raw, "ip"))
            .unwrap_or_else(|| UNKNOWN.to_string());

        let severity =
            meta_field(&meta, "severity").unwrap_or_else(|| DEFAULT_SEVERITY.to_string());

        let created_at = raw.get("created_at").and_then(|v| {
            let parsed = parse_timestamp(v);
            if parsed.is_none() {
                debug!(created_at = %v, "unparseable created_at, using ingestion time");
            }
            parsed
        });
        let timestamp = created_at.unwrap_or_else(Utc::now);

        let id = id_field(raw, "uuid")
            .or_else(|| id_field(raw, "id"))
            .unwrap_or_else(|| match (self.id_fallback, created_at) {
                (IdFallback::ContentHash, Some(ts)) => content_id(&event, &source_ip, ts),
                _ => Uuid::new_v4().to_string(),
            });

        Ok(AlertRecord {
            id,
            event,
            source_ip,
            severity,
            timestamp,
        })
    }
}

/// Normalize with the default (random) id fallback.
pub fn normalize(raw: &Value) -> Result<AlertRecord, NormalizeError> {
    Normalizer::default().normalize(raw)
}

/// `meta` if present in any recognised shape, else the first entry of the
/// CrowdSec `events` array.
fn resolve_meta(raw: &Value) -> MetaMap {
    let meta = Meta::classify(raw.get("meta"));
    if !meta.is_absent() {
        return meta.flatten();
    }
    Meta::classify(raw.get("events")).flatten()
}

fn meta_field(meta: &MetaMap, key: &str) -> Option<String> {
    meta.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn non_empty_text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn text_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(non_empty_text)
}

/// Identifiers may arrive as strings or integers (LAPI alert ids are numeric).
fn id_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .filter(|v| v.is_string() || v.is_number())
        .and_then(scalar_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn content_id(event: &str, source_ip: &str, ts: DateTime<Utc>) -> String {
    let key = format!("{}|{}|{}", event, source_ip, ts.to_rfc3339());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Integer epochs above this are read as milliseconds (1e11 s is year 5138).
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Accepts RFC 3339, naive `YYYY-MM-DD[ T]HH:MM:SS[.f]` (read as UTC) and
/// integer epoch seconds or milliseconds. Instants outside years 0..=9999
/// are rejected so they never reach storage.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    parse_any_timestamp(value).filter(|dt| (0..=9999).contains(&dt.year()))
}

fn parse_any_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(epoch) = value.as_i64() {
        return if epoch.abs() > EPOCH_MILLIS_THRESHOLD {
            DateTime::from_timestamp_millis(epoch)
        } else {
            DateTime::from_timestamp(epoch, 0)
        };
    }
    let s = value.as_str()?.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
