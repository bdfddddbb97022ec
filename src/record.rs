//! Core data model: the job-file record, its lifecycle bookkeeping, and the
//! wire-format helpers shared by every backend adapter.
//!
//! Records round-trip as JSON objects with camelCase keys. The Content-API
//! and flat-file backends serialize timestamps as ISO-8601 strings; the
//! document-DB backend returns native `{seconds, nanos}` objects. Both forms
//! normalize to `chrono::DateTime<Utc>` on read via the `ts` serde helpers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Approval lifecycle state of a job file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    #[default]
    Pending,
    Checked,
    Approved,
    Rejected,
}

impl LifecycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Checked => "checked",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_wire_value(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "checked" => Some(Self::Checked),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field whose value must be unique among active records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusinessKey {
    JobFileNumber,
    InvoiceNumber,
    AirwayBillNumber,
}

impl BusinessKey {
    /// Wire-format field name, as reported in `DuplicateKey` errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JobFileNumber => "jobFileNumber",
            Self::InvoiceNumber => "invoiceNumber",
            Self::AirwayBillNumber => "airwayBillNumber",
        }
    }
}

impl fmt::Display for BusinessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actor/timestamp bookkeeping written by save and the approval transitions.
///
/// Each pair is set only by its corresponding transition and cleared together
/// when a later transition supersedes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleActors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(with = "ts::option", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated_by: Option<String>,
    #[serde(with = "ts::option", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_by: Option<String>,
    #[serde(with = "ts::option", skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(with = "ts::option", skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(with = "ts::option", skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl LifecycleActors {
    /// Clear the checked/approved/rejected groups, leaving creation and
    /// last-update bookkeeping intact. Used when an edit reopens approval.
    pub fn clear_signoff(&mut self) {
        self.checked_by = None;
        self.checked_at = None;
        self.approved_by = None;
        self.approved_at = None;
        self.rejected_by = None;
        self.rejected_at = None;
        self.rejection_reason = None;
    }
}

/// Soft-delete stamp. Present iff the record resides in quarantine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionStamp {
    pub deleted_by: String,
    #[serde(with = "ts")]
    pub deleted_at: DateTime<Utc>,
}

/// The central entity: one job file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobFileRecord {
    /// Stable identifier. Always `record_id(job_file_number)`, never chosen
    /// independently.
    pub id: String,
    pub job_file_number: String,
    pub invoice_number: String,
    pub airway_bill_number: String,
    pub status: LifecycleStatus,
    #[serde(flatten)]
    pub actors: LifecycleActors,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion: Option<DeletionStamp>,
    /// Backend-assigned optimistic-concurrency token. In-memory bookkeeping
    /// only; never written back into the stored blob.
    #[serde(skip)]
    pub revision_token: Option<String>,
    /// Open map of shipment attributes (shipper, consignee, route, charges).
    /// Opaque to the store.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl JobFileRecord {
    /// New record with the id derived from the job-file number.
    pub fn new(job_file_number: &str) -> Self {
        Self {
            id: record_id(job_file_number),
            job_file_number: job_file_number.to_string(),
            ..Self::default()
        }
    }

    pub fn business_key_value(&self, key: BusinessKey) -> &str {
        match key {
            BusinessKey::JobFileNumber => &self.job_file_number,
            BusinessKey::InvoiceNumber => &self.invoice_number,
            BusinessKey::AirwayBillNumber => &self.airway_bill_number,
        }
    }

    fn payload_str(&self, key: &str) -> Option<String> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Derive the storage id from a job-file number.
///
/// Pure function: every character outside `[A-Za-z0-9_.-]` becomes `_`, so
/// business numbers like `JF/2024/001` are safe as document paths and file
/// names on every backend.
pub fn record_id(job_file_number: &str) -> String {
    job_file_number
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '.' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Flattened row for search/filter listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub id: String,
    pub job_file_number: String,
    pub invoice_number: String,
    pub airway_bill_number: String,
    pub status: LifecycleStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipper: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consignee: Option<String>,
    #[serde(with = "ts::option", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&JobFileRecord> for RecordSummary {
    fn from(record: &JobFileRecord) -> Self {
        Self {
            id: record.id.clone(),
            job_file_number: record.job_file_number.clone(),
            invoice_number: record.invoice_number.clone(),
            airway_bill_number: record.airway_bill_number.clone(),
            status: record.status,
            shipper: record.payload_str("shipper"),
            consignee: record.payload_str("consignee"),
            updated_at: record.actors.updated_at.or(record.actors.created_at),
        }
    }
}

/// Minimal user registry entry, carried by backup snapshots alongside job
/// files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(with = "ts::option", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Full snapshot for backup, independent of the active backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub job_files: Vec<JobFileRecord>,
    pub users: Vec<UserRecord>,
    #[serde(with = "ts")]
    pub created_at: DateTime<Utc>,
}

/// Timestamp (de)serialization accepting both wire forms.
///
/// Writes RFC 3339 strings. Reads either a string or a backend-native
/// `{seconds, nanos}` object (`_seconds`/`_nanoseconds` aliases included),
/// so every adapter hands the store one uniform timestamp type.
pub mod ts {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Iso(String),
        Native {
            #[serde(alias = "_seconds")]
            seconds: i64,
            #[serde(alias = "_nanoseconds", default)]
            nanos: u32,
        },
    }

    fn normalize<E: serde::de::Error>(raw: RawTimestamp) -> Result<DateTime<Utc>, E> {
        match raw {
            RawTimestamp::Iso(text) => DateTime::parse_from_rfc3339(&text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| E::custom(format!("invalid timestamp '{text}': {e}"))),
            RawTimestamp::Native { seconds, nanos } => Utc
                .timestamp_opt(seconds, nanos)
                .single()
                .ok_or_else(|| E::custom(format!("timestamp out of range: {seconds}s {nanos}ns"))),
        }
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        normalize(RawTimestamp::deserialize(de)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            ser: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => super::serialize(dt, ser),
                None => ser.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            de: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw = Option::<RawTimestamp>::deserialize(de)?;
            raw.map(normalize::<D::Error>).transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::{JobFileRecord, LifecycleStatus, RecordSummary, record_id};

    #[test]
    fn record_id_substitutes_path_unsafe_characters() {
        assert_eq!(record_id("JF/2024/001"), "JF_2024_001");
        assert_eq!(record_id("  JF 2024#9  "), "JF_2024_9");
        assert_eq!(record_id("plain-id_1.2"), "plain-id_1.2");
    }

    #[test]
    fn record_round_trips_with_flat_payload() {
        let mut record = JobFileRecord::new("JF/2024/001");
        record.invoice_number = "INV-5".to_string();
        record.payload.insert(
            "shipper".to_string(),
            serde_json::Value::String("Acme Exports".to_string()),
        );
        record.actors.created_by = Some("alice".to_string());
        record.actors.created_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());

        let json = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(json["jobFileNumber"], "JF/2024/001");
        assert_eq!(json["shipper"], "Acme Exports");
        assert_eq!(json["status"], "pending");
        assert!(json.get("deletion").is_none());
        assert!(json.get("revisionToken").is_none());

        let back: JobFileRecord = serde_json::from_value(json).expect("deserialize record");
        assert_eq!(back, record);
    }

    #[test]
    fn timestamps_normalize_from_both_wire_forms() {
        let iso: JobFileRecord = serde_json::from_str(
            r#"{"id":"A","jobFileNumber":"A","createdAt":"2024-03-01T08:00:00+00:00"}"#,
        )
        .expect("iso form");
        let native: JobFileRecord = serde_json::from_str(
            r#"{"id":"A","jobFileNumber":"A","createdAt":{"seconds":1709280000,"nanos":0}}"#,
        )
        .expect("native form");
        assert_eq!(iso.actors.created_at, native.actors.created_at);

        let firestore_style: JobFileRecord = serde_json::from_str(
            r#"{"id":"A","jobFileNumber":"A","createdAt":{"_seconds":1709280000,"_nanoseconds":0}}"#,
        )
        .expect("underscore aliases");
        assert_eq!(firestore_style.actors.created_at, iso.actors.created_at);
    }

    #[test]
    fn summary_pulls_display_fields_from_payload() {
        let mut record = JobFileRecord::new("JF-7");
        record.payload.insert(
            "consignee".to_string(),
            serde_json::Value::String("Globex GmbH".to_string()),
        );
        record.status = LifecycleStatus::Checked;

        let summary = RecordSummary::from(&record);
        assert_eq!(summary.consignee.as_deref(), Some("Globex GmbH"));
        assert_eq!(summary.shipper, None);
        assert_eq!(summary.status, LifecycleStatus::Checked);
    }
}
