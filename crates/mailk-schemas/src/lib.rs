//! mailk-schemas
//!
//! Wire-level data model for MailRequest records: desired state (`MailSpec`),
//! observed state (`MailStatus`), record metadata and status conditions.
//! JSON shape is camelCase so persisted documents and API payloads match the
//! resource manifests operators write.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deletion-guard marker attached to every record the controller has observed.
pub const FINALIZER: &str = "mail.circa10a.github.io/finalizer";

/// Annotation that, when truthy, releases the deletion guard without
/// cancelling the provider order.
pub const SKIP_CANCEL_ANNOTATION: &str = "mail.circa10a.github.io/skip-cancel";

pub const CONDITION_VALIDATED: &str = "Validated";
pub const CONDITION_FULFILLED: &str = "Fulfilled";

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Store key of a MailRequest record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub namespace: String,
    pub name: String,
}

impl RecordKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Store-owned metadata. `generation` moves only when `spec` changes;
/// `resource_version` moves on every write and backs optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    pub namespace: String,
    pub name: String,
    pub uid: Uuid,
    pub generation: i64,
    pub resource_version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl RecordMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: Uuid::new_v4(),
            generation: 1,
            resource_version: 1,
            deletion_requested_at: None,
            finalizers: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn is_deletion_requested(&self) -> bool {
        self.deletion_requested_at.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns `true` if the finalizer was added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns `true` if the finalizer was present and removed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }

    /// Boolean view of an annotation. Absent or unparseable values are `false`.
    pub fn annotation_flag(&self, key: &str) -> bool {
        self.annotations
            .get(key)
            .map(|v| parse_flag(v))
            .unwrap_or(false)
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// Desired state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default)]
    pub address1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address2: Option<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postcode: String,
    #[serde(default)]
    pub country: String,
}

/// Desired state of a MailRequest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailSpec {
    #[serde(default)]
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub simplex: bool,
    #[serde(default)]
    pub color: bool,
    #[serde(default)]
    pub flat: bool,
    #[serde(default)]
    pub stamp: bool,
    #[serde(default)]
    pub to: Address,
    #[serde(default)]
    pub from: Address,
}

// ---------------------------------------------------------------------------
// Observed state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(b: bool) -> Self {
        if b {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A named, timestamped observation attached to the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default)]
    pub observed_generation: i64,
}

/// Observed state of a MailRequest. Written only by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailStatus {
    #[serde(rename = "orderID", default, skip_serializing_if = "String::is_empty")]
    pub order_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub sent: bool,
    #[serde(default)]
    pub total: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl MailStatus {
    pub fn has_order(&self) -> bool {
        !self.order_id.is_empty()
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// A complete MailRequest record as held by the resource store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailRequest {
    pub metadata: RecordMeta,
    pub spec: MailSpec,
    #[serde(default)]
    pub status: MailStatus,
}

impl MailRequest {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: MailSpec) -> Self {
        Self {
            metadata: RecordMeta::new(namespace, name),
            spec,
            status: MailStatus::default(),
        }
    }

    pub fn key(&self) -> RecordKey {
        self.metadata.key()
    }
}

// ---------------------------------------------------------------------------
// Change notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    DeleteRequested,
    Resync,
}

/// Change notification delivered by the resource store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub key: RecordKey,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(key: RecordKey, kind: ChangeKind) -> Self {
        Self { key, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizer_add_is_idempotent() {
        let mut meta = RecordMeta::new("default", "letter");
        assert!(meta.add_finalizer(FINALIZER));
        assert!(!meta.add_finalizer(FINALIZER));
        assert_eq!(meta.finalizers.len(), 1);
        assert!(meta.remove_finalizer(FINALIZER));
        assert!(!meta.remove_finalizer(FINALIZER));
    }

    #[test]
    fn annotation_flag_parses_booleans() {
        let mut meta = RecordMeta::new("default", "letter");
        assert!(!meta.annotation_flag(SKIP_CANCEL_ANNOTATION));

        for truthy in ["true", "TRUE", " 1 ", "yes", "on"] {
            meta.annotations
                .insert(SKIP_CANCEL_ANNOTATION.to_string(), truthy.to_string());
            assert!(meta.annotation_flag(SKIP_CANCEL_ANNOTATION), "{truthy}");
        }
        for falsy in ["false", "0", "no", "off", "", "maybe", "y", "t"] {
            meta.annotations
                .insert(SKIP_CANCEL_ANNOTATION.to_string(), falsy.to_string());
            assert!(!meta.annotation_flag(SKIP_CANCEL_ANNOTATION), "{falsy}");
        }
    }

    #[test]
    fn status_uses_camel_case_wire_names() {
        let status = MailStatus {
            order_id: "order-123".to_string(),
            state: "awaiting_fulfillment".to_string(),
            valid: true,
            total: 10,
            cancellation_reason: Some("duplicate".to_string()),
            ..MailStatus::default()
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["orderID"], "order-123");
        assert_eq!(v["cancellationReason"], "duplicate");
        assert_eq!(v["valid"], true);
        assert_eq!(v["sent"], false);
        assert!(v.get("conditions").is_none());
    }

    #[test]
    fn spec_parses_manifest_fields() {
        let raw = r#"{
            "service": "USPS_FIRST_CLASS",
            "url": "https://example.com/letter.pdf",
            "customerReference": "inv-42",
            "color": true,
            "to": {"name": "Ada", "address1": "1 Main St", "city": "Austin",
                   "state": "TX", "postcode": "78701", "country": "US"},
            "from": {"name": "Bob", "address1": "2 Side St", "city": "Dallas",
                     "state": "TX", "postcode": "75201", "country": "US"}
        }"#;
        let spec: MailSpec = serde_json::from_str(raw).unwrap();
        assert_eq!(spec.customer_reference.as_deref(), Some("inv-42"));
        assert!(spec.color);
        assert!(!spec.simplex);
        assert!(spec.file_path.is_none());
        assert_eq!(spec.to.city, "Austin");
    }
}
