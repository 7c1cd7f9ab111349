// docrepo-core/src/document.rs
//! Entities and their stored document form
//!
//! A stored document is a JSON object. The identifier lives under `_id`, the
//! timestamps under `created_at` / `updated_at` as RFC 3339 strings with fixed
//! microsecond precision, so string order equals chronological order.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{FieldErrors, RepositoryError, Result};

pub const ID_FIELD: &str = "_id";
pub const ID_NAME: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// Fresh store identifier (UUID v4, simple form)
pub fn new_object_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Current time at storage precision
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Serde adapter for timestamps in their stored form
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }
}

/// Identifier and timestamps shared by every entity.
///
/// Embed with `#[serde(flatten)]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(with = "timestamp", default = "now")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "timestamp", default = "now")]
    pub updated_at: DateTime<Utc>,
}

impl EntityMeta {
    pub fn new() -> Self {
        let ts = now();
        Self {
            id: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new()
        }
    }
}

impl Default for EntityMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A typed schema that can be bound to a collection.
///
/// The JSON schema returned by [`Entity::schema_definition`] carries the
/// constraints serde cannot express (ranges, enumerations, patterns, aliases).
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const SCHEMA_NAME: &'static str;

    /// Schemas this type specialises; it may read collections bound to them.
    const LINEAGE: &'static [&'static str] = &[];

    fn schema_definition() -> Value;

    fn meta(&self) -> &EntityMeta;

    fn meta_mut(&mut self) -> &mut EntityMeta;

    /// Cross-field rules that a per-field schema cannot state.
    fn validate(&self) -> FieldErrors {
        FieldErrors::new()
    }

    fn id(&self) -> Option<&str> {
        self.meta().id.as_deref()
    }

    /// True when `schema_name` is this type or one of its ancestors.
    fn satisfies(schema_name: &str) -> bool {
        Self::SCHEMA_NAME == schema_name || Self::LINEAGE.contains(&schema_name)
    }
}

/// Serialize an entity into its stored object form.
pub fn to_document<T: Entity>(entity: &T) -> Result<Map<String, Value>> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(RepositoryError::Serialization(format!(
            "{} serialized to a non-object value: {}",
            T::SCHEMA_NAME,
            other
        ))),
    }
}

/// Build an entity from a stored document.
pub fn from_document<T: Entity>(doc: Value) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| {
        RepositoryError::Serialization(format!(
            "stored document does not decode as {}: {}",
            T::SCHEMA_NAME,
            e
        ))
    })
}

/// `_id` of a stored document
pub fn document_id(doc: &Value) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Note {
        #[serde(flatten)]
        meta: EntityMeta,
        text: String,
    }

    impl Entity for Note {
        const SCHEMA_NAME: &'static str = "Note";
        const LINEAGE: &'static [&'static str] = &["Text"];

        fn schema_definition() -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        fn meta(&self) -> &EntityMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.meta
        }
    }

    #[test]
    fn test_object_ids_are_unique() {
        let a = new_object_id();
        let b = new_object_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let early = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let later = parse_timestamp("2024-01-01T00:00:00.100Z").unwrap();
        let (a, b) = (format_timestamp(&early), format_timestamp(&later));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_to_document_omits_missing_id() {
        let note = Note {
            meta: EntityMeta::new(),
            text: "hello".into(),
        };
        let doc = to_document(&note).unwrap();
        assert!(!doc.contains_key(ID_FIELD));
        assert_eq!(doc["text"], "hello");
        assert!(doc[CREATED_AT].is_string());
    }

    #[test]
    fn test_round_trip_through_document() {
        let note = Note {
            meta: EntityMeta::with_id("n1"),
            text: "hello".into(),
        };
        let doc = Value::Object(to_document(&note).unwrap());
        assert_eq!(document_id(&doc), Some("n1"));

        let back: Note = from_document(doc).unwrap();
        assert_eq!(back.meta, note.meta);
        assert_eq!(back.text, "hello");
    }

    #[test]
    fn test_from_document_reports_schema() {
        let err = from_document::<Note>(json!({"_id": "x", "text": 5})).unwrap_err();
        assert!(err.to_string().contains("Note"));
    }

    #[test]
    fn test_satisfies_lineage() {
        assert!(Note::satisfies("Note"));
        assert!(Note::satisfies("Text"));
        assert!(!Note::satisfies("Interview"));
    }
}
