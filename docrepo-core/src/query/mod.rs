// docrepo-core/src/query/mod.rs
//! Keyword filters and the store-facing filter they translate into
//!
//! Callers describe what they want with [`Filters`]: entity field names (or
//! their aliases) mapped to required values, plus nested keys such as
//! `company__name`. The [`QueryTranslator`] turns them into a [`StoreFilter`]
//! whose keys are explicit [`Path`]s, so a field name that happens to contain
//! a dot or the separator never gets split by accident.

pub mod translator;

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::document::ID_FIELD;

pub use translator::{QueryTranslator, TranslateError};

/// Ordered segments addressing a value inside a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<String>);

impl Path {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Path(segments.into_iter().map(Into::into).collect())
    }

    pub fn field(name: impl Into<String>) -> Self {
        Path(vec![name.into()])
    }

    /// Split a separator-encoded keyword (`company__name`).
    ///
    /// `None` when the key has no separator or yields an empty segment.
    pub fn parse(key: &str, separator: &str) -> Option<Self> {
        if separator.is_empty() || !key.contains(separator) {
            return None;
        }
        let segments: Vec<String> = key.split(separator).map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }
        Some(Path(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn head(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Same path with the first segment replaced
    pub fn with_head(&self, head: &str) -> Self {
        let mut segments = self.0.clone();
        if let Some(first) = segments.first_mut() {
            *first = head.to_string();
        }
        Path(segments)
    }

    /// Dot-joined form used by document-store query languages
    pub fn dotted(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

/// Keyword filter arguments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    pub(crate) keywords: BTreeMap<String, Value>,
    pub(crate) paths: BTreeMap<Path, Value>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on the entity identifier.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq(crate::document::ID_NAME, id.into())
    }

    /// Require `key` (field name, alias or separator-encoded path) to equal `value`.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Require the value at an explicit nested path.
    pub fn nested(mut self, path: Path, value: impl Into<Value>) -> Self {
        self.paths.insert(path, value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.keywords.insert(key.into(), value.into());
    }

    /// True when no argument was supplied at all
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.paths.is_empty()
    }

    pub fn keywords(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keywords.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filters = Filters::new();
        for (key, value) in iter {
            filters.insert(key, value);
        }
        filters
    }
}

/// Condition on a single path
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    In(Vec<Value>),
}

/// Translated filter: every key is a resolved store path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreFilter {
    conditions: BTreeMap<Path, Condition>,
}

impl StoreFilter {
    /// Matches every document
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        let mut filter = Self::default();
        filter.insert(Path::field(ID_FIELD), Condition::Eq(Value::String(id.into())));
        filter
    }

    pub fn by_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().with_ids(ids)
    }

    /// Additionally restrict `_id` to `ids`. An existing `_id` condition is
    /// intersected with the list, never replaced.
    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<Value> = ids.into_iter().map(|id| Value::String(id.into())).collect();
        let path = Path::field(ID_FIELD);
        let condition = match self.conditions.remove(&path) {
            None => Condition::In(ids),
            Some(Condition::Eq(id)) if ids.contains(&id) => Condition::Eq(id),
            Some(Condition::Eq(_)) => Condition::In(Vec::new()),
            Some(Condition::In(existing)) => {
                Condition::In(existing.into_iter().filter(|id| ids.contains(id)).collect())
            }
        };
        self.insert(path, condition);
        self
    }

    pub fn insert(&mut self, path: Path, condition: Condition) {
        self.conditions.insert(path, condition);
    }

    pub fn get(&self, path: &Path) -> Option<&Condition> {
        self.conditions.get(path)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&Path, &Condition)> {
        self.conditions.iter()
    }

    /// Mongo-style JSON rendering (`{"company.name": "Acme", "_id": {"$in": [..]}}`)
    pub fn to_query(&self) -> Value {
        let mut query = Map::new();
        for (path, condition) in &self.conditions {
            let rendered = match condition {
                Condition::Eq(value) => value.clone(),
                Condition::In(values) => {
                    let mut op = Map::new();
                    op.insert("$in".to_string(), Value::Array(values.clone()));
                    Value::Object(op)
                }
            };
            query.insert(path.dotted(), rendered);
        }
        Value::Object(query)
    }
}

impl fmt::Display for StoreFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_query())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_parse() {
        let path = Path::parse("company__name", "__").unwrap();
        assert_eq!(path.segments(), &["company".to_string(), "name".to_string()]);
        assert_eq!(path.dotted(), "company.name");
        assert_eq!(path.head(), "company");
    }

    #[test]
    fn test_path_parse_rejects_plain_and_empty_segments() {
        assert!(Path::parse("status", "__").is_none());
        assert!(Path::parse("__private", "__").is_none());
        assert!(Path::parse("company__", "__").is_none());
        assert!(Path::parse("a____b", "__").is_none());
    }

    #[test]
    fn test_path_with_head() {
        let path = Path::new(["job_id", "x"]).with_head("jobId");
        assert_eq!(path.dotted(), "jobId.x");
    }

    #[test]
    fn test_filters_builder() {
        let filters = Filters::new().eq("status", "pending").eq("score", 10);
        assert!(!filters.is_empty());
        assert_eq!(filters.keywords().count(), 2);
        assert!(Filters::new().is_empty());
    }

    #[test]
    fn test_filters_from_iter() {
        let filters: Filters = vec![("status", json!("pending"))].into_iter().collect();
        assert_eq!(filters, Filters::new().eq("status", "pending"));
    }

    #[test]
    fn test_store_filter_to_query() {
        let mut filter = StoreFilter::by_ids(["a", "b"]);
        filter.insert(Path::new(["company", "name"]), Condition::Eq(json!("Acme")));
        assert_eq!(
            filter.to_query(),
            json!({"_id": {"$in": ["a", "b"]}, "company.name": "Acme"})
        );
    }

    #[test]
    fn test_store_filter_by_id() {
        let filter = StoreFilter::by_id("x1");
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.to_query(), json!({"_id": "x1"}));
        assert!(StoreFilter::all().is_empty());
    }

    #[test]
    fn test_with_ids_intersects_existing_id_condition() {
        let pinned = StoreFilter::by_id("b").with_ids(["a", "b"]);
        assert_eq!(pinned.to_query(), json!({"_id": "b"}));

        let disjoint = StoreFilter::by_id("c").with_ids(["a", "b"]);
        assert_eq!(disjoint.to_query(), json!({"_id": {"$in": []}}));

        let narrowed = StoreFilter::by_ids(["a", "b", "c"]).with_ids(["c", "a"]);
        assert_eq!(narrowed.to_query(), json!({"_id": {"$in": ["a", "c"]}}));
    }
}
