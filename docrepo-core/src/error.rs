// docrepo-core/src/error.rs
//! Error taxonomy for the repository engine

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Per-field validation messages, keyed by the stored field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message for `field`. The first message for a field wins.
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> std::result::Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", field, message)?;
            first = false;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for FieldErrors {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut errors = FieldErrors::new();
        for (field, message) in iter {
            errors.add(field, message);
        }
        errors
    }
}

/// Validation failure of a single document inside a batch mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFailure {
    pub id: String,
    pub errors: FieldErrors,
}

/// Faults raised by the document store driver. Never retried by the engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid store query: {0}")]
    InvalidQuery(String),

    #[error("duplicate key '{id}' in collection '{collection}'")]
    DuplicateKey { collection: String, id: String },

    #[error("store serialization error: {0}")]
    Serialization(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("collection '{0}' is not registered")]
    UnregisteredCollection(String),

    #[error("schema '{0}' is not bound to any collection")]
    UnregisteredSchema(String),

    #[error("collection '{collection}' is bound to schema '{registered}', not '{requested}'")]
    SchemaMismatch {
        collection: String,
        registered: String,
        requested: String,
    },

    #[error("collection '{collection}' is already bound to schema '{existing}', cannot rebind to '{requested}'")]
    BindingConflict {
        collection: String,
        existing: String,
        requested: String,
    },

    #[error("empty filter for {operation} on '{collection}'; use the explicit *_all variant instead")]
    EmptyFilter {
        collection: String,
        operation: &'static str,
    },

    #[error("schema '{schema}' has no field named '{field}'")]
    UnknownField { schema: String, field: String },

    #[error("mutation rejected for '{collection}' document '{id}': {errors}")]
    MutationRejected {
        collection: String,
        id: String,
        errors: FieldErrors,
    },

    #[error("batch mutation rejected for '{collection}': {failed} of {total} documents failed validation")]
    BatchRejected {
        collection: String,
        failed: usize,
        total: usize,
        sample: Vec<DocumentFailure>,
    },

    #[error("document '{id}' in '{collection}' disappeared during {operation}")]
    LostDocument {
        collection: String,
        id: String,
        operation: &'static str,
    },

    /// The document no longer matched the snapshot its mutation was
    /// validated against.
    #[error("document '{id}' in '{collection}' was modified concurrently during {operation}")]
    StaleDocument {
        collection: String,
        id: String,
        operation: &'static str,
    },

    #[error("no document in '{collection}' matches {filter}")]
    NotFound { collection: String, filter: String },

    #[error("more than one document in '{collection}' matches {filter}")]
    AmbiguousMatch { collection: String, filter: String },

    #[error("invalid schema definition: {0}")]
    SchemaDefinition(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepositoryError {
    /// Field errors of a rejected mutation, if this is one. For a rejected
    /// batch these are the errors of the first sampled document; the full
    /// sample is in [`RepositoryError::rejected_documents`].
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            RepositoryError::MutationRejected { errors, .. } => Some(errors),
            RepositoryError::BatchRejected { sample, .. } => sample.first().map(|f| &f.errors),
            _ => None,
        }
    }

    /// Every validation failure carried by a rejection, batch or single.
    pub fn rejected_documents(&self) -> Vec<(&str, &FieldErrors)> {
        match self {
            RepositoryError::MutationRejected { id, errors, .. } => vec![(id.as_str(), errors)],
            RepositoryError::BatchRejected { sample, .. } => sample
                .iter()
                .map(|failure| (failure.id.as_str(), &failure.errors))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether validation refused the mutation before anything was written.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RepositoryError::MutationRejected { .. } | RepositoryError::BatchRejected { .. }
        )
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_errors_first_message_wins() {
        let mut errors = FieldErrors::new();
        errors.add("score", "must be <= 100");
        errors.add("score", "expected integer");
        assert_eq!(errors.get("score"), Some("must be <= 100"));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_field_errors_display_is_sorted() {
        let errors: FieldErrors = vec![
            ("status".to_string(), "not allowed".to_string()),
            ("score".to_string(), "too large".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(errors.to_string(), "score: too large; status: not allowed");
    }

    #[test]
    fn test_mutation_rejected_carries_errors() {
        let mut errors = FieldErrors::new();
        errors.add("score", "must be <= 100");
        let err = RepositoryError::MutationRejected {
            collection: "interviews".into(),
            id: "abc".into(),
            errors,
        };
        assert!(err.to_string().contains("score: must be <= 100"));
        assert!(err.field_errors().unwrap().contains("score"));
    }

    #[test]
    fn test_batch_rejection_exposes_field_errors() {
        let mut errors = FieldErrors::new();
        errors.add("rating", "must be <= 5");
        let err = RepositoryError::BatchRejected {
            collection: "feedback".into(),
            failed: 1,
            total: 2,
            sample: vec![DocumentFailure {
                id: "f2".into(),
                errors,
            }],
        };
        assert!(err.is_rejection());
        assert!(err.field_errors().unwrap().contains("rating"));
        let rejected = err.rejected_documents();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, "f2");
    }

    #[test]
    fn test_store_error_is_transparent() {
        let err: RepositoryError = StoreError::Unavailable("connection reset".into()).into();
        assert_eq!(err.to_string(), "store unavailable: connection reset");
    }
}
