// docrepo-core/src/mutation.rs
//! Simulate-then-commit validation of mutations
//!
//! Nothing here performs I/O. A plan is applied to a copy of the stored
//! document, the copy is validated against the schema and decoded as the
//! entity type, and only then does the caller receive the store update to
//! issue. A plan that fails here never reaches the store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::document::{
    format_timestamp, from_document, new_object_id, to_document, Entity, CREATED_AT, ID_FIELD,
    UPDATED_AT,
};
use crate::error::FieldErrors;
use crate::query::Path;
use crate::schema::{CompiledSchema, DOCUMENT_ERROR_KEY};
use crate::value_utils::{add_numbers, get_path, set_path};

/// Proposed change to one entity
#[derive(Debug, Clone, PartialEq)]
pub enum MutationPlan {
    /// Overwrite fields. Keys are field names, aliases or separator-encoded
    /// nested paths.
    Set(Map<String, Value>),
    /// Add `delta` to a numeric field
    Increment { field: String, delta: Value },
}

impl MutationPlan {
    pub fn set<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        MutationPlan::Set(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn increment(field: impl Into<String>, delta: impl Into<Value>) -> Self {
        MutationPlan::Increment {
            field: field.into(),
            delta: delta.into(),
        }
    }

    /// Short description for logs and errors
    pub fn describe(&self) -> String {
        match self {
            MutationPlan::Set(fields) => {
                let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
                format!("set [{}]", keys.join(", "))
            }
            MutationPlan::Increment { field, delta } => format!("increment {} by {}", field, delta),
        }
    }
}

/// Store update in `$set` / `$inc` form, keyed by resolved paths
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateDoc {
    pub set: BTreeMap<Path, Value>,
    pub inc: BTreeMap<Path, Value>,
}

impl UpdateDoc {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.inc.is_empty()
    }

    /// `{"$set": {...}, "$inc": {...}}` with dotted keys
    pub fn to_json(&self) -> Value {
        let render = |entries: &BTreeMap<Path, Value>| {
            Value::Object(
                entries
                    .iter()
                    .map(|(path, value)| (path.dotted(), value.clone()))
                    .collect(),
            )
        };

        let mut update = Map::new();
        if !self.set.is_empty() {
            update.insert("$set".to_string(), render(&self.set));
        }
        if !self.inc.is_empty() {
            update.insert("$inc".to_string(), render(&self.inc));
        }
        Value::Object(update)
    }

    /// Apply to a document the way the store would. Stops at the first path
    /// that cannot be applied.
    pub fn apply_to(&self, doc: &mut Value) -> Result<(), ApplyError> {
        for (path, value) in &self.set {
            if !set_path(doc, path.segments(), value.clone()) {
                return Err(ApplyError::NotAnObject(path.dotted()));
            }
        }
        for (path, delta) in &self.inc {
            let next = match get_path(doc, path.segments()) {
                None | Some(Value::Null) => delta.clone(),
                Some(current) => match add_numbers(current, delta) {
                    Some(next) => next,
                    None if current.is_number() && delta.is_number() => {
                        return Err(ApplyError::Overflow(path.dotted()))
                    }
                    None => return Err(ApplyError::NotNumeric(path.dotted())),
                },
            };
            if !set_path(doc, path.segments(), next) {
                return Err(ApplyError::NotAnObject(path.dotted()));
            }
        }
        Ok(())
    }
}

/// Why an update could not be applied, with the dotted path it failed at
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("cannot set a field inside a non-object value")]
    NotAnObject(String),
    #[error("cannot increment a non-numeric value")]
    NotNumeric(String),
    #[error("increment overflows the numeric range")]
    Overflow(String),
}

impl ApplyError {
    pub fn path(&self) -> &str {
        match self {
            ApplyError::NotAnObject(path) | ApplyError::NotNumeric(path) | ApplyError::Overflow(path) => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationError {
    /// The plan names a field the schema does not declare
    UnknownField(String),
    /// The simulated post-state violates the schema
    Rejected(FieldErrors),
}

/// Validated post-state plus the update that produces it
#[derive(Debug, Clone)]
pub struct Simulation {
    pub document: Value,
    pub update: UpdateDoc,
}

/// Resolve a plan into a store update. `created_at` and the identifier are
/// dropped, `updated_at` is always stamped with `now`.
pub fn plan_update(
    schema: &CompiledSchema,
    plan: &MutationPlan,
    now: DateTime<Utc>,
    separator: &str,
) -> Result<UpdateDoc, MutationError> {
    let mut update = UpdateDoc::default();

    match plan {
        MutationPlan::Set(fields) => {
            for (name, value) in fields {
                let path = resolve_target(schema, name, separator)
                    .ok_or_else(|| MutationError::UnknownField(name.clone()))?;
                if matches!(path.head(), CREATED_AT | ID_FIELD | UPDATED_AT) {
                    debug!(schema = schema.name(), field = %name, "dropping protected field from mutation");
                    continue;
                }
                update.set.insert(path, value.clone());
            }
        }
        MutationPlan::Increment { field, delta } => {
            let key = schema
                .resolve_key(field)
                .ok_or_else(|| MutationError::UnknownField(field.clone()))?;
            if matches!(key, CREATED_AT | ID_FIELD | UPDATED_AT) {
                let mut errors = FieldErrors::new();
                errors.add(key, "field cannot be incremented");
                return Err(MutationError::Rejected(errors));
            }
            if !delta.is_number() {
                let mut errors = FieldErrors::new();
                errors.add(key, format!("increment must be a number, got {}", delta));
                return Err(MutationError::Rejected(errors));
            }
            update.inc.insert(Path::field(key), delta.clone());
        }
    }

    update.set.insert(
        Path::field(UPDATED_AT),
        Value::String(format_timestamp(&now)),
    );
    Ok(update)
}

fn resolve_target(schema: &CompiledSchema, name: &str, separator: &str) -> Option<Path> {
    if let Some(key) = schema.resolve_key(name) {
        return Some(Path::field(key));
    }
    let path = Path::parse(name, separator)?;
    let head = schema.resolve_key(path.head())?.to_string();
    Some(path.with_head(&head))
}

/// Apply `plan` to a copy of `existing` and validate the result.
pub fn simulate_value(
    schema: &CompiledSchema,
    existing: &Value,
    plan: &MutationPlan,
    now: DateTime<Utc>,
    separator: &str,
) -> Result<Simulation, MutationError> {
    let update = plan_update(schema, plan, now, separator)?;

    let mut document = existing.clone();
    if let Err(e) = update.apply_to(&mut document) {
        let mut errors = FieldErrors::new();
        errors.add(e.path(), e.to_string());
        return Err(MutationError::Rejected(errors));
    }

    schema.validate(&document).map_err(MutationError::Rejected)?;
    Ok(Simulation { document, update })
}

/// [`simulate_value`], then construct the entity from the simulated state so
/// its own decoding and cross-field rules run as well.
pub fn simulate<T: Entity>(
    schema: &CompiledSchema,
    existing: &Value,
    plan: &MutationPlan,
    now: DateTime<Utc>,
    separator: &str,
) -> Result<(T, Simulation), MutationError> {
    let simulation = simulate_value(schema, existing, plan, now, separator)?;
    let entity = construct::<T>(&simulation.document).map_err(MutationError::Rejected)?;
    Ok((entity, simulation))
}

/// Check a document the store has already written, with the same rules a
/// simulation applies.
pub fn validate_stored<T: Entity>(schema: &CompiledSchema, document: &Value) -> Result<T, FieldErrors> {
    schema.validate(document)?;
    construct::<T>(document)
}

fn construct<T: Entity>(document: &Value) -> Result<T, FieldErrors> {
    let entity: T = from_document(document.clone()).map_err(|e| {
        let mut errors = FieldErrors::new();
        errors.add(DOCUMENT_ERROR_KEY, e.to_string());
        errors
    })?;
    entity.validate().into_result()?;
    Ok(entity)
}

/// Stored form of a new entity: identifier assigned if absent, both
/// timestamps stamped with `now`, fully validated.
pub fn prepare_insert<T: Entity>(
    schema: &CompiledSchema,
    entity: &T,
    now: DateTime<Utc>,
) -> Result<Value, FieldErrors> {
    let mut fields = to_document(entity).map_err(|e| {
        let mut errors = FieldErrors::new();
        errors.add(DOCUMENT_ERROR_KEY, e.to_string());
        errors
    })?;

    let id = match fields.get(ID_FIELD).and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => new_object_id(),
    };
    let stamp = Value::String(format_timestamp(&now));
    fields.insert(ID_FIELD.to_string(), Value::String(id));
    fields.insert(CREATED_AT.to_string(), stamp.clone());
    fields.insert(UPDATED_AT.to_string(), stamp);

    let document = Value::Object(fields);
    validate_stored::<T>(schema, &document)?;
    Ok(document)
}
