// docrepo-core/src/schema/mod.rs
//! Compiled entity schemas
//!
//! Entities describe their constraints with a JSON-schema subset:
//!
//! ```json
//! {
//!   "type": "object",
//!   "required": ["status", "score"],
//!   "properties": {
//!     "status": {"type": "string", "enum": ["pending", "completed"]},
//!     "score": {"type": "integer", "minimum": 0, "maximum": 100},
//!     "job_id": {"type": ["string", "null"], "alias": "jobId"}
//!   }
//! }
//! ```
//!
//! `alias` names the key the field is stored under. The meta fields `id`
//! (stored as `_id`), `created_at` and `updated_at` are part of every schema.

pub mod registry;

use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use serde_json::{Map, Value};

use crate::document::{CREATED_AT, ID_FIELD, ID_NAME, UPDATED_AT};
use crate::error::{FieldErrors, RepositoryError, Result};

pub use registry::{SchemaBinding, SchemaRegistry};

/// Field-level error key used when the document itself is malformed
pub const DOCUMENT_ERROR_KEY: &str = "__document__";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl SchemaType {
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            _ => None,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SchemaType::Number | SchemaType::Integer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
        }
    }
}

/// One declared field with its constraints
#[derive(Clone, Debug)]
pub struct FieldSchema {
    pub name: String,
    pub alias: Option<String>,
    pub schema_type: Option<SchemaType>,
    pub nullable: bool,
    pub enum_values: Option<Vec<Value>>,
    pub pattern: Option<Regex>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, schema_type: Option<SchemaType>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            schema_type,
            nullable: false,
            enum_values: None,
            pattern: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            min_items: None,
            max_items: None,
        }
    }

    /// Key the field is stored and queried under
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    fn parse(name: &str, definition: &Value) -> Result<Self> {
        let definition = definition.as_object().ok_or_else(|| {
            RepositoryError::SchemaDefinition(format!("property '{}' must be an object", name))
        })?;

        let (schema_type, nullable) = match definition.get("type") {
            None => (None, false),
            Some(Value::String(type_str)) => (Some(parse_type(name, type_str)?), false),
            Some(Value::Array(types)) => {
                let mut parsed = None;
                let mut nullable = false;
                for entry in types {
                    let type_str = entry.as_str().ok_or_else(|| {
                        RepositoryError::SchemaDefinition(format!(
                            "property '{}' type entries must be strings",
                            name
                        ))
                    })?;
                    if type_str == "null" {
                        nullable = true;
                    } else if parsed.replace(parse_type(name, type_str)?).is_some() {
                        return Err(RepositoryError::SchemaDefinition(format!(
                            "property '{}' may combine one type with \"null\" only",
                            name
                        )));
                    }
                }
                (parsed, nullable)
            }
            Some(_) => {
                return Err(RepositoryError::SchemaDefinition(format!(
                    "property '{}' type must be a string or an array",
                    name
                )))
            }
        };

        let mut field = FieldSchema::new(name, schema_type);
        field.nullable = nullable;

        if let Some(alias) = definition.get("alias") {
            let alias = alias.as_str().filter(|a| !a.is_empty()).ok_or_else(|| {
                RepositoryError::SchemaDefinition(format!(
                    "property '{}' alias must be a non-empty string",
                    name
                ))
            })?;
            field.alias = Some(alias.to_string());
        }

        if let Some(enum_value) = definition.get("enum") {
            let values = enum_value.as_array().ok_or_else(|| {
                RepositoryError::SchemaDefinition(format!("property '{}' enum must be an array", name))
            })?;
            field.enum_values = Some(values.clone());
        }

        if let Some(pattern) = definition.get("pattern") {
            let pattern = pattern.as_str().ok_or_else(|| {
                RepositoryError::SchemaDefinition(format!(
                    "property '{}' pattern must be a string",
                    name
                ))
            })?;
            let regex = Regex::new(pattern).map_err(|e| {
                RepositoryError::SchemaDefinition(format!(
                    "property '{}' has invalid regex pattern: {}",
                    name, e
                ))
            })?;
            field.pattern = Some(regex);
        }

        field.minimum = parse_bound(name, definition, "minimum")?;
        field.maximum = parse_bound(name, definition, "maximum")?;
        field.min_length = parse_count(name, definition, "minLength")?;
        field.max_length = parse_count(name, definition, "maxLength")?;
        field.min_items = parse_count(name, definition, "minItems")?;
        field.max_items = parse_count(name, definition, "maxItems")?;

        Ok(field)
    }

    /// Check one present value against every constraint, returning the first
    /// violation.
    pub fn check(&self, value: &Value) -> std::result::Result<(), String> {
        if value.is_null() {
            return if self.nullable || self.schema_type.is_none() {
                Ok(())
            } else {
                Err("must not be null".to_string())
            };
        }

        if let Some(schema_type) = self.schema_type {
            if !schema_type.matches(value) {
                return Err(format!("expected type {}", schema_type.as_str()));
            }
        }

        if let Some(allowed) = &self.enum_values {
            if !allowed.contains(value) {
                let rendered: Vec<String> = allowed.iter().map(Value::to_string).collect();
                return Err(format!("must be one of [{}]", rendered.join(", ")));
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = self.minimum {
                if number < min {
                    return Err(format!("must be >= {}", min));
                }
            }
            if let Some(max) = self.maximum {
                if number > max {
                    return Err(format!("must be <= {}", max));
                }
            }
        }

        if let Some(s) = value.as_str() {
            let length = s.chars().count();
            if let Some(min) = self.min_length {
                if length < min {
                    return Err(format!("must be at least {} characters", min));
                }
            }
            if let Some(max) = self.max_length {
                if length > max {
                    return Err(format!("must be at most {} characters", max));
                }
            }
            if let Some(pattern) = &self.pattern {
                if !pattern.is_match(s) {
                    return Err(format!("does not match pattern '{}'", pattern.as_str()));
                }
            }
        }

        if let Some(arr) = value.as_array() {
            if let Some(min) = self.min_items {
                if arr.len() < min {
                    return Err(format!("has {} items, minimum required is {}", arr.len(), min));
                }
            }
            if let Some(max) = self.max_items {
                if arr.len() > max {
                    return Err(format!("has {} items, maximum allowed is {}", arr.len(), max));
                }
            }
        }

        Ok(())
    }
}

fn parse_type(field: &str, type_str: &str) -> Result<SchemaType> {
    SchemaType::from_str(type_str).ok_or_else(|| {
        RepositoryError::SchemaDefinition(format!(
            "unsupported type '{}' for field '{}'",
            type_str, field
        ))
    })
}

fn parse_bound(field: &str, definition: &Map<String, Value>, key: &str) -> Result<Option<f64>> {
    match definition.get(key) {
        None => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            RepositoryError::SchemaDefinition(format!("property '{}' {} must be a number", field, key))
        }),
    }
}

fn parse_count(field: &str, definition: &Map<String, Value>, key: &str) -> Result<Option<usize>> {
    match definition.get(key) {
        None => Ok(None),
        Some(value) => value.as_u64().map(|n| Some(n as usize)).ok_or_else(|| {
            RepositoryError::SchemaDefinition(format!(
                "property '{}' {} must be a non-negative integer",
                field, key
            ))
        }),
    }
}

/// Validated, queryable form of an entity schema
#[derive(Clone, Debug)]
pub struct CompiledSchema {
    name: String,
    /// canonical name -> field
    fields: BTreeMap<String, FieldSchema>,
    /// canonical name or alias -> canonical name
    lookup: HashMap<String, String>,
    /// stored keys that must be present
    required: Vec<String>,
}

impl CompiledSchema {
    pub fn from_value(name: &str, schema: &Value) -> Result<Self> {
        let obj = schema.as_object().ok_or_else(|| {
            RepositoryError::SchemaDefinition(format!("schema '{}' must be a JSON object", name))
        })?;

        if let Some(schema_type) = obj.get("type") {
            if schema_type.as_str() != Some("object") {
                return Err(RepositoryError::SchemaDefinition(format!(
                    "schema '{}' must describe an object",
                    name
                )));
            }
        }

        let mut fields = BTreeMap::new();
        for meta in meta_fields() {
            fields.insert(meta.name.clone(), meta);
        }

        if let Some(props) = obj.get("properties") {
            let props = props.as_object().ok_or_else(|| {
                RepositoryError::SchemaDefinition(format!("schema '{}' properties must be an object", name))
            })?;
            for (field_name, definition) in props {
                if fields.contains_key(field_name) {
                    return Err(RepositoryError::SchemaDefinition(format!(
                        "schema '{}' redeclares reserved field '{}'",
                        name, field_name
                    )));
                }
                fields.insert(field_name.clone(), FieldSchema::parse(field_name, definition)?);
            }
        }

        let mut lookup = HashMap::new();
        for field in fields.values() {
            for key in [Some(field.name.as_str()), field.alias.as_deref()].into_iter().flatten() {
                if let Some(previous) = lookup.insert(key.to_string(), field.name.clone()) {
                    if previous != field.name {
                        return Err(RepositoryError::SchemaDefinition(format!(
                            "schema '{}': '{}' names both '{}' and '{}'",
                            name, key, previous, field.name
                        )));
                    }
                }
            }
        }

        let mut required: Vec<String> = vec![
            ID_FIELD.to_string(),
            CREATED_AT.to_string(),
            UPDATED_AT.to_string(),
        ];
        if let Some(required_value) = obj.get("required") {
            let arr = required_value.as_array().ok_or_else(|| {
                RepositoryError::SchemaDefinition("required must be an array of field names".to_string())
            })?;
            for entry in arr {
                let field = entry.as_str().ok_or_else(|| {
                    RepositoryError::SchemaDefinition("required entries must be strings".to_string())
                })?;
                let key = match lookup.get(field) {
                    Some(canonical) => fields[canonical].key().to_string(),
                    None => field.to_string(),
                };
                if !required.contains(&key) {
                    required.push(key);
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            fields,
            lookup,
            required,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field by canonical name or alias
    pub fn field(&self, name_or_alias: &str) -> Option<&FieldSchema> {
        self.lookup
            .get(name_or_alias)
            .and_then(|canonical| self.fields.get(canonical))
    }

    /// Stored key for a canonical name or alias
    pub fn resolve_key(&self, name_or_alias: &str) -> Option<&str> {
        self.field(name_or_alias).map(FieldSchema::key)
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.values()
    }

    pub fn is_required(&self, key: &str) -> bool {
        self.required.iter().any(|r| r == key)
    }

    /// Validate a stored-form document, collecting every violation.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();
        let Some(obj) = value.as_object() else {
            errors.add(DOCUMENT_ERROR_KEY, "document must be a JSON object");
            return Err(errors);
        };

        for key in &self.required {
            match obj.get(key) {
                None => errors.add(key.clone(), "field required"),
                Some(Value::Null) if !self.nullable_key(key) => {
                    errors.add(key.clone(), "field required")
                }
                _ => {}
            }
        }

        for field in self.fields.values() {
            if let Some(value) = obj.get(field.key()) {
                if let Err(message) = field.check(value) {
                    errors.add(field.key(), message);
                }
            }
        }

        errors.into_result()
    }

    fn nullable_key(&self, key: &str) -> bool {
        self.field(key).map_or(false, |f| f.nullable)
    }
}

fn meta_fields() -> Vec<FieldSchema> {
    let mut id = FieldSchema::new(ID_NAME, Some(SchemaType::String));
    id.alias = Some(ID_FIELD.to_string());
    id.min_length = Some(1);
    vec![
        id,
        FieldSchema::new(CREATED_AT, Some(SchemaType::String)),
        FieldSchema::new(UPDATED_AT, Some(SchemaType::String)),
    ]
}
