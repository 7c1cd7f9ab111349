//! Keyword filters → store filter
//!
//! Schema fields are matched first, by canonical name or alias, and emitted
//! under their stored key. Whatever is left and contains the path separator
//! becomes a nested path. Null values mean "not supplied" and are dropped.

use std::collections::BTreeSet;

use tracing::debug;

use super::{Condition, Filters, Path, StoreFilter};
use crate::schema::CompiledSchema;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// Nothing left to filter on
    EmptyFilter,
    /// Keyword that is neither a schema field nor a nested path
    UnknownField(String),
}

#[derive(Debug, Clone)]
pub struct QueryTranslator {
    separator: String,
    reject_unknown: bool,
}

impl QueryTranslator {
    pub fn new(separator: impl Into<String>, reject_unknown: bool) -> Self {
        Self {
            separator: separator.into(),
            reject_unknown,
        }
    }

    /// Translate, failing with [`TranslateError::EmptyFilter`] if nothing
    /// remains.
    pub fn translate(
        &self,
        schema: &CompiledSchema,
        filters: &Filters,
    ) -> Result<StoreFilter, TranslateError> {
        let filter = self.translate_partial(schema, filters)?;
        if filter.is_empty() {
            return Err(TranslateError::EmptyFilter);
        }
        Ok(filter)
    }

    /// Translate without the emptiness check (extra filters of batch reads).
    pub fn translate_partial(
        &self,
        schema: &CompiledSchema,
        filters: &Filters,
    ) -> Result<StoreFilter, TranslateError> {
        let mut filter = StoreFilter::all();
        let mut consumed: BTreeSet<&str> = BTreeSet::new();

        for field in schema.fields() {
            let names = [Some(field.name.as_str()), field.alias.as_deref()];
            let mut supplied = None;
            for name in names.into_iter().flatten() {
                if let Some((key, value)) = filters.keywords.get_key_value(name) {
                    consumed.insert(key.as_str());
                    if supplied.is_none() && !value.is_null() {
                        supplied = Some(value);
                    }
                }
            }
            if let Some(value) = supplied {
                filter.insert(Path::field(field.key()), Condition::Eq(value.clone()));
            }
        }

        for (key, value) in &filters.keywords {
            if consumed.contains(key.as_str()) || value.is_null() {
                continue;
            }
            match Path::parse(key, &self.separator) {
                Some(path) => {
                    let path = resolve_head(schema, path);
                    filter.insert(path, Condition::Eq(value.clone()));
                }
                None if self.reject_unknown => {
                    return Err(TranslateError::UnknownField(key.clone()));
                }
                None => {
                    debug!(schema = schema.name(), key = %key, "ignoring unknown filter keyword");
                }
            }
        }

        for (path, value) in &filters.paths {
            if path.is_empty() || value.is_null() {
                continue;
            }
            filter.insert(resolve_head(schema, path.clone()), Condition::Eq(value.clone()));
        }

        Ok(filter)
    }
}

/// Store the first segment under its alias when it names a schema field.
fn resolve_head(schema: &CompiledSchema, path: Path) -> Path {
    match schema.resolve_key(path.head()) {
        Some(key) if key != path.head() => path.with_head(key),
        _ => path,
    }
}

impl Default for QueryTranslator {
    fn default() -> Self {
        Self::new("__", true)
    }
}
