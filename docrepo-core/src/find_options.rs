// docrepo-core/src/find_options.rs
// Sort & pagination planning, plus the in-memory application of a plan

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RepositoryConfig;
use crate::document::{CREATED_AT, ID_FIELD};
use crate::query::Path;
use crate::schema::CompiledSchema;
use crate::value_utils::{compare_values_with_none, get_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }

    /// 1 / -1, as document-store drivers expect
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub path: Path,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(path: Path, direction: SortDirection) -> Self {
        Self { path, direction }
    }
}

/// Which top-level fields a read returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Only these fields (plus `_id`)
    Include(Vec<String>),
    /// Everything except these fields
    Exclude(Vec<String>),
}

/// Caller-facing read options. `limit == 0` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub sort_field: Option<String>,
    pub direction: Option<SortDirection>,
    pub limit: usize,
    pub skip: usize,
    pub projection: Option<Projection>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_field = Some(field.into());
        self.direction = Some(direction);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Store-facing find options, fully resolved to stored keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    pub projection: Option<Projection>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    UnknownSortField(String),
    UnknownProjectionField(String),
}

/// Sort keys with the creation-time tie-break.
///
/// Unless the primary key already is `created_at`, an ascending `created_at`
/// key is appended so equal primary values still have a total order.
pub fn plan_sort(primary: Path, direction: SortDirection) -> Vec<SortKey> {
    let tie_break = !(primary.len() == 1 && primary.head() == CREATED_AT);
    let mut sort = vec![SortKey::new(primary, direction)];
    if tie_break {
        sort.push(SortKey::new(Path::field(CREATED_AT), SortDirection::Asc));
    }
    sort
}

/// Resolve caller options against `schema`, filling defaults from `config`.
pub fn plan_find(
    schema: &CompiledSchema,
    options: &QueryOptions,
    config: &RepositoryConfig,
) -> Result<FindOptions, PlanError> {
    let field = options
        .sort_field
        .as_deref()
        .unwrap_or(&config.default_sort_field);
    let primary = resolve_sort_path(schema, field, &config.path_separator)
        .ok_or_else(|| PlanError::UnknownSortField(field.to_string()))?;
    let direction = options.direction.unwrap_or(config.default_sort_direction);

    let projection = match &options.projection {
        None => None,
        Some(Projection::Include(fields)) => {
            Some(Projection::Include(resolve_projection(schema, fields)?))
        }
        Some(Projection::Exclude(fields)) => {
            Some(Projection::Exclude(resolve_projection(schema, fields)?))
        }
    };

    Ok(FindOptions {
        sort: plan_sort(primary, direction),
        limit: (options.limit > 0).then_some(options.limit),
        skip: (options.skip > 0).then_some(options.skip),
        projection,
    })
}

fn resolve_sort_path(schema: &CompiledSchema, field: &str, separator: &str) -> Option<Path> {
    if let Some(key) = schema.resolve_key(field) {
        return Some(Path::field(key));
    }
    let path = Path::parse(field, separator)?;
    let head = schema.resolve_key(path.head())?.to_string();
    Some(path.with_head(&head))
}

fn resolve_projection(schema: &CompiledSchema, fields: &[String]) -> Result<Vec<String>, PlanError> {
    fields
        .iter()
        .map(|field| {
            schema
                .resolve_key(field)
                .map(str::to_string)
                .ok_or_else(|| PlanError::UnknownProjectionField(field.clone()))
        })
        .collect()
}

/// Sort documents in place by `sort`
pub fn apply_sort(docs: &mut [Value], sort: &[SortKey]) {
    if sort.is_empty() {
        return;
    }

    docs.sort_by(|a, b| {
        for key in sort {
            let ordering = compare_values_with_none(
                get_path(a, key.path.segments()),
                get_path(b, key.path.segments()),
            );
            if ordering != Ordering::Equal {
                return key.direction.apply(ordering);
            }
        }
        Ordering::Equal
    });
}

/// Window of `docs` after skipping `skip` and keeping at most `limit`
pub fn apply_limit_skip(docs: Vec<Value>, limit: Option<usize>, skip: Option<usize>) -> Vec<Value> {
    let skip = skip.unwrap_or(0);
    let iter = docs.into_iter().skip(skip);
    match limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

pub fn apply_projection(doc: &Value, projection: &Projection) -> Value {
    let Value::Object(obj) = doc else {
        return doc.clone();
    };

    let mut result = Map::new();
    match projection {
        Projection::Include(fields) => {
            if let Some(id) = obj.get(ID_FIELD) {
                result.insert(ID_FIELD.to_string(), id.clone());
            }
            for field in fields {
                if let Some(value) = obj.get(field) {
                    result.insert(field.clone(), value.clone());
                }
            }
        }
        Projection::Exclude(fields) => {
            for (key, value) in obj {
                if !fields.contains(key) {
                    result.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Value::Object(result)
}
