// docrepo-core/src/lib.rs
// Validated document repository engine

pub mod config;
pub mod document;
pub mod error;
pub mod find_options;
pub mod models;
pub mod mutation;
pub mod query;
pub mod repository;
pub mod schema;
pub mod store;
pub mod value_utils;

// Public exports
pub use config::RepositoryConfig;
pub use document::{Entity, EntityMeta};
pub use error::{DocumentFailure, FieldErrors, RepositoryError, Result, StoreError, StoreResult};
pub use find_options::{FindOptions, Projection, QueryOptions, SortDirection, SortKey};
pub use mutation::{MutationPlan, UpdateDoc};
pub use query::{Condition, Filters, Path, QueryTranslator, StoreFilter};
pub use repository::Repository;
pub use schema::{CompiledSchema, SchemaBinding, SchemaRegistry};
pub use store::{DocumentStore, MemoryStore, UpdateResult};
