// docrepo-core/src/repository/mod.rs
//! Repository engine
//!
//! Every call names a collection and an entity type. The pair is checked
//! against the [`SchemaRegistry`] before any store access, keyword filters are
//! translated through the entity's schema, and mutations go through
//! simulate-then-commit (see [`crate::mutation`]).
//!
//! ```text
//! caller ──► Repository ──► SchemaRegistry   (binding check)
//!                │     ├──► QueryTranslator   (Filters → StoreFilter)
//!                │     ├──► plan_find         (QueryOptions → FindOptions)
//!                │     └──► mutation          (simulate, UpdateDoc)
//!                ▼
//!          DocumentStore
//! ```

mod writes;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::RepositoryConfig;
use crate::document::{document_id, from_document, Entity};
use crate::error::{RepositoryError, Result};
use crate::find_options::{plan_find, FindOptions, PlanError, QueryOptions};
use crate::query::{Filters, QueryTranslator, StoreFilter, TranslateError};
use crate::schema::{CompiledSchema, SchemaRegistry};
use crate::store::DocumentStore;

pub struct Repository<S: DocumentStore> {
    store: Arc<S>,
    registry: Arc<SchemaRegistry>,
    config: RepositoryConfig,
    translator: QueryTranslator,
}

impl<S: DocumentStore> Clone for Repository<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            translator: self.translator.clone(),
        }
    }
}

impl<S: DocumentStore> Repository<S> {
    pub fn new(store: Arc<S>, registry: Arc<SchemaRegistry>) -> Self {
        Self::with_config(store, registry, RepositoryConfig::default())
    }

    pub fn with_config(store: Arc<S>, registry: Arc<SchemaRegistry>, config: RepositoryConfig) -> Self {
        let translator = QueryTranslator::new(
            config.path_separator.clone(),
            config.reject_unknown_filters,
        );
        Self {
            store,
            registry,
            config,
            translator,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    // ========== Reads ==========

    /// First entity matching `filters`.
    pub async fn get<T: Entity>(&self, collection: &str, filters: &Filters) -> Result<Option<T>> {
        let schema = self.registry.check_read::<T>(collection)?;
        let filter = self.translate(collection, &schema, filters, "get")?;

        match self.store.find_one(collection, &filter, None).await? {
            Some(doc) => Ok(Some(from_document(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_id<T: Entity>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        self.get(collection, &Filters::by_id(id)).await
    }

    pub async fn exists<T: Entity>(&self, collection: &str, filters: &Filters) -> Result<bool> {
        let schema = self.registry.check_read::<T>(collection)?;
        let filter = self.translate(collection, &schema, filters, "exists")?;
        Ok(self.store.count_documents(collection, &filter).await? > 0)
    }

    /// Entities matching `filters`, sorted and paginated by `options`.
    ///
    /// Refuses an empty filter; use [`Repository::get_all`] to read a whole
    /// collection. A projection in `options` is ignored here because a partial
    /// document cannot be decoded as `T`; see
    /// [`Repository::get_multiple_projected`].
    pub async fn get_multiple<T: Entity>(
        &self,
        collection: &str,
        filters: &Filters,
        options: &QueryOptions,
    ) -> Result<Vec<T>> {
        let schema = self.registry.check_read::<T>(collection)?;
        let filter = self.translate(collection, &schema, filters, "get_multiple")?;
        let mut plan = self.plan(&schema, options)?;
        if plan.projection.take().is_some() {
            debug!(collection, "projection ignored for typed read");
        }
        let docs = self.store.find(collection, &filter, &plan).await?;
        decode_all(docs)
    }

    /// Like [`Repository::get_multiple`], returning the raw projected
    /// documents.
    pub async fn get_multiple_projected<T: Entity>(
        &self,
        collection: &str,
        filters: &Filters,
        options: &QueryOptions,
    ) -> Result<Vec<Value>> {
        let schema = self.registry.check_read::<T>(collection)?;
        let filter = self.translate(collection, &schema, filters, "get_multiple")?;
        let plan = self.plan(&schema, options)?;
        Ok(self.store.find(collection, &filter, &plan).await?)
    }

    pub async fn get_all<T: Entity>(&self, collection: &str, options: &QueryOptions) -> Result<Vec<T>> {
        let schema = self.registry.check_read::<T>(collection)?;
        let mut plan = self.plan(&schema, options)?;
        plan.projection = None;
        let docs = self.store.find(collection, &StoreFilter::all(), &plan).await?;
        decode_all(docs)
    }

    /// Entities whose id is in `ids`, further restricted by `extra`.
    ///
    /// An empty `extra` is fine here since the id list already bounds the
    /// read. An empty id list returns nothing without touching the store.
    pub async fn batch_get<T: Entity, I: AsRef<str>>(
        &self,
        collection: &str,
        ids: &[I],
        extra: &Filters,
        options: &QueryOptions,
    ) -> Result<Vec<T>> {
        let schema = self.registry.check_read::<T>(collection)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = self
            .translator
            .translate_partial(&schema, extra)
            .map_err(|e| translate_error(collection, &schema, e, "batch_get"))?
            .with_ids(ids.iter().map(|id| id.as_ref().to_string()));
        let mut plan = self.plan(&schema, options)?;
        plan.projection = None;
        let docs = self.store.find(collection, &filter, &plan).await?;
        decode_all(docs)
    }

    pub async fn count<T: Entity>(&self, collection: &str, filters: &Filters) -> Result<u64> {
        let schema = self.registry.check_read::<T>(collection)?;
        let filter = self.translate(collection, &schema, filters, "count")?;
        Ok(self.store.count_documents(collection, &filter).await?)
    }

    pub async fn count_all<T: Entity>(&self, collection: &str) -> Result<u64> {
        self.registry.check_read::<T>(collection)?;
        Ok(self
            .store
            .count_documents(collection, &StoreFilter::all())
            .await?)
    }

    // ========== Helpers ==========

    fn translate(
        &self,
        collection: &str,
        schema: &CompiledSchema,
        filters: &Filters,
        operation: &'static str,
    ) -> Result<StoreFilter> {
        let filter = self
            .translator
            .translate(schema, filters)
            .map_err(|e| translate_error(collection, schema, e, operation))?;
        debug!(collection, operation, filter = %filter, "translated filter");
        Ok(filter)
    }

    fn plan(&self, schema: &CompiledSchema, options: &QueryOptions) -> Result<FindOptions> {
        plan_find(schema, options, &self.config).map_err(|e| {
            let field = match e {
                PlanError::UnknownSortField(field) | PlanError::UnknownProjectionField(field) => field,
            };
            RepositoryError::UnknownField {
                schema: schema.name().to_string(),
                field,
            }
        })
    }

    /// Documents with the given ids, in the order of `ids`.
    async fn fetch_in_order(&self, collection: &str, ids: &[String]) -> Result<Vec<Value>> {
        let found = self
            .store
            .find(collection, &StoreFilter::by_ids(ids.iter().cloned()), &FindOptions::new())
            .await?;
        let mut by_id: HashMap<String, Value> = found
            .into_iter()
            .filter_map(|doc| {
                let id = document_id(&doc)?.to_string();
                Some((id, doc))
            })
            .collect();
        ids.iter()
            .map(|id| {
                by_id.remove(id).ok_or_else(|| RepositoryError::LostDocument {
                    collection: collection.to_string(),
                    id: id.clone(),
                    operation: "re-read",
                })
            })
            .collect()
    }
}

fn translate_error(
    collection: &str,
    schema: &CompiledSchema,
    err: TranslateError,
    operation: &'static str,
) -> RepositoryError {
    match err {
        TranslateError::EmptyFilter => RepositoryError::EmptyFilter {
            collection: collection.to_string(),
            operation,
        },
        TranslateError::UnknownField(field) => RepositoryError::UnknownField {
            schema: schema.name().to_string(),
            field,
        },
    }
}

fn decode_all<T: Entity>(docs: Vec<Value>) -> Result<Vec<T>> {
    docs.into_iter().map(from_document::<T>).collect()
}
