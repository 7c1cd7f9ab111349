// docrepo-core/src/store/mod.rs
//! Document store boundary
//!
//! The engine only needs per-document atomic reads, writes and increments
//! plus filter/sort/limit/skip queries. Anything offering that (a MongoDB
//! driver, an HTTP document service) can sit behind [`DocumentStore`];
//! [`MemoryStore`] is the in-process reference implementation.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;
use crate::find_options::{FindOptions, Projection};
use crate::mutation::UpdateDoc;
use crate::query::StoreFilter;

pub use memory::MemoryStore;

/// Outcome of `update_one` / `update_many`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(
        &self,
        collection: &str,
        filter: &StoreFilter,
        projection: Option<&Projection>,
    ) -> StoreResult<Option<Value>>;

    async fn find(
        &self,
        collection: &str,
        filter: &StoreFilter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>>;

    /// Insert one document, returning its `_id`.
    async fn insert_one(&self, collection: &str, document: Value) -> StoreResult<String>;

    /// Insert all documents or none, returning their ids in input order.
    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> StoreResult<Vec<String>>;

    async fn update_one(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
    ) -> StoreResult<UpdateResult>;

    async fn update_many(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
    ) -> StoreResult<UpdateResult>;

    /// Atomically update the first match and return it, after the update
    /// when `return_after` is set.
    ///
    /// Matching and updating happen as one step, so a filter over the full
    /// previous state acts as a compare-and-set.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
        return_after: bool,
    ) -> StoreResult<Option<Value>>;

    async fn delete_one(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64>;

    async fn delete_many(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64>;

    async fn count_documents(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64>;
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    async fn find_one(
        &self,
        collection: &str,
        filter: &StoreFilter,
        projection: Option<&Projection>,
    ) -> StoreResult<Option<Value>> {
        (**self).find_one(collection, filter, projection).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &StoreFilter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>> {
        (**self).find(collection, filter, options).await
    }

    async fn insert_one(&self, collection: &str, document: Value) -> StoreResult<String> {
        (**self).insert_one(collection, document).await
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> StoreResult<Vec<String>> {
        (**self).insert_many(collection, documents).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
    ) -> StoreResult<UpdateResult> {
        (**self).update_one(collection, filter, update).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
    ) -> StoreResult<UpdateResult> {
        (**self).update_many(collection, filter, update).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
        return_after: bool,
    ) -> StoreResult<Option<Value>> {
        (**self)
            .find_one_and_update(collection, filter, update, return_after)
            .await
    }

    async fn delete_one(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64> {
        (**self).delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64> {
        (**self).delete_many(collection, filter).await
    }

    async fn count_documents(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64> {
        (**self).count_documents(collection, filter).await
    }
}
