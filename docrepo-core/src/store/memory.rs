// store/memory.rs
//! In-process document store
//!
//! ```text
//! MemoryStore
//!      ↓
//! DashMap<collection, Vec<Value>>   (insertion order = natural order)
//! ```
//!
//! Every operation on a collection runs while holding that collection's
//! shard guard, so `find_one_and_update` is atomic with respect to other
//! writers of the same collection.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::trace;

use super::{DocumentStore, UpdateResult};
use crate::document::{document_id, new_object_id, ID_FIELD};
use crate::error::{StoreError, StoreResult};
use crate::find_options::{apply_limit_skip, apply_projection, apply_sort, FindOptions, Projection};
use crate::mutation::UpdateDoc;
use crate::query::{Condition, StoreFilter};
use crate::value_utils::{path_matches, values_equal};

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: DashMap<String, Vec<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from an export produced by [`MemoryStore::snapshot`].
    pub fn from_snapshot(snapshot: BTreeMap<String, Vec<Value>>) -> StoreResult<Self> {
        let store = Self::new();
        for (collection, documents) in snapshot {
            let mut seen = HashSet::new();
            for doc in &documents {
                let id = document_id(doc).ok_or_else(|| {
                    StoreError::Serialization(format!(
                        "document in '{}' has no string _id",
                        collection
                    ))
                })?;
                if !seen.insert(id.to_string()) {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.clone(),
                        id: id.to_string(),
                    });
                }
            }
            store.collections.insert(collection, documents);
        }
        Ok(store)
    }

    /// Copy of every collection, keyed by name
    pub fn snapshot(&self) -> BTreeMap<String, Vec<Value>> {
        self.collections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of stored documents in `collection`, without filtering
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |docs| docs.len())
    }

    fn matching(&self, collection: &str, filter: &StoreFilter) -> Vec<Value> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches_filter(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn matches_filter(doc: &Value, filter: &StoreFilter) -> bool {
    filter.conditions().all(|(path, condition)| match condition {
        Condition::Eq(expected) => path_matches(doc, path.segments(), expected),
        Condition::In(values) => values
            .iter()
            .any(|expected| path_matches(doc, path.segments(), expected)),
    })
}

/// Assign `_id` if missing and return it.
fn ensure_id(collection: &str, doc: &mut Value) -> StoreResult<String> {
    let Value::Object(map) = doc else {
        return Err(StoreError::InvalidQuery(format!(
            "documents in '{}' must be objects",
            collection
        )));
    };
    match map.get(ID_FIELD) {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(other) => Err(StoreError::InvalidQuery(format!(
            "_id must be a string, got {}",
            other
        ))),
        None => {
            let id = new_object_id();
            map.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            Ok(id)
        }
    }
}

/// Apply `update` to a copy so a failing path leaves the stored document
/// untouched. Returns whether anything changed.
fn apply_update(doc: &mut Value, update: &UpdateDoc) -> StoreResult<bool> {
    let mut next = doc.clone();
    update.apply_to(&mut next).map_err(|e| {
        StoreError::InvalidQuery(format!("cannot apply update at '{}': {}", e.path(), e))
    })?;
    let changed = !values_equal(doc, &next);
    *doc = next;
    Ok(changed)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &StoreFilter,
        projection: Option<&Projection>,
    ) -> StoreResult<Option<Value>> {
        let found = self.collections.get(collection).and_then(|docs| {
            docs.iter()
                .find(|doc| matches_filter(doc, filter))
                .cloned()
        });
        Ok(match (found, projection) {
            (Some(doc), Some(projection)) => Some(apply_projection(&doc, projection)),
            (found, _) => found,
        })
    }

    async fn find(
        &self,
        collection: &str,
        filter: &StoreFilter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>> {
        let mut docs = self.matching(collection, filter);
        apply_sort(&mut docs, &options.sort);
        let docs = apply_limit_skip(docs, options.limit, options.skip);
        trace!(collection, filter = %filter, returned = docs.len(), "find");

        Ok(match &options.projection {
            Some(projection) => docs.iter().map(|doc| apply_projection(doc, projection)).collect(),
            None => docs,
        })
    }

    async fn insert_one(&self, collection: &str, mut document: Value) -> StoreResult<String> {
        let id = ensure_id(collection, &mut document)?;
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|doc| document_id(doc) == Some(id.as_str())) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id,
            });
        }
        docs.push(document);
        Ok(id)
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> StoreResult<Vec<String>> {
        let mut prepared = Vec::with_capacity(documents.len());
        let mut ids = Vec::with_capacity(documents.len());
        for mut document in documents {
            ids.push(ensure_id(collection, &mut document)?);
            prepared.push(document);
        }

        let mut docs = self.collections.entry(collection.to_string()).or_default();
        let mut seen: HashSet<&str> = docs.iter().filter_map(document_id).collect();
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    id: id.clone(),
                });
            }
        }
        docs.extend(prepared);
        Ok(ids)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
    ) -> StoreResult<UpdateResult> {
        let mut result = UpdateResult::default();
        if let Some(mut docs) = self.collections.get_mut(collection) {
            if let Some(doc) = docs.iter_mut().find(|doc| matches_filter(doc, filter)) {
                result.matched = 1;
                if apply_update(doc, update)? {
                    result.modified = 1;
                }
            }
        }
        Ok(result)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
    ) -> StoreResult<UpdateResult> {
        let mut result = UpdateResult::default();
        if let Some(mut docs) = self.collections.get_mut(collection) {
            for doc in docs.iter_mut().filter(|doc| matches_filter(doc, filter)) {
                result.matched += 1;
                if apply_update(doc, update)? {
                    result.modified += 1;
                }
            }
        }
        Ok(result)
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
        return_after: bool,
    ) -> StoreResult<Option<Value>> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(doc) = docs.iter_mut().find(|doc| matches_filter(doc, filter)) else {
            return Ok(None);
        };

        let before = doc.clone();
        apply_update(doc, update)?;
        Ok(Some(if return_after { doc.clone() } else { before }))
    }

    async fn delete_one(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        match docs.iter().position(|doc| matches_filter(doc, filter)) {
            Some(index) => {
                docs.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !matches_filter(doc, filter));
        Ok((before - docs.len()) as u64)
    }

    async fn count_documents(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64> {
        Ok(self.collections.get(collection).map_or(0, |docs| {
            docs.iter().filter(|doc| matches_filter(doc, filter)).count() as u64
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::find_options::{SortDirection, SortKey};
    use crate::query::Path;
    use serde_json::json;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_many(
                "interviews",
                vec![
                    json!({"_id": "a", "status": "pending", "score": 10, "company": {"name": "Acme"}}),
                    json!({"_id": "b", "status": "completed", "score": 80, "company": {"name": "Globex"}}),
                    json!({"_id": "c", "status": "pending", "score": 40, "tags": ["rust", "sql"]}),
                ],
            )
            .await
            .unwrap();
        store
    }

    fn eq(field: &str, value: Value) -> StoreFilter {
        let mut filter = StoreFilter::all();
        filter.insert(Path::field(field), Condition::Eq(value));
        filter
    }

    #[tokio::test]
    async fn test_insert_assigns_id() {
        let store = MemoryStore::new();
        let id = store.insert_one("notes", json!({"text": "hi"})).await.unwrap();
        assert_eq!(id.len(), 32);
        let doc = store
            .find_one("notes", &StoreFilter::by_id(id.clone()), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["_id"], json!(id));
    }

    #[tokio::test]
    async fn test_insert_duplicate_rejected() {
        let store = seeded().await;
        let err = store
            .insert_one("interviews", json!({"_id": "a"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn test_insert_many_is_all_or_nothing() {
        let store = seeded().await;
        let err = store
            .insert_many("interviews", vec![json!({"_id": "z"}), json!({"_id": "b"})])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { ref id, .. } if id == "b"));
        assert_eq!(store.len("interviews"), 3);
    }

    #[tokio::test]
    async fn test_find_eq_nested_and_in() {
        let store = seeded().await;

        let pending = store
            .find("interviews", &eq("status", json!("pending")), &FindOptions::new())
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);

        let mut nested = StoreFilter::all();
        nested.insert(Path::new(["company", "name"]), Condition::Eq(json!("Globex")));
        let found = store.find("interviews", &nested, &FindOptions::new()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], "b");

        let by_ids = StoreFilter::by_ids(["a", "c", "missing"]);
        assert_eq!(store.count_documents("interviews", &by_ids).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_array_contains() {
        let store = seeded().await;
        let found = store
            .find("interviews", &eq("tags", json!("sql")), &FindOptions::new())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_find_sort_limit_skip() {
        let store = seeded().await;
        let options = FindOptions::new()
            .with_sort(vec![SortKey::new(Path::field("score"), SortDirection::Desc)])
            .with_limit(1)
            .with_skip(1);
        let found = store.find("interviews", &StoreFilter::all(), &options).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], "c");
    }

    #[tokio::test]
    async fn test_find_unknown_collection_is_empty() {
        let store = MemoryStore::new();
        assert!(store
            .find("nothing", &StoreFilter::all(), &FindOptions::new())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.count_documents("nothing", &StoreFilter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_one_and_update_returns_after() {
        let store = seeded().await;
        let mut update = UpdateDoc::default();
        update.inc.insert(Path::field("score"), json!(5));

        let after = store
            .find_one_and_update("interviews", &StoreFilter::by_id("a"), &update, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after["score"], 15);

        let before = store
            .find_one_and_update("interviews", &StoreFilter::by_id("a"), &update, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before["score"], 15);

        let missing = store
            .find_one_and_update("interviews", &StoreFilter::by_id("zz"), &update, true)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_many_counts() {
        let store = seeded().await;
        let mut update = UpdateDoc::default();
        update.set.insert(Path::field("status"), json!("cancelled"));

        let result = store
            .update_many("interviews", &eq("status", json!("pending")), &update)
            .await
            .unwrap();
        assert_eq!(result, UpdateResult { matched: 2, modified: 2 });

        let again = store
            .update_many("interviews", &eq("status", json!("cancelled")), &update)
            .await
            .unwrap();
        assert_eq!(again, UpdateResult { matched: 2, modified: 0 });
    }

    #[tokio::test]
    async fn test_failed_update_leaves_document() {
        let store = seeded().await;
        let mut update = UpdateDoc::default();
        update.set.insert(Path::field("score"), json!(99));
        update.inc.insert(Path::field("status"), json!(1));

        assert!(store
            .update_one("interviews", &StoreFilter::by_id("a"), &update)
            .await
            .is_err());
        let doc = store
            .find_one("interviews", &StoreFilter::by_id("a"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["score"], 10);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = seeded().await;
        assert_eq!(store.delete_one("interviews", &StoreFilter::by_id("a")).await.unwrap(), 1);
        assert_eq!(store.delete_one("interviews", &StoreFilter::by_id("a")).await.unwrap(), 0);
        assert_eq!(store.delete_many("interviews", &StoreFilter::all()).await.unwrap(), 2);
        assert_eq!(store.len("interviews"), 0);
    }

    #[tokio::test]
    async fn test_find_one_projection() {
        let store = seeded().await;
        let doc = store
            .find_one(
                "interviews",
                &StoreFilter::by_id("b"),
                Some(&Projection::Include(vec!["score".into()])),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc, json!({"_id": "b", "score": 80}));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = seeded().await;
        let restored = MemoryStore::from_snapshot(store.snapshot()).unwrap();
        assert_eq!(restored.collection_names(), vec!["interviews".to_string()]);
        assert_eq!(restored.len("interviews"), 3);
    }

    #[test]
    fn test_snapshot_rejects_duplicate_ids() {
        let mut snapshot = BTreeMap::new();
        snapshot.insert("x".to_string(), vec![json!({"_id": "1"}), json!({"_id": "1"})]);
        assert!(matches!(
            MemoryStore::from_snapshot(snapshot),
            Err(StoreError::DuplicateKey { .. })
        ));
    }
}
