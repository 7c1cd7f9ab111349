// Concurrency and store-fault tests
//
// Increments race through real tokio worker threads. Store faults are
// injected by wrapping MemoryStore.

use async_trait::async_trait;
use docrepo_core::models::{default_registry, Feedback, Interview, FEEDBACK, INTERVIEWS};
use docrepo_core::{
    Condition, DocumentStore, Entity, Filters, FindOptions, MemoryStore, Path, Projection,
    Repository, RepositoryError, StoreError, StoreFilter, StoreResult, UpdateDoc, UpdateResult,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn repo_over<S: DocumentStore>(store: Arc<S>) -> Repository<S> {
    Repository::new(store, Arc::new(default_registry().unwrap()))
}

async fn seed<S: DocumentStore>(repo: &Repository<S>, score: i64) -> String {
    let created = repo
        .create(INTERVIEWS, &Interview::new("u1").with_score(score))
        .await
        .unwrap();
    created.id().unwrap().to_string()
}

// ========== Concurrent increments ==========

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_concurrent_increments_add_two() {
    let repo = repo_over(Arc::new(MemoryStore::new()));
    let id = seed(&repo, 10).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let repo = repo.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move {
            repo.increment::<Interview>(INTERVIEWS, &id, "score", 1).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored: Interview = repo.get_by_id(INTERVIEWS, &id).await.unwrap().unwrap();
    assert_eq!(stored.score, 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_increments_lose_nothing() {
    let repo = repo_over(Arc::new(MemoryStore::new()));
    let id = seed(&repo, 0).await;

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let repo = repo.clone();
            let id = id.clone();
            tokio::spawn(async move {
                repo.increment::<Interview>(INTERVIEWS, &id, "score", 1).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored: Interview = repo.get_by_id(INTERVIEWS, &id).await.unwrap().unwrap();
    assert_eq!(stored.score, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_are_all_visible() {
    let repo = repo_over(Arc::new(MemoryStore::new()));

    let handles: Vec<_> = (0..20)
        .map(|n| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.create(INTERVIEWS, &Interview::new(format!("u{}", n)))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(repo.count_all::<Interview>(INTERVIEWS).await.unwrap(), 20);
}

// ========== Fault injection ==========

/// MemoryStore that can lose documents right before a write, let another
/// writer change them first, or fail outright.
struct FaultyStore {
    inner: MemoryStore,
    vanish_on_write: AtomicBool,
    unavailable: AtomicBool,
    /// Applied once, by id, just before the next single-document write
    interleaved: Mutex<Option<UpdateDoc>>,
}

impl FaultyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            vanish_on_write: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            interleaved: Mutex::new(None),
        }
    }

    fn interleave(&self, fields: Value) {
        let set: BTreeMap<Path, Value> = fields
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (Path::field(k.clone()), v.clone()))
            .collect();
        *self.interleaved.lock().unwrap() = Some(UpdateDoc {
            set,
            inc: BTreeMap::new(),
        });
    }

    async fn maybe_interleave(&self, collection: &str, filter: &StoreFilter) -> StoreResult<()> {
        let pending = self.interleaved.lock().unwrap().take();
        if let (Some(update), Some(Condition::Eq(id))) = (pending, filter.get(&Path::field("_id"))) {
            let by_id = StoreFilter::by_id(id.as_str().unwrap_or_default());
            self.inner.update_one(collection, &by_id, &update).await?;
        }
        Ok(())
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }

    async fn maybe_vanish(&self, collection: &str, filter: &StoreFilter) -> StoreResult<()> {
        if self.vanish_on_write.load(Ordering::SeqCst) {
            self.inner.delete_many(collection, filter).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: &StoreFilter,
        projection: Option<&Projection>,
    ) -> StoreResult<Option<Value>> {
        self.check()?;
        self.inner.find_one(collection, filter, projection).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &StoreFilter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>> {
        self.check()?;
        self.inner.find(collection, filter, options).await
    }

    async fn insert_one(&self, collection: &str, document: Value) -> StoreResult<String> {
        self.check()?;
        self.inner.insert_one(collection, document).await
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> StoreResult<Vec<String>> {
        self.check()?;
        self.inner.insert_many(collection, documents).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
    ) -> StoreResult<UpdateResult> {
        self.check()?;
        self.maybe_interleave(collection, filter).await?;
        self.maybe_vanish(collection, filter).await?;
        self.inner.update_one(collection, filter, update).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
    ) -> StoreResult<UpdateResult> {
        self.check()?;
        self.inner.update_many(collection, filter, update).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: &StoreFilter,
        update: &UpdateDoc,
        return_after: bool,
    ) -> StoreResult<Option<Value>> {
        self.check()?;
        self.maybe_interleave(collection, filter).await?;
        self.maybe_vanish(collection, filter).await?;
        self.inner
            .find_one_and_update(collection, filter, update, return_after)
            .await
    }

    async fn delete_one(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64> {
        self.check()?;
        self.inner.delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64> {
        self.check()?;
        self.inner.delete_many(collection, filter).await
    }

    async fn count_documents(&self, collection: &str, filter: &StoreFilter) -> StoreResult<u64> {
        self.check()?;
        self.inner.count_documents(collection, filter).await
    }
}

#[tokio::test]
async fn test_increment_on_vanished_document_is_lost() {
    let store = Arc::new(FaultyStore::new());
    let repo = repo_over(store.clone());
    let id = seed(&repo, 10).await;

    store.vanish_on_write.store(true, Ordering::SeqCst);
    let err = repo
        .increment::<Interview>(INTERVIEWS, &id, "score", 1)
        .await
        .unwrap_err();
    match err {
        RepositoryError::LostDocument {
            id: lost,
            operation,
            ..
        } => {
            assert_eq!(lost, id);
            assert_eq!(operation, "increment");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_update_on_vanished_document_is_lost() {
    let store = Arc::new(FaultyStore::new());
    let repo = repo_over(store.clone());
    let id = seed(&repo, 10).await;

    store.vanish_on_write.store(true, Ordering::SeqCst);
    let mut fields = serde_json::Map::new();
    fields.insert("status".into(), json!("completed"));
    let err = repo
        .update_fields::<Interview>(INTERVIEWS, &id, fields)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::LostDocument { .. }));
}

#[tokio::test]
async fn test_store_errors_propagate_unchanged() {
    let store = Arc::new(FaultyStore::new());
    let repo = repo_over(store.clone());
    seed(&repo, 10).await;

    store.unavailable.store(true, Ordering::SeqCst);
    let err = repo
        .count::<Interview>(INTERVIEWS, &Filters::new().eq("status", "pending"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Store(StoreError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_rejected_mutation_issues_no_write() {
    let store = Arc::new(FaultyStore::new());
    let repo = repo_over(store.clone());
    let id = seed(&repo, 10).await;

    // Any write reaching the store would now delete the document
    store.vanish_on_write.store(true, Ordering::SeqCst);
    let err = repo
        .increment::<Interview>(INTERVIEWS, &id, "score", 95)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::MutationRejected { .. }));

    store.vanish_on_write.store(false, Ordering::SeqCst);
    let stored: Interview = repo.get_by_id(INTERVIEWS, &id).await.unwrap().unwrap();
    assert_eq!(stored.score, 10);
}

#[tokio::test]
async fn test_update_over_concurrent_change_is_stale() {
    let store = Arc::new(FaultyStore::new());
    let repo = repo_over(store.clone());
    let mut feedback = Feedback::new("i1", 3);
    feedback.comment = Some("solid answers".into());
    let created = repo.create(FEEDBACK, &feedback).await.unwrap();
    let id = created.id().unwrap().to_string();

    // Lowering the rating is valid against the snapshot, which has a comment;
    // another writer clears the comment before the write lands
    store.interleave(json!({"comment": null}));
    let mut fields = serde_json::Map::new();
    fields.insert("rating".into(), json!(1));
    let err = repo
        .update_fields::<Feedback>(FEEDBACK, &id, fields)
        .await
        .unwrap_err();
    match err {
        RepositoryError::StaleDocument { id: stale, operation, .. } => {
            assert_eq!(stale, id);
            assert_eq!(operation, "update");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let stored: Feedback = repo.get_by_id(FEEDBACK, &id).await.unwrap().unwrap();
    assert_eq!(stored.rating, 3);
    assert_eq!(stored.comment, None);
}

#[tokio::test]
async fn test_update_without_interference_still_commits() {
    let store = Arc::new(FaultyStore::new());
    let repo = repo_over(store.clone());
    let id = seed(&repo, 10).await;

    let mut fields = serde_json::Map::new();
    fields.insert("status".into(), json!("completed"));
    let updated: Interview = repo
        .update_fields(INTERVIEWS, &id, fields)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.status, "completed");
}

#[tokio::test]
async fn test_increment_racing_past_maximum_is_reverted() {
    let store = Arc::new(FaultyStore::new());
    let repo = repo_over(store.clone());
    let id = seed(&repo, 10).await;

    // 10 + 10 validates, but the score is 95 by the time the increment lands
    store.interleave(json!({"score": 95}));
    let err = repo
        .increment::<Interview>(INTERVIEWS, &id, "score", 10)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::StaleDocument { operation: "increment", .. }
    ));

    let stored: Interview = repo.get_by_id(INTERVIEWS, &id).await.unwrap().unwrap();
    assert_eq!(stored.score, 95);
}
