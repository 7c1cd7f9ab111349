// docrepo-core/src/repository/writes.rs
// Mutating operations: create, update, increment, delete

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{decode_all, Repository};
use crate::document::{self, document_id, from_document, Entity};
use crate::error::{DocumentFailure, RepositoryError, Result};
use crate::find_options::FindOptions;
use crate::mutation::{
    plan_update, prepare_insert, simulate, validate_stored, MutationError, MutationPlan, Simulation,
    UpdateDoc,
};
use crate::query::{Condition, Filters, Path, StoreFilter};
use crate::schema::CompiledSchema;
use crate::store::DocumentStore;

const NEW_DOCUMENT: &str = "(new)";

impl<S: DocumentStore> Repository<S> {
    // ========== Create ==========

    /// Validate, stamp and insert `entity`, returning the stored form.
    pub async fn create<T: Entity>(&self, collection: &str, entity: &T) -> Result<T> {
        let binding = self.registry.check_write::<T>(collection)?;

        let doc = prepare_insert(&binding.schema, entity, document::now()).map_err(|errors| {
            RepositoryError::MutationRejected {
                collection: collection.to_string(),
                id: entity.id().unwrap_or(NEW_DOCUMENT).to_string(),
                errors,
            }
        })?;

        let id = self.store.insert_one(collection, doc).await?;
        debug!(collection, id = %id, "created document");

        match self.store.find_one(collection, &StoreFilter::by_id(id.clone()), None).await? {
            Some(stored) => from_document(stored),
            None => Err(RepositoryError::LostDocument {
                collection: collection.to_string(),
                id,
                operation: "create",
            }),
        }
    }

    /// Create every entity or none.
    ///
    /// All entities are validated before the first insert; any failure
    /// rejects the whole batch.
    pub async fn create_multiple<T: Entity>(&self, collection: &str, entities: &[T]) -> Result<Vec<T>> {
        let binding = self.registry.check_write::<T>(collection)?;
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let now = document::now();
        let mut docs = Vec::with_capacity(entities.len());
        let mut failures = Vec::new();
        for (index, entity) in entities.iter().enumerate() {
            match prepare_insert(&binding.schema, entity, now) {
                Ok(doc) => docs.push(doc),
                Err(errors) => failures.push(DocumentFailure {
                    id: entity
                        .id()
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("#{}", index)),
                    errors,
                }),
            }
        }
        if !failures.is_empty() {
            return Err(self.batch_rejected(collection, failures, entities.len()));
        }

        let ids = self.store.insert_many(collection, docs).await?;
        info!(collection, count = ids.len(), "created documents");

        let stored = self.fetch_in_order(collection, &ids).await?;
        decode_all(stored)
    }

    // ========== Update ==========

    /// Apply `plan` to the entity with `id`.
    ///
    /// Returns `Ok(None)` when no such entity exists. The simulated post-state
    /// must validate as `T` or nothing is written.
    ///
    /// The write is a compare-and-set against the validated snapshot. If the
    /// entity changed in between, nothing is written and the call fails with
    /// `StaleDocument`; if it vanished, with `LostDocument`.
    pub async fn update<T: Entity>(
        &self,
        collection: &str,
        id: &str,
        plan: &MutationPlan,
    ) -> Result<Option<T>> {
        let binding = self.registry.check_write::<T>(collection)?;
        self.check_plan_fields(&binding.schema, plan)?;

        let Some(existing) = self.store.find_one(collection, &StoreFilter::by_id(id), None).await? else {
            debug!(collection, id, "update target not found");
            return Ok(None);
        };

        let (_, simulation) = self.simulate_one::<T>(collection, id, &binding.schema, &existing, plan)?;
        let guard = snapshot_guard(&binding.schema, id, &existing);

        match self
            .store
            .find_one_and_update(collection, &guard, &simulation.update, true)
            .await?
        {
            Some(stored) => {
                debug!(collection, id, plan = %plan.describe(), "updated document");
                Ok(Some(from_document(stored)?))
            }
            None => Err(self.missed_write(collection, id, "update").await),
        }
    }

    /// [`Repository::update`] with a set-map of field names (or aliases, or
    /// separator-encoded nested paths) to new values.
    pub async fn update_fields<T: Entity>(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Option<T>> {
        self.update(collection, id, &MutationPlan::Set(fields)).await
    }

    /// Set `fields` on every entity matching `filters`.
    ///
    /// Every matched entity is simulated first; if any post-state is invalid
    /// nothing is written and the call fails with `BatchRejected`, whose
    /// sample is reachable through [`RepositoryError::rejected_documents`]. The write itself is one `update_many` restricted to
    /// the validated ids, so a concurrent writer may still interleave.
    pub async fn update_multiple<T: Entity>(
        &self,
        collection: &str,
        filters: &Filters,
        fields: Map<String, Value>,
    ) -> Result<Vec<T>> {
        let binding = self.registry.check_write::<T>(collection)?;
        let filter = self.translate(collection, &binding.schema, filters, "update_multiple")?;

        let matched = self.store.find(collection, &filter, &FindOptions::new()).await?;
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        let plan = MutationPlan::Set(fields);
        let now = document::now();
        let mut ids = Vec::with_capacity(matched.len());
        let mut update = None;
        let mut failures = Vec::new();

        for doc in &matched {
            let id = document_id(doc).unwrap_or_default().to_string();
            match simulate::<T>(&binding.schema, doc, &plan, now, &self.config.path_separator) {
                Ok((_, simulation)) => {
                    update.get_or_insert(simulation.update);
                }
                Err(MutationError::UnknownField(field)) => {
                    return Err(RepositoryError::UnknownField {
                        schema: binding.schema_name.to_string(),
                        field,
                    });
                }
                Err(MutationError::Rejected(errors)) => failures.push(DocumentFailure {
                    id: id.clone(),
                    errors,
                }),
            }
            ids.push(id);
        }

        if !failures.is_empty() {
            return Err(self.batch_rejected(collection, failures, matched.len()));
        }
        let Some(update) = update else {
            return Ok(Vec::new());
        };

        let result = self
            .store
            .update_many(collection, &StoreFilter::by_ids(ids.iter().cloned()), &update)
            .await?;
        info!(
            collection,
            matched = result.matched,
            modified = result.modified,
            plan = %plan.describe(),
            "updated documents"
        );

        let stored = self.fetch_in_order(collection, &ids).await?;
        decode_all(stored)
    }

    /// Atomically add `delta` to `field` of the entity with `id`.
    ///
    /// The post-state is validated against a snapshot first; the write itself
    /// is the store's increment-and-return primitive, so concurrent increments
    /// never lose updates. `Ok(None)` when no such entity exists.
    ///
    /// If a concurrent change makes the incremented state invalid after all,
    /// the increment is reverted with the same primitive and the call fails
    /// with `StaleDocument`.
    pub async fn increment<T: Entity>(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: impl Into<Value>,
    ) -> Result<Option<T>> {
        let binding = self.registry.check_write::<T>(collection)?;
        let filter = StoreFilter::by_id(id);
        let plan = MutationPlan::increment(field, delta);
        self.check_plan_fields(&binding.schema, &plan)?;

        let Some(existing) = self.store.find_one(collection, &filter, None).await? else {
            debug!(collection, id, "increment target not found");
            return Ok(None);
        };

        let (_, simulation) = self.simulate_one::<T>(collection, id, &binding.schema, &existing, &plan)?;

        let Some(stored) = self
            .store
            .find_one_and_update(collection, &filter, &simulation.update, true)
            .await?
        else {
            warn!(collection, id, "document vanished between pre-check and increment");
            return Err(RepositoryError::LostDocument {
                collection: collection.to_string(),
                id: id.to_string(),
                operation: "increment",
            });
        };

        match validate_stored::<T>(&binding.schema, &stored) {
            Ok(entity) => {
                debug!(collection, id, plan = %plan.describe(), "incremented document");
                Ok(Some(entity))
            }
            Err(errors) => {
                warn!(collection, id, %errors, "increment raced with a concurrent change, reverting");
                let undo = UpdateDoc {
                    set: Default::default(),
                    inc: simulation
                        .update
                        .inc
                        .iter()
                        .filter_map(|(path, delta)| Some((path.clone(), negate(delta)?)))
                        .collect(),
                };
                self.store
                    .find_one_and_update(collection, &filter, &undo, false)
                    .await?;
                Err(RepositoryError::StaleDocument {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    operation: "increment",
                })
            }
        }
    }

    // ========== Delete ==========

    /// Delete the one entity matching `filters` and return it.
    ///
    /// A filter matching several entities is `AmbiguousMatch` and deletes
    /// nothing; use [`Repository::delete_multiple`] for that.
    pub async fn delete<T: Entity>(&self, collection: &str, filters: &Filters) -> Result<T> {
        let binding = self.registry.check_write::<T>(collection)?;
        let filter = self.translate(collection, &binding.schema, filters, "delete")?;

        let mut found = self
            .store
            .find(collection, &filter, &FindOptions::new().with_limit(2))
            .await?;
        if found.len() > 1 {
            warn!(collection, filter = %filter, "delete filter matches more than one document");
            return Err(RepositoryError::AmbiguousMatch {
                collection: collection.to_string(),
                filter: filter.to_string(),
            });
        }
        let Some(doc) = found.pop() else {
            return Err(RepositoryError::NotFound {
                collection: collection.to_string(),
                filter: filter.to_string(),
            });
        };
        let id = document_id(&doc).unwrap_or_default().to_string();
        let entity = from_document(doc)?;

        if self.store.delete_one(collection, &StoreFilter::by_id(id.clone())).await? == 0 {
            return Err(RepositoryError::LostDocument {
                collection: collection.to_string(),
                id,
                operation: "delete",
            });
        }
        debug!(collection, id = %id, "deleted document");
        Ok(entity)
    }

    /// Delete every entity matching `filters`, returning them. No match is an
    /// empty list, not an error.
    pub async fn delete_multiple<T: Entity>(&self, collection: &str, filters: &Filters) -> Result<Vec<T>> {
        let binding = self.registry.check_write::<T>(collection)?;
        let filter = self.translate(collection, &binding.schema, filters, "delete_multiple")?;
        self.delete_matching(collection, &filter).await
    }

    /// Empty the collection, returning what was in it.
    pub async fn delete_all<T: Entity>(&self, collection: &str) -> Result<Vec<T>> {
        self.registry.check_write::<T>(collection)?;
        self.delete_matching(collection, &StoreFilter::all()).await
    }

    async fn delete_matching<T: Entity>(&self, collection: &str, filter: &StoreFilter) -> Result<Vec<T>> {
        let docs = self.store.find(collection, filter, &FindOptions::new()).await?;
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = docs
            .iter()
            .filter_map(document_id)
            .map(str::to_string)
            .collect();
        let entities = decode_all(docs)?;

        let deleted = self
            .store
            .delete_many(collection, &StoreFilter::by_ids(ids))
            .await?;
        info!(collection, deleted, "deleted documents");
        Ok(entities)
    }

    // ========== Helpers ==========

    /// Reject names the schema does not declare before touching the store.
    fn check_plan_fields(&self, schema: &CompiledSchema, plan: &MutationPlan) -> Result<()> {
        match plan_update(schema, plan, document::now(), &self.config.path_separator) {
            Err(MutationError::UnknownField(field)) => Err(RepositoryError::UnknownField {
                schema: schema.name().to_string(),
                field,
            }),
            _ => Ok(()),
        }
    }

    /// Classify a guarded write that matched nothing.
    async fn missed_write(&self, collection: &str, id: &str, operation: &'static str) -> RepositoryError {
        match self.store.find_one(collection, &StoreFilter::by_id(id), None).await {
            Ok(Some(_)) => {
                warn!(collection, id, operation, "document changed after validation, nothing written");
                RepositoryError::StaleDocument {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    operation,
                }
            }
            Ok(None) => {
                warn!(collection, id, operation, "document vanished before write");
                RepositoryError::LostDocument {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    operation,
                }
            }
            Err(e) => e.into(),
        }
    }

    fn simulate_one<T: Entity>(
        &self,
        collection: &str,
        id: &str,
        schema: &CompiledSchema,
        existing: &Value,
        plan: &MutationPlan,
    ) -> Result<(T, Simulation)> {
        simulate::<T>(schema, existing, plan, document::now(), &self.config.path_separator).map_err(
            |e| match e {
                MutationError::UnknownField(field) => RepositoryError::UnknownField {
                    schema: schema.name().to_string(),
                    field,
                },
                MutationError::Rejected(errors) => {
                    warn!(collection, id, plan = %plan.describe(), %errors, "mutation rejected");
                    RepositoryError::MutationRejected {
                        collection: collection.to_string(),
                        id: id.to_string(),
                        errors,
                    }
                }
            },
        )
    }

    fn batch_rejected(
        &self,
        collection: &str,
        failures: Vec<DocumentFailure>,
        total: usize,
    ) -> RepositoryError {
        let failed = failures.len();
        warn!(collection, failed, total, "batch rejected");
        RepositoryError::BatchRejected {
            collection: collection.to_string(),
            failed,
            total,
            sample: failures
                .into_iter()
                .take(self.config.batch_error_sample)
                .collect(),
        }
    }
}

/// Filter matching `existing` only while it is unchanged: every stored field
/// keeps its value and no declared field has appeared.
fn snapshot_guard(schema: &CompiledSchema, id: &str, existing: &Value) -> StoreFilter {
    let mut guard = StoreFilter::by_id(id);
    if let Some(fields) = existing.as_object() {
        for (key, value) in fields {
            guard.insert(Path::field(key.clone()), Condition::Eq(value.clone()));
        }
    }
    for field in schema.fields() {
        if existing.get(field.key()).is_none() {
            guard.insert(Path::field(field.key()), Condition::Eq(Value::Null));
        }
    }
    guard
}

fn negate(delta: &Value) -> Option<Value> {
    match delta.as_i64() {
        Some(n) => n.checked_neg().map(Value::from),
        None => serde_json::Number::from_f64(-delta.as_f64()?).map(Value::Number),
    }
}
