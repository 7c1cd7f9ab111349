//! Collection ⇄ schema bindings
//!
//! The store is schema-less, so this is the only place type safety is
//! enforced: every engine call asserts the caller's entity type against the
//! binding before touching storage.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::CompiledSchema;
use crate::document::Entity;
use crate::error::{RepositoryError, Result};

/// A collection bound to exactly one entity type
#[derive(Debug, Clone)]
pub struct SchemaBinding {
    pub collection: String,
    pub schema_name: &'static str,
    pub schema: Arc<CompiledSchema>,
    type_id: TypeId,
}

#[derive(Default)]
pub struct SchemaRegistry {
    bindings: RwLock<HashMap<String, Arc<SchemaBinding>>>,
    reverse: RwLock<HashMap<&'static str, String>>,
    /// Schemas compiled for read-only subtypes that own no collection
    compiled: RwLock<HashMap<TypeId, Arc<CompiledSchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `collection` to `T`. Re-registering the same pair is a no-op;
    /// a binding is never moved to another type.
    pub fn register<T: Entity>(&self, collection: &str) -> Result<Arc<SchemaBinding>> {
        let mut bindings = self.bindings.write();
        let mut reverse = self.reverse.write();

        if let Some(existing) = bindings.get(collection) {
            if existing.type_id == TypeId::of::<T>() {
                return Ok(existing.clone());
            }
            return Err(RepositoryError::BindingConflict {
                collection: collection.to_string(),
                existing: existing.schema_name.to_string(),
                requested: T::SCHEMA_NAME.to_string(),
            });
        }

        if let Some(other) = reverse.get(T::SCHEMA_NAME) {
            return Err(RepositoryError::BindingConflict {
                collection: other.clone(),
                existing: T::SCHEMA_NAME.to_string(),
                requested: format!("{} (as '{}')", T::SCHEMA_NAME, collection),
            });
        }

        let schema = Arc::new(CompiledSchema::from_value(
            T::SCHEMA_NAME,
            &T::schema_definition(),
        )?);
        let binding = Arc::new(SchemaBinding {
            collection: collection.to_string(),
            schema_name: T::SCHEMA_NAME,
            schema: schema.clone(),
            type_id: TypeId::of::<T>(),
        });

        bindings.insert(collection.to_string(), binding.clone());
        reverse.insert(T::SCHEMA_NAME, collection.to_string());
        self.compiled.write().insert(TypeId::of::<T>(), schema);

        debug!(collection, schema = T::SCHEMA_NAME, "registered collection binding");
        Ok(binding)
    }

    pub fn resolve(&self, collection: &str) -> Result<Arc<SchemaBinding>> {
        self.bindings
            .read()
            .get(collection)
            .cloned()
            .ok_or_else(|| RepositoryError::UnregisteredCollection(collection.to_string()))
    }

    /// Collection bound to `T`
    pub fn reverse<T: Entity>(&self) -> Result<String> {
        self.reverse_name(T::SCHEMA_NAME)
    }

    pub fn reverse_name(&self, schema_name: &str) -> Result<String> {
        self.reverse
            .read()
            .get(schema_name)
            .cloned()
            .ok_or_else(|| RepositoryError::UnregisteredSchema(schema_name.to_string()))
    }

    /// Writes require the exact registered type.
    pub fn check_write<T: Entity>(&self, collection: &str) -> Result<Arc<SchemaBinding>> {
        let binding = self.resolve(collection)?;
        if binding.type_id != TypeId::of::<T>() {
            return Err(mismatch::<T>(&binding));
        }
        Ok(binding)
    }

    /// Reads accept the registered type or a type that declares it in its
    /// lineage. The returned schema is the reader's own.
    pub fn check_read<T: Entity>(&self, collection: &str) -> Result<Arc<CompiledSchema>> {
        let binding = self.resolve(collection)?;
        if binding.type_id == TypeId::of::<T>() {
            return Ok(binding.schema.clone());
        }
        if !T::LINEAGE.contains(&binding.schema_name) {
            return Err(mismatch::<T>(&binding));
        }
        self.schema_of::<T>()
    }

    /// Compiled schema of `T`, compiled on first use.
    pub fn schema_of<T: Entity>(&self) -> Result<Arc<CompiledSchema>> {
        if let Some(schema) = self.compiled.read().get(&TypeId::of::<T>()) {
            return Ok(schema.clone());
        }
        let schema = Arc::new(CompiledSchema::from_value(
            T::SCHEMA_NAME,
            &T::schema_definition(),
        )?);
        Ok(self
            .compiled
            .write()
            .entry(TypeId::of::<T>())
            .or_insert(schema)
            .clone())
    }

    /// Registered collection names, sorted
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}

fn mismatch<T: Entity>(binding: &SchemaBinding) -> RepositoryError {
    RepositoryError::SchemaMismatch {
        collection: binding.collection.clone(),
        registered: binding.schema_name.to_string(),
        requested: T::SCHEMA_NAME.to_string(),
    }
}
