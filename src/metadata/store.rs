//! Schema assembly and request-scoped overrides.
//!
//! An effective schema is assembled in three layers: the persisted document
//! is the base, registered defaults overlay it walking the inheritance chain
//! root-first, and the model-declared fields apply last so compiled code
//! always wins over stored settings. Derived artifacts (coerced defaults,
//! indexed field sets) are memoized per schema revision.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::MetakindResult;
use crate::metadata::conditional;
use crate::metadata::conversions;
use crate::metadata::registry::KindRegistry;
use crate::metadata::types::{JsonMap, Schema};
use crate::storage::db::EntityDb;

type RevisionCache<T> = RwLock<HashMap<(String, u64), Arc<T>>>;

pub struct SchemaStore {
    db: Arc<EntityDb>,
    registry: Arc<KindRegistry>,
    defaults_cache: RevisionCache<JsonMap>,
    indexed_cache: RevisionCache<HashSet<String>>,
}

impl SchemaStore {
    pub fn new(db: Arc<EntityDb>, registry: Arc<KindRegistry>) -> Self {
        Self {
            db,
            registry,
            defaults_cache: RwLock::new(HashMap::new()),
            indexed_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<KindRegistry> {
        &self.registry
    }

    /// The effective schema for `kind`, or `None` when the kind is neither
    /// persisted nor registered.
    pub fn get(&self, kind: &str) -> MetakindResult<Option<Arc<Schema>>> {
        let persisted = self.db.get_schema(kind)?;
        Ok(self.overlay(kind, persisted).map(Arc::new))
    }

    /// The persisted document alone, without defaults applied.
    pub fn get_persisted(&self, kind: &str) -> MetakindResult<Option<Schema>> {
        self.db.get_schema(kind)
    }

    /// Applies registered defaults and model-declared fields over a
    /// persisted document (or a blank one when nothing is persisted).
    pub fn overlay(&self, kind: &str, persisted: Option<Schema>) -> Option<Schema> {
        if persisted.is_none() && !self.registry.contains(kind) {
            return None;
        }
        let mut schema = persisted.unwrap_or_else(|| Schema::new(kind));
        schema.kind = kind.to_string();

        for definition in self.registry.ancestry(kind) {
            if !definition.defaults.is_empty() {
                schema.apply_options(&definition.defaults);
            }
        }
        // Model fields override everything the stored document says about
        // them.
        if let Some(definition) = self.registry.definition(kind) {
            if !definition.model_fields.is_empty() {
                crate::metadata::types::merge_field_options(
                    &mut schema.fields,
                    &definition.model_fields,
                );
            }
        }
        schema.is_managed = self.registry.is_managed(kind);
        schema.sort_fields();
        Some(schema)
    }

    /// Persists the document, bumping its revision past any stored one.
    pub fn persist(&self, mut schema: Schema) -> MetakindResult<Schema> {
        let stored_revision = self
            .db
            .get_schema(&schema.kind)?
            .map(|s| s.revision)
            .unwrap_or(0);
        schema.revision = stored_revision.max(schema.revision) + 1;
        self.db.put_schema(&schema)?;
        log::info!("persisted schema {} revision {}", schema.kind, schema.revision);
        Ok(schema)
    }

    pub fn remove(&self, kind: &str) -> MetakindResult<bool> {
        self.db.remove_schema(kind)
    }

    /// Kinds known from either the registry or persisted documents, sorted.
    pub fn kinds(&self) -> MetakindResult<Vec<String>> {
        let mut kinds = self.registry.kinds();
        kinds.extend(self.db.schema_kinds()?);
        kinds.sort();
        kinds.dedup();
        Ok(kinds)
    }

    /// Coerced default values for the schema, cached per revision.
    pub fn default_values(&self, schema: &Schema) -> Arc<JsonMap> {
        let key = (schema.kind.clone(), schema.revision);
        if let Some(cached) = self
            .defaults_cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Arc::clone(cached);
        }
        let computed = Arc::new(conversions::default_values(&schema.fields));
        self.defaults_cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&computed));
        computed
    }

    /// Names of query-indexed fields, cached per revision.
    pub fn indexed_fields(&self, schema: &Schema) -> Arc<HashSet<String>> {
        let key = (schema.kind.clone(), schema.revision);
        if let Some(cached) = self
            .indexed_cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Arc::clone(cached);
        }
        let computed: Arc<HashSet<String>> = Arc::new(
            schema
                .fields
                .iter()
                .filter(|f| f.index_for_query)
                .map(|f| f.name.clone())
                .collect(),
        );
        self.indexed_cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&computed));
        computed
    }

    /// Conditional overrides triggered by an entity snapshot, keyed by
    /// field name.
    pub fn conditional_overrides(
        &self,
        schema: &Schema,
        entity: &JsonMap,
    ) -> HashMap<String, JsonMap> {
        conditional::resolve_overrides(schema, entity)
    }
}

/// Request-scoped schema access with copy-on-write overrides.
///
/// Each request (or task) builds its own context and hands it to the
/// cleaner and controller calls it makes. Schema lookups are memoized for
/// the life of the context, and [`merge`](Self::merge) clones the shared
/// schema before changing it, so nothing a request does to its schemas is
/// visible to any other request.
pub struct RequestContext {
    store: Arc<SchemaStore>,
    schemas: RwLock<HashMap<String, Arc<Schema>>>,
}

impl RequestContext {
    pub fn new(store: Arc<SchemaStore>) -> Self {
        Self {
            store,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<SchemaStore> {
        &self.store
    }

    /// The schema for `kind` as this request sees it.
    pub fn schema(&self, kind: &str) -> MetakindResult<Option<Arc<Schema>>> {
        if let Some(schema) = self
            .schemas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(kind)
        {
            return Ok(Some(Arc::clone(schema)));
        }
        match self.store.get(kind)? {
            Some(schema) => {
                self.schemas
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(kind.to_string(), Arc::clone(&schema));
                Ok(Some(schema))
            }
            None => Ok(None),
        }
    }

    /// Merges option values into this request's view of the schema. The
    /// underlying store is never touched.
    pub fn merge(&self, kind: &str, options: &JsonMap) -> MetakindResult<Arc<Schema>> {
        let base = match self.schema(kind)? {
            Some(schema) => schema,
            None => Arc::new(Schema::new(kind)),
        };
        let mut copy = (*base).clone();
        copy.apply_options(options);
        copy.sort_fields();
        let merged = Arc::new(copy);
        self.schemas
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind.to_string(), Arc::clone(&merged));
        Ok(merged)
    }

    /// Drops any override or memoized lookup for `kind`.
    pub fn reset(&self, kind: &str) {
        self.schemas
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(kind);
    }
}
