//! Entity CRUD with validation and optimistic concurrency.
//!
//! Every write goes through a cleaning pass first; a write only happens when
//! the [`ErrorCollector`] comes back empty. Updates are guarded by
//! `key_version`: the caller must present the version it read, and each
//! successful update increments it.
//!
//! A write made under a [`PlanContext`] is redirected into staged
//! [`PendingChange`] records instead of touching live entities.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::entity::DynamicEntity;
use crate::error::{MetakindError, MetakindResult};
use crate::errors::{messages, ErrorCollector};
use crate::identity::IdentityService;
use crate::metadata::store::{RequestContext, SchemaStore};
use crate::metadata::types::JsonMap;
use crate::storage::{
    AuditMeta, EntityStore, PendingChange, StoredEntity, WriteAction, AUTO_FIELDS,
};
use crate::validation::Cleaner;

/// Marks writes as belonging to a staged plan rather than the live dataset.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub plan_id: String,
}

impl PlanContext {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
        }
    }
}

/// What a successful write produced.
#[derive(Debug, Clone)]
pub enum SaveResult {
    Entity(StoredEntity),
    Pending(PendingChange),
}

impl SaveResult {
    pub fn key_name(&self) -> &str {
        match self {
            SaveResult::Entity(entity) => &entity.key_name,
            SaveResult::Pending(change) => &change.key_name,
        }
    }
}

pub struct EntityController {
    schemas: Arc<SchemaStore>,
    storage: Arc<dyn EntityStore>,
    identity: Arc<dyn IdentityService>,
    config: EngineConfig,
}

impl EntityController {
    pub fn new(
        schemas: Arc<SchemaStore>,
        storage: Arc<dyn EntityStore>,
        identity: Arc<dyn IdentityService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            schemas,
            storage,
            identity,
            config,
        }
    }

    pub fn schemas(&self) -> &Arc<SchemaStore> {
        &self.schemas
    }

    fn cleaner<'a>(&'a self, context: Option<&'a RequestContext>) -> Cleaner<'a> {
        Cleaner {
            schemas: &self.schemas,
            storage: self.storage.as_ref(),
            identity: self.identity.as_ref(),
            config: &self.config,
            context,
        }
    }

    /// Validates and stores a new entity.
    ///
    /// The key name is taken from the input when supplied and generated
    /// otherwise; a key already in use is a [`MetakindError::Conflict`].
    /// Validation problems land in `errors` and yield `Ok(None)` with
    /// nothing written.
    pub async fn create_async(
        &self,
        kind: &str,
        mut entity_dict: JsonMap,
        actor: &str,
        context: Option<&RequestContext>,
        plan: Option<&PlanContext>,
        errors: &mut ErrorCollector,
    ) -> MetakindResult<Option<SaveResult>> {
        if let Some(key_name) = entity_dict.get("key_name").and_then(Value::as_str) {
            if self.storage.get(kind, key_name).await?.is_some() {
                return Err(MetakindError::Conflict(messages::duplicate_keyname(
                    kind, key_name,
                )));
            }
        }
        self.cleaner(context)
            .clean(&mut entity_dict, kind, errors)
            .await?;
        let natives = NativeParts::split(&mut entity_dict);
        if !errors.is_empty() {
            return Ok(None);
        }

        let key_name = natives
            .key_name
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut entity = StoredEntity::new(kind, key_name);
        entity.sort_order = natives.sort_order;
        entity.properties = entity_dict;

        let audit = AuditMeta::new(actor, WriteAction::Insert);
        self.save(entity, audit, plan).await.map(Some)
    }

    /// Validates and applies an update to an existing entity.
    ///
    /// The input must carry the `key_version` the caller read; a stale or
    /// missing version is a [`MetakindError::Conflict`], so concurrent
    /// writers cannot silently overwrite each other. Audit creation fields
    /// carry over from the stored entity, and the audit description is
    /// generated from the changed properties when none is supplied.
    pub async fn update_async(
        &self,
        kind: &str,
        mut entity_dict: JsonMap,
        actor: &str,
        description: Option<String>,
        context: Option<&RequestContext>,
        plan: Option<&PlanContext>,
        errors: &mut ErrorCollector,
    ) -> MetakindResult<Option<SaveResult>> {
        self.cleaner(context)
            .clean(&mut entity_dict, kind, errors)
            .await?;

        let natives = NativeParts::split(&mut entity_dict);
        let key_name = match natives.key_name {
            Some(key_name) => key_name,
            None => {
                errors.add(Some("key_name"), messages::keyname_missing(kind));
                return Ok(None);
            }
        };
        let existing = match self.storage.get(kind, &key_name).await? {
            Some(existing) => existing,
            None => {
                errors.add(Some("key_name"), messages::entity_missing(kind, &key_name));
                return Ok(None);
            }
        };
        if natives.key_version.unwrap_or(0) != existing.key_version {
            return Err(MetakindError::Conflict(messages::key_version_mismatch(
                &key_name,
            )));
        }
        if !errors.is_empty() {
            return Ok(None);
        }

        let mut entity = StoredEntity::new(kind, key_name);
        // A staged payload keeps the version the caller read; the new one
        // is minted when the plan is applied against the live entity.
        entity.key_version = if plan.is_none() {
            existing.key_version + 1
        } else {
            existing.key_version
        };
        entity.sort_order = natives.sort_order.or(existing.sort_order);
        entity.created_on = existing.created_on;
        entity.created_by = existing.created_by.clone();
        entity.properties = entity_dict;

        let description = description
            .unwrap_or_else(|| describe_changes(&existing.properties, &entity.properties));
        let audit = AuditMeta::new(actor, WriteAction::Update).with_description(description);
        self.save(entity, audit, plan).await.map(Some)
    }

    /// Deletes an entity, or stages the deletion under a plan. Returns false
    /// (with the problem collected) when the entity does not exist.
    pub async fn delete_async(
        &self,
        kind: &str,
        key_name: &str,
        actor: &str,
        plan: Option<&PlanContext>,
        errors: &mut ErrorCollector,
    ) -> MetakindResult<bool> {
        let existing = match self.storage.get(kind, key_name).await? {
            Some(existing) => existing,
            None => {
                errors.add(Some("key_name"), messages::entity_missing(kind, key_name));
                return Ok(false);
            }
        };
        let audit = AuditMeta::new(actor, WriteAction::Delete);
        if let Some(plan) = plan {
            self.stage(existing, &audit, plan).await?;
            return Ok(true);
        }
        self.storage.delete(kind, key_name, &audit).await?;
        Ok(true)
    }

    /// Loads an entity and wraps it with its current schema.
    pub async fn get(&self, kind: &str, key_name: &str) -> MetakindResult<Option<DynamicEntity>> {
        let stored = match self.storage.get(kind, key_name).await? {
            Some(stored) => stored,
            None => return Ok(None),
        };
        Ok(Some(self.hydrate(&stored)?))
    }

    /// Loads several entities of one kind; missing keys come back as `None`
    /// in their input position.
    pub async fn batch_get(
        &self,
        kind: &str,
        key_names: &[&str],
    ) -> MetakindResult<Vec<Option<DynamicEntity>>> {
        let mut results = Vec::with_capacity(key_names.len());
        for key_name in key_names {
            results.push(self.get(kind, key_name).await?);
        }
        Ok(results)
    }

    /// Lists entities of `kind`, hydrated, up to the configured limit.
    pub async fn list(&self, kind: &str) -> MetakindResult<Vec<DynamicEntity>> {
        let stored = self
            .storage
            .list(kind, self.config.query_default_limit)
            .await?;
        stored.iter().map(|s| self.hydrate(s)).collect()
    }

    pub fn create(
        &self,
        kind: &str,
        entity_dict: JsonMap,
        actor: &str,
        context: Option<&RequestContext>,
        plan: Option<&PlanContext>,
        errors: &mut ErrorCollector,
    ) -> MetakindResult<Option<SaveResult>> {
        futures::executor::block_on(
            self.create_async(kind, entity_dict, actor, context, plan, errors),
        )
    }

    pub fn update(
        &self,
        kind: &str,
        entity_dict: JsonMap,
        actor: &str,
        description: Option<String>,
        context: Option<&RequestContext>,
        plan: Option<&PlanContext>,
        errors: &mut ErrorCollector,
    ) -> MetakindResult<Option<SaveResult>> {
        futures::executor::block_on(
            self.update_async(kind, entity_dict, actor, description, context, plan, errors),
        )
    }

    pub fn delete(
        &self,
        kind: &str,
        key_name: &str,
        actor: &str,
        plan: Option<&PlanContext>,
        errors: &mut ErrorCollector,
    ) -> MetakindResult<bool> {
        futures::executor::block_on(self.delete_async(kind, key_name, actor, plan, errors))
    }

    fn hydrate(&self, stored: &StoredEntity) -> MetakindResult<DynamicEntity> {
        let schema = match self.schemas.get(&stored.kind)? {
            Some(schema) => schema,
            None => Arc::new(crate::metadata::types::Schema::new(stored.kind.clone())),
        };
        Ok(DynamicEntity::from_stored(
            stored,
            schema,
            Arc::clone(self.schemas.registry()),
        ))
    }

    async fn save(
        &self,
        entity: StoredEntity,
        audit: AuditMeta,
        plan: Option<&PlanContext>,
    ) -> MetakindResult<SaveResult> {
        if let Some(plan) = plan {
            let change = self.stage(entity, &audit, plan).await?;
            return Ok(SaveResult::Pending(change));
        }
        let kind = entity.kind.clone();
        let key_name = self.storage.put(entity, &audit).await?;
        let stored = self
            .storage
            .get(&kind, &key_name)
            .await?
            .ok_or_else(|| MetakindError::NotFound(format!("{kind} {key_name}")))?;
        Ok(SaveResult::Entity(stored))
    }

    async fn stage(
        &self,
        entity: StoredEntity,
        audit: &AuditMeta,
        plan: &PlanContext,
    ) -> MetakindResult<PendingChange> {
        let change = PendingChange {
            change_id: Uuid::new_v4().to_string(),
            plan_id: plan.plan_id.clone(),
            kind: entity.kind.clone(),
            key_name: entity.key_name.clone(),
            action: audit.action,
            payload: entity,
            created_on: chrono::Utc::now(),
            created_by: audit.actor.clone(),
        };
        self.storage.put_pending(change.clone()).await?;
        Ok(change)
    }
}

/// Native fields pulled out of a caller-supplied map. Audit fields are
/// discarded outright; storage stamps them.
struct NativeParts {
    key_name: Option<String>,
    key_version: Option<i64>,
    sort_order: Option<i64>,
}

impl NativeParts {
    fn split(dict: &mut JsonMap) -> Self {
        for field in AUTO_FIELDS {
            dict.remove(field);
        }
        dict.remove("kind");
        let key_name = dict
            .remove("key_name")
            .as_ref()
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let key_version = dict.remove("key_version").as_ref().and_then(Value::as_i64);
        let sort_order = dict.remove("sort_order").as_ref().and_then(Value::as_i64);
        Self {
            key_name,
            key_version,
            sort_order,
        }
    }
}

/// Human-readable audit line naming the properties an update touched.
fn describe_changes(before: &JsonMap, after: &JsonMap) -> String {
    let changed: BTreeSet<&str> = before
        .keys()
        .chain(after.keys())
        .map(String::as_str)
        .filter(|name| before.get(*name) != after.get(*name))
        .collect();
    let names: Vec<&str> = changed.into_iter().collect();
    format!("Modified: {}", names.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::mock::StaticIdentityService;
    use crate::metadata::registry::KindRegistry;
    use crate::metadata::types::{FieldMetadata, PropertyType, Schema};
    use crate::storage::db::EntityDb;
    use crate::storage::sled_store::SledEntityStore;
    use serde_json::json;

    fn controller() -> EntityController {
        let db = Arc::new(EntityDb::temporary().unwrap());
        controller_with(Arc::new(SledEntityStore::new(db)))
    }

    fn controller_with(storage: Arc<dyn EntityStore>) -> EntityController {
        let schemas = Arc::new(SchemaStore::new(
            Arc::new(EntityDb::temporary().unwrap()),
            Arc::new(KindRegistry::new()),
        ));

        let mut schema = Schema::new("Widget");
        let mut name = FieldMetadata::new("name", PropertyType::String);
        name.required = true;
        let mut qty = FieldMetadata::new("qty", PropertyType::Integer);
        qty.range = vec![0.0, 100.0];
        schema.fields = vec![name, qty];
        schemas.persist(schema).unwrap();

        EntityController::new(
            schemas,
            storage,
            Arc::new(StaticIdentityService::with_users(["alice"])),
            EngineConfig::default(),
        )
    }

    /// Delegating store that keeps the audit description of each write.
    struct RecordingStore {
        inner: SledEntityStore,
        descriptions: std::sync::Mutex<Vec<Option<String>>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: SledEntityStore::new(Arc::new(EntityDb::temporary().unwrap())),
                descriptions: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl EntityStore for RecordingStore {
        async fn get(&self, kind: &str, key_name: &str) -> MetakindResult<Option<StoredEntity>> {
            self.inner.get(kind, key_name).await
        }

        async fn put(&self, entity: StoredEntity, audit: &AuditMeta) -> MetakindResult<String> {
            self.descriptions
                .lock()
                .unwrap()
                .push(audit.description.clone());
            self.inner.put(entity, audit).await
        }

        async fn delete(
            &self,
            kind: &str,
            key_name: &str,
            audit: &AuditMeta,
        ) -> MetakindResult<()> {
            self.inner.delete(kind, key_name, audit).await
        }

        async fn query_by_field(
            &self,
            kind: &str,
            field: &str,
            value: &Value,
            limit: usize,
        ) -> MetakindResult<Vec<StoredEntity>> {
            self.inner.query_by_field(kind, field, value, limit).await
        }

        async fn list(&self, kind: &str, limit: usize) -> MetakindResult<Vec<StoredEntity>> {
            self.inner.list(kind, limit).await
        }

        async fn put_pending(&self, change: PendingChange) -> MetakindResult<String> {
            self.inner.put_pending(change).await
        }

        async fn get_pending(
            &self,
            plan_id: &str,
            kind: &str,
            key_name: &str,
        ) -> MetakindResult<Option<PendingChange>> {
            self.inner.get_pending(plan_id, kind, key_name).await
        }
    }

    fn object(value: serde_json::Value) -> JsonMap {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn create_assigns_key_and_version() {
        let controller = controller();
        let mut errors = ErrorCollector::new();
        let result = controller
            .create_async(
                "Widget",
                object(json!({"name": "Bolt"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        assert!(errors.is_empty(), "{errors:?}");
        let saved = match result.unwrap() {
            SaveResult::Entity(entity) => entity,
            other => panic!("expected live write, got {other:?}"),
        };
        assert!(!saved.key_name.is_empty());
        assert_eq!(saved.key_version, 1);
        assert_eq!(saved.created_by.as_deref(), Some("alice"));
        assert_eq!(saved.properties["name"], json!("Bolt"));
    }

    #[tokio::test]
    async fn create_rejects_validation_failure_without_writing() {
        let controller = controller();
        let mut errors = ErrorCollector::new();
        let result = controller
            .create_async(
                "Widget",
                object(json!({"name": "Bolt", "qty": 150, "key_name": "w1"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(errors.contains_key("qty"));
        assert!(controller.get("Widget", "w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_existing_key_name() {
        let controller = controller();
        let mut errors = ErrorCollector::new();
        controller
            .create_async(
                "Widget",
                object(json!({"name": "Bolt", "key_name": "w1"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        assert!(errors.is_empty(), "{errors:?}");

        let err = controller
            .create_async(
                "Widget",
                object(json!({"name": "Nut", "key_name": "w1"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap_err();
        match err {
            MetakindError::Conflict(message) => assert!(message.contains("already exists")),
            other => panic!("expected conflict, got {other:?}"),
        }
        // Nothing was overwritten.
        let mut stored = controller.get("Widget", "w1").await.unwrap().unwrap();
        assert_eq!(stored.get("name").unwrap(), json!("Bolt"));
    }

    #[tokio::test]
    async fn update_requires_matching_key_version() {
        let controller = controller();
        let mut errors = ErrorCollector::new();
        controller
            .create_async(
                "Widget",
                object(json!({"name": "Bolt", "key_name": "w1"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();

        // Stale (and missing) versions are both rejected.
        let err = controller
            .update_async(
                "Widget",
                object(json!({"name": "Bolt", "qty": 5, "key_name": "w1", "key_version": 7})),
                "alice",
                None,
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MetakindError::Conflict(_)));
        let err = controller
            .update_async(
                "Widget",
                object(json!({"name": "Bolt", "qty": 5, "key_name": "w1"})),
                "alice",
                None,
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MetakindError::Conflict(_)));
        let stored = controller.get("Widget", "w1").await.unwrap().unwrap();
        assert_eq!(stored.key_version, Some(1));

        let mut errors = ErrorCollector::new();
        let result = controller
            .update_async(
                "Widget",
                object(json!({"name": "Bolt", "qty": 5, "key_name": "w1", "key_version": 1})),
                "alice",
                None,
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        assert!(errors.is_empty(), "{errors:?}");
        let saved = match result.unwrap() {
            SaveResult::Entity(entity) => entity,
            other => panic!("expected live write, got {other:?}"),
        };
        assert_eq!(saved.key_version, 2);
        assert_eq!(saved.properties["qty"], json!(5));
    }

    #[tokio::test]
    async fn update_preserves_creation_audit() {
        let controller = controller();
        let mut errors = ErrorCollector::new();
        controller
            .create_async(
                "Widget",
                object(json!({"name": "Bolt", "key_name": "w1"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        let result = controller
            .update_async(
                "Widget",
                object(json!({"name": "Bolt", "qty": 5, "key_name": "w1", "key_version": 1})),
                "bob",
                None,
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        let saved = match result.unwrap() {
            SaveResult::Entity(entity) => entity,
            other => panic!("expected live write, got {other:?}"),
        };
        assert_eq!(saved.created_by.as_deref(), Some("alice"));
        assert_eq!(saved.updated_by.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn update_of_missing_entity_is_collected() {
        let controller = controller();
        let mut errors = ErrorCollector::new();
        let result = controller
            .update_async(
                "Widget",
                object(json!({"name": "Bolt", "key_name": "ghost", "key_version": 1})),
                "alice",
                None,
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(errors.get(Some("key_name")).unwrap()[0].contains("does not exist"));
    }

    #[tokio::test]
    async fn plan_context_stages_instead_of_writing() {
        let controller = controller();
        let plan = PlanContext::new("plan-1");
        let mut errors = ErrorCollector::new();
        let result = controller
            .create_async(
                "Widget",
                object(json!({"name": "Bolt", "key_name": "w1"})),
                "alice",
                None,
                Some(&plan),
                &mut errors,
            )
            .await
            .unwrap();
        assert!(errors.is_empty(), "{errors:?}");
        let change = match result.unwrap() {
            SaveResult::Pending(change) => change,
            other => panic!("expected staged write, got {other:?}"),
        };
        assert_eq!(change.action, WriteAction::Insert);
        assert_eq!(change.payload.properties["name"], json!("Bolt"));
        // The live dataset was not touched.
        assert!(controller.get("Widget", "w1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn planned_update_keeps_read_version() {
        let controller = controller();
        let mut errors = ErrorCollector::new();
        controller
            .create_async(
                "Widget",
                object(json!({"name": "Bolt", "key_name": "w1"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();

        let plan = PlanContext::new("plan-1");
        let result = controller
            .update_async(
                "Widget",
                object(json!({"name": "Bolt", "qty": 5, "key_name": "w1", "key_version": 1})),
                "alice",
                None,
                None,
                Some(&plan),
                &mut errors,
            )
            .await
            .unwrap();
        assert!(errors.is_empty(), "{errors:?}");
        let change = match result.unwrap() {
            SaveResult::Pending(change) => change,
            other => panic!("expected staged write, got {other:?}"),
        };
        // The staged payload carries the version the caller read; applying
        // the plan is what mints the next one.
        assert_eq!(change.payload.key_version, 1);
        let mut stored = controller.get("Widget", "w1").await.unwrap().unwrap();
        assert_eq!(stored.key_version, Some(1));
        assert_eq!(stored.get("qty").unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn update_prefers_supplied_description() {
        let storage = Arc::new(RecordingStore::new());
        let controller = controller_with(Arc::clone(&storage) as Arc<dyn EntityStore>);
        let mut errors = ErrorCollector::new();
        controller
            .create_async(
                "Widget",
                object(json!({"name": "Bolt", "key_name": "w1"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();

        controller
            .update_async(
                "Widget",
                object(json!({"name": "Bolt", "qty": 5, "key_name": "w1", "key_version": 1})),
                "alice",
                Some("manual reconciliation".into()),
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        assert_eq!(
            storage.descriptions.lock().unwrap().last().unwrap().as_deref(),
            Some("manual reconciliation")
        );

        // Without one, the description is generated from the changed keys.
        controller
            .update_async(
                "Widget",
                object(json!({"name": "Bolt", "qty": 7, "key_name": "w1", "key_version": 2})),
                "alice",
                None,
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        let descriptions = storage.descriptions.lock().unwrap();
        let generated = descriptions.last().unwrap().as_deref().unwrap();
        assert!(generated.starts_with("Modified:"), "{generated}");
        assert!(generated.contains("qty"));
    }

    #[tokio::test]
    async fn request_context_relaxes_validation_for_one_caller() {
        let controller = controller();
        let ctx = RequestContext::new(Arc::clone(controller.schemas()));
        ctx.merge(
            "Widget",
            &object(json!({"fields": {"name": {"required": false}}})),
        )
        .unwrap();

        let mut errors = ErrorCollector::new();
        let result = controller
            .create_async(
                "Widget",
                object(json!({"key_name": "w1"})),
                "alice",
                Some(&ctx),
                None,
                &mut errors,
            )
            .await
            .unwrap();
        assert!(errors.is_empty(), "{errors:?}");
        assert!(result.is_some());

        // A caller without the context still hits the shared requirement.
        let mut errors = ErrorCollector::new();
        let result = controller
            .create_async(
                "Widget",
                object(json!({"key_name": "w2"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(errors.contains_key("name"));
    }

    #[tokio::test]
    async fn delete_round_trip() {
        let controller = controller();
        let mut errors = ErrorCollector::new();
        controller
            .create_async(
                "Widget",
                object(json!({"name": "Bolt", "key_name": "w1"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        assert!(controller
            .delete_async("Widget", "w1", "alice", None, &mut errors)
            .await
            .unwrap());
        assert!(controller.get("Widget", "w1").await.unwrap().is_none());
        assert!(!controller
            .delete_async("Widget", "w1", "alice", None, &mut errors)
            .await
            .unwrap());
        assert!(errors.contains_key("key_name"));
    }

    #[tokio::test]
    async fn auto_fields_from_callers_are_discarded() {
        let controller = controller();
        let mut errors = ErrorCollector::new();
        let result = controller
            .create_async(
                "Widget",
                object(json!({
                    "name": "Bolt",
                    "key_name": "w1",
                    "created_by": "mallory",
                    "updated_by": "mallory"
                })),
                "alice",
                None,
                None,
                &mut errors,
            )
            .await
            .unwrap();
        let saved = match result.unwrap() {
            SaveResult::Entity(entity) => entity,
            other => panic!("expected live write, got {other:?}"),
        };
        assert_eq!(saved.created_by.as_deref(), Some("alice"));
        assert!(!saved.properties.contains_key("created_by"));
    }

    #[test]
    fn blocking_wrappers_round_trip() {
        let controller = controller();
        let mut errors = ErrorCollector::new();
        let result = controller
            .create(
                "Widget",
                object(json!({"name": "Bolt", "key_name": "w1"})),
                "alice",
                None,
                None,
                &mut errors,
            )
            .unwrap();
        assert_eq!(result.unwrap().key_name(), "w1");
        assert!(controller
            .delete("Widget", "w1", "alice", None, &mut errors)
            .unwrap());
    }

    #[test]
    fn describe_changes_names_touched_properties() {
        let before = object(json!({"a": 1, "b": 2}));
        let after = object(json!({"a": 1, "b": 3, "c": 4}));
        assert_eq!(describe_changes(&before, &after), "Modified: b, c");
    }
}
