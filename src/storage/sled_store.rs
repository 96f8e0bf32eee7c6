//! Sled-backed [`EntityStore`] implementation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::error::MetakindResult;
use crate::storage::db::EntityDb;
use crate::storage::{AuditMeta, EntityStore, PendingChange, StoredEntity};

pub struct SledEntityStore {
    db: Arc<EntityDb>,
}

impl SledEntityStore {
    pub fn new(db: Arc<EntityDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EntityStore for SledEntityStore {
    async fn get(&self, kind: &str, key_name: &str) -> MetakindResult<Option<StoredEntity>> {
        self.db.get_entity(kind, key_name)
    }

    async fn put(&self, mut entity: StoredEntity, audit: &AuditMeta) -> MetakindResult<String> {
        let now = Utc::now();
        if entity.created_on.is_none() {
            entity.created_on = Some(now);
        }
        if entity.created_by.is_none() {
            entity.created_by = Some(audit.actor.clone());
        }
        entity.updated_on = Some(now);
        entity.updated_by = Some(audit.actor.clone());

        log::info!(
            "{} {} {} by {}{}",
            audit.action,
            entity.kind,
            entity.key_name,
            audit.actor,
            audit
                .description
                .as_deref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default()
        );
        self.db.put_entity(&entity)?;
        Ok(entity.key_name)
    }

    async fn delete(&self, kind: &str, key_name: &str, audit: &AuditMeta) -> MetakindResult<()> {
        log::info!("{} {} {} by {}", audit.action, kind, key_name, audit.actor);
        self.db.remove_entity(kind, key_name)?;
        Ok(())
    }

    async fn query_by_field(
        &self,
        kind: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> MetakindResult<Vec<StoredEntity>> {
        // No secondary indexes; a prefix scan filtered in memory is enough
        // for the bounded lookups the validator issues.
        let mut matches = Vec::new();
        for entity in self.db.scan_entities(kind, usize::MAX)? {
            let matched = match field {
                "key_name" => entity.key_name.as_str() == value.as_str().unwrap_or_default(),
                _ => entity.properties.get(field) == Some(value),
            };
            if matched {
                matches.push(entity);
                if matches.len() >= limit {
                    break;
                }
            }
        }
        Ok(matches)
    }

    async fn list(&self, kind: &str, limit: usize) -> MetakindResult<Vec<StoredEntity>> {
        self.db.scan_entities(kind, limit)
    }

    async fn put_pending(&self, change: PendingChange) -> MetakindResult<String> {
        log::info!(
            "staging {} of {} {} for plan {}",
            change.action,
            change.kind,
            change.key_name,
            change.plan_id
        );
        self.db.put_pending(&change)?;
        Ok(change.change_id)
    }

    async fn get_pending(
        &self,
        plan_id: &str,
        kind: &str,
        key_name: &str,
    ) -> MetakindResult<Option<PendingChange>> {
        self.db.get_pending(plan_id, kind, key_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::WriteAction;
    use serde_json::json;

    fn store() -> SledEntityStore {
        SledEntityStore::new(Arc::new(EntityDb::temporary().unwrap()))
    }

    #[tokio::test]
    async fn put_applies_audit_stamps() {
        let store = store();
        let mut entity = StoredEntity::new("Widget", "w1");
        entity.properties.insert("name".into(), json!("Bolt"));

        let audit = AuditMeta::new("alice", WriteAction::Insert);
        store.put(entity, &audit).await.unwrap();

        let stored = store.get("Widget", "w1").await.unwrap().unwrap();
        assert_eq!(stored.created_by.as_deref(), Some("alice"));
        assert_eq!(stored.updated_by.as_deref(), Some("alice"));
        assert!(stored.created_on.is_some());

        // A later update keeps the creation stamp.
        let created_on = stored.created_on;
        let mut updated = stored.clone();
        updated.properties.insert("name".into(), json!("Nut"));
        let audit = AuditMeta::new("bob", WriteAction::Update);
        store.put(updated, &audit).await.unwrap();

        let stored = store.get("Widget", "w1").await.unwrap().unwrap();
        assert_eq!(stored.created_by.as_deref(), Some("alice"));
        assert_eq!(stored.created_on, created_on);
        assert_eq!(stored.updated_by.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn query_by_field_respects_limit() {
        let store = store();
        let audit = AuditMeta::new("alice", WriteAction::Insert);
        for name in ["w1", "w2", "w3"] {
            let mut entity = StoredEntity::new("Widget", name);
            entity.properties.insert("color".into(), json!("red"));
            store.put(entity, &audit).await.unwrap();
        }
        let matches = store
            .query_by_field("Widget", "color", &json!("red"), 2)
            .await
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(
            store
                .count_matching("Widget", "color", &json!("red"), 10)
                .await
                .unwrap(),
            3
        );
        let none = store
            .query_by_field("Widget", "color", &json!("blue"), 2)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn pending_round_trip() {
        let store = store();
        let change = PendingChange {
            change_id: "c1".into(),
            plan_id: "plan-7".into(),
            kind: "Widget".into(),
            key_name: "w1".into(),
            action: WriteAction::Insert,
            payload: StoredEntity::new("Widget", "w1"),
            created_on: Utc::now(),
            created_by: "alice".into(),
        };
        store.put_pending(change.clone()).await.unwrap();
        let found = store
            .get_pending("plan-7", "Widget", "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, change);
        assert!(store
            .get_pending("plan-8", "Widget", "w1")
            .await
            .unwrap()
            .is_none());
    }
}
