//! Sled database wrapper with named trees for each record family.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::MetakindResult;
use crate::metadata::types::Schema;
use crate::storage::{PendingChange, StoredEntity};

/// Unified access to the engine's sled trees.
#[derive(Clone)]
pub struct EntityDb {
    db: sled::Db,
    entities_tree: sled::Tree,
    schemas_tree: sled::Tree,
    pending_tree: sled::Tree,
}

impl EntityDb {
    pub fn open(path: impl AsRef<std::path::Path>) -> MetakindResult<Self> {
        Self::from_sled(sled::open(path)?)
    }

    /// An in-memory database that vanishes on drop, for tests.
    pub fn temporary() -> MetakindResult<Self> {
        Self::from_sled(sled::Config::new().temporary(true).open()?)
    }

    fn from_sled(db: sled::Db) -> MetakindResult<Self> {
        let entities_tree = db.open_tree("entities")?;
        let schemas_tree = db.open_tree("schemas")?;
        let pending_tree = db.open_tree("pending_changes")?;
        Ok(Self {
            db,
            entities_tree,
            schemas_tree,
            pending_tree,
        })
    }

    fn store_item<T: Serialize>(
        &self,
        tree: &sled::Tree,
        key: &str,
        item: &T,
    ) -> MetakindResult<()> {
        let bytes = serde_json::to_vec(item)?;
        tree.insert(key.as_bytes(), bytes)?;
        // Durability before the write is acknowledged.
        self.db.flush()?;
        Ok(())
    }

    fn get_item<T: DeserializeOwned>(
        &self,
        tree: &sled::Tree,
        key: &str,
    ) -> MetakindResult<Option<T>> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn remove_item(&self, tree: &sled::Tree, key: &str) -> MetakindResult<bool> {
        let removed = tree.remove(key.as_bytes())?.is_some();
        self.db.flush()?;
        Ok(removed)
    }

    fn entity_key(kind: &str, key_name: &str) -> String {
        format!("{kind}:{key_name}")
    }

    fn pending_key(plan_id: &str, kind: &str, key_name: &str) -> String {
        format!("{plan_id}:{kind}:{key_name}")
    }

    pub fn put_entity(&self, entity: &StoredEntity) -> MetakindResult<()> {
        let key = Self::entity_key(&entity.kind, &entity.key_name);
        self.store_item(&self.entities_tree, &key, entity)
    }

    pub fn get_entity(&self, kind: &str, key_name: &str) -> MetakindResult<Option<StoredEntity>> {
        self.get_item(&self.entities_tree, &Self::entity_key(kind, key_name))
    }

    pub fn remove_entity(&self, kind: &str, key_name: &str) -> MetakindResult<bool> {
        self.remove_item(&self.entities_tree, &Self::entity_key(kind, key_name))
    }

    /// Iterates entities of one kind, up to `limit`, in key order.
    pub fn scan_entities(&self, kind: &str, limit: usize) -> MetakindResult<Vec<StoredEntity>> {
        let prefix = format!("{kind}:");
        let mut entities = Vec::new();
        for result in self.entities_tree.scan_prefix(prefix.as_bytes()) {
            if entities.len() >= limit {
                break;
            }
            let (_, bytes) = result?;
            entities.push(serde_json::from_slice(&bytes)?);
        }
        Ok(entities)
    }

    pub fn put_schema(&self, schema: &Schema) -> MetakindResult<()> {
        self.store_item(&self.schemas_tree, &schema.kind, schema)
    }

    pub fn get_schema(&self, kind: &str) -> MetakindResult<Option<Schema>> {
        self.get_item(&self.schemas_tree, kind)
    }

    pub fn remove_schema(&self, kind: &str) -> MetakindResult<bool> {
        self.remove_item(&self.schemas_tree, kind)
    }

    /// Kinds with a persisted schema document, sorted.
    pub fn schema_kinds(&self) -> MetakindResult<Vec<String>> {
        let mut kinds = Vec::new();
        for result in self.schemas_tree.iter() {
            let (key, _) = result?;
            kinds.push(String::from_utf8_lossy(&key).to_string());
        }
        kinds.sort();
        Ok(kinds)
    }

    pub fn put_pending(&self, change: &PendingChange) -> MetakindResult<()> {
        let key = Self::pending_key(&change.plan_id, &change.kind, &change.key_name);
        self.store_item(&self.pending_tree, &key, change)
    }

    pub fn get_pending(
        &self,
        plan_id: &str,
        kind: &str,
        key_name: &str,
    ) -> MetakindResult<Option<PendingChange>> {
        self.get_item(&self.pending_tree, &Self::pending_key(plan_id, kind, key_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_round_trip_and_scan() {
        let db = EntityDb::temporary().unwrap();
        for name in ["a", "b", "c"] {
            let entity = StoredEntity::new("Widget", name);
            db.put_entity(&entity).unwrap();
        }
        db.put_entity(&StoredEntity::new("Gadget", "x")).unwrap();

        let found = db.get_entity("Widget", "b").unwrap().unwrap();
        assert_eq!(found.key_name, "b");
        assert_eq!(db.scan_entities("Widget", 10).unwrap().len(), 3);
        assert_eq!(db.scan_entities("Widget", 2).unwrap().len(), 2);
        assert_eq!(db.scan_entities("Gadget", 10).unwrap().len(), 1);

        assert!(db.remove_entity("Widget", "b").unwrap());
        assert!(db.get_entity("Widget", "b").unwrap().is_none());
    }

    #[test]
    fn schema_round_trip() {
        let db = EntityDb::temporary().unwrap();
        let schema = Schema::new("Widget");
        db.put_schema(&schema).unwrap();
        assert_eq!(db.get_schema("Widget").unwrap().unwrap().kind, "Widget");
        assert_eq!(db.schema_kinds().unwrap(), ["Widget"]);
        assert!(db.get_schema("Missing").unwrap().is_none());
    }
}
