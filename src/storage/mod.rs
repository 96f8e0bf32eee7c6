//! Entity persistence: the storage trait, stored record shapes, and the
//! sled-backed implementation.

pub mod db;
pub mod sled_store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MetakindResult;
use crate::metadata::types::JsonMap;

/// Audit fields the engine manages; caller-supplied values are discarded.
pub const AUTO_FIELDS: [&str; 4] = ["created_on", "created_by", "updated_on", "updated_by"];

/// Why a write happened, recorded alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteAction {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for WriteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WriteAction::Insert => "insert",
            WriteAction::Update => "update",
            WriteAction::Delete => "delete",
        })
    }
}

/// Who performed a write and what it was.
#[derive(Debug, Clone)]
pub struct AuditMeta {
    pub actor: String,
    pub action: WriteAction,
    pub description: Option<String>,
}

impl AuditMeta {
    pub fn new(actor: impl Into<String>, action: WriteAction) -> Self {
        Self {
            actor: actor.into(),
            action,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Persisted form of an entity: native fields plus a free-form property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoredEntity {
    pub kind: String,
    pub key_name: String,
    /// Optimistic-concurrency token; 1 on create, +1 on every update.
    pub key_version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_on: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub properties: JsonMap,
}

impl StoredEntity {
    pub fn new(kind: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key_name: key_name.into(),
            key_version: 1,
            ..Self::default()
        }
    }

    /// Property names, excluding audit fields, sorted.
    pub fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .properties
            .keys()
            .filter(|k| !AUTO_FIELDS.contains(&k.as_str()))
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// A staged write captured instead of mutating the live entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub change_id: String,
    /// Identifier of the plan the change belongs to.
    pub plan_id: String,
    pub kind: String,
    pub key_name: String,
    pub action: WriteAction,
    pub payload: StoredEntity,
    pub created_on: DateTime<Utc>,
    pub created_by: String,
}

/// Persistence seam for entities. The controller only talks to this trait,
/// so tests can substitute an in-memory double and production can swap
/// backends without touching validation or concurrency logic.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, kind: &str, key_name: &str) -> MetakindResult<Option<StoredEntity>>;

    /// Writes the entity, applying audit stamps, and returns its key_name.
    async fn put(&self, entity: StoredEntity, audit: &AuditMeta) -> MetakindResult<String>;

    async fn delete(&self, kind: &str, key_name: &str, audit: &AuditMeta) -> MetakindResult<()>;

    /// Entities of `kind` whose property `field` equals `value`, up to
    /// `limit` results.
    async fn query_by_field(
        &self,
        kind: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> MetakindResult<Vec<StoredEntity>>;

    /// Number of entities of `kind` whose property `field` equals `value`,
    /// capped at `limit`.
    async fn count_matching(
        &self,
        kind: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> MetakindResult<usize> {
        Ok(self.query_by_field(kind, field, value, limit).await?.len())
    }

    /// All entities of `kind`, up to `limit`.
    async fn list(&self, kind: &str, limit: usize) -> MetakindResult<Vec<StoredEntity>>;

    async fn put_pending(&self, change: PendingChange) -> MetakindResult<String>;

    async fn get_pending(
        &self,
        plan_id: &str,
        kind: &str,
        key_name: &str,
    ) -> MetakindResult<Option<PendingChange>>;
}
