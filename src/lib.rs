//! Metadata-driven dynamic entities.
//!
//! `metakind` stores entity schemas as data: each kind declares its fields,
//! types, defaults, and validation rules at runtime, and those declarations
//! drive conversion, cleaning, conditional overrides, and uniqueness checks
//! on every write. Entities themselves are property bags that materialize
//! declared fields lazily and round-trip through a sled-backed store with
//! optimistic concurrency.
//!
//! The main entry points:
//! - [`metadata::store::SchemaStore`] resolves and persists schemas,
//!   overlaying registered kind definitions onto stored documents.
//! - [`metadata::schema_update`] validates and applies schema changes.
//! - [`entity::DynamicEntity`] is the runtime entity wrapper.
//! - [`validation::Cleaner`] runs the transform-then-validate pass.
//! - [`controller::EntityController`] ties it together as CRUD.

pub mod config;
pub mod controller;
pub mod entity;
pub mod error;
pub mod errors;
pub mod identity;
pub mod metadata;
pub mod storage;
pub mod validation;

pub use config::EngineConfig;
pub use controller::{EntityController, PlanContext, SaveResult};
pub use entity::DynamicEntity;
pub use error::{MetakindError, MetakindResult};
pub use errors::ErrorCollector;
pub use identity::IdentityService;
pub use metadata::registry::{KindDefinition, KindRegistry};
pub use metadata::store::{RequestContext, SchemaStore};
pub use metadata::types::{FieldMetadata, PropertyType, Schema};
pub use storage::{EntityStore, StoredEntity};
pub use validation::Cleaner;
