//! Schema-driven entities.
//!
//! A [`DynamicEntity`] carries a handful of native fields (identity, version,
//! audit stamps) as typed struct members and everything else as dynamic slots
//! materialized lazily from its schema. Property access goes through a single
//! dispatch on [`Slot`], so native and dynamic fields cannot drift apart.
//!
//! The schema handle is shared with the request that produced it; any
//! mutation (an undeclared set, a per-entity override) clones it first, so an
//! entity can reshape its own schema without affecting anything else.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::error::{MetakindError, MetakindResult};
use crate::metadata::registry::KindRegistry;
use crate::metadata::types::{FieldMetadata, JsonMap, PropertyType, Schema};
use crate::storage::{StoredEntity, AUTO_FIELDS};

/// Fields stored natively on the struct rather than in the slot map.
pub const NATIVE_FIELDS: [&str; 8] = [
    "kind",
    "key_name",
    "key_version",
    "sort_order",
    "created_on",
    "created_by",
    "updated_on",
    "updated_by",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeField {
    Kind,
    KeyName,
    KeyVersion,
    SortOrder,
    CreatedOn,
    CreatedBy,
    UpdatedOn,
    UpdatedBy,
}

fn native_field(name: &str) -> Option<NativeField> {
    match name {
        "kind" => Some(NativeField::Kind),
        "key_name" => Some(NativeField::KeyName),
        "key_version" => Some(NativeField::KeyVersion),
        "sort_order" => Some(NativeField::SortOrder),
        "created_on" => Some(NativeField::CreatedOn),
        "created_by" => Some(NativeField::CreatedBy),
        "updated_on" => Some(NativeField::UpdatedOn),
        "updated_by" => Some(NativeField::UpdatedBy),
        _ => None,
    }
}

/// A materialized dynamic property.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicSlot {
    pub property_type: PropertyType,
    pub repeated: bool,
    /// `None` means declared but unset; `Some(Value::Null)` is an explicit
    /// null assignment.
    pub value: Option<Value>,
}

/// Resolution of a property name against an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Native(NativeField),
    Dynamic(DynamicSlot),
}

pub struct DynamicEntity {
    kind: String,
    pub key_name: Option<String>,
    pub key_version: Option<i64>,
    pub sort_order: Option<i64>,
    pub created_on: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_on: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
    schema: Arc<Schema>,
    registry: Arc<KindRegistry>,
    slots: BTreeMap<String, DynamicSlot>,
}

impl DynamicEntity {
    pub fn new(schema: Arc<Schema>, registry: Arc<KindRegistry>) -> Self {
        Self {
            kind: schema.kind.clone(),
            key_name: None,
            key_version: None,
            sort_order: None,
            created_on: None,
            created_by: None,
            updated_on: None,
            updated_by: None,
            schema,
            registry,
            slots: BTreeMap::new(),
        }
    }

    /// Rehydrates an entity from its stored form. Stored properties the
    /// schema does not declare come back as generic slots, so old data stays
    /// readable after a schema narrows.
    pub fn from_stored(
        stored: &StoredEntity,
        schema: Arc<Schema>,
        registry: Arc<KindRegistry>,
    ) -> Self {
        let mut entity = Self::new(schema, registry);
        entity.key_name = Some(stored.key_name.clone());
        entity.key_version = Some(stored.key_version);
        entity.sort_order = stored.sort_order;
        entity.created_on = stored.created_on;
        entity.created_by = stored.created_by.clone();
        entity.updated_on = stored.updated_on;
        entity.updated_by = stored.updated_by.clone();
        for (name, value) in &stored.properties {
            if native_field(name).is_some() {
                continue;
            }
            let (property_type, repeated) = match entity.schema.field(name) {
                Some(field) => (field.property_type, field.repeated),
                None => (infer_property_type(value), value.is_array()),
            };
            entity.slots.insert(
                name.clone(),
                DynamicSlot {
                    property_type,
                    repeated,
                    value: Some(value.clone()),
                },
            );
        }
        entity
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Resolves a property name without materializing anything.
    pub fn slot(&self, name: &str) -> Option<Slot> {
        if let Some(native) = native_field(name) {
            return Some(Slot::Native(native));
        }
        if let Some(slot) = self.slots.get(name) {
            return Some(Slot::Dynamic(slot.clone()));
        }
        self.schema.field(name).map(|field| {
            Slot::Dynamic(DynamicSlot {
                property_type: field.property_type,
                repeated: field.repeated,
                value: None,
            })
        })
    }

    fn materialize(&mut self, name: &str) -> Option<&mut DynamicSlot> {
        if !self.slots.contains_key(name) {
            let field = self.schema.field(name)?;
            let slot = DynamicSlot {
                property_type: field.property_type,
                repeated: field.repeated,
                value: None,
            };
            self.slots.insert(name.to_string(), slot);
        }
        self.slots.get_mut(name)
    }

    /// Reads a property. Declared-but-unset properties read as null;
    /// undeclared names error.
    pub fn get(&mut self, name: &str) -> MetakindResult<Value> {
        if let Some(native) = native_field(name) {
            return Ok(self.native_value(native));
        }
        match self.materialize(name) {
            Some(slot) => Ok(slot.value.clone().unwrap_or(Value::Null)),
            None => Err(MetakindError::UnknownProperty(format!(
                "{}.{}",
                self.kind, name
            ))),
        }
    }

    fn native_value(&self, native: NativeField) -> Value {
        match native {
            NativeField::Kind => json!(self.kind),
            NativeField::KeyName => json!(self.key_name),
            NativeField::KeyVersion => json!(self.key_version),
            NativeField::SortOrder => json!(self.sort_order),
            NativeField::CreatedOn => json!(self.created_on),
            NativeField::CreatedBy => json!(self.created_by),
            NativeField::UpdatedOn => json!(self.updated_on),
            NativeField::UpdatedBy => json!(self.updated_by),
        }
    }

    fn set_native(&mut self, native: NativeField, value: Value) -> MetakindResult<()> {
        fn bad(name: &str, value: &Value) -> MetakindError {
            MetakindError::Conversion(format!("Cannot assign {value} to {name}"))
        }
        match native {
            NativeField::Kind => {
                return Err(MetakindError::Validation(
                    "kind cannot be reassigned".to_string(),
                ))
            }
            NativeField::KeyName => {
                self.key_name = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => return Err(bad("key_name", &other)),
                }
            }
            NativeField::KeyVersion => {
                self.key_version = match value {
                    Value::Null => None,
                    other => Some(other.as_i64().ok_or_else(|| bad("key_version", &other))?),
                }
            }
            NativeField::SortOrder => {
                self.sort_order = match value {
                    Value::Null => None,
                    other => Some(other.as_i64().ok_or_else(|| bad("sort_order", &other))?),
                }
            }
            NativeField::CreatedOn => {
                self.created_on = parse_timestamp(&value).map_err(|v| bad("created_on", &v))?
            }
            NativeField::CreatedBy => {
                self.created_by = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => return Err(bad("created_by", &other)),
                }
            }
            NativeField::UpdatedOn => {
                self.updated_on = parse_timestamp(&value).map_err(|v| bad("updated_on", &v))?
            }
            NativeField::UpdatedBy => {
                self.updated_by = match value {
                    Value::Null => None,
                    Value::String(s) => Some(s),
                    other => return Err(bad("updated_by", &other)),
                }
            }
        }
        Ok(())
    }

    /// Writes a property. Assigning an undeclared name (or a value whose
    /// shape disagrees with the declaration) extends this entity's private
    /// copy of the schema first.
    pub fn set(&mut self, name: &str, value: Value) -> MetakindResult<()> {
        if let Some(native) = native_field(name) {
            return self.set_native(native, value);
        }

        let repeated = value.is_array();
        let declaration = self.schema.field(name).cloned();
        let needs_declaration = match &declaration {
            Some(field) => field.repeated != repeated && !value.is_null(),
            None => true,
        };
        if needs_declaration {
            let inferred_type = declaration
                .as_ref()
                .map(|f| f.property_type)
                .filter(|_| value.is_null())
                .unwrap_or_else(|| infer_property_type(&value));
            let schema = Arc::make_mut(&mut self.schema);
            match schema.field_mut(name) {
                Some(field) => {
                    field.repeated = repeated;
                    if field.property_type == PropertyType::Generic {
                        field.property_type = inferred_type;
                    }
                }
                None => {
                    let mut field = FieldMetadata::new(name, inferred_type);
                    field.repeated = repeated;
                    schema.fields.push(field);
                    schema.sort_fields();
                }
            }
        }

        let field = self
            .schema
            .field(name)
            .cloned()
            .unwrap_or_else(|| FieldMetadata::generic(name));
        self.slots.insert(
            name.to_string(),
            DynamicSlot {
                property_type: field.property_type,
                repeated: field.repeated,
                value: Some(value),
            },
        );
        Ok(())
    }

    /// Removes a materialized property from this entity and its private
    /// schema copy. Native fields and fields the compiled model declares
    /// cannot be removed.
    pub fn delete(&mut self, name: &str) -> MetakindResult<()> {
        if native_field(name).is_some() {
            return Err(MetakindError::Validation(format!(
                "{name} is a reserved field and cannot be deleted"
            )));
        }
        if self.slots.get(name).is_none() {
            if self.schema.field(name).is_some() {
                return Err(MetakindError::Validation(format!(
                    "{name} is not a materialized property"
                )));
            }
            return Err(MetakindError::UnknownProperty(format!(
                "{}.{}",
                self.kind, name
            )));
        }
        if self
            .registry
            .model_field_names(&self.kind)
            .iter()
            .any(|f| f == name)
        {
            return Err(MetakindError::Structural(format!(
                "{name} is declared by the {} model and cannot be removed",
                self.kind
            )));
        }
        self.slots.remove(name);
        let schema = Arc::make_mut(&mut self.schema);
        schema.fields.retain(|f| f.name != name);
        Ok(())
    }

    /// Merges schema option overrides into this entity's private schema copy.
    pub fn merge_schema(&mut self, options: &JsonMap) {
        let schema = Arc::make_mut(&mut self.schema);
        schema.apply_options(options);
        schema.sort_fields();
    }

    /// Snapshot of every property as a JSON map. Declared fields are forced
    /// to materialize, so unset ones appear explicitly as null.
    pub fn to_value(&mut self) -> JsonMap {
        let declared: Vec<String> = self.schema.field_names();
        for name in declared {
            if native_field(&name).is_none() {
                self.materialize(&name);
            }
        }

        let mut map = JsonMap::new();
        map.insert("kind".to_string(), json!(self.kind));
        if let Some(key_name) = &self.key_name {
            map.insert("key_name".to_string(), json!(key_name));
        }
        if let Some(key_version) = self.key_version {
            map.insert("key_version".to_string(), json!(key_version));
        }
        if let Some(sort_order) = self.sort_order {
            map.insert("sort_order".to_string(), json!(sort_order));
        }
        if let Some(created_on) = self.created_on {
            map.insert("created_on".to_string(), json!(created_on));
        }
        if let Some(created_by) = &self.created_by {
            map.insert("created_by".to_string(), json!(created_by));
        }
        if let Some(updated_on) = self.updated_on {
            map.insert("updated_on".to_string(), json!(updated_on));
        }
        if let Some(updated_by) = &self.updated_by {
            map.insert("updated_by".to_string(), json!(updated_by));
        }
        for (name, slot) in &self.slots {
            map.insert(name.clone(), slot.value.clone().unwrap_or(Value::Null));
        }
        map
    }

    /// Clears the audit fields; the engine reassigns them on write.
    pub fn clear_audit_fields(&mut self) {
        self.created_on = None;
        self.created_by = None;
        self.updated_on = None;
        self.updated_by = None;
        for field in AUTO_FIELDS {
            self.slots.remove(field);
        }
    }

    /// Stored form of this entity. Materialized values (including explicit
    /// nulls) persist; unset declared fields do not.
    pub fn to_stored(&self) -> StoredEntity {
        let mut properties = JsonMap::new();
        for (name, slot) in &self.slots {
            if AUTO_FIELDS.contains(&name.as_str()) {
                continue;
            }
            if let Some(value) = &slot.value {
                properties.insert(name.clone(), value.clone());
            }
        }
        StoredEntity {
            kind: self.kind.clone(),
            key_name: self.key_name.clone().unwrap_or_default(),
            key_version: self.key_version.unwrap_or(1),
            sort_order: self.sort_order,
            created_on: self.created_on,
            created_by: self.created_by.clone(),
            updated_on: self.updated_on,
            updated_by: self.updated_by.clone(),
            properties,
        }
    }
}

fn infer_property_type(value: &Value) -> PropertyType {
    let element = match value {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };
    if element.is_object() {
        PropertyType::Struct
    } else {
        PropertyType::Generic
    }
}

fn parse_timestamp(value: &Value) -> Result<Option<DateTime<Utc>>, Value> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => s
            .parse::<DateTime<Utc>>()
            .map(Some)
            .map_err(|_| value.clone()),
        other => Err(other.clone()),
    }
}
