//! Field and entity cleaning.
//!
//! Cleaning is a transform-then-validate pass over entity values driven
//! entirely by schema declarations: convert to the declared type, normalize
//! whitespace and case, then validate type, range, regex, choices, and
//! uniqueness. Problems collect in an [`ErrorCollector`]; only infrastructure
//! failures (storage, identity lookups) abort the pass.
//!
//! Conditional overrides are resolved once against the pre-clean snapshot
//! and held fixed for the whole pass, so a value mutated mid-pass cannot
//! re-trigger different overrides for later fields.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::entity::DynamicEntity;
use crate::error::{MetakindError, MetakindResult};
use crate::errors::{messages, ErrorCollector};
use crate::identity::IdentityService;
use crate::metadata::conversions;
use crate::metadata::store::{RequestContext, SchemaStore};
use crate::metadata::types::{CaseType, FieldMetadata, JsonMap, PropertyType, Schema};
use crate::storage::EntityStore;

/// Trims and collapses internal runs of whitespace to single spaces.
pub fn strip_space(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

// Schemas reuse a small set of patterns across many entities, so compiled
// regexes are cached process-wide. Invalid patterns are rejected at schema
// update time and treated as matching here.
static REGEX_CACHE: Lazy<RwLock<HashMap<String, Option<Regex>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn matches_pattern(pattern: &str, text: &str) -> bool {
    {
        let cache = REGEX_CACHE.read().unwrap_or_else(|e| e.into_inner());
        if let Some(compiled) = cache.get(pattern) {
            return compiled.as_ref().map(|re| re.is_match(text)).unwrap_or(true);
        }
    }
    let compiled = Regex::new(pattern).ok();
    let matched = compiled.as_ref().map(|re| re.is_match(text)).unwrap_or(true);
    REGEX_CACHE
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(pattern.to_string(), compiled);
    matched
}

fn is_required(field: &FieldMetadata, overrides: Option<&JsonMap>) -> bool {
    overrides
        .and_then(|o| o.get("required"))
        .and_then(Value::as_bool)
        .unwrap_or(field.required)
}

fn case_setting(field: &FieldMetadata, overrides: Option<&JsonMap>) -> Option<CaseType> {
    match overrides.and_then(|o| o.get("convert_case")) {
        Some(setting) => setting.as_str().and_then(CaseType::parse),
        None => field.convert_case,
    }
}

fn is_empty(value: &Value) -> bool {
    value.is_null() || value.as_str().map(str::is_empty).unwrap_or(false)
}

/// Transform-and-validate over entities and plain maps.
///
/// When a [`RequestContext`] is attached, schemas resolve through it, so
/// request-scoped overrides steer the pass without touching the shared
/// store.
pub struct Cleaner<'a> {
    pub schemas: &'a SchemaStore,
    pub storage: &'a dyn EntityStore,
    pub identity: &'a dyn IdentityService,
    pub config: &'a EngineConfig,
    pub context: Option<&'a RequestContext>,
}

impl Cleaner<'_> {
    fn schema_for(&self, kind: &str) -> MetakindResult<Option<Arc<Schema>>> {
        match self.context {
            Some(context) => context.schema(kind),
            None => self.schemas.get(kind),
        }
    }

    /// Context schemas keep the stored revision, so the revision-keyed
    /// cache cannot serve their defaults.
    fn defaults_for(&self, schema: &Schema) -> Arc<JsonMap> {
        match self.context {
            Some(_) => Arc::new(conversions::default_values(&schema.fields)),
            None => self.schemas.default_values(schema),
        }
    }

    /// Cleans a plain map in place against the schema for `kind`.
    ///
    /// Values are converted to their declared types, defaults fill unset
    /// fields, and every declared field is validated. A kind without a
    /// schema is a no-op.
    pub async fn clean(
        &self,
        entity_dict: &mut JsonMap,
        kind: &str,
        errors: &mut ErrorCollector,
    ) -> MetakindResult<()> {
        let schema = match self.schema_for(kind)? {
            Some(schema) => schema,
            None => {
                log::warn!("no validation metadata found for model kind: {kind}");
                return Ok(());
            }
        };
        // Frozen for the pass; see module docs.
        let overrides = self.schemas.conditional_overrides(&schema, entity_dict);

        let defaults = self.defaults_for(&schema);
        for (name, default) in defaults.iter() {
            let unset = entity_dict.get(name).map(Value::is_null).unwrap_or(true);
            if unset {
                entity_dict.insert(name.clone(), default.clone());
            }
        }

        for field in &schema.fields {
            let name = field.name.as_str();
            match entity_dict.get(name).cloned() {
                Some(value) => {
                    if field.unique {
                        self.validate_unique(kind, name, entity_dict, errors).await?;
                    }
                    let cleaned = self
                        .clean_field(value.clone(), field, overrides.get(name), errors, true)
                        .await?;
                    if errors.is_empty() && cleaned != value {
                        entity_dict.insert(name.to_string(), cleaned);
                    }
                }
                None => {
                    if is_required(field, overrides.get(name))
                        && field.default_value.is_none()
                        && !errors.ignores_missing(name)
                    {
                        errors.add(Some(name), messages::required_fail(name));
                    }
                }
            }
        }
        Ok(())
    }

    /// Cleans a [`DynamicEntity`] in place. Conversion is skipped; entity
    /// values are expected to already carry their storage representation.
    pub async fn clean_entity(
        &self,
        entity: &mut DynamicEntity,
        errors: &mut ErrorCollector,
    ) -> MetakindResult<()> {
        let schema = entity.schema().clone();
        if schema.fields.is_empty() {
            return Ok(());
        }
        let kind = schema.kind.clone();
        let overrides = self
            .schemas
            .conditional_overrides(&schema, &entity.to_value());

        let defaults = self.schemas.default_values(&schema);
        for (name, default) in defaults.iter() {
            if entity.get(name)?.is_null() {
                entity.set(name, default.clone())?;
            }
        }

        let snapshot = entity.to_value();
        for field in &schema.fields {
            let name = field.name.as_str();
            if field.unique {
                self.validate_unique(&kind, name, &snapshot, errors).await?;
            }
            let value = entity.get(name)?;
            let cleaned = self
                .clean_field(value.clone(), field, overrides.get(name), errors, false)
                .await?;
            if errors.is_empty() && cleaned != value {
                entity.set(name, cleaned)?;
            }
        }
        Ok(())
    }

    /// Cleans one field value, honoring repeated declarations. Elements of a
    /// repeated value that fail cleaning are dropped and reported; a
    /// non-list value for a repeated field is left alone with a warning.
    pub async fn clean_field(
        &self,
        value: Value,
        field: &FieldMetadata,
        overrides: Option<&JsonMap>,
        errors: &mut ErrorCollector,
        convert: bool,
    ) -> MetakindResult<Value> {
        let name = field.name.as_str();
        if field.repeated {
            let items = match value {
                Value::Array(items) => items,
                other => {
                    log::warn!("{}", messages::repeated_fail(name));
                    return Ok(other);
                }
            };
            let mut cleaned = Vec::with_capacity(items.len());
            for item in items {
                let (item, error) = self.clean_single(item, field, overrides, convert).await?;
                match error {
                    Some(error) => errors.add(Some(name), error),
                    None => cleaned.push(item),
                }
            }
            return Ok(Value::Array(cleaned));
        }

        let (cleaned, error) = self.clean_single(value, field, overrides, convert).await?;
        if let Some(error) = error {
            let suppressed =
                error == messages::required_fail(name) && errors.ignores_missing(name);
            if !suppressed {
                errors.add(Some(name), error);
            }
        }
        Ok(cleaned)
    }

    /// Transform-then-validate for a single scalar value.
    async fn clean_single(
        &self,
        mut value: Value,
        field: &FieldMetadata,
        overrides: Option<&JsonMap>,
        convert: bool,
    ) -> MetakindResult<(Value, Option<String>)> {
        if is_empty(&value) {
            // A choice field with no value collapses to an explicit null.
            if !field.choices.is_empty() {
                value = Value::Null;
            }
            let error = self.validate_value(&value, field, overrides).await?;
            return Ok((value, error));
        }

        if convert {
            match conversions::convert(&value, field.property_type) {
                Ok(converted) => value = converted,
                Err(_) => return Ok((value, Some(messages::INVALID_TYPE.to_string()))),
            }
        }
        if field.strip_whitespace {
            if let Value::String(s) = &value {
                value = Value::String(strip_space(s));
            }
        }
        if let Some(case) = case_setting(field, overrides) {
            if let Value::String(s) = &value {
                value = Value::String(case.apply(s));
            }
        }

        let error = self.validate_value(&value, field, overrides).await?;
        Ok((value, error))
    }

    /// Validates a transformed value. Returns the failure message, if any;
    /// `Err` is reserved for infrastructure problems.
    async fn validate_value(
        &self,
        value: &Value,
        field: &FieldMetadata,
        overrides: Option<&JsonMap>,
    ) -> MetakindResult<Option<String>> {
        let name = field.name.as_str();
        if value.is_null() {
            if is_required(field, overrides) && field.default_value.is_none() {
                return Ok(Some(messages::required_fail(name)));
            }
            return Ok(None);
        }
        if !field.choices.is_empty() {
            let as_string = conversions::maybe_to_string(value);
            if !field.choices.iter().any(|c| *c == as_string) {
                return Ok(Some(messages::choice_list_fail(value, name)));
            }
        }

        let error = match field.property_type {
            PropertyType::String => self.validate_string(value, field, overrides),
            PropertyType::Integer => match value.as_i64() {
                Some(v) => validate_range_i64(v, field),
                None => Some(messages::INT_FAIL.to_string()),
            },
            PropertyType::Float => match value.as_f64().filter(|_| value.is_f64()) {
                Some(v) => validate_range_f64(v, field)
                    .map(|_| messages::float_range_fail(value, &field.range)),
                None => Some(messages::FLOAT_FAIL.to_string()),
            },
            PropertyType::Decimal => match value.as_f64().filter(|_| value.is_f64()) {
                Some(v) => validate_range_f64(v, field)
                    .map(|_| messages::decimal_range_fail(value, &field.range)),
                None => Some(messages::DECIMAL_FAIL.to_string()),
            },
            PropertyType::Timestamp => {
                if value.is_f64() {
                    None
                } else {
                    Some(messages::TIMESTAMP_FAIL.to_string())
                }
            }
            PropertyType::Boolean => {
                if value.is_boolean() {
                    None
                } else {
                    Some(messages::BOOLEAN_FAIL.to_string())
                }
            }
            PropertyType::DateTime => {
                let valid = value
                    .as_str()
                    .map(|s| conversions::to_datetime(&Value::String(s.to_string())).is_ok())
                    .unwrap_or(false);
                if valid {
                    None
                } else {
                    Some(messages::DATETIME_FAIL.to_string())
                }
            }
            PropertyType::Ldap => return self.validate_ldap(value, field, overrides).await,
            _ => None,
        };
        Ok(error)
    }

    fn validate_string(
        &self,
        value: &Value,
        field: &FieldMetadata,
        overrides: Option<&JsonMap>,
    ) -> Option<String> {
        let text = match value.as_str() {
            Some(text) => text,
            None => return Some(messages::INVALID_TYPE.to_string()),
        };
        if text.len() > self.config.string_max_len {
            return Some(messages::STRING_FAIL.to_string());
        }
        if text.is_empty() && is_required(field, overrides) {
            return Some(messages::REQUIRED_STRING_EMPTY.to_string());
        }
        if let Some(pattern) = &field.regex {
            if !text.is_empty() && !matches_pattern(pattern, text) {
                return Some(messages::regex_fail(&field.name, pattern));
            }
        }
        None
    }

    async fn validate_ldap(
        &self,
        value: &Value,
        field: &FieldMetadata,
        overrides: Option<&JsonMap>,
    ) -> MetakindResult<Option<String>> {
        let name = conversions::maybe_to_string(value);
        if name.is_empty() && !is_required(field, overrides) {
            return Ok(None);
        }
        match self.identity.is_valid_identity(&name).await {
            Ok(true) => Ok(None),
            Ok(false) => Ok(Some(messages::invalid_ldap(&name))),
            // The lookup itself failed; the caller should retry, not reject.
            Err(error) => Err(MetakindError::IdentityUnavailable(error.to_string())),
        }
    }

    /// Checks a unique field against stored entities. One match is fine when
    /// it is the entity being updated; anything else is a duplicate.
    async fn validate_unique(
        &self,
        kind: &str,
        field: &str,
        snapshot: &JsonMap,
        errors: &mut ErrorCollector,
    ) -> MetakindResult<()> {
        let value = match snapshot.get(field) {
            Some(value) if !is_empty(value) => value,
            _ => return Ok(()),
        };
        let matches = self
            .storage
            .query_by_field(kind, field, value, self.config.unique_query_limit)
            .await?;
        if matches.len() > 1 {
            errors.add(Some(field), messages::duplicate_value(kind, field, value));
            return Ok(());
        }
        if let Some(existing) = matches.first() {
            let own_key = snapshot.get("key_name").and_then(Value::as_str);
            if own_key != Some(existing.key_name.as_str()) {
                errors.add(Some(field), messages::duplicate_value(kind, field, value));
            }
        }
        Ok(())
    }
}

fn validate_range_i64(value: i64, field: &FieldMetadata) -> Option<String> {
    if field.range.len() == 2 {
        let (low, high) = (field.range[0], field.range[1]);
        if (value as f64) < low || (value as f64) > high {
            return Some(messages::int_range_fail(
                &Value::Number(value.into()),
                &field.range,
            ));
        }
    }
    None
}

/// `Some(())` signals out-of-range; the caller formats the message for its
/// own property type.
fn validate_range_f64(value: f64, field: &FieldMetadata) -> Option<()> {
    if field.range.len() == 2 && (value < field.range[0] || value > field.range[1]) {
        return Some(());
    }
    None
}
