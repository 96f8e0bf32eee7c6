//! Validation gate for schema updates.
//!
//! Every change to a persisted schema document passes through [`update`],
//! which checks structural consistency before anything is written. Errors
//! block the save; warnings describe places where compiled model definitions
//! overrode the submitted document, and are returned alongside success.

use regex::Regex;

use crate::error::{MetakindError, MetakindResult};
use crate::errors::messages;
use crate::metadata::conditional::AssembledConditional;
use crate::metadata::store::SchemaStore;
use crate::metadata::types::{FieldMetadata, PropertyType, Schema};
use crate::storage::AUTO_FIELDS;

fn validate_unique(field: &FieldMetadata) -> Result<(), String> {
    if !field.index_for_query {
        return Err(messages::unique_validation(&field.name));
    }
    Ok(())
}

fn validate_default_value(field: &FieldMetadata) -> Result<(), String> {
    let default = match &field.default_value {
        Some(d) => d.as_str(),
        None => return Ok(()),
    };
    if field.property_type == PropertyType::String {
        if !field.choices.is_empty() && !field.choices.iter().any(|c| c == default) {
            return Err(messages::default_value_choices(default, &field.choices));
        }
        if let Some(pattern) = &field.regex {
            if let Ok(re) = Regex::new(pattern) {
                if !re.is_match(default) {
                    return Err(messages::default_value_regex(default, pattern));
                }
            }
        }
    }
    if field.property_type.is_numeric() && !field.range.is_empty() {
        let value: f64 = default
            .parse()
            .map_err(|_| messages::DEFAULT_VALUE_CONVERSION.to_string())?;
        if field.range.len() == 2 && (value < field.range[0] || value > field.range[1]) {
            return Err(messages::default_value_range(default, &field.range));
        }
    }
    Ok(())
}

fn validate_regex(field: &FieldMetadata) -> Result<(), String> {
    if let Some(pattern) = &field.regex {
        Regex::new(pattern).map_err(|e| messages::invalid_regex(pattern, &e.to_string()))?;
    }
    Ok(())
}

fn validate_range(field: &FieldMetadata) -> Result<(), String> {
    if field.range.is_empty() {
        return Ok(());
    }
    if field.range.len() != 2 {
        return Err(messages::INVALID_RANGE_COUNT.to_string());
    }
    if !field.property_type.is_numeric() {
        return Err(messages::INVALID_RANGE_TYPE.to_string());
    }
    Ok(())
}

fn validate_alt_key(store: &SchemaStore, field: &FieldMetadata) -> Result<(), String> {
    let alt_key = match &field.alt_key {
        Some(a) => a,
        None => return Ok(()),
    };
    if alt_key.foreign_kind.is_empty() {
        return Err(messages::undefined_foreign_kind(&field.name));
    }
    if alt_key.foreign_field.is_empty() {
        return Err(messages::undefined_foreign_field(&field.name));
    }
    if alt_key.key_field.is_empty() {
        return Err(messages::undefined_key_field(&field.name));
    }

    let foreign_schema = store
        .get(&alt_key.foreign_kind)
        .ok()
        .flatten()
        .ok_or_else(|| messages::metadata_nonexist(&alt_key.foreign_kind))?;
    let foreign_field = foreign_schema
        .field(&alt_key.foreign_field)
        .ok_or_else(|| {
            messages::nonexistent_foreign_field(
                &field.name,
                &alt_key.foreign_field,
                &alt_key.foreign_kind,
            )
        })?;

    if !alt_key.null_allowed && !foreign_field.required {
        return Err(messages::foreign_field_required(
            &foreign_field.name,
            &foreign_schema.kind,
            &field.name,
        ));
    }
    if !foreign_field.unique {
        return Err(messages::foreign_field_unique(
            &foreign_field.name,
            &foreign_schema.kind,
            &field.name,
        ));
    }
    Ok(())
}

fn validate_conditionals(field: &FieldMetadata, schema: &Schema) -> Result<(), String> {
    for conditional in &field.conditionals {
        if conditional.rules.is_empty() {
            return Err(messages::undefined_conditional_rules(&field.name));
        }
        if conditional.overrides.is_empty() {
            return Err(messages::undefined_conditional_overrides(&field.name));
        }
        let assembled = AssembledConditional::assemble(conditional, schema)
            .map_err(|e| e.to_string())?;
        assembled.validate(schema)?;
    }
    Ok(())
}

/// Foreign-key reference fields (`*__key_name`) must be query indexed.
fn validate_fk_index(kind: &str, field: &FieldMetadata) -> Result<(), String> {
    if field.name.ends_with("__key_name") && !field.index_for_query {
        return Err(messages::fk_invalid_index_setting(kind, &field.name));
    }
    Ok(())
}

/// Warnings describing where the overlay changed the submitted document.
fn diff_warnings(kind: &str, input: &Schema, merged: &Schema) -> Vec<String> {
    let mut warnings = Vec::new();

    let input_names: std::collections::BTreeSet<&str> =
        input.fields.iter().map(|f| f.name.as_str()).collect();
    let merged_names: std::collections::BTreeSet<&str> =
        merged.fields.iter().map(|f| f.name.as_str()).collect();
    let changed_names: Vec<&str> = input_names
        .symmetric_difference(&merged_names)
        .copied()
        .collect();
    if !changed_names.is_empty() {
        warnings.push(messages::override_field_warning(kind, &changed_names.join(", ")));
    }

    let mut changed_fields = Vec::new();
    for field in &input.fields {
        if let Some(merged_field) = merged.field(&field.name) {
            if merged_field != field {
                changed_fields.push(field.name.as_str());
            }
        }
    }
    if !changed_fields.is_empty() {
        warnings.push(messages::override_property_warning(kind, &changed_fields.join(", ")));
    }
    warnings
}

/// Validates and persists a schema document for `kind`.
///
/// On success the effective (overlaid) document is stored with a bumped
/// revision and any override warnings are returned. On failure nothing is
/// written and every validation error is reported at once.
pub fn update(store: &SchemaStore, kind: &str, mut schema: Schema) -> MetakindResult<Vec<String>> {
    if kind != schema.kind {
        return Err(MetakindError::Structural(messages::kind_mismatch(
            kind,
            &schema.kind,
        )));
    }

    schema.sort_fields();
    if let Some(name) = schema.duplicate_field_name() {
        return Err(MetakindError::Structural(messages::duplicate_field_name(
            kind, name,
        )));
    }

    // Managed kinds lock their field set to what the compiled model declares
    // plus the engine-managed audit fields.
    if store.registry().is_managed(kind) {
        let mut model_fields: std::collections::BTreeSet<String> =
            store.registry().model_field_names(kind).into_iter().collect();
        model_fields.extend(AUTO_FIELDS.iter().map(|f| f.to_string()));
        let schema_fields: std::collections::BTreeSet<String> =
            schema.fields.iter().map(|f| f.name.clone()).collect();
        let unknown: Vec<String> = model_fields
            .symmetric_difference(&schema_fields)
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(MetakindError::Structural(messages::managed_fields(
                kind,
                &unknown.join(", "),
            )));
        }
    }

    let input = schema.clone();
    let merged = match store.overlay(kind, Some(schema)) {
        Some(m) => m,
        None => return Err(MetakindError::Structural(messages::metadata_nonexist(kind))),
    };
    let warnings = diff_warnings(kind, &input, &merged);

    let mut errors: Vec<String> = Vec::new();
    for field in &merged.fields {
        if field.unique {
            if let Err(e) = validate_unique(field) {
                errors.push(e);
            }
        }
        if field.default_value.is_some() {
            if let Err(e) = validate_default_value(field) {
                errors.push(e);
            }
        }
        if field.regex.is_some() {
            if let Err(e) = validate_regex(field) {
                errors.push(e);
            }
        }
        if let Err(e) = validate_range(field) {
            errors.push(e);
        }
        if field.alt_key.is_some() {
            if let Err(e) = validate_alt_key(store, field) {
                errors.push(e);
            }
        }
        if !field.conditionals.is_empty() {
            if let Err(e) = validate_conditionals(field, &merged) {
                errors.push(e);
            }
        }
        if let Err(e) = validate_fk_index(kind, field) {
            errors.push(e);
        }
    }

    if !errors.is_empty() {
        return Err(MetakindError::Structural(errors.join("; ")));
    }

    store.persist(merged)?;
    Ok(warnings)
}
