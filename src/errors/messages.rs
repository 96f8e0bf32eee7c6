//! Canonical user-facing message text.
//!
//! Every message the validation and controller layers hand to an
//! [`super::ErrorCollector`] is built here so wording stays consistent and
//! tests can match on it.

use serde_json::Value;

// Field validation.
pub const BOOLEAN_FAIL: &str = "The input is not a boolean.";
pub const DATETIME_FAIL: &str = "The input is not a datetime.";
pub const DECIMAL_FAIL: &str = "The input is not a decimal.";
pub const FLOAT_FAIL: &str = "The input is not a float.";
pub const INT_FAIL: &str = "The input is not an integer.";
pub const INVALID_TYPE: &str = "Couldn't convert types.";
pub const REQUIRED_STRING_EMPTY: &str = "Required string field is empty.";
pub const STRING_FAIL: &str = "Length is too long for String field.";
pub const TIMESTAMP_FAIL: &str = "The date/time must be provided in ms since the epoch.";

// Schema validation.
pub const INVALID_RANGE_COUNT: &str = "Range value should contain two elements";
pub const INVALID_RANGE_TYPE: &str = "Range value only valid for numerical types";
pub const DEFAULT_VALUE_CONVERSION: &str = "Default value cannot be converted to numerical";

pub fn required_fail(field: &str) -> String {
    format!("Required field missing: {field}.")
}

pub fn int_range_fail(value: &Value, range: &[f64]) -> String {
    format!("The integer ({value}) must be in range {range:?}.")
}

pub fn float_range_fail(value: &Value, range: &[f64]) -> String {
    format!("The float ({value}) value must be in range {range:?}.")
}

pub fn decimal_range_fail(value: &Value, range: &[f64]) -> String {
    format!("The decimal value ({value}) must be in range {range:?}.")
}

pub fn choice_list_fail(value: &Value, field: &str) -> String {
    format!("Value {value} for property {field} is not an allowed choice.")
}

pub fn regex_fail(field: &str, pattern: &str) -> String {
    format!("Field {field} did not match validation: {pattern}.")
}

pub fn repeated_fail(field: &str) -> String {
    format!("Field {field} does not accept list.")
}

pub fn invalid_ldap(name: &str) -> String {
    format!("{name} is not a valid ldap.")
}

pub fn duplicate_value(kind: &str, field: &str, value: &Value) -> String {
    format!("Duplicate {kind} {field} detected: {value}")
}

// Controller.
pub fn duplicate_keyname(kind: &str, key_name: &str) -> String {
    format!("{kind} with key name {key_name} already exists.")
}

pub fn keyname_missing(kind: &str) -> String {
    format!("{kind} key_name was not supplied.")
}

pub fn entity_missing(kind: &str, key_name: &str) -> String {
    format!("{kind} {key_name} does not exist.")
}

pub fn key_version_mismatch(key_name: &str) -> String {
    format!("Key version should match with the existing entity for {key_name}")
}

// Schema updates.
pub fn kind_mismatch(expected: &str, actual: &str) -> String {
    format!("Metadata kind should be {expected:?}; not {actual:?}")
}

pub fn duplicate_field_name(kind: &str, name: &str) -> String {
    format!("Kind {kind} declares field {name} more than once")
}

pub fn managed_fields(kind: &str, names: &str) -> String {
    format!("Addition and deletion of fields not allowed for managed model {kind} -- {names}")
}

pub fn unique_validation(field: &str) -> String {
    format!("Unique field {field} must be required and query indexed.")
}

pub fn fk_invalid_index_setting(kind: &str, field: &str) -> String {
    format!("In {kind} the field \"{field}\" is a foreign key, and must be indexed.")
}

pub fn default_value_choices(default: &str, choices: &[String]) -> String {
    format!("Default value {default:?} not in choices {choices:?}")
}

pub fn default_value_range(default: &str, range: &[f64]) -> String {
    format!("Default value {default:?} does not fall into range {range:?}")
}

pub fn default_value_regex(default: &str, pattern: &str) -> String {
    format!("Default value {default:?} does not match regex {pattern:?}")
}

pub fn invalid_regex(pattern: &str, error: &str) -> String {
    format!("Regex value {pattern:?} is invalid ({error})")
}

pub fn undefined_foreign_kind(field: &str) -> String {
    format!("The alt_key.foreign_kind field must be defined for field {field}.")
}

pub fn undefined_foreign_field(field: &str) -> String {
    format!("The alt_key.foreign_field must be defined for {field}.")
}

pub fn undefined_key_field(field: &str) -> String {
    format!("The alt_key.key_field must be defined for {field}.")
}

pub fn nonexistent_foreign_field(field: &str, foreign_field: &str, kind: &str) -> String {
    format!(
        "The field {field} has non existent alternate key foreign field \
         {foreign_field} in kind {kind}."
    )
}

pub fn foreign_field_required(foreign_field: &str, kind: &str, field: &str) -> String {
    format!("The foreign field {foreign_field} of kind {kind} must be required for field {field}.")
}

pub fn foreign_field_unique(foreign_field: &str, kind: &str, field: &str) -> String {
    format!("The foreign field {foreign_field} of kind {kind} must be unique for field {field}.")
}

pub fn override_field_warning(kind: &str, names: &str) -> String {
    format!("Warning: Update of {kind} violates the model fields: {names}")
}

pub fn override_property_warning(kind: &str, names: &str) -> String {
    format!("Warning: Update of {kind} violates the model properties: {names}")
}

pub fn metadata_nonexist(kind: &str) -> String {
    format!("No metadata exist for kind {kind}.")
}

// Conditionals.
pub fn undefined_conditional_rules(field: &str) -> String {
    format!("No rules defined for conditional on field {field}")
}

pub fn undefined_conditional_overrides(field: &str) -> String {
    format!("No overrides defined for conditional on field {field}")
}

pub fn undefined_conditional_rule_reference(field: &str) -> String {
    format!("The field {field} is not defined in the metadata for use in conditional rules.")
}

pub fn unsupported_conditional_type(datatype: &str, field: &str, supported: &str) -> String {
    format!(
        "Datatype {datatype} is not supported by conditionals on field {field}. \
         Supported property types are: {supported}"
    )
}

pub fn invalid_conditional_operation(op: &str, supported: &str) -> String {
    format!("The conditional operation {op} is unsupported. Supported operations are: {supported}")
}

pub fn invalid_conditional_type(value: &str) -> String {
    format!("Conditional rule value is not valid type: {value}")
}

pub fn malformed_conditional_rule(rule: &str, kind: &str) -> String {
    format!(
        "Malformed conditional rule \"{rule}\" in metadata {kind}. \
         Must be of the form \"<field_name> <op> <value>\"."
    )
}

pub fn malformed_conditional_override(setting: &str, kind: &str) -> String {
    format!(
        "Malformed conditional override \"{setting}\" in metadata {kind}. \
         Must be of the form \"<metadata_property> = <setting_value>\"."
    )
}

pub fn invalid_conditional_override(prop: &str, supported: &str) -> String {
    format!(
        "The conditional override \"{prop}\" is unsupported. Supported overrides are: {supported}"
    )
}

pub fn invalid_boolean_property_setting(prop: &str) -> String {
    format!("Invalid boolean setting for \"{prop}\" override. Must be True or False.")
}

pub fn invalid_convert_case_setting(setting: &str) -> String {
    format!("The convert_case setting \"{setting}\" is invalid. Must be LOWER, UPPER, or TITLE.")
}
