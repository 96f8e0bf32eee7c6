//! Schema data model: property types, field declarations, and per-kind
//! schema documents.
//!
//! A [`Schema`] is plain data. It can be persisted, merged with compiled
//! defaults, and overridden per request, so every mutation helper here works
//! on values rather than behind storage handles.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::metadata::conversions;

pub type JsonMap = Map<String, Value>;

/// Logical datatype of a schema field.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, PartialOrd, Ord,
)]
pub enum PropertyType {
    #[serde(rename = "BOOLEAN")]
    Boolean,
    #[serde(rename = "COMPUTED")]
    Computed,
    #[serde(rename = "CURRENCY")]
    Currency,
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "DATETIME")]
    DateTime,
    #[serde(rename = "DECIMAL")]
    Decimal,
    #[serde(rename = "ENTITY")]
    Entity,
    #[serde(rename = "FLOAT")]
    Float,
    #[default]
    #[serde(rename = "GENERIC")]
    Generic,
    #[serde(rename = "GEOPT")]
    GeoPt,
    #[serde(rename = "INTEGER")]
    Integer,
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "KEY")]
    Key,
    #[serde(rename = "KEY_NAME")]
    KeyName,
    #[serde(rename = "LDAP")]
    Ldap,
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "STRUCT")]
    Struct,
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "TIMESTAMP")]
    Timestamp,
    #[serde(rename = "USER")]
    User,
}

impl PropertyType {
    /// Wire name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Boolean => "BOOLEAN",
            PropertyType::Computed => "COMPUTED",
            PropertyType::Currency => "CURRENCY",
            PropertyType::Date => "DATE",
            PropertyType::DateTime => "DATETIME",
            PropertyType::Decimal => "DECIMAL",
            PropertyType::Entity => "ENTITY",
            PropertyType::Float => "FLOAT",
            PropertyType::Generic => "GENERIC",
            PropertyType::GeoPt => "GEOPT",
            PropertyType::Integer => "INTEGER",
            PropertyType::Json => "JSON",
            PropertyType::Key => "KEY",
            PropertyType::KeyName => "KEY_NAME",
            PropertyType::Ldap => "LDAP",
            PropertyType::String => "STRING",
            PropertyType::Struct => "STRUCT",
            PropertyType::Text => "TEXT",
            PropertyType::Timestamp => "TIMESTAMP",
            PropertyType::User => "USER",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(Value::String(name.to_string())).ok()
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PropertyType::Integer
                | PropertyType::Float
                | PropertyType::Decimal
                | PropertyType::Timestamp
        )
    }

    pub fn is_stringlike(&self) -> bool {
        matches!(
            self,
            PropertyType::String
                | PropertyType::Text
                | PropertyType::Currency
                | PropertyType::Ldap
                | PropertyType::KeyName
                | PropertyType::User
        )
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String case normalization applied during cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseType {
    #[serde(rename = "LOWER")]
    Lower,
    #[serde(rename = "UPPER")]
    Upper,
    #[serde(rename = "TITLE")]
    Title,
}

impl CaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::Lower => "LOWER",
            CaseType::Upper => "UPPER",
            CaseType::Title => "TITLE",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "LOWER" => Some(CaseType::Lower),
            "UPPER" => Some(CaseType::Upper),
            "TITLE" => Some(CaseType::Title),
            _ => None,
        }
    }

    pub fn apply(&self, input: &str) -> String {
        match self {
            CaseType::Lower => input.to_lowercase(),
            CaseType::Upper => input.to_uppercase(),
            CaseType::Title => title_case(input),
        }
    }
}

fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_word_start = true;
    for ch in input.chars() {
        if ch.is_whitespace() {
            at_word_start = true;
            out.push(ch);
        } else if at_word_start {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

/// A conditional declaration: when every rule holds, the overrides apply.
///
/// Rules and overrides are stored as the raw three-token strings they are
/// authored in; [`crate::metadata::conditional`] parses them on demand.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Conditional {
    pub rules: Vec<String>,
    pub overrides: Vec<String>,
}

/// Declares that a field's value can be resolved through another kind.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlternateKey {
    pub foreign_kind: String,
    pub foreign_field: String,
    pub key_field: String,
    pub null_allowed: bool,
}

/// Declares that entities of a kind are scoped under a parent kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub kind: String,
    /// Defaults to `{kind}__key_name` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_field: Option<String>,
}

pub const DISPLAY_ORDER_DEFAULT: u32 = 1000;
pub const SORT_ORDER_DEFAULT: u32 = 100;

/// Declaration of a single schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMetadata {
    pub name: String,
    pub property_type: PropertyType,
    /// Sub-fields, only meaningful for `STRUCT` fields.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldMetadata>,
    pub repeated: bool,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub convert_case: Option<CaseType>,
    pub strip_whitespace: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    /// Two-element inclusive `[min, max]` bound for numeric types.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub range: Vec<f64>,
    pub unique: bool,
    pub index_for_query: bool,
    pub index_for_search: bool,
    pub display_order: u32,
    pub sort_order: u32,
    pub auto_add: bool,
    pub auto_update: bool,
    pub ui_hidden: bool,
    pub ui_readonly: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditionals: Vec<Conditional>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_key: Option<AlternateKey>,
}

impl Default for FieldMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            property_type: PropertyType::Generic,
            fields: Vec::new(),
            repeated: false,
            required: false,
            default_value: None,
            choices: Vec::new(),
            verbose_name: None,
            description: None,
            convert_case: None,
            strip_whitespace: false,
            regex: None,
            range: Vec::new(),
            unique: false,
            index_for_query: false,
            index_for_search: true,
            display_order: DISPLAY_ORDER_DEFAULT,
            sort_order: SORT_ORDER_DEFAULT,
            auto_add: false,
            auto_update: false,
            ui_hidden: false,
            ui_readonly: false,
            conditionals: Vec::new(),
            alt_key: None,
        }
    }
}

impl FieldMetadata {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            ..Self::default()
        }
    }

    /// Placeholder declaration used when options arrive for a field no
    /// registered model declares.
    pub fn generic(name: impl Into<String>) -> Self {
        Self::new(name, PropertyType::Generic)
    }

    /// Merges a map of option values into this declaration. `null` resets an
    /// option to its default. Unknown keys are logged and skipped.
    pub fn apply_options(&mut self, options: &JsonMap) {
        let defaults = FieldMetadata::default();
        for (key, value) in options {
            match key.as_str() {
                "name" => {
                    if let Some(name) = value.as_str() {
                        self.name = name.to_string();
                    }
                }
                "property_type" => {
                    self.property_type = match value {
                        Value::Null => defaults.property_type,
                        other => match serde_json::from_value(other.clone()) {
                            Ok(pt) => pt,
                            Err(_) => {
                                log::warn!(
                                    "unknown property_type {:?} for field {}",
                                    other,
                                    self.name
                                );
                                continue;
                            }
                        },
                    };
                }
                "repeated" => self.repeated = value.as_bool().unwrap_or(defaults.repeated),
                "required" => self.required = value.as_bool().unwrap_or(defaults.required),
                "unique" => self.unique = value.as_bool().unwrap_or(defaults.unique),
                "index_for_query" => {
                    self.index_for_query = value.as_bool().unwrap_or(defaults.index_for_query)
                }
                "index_for_search" => {
                    self.index_for_search = value.as_bool().unwrap_or(defaults.index_for_search)
                }
                "strip_whitespace" => {
                    self.strip_whitespace = value.as_bool().unwrap_or(defaults.strip_whitespace)
                }
                "auto_add" => self.auto_add = value.as_bool().unwrap_or(defaults.auto_add),
                "auto_update" => self.auto_update = value.as_bool().unwrap_or(defaults.auto_update),
                "ui_hidden" => self.ui_hidden = value.as_bool().unwrap_or(defaults.ui_hidden),
                "ui_readonly" => self.ui_readonly = value.as_bool().unwrap_or(defaults.ui_readonly),
                "default_value" => {
                    self.default_value = match value {
                        Value::Null => None,
                        other => Some(conversions::maybe_to_string(other)),
                    };
                }
                "choices" => {
                    self.choices = value
                        .as_array()
                        .map(|items| {
                            items
                                .iter()
                                .filter(|v| !v.is_null())
                                .map(conversions::maybe_to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                }
                "verbose_name" => self.verbose_name = value.as_str().map(str::to_string),
                "description" => self.description = value.as_str().map(str::to_string),
                "regex" => self.regex = value.as_str().map(str::to_string),
                "convert_case" => {
                    self.convert_case = match value {
                        Value::Null => None,
                        other => serde_json::from_value(other.clone()).ok(),
                    };
                }
                "display_order" => {
                    self.display_order = value
                        .as_u64()
                        .map(|v| v as u32)
                        .unwrap_or(defaults.display_order)
                }
                "sort_order" => {
                    self.sort_order = value
                        .as_u64()
                        .map(|v| v as u32)
                        .unwrap_or(defaults.sort_order)
                }
                "range" => {
                    self.range = value
                        .as_array()
                        .map(|items| items.iter().filter_map(Value::as_f64).collect())
                        .unwrap_or_default();
                }
                "conditionals" => {
                    self.conditionals = match value {
                        Value::Null => Vec::new(),
                        other => serde_json::from_value(other.clone()).unwrap_or_default(),
                    };
                }
                "alt_key" => {
                    self.alt_key = match value {
                        Value::Null => None,
                        other => serde_json::from_value(other.clone()).ok(),
                    };
                }
                "fields" => {
                    if let Value::Object(nested) = value {
                        merge_field_options(&mut self.fields, nested);
                    }
                }
                other => {
                    log::warn!("metadata option {:?} does not exist on field {}", other, self.name);
                }
            }
        }
    }
}

/// Sorts declarations into canonical order: display_order, then name.
pub fn sort_fields(fields: &mut [FieldMetadata]) {
    fields.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Merges per-field option maps into an existing declaration list.
///
/// `null` removes the field; options for an unknown name append a generic
/// declaration first. The list is re-sorted afterwards.
pub fn merge_field_options(fields: &mut Vec<FieldMetadata>, options: &JsonMap) {
    for (field_name, field_opts) in options {
        match field_opts {
            Value::Null => fields.retain(|f| f.name != *field_name),
            Value::Object(opts) => {
                let existing = fields.iter_mut().find(|f| f.name == *field_name);
                match existing {
                    Some(field) => field.apply_options(opts),
                    None => {
                        let mut field = FieldMetadata::generic(field_name);
                        field.apply_options(opts);
                        fields.push(field);
                    }
                }
            }
            other => {
                log::warn!("field options for {:?} must be an object, got {}", field_name, other);
            }
        }
    }
    sort_fields(fields);
}

pub const ACCESS_TYPE_DEFAULT: &str = "TABLE_WRITE_ONLY";

/// Per-kind schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schema {
    pub kind: String,
    pub fields: Vec<FieldMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// True when a compiled model backs this kind; managed kinds reject
    /// addition or removal of model-declared fields.
    pub is_managed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    pub access_type: String,
    pub ui_readonly: bool,
    pub allow_import: bool,
    pub force_delete: bool,
    /// Bumped on every persisted update; cache keys include it.
    pub revision: u64,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            kind: String::new(),
            fields: Vec::new(),
            description: None,
            is_managed: true,
            parent: None,
            access_type: ACCESS_TYPE_DEFAULT.to_string(),
            ui_readonly: false,
            allow_import: true,
            force_delete: false,
            revision: 0,
        }
    }
}

impl Schema {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldMetadata> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    /// Field names in canonical order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn sort_fields(&mut self) {
        sort_fields(&mut self.fields);
    }

    /// Returns the first duplicated field name, if any.
    pub fn duplicate_field_name(&self) -> Option<&str> {
        let mut seen = std::collections::HashSet::new();
        self.fields
            .iter()
            .find(|f| !seen.insert(f.name.as_str()))
            .map(|f| f.name.as_str())
    }

    /// Merges a map of schema-level option values. Field entries under
    /// `"fields"` merge recursively; other recognized keys assign directly.
    pub fn apply_options(&mut self, options: &JsonMap) {
        let defaults = Schema::default();
        for (key, value) in options {
            match key.as_str() {
                "kind" => {
                    if let Some(kind) = value.as_str() {
                        self.kind = kind.to_string();
                    }
                }
                "description" => self.description = value.as_str().map(str::to_string),
                "is_managed" => self.is_managed = value.as_bool().unwrap_or(defaults.is_managed),
                "ui_readonly" => {
                    self.ui_readonly = value.as_bool().unwrap_or(defaults.ui_readonly)
                }
                "allow_import" => {
                    self.allow_import = value.as_bool().unwrap_or(defaults.allow_import)
                }
                "force_delete" => {
                    self.force_delete = value.as_bool().unwrap_or(defaults.force_delete)
                }
                "access_type" => {
                    self.access_type = value
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| defaults.access_type.clone());
                }
                "parent" => {
                    self.parent = match value {
                        Value::Null => None,
                        other => serde_json::from_value(other.clone()).ok(),
                    };
                }
                "fields" => {
                    if let Value::Object(nested) = value {
                        merge_field_options(&mut self.fields, nested);
                    }
                }
                other => {
                    log::warn!("metadata option {:?} does not exist on kind {}", other, self.kind);
                }
            }
        }
    }

    /// Resolved parent key field name, `{parent.kind}__key_name` by default.
    pub fn parent_key_field(&self) -> Option<String> {
        self.parent.as_ref().map(|p| {
            p.key_field
                .clone()
                .unwrap_or_else(|| format!("{}__key_name", p.kind))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn property_type_round_trips_wire_names() {
        for pt in [
            PropertyType::DateTime,
            PropertyType::KeyName,
            PropertyType::GeoPt,
            PropertyType::String,
        ] {
            assert_eq!(PropertyType::parse(pt.as_str()), Some(pt));
        }
        assert_eq!(PropertyType::parse("NO_SUCH_TYPE"), None);
    }

    #[test]
    fn title_case_capitalizes_each_word() {
        assert_eq!(CaseType::Title.apply("bolt CARRIER group"), "Bolt Carrier Group");
    }

    #[test]
    fn sort_orders_by_display_order_then_name() {
        let mut fields = vec![
            FieldMetadata::new("zeta", PropertyType::String),
            {
                let mut f = FieldMetadata::new("omega", PropertyType::String);
                f.display_order = 10;
                f
            },
            FieldMetadata::new("alpha", PropertyType::String),
        ];
        sort_fields(&mut fields);
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["omega", "alpha", "zeta"]);
    }

    #[test]
    fn apply_options_merges_and_resets() {
        let mut field = FieldMetadata::new("qty", PropertyType::Integer);
        field.apply_options(&options(json!({
            "required": true,
            "range": [0, 100],
            "default_value": 5,
        })));
        assert!(field.required);
        assert_eq!(field.range, vec![0.0, 100.0]);
        assert_eq!(field.default_value.as_deref(), Some("5"));

        field.apply_options(&options(json!({"required": null, "default_value": null})));
        assert!(!field.required);
        assert_eq!(field.default_value, None);
    }

    #[test]
    fn merge_field_options_adds_removes_and_sorts() {
        let mut schema = Schema::new("Widget");
        schema.fields = vec![FieldMetadata::new("name", PropertyType::String)];
        schema.apply_options(&options(json!({
            "fields": {
                "name": null,
                "qty": {"property_type": "INTEGER", "display_order": 1},
                "color": {"property_type": "STRING", "display_order": 2},
            }
        })));
        let names: Vec<_> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["qty", "color"]);
        assert_eq!(schema.fields[0].property_type, PropertyType::Integer);
    }

    #[test]
    fn unknown_option_keys_are_skipped() {
        let mut field = FieldMetadata::new("name", PropertyType::String);
        field.apply_options(&options(json!({"no_such_option": 1, "required": true})));
        assert!(field.required);
    }

    #[test]
    fn duplicate_field_name_detected() {
        let mut schema = Schema::new("Widget");
        schema.fields = vec![
            FieldMetadata::new("name", PropertyType::String),
            FieldMetadata::new("name", PropertyType::Text),
        ];
        assert_eq!(schema.duplicate_field_name(), Some("name"));
    }

    #[test]
    fn parent_key_field_defaults_from_kind() {
        let mut schema = Schema::new("Port");
        schema.parent = Some(ParentRef { kind: "Device".into(), key_field: None });
        assert_eq!(schema.parent_key_field().as_deref(), Some("Device__key_name"));
    }
}
