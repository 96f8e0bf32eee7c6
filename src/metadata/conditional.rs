//! Conditional metadata settings.
//!
//! A field may declare conditionals: a set of rules ("field op value") that,
//! when all true against an entity, override a small set of that field's
//! settings. Rules are authored as plain strings and assembled here into an
//! evaluable form. Assembly of malformed text fails loudly; evaluation of an
//! assembled conditional never fails, it just resolves to no overrides.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use crate::error::{MetakindError, MetakindResult};
use crate::errors::messages;
use crate::metadata::conversions;
use crate::metadata::types::{CaseType, Conditional, FieldMetadata, JsonMap, PropertyType, Schema};

pub const SUPPORTED_OPERATIONS: [&str; 6] = ["==", "!=", ">", ">=", "<", "<="];

/// Field settings a conditional is allowed to override.
pub const ALLOWED_OVERRIDES: [&str; 5] =
    ["convert_case", "regex", "required", "ui_hidden", "ui_readonly"];

const BOOLEAN_SETTINGS: [&str; 3] = ["required", "ui_hidden", "ui_readonly"];

const SUPPORTED_DATATYPES: [PropertyType; 10] = [
    PropertyType::Boolean,
    PropertyType::Currency,
    PropertyType::Date,
    PropertyType::DateTime,
    PropertyType::Decimal,
    PropertyType::Float,
    PropertyType::Integer,
    PropertyType::Ldap,
    PropertyType::String,
    PropertyType::Timestamp,
];

fn supported_type(property_type: PropertyType) -> bool {
    SUPPORTED_DATATYPES.contains(&property_type)
}

fn supported_types_list() -> String {
    let mut names: Vec<&str> = SUPPORTED_DATATYPES.iter().map(|t| t.as_str()).collect();
    names.sort_unstable();
    format!("{names:?}")
}

fn strip_quotes(raw: &str) -> &str {
    raw.trim_matches(|c| c == '"' || c == '\'')
}

/// Coerces a rule's literal to the datatype of the field it references.
///
/// Boolean literals that are not TRUE/FALSE coerce to `null`, which makes the
/// rule unsatisfiable rather than erroring; other failed coercions error.
fn coerce_rule_value(raw: &str, field: &FieldMetadata) -> Result<Value, String> {
    match field.property_type {
        PropertyType::Ldap => Ok(Value::String(strip_quotes(raw).to_string())),
        PropertyType::String | PropertyType::Currency => Ok(Value::String(raw.to_string())),
        PropertyType::Boolean => Ok(match raw.to_ascii_uppercase().as_str() {
            "TRUE" => Value::Bool(true),
            "FALSE" => Value::Bool(false),
            _ => Value::Null,
        }),
        PropertyType::Integer => raw
            .parse::<i64>()
            .map(|v| Value::Number(v.into()))
            .map_err(|_| format!("Cannot convert {raw:?} to int")),
        PropertyType::Float | PropertyType::Decimal | PropertyType::Timestamp => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("Cannot convert {raw:?} to float")),
        PropertyType::Date => {
            conversions::to_date(&Value::String(strip_quotes(raw).to_string()))
                .map(Value::String)
                .map_err(|e| e.to_string())
        }
        PropertyType::DateTime => {
            conversions::to_datetime(&Value::String(strip_quotes(raw).to_string()))
                .map(Value::String)
                .map_err(|e| e.to_string())
        }
        other => Err(format!(
            "Metadata conditional rules do not operate on type: {other}"
        )),
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// One parsed rule of the form `<field> <op> <value>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledRule {
    pub field: String,
    pub op: String,
    pub value: String,
}

impl AssembledRule {
    /// Parses the three whitespace-separated tokens. Extra tokens are
    /// ignored; fewer is malformed.
    pub fn parse(rule: &str, kind: &str) -> MetakindResult<Self> {
        let mut tokens = rule.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(field), Some(op), Some(value)) => Ok(Self {
                field: field.to_string(),
                op: op.to_string(),
                value: value.to_string(),
            }),
            _ => {
                let msg = messages::malformed_conditional_rule(rule, kind);
                log::error!("{msg}");
                Err(MetakindError::Structural(msg))
            }
        }
    }

    /// True when the entity satisfies this rule. A missing or null entity
    /// value resolves to false, as does any comparison that cannot be made.
    pub fn evaluate(&self, entity: &JsonMap, schema: &Schema) -> bool {
        let field_value = match entity.get(&self.field) {
            Some(v) if !v.is_null() => v,
            _ => return false,
        };
        let field = match schema.field(&self.field) {
            Some(f) => f,
            None => return false,
        };
        let rule_value = match coerce_rule_value(&self.value, field) {
            Ok(v) => v,
            Err(_) => return false,
        };
        if rule_value.is_null() {
            return false;
        }
        match self.op.as_str() {
            "==" => compare_values(field_value, &rule_value) == Some(Ordering::Equal),
            "!=" => match compare_values(field_value, &rule_value) {
                Some(ordering) => ordering != Ordering::Equal,
                None => true,
            },
            ">" => compare_values(field_value, &rule_value) == Some(Ordering::Greater),
            ">=" => matches!(
                compare_values(field_value, &rule_value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            "<" => compare_values(field_value, &rule_value) == Some(Ordering::Less),
            "<=" => matches!(
                compare_values(field_value, &rule_value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            _ => false,
        }
    }

    /// Checks the rule against the schema: the referenced field must exist,
    /// be of a supported type, use a supported operation, and carry a
    /// coercible literal.
    pub fn validate(&self, schema: &Schema) -> Result<(), String> {
        let field = schema
            .field(&self.field)
            .ok_or_else(|| messages::undefined_conditional_rule_reference(&self.field))?;
        if !supported_type(field.property_type) {
            return Err(messages::unsupported_conditional_type(
                field.property_type.as_str(),
                &self.field,
                &supported_types_list(),
            ));
        }
        if !SUPPORTED_OPERATIONS.contains(&self.op.as_str()) {
            let mut supported = SUPPORTED_OPERATIONS;
            supported.sort_unstable();
            return Err(messages::invalid_conditional_operation(
                &self.op,
                &supported.join(", "),
            ));
        }
        coerce_rule_value(&self.value, field).map_err(|e| messages::invalid_conditional_type(&e))?;
        Ok(())
    }
}

/// A conditional assembled for runtime evaluation: parsed rules plus the
/// override map they gate.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledConditional {
    pub rules: Vec<AssembledRule>,
    pub overrides: JsonMap,
}

impl AssembledConditional {
    pub fn assemble(conditional: &Conditional, schema: &Schema) -> MetakindResult<Self> {
        let mut rules = Vec::with_capacity(conditional.rules.len());
        for raw in &conditional.rules {
            rules.push(AssembledRule::parse(raw, &schema.kind)?);
        }

        let mut overrides = JsonMap::new();
        for raw in &conditional.overrides {
            let mut tokens = raw.split_whitespace();
            // The middle token is always "=".
            let (prop, _, setting) = match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(p), Some(op), Some(s)) => (p, op, s),
                _ => {
                    let msg = messages::malformed_conditional_override(raw, &schema.kind);
                    log::error!("{msg}");
                    return Err(MetakindError::Structural(msg));
                }
            };
            let value = if BOOLEAN_SETTINGS.contains(&prop) {
                match setting.to_ascii_uppercase().as_str() {
                    "TRUE" => Value::Bool(true),
                    "FALSE" => Value::Bool(false),
                    _ => Value::Null,
                }
            } else if prop == "convert_case" {
                match CaseType::parse(setting) {
                    Some(case) => Value::String(case.as_str().to_string()),
                    None => Value::String(setting.to_string()),
                }
            } else {
                Value::String(setting.to_string())
            };
            overrides.insert(prop.to_string(), value);
        }
        Ok(Self { rules, overrides })
    }

    /// Overrides to apply for `entity`, empty when any rule fails.
    pub fn evaluate(&self, entity: &JsonMap, schema: &Schema) -> JsonMap {
        if self.rules.iter().all(|rule| rule.evaluate(entity, schema)) {
            self.overrides.clone()
        } else {
            JsonMap::new()
        }
    }

    pub fn validate(&self, schema: &Schema) -> Result<(), String> {
        for rule in &self.rules {
            rule.validate(schema)?;
        }
        for (prop, setting) in &self.overrides {
            if !ALLOWED_OVERRIDES.contains(&prop.as_str()) {
                return Err(messages::invalid_conditional_override(
                    prop,
                    &format!("{ALLOWED_OVERRIDES:?}"),
                ));
            }
            if BOOLEAN_SETTINGS.contains(&prop.as_str()) && !setting.is_boolean() {
                return Err(messages::invalid_boolean_property_setting(prop));
            }
            if prop == "convert_case" {
                let valid = setting
                    .as_str()
                    .map(|s| matches!(s, "LOWER" | "UPPER" | "TITLE"))
                    .unwrap_or(false);
                if !valid {
                    return Err(messages::invalid_convert_case_setting(
                        &conversions::maybe_to_string(setting),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Assembles every conditional the schema declares, keyed by field name.
pub fn assembled_conditionals(
    schema: &Schema,
) -> MetakindResult<HashMap<String, Vec<AssembledConditional>>> {
    let mut map = HashMap::new();
    for field in &schema.fields {
        if field.conditionals.is_empty() {
            continue;
        }
        let mut assembled = Vec::with_capacity(field.conditionals.len());
        for conditional in &field.conditionals {
            assembled.push(AssembledConditional::assemble(conditional, schema)?);
        }
        map.insert(field.name.clone(), assembled);
    }
    Ok(map)
}

/// Evaluates assembled conditionals against an entity snapshot.
///
/// When several conditionals on one field set the same property, the one
/// declared last wins.
pub fn resolve_conditionals(
    entity: &JsonMap,
    schema: &Schema,
    conditionals: &HashMap<String, Vec<AssembledConditional>>,
) -> HashMap<String, JsonMap> {
    let mut resolved = HashMap::new();
    for (field_name, assembled) in conditionals {
        let mut merged = JsonMap::new();
        for conditional in assembled {
            for (prop, setting) in conditional.evaluate(entity, schema) {
                merged.insert(prop, setting);
            }
        }
        if !merged.is_empty() {
            resolved.insert(field_name.clone(), merged);
        }
    }
    resolved
}

/// Assembles and evaluates in one step. A conditional that fails assembly is
/// logged and skipped; schema updates are expected to reject such text before
/// it is ever stored.
pub fn resolve_overrides(schema: &Schema, entity: &JsonMap) -> HashMap<String, JsonMap> {
    let mut map = HashMap::new();
    for field in &schema.fields {
        if field.conditionals.is_empty() {
            continue;
        }
        let mut assembled = Vec::new();
        for conditional in &field.conditionals {
            match AssembledConditional::assemble(conditional, schema) {
                Ok(a) => assembled.push(a),
                Err(error) => {
                    log::error!(
                        "skipping conditional on {}.{}: {}",
                        schema.kind,
                        field.name,
                        error
                    );
                }
            }
        }
        if !assembled.is_empty() {
            map.insert(field.name.clone(), assembled);
        }
    }
    resolve_conditionals(entity, schema, &map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn widget_schema() -> Schema {
        let mut schema = Schema::new("Widget");
        schema.fields = vec![
            FieldMetadata::new("status", PropertyType::String),
            FieldMetadata::new("qty", PropertyType::Integer),
            FieldMetadata::new("active", PropertyType::Boolean),
            FieldMetadata::new("notes", PropertyType::Text),
        ];
        schema
    }

    #[test]
    fn rule_parse_takes_three_tokens() {
        let rule = AssembledRule::parse("qty >= 5", "Widget").unwrap();
        assert_eq!(rule.field, "qty");
        assert_eq!(rule.op, ">=");
        assert_eq!(rule.value, "5");
        assert!(AssembledRule::parse("qty >=", "Widget").is_err());
    }

    #[test]
    fn missing_field_value_is_false() {
        let schema = widget_schema();
        let rule = AssembledRule::parse("qty == 5", "Widget").unwrap();
        assert!(!rule.evaluate(&object(json!({})), &schema));
        assert!(!rule.evaluate(&object(json!({"qty": null})), &schema));
        assert!(rule.evaluate(&object(json!({"qty": 5})), &schema));
    }

    #[test]
    fn numeric_and_string_comparisons() {
        let schema = widget_schema();
        let gt = AssembledRule::parse("qty > 10", "Widget").unwrap();
        assert!(gt.evaluate(&object(json!({"qty": 11})), &schema));
        assert!(!gt.evaluate(&object(json!({"qty": 10})), &schema));

        let eq = AssembledRule::parse("status == OPEN", "Widget").unwrap();
        assert!(eq.evaluate(&object(json!({"status": "OPEN"})), &schema));
        assert!(!eq.evaluate(&object(json!({"status": "closed"})), &schema));
    }

    #[test]
    fn boolean_rules_use_true_false_literals() {
        let schema = widget_schema();
        let rule = AssembledRule::parse("active == TRUE", "Widget").unwrap();
        assert!(rule.evaluate(&object(json!({"active": true})), &schema));
        assert!(!rule.evaluate(&object(json!({"active": false})), &schema));
        // A non-literal coerces to null, which can never be satisfied.
        let bad = AssembledRule::parse("active == maybe", "Widget").unwrap();
        assert!(!bad.evaluate(&object(json!({"active": true})), &schema));
    }

    #[test]
    fn validate_rejects_bad_rules() {
        let schema = widget_schema();
        let unknown = AssembledRule::parse("ghost == 1", "Widget").unwrap();
        assert!(unknown.validate(&schema).is_err());

        let unsupported = AssembledRule::parse("notes == hi", "Widget").unwrap();
        assert!(unsupported.validate(&schema).is_err());

        let bad_op = AssembledRule::parse("qty ~= 1", "Widget").unwrap();
        assert!(bad_op.validate(&schema).is_err());

        let bad_literal = AssembledRule::parse("qty == many", "Widget").unwrap();
        assert!(bad_literal.validate(&schema).is_err());
    }

    #[test]
    fn overrides_parse_and_validate() {
        let schema = widget_schema();
        let conditional = Conditional {
            rules: vec!["status == OPEN".into()],
            overrides: vec!["required = TRUE".into(), "convert_case = upper".into()],
        };
        let assembled = AssembledConditional::assemble(&conditional, &schema).unwrap();
        assert!(assembled.validate(&schema).is_ok());
        assert_eq!(assembled.overrides["required"], json!(true));
        assert_eq!(assembled.overrides["convert_case"], json!("UPPER"));

        let overrides = assembled.evaluate(&object(json!({"status": "OPEN"})), &schema);
        assert_eq!(overrides.len(), 2);
        assert!(assembled
            .evaluate(&object(json!({"status": "CLOSED"})), &schema)
            .is_empty());
    }

    #[test]
    fn validate_rejects_bad_overrides() {
        let schema = widget_schema();
        for overrides in [
            vec!["display_order = 5".to_string()],
            vec!["required = SOMETIMES".to_string()],
            vec!["convert_case = CAMEL".to_string()],
        ] {
            let conditional = Conditional {
                rules: vec!["status == OPEN".into()],
                overrides,
            };
            let assembled = AssembledConditional::assemble(&conditional, &schema).unwrap();
            assert!(assembled.validate(&schema).is_err());
        }
    }

    #[test]
    fn all_rules_must_hold() {
        let schema = widget_schema();
        let conditional = Conditional {
            rules: vec!["status == OPEN".into(), "qty > 0".into()],
            overrides: vec!["ui_hidden = TRUE".into()],
        };
        let assembled = AssembledConditional::assemble(&conditional, &schema).unwrap();
        assert!(assembled
            .evaluate(&object(json!({"status": "OPEN", "qty": 0})), &schema)
            .is_empty());
        assert!(!assembled
            .evaluate(&object(json!({"status": "OPEN", "qty": 3})), &schema)
            .is_empty());
    }

    #[test]
    fn conflicting_overrides_last_declaration_wins() {
        let mut schema = widget_schema();
        let field = schema.field_mut("qty").unwrap();
        field.conditionals = vec![
            Conditional {
                rules: vec!["status == OPEN".into()],
                overrides: vec!["required = TRUE".into()],
            },
            Conditional {
                rules: vec!["status == OPEN".into()],
                overrides: vec!["required = FALSE".into()],
            },
        ];
        let resolved = resolve_overrides(&schema, &object(json!({"status": "OPEN"})));
        assert_eq!(resolved["qty"]["required"], json!(false));
    }

    #[test]
    fn malformed_conditional_is_skipped_at_resolution() {
        let mut schema = widget_schema();
        schema.field_mut("qty").unwrap().conditionals = vec![Conditional {
            rules: vec!["broken".into()],
            overrides: vec!["required = TRUE".into()],
        }];
        let resolved = resolve_overrides(&schema, &object(json!({"status": "OPEN"})));
        assert!(resolved.is_empty());
    }
}
