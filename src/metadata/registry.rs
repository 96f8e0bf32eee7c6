//! Registry of compiled kind definitions.
//!
//! Kinds that ship with the application register their defaults and
//! model-declared fields here at startup. The registry replaces discovery by
//! reflection: registration is explicit, and the inheritance chain is a plain
//! parent link walked root-first when defaults overlay a persisted schema.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::metadata::types::JsonMap;

/// Compiled definition of one kind.
#[derive(Debug, Clone, Default)]
pub struct KindDefinition {
    pub kind: String,
    /// Registered kind this one inherits defaults from.
    pub parent: Option<String>,
    /// Schema-level option defaults, applied during overlay.
    pub defaults: JsonMap,
    /// Options for the fields the model itself declares. These always win
    /// over persisted schema settings.
    pub model_fields: JsonMap,
    /// Virtual base definitions contribute defaults but are not themselves
    /// instantiable kinds.
    pub base: bool,
}

impl KindDefinition {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_defaults(mut self, defaults: JsonMap) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_model_fields(mut self, model_fields: JsonMap) -> Self {
        self.model_fields = model_fields;
        self
    }

    pub fn base(mut self) -> Self {
        self.base = true;
        self
    }
}

/// Thread-safe map of registered kind definitions.
#[derive(Debug, Default)]
pub struct KindRegistry {
    kinds: RwLock<HashMap<String, KindDefinition>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: KindDefinition) {
        let mut kinds = self.kinds.write().unwrap_or_else(|e| e.into_inner());
        kinds.insert(definition.kind.clone(), definition);
    }

    pub fn contains(&self, kind: &str) -> bool {
        let kinds = self.kinds.read().unwrap_or_else(|e| e.into_inner());
        kinds.contains_key(kind)
    }

    pub fn definition(&self, kind: &str) -> Option<KindDefinition> {
        let kinds = self.kinds.read().unwrap_or_else(|e| e.into_inner());
        kinds.get(kind).cloned()
    }

    /// True when a compiled model backs `kind`; such kinds lock their
    /// model-declared field set.
    pub fn is_managed(&self, kind: &str) -> bool {
        self.definition(kind).map(|d| !d.base).unwrap_or(false)
    }

    /// Field names the compiled model declares for `kind`.
    pub fn model_field_names(&self, kind: &str) -> Vec<String> {
        self.definition(kind)
            .map(|d| d.model_fields.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Inheritance chain for `kind`, root ancestor first, `kind` itself last.
    /// A dangling or cyclic parent link stops the walk.
    pub fn ancestry(&self, kind: &str) -> Vec<KindDefinition> {
        let kinds = self.kinds.read().unwrap_or_else(|e| e.into_inner());
        let mut chain = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut current = kinds.get(kind);
        while let Some(def) = current {
            if !seen.insert(def.kind.clone()) {
                log::error!("kind {} has a cyclic parent chain", kind);
                break;
            }
            chain.push(def.clone());
            current = def.parent.as_deref().and_then(|p| kinds.get(p));
        }
        chain.reverse();
        chain
    }

    /// Instantiable registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let kinds = self.kinds.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = kinds
            .values()
            .filter(|d| !d.base)
            .map(|d| d.kind.clone())
            .collect();
        names.sort();
        names
    }
}
