//! Component Schemas
//!
//! Components are described at runtime: a stable name plus an ordered list
//! of numeric fields. The descriptor drives column layout in
//! [`storage`](super::storage) — only numeric scalars are allowed, which is
//! what keeps every column a flat typed array.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::errors::{CathodeError, Result};

/// Scalar type of one component field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

/// One named field in a component schema.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    pub name: Arc<str>,
    pub scalar: ScalarType,
    /// Value a freshly added row starts with.
    pub default: f64,
}

/// A registered component type: stable name + ordered numeric fields.
#[derive(Debug)]
pub struct ComponentDesc {
    pub name: Arc<str>,
    pub fields: Vec<FieldDesc>,
    index_by_name: FxHashMap<Arc<str>, usize>,
}

impl ComponentDesc {
    /// Starts a descriptor builder.
    #[must_use]
    pub fn builder(name: &str) -> ComponentDescBuilder {
        ComponentDescBuilder {
            name: Arc::from(name),
            fields: Vec::new(),
        }
    }

    /// Position of `field` in the schema, if present.
    #[inline]
    #[must_use]
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.index_by_name.get(field).copied()
    }

    pub(crate) fn require_field(&self, field: &str) -> Result<usize> {
        self.field_index(field).ok_or_else(|| CathodeError::UnknownField {
            component: self.name.to_string(),
            field: field.to_string(),
        })
    }
}

/// Builder for [`ComponentDesc`].
pub struct ComponentDescBuilder {
    name: Arc<str>,
    fields: Vec<FieldDesc>,
}

impl ComponentDescBuilder {
    /// Appends a field with an explicit default.
    #[must_use]
    pub fn field(mut self, name: &str, scalar: ScalarType, default: f64) -> Self {
        self.fields.push(FieldDesc {
            name: Arc::from(name),
            scalar,
            default,
        });
        self
    }

    /// Finishes the descriptor. Fails on empty schemas or duplicate fields.
    pub fn build(self) -> Result<ComponentDesc> {
        if self.fields.is_empty() {
            return Err(CathodeError::InvalidComponent {
                component: self.name.to_string(),
                reason: "component has no fields".into(),
            });
        }
        let mut index_by_name = FxHashMap::default();
        for (i, f) in self.fields.iter().enumerate() {
            if index_by_name.insert(Arc::clone(&f.name), i).is_some() {
                return Err(CathodeError::InvalidComponent {
                    component: self.name.to_string(),
                    reason: format!("duplicate field '{}'", f.name),
                });
            }
        }
        Ok(ComponentDesc {
            name: self.name,
            fields: self.fields,
            index_by_name,
        })
    }
}

/// World-owned registry of component descriptors.
///
/// Registration is write-once per name; registering the same name again
/// replaces the descriptor and logs a warning, so a hot-reloaded schema
/// wins but the collision is visible.
#[derive(Default)]
pub struct ComponentRegistry {
    descs: FxHashMap<Arc<str>, Arc<ComponentDesc>>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, replacing (with a warning) any previous one.
    pub fn register(&mut self, desc: ComponentDesc) -> Arc<ComponentDesc> {
        let name = Arc::clone(&desc.name);
        let desc = Arc::new(desc);
        if self.descs.insert(name, Arc::clone(&desc)).is_some() {
            log::warn!("component '{}' re-registered; replacing schema", desc.name);
        }
        desc
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ComponentDesc>> {
        self.descs.get(name).cloned()
    }

    pub(crate) fn require(&self, name: &str) -> Result<Arc<ComponentDesc>> {
        self.get(name).ok_or_else(|| CathodeError::InvalidComponent {
            component: name.to_string(),
            reason: "not registered".into(),
        })
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.descs.contains_key(name)
    }
}

/// Field values for one component instance, used when spawning or adding.
///
/// Unset fields fall back to the schema defaults when the row is written.
#[derive(Debug, Clone)]
pub struct ComponentData {
    pub name: String,
    pub values: Vec<(String, f64)>,
}

impl ComponentData {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: Vec::new(),
        }
    }

    /// Sets one field value by name.
    #[must_use]
    pub fn with(mut self, field: &str, value: f64) -> Self {
        self.values.push((field.to_string(), value));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_duplicate_fields() {
        let err = ComponentDesc::builder("Broken")
            .field("x", ScalarType::F32, 0.0)
            .field("x", ScalarType::F32, 0.0)
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn field_index_follows_declaration_order() {
        let desc = ComponentDesc::builder("V")
            .field("a", ScalarType::F32, 0.0)
            .field("b", ScalarType::I32, -1.0)
            .build()
            .unwrap();
        assert_eq!(desc.field_index("a"), Some(0));
        assert_eq!(desc.field_index("b"), Some(1));
        assert_eq!(desc.field_index("c"), None);
    }

    #[test]
    fn reregistration_replaces() {
        let mut reg = ComponentRegistry::new();
        reg.register(
            ComponentDesc::builder("T")
                .field("x", ScalarType::F32, 0.0)
                .build()
                .unwrap(),
        );
        reg.register(
            ComponentDesc::builder("T")
                .field("x", ScalarType::F64, 1.0)
                .build()
                .unwrap(),
        );
        let desc = reg.get("T").unwrap();
        assert_eq!(desc.fields[0].scalar, ScalarType::F64);
    }
}
