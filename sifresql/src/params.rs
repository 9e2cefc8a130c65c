//! Parameter mapping synchronizer.
//!
//! Keeps the ordered parameter mappings of a statement aligned with its
//! placeholders while the rewrite engine adds, replaces and removes them.
//! Values introduced by the engine live in the additional-parameter store
//! under freshly generated names and never touch the caller's object.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::property;
use crate::statement::{BoundStatement, ParameterMapping, ParameterMode};

/// Locates an existing mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor<'a> {
    /// First mapping bound to this property name.
    Property(&'a str),
    /// Mapping that bound the `n`-th placeholder of the original statement.
    ///
    /// Stays valid after other mappings are inserted or removed, and tells
    /// apart placeholders that share a property name.
    Origin(usize),
}

impl<'a> From<&'a str> for Anchor<'a> {
    fn from(property: &'a str) -> Self {
        Self::Property(property)
    }
}

/// Returns a new parameter name that cannot collide with caller properties.
#[must_use]
pub fn fresh_property_name() -> String {
    format!("__sifresql_{}", Uuid::new_v4().simple())
}

/// Mutable view over the parameters of one statement invocation.
#[derive(Debug, Clone)]
pub struct ParameterSync {
    mappings: Vec<ParameterMapping>,
    origins: Vec<Option<usize>>,
    parameter_object: Value,
    additional: BTreeMap<String, Value>,
}

impl ParameterSync {
    /// Takes a working copy of the statement's parameters.
    #[must_use]
    pub fn new(bound: &BoundStatement) -> Self {
        Self {
            mappings: bound.parameter_mappings.clone(),
            origins: (0..bound.parameter_mappings.len()).map(Some).collect(),
            parameter_object: bound.parameter_object.clone(),
            additional: bound.additional_parameters.clone(),
        }
    }

    /// Current mappings, in placeholder order.
    #[must_use]
    pub fn mappings(&self) -> &[ParameterMapping] {
        &self.mappings
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Current index of the mapping `anchor` designates.
    #[must_use]
    pub fn position(&self, anchor: Anchor<'_>) -> Option<usize> {
        match anchor {
            Anchor::Property(name) => self.mappings.iter().position(|m| m.property == name),
            Anchor::Origin(ordinal) => self.origins.iter().position(|o| *o == Some(ordinal)),
        }
    }

    /// Appends a mapping and stores its value as an additional parameter.
    pub fn add_param(&mut self, property: impl Into<String>, value: Value) {
        let property = property.into();
        self.additional.insert(property.clone(), value);
        self.mappings.push(ParameterMapping::text(property));
        self.origins.push(None);
    }

    /// Inserts a mapping at `position(anchor) + offset + 1`.
    ///
    /// Returns `false` (and changes nothing) if the anchor is not found.
    pub fn add_param_after(
        &mut self,
        property: impl Into<String>,
        value: Value,
        anchor: Anchor<'_>,
        offset: usize,
    ) -> bool {
        let Some(at) = self.position(anchor) else {
            return false;
        };
        let at = (at + offset + 1).min(self.mappings.len());
        let property = property.into();
        self.additional.insert(property.clone(), value);
        self.mappings.insert(at, ParameterMapping::text(property));
        self.origins.insert(at, None);
        true
    }

    /// Rebinds the anchored mapping to a new property holding `value`.
    ///
    /// No-op returning `false` if the anchor is not found or `value` is `None`.
    /// The mapping keeps its origin, so later origin anchors still find it.
    pub fn replace_param(
        &mut self,
        property: impl Into<String>,
        value: Option<Value>,
        anchor: Anchor<'_>,
    ) -> bool {
        let (Some(at), Some(value)) = (self.position(anchor), value) else {
            return false;
        };
        let property = property.into();
        self.additional.insert(property.clone(), value);
        self.mappings[at] = ParameterMapping::text(property);
        true
    }

    /// Removes the anchored mapping.
    pub fn remove_param(&mut self, anchor: Anchor<'_>) -> Option<ParameterMapping> {
        let at = self.position(anchor)?;
        self.origins.remove(at);
        Some(self.mappings.remove(at))
    }

    /// Reads the runtime value bound by `mapping`.
    ///
    /// `OUT` mappings and unresolvable properties read as `Null`. Resolution
    /// order: the additional-parameter store (by the property's root name),
    /// then the parameter object itself when it is a scalar, then the
    /// property path inside the parameter object.
    #[must_use]
    pub fn value_of(&self, mapping: &ParameterMapping) -> Value {
        if mapping.mode == ParameterMode::Out {
            return Value::Null;
        }
        let path = mapping.property.as_str();
        let (root, rest) = property::split_root(path);
        let found = if let Some(value) = self.additional.get(root) {
            property::get(value, rest)
        } else if is_scalar(&self.parameter_object) {
            Some(&self.parameter_object)
        } else {
            property::get(&self.parameter_object, path)
        };
        found.cloned().unwrap_or(Value::Null)
    }

    /// Writes the runtime value bound by `mapping`, with the same precedence as
    /// [`value_of`](Self::value_of). Returns `false` if the target cannot be reached.
    pub fn set_value_of(&mut self, mapping: &ParameterMapping, value: Value) -> bool {
        let path = mapping.property.as_str();
        let (root, rest) = property::split_root(path);
        if let Some(slot) = self.additional.get_mut(root) {
            property::set(slot, rest, value)
        } else if is_scalar(&self.parameter_object) {
            self.parameter_object = value;
            true
        } else {
            property::set(&mut self.parameter_object, path, value)
        }
    }

    /// Produces the bound statement for `sql` with the synchronized parameters.
    #[must_use]
    pub fn into_bound(self, sql: String) -> BoundStatement {
        BoundStatement {
            sql,
            parameter_mappings: self.mappings,
            parameter_object: self.parameter_object,
            additional_parameters: self.additional,
        }
    }
}

const fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}
