//! Schema catalog - attribute properties and their derived views
//!
//! One record per attribute, persisted as JSON in the `schema` sub-database
//! keyed by attribute name. An attribute's `aid` is assigned at first sight
//! and never changes or gets reused; everything else can evolve within the
//! migration rules enforced by the store.
//!
//! The reverse schema (`Rschema`) is a pure function of the schema map and
//! is recomputed on every schema mutation, never patched incrementally.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use datalith_core::{Aid, Attr, ValueType};

/// Attribute cardinality
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    One,
    Many,
}

/// Attribute uniqueness constraint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Uniqueness {
    #[default]
    None,
    Identity,
    Value,
}

/// Persisted properties of one attribute
///
/// `value_type` is `None` until declared or until the first ingested value
/// fixes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttrProps {
    /// Stable attribute id
    pub aid: Aid,
    /// Declared value type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    /// One value per entity, or many
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Uniqueness constraint across entities
    #[serde(default)]
    pub unique: Uniqueness,
    /// Whether ref values denote sub-components of the entity
    #[serde(default)]
    pub is_component: bool,
}

impl AttrProps {
    /// Fresh record with only an aid assigned
    pub fn new(aid: Aid) -> Self {
        Self {
            aid,
            value_type: None,
            cardinality: Cardinality::One,
            unique: Uniqueness::None,
            is_component: false,
        }
    }

    /// Fresh record with a declared value type
    pub fn of_type(aid: Aid, value_type: ValueType) -> Self {
        Self {
            value_type: Some(value_type),
            ..Self::new(aid)
        }
    }

    fn with_unique(mut self, unique: Uniqueness) -> Self {
        self.unique = unique;
        self
    }
}

/// Caller-facing partial attribute declaration, merged onto existing
/// records by `set_schema`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttrSpec {
    pub value_type: Option<ValueType>,
    pub cardinality: Option<Cardinality>,
    pub unique: Option<Uniqueness>,
    pub is_component: Option<bool>,
}

impl AttrSpec {
    /// Declare just a value type
    pub fn of_type(value_type: ValueType) -> Self {
        Self {
            value_type: Some(value_type),
            ..Self::default()
        }
    }

    /// Declare cardinality many
    pub fn many(mut self) -> Self {
        self.cardinality = Some(Cardinality::Many);
        self
    }

    /// Declare unique identity
    pub fn unique_identity(mut self) -> Self {
        self.unique = Some(Uniqueness::Identity);
        self
    }

    /// Declare unique value
    pub fn unique_value(mut self) -> Self {
        self.unique = Some(Uniqueness::Value);
        self
    }

    /// Declare component semantics
    pub fn component(mut self) -> Self {
        self.is_component = Some(true);
        self
    }

    /// Merge this declaration onto an existing record; the aid never moves
    pub fn apply(&self, props: AttrProps) -> AttrProps {
        AttrProps {
            aid: props.aid,
            value_type: self.value_type.or(props.value_type),
            cardinality: self.cardinality.unwrap_or(props.cardinality),
            unique: self.unique.unwrap_or(props.unique),
            is_component: self.is_component.unwrap_or(props.is_component),
        }
    }
}

/// Reverse-schema property keys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchemaProp {
    /// Any uniqueness constraint
    Unique,
    UniqueIdentity,
    UniqueValue,
    /// Ref-typed attributes (the VEA population)
    Ref,
    Component,
    Many,
}

/// Reverse schema: property -> set of attributes carrying it
pub type Rschema = HashMap<SchemaProp, HashSet<Attr>>;

/// Recompute the reverse schema from scratch
pub fn derive_rschema(schema: &HashMap<Attr, AttrProps>) -> Rschema {
    let mut rschema: Rschema = HashMap::new();
    let mut add = |prop: SchemaProp, attr: &Attr| {
        rschema.entry(prop).or_default().insert(attr.clone());
    };
    for (attr, props) in schema {
        match props.unique {
            Uniqueness::Identity => {
                add(SchemaProp::Unique, attr);
                add(SchemaProp::UniqueIdentity, attr);
            }
            Uniqueness::Value => {
                add(SchemaProp::Unique, attr);
                add(SchemaProp::UniqueValue, attr);
            }
            Uniqueness::None => {}
        }
        if props.value_type == Some(ValueType::Ref) {
            add(SchemaProp::Ref, attr);
        }
        if props.is_component {
            add(SchemaProp::Component, attr);
        }
        if props.cardinality == Cardinality::Many {
            add(SchemaProp::Many, attr);
        }
    }
    rschema
}

/// The implicit schema seeded on first open, fixed aids 0..=7
pub fn implicit_schema() -> Vec<(Attr, AttrProps)> {
    vec![
        (
            "db/ident".into(),
            AttrProps::of_type(0, ValueType::Keyword).with_unique(Uniqueness::Identity),
        ),
        ("db/valueType".into(), AttrProps::of_type(1, ValueType::Keyword)),
        ("db/cardinality".into(), AttrProps::of_type(2, ValueType::Keyword)),
        ("db/unique".into(), AttrProps::of_type(3, ValueType::Keyword)),
        ("db/isComponent".into(), AttrProps::of_type(4, ValueType::Boolean)),
        ("db/aid".into(), AttrProps::of_type(5, ValueType::Long)),
        ("db/createdAt".into(), AttrProps::of_type(6, ValueType::Instant)),
        ("db/updatedAt".into(), AttrProps::of_type(7, ValueType::Instant)),
    ]
}

/// Immutable snapshot of the in-memory schema views
///
/// Published by replacement: writers build a fresh snapshot and swap the
/// `Arc`, readers clone the `Arc` and never block on the writer lock.
#[derive(Debug)]
pub(crate) struct SchemaCache {
    /// attr -> properties
    pub schema: HashMap<Attr, AttrProps>,
    /// property -> attrs (derived)
    pub rschema: Rschema,
    /// aid -> attr (derived)
    pub attrs: HashMap<Aid, Attr>,
    /// Highest aid assigned so far
    pub max_aid: Aid,
}

impl SchemaCache {
    pub fn from_schema(schema: HashMap<Attr, AttrProps>) -> Self {
        let rschema = derive_rschema(&schema);
        let attrs = schema.iter().map(|(a, p)| (p.aid, a.clone())).collect();
        let max_aid = schema.values().map(|p| p.aid).max().unwrap_or(0);
        Self {
            schema,
            rschema,
            attrs,
            max_aid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_props_json_shape() {
        let props = AttrProps::of_type(9, ValueType::String).with_unique(Uniqueness::Identity);
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["aid"], 9);
        assert_eq!(json["valueType"], "string");
        assert_eq!(json["unique"], "identity");
        assert_eq!(json["isComponent"], false);
        let back: AttrProps = serde_json::from_value(json).unwrap();
        assert_eq!(back, props);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let back: AttrProps = serde_json::from_str(r#"{"aid": 3}"#).unwrap();
        assert_eq!(back.value_type, None);
        assert_eq!(back.cardinality, Cardinality::One);
        assert_eq!(back.unique, Uniqueness::None);
        assert!(!back.is_component);
    }

    #[test]
    fn test_implicit_schema_aids_are_dense_and_unique() {
        let implicit = implicit_schema();
        let mut aids: Vec<Aid> = implicit.iter().map(|(_, p)| p.aid).collect();
        aids.sort_unstable();
        assert_eq!(aids, (0..implicit.len() as Aid).collect::<Vec<_>>());
    }

    #[test]
    fn test_derive_rschema() {
        let schema: HashMap<Attr, AttrProps> = implicit_schema().into_iter().collect();
        let rschema = derive_rschema(&schema);
        assert!(rschema[&SchemaProp::UniqueIdentity].contains("db/ident"));
        assert!(rschema[&SchemaProp::Unique].contains("db/ident"));
        assert!(!rschema.contains_key(&SchemaProp::Many));
        assert!(!rschema.contains_key(&SchemaProp::Ref));
    }

    #[test]
    fn test_attr_spec_merge_keeps_aid() {
        let props = AttrProps::of_type(4, ValueType::Long);
        let merged = AttrSpec::default().many().unique_value().apply(props.clone());
        assert_eq!(merged.aid, 4);
        assert_eq!(merged.value_type, Some(ValueType::Long));
        assert_eq!(merged.cardinality, Cardinality::Many);
        assert_eq!(merged.unique, Uniqueness::Value);
    }

    #[test]
    fn test_cache_projections() {
        let cache = SchemaCache::from_schema(implicit_schema().into_iter().collect());
        assert_eq!(cache.max_aid, 7);
        assert_eq!(cache.attrs[&0], "db/ident");
        assert_eq!(cache.attrs.len(), cache.schema.len());
    }
}
