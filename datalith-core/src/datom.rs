//! Datom - the fundamental data unit in Datalith
//!
//! A datom is a single fact with 4 components:
//! - `e`: entity id
//! - `a`: attribute name (keyword-style, e.g. `person/name`)
//! - `v`: typed value
//! - `op`: operation (true = assert, false = retract)
//!
//! `op` is consumed during ingestion only and is never persisted; equality
//! and hashing ignore it, so an assertion and its retraction denote the same
//! fact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::value::Value;

/// 64-bit entity id
pub type EntityId = u64;

/// Attribute id: a small integer assigned at first sight of an attribute
/// and stable for the lifetime of a store
pub type Aid = u32;

/// Giant id: 8-byte key into the giants table for datoms whose encoded key
/// cannot carry the value
pub type Gt = u64;

/// Attribute name, keyword-style (`"person/name"`)
pub type Attr = String;

/// A single fact, with assertion/retraction intent
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Datom {
    /// Entity id
    pub e: EntityId,
    /// Attribute name
    pub a: Attr,
    /// Value
    pub v: Value,
    /// Operation: true = assert, false = retract (not persisted)
    pub op: bool,
}

impl Datom {
    /// Create an assertion
    pub fn add(e: EntityId, a: impl Into<Attr>, v: Value) -> Self {
        Self { e, a: a.into(), v, op: true }
    }

    /// Create a retraction
    pub fn retract(e: EntityId, a: impl Into<Attr>, v: Value) -> Self {
        Self { e, a: a.into(), v, op: false }
    }

    /// The retraction of this datom
    pub fn retraction(&self) -> Self {
        Self { op: false, ..self.clone() }
    }

    /// Check if this datom asserts its fact
    pub fn is_assertion(&self) -> bool {
        self.op
    }
}

// Equality is fact identity: op is ingestion intent, not part of the fact.

impl PartialEq for Datom {
    fn eq(&self, other: &Self) -> bool {
        self.e == other.e && self.a == other.a && self.v == other.v
    }
}

impl Eq for Datom {}

impl Hash for Datom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.e.hash(state);
        self.a.hash(state);
        self.v.hash(state);
    }
}

impl fmt::Display for Datom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.op { "+" } else { "-" };
        write!(f, "[{} {} :{} {}]", op, self.e, self.a, self.v)
    }
}

/// Decoded index key: the `(e, aid, v)` triple recovered from index bytes
///
/// `v` is `None` when the key is a giant marker; the full value then lives
/// in the giants table under the `gt` stored in the entry's value slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retrieved {
    /// Entity id
    pub e: EntityId,
    /// Attribute id
    pub a: Aid,
    /// Decoded value, when the key carries it in full
    pub v: Option<Value>,
}

/// Range endpoint with wildcard components
///
/// Missing components are filled with minimum or maximum sentinels by the
/// codec's bound encoders, so a closed `[low, high]` range covers exactly
/// the intended subset of an index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatomPattern {
    /// Entity id, or wildcard
    pub e: Option<EntityId>,
    /// Attribute name, or wildcard
    pub a: Option<Attr>,
    /// Value, or wildcard
    pub v: Option<Value>,
}

impl DatomPattern {
    /// Match everything
    pub fn everything() -> Self {
        Self::default()
    }

    /// All datoms of one entity
    pub fn entity(e: EntityId) -> Self {
        Self { e: Some(e), a: None, v: None }
    }

    /// All datoms of one attribute
    pub fn attr(a: impl Into<Attr>) -> Self {
        Self { e: None, a: Some(a.into()), v: None }
    }

    /// All datoms of one entity and attribute
    pub fn entity_attr(e: EntityId, a: impl Into<Attr>) -> Self {
        Self { e: Some(e), a: Some(a.into()), v: None }
    }

    /// All datoms of one attribute with one value
    pub fn attr_value(a: impl Into<Attr>, v: Value) -> Self {
        Self { e: None, a: Some(a.into()), v: Some(v) }
    }

    /// All datoms with one value (VEA reverse lookups; the value must be a ref)
    pub fn value(v: Value) -> Self {
        Self { e: None, a: None, v: Some(v) }
    }

    /// A fully-bound pattern
    pub fn exact(d: &Datom) -> Self {
        Self { e: Some(d.e), a: Some(d.a.clone()), v: Some(d.v.clone()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datom_equality_ignores_op() {
        let added = Datom::add(1, "person/name", Value::Str("Ada".into()));
        let retracted = added.retraction();
        assert!(!retracted.op);
        assert_eq!(added, retracted);
    }

    #[test]
    fn test_display() {
        let d = Datom::add(42, "person/age", Value::Long(36));
        assert_eq!(d.to_string(), "[+ 42 :person/age 36]");
    }

    #[test]
    fn test_pattern_constructors() {
        let p = DatomPattern::entity_attr(1, "person/name");
        assert_eq!(p.e, Some(1));
        assert_eq!(p.a.as_deref(), Some("person/name"));
        assert_eq!(p.v, None);
        assert_eq!(DatomPattern::everything(), DatomPattern::default());
    }
}
