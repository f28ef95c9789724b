//! Value - polymorphic datom value type
//!
//! The value slot of a datom can hold references to other entities, strings,
//! integers, doubles, booleans, keywords, symbols, UUIDs, instants, and raw
//! byte arrays.
//!
//! ## Ordering
//!
//! `Value` implements strict total ordering: values are compared by type tag
//! first, then by natural order within the type. This agrees byte-for-byte
//! with the order of encoded index keys (see the `codec` module) for every
//! value that fits inside the in-key budget. Doubles use IEEE-754 total
//! order, so `NaN` is ordered (after all finite values) rather than poisoned.
//!
//! ## Equality
//!
//! `Eq`/`Hash` treat doubles by bit pattern so `Value` can key hash maps and
//! participate in index-key identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

use crate::datom::EntityId;

/// Polymorphic value type for datoms
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    /// Reference to another entity
    Ref(EntityId),
    /// Boolean value
    Boolean(bool),
    /// 64-bit signed integer
    Long(i64),
    /// 64-bit floating point
    Double(f64),
    /// Point in time, millisecond precision
    Instant(DateTime<Utc>),
    /// Keyword, e.g. `person/name` (interned symbolic name)
    Keyword(String),
    /// Symbol
    Symbol(String),
    /// String value
    Str(String),
    /// UUID value
    Uuid(Uuid),
    /// Raw byte array
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

/// Datom value type, as declared in attribute schemas
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Ref,
    Boolean,
    Long,
    Double,
    Instant,
    Keyword,
    Symbol,
    String,
    Uuid,
    Bytes,
}

impl Value {
    /// The schema-level type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Ref(_) => ValueType::Ref,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Long(_) => ValueType::Long,
            Value::Double(_) => ValueType::Double,
            Value::Instant(_) => ValueType::Instant,
            Value::Keyword(_) => ValueType::Keyword,
            Value::Symbol(_) => ValueType::Symbol,
            Value::Str(_) => ValueType::String,
            Value::Uuid(_) => ValueType::Uuid,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    /// Check if this is a reference (value pointing to another entity)
    pub fn is_ref(&self) -> bool {
        matches!(self, Value::Ref(_))
    }

    /// The referenced entity id, when this is a reference
    pub fn as_ref_id(&self) -> Option<EntityId> {
        match self {
            Value::Ref(e) => Some(*e),
            _ => None,
        }
    }

    /// Type discriminant for cross-type ordering
    ///
    /// Must stay in lockstep with the codec's type tags: lower discriminant
    /// sorts earlier in every index.
    fn type_discriminant(&self) -> u8 {
        match self {
            Value::Ref(_) => 1,
            Value::Boolean(_) => 2,
            Value::Long(_) => 3,
            Value::Double(_) => 4,
            Value::Instant(_) => 5,
            Value::Keyword(_) => 6,
            Value::Symbol(_) => 7,
            Value::Str(_) => 8,
            Value::Uuid(_) => 9,
            Value::Bytes(_) => 10,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Ref(a), Value::Ref(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Instant(a), Value::Instant(b)) => {
                a.timestamp_millis() == b.timestamp_millis()
            }
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_discriminant().hash(state);
        match self {
            Value::Ref(e) => e.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Long(l) => l.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::Instant(t) => t.timestamp_millis().hash(state),
            Value::Keyword(s) | Value::Symbol(s) | Value::Str(s) => s.hash(state),
            Value::Uuid(u) => u.hash(state),
            Value::Bytes(b) => b.hash(state),
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Ref(a), Value::Ref(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Instant(a), Value::Instant(b)) => {
                a.timestamp_millis().cmp(&b.timestamp_millis())
            }
            (Value::Keyword(a), Value::Keyword(b)) => a.cmp(b),
            (Value::Symbol(a), Value::Symbol(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => self.type_discriminant().cmp(&other.type_discriminant()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Ref(e) => write!(f, "#ref {}", e),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Long(l) => write!(f, "{}", l),
            Value::Double(d) => write!(f, "{}", d),
            Value::Instant(t) => write!(f, "#inst {}", t.to_rfc3339()),
            Value::Keyword(s) => write!(f, ":{}", s),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Uuid(u) => write!(f, "#uuid {}", u),
            Value::Bytes(b) => write!(f, "#bytes[{}]", b.len()),
        }
    }
}

impl ValueType {
    /// Short name, as persisted in schema records
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Ref => "ref",
            ValueType::Boolean => "boolean",
            ValueType::Long => "long",
            ValueType::Double => "double",
            ValueType::Instant => "instant",
            ValueType::Keyword => "keyword",
            ValueType::Symbol => "symbol",
            ValueType::String => "string",
            ValueType::Uuid => "uuid",
            ValueType::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ref" => Ok(ValueType::Ref),
            "boolean" => Ok(ValueType::Boolean),
            "long" => Ok(ValueType::Long),
            "double" => Ok(ValueType::Double),
            "instant" => Ok(ValueType::Instant),
            "keyword" => Ok(ValueType::Keyword),
            "symbol" => Ok(ValueType::Symbol),
            "string" => Ok(ValueType::String),
            "uuid" => Ok(ValueType::Uuid),
            "bytes" => Ok(ValueType::Bytes),
            _ => Err(format!("Unknown value type: {}", s)),
        }
    }
}

/// Serde adapter: byte arrays as base64 strings in JSON
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_mapping() {
        assert_eq!(Value::Long(1).value_type(), ValueType::Long);
        assert_eq!(Value::Str("x".into()).value_type(), ValueType::String);
        assert_eq!(Value::Ref(7).value_type(), ValueType::Ref);
    }

    #[test]
    fn test_cross_type_ordering() {
        // Refs sort before longs, longs before strings
        assert!(Value::Ref(u64::MAX) < Value::Long(i64::MIN));
        assert!(Value::Long(i64::MAX) < Value::Str(String::new()));
    }

    #[test]
    fn test_double_total_order() {
        assert!(Value::Double(-1.5) < Value::Double(0.0));
        assert!(Value::Double(0.0) < Value::Double(1.5));
        assert!(Value::Double(f64::NEG_INFINITY) < Value::Double(f64::MIN));
        assert!(Value::Double(f64::MAX) < Value::Double(f64::INFINITY));
        // NaN is ordered, not poisoned
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
    }

    #[test]
    fn test_bytes_json_round_trip() {
        let v = Value::Bytes(vec![0, 1, 2, 255]);
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("Bytes"));
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn test_value_type_name_round_trip() {
        for vt in [
            ValueType::Ref,
            ValueType::String,
            ValueType::Instant,
            ValueType::Bytes,
        ] {
            assert_eq!(vt.name().parse::<ValueType>().unwrap(), vt);
        }
    }
}
