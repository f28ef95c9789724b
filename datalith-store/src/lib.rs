//! # Datalith Store
//!
//! LMDB-backed datom storage engine: the substrate a Datalog query engine
//! and transactor are built on.
//!
//! This crate provides:
//! - [`LocalStore`]: transactional ingestion and ordered, indexed retrieval
//!   of datoms over three covering indexes (EAV, AVE, VEA) plus an overflow
//!   table for oversize values
//! - The schema catalog: stable attribute id allocation, persisted
//!   attribute properties, enforced evolution rules
//! - Capability traits ([`StoreLifecycle`], [`StoreSchema`], [`StoreWrite`],
//!   [`StoreRead`]) as the seam for future store variants
//!
//! ## Example
//!
//! ```ignore
//! use datalith_core::{Datom, DatomPattern, Index, Value, ValueType};
//! use datalith_store::{AttrSpec, LocalStore, StoreRead, StoreWrite};
//!
//! let schema = [("person/name".into(), AttrSpec::of_type(ValueType::String))];
//! let store = LocalStore::open("/tmp/people", Some(&schema))?;
//! store.load_datoms(&[Datom::add(1, "person/name", Value::Str("Ada".into()))])?;
//! let all = store.slice(
//!     Index::Eav,
//!     &DatomPattern::entity(1),
//!     &DatomPattern::entity(1),
//! )?;
//! ```

pub mod error;
pub mod kv;
pub mod schema;
pub mod store;

// Re-export main types
pub use error::{Error, Result};
pub use kv::{KeyRange, Kv, KvOp};
pub use schema::{
    derive_rschema, implicit_schema, AttrProps, AttrSpec, Cardinality, Rschema, SchemaProp,
    Uniqueness,
};
pub use store::{
    meta_keys, DatomPred, LocalStore, StoreLifecycle, StoreRead, StoreSchema, StoreWrite,
    TX_BATCH_SIZE,
};
