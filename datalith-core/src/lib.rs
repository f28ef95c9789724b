//! # Datalith Core
//!
//! Core data model and ordered key codec for the Datalith triple store.
//!
//! This crate provides:
//! - Core types: `Datom`, `Value`, `Retrieved`, `DatomPattern`
//! - The 3 covering index kinds (EAV, AVE, VEA)
//! - The indexable codec: fixed-width ordered byte keys, range bounds,
//!   giant classification
//!
//! ## Design Principles
//!
//! 1. **Bytes are the sort key**: the codec realizes every index order
//!    lexicographically, so the K/V layer's plain byte comparator suffices
//! 2. **Deterministic encoding**: the same datom always produces the same
//!    key, giants included, so retraction never needs an auxiliary lookup
//!    to find its key
//! 3. **No I/O**: this crate never touches storage; `datalith-store` does

pub mod codec;
pub mod datom;
pub mod error;
pub mod index;
pub mod value;

// Re-export main types
pub use codec::{decode, decode_entry_val, encode_entry_val, encode_gt_key, Indexable};
pub use codec::{BODY_BUDGET, GT0, MAX_KEY_SIZE, NORMAL};
pub use datom::{Aid, Attr, Datom, DatomPattern, EntityId, Gt, Retrieved};
pub use error::{Error, Result};
pub use index::Index;
pub use value::{Value, ValueType};
