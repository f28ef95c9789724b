//! The datom store - schema catalog, ingestion, and retrieval over LMDB
//!
//! A [`LocalStore`] exclusively owns one LMDB environment holding six named
//! sub-databases:
//!
//! | Name | Key | Value | Contents |
//! |------|-----|-------|----------|
//! | `eav` | 511 B | 8 B | indexable -> `NORMAL`/`gt` |
//! | `ave` | 511 B | 8 B | indexable -> `NORMAL`/`gt` |
//! | `vea` | 511 B | 8 B | indexable -> `NORMAL`/`gt` (refs only) |
//! | `giants` | 8 B (`gt`) | var | `gt` -> full datom (JSON) |
//! | `schema` | var | var | attr name -> properties (JSON) |
//! | `meta` | var | var | well-known keys |
//!
//! ## Concurrency
//!
//! Writers (`load_datoms`, `swap_attr`, `set_schema`) serialize on one
//! mutex. Readers never take it: schema caches are immutable snapshots
//! behind an `Arc` that writers replace wholesale, and the K/V layer gives
//! snapshot reads. `max_gt` is published only after its batch commits, so a
//! failed commit changes nothing.
//!
//! ## Capability surface
//!
//! The store is a polymorphic boundary with one variant today. Rather than
//! one wide interface, capabilities split into [`StoreLifecycle`],
//! [`StoreSchema`], [`StoreWrite`], and [`StoreRead`], all object-safe.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use datalith_core::codec::{self, Indexable};
use datalith_core::{Aid, Attr, Datom, DatomPattern, EntityId, Gt, Index, Value};

use crate::error::{Error, Result};
use crate::kv::{KeyRange, Kv, KvOp, DEFAULT_MAP_SIZE};
use crate::schema::{
    implicit_schema, AttrProps, AttrSpec, Cardinality, Rschema, SchemaCache, Uniqueness,
};

/// Datoms per atomic write transaction during ingestion
pub const TX_BATCH_SIZE: usize = 100_000;

const MAX_DBS: u32 = 6;

mod db_names {
    pub const EAV: &str = "eav";
    pub const AVE: &str = "ave";
    pub const VEA: &str = "vea";
    pub const GIANTS: &str = "giants";
    pub const SCHEMA: &str = "schema";
    pub const META: &str = "meta";
}

/// Well-known keys in the `meta` sub-database
pub mod meta_keys {
    /// i64 BE unix milliseconds of the last write
    pub const LAST_MODIFIED: &[u8] = b"last-modified";
}

/// Predicate over decoded datoms; giants are materialized before it runs
pub type DatomPred<'a> = &'a dyn Fn(&Datom) -> bool;

/// Lifecycle capability: directory, close, closed?
pub trait StoreLifecycle {
    /// Directory backing this store
    fn dir(&self) -> &Path;

    /// Release the underlying environment; idempotent
    fn close(&self);

    /// Check whether the store has been closed
    fn is_closed(&self) -> bool;
}

/// Schema capability: catalog accessors and mutation
pub trait StoreSchema {
    /// Snapshot of attr -> properties
    fn schema(&self) -> HashMap<Attr, AttrProps>;

    /// Snapshot of the derived reverse schema (property -> attrs)
    fn rschema(&self) -> Rschema;

    /// Snapshot of the derived aid -> attr map
    fn attrs(&self) -> HashMap<Aid, Attr>;

    /// Highest attribute id assigned so far
    fn max_aid(&self) -> Aid;

    /// Next giant id to be allocated
    fn max_gt(&self) -> Gt;

    /// Reserve one giant id, advancing the allocator strictly
    fn advance_max_gt(&self) -> Gt;

    /// Merge caller declarations into the catalog; existing attributes keep
    /// their aid, new ones are allocated in declaration order
    fn set_schema(&self, decls: &[(Attr, AttrSpec)]) -> Result<()>;

    /// Atomically update one attribute's properties through `f`, enforcing
    /// the migration rules
    fn swap_attr(&self, attr: &str, f: &dyn Fn(AttrProps) -> AttrProps) -> Result<AttrProps>;
}

/// Write capability
pub trait StoreWrite {
    /// Ingest a finite batch of assertions and retractions
    ///
    /// Mutually exclusive with itself and with schema mutation. The input
    /// is committed in chunks of [`TX_BATCH_SIZE`], each chunk one atomic
    /// multi-key write; a failed chunk leaves no trace of itself.
    fn load_datoms(&self, datoms: &[Datom]) -> Result<()>;
}

/// Read capability: point fetch and ranged retrieval over a chosen index
///
/// Ranged reads take closed bounds as [`DatomPattern`]s; missing components
/// widen to the index extremes. A bound naming an attribute absent from the
/// schema yields the empty result (no aid was ever assigned, so no datom
/// can match).
pub trait StoreRead {
    /// Point lookup in EAV; 0- or 1-element result
    fn fetch(&self, datom: &Datom) -> Result<Vec<Datom>>;

    /// One-shot existence check over `[lo, hi]`
    fn populated(&self, index: Index, lo: &DatomPattern, hi: &DatomPattern) -> Result<bool>;

    /// Exact datom count in `[lo, hi]`
    fn size(&self, index: Index, lo: &DatomPattern, hi: &DatomPattern) -> Result<usize>;

    /// First datom of `[lo, hi]`
    fn head(&self, index: Index, lo: &DatomPattern, hi: &DatomPattern) -> Result<Option<Datom>>;

    /// Last datom of `[lo, hi]`, found by reverse scan
    fn tail(&self, index: Index, lo: &DatomPattern, hi: &DatomPattern) -> Result<Option<Datom>>;

    /// All datoms of `[lo, hi]`, ascending
    fn slice(&self, index: Index, lo: &DatomPattern, hi: &DatomPattern) -> Result<Vec<Datom>>;

    /// All datoms of `[hi, lo]`, descending
    fn rslice(&self, index: Index, hi: &DatomPattern, lo: &DatomPattern) -> Result<Vec<Datom>>;

    /// [`StoreRead::size`] counting only datoms passing `pred`
    fn size_filter(
        &self,
        index: Index,
        pred: DatomPred<'_>,
        lo: &DatomPattern,
        hi: &DatomPattern,
    ) -> Result<usize>;

    /// [`StoreRead::head`] skipping datoms failing `pred`
    fn head_filter(
        &self,
        index: Index,
        pred: DatomPred<'_>,
        lo: &DatomPattern,
        hi: &DatomPattern,
    ) -> Result<Option<Datom>>;

    /// [`StoreRead::tail`] skipping datoms failing `pred`
    fn tail_filter(
        &self,
        index: Index,
        pred: DatomPred<'_>,
        lo: &DatomPattern,
        hi: &DatomPattern,
    ) -> Result<Option<Datom>>;

    /// [`StoreRead::slice`] keeping only datoms passing `pred`
    fn slice_filter(
        &self,
        index: Index,
        pred: DatomPred<'_>,
        lo: &DatomPattern,
        hi: &DatomPattern,
    ) -> Result<Vec<Datom>>;

    /// [`StoreRead::rslice`] keeping only datoms passing `pred`
    fn rslice_filter(
        &self,
        index: Index,
        pred: DatomPred<'_>,
        hi: &DatomPattern,
        lo: &DatomPattern,
    ) -> Result<Vec<Datom>>;

    /// Total entries in one index
    fn datom_count(&self, index: Index) -> Result<usize>;

    /// Largest entity id present, recovered by reverse EAV scan
    fn init_max_eid(&self) -> Result<EntityId>;

    /// Unix milliseconds of the last write
    fn last_modified(&self) -> Result<i64>;
}

struct Dbis {
    eav: lmdb::Database,
    ave: lmdb::Database,
    vea: lmdb::Database,
    giants: lmdb::Database,
    schema: lmdb::Database,
    meta: lmdb::Database,
}

/// The local, LMDB-backed store variant
pub struct LocalStore {
    kv: Kv,
    dir: PathBuf,
    dbis: Dbis,
    /// Serializes `load_datoms`, `swap_attr`, and `set_schema`
    write_lock: Mutex<()>,
    /// Published-by-replace schema snapshot
    cache: RwLock<Arc<SchemaCache>>,
    /// Next giant id; mutated only under `write_lock`, after commit
    max_gt: AtomicU64,
}

impl LocalStore {
    /// Open a store directory, creating and seeding it if absent
    pub fn open(dir: impl AsRef<Path>, schema: Option<&[(Attr, AttrSpec)]>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let kv = Kv::open(&dir, MAX_DBS, DEFAULT_MAP_SIZE)?;
        let dbis = Dbis {
            eav: kv.open_db(db_names::EAV)?,
            ave: kv.open_db(db_names::AVE)?,
            vea: kv.open_db(db_names::VEA)?,
            giants: kv.open_db(db_names::GIANTS)?,
            schema: kv.open_db(db_names::SCHEMA)?,
            meta: kv.open_db(db_names::META)?,
        };

        let mut schema_map: HashMap<Attr, AttrProps> = HashMap::new();
        for (key, val) in kv.get_range(dbis.schema, &KeyRange::All)? {
            let attr = String::from_utf8(key)
                .map_err(|e| Error::corrupt(format!("non-UTF-8 schema key: {}", e)))?;
            schema_map.insert(attr, serde_json::from_slice(&val)?);
        }
        if schema_map.is_empty() {
            let implicit = implicit_schema();
            let mut ops = Vec::with_capacity(implicit.len() + 1);
            for (attr, props) in &implicit {
                ops.push(KvOp::Put {
                    db: dbis.schema,
                    key: attr.as_bytes().to_vec(),
                    val: serde_json::to_vec(props)?,
                });
            }
            ops.push(KvOp::Put {
                db: dbis.meta,
                key: meta_keys::LAST_MODIFIED.to_vec(),
                val: now_millis().to_be_bytes().to_vec(),
            });
            kv.transact(ops)?;
            schema_map = implicit.into_iter().collect();
            info!(dir = %dir.display(), "seeded implicit schema");
        }

        let max_gt = match kv.get_first(dbis.giants, &KeyRange::AllBack)? {
            Some((key, _)) => codec::decode_gt_key(&key)? + 1,
            None => codec::GT0,
        };

        let store = Self {
            kv,
            dir,
            dbis,
            write_lock: Mutex::new(()),
            cache: RwLock::new(Arc::new(SchemaCache::from_schema(schema_map))),
            max_gt: AtomicU64::new(max_gt),
        };
        if let Some(decls) = schema {
            store.set_schema(decls)?;
        }
        debug!(
            dir = %store.dir.display(),
            max_aid = store.max_aid(),
            max_gt = store.max_gt(),
            "store opened"
        );
        Ok(store)
    }

    fn cache(&self) -> Arc<SchemaCache> {
        Arc::clone(&self.cache.read())
    }

    fn db_for(&self, index: Index) -> lmdb::Database {
        match index {
            Index::Eav => self.dbis.eav,
            Index::Ave => self.dbis.ave,
            Index::Vea => self.dbis.vea,
        }
    }

    fn last_modified_op(&self) -> KvOp {
        KvOp::Put {
            db: self.dbis.meta,
            key: meta_keys::LAST_MODIFIED.to_vec(),
            val: now_millis().to_be_bytes().to_vec(),
        }
    }

    /// Resolve pattern bounds to encoded keys; `None` means an unknown
    /// attribute was named and the range is provably empty
    fn range_keys(
        &self,
        cache: &SchemaCache,
        index: Index,
        lo: &DatomPattern,
        hi: &DatomPattern,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(lo_aid) = resolve_aid(cache, lo) else {
            return Ok(None);
        };
        let Some(hi_aid) = resolve_aid(cache, hi) else {
            return Ok(None);
        };
        let lo_key = Indexable::low(lo.e, lo_aid, lo.v.as_ref())?.encode(index);
        let hi_key = Indexable::high(hi.e, hi_aid, hi.v.as_ref())?.encode(index);
        Ok(Some((lo_key, hi_key)))
    }

    /// Assemble a full datom from a raw index entry, dereferencing the
    /// giants table when the stored value slot names a `gt`
    fn to_datom(&self, cache: &SchemaCache, index: Index, key: &[u8], stored: &[u8]) -> Result<Datom> {
        let gt = codec::decode_entry_val(stored)?;
        if gt == codec::NORMAL {
            let r = codec::decode(index, key)?;
            let attr = cache
                .attrs
                .get(&r.a)
                .ok_or_else(|| Error::corrupt(format!("no attribute for aid {}", r.a)))?;
            let v = r
                .v
                .ok_or_else(|| Error::corrupt("normal entry stored under a giant-marker key"))?;
            Ok(Datom::add(r.e, attr.clone(), v))
        } else {
            let bytes = self
                .kv
                .get(self.dbis.giants, &codec::encode_gt_key(gt))?
                .ok_or_else(|| Error::corrupt(format!("missing giant record {}", gt)))?;
            Ok(serde_json::from_slice(&bytes)?)
        }
    }

    /// Decode a materialized range in order, stopping when `f` returns false
    fn for_each_datom(
        &self,
        index: Index,
        range: &KeyRange,
        f: &mut dyn FnMut(Datom) -> bool,
    ) -> Result<()> {
        let cache = self.cache();
        // Raw entries are copied out first so giant dereferencing never
        // nests a read inside the scan's read transaction
        let raw = self.kv.get_range(self.db_for(index), range)?;
        for (key, stored) in &raw {
            let datom = self.to_datom(&cache, index, key, stored)?;
            if !f(datom) {
                break;
            }
        }
        Ok(())
    }

    /// Read-or-allocate the attribute record for an assertion; the first
    /// ingested value fixes an undeclared value type
    fn ensure_attr(&self, attr: &str, v: &Value) -> Result<AttrProps> {
        let cache = self.cache();
        if let Some(props) = cache.schema.get(attr) {
            match props.value_type {
                Some(expected) if expected != v.value_type() => {
                    return Err(Error::ValueTypeMismatch {
                        attr: attr.to_string(),
                        expected,
                        actual: v.value_type(),
                    })
                }
                Some(_) => return Ok(props.clone()),
                None => {}
            }
        }
        let vt = v.value_type();
        self.swap_attr_inner(attr, &move |mut props: AttrProps| {
            props.value_type = Some(vt);
            props
        })
    }

    /// The body of `swap_attr`; callers must hold `write_lock`
    fn swap_attr_inner(&self, attr: &str, f: &dyn Fn(AttrProps) -> AttrProps) -> Result<AttrProps> {
        let cache = self.cache();
        let (old, fresh) = match cache.schema.get(attr) {
            Some(props) => (props.clone(), false),
            None => (AttrProps::new(cache.max_aid + 1), true),
        };
        let new = f(old.clone());
        if !fresh && new == old {
            return Ok(new);
        }
        self.check_migration(attr, &old, &new)?;
        self.kv.transact(vec![
            KvOp::Put {
                db: self.dbis.schema,
                key: attr.as_bytes().to_vec(),
                val: serde_json::to_vec(&new)?,
            },
            self.last_modified_op(),
        ])?;
        let mut schema = cache.schema.clone();
        schema.insert(attr.to_string(), new.clone());
        *self.cache.write() = Arc::new(SchemaCache::from_schema(schema));
        debug!(attr, aid = new.aid, "schema record written");
        Ok(new)
    }

    /// Enforce the schema evolution rules; refusals leave no state change
    fn check_migration(&self, attr: &str, old: &AttrProps, new: &AttrProps) -> Result<()> {
        if new.aid != old.aid {
            return Err(Error::schema_conflict(format!(
                ":{} aid is immutable ({} -> {})",
                attr, old.aid, new.aid
            )));
        }
        let has_data = self.attr_has_data(old.aid)?;
        if has_data {
            if let (Some(from), Some(to)) = (old.value_type, new.value_type) {
                if from != to {
                    return Err(Error::schema_conflict(format!(
                        ":{} cannot change value type {} -> {} while data exists",
                        attr, from, to
                    )));
                }
            }
            if old.cardinality == Cardinality::Many && new.cardinality == Cardinality::One {
                return Err(Error::schema_conflict(format!(
                    ":{} cannot demote cardinality many -> one while data exists",
                    attr
                )));
            }
        }
        if old.unique == Uniqueness::None
            && new.unique != Uniqueness::None
            && has_data
            && self.unique_violated(old.aid)?
        {
            return Err(Error::schema_conflict(format!(
                ":{} cannot become unique: existing data maps one value to multiple entities",
                attr
            )));
        }
        Ok(())
    }

    fn attr_has_data(&self, aid: Aid) -> Result<bool> {
        let lo = Indexable::low(None, Some(aid), None)?.encode(Index::Ave);
        let hi = Indexable::high(None, Some(aid), None)?.encode(Index::Ave);
        Ok(self
            .kv
            .get_first(self.dbis.ave, &KeyRange::Closed { lo, hi })?
            .is_some())
    }

    /// AVE groups `(aid, v)` runs together, so a uniqueness violation shows
    /// up as two adjacent keys equal everywhere but the trailing entity id
    fn unique_violated(&self, aid: Aid) -> Result<bool> {
        let lo = Indexable::low(None, Some(aid), None)?.encode(Index::Ave);
        let hi = Indexable::high(None, Some(aid), None)?.encode(Index::Ave);
        let value_part = datalith_core::MAX_KEY_SIZE - 8;
        let mut prev: Option<Vec<u8>> = None;
        let mut violated = false;
        self.kv
            .scan(self.dbis.ave, &KeyRange::Closed { lo, hi }, &mut |key, _| {
                let vpart = &key[..value_part];
                if prev.as_deref() == Some(vpart) {
                    violated = true;
                    return false;
                }
                prev = Some(vpart.to_vec());
                true
            })?;
        Ok(violated)
    }

    /// Build and commit the ops for one ingestion chunk
    fn load_batch(&self, batch: &[Datom]) -> Result<()> {
        let mut ops = Vec::with_capacity(batch.len() * 3 + 1);
        let mut next_gt = self.max_gt.load(Ordering::Acquire);
        for datom in batch {
            if datom.op {
                let props = self.ensure_attr(&datom.a, &datom.v)?;
                let ix = Indexable::exact(datom.e, props.aid, &datom.v);
                let entry = if ix.is_giant() {
                    let gt = next_gt;
                    next_gt += 1;
                    ops.push(KvOp::Put {
                        db: self.dbis.giants,
                        key: codec::encode_gt_key(gt).to_vec(),
                        val: serde_json::to_vec(datom)?,
                    });
                    gt
                } else {
                    codec::NORMAL
                };
                let entry = codec::encode_entry_val(entry).to_vec();
                ops.push(KvOp::Put {
                    db: self.dbis.eav,
                    key: ix.encode(Index::Eav),
                    val: entry.clone(),
                });
                ops.push(KvOp::Put {
                    db: self.dbis.ave,
                    key: ix.encode(Index::Ave),
                    val: entry.clone(),
                });
                if datom.v.is_ref() {
                    ops.push(KvOp::Put {
                        db: self.dbis.vea,
                        key: ix.encode(Index::Vea),
                        val: entry,
                    });
                }
            } else {
                let cache = self.cache();
                // Retracting through an attribute the schema has never seen
                // is a no-op: no aid, so no key can exist
                let Some(props) = cache.schema.get(&datom.a) else {
                    continue;
                };
                let ix = Indexable::exact(datom.e, props.aid, &datom.v);
                let eav_key = ix.encode(Index::Eav);
                if let Some(stored) = self.kv.get(self.dbis.eav, &eav_key)? {
                    let gt = codec::decode_entry_val(&stored)?;
                    if gt != codec::NORMAL {
                        ops.push(KvOp::Del {
                            db: self.dbis.giants,
                            key: codec::encode_gt_key(gt).to_vec(),
                        });
                    }
                }
                ops.push(KvOp::Del {
                    db: self.dbis.eav,
                    key: eav_key,
                });
                ops.push(KvOp::Del {
                    db: self.dbis.ave,
                    key: ix.encode(Index::Ave),
                });
                if datom.v.is_ref() {
                    ops.push(KvOp::Del {
                        db: self.dbis.vea,
                        key: ix.encode(Index::Vea),
                    });
                }
            }
        }
        ops.push(self.last_modified_op());
        self.kv.transact(ops)?;
        // Publish the allocator only once the batch is durable
        self.max_gt.store(next_gt, Ordering::Release);
        Ok(())
    }
}

/// Outer `None`: the pattern names an attribute the schema has never seen,
/// so the range is provably empty. Inner `None`: attribute wildcard.
fn resolve_aid(cache: &SchemaCache, pattern: &DatomPattern) -> Option<Option<Aid>> {
    match &pattern.a {
        None => Some(None),
        Some(attr) => cache.schema.get(attr).map(|props| Some(props.aid)),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl StoreLifecycle for LocalStore {
    fn dir(&self) -> &Path {
        &self.dir
    }

    fn close(&self) {
        if !self.kv.is_closed() {
            info!(dir = %self.dir.display(), "closing store");
        }
        self.kv.close();
    }

    fn is_closed(&self) -> bool {
        self.kv.is_closed()
    }
}

impl StoreSchema for LocalStore {
    fn schema(&self) -> HashMap<Attr, AttrProps> {
        self.cache().schema.clone()
    }

    fn rschema(&self) -> Rschema {
        self.cache().rschema.clone()
    }

    fn attrs(&self) -> HashMap<Aid, Attr> {
        self.cache().attrs.clone()
    }

    fn max_aid(&self) -> Aid {
        self.cache().max_aid
    }

    fn max_gt(&self) -> Gt {
        self.max_gt.load(Ordering::Acquire)
    }

    fn advance_max_gt(&self) -> Gt {
        self.max_gt.fetch_add(1, Ordering::AcqRel)
    }

    fn set_schema(&self, decls: &[(Attr, AttrSpec)]) -> Result<()> {
        let _guard = self.write_lock.lock();
        for (attr, spec) in decls {
            self.swap_attr_inner(attr, &|props| spec.apply(props))?;
        }
        Ok(())
    }

    fn swap_attr(&self, attr: &str, f: &dyn Fn(AttrProps) -> AttrProps) -> Result<AttrProps> {
        let _guard = self.write_lock.lock();
        self.swap_attr_inner(attr, f)
    }
}

impl StoreWrite for LocalStore {
    fn load_datoms(&self, datoms: &[Datom]) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.kv.is_closed() {
            return Err(Error::Closed);
        }
        for batch in datoms.chunks(TX_BATCH_SIZE) {
            self.load_batch(batch)?;
        }
        debug!(count = datoms.len(), "datoms loaded");
        Ok(())
    }
}

impl StoreRead for LocalStore {
    fn fetch(&self, datom: &Datom) -> Result<Vec<Datom>> {
        let cache = self.cache();
        let Some(props) = cache.schema.get(&datom.a) else {
            return Ok(Vec::new());
        };
        let key = Indexable::exact(datom.e, props.aid, &datom.v).encode(Index::Eav);
        match self.kv.get(self.dbis.eav, &key)? {
            Some(stored) => Ok(vec![self.to_datom(&cache, Index::Eav, &key, &stored)?]),
            None => Ok(Vec::new()),
        }
    }

    fn populated(&self, index: Index, lo: &DatomPattern, hi: &DatomPattern) -> Result<bool> {
        let cache = self.cache();
        let Some((lo, hi)) = self.range_keys(&cache, index, lo, hi)? else {
            return Ok(false);
        };
        Ok(self
            .kv
            .get_first(self.db_for(index), &KeyRange::Closed { lo, hi })?
            .is_some())
    }

    fn size(&self, index: Index, lo: &DatomPattern, hi: &DatomPattern) -> Result<usize> {
        let cache = self.cache();
        let Some((lo, hi)) = self.range_keys(&cache, index, lo, hi)? else {
            return Ok(0);
        };
        self.kv.range_count(self.db_for(index), &KeyRange::Closed { lo, hi })
    }

    fn head(&self, index: Index, lo: &DatomPattern, hi: &DatomPattern) -> Result<Option<Datom>> {
        let cache = self.cache();
        let Some((lo, hi)) = self.range_keys(&cache, index, lo, hi)? else {
            return Ok(None);
        };
        match self.kv.get_first(self.db_for(index), &KeyRange::Closed { lo, hi })? {
            Some((key, stored)) => Ok(Some(self.to_datom(&cache, index, &key, &stored)?)),
            None => Ok(None),
        }
    }

    fn tail(&self, index: Index, lo: &DatomPattern, hi: &DatomPattern) -> Result<Option<Datom>> {
        let cache = self.cache();
        let Some((lo, hi)) = self.range_keys(&cache, index, lo, hi)? else {
            return Ok(None);
        };
        match self
            .kv
            .get_first(self.db_for(index), &KeyRange::ClosedBack { hi, lo })?
        {
            Some((key, stored)) => Ok(Some(self.to_datom(&cache, index, &key, &stored)?)),
            None => Ok(None),
        }
    }

    fn slice(&self, index: Index, lo: &DatomPattern, hi: &DatomPattern) -> Result<Vec<Datom>> {
        self.slice_filter(index, &|_| true, lo, hi)
    }

    fn rslice(&self, index: Index, hi: &DatomPattern, lo: &DatomPattern) -> Result<Vec<Datom>> {
        self.rslice_filter(index, &|_| true, hi, lo)
    }

    fn size_filter(
        &self,
        index: Index,
        pred: DatomPred<'_>,
        lo: &DatomPattern,
        hi: &DatomPattern,
    ) -> Result<usize> {
        let cache = self.cache();
        let Some((lo, hi)) = self.range_keys(&cache, index, lo, hi)? else {
            return Ok(0);
        };
        let mut n = 0;
        self.for_each_datom(index, &KeyRange::Closed { lo, hi }, &mut |d| {
            if pred(&d) {
                n += 1;
            }
            true
        })?;
        Ok(n)
    }

    fn head_filter(
        &self,
        index: Index,
        pred: DatomPred<'_>,
        lo: &DatomPattern,
        hi: &DatomPattern,
    ) -> Result<Option<Datom>> {
        let cache = self.cache();
        let Some((lo, hi)) = self.range_keys(&cache, index, lo, hi)? else {
            return Ok(None);
        };
        let mut found = None;
        self.for_each_datom(index, &KeyRange::Closed { lo, hi }, &mut |d| {
            if pred(&d) {
                found = Some(d);
                false
            } else {
                true
            }
        })?;
        Ok(found)
    }

    fn tail_filter(
        &self,
        index: Index,
        pred: DatomPred<'_>,
        lo: &DatomPattern,
        hi: &DatomPattern,
    ) -> Result<Option<Datom>> {
        let cache = self.cache();
        let Some((lo, hi)) = self.range_keys(&cache, index, lo, hi)? else {
            return Ok(None);
        };
        let mut found = None;
        self.for_each_datom(index, &KeyRange::ClosedBack { hi, lo }, &mut |d| {
            if pred(&d) {
                found = Some(d);
                false
            } else {
                true
            }
        })?;
        Ok(found)
    }

    fn slice_filter(
        &self,
        index: Index,
        pred: DatomPred<'_>,
        lo: &DatomPattern,
        hi: &DatomPattern,
    ) -> Result<Vec<Datom>> {
        let cache = self.cache();
        let Some((lo, hi)) = self.range_keys(&cache, index, lo, hi)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        self.for_each_datom(index, &KeyRange::Closed { lo, hi }, &mut |d| {
            if pred(&d) {
                out.push(d);
            }
            true
        })?;
        Ok(out)
    }

    fn rslice_filter(
        &self,
        index: Index,
        pred: DatomPred<'_>,
        hi: &DatomPattern,
        lo: &DatomPattern,
    ) -> Result<Vec<Datom>> {
        let cache = self.cache();
        let Some((lo, hi)) = self.range_keys(&cache, index, lo, hi)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        self.for_each_datom(index, &KeyRange::ClosedBack { hi, lo }, &mut |d| {
            if pred(&d) {
                out.push(d);
            }
            true
        })?;
        Ok(out)
    }

    fn datom_count(&self, index: Index) -> Result<usize> {
        self.kv.range_count(self.db_for(index), &KeyRange::All)
    }

    fn init_max_eid(&self) -> Result<EntityId> {
        match self.kv.get_first(self.dbis.eav, &KeyRange::AllBack)? {
            Some((key, _)) => Ok(codec::decode(Index::Eav, &key)?.e),
            None => Ok(codec::E0),
        }
    }

    fn last_modified(&self) -> Result<i64> {
        match self.kv.get(self.dbis.meta, meta_keys::LAST_MODIFIED)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::corrupt("malformed last-modified record"))?;
                Ok(i64::from_be_bytes(arr))
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_seeds_implicit_schema() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path(), None).unwrap();
        let schema = store.schema();
        assert!(schema.contains_key("db/ident"));
        assert_eq!(store.max_aid(), 7);
        assert_eq!(store.max_gt(), codec::GT0);
        assert!(store.last_modified().unwrap() > 0);
    }

    #[test]
    fn test_close_fails_fast() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path(), None).unwrap();
        store.close();
        store.close();
        assert!(store.is_closed());
        let d = Datom::add(1, "db/ident", Value::Keyword("x".into()));
        assert!(matches!(store.load_datoms(&[d.clone()]), Err(Error::Closed)));
        // db/ident is in the implicit schema, so fetch reaches the K/V layer
        assert!(matches!(store.fetch(&d), Err(Error::Closed)));
    }

    #[test]
    fn test_advance_max_gt_is_strict() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path(), None).unwrap();
        let first = store.advance_max_gt();
        let second = store.advance_max_gt();
        assert_eq!(second, first + 1);
        assert_eq!(store.max_gt(), first + 2);
    }
}
