//! LMDB adapter - the ordered K/V substrate
//!
//! Thin wrapper over an LMDB environment with named sub-databases. The
//! store consumes four capabilities from it: atomic multi-key batched
//! writes, point gets, bidirectional range scans, and named sub-database
//! management. All key ordering lives in the codec; every sub-database uses
//! LMDB's plain byte comparator.
//!
//! Scans collect nothing themselves: callers pass a visitor that copies out
//! whatever it needs, so cursors and read transactions never escape this
//! module. The environment slot sits behind a `RwLock<Option<_>>` so `close`
//! can release it while concurrent readers fail fast with `Closed`.

use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use lmdb_sys as ffi;
use parking_lot::RwLock;
use std::os::raw::c_uint;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default LMDB map size: 1 GiB, grown by reopening with a larger value
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// One write in an atomic batch
pub enum KvOp {
    /// Upsert `key -> val` in one sub-database
    Put {
        db: Database,
        key: Vec<u8>,
        val: Vec<u8>,
    },
    /// Delete `key` from one sub-database; deleting an absent key is a no-op
    Del { db: Database, key: Vec<u8> },
}

/// Range specification over one sub-database, closed on both ends
pub enum KeyRange {
    /// Every entry, ascending
    All,
    /// Every entry, descending
    AllBack,
    /// `[lo, hi]`, ascending
    Closed { lo: Vec<u8>, hi: Vec<u8> },
    /// `[hi, lo]`, descending
    ClosedBack { hi: Vec<u8>, lo: Vec<u8> },
}

/// An open LMDB environment plus lifecycle state
pub struct Kv {
    env: RwLock<Option<Environment>>,
    path: PathBuf,
}

impl Kv {
    /// Open (creating if needed) the environment at `path`
    pub fn open(path: &Path, max_dbs: u32, map_size: usize) -> Result<Self> {
        std::fs::create_dir_all(path)?;
        let mut builder = Environment::new();
        builder.set_max_dbs(max_dbs);
        builder.set_map_size(map_size);
        let env = builder.open(path)?;
        Ok(Self {
            env: RwLock::new(Some(env)),
            path: path.to_path_buf(),
        })
    }

    /// Directory backing this environment
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open (creating if needed) a named sub-database
    pub fn open_db(&self, name: &str) -> Result<Database> {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(Error::Closed)?;
        Ok(env.create_db(Some(name), DatabaseFlags::empty())?)
    }

    /// Release the environment; idempotent
    pub fn close(&self) {
        *self.env.write() = None;
    }

    /// Check whether the environment has been released
    pub fn is_closed(&self) -> bool {
        self.env.read().is_none()
    }

    /// Commit a batch of writes in one transaction
    ///
    /// Either every op lands or none does; a failed commit leaves no trace.
    pub fn transact(&self, ops: Vec<KvOp>) -> Result<()> {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(Error::Closed)?;
        let mut txn = env.begin_rw_txn()?;
        for op in &ops {
            match op {
                KvOp::Put { db, key, val } => txn.put(*db, key, val, WriteFlags::empty())?,
                KvOp::Del { db, key } => match txn.del(*db, key, None) {
                    Ok(()) | Err(lmdb::Error::NotFound) => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Point lookup
    pub fn get(&self, db: Database, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(Error::Closed)?;
        let txn = env.begin_ro_txn()?;
        match txn.get(db, &key) {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Walk a range, calling `visit` per entry until it returns `false` or
    /// the range is exhausted
    ///
    /// The visitor sees borrowed slices; it must copy out anything it keeps.
    pub fn scan<F>(&self, db: Database, range: &KeyRange, visit: &mut F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let guard = self.env.read();
        let env = guard.as_ref().ok_or(Error::Closed)?;
        let txn = env.begin_ro_txn()?;
        let cursor = txn.open_ro_cursor(db)?;
        match range {
            KeyRange::All => scan_fwd(&cursor, None, None, visit),
            KeyRange::Closed { lo, hi } => scan_fwd(&cursor, Some(lo), Some(hi), visit),
            KeyRange::AllBack => scan_back(&cursor, None, None, visit),
            KeyRange::ClosedBack { hi, lo } => scan_back(&cursor, Some(hi), Some(lo), visit),
        }
    }

    /// First entry of a range, copied out
    pub fn get_first(&self, db: Database, range: &KeyRange) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut first = None;
        self.scan(db, range, &mut |k, v| {
            first = Some((k.to_vec(), v.to_vec()));
            false
        })?;
        Ok(first)
    }

    /// Exact entry count of a range
    pub fn range_count(&self, db: Database, range: &KeyRange) -> Result<usize> {
        let mut n = 0;
        self.scan(db, range, &mut |_, _| {
            n += 1;
            true
        })?;
        Ok(n)
    }

    /// Materialize a range in scan order
    pub fn get_range(&self, db: Database, range: &KeyRange) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        self.scan(db, range, &mut |k, v| {
            out.push((k.to_vec(), v.to_vec()));
            true
        })?;
        Ok(out)
    }
}

/// Ascending walk: from the first key (or the first key `>= lo`) up to `hi`
fn scan_fwd<'txn, F>(
    cursor: &lmdb::RoCursor<'txn>,
    lo: Option<&[u8]>,
    hi: Option<&[u8]>,
    visit: &mut F,
) -> Result<()>
where
    F: FnMut(&[u8], &[u8]) -> bool,
{
    let mut pos = match lo {
        None => cursor_get(cursor, None, ffi::MDB_FIRST)?,
        Some(lo) => cursor_get(cursor, Some(lo), ffi::MDB_SET_RANGE)?,
    };
    while let Some((k, v)) = pos {
        if let Some(hi) = hi {
            if k > hi {
                break;
            }
        }
        if !visit(k, v) {
            break;
        }
        pos = cursor_get(cursor, None, ffi::MDB_NEXT)?;
    }
    Ok(())
}

/// Descending walk: from the last key (or the last key `<= hi`) down to `lo`
fn scan_back<'txn, F>(
    cursor: &lmdb::RoCursor<'txn>,
    hi: Option<&[u8]>,
    lo: Option<&[u8]>,
    visit: &mut F,
) -> Result<()>
where
    F: FnMut(&[u8], &[u8]) -> bool,
{
    let mut pos = match hi {
        None => cursor_get(cursor, None, ffi::MDB_LAST)?,
        Some(hi) => match cursor_get(cursor, Some(hi), ffi::MDB_SET_RANGE)? {
            // SET_RANGE lands on the first key >= hi; step back when it
            // overshoots, fall back to the last key when past the end
            Some((k, v)) if k <= hi => Some((k, v)),
            Some(_) => cursor_get(cursor, None, ffi::MDB_PREV)?,
            None => cursor_get(cursor, None, ffi::MDB_LAST)?,
        },
    };
    while let Some((k, v)) = pos {
        if let Some(lo) = lo {
            if k < lo {
                break;
            }
        }
        if !visit(k, v) {
            break;
        }
        pos = cursor_get(cursor, None, ffi::MDB_PREV)?;
    }
    Ok(())
}

fn cursor_get<'txn>(
    cursor: &lmdb::RoCursor<'txn>,
    key: Option<&[u8]>,
    op: c_uint,
) -> Result<Option<(&'txn [u8], &'txn [u8])>> {
    match cursor.get(key, None, op) {
        Ok((Some(k), v)) => Ok(Some((k, v))),
        Ok((None, _)) => Ok(None),
        Err(lmdb::Error::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_kv() -> (TempDir, Kv, Database) {
        let dir = TempDir::new().unwrap();
        let kv = Kv::open(dir.path(), 2, 1 << 24).unwrap();
        let db = kv.open_db("test").unwrap();
        (dir, kv, db)
    }

    fn put(db: Database, key: &[u8], val: &[u8]) -> KvOp {
        KvOp::Put {
            db,
            key: key.to_vec(),
            val: val.to_vec(),
        }
    }

    #[test]
    fn test_transact_and_get() {
        let (_dir, kv, db) = open_kv();
        kv.transact(vec![put(db, b"a", b"1"), put(db, b"b", b"2")]).unwrap();
        assert_eq!(kv.get(db, b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(kv.get(db, b"zz").unwrap(), None);

        // Deleting an absent key inside a batch is a no-op
        kv.transact(vec![
            KvOp::Del { db, key: b"nope".to_vec() },
            KvOp::Del { db, key: b"a".to_vec() },
        ])
        .unwrap();
        assert_eq!(kv.get(db, b"a").unwrap(), None);
    }

    #[test]
    fn test_closed_range_scans() {
        let (_dir, kv, db) = open_kv();
        let keys: Vec<Vec<u8>> = (0u8..10).map(|i| vec![i]).collect();
        kv.transact(keys.iter().map(|k| put(db, k, k)).collect()).unwrap();

        let range = KeyRange::Closed { lo: vec![2], hi: vec![5] };
        assert_eq!(kv.range_count(db, &range).unwrap(), 4);
        let fwd = kv.get_range(db, &range).unwrap();
        assert_eq!(fwd.first().unwrap().0, vec![2]);
        assert_eq!(fwd.last().unwrap().0, vec![5]);

        let back = KeyRange::ClosedBack { hi: vec![5], lo: vec![2] };
        let bwd = kv.get_range(db, &back).unwrap();
        assert_eq!(bwd.len(), 4);
        assert_eq!(bwd.first().unwrap().0, vec![5]);
        assert_eq!(bwd.last().unwrap().0, vec![2]);
    }

    #[test]
    fn test_back_scan_bounds_between_keys() {
        let (_dir, kv, db) = open_kv();
        kv.transact(vec![put(db, &[2], b"x"), put(db, &[4], b"y"), put(db, &[9], b"z")])
            .unwrap();
        // hi falls between stored keys
        let back = KeyRange::ClosedBack { hi: vec![7], lo: vec![0] };
        let got = kv.get_range(db, &back).unwrap();
        assert_eq!(got.iter().map(|(k, _)| k[0]).collect::<Vec<_>>(), vec![4, 2]);
        // hi past the end of the database
        let back = KeyRange::ClosedBack { hi: vec![200], lo: vec![3] };
        let got = kv.get_range(db, &back).unwrap();
        assert_eq!(got.iter().map(|(k, _)| k[0]).collect::<Vec<_>>(), vec![9, 4]);
    }

    #[test]
    fn test_all_back_on_empty_db() {
        let (_dir, kv, db) = open_kv();
        assert_eq!(kv.get_first(db, &KeyRange::AllBack).unwrap(), None);
        assert_eq!(kv.range_count(db, &KeyRange::All).unwrap(), 0);
    }

    #[test]
    fn test_close_is_idempotent_and_fails_fast() {
        let (_dir, kv, db) = open_kv();
        assert!(!kv.is_closed());
        kv.close();
        kv.close();
        assert!(kv.is_closed());
        assert!(matches!(kv.get(db, b"a"), Err(Error::Closed)));
        assert!(matches!(kv.transact(vec![]), Err(Error::Closed)));
    }
}
