//! The ordered key → history map.
//!
//! [`TreeIndex`] maps each live key to its [`KeyIndex`], ordered by
//! unsigned-lexicographic byte comparison. A single readers/writer lock
//! serializes structural mutation; reads share the lock. Compaction
//! snapshots the membership under a brief exclusive section and then
//! revisits one key at a time, so writers interleave with the walk.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{error, info};

use strata_error::{IndexError, IndexResult};
use strata_types::Revision;

use crate::key_index::{GetResult, KeyIndex};
use crate::observability::{observe_get_value_size, observe_range_value_size};

// ---------------------------------------------------------------------------
// Index trait
// ---------------------------------------------------------------------------

/// The operation set the transactional layer programs against.
///
/// One tree-backed implementation exists today; the trait keeps test
/// doubles and future sharded variants possible. Throughout, `end` is
/// `None` (or zero-length, treated identically) for a single-key operation
/// and otherwise bounds the half-open key interval `[key, end)`; callers
/// express "all keys" with a sentinel max key.
pub trait Index {
    /// Register a write of `key` at `rev`.
    ///
    /// # Errors
    ///
    /// `RevisionOutOfOrder` if `rev` is not strictly newer than the key's
    /// last modification.
    fn put(&self, key: &[u8], rev: Revision, value_size: i32) -> IndexResult<()>;

    /// Point-in-time lookup of `key` as of `at_rev` (`0` reads current).
    ///
    /// # Errors
    ///
    /// `RevisionNotFound` if the key does not exist at `at_rev`.
    fn get(&self, key: &[u8], at_rev: i64) -> IndexResult<GetResult>;

    /// Keys in `[key, end)` visible at `at_rev`, with their revisions, in
    /// key order.
    fn range(&self, key: &[u8], end: Option<&[u8]>, at_rev: i64)
    -> (Vec<Vec<u8>>, Vec<Revision>);

    /// Like [`range`](Self::range), but returns at most `limit` revisions
    /// (all of them when `limit <= 0`) together with the total match count,
    /// so the caller can detect truncation.
    fn revisions(
        &self,
        key: &[u8],
        end: Option<&[u8]>,
        at_rev: i64,
        limit: i64,
    ) -> (Vec<Revision>, i64);

    /// Number of keys in `[key, end)` visible at `at_rev`.
    fn count_revisions(&self, key: &[u8], end: Option<&[u8]>, at_rev: i64) -> i64;

    /// Payload size of the most recent write of `key`, independent of any
    /// historical revision. `None` if the key is not in the index.
    fn get_value_size(&self, key: &[u8]) -> Option<i32>;

    /// Keys in `[key, end)` with the payload sizes of their most recent
    /// writes.
    fn range_value_size(&self, key: &[u8], end: Option<&[u8]>) -> (Vec<Vec<u8>>, Vec<i32>);

    /// Tombstone `key` at `rev`.
    ///
    /// # Errors
    ///
    /// `RevisionNotFound` if the key is absent; `Unavailable` if it has no
    /// live generation; `RevisionOutOfOrder` if `rev` is stale.
    fn tombstone(&self, key: &[u8], rev: Revision) -> IndexResult<()>;

    /// Every revision of every key in `[key, end)` with `main >= rev`,
    /// sorted ascending by revision across keys.
    fn range_since(&self, key: &[u8], end: Option<&[u8]>, rev: i64) -> Vec<Revision>;

    /// Destructively prune history obsolete at `at_rev`; returns the live
    /// set of revisions that survive.
    fn compact(&self, at_rev: i64) -> HashSet<Revision>;

    /// Compute the live set a compaction at `at_rev` would leave, without
    /// mutating anything.
    fn keep(&self, at_rev: i64) -> HashSet<Revision>;

    /// Unconditional insert/replace of a whole key history; used by
    /// restore-from-log paths. No validation.
    fn insert(&self, key_index: KeyIndex);

    /// A copy of the full history of `key`, if present. Callers never see
    /// shared mutable state.
    fn key_index(&self, key: &[u8]) -> Option<KeyIndex>;

    /// Structural equality with another index of the same implementation.
    fn equal(&self, other: &Self) -> bool
    where
        Self: Sized;
}

// ---------------------------------------------------------------------------
// TreeIndex
// ---------------------------------------------------------------------------

/// `None` and a zero-length end both mean "single key"; unbounded scans
/// are not expressible at this layer.
fn normalize_end(end: Option<&[u8]>) -> Option<&[u8]> {
    end.filter(|e| !e.is_empty())
}

/// Tree-backed [`Index`].
///
/// A `BTreeMap` keyed by the raw key bytes provides the ordering and
/// ascending range scans; `parking_lot::RwLock` provides the shared-reader
/// single-writer discipline.
#[derive(Debug, Default)]
pub struct TreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, KeyIndex>>,
}

impl TreeIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently in the index (live or tombstoned).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    /// Whether the index holds no keys at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    /// Visit the histories of keys in `[key, end)` in ascending key order
    /// under the shared lock, until `f` returns `false`.
    fn visit(&self, key: &[u8], end: &[u8], mut f: impl FnMut(&KeyIndex) -> bool) {
        if key > end {
            return;
        }
        let tree = self.tree.read();
        for ki in tree
            .range::<[u8], _>((Bound::Included(key), Bound::Excluded(end)))
            .map(|(_, ki)| ki)
        {
            if !f(ki) {
                break;
            }
        }
    }

    fn put_impl(&self, key: &[u8], rev: Revision, value_size: i32) -> IndexResult<()> {
        let mut tree = self.tree.write();
        match tree.get_mut(key) {
            Some(ki) => ki.put(rev, value_size),
            None => {
                let mut ki = KeyIndex::new(key.to_vec());
                ki.put(rev, value_size)?;
                tree.insert(key.to_vec(), ki);
                Ok(())
            }
        }
    }

    fn get_impl(&self, key: &[u8], at_rev: i64) -> IndexResult<GetResult> {
        let tree = self.tree.read();
        tree.get(key)
            .ok_or(IndexError::RevisionNotFound)?
            .get(at_rev)
    }

    fn range_impl(
        &self,
        key: &[u8],
        end: Option<&[u8]>,
        at_rev: i64,
    ) -> (Vec<Vec<u8>>, Vec<Revision>) {
        let Some(end) = normalize_end(end) else {
            return match self.get_impl(key, at_rev) {
                Ok(found) => (vec![key.to_vec()], vec![found.modified]),
                Err(_) => (Vec::new(), Vec::new()),
            };
        };
        let mut keys = Vec::new();
        let mut revs = Vec::new();
        self.visit(key, end, |ki| {
            if let Ok(found) = ki.get(at_rev) {
                keys.push(ki.key().to_vec());
                revs.push(found.modified);
            }
            true
        });
        (keys, revs)
    }

    fn revisions_impl(
        &self,
        key: &[u8],
        end: Option<&[u8]>,
        at_rev: i64,
        limit: i64,
    ) -> (Vec<Revision>, i64) {
        let Some(end) = normalize_end(end) else {
            return match self.get_impl(key, at_rev) {
                Ok(found) => (vec![found.modified], 1),
                Err(_) => (Vec::new(), 0),
            };
        };
        let mut revs: Vec<Revision> = Vec::new();
        let mut total = 0_i64;
        self.visit(key, end, |ki| {
            if let Ok(found) = ki.get(at_rev) {
                // `limit <= 0` means unlimited; `total` counts matches
                // regardless so truncation is detectable.
                if limit <= 0 || (revs.len() as i64) < limit {
                    revs.push(found.modified);
                }
                total += 1;
            }
            true
        });
        (revs, total)
    }

    fn count_revisions_impl(&self, key: &[u8], end: Option<&[u8]>, at_rev: i64) -> i64 {
        let Some(end) = normalize_end(end) else {
            return i64::from(self.get_impl(key, at_rev).is_ok());
        };
        let mut total = 0_i64;
        self.visit(key, end, |ki| {
            if ki.get(at_rev).is_ok() {
                total += 1;
            }
            true
        });
        total
    }

    fn get_value_size_impl(&self, key: &[u8]) -> Option<i32> {
        let start = Instant::now();
        let size = self.tree.read().get(key).map(KeyIndex::value_size);
        observe_get_value_size(start.elapsed());
        size
    }

    fn range_value_size_impl(&self, key: &[u8], end: Option<&[u8]>) -> (Vec<Vec<u8>>, Vec<i32>) {
        let start = Instant::now();
        let result = match normalize_end(end) {
            None => match self.tree.read().get(key) {
                Some(ki) => (vec![key.to_vec()], vec![ki.value_size()]),
                None => (Vec::new(), Vec::new()),
            },
            Some(end) => {
                let mut keys = Vec::new();
                let mut sizes = Vec::new();
                self.visit(key, end, |ki| {
                    keys.push(ki.key().to_vec());
                    sizes.push(ki.value_size());
                    true
                });
                (keys, sizes)
            }
        };
        observe_range_value_size(start.elapsed());
        result
    }

    fn tombstone_impl(&self, key: &[u8], rev: Revision) -> IndexResult<()> {
        let mut tree = self.tree.write();
        let ki = tree.get_mut(key).ok_or(IndexError::RevisionNotFound)?;
        ki.tombstone(rev)
    }

    fn range_since_impl(&self, key: &[u8], end: Option<&[u8]>, rev: i64) -> Vec<Revision> {
        let Some(end) = normalize_end(end) else {
            return self
                .tree
                .read()
                .get(key)
                .map(|ki| ki.since(rev))
                .unwrap_or_default();
        };
        let mut revs = Vec::new();
        self.visit(key, end, |ki| {
            revs.extend(ki.since(rev));
            true
        });
        // Per-key outputs are ascending, but interleavings across keys are
        // not in revision order.
        revs.sort_unstable();
        revs
    }

    fn compact_impl(&self, at_rev: i64) -> HashSet<Revision> {
        let mut available = HashSet::new();
        info!(revision = at_rev, "compact tree index");

        // Brief exclusive section: snapshot the membership so the per-key
        // walk below can interleave with live writers.
        let keys: Vec<Vec<u8>> = {
            let tree = self.tree.write();
            tree.keys().cloned().collect()
        };

        for key in keys {
            let mut tree = self.tree.write();
            let Some(ki) = tree.get_mut(&key) else {
                // Only compaction removes entries and there is one
                // compactor; a missing key means the index is corrupt.
                error!(
                    key = ?String::from_utf8_lossy(&key),
                    "compaction lost track of a key in the live tree"
                );
                panic!("tree index compaction: key vanished from the live tree");
            };
            ki.compact(at_rev, &mut available);
            if ki.is_empty() {
                tree.remove(&key);
            }
        }
        available
    }

    fn keep_impl(&self, at_rev: i64) -> HashSet<Revision> {
        let mut available = HashSet::new();
        let tree = self.tree.read();
        for ki in tree.values() {
            ki.keep(at_rev, &mut available);
        }
        available
    }

    fn insert_impl(&self, ki: KeyIndex) {
        let mut tree = self.tree.write();
        tree.insert(ki.key().to_vec(), ki);
    }

    fn key_index_impl(&self, key: &[u8]) -> Option<KeyIndex> {
        self.tree.read().get(key).cloned()
    }

    fn equal_impl(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let a = self.tree.read();
        let b = other.tree.read();
        a.len() == b.len() && a.values().zip(b.values()).all(|(x, y)| x.equal(y))
    }
}

impl Index for TreeIndex {
    fn put(&self, key: &[u8], rev: Revision, value_size: i32) -> IndexResult<()> {
        self.put_impl(key, rev, value_size)
    }

    fn get(&self, key: &[u8], at_rev: i64) -> IndexResult<GetResult> {
        self.get_impl(key, at_rev)
    }

    fn range(
        &self,
        key: &[u8],
        end: Option<&[u8]>,
        at_rev: i64,
    ) -> (Vec<Vec<u8>>, Vec<Revision>) {
        self.range_impl(key, end, at_rev)
    }

    fn revisions(
        &self,
        key: &[u8],
        end: Option<&[u8]>,
        at_rev: i64,
        limit: i64,
    ) -> (Vec<Revision>, i64) {
        self.revisions_impl(key, end, at_rev, limit)
    }

    fn count_revisions(&self, key: &[u8], end: Option<&[u8]>, at_rev: i64) -> i64 {
        self.count_revisions_impl(key, end, at_rev)
    }

    fn get_value_size(&self, key: &[u8]) -> Option<i32> {
        self.get_value_size_impl(key)
    }

    fn range_value_size(&self, key: &[u8], end: Option<&[u8]>) -> (Vec<Vec<u8>>, Vec<i32>) {
        self.range_value_size_impl(key, end)
    }

    fn tombstone(&self, key: &[u8], rev: Revision) -> IndexResult<()> {
        self.tombstone_impl(key, rev)
    }

    fn range_since(&self, key: &[u8], end: Option<&[u8]>, rev: i64) -> Vec<Revision> {
        self.range_since_impl(key, end, rev)
    }

    fn compact(&self, at_rev: i64) -> HashSet<Revision> {
        self.compact_impl(at_rev)
    }

    fn keep(&self, at_rev: i64) -> HashSet<Revision> {
        self.keep_impl(at_rev)
    }

    fn insert(&self, key_index: KeyIndex) {
        self.insert_impl(key_index);
    }

    fn key_index(&self, key: &[u8]) -> Option<KeyIndex> {
        self.key_index_impl(key)
    }

    fn equal(&self, other: &Self) -> bool {
        self.equal_impl(other)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
