//! Per-key revision history.
//!
//! A [`KeyIndex`] tracks one key's lifetime as a sequence of
//! [`Generation`]s. Each generation runs from the revision that created (or
//! revived) the key up to and including the tombstone that deletes it; a
//! tombstone closes the current generation and opens a fresh empty one, so
//! the last generation is always either live (unterminated) or empty
//! (awaiting revival).
//!
//! The tree index owns every `KeyIndex`; callers outside this crate only
//! ever see copied revisions.

use std::collections::HashSet;
use std::fmt;

use smallvec::SmallVec;
use tracing::warn;

use strata_error::{IndexError, IndexResult};
use strata_types::Revision;

use crate::observability::{record_key_created, record_key_tombstoned};

// ---------------------------------------------------------------------------
// GetResult
// ---------------------------------------------------------------------------

/// Result of a point-in-time lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetResult {
    /// The revision visible at the queried point in time; this is what the
    /// caller fetches from the value store. May be a tombstone revision —
    /// the index does not mark it, the value store does.
    pub modified: Revision,
    /// The revision that opened the generation containing `modified`.
    pub created: Revision,
    /// Version number of `modified` within its generation (1-based).
    pub version: i64,
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// One lifespan of a key: from creation (or revival after a tombstone) up
/// to and including the tombstone that closes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    /// The revision that opened this generation.
    created: Revision,
    /// Version count within this generation. Equals `revs.len()` for any
    /// history built through `put`/`tombstone`; a restored history carries
    /// the version count from the persistent log instead.
    ver: i64,
    /// Revisions applied in this generation, strictly increasing. The last
    /// element is the tombstone iff the generation is closed.
    revs: SmallVec<[Revision; 4]>,
}

impl Generation {
    /// Whether this generation holds no revisions. An empty generation is
    /// only ever the sentinel tail of a tombstoned key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revs.is_empty()
    }

    /// The revision that opened this generation.
    #[must_use]
    pub fn created(&self) -> Revision {
        self.created
    }

    /// Version count within this generation.
    #[must_use]
    pub fn ver(&self) -> i64 {
        self.ver
    }

    /// The revisions applied in this generation, oldest first.
    #[must_use]
    pub fn revs(&self) -> &[Revision] {
        &self.revs
    }

    /// Walk the revisions newest to oldest while `pred` holds. Returns the
    /// index of the first revision that fails `pred`, or `None` if every
    /// revision satisfies it.
    fn walk(&self, pred: impl Fn(Revision) -> bool) -> Option<usize> {
        (0..self.revs.len()).rev().find(|&i| !pred(self.revs[i]))
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "created: {}, ver: {}, revs: [", self.created, self.ver)?;
        for (i, rev) in self.revs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{rev}")?;
        }
        f.write_str("]")
    }
}

// ---------------------------------------------------------------------------
// KeyIndex
// ---------------------------------------------------------------------------

/// The full revision history of one key.
///
/// Generations are append-only and ordered by creation. Concatenating their
/// revisions yields a strictly increasing sequence whose maximum is
/// [`modified`](Self::modified). A `KeyIndex` left with nothing but its
/// empty tail generation is dead and must be removed from the tree.
#[derive(Debug, Clone)]
pub struct KeyIndex {
    key: Vec<u8>,
    modified: Revision,
    generations: Vec<Generation>,
    value_size: i32,
}

impl KeyIndex {
    /// A fresh, empty history for `key`: one empty tail generation.
    #[must_use]
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key,
            modified: Revision::ZERO,
            generations: vec![Generation::default()],
            value_size: 0,
        }
    }

    /// The key this history belongs to.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The most recent revision applied to any generation.
    #[must_use]
    pub fn modified(&self) -> Revision {
        self.modified
    }

    /// Payload size of the value at `modified`. Undefined after a
    /// tombstone; reflects the most recent write otherwise.
    #[must_use]
    pub fn value_size(&self) -> i32 {
        self.value_size
    }

    /// The generations of this history, oldest first.
    #[must_use]
    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }

    /// Whether the history is dead: exactly one generation and it is empty.
    /// Dead histories must be deleted from the tree index.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generations.len() == 1 && self.generations[0].is_empty()
    }

    /// Append a write at `rev`.
    ///
    /// # Errors
    ///
    /// `RevisionOutOfOrder` if `rev` is not strictly greater than
    /// `modified`.
    pub fn put(&mut self, rev: Revision, value_size: i32) -> IndexResult<()> {
        if !rev.greater_than(self.modified) {
            warn!(
                key = ?String::from_utf8_lossy(&self.key),
                attempted = %rev,
                modified = %self.modified,
                "rejected out-of-order revision"
            );
            return Err(IndexError::RevisionOutOfOrder {
                attempted: rev,
                modified: self.modified,
            });
        }

        let g = self
            .generations
            .last_mut()
            .expect("a key index always holds at least one generation");
        if g.revs.is_empty() {
            // First write of a fresh key, or revival after a tombstone.
            g.created = rev;
            record_key_created();
        }
        g.revs.push(rev);
        g.ver += 1;
        self.modified = rev;
        self.value_size = value_size;
        Ok(())
    }

    /// Close the current generation with a tombstone at `rev` and open a
    /// fresh empty one.
    ///
    /// # Errors
    ///
    /// `Unavailable` if there is no live generation to close;
    /// `RevisionOutOfOrder` if `rev` is not strictly greater than
    /// `modified`.
    pub fn tombstone(&mut self, rev: Revision) -> IndexResult<()> {
        if self
            .generations
            .last()
            .is_none_or(Generation::is_empty)
        {
            return Err(IndexError::Unavailable);
        }
        self.put(rev, 0)?;
        self.generations.push(Generation::default());
        record_key_tombstoned();
        Ok(())
    }

    /// Rebuild the newest state of a key from the persistent log.
    ///
    /// The restored generation holds only `modified` but carries the full
    /// `ver` from the log, so version numbers survive a restart.
    ///
    /// # Panics
    ///
    /// Panics if this history already holds revisions; restoring is only
    /// legal on a fresh entry.
    pub fn restore(&mut self, created: Revision, modified: Revision, ver: i64) {
        assert!(
            self.is_empty(),
            "restore on a non-empty key index: {self}"
        );
        self.modified = modified;
        self.generations = vec![Generation {
            created,
            ver,
            revs: SmallVec::from_slice(&[modified]),
        }];
        record_key_created();
    }

    /// Point-in-time lookup: the revision visible at `at_rev`, with its
    /// generation's creation revision and version number. `at_rev == 0`
    /// reads the current state.
    ///
    /// A lookup landing exactly on a tombstone revision returns it as a
    /// normal revision; a lookup strictly past a closed generation's
    /// tombstone falls in a tombstoned gap.
    ///
    /// # Errors
    ///
    /// `RevisionNotFound` if `at_rev` predates the key's creation or falls
    /// inside a tombstoned gap.
    pub fn get(&self, at_rev: i64) -> IndexResult<GetResult> {
        let at_rev = if at_rev == 0 {
            self.modified.main
        } else {
            at_rev
        };

        let (gi, g) = self
            .find_generation(at_rev)
            .ok_or(IndexError::RevisionNotFound)?;
        let n = g
            .walk(|rev| rev.greater_than_main(at_rev))
            .ok_or(IndexError::RevisionNotFound)?;
        let rev = g.revs[n];

        // A closed generation's tombstone answers only the lookup that
        // lands on it exactly; past it the key is in a tombstoned gap.
        let closed = gi != self.generations.len() - 1;
        if closed && n == g.revs.len() - 1 && rev.main < at_rev {
            return Err(IndexError::RevisionNotFound);
        }

        let behind =
            i64::try_from(g.revs.len() - n - 1).expect("generation length overflows i64");
        Ok(GetResult {
            modified: rev,
            created: g.created,
            version: g.ver - behind,
        })
    }

    /// All revisions with `main >= rev`, ascending.
    #[must_use]
    pub fn since(&self, rev: i64) -> Vec<Revision> {
        let mut revs = Vec::new();
        'generations: for g in self.generations.iter().rev() {
            for &r in g.revs.iter().rev() {
                if !r.greater_than_or_equal_main(rev) {
                    // Revisions only grow across the history; everything
                    // older is below `rev` as well.
                    break 'generations;
                }
                revs.push(r);
            }
        }
        revs.reverse();
        revs
    }

    /// Drop history made obsolete by a compaction at `at_rev` and record
    /// every surviving revision in `available`.
    ///
    /// Leading generations whose tombstone is at or below `at_rev` are
    /// removed outright. In the surviving first generation, revisions
    /// strictly before the pivot (the revision `get(at_rev)` resolves to)
    /// are removed and `ver` is clipped to the remaining count. A closed
    /// generation reduced to its tombstone stays as a terminator and dies
    /// at the next compaction that advances past it.
    pub fn compact(&mut self, at_rev: i64, available: &mut HashSet<Revision>) {
        if self.is_empty() {
            return;
        }
        let (gen_idx, rev_idx) = self.plan_compaction(at_rev);

        if let Some(idx) = rev_idx {
            let g = &mut self.generations[gen_idx];
            if idx > 0 {
                g.revs.drain(..idx);
                g.ver = i64::try_from(g.revs.len()).expect("generation length overflows i64");
            }
        }
        self.generations.drain(..gen_idx);

        for g in &self.generations {
            for &rev in g.revs() {
                available.insert(rev);
            }
        }
    }

    /// Record in `available` exactly what [`compact`](Self::compact) at
    /// `at_rev` would leave behind, without mutating anything. Used to
    /// compute the live set before destructive compaction.
    pub fn keep(&self, at_rev: i64, available: &mut HashSet<Revision>) {
        if self.is_empty() {
            return;
        }
        let (gen_idx, rev_idx) = self.plan_compaction(at_rev);

        for (gi, g) in self.generations.iter().enumerate().skip(gen_idx) {
            let start = if gi == gen_idx {
                rev_idx.unwrap_or(0)
            } else {
                0
            };
            for &rev in &g.revs[start..] {
                available.insert(rev);
            }
        }
    }

    /// Structural equality: key bytes, `modified`, and every generation.
    /// `value_size` is deliberately excluded; it is quota bookkeeping, not
    /// history.
    #[must_use]
    pub fn equal(&self, other: &Self) -> bool {
        self.key == other.key
            && self.modified == other.modified
            && self.generations == other.generations
    }

    /// Locate the compaction pivot: the index of the generation that
    /// answers `get(at_rev)` and, within it, the index of the pivot
    /// revision (`None` if every revision in that generation is newer
    /// than `at_rev`).
    fn plan_compaction(&self, at_rev: i64) -> (usize, Option<usize>) {
        let mut gen_idx = 0;
        while gen_idx < self.generations.len() - 1 {
            if let Some(&tomb) = self.generations[gen_idx].revs.last() {
                if tomb.greater_than_main(at_rev) {
                    break;
                }
            }
            gen_idx += 1;
        }
        let rev_idx = self.generations[gen_idx].walk(|rev| rev.greater_than_main(at_rev));
        (gen_idx, rev_idx)
    }

    /// The youngest non-empty generation whose first revision is at or
    /// below `at_rev`, with its index.
    fn find_generation(&self, at_rev: i64) -> Option<(usize, &Generation)> {
        self.generations
            .iter()
            .enumerate()
            .rev()
            .find(|(_, g)| !g.is_empty() && !g.revs[0].greater_than_main(at_rev))
    }
}

impl fmt::Display for KeyIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key: {:?}, modified: {}",
            String::from_utf8_lossy(&self.key),
            self.modified
        )?;
        for g in &self.generations {
            write!(f, "\n\t{g}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rev(main: i64, sub: i64) -> Revision {
        Revision::new(main, sub)
    }

    /// Helper: a key index with the history
    /// `put@2.0, put@3.0, tombstone@4.0, put@5.0`.
    fn two_generation_key() -> KeyIndex {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(2, 0), 10).unwrap();
        ki.put(rev(3, 0), 12).unwrap();
        ki.tombstone(rev(4, 0)).unwrap();
        ki.put(rev(5, 0), 7).unwrap();
        ki
    }

    // -----------------------------------------------------------------------
    // put / tombstone
    // -----------------------------------------------------------------------

    #[test]
    fn test_put_builds_a_single_generation() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(2, 0), 10).unwrap();
        ki.put(rev(3, 1), 12).unwrap();

        assert_eq!(ki.generations().len(), 1);
        let g = &ki.generations()[0];
        assert_eq!(g.created(), rev(2, 0));
        assert_eq!(g.ver(), 2);
        assert_eq!(g.revs(), &[rev(2, 0), rev(3, 1)]);
        assert_eq!(ki.modified(), rev(3, 1));
        assert_eq!(ki.value_size(), 12);
    }

    #[test]
    fn test_put_rejects_out_of_order_revision() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(5, 0), 1).unwrap();

        let err = ki.put(rev(5, 0), 1).unwrap_err();
        assert_eq!(
            err,
            IndexError::RevisionOutOfOrder {
                attempted: rev(5, 0),
                modified: rev(5, 0),
            }
        );
        assert_eq!(ki.put(rev(4, 9), 1).unwrap_err(), IndexError::RevisionOutOfOrder {
            attempted: rev(4, 9),
            modified: rev(5, 0),
        });
    }

    #[test]
    fn test_tombstone_closes_and_opens_generations() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(2, 0), 10).unwrap();
        ki.tombstone(rev(3, 0)).unwrap();

        assert_eq!(ki.generations().len(), 2);
        assert_eq!(ki.generations()[0].revs(), &[rev(2, 0), rev(3, 0)]);
        assert!(ki.generations()[1].is_empty());
        assert!(!ki.is_empty());
        assert_eq!(ki.modified(), rev(3, 0));
    }

    #[test]
    fn test_tombstone_without_live_generation_is_unavailable() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        assert_eq!(ki.tombstone(rev(1, 0)).unwrap_err(), IndexError::Unavailable);

        ki.put(rev(2, 0), 1).unwrap();
        ki.tombstone(rev(3, 0)).unwrap();
        assert_eq!(ki.tombstone(rev(4, 0)).unwrap_err(), IndexError::Unavailable);
    }

    #[test]
    fn test_tombstone_rejects_out_of_order_revision() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(5, 0), 1).unwrap();
        assert_eq!(
            ki.tombstone(rev(5, 0)).unwrap_err(),
            IndexError::RevisionOutOfOrder {
                attempted: rev(5, 0),
                modified: rev(5, 0),
            }
        );
        // The failed tombstone must not have opened a new generation.
        assert_eq!(ki.generations().len(), 1);
    }

    // -----------------------------------------------------------------------
    // get
    // -----------------------------------------------------------------------

    #[test]
    fn test_get_walks_generations() {
        let ki = two_generation_key();

        let found = ki.get(2).unwrap();
        assert_eq!((found.modified, found.created, found.version), (rev(2, 0), rev(2, 0), 1));

        let found = ki.get(3).unwrap();
        assert_eq!((found.modified, found.created, found.version), (rev(3, 0), rev(2, 0), 2));

        // Landing exactly on the tombstone returns it as a normal revision.
        let found = ki.get(4).unwrap();
        assert_eq!((found.modified, found.created, found.version), (rev(4, 0), rev(2, 0), 3));

        // The revival opened a new generation.
        let found = ki.get(5).unwrap();
        assert_eq!((found.modified, found.created, found.version), (rev(5, 0), rev(5, 0), 1));
    }

    #[test]
    fn test_get_before_creation_is_not_found() {
        let ki = two_generation_key();
        assert_eq!(ki.get(1).unwrap_err(), IndexError::RevisionNotFound);
    }

    #[test]
    fn test_get_inside_tombstoned_gap_is_not_found() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(2, 0), 1).unwrap();
        ki.tombstone(rev(4, 0)).unwrap();
        ki.put(rev(6, 0), 1).unwrap();

        assert_eq!(ki.get(5).unwrap_err(), IndexError::RevisionNotFound);
        // But the tombstone itself is addressable.
        assert_eq!(ki.get(4).unwrap().modified, rev(4, 0));
    }

    #[test]
    fn test_get_past_tombstone_of_dead_key_is_not_found() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(2, 0), 1).unwrap();
        ki.tombstone(rev(4, 0)).unwrap();

        assert_eq!(ki.get(9).unwrap_err(), IndexError::RevisionNotFound);
        assert_eq!(ki.get(4).unwrap().modified, rev(4, 0));
    }

    #[test]
    fn test_get_at_zero_reads_current_state() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(2, 0), 1).unwrap();
        ki.put(rev(7, 0), 1).unwrap();

        let found = ki.get(0).unwrap();
        assert_eq!((found.modified, found.created, found.version), (rev(7, 0), rev(2, 0), 2));
    }

    // -----------------------------------------------------------------------
    // since
    // -----------------------------------------------------------------------

    #[test]
    fn test_since_spans_generations_ascending() {
        let ki = two_generation_key();
        assert_eq!(
            ki.since(0),
            vec![rev(2, 0), rev(3, 0), rev(4, 0), rev(5, 0)]
        );
        assert_eq!(ki.since(3), vec![rev(3, 0), rev(4, 0), rev(5, 0)]);
        assert_eq!(ki.since(5), vec![rev(5, 0)]);
        assert_eq!(ki.since(6), Vec::<Revision>::new());
    }

    #[test]
    fn test_since_keeps_every_sub_revision_of_a_transaction() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(2, 0), 1).unwrap();
        ki.put(rev(2, 1), 1).unwrap();
        ki.put(rev(3, 0), 1).unwrap();

        assert_eq!(ki.since(2), vec![rev(2, 0), rev(2, 1), rev(3, 0)]);
    }

    // -----------------------------------------------------------------------
    // restore
    // -----------------------------------------------------------------------

    #[test]
    fn test_restore_carries_version_from_the_log() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.restore(rev(2, 0), rev(5, 0), 3);

        let found = ki.get(5).unwrap();
        assert_eq!((found.modified, found.created, found.version), (rev(5, 0), rev(2, 0), 3));

        // Writes continue the restored generation.
        ki.put(rev(6, 0), 4).unwrap();
        let found = ki.get(6).unwrap();
        assert_eq!((found.modified, found.created, found.version), (rev(6, 0), rev(2, 0), 4));
    }

    #[test]
    #[should_panic(expected = "restore on a non-empty key index")]
    fn test_restore_on_populated_key_panics() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(2, 0), 1).unwrap();
        ki.restore(rev(2, 0), rev(2, 0), 1);
    }

    // -----------------------------------------------------------------------
    // compact / keep
    // -----------------------------------------------------------------------

    #[test]
    fn test_compact_trims_the_pivot_generation() {
        let mut ki = two_generation_key();
        let mut available = HashSet::new();
        ki.compact(3, &mut available);

        assert_eq!(ki.generations().len(), 2);
        assert_eq!(ki.generations()[0].revs(), &[rev(3, 0), rev(4, 0)]);
        assert_eq!(ki.generations()[0].ver(), 2);
        assert_eq!(ki.generations()[0].created(), rev(2, 0));

        let expected: HashSet<_> = [rev(3, 0), rev(4, 0), rev(5, 0)].into_iter().collect();
        assert_eq!(available, expected);

        assert_eq!(ki.get(2).unwrap_err(), IndexError::RevisionNotFound);
        let found = ki.get(3).unwrap();
        assert_eq!((found.modified, found.created, found.version), (rev(3, 0), rev(2, 0), 1));
    }

    #[test]
    fn test_compact_drops_generations_behind_their_tombstone() {
        let mut ki = two_generation_key();
        let mut available = HashSet::new();
        ki.compact(4, &mut available);

        // The whole first generation (tombstone included) is obsolete.
        assert_eq!(ki.generations().len(), 1);
        assert_eq!(ki.generations()[0].revs(), &[rev(5, 0)]);

        let expected: HashSet<_> = [rev(5, 0)].into_iter().collect();
        assert_eq!(available, expected);
    }

    #[test]
    fn test_compact_kills_a_tombstoned_key() {
        let mut ki = KeyIndex::new(b"foo".to_vec());
        ki.put(rev(2, 0), 1).unwrap();
        ki.tombstone(rev(3, 0)).unwrap();

        let mut available = HashSet::new();
        ki.compact(3, &mut available);

        assert!(ki.is_empty());
        assert!(available.is_empty());
    }

    #[test]
    fn test_compact_is_idempotent() {
        let mut ki = two_generation_key();
        let mut first = HashSet::new();
        ki.compact(3, &mut first);
        let snapshot = ki.clone();

        let mut second = HashSet::new();
        ki.compact(3, &mut second);

        assert_eq!(first, second);
        assert!(ki.equal(&snapshot));
    }

    #[test]
    fn test_keep_matches_compact_without_mutating() {
        for at_rev in 0..=7 {
            let ki = two_generation_key();
            let mut kept = HashSet::new();
            ki.keep(at_rev, &mut kept);

            let mut compacted = ki.clone();
            let mut available = HashSet::new();
            compacted.compact(at_rev, &mut available);

            assert_eq!(kept, available, "keep/compact diverged at {at_rev}");
            assert!(ki.equal(&two_generation_key()), "keep mutated at {at_rev}");
        }
    }

    // -----------------------------------------------------------------------
    // equal
    // -----------------------------------------------------------------------

    #[test]
    fn test_equal_ignores_value_size() {
        let mut a = KeyIndex::new(b"foo".to_vec());
        let mut b = KeyIndex::new(b"foo".to_vec());
        a.put(rev(2, 0), 10).unwrap();
        b.put(rev(2, 0), 999).unwrap();
        assert!(a.equal(&b));

        b.put(rev(3, 0), 10).unwrap();
        assert!(!a.equal(&b));

        let mut c = KeyIndex::new(b"bar".to_vec());
        c.put(rev(2, 0), 10).unwrap();
        assert!(!a.equal(&c));
    }

    // -----------------------------------------------------------------------
    // Property tests
    // -----------------------------------------------------------------------

    /// Random mutation sequences with strictly increasing transaction
    /// clocks: `(tombstone?, main step, sub)` per operation.
    fn op_seq() -> impl Strategy<Value = Vec<(bool, i64, i64)>> {
        proptest::collection::vec((any::<bool>(), 1_i64..4, 0_i64..3), 1..60)
    }

    /// Apply `ops` to a fresh key index; returns the index and every
    /// revision that was accepted, in order.
    fn apply_ops(ops: &[(bool, i64, i64)]) -> (KeyIndex, Vec<Revision>) {
        let mut ki = KeyIndex::new(b"k".to_vec());
        let mut main = 0_i64;
        let mut applied = Vec::new();
        for &(is_tombstone, step, sub) in ops {
            main += step;
            let r = rev(main, sub);
            if is_tombstone {
                if ki.tombstone(r).is_ok() {
                    applied.push(r);
                }
            } else {
                ki.put(r, 8).unwrap();
                applied.push(r);
            }
        }
        (ki, applied)
    }

    proptest! {
        #[test]
        fn prop_history_is_strictly_increasing(ops in op_seq()) {
            let (ki, applied) = apply_ops(&ops);

            let mut all = Vec::new();
            for g in ki.generations() {
                prop_assert_eq!(g.ver(), g.revs().len() as i64);
                all.extend_from_slice(g.revs());
            }
            for w in all.windows(2) {
                prop_assert!(w[0] < w[1]);
            }
            prop_assert_eq!(&all, &applied);
            if let Some(&last) = all.last() {
                prop_assert_eq!(last, ki.modified());
            }
        }

        #[test]
        fn prop_get_returns_each_revision_at_its_main(ops in op_seq()) {
            let (ki, applied) = apply_ops(&ops);
            for &r in &applied {
                let found = ki.get(r.main).unwrap();
                prop_assert_eq!(found.modified, r);
            }
        }

        #[test]
        fn prop_get_never_returns_a_future_revision(
            ops in op_seq(),
            at_rev in 1_i64..200,
        ) {
            let (ki, applied) = apply_ops(&ops);
            if let Ok(found) = ki.get(at_rev) {
                prop_assert!(found.modified.main <= at_rev);
                prop_assert!(!applied.iter().any(
                    |r| r.main > found.modified.main && r.main <= at_rev
                ));
            }
        }

        #[test]
        fn prop_keep_equals_compact_on_a_clone(
            ops in op_seq(),
            at_rev in 1_i64..200,
        ) {
            let (ki, _) = apply_ops(&ops);

            let mut kept = HashSet::new();
            ki.keep(at_rev, &mut kept);

            let mut compacted = ki.clone();
            let mut available = HashSet::new();
            compacted.compact(at_rev, &mut available);

            prop_assert_eq!(kept, available);
        }

        #[test]
        fn prop_compact_preserves_reads_at_the_compaction_revision(
            ops in op_seq(),
            at_rev in 1_i64..200,
        ) {
            let (ki, _) = apply_ops(&ops);
            let before = ki.get(at_rev);

            let mut compacted = ki.clone();
            let mut available = HashSet::new();
            compacted.compact(at_rev, &mut available);
            if compacted.is_empty() {
                return Ok(());
            }
            let after = compacted.get(at_rev);

            match (before, after) {
                (Ok(b), Ok(a)) => {
                    prop_assert_eq!(b.modified, a.modified);
                    prop_assert_eq!(b.created, a.created);
                }
                (Err(b), Err(a)) => prop_assert_eq!(b, a),
                (Ok(b), Err(_)) => {
                    // Only a dropped tombstone generation may disappear
                    // from view.
                    prop_assert!(!available.contains(&b.modified));
                }
                (Err(_), Ok(_)) => prop_assert!(false, "compaction created history"),
            }
        }

        #[test]
        fn prop_compact_is_idempotent(
            ops in op_seq(),
            at_rev in 1_i64..200,
        ) {
            let (mut ki, _) = apply_ops(&ops);

            let mut first = HashSet::new();
            ki.compact(at_rev, &mut first);
            let snapshot = ki.clone();

            let mut second = HashSet::new();
            ki.compact(at_rev, &mut second);

            prop_assert_eq!(first, second);
            prop_assert!(ki.equal(&snapshot));
        }

        #[test]
        fn prop_since_is_ascending_and_complete(
            ops in op_seq(),
            rev_floor in 0_i64..200,
        ) {
            let (ki, applied) = apply_ops(&ops);
            let since = ki.since(rev_floor);

            for w in since.windows(2) {
                prop_assert!(w[0] < w[1]);
            }
            let expected: Vec<_> = applied
                .iter()
                .copied()
                .filter(|r| r.main >= rev_floor)
                .collect();
            prop_assert_eq!(since, expected);
        }
    }
}
