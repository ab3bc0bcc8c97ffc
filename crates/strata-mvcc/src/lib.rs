//! In-memory MVCC key index for the Strata key-value store.
//!
//! Maps user-visible byte-string keys to the revisions at which they were
//! written or deleted, in front of a revision-addressed value store. The
//! index answers `(key, as-of-revision)` with the revision to fetch, and
//! supports range reads, tombstoning, and history compaction.
//!
//! - [`key_index`]: one key's lifetime as generations of revisions.
//! - [`tree_index`]: the ordered key → history map and the [`Index`] trait.
//! - [`observability`]: latency histograms and the live-key gauge.
//!
//! Revisions are assigned by the transactional caller and must be strictly
//! increasing per key; the index is rebuilt from the persistent log on
//! restart and holds no durable state of its own.

pub mod key_index;
pub mod observability;
pub mod tree_index;

pub use key_index::{Generation, GetResult, KeyIndex};
pub use observability::{LatencyHistogram, MetricsSnapshot, metrics_snapshot, reset_metrics};
pub use tree_index::{Index, TreeIndex};

pub use strata_error::{IndexError, IndexResult};
pub use strata_types::Revision;
