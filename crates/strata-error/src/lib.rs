//! Error types for the Strata key index.
//!
//! Structured variants for the conditions the index reports to its caller.
//! Internal invariant violations (a compaction walk losing track of a key)
//! are not represented here: those abort the process, because continued
//! operation risks silent data loss.

use thiserror::Error;

use strata_types::Revision;

/// Errors reported by the key index.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexError {
    // === Lookup errors ===
    /// The lookup targeted a key that does not exist, a revision predating
    /// the key's creation, or a revision inside a tombstoned gap. Also
    /// returned by `tombstone` on a missing key.
    #[error("revision not found")]
    RevisionNotFound,

    // === Mutation errors ===
    /// A `put` or `tombstone` supplied a revision that is not strictly
    /// greater than the key's last modification. Indicates a caller bug;
    /// the transactional layer typically aborts the transaction.
    #[error("revision {attempted} is out of order: key already modified at {modified}")]
    RevisionOutOfOrder {
        /// The revision the caller supplied.
        attempted: Revision,
        /// The key's most recent revision at the time of the call.
        modified: Revision,
    },

    /// A `tombstone` targeted a key that has no live generation: the key
    /// exists but its newest generation is already closed by a tombstone.
    #[error("key has no live generation")]
    Unavailable,
}

/// Convenience alias for fallible index operations.
pub type IndexResult<T> = Result<T, IndexError>;
