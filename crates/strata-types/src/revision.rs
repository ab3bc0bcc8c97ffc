//! Revision identifiers.
//!
//! A [`Revision`] pins one mutation in the store: `main` is the transaction
//! clock (incremented once per transaction), `sub` counts mutations within
//! a transaction. The pair is totally ordered lexicographically, so the
//! derived `Ord` on the field order is the authoritative comparison.

use std::fmt;

/// Identity of a single mutation: a `(main, sub)` pair with total
/// lexicographic order.
///
/// `main` is the per-transaction clock; `sub` disambiguates multiple
/// mutations issued by the same transaction. [`Revision::ZERO`] is the
/// "no revision" sentinel.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Revision {
    /// Transaction clock. Assigned by the transactional caller; strictly
    /// increasing across transactions.
    pub main: i64,
    /// Mutation counter within one transaction, starting at 0.
    pub sub: i64,
}

impl Revision {
    /// The "no revision" sentinel.
    pub const ZERO: Self = Self { main: 0, sub: 0 };

    /// Build a revision from its parts.
    #[inline]
    #[must_use]
    pub const fn new(main: i64, sub: i64) -> Self {
        Self { main, sub }
    }

    /// Whether this revision is strictly newer than `other`.
    ///
    /// Equivalent to `self > other`; kept as a named operation because the
    /// monotonicity checks in the index read better with it.
    #[inline]
    #[must_use]
    pub const fn greater_than(self, other: Self) -> bool {
        if self.main != other.main {
            self.main > other.main
        } else {
            self.sub > other.sub
        }
    }

    /// Whether this revision's transaction clock is strictly past `main`.
    #[inline]
    #[must_use]
    pub const fn greater_than_main(self, main: i64) -> bool {
        self.main > main
    }

    /// Whether this revision's transaction clock is at or past `main`.
    #[inline]
    #[must_use]
    pub const fn greater_than_or_equal_main(self, main: i64) -> bool {
        self.main >= main
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.main, self.sub)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
