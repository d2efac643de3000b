//! Strongly-typed identifiers for arena entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of an allocation block.
///
/// Block identifiers are process-local: a block rebuilt from a record gets a
/// fresh identifier even though its bytes are identical to the source block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(u64);

impl BlockId {
    /// Allocate the next unused block identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a block ID from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_ids_are_unique() {
        let a = BlockId::next();
        let b = BlockId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn block_id_display() {
        assert_eq!(format!("{}", BlockId::new(42)), "block_42");
    }
}
