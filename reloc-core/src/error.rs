//! Error types for the object model.
//!
//! Errors fall into three families with very different handling:
//!
//! - **Exhaustion** (`E0xx`): a block ran out of space. Recoverable: the
//!   operation left its container unchanged, so the caller can flush the
//!   block, enter a new one and retry.
//! - **Usage** (`E1xx`): the caller asked for something invalid (null
//!   dereference, index out of range, wrong type).
//! - **Invariant violations** (`E2xx`): block memory is inconsistent. These
//!   are logged at `error` level where they are raised and must abort the
//!   current operation.
//!
//! Record and I/O failures use `E3xx`.

use crate::types::{ArenaOffset, BlockId, TypeDescriptor};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for object-model operations.
#[derive(Error, Debug)]
pub enum RelocError {
    // =========================================================================
    // Exhaustion (E001-E099)
    // =========================================================================
    /// The block cannot satisfy an allocation.
    #[error(
        "E001: Not enough space in {block}: requested {requested} bytes, available {available} bytes"
    )]
    NotEnoughSpace {
        /// The block that was full.
        block: BlockId,
        /// Number of bytes requested, including the chunk preamble.
        requested: u64,
        /// Number of bytes still available at the cursor.
        available: u64,
    },

    /// A fixed-capacity array has no free slot.
    #[error("E002: Array is full ({capacity} slots)")]
    ArrayFull {
        /// Capacity of the array.
        capacity: u32,
    },

    /// A block size outside the supported range was requested.
    #[error("E003: Invalid block size {size}: must be between {minimum} and {maximum} bytes")]
    InvalidBlockSize {
        /// The requested size.
        size: u64,
        /// Smallest supported size.
        minimum: u64,
        /// Largest supported size.
        maximum: u64,
    },

    /// A container capacity cannot be represented.
    #[error("E004: Invalid capacity {requested}: {cause}")]
    InvalidCapacity {
        /// The requested capacity.
        requested: u64,
        /// Why it was rejected.
        cause: String,
    },

    // =========================================================================
    // Usage Errors (E101-E199)
    // =========================================================================
    /// A null reference was dereferenced.
    #[error("E101: Dereferenced a null reference")]
    NullReference,

    /// An index was outside a container's bounds.
    #[error("E102: Index {index} out of bounds for length {len}")]
    IndexOutOfBounds {
        /// The requested index.
        index: u64,
        /// Number of elements.
        len: u64,
    },

    /// A reference into a block that has since been emptied was used.
    #[error("E103: Stale reference into {block}: the block was emptied")]
    StaleReference {
        /// The emptied block.
        block: BlockId,
    },

    /// A referent was viewed as the wrong type.
    #[error("E104: Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Descriptor the caller asked for.
        expected: TypeDescriptor,
        /// Descriptor stored in the block.
        found: TypeDescriptor,
    },

    // =========================================================================
    // Invariant Violations (E201-E299)
    // =========================================================================
    /// A zero type descriptor was found where a value was expected.
    #[error("E201: Uninitialized type descriptor")]
    UninitializedDescriptor,

    /// A positive type descriptor does not name a known object kind.
    #[error("E202: Unknown object kind code {code}")]
    UnknownTypeCode {
        /// The stored code.
        code: i32,
    },

    /// A hash table probe visited every slot without resolving.
    #[error("E203: Probe exhausted all {slots} slots for hash {hash:#x}")]
    ProbeExhausted {
        /// Number of slots in the table.
        slots: u32,
        /// The hash being probed.
        hash: u64,
    },

    /// A join map record points past the end of its overflow lists.
    #[error("E204: Overflow index {index} out of range for {len} overflow lists")]
    CorruptOverflowIndex {
        /// The stored index.
        index: u32,
        /// Number of overflow lists.
        len: u32,
    },

    /// Block memory is inconsistent.
    #[error("E205: Corruption in {block} at offset {offset}: {cause}")]
    Corruption {
        /// The affected block.
        block: BlockId,
        /// Where the inconsistency was detected.
        offset: ArenaOffset,
        /// Description of the inconsistency.
        cause: String,
    },

    // =========================================================================
    // Record Errors (E301-E399)
    // =========================================================================
    /// A record buffer failed validation.
    #[error("E301: Invalid record: {cause}")]
    InvalidRecord {
        /// Reason the record was rejected.
        cause: String,
    },

    /// Reading or writing a record file failed.
    #[error("E302: Record I/O failed at {path}: {cause}")]
    RecordIo {
        /// The file involved.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },
}

impl RelocError {
    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotEnoughSpace { .. } => "E001",
            Self::ArrayFull { .. } => "E002",
            Self::InvalidBlockSize { .. } => "E003",
            Self::InvalidCapacity { .. } => "E004",
            Self::NullReference => "E101",
            Self::IndexOutOfBounds { .. } => "E102",
            Self::StaleReference { .. } => "E103",
            Self::TypeMismatch { .. } => "E104",
            Self::UninitializedDescriptor => "E201",
            Self::UnknownTypeCode { .. } => "E202",
            Self::ProbeExhausted { .. } => "E203",
            Self::CorruptOverflowIndex { .. } => "E204",
            Self::Corruption { .. } => "E205",
            Self::InvalidRecord { .. } => "E301",
            Self::RecordIo { .. } => "E302",
        }
    }

    /// Check if this error means a block or array ran out of room.
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::NotEnoughSpace { .. } | Self::ArrayFull { .. })
    }

    /// Check if this error means block memory is inconsistent.
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::UninitializedDescriptor
                | Self::UnknownTypeCode { .. }
                | Self::ProbeExhausted { .. }
                | Self::CorruptOverflowIndex { .. }
                | Self::Corruption { .. }
        )
    }

    /// Check if this error is retriable after switching to a fresh block.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::NotEnoughSpace { .. })
    }

    /// Check if this error was caused by invalid caller input.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::NullReference
                | Self::IndexOutOfBounds { .. }
                | Self::StaleReference { .. }
                | Self::TypeMismatch { .. }
                | Self::InvalidBlockSize { .. }
                | Self::InvalidCapacity { .. }
        )
    }

    /// Build a corruption error and log it.
    pub(crate) fn corruption(block: BlockId, offset: ArenaOffset, cause: impl Into<String>) -> Self {
        let cause = cause.into();
        tracing::error!(block = %block, offset = %offset, cause = %cause, "Block memory corruption");
        Self::Corruption {
            block,
            offset,
            cause,
        }
    }
}

/// Result type alias using `RelocError`.
pub type Result<T> = std::result::Result<T, RelocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = RelocError::NotEnoughSpace {
            block: BlockId::new(1),
            requested: 64,
            available: 8,
        };
        assert_eq!(err.code(), "E001");
        assert_eq!(RelocError::NullReference.code(), "E101");
        assert_eq!(RelocError::UninitializedDescriptor.code(), "E201");
    }

    #[test]
    fn error_display() {
        let err = RelocError::NotEnoughSpace {
            block: BlockId::new(7),
            requested: 4096,
            available: 100,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("E001"));
        assert!(msg.contains("block_7"));
        assert!(msg.contains("4096"));
    }

    #[test]
    fn error_families_are_disjoint() {
        let exhaustion = RelocError::ArrayFull { capacity: 4 };
        assert!(exhaustion.is_exhaustion());
        assert!(!exhaustion.is_invariant_violation());

        let invariant = RelocError::ProbeExhausted { slots: 8, hash: 1 };
        assert!(invariant.is_invariant_violation());
        assert!(!invariant.is_exhaustion());
        assert!(!invariant.is_retriable());

        let usage = RelocError::IndexOutOfBounds { index: 3, len: 2 };
        assert!(usage.is_usage_error());
        assert!(!usage.is_invariant_violation());
    }

    #[test]
    fn only_block_exhaustion_is_retriable() {
        assert!(
            RelocError::NotEnoughSpace {
                block: BlockId::new(1),
                requested: 1,
                available: 0,
            }
            .is_retriable()
        );
        assert!(!RelocError::ArrayFull { capacity: 1 }.is_retriable());
    }
}
