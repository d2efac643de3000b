//! Allocator configuration.

use super::header::BLOCK_HEADER_SIZE;
use crate::error::{RelocError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default block size: 1 MB.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// Maximum block size: 4 GB.
pub const MAX_BLOCK_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Minimum block size: the header plus room for a few small objects.
pub const MIN_BLOCK_SIZE: u64 = BLOCK_HEADER_SIZE as u64 + 64;

/// How a block hands out and takes back memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AllocationPolicy {
    /// Freed chunks are kept in size-class lists and reused.
    #[default]
    Reuse = 0,
    /// Pure bump allocation; freed chunks are never reused.
    NoReuse = 1,
    /// Reference counts are never decremented; the block is freed wholesale.
    NoReferenceCount = 2,
}

impl AllocationPolicy {
    /// Whether freeing an object should actually run its destructor.
    #[must_use]
    pub const fn counts_references(&self) -> bool {
        !matches!(self, Self::NoReferenceCount)
    }
}

impl TryFrom<u8> for AllocationPolicy {
    type Error = RelocError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Reuse),
            1 => Ok(Self::NoReuse),
            2 => Ok(Self::NoReferenceCount),
            _ => Err(RelocError::InvalidRecord {
                cause: format!("unknown allocation policy {value}"),
            }),
        }
    }
}

impl fmt::Display for AllocationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reuse => write!(f, "reuse"),
            Self::NoReuse => write!(f, "no_reuse"),
            Self::NoReferenceCount => write!(f, "no_reference_count"),
        }
    }
}

/// Configuration for an [`Allocator`](super::Allocator).
///
/// # Example
///
/// ```
/// use reloc_core::arena::{AllocationPolicy, ArenaConfig};
///
/// let config = ArenaConfig::default().with_block_size(64 * 1024);
/// assert_eq!(config.block_size, 64 * 1024);
/// assert_eq!(config.policy, AllocationPolicy::Reuse);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Size of the block the allocator starts with, and of blocks entered
    /// without an explicit size.
    #[serde(default = "default_block_size")]
    pub block_size: u64,

    /// Upper bound for any block size; larger requests are clamped.
    #[serde(default = "default_max_block_size")]
    pub max_block_size: u64,

    /// Allocation policy for new blocks.
    #[serde(default)]
    pub policy: AllocationPolicy,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            max_block_size: default_max_block_size(),
            policy: AllocationPolicy::default(),
        }
    }
}

impl ArenaConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default block size.
    pub fn with_block_size(mut self, size: u64) -> Self {
        self.block_size = size.min(self.max_block_size);
        self
    }

    /// Set the maximum block size.
    pub fn with_max_block_size(mut self, size: u64) -> Self {
        self.max_block_size = size.min(MAX_BLOCK_SIZE);
        self.block_size = self.block_size.min(self.max_block_size);
        self
    }

    /// Set the allocation policy.
    pub fn with_policy(mut self, policy: AllocationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Clamp a requested block size to the configured maximum and check it.
    ///
    /// # Errors
    /// Returns `InvalidBlockSize` when the size is below the minimum.
    pub fn checked_block_size(&self, size: u64) -> Result<u64> {
        let size = size.min(self.max_block_size);
        if size < MIN_BLOCK_SIZE {
            return Err(RelocError::InvalidBlockSize {
                size,
                minimum: MIN_BLOCK_SIZE,
                maximum: self.max_block_size,
            });
        }
        Ok(size)
    }
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_max_block_size() -> u64 {
    MAX_BLOCK_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = ArenaConfig::default();
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.max_block_size, MAX_BLOCK_SIZE);
        assert_eq!(config.policy, AllocationPolicy::Reuse);
    }

    #[test]
    fn builder_pattern() {
        let config = ArenaConfig::new()
            .with_max_block_size(1 << 20)
            .with_block_size(1 << 24)
            .with_policy(AllocationPolicy::NoReuse);

        assert_eq!(config.max_block_size, 1 << 20);
        assert_eq!(config.block_size, 1 << 20);
        assert_eq!(config.policy, AllocationPolicy::NoReuse);
    }

    #[test]
    fn deserialize_with_defaults() {
        let config: ArenaConfig =
            serde_json::from_str(r#"{ "policy": "no_reference_count" }"#).unwrap();
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.policy, AllocationPolicy::NoReferenceCount);
    }

    #[test]
    fn block_size_is_checked() {
        let config = ArenaConfig::default().with_max_block_size(4096);
        assert_eq!(config.checked_block_size(1 << 30).unwrap(), 4096);
        assert!(matches!(
            config.checked_block_size(8),
            Err(RelocError::InvalidBlockSize { .. })
        ));
    }

    #[test]
    fn policy_codes_roundtrip() {
        for policy in [
            AllocationPolicy::Reuse,
            AllocationPolicy::NoReuse,
            AllocationPolicy::NoReferenceCount,
        ] {
            assert_eq!(AllocationPolicy::try_from(policy as u8).unwrap(), policy);
        }
        assert!(AllocationPolicy::try_from(9).is_err());
    }
}
