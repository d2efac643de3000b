//! Offsets and the in-block encoding of relative references.

use super::descriptor::TypeDescriptor;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size in bytes of an encoded relative reference.
pub const REL_PTR_SIZE: u64 = 16;

/// Delta value marking a null reference.
pub const NULL_DELTA: i64 = -1;

/// Position of a byte inside a block, counted from the block's first byte.
///
/// Objects never store offsets directly: a reference records the distance
/// from its own position to its target (see [`ArenaOffset::delta_to`]), so
/// the used prefix of a block keeps working wherever it is copied. Offset 0
/// lies inside the block header and never names an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArenaOffset(u64);

impl ArenaOffset {
    /// Offset 0: no object.
    pub const NONE: Self = Self(0);

    /// Offset `offset` bytes from the start of the block.
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Bytes from the start of the block.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub(crate) const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Whether this is [`ArenaOffset::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The offset `bytes` further into the block.
    #[must_use]
    pub const fn add(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }

    /// The offset `bytes` closer to the block start.
    #[must_use]
    pub const fn sub(self, bytes: u64) -> Self {
        Self(self.0 - bytes)
    }

    /// The delta a reference stored here holds to reach `target`.
    #[must_use]
    pub const fn delta_to(self, target: Self) -> i64 {
        target.0 as i64 - self.0 as i64
    }

    /// Follow a delta stored here. `None` when it leads before the block.
    #[must_use]
    pub const fn follow(self, delta: i64) -> Option<Self> {
        match self.0.checked_add_signed(delta) {
            Some(target) => Some(Self(target)),
            None => None,
        }
    }
}

impl fmt::Display for ArenaOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

/// The 16 bytes of a relative reference as stored inside a block.
///
/// ```text
/// +0  delta       i64   target payload offset minus own offset, -1 when null
/// +8  descriptor  i32   type descriptor of the referent
/// +12 reserved    u32
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRelPtr {
    delta: i64,
    descriptor: TypeDescriptor,
}

impl RawRelPtr {
    /// A null reference that would point at objects of `descriptor`.
    #[must_use]
    pub const fn null(descriptor: TypeDescriptor) -> Self {
        Self {
            delta: NULL_DELTA,
            descriptor,
        }
    }

    /// A reference stored at `from` pointing at the payload at `target`.
    #[must_use]
    pub const fn pointing(from: ArenaOffset, target: ArenaOffset, descriptor: TypeDescriptor) -> Self {
        Self {
            delta: from.delta_to(target),
            descriptor,
        }
    }

    /// Check if this is a null reference.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.delta == NULL_DELTA
    }

    /// Raw delta value.
    #[must_use]
    pub const fn delta(&self) -> i64 {
        self.delta
    }

    /// Descriptor of the referent.
    #[must_use]
    pub const fn descriptor(&self) -> TypeDescriptor {
        self.descriptor
    }

    /// Resolve the target of a reference stored at `from`.
    #[must_use]
    pub fn target(&self, from: ArenaOffset) -> Option<ArenaOffset> {
        if self.is_null() {
            return None;
        }
        from.follow(self.delta)
    }

    /// Decode from the first 16 bytes of `bytes`.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            delta: LittleEndian::read_i64(&bytes[0..8]),
            descriptor: TypeDescriptor::from_raw(LittleEndian::read_i32(&bytes[8..12])),
        }
    }

    /// Encode into the first 16 bytes of `out`.
    pub fn encode(&self, out: &mut [u8]) {
        LittleEndian::write_i64(&mut out[0..8], self.delta);
        LittleEndian::write_i32(&mut out[8..12], self.descriptor.as_raw());
        LittleEndian::write_u32(&mut out[12..16], 0);
    }
}
