//! Runtime type descriptors.
//!
//! Generic containers store their element descriptors in block memory so that
//! copying, sizing and destroying an element never depends on compile-time
//! type information that does not survive relocation. A descriptor is one
//! signed 32-bit integer:
//!
//! ```text
//!   value < 0   plain data, -value bytes, copied bitwise, nothing to destroy
//!   value = 0   uninitialized (always an invariant violation)
//!   value > 0   an ObjectKind code
//! ```

use crate::error::{RelocError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of every object kind that can be embedded in another object.
pub const EMBEDDED_SIZE: u32 = 16;

/// The closed set of object kinds the model knows how to copy and destroy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ObjectKind {
    /// An offset reference to another object in the same block.
    Handle = 1,
    /// A string, inline up to 12 bytes, otherwise backed by a `Bytes` object.
    String = 2,
    /// A growable vector backed by an `Array` object.
    Vector = 3,
    /// A single-value hash map backed by a `PairArray` object.
    Map = 4,
    /// A multi-value hash map backed by a `JoinPairArray` object.
    JoinMap = 5,
    /// Flat array body: header followed by the elements.
    Array = 6,
    /// Hash table body of a map.
    PairArray = 7,
    /// Hash table body of a join map, including its overflow vectors.
    JoinPairArray = 8,
    /// Raw byte body of an out-of-line string.
    Bytes = 9,
}

impl ObjectKind {
    /// Whether values of this kind are stored in place inside other objects.
    ///
    /// The remaining kinds are only ever the target of a reference and carry
    /// their own size in their header.
    #[must_use]
    pub const fn is_embedded(&self) -> bool {
        matches!(
            self,
            Self::Handle | Self::String | Self::Vector | Self::Map | Self::JoinMap
        )
    }

    /// Kind name used in diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Handle => "Handle",
            Self::String => "String",
            Self::Vector => "Vector",
            Self::Map => "Map",
            Self::JoinMap => "JoinMap",
            Self::Array => "Array",
            Self::PairArray => "PairArray",
            Self::JoinPairArray => "JoinPairArray",
            Self::Bytes => "Bytes",
        }
    }
}

impl TryFrom<i32> for ObjectKind {
    type Error = RelocError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            1 => Ok(Self::Handle),
            2 => Ok(Self::String),
            3 => Ok(Self::Vector),
            4 => Ok(Self::Map),
            5 => Ok(Self::JoinMap),
            6 => Ok(Self::Array),
            7 => Ok(Self::PairArray),
            8 => Ok(Self::JoinPairArray),
            9 => Ok(Self::Bytes),
            _ => {
                tracing::error!(code, "Unknown object kind in type descriptor");
                Err(RelocError::UnknownTypeCode { code })
            }
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a descriptor says about the bytes it describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constituent {
    /// Plain data of the given byte size.
    Plain(u32),
    /// An object of the given kind.
    Object(ObjectKind),
}

/// A runtime type tag for values stored in block memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDescriptor(i32);

impl TypeDescriptor {
    /// The uninitialized descriptor.
    pub const UNINITIALIZED: Self = Self(0);

    /// Descriptor for plain data of `size` bytes.
    ///
    /// # Panics
    /// If `size` is 0, which would read as [`TypeDescriptor::UNINITIALIZED`],
    /// or does not fit the encoding. Element types evaluate this in a const,
    /// so a zero-sized element type fails to build.
    #[must_use]
    pub const fn plain(size: u32) -> Self {
        assert!(size > 0, "plain data must occupy at least one byte");
        assert!(size <= i32::MAX as u32, "plain data size exceeds the descriptor range");
        Self(-(size as i32))
    }

    /// Descriptor for an object kind.
    #[must_use]
    pub const fn object(kind: ObjectKind) -> Self {
        Self(kind as i32)
    }

    /// Descriptor of the element type `T`, as persisted in container headers.
    #[must_use]
    pub const fn of<T: crate::object::Element>() -> Self {
        T::DESCRIPTOR
    }

    /// Reinterpret a raw stored value.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// The raw stored value.
    #[must_use]
    pub const fn as_raw(&self) -> i32 {
        self.0
    }

    /// Check for plain data.
    #[must_use]
    pub const fn is_plain(&self) -> bool {
        self.0 < 0
    }

    /// Classify the descriptor.
    ///
    /// # Errors
    /// Returns an invariant violation for the uninitialized descriptor and for
    /// positive codes outside the known kinds.
    pub fn classify(&self) -> Result<Constituent> {
        match self.0 {
            0 => {
                tracing::error!("Encountered an uninitialized type descriptor");
                Err(RelocError::UninitializedDescriptor)
            }
            raw if raw < 0 => Ok(Constituent::Plain(raw.unsigned_abs())),
            raw => ObjectKind::try_from(raw).map(Constituent::Object),
        }
    }

    /// The object kind, if this describes an object.
    #[must_use]
    pub fn kind(&self) -> Option<ObjectKind> {
        match self.classify() {
            Ok(Constituent::Object(kind)) => Some(kind),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => f.write_str("uninitialized"),
            raw if raw < 0 => write!(f, "plain({})", raw.unsigned_abs()),
            raw => match ObjectKind::try_from(raw) {
                Ok(kind) => write!(f, "{kind}"),
                Err(_) => write!(f, "unknown({raw})"),
            },
        }
    }
}
