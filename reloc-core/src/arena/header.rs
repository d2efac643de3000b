//! Block header structure.

use super::config::AllocationPolicy;
use crate::types::{ArenaOffset, TypeDescriptor};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// Magic number at the start of every block ("RLOC").
pub const BLOCK_MAGIC: u32 = 0x524C_4F43;

/// Current block format version.
pub const BLOCK_VERSION: u16 = 1;

/// Fixed size of the block header in bytes.
pub const BLOCK_HEADER_SIZE: usize = 32;

/// Flag bit set when the block is pinned.
pub const FLAG_PINNED: u8 = 0x01;

/// Block header.
///
/// Occupies the first bytes of every block. It is rewritten whenever the block
/// is captured as a record, so a received buffer carries everything needed to
/// re-derive its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Magic number for identification.
    pub magic: u32,
    /// Block format version.
    pub version: u16,
    /// Allocation policy of the block.
    pub policy: AllocationPolicy,
    /// Flag bits.
    pub flags: u8,
    /// Bytes in use, header included.
    pub used_bytes: u64,
    /// Payload offset of the root object, null when there is none.
    pub root_offset: ArenaOffset,
    /// Descriptor of the root object.
    pub root_descriptor: TypeDescriptor,
    /// Number of live objects in the block.
    pub live_objects: u32,
}

impl BlockHeader {
    /// Create a header describing a block.
    pub fn new(policy: AllocationPolicy, pinned: bool, used_bytes: u64, live_objects: u32) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            version: BLOCK_VERSION,
            policy,
            flags: if pinned { FLAG_PINNED } else { 0 },
            used_bytes,
            root_offset: ArenaOffset::NONE,
            root_descriptor: TypeDescriptor::UNINITIALIZED,
            live_objects,
        }
    }

    /// Set the root object.
    pub fn with_root(mut self, offset: ArenaOffset, descriptor: TypeDescriptor) -> Self {
        self.root_offset = offset;
        self.root_descriptor = descriptor;
        self
    }

    /// The root object, if one was recorded.
    pub fn root(&self) -> Option<(ArenaOffset, TypeDescriptor)> {
        (!self.root_offset.is_none()).then_some((self.root_offset, self.root_descriptor))
    }

    /// Whether the pinned flag is set.
    pub fn is_pinned(&self) -> bool {
        self.flags & FLAG_PINNED != 0
    }

    /// Validate the header against the size of the buffer holding it.
    pub fn validate(&self, buffer_len: u64) -> Result<(), &'static str> {
        if self.magic != BLOCK_MAGIC {
            return Err("Invalid magic number");
        }
        if self.version != BLOCK_VERSION {
            return Err("Unsupported block version");
        }
        if self.used_bytes < BLOCK_HEADER_SIZE as u64 {
            return Err("Used bytes smaller than the header");
        }
        if self.used_bytes > buffer_len {
            return Err("Used bytes exceed the buffer");
        }
        if let Some((offset, _)) = self.root() {
            if offset.as_u64() < BLOCK_HEADER_SIZE as u64 || offset.as_u64() >= self.used_bytes {
                return Err("Root offset outside the used region");
            }
        }
        Ok(())
    }

    /// Read header from a byte slice.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Buffer too small for header",
            ));
        }

        let mut cursor = io::Cursor::new(bytes);

        let magic = cursor.read_u32::<LittleEndian>()?;
        let version = cursor.read_u16::<LittleEndian>()?;
        let policy = AllocationPolicy::try_from(cursor.read_u8()?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let flags = cursor.read_u8()?;
        let used_bytes = cursor.read_u64::<LittleEndian>()?;
        let root_offset = ArenaOffset::new(cursor.read_u64::<LittleEndian>()?);
        let root_descriptor = TypeDescriptor::from_raw(cursor.read_i32::<LittleEndian>()?);
        let live_objects = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            magic,
            version,
            policy,
            flags,
            used_bytes,
            root_offset,
            root_descriptor,
            live_objects,
        })
    }

    /// Write header to a byte buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE);

        buf.write_u32::<LittleEndian>(self.magic)?;
        buf.write_u16::<LittleEndian>(self.version)?;
        buf.write_u8(self.policy as u8)?;
        buf.write_u8(self.flags)?;
        buf.write_u64::<LittleEndian>(self.used_bytes)?;
        buf.write_u64::<LittleEndian>(self.root_offset.as_u64())?;
        buf.write_i32::<LittleEndian>(self.root_descriptor.as_raw())?;
        buf.write_u32::<LittleEndian>(self.live_objects)?;

        debug_assert_eq!(buf.len(), BLOCK_HEADER_SIZE);

        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectKind;

    #[test]
    fn header_roundtrip() {
        let header = BlockHeader::new(AllocationPolicy::NoReuse, true, 512, 3)
            .with_root(ArenaOffset::new(48), TypeDescriptor::object(ObjectKind::Map));

        let bytes = header.to_bytes().unwrap();
        assert_eq!(bytes.len(), BLOCK_HEADER_SIZE);

        let restored = BlockHeader::from_bytes(&bytes).unwrap();
        assert_eq!(restored, header);
        assert!(restored.is_pinned());
        assert_eq!(
            restored.root(),
            Some((ArenaOffset::new(48), TypeDescriptor::object(ObjectKind::Map)))
        );
    }

    #[test]
    fn header_validation() {
        let header = BlockHeader::new(AllocationPolicy::Reuse, false, 256, 1)
            .with_root(ArenaOffset::new(40), TypeDescriptor::plain(8));
        assert!(header.validate(256).is_ok());
        assert!(header.validate(1024).is_ok());
        assert!(header.validate(128).is_err());

        let mut bad_magic = header;
        bad_magic.magic = 0xDEADBEEF;
        assert!(bad_magic.validate(256).is_err());

        let mut bad_root = header;
        bad_root.root_offset = ArenaOffset::new(300);
        assert!(bad_root.validate(512).is_err());
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        assert!(BlockHeader::from_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn header_size_is_32() {
        assert_eq!(BLOCK_HEADER_SIZE, 32);
    }
}
