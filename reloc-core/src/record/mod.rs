//! Records: the transportable form of a block.
//!
//! A record is the used prefix of a block with its 32-byte header filled in.
//! The header names the root object, so the receiving side can copy the
//! bytes into a fresh block and get a working handle back:
//!
//! ```
//! use reloc_core::prelude::*;
//!
//! let allocator = Allocator::new(ArenaConfig::default().with_block_size(8 * 1024))?;
//! let scores = allocator.make_map::<Str, u64>(8)?;
//! scores.get()?.insert("ada", 36u64)?;
//!
//! let record = Record::snapshot(&scores)?;
//! let received = Record::from_bytes(record.as_bytes().to_vec())?;
//! let copy = received.root::<Map<Str, u64>>()?;
//! assert_eq!(copy.get()?.get("ada")?, Some(36));
//! # Ok::<(), reloc_core::RelocError>(())
//! ```

mod file;

pub use file::{read_record_file, write_record_file};

use crate::arena::{BLOCK_HEADER_SIZE, Block, BlockHeader, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::error::{RelocError, Result};
use crate::object::{Handle, Referent, constituent};

/// The used bytes of a block, header included.
#[derive(Clone)]
pub struct Record {
    header: BlockHeader,
    bytes: Vec<u8>,
}

impl Record {
    /// Capture the block holding `handle`'s referent as it is, with the
    /// referent as root.
    ///
    /// Everything else living in the block comes along.
    pub fn snapshot<T: Referent>(handle: &Handle<T>) -> Result<Self> {
        let root = handle.root();
        let bytes = handle.place().read(|memory, _| memory.capture(Some(root)))?;
        let record = Self::from_bytes(bytes)?;
        tracing::debug!(
            block = %handle.block_id(),
            bytes = record.bytes.len(),
            "Captured record"
        );
        Ok(record)
    }

    /// Deep-copy `handle`'s referent into a fresh block of `capacity` bytes
    /// and capture that block.
    ///
    /// Only what the referent reaches is copied, so the record is usually
    /// smaller than a snapshot of a busy block.
    ///
    /// # Errors
    /// `NotEnoughSpace` if the referent does not fit in `capacity`.
    pub fn copy_from<T: Referent>(handle: &Handle<T>, capacity: u64) -> Result<Self> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&capacity) {
            return Err(RelocError::InvalidBlockSize {
                size: capacity,
                minimum: MIN_BLOCK_SIZE,
                maximum: MAX_BLOCK_SIZE,
            });
        }
        let descriptor = handle.descriptor();
        let bytes = handle.place().read(|src, at| {
            let block = Block::create(capacity, src.policy(), false);
            let mut memory = block.write();
            let root = constituent::deep_copy(src, descriptor, at, &mut memory)?;
            memory.capture(Some((root, descriptor)))
        })?;
        let record = Self::from_bytes(bytes)?;
        tracing::debug!(
            block = %handle.block_id(),
            bytes = record.bytes.len(),
            capacity,
            "Copied record"
        );
        Ok(record)
    }

    /// Accept a received buffer.
    ///
    /// The buffer may be longer than the record; bytes past the recorded
    /// length are dropped.
    ///
    /// # Errors
    /// `InvalidRecord` if the header is missing or inconsistent.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Result<Self> {
        let header = BlockHeader::from_bytes(&bytes).map_err(|e| RelocError::InvalidRecord {
            cause: e.to_string(),
        })?;
        header
            .validate(bytes.len() as u64)
            .map_err(|cause| RelocError::InvalidRecord {
                cause: cause.to_string(),
            })?;
        if header.used_bytes > MAX_BLOCK_SIZE {
            return Err(RelocError::InvalidRecord {
                cause: "Record larger than the largest block".to_string(),
            });
        }
        bytes.truncate(header.used_bytes as usize);
        Ok(Self { header, bytes })
    }

    /// The decoded header.
    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    /// The record bytes, header first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the record bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Length of the record in bytes.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Load the record into a new block sized to fit exactly and return its root.
    pub fn root<T: Referent>(&self) -> Result<Handle<T>> {
        self.root_with_capacity(self.header.used_bytes)
    }

    /// Load the record into a new block of at least `capacity` bytes and
    /// return its root.
    ///
    /// Spare capacity past the record is available to further allocations
    /// made through the root.
    ///
    /// # Errors
    /// `InvalidRecord` when no root was recorded; `TypeMismatch` when the
    /// root is not a `T`.
    pub fn root_with_capacity<T: Referent>(&self, capacity: u64) -> Result<Handle<T>> {
        let Some((at, descriptor)) = self.header.root() else {
            return Err(RelocError::InvalidRecord {
                cause: "Record has no root".to_string(),
            });
        };
        let capacity = capacity
            .max(self.header.used_bytes)
            .max(BLOCK_HEADER_SIZE as u64)
            .min(MAX_BLOCK_SIZE);
        let block = Block::from_record(&self.header, &self.bytes, capacity);
        let mut memory = block.write();
        memory.check_payload(at)?;
        if !T::accepts(&memory, descriptor, at)? {
            return Err(RelocError::TypeMismatch {
                expected: T::expected(),
                found: descriptor,
            });
        }
        Ok(Handle::share(&block, &mut memory, at, descriptor))
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("header", &self.header)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Allocator, ArenaConfig, BLOCK_MAGIC};
    use crate::collections::{Map, Vector};
    use crate::object::{Object, Str};
    use crate::types::ObjectKind;

    fn allocator() -> Allocator {
        Allocator::new(ArenaConfig::default().with_block_size(16 * 1024)).unwrap()
    }

    #[test]
    fn snapshot_roundtrip() {
        let allocator = allocator();
        let words = allocator.make_vector::<Str>(2).unwrap();
        for word in ["short", "a rather longer word"] {
            words.get().unwrap().push(word).unwrap();
        }

        let record = Record::snapshot(&words).unwrap();
        assert_eq!(record.header().magic, BLOCK_MAGIC);
        assert_eq!(record.byte_len() as u64, record.header().used_bytes);

        let copy = record.root::<Vector<Str>>().unwrap();
        assert_ne!(copy.block_id(), words.block_id());
        let texts: Vec<String> = copy
            .get()
            .unwrap()
            .iter()
            .map(|s| s.unwrap().text().unwrap())
            .collect();
        assert_eq!(texts, vec!["short", "a rather longer word"]);
    }

    #[test]
    fn copy_from_only_takes_the_reachable_graph() {
        let allocator = allocator();
        let noise = allocator.make_string("unrelated object that takes space").unwrap();
        let map = allocator.make_map::<u32, u64>(8).unwrap();
        map.get().unwrap().insert(&7u32, 70u64).unwrap();

        let snapshot = Record::snapshot(&map).unwrap();
        let copied = Record::copy_from(&map, 4096).unwrap();
        assert!(copied.byte_len() < snapshot.byte_len());

        let root = copied.root::<Map<u32, u64>>().unwrap();
        assert_eq!(root.get().unwrap().get(&7u32).unwrap(), Some(70));
        assert_eq!(map.ref_count().unwrap(), 1);
        drop(noise);
    }

    #[test]
    fn larger_buffers_are_accepted() {
        let allocator = allocator();
        let value = allocator.make_value::<u64, _>(99u64).unwrap();
        let mut bytes = Record::snapshot(&value).unwrap().into_bytes();
        let used = bytes.len();
        bytes.resize(used + 256, 0xAB);

        let record = Record::from_bytes(bytes).unwrap();
        assert_eq!(record.byte_len(), used);
        assert_eq!(record.root::<u64>().unwrap().get().unwrap(), 99);
    }

    #[test]
    fn spare_capacity_is_usable() {
        let allocator = allocator();
        let numbers = allocator.make_vector::<u64>(1).unwrap();
        numbers.get().unwrap().push(1u64).unwrap();

        let record = Record::snapshot(&numbers).unwrap();
        let copy = record.root_with_capacity::<Vector<u64>>(4096).unwrap();
        for n in 2..=20u64 {
            copy.get().unwrap().push(n).unwrap();
        }
        assert_eq!(copy.get().unwrap().len().unwrap(), 20);
        assert_eq!(numbers.get().unwrap().len().unwrap(), 1);
    }

    #[test]
    fn corrupt_headers_are_rejected() {
        let allocator = allocator();
        let value = allocator.make_value::<u32, _>(1u32).unwrap();
        let bytes = Record::snapshot(&value).unwrap().into_bytes();

        let mut bad_magic = bytes.clone();
        bad_magic[0] ^= 0xFF;
        assert!(matches!(
            Record::from_bytes(bad_magic),
            Err(RelocError::InvalidRecord { .. })
        ));

        let truncated = bytes[..bytes.len() - 8].to_vec();
        assert!(matches!(
            Record::from_bytes(truncated),
            Err(RelocError::InvalidRecord { .. })
        ));

        assert!(Record::from_bytes(vec![0u8; 8]).is_err());
    }

    #[test]
    fn root_type_is_checked() {
        let allocator = allocator();
        let text = allocator.make_string("typed root").unwrap();
        let record = Record::snapshot(&text).unwrap();

        assert!(matches!(
            record.root::<Vector<u8>>(),
            Err(RelocError::TypeMismatch { .. })
        ));
        let erased = record.root::<Object>().unwrap();
        let view = erased.get().unwrap();
        assert_eq!(view.kind().unwrap(), Some(ObjectKind::String));
        assert_eq!(view.downcast::<Str>().unwrap().text().unwrap(), "typed root");
    }
}
