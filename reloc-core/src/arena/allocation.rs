//! Chunk layout and free-chunk tracking.
//!
//! Every allocation is a chunk: an 8-byte preamble followed by the payload.
//!
//! ```text
//! chunk start                      payload (returned offset)
//! |                                |
//! v                                v
//! +----------------+---------------+-----------------------------+
//! | chunk size u32 | ref count u32 | payload, padded to 8 bytes  |
//! +----------------+---------------+-----------------------------+
//! ```
//!
//! With the `Reuse` policy, freed chunks are filed into 32 power-of-two size
//! classes; a request searches from its own class upward.

use crate::types::ArenaOffset;

/// Bytes preceding every payload.
pub const CHUNK_PREAMBLE: u64 = 8;

/// Alignment of chunks and payloads.
pub const CHUNK_ALIGNMENT: u64 = 8;

/// Number of free-list size classes.
pub const SIZE_CLASSES: usize = 32;

/// Round `size` up to the chunk alignment.
#[must_use]
pub const fn align_up(size: u64) -> u64 {
    (size + CHUNK_ALIGNMENT - 1) & !(CHUNK_ALIGNMENT - 1)
}

/// Total chunk size needed for a payload of `payload` bytes.
#[must_use]
pub const fn chunk_size_for(payload: u64) -> u64 {
    align_up(payload + CHUNK_PREAMBLE)
}

/// Size class of a chunk: the index of its highest set bit.
#[must_use]
pub const fn size_class(size: u32) -> usize {
    if size == 0 {
        0
    } else {
        31 - size.leading_zeros() as usize
    }
}

/// A chunk that was freed and may be handed out again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeChunk {
    /// Offset of the chunk start (the preamble, not the payload).
    pub offset: ArenaOffset,
    /// Full chunk size including the preamble.
    pub size: u32,
}

impl FreeChunk {
    /// Payload offset of this chunk.
    pub fn payload(&self) -> ArenaOffset {
        self.offset.add(CHUNK_PREAMBLE)
    }
}

/// Size-class free lists of one block.
#[derive(Debug, Clone)]
pub struct FreeChunks {
    classes: Vec<Vec<FreeChunk>>,
    total_bytes: u64,
    count: usize,
}

impl FreeChunks {
    /// Create empty free lists.
    pub fn new() -> Self {
        Self {
            classes: vec![Vec::new(); SIZE_CLASSES],
            total_bytes: 0,
            count: 0,
        }
    }

    /// File a freed chunk under its size class.
    pub fn release(&mut self, chunk: FreeChunk) {
        self.classes[size_class(chunk.size)].push(chunk);
        self.total_bytes += chunk.size as u64;
        self.count += 1;
    }

    /// Take a chunk of at least `needed` bytes, newest first within a class.
    ///
    /// The returned chunk keeps its original size, which may exceed `needed`.
    pub fn take(&mut self, needed: u32) -> Option<FreeChunk> {
        for class in size_class(needed)..SIZE_CLASSES {
            let list = &mut self.classes[class];
            if let Some(pos) = list.iter().rposition(|chunk| chunk.size >= needed) {
                let chunk = list.remove(pos);
                self.total_bytes -= chunk.size as u64;
                self.count -= 1;
                return Some(chunk);
            }
        }
        None
    }

    /// Total bytes held in free chunks.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of free chunks.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if no chunk is free.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Forget all free chunks (the block is being reset).
    pub fn clear(&mut self) {
        for list in &mut self.classes {
            list.clear();
        }
        self.total_bytes = 0;
        self.count = 0;
    }
}

impl Default for FreeChunks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(offset: u64, size: u32) -> FreeChunk {
        FreeChunk {
            offset: ArenaOffset::new(offset),
            size,
        }
    }

    #[test]
    fn sizes_are_aligned() {
        assert_eq!(align_up(1), 8);
        assert_eq!(align_up(8), 8);
        assert_eq!(chunk_size_for(1), 16);
        assert_eq!(chunk_size_for(16), 24);
    }

    #[test]
    fn size_classes_follow_highest_bit() {
        assert_eq!(size_class(16), 4);
        assert_eq!(size_class(24), 4);
        assert_eq!(size_class(32), 5);
        assert_eq!(size_class(u32::MAX), 31);
    }

    #[test]
    fn take_prefers_newest_fitting_chunk() {
        let mut free = FreeChunks::new();
        free.release(chunk(64, 24));
        free.release(chunk(128, 24));
        free.release(chunk(256, 16));

        assert_eq!(free.len(), 3);
        assert_eq!(free.total_bytes(), 64);

        assert_eq!(free.take(24), Some(chunk(128, 24)));
        assert_eq!(free.take(20), Some(chunk(64, 24)));
        assert_eq!(free.take(20), None);
        assert_eq!(free.take(16), Some(chunk(256, 16)));
        assert!(free.is_empty());
    }

    #[test]
    fn take_searches_larger_classes() {
        let mut free = FreeChunks::new();
        free.release(chunk(64, 128));
        let taken = free.take(24).unwrap();
        assert_eq!(taken.size, 128);
        assert_eq!(taken.payload(), ArenaOffset::new(72));
    }

    #[test]
    fn clear_forgets_everything() {
        let mut free = FreeChunks::new();
        free.release(chunk(64, 32));
        free.clear();
        assert!(free.is_empty());
        assert_eq!(free.total_bytes(), 0);
        assert_eq!(free.take(8), None);
    }
}
