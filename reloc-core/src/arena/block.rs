//! Allocation blocks.
//!
//! A block is one contiguous byte buffer. Everything stored in it addresses
//! other things in it by offset, so the used prefix of the buffer can be
//! copied anywhere and remains valid. Blocks are shared between the allocator
//! and the handles pointing into them; the buffer is returned when the last
//! of them is dropped.

use super::allocation::{CHUNK_PREAMBLE, FreeChunk, FreeChunks, chunk_size_for};
use super::config::AllocationPolicy;
use super::header::{BLOCK_HEADER_SIZE, BlockHeader};
use crate::error::{RelocError, Result};
use crate::types::{ArenaOffset, BlockId, REL_PTR_SIZE, RawRelPtr, TypeDescriptor};
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// The memory of one block together with its allocation state.
///
/// Only reachable through a lock on its [`Block`]. The mutating methods are
/// internal to the crate; the accessors are public for diagnostics.
pub struct BlockMemory {
    id: BlockId,
    bytes: Vec<u8>,
    /// Offset of the first byte never handed out.
    last_used: u64,
    live_objects: u32,
    free: FreeChunks,
    policy: AllocationPolicy,
    pinned: bool,
    /// Bumped whenever the block is emptied, invalidating outstanding places.
    epoch: u32,
    /// Generation of every chunk by payload offset. A chunk gets a fresh
    /// generation when it is allocated and again when it is freed.
    generations: BTreeMap<u64, u32>,
    next_generation: u32,
}

impl BlockMemory {
    fn new(id: BlockId, capacity: u64, policy: AllocationPolicy, pinned: bool) -> Self {
        Self {
            id,
            bytes: vec![0u8; capacity as usize],
            last_used: BLOCK_HEADER_SIZE as u64,
            live_objects: 0,
            free: FreeChunks::new(),
            policy,
            pinned,
            epoch: 0,
            generations: BTreeMap::new(),
            next_generation: 0,
        }
    }

    fn from_record(id: BlockId, header: &BlockHeader, used: &[u8], capacity: u64) -> Self {
        let mut bytes = vec![0u8; capacity as usize];
        bytes[..used.len()].copy_from_slice(used);
        let mut memory = Self {
            id,
            bytes,
            last_used: header.used_bytes,
            live_objects: header.live_objects,
            free: FreeChunks::new(),
            policy: header.policy,
            pinned: header.is_pinned(),
            epoch: 0,
            generations: BTreeMap::new(),
            next_generation: 0,
        };
        memory.scan_chunks();
        memory
    }

    /// Give every chunk in the used region a generation.
    fn scan_chunks(&mut self) {
        let mut chunk = BLOCK_HEADER_SIZE as u64;
        while chunk + CHUNK_PREAMBLE <= self.last_used {
            let size = self.read_u32(ArenaOffset::new(chunk)) as u64;
            if size < CHUNK_PREAMBLE {
                tracing::warn!(block = %self.id, offset = chunk, size, "Chunk scan stopped at a malformed preamble");
                break;
            }
            let generation = self.bump_generation();
            self.generations.insert(chunk + CHUNK_PREAMBLE, generation);
            chunk += size;
        }
    }

    /// Identifier of the block.
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Total size of the block buffer.
    pub fn capacity(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Bytes handed out so far, header included.
    pub fn used_bytes(&self) -> u64 {
        self.last_used
    }

    /// Bytes still available for bump allocation.
    pub fn bytes_available(&self) -> u64 {
        self.capacity().saturating_sub(self.last_used)
    }

    /// Bytes held in reusable free chunks.
    pub fn free_bytes(&self) -> u64 {
        self.free.total_bytes()
    }

    /// Number of live objects.
    pub fn live_objects(&self) -> u32 {
        self.live_objects
    }

    /// Allocation policy.
    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// Whether the block is pinned.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Current emptying epoch.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub(crate) fn set_policy(&mut self, policy: AllocationPolicy) {
        if policy != AllocationPolicy::Reuse {
            self.free.clear();
        }
        self.policy = policy;
    }

    pub(crate) fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
    }

    // -------------------------------------------------------------------------
    // Raw access
    // -------------------------------------------------------------------------

    pub(crate) fn corruption(&self, offset: ArenaOffset, cause: impl Into<String>) -> RelocError {
        RelocError::corruption(self.id, offset, cause)
    }

    /// Check that `[at, at + len)` lies in the used region.
    pub(crate) fn check_range(&self, at: ArenaOffset, len: u64) -> Result<()> {
        let in_range = at.as_u64() >= BLOCK_HEADER_SIZE as u64
            && at
                .as_u64()
                .checked_add(len)
                .is_some_and(|end| end <= self.last_used);
        if in_range {
            Ok(())
        } else {
            Err(self.corruption(
                at,
                format!("range of {len} bytes outside used region ending at {}", self.last_used),
            ))
        }
    }

    /// Check that `target` can be the payload of an allocated chunk.
    pub(crate) fn check_payload(&self, target: ArenaOffset) -> Result<()> {
        let t = target.as_u64();
        if t < BLOCK_HEADER_SIZE as u64 + CHUNK_PREAMBLE || t >= self.last_used || t % 8 != 0 {
            return Err(self.corruption(target, "reference target is not a payload"));
        }
        Ok(())
    }

    pub(crate) fn bytes(&self, at: ArenaOffset, len: u64) -> &[u8] {
        &self.bytes[at.as_usize()..at.as_usize() + len as usize]
    }

    pub(crate) fn bytes_mut(&mut self, at: ArenaOffset, len: u64) -> &mut [u8] {
        &mut self.bytes[at.as_usize()..at.as_usize() + len as usize]
    }

    pub(crate) fn copy_within(&mut self, src: ArenaOffset, dst: ArenaOffset, len: u64) {
        let src = src.as_usize();
        self.bytes.copy_within(src..src + len as usize, dst.as_usize());
    }

    pub(crate) fn fill_zero(&mut self, at: ArenaOffset, len: u64) {
        self.bytes_mut(at, len).fill(0);
    }

    pub(crate) fn read_u32(&self, at: ArenaOffset) -> u32 {
        LittleEndian::read_u32(self.bytes(at, 4))
    }

    pub(crate) fn read_i32(&self, at: ArenaOffset) -> i32 {
        LittleEndian::read_i32(self.bytes(at, 4))
    }

    pub(crate) fn read_u64(&self, at: ArenaOffset) -> u64 {
        LittleEndian::read_u64(self.bytes(at, 8))
    }

    pub(crate) fn read_i64(&self, at: ArenaOffset) -> i64 {
        LittleEndian::read_i64(self.bytes(at, 8))
    }

    pub(crate) fn write_u32(&mut self, at: ArenaOffset, value: u32) {
        LittleEndian::write_u32(self.bytes_mut(at, 4), value);
    }

    pub(crate) fn write_i32(&mut self, at: ArenaOffset, value: i32) {
        LittleEndian::write_i32(self.bytes_mut(at, 4), value);
    }

    pub(crate) fn write_u64(&mut self, at: ArenaOffset, value: u64) {
        LittleEndian::write_u64(self.bytes_mut(at, 8), value);
    }

    pub(crate) fn write_i64(&mut self, at: ArenaOffset, value: i64) {
        LittleEndian::write_i64(self.bytes_mut(at, 8), value);
    }

    // -------------------------------------------------------------------------
    // Chunks
    // -------------------------------------------------------------------------

    /// Allocate a zeroed payload of `size` bytes with a reference count of 0.
    ///
    /// Never grows the block: when neither a free chunk nor the bump region
    /// can satisfy the request, `NotEnoughSpace` is returned.
    pub(crate) fn allocate(&mut self, size: u64) -> Result<ArenaOffset> {
        let needed = chunk_size_for(size);
        let Ok(needed_u32) = u32::try_from(needed) else {
            return Err(RelocError::InvalidCapacity {
                requested: size,
                cause: "allocation larger than a chunk can describe".to_string(),
            });
        };

        let chunk = match self.reusable_chunk(needed_u32) {
            Some(chunk) => chunk,
            None => {
                if self.last_used + needed > self.capacity() {
                    tracing::debug!(
                        block = %self.id,
                        requested = needed,
                        available = self.bytes_available(),
                        "Block exhausted"
                    );
                    return Err(RelocError::NotEnoughSpace {
                        block: self.id,
                        requested: needed,
                        available: self.bytes_available(),
                    });
                }
                let chunk = FreeChunk {
                    offset: ArenaOffset::new(self.last_used),
                    size: needed_u32,
                };
                self.last_used += needed;
                chunk
            }
        };

        self.write_u32(chunk.offset, chunk.size);
        let payload = chunk.payload();
        let generation = self.bump_generation();
        self.generations.insert(payload.as_u64(), generation);
        self.set_ref_count(payload, 0);
        self.fill_zero(payload, chunk.size as u64 - CHUNK_PREAMBLE);
        self.live_objects += 1;
        Ok(payload)
    }

    fn reusable_chunk(&mut self, needed: u32) -> Option<FreeChunk> {
        match self.policy {
            AllocationPolicy::Reuse => self.free.take(needed),
            AllocationPolicy::NoReuse | AllocationPolicy::NoReferenceCount => None,
        }
    }

    fn bump_generation(&mut self) -> u32 {
        self.next_generation = self.next_generation.wrapping_add(1);
        self.next_generation
    }

    /// Generation of the chunk whose payload is `payload`.
    pub(crate) fn generation(&self, payload: ArenaOffset) -> Option<u32> {
        self.generations.get(&payload.as_u64()).copied()
    }

    /// Payload offset and generation of the chunk containing `at`.
    pub(crate) fn owning_chunk(&self, at: ArenaOffset) -> Option<(ArenaOffset, u32)> {
        self.generations
            .range(..=at.as_u64())
            .next_back()
            .map(|(&payload, &generation)| (ArenaOffset::new(payload), generation))
    }

    /// Return the chunk of `payload` to the block according to its policy.
    pub(crate) fn free(&mut self, payload: ArenaOffset) {
        let generation = self.bump_generation();
        if let Some(current) = self.generations.get_mut(&payload.as_u64()) {
            *current = generation;
        }
        match self.policy {
            AllocationPolicy::NoReferenceCount => {}
            AllocationPolicy::NoReuse => {
                self.live_objects = self.live_objects.saturating_sub(1);
            }
            AllocationPolicy::Reuse => {
                self.live_objects = self.live_objects.saturating_sub(1);
                let size = self.chunk_size(payload);
                self.free.release(FreeChunk {
                    offset: payload.sub(CHUNK_PREAMBLE),
                    size,
                });
            }
        }
    }

    /// Size of the chunk holding `payload`, preamble included.
    pub(crate) fn chunk_size(&self, payload: ArenaOffset) -> u32 {
        self.read_u32(payload.sub(CHUNK_PREAMBLE))
    }

    /// Reference count of the object at `payload`.
    pub(crate) fn ref_count(&self, payload: ArenaOffset) -> u32 {
        self.read_u32(payload.sub(4))
    }

    pub(crate) fn set_ref_count(&mut self, payload: ArenaOffset, count: u32) {
        self.write_u32(payload.sub(4), count);
    }

    pub(crate) fn inc_ref(&mut self, payload: ArenaOffset) {
        let count = self.ref_count(payload);
        self.set_ref_count(payload, count.saturating_add(1));
    }

    /// Decrement the reference count and return the new value.
    pub(crate) fn dec_ref(&mut self, payload: ArenaOffset) -> Result<u32> {
        match self.ref_count(payload) {
            0 => Err(self.corruption(payload, "reference count already zero")),
            count => {
                self.set_ref_count(payload, count - 1);
                Ok(count - 1)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Relative references
    // -------------------------------------------------------------------------

    pub(crate) fn read_rel(&self, field: ArenaOffset) -> RawRelPtr {
        RawRelPtr::decode(self.bytes(field, REL_PTR_SIZE))
    }

    /// Resolve a reference stored at `field`, validating its target.
    pub(crate) fn resolve_rel(&self, field: ArenaOffset) -> Result<Option<(ArenaOffset, TypeDescriptor)>> {
        let raw = self.read_rel(field);
        if raw.is_null() {
            return Ok(None);
        }
        let target = raw
            .target(field)
            .ok_or_else(|| self.corruption(field, format!("delta {} points before the block", raw.delta())))?;
        self.check_payload(target)?;
        Ok(Some((target, raw.descriptor())))
    }

    pub(crate) fn write_rel(&mut self, field: ArenaOffset, target: ArenaOffset, descriptor: TypeDescriptor) {
        RawRelPtr::pointing(field, target, descriptor).encode(self.bytes_mut(field, REL_PTR_SIZE));
    }

    pub(crate) fn write_null_rel(&mut self, field: ArenaOffset, descriptor: TypeDescriptor) {
        RawRelPtr::null(descriptor).encode(self.bytes_mut(field, REL_PTR_SIZE));
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Empty the block in place so its space can be handed out again.
    pub(crate) fn reset(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.last_used = BLOCK_HEADER_SIZE as u64;
        self.live_objects = 0;
        self.free.clear();
        self.generations.clear();
    }

    /// Empty the block and give its buffer back.
    pub(crate) fn release(&mut self) {
        self.reset();
        self.bytes = Vec::new();
    }

    /// Header describing the block with an optional root.
    pub fn header(&self, root: Option<(ArenaOffset, TypeDescriptor)>) -> BlockHeader {
        let header = BlockHeader::new(self.policy, self.pinned, self.last_used, self.live_objects);
        match root {
            Some((offset, descriptor)) => header.with_root(offset, descriptor),
            None => header,
        }
    }

    /// The used prefix of the block with a header recording `root`.
    pub(crate) fn capture(&self, root: Option<(ArenaOffset, TypeDescriptor)>) -> Result<Vec<u8>> {
        let header = self.header(root).to_bytes().map_err(|e| RelocError::InvalidRecord {
            cause: e.to_string(),
        })?;
        let mut bytes = Vec::with_capacity(self.last_used as usize);
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&self.bytes[BLOCK_HEADER_SIZE..self.last_used as usize]);
        Ok(bytes)
    }
}

impl fmt::Debug for BlockMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockMemory")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("used", &self.last_used)
            .field("live_objects", &self.live_objects)
            .field("policy", &self.policy)
            .field("pinned", &self.pinned)
            .finish()
    }
}

struct BlockShared {
    id: BlockId,
    memory: RwLock<BlockMemory>,
}

/// A shared allocation block.
///
/// Cloning is cheap and yields another handle to the same memory.
#[derive(Clone)]
pub struct Block {
    shared: Arc<BlockShared>,
}

impl Block {
    pub(crate) fn create(capacity: u64, policy: AllocationPolicy, pinned: bool) -> Self {
        let id = BlockId::next();
        Self::wrap(id, BlockMemory::new(id, capacity, policy, pinned))
    }

    pub(crate) fn from_record(header: &BlockHeader, used: &[u8], capacity: u64) -> Self {
        let id = BlockId::next();
        Self::wrap(id, BlockMemory::from_record(id, header, used, capacity))
    }

    fn wrap(id: BlockId, memory: BlockMemory) -> Self {
        Self {
            shared: Arc::new(BlockShared {
                id,
                memory: RwLock::new(memory),
            }),
        }
    }

    /// Identifier of the block.
    pub fn id(&self) -> BlockId {
        self.shared.id
    }

    /// Whether two handles refer to the same block.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Snapshot of the block's allocation state.
    pub fn stats(&self) -> BlockStats {
        let memory = self.read();
        BlockStats {
            id: memory.id,
            capacity: memory.capacity(),
            used_bytes: memory.used_bytes(),
            bytes_available: memory.bytes_available(),
            free_bytes: memory.free_bytes(),
            live_objects: memory.live_objects,
            policy: memory.policy,
            pinned: memory.pinned,
        }
    }

    /// Number of live objects in the block.
    pub fn live_objects(&self) -> u32 {
        self.read().live_objects
    }

    /// Whether the block is pinned.
    pub fn is_pinned(&self) -> bool {
        self.read().pinned
    }

    /// Change the allocation policy for future allocations.
    pub fn set_policy(&self, policy: AllocationPolicy) {
        self.write().set_policy(policy);
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, BlockMemory> {
        self.shared.memory.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, BlockMemory> {
        self.shared.memory.write()
    }

    pub(crate) fn downgrade(&self) -> WeakBlock {
        WeakBlock(Arc::downgrade(&self.shared))
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Block").field(&self.shared.id).finish()
    }
}

/// A block reference that does not keep the block alive.
#[derive(Clone)]
pub(crate) struct WeakBlock(Weak<BlockShared>);

impl WeakBlock {
    pub(crate) fn upgrade(&self) -> Option<Block> {
        self.0.upgrade().map(|shared| Block { shared })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// Allocation statistics of one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockStats {
    /// Block identifier.
    pub id: BlockId,
    /// Buffer size.
    pub capacity: u64,
    /// Bytes handed out, header included.
    pub used_bytes: u64,
    /// Bytes left for bump allocation.
    pub bytes_available: u64,
    /// Bytes held in reusable free chunks.
    pub free_bytes: u64,
    /// Live objects.
    pub live_objects: u32,
    /// Allocation policy.
    pub policy: AllocationPolicy,
    /// Whether the block is pinned.
    pub pinned: bool,
}

impl fmt::Display for BlockStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} bytes used, {} free in chunks, {} live objects, policy {}{}",
            self.id,
            self.used_bytes,
            self.capacity,
            self.free_bytes,
            self.live_objects,
            self.policy,
            if self.pinned { ", pinned" } else { "" }
        )
    }
}
