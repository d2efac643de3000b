//! The allocation context.
//!
//! An [`Allocator`] owns one current block and remembers the blocks it
//! retired. Objects are always created in the current block; when it runs
//! out of space the caller decides what to do (typically ship or drop what
//! was built and [`enter_new_block`](Allocator::enter_new_block)).

use super::block::{Block, BlockMemory, BlockStats, WeakBlock};
use super::config::{AllocationPolicy, ArenaConfig};
use super::place::Place;
use crate::collections::{Array, JoinMap, Key, KeyHasher, Map, Vector, array, join_map, map};
use crate::error::{RelocError, Result};
use crate::object::constituent;
use crate::object::{Element, Handle, Object, Referent, Store};
use crate::types::{ArenaOffset, ObjectKind, TypeDescriptor};
use std::ops::{Deref, DerefMut};

/// An explicit allocation context: one current block plus the retired ones.
///
/// Allocators are not shared between threads; give each worker its own.
///
/// # Example
///
/// ```
/// use reloc_core::prelude::*;
///
/// let allocator = Allocator::new(ArenaConfig::default().with_block_size(64 * 1024))?;
/// let names = allocator.make_vector::<Str>(4)?;
/// names.get()?.push("alpha")?;
/// assert_eq!(names.get()?.len()?, 1);
/// # Ok::<(), reloc_core::RelocError>(())
/// ```
pub struct Allocator {
    config: ArenaConfig,
    current: Block,
    /// Retired blocks; their memory lives as long as some handle does.
    inactive: Vec<WeakBlock>,
    /// Retired pinned blocks, kept until emptied.
    pinned: Vec<Block>,
}

impl Allocator {
    /// Create an allocator whose first block has the configured size.
    ///
    /// # Errors
    /// `InvalidBlockSize` if the configured size is below the minimum.
    pub fn new(config: ArenaConfig) -> Result<Self> {
        let size = config.checked_block_size(config.block_size)?;
        let current = Block::create(size, config.policy, false);
        tracing::debug!(block = %current.id(), size, policy = %config.policy, "Allocator created");
        Ok(Self {
            config,
            current,
            inactive: Vec::new(),
            pinned: Vec::new(),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// The block new objects go to.
    pub fn current_block(&self) -> &Block {
        &self.current
    }

    /// Make a fresh block of `size` bytes current and retire the old one.
    ///
    /// A retired block stays alive while handles into it exist; a pinned
    /// one is kept until [`empty_block`](Self::empty_block) is called on it.
    pub fn enter_new_block(&mut self, size: u64, pinned: bool) -> Result<()> {
        let block = self.create_block(size, pinned)?;
        let previous = std::mem::replace(&mut self.current, block);
        tracing::debug!(
            block = %self.current.id(),
            previous = %previous.id(),
            size,
            pinned,
            "Entered new block"
        );
        self.retire(previous);
        Ok(())
    }

    /// Make a fresh block current until the returned guard is dropped.
    ///
    /// The previous block is restored on drop and the temporary block is
    /// retired like any other.
    pub fn scoped_block(&mut self, size: u64, pinned: bool) -> Result<BlockScope<'_>> {
        let block = self.create_block(size, pinned)?;
        let previous = std::mem::replace(&mut self.current, block);
        tracing::debug!(block = %self.current.id(), size, pinned, "Entered scoped block");
        Ok(BlockScope {
            allocator: self,
            previous: Some(previous),
        })
    }

    fn create_block(&self, size: u64, pinned: bool) -> Result<Block> {
        let size = self.config.checked_block_size(size)?;
        Ok(Block::create(size, self.config.policy, pinned))
    }

    fn retire(&mut self, block: Block) {
        if block.is_pinned() {
            self.pinned.push(block);
        } else {
            self.inactive.push(block.downgrade());
        }
    }

    /// Whether the referent of `handle` lives in the current block.
    pub fn contains<T: Referent>(&self, handle: &Handle<T>) -> bool {
        handle.block().ptr_eq(&self.current)
    }

    /// Whether the referent's block is the current one, a pinned one, or a
    /// retired one this allocator still knows about.
    pub fn is_managed<T: Referent>(&self, handle: &Handle<T>) -> bool {
        let block = handle.block();
        block.ptr_eq(&self.current)
            || self.pinned.iter().any(|pinned| pinned.ptr_eq(block))
            || self
                .inactive
                .iter()
                .filter_map(WeakBlock::upgrade)
                .any(|inactive| inactive.ptr_eq(block))
    }

    /// Bytes the current block can still hand out, free chunks included.
    pub fn bytes_available(&self) -> u64 {
        let memory = self.current.read();
        memory.bytes_available() + memory.free_bytes()
    }

    /// Live objects in the current block.
    pub fn live_objects(&self) -> u32 {
        self.current.live_objects()
    }

    /// Live objects in the block holding `handle`'s referent.
    pub fn live_objects_in_block<T: Referent>(&self, handle: &Handle<T>) -> u32 {
        handle.block().live_objects()
    }

    /// Change the policy of the current block and of blocks created later.
    pub fn set_policy(&mut self, policy: AllocationPolicy) {
        self.config.policy = policy;
        self.current.set_policy(policy);
    }

    /// Statistics for the current block.
    pub fn current_block_stats(&self) -> BlockStats {
        self.current.stats()
    }

    /// Statistics for every retired block that is still alive.
    pub fn inactive_block_stats(&self) -> Vec<BlockStats> {
        self.pinned
            .iter()
            .cloned()
            .chain(self.inactive.iter().filter_map(WeakBlock::upgrade))
            .map(|block| block.stats())
            .collect()
    }

    /// Forget retired blocks whose memory is gone. Returns how many were dropped.
    pub fn clean_inactive_blocks(&mut self) -> usize {
        let before = self.inactive.len();
        self.inactive.retain(WeakBlock::is_alive);
        let cleaned = before - self.inactive.len();
        if cleaned > 0 {
            tracing::debug!(cleaned, remaining = self.inactive.len(), "Cleaned inactive blocks");
        }
        cleaned
    }

    /// Empty the block holding `handle`'s referent.
    ///
    /// The current block is reset in place and stays current. A retired
    /// block gives its memory back at once. Either way every outstanding
    /// handle and view into the block becomes stale.
    pub fn empty_block<T: Referent>(&mut self, handle: &Handle<T>) {
        let block = handle.block().clone();
        if block.ptr_eq(&self.current) {
            block.write().reset();
            tracing::debug!(block = %block.id(), "Emptied current block");
            return;
        }

        let pinned = self.pinned.iter().position(|pinned| pinned.ptr_eq(&block));
        let inactive = self
            .inactive
            .iter()
            .position(|weak| weak.upgrade().is_some_and(|inactive| inactive.ptr_eq(&block)));
        match (pinned, inactive) {
            (Some(index), _) => {
                self.pinned.swap_remove(index);
            }
            (None, Some(index)) => {
                self.inactive.swap_remove(index);
            }
            (None, None) => {
                tracing::warn!(block = %block.id(), "Asked to empty a block this allocator does not manage");
                return;
            }
        }
        block.write().release();
        tracing::debug!(block = %block.id(), "Emptied retired block");
    }

    // -------------------------------------------------------------------------
    // Object creation
    // -------------------------------------------------------------------------

    fn make_with<T: Referent>(
        &self,
        size: u64,
        descriptor: TypeDescriptor,
        init: impl FnOnce(&mut BlockMemory, ArenaOffset) -> Result<()>,
    ) -> Result<Handle<T>> {
        let mut memory = self.current.write();
        let at = memory.allocate(size)?;
        memory.set_ref_count(at, 1);
        if let Err(e) = init(&mut *memory, at) {
            memory.free(at);
            return Err(e);
        }
        Ok(Handle::adopt(Place::new(&self.current, &memory, at), descriptor))
    }

    /// Allocate `size` bytes holding the empty value of `descriptor`.
    ///
    /// `descriptor` is plain data or an embedded kind (handle, string,
    /// vector, map, join map); bodies are allocated by their containers.
    pub fn allocate(&self, size: u32, descriptor: TypeDescriptor) -> Result<Handle<Object>> {
        if descriptor.kind().is_some_and(|kind| !kind.is_embedded()) {
            return Err(RelocError::InvalidCapacity {
                requested: size as u64,
                cause: format!("{descriptor} bodies are allocated by their containers"),
            });
        }
        let needed = constituent::element_size(&self.current.read(), descriptor)?;
        if (size as u64) < needed {
            return Err(RelocError::InvalidCapacity {
                requested: size as u64,
                cause: format!("{descriptor} needs {needed} bytes"),
            });
        }
        self.make_with(size as u64, descriptor, |memory, at| {
            constituent::construct_empty(memory, descriptor, at)
        })
    }

    /// Create a default-valued `T`.
    pub fn make_object<T>(&self) -> Result<Handle<T>>
    where
        T: Element + Referent,
    {
        let size = constituent::element_size(&self.current.read(), T::DESCRIPTOR)?;
        self.make_with(size, T::DESCRIPTOR, |memory, at| {
            constituent::construct_empty(memory, T::DESCRIPTOR, at)
        })
    }

    /// Create a `T` holding `value`.
    ///
    /// Values from other blocks (strings, references, containers) are deep
    /// copied into the current block.
    pub fn make_value<T, S>(&self, value: S) -> Result<Handle<T>>
    where
        T: Element + Referent + Store<S>,
    {
        let size = constituent::element_size(&self.current.read(), T::DESCRIPTOR)?;
        self.make_with(size, T::DESCRIPTOR, |memory, at| T::store(memory, at, value))
    }

    /// Create a string.
    pub fn make_string(&self, text: &str) -> Result<Handle<crate::object::Str>> {
        self.make_value(text)
    }

    /// Create an empty vector with room for `capacity` elements.
    pub fn make_vector<T: Element>(&self, capacity: u32) -> Result<Handle<Vector<T>>> {
        self.make_with(16, Vector::<T>::DESCRIPTOR, |memory, at| {
            constituent::construct_empty(memory, Vector::<T>::DESCRIPTOR, at)?;
            if capacity > 0 {
                let body = array::allocate(memory, T::DESCRIPTOR, capacity)?;
                memory.write_rel(at, body, TypeDescriptor::object(ObjectKind::Array));
            }
            Ok(())
        })
    }

    /// Create an empty fixed-capacity array.
    pub fn make_array<T: Element>(&self, capacity: u32) -> Result<Handle<Array<T>>> {
        let mut memory = self.current.write();
        let body = array::allocate(&mut memory, T::DESCRIPTOR, capacity)?;
        Ok(Handle::adopt(
            Place::new(&self.current, &memory, body),
            <Array<T> as Referent>::expected(),
        ))
    }

    /// Create an empty map using the default key hasher. With `slots == 0`
    /// the table is allocated on the first insertion.
    pub fn make_map<K: Key, V: Element>(&self, slots: u32) -> Result<Handle<Map<K, V>>> {
        self.make_map_with_hasher(slots)
    }

    /// Create an empty map hashing keys with `H`.
    pub fn make_map_with_hasher<K: Key, V: Element, H: KeyHasher>(&self, slots: u32) -> Result<Handle<Map<K, V, H>>> {
        self.make_with(16, Map::<K, V, H>::DESCRIPTOR, |memory, at| {
            constituent::construct_empty(memory, Map::<K, V, H>::DESCRIPTOR, at)?;
            if slots > 0 {
                map::create_table(memory, at, K::DESCRIPTOR, V::DESCRIPTOR, slots)?;
            }
            Ok(())
        })
    }

    /// Create an empty join map. With `slots == 0` the table is allocated on
    /// the first push.
    pub fn make_join_map<V: Element>(&self, slots: u32) -> Result<Handle<JoinMap<V>>> {
        self.make_with(16, JoinMap::<V>::DESCRIPTOR, |memory, at| {
            constituent::construct_empty(memory, JoinMap::<V>::DESCRIPTOR, at)?;
            if slots > 0 {
                join_map::create_table(memory, at, V::DESCRIPTOR, slots)?;
            }
            Ok(())
        })
    }

    /// A handle to `handle`'s referent in the current block: the same object
    /// if it already lives there, otherwise a deep copy.
    pub fn deep_copy_to_current_block<T: Referent>(&self, handle: &Handle<T>) -> Result<Handle<T>> {
        if self.contains(handle) {
            return Ok(handle.clone());
        }
        let descriptor = handle.descriptor();
        let mut memory = self.current.write();
        let copied = handle
            .place()
            .read(|src, target| constituent::deep_copy(src, descriptor, target, &mut memory))?;
        Ok(Handle::adopt(Place::new(&self.current, &memory, copied), descriptor))
    }
}

impl std::fmt::Debug for Allocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("current", &self.current.id())
            .field("inactive", &self.inactive.len())
            .field("pinned", &self.pinned.len())
            .finish()
    }
}

/// Guard returned by [`Allocator::scoped_block`].
///
/// Dereferences to the allocator; dropping it makes the previous block
/// current again.
pub struct BlockScope<'a> {
    allocator: &'a mut Allocator,
    previous: Option<Block>,
}

impl Deref for BlockScope<'_> {
    type Target = Allocator;

    fn deref(&self) -> &Allocator {
        self.allocator
    }
}

impl DerefMut for BlockScope<'_> {
    fn deref_mut(&mut self) -> &mut Allocator {
        self.allocator
    }
}

impl Drop for BlockScope<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let scoped = std::mem::replace(&mut self.allocator.current, previous);
            tracing::debug!(
                block = %scoped.id(),
                restored = %self.allocator.current.id(),
                "Left scoped block"
            );
            self.allocator.retire(scoped);
        }
    }
}
