//! Multimaps keyed by precomputed hashes.
//!
//! Built for join probes and shuffle partitioning: the caller has already
//! collapsed its key to a hash, and several values may share one.

use super::hash::storable_hash;
use super::join_pair_array::{self, JOIN_PAIR_ARRAY_DESCRIPTOR, JoinHeader, Probe};
use crate::arena::{Block, BlockMemory, Place};
use crate::error::Result;
use crate::object::constituent::Retired;
use crate::object::element::{self, element_referent, sealed};
use crate::object::{Element, Slot, Store};
use crate::types::{ArenaOffset, ObjectKind, TypeDescriptor};
use std::fmt;
use std::marker::PhantomData;

pub(crate) const JOIN_MAP_DESCRIPTOR: TypeDescriptor = TypeDescriptor::object(ObjectKind::JoinMap);

/// Slots a join map's table starts with when it is first written to.
pub const DEFAULT_JOIN_MAP_SLOTS: u32 = 16;

pub(crate) fn table(memory: &BlockMemory, at: ArenaOffset) -> Result<Option<ArenaOffset>> {
    match memory.resolve_rel(at)? {
        None => Ok(None),
        Some((target, descriptor)) if descriptor == JOIN_PAIR_ARRAY_DESCRIPTOR => Ok(Some(target)),
        Some((_, descriptor)) => Err(memory.corruption(at, format!("join map refers to {descriptor}"))),
    }
}

pub(crate) fn create_table(memory: &mut BlockMemory, at: ArenaOffset, value: TypeDescriptor, slots: u32) -> Result<ArenaOffset> {
    let body = join_pair_array::allocate(memory, value, slots)?;
    memory.write_rel(at, body, JOIN_PAIR_ARRAY_DESCRIPTOR);
    Ok(body)
}

fn grow(memory: &mut BlockMemory, at: ArenaOffset, body: ArenaOffset, retired: &mut Retired) -> Result<ArenaOffset> {
    let grown = join_pair_array::double(memory, body)?;
    memory.write_rel(at, grown, JOIN_PAIR_ARRAY_DESCRIPTOR);
    retired.push(JOIN_PAIR_ARRAY_DESCRIPTOR, body);
    Ok(grown)
}

/// Add an empty value under `hash` and return where it lives, along with
/// the table and slot it was added to.
///
/// Tables and overflow bodies replaced on the way are left in `retired`.
fn push_empty(
    memory: &mut BlockMemory,
    at: ArenaOffset,
    value: TypeDescriptor,
    hash: u64,
    retired: &mut Retired,
) -> Result<(ArenaOffset, ArenaOffset, u32)> {
    let hash = storable_hash(hash);
    let mut body = match table(memory, at)? {
        Some(body) => body,
        None => create_table(memory, at, value, DEFAULT_JOIN_MAP_SLOTS)?,
    };
    let mut header = join_pair_array::header(memory, body)?;

    let slot = match join_pair_array::probe(memory, &header, body, hash)? {
        Probe::Found(slot) => {
            let value_at = join_pair_array::push_overflow(memory, &header, body, slot, retired)?;
            return Ok((value_at, body, slot));
        }
        Probe::Vacant(slot) if !header.needs_growth() => slot,
        Probe::Vacant(_) => {
            body = grow(memory, at, body, retired)?;
            header = join_pair_array::header(memory, body)?;
            match join_pair_array::probe(memory, &header, body, hash)? {
                Probe::Vacant(slot) => slot,
                Probe::Found(slot) => return Err(memory.corruption(header.record(body, slot), "hash appeared while doubling")),
            }
        }
    };
    let value_at = join_pair_array::occupy(memory, &header, body, slot, hash)?;
    Ok((value_at, body, slot))
}

fn locate(memory: &BlockMemory, at: ArenaOffset, hash: u64) -> Result<Option<(JoinHeader, ArenaOffset, u32)>> {
    let Some(body) = table(memory, at)? else {
        return Ok(None);
    };
    let header = join_pair_array::header(memory, body)?;
    match join_pair_array::probe(memory, &header, body, storable_hash(hash))? {
        Probe::Found(slot) => Ok(Some((header, body, slot))),
        Probe::Vacant(_) => Ok(None),
    }
}

fn conforms_to(memory: &BlockMemory, at: ArenaOffset, value: TypeDescriptor) -> Result<bool> {
    match table(memory, at)? {
        Some(body) => Ok(join_pair_array::header(memory, body)?.value == value
            && join_pair_array::overflow_element_matches(memory, body, value)?),
        None => Ok(true),
    }
}

/// A multimap from hashes to `V` values stored in a block.
///
/// ```ignore
/// let matches = allocator.make_join_map::<u64>(0)?;
/// let matches = matches.get()?;
/// matches.push_value(hash, 1u64)?;
/// matches.push_value(hash, 2u64)?;
/// assert_eq!(matches.lookup(hash)?.to_vec()?, vec![1, 2]);
/// ```
pub struct JoinMap<V: Element> {
    place: Place,
    _marker: PhantomData<fn() -> V>,
}

impl<V: Element> JoinMap<V> {
    pub(crate) fn new(place: Place) -> Self {
        Self {
            place,
            _marker: PhantomData,
        }
    }

    /// Number of distinct hashes.
    pub fn len(&self) -> Result<u32> {
        self.place.read(|memory, at| match table(memory, at)? {
            Some(body) => Ok(join_pair_array::header(memory, body)?.used),
            None => Ok(0),
        })
    }

    /// Check if the map holds no values.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of slots in the table, 0 before the first push.
    pub fn capacity(&self) -> Result<u32> {
        self.place.read(|memory, at| match table(memory, at)? {
            Some(body) => Ok(join_pair_array::header(memory, body)?.slots),
            None => Ok(0),
        })
    }

    /// Add an empty value under `hash` and return its slot.
    ///
    /// The first value for a hash lives in the table itself, later ones in
    /// the hash's overflow list.
    pub fn push(&self, hash: u64) -> Result<Slot<V>> {
        self.place.write(|memory, at| {
            let mut retired = Retired::default();
            let pushed = push_empty(memory, at, V::DESCRIPTOR, hash, &mut retired);
            let (value_at, _, _) = retired.finish(memory, pushed)?;
            Ok(Slot::new(self.place.moved_to(memory, value_at)))
        })
    }

    /// Add `value` under `hash`. If the value cannot be built, nothing is added.
    pub fn push_value<S>(&self, hash: u64, value: S) -> Result<()>
    where
        V: Store<S>,
    {
        self.place.write(|memory, at| {
            let mut retired = Retired::default();
            let stored = push_empty(memory, at, V::DESCRIPTOR, hash, &mut retired).and_then(|(value_at, body, slot)| {
                if let Err(e) = V::store(memory, value_at, value) {
                    let header = join_pair_array::header(memory, body)?;
                    join_pair_array::remove_newest(memory, &header, body, slot)?;
                    return Err(e);
                }
                Ok(())
            });
            retired.finish(memory, stored)
        })
    }

    /// All values stored under `hash`, oldest first.
    pub fn lookup(&self, hash: u64) -> JoinRecordList<V> {
        JoinRecordList {
            map: self.clone(),
            hash,
        }
    }

    /// Number of values stored under `hash`.
    pub fn count(&self, hash: u64) -> Result<u32> {
        self.lookup(hash).len()
    }

    /// Remove the newest value under `hash`. Returns false if there is none.
    pub fn set_unused(&self, hash: u64) -> Result<bool> {
        self.lookup(hash).set_unused()
    }

    /// Iterate over the record lists of all hashes, in slot order.
    pub fn iter(&self) -> JoinMapIter<V> {
        JoinMapIter {
            map: self.clone(),
            next: 0,
        }
    }

    /// Offset of the join map in its block.
    pub fn offset(&self) -> ArenaOffset {
        self.place.at()
    }

    fn hash_from(&self, from: u32) -> Result<Option<(u32, u64)>> {
        self.place.read(|memory, at| {
            let Some(body) = table(memory, at)? else {
                return Ok(None);
            };
            let header = join_pair_array::header(memory, body)?;
            Ok((from..header.slots)
                .map(|slot| (slot, join_pair_array::read_hash(memory, &header, body, slot)))
                .find(|(_, hash)| *hash != super::hash::UNUSED_HASH))
        })
    }
}

impl<V: Element> Clone for JoinMap<V> {
    fn clone(&self) -> Self {
        Self::new(self.place.clone())
    }
}

impl<V: Element> fmt::Debug for JoinMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinMap")
            .field("place", &self.place)
            .field("value", &std::any::type_name::<V>())
            .finish()
    }
}

/// The values stored under one hash of a [`JoinMap`].
///
/// Index 0 is the value in the table itself; the rest come from the hash's
/// overflow list in insertion order. The list is resolved on every call, so
/// it stays valid while the map grows.
pub struct JoinRecordList<V: Element> {
    map: JoinMap<V>,
    hash: u64,
}

impl<V: Element> JoinRecordList<V> {
    /// The hash the values are stored under.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Number of values: 0 when the hash is absent.
    pub fn len(&self) -> Result<u32> {
        self.map.place.read(|memory, at| match locate(memory, at, self.hash)? {
            Some((header, body, slot)) => join_pair_array::values_in(memory, &header, body, slot),
            None => Ok(0),
        })
    }

    /// Check if no values are stored under the hash.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn value_offset(&self, memory: &BlockMemory, at: ArenaOffset, index: u32) -> Result<ArenaOffset> {
        match locate(memory, at, self.hash)? {
            Some((header, body, slot)) => join_pair_array::value_of(memory, &header, body, slot, index),
            None => Err(crate::error::RelocError::IndexOutOfBounds {
                index: index as u64,
                len: 0,
            }),
        }
    }

    /// Read value `index`.
    pub fn get(&self, index: u32) -> Result<V::View> {
        self.map.place.read(|memory, at| {
            let value_at = self.value_offset(memory, at, index)?;
            V::view(self.map.place.block(), memory, value_at)
        })
    }

    /// The slot holding value `index`.
    pub fn slot(&self, index: u32) -> Result<Slot<V>> {
        self.map.place.read(|memory, at| {
            let value_at = self.value_offset(memory, at, index)?;
            Ok(Slot::new(self.map.place.moved_to(memory, value_at)))
        })
    }

    /// Read every value, oldest first.
    pub fn to_vec(&self) -> Result<Vec<V::View>> {
        (0..self.len()?).map(|index| self.get(index)).collect()
    }

    /// Remove the newest value. Returns false when the list is empty.
    pub fn set_unused(&self) -> Result<bool> {
        self.map.place.write(|memory, at| match locate(memory, at, self.hash)? {
            Some((header, body, slot)) => {
                join_pair_array::remove_newest(memory, &header, body, slot)?;
                Ok(true)
            }
            None => Ok(false),
        })
    }
}

impl<V: Element> fmt::Debug for JoinRecordList<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinRecordList")
            .field("map", &self.map)
            .field("hash", &self.hash)
            .finish()
    }
}

/// Iterator over the record lists of a [`JoinMap`].
pub struct JoinMapIter<V: Element> {
    map: JoinMap<V>,
    next: u32,
}

impl<V: Element> Iterator for JoinMapIter<V> {
    type Item = Result<JoinRecordList<V>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.map.hash_from(self.next) {
            Ok(Some((slot, hash))) => {
                self.next = slot + 1;
                Some(Ok(self.map.lookup(hash)))
            }
            Ok(None) => None,
            Err(e) => {
                self.next = u32::MAX;
                Some(Err(e))
            }
        }
    }
}

impl<V: Element> sealed::Sealed for JoinMap<V> {}

impl<V: Element> Element for JoinMap<V> {
    const DESCRIPTOR: TypeDescriptor = JOIN_MAP_DESCRIPTOR;
    type View = JoinMap<V>;

    fn view(block: &Block, memory: &BlockMemory, at: ArenaOffset) -> Result<Self::View> {
        Ok(JoinMap::new(Place::new(block, memory, at)))
    }

    fn conforms(memory: &BlockMemory, at: ArenaOffset) -> Result<bool> {
        conforms_to(memory, at, V::DESCRIPTOR)
    }
}

impl<'a, V: Element> Store<&'a JoinMap<V>> for JoinMap<V> {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a JoinMap<V>) -> Result<()> {
        element::store_from_place(memory, at, &value.place, JOIN_MAP_DESCRIPTOR)
    }
}

element_referent! { impl[V: Element] JoinMap<V>; }
