//! Hash maps.
//!
//! A map is a 16-byte reference to an open-addressed table body (see
//! [`pair_array`](super::pair_array)). Keys are compared by value; the table
//! doubles before an insertion would take it past two thirds full.

use super::hash::{ByteMixHasher, Key, KeyHasher, Lookup, key_matches, query_hash};
use super::pair_array::{self, PAIR_ARRAY_DESCRIPTOR, PairHeader, Probe};
use crate::arena::{Block, BlockMemory, Place};
use crate::error::Result;
use crate::object::constituent::{self, Retired};
use crate::object::element::{self, element_referent, sealed};
use crate::object::{Element, Slot, Store};
use crate::types::{ArenaOffset, ObjectKind, TypeDescriptor};
use std::fmt;
use std::marker::PhantomData;

pub(crate) const MAP_DESCRIPTOR: TypeDescriptor = TypeDescriptor::object(ObjectKind::Map);

/// Slots a map's table starts with when it is first written to.
pub const DEFAULT_MAP_SLOTS: u32 = 16;

/// The table a map at `at` refers to.
pub(crate) fn table(memory: &BlockMemory, at: ArenaOffset) -> Result<Option<ArenaOffset>> {
    match memory.resolve_rel(at)? {
        None => Ok(None),
        Some((target, descriptor)) if descriptor == PAIR_ARRAY_DESCRIPTOR => Ok(Some(target)),
        Some((_, descriptor)) => Err(memory.corruption(at, format!("map refers to {descriptor}"))),
    }
}

/// Give the map at `at` a fresh table of `slots` slots.
pub(crate) fn create_table(
    memory: &mut BlockMemory,
    at: ArenaOffset,
    key: TypeDescriptor,
    value: TypeDescriptor,
    slots: u32,
) -> Result<ArenaOffset> {
    let body = pair_array::allocate(memory, key, value, slots)?;
    memory.write_rel(at, body, PAIR_ARRAY_DESCRIPTOR);
    Ok(body)
}

fn ensure_table(memory: &mut BlockMemory, at: ArenaOffset, key: TypeDescriptor, value: TypeDescriptor) -> Result<ArenaOffset> {
    match table(memory, at)? {
        Some(body) => Ok(body),
        None => create_table(memory, at, key, value, DEFAULT_MAP_SLOTS),
    }
}

/// Replace the table with one of twice the size. The old table goes to
/// `retired`.
fn grow(memory: &mut BlockMemory, at: ArenaOffset, body: ArenaOffset, retired: &mut Retired) -> Result<ArenaOffset> {
    let grown = pair_array::double(memory, body)?;
    memory.write_rel(at, grown, PAIR_ARRAY_DESCRIPTOR);
    retired.push(PAIR_ARRAY_DESCRIPTOR, body);
    Ok(grown)
}

struct Entry {
    body: ArenaOffset,
    slot: u32,
    value_at: ArenaOffset,
    inserted: bool,
}

/// Find the entry for `key`, inserting it with an empty value if absent.
///
/// A table replaced by doubling is left in `retired` for the caller to
/// release after it has stored the value.
fn entry<K, V, H, Q>(memory: &mut BlockMemory, at: ArenaOffset, key: &Q, retired: &mut Retired) -> Result<Entry>
where
    K: Lookup<Q> + for<'q> Store<&'q Q>,
    V: Element,
    H: KeyHasher,
    Q: ?Sized,
{
    let hash = query_hash::<K, Q, H>(key);
    let mut body = ensure_table(memory, at, K::DESCRIPTOR, V::DESCRIPTOR)?;
    let mut header = pair_array::header(memory, body)?;
    let matches = |memory: &BlockMemory, stored: ArenaOffset| key_matches::<K, Q>(memory, stored, key);

    let slot = match pair_array::probe(memory, &header, body, hash, matches)? {
        Probe::Found(slot) => {
            return Ok(Entry {
                body,
                slot,
                value_at: header.value_at(body, slot),
                inserted: false,
            });
        }
        Probe::Vacant(slot) if !header.needs_growth() => slot,
        Probe::Vacant(_) => {
            body = grow(memory, at, body, retired)?;
            header = pair_array::header(memory, body)?;
            match pair_array::probe(memory, &header, body, hash, matches)? {
                Probe::Vacant(slot) => slot,
                Probe::Found(slot) => return Err(memory.corruption(header.record(body, slot), "key appeared while doubling")),
            }
        }
    };

    K::store(memory, header.key_at(body, slot), key)?;
    let value_at = header.value_at(body, slot);
    if let Err(e) = constituent::construct_empty(memory, V::DESCRIPTOR, value_at) {
        constituent::destroy(memory, K::DESCRIPTOR, header.key_at(body, slot))?;
        return Err(e);
    }
    pair_array::occupy(memory, &header, body, slot, hash);
    Ok(Entry {
        body,
        slot,
        value_at,
        inserted: true,
    })
}

/// Store `value` into `entry`. A key inserted for it is removed again if
/// the value cannot be built.
fn store_value<V, S>(memory: &mut BlockMemory, entry: Entry, value: S) -> Result<bool>
where
    V: Store<S>,
{
    if !entry.inserted {
        constituent::assign(memory, V::DESCRIPTOR, entry.value_at, |memory| {
            V::store(memory, entry.value_at, value)
        })?;
        return Ok(false);
    }
    if let Err(e) = V::store(memory, entry.value_at, value) {
        let header = pair_array::header(memory, entry.body)?;
        pair_array::vacate(memory, &header, entry.body, entry.slot)?;
        return Err(e);
    }
    Ok(true)
}

fn find<K, H, Q>(memory: &BlockMemory, at: ArenaOffset, key: &Q) -> Result<Option<(PairHeader, ArenaOffset, u32)>>
where
    K: Lookup<Q>,
    H: KeyHasher,
    Q: ?Sized,
{
    let Some(body) = table(memory, at)? else {
        return Ok(None);
    };
    let header = pair_array::header(memory, body)?;
    let hash = query_hash::<K, Q, H>(key);
    match pair_array::probe(memory, &header, body, hash, |memory, stored| {
        key_matches::<K, Q>(memory, stored, key)
    })? {
        Probe::Found(slot) => Ok(Some((header, body, slot))),
        Probe::Vacant(_) => Ok(None),
    }
}

fn conforms_to(memory: &BlockMemory, at: ArenaOffset, key: TypeDescriptor, value: TypeDescriptor) -> Result<bool> {
    match table(memory, at)? {
        Some(body) => {
            let header = pair_array::header(memory, body)?;
            Ok(header.key == key && header.value == value)
        }
        None => Ok(true),
    }
}

/// A hash map from `K` to `V` stored in a block.
///
/// `H` picks the hash function; every reader of a map must use the same one.
///
/// Removing entries is limited: [`Map::set_unused`] is only safe for the key
/// inserted last, since removing any other key can cut the probe chain of
/// keys inserted after it.
pub struct Map<K: Key, V: Element, H: KeyHasher = ByteMixHasher> {
    place: Place,
    _marker: PhantomData<fn() -> (K, V, H)>,
}

impl<K: Key, V: Element, H: KeyHasher> Map<K, V, H> {
    pub(crate) fn new(place: Place) -> Self {
        Self {
            place,
            _marker: PhantomData,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> Result<u32> {
        self.place.read(|memory, at| match table(memory, at)? {
            Some(body) => Ok(pair_array::header(memory, body)?.used),
            None => Ok(0),
        })
    }

    /// Check if the map has no entries.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of slots in the table, 0 before the first insertion.
    pub fn capacity(&self) -> Result<u32> {
        self.place.read(|memory, at| match table(memory, at)? {
            Some(body) => Ok(pair_array::header(memory, body)?.slots),
            None => Ok(0),
        })
    }

    /// The value slot for `key`, inserting the key with an empty value if
    /// it is absent.
    pub fn index<Q>(&self, key: &Q) -> Result<Slot<V>>
    where
        Q: ?Sized,
        K: Lookup<Q> + for<'q> Store<&'q Q>,
    {
        self.place.write(|memory, at| {
            let mut retired = Retired::default();
            let entry = entry::<K, V, H, Q>(memory, at, key, &mut retired);
            let entry = retired.finish(memory, entry)?;
            Ok(Slot::new(self.place.moved_to(memory, entry.value_at)))
        })
    }

    /// Insert or replace the value for `key`. Returns true if the key is new.
    ///
    /// When the value cannot be built, a newly inserted key is removed again
    /// and an existing key is left holding the empty value.
    pub fn insert<Q, S>(&self, key: &Q, value: S) -> Result<bool>
    where
        Q: ?Sized,
        K: Lookup<Q> + for<'q> Store<&'q Q>,
        V: Store<S>,
    {
        self.place.write(|memory, at| {
            let mut retired = Retired::default();
            let inserted = entry::<K, V, H, Q>(memory, at, key, &mut retired)
                .and_then(|entry| store_value::<V, S>(memory, entry, value));
            retired.finish(memory, inserted)
        })
    }

    /// Read the value for `key`.
    pub fn get<Q>(&self, key: &Q) -> Result<Option<V::View>>
    where
        Q: ?Sized,
        K: Lookup<Q>,
    {
        self.place.read(|memory, at| match find::<K, H, Q>(memory, at, key)? {
            Some((header, body, slot)) => Ok(Some(V::view(self.place.block(), memory, header.value_at(body, slot))?)),
            None => Ok(None),
        })
    }

    /// The value slot for `key` if present.
    pub fn slot<Q>(&self, key: &Q) -> Result<Option<Slot<V>>>
    where
        Q: ?Sized,
        K: Lookup<Q>,
    {
        self.place.read(|memory, at| {
            Ok(find::<K, H, Q>(memory, at, key)?
                .map(|(header, body, slot)| Slot::new(self.place.moved_to(memory, header.value_at(body, slot)))))
        })
    }

    /// 1 if `key` is present, 0 otherwise.
    pub fn count<Q>(&self, key: &Q) -> Result<u32>
    where
        Q: ?Sized,
        K: Lookup<Q>,
    {
        self.place.read(|memory, at| Ok(u32::from(find::<K, H, Q>(memory, at, key)?.is_some())))
    }

    /// Check if `key` is present.
    pub fn contains_key<Q>(&self, key: &Q) -> Result<bool>
    where
        Q: ?Sized,
        K: Lookup<Q>,
    {
        Ok(self.count(key)? == 1)
    }

    /// Remove `key`, destroying its key and value. Returns false if absent.
    ///
    /// Only safe for the key inserted last; see the type documentation.
    pub fn set_unused<Q>(&self, key: &Q) -> Result<bool>
    where
        Q: ?Sized,
        K: Lookup<Q>,
    {
        self.place.write(|memory, at| match find::<K, H, Q>(memory, at, key)? {
            Some((header, body, slot)) => {
                pair_array::vacate(memory, &header, body, slot)?;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    /// Iterate over the entries in slot order.
    pub fn iter(&self) -> MapIter<K, V, H> {
        MapIter {
            map: self.clone(),
            next: 0,
        }
    }

    /// Offset of the map in its block.
    pub fn offset(&self) -> ArenaOffset {
        self.place.at()
    }

    fn entry_from(&self, from: u32) -> Result<Option<(u32, K::View, V::View)>> {
        self.place.read(|memory, at| {
            let Some(body) = table(memory, at)? else {
                return Ok(None);
            };
            let header = pair_array::header(memory, body)?;
            for slot in from..header.slots {
                if pair_array::read_hash(memory, &header, body, slot) == super::hash::UNUSED_HASH {
                    continue;
                }
                let block = self.place.block();
                let key = K::view(block, memory, header.key_at(body, slot))?;
                let value = V::view(block, memory, header.value_at(body, slot))?;
                return Ok(Some((slot, key, value)));
            }
            Ok(None)
        })
    }
}

impl<K: Key, V: Element, H: KeyHasher> Clone for Map<K, V, H> {
    fn clone(&self) -> Self {
        Self::new(self.place.clone())
    }
}

impl<K: Key, V: Element, H: KeyHasher> fmt::Debug for Map<K, V, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("place", &self.place)
            .field("key", &std::any::type_name::<K>())
            .field("value", &std::any::type_name::<V>())
            .finish()
    }
}

/// Iterator over the entries of a [`Map`].
///
/// Walks the table slot by slot; if the table doubles mid-iteration the
/// walk continues in the new table and may repeat or skip entries.
pub struct MapIter<K: Key, V: Element, H: KeyHasher> {
    map: Map<K, V, H>,
    next: u32,
}

impl<K: Key, V: Element, H: KeyHasher> Iterator for MapIter<K, V, H> {
    type Item = Result<(K::View, V::View)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.map.entry_from(self.next) {
            Ok(Some((slot, key, value))) => {
                self.next = slot + 1;
                Some(Ok((key, value)))
            }
            Ok(None) => None,
            Err(e) => {
                self.next = u32::MAX;
                Some(Err(e))
            }
        }
    }
}

impl<K: Key, V: Element, H: KeyHasher> sealed::Sealed for Map<K, V, H> {}

impl<K: Key, V: Element, H: KeyHasher> Element for Map<K, V, H> {
    const DESCRIPTOR: TypeDescriptor = MAP_DESCRIPTOR;
    type View = Map<K, V, H>;

    fn view(block: &Block, memory: &BlockMemory, at: ArenaOffset) -> Result<Self::View> {
        Ok(Map::new(Place::new(block, memory, at)))
    }

    fn conforms(memory: &BlockMemory, at: ArenaOffset) -> Result<bool> {
        conforms_to(memory, at, K::DESCRIPTOR, V::DESCRIPTOR)
    }
}

impl<'a, K: Key, V: Element, H: KeyHasher> Store<&'a Map<K, V, H>> for Map<K, V, H> {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a Map<K, V, H>) -> Result<()> {
        element::store_from_place(memory, at, &value.place, MAP_DESCRIPTOR)
    }
}

element_referent! { impl[K: Key, V: Element, H: KeyHasher] Map<K, V, H>; }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::AllocationPolicy;
    use crate::error::RelocError;
    use crate::object::Str;

    fn map_in<K: Key, V: Element>(block: &Block, slots: Option<u32>) -> Map<K, V> {
        let mut memory = block.write();
        let at = memory.allocate(16).unwrap();
        memory.set_ref_count(at, 1);
        constituent::construct_empty(&mut memory, MAP_DESCRIPTOR, at).unwrap();
        if let Some(slots) = slots {
            create_table(&mut memory, at, K::DESCRIPTOR, V::DESCRIPTOR, slots).unwrap();
        }
        Map::new(Place::new(block, &memory, at))
    }

    #[test]
    fn insert_get_and_replace() {
        let block = Block::create(8192, AllocationPolicy::Reuse, false);
        let map = map_in::<u64, u32>(&block, None);
        assert_eq!(map.capacity().unwrap(), 0);
        assert_eq!(map.get(&1).unwrap(), None);

        assert!(map.insert(&1, 10u32).unwrap());
        assert!(map.insert(&2, 20u32).unwrap());
        assert!(!map.insert(&1, 11u32).unwrap());

        assert_eq!(map.get(&1).unwrap(), Some(11));
        assert_eq!(map.get(&2).unwrap(), Some(20));
        assert_eq!(map.len().unwrap(), 2);
        assert_eq!(map.capacity().unwrap(), DEFAULT_MAP_SLOTS);
    }

    #[test]
    fn index_inserts_empty_values() {
        let block = Block::create(8192, AllocationPolicy::Reuse, false);
        let map = map_in::<u32, u64>(&block, None);
        let slot = map.index(&7).unwrap();
        assert_eq!(slot.get().unwrap(), 0);
        slot.set(70u64).unwrap();
        assert_eq!(map.get(&7).unwrap(), Some(70));
        assert_eq!(map.index(&7).unwrap().get().unwrap(), 70);
        assert_eq!(map.count(&7).unwrap(), 1);
        assert_eq!(map.count(&8).unwrap(), 0);
    }

    #[test]
    fn doubles_before_passing_two_thirds() {
        let block = Block::create(8192, AllocationPolicy::Reuse, false);
        let map = map_in::<u64, u64>(&block, Some(6));

        for key in 0..4u64 {
            map.insert(&key, key * 100).unwrap();
        }
        assert_eq!(map.capacity().unwrap(), 6);

        map.insert(&4, 400u64).unwrap();
        assert_eq!(map.capacity().unwrap(), 12);
        for key in 0..5u64 {
            assert_eq!(map.get(&key).unwrap(), Some(key * 100));
        }
    }

    #[test]
    fn string_keys_and_values() {
        let block = Block::create(16 * 1024, AllocationPolicy::Reuse, false);
        let map = map_in::<Str, Str>(&block, None);
        map.insert("short", "v1").unwrap();
        map.insert("a key long enough to live out of line", "v2").unwrap();

        assert_eq!(map.get("short").unwrap().unwrap().text().unwrap(), "v1");
        let long = "a key long enough to live out of line".to_string();
        assert_eq!(map.get(&long).unwrap().unwrap().text().unwrap(), "v2");
        assert!(map.get("missing").unwrap().is_none());

        let mut keys: Vec<String> = map.iter().map(|e| e.unwrap().0.text().unwrap()).collect();
        keys.sort();
        assert_eq!(keys, ["a key long enough to live out of line", "short"]);
    }

    #[test]
    fn set_unused_last_inserted() {
        let block = Block::create(8192, AllocationPolicy::Reuse, false);
        let map = map_in::<i32, Str>(&block, None);
        map.insert(&1, "one").unwrap();
        map.insert(&2, "a value that lives out of line").unwrap();
        let live = block.live_objects();

        assert!(map.set_unused(&2).unwrap());
        assert_eq!(map.len().unwrap(), 1);
        assert_eq!(map.count(&2).unwrap(), 0);
        assert_eq!(block.live_objects(), live - 1);
        assert!(!map.set_unused(&2).unwrap());
    }

    #[test]
    fn failed_value_store_removes_new_key() {
        let block = Block::create(512, AllocationPolicy::Reuse, false);
        let map = map_in::<u32, Str>(&block, Some(4));
        let huge = "x".repeat(1024);

        let err = map.insert(&1, huge.as_str()).unwrap_err();
        assert!(matches!(err, RelocError::NotEnoughSpace { .. }));
        assert_eq!(map.len().unwrap(), 0);
        assert_eq!(map.count(&1).unwrap(), 0);
    }

    #[test]
    fn element_types_are_checked() {
        let block = Block::create(8192, AllocationPolicy::Reuse, false);
        let map = map_in::<u32, u32>(&block, Some(4));
        let memory = block.read();
        assert!(<Map<u32, u32> as Element>::conforms(&memory, map.offset()).unwrap());
        assert!(!<Map<u32, u64> as Element>::conforms(&memory, map.offset()).unwrap());
    }
}
