//! Growable arrays.
//!
//! A vector is a 16-byte reference to an array body. The body is allocated
//! on the first push and doubled whenever it fills up; growth always happens
//! in the block that holds the vector.

use super::array::{self, ARRAY_DESCRIPTOR, ArrayHeader};
use crate::arena::{Block, BlockMemory, Place};
use crate::error::{RelocError, Result};
use crate::object::constituent::{self, Retired};
use crate::object::element::{self, element_referent, sealed};
use crate::object::{Element, Slot, Store};
use crate::types::{ArenaOffset, ObjectKind, TypeDescriptor};
use std::fmt;
use std::marker::PhantomData;

pub(crate) const VECTOR_DESCRIPTOR: TypeDescriptor = TypeDescriptor::object(ObjectKind::Vector);

/// The array body a vector at `at` refers to.
pub(crate) fn body(memory: &BlockMemory, at: ArenaOffset) -> Result<Option<ArenaOffset>> {
    match memory.resolve_rel(at)? {
        None => Ok(None),
        Some((target, descriptor)) if descriptor == ARRAY_DESCRIPTOR => Ok(Some(target)),
        Some((_, descriptor)) => Err(memory.corruption(at, format!("vector refers to {descriptor}"))),
    }
}

pub(crate) fn len(memory: &BlockMemory, at: ArenaOffset) -> Result<u32> {
    match body(memory, at)? {
        Some(body) => Ok(array::header(memory, body)?.used),
        None => Ok(0),
    }
}

/// Room for one more element in the body at `body`.
pub(crate) struct Room {
    pub(crate) body: ArenaOffset,
    pub(crate) header: ArrayHeader,
}

impl Room {
    pub(crate) fn next_slot(&self) -> ArenaOffset {
        self.header.slot(self.body, self.header.used)
    }

    /// Count the element stored in [`Room::next_slot`].
    pub(crate) fn commit(&self, memory: &mut BlockMemory) {
        array::set_used(memory, self.body, self.header.used + 1);
    }
}

/// Make room for one more element, growing the body if needed.
///
/// A body replaced by growth goes to `retired`: values being pushed may
/// still live in it.
pub(crate) fn ensure_room(
    memory: &mut BlockMemory,
    at: ArenaOffset,
    element: TypeDescriptor,
    retired: &mut Retired,
) -> Result<Room> {
    let body = match body(memory, at)? {
        None => {
            let created = array::allocate(memory, element, 1)?;
            memory.write_rel(at, created, ARRAY_DESCRIPTOR);
            created
        }
        Some(current) => {
            let header = array::header(memory, current)?;
            if !header.is_full() {
                return Ok(Room { body: current, header });
            }
            let slots = array::doubled(header.slots)?;
            let grown = array::reallocate(memory, current, slots, header.used)?;
            tracing::trace!(block = %memory.id(), from = header.slots, to = slots, "Vector grown");
            memory.write_rel(at, grown, ARRAY_DESCRIPTOR);
            retired.push(ARRAY_DESCRIPTOR, current);
            grown
        }
    };
    Ok(Room {
        body,
        header: array::header(memory, body)?,
    })
}

/// Append a default-constructed element and return its offset.
pub(crate) fn push_empty(
    memory: &mut BlockMemory,
    at: ArenaOffset,
    element: TypeDescriptor,
    retired: &mut Retired,
) -> Result<ArenaOffset> {
    let room = ensure_room(memory, at, element, retired)?;
    let slot = room.next_slot();
    constituent::construct_empty(memory, element, slot)?;
    room.commit(memory);
    Ok(slot)
}

/// Offset of element `index`.
pub(crate) fn element_at(memory: &BlockMemory, at: ArenaOffset, index: u32) -> Result<ArenaOffset> {
    match body(memory, at)? {
        Some(body) => array::element_at(memory, body, index),
        None => Err(RelocError::IndexOutOfBounds {
            index: index as u64,
            len: 0,
        }),
    }
}

/// Destroy the last element. Returns false when the vector is empty.
pub(crate) fn pop(memory: &mut BlockMemory, at: ArenaOffset) -> Result<bool> {
    match body(memory, at)? {
        Some(body) => array::pop(memory, body),
        None => Ok(false),
    }
}

/// Set the length to `new_len`, padding with default values.
pub(crate) fn resize(memory: &mut BlockMemory, at: ArenaOffset, element: TypeDescriptor, new_len: u32) -> Result<()> {
    match body(memory, at)? {
        None if new_len == 0 => Ok(()),
        None => {
            let created = array::allocate(memory, element, new_len)?;
            let header = array::header(memory, created)?;
            for index in 0..new_len {
                constituent::construct_empty(memory, element, header.slot(created, index))?;
            }
            array::set_used(memory, created, new_len);
            memory.write_rel(at, created, ARRAY_DESCRIPTOR);
            Ok(())
        }
        Some(current) => {
            let header = array::header(memory, current)?;
            if new_len <= header.slots {
                for index in new_len..header.used {
                    constituent::destroy(memory, element, header.slot(current, index))?;
                }
                for index in header.used..new_len {
                    constituent::construct_empty(memory, element, header.slot(current, index))?;
                }
                array::set_used(memory, current, new_len);
                return Ok(());
            }
            let grown = array::reallocate(memory, current, new_len, new_len)?;
            memory.write_rel(at, grown, ARRAY_DESCRIPTOR);
            constituent::release(memory, ARRAY_DESCRIPTOR, current)
        }
    }
}

fn conforms_to(memory: &BlockMemory, at: ArenaOffset, element: TypeDescriptor) -> Result<bool> {
    match body(memory, at)? {
        Some(body) => Ok(array::header(memory, body)?.element == element),
        None => Ok(true),
    }
}

/// A growable sequence of `T` stored in a block.
///
/// ```ignore
/// let numbers = allocator.make_vector::<u32>(0)?;
/// let numbers = numbers.get()?;
/// numbers.push(1u32)?;
/// numbers.push(2u32)?;
/// assert_eq!(numbers.to_vec()?, vec![1, 2]);
/// ```
pub struct Vector<T: Element> {
    place: Place,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> Vector<T> {
    pub(crate) fn new(place: Place) -> Self {
        Self {
            place,
            _marker: PhantomData,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> Result<u32> {
        self.place.read(len)
    }

    /// Check if the vector is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of elements the current body holds before growing.
    pub fn capacity(&self) -> Result<u32> {
        self.place.read(|memory, at| match body(memory, at)? {
            Some(body) => Ok(array::header(memory, body)?.slots),
            None => Ok(0),
        })
    }

    /// Read element `index`.
    pub fn get(&self, index: u32) -> Result<T::View> {
        self.place.read(|memory, at| {
            let slot = element_at(memory, at, index)?;
            T::view(self.place.block(), memory, slot)
        })
    }

    /// The slot holding element `index`.
    pub fn slot(&self, index: u32) -> Result<Slot<T>> {
        self.place.read(|memory, at| {
            let slot = element_at(memory, at, index)?;
            Ok(Slot::new(self.place.moved_to(memory, slot)))
        })
    }

    /// Replace element `index`.
    pub fn set<S>(&self, index: u32, value: S) -> Result<()>
    where
        T: Store<S>,
    {
        self.slot(index)?.set(value)
    }

    /// Append an element, doubling the body when it is full.
    ///
    /// If building the element fails the vector keeps its old length.
    pub fn push<S>(&self, value: S) -> Result<()>
    where
        T: Store<S>,
    {
        self.place.write(|memory, at| {
            let mut retired = Retired::default();
            let stored = ensure_room(memory, at, T::DESCRIPTOR, &mut retired).and_then(|room| {
                T::store(memory, room.next_slot(), value)?;
                room.commit(memory);
                Ok(())
            });
            retired.finish(memory, stored)
        })
    }

    /// Append a default-constructed element and return its slot.
    pub fn push_default(&self) -> Result<Slot<T>> {
        self.place.write(|memory, at| {
            let mut retired = Retired::default();
            let slot = push_empty(memory, at, T::DESCRIPTOR, &mut retired);
            let slot = retired.finish(memory, slot)?;
            Ok(Slot::new(self.place.moved_to(memory, slot)))
        })
    }

    /// Destroy the last element. Returns false when the vector was empty.
    pub fn pop(&self) -> Result<bool> {
        self.place.write(pop)
    }

    /// Destroy every element, keeping the capacity.
    pub fn clear(&self) -> Result<()> {
        self.place.write(|memory, at| match body(memory, at)? {
            Some(body) => array::clear(memory, body),
            None => Ok(()),
        })
    }

    /// Set the length, destroying trailing elements or appending default ones.
    pub fn resize(&self, len: u32) -> Result<()> {
        self.place.write(|memory, at| resize(memory, at, T::DESCRIPTOR, len))
    }

    /// Overwrite every element with `value`.
    pub fn fill<S: Clone>(&self, value: S) -> Result<()>
    where
        T: Store<S>,
    {
        for index in 0..self.len()? {
            self.set(index, value.clone())?;
        }
        Ok(())
    }

    /// Iterate over the elements.
    pub fn iter(&self) -> VectorIter<T> {
        VectorIter {
            vector: self.clone(),
            next: 0,
        }
    }

    /// Read every element.
    pub fn to_vec(&self) -> Result<Vec<T::View>> {
        self.iter().collect()
    }

    /// Run `f` on the raw bytes of the elements.
    pub fn with_raw_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.place.read(|memory, at| match body(memory, at)? {
            Some(body) => {
                let header = array::header(memory, body)?;
                Ok(f(memory.bytes(header.slot(body, 0), header.used as u64 * header.element_size)))
            }
            None => Ok(f(&[])),
        })
    }

    /// Offset of the vector in its block.
    pub fn offset(&self) -> ArenaOffset {
        self.place.at()
    }
}

impl<T: Element> Clone for Vector<T> {
    fn clone(&self) -> Self {
        Self::new(self.place.clone())
    }
}

impl<T: Element> fmt::Debug for Vector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vector")
            .field("place", &self.place)
            .field("element", &std::any::type_name::<T>())
            .finish()
    }
}

/// Iterator over a [`Vector`].
///
/// Reads one element per step, so it observes concurrent pushes and pops.
pub struct VectorIter<T: Element> {
    vector: Vector<T>,
    next: u32,
}

impl<T: Element> Iterator for VectorIter<T> {
    type Item = Result<T::View>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.vector.len() {
            Ok(len) if self.next < len => {
                let item = self.vector.get(self.next);
                self.next += 1;
                Some(item)
            }
            Ok(_) => None,
            Err(e) => {
                self.next = u32::MAX;
                Some(Err(e))
            }
        }
    }
}

impl<T: Element> sealed::Sealed for Vector<T> {}

impl<T: Element> Element for Vector<T> {
    const DESCRIPTOR: TypeDescriptor = VECTOR_DESCRIPTOR;
    type View = Vector<T>;

    fn view(block: &Block, memory: &BlockMemory, at: ArenaOffset) -> Result<Vector<T>> {
        Ok(Vector::new(Place::new(block, memory, at)))
    }

    fn conforms(memory: &BlockMemory, at: ArenaOffset) -> Result<bool> {
        conforms_to(memory, at, T::DESCRIPTOR)
    }
}

impl<'a, T: Element> Store<&'a Vector<T>> for Vector<T> {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a Vector<T>) -> Result<()> {
        element::store_from_place(memory, at, &value.place, VECTOR_DESCRIPTOR)
    }
}

element_referent! { impl[T: Element] Vector<T>; }
