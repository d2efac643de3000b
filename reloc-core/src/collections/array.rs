//! Flat arrays.
//!
//! An array body is the one variable-length sequence in the model; vectors,
//! hash tables and long strings are all built from bodies like it.
//!
//! ```text
//! +0   element descriptor  i32
//! +4   reserved            u32
//! +8   used slots          u32
//! +12  total slots         u32
//! +16  slots * element size bytes of element data
//! ```
//!
//! Growth never happens in place: a larger body is allocated, the used
//! elements are copied over, and the old body is released. If the new body
//! cannot be allocated the old one is untouched.

use crate::arena::{Block, BlockMemory, Place};
use crate::error::{RelocError, Result};
use crate::object::constituent::{self, Source};
use crate::object::element::sealed;
use crate::object::{Element, Handle, Referent, Slot, Store};
use crate::types::{ArenaOffset, ObjectKind, TypeDescriptor};
use std::fmt;
use std::marker::PhantomData;

/// Bytes before the first element of an array body.
pub const ARRAY_HEADER_SIZE: u64 = 16;

pub(crate) const ARRAY_DESCRIPTOR: TypeDescriptor = TypeDescriptor::object(ObjectKind::Array);

/// Decoded header of an array body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ArrayHeader {
    pub(crate) element: TypeDescriptor,
    pub(crate) element_size: u64,
    pub(crate) used: u32,
    pub(crate) slots: u32,
}

impl ArrayHeader {
    pub(crate) fn slot(&self, body: ArenaOffset, index: u32) -> ArenaOffset {
        body.add(ARRAY_HEADER_SIZE + index as u64 * self.element_size)
    }

    pub(crate) fn is_full(&self) -> bool {
        self.used >= self.slots
    }
}

pub(crate) fn header(memory: &BlockMemory, body: ArenaOffset) -> Result<ArrayHeader> {
    memory.check_range(body, ARRAY_HEADER_SIZE)?;
    let element = TypeDescriptor::from_raw(memory.read_i32(body));
    let element_size = constituent::element_size(memory, element)?;
    let used = memory.read_u32(body.add(8));
    let slots = memory.read_u32(body.add(12));
    if used > slots {
        return Err(memory.corruption(body, format!("array uses {used} of {slots} slots")));
    }
    memory.check_range(body, ARRAY_HEADER_SIZE + slots as u64 * element_size)?;
    Ok(ArrayHeader {
        element,
        element_size,
        used,
        slots,
    })
}

pub(crate) fn body_size(memory: &BlockMemory, body: ArenaOffset) -> Result<u64> {
    let header = header(memory, body)?;
    Ok(ARRAY_HEADER_SIZE + header.slots as u64 * header.element_size)
}

pub(crate) fn set_used(memory: &mut BlockMemory, body: ArenaOffset, used: u32) {
    memory.write_u32(body.add(8), used);
}

fn write_header(memory: &mut BlockMemory, body: ArenaOffset, element: TypeDescriptor, used: u32, slots: u32) {
    memory.write_i32(body, element.as_raw());
    memory.write_u32(body.add(4), 0);
    memory.write_u32(body.add(8), used);
    memory.write_u32(body.add(12), slots);
}

/// Allocate an empty body with room for `slots` elements and a count of 1.
pub(crate) fn allocate(memory: &mut BlockMemory, element: TypeDescriptor, slots: u32) -> Result<ArenaOffset> {
    let element_size = constituent::element_size(memory, element)?;
    let body = memory.allocate(ARRAY_HEADER_SIZE + slots as u64 * element_size)?;
    memory.set_ref_count(body, 1);
    write_header(memory, body, element, 0, slots);
    Ok(body)
}

/// Capacity after doubling `slots`.
pub(crate) fn doubled(slots: u32) -> Result<u32> {
    match slots {
        0 => Ok(1),
        n => n.checked_mul(2).ok_or_else(|| RelocError::InvalidCapacity {
            requested: n as u64 * 2,
            cause: "array capacity exceeds u32::MAX".to_string(),
        }),
    }
}

/// Build a new body of `new_slots` holding the first `new_used` elements.
///
/// Kept elements are shared with the old body (their counts go up); slots
/// past the old length are default-constructed. The old body is not
/// modified, so the caller decides when to release it.
pub(crate) fn reallocate(memory: &mut BlockMemory, body: ArenaOffset, new_slots: u32, new_used: u32) -> Result<ArenaOffset> {
    debug_assert!(new_used <= new_slots);
    let old = header(memory, body)?;
    let kept = old.used.min(new_used);
    let grown = allocate(memory, old.element, new_slots)?;
    let new = header(memory, grown)?;

    if old.element.is_plain() {
        memory.copy_within(old.slot(body, 0), new.slot(grown, 0), kept as u64 * old.element_size);
    } else {
        for index in 0..kept {
            if let Err(e) = constituent::copy(Source::Local, old.slot(body, index), memory, new.slot(grown, index), old.element) {
                set_used(memory, grown, index);
                discard(memory, grown)?;
                return Err(e);
            }
        }
    }
    for index in kept..new_used {
        constituent::construct_empty(memory, old.element, new.slot(grown, index))?;
    }
    set_used(memory, grown, new_used);
    Ok(grown)
}

fn discard(memory: &mut BlockMemory, body: ArenaOffset) -> Result<()> {
    destroy_body(memory, body)?;
    memory.free(body);
    Ok(())
}

pub(crate) fn copy_body(src: Source<'_>, src_at: ArenaOffset, dst: &mut BlockMemory, dst_at: ArenaOffset) -> Result<()> {
    let old = header(src.memory(dst), src_at)?;
    write_header(dst, dst_at, old.element, 0, old.slots);

    if old.element.is_plain() {
        constituent::copy_bytes(src, old.slot(src_at, 0), dst, old.slot(dst_at, 0), old.used as u64 * old.element_size);
    } else {
        for index in 0..old.used {
            if let Err(e) = constituent::copy(src, old.slot(src_at, index), dst, old.slot(dst_at, index), old.element) {
                set_used(dst, dst_at, index);
                destroy_body(dst, dst_at)?;
                return Err(e);
            }
        }
    }
    set_used(dst, dst_at, old.used);
    Ok(())
}

pub(crate) fn destroy_body(memory: &mut BlockMemory, body: ArenaOffset) -> Result<()> {
    let header = header(memory, body)?;
    if !header.element.is_plain() {
        for index in 0..header.used {
            constituent::destroy(memory, header.element, header.slot(body, index))?;
        }
    }
    set_used(memory, body, 0);
    Ok(())
}

/// Offset of element `index`, checked against the used length.
pub(crate) fn element_at(memory: &BlockMemory, body: ArenaOffset, index: u32) -> Result<ArenaOffset> {
    let header = header(memory, body)?;
    if index >= header.used {
        return Err(RelocError::IndexOutOfBounds {
            index: index as u64,
            len: header.used as u64,
        });
    }
    Ok(header.slot(body, index))
}

/// Destroy the last element. Returns false when the array is empty.
pub(crate) fn pop(memory: &mut BlockMemory, body: ArenaOffset) -> Result<bool> {
    let header = header(memory, body)?;
    if header.used == 0 {
        return Ok(false);
    }
    let last = header.used - 1;
    constituent::destroy(memory, header.element, header.slot(body, last))?;
    set_used(memory, body, last);
    Ok(true)
}

/// Destroy every element, keeping the capacity.
pub(crate) fn clear(memory: &mut BlockMemory, body: ArenaOffset) -> Result<()> {
    destroy_body(memory, body)
}

/// Store `value` after the last element of a body that has room.
pub(crate) fn push_into<T, S>(memory: &mut BlockMemory, body: ArenaOffset, value: S) -> Result<()>
where
    T: Store<S>,
{
    let header = header(memory, body)?;
    if header.is_full() {
        return Err(RelocError::ArrayFull {
            capacity: header.slots,
        });
    }
    T::store(memory, header.slot(body, header.used), value)?;
    set_used(memory, body, header.used + 1);
    Ok(())
}

/// Whether the body at `at` holds elements of type `T`.
pub(crate) fn holds<T: Element>(memory: &BlockMemory, body: ArenaOffset) -> Result<bool> {
    Ok(header(memory, body)?.element == T::DESCRIPTOR)
}

/// A fixed-capacity array body of `T` elements.
///
/// Arrays are only reachable through references: allocate one with
/// [`Allocator::make_array`](crate::arena::Allocator::make_array). Growing
/// produces a new array and leaves this one as it was.
pub struct Array<T: Element> {
    place: Place,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> Array<T> {
    pub(crate) fn new(place: Place) -> Self {
        Self {
            place,
            _marker: PhantomData,
        }
    }

    fn header(&self) -> Result<ArrayHeader> {
        self.place.read(header)
    }

    /// Number of elements.
    pub fn len(&self) -> Result<u32> {
        Ok(self.header()?.used)
    }

    /// Check if the array holds no elements.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of slots.
    pub fn capacity(&self) -> Result<u32> {
        Ok(self.header()?.slots)
    }

    /// Whether every slot is used.
    pub fn is_full(&self) -> Result<bool> {
        Ok(self.header()?.is_full())
    }

    /// Read element `index`.
    pub fn get(&self, index: u32) -> Result<T::View> {
        self.place.read(|memory, body| {
            let at = element_at(memory, body, index)?;
            T::view(self.place.block(), memory, at)
        })
    }

    /// The slot holding element `index`.
    pub fn slot(&self, index: u32) -> Result<Slot<T>> {
        self.place.read(|memory, body| {
            let at = element_at(memory, body, index)?;
            Ok(Slot::new(self.place.moved_to(memory, at)))
        })
    }

    /// Replace element `index`.
    pub fn set<S>(&self, index: u32, value: S) -> Result<()>
    where
        T: Store<S>,
    {
        self.slot(index)?.set(value)
    }

    /// Append an element. Fails with `ArrayFull` when no slot is left.
    pub fn push<S>(&self, value: S) -> Result<()>
    where
        T: Store<S>,
    {
        self.place.write(|memory, body| push_into::<T, S>(memory, body, value))
    }

    /// Destroy the last element. Returns false when the array was empty.
    pub fn pop(&self) -> Result<bool> {
        self.place.write(pop)
    }

    /// Destroy every element, keeping the capacity.
    pub fn clear(&self) -> Result<()> {
        self.place.write(clear)
    }

    /// A new array with twice the capacity holding the same elements.
    pub fn double_capacity(&self) -> Result<Handle<Array<T>>> {
        self.place.write(|memory, body| {
            let header = header(memory, body)?;
            let grown = reallocate(memory, body, doubled(header.slots)?, header.used)?;
            Ok(Handle::adopt(self.place.moved_to(memory, grown), ARRAY_DESCRIPTOR))
        })
    }

    /// A new array of exactly `len` elements: longer arrays are truncated,
    /// shorter ones padded with default values.
    pub fn resize(&self, len: u32) -> Result<Handle<Array<T>>> {
        self.place.write(|memory, body| {
            let resized = reallocate(memory, body, len, len)?;
            Ok(Handle::adopt(self.place.moved_to(memory, resized), ARRAY_DESCRIPTOR))
        })
    }

    /// Run `f` on the raw bytes of the used elements.
    pub fn with_raw_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.place.read(|memory, body| {
            let header = header(memory, body)?;
            Ok(f(memory.bytes(header.slot(body, 0), header.used as u64 * header.element_size)))
        })
    }

    /// Read every element.
    pub fn to_vec(&self) -> Result<Vec<T::View>> {
        self.place.read(|memory, body| {
            let header = header(memory, body)?;
            (0..header.used)
                .map(|index| T::view(self.place.block(), memory, header.slot(body, index)))
                .collect()
        })
    }

    /// Offset of the array body in its block.
    pub fn offset(&self) -> ArenaOffset {
        self.place.at()
    }
}

impl<T: Element> Clone for Array<T> {
    fn clone(&self) -> Self {
        Self::new(self.place.clone())
    }
}

impl<T: Element> fmt::Debug for Array<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("place", &self.place)
            .field("element", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Element> sealed::Sealed for Array<T> {}

impl<T: Element> Referent for Array<T> {
    type Target = Array<T>;

    fn expected() -> TypeDescriptor {
        ARRAY_DESCRIPTOR
    }

    fn accepts(memory: &BlockMemory, descriptor: TypeDescriptor, at: ArenaOffset) -> Result<bool> {
        Ok(descriptor == ARRAY_DESCRIPTOR && holds::<T>(memory, at)?)
    }

    fn target(block: &Block, memory: &BlockMemory, at: ArenaOffset, _descriptor: TypeDescriptor) -> Result<Array<T>> {
        Ok(Array::new(Place::new(block, memory, at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::AllocationPolicy;

    fn array_of<T: Element>(block: &Block, slots: u32) -> Array<T> {
        let mut memory = block.write();
        let body = allocate(&mut memory, T::DESCRIPTOR, slots).unwrap();
        Array::new(Place::new(block, &memory, body))
    }

    #[test]
    fn push_until_full() {
        let block = Block::create(4096, AllocationPolicy::Reuse, false);
        let array = array_of::<u32>(&block, 2);

        array.push(1u32).unwrap();
        array.push(2u32).unwrap();
        assert!(array.is_full().unwrap());
        assert!(matches!(array.push(3u32), Err(RelocError::ArrayFull { capacity: 2 })));
        assert_eq!(array.to_vec().unwrap(), vec![1, 2]);
    }

    #[test]
    fn double_capacity_keeps_elements_and_original() {
        let block = Block::create(4096, AllocationPolicy::Reuse, false);
        let array = array_of::<i64>(&block, 2);
        array.push(10i64).unwrap();
        array.push(20i64).unwrap();

        let grown = array.double_capacity().unwrap();
        let grown = grown.get().unwrap();
        assert_eq!(grown.capacity().unwrap(), 4);
        assert_eq!(grown.to_vec().unwrap(), vec![10, 20]);
        assert_eq!(array.capacity().unwrap(), 2);
        assert_eq!(array.to_vec().unwrap(), vec![10, 20]);
    }

    #[test]
    fn resize_truncates_and_pads() {
        let block = Block::create(4096, AllocationPolicy::Reuse, false);
        let array = array_of::<u16>(&block, 3);
        for value in [1u16, 2, 3] {
            array.push(value).unwrap();
        }

        let shorter = array.resize(1).unwrap();
        assert_eq!(shorter.get().unwrap().to_vec().unwrap(), vec![1]);

        let longer = array.resize(5).unwrap();
        let longer = longer.get().unwrap();
        assert_eq!(longer.to_vec().unwrap(), vec![1, 2, 3, 0, 0]);
        assert!(longer.is_full().unwrap());
    }

    #[test]
    fn failed_growth_leaves_array_untouched() {
        let block = Block::create(160, AllocationPolicy::Reuse, false);
        let array = array_of::<u64>(&block, 4);
        array.push(7u64).unwrap();
        let live = block.live_objects();

        let err = array.double_capacity().unwrap_err();
        assert!(err.is_exhaustion());
        assert_eq!(array.to_vec().unwrap(), vec![7]);
        assert_eq!(array.capacity().unwrap(), 4);
        assert_eq!(block.live_objects(), live);
    }

    #[test]
    fn raw_bytes_cover_used_elements() {
        let block = Block::create(4096, AllocationPolicy::Reuse, false);
        let array = array_of::<u8>(&block, 8);
        for byte in b"abc" {
            array.push(byte).unwrap();
        }
        let raw = array.with_raw_bytes(<[u8]>::to_vec).unwrap();
        assert_eq!(raw, b"abc");
    }

    #[test]
    fn get_out_of_bounds() {
        let block = Block::create(4096, AllocationPolicy::Reuse, false);
        let array = array_of::<u8>(&block, 8);
        assert!(matches!(
            array.get(0),
            Err(RelocError::IndexOutOfBounds { index: 0, len: 0 })
        ));
    }

    #[test]
    fn pop_and_clear() {
        let block = Block::create(4096, AllocationPolicy::Reuse, false);
        let array = array_of::<u32>(&block, 4);
        array.push(1u32).unwrap();
        array.push(2u32).unwrap();

        assert!(array.pop().unwrap());
        assert_eq!(array.len().unwrap(), 1);
        array.clear().unwrap();
        assert!(array.is_empty().unwrap());
        assert!(!array.pop().unwrap());
        assert_eq!(array.capacity().unwrap(), 4);
    }
}
