//! Traits connecting Rust types to their in-block representation.
//!
//! - [`Element`]: a type that can be stored in place inside another object
//!   (plain numbers, strings, references, containers).
//! - [`Store`]: how an element is built from a Rust-side source value.
//! - [`Referent`]: a type a [`Handle`](super::Handle) or
//!   [`RelPtr`](super::RelPtr) can point at.
//!
//! The set of element types is closed; the traits are sealed.

use super::constituent::{self, Source};
use crate::arena::{Block, BlockMemory, Place};
use crate::error::{RelocError, Result};
use crate::types::{ArenaOffset, TypeDescriptor};
use std::fmt;
use std::marker::PhantomData;

pub(crate) mod sealed {
    pub trait Sealed {}
}

/// A type with a fixed in-place representation inside block memory.
pub trait Element: sealed::Sealed + Sized + 'static {
    /// Descriptor recorded for this type in container headers.
    const DESCRIPTOR: TypeDescriptor;

    /// What reading an element yields: the value itself for plain data, a
    /// cursor into the block for everything else.
    type View;

    #[doc(hidden)]
    fn view(block: &Block, memory: &BlockMemory, at: ArenaOffset) -> Result<Self::View>;

    /// Whether the stored value at `at` matches this type beyond its top-level
    /// descriptor (element types of containers, for instance).
    #[doc(hidden)]
    fn conforms(_memory: &BlockMemory, _at: ArenaOffset) -> Result<bool> {
        Ok(true)
    }
}

/// Construction of an element from a source value `S`.
///
/// Sources living in another block are deep-copied into the destination
/// block; this is the only way an element can come to refer to memory.
pub trait Store<S>: Element {
    #[doc(hidden)]
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: S) -> Result<()>;
}

/// A type that references can point at.
pub trait Referent: sealed::Sealed + 'static {
    /// What dereferencing yields.
    type Target;

    #[doc(hidden)]
    fn expected() -> TypeDescriptor;

    #[doc(hidden)]
    fn accepts(memory: &BlockMemory, descriptor: TypeDescriptor, at: ArenaOffset) -> Result<bool>;

    #[doc(hidden)]
    fn target(
        block: &Block,
        memory: &BlockMemory,
        at: ArenaOffset,
        descriptor: TypeDescriptor,
    ) -> Result<Self::Target>;
}

/// Implements [`Referent`] for element types: the referent is the element
/// itself, allocated as a standalone object.
macro_rules! element_referent {
    ($(impl[$($generics:tt)*] $ty:ty;)*) => {$(
        impl<$($generics)*> $crate::object::Referent for $ty {
            type Target = <$ty as $crate::object::Element>::View;

            fn expected() -> $crate::types::TypeDescriptor {
                <$ty as $crate::object::Element>::DESCRIPTOR
            }

            fn accepts(
                memory: &$crate::arena::BlockMemory,
                descriptor: $crate::types::TypeDescriptor,
                at: $crate::types::ArenaOffset,
            ) -> $crate::error::Result<bool> {
                Ok(descriptor == <$ty as $crate::object::Element>::DESCRIPTOR
                    && <$ty as $crate::object::Element>::conforms(memory, at)?)
            }

            fn target(
                block: &$crate::arena::Block,
                memory: &$crate::arena::BlockMemory,
                at: $crate::types::ArenaOffset,
                _descriptor: $crate::types::TypeDescriptor,
            ) -> $crate::error::Result<Self::Target> {
                <$ty as $crate::object::Element>::view(block, memory, at)
            }
        }
    )*};
}

pub(crate) use element_referent;

macro_rules! plain_element {
    ($($ty:ty),* $(,)?) => {$(
        impl sealed::Sealed for $ty {}

        impl Element for $ty {
            const DESCRIPTOR: TypeDescriptor = TypeDescriptor::plain(std::mem::size_of::<$ty>() as u32);
            type View = $ty;

            fn view(_block: &Block, memory: &BlockMemory, at: ArenaOffset) -> Result<$ty> {
                const SIZE: usize = std::mem::size_of::<$ty>();
                let mut buf = [0u8; SIZE];
                buf.copy_from_slice(memory.bytes(at, SIZE as u64));
                Ok(<$ty>::from_le_bytes(buf))
            }
        }

        impl Store<$ty> for $ty {
            fn store(memory: &mut BlockMemory, at: ArenaOffset, value: $ty) -> Result<()> {
                let bytes = value.to_le_bytes();
                memory.bytes_mut(at, bytes.len() as u64).copy_from_slice(&bytes);
                Ok(())
            }
        }

        impl<'a> Store<&'a $ty> for $ty {
            fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a $ty) -> Result<()> {
                <$ty as Store<$ty>>::store(memory, at, *value)
            }
        }

        element_referent! { impl[] $ty; }
    )*};
}

plain_element!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl sealed::Sealed for bool {}

impl Element for bool {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::plain(1);
    type View = bool;

    fn view(_block: &Block, memory: &BlockMemory, at: ArenaOffset) -> Result<bool> {
        Ok(memory.bytes(at, 1)[0] != 0)
    }
}

impl Store<bool> for bool {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: bool) -> Result<()> {
        memory.bytes_mut(at, 1)[0] = u8::from(value);
        Ok(())
    }
}

impl<'a> Store<&'a bool> for bool {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a bool) -> Result<()> {
        <bool as Store<bool>>::store(memory, at, *value)
    }
}

element_referent! { impl[] bool; }

impl<const N: usize> sealed::Sealed for [u8; N] {}

impl<const N: usize> Element for [u8; N] {
    const DESCRIPTOR: TypeDescriptor = TypeDescriptor::plain(N as u32);
    type View = [u8; N];

    fn view(_block: &Block, memory: &BlockMemory, at: ArenaOffset) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(memory.bytes(at, N as u64));
        Ok(buf)
    }
}

impl<const N: usize> Store<[u8; N]> for [u8; N] {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: [u8; N]) -> Result<()> {
        memory.bytes_mut(at, N as u64).copy_from_slice(&value);
        Ok(())
    }
}

impl<'a, const N: usize> Store<&'a [u8; N]> for [u8; N] {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a [u8; N]) -> Result<()> {
        <[u8; N] as Store<[u8; N]>>::store(memory, at, *value)
    }
}

element_referent! { impl[const N: usize] [u8; N]; }

/// Copy the element of `descriptor` at `source` into `at` of `memory`.
///
/// Shares references when `source` is in the same block, deep-copies them
/// otherwise.
pub(crate) fn store_from_place(
    memory: &mut BlockMemory,
    at: ArenaOffset,
    source: &Place,
    descriptor: TypeDescriptor,
) -> Result<()> {
    if source.block_id() == memory.id() {
        if !source.is_current(memory) {
            return Err(RelocError::StaleReference {
                block: source.block_id(),
            });
        }
        constituent::copy(Source::Local, source.at(), memory, at, descriptor)
    } else {
        source.read(|src, src_at| constituent::copy(Source::Remote(src), src_at, memory, at, descriptor))
    }
}

/// A typed place holding one element, such as a map value or a vector slot.
pub struct Slot<T: Element> {
    place: Place,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> Slot<T> {
    pub(crate) fn new(place: Place) -> Self {
        Self {
            place,
            _marker: PhantomData,
        }
    }

    /// Read the element.
    pub fn get(&self) -> Result<T::View> {
        self.place.read(|memory, at| T::view(self.place.block(), memory, at))
    }

    /// Replace the element, releasing the previous value.
    ///
    /// If the new value cannot be built (the block is exhausted during a deep
    /// copy), the slot is left holding the empty value.
    pub fn set<S>(&self, value: S) -> Result<()>
    where
        T: Store<S>,
    {
        self.place.write(|memory, at| {
            constituent::assign(memory, T::DESCRIPTOR, at, |memory| T::store(memory, at, value))
        })
    }

    /// Offset of the slot in its block.
    pub fn offset(&self) -> ArenaOffset {
        self.place.at()
    }
}

impl<T: Element> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self::new(self.place.clone())
    }
}

impl<T: Element> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("place", &self.place)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}
