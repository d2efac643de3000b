//! Counted references to objects.
//!
//! [`Handle`] is held by Rust code and keeps its referent (and the block it
//! lives in) alive. [`RelPtr`] is the form stored inside blocks: a 16-byte
//! slot holding a self-relative offset and the referent's descriptor.
//! Storing a handle into a `RelPtr` of another block deep-copies the
//! referent there, since a reference can never cross blocks.

use super::constituent;
use super::element::{self, Element, Referent, Store, element_referent, sealed};
use super::view::ObjectView;
use crate::arena::{Block, BlockMemory, Place};
use crate::error::{RelocError, Result};
use crate::types::{ArenaOffset, BlockId, ObjectKind, TypeDescriptor};
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;

/// Descriptor of an embedded reference slot.
pub(crate) const HANDLE_DESCRIPTOR: TypeDescriptor = TypeDescriptor::object(ObjectKind::Handle);

/// The type-erased referent.
///
/// `Handle<Object>` and `RelPtr<Object>` point at anything; dereferencing
/// yields an [`ObjectView`] that dispatches on the stored descriptor.
#[derive(Debug)]
pub enum Object {}

impl sealed::Sealed for Object {}

impl Referent for Object {
    type Target = ObjectView;

    fn expected() -> TypeDescriptor {
        TypeDescriptor::UNINITIALIZED
    }

    fn accepts(_memory: &BlockMemory, _descriptor: TypeDescriptor, _at: ArenaOffset) -> Result<bool> {
        Ok(true)
    }

    fn target(block: &Block, memory: &BlockMemory, at: ArenaOffset, descriptor: TypeDescriptor) -> Result<ObjectView> {
        Ok(ObjectView::new(Place::new(block, memory, at), descriptor))
    }
}

fn check<T: Referent>(memory: &BlockMemory, descriptor: TypeDescriptor, at: ArenaOffset) -> Result<()> {
    if T::accepts(memory, descriptor, at)? {
        Ok(())
    } else {
        Err(RelocError::TypeMismatch {
            expected: T::expected(),
            found: descriptor,
        })
    }
}

/// A counted root reference to an object in a block.
///
/// Cloning increments the object's reference count and dropping decrements
/// it; the object is destroyed when the count reaches zero. A handle also
/// keeps its block's memory alive after the allocator has moved on.
pub struct Handle<T: Referent> {
    place: Place,
    descriptor: TypeDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Referent> Handle<T> {
    /// Wrap an object whose count already includes this handle.
    pub(crate) fn adopt(place: Place, descriptor: TypeDescriptor) -> Self {
        Self {
            place,
            descriptor,
            _marker: PhantomData,
        }
    }

    /// Take a new counted reference to the object at `at`.
    pub(crate) fn share(block: &Block, memory: &mut BlockMemory, at: ArenaOffset, descriptor: TypeDescriptor) -> Self {
        memory.inc_ref(at);
        Self::adopt(Place::new(block, memory, at), descriptor)
    }

    pub(crate) fn place(&self) -> &Place {
        &self.place
    }

    /// Dereference.
    pub fn get(&self) -> Result<T::Target> {
        self.place
            .read(|memory, at| T::target(self.place.block(), memory, at, self.descriptor))
    }

    /// Descriptor of the referent.
    pub fn descriptor(&self) -> TypeDescriptor {
        self.descriptor
    }

    /// The block holding the referent.
    pub fn block(&self) -> &Block {
        self.place.block()
    }

    /// Identifier of the block holding the referent.
    pub fn block_id(&self) -> BlockId {
        self.place.block_id()
    }

    /// Payload offset of the referent in its block.
    pub fn offset(&self) -> ArenaOffset {
        self.place.at()
    }

    /// Current reference count of the referent.
    pub fn ref_count(&self) -> Result<u32> {
        self.place.read(|memory, at| Ok(memory.ref_count(at)))
    }

    /// Whether the block was emptied since this handle was taken.
    pub fn is_stale(&self) -> bool {
        !self.place.is_current(&self.place.block().read())
    }

    /// Erase the referent type, keeping the count.
    pub fn into_object(self) -> Handle<Object> {
        let this = ManuallyDrop::new(self);
        Handle::adopt(this.place.clone(), this.descriptor)
    }

    /// Payload offset and descriptor, the form stored in record headers.
    pub(crate) fn root(&self) -> (ArenaOffset, TypeDescriptor) {
        (self.place.at(), self.descriptor)
    }
}

impl Handle<Object> {
    /// Recover the static type of an erased handle.
    ///
    /// # Errors
    /// `TypeMismatch` if the referent is not a `U`; the handle is dropped.
    pub fn downcast<U: Referent>(self) -> Result<Handle<U>> {
        self.place
            .read(|memory, at| check::<U>(memory, self.descriptor, at))?;
        let this = ManuallyDrop::new(self);
        Ok(Handle::adopt(this.place.clone(), this.descriptor))
    }
}

impl<T: Referent> Clone for Handle<T> {
    fn clone(&self) -> Self {
        let mut memory = self.place.block().write();
        if self.place.is_current(&memory) {
            memory.inc_ref(self.place.at());
        }
        Self::adopt(self.place.clone(), self.descriptor)
    }
}

impl<T: Referent> Drop for Handle<T> {
    fn drop(&mut self) {
        let released = self
            .place
            .write(|memory, at| constituent::release(memory, self.descriptor, at));
        match released {
            Ok(()) | Err(RelocError::StaleReference { .. }) => {}
            Err(e) => tracing::warn!(
                block = %self.place.block_id(),
                offset = %self.place.at(),
                error = %e,
                "Failed to release handle"
            ),
        }
    }
}

impl<T: Referent> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("place", &self.place)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// A reference slot stored inside a block.
///
/// Reading a `RelPtr` out of a container yields this cursor; the slot
/// itself holds a self-relative offset, so it stays valid when the block's
/// bytes are moved.
pub struct RelPtr<T: Referent> {
    place: Place,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Referent> RelPtr<T> {
    fn resolve(&self, memory: &BlockMemory, at: ArenaOffset) -> Result<Option<(ArenaOffset, TypeDescriptor)>> {
        memory.resolve_rel(at)
    }

    /// Whether the slot holds no reference.
    pub fn is_null(&self) -> Result<bool> {
        self.place.read(|memory, at| Ok(memory.read_rel(at).is_null()))
    }

    /// Dereference.
    ///
    /// # Errors
    /// `NullReference` for an empty slot, `TypeMismatch` when the referent
    /// is not a `T`.
    pub fn get(&self) -> Result<T::Target> {
        self.place.read(|memory, at| {
            let (target, descriptor) = self.resolve(memory, at)?.ok_or(RelocError::NullReference)?;
            check::<T>(memory, descriptor, target)?;
            T::target(self.place.block(), memory, target, descriptor)
        })
    }

    /// A counted handle to the referent, or `None` for an empty slot.
    pub fn to_handle(&self) -> Result<Option<Handle<T>>> {
        self.place.write(|memory, at| {
            let Some((target, descriptor)) = self.resolve(memory, at)? else {
                return Ok(None);
            };
            check::<T>(memory, descriptor, target)?;
            Ok(Some(Handle::share(self.place.block(), memory, target, descriptor)))
        })
    }

    /// Descriptor stored in the slot.
    pub fn descriptor(&self) -> Result<TypeDescriptor> {
        self.place.read(|memory, at| Ok(memory.read_rel(at).descriptor()))
    }

    /// Reference count of the referent, `None` for an empty slot.
    pub fn ref_count(&self) -> Result<Option<u32>> {
        self.place
            .read(|memory, at| Ok(self.resolve(memory, at)?.map(|(target, _)| memory.ref_count(target))))
    }

    /// Point the slot at `value`, releasing the previous referent.
    ///
    /// A referent in another block is deep-copied into this slot's block; if
    /// that runs out of space the slot is left empty.
    pub fn set<S>(&self, value: S) -> Result<()>
    where
        Self: Store<S>,
    {
        self.place.write(|memory, at| {
            constituent::assign(memory, HANDLE_DESCRIPTOR, at, |memory| {
                <Self as Store<S>>::store(memory, at, value)
            })
        })
    }

    /// Empty the slot, releasing the referent.
    pub fn set_null(&self) -> Result<()> {
        self.place.write(|memory, at| {
            constituent::assign(memory, HANDLE_DESCRIPTOR, at, |memory| {
                memory.write_null_rel(at, T::expected());
                Ok(())
            })
        })
    }

    /// Offset of the slot in its block.
    pub fn offset(&self) -> ArenaOffset {
        self.place.at()
    }
}

impl<T: Referent> Clone for RelPtr<T> {
    fn clone(&self) -> Self {
        Self {
            place: self.place.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Referent> fmt::Debug for RelPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelPtr").field("place", &self.place).finish()
    }
}

impl<T: Referent> sealed::Sealed for RelPtr<T> {}

impl<T: Referent> Element for RelPtr<T> {
    const DESCRIPTOR: TypeDescriptor = HANDLE_DESCRIPTOR;
    type View = RelPtr<T>;

    fn view(block: &Block, memory: &BlockMemory, at: ArenaOffset) -> Result<RelPtr<T>> {
        Ok(RelPtr {
            place: Place::new(block, memory, at),
            _marker: PhantomData,
        })
    }

    fn conforms(memory: &BlockMemory, at: ArenaOffset) -> Result<bool> {
        match memory.resolve_rel(at)? {
            Some((target, descriptor)) => T::accepts(memory, descriptor, target),
            None => Ok(true),
        }
    }
}

impl<'a, T: Referent> Store<&'a Handle<T>> for RelPtr<T> {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a Handle<T>) -> Result<()> {
        let source = value.place();
        let descriptor = value.descriptor();
        if source.block_id() == memory.id() {
            if !source.is_current(memory) {
                return Err(RelocError::StaleReference {
                    block: source.block_id(),
                });
            }
            memory.inc_ref(source.at());
            memory.write_rel(at, source.at(), descriptor);
            return Ok(());
        }
        memory.write_null_rel(at, descriptor);
        let copied = source.read(|src, target| constituent::deep_copy(src, descriptor, target, memory))?;
        memory.write_rel(at, copied, descriptor);
        Ok(())
    }
}

impl<'a, T: Referent> Store<&'a RelPtr<T>> for RelPtr<T> {
    fn store(memory: &mut BlockMemory, at: ArenaOffset, value: &'a RelPtr<T>) -> Result<()> {
        element::store_from_place(memory, at, &value.place, HANDLE_DESCRIPTOR)
    }
}

element_referent! { impl[T: Referent] RelPtr<T>; }
