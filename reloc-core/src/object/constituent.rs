//! Descriptor-driven operations on values in block memory.
//!
//! Containers never know the static type of what they hold once it is in a
//! block. Everything that must work on erased values (copying an element into
//! a grown array, rebuilding a subgraph in another block, tearing down an
//! object whose count dropped to zero) dispatches here on the stored
//! [`TypeDescriptor`].

use crate::arena::BlockMemory;
use crate::collections::{array, join_pair_array, pair_array};
use crate::error::Result;
use crate::object::string;
use crate::types::{ArenaOffset, Constituent, EMBEDDED_SIZE, ObjectKind, TypeDescriptor};

/// Where the bytes being copied come from.
#[derive(Clone, Copy)]
pub(crate) enum Source<'a> {
    /// The destination block itself: references are shared, not rebuilt.
    Local,
    /// Another block: referenced objects are rebuilt in the destination.
    Remote(&'a BlockMemory),
}

impl<'a> Source<'a> {
    pub(crate) fn memory<'b>(self, local: &'b BlockMemory) -> &'b BlockMemory
    where
        'a: 'b,
    {
        match self {
            Self::Local => local,
            Self::Remote(memory) => memory,
        }
    }

    pub(crate) fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

/// Bytes a value of `descriptor` occupies when embedded in another object.
pub(crate) fn element_size(memory: &BlockMemory, descriptor: TypeDescriptor) -> Result<u64> {
    match descriptor.classify()? {
        Constituent::Plain(size) => Ok(size as u64),
        Constituent::Object(kind) if kind.is_embedded() => Ok(EMBEDDED_SIZE as u64),
        Constituent::Object(kind) => Err(memory.corruption(
            ArenaOffset::NONE,
            format!("{kind} bodies cannot be embedded"),
        )),
    }
}

/// Payload size of the object of `descriptor` stored at `at`.
pub(crate) fn object_size(memory: &BlockMemory, descriptor: TypeDescriptor, at: ArenaOffset) -> Result<u64> {
    match descriptor.classify()? {
        Constituent::Plain(size) => Ok(size as u64),
        Constituent::Object(kind) => match kind {
            ObjectKind::Handle
            | ObjectKind::String
            | ObjectKind::Vector
            | ObjectKind::Map
            | ObjectKind::JoinMap => Ok(EMBEDDED_SIZE as u64),
            ObjectKind::Array => array::body_size(memory, at),
            ObjectKind::PairArray => pair_array::body_size(memory, at),
            ObjectKind::JoinPairArray => join_pair_array::body_size(memory, at),
            ObjectKind::Bytes => string::bytes_size(memory, at),
        },
    }
}

/// Write the empty value of an embedded `descriptor` at `at`.
pub(crate) fn construct_empty(memory: &mut BlockMemory, descriptor: TypeDescriptor, at: ArenaOffset) -> Result<()> {
    match descriptor.classify()? {
        Constituent::Plain(size) => memory.fill_zero(at, size as u64),
        Constituent::Object(kind) => match kind {
            ObjectKind::Handle => memory.write_null_rel(at, TypeDescriptor::UNINITIALIZED),
            ObjectKind::Vector => memory.write_null_rel(at, TypeDescriptor::object(ObjectKind::Array)),
            ObjectKind::Map => memory.write_null_rel(at, TypeDescriptor::object(ObjectKind::PairArray)),
            ObjectKind::JoinMap => {
                memory.write_null_rel(at, TypeDescriptor::object(ObjectKind::JoinPairArray))
            }
            ObjectKind::String => string::construct_empty(memory, at),
            ObjectKind::Array | ObjectKind::PairArray | ObjectKind::JoinPairArray | ObjectKind::Bytes => {
                return Err(memory.corruption(at, format!("{kind} bodies cannot be embedded")));
            }
        },
    }
    Ok(())
}

/// Copy the value of `descriptor` at `src_at` into uninitialized memory at `dst_at`.
///
/// With a local source, references are shared and their counts incremented.
/// With a remote source, every referenced object is deep-copied into the
/// destination block. On failure the destination holds no live references;
/// embedded references are left null.
pub(crate) fn copy(
    src: Source<'_>,
    src_at: ArenaOffset,
    dst: &mut BlockMemory,
    dst_at: ArenaOffset,
    descriptor: TypeDescriptor,
) -> Result<()> {
    match descriptor.classify()? {
        Constituent::Plain(size) => {
            copy_bytes(src, src_at, dst, dst_at, size as u64);
            Ok(())
        }
        Constituent::Object(kind) => match kind {
            ObjectKind::Handle | ObjectKind::Vector | ObjectKind::Map | ObjectKind::JoinMap => {
                copy_reference(src, src_at, dst, dst_at)
            }
            ObjectKind::String => string::copy_str(src, src_at, dst, dst_at),
            ObjectKind::Array => array::copy_body(src, src_at, dst, dst_at),
            ObjectKind::PairArray => pair_array::copy_body(src, src_at, dst, dst_at),
            ObjectKind::JoinPairArray => join_pair_array::copy_body(src, src_at, dst, dst_at),
            ObjectKind::Bytes => {
                let len = string::bytes_size(src.memory(dst), src_at)?;
                copy_bytes(src, src_at, dst, dst_at, len);
                Ok(())
            }
        },
    }
}

/// Release everything the value of `descriptor` at `at` owns.
///
/// The bytes at `at` are left as they are; callers either free the chunk or
/// overwrite the slot.
pub(crate) fn destroy(memory: &mut BlockMemory, descriptor: TypeDescriptor, at: ArenaOffset) -> Result<()> {
    match descriptor.classify()? {
        Constituent::Plain(_) => Ok(()),
        Constituent::Object(kind) => match kind {
            ObjectKind::Handle | ObjectKind::Vector | ObjectKind::Map | ObjectKind::JoinMap => {
                match memory.resolve_rel(at)? {
                    Some((target, referent)) => {
                        memory.write_null_rel(at, referent);
                        release(memory, referent, target)
                    }
                    None => Ok(()),
                }
            }
            ObjectKind::String => string::destroy_str(memory, at),
            ObjectKind::Array => array::destroy_body(memory, at),
            ObjectKind::PairArray => pair_array::destroy_body(memory, at),
            ObjectKind::JoinPairArray => join_pair_array::destroy_body(memory, at),
            ObjectKind::Bytes => Ok(()),
        },
    }
}

/// Drop one reference to the object of `descriptor` at `target`.
///
/// When the count reaches zero the object is destroyed and its chunk returned
/// to the block. Blocks that do not count references ignore the call.
pub(crate) fn release(memory: &mut BlockMemory, descriptor: TypeDescriptor, target: ArenaOffset) -> Result<()> {
    if !memory.policy().counts_references() {
        return Ok(());
    }
    if memory.dec_ref(target)? == 0 {
        destroy(memory, descriptor, target)?;
        memory.free(target);
    }
    Ok(())
}

/// Bodies a container replaced with grown copies while a value was on its
/// way in.
///
/// The incoming value may still live in one of them, so they are released
/// only once it has been stored.
#[derive(Default)]
pub(crate) struct Retired {
    bodies: Vec<(TypeDescriptor, ArenaOffset)>,
}

impl Retired {
    pub(crate) fn push(&mut self, descriptor: TypeDescriptor, body: ArenaOffset) {
        self.bodies.push((descriptor, body));
    }

    /// Release every retired body and pass `outcome` through.
    pub(crate) fn finish<R>(self, memory: &mut BlockMemory, outcome: Result<R>) -> Result<R> {
        for (descriptor, body) in self.bodies {
            release(memory, descriptor, body)?;
        }
        outcome
    }
}

/// Rebuild the object of `descriptor` at `src_target` of `src` inside `dst`.
///
/// Returns the payload offset of the copy, which starts with a count of 1.
/// On failure nothing remains allocated in `dst`.
pub(crate) fn deep_copy(
    src: &BlockMemory,
    descriptor: TypeDescriptor,
    src_target: ArenaOffset,
    dst: &mut BlockMemory,
) -> Result<ArenaOffset> {
    let size = object_size(src, descriptor, src_target)?;
    src.check_range(src_target, size)?;
    let target = dst.allocate(size)?;
    dst.set_ref_count(target, 1);
    if let Err(e) = copy(Source::Remote(src), src_target, dst, target, descriptor) {
        dst.free(target);
        return Err(e);
    }
    Ok(target)
}

/// The object an embedded value at `at` currently keeps alive, if any.
pub(crate) fn owned_target(
    memory: &BlockMemory,
    descriptor: TypeDescriptor,
    at: ArenaOffset,
) -> Result<Option<(TypeDescriptor, ArenaOffset)>> {
    match descriptor.classify()? {
        Constituent::Plain(_) => Ok(None),
        Constituent::Object(ObjectKind::String) => string::owned_bytes(memory, at),
        Constituent::Object(_) => Ok(memory
            .resolve_rel(at)?
            .map(|(target, referent)| (referent, target))),
    }
}

/// Replace the embedded value at `at` using `store`.
///
/// The previous value is released only after `store` succeeded, so assigning
/// a value that shares the old one's referent is safe. If `store` fails the
/// slot is reset to the empty value and the old value released.
pub(crate) fn assign(
    memory: &mut BlockMemory,
    descriptor: TypeDescriptor,
    at: ArenaOffset,
    store: impl FnOnce(&mut BlockMemory) -> Result<()>,
) -> Result<()> {
    let previous = owned_target(memory, descriptor, at)?;
    let stored = store(memory);
    if stored.is_err() {
        construct_empty(memory, descriptor, at)?;
    }
    if let Some((referent, target)) = previous {
        release(memory, referent, target)?;
    }
    stored
}

/// Copy `len` raw bytes from `src` to `dst`.
pub(crate) fn copy_bytes(
    src: Source<'_>,
    src_at: ArenaOffset,
    dst: &mut BlockMemory,
    dst_at: ArenaOffset,
    len: u64,
) {
    match src {
        Source::Local => dst.copy_within(src_at, dst_at, len),
        Source::Remote(memory) => dst
            .bytes_mut(dst_at, len)
            .copy_from_slice(memory.bytes(src_at, len)),
    }
}

/// Copy a 16-byte reference.
pub(crate) fn copy_reference(
    src: Source<'_>,
    src_at: ArenaOffset,
    dst: &mut BlockMemory,
    dst_at: ArenaOffset,
) -> Result<()> {
    let resolved = src.memory(dst).resolve_rel(src_at)?;
    let Some((target, referent)) = resolved else {
        let referent = src.memory(dst).read_rel(src_at).descriptor();
        dst.write_null_rel(dst_at, referent);
        return Ok(());
    };

    match src {
        Source::Local => {
            dst.inc_ref(target);
            dst.write_rel(dst_at, target, referent);
        }
        Source::Remote(memory) => {
            dst.write_null_rel(dst_at, referent);
            let copied = deep_copy(memory, referent, target, dst)?;
            dst.write_rel(dst_at, copied, referent);
        }
    }
    Ok(())
}
