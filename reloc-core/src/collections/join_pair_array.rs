//! Hash-keyed multimap table bodies.
//!
//! ```text
//! +0   value descriptor    i32
//! +4   record size         u32
//! +8   slots               u32
//! +12  used slots          u32
//! +16  max used slots      u32
//! +20  reserved
//! +24  overflow lists      vector of vectors of values (16 bytes)
//! +40  records
//!
//! record: hash u64 | next u32 | pad u32 | value     (padded to 8 bytes)
//! ```
//!
//! Slots are matched on the hash alone. The first value for a hash lives in
//! its record; later ones go to the overflow list whose index is in `next`.

use super::array;
use super::hash::UNUSED_HASH;
use super::pair_array::{MIN_TABLE_SLOTS, doubled, first_slot, max_used, next_slot, probe_exhausted};
use super::vector::{self, VECTOR_DESCRIPTOR};
use crate::arena::BlockMemory;
use crate::arena::allocation::align_up;
use crate::error::{RelocError, Result};
use crate::object::constituent::{self, Retired, Source};
use crate::types::{ArenaOffset, ObjectKind, TypeDescriptor};

pub(crate) const JOIN_PAIR_ARRAY_HEADER_SIZE: u64 = 40;
pub(crate) const JOIN_PAIR_ARRAY_DESCRIPTOR: TypeDescriptor = TypeDescriptor::object(ObjectKind::JoinPairArray);

const OVERFLOWS: u64 = 24;
const VALUE_OFFSET: u64 = 16;
const NO_OVERFLOW: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
pub(crate) struct JoinHeader {
    pub(crate) value: TypeDescriptor,
    pub(crate) record_size: u64,
    pub(crate) slots: u32,
    pub(crate) used: u32,
    pub(crate) max: u32,
}

impl JoinHeader {
    pub(crate) fn record(&self, body: ArenaOffset, slot: u32) -> ArenaOffset {
        body.add(JOIN_PAIR_ARRAY_HEADER_SIZE + slot as u64 * self.record_size)
    }

    pub(crate) fn value_at(&self, body: ArenaOffset, slot: u32) -> ArenaOffset {
        self.record(body, slot).add(VALUE_OFFSET)
    }

    pub(crate) fn needs_growth(&self) -> bool {
        self.used + 1 > self.max
    }
}

/// Offset of the overflow lists of the table at `body`.
pub(crate) fn overflows(body: ArenaOffset) -> ArenaOffset {
    body.add(OVERFLOWS)
}

fn record_size(value_size: u64) -> u64 {
    align_up(VALUE_OFFSET + value_size)
}

pub(crate) fn header(memory: &BlockMemory, body: ArenaOffset) -> Result<JoinHeader> {
    memory.check_range(body, JOIN_PAIR_ARRAY_HEADER_SIZE)?;
    let value = TypeDescriptor::from_raw(memory.read_i32(body));
    let header = JoinHeader {
        value,
        record_size: memory.read_u32(body.add(4)) as u64,
        slots: memory.read_u32(body.add(8)),
        used: memory.read_u32(body.add(12)),
        max: memory.read_u32(body.add(16)),
    };
    let value_size = constituent::element_size(memory, value)?;
    if header.record_size != record_size(value_size) || header.slots < MIN_TABLE_SLOTS || header.used > header.slots {
        return Err(memory.corruption(body, "inconsistent join table header"));
    }
    memory.check_range(body, JOIN_PAIR_ARRAY_HEADER_SIZE + header.slots as u64 * header.record_size)?;
    Ok(header)
}

pub(crate) fn body_size(memory: &BlockMemory, body: ArenaOffset) -> Result<u64> {
    let header = header(memory, body)?;
    Ok(JOIN_PAIR_ARRAY_HEADER_SIZE + header.slots as u64 * header.record_size)
}

pub(crate) fn read_hash(memory: &BlockMemory, header: &JoinHeader, body: ArenaOffset, slot: u32) -> u64 {
    memory.read_u64(header.record(body, slot))
}

fn write_hash(memory: &mut BlockMemory, header: &JoinHeader, body: ArenaOffset, slot: u32, hash: u64) {
    memory.write_u64(header.record(body, slot), hash);
}

fn read_next(memory: &BlockMemory, header: &JoinHeader, body: ArenaOffset, slot: u32) -> u32 {
    memory.read_u32(header.record(body, slot).add(8))
}

fn write_next(memory: &mut BlockMemory, header: &JoinHeader, body: ArenaOffset, slot: u32, next: u32) {
    memory.write_u32(header.record(body, slot).add(8), next);
}

fn set_used(memory: &mut BlockMemory, body: ArenaOffset, used: u32) {
    memory.write_u32(body.add(12), used);
}

fn write_header(memory: &mut BlockMemory, body: ArenaOffset, source: &JoinHeader) {
    memory.write_i32(body, source.value.as_raw());
    memory.write_u32(body.add(4), source.record_size as u32);
    memory.write_u32(body.add(8), source.slots);
    memory.write_u32(body.add(12), 0);
    memory.write_u32(body.add(16), source.max);
    memory.write_u32(body.add(20), 0);
}

fn mark_all_unused(memory: &mut BlockMemory, header: &JoinHeader, body: ArenaOffset) {
    for slot in 0..header.slots {
        write_hash(memory, header, body, slot, UNUSED_HASH);
        write_next(memory, header, body, slot, NO_OVERFLOW);
    }
}

/// Allocate an empty table of at least `slots` slots with a count of 1.
pub(crate) fn allocate(memory: &mut BlockMemory, value: TypeDescriptor, slots: u32) -> Result<ArenaOffset> {
    let slots = slots.max(MIN_TABLE_SLOTS);
    let header = JoinHeader {
        value,
        record_size: record_size(constituent::element_size(memory, value)?),
        slots,
        used: 0,
        max: max_used(slots),
    };
    let body = memory.allocate(JOIN_PAIR_ARRAY_HEADER_SIZE + slots as u64 * header.record_size)?;
    memory.set_ref_count(body, 1);
    write_header(memory, body, &header);
    constituent::construct_empty(memory, VECTOR_DESCRIPTOR, overflows(body))?;
    mark_all_unused(memory, &header, body);
    Ok(body)
}

pub(crate) enum Probe {
    Found(u32),
    Vacant(u32),
}

/// Find the slot holding `hash` or the empty slot where it would go.
pub(crate) fn probe(memory: &BlockMemory, header: &JoinHeader, body: ArenaOffset, hash: u64) -> Result<Probe> {
    let mut slot = first_slot(hash, header.slots);
    for _ in 0..header.slots {
        match read_hash(memory, header, body, slot) {
            UNUSED_HASH => return Ok(Probe::Vacant(slot)),
            stored if stored == hash => return Ok(Probe::Found(slot)),
            _ => slot = next_slot(slot, header.slots),
        }
    }
    Err(probe_exhausted(header.slots, hash))
}

/// Offset of the overflow list of `slot`, if it has one.
pub(crate) fn overflow_list(memory: &BlockMemory, header: &JoinHeader, body: ArenaOffset, slot: u32) -> Result<Option<ArenaOffset>> {
    match read_next(memory, header, body, slot) {
        NO_OVERFLOW => Ok(None),
        index => {
            let lists = overflows(body);
            let len = vector::len(memory, lists)?;
            if index >= len {
                tracing::error!(block = %memory.id(), slot, index, len, "Overflow index out of range");
                return Err(RelocError::CorruptOverflowIndex { index, len });
            }
            Ok(Some(vector::element_at(memory, lists, index)?))
        }
    }
}

/// Number of values stored for the hash in `slot`.
pub(crate) fn values_in(memory: &BlockMemory, header: &JoinHeader, body: ArenaOffset, slot: u32) -> Result<u32> {
    match overflow_list(memory, header, body, slot)? {
        Some(list) => Ok(1 + vector::len(memory, list)?),
        None => Ok(1),
    }
}

/// Offset of value `index` for the hash in `slot`; 0 is the record's own value.
pub(crate) fn value_of(memory: &BlockMemory, header: &JoinHeader, body: ArenaOffset, slot: u32, index: u32) -> Result<ArenaOffset> {
    if index == 0 {
        return Ok(header.value_at(body, slot));
    }
    match overflow_list(memory, header, body, slot)? {
        Some(list) => vector::element_at(memory, list, index - 1),
        None => Err(RelocError::IndexOutOfBounds {
            index: index as u64,
            len: 1,
        }),
    }
}

/// Claim an empty slot for `hash` and default-construct its value.
pub(crate) fn occupy(memory: &mut BlockMemory, header: &JoinHeader, body: ArenaOffset, slot: u32, hash: u64) -> Result<ArenaOffset> {
    let value_at = header.value_at(body, slot);
    constituent::construct_empty(memory, header.value, value_at)?;
    write_next(memory, header, body, slot, NO_OVERFLOW);
    write_hash(memory, header, body, slot, hash);
    set_used(memory, body, header.used + 1);
    Ok(value_at)
}

/// Append a default-constructed value to the overflow list of `slot`,
/// creating the list on first use. Bodies replaced by growth go to `retired`.
pub(crate) fn push_overflow(
    memory: &mut BlockMemory,
    header: &JoinHeader,
    body: ArenaOffset,
    slot: u32,
    retired: &mut Retired,
) -> Result<ArenaOffset> {
    let list = match overflow_list(memory, header, body, slot)? {
        Some(list) => list,
        None => {
            let lists = overflows(body);
            let index = vector::len(memory, lists)?;
            let list = vector::push_empty(memory, lists, VECTOR_DESCRIPTOR, retired)?;
            write_next(memory, header, body, slot, index);
            list
        }
    };
    vector::push_empty(memory, list, header.value, retired)
}

/// Remove the newest value for the hash in `slot`: the last overflow value
/// if there is one, otherwise the record itself.
pub(crate) fn remove_newest(memory: &mut BlockMemory, header: &JoinHeader, body: ArenaOffset, slot: u32) -> Result<()> {
    if let Some(list) = overflow_list(memory, header, body, slot)? {
        if vector::pop(memory, list)? {
            return Ok(());
        }
    }
    constituent::destroy(memory, header.value, header.value_at(body, slot))?;
    write_hash(memory, header, body, slot, UNUSED_HASH);
    write_next(memory, header, body, slot, NO_OVERFLOW);
    set_used(memory, body, header.used.saturating_sub(1));
    Ok(())
}

/// Build a table with twice the slots.
///
/// Records are rehashed from their stored hashes. The overflow lists are
/// shared as they are, so every `next` index stays valid.
pub(crate) fn double(memory: &mut BlockMemory, body: ArenaOffset) -> Result<ArenaOffset> {
    let old = header(memory, body)?;
    let grown = allocate(memory, old.value, doubled(old.slots)?)?;
    let new = header(memory, grown)?;

    let moved = (|| -> Result<u32> {
        constituent::copy_reference(Source::Local, overflows(body), memory, overflows(grown))?;
        let mut used = 0;
        for slot in 0..old.slots {
            let hash = read_hash(memory, &old, body, slot);
            if hash == UNUSED_HASH {
                continue;
            }
            let Probe::Vacant(target) = probe(memory, &new, grown, hash)? else {
                return Err(probe_exhausted(new.slots, hash));
            };
            copy_record(Source::Local, &old, body, slot, memory, &new, grown, target)?;
            used += 1;
            set_used(memory, grown, used);
        }
        Ok(used)
    })();

    match moved {
        Ok(used) => {
            tracing::debug!(block = %memory.id(), from = old.slots, to = new.slots, entries = used, "Join table doubled");
            Ok(grown)
        }
        Err(e) => {
            destroy_body(memory, grown)?;
            memory.free(grown);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn copy_record(
    src: Source<'_>,
    src_header: &JoinHeader,
    src_body: ArenaOffset,
    src_slot: u32,
    dst: &mut BlockMemory,
    dst_header: &JoinHeader,
    dst_body: ArenaOffset,
    dst_slot: u32,
) -> Result<()> {
    let memory = src.memory(dst);
    let hash = read_hash(memory, src_header, src_body, src_slot);
    let next = read_next(memory, src_header, src_body, src_slot);
    constituent::copy(
        src,
        src_header.value_at(src_body, src_slot),
        dst,
        dst_header.value_at(dst_body, dst_slot),
        src_header.value,
    )?;
    write_next(dst, dst_header, dst_body, dst_slot, next);
    write_hash(dst, dst_header, dst_body, dst_slot, hash);
    Ok(())
}

pub(crate) fn copy_body(src: Source<'_>, src_at: ArenaOffset, dst: &mut BlockMemory, dst_at: ArenaOffset) -> Result<()> {
    let old = header(src.memory(dst), src_at)?;
    write_header(dst, dst_at, &old);
    mark_all_unused(dst, &old, dst_at);
    constituent::construct_empty(dst, VECTOR_DESCRIPTOR, overflows(dst_at))?;

    let copied = (|| -> Result<()> {
        constituent::copy(src, overflows(src_at), dst, overflows(dst_at), VECTOR_DESCRIPTOR)?;
        let mut used = 0;
        for slot in 0..old.slots {
            if read_hash(src.memory(dst), &old, src_at, slot) == UNUSED_HASH {
                continue;
            }
            copy_record(src, &old, src_at, slot, dst, &old, dst_at, slot)?;
            used += 1;
            set_used(dst, dst_at, used);
        }
        Ok(())
    })();

    if let Err(e) = copied {
        destroy_body(dst, dst_at)?;
        return Err(e);
    }
    Ok(())
}

pub(crate) fn destroy_body(memory: &mut BlockMemory, body: ArenaOffset) -> Result<()> {
    let header = header(memory, body)?;
    for slot in 0..header.slots {
        if read_hash(memory, &header, body, slot) == UNUSED_HASH {
            continue;
        }
        constituent::destroy(memory, header.value, header.value_at(body, slot))?;
        write_hash(memory, &header, body, slot, UNUSED_HASH);
        write_next(memory, &header, body, slot, NO_OVERFLOW);
    }
    constituent::destroy(memory, VECTOR_DESCRIPTOR, overflows(body))?;
    set_used(memory, body, 0);
    Ok(())
}

/// Whether overflow lists of the table hold `value` elements.
pub(crate) fn overflow_element_matches(memory: &BlockMemory, body: ArenaOffset, value: TypeDescriptor) -> Result<bool> {
    let lists = overflows(body);
    match vector::body(memory, lists)? {
        None => Ok(true),
        Some(lists_body) => {
            let lists_header = array::header(memory, lists_body)?;
            if lists_header.element != VECTOR_DESCRIPTOR {
                return Ok(false);
            }
            for index in 0..lists_header.used {
                if let Some(list_body) = vector::body(memory, lists_header.slot(lists_body, index))? {
                    if array::header(memory, list_body)?.element != value {
                        return Ok(false);
                    }
                }
            }
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{AllocationPolicy, Block};

    fn push(memory: &mut BlockMemory, body: ArenaOffset, hash: u64, value: u64) {
        let header = header(memory, body).unwrap();
        let at = match probe(memory, &header, body, hash).unwrap() {
            Probe::Vacant(slot) => occupy(memory, &header, body, slot, hash).unwrap(),
            Probe::Found(slot) => {
                let mut retired = Retired::default();
                let at = push_overflow(memory, &header, body, slot, &mut retired);
                retired.finish(memory, at).unwrap()
            }
        };
        memory.write_u64(at, value);
    }

    fn values(memory: &BlockMemory, body: ArenaOffset, hash: u64) -> Vec<u64> {
        let header = header(memory, body).unwrap();
        match probe(memory, &header, body, hash).unwrap() {
            Probe::Vacant(_) => Vec::new(),
            Probe::Found(slot) => (0..values_in(memory, &header, body, slot).unwrap())
                .map(|i| memory.read_u64(value_of(memory, &header, body, slot, i).unwrap()))
                .collect(),
        }
    }

    #[test]
    fn repeated_hashes_go_to_overflow_in_order() {
        let block = Block::create(8192, AllocationPolicy::Reuse, false);
        let mut memory = block.write();
        let body = allocate(&mut memory, TypeDescriptor::plain(8), 8).unwrap();

        for value in [10, 20, 30] {
            push(&mut memory, body, 42, value);
        }
        push(&mut memory, body, 7, 70);

        assert_eq!(values(&memory, body, 42), vec![10, 20, 30]);
        assert_eq!(values(&memory, body, 7), vec![70]);
        assert!(values(&memory, body, 8).is_empty());
        assert_eq!(header(&memory, body).unwrap().used, 2);
    }

    #[test]
    fn doubling_keeps_overflow_lists() {
        let block = Block::create(8192, AllocationPolicy::Reuse, false);
        let mut memory = block.write();
        let body = allocate(&mut memory, TypeDescriptor::plain(8), 4).unwrap();
        push(&mut memory, body, 3, 1);
        push(&mut memory, body, 3, 2);
        push(&mut memory, body, 5, 3);

        let grown = double(&mut memory, body).unwrap();
        constituent::release(&mut memory, JOIN_PAIR_ARRAY_DESCRIPTOR, body).unwrap();

        assert_eq!(header(&memory, grown).unwrap().slots, 8);
        assert_eq!(values(&memory, grown, 3), vec![1, 2]);
        assert_eq!(values(&memory, grown, 5), vec![3]);
    }

    #[test]
    fn remove_newest_pops_overflow_first() {
        let block = Block::create(8192, AllocationPolicy::Reuse, false);
        let mut memory = block.write();
        let body = allocate(&mut memory, TypeDescriptor::plain(8), 8).unwrap();
        push(&mut memory, body, 9, 1);
        push(&mut memory, body, 9, 2);

        let header = header(&memory, body).unwrap();
        let Probe::Found(slot) = probe(&memory, &header, body, 9).unwrap() else {
            panic!("hash 9 should be present");
        };
        remove_newest(&mut memory, &header, body, slot).unwrap();
        assert_eq!(values(&memory, body, 9), vec![1]);

        let header = super::header(&memory, body).unwrap();
        remove_newest(&mut memory, &header, body, slot).unwrap();
        assert!(values(&memory, body, 9).is_empty());
        assert_eq!(super::header(&memory, body).unwrap().used, 0);
    }

    #[test]
    fn bad_overflow_index_is_detected() {
        let block = Block::create(8192, AllocationPolicy::Reuse, false);
        let mut memory = block.write();
        let body = allocate(&mut memory, TypeDescriptor::plain(8), 8).unwrap();
        push(&mut memory, body, 2, 1);

        let header = header(&memory, body).unwrap();
        let Probe::Found(slot) = probe(&memory, &header, body, 2).unwrap() else {
            panic!("hash 2 should be present");
        };
        write_next(&mut memory, &header, body, slot, 5);
        let err = values_in(&memory, &header, body, slot).unwrap_err();
        assert!(matches!(err, RelocError::CorruptOverflowIndex { index: 5, len: 0 }));
        assert!(err.is_invariant_violation());
    }
}
