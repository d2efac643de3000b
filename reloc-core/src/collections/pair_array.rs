//! Open-addressed key/value table bodies.
//!
//! ```text
//! +0   key descriptor      i32
//! +4   value descriptor    i32
//! +8   record size         u32
//! +12  value offset        u32    offset of the value inside a record
//! +16  slots               u32
//! +20  used slots          u32
//! +24  max used slots      u32    two thirds of the slots
//! +28  last inserted slot  u32    u32::MAX when none
//! +32  records
//!
//! record: hash u64 | key | value      (padded to 8 bytes)
//! ```
//!
//! A record whose hash is [`UNUSED_HASH`] is empty. Probing starts at
//! `hash % (slots - 1)` and walks forward, wrapping after the last slot.

use super::hash::UNUSED_HASH;
use crate::arena::BlockMemory;
use crate::arena::allocation::align_up;
use crate::error::{RelocError, Result};
use crate::object::constituent::{self, Source};
use crate::types::{ArenaOffset, ObjectKind, TypeDescriptor};

pub(crate) const PAIR_ARRAY_HEADER_SIZE: u64 = 32;
pub(crate) const PAIR_ARRAY_DESCRIPTOR: TypeDescriptor = TypeDescriptor::object(ObjectKind::PairArray);

/// Fewest slots a table is created with.
pub const MIN_TABLE_SLOTS: u32 = 2;

const NO_SLOT: u32 = u32::MAX;
const HASH_SIZE: u64 = 8;

/// Used slots a table of `slots` may hold before it must double.
pub(crate) fn max_used(slots: u32) -> u32 {
    (slots as u64 * 2 / 3) as u32
}

/// Start of the probe sequence for `hash`.
pub(crate) fn first_slot(hash: u64, slots: u32) -> u32 {
    (hash % (slots as u64 - 1)) as u32
}

/// The slot probed after `slot`.
pub(crate) fn next_slot(slot: u32, slots: u32) -> u32 {
    if slot == slots - 1 { 0 } else { slot + 1 }
}

/// Slot count after doubling.
pub(crate) fn doubled(slots: u32) -> Result<u32> {
    slots.checked_mul(2).ok_or_else(|| RelocError::InvalidCapacity {
        requested: slots as u64 * 2,
        cause: "table slot count exceeds u32::MAX".to_string(),
    })
}

pub(crate) fn probe_exhausted(slots: u32, hash: u64) -> RelocError {
    tracing::error!(slots, hash, "Probe ran through the whole table");
    RelocError::ProbeExhausted { slots, hash }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PairHeader {
    pub(crate) key: TypeDescriptor,
    pub(crate) value: TypeDescriptor,
    pub(crate) record_size: u64,
    pub(crate) value_offset: u64,
    pub(crate) slots: u32,
    pub(crate) used: u32,
    pub(crate) max: u32,
    pub(crate) last_inserted: u32,
}

impl PairHeader {
    pub(crate) fn record(&self, body: ArenaOffset, slot: u32) -> ArenaOffset {
        body.add(PAIR_ARRAY_HEADER_SIZE + slot as u64 * self.record_size)
    }

    pub(crate) fn key_at(&self, body: ArenaOffset, slot: u32) -> ArenaOffset {
        self.record(body, slot).add(HASH_SIZE)
    }

    pub(crate) fn value_at(&self, body: ArenaOffset, slot: u32) -> ArenaOffset {
        self.record(body, slot).add(self.value_offset)
    }

    /// Whether inserting one more key requires doubling first.
    pub(crate) fn needs_growth(&self) -> bool {
        self.used + 1 > self.max
    }
}

pub(crate) fn header(memory: &BlockMemory, body: ArenaOffset) -> Result<PairHeader> {
    memory.check_range(body, PAIR_ARRAY_HEADER_SIZE)?;
    let key = TypeDescriptor::from_raw(memory.read_i32(body));
    let value = TypeDescriptor::from_raw(memory.read_i32(body.add(4)));
    let header = PairHeader {
        key,
        value,
        record_size: memory.read_u32(body.add(8)) as u64,
        value_offset: memory.read_u32(body.add(12)) as u64,
        slots: memory.read_u32(body.add(16)),
        used: memory.read_u32(body.add(20)),
        max: memory.read_u32(body.add(24)),
        last_inserted: memory.read_u32(body.add(28)),
    };
    let key_size = constituent::element_size(memory, key)?;
    let value_size = constituent::element_size(memory, value)?;
    if header.value_offset != HASH_SIZE + key_size
        || header.record_size != record_size(key_size, value_size)
        || header.slots < MIN_TABLE_SLOTS
        || header.used > header.slots
    {
        return Err(memory.corruption(body, "inconsistent table header"));
    }
    memory.check_range(body, PAIR_ARRAY_HEADER_SIZE + header.slots as u64 * header.record_size)?;
    Ok(header)
}

fn record_size(key_size: u64, value_size: u64) -> u64 {
    align_up(HASH_SIZE + key_size + value_size)
}

pub(crate) fn body_size(memory: &BlockMemory, body: ArenaOffset) -> Result<u64> {
    let header = header(memory, body)?;
    Ok(PAIR_ARRAY_HEADER_SIZE + header.slots as u64 * header.record_size)
}

pub(crate) fn read_hash(memory: &BlockMemory, header: &PairHeader, body: ArenaOffset, slot: u32) -> u64 {
    memory.read_u64(header.record(body, slot))
}

fn write_hash(memory: &mut BlockMemory, header: &PairHeader, body: ArenaOffset, slot: u32, hash: u64) {
    memory.write_u64(header.record(body, slot), hash);
}

fn set_used(memory: &mut BlockMemory, body: ArenaOffset, used: u32) {
    memory.write_u32(body.add(20), used);
}

fn set_last_inserted(memory: &mut BlockMemory, body: ArenaOffset, slot: u32) {
    memory.write_u32(body.add(28), slot);
}

fn write_header(memory: &mut BlockMemory, body: ArenaOffset, source: &PairHeader) {
    memory.write_i32(body, source.key.as_raw());
    memory.write_i32(body.add(4), source.value.as_raw());
    memory.write_u32(body.add(8), source.record_size as u32);
    memory.write_u32(body.add(12), source.value_offset as u32);
    memory.write_u32(body.add(16), source.slots);
    memory.write_u32(body.add(20), 0);
    memory.write_u32(body.add(24), source.max);
    memory.write_u32(body.add(28), NO_SLOT);
}

fn mark_all_unused(memory: &mut BlockMemory, header: &PairHeader, body: ArenaOffset) {
    for slot in 0..header.slots {
        write_hash(memory, header, body, slot, UNUSED_HASH);
    }
}

/// Allocate an empty table of at least `slots` slots with a count of 1.
pub(crate) fn allocate(
    memory: &mut BlockMemory,
    key: TypeDescriptor,
    value: TypeDescriptor,
    slots: u32,
) -> Result<ArenaOffset> {
    let slots = slots.max(MIN_TABLE_SLOTS);
    let key_size = constituent::element_size(memory, key)?;
    let value_size = constituent::element_size(memory, value)?;
    let header = PairHeader {
        key,
        value,
        record_size: record_size(key_size, value_size),
        value_offset: HASH_SIZE + key_size,
        slots,
        used: 0,
        max: max_used(slots),
        last_inserted: NO_SLOT,
    };
    let body = memory.allocate(PAIR_ARRAY_HEADER_SIZE + slots as u64 * header.record_size)?;
    memory.set_ref_count(body, 1);
    write_header(memory, body, &header);
    mark_all_unused(memory, &header, body);
    Ok(body)
}

pub(crate) enum Probe {
    Found(u32),
    Vacant(u32),
}

/// Walk the probe sequence for `hash`, stopping at the first empty slot or
/// the first slot with the same hash whose key satisfies `matches`.
pub(crate) fn probe(
    memory: &BlockMemory,
    header: &PairHeader,
    body: ArenaOffset,
    hash: u64,
    mut matches: impl FnMut(&BlockMemory, ArenaOffset) -> Result<bool>,
) -> Result<Probe> {
    let mut slot = first_slot(hash, header.slots);
    for _ in 0..header.slots {
        let stored = read_hash(memory, header, body, slot);
        if stored == UNUSED_HASH {
            return Ok(Probe::Vacant(slot));
        }
        if stored == hash && matches(memory, header.key_at(body, slot))? {
            return Ok(Probe::Found(slot));
        }
        slot = next_slot(slot, header.slots);
    }
    Err(probe_exhausted(header.slots, hash))
}

/// Mark an empty slot as holding `hash`.
pub(crate) fn occupy(memory: &mut BlockMemory, header: &PairHeader, body: ArenaOffset, slot: u32, hash: u64) {
    write_hash(memory, header, body, slot, hash);
    set_used(memory, body, header.used + 1);
    set_last_inserted(memory, body, slot);
}

/// Destroy the key and value in `slot` and mark it empty.
pub(crate) fn vacate(memory: &mut BlockMemory, header: &PairHeader, body: ArenaOffset, slot: u32) -> Result<()> {
    debug_assert_eq!(header.last_inserted, slot, "only the last inserted key may be removed");
    constituent::destroy(memory, header.key, header.key_at(body, slot))?;
    constituent::destroy(memory, header.value, header.value_at(body, slot))?;
    write_hash(memory, header, body, slot, UNUSED_HASH);
    set_used(memory, body, header.used.saturating_sub(1));
    set_last_inserted(memory, body, NO_SLOT);
    Ok(())
}

/// Build a table with twice the slots holding the same entries.
///
/// Entries are rehashed from their stored hashes and shared with the old
/// table; the old table is not modified.
pub(crate) fn double(memory: &mut BlockMemory, body: ArenaOffset) -> Result<ArenaOffset> {
    let old = header(memory, body)?;
    let grown = allocate(memory, old.key, old.value, doubled(old.slots)?)?;
    let new = header(memory, grown)?;

    let mut used = 0;
    for slot in 0..old.slots {
        let hash = read_hash(memory, &old, body, slot);
        if hash == UNUSED_HASH {
            continue;
        }
        let moved = (|| -> Result<()> {
            let Probe::Vacant(target) = probe(memory, &new, grown, hash, |_, _| Ok(false))? else {
                return Err(probe_exhausted(new.slots, hash));
            };
            copy_record(Source::Local, &old, body, slot, memory, &new, grown, target)?;
            Ok(())
        })();
        if let Err(e) = moved {
            discard(memory, grown)?;
            return Err(e);
        }
        used += 1;
        set_used(memory, grown, used);
    }

    tracing::debug!(block = %memory.id(), from = old.slots, to = new.slots, entries = used, "Table doubled");
    Ok(grown)
}

fn discard(memory: &mut BlockMemory, body: ArenaOffset) -> Result<()> {
    destroy_body(memory, body)?;
    memory.free(body);
    Ok(())
}

/// Copy one record into an empty slot of another table, writing its hash last.
#[allow(clippy::too_many_arguments)]
fn copy_record(
    src: Source<'_>,
    src_header: &PairHeader,
    src_body: ArenaOffset,
    src_slot: u32,
    dst: &mut BlockMemory,
    dst_header: &PairHeader,
    dst_body: ArenaOffset,
    dst_slot: u32,
) -> Result<()> {
    let hash = read_hash(src.memory(dst), src_header, src_body, src_slot);
    constituent::copy(
        src,
        src_header.key_at(src_body, src_slot),
        dst,
        dst_header.key_at(dst_body, dst_slot),
        src_header.key,
    )?;
    if let Err(e) = constituent::copy(
        src,
        src_header.value_at(src_body, src_slot),
        dst,
        dst_header.value_at(dst_body, dst_slot),
        src_header.value,
    ) {
        constituent::destroy(dst, dst_header.key, dst_header.key_at(dst_body, dst_slot))?;
        return Err(e);
    }
    write_hash(dst, dst_header, dst_body, dst_slot, hash);
    Ok(())
}

pub(crate) fn copy_body(src: Source<'_>, src_at: ArenaOffset, dst: &mut BlockMemory, dst_at: ArenaOffset) -> Result<()> {
    let old = header(src.memory(dst), src_at)?;
    write_header(dst, dst_at, &old);
    mark_all_unused(dst, &old, dst_at);

    let mut used = 0;
    for slot in 0..old.slots {
        if read_hash(src.memory(dst), &old, src_at, slot) == UNUSED_HASH {
            continue;
        }
        if let Err(e) = copy_record(src, &old, src_at, slot, dst, &old, dst_at, slot) {
            destroy_body(dst, dst_at)?;
            return Err(e);
        }
        used += 1;
        set_used(dst, dst_at, used);
    }
    Ok(())
}

pub(crate) fn destroy_body(memory: &mut BlockMemory, body: ArenaOffset) -> Result<()> {
    let header = header(memory, body)?;
    for slot in 0..header.slots {
        if read_hash(memory, &header, body, slot) == UNUSED_HASH {
            continue;
        }
        constituent::destroy(memory, header.key, header.key_at(body, slot))?;
        constituent::destroy(memory, header.value, header.value_at(body, slot))?;
        write_hash(memory, &header, body, slot, UNUSED_HASH);
    }
    set_used(memory, body, 0);
    Ok(())
}
