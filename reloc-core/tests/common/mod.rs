//! Common test utilities for integration tests.

#![allow(dead_code)]

use rand::SeedableRng;
use rand::rngs::StdRng;
use reloc_core::arena::{AllocationPolicy, Allocator, ArenaConfig};
use reloc_core::object::{Handle, Referent};
use reloc_core::record::Record;

/// An allocator whose blocks hold `block_size` bytes.
pub fn allocator(block_size: u64) -> Allocator {
    Allocator::new(ArenaConfig::default().with_block_size(block_size)).unwrap()
}

/// An allocator with roomy blocks for tests that never run out of space.
pub fn roomy_allocator() -> Allocator {
    allocator(256 * 1024)
}

/// An allocator using `policy`.
pub fn allocator_with_policy(block_size: u64, policy: AllocationPolicy) -> Allocator {
    Allocator::new(
        ArenaConfig::default()
            .with_block_size(block_size)
            .with_policy(policy),
    )
    .unwrap()
}

/// Ship the block holding `handle` through a plain byte buffer and re-derive
/// the root on the other side.
pub fn relocate<T: Referent>(handle: &Handle<T>) -> Handle<T> {
    let bytes = Record::snapshot(handle).unwrap().as_bytes().to_vec();
    Record::from_bytes(bytes).unwrap().root::<T>().unwrap()
}

/// Like [`relocate`], leaving `spare` bytes of room in the new block.
pub fn relocate_with_room<T: Referent>(handle: &Handle<T>, spare: u64) -> Handle<T> {
    let record = Record::from_bytes(Record::snapshot(handle).unwrap().into_bytes()).unwrap();
    let capacity = record.byte_len() as u64 + spare;
    record.root_with_capacity::<T>(capacity).unwrap()
}

/// A deterministic random number generator.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// A string long enough to be stored out of line.
pub fn long_text(tag: &str) -> String {
    format!("{tag}: a string that does not fit inline")
}
