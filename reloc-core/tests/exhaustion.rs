//! Integration tests for running out of block space.
//!
//! A failed operation must leave its container exactly as it was.

use reloc_core::arena::AllocationPolicy;
use reloc_core::error::RelocError;
use reloc_core::object::Str;

mod common;

use common::{allocator, allocator_with_policy, long_text};

#[test]
fn vector_push_failure_keeps_contents() {
    let allocator = allocator(1024);
    let handle = allocator.make_vector::<u64>(1).unwrap();
    let vector = handle.get().unwrap();

    let mut pushed = 0u64;
    let err = loop {
        match vector.push(pushed) {
            Ok(()) => pushed += 1,
            Err(e) => break e,
        }
    };
    assert!(err.is_exhaustion());
    assert!(err.is_retriable());
    assert_eq!(vector.len().unwrap() as u64, pushed);
    assert_eq!(vector.to_vec().unwrap(), (0..pushed).collect::<Vec<u64>>());
}

#[test]
fn map_insert_failure_keeps_contents() {
    let allocator = allocator(2048);
    let handle = allocator.make_map::<Str, u64>(0).unwrap();
    let map = handle.get().unwrap();

    let mut inserted = 0u64;
    let err = loop {
        let key = long_text(&format!("entry {inserted}"));
        match map.insert(key.as_str(), inserted) {
            Ok(_) => inserted += 1,
            Err(e) => break e,
        }
    };
    assert!(matches!(err, RelocError::NotEnoughSpace { .. }));
    assert_eq!(map.len().unwrap() as u64, inserted);

    let failed_key = long_text(&format!("entry {inserted}"));
    assert_eq!(map.count(failed_key.as_str()).unwrap(), 0);
    for n in 0..inserted {
        let key = long_text(&format!("entry {n}"));
        assert_eq!(map.get(key.as_str()).unwrap(), Some(n));
    }
}

#[test]
fn join_map_push_failure_keeps_counts() {
    let allocator = allocator(2048);
    let handle = allocator.make_join_map::<Str>(0).unwrap();
    let joins = handle.get().unwrap();

    let mut pushed = 0u64;
    let err = loop {
        match joins.push_value(pushed % 3, long_text(&format!("value {pushed}")).as_str()) {
            Ok(()) => pushed += 1,
            Err(e) => break e,
        }
    };
    assert!(err.is_exhaustion());

    let total: u32 = (0..3).map(|hash| joins.count(hash).unwrap()).sum();
    assert_eq!(total as u64, pushed);
}

#[test]
fn retry_in_a_fresh_block() {
    let mut allocator = allocator(512);
    let first = allocator.make_vector::<Str>(1).unwrap();
    let err = loop {
        if let Err(e) = first.get().unwrap().push(long_text("filler").as_str()) {
            break e;
        }
    };
    assert!(err.is_retriable());

    allocator.enter_new_block(8 * 1024, false).unwrap();
    let second = allocator.make_vector::<Str>(1).unwrap();
    second.get().unwrap().push(long_text("fits now").as_str()).unwrap();
    assert_eq!(second.get().unwrap().len().unwrap(), 1);
    assert!(allocator.is_managed(&first));
}

#[test]
fn reuse_policy_recycles_freed_chunks() {
    let allocator = allocator_with_policy(1024, AllocationPolicy::Reuse);
    for round in 0..100 {
        let text = allocator.make_string(&long_text(&format!("round {round}"))).unwrap();
        drop(text);
    }
    assert_eq!(allocator.live_objects(), 0);
}

#[test]
fn no_reuse_policy_eventually_exhausts() {
    let allocator = allocator_with_policy(1024, AllocationPolicy::NoReuse);
    let err = (0..100)
        .map(|round| allocator.make_string(&long_text(&format!("round {round}"))).map(drop))
        .find_map(Result::err)
        .unwrap();
    assert!(err.is_exhaustion());
    assert_eq!(allocator.live_objects(), 0);
}
