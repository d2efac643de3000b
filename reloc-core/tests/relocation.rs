//! Integration tests for moving object graphs between buffers.
//!
//! A graph is captured as bytes, copied into a fresh block and used there
//! without any fix-up pass.

use reloc_core::collections::{JoinMap, Map, Vector};
use reloc_core::object::{Object, RelPtr, Str};
use reloc_core::types::ObjectKind;

mod common;

use common::{long_text, relocate, relocate_with_room, roomy_allocator};

#[test]
fn nested_containers_survive_relocation() {
    let allocator = roomy_allocator();
    let index = allocator.make_map::<Str, Vector<u64>>(0).unwrap();
    for (name, count) in [("primes", 5u64), ("a much longer series name", 9)] {
        let series = index.get().unwrap().index(name).unwrap().get().unwrap();
        for n in 0..count {
            series.push(n * n).unwrap();
        }
    }

    let moved = relocate(&index);
    assert_ne!(moved.block_id(), index.block_id());

    let original = index.get().unwrap();
    let copy = moved.get().unwrap();
    assert_eq!(copy.len().unwrap(), original.len().unwrap());
    for name in ["primes", "a much longer series name"] {
        let before = original.get(name).unwrap().unwrap();
        let after = copy.get(name).unwrap().unwrap();
        assert_eq!(after.to_vec().unwrap(), before.to_vec().unwrap());
        let raw_before = before.with_raw_bytes(|b| b.to_vec()).unwrap();
        let raw_after = after.with_raw_bytes(|b| b.to_vec()).unwrap();
        assert_eq!(raw_after, raw_before);
    }
}

#[test]
fn polymorphic_dispatch_after_relocation() {
    let allocator = roomy_allocator();
    let objects = allocator.make_vector::<RelPtr<Object>>(4).unwrap();

    let text = allocator.make_string(&long_text("first")).unwrap();
    let numbers = allocator.make_vector::<u64>(2).unwrap();
    for n in [1u64, 2, 3] {
        numbers.get().unwrap().push(n).unwrap();
    }
    let names = allocator.make_map::<u64, Str>(0).unwrap();
    names.get().unwrap().insert(&1u64, "one").unwrap();
    let joins = allocator.make_join_map::<u32>(4).unwrap();
    joins.get().unwrap().push_value(5, 50u32).unwrap();
    joins.get().unwrap().push_value(5, 51u32).unwrap();

    for handle in [
        text.clone().into_object(),
        numbers.clone().into_object(),
        names.clone().into_object(),
        joins.clone().into_object(),
    ] {
        objects.get().unwrap().push(&handle).unwrap();
    }

    let describe = |objects: &Vector<RelPtr<Object>>| -> Vec<String> {
        objects
            .iter()
            .map(|slot| slot.unwrap().get().unwrap().describe().unwrap())
            .collect()
    };
    let before = describe(&objects.get().unwrap());

    let moved = relocate_with_room(&objects, 4096);
    let copy = moved.get().unwrap();
    assert_eq!(describe(&copy), before);

    let kinds: Vec<Option<ObjectKind>> = copy
        .iter()
        .map(|slot| slot.unwrap().get().unwrap().kind().unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some(ObjectKind::String),
            Some(ObjectKind::Vector),
            Some(ObjectKind::Map),
            Some(ObjectKind::JoinMap),
        ]
    );

    // Grow the relocated vector through the erased reference.
    let relocated_numbers = copy.get(1).unwrap().get().unwrap().downcast::<Vector<u64>>().unwrap();
    for n in 4..=40u64 {
        relocated_numbers.push(n).unwrap();
    }
    assert_eq!(relocated_numbers.len().unwrap(), 40);
    assert_eq!(copy.get(1).unwrap().get().unwrap().len().unwrap(), Some(40));
    assert_eq!(numbers.get().unwrap().len().unwrap(), 3);

    let relocated_joins = copy.get(3).unwrap().get().unwrap().downcast::<JoinMap<u32>>().unwrap();
    assert_eq!(relocated_joins.lookup(5).to_vec().unwrap(), vec![50, 51]);

    let relocated_names = copy.get(2).unwrap().get().unwrap().downcast::<Map<u64, Str>>().unwrap();
    assert!(relocated_names.get(&1u64).unwrap().is_some());
    assert!(copy.get(2).unwrap().get().unwrap().downcast::<Vector<u64>>().is_err());
}

#[test]
fn relocated_map_keeps_growing_in_its_new_block() {
    let allocator = roomy_allocator();
    let counts = allocator.make_map::<Str, u32>(4).unwrap();
    counts.get().unwrap().insert("alpha", 1u32).unwrap();
    counts.get().unwrap().insert("beta", 2u32).unwrap();

    let moved = relocate_with_room(&counts, 8 * 1024);
    let map = moved.get().unwrap();
    let capacity = map.capacity().unwrap();
    for i in 0..20u32 {
        map.insert(long_text(&format!("key {i}")).as_str(), i).unwrap();
    }
    assert!(map.capacity().unwrap() > capacity);
    assert_eq!(map.len().unwrap(), 22);
    assert_eq!(map.get("alpha").unwrap(), Some(1));
    assert_eq!(map.get("beta").unwrap(), Some(2));
    assert_eq!(counts.get().unwrap().len().unwrap(), 2);
}

#[test]
fn relocation_preserves_shared_references() {
    let allocator = roomy_allocator();
    let shared = allocator.make_string(&long_text("shared")).unwrap();
    let refs = allocator.make_vector::<RelPtr<Str>>(2).unwrap();
    refs.get().unwrap().push(&shared).unwrap();
    refs.get().unwrap().push(&shared).unwrap();
    assert_eq!(shared.ref_count().unwrap(), 3);

    let moved = relocate(&refs);
    let copy = moved.get().unwrap();
    let first = copy.get(0).unwrap();
    let second = copy.get(1).unwrap();
    assert_eq!(first.get().unwrap().offset(), second.get().unwrap().offset());
    assert_eq!(first.get().unwrap().text().unwrap(), long_text("shared"));
}
