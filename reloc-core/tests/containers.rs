//! Integration tests for the containers against std models.

use rand::Rng;
use reloc_core::collections::{MIN_TABLE_SLOTS, Vector};
use reloc_core::error::RelocError;
use reloc_core::object::Str;
use std::collections::HashMap;

mod common;

use common::{long_text, roomy_allocator, seeded_rng};

#[test]
fn map_matches_hashmap_model() {
    let allocator = roomy_allocator();
    let handle = allocator.make_map::<u64, u64>(0).unwrap();
    let map = handle.get().unwrap();
    let mut model: HashMap<u64, u64> = HashMap::new();
    let mut rng = seeded_rng(7);

    for _ in 0..2_000 {
        let key = rng.gen_range(0..500u64);
        let value = rng.r#gen::<u64>();
        let inserted = map.insert(&key, value).unwrap();
        assert_eq!(inserted, model.insert(key, value).is_none());

        let len = map.len().unwrap();
        let capacity = map.capacity().unwrap();
        assert_eq!(len as usize, model.len());
        assert!(len * 3 <= capacity * 2, "{len} entries in {capacity} slots");
    }

    for key in 0..600u64 {
        assert_eq!(map.get(&key).unwrap(), model.get(&key).copied());
        assert_eq!(map.count(&key).unwrap(), u32::from(model.contains_key(&key)));
    }

    let mut entries: Vec<(u64, u64)> = map.iter().map(|entry| entry.unwrap()).collect();
    entries.sort_unstable();
    let mut expected: Vec<(u64, u64)> = model.into_iter().collect();
    expected.sort_unstable();
    assert_eq!(entries, expected);
}

#[test]
fn fifth_string_key_doubles_the_table_once() {
    let allocator = roomy_allocator();
    let handle = allocator.make_map::<Str, u64>(6).unwrap();
    let map = handle.get().unwrap();
    let keys: Vec<String> = (0..5).map(|i| long_text(&format!("customer {i}"))).collect();

    for (value, key) in keys.iter().take(4).enumerate() {
        map.insert(key.as_str(), value as u64).unwrap();
    }
    assert_eq!(map.capacity().unwrap(), 6);

    map.insert(keys[4].as_str(), 4u64).unwrap();
    assert_eq!(map.capacity().unwrap(), 12);
    assert_eq!(map.len().unwrap(), 5);
    for (value, key) in keys.iter().enumerate() {
        assert_eq!(map.get(key.as_str()).unwrap(), Some(value as u64));
    }
}

#[test]
fn index_assigns_last_value() {
    let allocator = roomy_allocator();
    let handle = allocator.make_map::<Str, Str>(MIN_TABLE_SLOTS).unwrap();
    let map = handle.get().unwrap();

    map.index("colour").unwrap().set("red").unwrap();
    map.index("colour").unwrap().set(long_text("blue").as_str()).unwrap();
    map.index("size").unwrap().set("large").unwrap();

    assert_eq!(map.len().unwrap(), 2);
    assert_eq!(map.get("colour").unwrap().unwrap().text().unwrap(), long_text("blue"));
    assert_eq!(map.get("size").unwrap().unwrap().text().unwrap(), "large");
    assert!(map.get("weight").unwrap().is_none());
}

#[test]
fn map_removes_last_inserted_key() {
    let allocator = roomy_allocator();
    let handle = allocator.make_map::<Str, u32>(0).unwrap();
    let map = handle.get().unwrap();
    map.insert("kept", 1u32).unwrap();
    map.insert(long_text("temporary").as_str(), 2u32).unwrap();

    assert!(map.set_unused(long_text("temporary").as_str()).unwrap());
    assert!(!map.set_unused("never inserted").unwrap());
    assert_eq!(map.len().unwrap(), 1);
    assert_eq!(map.count(long_text("temporary").as_str()).unwrap(), 0);
    assert_eq!(map.get("kept").unwrap(), Some(1));
}

#[test]
fn join_map_matches_multimap_model() {
    let allocator = roomy_allocator();
    let handle = allocator.make_join_map::<u64>(0).unwrap();
    let joins = handle.get().unwrap();
    let mut model: HashMap<u64, Vec<u64>> = HashMap::new();
    let mut rng = seeded_rng(11);

    for value in 0..1_500u64 {
        let hash = rng.gen_range(0..120u64);
        joins.push_value(hash, value).unwrap();
        model.entry(hash).or_default().push(value);
    }

    assert_eq!(joins.len().unwrap() as usize, model.len());
    for hash in 0..130u64 {
        let expected = model.get(&hash).cloned().unwrap_or_default();
        assert_eq!(joins.count(hash).unwrap() as usize, expected.len());
        assert_eq!(joins.lookup(hash).to_vec().unwrap(), expected);
    }

    let mut seen = 0;
    for list in joins.iter() {
        let list = list.unwrap();
        assert_eq!(list.to_vec().unwrap(), model[&list.hash()]);
        seen += 1;
    }
    assert_eq!(seen, model.len());
}

#[test]
fn join_map_pops_newest_value_first() {
    let allocator = roomy_allocator();
    let handle = allocator.make_join_map::<Str>(4).unwrap();
    let joins = handle.get().unwrap();
    for text in ["first", "second", "third"] {
        joins.push_value(42, text).unwrap();
    }

    assert!(joins.set_unused(42).unwrap());
    let texts: Vec<String> = joins
        .lookup(42)
        .to_vec()
        .unwrap()
        .iter()
        .map(|s| s.text().unwrap())
        .collect();
    assert_eq!(texts, vec!["first", "second"]);

    assert!(joins.set_unused(42).unwrap());
    assert!(joins.set_unused(42).unwrap());
    assert!(!joins.set_unused(42).unwrap());
    assert_eq!(joins.count(42).unwrap(), 0);
    assert!(joins.is_empty().unwrap());
}

#[test]
fn vector_grows_by_doubling() {
    let allocator = roomy_allocator();
    let handle = allocator.make_vector::<u32>(1).unwrap();
    let vector = handle.get().unwrap();

    let mut capacities = Vec::new();
    for n in 0..9u32 {
        vector.push(n).unwrap();
        capacities.push(vector.capacity().unwrap());
    }
    assert_eq!(capacities, vec![1, 2, 4, 4, 8, 8, 8, 8, 16]);
    assert_eq!(vector.to_vec().unwrap(), (0..9).collect::<Vec<u32>>());

    vector.resize(3).unwrap();
    vector.fill(7u32).unwrap();
    assert_eq!(vector.to_vec().unwrap(), vec![7, 7, 7]);
}

#[test]
fn array_doubling_yields_a_new_array() {
    let allocator = roomy_allocator();
    let handle = allocator.make_array::<u16>(2).unwrap();
    let array = handle.get().unwrap();
    array.push(1u16).unwrap();
    array.push(2u16).unwrap();
    assert!(array.push(3u16).unwrap_err().is_exhaustion());

    let grown = array.double_capacity().unwrap();
    let grown_array = grown.get().unwrap();
    grown_array.push(3u16).unwrap();
    assert_eq!(grown_array.capacity().unwrap(), 4);
    assert_eq!(grown_array.to_vec().unwrap(), vec![1, 2, 3]);
    assert_eq!(array.len().unwrap(), 2);
}

#[test]
fn map_value_copied_from_itself_survives_doubling() {
    let allocator = roomy_allocator();
    let handle = allocator.make_map::<u32, Str>(6).unwrap();
    let map = handle.get().unwrap();
    map.insert(&0u32, long_text("zero").as_str()).unwrap();
    for key in 1..4u32 {
        map.insert(&key, "short").unwrap();
    }
    assert_eq!(map.capacity().unwrap(), 6);

    let zero = map.get(&0u32).unwrap().unwrap();
    assert!(map.insert(&4u32, &zero).unwrap());
    assert_eq!(map.capacity().unwrap(), 12);

    assert_eq!(map.get(&4u32).unwrap().unwrap().text().unwrap(), long_text("zero"));
    assert_eq!(map.get(&0u32).unwrap().unwrap().text().unwrap(), long_text("zero"));
    // The view pointed into the table that doubling replaced.
    assert!(matches!(zero.text(), Err(RelocError::StaleReference { .. })));
}

#[test]
fn join_map_value_copied_from_itself_survives_doubling() {
    let allocator = roomy_allocator();
    let handle = allocator.make_join_map::<Str>(3).unwrap();
    let joins = handle.get().unwrap();
    joins.push_value(1, long_text("first").as_str()).unwrap();
    joins.push_value(2, "x").unwrap();

    let first = joins.lookup(1).get(0).unwrap();
    joins.push_value(3, &first).unwrap();
    assert_eq!(joins.capacity().unwrap(), 6);

    let texts = |hash: u64| -> Vec<String> {
        joins
            .lookup(hash)
            .to_vec()
            .unwrap()
            .iter()
            .map(|s| s.text().unwrap())
            .collect()
    };
    assert_eq!(texts(3), vec![long_text("first")]);
    assert_eq!(texts(1), vec![long_text("first")]);
    assert_eq!(texts(2), vec!["x"]);
}

#[test]
fn join_map_overflow_value_copied_from_its_own_list() {
    let allocator = roomy_allocator();
    let handle = allocator.make_join_map::<Str>(8).unwrap();
    let joins = handle.get().unwrap();
    joins.push_value(9, "primary").unwrap();
    joins.push_value(9, long_text("overflow").as_str()).unwrap();

    // The overflow list holds one value and must grow to take another.
    let overflow = joins.lookup(9).get(1).unwrap();
    joins.push_value(9, &overflow).unwrap();

    let texts: Vec<String> = joins
        .lookup(9)
        .to_vec()
        .unwrap()
        .iter()
        .map(|s| s.text().unwrap())
        .collect();
    assert_eq!(texts, vec!["primary".to_string(), long_text("overflow"), long_text("overflow")]);
}

#[test]
fn vector_element_pushed_onto_itself_survives_growth() {
    let allocator = roomy_allocator();
    let handle = allocator.make_vector::<Str>(1).unwrap();
    let words = handle.get().unwrap();
    words.push(long_text("echo").as_str()).unwrap();

    let first = words.get(0).unwrap();
    words.push(&first).unwrap();
    assert_eq!(words.capacity().unwrap(), 2);

    let nested = allocator.make_vector::<Vector<u64>>(1).unwrap();
    let outer = nested.get().unwrap();
    outer.push_default().unwrap().get().unwrap().push(3u64).unwrap();
    outer.push(&outer.get(0).unwrap()).unwrap();

    let texts: Vec<String> = words.iter().map(|s| s.unwrap().text().unwrap()).collect();
    assert_eq!(texts, vec![long_text("echo"), long_text("echo")]);
    assert_eq!(outer.get(1).unwrap().to_vec().unwrap(), vec![3]);
    // Same-block copies share the inner body.
    outer.get(1).unwrap().set(0, 4u64).unwrap();
    assert_eq!(outer.get(0).unwrap().to_vec().unwrap(), vec![4]);
}

#[test]
fn slots_taken_before_growth_go_stale() {
    let allocator = roomy_allocator();
    let handle = allocator.make_vector::<u64>(1).unwrap();
    let vector = handle.get().unwrap();
    vector.push(1u64).unwrap();
    let first = vector.slot(0).unwrap();
    vector.push(2u64).unwrap();

    // The body the slot pointed into is free for the next object of its size.
    let other = allocator.make_array::<u64>(1).unwrap();
    other.get().unwrap().push(7u64).unwrap();

    assert!(matches!(first.set(999u64), Err(RelocError::StaleReference { .. })));
    assert!(matches!(first.get(), Err(RelocError::StaleReference { .. })));
    assert_eq!(other.get().unwrap().to_vec().unwrap(), vec![7]);
    assert_eq!(vector.to_vec().unwrap(), vec![1, 2]);

    vector.slot(0).unwrap().set(5u64).unwrap();
    assert_eq!(vector.to_vec().unwrap(), vec![5, 2]);
}

#[test]
fn map_slots_go_stale_when_the_table_doubles() {
    let allocator = roomy_allocator();
    let handle = allocator.make_map::<u64, u64>(MIN_TABLE_SLOTS).unwrap();
    let map = handle.get().unwrap();
    let slot = map.index(&1u64).unwrap();
    slot.set(10u64).unwrap();

    let mut key = 2u64;
    while map.capacity().unwrap() == MIN_TABLE_SLOTS {
        map.insert(&key, key * 10).unwrap();
        key += 1;
    }

    assert!(matches!(slot.set(11u64), Err(RelocError::StaleReference { .. })));
    assert_eq!(map.get(&1u64).unwrap(), Some(10));
    map.index(&1u64).unwrap().set(11u64).unwrap();
    assert_eq!(map.get(&1u64).unwrap(), Some(11));
}
