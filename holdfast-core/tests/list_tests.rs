use std::collections::VecDeque;

use holdfast_core::{
    Error, FileBuffer, HeapBuffer, I32Serializer, PersistentBuffer, PersistentLinkedList,
    ProtectionLevel, Serializer, StringSerializer,
};
use rand::distr::{Alphanumeric, SampleString};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::NamedTempFile;

#[test]
fn test_basic_scenario() {
    let mut list = PersistentLinkedList::open(HeapBuffer::new(), I32Serializer).unwrap();

    list.push_back(&1).unwrap();
    list.push_back(&2).unwrap();
    list.push_front(&0).unwrap();

    assert_eq!(list.len(), 3);
    assert_eq!(list.first().unwrap(), 0);
    assert_eq!(list.last().unwrap(), 2);
    assert_eq!(list.to_vec().unwrap(), vec![0, 1, 2]);

    assert_eq!(list.remove(1).unwrap(), 1);
    assert_eq!(list.to_vec().unwrap(), vec![0, 2]);
    assert_eq!(list.len(), 2);
}

/// Drives the same random operation through a persistent list and a
/// `VecDeque` reference.
fn random_op<S, B>(
    rng: &mut StdRng,
    list: &mut PersistentLinkedList<S, B>,
    reference: &mut VecDeque<S::Value>,
    new_value: S::Value,
) where
    S: Serializer,
    S::Value: Clone + PartialEq + std::fmt::Debug,
    B: PersistentBuffer,
{
    let len = reference.len() as u64;
    match rng.random_range(0..7u32) {
        0 => {
            list.push_back(&new_value).unwrap();
            reference.push_back(new_value);
        }
        1 => {
            list.push_front(&new_value).unwrap();
            reference.push_front(new_value);
        }
        2 => {
            let index = rng.random_range(0..=len);
            list.insert(index, &new_value).unwrap();
            reference.insert(index as usize, new_value);
        }
        3 if len > 0 => {
            let index = rng.random_range(0..len);
            let old = list.set(index, &new_value).unwrap();
            let slot = reference.get_mut(index as usize).unwrap();
            assert_eq!(old, *slot);
            *slot = new_value;
        }
        4 if len > 0 => {
            let index = rng.random_range(0..len);
            let removed = list.remove(index).unwrap();
            assert_eq!(removed, reference.remove(index as usize).unwrap());
        }
        5 if len > 0 => {
            assert_eq!(list.pop_back().unwrap(), reference.pop_back().unwrap());
        }
        6 if len > 0 => {
            assert_eq!(list.pop_front().unwrap(), reference.pop_front().unwrap());
        }
        _ => {
            list.push_back(&new_value).unwrap();
            reference.push_back(new_value);
        }
    }
}

fn assert_matches_reference<S, B>(
    list: &mut PersistentLinkedList<S, B>,
    reference: &VecDeque<S::Value>,
) where
    S: Serializer,
    S::Value: Clone + PartialEq + std::fmt::Debug,
    B: PersistentBuffer,
{
    assert_eq!(list.len(), reference.len() as u64);

    let forward = list.to_vec().unwrap();
    assert_eq!(forward, reference.iter().cloned().collect::<Vec<_>>());

    let backward: Vec<S::Value> =
        list.iter().rev().collect::<holdfast_core::Result<_>>().unwrap();
    assert_eq!(backward, reference.iter().rev().cloned().collect::<Vec<_>>());
}

#[test]
fn test_random_equivalence_fixed_size() {
    for seed in 0..100 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut list = PersistentLinkedList::open(HeapBuffer::new(), I32Serializer).unwrap();
        let mut reference = VecDeque::new();

        for _ in 0..120 {
            let value: i32 = rng.random();
            random_op(&mut rng, &mut list, &mut reference, value);
        }
        assert_matches_reference(&mut list, &reference);
    }
}

#[test]
fn test_random_equivalence_variable_size() {
    for seed in 100..200 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut list = PersistentLinkedList::open(HeapBuffer::new(), StringSerializer).unwrap();
        let mut reference = VecDeque::new();

        for _ in 0..120 {
            let len = rng.random_range(0..129);
            let value = Alphanumeric.sample_string(&mut rng, len);
            random_op(&mut rng, &mut list, &mut reference, value);
        }
        assert_matches_reference(&mut list, &reference);
    }
}

#[test]
fn test_persistence_across_reopen_read_only() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path();
    let mut rng = StdRng::seed_from_u64(0xD0D0);
    let mut reference = VecDeque::new();

    {
        let buffer = FileBuffer::open(path, ProtectionLevel::Barrier).unwrap();
        let mut list = PersistentLinkedList::open(buffer, StringSerializer).unwrap();
        for _ in 0..200 {
            let len = rng.random_range(0..64);
            let value = Alphanumeric.sample_string(&mut rng, len);
            random_op(&mut rng, &mut list, &mut reference, value);
        }
        assert_matches_reference(&mut list, &reference);
        list.close().unwrap();
    }

    let buffer = FileBuffer::open(path, ProtectionLevel::ReadOnly).unwrap();
    let mut list = PersistentLinkedList::open(buffer, StringSerializer).unwrap();
    assert_matches_reference(&mut list, &reference);
    list.close().unwrap();
}

#[test]
fn test_read_only_list_rejects_mutation() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path();

    {
        let buffer = FileBuffer::open(path, ProtectionLevel::Force).unwrap();
        let mut list = PersistentLinkedList::open(buffer, I32Serializer).unwrap();
        list.push_back(&1).unwrap();
        list.close().unwrap();
    }

    let buffer = FileBuffer::open(path, ProtectionLevel::ReadOnly).unwrap();
    let mut list = PersistentLinkedList::open(buffer, I32Serializer).unwrap();
    assert_eq!(list.get(0).unwrap(), 1);
    assert!(matches!(list.push_back(&2), Err(Error::ReadOnly)));
    assert!(matches!(list.pop_back(), Err(Error::ReadOnly)));
}

#[test]
fn test_positional_access_from_both_ends() {
    let mut list = PersistentLinkedList::open(HeapBuffer::new(), I32Serializer).unwrap();
    for v in 0..101 {
        list.push_back(&v).unwrap();
    }
    // Indices in the front half walk from the head, the back half from
    // the tail; both must agree with the logical order.
    for index in [0u64, 1, 49, 50, 51, 99, 100] {
        assert_eq!(list.get(index).unwrap(), index as i32);
    }
    assert!(matches!(list.get(101), Err(Error::OutOfRange(_))));
}

#[test]
fn test_file_growth_is_bounded_by_free_chain_reuse() {
    let temp_file = NamedTempFile::new().unwrap();
    let buffer = FileBuffer::open(temp_file.path(), ProtectionLevel::None).unwrap();
    let mut list = PersistentLinkedList::open(buffer, StringSerializer).unwrap();

    for i in 0..64 {
        list.push_back(&format!("element-{i:04}")).unwrap();
    }
    let high_water = std::fs::metadata(temp_file.path()).unwrap().len();

    // Sustained remove/insert churn with same-sized payloads must be
    // served entirely from the free chain.
    for round in 0..200 {
        list.pop_front().unwrap();
        list.push_back(&format!("element-{:04}", 64 + round)).unwrap();
    }
    assert_eq!(std::fs::metadata(temp_file.path()).unwrap().len(), high_water);
    assert_eq!(list.len(), 64);
}
