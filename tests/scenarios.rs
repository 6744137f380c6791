//! End-to-end workloads at fixed degrees, checked against the structural
//! guarantees the tree makes: fill bounds, height bounds, chain order, and
//! full retrievability.

use std::collections::{HashMap, HashSet};

use bytetree::BPlusTree;
use rand::prelude::*;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `count` distinct random 32-byte ASCII keys.
fn random_keys(count: usize, rng: &mut StdRng) -> Vec<[u8; 32]> {
    let mut seen = HashSet::with_capacity(count);
    let mut keys = Vec::with_capacity(count);
    while keys.len() < count {
        let mut key = [0u8; 32];
        for byte in &mut key {
            *byte = LETTERS[rng.gen_range(0..LETTERS.len())];
        }
        if seen.insert(key) {
            keys.push(key);
        }
    }
    keys
}

/// Worst-case height for `entries` keys at the given degree: every leaf and
/// every internal node at minimum fill.
fn max_height(entries: usize, degree: usize) -> usize {
    let min_leaf_keys = (degree - 1).div_ceil(2);
    let max_leaves = entries / min_leaf_keys;
    let min_children = degree.div_ceil(2);
    let levels = (max_leaves as f64).ln() / (min_children as f64).ln();
    levels.floor() as usize + 1
}

fn assert_healthy(tree: &BPlusTree<i64>) {
    let (unhealthy, total) = tree.unhealthy_nodes();
    assert_eq!(unhealthy, 0, "{unhealthy} of {total} nodes unhealthy");
}

#[test]
fn sequential_inserts_at_degree_three() {
    let mut tree = BPlusTree::new(3);
    for (i, key) in [b"a", b"b", b"c", b"d", b"e", b"f"].iter().enumerate() {
        tree.insert(*key, i as i64 + 1);
    }

    assert_eq!(tree.height(), 2);
    assert_eq!(tree.get(b"d"), Some(&4));

    let entries: Vec<(Vec<u8>, i64)> = tree.iter().map(|(k, &v)| (k.to_vec(), v)).collect();
    let expected: Vec<(Vec<u8>, i64)> = [b"a", b"b", b"c", b"d", b"e", b"f"]
        .iter()
        .enumerate()
        .map(|(i, k)| (k.to_vec(), i as i64 + 1))
        .collect();
    assert_eq!(entries, expected);
}

#[test]
fn reverse_inserts_at_degree_three() {
    let mut tree = BPlusTree::new(3);
    for (i, key) in [b"f", b"e", b"d", b"c", b"b", b"a"].iter().enumerate() {
        tree.insert(*key, i as i64 + 1);
    }

    let keys: Vec<Vec<u8>> = tree.keys().map(<[u8]>::to_vec).collect();
    let sorted: Vec<Vec<u8>> = [b"a", b"b", b"c", b"d", b"e", b"f"]
        .iter()
        .map(|k| k.to_vec())
        .collect();
    assert_eq!(keys, sorted);
    assert_eq!(tree.get(b"a"), Some(&6));
    assert_healthy(&tree);
}

#[test]
fn two_thousand_random_keys_at_degree_five() {
    let mut rng = StdRng::seed_from_u64(5);
    let keys = random_keys(2_000, &mut rng);

    let mut tree = BPlusTree::new(5);
    for (i, key) in keys.iter().enumerate() {
        tree.insert(key, i as i64);
    }

    for (i, key) in keys.iter().enumerate() {
        assert_eq!(tree.get(key), Some(&(i as i64)));
    }

    assert!(
        tree.height() <= max_height(keys.len(), 5),
        "height {} exceeds the minimum-fill bound {}",
        tree.height(),
        max_height(keys.len(), 5)
    );
    assert_healthy(&tree);

    // the leaf chain carries every key, in order
    let walked: Vec<Vec<u8>> = tree.keys().map(<[u8]>::to_vec).collect();
    assert_eq!(walked.len(), keys.len());
    assert!(walked.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn mass_deletion_at_degree_ten() {
    let mut rng = StdRng::seed_from_u64(10);
    let mut keys = random_keys(5_000, &mut rng);

    let mut tree = BPlusTree::new(10);
    let mut inserted: HashMap<[u8; 32], i64> = HashMap::new();
    for (i, key) in keys.iter().enumerate() {
        tree.insert(key, i as i64);
        inserted.insert(*key, i as i64);
    }

    keys.shuffle(&mut rng);
    let cut = keys.len() * 9 / 10;
    let (deleted, remaining) = keys.split_at(cut);

    for key in deleted {
        assert!(tree.remove(key).is_some());
        assert_healthy(&tree);
    }

    for key in deleted {
        assert_eq!(tree.get(key), None);
        assert_eq!(tree.remove(key), None);
    }
    for key in remaining {
        assert_eq!(tree.get(key), inserted.get(key));
    }
    assert_eq!(tree.len(), remaining.len());
}

#[test]
fn delete_all_then_rebuild_at_degree_three() {
    let mut rng = StdRng::seed_from_u64(3);
    let keys = random_keys(100, &mut rng);

    let mut tree = BPlusTree::new(3);
    for (i, key) in keys.iter().enumerate() {
        tree.insert(key, i as i64);
    }
    assert!(tree.height() > 0);

    for key in &keys {
        assert!(tree.remove(key).is_some());
    }
    assert_eq!(tree.height(), 0);
    assert_eq!(tree.len(), 0);

    for (i, key) in keys.iter().enumerate() {
        tree.insert(key, i as i64);
    }
    assert_healthy(&tree);
    assert!(tree.height() <= max_height(keys.len(), 3));
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(tree.get(key), Some(&(i as i64)));
    }
}

#[test]
fn range_scans_at_degree_three() {
    let mut tree = BPlusTree::new(3);
    for key in [b"01", b"03", b"05", b"07", b"09"] {
        tree.insert(key, ());
    }

    let mid: Vec<Vec<u8>> = tree
        .range(&b"03"[..]..&b"08"[..])
        .map(|(k, _)| k.to_vec())
        .collect();
    assert_eq!(mid, [b"03".to_vec(), b"05".to_vec(), b"07".to_vec()]);

    let head: Vec<Vec<u8>> = tree.range(..&b"05"[..]).map(|(k, _)| k.to_vec()).collect();
    assert_eq!(head, [b"01".to_vec(), b"03".to_vec()]);

    let tail: Vec<Vec<u8>> = tree.range(&b"06"[..]..).map(|(k, _)| k.to_vec()).collect();
    assert_eq!(tail, [b"07".to_vec(), b"09".to_vec()]);
}

#[test]
fn full_range_from_the_first_key() {
    let mut tree = BPlusTree::new(4);
    let keys: Vec<Vec<u8>> = (0u32..64).map(|i| i.to_be_bytes().to_vec()).collect();
    for (i, key) in keys.iter().enumerate() {
        tree.insert(key, i as i64);
    }

    let from_first: Vec<Vec<u8>> = tree
        .range(&keys[0][..]..)
        .map(|(k, _)| k.to_vec())
        .collect();
    assert_eq!(from_first, keys);
}

#[test]
fn equal_range_bounds_yield_nothing() {
    let mut tree = BPlusTree::new(3);
    for key in [b"a", b"b", b"c"] {
        tree.insert(key, 0);
    }
    assert_eq!(tree.range(&b"b"[..]..&b"b"[..]).count(), 0);
}

#[test]
fn first_split_lands_on_the_degree_boundary() {
    for degree in 3..=8 {
        let mut tree = BPlusTree::new(degree);
        for i in 0..degree as u32 - 1 {
            tree.insert(&i.to_be_bytes(), i as i64);
            assert_eq!(tree.height(), 0, "degree {degree}: early split");
        }
        tree.insert(&(degree as u32).to_be_bytes(), 0);
        assert_eq!(tree.height(), 1, "degree {degree}: missing split");
    }
}
