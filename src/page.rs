//! Serialised node format: a slotted page with a key-pointer table and a
//! value-cell heap.
//!
//! This is the on-page counterpart of the in-memory nodes, kept as a
//! serialisation target only; the tree engine never reads or writes pages.
//! A page splits into a fixed header and a heap. The heap holds a table of
//! fixed-size key cells growing from the front and variable-size value
//! cells allocated from the back, so the free space sits in the middle.
//! Deletion marks a key cell and abandons its value cell; `compact` rewrites
//! the page to reclaim the dead space.

use core::cmp::Ordering;

use crate::storage::{PageId, PageStore, NULL_PAGE_ID};

/// Page type tag for leaf nodes.
pub const LEAF_NODE_TYPE: u8 = 0x01;
/// Page type tag for internal nodes.
pub const INTERNAL_NODE_TYPE: u8 = 0x02;

/// Bytes of key prefix copied into each key cell for comparison without a
/// heap hop.
pub const PTR_HEAD_SIZE: usize = 5;

/// Header layout: `id: u32 LE`, `type: u8`, `occupied: u16`,
/// `extra_ptr: u32`, `values_offset: u16`, `nkeys: u16` (big-endian past
/// the id).
pub const HEADER_SIZE: usize = 4 + 1 + 2 + 4 + 2 + 2;

/// Key cell layout: `len: u16`, head prefix, `at: u16` (value-cell offset).
pub const KEY_CELL_SIZE: usize = 2 + PTR_HEAD_SIZE + 2;

/// Value-cell offset marking a lazily deleted entry.
const DELETED_AT: u16 = u16::MAX;

/// Bytes a value cell occupies for the given pair:
/// `flags: u8`, `key_len: u16`, `value_len: u16`, key, value.
pub fn value_cell_size(key: &[u8], value: &[u8]) -> usize {
    1 + 2 + 2 + key.len() + value.len()
}

/// One tree node in its serialised page form.
pub struct PageNode {
    data: Vec<u8>,
}

impl PageNode {
    /// Allocates a page from `store` and formats it as an empty node.
    pub fn alloc(store: &mut impl PageStore, node_type: u8) -> Self {
        let (id, buffer) = store.alloc();
        let mut node = Self {
            data: buffer.to_vec(),
        };
        node.set_id(id);
        node.set_node_type(node_type);
        node.set_extra_pointer(NULL_PAGE_ID);
        node.set_values_offset(node.heap_size() as u16);
        node
    }

    /// Wraps an existing page buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is too small to hold a header.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        assert!(data.len() > HEADER_SIZE, "page smaller than its header");
        Self { data }
    }

    /// The raw page, ready for [`PageStore::write`].
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    // ─── header ──────────────────────────────────────────────────────────

    /// The id of the page this node is stored in.
    pub fn id(&self) -> PageId {
        u32::from_le_bytes(self.data[0..4].try_into().unwrap())
    }

    fn set_id(&mut self, id: PageId) {
        self.data[0..4].copy_from_slice(&id.to_le_bytes());
    }

    /// [`LEAF_NODE_TYPE`] or [`INTERNAL_NODE_TYPE`].
    pub fn node_type(&self) -> u8 {
        self.data[4]
    }

    fn set_node_type(&mut self, node_type: u8) {
        self.data[4] = node_type;
    }

    /// Heap bytes in use: the key-cell table plus every live value cell.
    pub fn occupied(&self) -> usize {
        u16::from_be_bytes(self.data[5..7].try_into().unwrap()) as usize
    }

    fn set_occupied(&mut self, occupied: usize) {
        self.data[5..7].copy_from_slice(&(occupied as u16).to_be_bytes());
    }

    /// The extra child pointer of an internal node, or the next-leaf link
    /// of a leaf. [`NULL_PAGE_ID`] when absent.
    pub fn extra_pointer(&self) -> PageId {
        u32::from_be_bytes(self.data[7..11].try_into().unwrap())
    }

    /// Points the extra pointer at another page.
    pub fn set_extra_pointer(&mut self, id: PageId) {
        self.data[7..11].copy_from_slice(&id.to_be_bytes());
    }

    /// Heap offset where the next value cell will be placed.
    pub fn values_offset(&self) -> usize {
        u16::from_be_bytes(self.data[11..13].try_into().unwrap()) as usize
    }

    fn set_values_offset(&mut self, offset: u16) {
        self.data[11..13].copy_from_slice(&offset.to_be_bytes());
    }

    /// Key cells in the table, deleted ones included until `compact`.
    pub fn num_keys(&self) -> usize {
        u16::from_be_bytes(self.data[13..15].try_into().unwrap()) as usize
    }

    fn set_num_keys(&mut self, count: usize) {
        self.data[13..15].copy_from_slice(&(count as u16).to_be_bytes());
    }

    // ─── space accounting ────────────────────────────────────────────────

    /// Bytes of heap behind the header.
    pub fn heap_size(&self) -> usize {
        self.data.len() - HEADER_SIZE
    }

    fn heap(&self) -> &[u8] {
        &self.data[HEADER_SIZE..]
    }

    fn heap_mut(&mut self) -> &mut [u8] {
        &mut self.data[HEADER_SIZE..]
    }

    /// Heap bytes not in use, dead value cells included.
    pub fn free_space(&self) -> usize {
        self.heap_size() - self.occupied()
    }

    /// The contiguous gap between the key-cell table and the value cells;
    /// the only space an insert can actually use.
    pub fn unfragmented_free_space(&self) -> usize {
        self.values_offset() - self.num_keys() * KEY_CELL_SIZE
    }

    /// Used fraction of the heap, scaled to 0–255.
    pub fn occupancy(&self) -> u8 {
        (self.occupied() * 255 / self.heap_size()) as u8
    }

    /// Usable fraction of the free space, scaled to 0–255; 255 means none
    /// of it is trapped behind dead value cells.
    pub fn fragmentation(&self) -> u8 {
        let free = self.free_space();
        if free == 0 {
            return 255;
        }
        (self.unfragmented_free_space() * 255 / free) as u8
    }

    // ─── key cells ───────────────────────────────────────────────────────

    fn cell_start(&self, index: usize) -> usize {
        assert!(index < self.num_keys(), "key index out of range");
        index * KEY_CELL_SIZE
    }

    /// Stored length of the key at `index`.
    pub fn key_len(&self, index: usize) -> usize {
        let start = self.cell_start(index);
        u16::from_be_bytes(self.heap()[start..start + 2].try_into().unwrap()) as usize
    }

    /// The zero-padded head prefix of the key at `index`.
    pub fn key_head(&self, index: usize) -> &[u8] {
        let start = self.cell_start(index) + 2;
        &self.heap()[start..start + PTR_HEAD_SIZE]
    }

    fn cell_at(&self, index: usize) -> u16 {
        let start = self.cell_start(index) + 2 + PTR_HEAD_SIZE;
        u16::from_be_bytes(self.heap()[start..start + 2].try_into().unwrap())
    }

    fn set_cell_at(&mut self, index: usize, at: u16) {
        let start = self.cell_start(index) + 2 + PTR_HEAD_SIZE;
        self.heap_mut()[start..start + 2].copy_from_slice(&at.to_be_bytes());
    }

    /// Whether the entry at `index` has been lazily deleted.
    pub fn is_deleted(&self, index: usize) -> bool {
        self.cell_at(index) == DELETED_AT
    }

    fn value_cell(&self, index: usize) -> &[u8] {
        let at = self.cell_at(index);
        assert!(at != DELETED_AT, "value cell of a deleted entry");
        &self.heap()[at as usize..]
    }

    /// The key bytes of the live entry at `index`.
    pub fn key(&self, index: usize) -> &[u8] {
        let cell = self.value_cell(index);
        let key_len = u16::from_be_bytes(cell[1..3].try_into().unwrap()) as usize;
        &cell[5..5 + key_len]
    }

    /// The value bytes of the live entry at `index`.
    pub fn value(&self, index: usize) -> &[u8] {
        let cell = self.value_cell(index);
        let key_len = u16::from_be_bytes(cell[1..3].try_into().unwrap()) as usize;
        let value_len = u16::from_be_bytes(cell[3..5].try_into().unwrap()) as usize;
        &cell[5 + key_len..5 + key_len + value_len]
    }

    /// Total heap bytes the live entry at `index` accounts for.
    pub fn size_for_key(&self, index: usize) -> usize {
        let cell = self.value_cell(index);
        let key_len = u16::from_be_bytes(cell[1..3].try_into().unwrap()) as usize;
        let value_len = u16::from_be_bytes(cell[3..5].try_into().unwrap()) as usize;
        KEY_CELL_SIZE + 1 + 2 + 2 + key_len + value_len
    }

    // ─── operations ──────────────────────────────────────────────────────

    /// Inserts a pair at table position `index`, shifting later cells
    /// right. Returns `false` when the contiguous free space cannot hold
    /// the pair.
    pub fn insert_at(&mut self, key: &[u8], value: &[u8], index: usize) -> bool {
        assert!(index <= self.num_keys(), "insert index out of range");
        assert!(key.len() <= u16::MAX as usize && value.len() <= u16::MAX as usize);

        let cell_size = value_cell_size(key, value);
        if self.unfragmented_free_space() < KEY_CELL_SIZE + cell_size {
            return false;
        }

        // value cell grows down from the current values offset
        let at = self.values_offset() - cell_size;
        {
            let heap = self.heap_mut();
            heap[at] = 0; // flags
            heap[at + 1..at + 3].copy_from_slice(&(key.len() as u16).to_be_bytes());
            heap[at + 3..at + 5].copy_from_slice(&(value.len() as u16).to_be_bytes());
            heap[at + 5..at + 5 + key.len()].copy_from_slice(key);
            heap[at + 5 + key.len()..at + cell_size].copy_from_slice(value);
        }

        // open a table slot at `index`
        let table_end = self.num_keys() * KEY_CELL_SIZE;
        let slot = index * KEY_CELL_SIZE;
        {
            let heap = self.heap_mut();
            heap.copy_within(slot..table_end, slot + KEY_CELL_SIZE);
            heap[slot..slot + 2].copy_from_slice(&(key.len() as u16).to_be_bytes());
            let mut head = [0u8; PTR_HEAD_SIZE];
            let head_len = key.len().min(PTR_HEAD_SIZE);
            head[..head_len].copy_from_slice(&key[..head_len]);
            heap[slot + 2..slot + 2 + PTR_HEAD_SIZE].copy_from_slice(&head);
            heap[slot + 2 + PTR_HEAD_SIZE..slot + KEY_CELL_SIZE]
                .copy_from_slice(&(at as u16).to_be_bytes());
        }

        self.set_num_keys(self.num_keys() + 1);
        self.set_values_offset(at as u16);
        self.set_occupied(self.occupied() + KEY_CELL_SIZE + cell_size);
        true
    }

    /// Lazily deletes the entry at `index`: the key cell is marked and its
    /// value cell abandoned. The table keeps its length until `compact`.
    pub fn delete_at(&mut self, index: usize) {
        let dead = self.size_for_key(index) - KEY_CELL_SIZE;
        self.set_cell_at(index, DELETED_AT);
        self.set_occupied(self.occupied() - dead);
    }

    /// Rewrites the page with only its live entries, packing value cells
    /// back-to-back. Returns the number of bytes reclaimed.
    pub fn compact(&mut self) -> usize {
        let live: Vec<(Vec<u8>, Vec<u8>)> = (0..self.num_keys())
            .filter(|&index| !self.is_deleted(index))
            .map(|index| (self.key(index).to_vec(), self.value(index).to_vec()))
            .collect();

        let free_before = self.free_space();
        self.set_num_keys(0);
        self.set_values_offset(self.heap_size() as u16);
        self.set_occupied(0);
        for (index, (key, value)) in live.iter().enumerate() {
            let inserted = self.insert_at(key, value, index);
            debug_assert!(inserted, "compacted page cannot run out of space");
        }
        self.free_space() - free_before
    }

    /// The table position splitting the occupied space roughly in half:
    /// the number of leading entries a split leaves in this page.
    pub fn half_size_k(&self) -> usize {
        let half = self.occupied() / 2;
        let mut accumulated = 0;
        for index in 0..self.num_keys() {
            if self.is_deleted(index) {
                continue;
            }
            accumulated += self.size_for_key(index);
            if accumulated >= half {
                return index + 1;
            }
        }
        self.num_keys()
    }

    /// Moves the upper half of the entries into a freshly allocated page of
    /// the same type and splices it into the extra-pointer chain.
    pub fn split(&mut self, store: &mut impl PageStore) -> PageNode {
        let keep = self.half_size_k();
        let mut right = PageNode::alloc(store, self.node_type());

        for index in keep..self.num_keys() {
            if self.is_deleted(index) {
                continue;
            }
            let moved = right.insert_at(self.key(index), self.value(index), right.num_keys());
            debug_assert!(moved, "half a page fits in an empty page");
        }

        // rebuild this page with the entries it keeps
        let kept: Vec<(Vec<u8>, Vec<u8>)> = (0..keep)
            .filter(|&index| !self.is_deleted(index))
            .map(|index| (self.key(index).to_vec(), self.value(index).to_vec()))
            .collect();
        self.set_num_keys(0);
        self.set_values_offset(self.heap_size() as u16);
        self.set_occupied(0);
        for (index, (key, value)) in kept.iter().enumerate() {
            self.insert_at(key, value, index);
        }

        right.set_extra_pointer(self.extra_pointer());
        self.set_extra_pointer(right.id());
        right
    }

    /// Table position of `key` among the live entries: `Ok` at an exact
    /// match, `Err` at the insertion point. Meaningful on pages whose
    /// entries were inserted in key order.
    pub fn search(&self, key: &[u8]) -> Result<usize, usize> {
        for index in 0..self.num_keys() {
            if self.is_deleted(index) {
                continue;
            }
            // the head prefix usually settles it without touching the cell
            let head_len = self.key_len(index).min(PTR_HEAD_SIZE).min(key.len());
            let order = self.key_head(index)[..head_len]
                .cmp(&key[..head_len])
                .then_with(|| self.key(index).cmp(key));
            match order {
                Ordering::Less => {}
                Ordering::Equal => return Ok(index),
                Ordering::Greater => return Err(index),
            }
        }
        Err(self.num_keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, PAGE_SIZE};
    use rand::prelude::*;

    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

    fn ascii_key(rng: &mut StdRng) -> [u8; 32] {
        let mut key = [0u8; 32];
        for byte in &mut key {
            *byte = LETTERS[rng.gen_range(0..LETTERS.len())];
        }
        key
    }

    /// Inserts generated pairs at the front until the page refuses one;
    /// returns the pairs in table order.
    fn fill_node(node: &mut PageNode, rng: &mut StdRng) -> Vec<([u8; 32], u64)> {
        let mut pairs = Vec::new();
        loop {
            let key = ascii_key(rng);
            let value: u64 = rng.gen();
            if !node.insert_at(&key, &value.to_be_bytes(), 0) {
                break;
            }
            pairs.push((key, value));
        }
        pairs.reverse();
        pairs
    }

    fn assert_pair(node: &PageNode, index: usize, key: &[u8], value: u64) {
        assert_eq!(node.key_len(index), key.len());
        assert_eq!(node.key_head(index), &key[..PTR_HEAD_SIZE]);
        assert!(!node.is_deleted(index));
        assert_eq!(node.key(index), key);
        assert_eq!(node.value(index), value.to_be_bytes());
    }

    #[test]
    fn fresh_node_is_empty() {
        let mut store = MemoryStore::new();
        let node = PageNode::alloc(&mut store, INTERNAL_NODE_TYPE);

        assert_eq!(node.node_type(), INTERNAL_NODE_TYPE);
        assert_eq!(node.occupied(), 0);
        assert_eq!(node.num_keys(), 0);
        assert_eq!(node.values_offset(), node.heap_size());
        assert_eq!(node.extra_pointer(), NULL_PAGE_ID);
        assert_eq!(node.as_bytes().len(), store.page_size());
        assert_eq!(node.heap_size(), PAGE_SIZE - HEADER_SIZE);
        assert_eq!(node.occupancy(), 0);
        assert_eq!(node.fragmentation(), 255);
    }

    #[test]
    fn header_round_trips() {
        let mut node = PageNode::from_bytes(vec![0u8; PAGE_SIZE]);
        node.set_id(0xDEAD_BEEF);
        node.set_node_type(LEAF_NODE_TYPE);
        node.set_occupied(42);
        node.set_extra_pointer(7);
        node.set_values_offset(1000);
        node.set_num_keys(10);

        assert_eq!(node.id(), 0xDEAD_BEEF);
        assert_eq!(node.node_type(), LEAF_NODE_TYPE);
        assert_eq!(node.occupied(), 42);
        assert_eq!(node.extra_pointer(), 7);
        assert_eq!(node.values_offset(), 1000);
        assert_eq!(node.num_keys(), 10);
    }

    #[test]
    fn inserts_account_for_every_byte() {
        let mut store = MemoryStore::new();
        let mut node = PageNode::alloc(&mut store, LEAF_NODE_TYPE);
        let mut rng = StdRng::seed_from_u64(1);

        let pairs = fill_node(&mut node, &mut rng);
        assert!(!pairs.is_empty());

        let entry = KEY_CELL_SIZE + value_cell_size(&pairs[0].0, &0u64.to_be_bytes());
        let used = pairs.len() * entry;
        assert_eq!(node.num_keys(), pairs.len());
        assert_eq!(node.occupied(), used);
        assert_eq!(node.values_offset(), node.heap_size() - pairs.len() * (entry - KEY_CELL_SIZE));
        assert_eq!(node.occupancy(), (used * 255 / node.heap_size()) as u8);
        assert_eq!(node.fragmentation(), 255);
        assert_eq!(node.free_space(), node.heap_size() - used);
        assert_eq!(node.unfragmented_free_space(), node.free_space());

        for (index, (key, value)) in pairs.iter().enumerate() {
            assert_eq!(node.size_for_key(index), entry);
            assert_pair(&node, index, key, *value);
        }
    }

    #[test]
    fn full_node_rejects_without_damage() {
        let mut store = MemoryStore::new();
        let mut node = PageNode::alloc(&mut store, LEAF_NODE_TYPE);
        let mut rng = StdRng::seed_from_u64(2);

        let pairs = fill_node(&mut node, &mut rng);
        let key = ascii_key(&mut rng);
        assert!(!node.insert_at(&key, &[0u8; 8], node.num_keys()));
        assert_eq!(node.num_keys(), pairs.len());
        for (index, (key, value)) in pairs.iter().enumerate() {
            assert_pair(&node, index, key, *value);
        }
    }

    #[test]
    fn delete_then_compact_reclaims_space() {
        let mut store = MemoryStore::new();
        let mut node = PageNode::alloc(&mut store, LEAF_NODE_TYPE);
        let mut rng = StdRng::seed_from_u64(3);

        let pairs = fill_node(&mut node, &mut rng);
        let entry = node.size_for_key(0);

        let mut kept = Vec::new();
        let mut dropped = 0;
        for (index, pair) in pairs.iter().enumerate() {
            if rng.gen_bool(0.2) {
                node.delete_at(index);
                dropped += 1;
            } else {
                kept.push(*pair);
            }
        }
        assert!(dropped > 0, "seed must delete something");

        assert_eq!(
            node.occupied(),
            kept.len() * entry + dropped * KEY_CELL_SIZE
        );
        assert!(node.fragmentation() < 255);

        // the dead value cells already count as free; compaction reclaims
        // the marked key cells
        let freed = node.compact();
        assert_eq!(freed, dropped * KEY_CELL_SIZE);
        assert_eq!(node.occupied(), kept.len() * entry);
        assert_eq!(node.num_keys(), kept.len());
        assert_eq!(node.fragmentation(), 255);
        for (index, (key, value)) in kept.iter().enumerate() {
            assert_pair(&node, index, key, *value);
        }
    }

    #[test]
    fn split_moves_the_upper_half() {
        let mut store = MemoryStore::new();
        let mut node = PageNode::alloc(&mut store, LEAF_NODE_TYPE);
        let mut rng = StdRng::seed_from_u64(4);

        let pairs = fill_node(&mut node, &mut rng);
        let keep = node.half_size_k();
        let right = node.split(&mut store);

        assert_eq!(node.num_keys(), keep);
        assert_eq!(right.num_keys(), pairs.len() - keep);
        assert_eq!(node.extra_pointer(), right.id());
        assert_eq!(right.extra_pointer(), NULL_PAGE_ID);

        for (index, (key, value)) in pairs[..keep].iter().enumerate() {
            assert_pair(&node, index, key, *value);
        }
        for (index, (key, value)) in pairs[keep..].iter().enumerate() {
            assert_pair(&right, index, key, *value);
        }
    }

    #[test]
    fn search_finds_sorted_entries() {
        let mut store = MemoryStore::new();
        let mut node = PageNode::alloc(&mut store, LEAF_NODE_TYPE);

        for (index, key) in [&b"apple"[..], b"apricot", b"fig", b"plum"].iter().enumerate() {
            assert!(node.insert_at(key, b"v", index));
        }

        assert_eq!(node.search(b"apricot"), Ok(1));
        assert_eq!(node.search(b"banana"), Err(2));
        assert_eq!(node.search(b"zz"), Err(4));
        node.delete_at(2);
        assert_eq!(node.search(b"fig"), Err(3));
    }

    #[test]
    fn page_round_trips_through_the_store() {
        let mut store = MemoryStore::new();
        let mut node = PageNode::alloc(&mut store, LEAF_NODE_TYPE);
        assert!(node.insert_at(b"key", b"value", 0));

        let id = node.id();
        store.write(id, node.as_bytes()).unwrap();
        let reread = PageNode::from_bytes(store.read(id).unwrap().to_vec());
        assert_eq!(reread.id(), id);
        assert_eq!(reread.num_keys(), 1);
        assert_eq!(reread.key(0), b"key");
        assert_eq!(reread.value(0), b"value");
    }
}
