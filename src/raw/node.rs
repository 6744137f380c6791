use bytes::Bytes;
use smallvec::SmallVec;

use super::arena::Handle;
use super::search::lower_bound;

/// Node capacity limits derived from the tree's configured degree.
///
/// The degree is the maximum number of child pointers in an internal node;
/// a leaf holds at most `degree - 1` keys. Non-root nodes must stay at or
/// above the matching minimum.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Bounds {
    degree: usize,
}

impl Bounds {
    pub(crate) fn new(degree: usize) -> Self {
        assert!(degree >= 3, "tree degree must be at least 3, got {degree}");
        Self { degree }
    }

    pub(crate) fn degree(self) -> usize {
        self.degree
    }

    pub(crate) fn max_children(self) -> usize {
        self.degree
    }

    pub(crate) fn min_children(self) -> usize {
        self.degree.div_ceil(2)
    }

    pub(crate) fn max_leaf_keys(self) -> usize {
        self.degree - 1
    }

    pub(crate) fn min_leaf_keys(self) -> usize {
        (self.degree - 1).div_ceil(2)
    }
}

pub(crate) type KeyVec = SmallVec<[Bytes; 8]>;
pub(crate) type ChildVec = SmallVec<[Handle; 8]>;
pub(crate) type ValueVec = SmallVec<[Handle; 8]>;

pub(crate) enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

/// Outcome of looking a key up inside a single node.
pub(crate) enum SearchResult {
    /// Key present at this index.
    Found(usize),
    /// Key absent; this is where it would be inserted.
    NotFound(usize),
}

impl Node {
    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Entry count used when choosing a rebalancing partner: keys for a
    /// leaf, pointers for an internal node.
    pub(crate) fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.key_count(),
            Node::Internal(internal) => internal.child_count(),
        }
    }

    pub(crate) fn needs_rebalance(&self, bounds: Bounds) -> bool {
        match self {
            Node::Leaf(leaf) => leaf.key_count() < bounds.min_leaf_keys(),
            Node::Internal(internal) => internal.child_count() < bounds.min_children(),
        }
    }

    pub(crate) fn as_leaf(&self) -> &LeafNode {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("expected leaf node"),
        }
    }

    pub(crate) fn as_leaf_mut(&mut self) -> &mut LeafNode {
        match self {
            Node::Leaf(leaf) => leaf,
            Node::Internal(_) => panic!("expected leaf node"),
        }
    }

    pub(crate) fn as_internal(&self) -> &InternalNode {
        match self {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("expected internal node"),
        }
    }

    pub(crate) fn as_internal_mut(&mut self) -> &mut InternalNode {
        match self {
            Node::Internal(internal) => internal,
            Node::Leaf(_) => panic!("expected internal node"),
        }
    }
}

/// Terminal node: the user-visible keys, parallel value handles, and a
/// forward link to the next leaf in key order.
pub(crate) struct LeafNode {
    keys: KeyVec,
    values: ValueVec,
    next: Option<Handle>,
}

impl LeafNode {
    pub(crate) fn new() -> Self {
        Self {
            keys: SmallVec::new(),
            values: SmallVec::new(),
            next: None,
        }
    }

    pub(crate) fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn value_count(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn keys(&self) -> &[Bytes] {
        &self.keys
    }

    #[inline]
    pub(crate) fn key(&self, index: usize) -> &Bytes {
        &self.keys[index]
    }

    pub(crate) fn first_key(&self) -> Option<&Bytes> {
        self.keys.first()
    }

    pub(crate) fn last_key(&self) -> Option<&Bytes> {
        self.keys.last()
    }

    #[inline]
    pub(crate) fn value(&self, index: usize) -> Handle {
        self.values[index]
    }

    pub(crate) fn next(&self) -> Option<Handle> {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: Option<Handle>) {
        self.next = next;
    }

    #[inline]
    pub(crate) fn search(&self, key: &[u8]) -> SearchResult {
        match lower_bound(&self.keys, key) {
            (index, true) => SearchResult::Found(index),
            (index, false) => SearchResult::NotFound(index),
        }
    }

    pub(crate) fn insert_at(&mut self, index: usize, key: Bytes, value: Handle) {
        self.keys.insert(index, key);
        self.values.insert(index, value);
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> (Bytes, Handle) {
        (self.keys.remove(index), self.values.remove(index))
    }

    /// Splits a full leaf to make room for a new pair at `index`.
    ///
    /// The left side ends up with `ceil((d - 1) / 2)` keys and the new pair
    /// lands on whichever side its index falls in, so both halves satisfy
    /// the minimum fill. The returned right leaf inherits this leaf's `next`
    /// link; the caller allocates it and points `self.next` at it.
    pub(crate) fn split_insert(
        &mut self,
        bounds: Bounds,
        index: usize,
        key: Bytes,
        value: Handle,
    ) -> LeafNode {
        debug_assert_eq!(self.key_count(), bounds.max_leaf_keys());
        let keep = bounds.min_leaf_keys();

        let mut right = LeafNode::new();
        right.next = self.next;
        if index < keep {
            right.keys = self.keys.drain(keep - 1..).collect();
            right.values = self.values.drain(keep - 1..).collect();
            self.insert_at(index, key, value);
        } else {
            right.keys = self.keys.drain(keep..).collect();
            right.values = self.values.drain(keep..).collect();
            right.insert_at(index - keep, key, value);
        }

        debug_assert!(self.key_count() >= bounds.min_leaf_keys());
        debug_assert!(right.key_count() >= bounds.min_leaf_keys());
        right
    }

    /// Appends everything from a consumed right sibling and takes over its
    /// `next` link.
    pub(crate) fn absorb(&mut self, right: LeafNode) {
        self.keys.extend(right.keys);
        self.values.extend(right.values);
        self.next = right.next;
    }

    /// Detaches the pairs from `at` onward.
    pub(crate) fn split_off(&mut self, at: usize) -> (KeyVec, ValueVec) {
        (
            self.keys.drain(at..).collect(),
            self.values.drain(at..).collect(),
        )
    }

    /// Detaches the first `count` pairs.
    pub(crate) fn take_front(&mut self, count: usize) -> (KeyVec, ValueVec) {
        (
            self.keys.drain(..count).collect(),
            self.values.drain(..count).collect(),
        )
    }

    pub(crate) fn prepend(&mut self, keys: KeyVec, values: ValueVec) {
        self.keys.insert_many(0, keys);
        self.values.insert_many(0, values);
    }

    pub(crate) fn append(&mut self, keys: KeyVec, values: ValueVec) {
        self.keys.extend(keys);
        self.values.extend(values);
    }
}

/// Routing node: separator keys and `keys + 1` child links. Every key in
/// `children[i]` is `< keys[i]`, every key in `children[i + 1]` is
/// `>= keys[i]`.
pub(crate) struct InternalNode {
    keys: KeyVec,
    children: ChildVec,
}

impl InternalNode {
    pub(crate) fn new() -> Self {
        Self {
            keys: SmallVec::new(),
            children: SmallVec::new(),
        }
    }

    /// Root installed after the old root split in two.
    pub(crate) fn new_root(separator: Bytes, left: Handle, right: Handle) -> Self {
        let mut node = Self::new();
        node.keys.push(separator);
        node.children.push(left);
        node.children.push(right);
        node
    }

    pub(crate) fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children.len()
    }

    pub(crate) fn keys(&self) -> &[Bytes] {
        &self.keys
    }

    #[inline]
    pub(crate) fn key(&self, index: usize) -> &Bytes {
        &self.keys[index]
    }

    pub(crate) fn set_key(&mut self, index: usize, key: Bytes) {
        self.keys[index] = key;
    }

    #[inline]
    pub(crate) fn child(&self, index: usize) -> Handle {
        self.children[index]
    }

    /// Child slot the descent for `key` must take. Separator boundaries
    /// route right: a key equal to `keys[i]` lives under `children[i + 1]`.
    #[inline]
    pub(crate) fn child_index_for_key(&self, key: &[u8]) -> usize {
        match lower_bound(&self.keys, key) {
            (pos, true) => pos + 1,
            (pos, false) => pos,
        }
    }

    /// Records a child split: the promoted key goes in at `index` and the
    /// new right sibling just after the child it split from.
    pub(crate) fn insert_at(&mut self, index: usize, key: Bytes, child: Handle) {
        self.keys.insert(index, key);
        self.children.insert(index + 1, child);
    }

    /// Drops the separator at `index` and the right child of the pair it
    /// separated, after that child was merged away.
    pub(crate) fn remove_at(&mut self, index: usize) -> (Bytes, Handle) {
        (self.keys.remove(index), self.children.remove(index + 1))
    }

    pub(crate) fn is_overfull(&self, bounds: Bounds) -> bool {
        self.children.len() > bounds.max_children()
    }

    /// Splits an over-full node (one past the pointer capacity). The left
    /// side keeps `ceil(d / 2)` pointers, the key separating the halves is
    /// handed up rather than kept in either.
    pub(crate) fn split(&mut self, bounds: Bounds) -> (Bytes, InternalNode) {
        debug_assert_eq!(self.child_count(), bounds.max_children() + 1);
        let keep = bounds.min_children();

        let mut right = InternalNode::new();
        right.keys = self.keys.drain(keep..).collect();
        right.children = self.children.drain(keep..).collect();
        let promoted = self.keys.pop().expect("over-full node has a key to promote");

        debug_assert_eq!(self.child_count(), self.key_count() + 1);
        debug_assert_eq!(right.child_count(), right.key_count() + 1);
        (promoted, right)
    }

    /// Appends the parent separator and everything from a consumed right
    /// sibling.
    pub(crate) fn absorb(&mut self, separator: Bytes, right: InternalNode) {
        self.keys.push(separator);
        self.keys.extend(right.keys);
        self.children.extend(right.children);
    }

    pub(crate) fn take_all(&mut self) -> (KeyVec, ChildVec) {
        (
            core::mem::take(&mut self.keys),
            core::mem::take(&mut self.children),
        )
    }

    pub(crate) fn restore(&mut self, keys: KeyVec, children: ChildVec) {
        debug_assert_eq!(children.len(), keys.len() + 1);
        self.keys = keys;
        self.children = children;
    }
}
