use bytes::Bytes;
use smallvec::SmallVec;

use super::arena::{Arena, Handle};
use super::node::{Bounds, ChildVec, InternalNode, KeyVec, LeafNode, Node, SearchResult};
use super::search::lower_bound;

/// One ancestor recorded on the way down: an internal node and the child
/// slot the descent took through it.
#[derive(Clone, Copy)]
struct PathStep {
    node: Handle,
    child_index: usize,
}

type Path = SmallVec<[PathStep; 16]>;

/// The B+ tree engine backing [`BPlusTree`](crate::BPlusTree).
///
/// All nodes live in one arena, all values in another; child links and the
/// leaf chain are handles into the node arena. The root starts as an empty
/// leaf and the tree height counts edges from the root to the leaves, so a
/// lone-leaf tree has height zero.
pub(crate) struct RawTree<V> {
    bounds: Bounds,
    nodes: Arena<Node>,
    values: Arena<V>,
    root: Handle,
    height: usize,
    len: usize,
    /// Reusable descent stack; empty between operations.
    path: Path,
}

impl<V> RawTree<V> {
    pub(crate) fn new(degree: usize) -> Self {
        let bounds = Bounds::new(degree);
        let mut nodes = Arena::new();
        let root = nodes.alloc(Node::Leaf(LeafNode::new()));
        Self {
            bounds,
            nodes,
            values: Arena::new(),
            root,
            height: 0,
            len: 0,
            path: SmallVec::new(),
        }
    }

    pub(crate) fn degree(&self) -> usize {
        self.bounds.degree()
    }

    pub(crate) fn height(&self) -> usize {
        self.height
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.values.clear();
        self.root = self.nodes.alloc(Node::Leaf(LeafNode::new()));
        self.height = 0;
        self.len = 0;
        debug_assert_eq!(self.nodes.len(), 1);
    }

    #[inline]
    pub(crate) fn node(&self, handle: Handle) -> &Node {
        self.nodes.get(handle)
    }

    #[inline]
    pub(crate) fn value(&self, handle: Handle) -> &V {
        self.values.get(handle)
    }

    /// Walks from the root to the leaf responsible for `key` without
    /// recording the route.
    fn find_leaf(&self, key: &[u8]) -> Handle {
        let mut current = self.root;
        loop {
            match self.nodes.get(current) {
                Node::Internal(internal) => {
                    current = internal.child(internal.child_index_for_key(key));
                }
                Node::Leaf(_) => return current,
            }
        }
    }

    /// Same walk, recording every internal node and the child slot taken so
    /// mutations can replay the route upward.
    fn descend(&mut self, key: &[u8]) -> (Handle, Path) {
        let mut path = core::mem::take(&mut self.path);
        let mut current = self.root;
        loop {
            match self.nodes.get(current) {
                Node::Internal(internal) => {
                    let child_index = internal.child_index_for_key(key);
                    path.push(PathStep {
                        node: current,
                        child_index,
                    });
                    current = internal.child(child_index);
                }
                Node::Leaf(_) => return (current, path),
            }
        }
    }

    fn release_path(&mut self, mut path: Path) {
        path.clear();
        self.path = path;
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<&V> {
        let leaf = self.nodes.get(self.find_leaf(key)).as_leaf();
        match leaf.search(key) {
            SearchResult::Found(index) => Some(self.values.get(leaf.value(index))),
            SearchResult::NotFound(_) => None,
        }
    }

    pub(crate) fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        let leaf = self.nodes.get(self.find_leaf(key)).as_leaf();
        match leaf.search(key) {
            SearchResult::Found(index) => {
                let slot = leaf.value(index);
                Some(self.values.get_mut(slot))
            }
            SearchResult::NotFound(_) => None,
        }
    }

    pub(crate) fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or updates, returning the value a duplicate key replaced.
    pub(crate) fn insert(&mut self, key: Bytes, value: V) -> Option<V> {
        let (leaf_handle, mut path) = self.descend(&key);

        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        let replaced = match leaf.search(&key) {
            SearchResult::Found(index) => {
                let slot = leaf.value(index);
                Some(core::mem::replace(self.values.get_mut(slot), value))
            }
            SearchResult::NotFound(index) => {
                let value_handle = self.values.alloc(value);
                let mut pending = if leaf.key_count() < self.bounds.max_leaf_keys() {
                    leaf.insert_at(index, key, value_handle);
                    None
                } else {
                    let right = leaf.split_insert(self.bounds, index, key, value_handle);
                    let promoted = right.first_key().expect("split leaf is never empty").clone();
                    let right_handle = self.nodes.alloc(Node::Leaf(right));
                    self.nodes
                        .get_mut(leaf_handle)
                        .as_leaf_mut()
                        .set_next(Some(right_handle));
                    Some((promoted, right_handle))
                };
                self.len += 1;

                while let Some((promoted, new_child)) = pending {
                    pending = match path.pop() {
                        Some(step) => {
                            self.apply_child_split(step.node, step.child_index, promoted, new_child)
                        }
                        None => {
                            self.grow_root(promoted, new_child);
                            None
                        }
                    };
                }
                None
            }
        };

        self.release_path(path);
        replaced
    }

    /// Records a child split at `parent`; when the parent itself overflows,
    /// returns the next split to propagate.
    fn apply_child_split(
        &mut self,
        parent: Handle,
        child_index: usize,
        promoted: Bytes,
        new_child: Handle,
    ) -> Option<(Bytes, Handle)> {
        let bounds = self.bounds;
        let node = self.nodes.get_mut(parent).as_internal_mut();
        node.insert_at(child_index, promoted, new_child);
        if !node.is_overfull(bounds) {
            return None;
        }
        let (up, right) = node.split(bounds);
        let right_handle = self.nodes.alloc(Node::Internal(right));
        Some((up, right_handle))
    }

    fn grow_root(&mut self, separator: Bytes, right: Handle) {
        let root = InternalNode::new_root(separator, self.root, right);
        self.root = self.nodes.alloc(Node::Internal(root));
        self.height += 1;
    }

    /// Removes `key`, rebalancing up the recorded path. The `lazy` hook is
    /// kept for a deferred-rebalancing mode that is not implemented.
    pub(crate) fn remove(&mut self, key: &[u8], lazy: bool) -> Option<V> {
        assert!(!lazy, "lazy delete unimplemented");
        let (leaf_handle, mut path) = self.descend(key);

        let leaf = self.nodes.get_mut(leaf_handle).as_leaf_mut();
        let removed = match leaf.search(key) {
            SearchResult::NotFound(_) => None,
            SearchResult::Found(index) => {
                let (_key, value_handle) = leaf.remove_at(index);
                self.len -= 1;
                Some(self.values.take(value_handle))
            }
        };

        if removed.is_some() {
            while let Some(step) = path.pop() {
                let child = self.nodes.get(step.node).as_internal().child(step.child_index);
                if self.nodes.get(child).needs_rebalance(self.bounds) {
                    self.rebalance_at(step.node, step.child_index);
                }
            }
            self.collapse_root();
        }

        self.release_path(path);
        removed
    }

    /// An internal root left with a single child hands the tree over to it.
    /// A leaf root is left alone, even empty.
    fn collapse_root(&mut self) {
        let lone_child = match self.nodes.get(self.root) {
            Node::Internal(internal) if internal.child_count() == 1 => Some(internal.child(0)),
            _ => None,
        };
        if let Some(child) = lone_child {
            self.nodes.free(self.root);
            self.root = child;
            self.height -= 1;
        }
    }

    /// Fixes the under-filled child at `child_index` of `parent` by merging
    /// it with a neighbour or shifting entries across the boundary.
    fn rebalance_at(&mut self, parent: Handle, child_index: usize) {
        let bounds = self.bounds;
        let (separator_index, left, right, down_key) = {
            let node = self.nodes.get(parent).as_internal();
            let count = node.child_count();
            let separator_index = if child_index == 0 {
                0
            } else if child_index == count - 1 {
                count - 2
            } else {
                // a short neighbour can be merged away outright, a long one
                // gives up the fewest entries on redistribution
                let left_len = self.nodes.get(node.child(child_index - 1)).len();
                let right_len = self.nodes.get(node.child(child_index + 1)).len();
                if left_len >= right_len {
                    child_index - 1
                } else {
                    child_index
                }
            };
            (
                separator_index,
                node.child(separator_index),
                node.child(separator_index + 1),
                node.key(separator_index).clone(),
            )
        };

        match self.rebalance_pair(left, right, down_key) {
            Some(up) => {
                self.nodes
                    .get_mut(parent)
                    .as_internal_mut()
                    .set_key(separator_index, up);
                debug_assert!(!self.nodes.get(right).needs_rebalance(bounds));
            }
            None => {
                // right was consumed; its separator and pointer go with it
                let _ = self
                    .nodes
                    .get_mut(parent)
                    .as_internal_mut()
                    .remove_at(separator_index);
            }
        }
        debug_assert!(!self.nodes.get(left).needs_rebalance(bounds));
    }

    /// Merges or redistributes an adjacent sibling pair. `None` means the
    /// right node was consumed and its arena slot freed; `Some(up)` carries
    /// the separator the parent must store in its place.
    fn rebalance_pair(&mut self, left: Handle, right: Handle, down_key: Bytes) -> Option<Bytes> {
        if self.nodes.get(left).is_leaf() {
            self.rebalance_leaves(left, right)
        } else {
            self.rebalance_internals(left, right, down_key)
        }
    }

    fn rebalance_leaves(&mut self, left: Handle, right: Handle) -> Option<Bytes> {
        let total = self.nodes.get(left).len() + self.nodes.get(right).len();
        if total <= self.bounds.max_leaf_keys() {
            let right_leaf = match self.nodes.take(right) {
                Node::Leaf(leaf) => leaf,
                Node::Internal(_) => unreachable!("sibling of a leaf is a leaf"),
            };
            self.nodes.get_mut(left).as_leaf_mut().absorb(right_leaf);
            return None;
        }

        // shift the boundary so the left side ends with ceil(total / 2) keys
        let target_left = total.div_ceil(2);
        let left_len = self.nodes.get(left).len();
        if left_len > target_left {
            let (keys, values) = self.nodes.get_mut(left).as_leaf_mut().split_off(target_left);
            self.nodes.get_mut(right).as_leaf_mut().prepend(keys, values);
        } else {
            let (keys, values) = self
                .nodes
                .get_mut(right)
                .as_leaf_mut()
                .take_front(target_left - left_len);
            self.nodes.get_mut(left).as_leaf_mut().append(keys, values);
        }
        Some(
            self.nodes
                .get(right)
                .as_leaf()
                .first_key()
                .expect("redistributed leaf is never empty")
                .clone(),
        )
    }

    fn rebalance_internals(&mut self, left: Handle, right: Handle, down_key: Bytes) -> Option<Bytes> {
        let bounds = self.bounds;
        let total_children = self.nodes.get(left).len() + self.nodes.get(right).len();
        if total_children <= bounds.max_children() {
            let right_node = match self.nodes.take(right) {
                Node::Internal(node) => node,
                Node::Leaf(_) => unreachable!("sibling of an internal node is internal"),
            };
            self.nodes
                .get_mut(left)
                .as_internal_mut()
                .absorb(down_key, right_node);
            return None;
        }

        // rebuild both sides from the logical sequence
        // (left.keys ++ [down] ++ right.keys, left.children ++ right.children)
        let (mut keys, mut children) = self.nodes.get_mut(left).as_internal_mut().take_all();
        keys.push(down_key);
        {
            let (right_keys, right_children) =
                self.nodes.get_mut(right).as_internal_mut().take_all();
            keys.extend(right_keys);
            children.extend(right_children);
        }

        let keep = bounds.min_children();
        let right_keys: KeyVec = keys.drain(keep..).collect();
        let right_children: ChildVec = children.drain(keep..).collect();
        let up = keys.pop().expect("combined sequence outgrows one node");

        self.nodes
            .get_mut(left)
            .as_internal_mut()
            .restore(keys, children);
        self.nodes
            .get_mut(right)
            .as_internal_mut()
            .restore(right_keys, right_children);
        Some(up)
    }

    /// Leaf position of the smallest key `>= key`. When every key in the
    /// located leaf is smaller, the position moves to the head of the next
    /// leaf in the chain. `None` when no key qualifies.
    pub(crate) fn lower_bound_position(&self, key: &[u8]) -> Option<(Handle, usize)> {
        let leaf_handle = self.find_leaf(key);
        let leaf = self.nodes.get(leaf_handle).as_leaf();
        let (index, _) = lower_bound(leaf.keys(), key);
        if index < leaf.key_count() {
            return Some((leaf_handle, index));
        }
        // non-root leaves are never empty, so the head of the next leaf is
        // the next key in order
        leaf.next().map(|next| (next, 0))
    }

    /// Position of the globally smallest key. The empty key compares below
    /// every other key, so it descends the left spine.
    pub(crate) fn first_position(&self) -> Option<(Handle, usize)> {
        self.lower_bound_position(&[])
    }

    /// The position one key after `(leaf, index)` in chain order.
    pub(crate) fn advance_position(&self, leaf: Handle, index: usize) -> Option<(Handle, usize)> {
        let node = self.nodes.get(leaf).as_leaf();
        if index + 1 < node.key_count() {
            Some((leaf, index + 1))
        } else {
            node.next().map(|next| (next, 0))
        }
    }

    /// Counts descendants of the root that violate their local invariants,
    /// as `(unhealthy, total)`. The root is exempt from the minimum-fill
    /// rule and excluded from the count.
    pub(crate) fn unhealthy_nodes(&self) -> (usize, usize) {
        let mut unhealthy = 0;
        let mut total = 0;
        if let Node::Internal(internal) = self.nodes.get(self.root) {
            for i in 0..internal.child_count() {
                self.count_unhealthy(internal.child(i), &mut unhealthy, &mut total);
            }
        }
        (unhealthy, total)
    }

    fn count_unhealthy(&self, handle: Handle, unhealthy: &mut usize, total: &mut usize) {
        *total += 1;
        if !self.node_is_healthy(handle) {
            *unhealthy += 1;
        }
        if let Node::Internal(internal) = self.nodes.get(handle) {
            for i in 0..internal.child_count() {
                self.count_unhealthy(internal.child(i), unhealthy, total);
            }
        }
    }

    fn node_is_healthy(&self, handle: Handle) -> bool {
        match self.nodes.get(handle) {
            Node::Leaf(leaf) => {
                let filled = leaf.key_count() >= self.bounds.min_leaf_keys()
                    && leaf.key_count() <= self.bounds.max_leaf_keys();
                let arity = leaf.key_count() == leaf.value_count();
                let sorted = leaf.keys().windows(2).all(|pair| pair[0] < pair[1]);
                let chained = match leaf.next() {
                    None => true,
                    Some(next) => {
                        match (leaf.last_key(), self.nodes.get(next).as_leaf().first_key()) {
                            (Some(last), Some(first)) => last < first,
                            _ => false,
                        }
                    }
                };
                filled && arity && sorted && chained
            }
            Node::Internal(internal) => {
                let count = internal.child_count();
                let filled = count >= self.bounds.min_children() && count <= self.bounds.max_children();
                let arity = count == internal.key_count() + 1;
                let sorted = internal.keys().windows(2).all(|pair| pair[0] < pair[1]);
                let distinct = (0..count)
                    .all(|i| (i + 1..count).all(|j| internal.child(i) != internal.child(j)));
                filled && arity && sorted && distinct
            }
        }
    }
}

#[cfg(test)]
impl<V> RawTree<V> {
    /// Asserts every structural invariant: arity, ordering, separator
    /// bounds, fill limits, uniform leaf depth, chain consistency, and the
    /// entry count. Test-only; panics with a description on violation.
    pub(crate) fn check_invariants(&self) {
        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        self.check_node(self.root, 0, None, None, true, &mut leaf_depth, &mut leaves);

        let mut chain = Vec::new();
        let mut current = leaves.first().copied();
        while let Some(handle) = current {
            chain.push(handle);
            current = self.nodes.get(handle).as_leaf().next();
        }
        assert_eq!(chain, leaves, "leaf chain disagrees with tree order");

        let total: usize = leaves
            .iter()
            .map(|&handle| self.nodes.get(handle).as_leaf().key_count())
            .sum();
        assert_eq!(total, self.len, "entry count drifted");

        let mut previous: Option<Bytes> = None;
        for &handle in &leaves {
            for key in self.nodes.get(handle).as_leaf().keys() {
                if let Some(ref prev) = previous {
                    assert!(prev < key, "keys out of order along the chain");
                }
                previous = Some(key.clone());
            }
        }
    }

    fn check_node(
        &self,
        handle: Handle,
        depth: usize,
        lower: Option<&Bytes>,
        upper: Option<&Bytes>,
        is_root: bool,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<Handle>,
    ) {
        match self.nodes.get(handle) {
            Node::Leaf(leaf) => {
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(expected) => assert_eq!(depth, expected, "leaves at different depths"),
                }
                assert_eq!(leaf.key_count(), leaf.value_count(), "key/value arity");
                if !is_root {
                    assert!(leaf.key_count() >= self.bounds.min_leaf_keys(), "leaf under-filled");
                }
                assert!(leaf.key_count() <= self.bounds.max_leaf_keys(), "leaf over-filled");
                assert!(
                    leaf.keys().windows(2).all(|pair| pair[0] < pair[1]),
                    "leaf keys unsorted"
                );
                for key in leaf.keys() {
                    if let Some(lower) = lower {
                        assert!(key >= lower, "key below subtree lower bound");
                    }
                    if let Some(upper) = upper {
                        assert!(key < upper, "key at or above subtree upper bound");
                    }
                }
                leaves.push(handle);
            }
            Node::Internal(internal) => {
                assert_eq!(
                    internal.child_count(),
                    internal.key_count() + 1,
                    "key/pointer arity"
                );
                let minimum = if is_root { 2 } else { self.bounds.min_children() };
                assert!(internal.child_count() >= minimum, "internal node under-filled");
                assert!(
                    internal.child_count() <= self.bounds.max_children(),
                    "internal node over-filled"
                );
                assert!(
                    internal.keys().windows(2).all(|pair| pair[0] < pair[1]),
                    "separator keys unsorted"
                );
                for i in 0..internal.child_count() {
                    let child_lower = if i == 0 { lower } else { Some(internal.key(i - 1)) };
                    let child_upper = if i == internal.key_count() {
                        upper
                    } else {
                        Some(internal.key(i))
                    };
                    self.check_node(
                        internal.child(i),
                        depth + 1,
                        child_lower,
                        child_upper,
                        false,
                        leaf_depth,
                        leaves,
                    );
                }
            }
        }
    }
}
