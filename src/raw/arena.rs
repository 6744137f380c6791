use core::num::NonZero;

#[cfg(test)]
type RawSlot = u16;
#[cfg(not(test))]
type RawSlot = u32;

/// Reference to an occupied [`Arena`] slot.
///
/// The tree stores these everywhere a pointer would go: child links,
/// leaf-to-leaf `next` links, and the per-entry value slots. They are
/// encoded as the bitwise complement of the slot number, so the all-ones
/// slot number the arena never hands out maps to the one bit pattern a
/// `NonZero` cannot hold, and `Option<Handle>` takes no more space than the
/// raw integer. The raw width drops to `u16` under `cfg(test)` so the
/// slot-exhaustion path can be reached without allocating four billion
/// nodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub(crate) struct Handle(NonZero<RawSlot>);

impl Handle {
    /// Largest slot number an arena may assign; one less than the raw
    /// integer range, since the all-ones pattern is the `None` niche.
    pub(crate) const MAX_SLOT: usize = (RawSlot::MAX - 1) as usize;

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn from_slot(slot: usize) -> Self {
        assert!(slot <= Self::MAX_SLOT, "arena slot space exhausted");
        // the complement of anything below RawSlot::MAX is never zero
        Self(NonZero::new(!(slot as RawSlot)).unwrap())
    }

    #[inline]
    const fn slot(self) -> usize {
        (!self.0.get()) as usize
    }
}

/// Slot map holding the tree's nodes or its values.
///
/// Freed slots go on a free list and are reused by later allocations, so a
/// long-lived tree with balanced insert/delete traffic does not grow its
/// backing storage. A `Handle` stays valid until the slot it names is
/// freed; node merges and entry removals free exactly one slot each.
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<Handle>,
}

impl<T> Arena<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn alloc(&mut self, element: T) -> Handle {
        if let Some(handle) = self.free.pop() {
            self.slots[handle.slot()] = Some(element);
            return handle;
        }
        let handle = Handle::from_slot(self.slots.len());
        self.slots.push(Some(element));
        handle
    }

    #[inline]
    pub(crate) fn get(&self, handle: Handle) -> &T {
        self.slots[handle.slot()]
            .as_ref()
            .expect("stale arena handle")
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, handle: Handle) -> &mut T {
        self.slots[handle.slot()]
            .as_mut()
            .expect("stale arena handle")
    }

    /// Removes and returns the element, releasing the slot for reuse.
    pub(crate) fn take(&mut self, handle: Handle) -> T {
        let element = self.slots[handle.slot()]
            .take()
            .expect("stale arena handle");
        self.free.push(handle);
        element
    }

    pub(crate) fn free(&mut self, handle: Handle) {
        drop(self.take(handle));
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}
