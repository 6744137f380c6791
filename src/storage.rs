//! Pluggable page storage for the serialised node format.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::trace;

/// Identifier of one stored page.
pub type PageId = u32;

/// Sentinel id used where a page link is absent.
pub const NULL_PAGE_ID: PageId = PageId::MAX;

/// Fixed page size of the in-memory store.
pub const PAGE_SIZE: usize = 4096;

/// Failures at the storage boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The page id names no stored page.
    #[error("page {0} does not exist")]
    UnknownPage(PageId),
    /// A write carried a buffer of the wrong length.
    #[error("page write of {got} bytes, page size is {expected}")]
    WrongLength {
        /// The store's page size.
        expected: usize,
        /// The length the caller supplied.
        got: usize,
    },
}

/// A page-granular storage backend.
///
/// Pages are fixed-size byte buffers addressed by [`PageId`]. `alloc` hands
/// out a zeroed scratch buffer alongside the new id; the caller fills it in
/// and persists it with `write`.
pub trait PageStore {
    /// The fixed size of every page, in bytes.
    fn page_size(&self) -> usize;

    /// Reserves a fresh page id and returns it with a zeroed page buffer.
    fn alloc(&mut self) -> (PageId, BytesMut);

    /// Returns `true` if `id` names a stored page.
    fn exists(&self, id: PageId) -> bool;

    /// Reads the page stored under `id`.
    fn read(&self, id: PageId) -> Option<Bytes>;

    /// Replaces the contents of the page stored under `id`.
    fn write(&mut self, id: PageId, data: &[u8]) -> Result<(), StorageError>;

    /// Removes the page stored under `id`.
    fn delete(&mut self, id: PageId) -> Result<(), StorageError>;
}

/// Naive in-memory page store.
///
/// Page ids are drawn at random from the 32-bit space, retrying on the rare
/// collision, so ids carry no allocation order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pages: HashMap<PageId, Bytes>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageStore for MemoryStore {
    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn alloc(&mut self) -> (PageId, BytesMut) {
        let mut id: PageId = rand::random();
        while self.pages.contains_key(&id) {
            id = rand::random();
        }
        self.pages.insert(id, Bytes::from(vec![0u8; PAGE_SIZE]));
        trace!(page = id, "allocated page");
        (id, BytesMut::zeroed(PAGE_SIZE))
    }

    fn exists(&self, id: PageId) -> bool {
        self.pages.contains_key(&id)
    }

    fn read(&self, id: PageId) -> Option<Bytes> {
        self.pages.get(&id).cloned()
    }

    fn write(&mut self, id: PageId, data: &[u8]) -> Result<(), StorageError> {
        if !self.pages.contains_key(&id) {
            return Err(StorageError::UnknownPage(id));
        }
        if data.len() != PAGE_SIZE {
            return Err(StorageError::WrongLength {
                expected: PAGE_SIZE,
                got: data.len(),
            });
        }
        self.pages.insert(id, Bytes::copy_from_slice(data));
        trace!(page = id, "wrote page");
        Ok(())
    }

    fn delete(&mut self, id: PageId) -> Result<(), StorageError> {
        match self.pages.remove(&id) {
            Some(_) => {
                trace!(page = id, "deleted page");
                Ok(())
            }
            None => Err(StorageError::UnknownPage(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn alloc_hands_out_full_pages() {
        let mut store = MemoryStore::new();
        let (id, buffer) = store.alloc();
        assert_eq!(buffer.len(), store.page_size());
        assert!(store.exists(id));
        assert!(buffer.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn allocated_ids_stay_distinct() {
        let mut store = MemoryStore::new();
        let mut ids = Vec::with_capacity(10_000);
        for _ in 0..10_000 {
            let (id, _) = store.alloc();
            ids.push(id);
        }
        for id in &ids {
            assert!(store.exists(*id));
        }
        let mut deduped = ids.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut store = MemoryStore::new();
        let (id, mut buffer) = store.alloc();
        rand::thread_rng().fill_bytes(&mut buffer);

        store.write(id, &buffer).unwrap();
        let read = store.read(id).expect("page exists");
        assert_eq!(&read[..], &buffer[..]);
    }

    #[test]
    fn delete_removes_the_page() {
        let mut store = MemoryStore::new();
        let (id, _) = store.alloc();
        store.delete(id).unwrap();
        assert!(!store.exists(id));
        assert!(store.delete(id).is_err());
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut store = MemoryStore::new();
        let id: PageId = 42;

        assert!(store.read(id).is_none());
        assert!(matches!(
            store.write(id, &[1, 2, 3]),
            Err(StorageError::UnknownPage(42))
        ));
        assert!(store.delete(id).is_err());
        assert!(!store.exists(id));
    }

    #[test]
    fn short_writes_are_rejected() {
        let mut store = MemoryStore::new();
        let (id, _) = store.alloc();
        assert!(matches!(
            store.write(id, &[1, 2, 3]),
            Err(StorageError::WrongLength { got: 3, .. })
        ));
    }
}
