//! In-memory page store.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{PageId, PageStore};
use crate::errors::{Error, Result};

/// A page store backed by a slot vector.
///
/// Deleted slots are recycled through a free list, so page ids stay dense
/// under churn. Useful for ephemeral indexes and as the test double for
/// [`super::DiskPageStore`].
pub struct MemoryPageStore {
    slots: RwLock<Slots>,
    io: AtomicU64,
}

struct Slots {
    pages: Vec<Option<Vec<u8>>>,
    free: Vec<PageId>,
}

impl MemoryPageStore {
    pub fn new() -> MemoryPageStore {
        MemoryPageStore {
            slots: RwLock::new(Slots {
                pages: Vec::new(),
                free: Vec::new(),
            }),
            io: AtomicU64::new(0),
        }
    }

    /// Number of live pages.
    pub fn len(&self) -> usize {
        let slots = self.slots.read();
        slots.pages.iter().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemoryPageStore {
    fn store_page(&self, page: Option<PageId>, data: &[u8]) -> Result<PageId> {
        let mut slots = self.slots.write();
        let id = match page {
            Some(id) => {
                let slot = slots
                    .pages
                    .get_mut(id as usize)
                    .ok_or(Error::InvalidPage(id))?;
                if slot.is_none() {
                    return Err(Error::InvalidPage(id));
                }
                *slot = Some(data.to_vec());
                id
            }
            None => match slots.free.pop() {
                Some(id) => {
                    slots.pages[id as usize] = Some(data.to_vec());
                    id
                }
                None => {
                    slots.pages.push(Some(data.to_vec()));
                    (slots.pages.len() - 1) as PageId
                }
            },
        };
        self.io.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    fn load_page(&self, page: PageId) -> Result<Vec<u8>> {
        let slots = self.slots.read();
        let data = slots
            .pages
            .get(page as usize)
            .and_then(|slot| slot.as_ref())
            .cloned()
            .ok_or(Error::InvalidPage(page))?;
        self.io.fetch_add(1, Ordering::Relaxed);
        Ok(data)
    }

    fn delete_page(&self, page: PageId) -> Result<()> {
        let mut slots = self.slots.write();
        let slot = slots
            .pages
            .get_mut(page as usize)
            .ok_or(Error::InvalidPage(page))?;
        if slot.take().is_none() {
            return Err(Error::InvalidPage(page));
        }
        slots.free.push(page);
        Ok(())
    }

    fn io_count(&self) -> u64 {
        self.io.load(Ordering::Relaxed)
    }
}
