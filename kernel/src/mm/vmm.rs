//! Virtual memory manager: a bump allocator for kernel virtual ranges,
//! backed by contiguous physical frames from the PMM and mapped through
//! [`page_table`].
//!
//! The cursor only advances; nothing is ever unmapped or returned to it
//! (demand paging and virtual reclamation are non-goals). `alloc` composes
//! the PMM's contiguous-run search with `page_table::map_range` under its
//! own lock, so the two subsystems' locks are always taken
//! PMM-then-paging.

use spin::Mutex;

use crate::mm::{
    frame_allocator::PMM,
    page_table::{self, PageFlags, PagingError},
    PhysicalAddress, VirtualAddress, FRAME_SIZE,
};

/// Base of the kernel virtual window the VMM bumps through.
pub const VMM_BASE: u64 = 0xFFFF_FFFF_C000_0000;

struct Cursor {
    next: u64,
}

static CURSOR: Mutex<Cursor> = Mutex::new(Cursor { next: VMM_BASE });

/// Bump-allocating virtual range manager.
pub struct VirtualMemoryManager;

impl VirtualMemoryManager {
    pub const fn new() -> Self {
        Self
    }

    pub fn map(
        &self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<(), PagingError> {
        page_table::map(virt, phys, flags)
    }

    pub fn map_range(
        &self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        size: usize,
        flags: PageFlags,
    ) -> Result<(), PagingError> {
        page_table::map_range(virt, phys, size, flags)
    }

    /// Obtains `n_pages` contiguous physical frames from the PMM, reserves
    /// `n_pages * 4096` bytes from the bump cursor, maps each page, and
    /// returns the start of the mapped range. `None` on PMM exhaustion or a
    /// mapping failure (e.g. the paging layer running out of frames for
    /// intermediate tables).
    pub fn alloc(&self, n_pages: usize, flags: PageFlags) -> Option<VirtualAddress> {
        if n_pages == 0 {
            return None;
        }
        let frame_virt = PMM.alloc_pages(n_pages)?;
        let phys = frame_virt.identity_phys();

        let virt = {
            let mut cursor = CURSOR.lock();
            let virt = VirtualAddress::new(cursor.next);
            cursor.next += (n_pages * FRAME_SIZE) as u64;
            virt
        };

        if page_table::map_range(virt, phys, n_pages * FRAME_SIZE, flags).is_err() {
            for i in 0..n_pages {
                let frame = VirtualAddress::new(frame_virt.as_u64() + (i * FRAME_SIZE) as u64);
                PMM.free_page(frame);
            }
            return None;
        }
        Some(virt)
    }

    pub fn translate(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        page_table::translate(virt)
    }
}

impl Default for VirtualMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Global virtual memory manager. Bare const static: its empty state (an
/// unpositioned bump cursor) is identical at every boot, so it doesn't need
/// a deferred-init `GlobalState` wrapper.
pub static VMM: VirtualMemoryManager = VirtualMemoryManager::new();
