//! 4-level page table walking and mapping (PML4 -> PDPT -> PD -> PT).
//!
//! Every physical frame the walker touches -- including intermediate
//! tables it allocates on demand -- is reached through the higher-half
//! identity map. Concurrent `map` calls serialize on one [`spin::Mutex`];
//! intermediate levels are allocated zeroed via the
//! [`PMM`] and are never freed (page-table deallocation is an explicit
//! non-goal).

use bitflags::bitflags;
use spin::Mutex;
use x86_64::{instructions::tlb, registers::control::Cr3, VirtAddr};

use crate::{
    mm::{frame_allocator::PMM, PhysicalAddress, VirtualAddress},
    println,
};

bitflags! {
    /// Low-12-bit page table entry flags. Upper bits of the entry carry the
    /// next-level physical frame address masked with `~0xFFF`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE      = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        const HUGE          = 1 << 7;
        const GLOBAL        = 1 << 8;
    }
}

const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

#[derive(Debug, Clone, Copy)]
#[repr(transparent)]
struct Entry(u64);

impl Entry {
    const fn empty() -> Self {
        Self(0)
    }

    fn is_present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    fn is_huge(self) -> bool {
        self.0 & PageFlags::HUGE.bits() != 0
    }

    fn addr(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 & ADDR_MASK)
    }

    fn flags(self) -> PageFlags {
        PageFlags::from_bits_truncate(self.0 & 0xFFF)
    }

    fn set(&mut self, addr: PhysicalAddress, flags: PageFlags) {
        self.0 = (addr.as_u64() & ADDR_MASK) | flags.bits();
    }
}

#[repr(C, align(4096))]
struct Table {
    entries: [Entry; 512],
}

impl Table {
    fn as_mut_from_phys(phys: PhysicalAddress) -> &'static mut Table {
        let virt = phys.identity_virt();
        // SAFETY: every non-leaf entry whose present bit is set points to a
        // zero-initialized table owned by the kernel, reached through the
        // identity window; callers hold `PAGING_LOCK` for the duration.
        unsafe { &mut *virt.as_mut_ptr::<Table>() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    NotPresent,
    OutOfMemory,
}

/// Errors on any missing intermediate level by allocating and zeroing a
/// fresh PMM frame, linking it with present+write+user bits (the union of
/// permissions needed along the walk).
fn ensure_next_level(table: &mut Table, index: usize) -> Result<&'static mut Table, PagingError> {
    let entry = table.entries[index];
    if entry.is_present() {
        return Ok(Table::as_mut_from_phys(entry.addr()));
    }

    let frame_virt = PMM.alloc_page().ok_or(PagingError::OutOfMemory)?;
    let frame_phys = frame_virt.identity_phys();
    let next = Table::as_mut_from_phys(frame_phys);
    for e in next.entries.iter_mut() {
        *e = Entry::empty();
    }

    table.entries[index].set(
        frame_phys,
        PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
    );
    Ok(next)
}

/// Walks PML4/PDPT/PD without modification, returning the table and index
/// at each missing or non-present step.
fn walk_readonly(root: &Table, indices: [usize; 4]) -> Result<(&Entry, PageFlags), PagingError> {
    let mut table = root;
    for (level, &index) in indices.iter().take(3).enumerate() {
        let entry = table.entries[index];
        if !entry.is_present() {
            return Err(PagingError::NotPresent);
        }
        // PDPT huge (1 GiB) at level 1, PD huge (2 MiB) at level 2.
        if entry.is_huge() && (level == 1 || level == 2) {
            return Ok((&table.entries[index], entry.flags()));
        }
        table = Table::as_mut_from_phys(entry.addr());
    }
    let leaf = &table.entries[indices[3]];
    Ok((leaf, leaf.flags()))
}

static PAGING_LOCK: Mutex<()> = Mutex::new(());

fn root_table() -> &'static mut Table {
    let (frame, _) = Cr3::read();
    let phys = PhysicalAddress::new(frame.start_address().as_u64());
    Table::as_mut_from_phys(phys)
}

/// Loads the current PML4 (already installed by the boot trampoline) into
/// the page-base register and confirms it's present; halts otherwise.
pub fn init() {
    let (frame, _) = Cr3::read();
    if frame.start_address().as_u64() == 0 {
        println!("[PAGING] fatal: no PML4 loaded");
        crate::arch::halt_loop();
    }
    println!("[PAGING] root table at {:#x}", frame.start_address());
}

/// Maps a single 4 KiB page, allocating intermediate tables as needed and
/// invalidating the TLB entry for `virt` once the leaf is written.
pub fn map(virt: VirtualAddress, phys: PhysicalAddress, flags: PageFlags) -> Result<(), PagingError> {
    let _guard = PAGING_LOCK.lock();
    let indices = virt.page_table_indices();

    let root = root_table();
    let pdpt = ensure_next_level(root, indices[0])?;
    let pd = ensure_next_level(pdpt, indices[1])?;
    let pt = ensure_next_level(pd, indices[2])?;

    pt.entries[indices[3]].set(phys, flags | PageFlags::PRESENT);
    tlb::flush(VirtAddr::new(virt.as_u64()));
    Ok(())
}

/// Maps `size` bytes starting at `virt`/`phys`, one 4 KiB page at a time.
pub fn map_range(
    virt: VirtualAddress,
    phys: PhysicalAddress,
    size: usize,
    flags: PageFlags,
) -> Result<(), PagingError> {
    let pages = size.div_ceil(crate::mm::FRAME_SIZE);
    for i in 0..pages {
        let off = (i * crate::mm::FRAME_SIZE) as u64;
        map(
            VirtualAddress::new(virt.as_u64() + off),
            PhysicalAddress::new(phys.as_u64() + off),
            flags,
        )?;
    }
    Ok(())
}

/// Walks without modification; stops at the first non-present entry.
/// Honors the huge bit at the PDPT (1 GiB) and PD (2 MiB) levels.
pub fn translate(virt: VirtualAddress) -> Option<PhysicalAddress> {
    let _guard = PAGING_LOCK.lock();
    let indices = virt.page_table_indices();
    let root = root_table();

    let (entry, flags) = walk_readonly(root, indices).ok()?;
    if !entry.is_present() {
        return None;
    }

    if flags.contains(PageFlags::HUGE) {
        // Huge-page base plus the offset below that level, preserved as-is
        // since the caller only asked to resolve the address, not the page
        // size it came from.
        let base = entry.addr().as_u64();
        let mask = if indices_is_pdpt_huge(indices, root) {
            0x3FFF_FFFF
        } else {
            0x1F_FFFF
        };
        return Some(PhysicalAddress::new(base | (virt.as_u64() & mask)));
    }

    Some(PhysicalAddress::new(
        entry.addr().as_u64() | virt.page_offset() as u64,
    ))
}

fn indices_is_pdpt_huge(indices: [usize; 4], root: &Table) -> bool {
    let pdpt_entry = root.entries[indices[0]];
    if !pdpt_entry.is_present() {
        return false;
    }
    let pdpt = Table::as_mut_from_phys(pdpt_entry.addr());
    pdpt.entries[indices[1]].is_huge()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_flags_roundtrip() {
        let flags = PageFlags::PRESENT | PageFlags::WRITABLE;
        let mut e = Entry::empty();
        e.set(PhysicalAddress::new(0x1000), flags);
        assert_eq!(e.addr().as_u64(), 0x1000);
        assert!(e.is_present());
        assert!(e.flags().contains(PageFlags::WRITABLE));
    }
}
