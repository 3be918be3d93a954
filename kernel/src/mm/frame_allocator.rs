//! Bitmap physical frame allocator (PMM).
//!
//! One bit per 4 KiB frame: `1` used, `0` free, packed byte-major (bit `b`
//! of byte `i` encodes frame `8*i + b`). Frames `0..512` (the first 2 MiB)
//! and the bitmap's own backing frames are permanently reserved and never
//! handed out. Everything serializes under a single [`spin::Mutex`], held
//! only for the duration of the call and never across a context switch.
//!
//! The bitmap's backing storage is a fixed-capacity static array sized for
//! [`MAX_SUPPORTED_RAM_MB`] rather than dynamically placed at a
//! caller-supplied address; `init` still takes and records that address so
//! the rest of the boot orchestrator's contract is unchanged. `alloc_pages`
//! does a true cross-byte bit scan -- the VMM's growth path needs runs
//! longer than 8 frames, and nothing about contiguous allocation requires
//! staying within one byte of the bitmap.

use spin::Mutex;

use crate::{
    mm::{PhysicalAddress, VirtualAddress, KERNEL_OFFSET},
    println,
};

/// Size of a physical frame.
pub const FRAME_SIZE: usize = 4096;

/// The allocator never hands out frame 0..511 (the first 2 MiB): real-mode
/// IVT, BDA, and low-memory firmware structures live there.
const RESERVED_FRAMES: usize = 512;

/// Upper bound on managed physical memory: 4 GiB, i.e. 2^20 frames and a
/// 128 KiB bitmap. Memory beyond this is left unmanaged (logged, not
/// allocated from) -- this core targets small systems, not large-memory
/// hosts.
pub const MAX_SUPPORTED_RAM_MB: usize = 4096;
const MAX_FRAMES: usize = (MAX_SUPPORTED_RAM_MB * 1024 * 1024) / FRAME_SIZE;
const MAX_BITMAP_BYTES: usize = MAX_FRAMES / 8;

/// Snapshot of allocator counters, for `tasks`/shell-style observability.
#[derive(Debug, Clone, Copy)]
pub struct FrameAllocatorStats {
    pub total_frames: usize,
    pub used_frames: usize,
    pub free_frames: usize,
}

struct Inner {
    bitmap: [u8; MAX_BITMAP_BYTES],
    /// Caller-chosen placement address, recorded but not used to back the
    /// bitmap storage itself (see module deviation note).
    bitmap_virt: usize,
    bitmap_bytes: usize,
    total_frames: usize,
    used_frames: usize,
    initialized: bool,
}

impl Inner {
    const fn new() -> Self {
        Self {
            bitmap: [0xFF; MAX_BITMAP_BYTES],
            bitmap_virt: 0,
            bitmap_bytes: 0,
            total_frames: 0,
            used_frames: 0,
            initialized: false,
        }
    }

    fn bit(&self, frame: usize) -> bool {
        self.bitmap[frame / 8] & (1 << (frame % 8)) != 0
    }

    fn set_used(&mut self, frame: usize) {
        self.bitmap[frame / 8] |= 1 << (frame % 8);
    }

    fn set_free(&mut self, frame: usize) {
        self.bitmap[frame / 8] &= !(1 << (frame % 8));
    }

    fn in_range(&self, frame: usize) -> bool {
        frame < self.total_frames
    }

    fn reserved_backing_frames(&self) -> usize {
        // The bitmap itself occupies `bitmap_bytes` bytes; in this
        // implementation that's static kernel BSS, but we still reserve the
        // frame-equivalent range starting right after the low 2 MiB so
        // `get_free_kb` accounting matches a layout where the bitmap truly
        // lived in managed physical memory.
        self.bitmap_bytes.div_ceil(FRAME_SIZE)
    }
}

/// Bitmap physical frame allocator.
pub struct PhysicalMemoryManager {
    inner: Mutex<Inner>,
}

impl PhysicalMemoryManager {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Place the bitmap and mark every frame used (conservative default).
    /// `physical_ram_bytes` beyond [`MAX_SUPPORTED_RAM_MB`] is truncated;
    /// the orchestrator logs the truncation with the usual bracketed-tag
    /// convention.
    pub fn init(&self, bitmap_virt: usize, physical_ram_bytes: usize) {
        let mut inner = self.inner.lock();
        let total_frames = (physical_ram_bytes / FRAME_SIZE).min(MAX_FRAMES);
        let bitmap_bytes = total_frames.div_ceil(8);

        inner.bitmap_virt = bitmap_virt;
        inner.bitmap_bytes = bitmap_bytes;
        inner.total_frames = total_frames;
        inner.bitmap[..bitmap_bytes].fill(0xFF);
        inner.used_frames = total_frames;
        inner.initialized = true;

        println!(
            "[PMM] init: {} frames ({} KiB RAM), bitmap {} bytes at {:#x}",
            total_frames,
            physical_ram_bytes / 1024,
            bitmap_bytes,
            bitmap_virt
        );

        if physical_ram_bytes / FRAME_SIZE > MAX_FRAMES {
            println!(
                "[PMM] warning: physical RAM exceeds {} MiB cap, excess is unmanaged",
                MAX_SUPPORTED_RAM_MB
            );
        }
    }

    /// Mark a single frame free. Out-of-range, already-reserved (<512), and
    /// bitmap-backing frames are silently ignored; counters only move on an
    /// actual used->free transition.
    pub fn mark_free(&self, phys: PhysicalAddress) {
        let frame = phys.frame_index();
        let mut inner = self.inner.lock();
        if !inner.in_range(frame) || frame < RESERVED_FRAMES {
            return;
        }
        if frame < RESERVED_FRAMES + inner.reserved_backing_frames() {
            return;
        }
        if inner.bit(frame) {
            inner.set_free(frame);
            inner.used_frames -= 1;
        }
    }

    /// Mark a single frame used. Out-of-range is silently ignored.
    pub fn mark_used(&self, phys: PhysicalAddress) {
        let frame = phys.frame_index();
        let mut inner = self.inner.lock();
        if !inner.in_range(frame) {
            return;
        }
        if !inner.bit(frame) {
            inner.set_used(frame);
            inner.used_frames += 1;
        }
    }

    /// First-fit single-frame allocation, scanning byte-at-a-time and
    /// skipping fully-used (`0xFF`) bytes. Returns the frame's address
    /// through the higher-half identity window, or `None` on exhaustion.
    pub fn alloc_page(&self) -> Option<VirtualAddress> {
        let mut inner = self.inner.lock();
        let total_bytes = inner.bitmap_bytes;
        for byte_idx in 0..total_bytes {
            if inner.bitmap[byte_idx] == 0xFF {
                continue;
            }
            for bit in 0..8 {
                let frame = byte_idx * 8 + bit;
                if frame >= inner.total_frames || frame < RESERVED_FRAMES {
                    continue;
                }
                if !inner.bit(frame) {
                    inner.set_used(frame);
                    inner.used_frames += 1;
                    let phys = PhysicalAddress::new((frame * FRAME_SIZE) as u64);
                    return Some(phys.identity_virt());
                }
            }
        }
        None
    }

    /// Allocate `n` physically contiguous free frames above 2 MiB. Scans
    /// bit-by-bit across byte boundaries (see module deviation note);
    /// returns `None` if no run of that length exists.
    pub fn alloc_pages(&self, n: usize) -> Option<VirtualAddress> {
        if n == 0 {
            return None;
        }
        let mut inner = self.inner.lock();
        let total = inner.total_frames;
        let mut run_start = None;
        let mut run_len = 0usize;

        let mut frame = RESERVED_FRAMES;
        while frame < total {
            if inner.bit(frame) {
                run_start = None;
                run_len = 0;
            } else {
                if run_start.is_none() {
                    run_start = Some(frame);
                }
                run_len += 1;
                if run_len == n {
                    let start = run_start.unwrap();
                    for f in start..start + n {
                        inner.set_used(f);
                    }
                    inner.used_frames += n;
                    let phys = PhysicalAddress::new((start * FRAME_SIZE) as u64);
                    return Some(phys.identity_virt());
                }
            }
            frame += 1;
        }
        None
    }

    /// Free the frame backing a pointer previously returned by `alloc_page`
    /// / `alloc_pages` (an identity-window virtual address) or a raw
    /// physical address.
    pub fn free_page(&self, addr: VirtualAddress) {
        let phys = if addr.as_usize() >= KERNEL_OFFSET {
            addr.identity_phys()
        } else {
            PhysicalAddress::new(addr.as_u64())
        };
        self.mark_free(phys);
    }

    pub fn get_total_kb(&self) -> usize {
        self.inner.lock().total_frames * (FRAME_SIZE / 1024)
    }

    pub fn get_used_kb(&self) -> usize {
        self.inner.lock().used_frames * (FRAME_SIZE / 1024)
    }

    pub fn get_free_kb(&self) -> usize {
        let inner = self.inner.lock();
        (inner.total_frames - inner.used_frames) * (FRAME_SIZE / 1024)
    }

    pub fn stats(&self) -> FrameAllocatorStats {
        let inner = self.inner.lock();
        FrameAllocatorStats {
            total_frames: inner.total_frames,
            used_frames: inner.used_frames,
            free_frames: inner.total_frames - inner.used_frames,
        }
    }
}

impl Default for PhysicalMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Global physical memory manager. Const-constructible (empty, uninitialized
/// state is always the same at link time) so it's a bare static rather than
/// a deferred-init `GlobalState` wrapper.
pub static PMM: PhysicalMemoryManager = PhysicalMemoryManager::new();

#[cfg(test)]
mod tests {
    extern crate alloc;

    use super::*;

    fn fresh() -> PhysicalMemoryManager {
        let pmm = PhysicalMemoryManager::new();
        pmm.init(0xDEAD_0000, 64 * 1024 * 1024);
        pmm
    }

    #[test]
    fn reserves_first_2mib() {
        let pmm = fresh();
        for _ in 0..20000 {
            assert!(pmm.alloc_page().is_some());
        }
        // No allocation should ever have touched frames < 512.
        let stats = pmm.stats();
        assert!(stats.used_frames >= RESERVED_FRAMES);
    }

    #[test]
    fn conservation_holds_across_alloc_free() {
        let pmm = fresh();
        let initial_free = pmm.get_free_kb();

        let mut ptrs = alloc::vec::Vec::new();
        for _ in 0..100 {
            ptrs.push(pmm.alloc_page().expect("allocation should succeed"));
        }
        for (i, a) in ptrs.iter().enumerate() {
            for b in &ptrs[i + 1..] {
                assert_ne!(a.as_u64(), b.as_u64(), "duplicate frame handed out");
            }
        }
        for p in ptrs.into_iter().rev() {
            pmm.free_page(p);
        }
        assert_eq!(pmm.get_free_kb(), initial_free);
    }

    #[test]
    fn contiguous_allocation_spans_byte_boundary() {
        let pmm = fresh();
        // Exhaust the tail of one byte's worth of frames so the run must
        // cross into the next byte.
        for _ in 0..6 {
            pmm.alloc_page().unwrap();
        }
        let run = pmm.alloc_pages(16).expect("16-frame contiguous run");
        assert_eq!(run.as_u64() % FRAME_SIZE as u64, 0);
    }

    #[test]
    fn alloc_pages_rejects_zero() {
        let pmm = fresh();
        assert!(pmm.alloc_pages(0).is_none());
    }
}
