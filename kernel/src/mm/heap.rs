//! Kernel heap: a free-list allocator with an in-band header per block,
//! serving as the `#[global_allocator]` for `alloc::boxed::Box` / `Vec` /
//! `String` used by task names, the ready-queue arena, and the multiboot
//! tag parser.
//!
//! Bootstraps from a static page-aligned region so allocations work before
//! the VMM is ready; once the tail block can't satisfy a request, the heap
//! grows by appending a freshly VMM-allocated run of pages.

#![allow(dead_code)]

use core::{
    alloc::{GlobalAlloc, Layout},
    ptr::NonNull,
};

use spin::Mutex;

use crate::mm::{vmm::VMM, PageFlags, VirtualAddress};

/// Marks a live header; any other value means corruption or a double free.
const HEADER_MAGIC: u32 = 0x4845_4150; // "HEAP"

const MIN_SPLIT_PAYLOAD: usize = 32;

/// Initial bootstrap region, used before the VMM can service growth
/// requests.
const BOOTSTRAP_SIZE: usize = 4096;

#[repr(C, align(16))]
struct Bootstrap([u8; BOOTSTRAP_SIZE]);

static mut BOOTSTRAP_REGION: Bootstrap = Bootstrap([0; BOOTSTRAP_SIZE]);

#[repr(C)]
struct Header {
    magic: u32,
    free: bool,
    size: usize,
    next: Option<NonNull<Header>>,
}

impl Header {
    unsafe fn payload(this: *mut Header) -> *mut u8 {
        // SAFETY: caller guarantees `this` points at a valid header followed
        // by `size` bytes of payload.
        unsafe { (this as *mut u8).add(core::mem::size_of::<Header>()) }
    }

    unsafe fn from_payload(ptr: *mut u8) -> *mut Header {
        // SAFETY: caller guarantees `ptr` was returned by `Header::payload`.
        unsafe { ptr.sub(core::mem::size_of::<Header>()) as *mut Header }
    }
}

struct Inner {
    head: Option<NonNull<Header>>,
}

// SAFETY: all access to header pointers goes through `KernelHeap`'s mutex.
unsafe impl Send for Inner {}

impl Inner {
    const fn new() -> Self {
        Self { head: None }
    }

    /// Appends a new free block covering `[start, start+size)` to the tail
    /// of the list (or becomes the head if the list is empty).
    unsafe fn push_region(&mut self, start: *mut u8, size: usize) {
        if size <= core::mem::size_of::<Header>() {
            return;
        }
        let payload_size = size - core::mem::size_of::<Header>();
        let header = start as *mut Header;
        // SAFETY: `start` is a fresh, owned, sufficiently aligned region of
        // at least `size` bytes per the caller's contract.
        unsafe {
            header.write(Header {
                magic: HEADER_MAGIC,
                free: true,
                size: payload_size,
                next: None,
            });
        }

        match self.head {
            None => self.head = NonNull::new(header),
            Some(head) => {
                let mut cursor = head;
                loop {
                    // SAFETY: every node in the list is a live header owned
                    // by this allocator.
                    let next = unsafe { cursor.as_ref().next };
                    match next {
                        Some(n) => cursor = n,
                        None => break,
                    }
                }
                // SAFETY: `cursor` is the tail node of the list.
                unsafe {
                    cursor.as_mut().next = NonNull::new(header);
                }
            }
        }
    }

    /// First-fit search; splits the chosen block when the remainder can
    /// hold a header plus at least [`MIN_SPLIT_PAYLOAD`] bytes of payload.
    unsafe fn alloc(&mut self, payload_size: usize) -> Option<*mut u8> {
        let mut cursor = self.head;
        while let Some(mut node) = cursor {
            // SAFETY: `node` is a live header owned by this allocator.
            let (is_free, size, next) = unsafe {
                let n = node.as_ref();
                (n.free, n.size, n.next)
            };
            if is_free && size >= payload_size {
                let remainder = size - payload_size;
                if remainder > core::mem::size_of::<Header>() + MIN_SPLIT_PAYLOAD {
                    // SAFETY: `node` owns `size` bytes of payload; carving
                    // `payload_size` off the front leaves a valid region for
                    // a new header at that offset.
                    unsafe {
                        let payload = Header::payload(node.as_ptr());
                        let split_at = payload.add(payload_size);
                        let split_header = split_at as *mut Header;
                        split_header.write(Header {
                            magic: HEADER_MAGIC,
                            free: true,
                            size: remainder - core::mem::size_of::<Header>(),
                            next,
                        });
                        node.as_mut().size = payload_size;
                        node.as_mut().next = NonNull::new(split_header);
                    }
                }
                // SAFETY: `node` is a live header; marking it used is valid.
                unsafe {
                    node.as_mut().free = false;
                    return Some(Header::payload(node.as_ptr()));
                }
            }
            cursor = next;
        }
        None
    }

    /// Marks a block free after validating its header, then runs a single
    /// coalescing pass merging any free node with a free successor. A
    /// pointer that was never returned by `alloc` -- or whose header has
    /// been corrupted -- is silently ignored rather than freed: this must
    /// hold in release builds too, not just as a debug check.
    unsafe fn free(&mut self, ptr: *mut u8) {
        let header = Header::from_payload(ptr);
        // SAFETY: reading `magic` to validate the header before trusting
        // anything else about it; if `ptr` wasn't really returned by
        // `alloc` this read is already into unknown memory, same as any
        // free() implementation that has to take the pointer on faith.
        if unsafe { (*header).magic } != HEADER_MAGIC {
            return;
        }
        // SAFETY: magic matched, so `header` points at a live header this
        // allocator wrote.
        unsafe {
            (*header).free = true;
        }

        let mut cursor = self.head;
        while let Some(mut node) = cursor {
            // SAFETY: `node` is a live header owned by this allocator.
            let next = unsafe { node.as_ref().next };
            if let Some(next_node) = next {
                // SAFETY: both `node` and `next_node` are live headers.
                let (node_free, next_free) =
                    unsafe { (node.as_ref().free, next_node.as_ref().free) };
                if node_free && next_free {
                    // SAFETY: `next_node` immediately follows `node`'s
                    // payload in memory, established when it was created by
                    // either `push_region` or a prior split.
                    unsafe {
                        let merged_size = node.as_ref().size
                            + core::mem::size_of::<Header>()
                            + next_node.as_ref().size;
                        node.as_mut().size = merged_size;
                        node.as_mut().next = next_node.as_ref().next;
                    }
                    continue;
                }
            }
            cursor = next;
        }
    }
}

/// Free-list kernel heap. All operations serialize under one mutex; callers
/// must never hold it across a context switch.
pub struct KernelHeap {
    inner: Mutex<Inner>,
}

impl KernelHeap {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Seeds the free list with the static bootstrap region. Must run
    /// before any allocation.
    pub fn init(&self) {
        let mut inner = self.inner.lock();
        // SAFETY: `BOOTSTRAP_REGION` is a unique static owned solely by the
        // heap, written exactly once here.
        #[allow(static_mut_refs)]
        unsafe {
            inner.push_region(BOOTSTRAP_REGION.0.as_mut_ptr(), BOOTSTRAP_SIZE);
        }
    }

    /// Grows the heap by mapping `pages` fresh pages through the VMM and
    /// appending them as one free block. Returns `false` if the VMM
    /// couldn't satisfy the request.
    fn grow(&self, pages: usize) -> bool {
        let Some(virt) = VMM.alloc(pages, PageFlags::PRESENT | PageFlags::WRITABLE) else {
            return false;
        };
        let mut inner = self.inner.lock();
        // SAFETY: `virt` is a fresh mapping exclusively owned by the heap
        // from this point on.
        unsafe {
            inner.push_region(virt.as_mut_ptr::<u8>(), pages * crate::mm::FRAME_SIZE);
        }
        true
    }

    fn alloc_payload(&self, payload_size: usize) -> Option<*mut u8> {
        {
            // SAFETY: list invariants are maintained by `Inner` under the
            // mutex for the duration of this call.
            if let Some(ptr) = unsafe { self.inner.lock().alloc(payload_size) } {
                return Some(ptr);
            }
        }
        let grow_pages = payload_size.div_ceil(crate::mm::FRAME_SIZE).max(1);
        if !self.grow(grow_pages) {
            return None;
        }
        // SAFETY: same as above.
        unsafe { self.inner.lock().alloc(payload_size) }
    }
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

/// Global kernel heap. Bare const static: its bootstrap region is fixed
/// kernel BSS, identical at every boot, so it needs no deferred-init
/// wrapper.
pub static HEAP: KernelHeap = KernelHeap::new();

/// Thin `GlobalAlloc` adapter over [`HEAP`], registered as the
/// `#[global_allocator]`.
struct GlobalAllocAdapter;

#[cfg(target_os = "none")]
unsafe impl GlobalAlloc for GlobalAllocAdapter {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let payload_size = layout.size().next_multiple_of(8).max(8);
        match HEAP.alloc_payload(payload_size) {
            Some(ptr) => ptr,
            None => core::ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: `ptr` was returned by this adapter's `alloc`.
        unsafe {
            HEAP.inner.lock().free(ptr);
        }
    }
}

/// Only the bare-metal target actually routes `alloc`/`Box`/`Vec` through
/// this heap; the host test target uses the system allocator instead so
/// unit tests don't need a live VMM behind them.
#[cfg(target_os = "none")]
#[global_allocator]
static GLOBAL_ALLOC: GlobalAllocAdapter = GlobalAllocAdapter;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_heap_allocates_from_bootstrap() {
        let heap = KernelHeap::new();
        heap.init();
        let a = heap.alloc_payload(64).expect("allocation should succeed");
        assert!(!a.is_null());
        unsafe {
            heap.inner.lock().free(a);
        }
    }

    #[test]
    fn free_then_alloc_reuses_block() {
        let heap = KernelHeap::new();
        heap.init();
        let a = heap.alloc_payload(128).unwrap();
        unsafe {
            heap.inner.lock().free(a);
        }
        let b = heap.alloc_payload(128).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn coalesces_adjacent_free_blocks() {
        let heap = KernelHeap::new();
        heap.init();
        let a = heap.alloc_payload(64).unwrap();
        let b = heap.alloc_payload(64).unwrap();
        unsafe {
            heap.inner.lock().free(a);
            heap.inner.lock().free(b);
        }
        let c = heap.alloc_payload(64 + 64 + core::mem::size_of::<Header>());
        assert!(c.is_some());
    }

    #[test]
    fn free_ignores_pointer_with_bad_magic() {
        let heap = KernelHeap::new();
        heap.init();
        let a = heap.alloc_payload(64).unwrap();

        // Simulate a corrupted header (e.g. a stray write or a double
        // free after reuse) -- `free` must not trust it.
        unsafe {
            let header = Header::from_payload(a);
            (*header).magic = 0xDEAD_BEEF;
        }
        unsafe {
            heap.inner.lock().free(a);
        }

        // The corrupted block was never marked free, so a fresh
        // allocation of the same size must come from a different block.
        let b = heap.alloc_payload(64).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn free_ignores_pointer_never_returned_by_alloc() {
        let heap = KernelHeap::new();
        heap.init();

        // A buffer the allocator never touched; its "header" bytes are
        // zeroed, so the magic check must fail and `free` must do nothing.
        let mut foreign = [0u8; 64];
        let foreign_payload =
            unsafe { foreign.as_mut_ptr().add(core::mem::size_of::<Header>()) };
        unsafe {
            heap.inner.lock().free(foreign_payload);
        }

        // Heap state is untouched: a normal allocation still succeeds.
        assert!(heap.alloc_payload(32).is_some());
    }
}
