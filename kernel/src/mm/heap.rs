//! Named kernel heap pools built from page-sized arenas.
//!
//! Each arena is a `linked_list_allocator::Heap` over a region the caller
//! donates (normally a page from the page allocator). Allocation tries the
//! arenas first-fit, in the order they were added.

use core::alloc::Layout;
use core::ptr::{self, NonNull};

use bitflags::bitflags;
use linked_list_allocator::Heap;
use x86_64::VirtAddr;

use crate::util::{KError, KResult};

/// Arenas por pool.
pub const MAX_ARENAS: usize = 8;

bitflags! {
    /// Flags de `HeapPool::alloc`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Zero the returned block.
        const ZERO = 1 << 0;
    }
}

pub struct HeapPool {
    name: &'static str,
    arenas: [Heap; MAX_ARENAS],
    arena_count: usize,
    allocs: usize,
    frees: usize,
}

// Single execution unit; callers serialize access to the pool.
unsafe impl Send for HeapPool {}

impl HeapPool {
    pub const fn new(name: &'static str) -> Self {
        const EMPTY: Heap = Heap::empty();
        Self {
            name,
            arenas: [EMPTY; MAX_ARENAS],
            arena_count: 0,
            allocs: 0,
            frees: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers `[base, base + size)` as a new arena.
    ///
    /// # Safety
    /// The region must be writable, unused, and stay valid for the lifetime of
    /// the pool.
    pub unsafe fn add_arena(&mut self, base: VirtAddr, size: usize) -> KResult<()> {
        if self.arena_count == MAX_ARENAS {
            return Err(KError::Busy);
        }
        self.arenas[self.arena_count].init(base.as_mut_ptr(), size);
        self.arena_count += 1;

        crate::kprintln!(
            "mm: pool '{}' arena #{} at {:#x} ({} bytes)",
            self.name,
            self.arena_count - 1,
            base.as_u64(),
            size
        );
        Ok(())
    }

    pub fn alloc(&mut self, layout: Layout, flags: AllocFlags) -> KResult<NonNull<u8>> {
        for heap in self.arenas[..self.arena_count].iter_mut() {
            if let Ok(p) = heap.allocate_first_fit(layout) {
                if flags.contains(AllocFlags::ZERO) {
                    unsafe { ptr::write_bytes(p.as_ptr(), 0, layout.size()) };
                }
                self.allocs += 1;
                return Ok(p);
            }
        }
        Err(KError::NoMemory)
    }

    /// Devolve um bloco ao arena que o contém.
    ///
    /// # Safety
    /// `ptr` must come from `alloc` on this pool with the same `layout`, and
    /// must not be used afterwards.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>, layout: Layout) -> KResult<()> {
        let addr = ptr.as_ptr();
        let heap = self.arenas[..self.arena_count]
            .iter_mut()
            .find(|h| h.bottom() <= addr && addr < h.top())
            .ok_or(KError::Invalid)?;
        heap.deallocate(ptr, layout);
        self.frees += 1;
        Ok(())
    }

    pub fn arena_count(&self) -> usize {
        self.arena_count
    }

    pub fn allocs(&self) -> usize {
        self.allocs
    }

    pub fn frees(&self) -> usize {
        self.frees
    }

    /// Bytes currently handed out across all arenas.
    pub fn used(&self) -> usize {
        self.arenas[..self.arena_count].iter().map(|h| h.used()).sum()
    }
}
