//! Memory collaborators of the thread core: the physical page allocator that
//! backs thread stacks and the heap pool that backs thread records.

use x86_64::structures::paging::{PageSize, PhysFrame, Size4KiB};
use x86_64::VirtAddr;

pub mod heap;
pub mod phys;

pub use heap::{AllocFlags, HeapPool};
pub use phys::BitmapPageAllocator;

/// Tamanho de página (4 KiB).
pub const PAGE_SIZE: u64 = Size4KiB::SIZE;

/// One physical page together with the kernel virtual address it is mapped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub frame: PhysFrame<Size4KiB>,
    pub vaddr: VirtAddr,
}

impl Page {
    pub fn start(&self) -> VirtAddr {
        self.vaddr
    }

    /// First address past the page; the initial stack pointer of a thread
    /// stack living in this page.
    pub fn end(&self) -> VirtAddr {
        self.vaddr + PAGE_SIZE
    }
}

/// Page allocator contract used by the thread manager.
///
/// Pages handed out must stay mapped and exclusively owned by the caller until
/// they are given back through `free_page`.
pub trait PageAllocator {
    /// Allocates one page, `None` when the allocator is exhausted.
    fn alloc_page(&mut self) -> Option<Page>;

    /// Returns a page obtained from `alloc_page`.
    fn free_page(&mut self, page: Page);
}
