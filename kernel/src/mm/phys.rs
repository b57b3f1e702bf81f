use x86_64::structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB};
use x86_64::{PhysAddr, VirtAddr};

use super::{Page, PageAllocator, PAGE_SIZE};

/// Maior região gerenciada: 32768 frames (128 MiB).
pub const MAX_FRAMES: usize = 32 * 1024;

const WORDS: usize = MAX_FRAMES / 64;

/// Alocador físico: bitmap de frames 4KiB sobre uma única região contígua.
///
/// - bit=1 => usado
/// - bit=0 => livre
///
/// Frames are accessed through `phys_offset + phys`, the same linear mapping
/// the kernel sets up for all of physical memory.
pub struct BitmapPageAllocator {
    bits: [u64; WORDS],
    base: PhysAddr,
    phys_offset: VirtAddr,
    total_frames: usize,
    free_frames: usize,
    cursor_word: usize,
}

impl BitmapPageAllocator {
    /// An allocator with no memory; every allocation fails until `init`.
    pub const fn empty() -> Self {
        Self {
            bits: [u64::MAX; WORDS],
            base: PhysAddr::zero(),
            phys_offset: VirtAddr::zero(),
            total_frames: 0,
            free_frames: 0,
            cursor_word: 0,
        }
    }

    /// Hands the region `[start, start + size)` to the allocator.
    ///
    /// The region is shrunk to whole pages and capped at `MAX_FRAMES`.
    ///
    /// # Safety
    /// The region must be unused RAM, mapped writable at `phys_offset + start`,
    /// and must not be handed to any other allocator.
    pub unsafe fn init(&mut self, start: PhysAddr, size: u64, phys_offset: VirtAddr) {
        assert_eq!(self.total_frames, 0, "page allocator initialized twice");

        let base = start.align_up(PAGE_SIZE);
        let end = (start + size).align_down(PAGE_SIZE);
        let frames = if end > base {
            ((end - base) / PAGE_SIZE) as usize
        } else {
            0
        };
        let frames = frames.min(MAX_FRAMES);

        // Começa tudo como "usado"; libera só o que está dentro da região.
        self.bits = [u64::MAX; WORDS];
        for f in 0..frames {
            clear_bit(&mut self.bits, f);
        }

        self.base = base;
        self.phys_offset = phys_offset;
        self.total_frames = frames;
        self.free_frames = frames;
        self.cursor_word = 0;

        crate::kprintln!(
            "mm: page allocator base={:#x} frames={}",
            base.as_u64(),
            frames
        );
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    pub fn used_frames(&self) -> usize {
        self.total_frames - self.free_frames
    }

    fn find_free(&mut self) -> Option<usize> {
        let n = WORDS;
        for step in 0..n {
            let wi = (self.cursor_word + step) % n;
            let word = self.bits[wi];
            if word == u64::MAX {
                continue; // tudo usado
            }
            let bit = (!word).trailing_zeros() as usize;
            let idx = wi * 64 + bit;
            if idx < self.total_frames {
                self.cursor_word = wi;
                return Some(idx);
            }
        }
        None
    }

    fn frame_at(&self, idx: usize) -> PhysFrame<Size4KiB> {
        PhysFrame::containing_address(self.base + (idx as u64) * PAGE_SIZE)
    }

    fn index_of(&self, frame: PhysFrame<Size4KiB>) -> usize {
        let pa = frame.start_address();
        assert!(pa >= self.base, "frame {:#x} below managed region", pa.as_u64());
        let idx = ((pa - self.base) / PAGE_SIZE) as usize;
        assert!(idx < self.total_frames, "frame {:#x} above managed region", pa.as_u64());
        idx
    }

    pub fn allocate(&mut self) -> Option<PhysFrame<Size4KiB>> {
        let idx = self.find_free()?;
        set_bit(&mut self.bits, idx);
        self.free_frames -= 1;
        Some(self.frame_at(idx))
    }

    /// Devolve um frame. Double free is a kernel bug and panics.
    pub fn deallocate(&mut self, frame: PhysFrame<Size4KiB>) {
        let idx = self.index_of(frame);
        assert!(
            get_bit(&self.bits, idx),
            "double free of frame {:#x}",
            frame.start_address().as_u64()
        );
        clear_bit(&mut self.bits, idx);
        self.free_frames += 1;
    }
}

impl PageAllocator for BitmapPageAllocator {
    fn alloc_page(&mut self) -> Option<Page> {
        let frame = self.allocate()?;
        let vaddr = self.phys_offset + frame.start_address().as_u64();
        Some(Page { frame, vaddr })
    }

    fn free_page(&mut self, page: Page) {
        self.deallocate(page.frame);
    }
}

unsafe impl FrameAllocator<Size4KiB> for BitmapPageAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        self.allocate()
    }
}

impl FrameDeallocator<Size4KiB> for BitmapPageAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        self.deallocate(frame);
    }
}

#[inline]
fn word_bit(i: usize) -> (usize, u64) {
    let word = i / 64;
    let bit = (i % 64) as u64;
    (word, 1u64 << bit)
}

#[inline]
fn get_bit(bits: &[u64], i: usize) -> bool {
    let (w, m) = word_bit(i);
    (bits[w] & m) != 0
}

#[inline]
fn set_bit(bits: &mut [u64], i: usize) {
    let (w, m) = word_bit(i);
    bits[w] |= m;
}

#[inline]
fn clear_bit(bits: &mut [u64], i: usize) {
    let (w, m) = word_bit(i);
    bits[w] &= !m;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;

    #[repr(C, align(4096))]
    struct Region([u8; 8 * 4096]);

    fn allocator_over(region: &mut Region) -> BitmapPageAllocator {
        let mut pa = BitmapPageAllocator::empty();
        let start = region.0.as_mut_ptr() as u64;
        unsafe { pa.init(PhysAddr::new(start), region.0.len() as u64, VirtAddr::zero()) };
        pa
    }

    #[test]
    fn test_empty_allocator_has_no_pages() {
        let mut pa = BitmapPageAllocator::empty();
        assert_eq!(pa.total_frames(), 0);
        assert!(pa.alloc_page().is_none());
    }

    #[test]
    fn test_alloc_until_exhausted() {
        let mut region = Box::new(Region([0; 8 * 4096]));
        let mut pa = allocator_over(&mut region);
        assert_eq!(pa.total_frames(), 8);

        let base = region.0.as_ptr() as u64;
        let mut seen = [false; 8];
        for _ in 0..8 {
            let page = pa.alloc_page().unwrap();
            let idx = ((page.vaddr.as_u64() - base) / PAGE_SIZE) as usize;
            assert!(!seen[idx]);
            seen[idx] = true;
            assert_eq!(page.end() - page.start(), PAGE_SIZE);
        }
        assert!(pa.alloc_page().is_none());
        assert_eq!(pa.used_frames(), 8);
    }

    #[test]
    fn test_freed_page_is_reused() {
        let mut region = Box::new(Region([0; 8 * 4096]));
        let mut pa = allocator_over(&mut region);

        let a = pa.alloc_page().unwrap();
        let _b = pa.alloc_page().unwrap();
        pa.free_page(a);
        assert_eq!(pa.free_frames(), 7);

        let c = pa.alloc_page().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_unaligned_region_is_trimmed() {
        let mut region = Box::new(Region([0; 8 * 4096]));
        let start = region.0.as_mut_ptr() as u64 + 100;
        let mut pa = BitmapPageAllocator::empty();
        unsafe { pa.init(PhysAddr::new(start), 8 * 4096 - 100, VirtAddr::zero()) };
        // Perde a primeira página (desalinhada) inteira.
        assert_eq!(pa.total_frames(), 7);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let mut region = Box::new(Region([0; 8 * 4096]));
        let mut pa = allocator_over(&mut region);
        let a = pa.alloc_page().unwrap();
        pa.free_page(a);
        pa.free_page(a);
    }
}
