use alloc::{vec, vec::Vec};

use crate::err::Error;

use super::mmu::{PhysAddr, PhysPageNum, PAGE_SIZE};

type PhysFrameLink = Option<PhysPageNum>;

/// bookkeeping for one physical page.
#[derive(Clone, Copy, Default)]
pub struct PhysFrame {
    pf_link: PhysFrameLink,
    pf_ref: u16,
}

pub struct PhysFrameList {
    head: PhysFrameLink,
}

/// Physical memory: the RAM bytes plus one `PhysFrame` per page.
///
/// Frames are handed out from a LIFO free list and come back to it when
/// their reference count drops to zero.
pub struct FrameAllocator {
    ram: Vec<u8>,
    frames: Vec<PhysFrame>,
    nframes: usize,
    nfree: usize,
    frames_free_list: PhysFrameList,
}

impl FrameAllocator {
    /// `memsize` bytes of RAM, the first `reserved` of which hold the kernel.
    pub fn new(memsize: usize, reserved: usize) -> Self {
        let nframes = memsize / PAGE_SIZE;
        let mut fa = Self {
            ram: vec![0u8; nframes * PAGE_SIZE],
            frames: vec![PhysFrame::default(); nframes],
            nframes,
            nfree: 0,
            frames_free_list: PhysFrameList { head: None },
        };
        let used = reserved.div_ceil(PAGE_SIZE).min(nframes);
        for i in 0..used {
            fa.frames[i].pf_ref = 1;
        }
        for i in used..nframes {
            fa.push(PhysPageNum::new(i));
        }
        log::info!(
            "Memory size: {} KiB, number of pages: {}, free: {}",
            memsize / 1024,
            nframes,
            fa.nfree
        );
        fa
    }

    #[inline]
    fn get_frame_mut_by_ppn(&mut self, ppn: PhysPageNum) -> &mut PhysFrame {
        &mut self.frames[ppn.as_usize()]
    }

    #[inline]
    fn get_frame_by_ppn(&self, ppn: PhysPageNum) -> &PhysFrame {
        &self.frames[ppn.as_usize()]
    }

    /// take a zero-filled frame off the free list. Its reference count stays 0.
    #[inline]
    pub fn alloc(&mut self) -> Result<PhysPageNum, Error> {
        match self.pop() {
            Some(ppn) => {
                self.page_mut(ppn).fill(0);
                Ok(ppn)
            }
            None => Err(Error::NoMem),
        }
    }

    #[inline]
    pub fn dealloc(&mut self, ppn: PhysPageNum) {
        assert!(
            self.get_frame_by_ppn(ppn).pf_ref == 0,
            "freeing frame {:#x} that is still referenced",
            ppn.as_usize()
        );
        self.push(ppn);
    }

    #[inline]
    pub fn incref(&mut self, ppn: PhysPageNum) {
        self.get_frame_mut_by_ppn(ppn).pf_ref += 1;
    }

    #[inline]
    pub fn decref(&mut self, ppn: PhysPageNum) {
        let frame = self.get_frame_mut_by_ppn(ppn);
        assert!(frame.pf_ref > 0, "decref of unreferenced frame {:#x}", ppn.as_usize());
        frame.pf_ref -= 1;
        if frame.pf_ref == 0 {
            self.dealloc(ppn);
        }
    }

    #[inline]
    pub fn get_ref(&self, ppn: PhysPageNum) -> u16 {
        self.get_frame_by_ppn(ppn).pf_ref
    }

    #[inline]
    pub fn num_free_frames(&self) -> usize {
        self.nfree
    }

    #[inline]
    pub fn nframes(&self) -> usize {
        self.nframes
    }

    /// bytes of one physical page.
    #[inline]
    pub fn page(&self, ppn: PhysPageNum) -> &[u8] {
        let start = PhysAddr::from(ppn).as_usize();
        &self.ram[start..start + PAGE_SIZE]
    }

    #[inline]
    pub fn page_mut(&mut self, ppn: PhysPageNum) -> &mut [u8] {
        let start = PhysAddr::from(ppn).as_usize();
        &mut self.ram[start..start + PAGE_SIZE]
    }

    /// read a little-endian word. `pa` must be 4-byte aligned.
    #[inline]
    pub fn read_word(&self, pa: PhysAddr) -> u32 {
        let i = pa.as_usize();
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.ram[i..i + 4]);
        u32::from_le_bytes(word)
    }

    #[inline]
    pub fn write_word(&mut self, pa: PhysAddr, value: u32) {
        let i = pa.as_usize();
        self.ram[i..i + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// read `buf.len()` bytes starting at `pa`. The range must not cross a page.
    #[inline]
    pub fn read_bytes(&self, pa: PhysAddr, buf: &mut [u8]) {
        let i = pa.as_usize();
        debug_assert!(pa.page_offset() + buf.len() <= PAGE_SIZE);
        buf.copy_from_slice(&self.ram[i..i + buf.len()]);
    }

    #[inline]
    pub fn write_bytes(&mut self, pa: PhysAddr, bytes: &[u8]) {
        let i = pa.as_usize();
        debug_assert!(pa.page_offset() + bytes.len() <= PAGE_SIZE);
        self.ram[i..i + bytes.len()].copy_from_slice(bytes);
    }

    #[inline]
    fn push(&mut self, ppn: PhysPageNum) {
        let head = self.frames_free_list.head;
        self.get_frame_mut_by_ppn(ppn).pf_link = head;
        self.frames_free_list.head = Some(ppn);
        self.nfree += 1;
    }

    #[inline]
    fn pop(&mut self) -> Option<PhysPageNum> {
        let head = self.frames_free_list.head?;
        self.frames_free_list.head = self.get_frame_by_ppn(head).pf_link;
        self.get_frame_mut_by_ppn(head).pf_link = None;
        self.nfree -= 1;
        Some(head)
    }

    /// detach the whole free list, leaving the allocator empty.
    #[cfg(test)]
    pub fn steal(&mut self) -> (PhysFrameLink, usize) {
        let stolen = (self.frames_free_list.head.take(), self.nfree);
        self.nfree = 0;
        stolen
    }

    #[cfg(test)]
    pub fn recover(&mut self, stolen: (PhysFrameLink, usize)) {
        let mut extra = Vec::new();
        while let Some(ppn) = self.pop() {
            extra.push(ppn);
        }
        self.frames_free_list.head = stolen.0;
        self.nfree = stolen.1;
        for ppn in extra {
            self.push(ppn);
        }
    }
}
