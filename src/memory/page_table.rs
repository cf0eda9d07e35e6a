use super::{frame::FrameAllocator, mmu::*};
use crate::err::Error;

pub const PAGE_TABLE_ENTRIES: usize = PAGE_SIZE / 4;

/// Page table entry, wrapped type.
/// MOS keeps pte and pde as the same word format.
/// For better abstraction on paging, pte refers to both pte and pde here.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(C)]
pub struct Pte(usize);

/// Page table rooted at a physical frame. Entries are little-endian words
/// stored in the frames themselves, so the same walk works for the
/// self-mapped `UVPT` window.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PageTable {
    root: PhysPageNum,
}

impl Pte {
    #[inline]
    pub const fn new(pte: usize) -> Self {
        Self(pte)
    }
    #[inline]
    pub const fn new_from_ppn(ppn: PhysPageNum, perm: usize) -> Self {
        Self((ppn.as_usize() << PGSHIFT) | (perm & PTE_PERM_MASK))
    }
    /// get pte as raw value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
    /// ppn of this entry.
    #[inline]
    pub const fn ppn(self) -> PhysPageNum {
        PhysPageNum::new((self.0 >> PGSHIFT) & 0xfffff)
    }
    /// flags of this entry.
    #[inline]
    pub const fn perm(self) -> usize {
        self.0 & PTE_PERM_MASK
    }
    #[inline]
    pub const fn valid(self) -> bool {
        self.0 & PTE_V != 0
    }
    #[inline]
    pub const fn writable(self) -> bool {
        self.0 & PTE_D != 0
    }
    #[inline]
    pub const fn is_cow(self) -> bool {
        self.0 & PTE_COW != 0
    }
}

impl PageTable {
    #[inline]
    pub const fn new(root: PhysPageNum) -> Self {
        Self { root }
    }

    #[inline]
    pub const fn root(&self) -> PhysPageNum {
        self.root
    }

    #[inline]
    fn entry_addr(table: PhysPageNum, index: usize) -> PhysAddr {
        PhysAddr::from(table) + index * 4
    }

    #[inline]
    fn read(frames: &FrameAllocator, table: PhysPageNum, index: usize) -> Pte {
        Pte::new(frames.read_word(Self::entry_addr(table, index)) as usize)
    }

    /// page directory entry `pdx`.
    #[inline]
    pub fn get_entry(&self, frames: &FrameAllocator, pdx: usize) -> Pte {
        Self::read(frames, self.root, pdx)
    }

    #[inline]
    pub fn set_entry(&self, frames: &mut FrameAllocator, pdx: usize, pte: Pte) {
        frames.write_word(Self::entry_addr(self.root, pdx), pte.as_usize() as u32);
    }

    /// entry `ptx` of the second-level table held in `table`.
    #[inline]
    pub fn table_entry(frames: &FrameAllocator, table: PhysPageNum, ptx: usize) -> Pte {
        Self::read(frames, table, ptx)
    }

    /// physical address of the pte for `va`, creating the second-level
    /// table when `create` is set.
    fn walk(&self, frames: &mut FrameAllocator, va: VirtAddr, create: bool) -> Result<PhysAddr, Error> {
        let pde = self.get_entry(frames, va.pdx());
        let table = if pde.valid() {
            pde.ppn()
        } else if create {
            let ppn = frames.alloc()?;
            frames.incref(ppn);
            self.set_entry(frames, va.pdx(), Pte::new_from_ppn(ppn, PTE_C_CACHEABLE | PTE_V));
            ppn
        } else {
            return Err(Error::NotMapped);
        };
        Ok(Self::entry_addr(table, va.ptx()))
    }

    /// the page mapped at `va` and its entry.
    #[inline]
    pub fn lookup(&self, frames: &FrameAllocator, va: VirtAddr) -> Result<(PhysPageNum, Pte), Error> {
        let pde = self.get_entry(frames, va.pdx());
        if !pde.valid() {
            return Err(Error::NotMapped);
        }
        let pte = Self::read(frames, pde.ppn(), va.ptx());
        if !pte.valid() {
            return Err(Error::NotMapped);
        }
        Ok((pte.ppn(), pte))
    }

    /// unmap `va`, dropping one reference to the page. No-op if unmapped.
    #[inline]
    pub fn remove(&self, frames: &mut FrameAllocator, va: VirtAddr) {
        if let Ok((ppn, _)) = self.lookup(frames, va) {
            if let Ok(addr) = self.walk(frames, va, false) {
                frames.write_word(addr, 0);
            }
            frames.decref(ppn);
        }
    }

    /// map `ppn` at `va`, replacing whatever was there.
    pub fn insert(&self, frames: &mut FrameAllocator, ppn: PhysPageNum, va: VirtAddr, perm: usize) -> Result<(), Error> {
        let addr = self.walk(frames, va, true)?;
        let old = Pte::new(frames.read_word(addr) as usize);
        let pte = Pte::new_from_ppn(ppn, perm | PTE_C_CACHEABLE | PTE_V);
        if old.valid() {
            if old.ppn() == ppn {
                frames.write_word(addr, pte.as_usize() as u32);
                return Ok(());
            }
            self.remove(frames, va);
        }
        frames.incref(ppn);
        frames.write_word(addr, pte.as_usize() as u32);
        Ok(())
    }

    /// translate `va` through this table, following the same two steps the
    /// hardware refill would.
    #[inline]
    pub fn translate(&self, frames: &FrameAllocator, va: VirtAddr) -> Option<PhysAddr> {
        let (_, pte) = self.lookup(frames, va).ok()?;
        Some(PhysAddr::new_from_pte(pte, va.page_offset()))
    }

    /// map `[pa, pa + size)` at `va` page by page.
    pub fn map_segment(&self, frames: &mut FrameAllocator, pa: PhysAddr, va: VirtAddr, size: usize, perm: usize) -> Result<(), Error> {
        assert!(pa.page_offset() == 0 && va.page_offset() == 0 && size % PAGE_SIZE == 0);
        for off in (0..size).step_by(PAGE_SIZE) {
            self.insert(frames, PhysPageNum::from(pa + off), va + off, perm)?;
        }
        Ok(())
    }
}
