use core::{fmt, ops::{Add, AddAssign, Sub}};

use super::page_table::Pte;

/// the number of ASIDs
pub const NASID: usize = 256;
/// mips page size
pub const PAGE_SIZE: usize = 4096;
/// bytes mapped by one page table entry
pub const PTMAP: usize = PAGE_SIZE;
/// bytes mapped by one page directory entry
pub const PDMAP: usize = 4 * 1024 * 1024;
/// page shift
pub const PGSHIFT: usize = 12;
/// page diretory shift
pub const PDSHIFT: usize = 22;
/// page table entry hard flag shift
pub const PTE_HARDFLAG_SHIFT: usize = 6;
/// global mapping
pub const PTE_G: usize = 0x0001 << PTE_HARDFLAG_SHIFT;
/// valid
pub const PTE_V: usize = 0x0002 << PTE_HARDFLAG_SHIFT;
/// dirty, i.e. writable
pub const PTE_D: usize = 0x0004 << PTE_HARDFLAG_SHIFT;
pub const PTE_C_CACHEABLE: usize = 0x0018 << PTE_HARDFLAG_SHIFT;
/// software bit: copy-on-write
pub const PTE_COW: usize = 0x0001;
/// software bit: shared between processes, never copy-on-write
pub const PTE_LIBRARY: usize = 0x0002;
/// permission bits of an entry
pub const PTE_PERM_MASK: usize = 0xfff;

pub const ULIM: usize = 0x80000000;
/// kernel read/write view of the current page tables
pub const VPT: VirtAddr = VirtAddr::new(ULIM + PDMAP);
pub const KSTACKTOP: usize = VPT.as_usize() - 0x100;
/// user read-only view of its own page tables
pub const UVPT: VirtAddr = VirtAddr::new(ULIM - PDMAP);
pub const UPAGES: VirtAddr = VirtAddr::new(UVPT.0 - PDMAP);
pub const UENVS: VirtAddr = VirtAddr::new(UPAGES.0 - PDMAP);
pub const UTOP: VirtAddr = UENVS;
pub const UXSTACKTOP: VirtAddr = UTOP;
pub const USTACKTOP: VirtAddr = VirtAddr::new(UTOP.0 - 2 * PTMAP);
pub const UTEXT: VirtAddr = VirtAddr::new(PDMAP);
/// scratch page used by the user COW fault handler
pub const UCOW: VirtAddr = VirtAddr::new(UTEXT.0 - PTMAP);
pub const UTEMP: VirtAddr = VirtAddr::new(UCOW.0 - PTMAP);

/// Physical address, wrapped numeric value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(C)]
pub struct PhysAddr(usize);

/// Virtual address, wrapped numeric value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(C)]
pub struct VirtAddr(usize);

/// Physical page number, wrapped numeric value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(C)]
pub struct PhysPageNum(usize);

impl VirtAddr {
    /// create a new virtual address from numeric value.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }
    #[inline]
    pub const fn zero() -> Self {
        Self(0)
    }
    /// the raw value of virtual address.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
    /// check if the address is null.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
    /// page directory index
    #[inline]
    pub const fn pdx(self) -> usize {
        (self.0 >> PDSHIFT) & 0x3ff
    }
    /// page table index
    #[inline]
    pub const fn ptx(self) -> usize {
        (self.0 >> PGSHIFT) & 0x3ff
    }
    /// virtual page number
    #[inline]
    pub const fn vpn(self) -> usize {
        self.0 >> PGSHIFT
    }
    #[inline]
    pub const fn page_align_down(self) -> Self {
        Self::new(self.0 & !(PAGE_SIZE - 1))
    }
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
    #[inline]
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0 % align == 0
    }
    /// address of page directory entry `pdx` and page table entry `ptx`.
    #[inline]
    pub const fn from_indices(pdx: usize, ptx: usize) -> Self {
        Self::new((pdx << PDSHIFT) | (ptx << PGSHIFT))
    }
}

impl fmt::Pointer for VirtAddr {
    /// for convenient print.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Pointer for PhysAddr {
    /// for convenient print.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl Add<usize> for VirtAddr {
    type Output = VirtAddr;

    fn add(self, rhs: usize) -> Self::Output {
        Self::Output::new(self.0 + rhs)
    }
}

impl AddAssign<usize> for VirtAddr {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

impl Sub<usize> for VirtAddr {
    type Output = VirtAddr;

    fn sub(self, rhs: usize) -> Self::Output {
        Self::Output::new(self.0 - rhs)
    }
}

impl PhysAddr {
    /// create a new physical address from numeric value.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }
    #[inline]
    pub const fn new_from_pte(pte: Pte, offset: usize) -> Self {
        Self((pte.ppn().as_usize() << PGSHIFT) + offset)
    }
    /// the raw value of this physical address.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl Add<usize> for PhysAddr {
    type Output = PhysAddr;

    fn add(self, rhs: usize) -> Self::Output {
        Self::Output::new(self.0 + rhs)
    }
}

impl PhysPageNum {
    /// create a new physical page number from numeric value.
    #[inline]
    pub const fn new(ppn: usize) -> Self {
        Self(ppn)
    }
    /// the raw value of ppn.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl From<Pte> for PhysAddr {
    /// convert pte to physical address
    fn from(value: Pte) -> Self {
        Self::new(value.as_usize() & !PTE_PERM_MASK)
    }
}

impl From<PhysAddr> for PhysPageNum {
    /// convert physcial address to ppn
    fn from(value: PhysAddr) -> Self {
        Self::new(value.0 >> PGSHIFT)
    }
}

impl From<PhysPageNum> for PhysAddr {
    /// convert ppn to physcial address
    fn from(value: PhysPageNum) -> Self {
        Self::new(value.0 << PGSHIFT)
    }
}
