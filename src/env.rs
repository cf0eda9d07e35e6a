pub mod schedule;
pub mod syscall;

use core::fmt;

use alloc::vec::Vec;

use crate::{
    err::Error,
    exception::traps::{Trapframe, REG_SP, STATUS_USER_INIT, TF_WORDS},
    memory::{
        frame::FrameAllocator,
        mmu::{
            PhysAddr, PhysPageNum, VirtAddr, NASID, PAGE_SIZE, PDMAP, PTE_D, PTE_G, PTE_V, UENVS,
            UPAGES, USTACKTOP, UTOP, UVPT, VPT,
        },
        page_table::{PageTable, Pte, PAGE_TABLE_ENTRIES},
    },
    util::{elf::load_elf, queue::IndexLink},
};

pub const LOG2NENV: usize = 10;
pub const NENV: usize = 1 << LOG2NENV;

/// Words of one record in the read-only `UENVS` window, in order: env id,
/// ipc value, ipc sender, ipc perm. Record `i` belongs to slot `i`.
pub const ENV_RECORD_WORDS: usize = 4;
pub const ENV_RECORD_SIZE: usize = ENV_RECORD_WORDS * 4;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(C)]
pub struct ASID(usize);

/// Environment id: a generation counter above bit `LOG2NENV`, the pool
/// slot below it. Zero names the caller.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(C)]
pub struct EnvID(usize);

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub enum EnvStatus {
    #[default]
    Free = 0,
    Runnable = 1,
    NotRunnable = 2,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Env {
    pub env_tf: Trapframe,
    pub env_id: EnvID,
    pub env_parent_id: EnvID,
    pub env_status: EnvStatus,
    pub env_pgdir: Option<PageTable>,
    pub env_ipc_value: usize,
    pub env_ipc_from: EnvID,
    pub env_ipc_receiving: bool,
    pub env_ipc_dstva: VirtAddr,
    pub env_ipc_perm: usize,
    pub env_user_tlb_mod_entry: usize,
    pub env_xstacktop: VirtAddr,
    pub env_runs: usize,
}

/// The environment pool and everything the kernel needs to run it:
/// physical memory, the boot page directory and the scheduler state.
pub struct EnvManager {
    pub(crate) frames: FrameAllocator,
    pub(crate) envs: Vec<Env>,
    base_pgdir: PageTable,
    /// frames behind the `UENVS` window
    env_records: Vec<PhysPageNum>,
    env_free_list: IndexLink,
    pub(crate) cursor: usize,
    pub(crate) cur_env_ind: Option<usize>,
    alloced_env: usize,
    context: Option<(PageTable, ASID)>,
}

impl ASID {
    #[inline]
    pub const fn new(v: usize) -> Self {
        Self(v)
    }
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl EnvID {
    #[inline]
    pub const fn new(v: usize) -> Self {
        Self(v)
    }
    #[inline]
    pub const fn zero() -> Self {
        Self(0)
    }
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
    /// pool slot
    #[inline]
    pub const fn envx(self) -> usize {
        self.0 & (NENV - 1)
    }
    /// address space tag handed to the TLB alongside the page directory
    #[inline]
    pub const fn asid(self) -> ASID {
        ASID::new((self.0 >> (1 + LOG2NENV)) & (NASID - 1))
    }
}

impl fmt::LowerHex for EnvID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl TryFrom<usize> for EnvStatus {
    type Error = Error;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EnvStatus::Free),
            1 => Ok(EnvStatus::Runnable),
            2 => Ok(EnvStatus::NotRunnable),
            _ => Err(Error::Inval),
        }
    }
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }
}

/// map a fresh zeroed frame at `va`. The frame goes back to the free list
/// if the insert fails.
pub(crate) fn alloc_page_at(
    frames: &mut FrameAllocator,
    pgdir: PageTable,
    va: VirtAddr,
    perm: usize,
) -> Result<PhysPageNum, Error> {
    let ppn = frames.alloc()?;
    if let Err(e) = pgdir.insert(frames, ppn, va, perm) {
        frames.dealloc(ppn);
        return Err(e);
    }
    Ok(ppn)
}

/// Map one ELF segment: every page touched by `[va, va + memsz)` gets a
/// frame, file bytes are copied in and the tail stays zero.
fn load_icode_mapper(
    frames: &mut FrameAllocator,
    pgdir: PageTable,
    va: VirtAddr,
    memsz: usize,
    bin: &[u8],
) -> Result<(), Error> {
    let start = va.as_usize();
    let end = start + memsz;
    let file_end = start + bin.len();
    let mut page = va.page_align_down().as_usize();
    while page < end {
        let page_va = VirtAddr::new(page);
        // two segments may share a boundary page
        let ppn = match pgdir.lookup(frames, page_va) {
            Ok((ppn, _)) => ppn,
            Err(_) => alloc_page_at(frames, pgdir, page_va, PTE_D)?,
        };
        let lo = page.max(start);
        let hi = (page + PAGE_SIZE).min(file_end);
        if lo < hi {
            frames.write_bytes(PhysAddr::from(ppn) + (lo - page), &bin[lo - start..hi - start]);
        }
        page += PAGE_SIZE;
    }
    Ok(())
}

impl EnvManager {
    /// Bring up physical memory and the empty pool. Running out of frames
    /// here is unrecoverable.
    pub fn new(memsize: usize, reserved: usize) -> Self {
        assert!(reserved <= PDMAP, "kernel image does not fit below UVPT");
        let mut frames = FrameAllocator::new(memsize, reserved);
        let root = match frames.alloc() {
            Ok(ppn) => ppn,
            Err(e) => panic!("cannot allocate boot page directory: {}", e),
        };
        frames.incref(root);
        let base_pgdir = PageTable::new(root);
        let image = reserved.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        if let Err(e) = base_pgdir.map_segment(&mut frames, PhysAddr::new(0), UPAGES, image, PTE_G) {
            panic!("cannot map kernel image at UPAGES: {}", e);
        }
        let mut env_records = Vec::new();
        for i in 0..(NENV * ENV_RECORD_SIZE).div_ceil(PAGE_SIZE) {
            let page = match frames.alloc() {
                Ok(ppn) => ppn,
                Err(e) => panic!("cannot allocate env records: {}", e),
            };
            if let Err(e) = base_pgdir.insert(&mut frames, page, UENVS + i * PAGE_SIZE, PTE_G) {
                panic!("cannot map env records at UENVS: {}", e);
            }
            env_records.push(page);
        }

        let mut env_free_list = IndexLink::new(NENV);
        for i in (0..NENV).rev() {
            env_free_list.insert_head(i);
        }
        let mut envs = Vec::new();
        envs.resize_with(NENV, Env::new);

        log::info!("env pool ready: {} slots", NENV);
        EnvManager {
            frames,
            envs,
            base_pgdir,
            env_records,
            env_free_list,
            cursor: NENV - 1,
            cur_env_ind: None,
            alloced_env: 0,
            context: None,
        }
    }

    #[inline]
    pub fn mkenvid(&mut self, ind: usize) -> EnvID {
        self.alloced_env += 1;
        EnvID::new((self.alloced_env << (1 + LOG2NENV)) | ind)
    }

    /// Build the address space of slot `ind`: a zeroed directory sharing the
    /// kernel half of the boot directory, plus the two self-maps.
    fn setup(&mut self, ind: usize) -> Result<(), Error> {
        let frames = &mut self.frames;
        let ppn = frames.alloc()?;
        frames.incref(ppn);
        let pgdir = PageTable::new(ppn);
        for pdx in UTOP.pdx()..PAGE_TABLE_ENTRIES {
            let pde = self.base_pgdir.get_entry(frames, pdx);
            pgdir.set_entry(frames, pdx, pde);
        }
        pgdir.set_entry(frames, VPT.pdx(), Pte::new_from_ppn(ppn, PTE_V | PTE_D));
        pgdir.set_entry(frames, UVPT.pdx(), Pte::new_from_ppn(ppn, PTE_V));
        self.envs[ind].env_pgdir = Some(pgdir);
        Ok(())
    }

    /// Take the head of the free list and make it a fresh runnable
    /// environment with `parent_id` as its parent.
    pub fn alloc(&mut self, parent_id: EnvID) -> Result<EnvID, Error> {
        let ind = self.env_free_list.first().ok_or(Error::NoFreeEnv)?;
        self.setup(ind)?;
        let envid = self.mkenvid(ind);

        let e = &mut self.envs[ind];
        let pgdir = e.env_pgdir;
        *e = Env {
            env_id: envid,
            env_parent_id: parent_id,
            env_status: EnvStatus::Runnable,
            env_pgdir: pgdir,
            ..Env::new()
        };
        e.env_tf.cp0_status = STATUS_USER_INIT;
        e.env_tf.regs[REG_SP] = USTACKTOP.as_usize();
        self.env_free_list.remove(ind);
        self.publish(ind);
        Ok(envid)
    }

    /// Mirror what user code may see of slot `ind` into its `UENVS` record.
    fn publish(&mut self, ind: usize) {
        let e = &self.envs[ind];
        let words = [
            e.env_id.as_usize(),
            e.env_ipc_value,
            e.env_ipc_from.as_usize(),
            e.env_ipc_perm,
        ];
        let off = ind * ENV_RECORD_SIZE;
        let base = PhysAddr::from(self.env_records[off / PAGE_SIZE]) + off % PAGE_SIZE;
        for (i, w) in words.iter().enumerate() {
            self.frames.write_word(base + i * 4, *w as u32);
        }
    }

    /// Resolve `id` to a slot. Zero is the current environment; with
    /// `checkperm` the target must be the caller or one of its children.
    pub fn envid2ind(&self, id: EnvID, checkperm: bool) -> Result<usize, Error> {
        if id.is_zero() {
            return self.cur_env_ind.ok_or(Error::BadEnv);
        }
        let ind = id.envx();
        let e = &self.envs[ind];
        if e.env_status == EnvStatus::Free || e.env_id != id {
            return Err(Error::BadEnv);
        }
        if checkperm {
            let cur_id = self.cur_env_id();
            if e.env_id != cur_id && e.env_parent_id != cur_id {
                return Err(Error::BadEnv);
            }
        }
        Ok(ind)
    }

    #[inline]
    pub fn get_env(&self, ind: usize) -> &Env {
        &self.envs[ind]
    }

    #[inline]
    pub fn get_env_mut(&mut self, ind: usize) -> &mut Env {
        &mut self.envs[ind]
    }

    #[inline]
    pub fn cur_env_ind(&self) -> Option<usize> {
        self.cur_env_ind
    }

    /// id of the running environment, zero if none
    #[inline]
    pub fn cur_env_id(&self) -> EnvID {
        self.cur_env_ind
            .map(|ind| self.envs[ind].env_id)
            .unwrap_or_default()
    }

    /// installed `(page directory, asid)` pair
    #[inline]
    pub fn context(&self) -> Option<(PageTable, ASID)> {
        self.context
    }

    #[inline]
    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    #[inline]
    pub fn num_free_envs(&self) -> usize {
        self.env_free_list.len()
    }

    /// Unmap every user page of slot `ind`, release its page tables and
    /// directory, and put the slot back at the head of the free list.
    pub fn free(&mut self, ind: usize) {
        log::info!(
            "[{:08x}] free env {:08x}",
            self.cur_env_id(),
            self.envs[ind].env_id
        );

        let frames = &mut self.frames;
        let env = &mut self.envs[ind];
        if let Some(pgdir) = env.env_pgdir.take() {
            for pdx in 0..UTOP.pdx() {
                let pde = pgdir.get_entry(frames, pdx);
                if !pde.valid() {
                    continue;
                }
                for ptx in 0..PAGE_TABLE_ENTRIES {
                    if PageTable::table_entry(frames, pde.ppn(), ptx).valid() {
                        pgdir.remove(frames, VirtAddr::from_indices(pdx, ptx));
                    }
                }
                pgdir.set_entry(frames, pdx, Pte::new(0));
                frames.decref(pde.ppn());
            }
            frames.decref(pgdir.root());
        }
        env.env_status = EnvStatus::Free;
        env.env_ipc_receiving = false;
        self.env_free_list.insert_head(ind);
    }

    /// Load an ELF image into slot `ind`: one stack page below `USTACKTOP`
    /// and every loadable segment; the entry point becomes the initial pc.
    fn load_icode(&mut self, ind: usize, binary: &[u8]) -> Result<(), Error> {
        let pgdir = self.envs[ind].env_pgdir.ok_or(Error::BadEnv)?;
        let frames = &mut self.frames;
        alloc_page_at(frames, pgdir, USTACKTOP - PAGE_SIZE, PTE_D)?;
        let entry = load_elf(binary, |va, memsz, bin| {
            load_icode_mapper(frames, pgdir, va, memsz, bin)
        })?;
        self.envs[ind].env_tf.cp0_epc = entry.as_usize();
        Ok(())
    }

    /// allocate a root environment running `binary`.
    pub fn create(&mut self, binary: &[u8]) -> Result<EnvID, Error> {
        let envid = self.alloc(EnvID::zero())?;
        let ind = envid.envx();
        if let Err(e) = self.load_icode(ind, binary) {
            self.free(ind);
            return Err(e);
        }
        log::info!("created env {:08x}, entry {:#x}", envid, self.envs[ind].env_tf.cp0_epc);
        Ok(envid)
    }

    /// Free slot `ind`. Destroying the running environment hands the
    /// processor to the next runnable one through `tf`.
    pub fn destroy(&mut self, ind: usize, tf: &mut Trapframe) {
        self.free(ind);
        if self.cur_env_ind == Some(ind) {
            self.cur_env_ind = None;
            log::info!("i am killed ...");
            self.schedule(tf);
        }
    }

    /// physical address behind `va` in slot `ind`'s address space.
    pub fn translate(&self, ind: usize, va: VirtAddr) -> Result<PhysAddr, Error> {
        let pgdir = self.envs[ind].env_pgdir.ok_or(Error::BadEnv)?;
        pgdir.translate(&self.frames, va).ok_or(Error::NotMapped)
    }

    /// Copy `bytes` into user memory of slot `ind`. Page protection is not
    /// consulted: this is a kernel write.
    pub fn copy_to_user(&mut self, ind: usize, va: VirtAddr, bytes: &[u8]) -> Result<(), Error> {
        let mut done = 0;
        while done < bytes.len() {
            let at = va + done;
            let pa = self.translate(ind, at)?;
            let n = (PAGE_SIZE - at.page_offset()).min(bytes.len() - done);
            self.frames.write_bytes(pa, &bytes[done..done + n]);
            done += n;
        }
        Ok(())
    }

    pub fn copy_from_user(&self, ind: usize, va: VirtAddr, buf: &mut [u8]) -> Result<(), Error> {
        let mut done = 0;
        while done < buf.len() {
            let at = va + done;
            let pa = self.translate(ind, at)?;
            let n = (PAGE_SIZE - at.page_offset()).min(buf.len() - done);
            self.frames.read_bytes(pa, &mut buf[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// write `tf` as `TF_WORDS` little-endian words at `va`.
    pub fn store_trapframe(&mut self, ind: usize, va: VirtAddr, tf: &Trapframe) -> Result<(), Error> {
        let mut bytes = [0u8; Trapframe::SIZE];
        for (chunk, w) in bytes.chunks_exact_mut(4).zip(tf.to_words()) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        self.copy_to_user(ind, va, &bytes)
    }

    pub fn load_trapframe(&self, ind: usize, va: VirtAddr) -> Result<Trapframe, Error> {
        let mut bytes = [0u8; Trapframe::SIZE];
        self.copy_from_user(ind, va, &mut bytes)?;
        let mut words = [0u32; TF_WORDS];
        for (w, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(Trapframe::from_words(&words))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::mmu::{PTE_COW, UTEXT},
        util::elf::build_image,
    };

    fn manager() -> EnvManager {
        EnvManager::new(2 * 1024 * 1024, 64 * 1024)
    }

    #[test]
    fn ids_carry_slot_and_generation() {
        let mut em = manager();
        let a = em.alloc(EnvID::zero()).unwrap();
        assert_eq!(a.envx(), 0);
        assert_eq!(a.as_usize(), (1 << 11) | 0);
        em.free(a.envx());
        let b = em.alloc(EnvID::zero()).unwrap();
        // LIFO reuse of the slot, fresh generation
        assert_eq!(b.envx(), 0);
        assert_ne!(a, b);
        assert_eq!(b.asid(), ASID::new(2));
        // the stale id no longer resolves
        assert_eq!(em.envid2ind(a, false), Err(Error::BadEnv));
        assert_eq!(em.envid2ind(b, false), Ok(0));
    }

    #[test]
    fn new_env_state() {
        let mut em = manager();
        let parent = em.alloc(EnvID::zero()).unwrap();
        let child = em.alloc(parent).unwrap();
        let e = em.get_env(child.envx());
        assert_eq!(e.env_status, EnvStatus::Runnable);
        assert_eq!(e.env_parent_id, parent);
        assert_eq!(e.env_tf.regs[REG_SP], USTACKTOP.as_usize());
        assert_eq!(e.env_tf.cp0_status, STATUS_USER_INIT);
        assert!(!e.env_ipc_receiving);
        assert_eq!(em.num_free_envs(), NENV - 2);
    }

    #[test]
    fn address_space_shares_kernel_half() {
        let mut em = manager();
        let id = em.alloc(EnvID::zero()).unwrap();
        let pgdir = em.get_env(id.envx()).env_pgdir.unwrap();
        let fa = em.frames();

        // kernel image is visible at UPAGES
        assert_eq!(pgdir.translate(fa, UPAGES + 0x10), Some(PhysAddr::new(0x10)));
        assert_eq!(pgdir.get_entry(fa, UPAGES.pdx()), em.base_pgdir.get_entry(fa, UPAGES.pdx()));
        // no user mappings yet
        for pdx in 0..UTOP.pdx() {
            assert!(!pgdir.get_entry(fa, pdx).valid());
        }
        // UVPT is read-only, VPT writable, both point at the directory itself
        let uvpt = pgdir.get_entry(fa, UVPT.pdx());
        let vpt = pgdir.get_entry(fa, VPT.pdx());
        assert_eq!(uvpt.ppn(), pgdir.root());
        assert_eq!(vpt.ppn(), pgdir.root());
        assert!(uvpt.valid() && !uvpt.writable());
        assert!(vpt.writable());
    }

    #[test]
    fn uvpt_exposes_page_table_entries() {
        let mut em = manager();
        let id = em.alloc(EnvID::zero()).unwrap();
        let ind = id.envx();
        let pgdir = em.get_env(ind).env_pgdir.unwrap();
        let va = UTEXT + 5 * PAGE_SIZE;
        alloc_page_at(&mut em.frames, pgdir, va, PTE_D | PTE_COW).unwrap();
        let (_, pte) = pgdir.lookup(em.frames(), va).unwrap();

        // vpt[vpn] lives at UVPT + vpn * 4
        let mut word = [0u8; 4];
        em.copy_from_user(ind, UVPT + va.vpn() * 4, &mut word).unwrap();
        assert_eq!(u32::from_le_bytes(word) as usize, pte.as_usize());
        // vpd[pdx] lives inside the page UVPT maps onto itself
        let vpd = UVPT + UVPT.pdx() * PAGE_SIZE;
        em.copy_from_user(ind, vpd + va.pdx() * 4, &mut word).unwrap();
        assert!(Pte::new(u32::from_le_bytes(word) as usize).valid());
    }

    fn record(em: &EnvManager, reader: usize, slot: usize) -> [u32; ENV_RECORD_WORDS] {
        let mut bytes = [0u8; ENV_RECORD_SIZE];
        em.copy_from_user(reader, UENVS + slot * ENV_RECORD_SIZE, &mut bytes)
            .unwrap();
        let mut words = [0u32; ENV_RECORD_WORDS];
        for (w, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words
    }

    #[test]
    fn uenvs_window_is_shared_and_read_only() {
        let mut em = manager();
        let a = em.alloc(EnvID::zero()).unwrap();
        let b = em.alloc(a).unwrap();
        // every env sees every record, and fresh mailboxes are empty
        assert_eq!(record(&em, a.envx(), b.envx()), [b.as_usize() as u32, 0, 0, 0]);
        assert_eq!(record(&em, b.envx(), a.envx()), [a.as_usize() as u32, 0, 0, 0]);
        // the last slot is backed too
        assert!(em.translate(a.envx(), UENVS + NENV * ENV_RECORD_SIZE - 4).is_ok());

        let pgdir = em.get_env(a.envx()).env_pgdir.unwrap();
        let (_, pte) = pgdir.lookup(em.frames(), UENVS).unwrap();
        assert!(pte.valid() && !pte.writable());

        // the kernel keeps the record in step with the mailbox
        let e = em.get_env_mut(b.envx());
        e.env_ipc_value = 0x1234;
        e.env_ipc_from = a;
        e.env_ipc_perm = PTE_V;
        em.publish(b.envx());
        assert_eq!(
            record(&em, a.envx(), b.envx()),
            [b.as_usize() as u32, 0x1234, a.as_usize() as u32, PTE_V as u32]
        );
    }

    #[test]
    fn free_returns_every_frame() {
        let mut em = manager();
        let before = em.frames().num_free_frames();
        let image = build_image(0x0040_0000, &[(0x0040_0000, &[7u8; 5000][..], 0x3000)]);
        let id = em.create(&image).unwrap();
        assert!(em.frames().num_free_frames() < before);
        em.free(id.envx());
        assert_eq!(em.frames().num_free_frames(), before);
        assert_eq!(em.num_free_envs(), NENV);
        assert_eq!(em.get_env(id.envx()).env_status, EnvStatus::Free);
    }

    #[test]
    fn load_icode_fills_and_zeroes() {
        let mut em = manager();
        let text = [0x11u8; 100];
        // unaligned segment start, memsz larger than the file bytes
        let image = build_image(0x0040_0010, &[(0x0040_0ff0, &text[..], 0x1100)]);
        let id = em.create(&image).unwrap();
        let ind = id.envx();
        assert_eq!(em.get_env(ind).env_tf.cp0_epc, 0x0040_0010);

        let mut buf = [0u8; 100];
        em.copy_from_user(ind, VirtAddr::new(0x0040_0ff0), &mut buf).unwrap();
        assert_eq!(buf, text);
        let mut tail = [0xffu8; 16];
        em.copy_from_user(ind, VirtAddr::new(0x0040_1100), &mut tail).unwrap();
        assert_eq!(tail, [0u8; 16]);
        // stack page is mapped writable
        let pgdir = em.get_env(ind).env_pgdir.unwrap();
        assert!(pgdir.lookup(em.frames(), USTACKTOP - PAGE_SIZE).unwrap().1.writable());
    }

    #[test]
    fn bad_image_releases_slot() {
        let mut em = manager();
        assert_eq!(em.create(b"definitely not an elf"), Err(Error::Inval));
        assert_eq!(em.num_free_envs(), NENV);
    }

    #[test]
    fn checkperm_limits_to_self_and_children() {
        let mut em = manager();
        let a = em.alloc(EnvID::zero()).unwrap();
        let child = em.alloc(a).unwrap();
        let other = em.alloc(EnvID::zero()).unwrap();
        em.cur_env_ind = Some(a.envx());
        assert_eq!(em.envid2ind(EnvID::zero(), true), Ok(a.envx()));
        assert_eq!(em.envid2ind(child, true), Ok(child.envx()));
        assert_eq!(em.envid2ind(other, true), Err(Error::BadEnv));
        assert_eq!(em.envid2ind(other, false), Ok(other.envx()));
    }

    #[test]
    fn trapframe_round_trips_through_user_memory() {
        let mut em = manager();
        let image = build_image(0x0040_0000, &[(0x0040_0000, &[0u8; 4][..], 4)]);
        let id = em.create(&image).unwrap();
        let mut tf = Trapframe::new();
        tf.regs[REG_SP] = 0x1234;
        tf.cp0_epc = 0x0040_0040;
        let va = USTACKTOP - Trapframe::SIZE;
        em.store_trapframe(id.envx(), va, &tf).unwrap();
        assert_eq!(em.load_trapframe(id.envx(), va).unwrap(), tf);
        assert_eq!(
            em.store_trapframe(id.envx(), VirtAddr::new(0x1000_0000), &tf),
            Err(Error::NotMapped)
        );
    }
}
