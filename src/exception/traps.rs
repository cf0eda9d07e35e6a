use crate::{
    env::EnvManager,
    memory::mmu::{VirtAddr, PAGE_SIZE},
};

pub const STATUS_CU0: usize = 0x10000000;
pub const STATUS_BEV: usize = 0x00400000;
pub const STATUS_IM7: usize = 0x8000;
pub const STATUS_UM: usize = 0x0010;
pub const STATUS_EXL: usize = 0x0002;
pub const STATUS_IE: usize = 0x0001;

/// status every new environment starts with: user mode, timer line unmasked.
pub const STATUS_USER_INIT: usize = STATUS_IM7 | STATUS_IE | STATUS_EXL | STATUS_UM;

/// number of 32-bit words in a trap frame saved to user memory
pub const TF_WORDS: usize = 38;

pub const REG_V0: usize = 2;
pub const REG_A0: usize = 4;
pub const REG_SP: usize = 29;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Trapframe {
    pub regs: [usize; 32],
    pub cp0_status: usize,
    pub hi: usize,
    pub lo: usize,
    pub cp0_badvaddr: usize,
    pub cp0_cause: usize,
    pub cp0_epc: usize,
}

impl Trapframe {
    /// bytes of a trap frame in user memory
    pub const SIZE: usize = TF_WORDS * 4;

    pub fn new() -> Self {
        Self::default()
    }

    /// layout as pushed by the trap entry: regs, status, hi, lo, badvaddr, cause, epc.
    pub fn to_words(&self) -> [u32; TF_WORDS] {
        let mut w = [0u32; TF_WORDS];
        for (dst, src) in w.iter_mut().zip(self.regs.iter()) {
            *dst = *src as u32;
        }
        w[32] = self.cp0_status as u32;
        w[33] = self.hi as u32;
        w[34] = self.lo as u32;
        w[35] = self.cp0_badvaddr as u32;
        w[36] = self.cp0_cause as u32;
        w[37] = self.cp0_epc as u32;
        w
    }

    pub fn from_words(w: &[u32; TF_WORDS]) -> Self {
        let mut tf = Self::default();
        for (dst, src) in tf.regs.iter_mut().zip(w.iter()) {
            *dst = *src as usize;
        }
        tf.cp0_status = w[32] as usize;
        tf.hi = w[33] as usize;
        tf.lo = w[34] as usize;
        tf.cp0_badvaddr = w[35] as usize;
        tf.cp0_cause = w[36] as usize;
        tf.cp0_epc = w[37] as usize;
        tf
    }

    /// Deliver a write fault on a read-only page to the user handler of the
    /// current environment: push a copy of the faulting frame onto its
    /// exception stack and resume at the handler with `a0` pointing at it.
    pub fn do_tlb_mod(&mut self, em: &mut EnvManager) {
        let ind = match em.cur_env_ind() {
            Some(ind) => ind,
            None => panic!("TLB Mod with no env running"),
        };
        let env = em.get_env(ind);
        let mod_entry = env.env_user_tlb_mod_entry;
        let xstacktop = env.env_xstacktop;
        if mod_entry == 0 {
            panic!("TLB Mod but no user handler registered");
        }

        let tmp_tf = *self;
        let sp = VirtAddr::new(self.regs[REG_SP]);
        if sp < xstacktop - PAGE_SIZE || sp >= xstacktop {
            self.regs[REG_SP] = xstacktop.as_usize();
        }
        self.regs[REG_SP] -= Self::SIZE;
        let frame_va = VirtAddr::new(self.regs[REG_SP]);
        if em.store_trapframe(ind, frame_va, &tmp_tf).is_err() {
            panic!("TLB Mod: exception stack at {:p} is not mapped", frame_va);
        }
        log::trace!(
            "tlb mod at {:#x}, handler {:#x}",
            tmp_tf.cp0_badvaddr,
            mod_entry
        );

        self.regs[REG_A0] = self.regs[REG_SP];
        self.regs[REG_SP] -= 4;
        self.cp0_epc = mod_entry;
    }
}
