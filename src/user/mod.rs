//! User-level library: what a program running in an environment links
//! against. Everything here reaches the kernel only through `UserEnv`.

pub mod fork;
pub mod ipc;

use crate::{
    env::{EnvID, EnvStatus, ENV_RECORD_SIZE, ENV_RECORD_WORDS},
    env::syscall::SyscallID,
    err::Error,
    memory::{
        mmu::{VirtAddr, PAGE_SIZE, PTE_D, PTE_V, UENVS, UTEMP, UVPT},
        page_table::Pte,
    },
};

/// The caller's own environment record, as read from the `UENVS` window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnvRecord {
    pub env_id: EnvID,
    pub ipc_value: usize,
    pub ipc_from: EnvID,
    pub ipc_perm: usize,
}

/// An environment as seen from user mode.
pub trait UserEnv {
    /// trap into the kernel with `sysno` in `a0` and `args` in `a1..`;
    /// returns the raw `v0`.
    fn syscall(&mut self, sysno: SyscallID, args: [usize; 5]) -> isize;

    fn load_word(&mut self, va: VirtAddr) -> u32;

    /// an ordinary user store: it may fault.
    fn store_word(&mut self, va: VirtAddr, value: u32);

    /// entry of the assembly stub that calls the registered fault handler
    fn fault_trampoline(&self) -> usize;

    #[inline]
    fn raw_syscall(&mut self, sysno: SyscallID, args: [usize; 5]) -> Result<usize, Error> {
        let r = self.syscall(sysno, args);
        if r < 0 {
            Err(Error::from_code(r).unwrap_or(Error::Unspecified))
        } else {
            Ok(r as usize)
        }
    }

    fn sys_putchar(&mut self, c: u8) {
        let _ = self.raw_syscall(SyscallID::Putchar, [c as usize, 0, 0, 0, 0]);
    }

    fn sys_getenvid(&mut self) -> EnvID {
        EnvID::new(self.raw_syscall(SyscallID::GetEnvID, [0; 5]).unwrap_or(0))
    }

    fn sys_yield(&mut self) {
        let _ = self.raw_syscall(SyscallID::Yield, [0; 5]);
    }

    fn sys_env_destroy(&mut self, envid: EnvID) -> Result<(), Error> {
        self.raw_syscall(SyscallID::EnvDestroy, [envid.as_usize(), 0, 0, 0, 0])
            .map(|_| ())
    }

    fn sys_set_pgfault_handler(&mut self, envid: EnvID, func: usize, xstacktop: VirtAddr) -> Result<(), Error> {
        self.raw_syscall(
            SyscallID::SetTlbModEntry,
            [envid.as_usize(), func, xstacktop.as_usize(), 0, 0],
        )
        .map(|_| ())
    }

    fn sys_mem_alloc(&mut self, envid: EnvID, va: VirtAddr, perm: usize) -> Result<(), Error> {
        self.raw_syscall(SyscallID::MemAlloc, [envid.as_usize(), va.as_usize(), perm, 0, 0])
            .map(|_| ())
    }

    fn sys_mem_map(
        &mut self,
        srcid: EnvID,
        srcva: VirtAddr,
        dstid: EnvID,
        dstva: VirtAddr,
        perm: usize,
    ) -> Result<(), Error> {
        self.raw_syscall(
            SyscallID::MemMap,
            [srcid.as_usize(), srcva.as_usize(), dstid.as_usize(), dstva.as_usize(), perm],
        )
        .map(|_| ())
    }

    fn sys_mem_unmap(&mut self, envid: EnvID, va: VirtAddr) -> Result<(), Error> {
        self.raw_syscall(SyscallID::MemUnmap, [envid.as_usize(), va.as_usize(), 0, 0, 0])
            .map(|_| ())
    }

    /// zero in the child, the child's id in the parent
    fn sys_exofork(&mut self) -> Result<EnvID, Error> {
        self.raw_syscall(SyscallID::Exofork, [0; 5]).map(EnvID::new)
    }

    fn sys_set_env_status(&mut self, envid: EnvID, status: EnvStatus) -> Result<(), Error> {
        self.raw_syscall(SyscallID::SetEnvStatus, [envid.as_usize(), status as usize, 0, 0, 0])
            .map(|_| ())
    }

    fn sys_set_trapframe(&mut self, envid: EnvID, tf_va: VirtAddr) -> Result<usize, Error> {
        self.raw_syscall(SyscallID::SetTrapframe, [envid.as_usize(), tf_va.as_usize(), 0, 0, 0])
    }

    fn sys_ipc_try_send(&mut self, envid: EnvID, value: usize, srcva: VirtAddr, perm: usize) -> Result<(), Error> {
        self.raw_syscall(
            SyscallID::IpcTrySend,
            [envid.as_usize(), value, srcva.as_usize(), perm, 0],
        )
        .map(|_| ())
    }

    fn sys_ipc_recv(&mut self, dstva: VirtAddr) -> Result<(), Error> {
        self.raw_syscall(SyscallID::IpcRecv, [dstva.as_usize(), 0, 0, 0, 0])
            .map(|_| ())
    }

    /// Stage `msg` at `UTEMP` and halt the system through the panic syscall.
    fn user_panic(&mut self, msg: &str) -> ! {
        let bytes = msg.as_bytes();
        let len = bytes.len().min(PAGE_SIZE - 1);
        if self.sys_mem_alloc(EnvID::zero(), UTEMP, PTE_V | PTE_D).is_ok() {
            // NUL comes for free: the page is zeroed
            for (i, chunk) in bytes[..len].chunks(4).enumerate() {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                self.store_word(UTEMP + i * 4, u32::from_le_bytes(word));
            }
        }
        let _ = self.raw_syscall(SyscallID::Panic, [UTEMP.as_usize(), 0, 0, 0, 0]);
        panic!("sys_panic returned: {}", msg);
    }

    /// Our slot's record in the read-only `UENVS` window: this is where a
    /// receiver finds the delivered value, sender and permission.
    fn env_record(&mut self) -> EnvRecord {
        let base = UENVS + self.sys_getenvid().envx() * ENV_RECORD_SIZE;
        let mut w = [0usize; ENV_RECORD_WORDS];
        for (i, word) in w.iter_mut().enumerate() {
            *word = self.load_word(base + i * 4) as usize;
        }
        EnvRecord {
            env_id: EnvID::new(w[0]),
            ipc_value: w[1],
            ipc_from: EnvID::new(w[2]),
            ipc_perm: w[3],
        }
    }

    /// page directory entry `pdx`, read through the `UVPT` self-map
    fn vpd(&mut self, pdx: usize) -> Pte {
        let vpd = UVPT + UVPT.pdx() * PAGE_SIZE;
        Pte::new(self.load_word(vpd + pdx * 4) as usize)
    }

    /// page table entry of virtual page `vpn`. Only meaningful when the
    /// covering directory entry is valid.
    fn vpt(&mut self, vpn: usize) -> Pte {
        Pte::new(self.load_word(UVPT + vpn * 4) as usize)
    }
}

/// Halt the system with a formatted message, from user mode.
#[macro_export]
macro_rules! user_panic {
    ($env: expr, $($arg: tt)+) => {
        $crate::user::UserEnv::user_panic($env, &::alloc::format!($($arg)+))
    };
}
