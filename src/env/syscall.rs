use alloc::vec::Vec;

use crate::{
    err::Error,
    exception::traps::{Trapframe, REG_A0, REG_V0},
    memory::mmu::{VirtAddr, PAGE_SIZE, PTE_COW, PTE_V, UTOP},
    print::printcharc,
};

use super::{alloc_page_at, EnvID, EnvManager, EnvStatus};

/// longest message `sys_panic` reads from user memory
pub const MAX_PANIC_MSG: usize = 256;

/// syscall id enum
#[repr(usize)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallID {
    Putchar,
    GetEnvID,
    Yield,
    EnvDestroy,
    SetTlbModEntry,
    MemAlloc,
    MemMap,
    MemUnmap,
    Exofork,
    SetEnvStatus,
    SetTrapframe,
    Panic,
    IpcTrySend,
    IpcRecv,
    SysNo,
}

/// convert int to syscall id
impl From<usize> for SyscallID {
    fn from(value: usize) -> Self {
        match value {
            x if x == SyscallID::Putchar as usize => SyscallID::Putchar,
            x if x == SyscallID::GetEnvID as usize => SyscallID::GetEnvID,
            x if x == SyscallID::Yield as usize => SyscallID::Yield,
            x if x == SyscallID::EnvDestroy as usize => SyscallID::EnvDestroy,
            x if x == SyscallID::SetTlbModEntry as usize => SyscallID::SetTlbModEntry,
            x if x == SyscallID::MemAlloc as usize => SyscallID::MemAlloc,
            x if x == SyscallID::MemMap as usize => SyscallID::MemMap,
            x if x == SyscallID::MemUnmap as usize => SyscallID::MemUnmap,
            x if x == SyscallID::Exofork as usize => SyscallID::Exofork,
            x if x == SyscallID::SetEnvStatus as usize => SyscallID::SetEnvStatus,
            x if x == SyscallID::SetTrapframe as usize => SyscallID::SetTrapframe,
            x if x == SyscallID::Panic as usize => SyscallID::Panic,
            x if x == SyscallID::IpcTrySend as usize => SyscallID::IpcTrySend,
            x if x == SyscallID::IpcRecv as usize => SyscallID::IpcRecv,
            _ => SyscallID::SysNo,
        }
    }
}

/// What a finished syscall left in the live trap frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// same env resumes with this value in `v0`
    Return(usize),
    /// the frame now belongs to whichever env was dispatched
    Rescheduled,
}

type SysResult = Result<SyscallOutcome, Error>;

/// `v0` encoding of an error
#[inline]
pub fn errno(e: Error) -> usize {
    i32::from(e) as isize as usize
}

/// check if virtual address is a user address
#[inline]
fn is_illegal_va(va: VirtAddr) -> bool {
    va >= UTOP
}

/// check if range of virtual address is valid
#[inline]
fn is_illegal_va_range(va: VirtAddr, len: usize) -> bool {
    match va.as_usize().checked_add(len) {
        Some(end) => end > UTOP.as_usize(),
        None => true,
    }
}

impl EnvManager {
    #[inline]
    fn cur_ind(&self) -> Result<usize, Error> {
        self.cur_env_ind.ok_or(Error::BadEnv)
    }

    /// put char to console
    fn sys_putchar(&mut self, c: usize) -> SysResult {
        printcharc(c as u8);
        Ok(SyscallOutcome::Return(0))
    }

    /// get current env id
    fn sys_get_envid(&mut self) -> SysResult {
        Ok(SyscallOutcome::Return(self.cur_env_id().as_usize()))
    }

    /// yield: the caller sees 0 when it is next dispatched
    fn sys_yield(&mut self, tf: &mut Trapframe) -> SysResult {
        tf.regs[REG_V0] = 0;
        self.schedule(tf);
        Ok(SyscallOutcome::Rescheduled)
    }

    /// destroy env
    fn sys_env_destroy(&mut self, envid: EnvID, tf: &mut Trapframe) -> SysResult {
        let ind = self.envid2ind(envid, true)?;
        log::info!(
            "[{:08x}] destroying {:08x}",
            self.cur_env_id(),
            self.envs[ind].env_id
        );
        let is_self = self.cur_env_ind == Some(ind);
        self.destroy(ind, tf);
        if is_self {
            Ok(SyscallOutcome::Rescheduled)
        } else {
            Ok(SyscallOutcome::Return(0))
        }
    }

    /// set write-fault handler and exception stack of env. A handler needs
    /// a stack below it.
    fn sys_set_tlb_mod_entry(&mut self, envid: EnvID, func: usize, xstacktop: VirtAddr) -> SysResult {
        if xstacktop > UTOP || !xstacktop.is_aligned(PAGE_SIZE) || (func != 0 && xstacktop.is_null()) {
            return Err(Error::Inval);
        }
        let ind = self.envid2ind(envid, false)?;
        let env = &mut self.envs[ind];
        env.env_user_tlb_mod_entry = func;
        env.env_xstacktop = xstacktop;
        Ok(SyscallOutcome::Return(0))
    }

    /// alloc a zeroed page at `va`
    fn sys_mem_alloc(&mut self, envid: EnvID, va: VirtAddr, perm: usize) -> SysResult {
        if perm & PTE_V == 0 || perm & PTE_COW != 0 || is_illegal_va(va) {
            return Err(Error::Inval);
        }
        let ind = self.envid2ind(envid, false)?;
        let pgdir = self.envs[ind].env_pgdir.ok_or(Error::BadEnv)?;
        alloc_page_at(&mut self.frames, pgdir, va, perm)?;
        Ok(SyscallOutcome::Return(0))
    }

    /// map the page at `srcva` of `srcid` into `dstid` at `dstva`
    fn sys_mem_map(&mut self, srcid: EnvID, srcva: VirtAddr, dstid: EnvID, dstva: VirtAddr, perm: usize) -> SysResult {
        if perm & PTE_V == 0 || is_illegal_va(srcva) || is_illegal_va(dstva) {
            return Err(Error::Inval);
        }
        let srcind = self.envid2ind(srcid, false)?;
        let dstind = self.envid2ind(dstid, false)?;
        let src_pgdir = self.envs[srcind].env_pgdir.ok_or(Error::BadEnv)?;
        let dst_pgdir = self.envs[dstind].env_pgdir.ok_or(Error::BadEnv)?;
        let (ppn, _) = src_pgdir.lookup(&self.frames, srcva).map_err(|_| Error::Inval)?;
        dst_pgdir.insert(&mut self.frames, ppn, dstva, perm)?;
        Ok(SyscallOutcome::Return(0))
    }

    /// unmap memory from user space
    fn sys_mem_unmap(&mut self, envid: EnvID, va: VirtAddr) -> SysResult {
        if is_illegal_va(va) {
            return Err(Error::Inval);
        }
        let ind = self.envid2ind(envid, false)?;
        let pgdir = self.envs[ind].env_pgdir.ok_or(Error::BadEnv)?;
        pgdir.remove(&mut self.frames, va);
        Ok(SyscallOutcome::Return(0))
    }

    /// Create a child that resumes from this very syscall with `v0 = 0`.
    fn sys_exofork(&mut self, tf: &Trapframe) -> SysResult {
        let cur = self.cur_ind()?;
        let parent_id = self.envs[cur].env_id;
        let envid = self.alloc(parent_id)?;
        let env = &mut self.envs[envid.envx()];
        env.env_tf = *tf;
        env.env_tf.regs[REG_V0] = 0;
        env.env_status = EnvStatus::NotRunnable;
        env.env_user_tlb_mod_entry = 0;
        env.env_xstacktop = VirtAddr::zero();
        log::debug!("[{:08x}] exofork {:08x}", parent_id, envid);
        Ok(SyscallOutcome::Return(envid.as_usize()))
    }

    /// set env status of env. `Free` releases it like a destroy, so it
    /// needs the same ownership.
    fn sys_set_env_status(&mut self, envid: EnvID, status: usize, tf: &mut Trapframe) -> SysResult {
        let status = EnvStatus::try_from(status)?;
        let ind = self.envid2ind(envid, status == EnvStatus::Free)?;
        if status == EnvStatus::Free {
            let is_self = self.cur_env_ind == Some(ind);
            self.destroy(ind, tf);
            return Ok(if is_self {
                SyscallOutcome::Rescheduled
            } else {
                SyscallOutcome::Return(0)
            });
        }
        self.envs[ind].env_status = status;
        Ok(SyscallOutcome::Return(0))
    }

    /// Replace the context of env with the frame stored at `tf_va` in the
    /// caller's memory. For the caller itself this is a return from the
    /// fault handler: the live frame is swapped and its `v0` kept.
    fn sys_set_trapframe(&mut self, envid: EnvID, tf_va: VirtAddr, tf: &mut Trapframe) -> SysResult {
        if is_illegal_va_range(tf_va, Trapframe::SIZE) {
            return Err(Error::Inval);
        }
        let ind = self.envid2ind(envid, true)?;
        let cur = self.cur_ind()?;
        let new_tf = self.load_trapframe(cur, tf_va)?;
        if ind == cur {
            *tf = new_tf;
            Ok(SyscallOutcome::Return(new_tf.regs[REG_V0]))
        } else {
            self.envs[ind].env_tf = new_tf;
            Ok(SyscallOutcome::Return(0))
        }
    }

    /// halt with the NUL-terminated message at `msg_va`
    fn sys_panic(&mut self, msg_va: VirtAddr) -> ! {
        let mut msg = Vec::new();
        if let Ok(cur) = self.cur_ind() {
            let mut byte = [0u8; 1];
            while msg.len() < MAX_PANIC_MSG
                && self.copy_from_user(cur, msg_va + msg.len(), &mut byte).is_ok()
                && byte[0] != 0
            {
                msg.push(byte[0]);
            }
        }
        let msg = core::str::from_utf8(&msg).unwrap_or("<malformed message>");
        panic!("[{:08x}] user panic: {}", self.cur_env_id(), msg);
    }

    /// Block the caller until a send arrives. A second receive while one is
    /// pending, or a destination above `UTOP`, halts the system.
    fn sys_ipc_recv(&mut self, dstva: VirtAddr, tf: &mut Trapframe) -> SysResult {
        let cur = self.cur_ind()?;
        let env = &mut self.envs[cur];
        if env.env_ipc_receiving {
            panic!("already recving!");
        }
        if is_illegal_va(dstva) {
            panic!("invalid dstva: {:p}", dstva);
        }
        env.env_ipc_receiving = true;
        env.env_ipc_dstva = dstva;
        env.env_status = EnvStatus::NotRunnable;
        tf.regs[REG_V0] = 0;
        self.schedule(tf);
        Ok(SyscallOutcome::Rescheduled)
    }

    /// Deliver to `envid` if it is blocked in receive. A page moves only
    /// when both ends name an address.
    fn sys_ipc_try_send(&mut self, envid: EnvID, value: usize, srcva: VirtAddr, perm: usize) -> SysResult {
        let cur = self.cur_ind()?;
        let ind = self.envid2ind(envid, false)?;
        if !self.envs[ind].env_ipc_receiving {
            return Err(Error::IpcNotRecv);
        }

        let dstva = self.envs[ind].env_ipc_dstva;
        let ipc_perm = if !srcva.is_null() && !dstva.is_null() {
            if is_illegal_va(srcva) {
                return Err(Error::Inval);
            }
            let src_pgdir = self.envs[cur].env_pgdir.ok_or(Error::BadEnv)?;
            let dst_pgdir = self.envs[ind].env_pgdir.ok_or(Error::BadEnv)?;
            let (ppn, _) = src_pgdir.lookup(&self.frames, srcva).map_err(|_| Error::Inval)?;
            dst_pgdir.insert(&mut self.frames, ppn, dstva, perm)?;
            perm
        } else {
            0
        };

        let from = self.envs[cur].env_id;
        let env = &mut self.envs[ind];
        env.env_ipc_perm = ipc_perm;
        env.env_ipc_receiving = false;
        env.env_ipc_from = from;
        env.env_ipc_value = value;
        env.env_status = EnvStatus::Runnable;
        self.publish(ind);
        Ok(SyscallOutcome::Return(0))
    }

    fn syscall(&mut self, id: SyscallID, arg: [usize; 5], tf: &mut Trapframe) -> SysResult {
        match id {
            SyscallID::Putchar => self.sys_putchar(arg[0]),
            SyscallID::GetEnvID => self.sys_get_envid(),
            SyscallID::Yield => self.sys_yield(tf),
            SyscallID::EnvDestroy => self.sys_env_destroy(EnvID::new(arg[0]), tf),
            SyscallID::SetTlbModEntry => {
                self.sys_set_tlb_mod_entry(EnvID::new(arg[0]), arg[1], VirtAddr::new(arg[2]))
            }
            SyscallID::MemAlloc => self.sys_mem_alloc(EnvID::new(arg[0]), VirtAddr::new(arg[1]), arg[2]),
            SyscallID::MemMap => self.sys_mem_map(
                EnvID::new(arg[0]),
                VirtAddr::new(arg[1]),
                EnvID::new(arg[2]),
                VirtAddr::new(arg[3]),
                arg[4],
            ),
            SyscallID::MemUnmap => self.sys_mem_unmap(EnvID::new(arg[0]), VirtAddr::new(arg[1])),
            SyscallID::Exofork => self.sys_exofork(tf),
            SyscallID::SetEnvStatus => self.sys_set_env_status(EnvID::new(arg[0]), arg[1], tf),
            SyscallID::SetTrapframe => {
                self.sys_set_trapframe(EnvID::new(arg[0]), VirtAddr::new(arg[1]), tf)
            }
            SyscallID::Panic => self.sys_panic(VirtAddr::new(arg[0])),
            SyscallID::IpcTrySend => {
                self.sys_ipc_try_send(EnvID::new(arg[0]), arg[1], VirtAddr::new(arg[2]), arg[3])
            }
            SyscallID::IpcRecv => self.sys_ipc_recv(VirtAddr::new(arg[0]), tf),
            SyscallID::SysNo => Err(Error::NoSys),
        }
    }

    /// Syscall entry. Number in `a0`, arguments in the next five registers,
    /// result in `v0`.
    pub fn do_syscall(&mut self, tf: &mut Trapframe) {
        let sysno = tf.regs[REG_A0];
        let id = SyscallID::from(sysno);
        if id == SyscallID::SysNo {
            tf.regs[REG_V0] = errno(Error::NoSys);
            return;
        }
        tf.cp0_epc += 4;
        let arg = [tf.regs[5], tf.regs[6], tf.regs[7], tf.regs[8], tf.regs[9]];
        match self.syscall(id, arg, tf) {
            Ok(SyscallOutcome::Return(v)) => tf.regs[REG_V0] = v,
            Ok(SyscallOutcome::Rescheduled) => {}
            Err(e) => {
                let e = if e == Error::NotMapped { Error::Inval } else { e };
                log::debug!("[{:08x}] syscall {:?} refused: {}", self.cur_env_id(), id, e);
                tf.regs[REG_V0] = errno(e);
            }
        }
    }
}
