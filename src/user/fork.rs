use crate::{
    env::{EnvID, EnvStatus},
    err::Error,
    exception::traps::TF_WORDS,
    memory::{
        mmu::{VirtAddr, PAGE_SIZE, PTE_COW, PTE_D, PTE_LIBRARY, PTE_V, UCOW, USTACKTOP, UXSTACKTOP},
        page_table::Pte,
    },
    user_panic,
};

use super::UserEnv;

/// How `duplicate` shares the parent's pages with the child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkMode {
    /// writable pages become copy-on-write on both sides
    CopyOnWrite,
    /// every page is shared as is, except the stack which is copy-on-write
    Shared,
}

/// word index of `cp0_badvaddr` in a saved trap frame
const TF_BADVADDR: usize = TF_WORDS - 3;

#[inline]
fn is_stack_page(va: VirtAddr) -> bool {
    va < USTACKTOP && va.pdx() == (USTACKTOP - PAGE_SIZE).pdx()
}

/// Make sure the caller has an exception stack and route its write faults
/// to the trampoline.
pub fn set_pgfault_handler<U: UserEnv + ?Sized>(u: &mut U) -> Result<(), Error> {
    let xstack = UXSTACKTOP - PAGE_SIZE;
    if !(u.vpd(xstack.pdx()).valid() && u.vpt(xstack.vpn()).valid()) {
        u.sys_mem_alloc(EnvID::zero(), xstack, PTE_V | PTE_D)?;
    }
    let entry = u.fault_trampoline();
    u.sys_set_pgfault_handler(EnvID::zero(), entry, UXSTACKTOP)
}

/// COW fault handler: give the faulting page a private writable copy.
/// Any other write fault is a bug in the program.
pub fn pgfault<U: UserEnv + ?Sized>(u: &mut U, va: VirtAddr) {
    let va = va.page_align_down();
    let perm = u.vpt(va.vpn()).perm();
    if perm & PTE_COW == 0 {
        user_panic!(u, "pgfault: {:p} is not a copy-on-write page", va);
    }
    let perm = (perm & !PTE_COW) | PTE_D;

    if let Err(e) = u.sys_mem_alloc(EnvID::zero(), UCOW, perm) {
        user_panic!(u, "pgfault: cannot allocate copy: {}", e);
    }
    for off in (0..PAGE_SIZE).step_by(4) {
        let word = u.load_word(va + off);
        u.store_word(UCOW + off, word);
    }
    if let Err(e) = u.sys_mem_map(EnvID::zero(), UCOW, EnvID::zero(), va, perm) {
        user_panic!(u, "pgfault: cannot map copy: {}", e);
    }
    if let Err(e) = u.sys_mem_unmap(EnvID::zero(), UCOW) {
        user_panic!(u, "pgfault: cannot unmap scratch page: {}", e);
    }
}

/// What the fault trampoline runs with `a0` pointing at the saved frame:
/// fix the fault, then resume the frame.
pub fn handle_tlb_mod<U: UserEnv + ?Sized>(u: &mut U, tf_va: VirtAddr) {
    let badvaddr = u.load_word(tf_va + TF_BADVADDR * 4) as usize;
    pgfault(u, VirtAddr::new(badvaddr));
    if let Err(e) = u.sys_set_trapframe(EnvID::zero(), tf_va) {
        user_panic!(u, "cannot resume after fault: {}", e);
    }
}

/// Map our page at `va` into `envid` at the same address.
fn duppage<U: UserEnv + ?Sized>(u: &mut U, envid: EnvID, va: VirtAddr, pte: Pte, mode: ForkMode) -> Result<(), Error> {
    let perm = pte.perm();
    let private = pte.writable() || pte.is_cow();
    let cow = match mode {
        ForkMode::CopyOnWrite => private && perm & PTE_LIBRARY == 0,
        ForkMode::Shared => private && is_stack_page(va),
    };
    if cow {
        let perm = (perm & !PTE_D) | PTE_COW;
        u.sys_mem_map(EnvID::zero(), va, envid, va, perm)?;
        u.sys_mem_map(EnvID::zero(), va, EnvID::zero(), va, perm)?;
    } else {
        u.sys_mem_map(EnvID::zero(), va, envid, va, perm)?;
    }
    Ok(())
}

/// Create a child with a copy of our address space. Returns the child's
/// id in the parent and zero in the child.
pub fn duplicate<U: UserEnv + ?Sized>(u: &mut U, mode: ForkMode) -> Result<EnvID, Error> {
    set_pgfault_handler(u)?;
    let child = u.sys_exofork()?;
    if child.is_zero() {
        return Ok(child);
    }

    // everything below the exception stack
    let ceiling = UXSTACKTOP - PAGE_SIZE;
    let mut va = VirtAddr::zero();
    while va < ceiling {
        if !u.vpd(va.pdx()).valid() {
            va = VirtAddr::from_indices(va.pdx() + 1, 0);
            continue;
        }
        let pte = u.vpt(va.vpn());
        if pte.valid() {
            duppage(u, child, va, pte, mode)?;
        }
        va += PAGE_SIZE;
    }

    u.sys_mem_alloc(child, UXSTACKTOP - PAGE_SIZE, PTE_V | PTE_D)?;
    let entry = u.fault_trampoline();
    u.sys_set_pgfault_handler(child, entry, UXSTACKTOP)?;
    u.sys_set_env_status(child, EnvStatus::Runnable)?;
    Ok(child)
}

#[inline]
pub fn fork<U: UserEnv + ?Sized>(u: &mut U) -> Result<EnvID, Error> {
    duplicate(u, ForkMode::CopyOnWrite)
}

#[inline]
pub fn sfork<U: UserEnv + ?Sized>(u: &mut U) -> Result<EnvID, Error> {
    duplicate(u, ForkMode::Shared)
}
