use crate::{
    env::{EnvID, EnvStatus},
    exception::traps::REG_V0,
    memory::mmu::{VirtAddr, PAGE_SIZE, PTE_D, PTE_LIBRARY, PTE_V, USTACKTOP, UXSTACKTOP},
    user::{
        fork::{fork, set_pgfault_handler, sfork},
        UserEnv,
    },
};

use super::harness::{Machine, DATA, TEXT, TRAMPOLINE};

const STACK: usize = USTACKTOP.as_usize() - PAGE_SIZE;
const RDONLY: usize = 0x0050_0000;
const LIBRARY: usize = 0x0050_1000;

fn is_cow(m: &Machine, id: EnvID, va: usize) -> bool {
    let pte = m.pte(id, va).unwrap();
    pte.is_cow() && !pte.writable()
}

#[test]
fn cow_sharing_after_fork() {
    let (mut m, ids) = Machine::boot(1);
    let parent = ids[0];
    m.sys_mem_alloc(EnvID::zero(), VirtAddr::new(RDONLY), PTE_V).unwrap();
    m.sys_mem_alloc(EnvID::zero(), VirtAddr::new(LIBRARY), PTE_V | PTE_D | PTE_LIBRARY)
        .unwrap();

    let child = fork(&mut m).unwrap();
    assert!(!child.is_zero());
    assert_eq!(m.cur(), parent);

    for va in [TEXT, DATA, STACK] {
        assert!(is_cow(&m, parent, va), "parent {:#x}", va);
        assert!(is_cow(&m, child, va), "child {:#x}", va);
        let ppn = m.ppn(parent, va).unwrap();
        assert_eq!(m.ppn(child, va), Some(ppn));
        assert_eq!(m.em.frames().get_ref(ppn), 2);
    }
    // plain read-only and library pages are shared as they are
    for va in [RDONLY, LIBRARY] {
        let (p, c) = (m.pte(parent, va).unwrap(), m.pte(child, va).unwrap());
        assert_eq!(p, c);
        assert!(!c.is_cow());
    }
    assert!(m.pte(child, LIBRARY).unwrap().writable());

    // the exception stack is never shared
    let xstack = UXSTACKTOP.as_usize() - PAGE_SIZE;
    assert_ne!(m.ppn(parent, xstack), m.ppn(child, xstack));
    assert!(m.pte(child, xstack).unwrap().writable());

    let e = m.em.get_env(child.envx());
    assert_eq!(e.env_status, EnvStatus::Runnable);
    assert_eq!(e.env_parent_id, parent);
    assert_eq!(e.env_user_tlb_mod_entry, TRAMPOLINE);
    assert_eq!(e.env_xstacktop, UXSTACKTOP);
}

#[test]
fn writes_split_cow_pages() {
    let (mut m, ids) = Machine::boot(1);
    let parent = ids[0];
    let child = fork(&mut m).unwrap();
    let shared = m.ppn(parent, DATA).unwrap();

    // parent writes: private copy, child still sees the old value
    m.store_word(VirtAddr::new(DATA), 0x1111);
    assert_eq!(m.peek(parent, DATA), 0x1111);
    assert_eq!(m.peek(child, DATA), 0xc0de_0001);
    let pte = m.pte(parent, DATA).unwrap();
    assert!(pte.writable() && !pte.is_cow());
    assert_ne!(pte.ppn(), shared);
    assert_eq!(m.ppn(child, DATA), Some(shared));
    assert_eq!(m.em.frames().get_ref(shared), 1);
    // the rest of the page came along
    assert_eq!(m.peek(parent, DATA + 4), 0);
    // scratch page is gone again
    assert!(m.pte(parent, 0x003f_f000).is_none());

    // the child runs next and sees zero from the fork
    m.sys_yield();
    assert_eq!(m.cur(), child);
    assert_eq!(m.tf.regs[REG_V0], 0);
    m.store_word(VirtAddr::new(DATA + 8), 0x2222);
    assert_eq!(m.peek(child, DATA + 8), 0x2222);
    assert_eq!(m.peek(parent, DATA + 8), 0);
    assert!(!m.pte(child, DATA).unwrap().is_cow());
    assert_ne!(m.ppn(child, DATA), m.ppn(parent, DATA));
}

#[test]
fn fork_without_writable_pages() {
    let (mut m, ids) = Machine::boot(1);
    let parent = ids[0];
    for va in [TEXT, DATA, STACK] {
        let va = VirtAddr::new(va);
        m.sys_mem_map(EnvID::zero(), va, EnvID::zero(), va, PTE_V).unwrap();
    }
    let child = fork(&mut m).unwrap();
    for va in [TEXT, DATA, STACK] {
        assert!(!m.pte(parent, va).unwrap().is_cow());
        let pte = m.pte(child, va).unwrap();
        assert!(!pte.is_cow() && !pte.writable());
    }
    assert_eq!(m.em.get_env(child.envx()).env_status, EnvStatus::Runnable);
    m.sys_yield();
    assert_eq!(m.cur(), child);
}

#[test]
fn sfork_shares_everything_but_the_stack() {
    let (mut m, ids) = Machine::boot(1);
    let parent = ids[0];
    let child = sfork(&mut m).unwrap();

    let data = m.pte(parent, DATA).unwrap();
    assert_eq!(m.pte(child, DATA), Some(data));
    assert!(data.writable() && !data.is_cow());
    assert_eq!(m.em.frames().get_ref(data.ppn()), 2);
    assert!(is_cow(&m, parent, STACK) && is_cow(&m, child, STACK));

    // writes through the shared page are seen by both
    m.store_word(VirtAddr::new(DATA), 0x3333);
    assert_eq!(m.peek(child, DATA), 0x3333);

    m.sys_env_destroy(child).unwrap();
    assert_eq!(m.em.frames().get_ref(data.ppn()), 1);
}

#[test]
#[should_panic(expected = "is not a copy-on-write page")]
fn write_fault_on_plain_read_only_page() {
    let (mut m, _) = Machine::boot(1);
    set_pgfault_handler(&mut m).unwrap();
    m.sys_mem_alloc(EnvID::zero(), VirtAddr::new(RDONLY), PTE_V).unwrap();
    m.store_word(VirtAddr::new(RDONLY), 1);
}

#[test]
#[should_panic(expected = "no user handler registered")]
fn write_fault_without_handler() {
    let (mut m, _) = Machine::boot(1);
    m.sys_mem_alloc(EnvID::zero(), VirtAddr::new(RDONLY), PTE_V).unwrap();
    m.store_word(VirtAddr::new(RDONLY), 1);
}

#[test]
#[should_panic(expected = "exception stack")]
fn write_fault_without_exception_stack() {
    let (mut m, _) = Machine::boot(1);
    m.sys_set_pgfault_handler(EnvID::zero(), TRAMPOLINE, UXSTACKTOP).unwrap();
    m.sys_mem_alloc(EnvID::zero(), VirtAddr::new(RDONLY), PTE_V).unwrap();
    m.store_word(VirtAddr::new(RDONLY), 1);
}
