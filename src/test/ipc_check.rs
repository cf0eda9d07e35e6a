use crate::{
    env::{EnvID, EnvStatus},
    err::Error,
    exception::traps::REG_V0,
    memory::mmu::{VirtAddr, PTE_D, PTE_LIBRARY, PTE_V},
    user::{
        ipc::{ipc_recv, ipc_recv_acked, ipc_send, ipc_send_acked, IpcMessage},
        UserEnv,
    },
};

use super::harness::{Machine, Task};

const SRC: usize = 0x0060_0000;
const DST: usize = 0x0070_0000;

/// Boot two envs and leave the second one blocked in `ipc_recv(dstva)`,
/// with the first one running again.
fn receiver_waiting(dstva: usize) -> (Machine, EnvID, EnvID) {
    let (mut m, _) = Machine::boot(2);
    let sender = m.cur();
    m.sys_yield();
    let receiver = m.cur();
    assert_ne!(sender, receiver);
    m.sys_ipc_recv(VirtAddr::new(dstva)).unwrap();
    assert_eq!(m.cur(), sender);
    let env = m.em.get_env(receiver.envx());
    assert!(env.env_ipc_receiving);
    assert_eq!(env.env_status, EnvStatus::NotRunnable);
    (m, sender, receiver)
}

#[test]
fn send_before_recv_leaves_mailbox_alone() {
    let (mut m, _) = Machine::boot(2);
    let sender = m.cur();
    let other = m
        .em
        .envs
        .iter()
        .find(|e| e.env_status == EnvStatus::Runnable && e.env_id != sender)
        .unwrap()
        .env_id;
    for _ in 0..2 {
        assert_eq!(
            m.sys_ipc_try_send(other, 5, VirtAddr::zero(), 0),
            Err(Error::IpcNotRecv)
        );
    }
    let env = m.em.get_env(other.envx());
    assert_eq!(env.env_ipc_value, 0);
    assert!(env.env_ipc_from.is_zero());
    assert_eq!(env.env_status, EnvStatus::Runnable);
}

#[test]
fn value_is_delivered_exactly_once() {
    let (mut m, sender, receiver) = receiver_waiting(0);
    m.sys_ipc_try_send(receiver, 0x77, VirtAddr::zero(), 0).unwrap();
    assert_eq!(
        m.sys_ipc_try_send(receiver, 0x78, VirtAddr::zero(), 0),
        Err(Error::IpcNotRecv)
    );

    m.sys_yield();
    assert_eq!(m.cur(), receiver);
    // the receive itself returned zero
    assert_eq!(m.tf.regs[REG_V0], 0);
    let rec = m.env_record();
    assert_eq!(rec.env_id, receiver);
    assert_eq!(rec.ipc_value, 0x77);
    assert_eq!(rec.ipc_from, sender);
    assert_eq!(rec.ipc_perm, 0);
}

#[test]
fn page_travels_with_the_value() {
    let (mut m, sender, receiver) = receiver_waiting(DST);
    m.sys_mem_alloc(EnvID::zero(), VirtAddr::new(SRC), PTE_V | PTE_D).unwrap();
    m.store_word(VirtAddr::new(SRC + 16), 0xfeed_f00d);
    let perm = PTE_V | PTE_D | PTE_LIBRARY;
    m.sys_ipc_try_send(receiver, 1, VirtAddr::new(SRC), perm).unwrap();

    let ppn = m.ppn(sender, SRC).unwrap();
    assert_eq!(m.ppn(receiver, DST), Some(ppn));
    assert_eq!(m.em.frames().get_ref(ppn), 2);

    m.sys_yield();
    assert_eq!(m.cur(), receiver);
    let rec = m.env_record();
    assert_eq!(rec.ipc_perm, perm);
    assert_eq!(m.load_word(VirtAddr::new(DST + 16)), 0xfeed_f00d);
    // shared, so writes come back to the sender
    m.store_word(VirtAddr::new(DST), 9);
    assert_eq!(m.peek(sender, SRC), 9);
}

#[test]
fn no_page_when_receiver_declines() {
    let (mut m, _, receiver) = receiver_waiting(0);
    m.sys_mem_alloc(EnvID::zero(), VirtAddr::new(SRC), PTE_V | PTE_D).unwrap();
    let frames_before = m.em.frames().num_free_frames();
    m.sys_ipc_try_send(receiver, 3, VirtAddr::new(SRC), PTE_V | PTE_D).unwrap();
    assert_eq!(m.em.frames().num_free_frames(), frames_before);
    assert!(m.pte(receiver, SRC).is_none());
    let env = m.em.get_env(receiver.envx());
    assert_eq!(env.env_ipc_value, 3);
    assert_eq!(env.env_ipc_perm, 0);
}

/// two tasks; the first one is running
fn pair() -> (Task, Task) {
    let mut tasks = Task::boot(2);
    let receiver = tasks.pop().unwrap();
    let sender = tasks.pop().unwrap();
    (sender, receiver)
}

#[test]
fn acknowledged_round_trip() {
    let (mut sender, receiver) = pair();
    let (s, r) = (sender.id, receiver.id);
    let echo = receiver.spawn(|t| ipc_recv_acked(t, VirtAddr::zero()));
    // we run first, so the first try finds nobody receiving and yields
    ipc_send_acked(&mut sender, r, 41, VirtAddr::zero(), 0);

    let msg = echo.join().unwrap();
    assert_eq!(msg, IpcMessage { value: 41, from: s, perm: 0 });
    sender.with_machine(|m| {
        assert_eq!(m.cur(), s);
        assert_eq!(m.em.get_env(r.envx()).env_status, EnvStatus::Free);
        // boot, back from the yield, back from waiting for the ack
        assert_eq!(m.em.get_env(s.envx()).env_runs, 3);
        let ack = m.env_record();
        assert_eq!((ack.ipc_value, ack.ipc_from), (42, r));
    });
}

#[test]
fn acknowledged_send_carries_a_page() {
    let (mut sender, receiver) = pair();
    let (s, r) = (sender.id, receiver.id);
    let echo = receiver.spawn(|t| {
        let msg = ipc_recv_acked(t, VirtAddr::new(DST));
        (msg, t.load_word(VirtAddr::new(DST + 16)))
    });
    sender.sys_mem_alloc(EnvID::zero(), VirtAddr::new(SRC), PTE_V | PTE_D).unwrap();
    sender.store_word(VirtAddr::new(SRC + 16), 0x5eed);
    let perm = PTE_V | PTE_D | PTE_LIBRARY;
    ipc_send_acked(&mut sender, r, 7, VirtAddr::new(SRC), perm);

    let (msg, word) = echo.join().unwrap();
    assert_eq!(msg, IpcMessage { value: 7, from: s, perm });
    assert_eq!(word, 0x5eed);
    // the receiver is gone, and so is its reference to the page
    sender.with_machine(|m| {
        let ppn = m.ppn(s, SRC).unwrap();
        assert_eq!(m.em.frames().get_ref(ppn), 1);
    });
}

#[test]
#[should_panic(expected = "ipc ack error")]
fn acknowledged_send_rejects_a_wrong_echo() {
    let (mut sender, receiver) = pair();
    let r = receiver.id;
    let _echo = receiver.spawn(|t| {
        let msg = ipc_recv(t, VirtAddr::zero());
        ipc_send(t, msg.from, msg.value + 2, VirtAddr::zero(), 0);
    });
    ipc_send_acked(&mut sender, r, 41, VirtAddr::zero(), 0);
}
