// User-level IPC library routines

use crate::{
    env::EnvID,
    err::Error,
    memory::mmu::VirtAddr,
    user_panic,
};

use super::UserEnv;

/// A delivered message as left in the receiver's mailbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpcMessage {
    pub value: usize,
    pub from: EnvID,
    /// zero when no page came with the value
    pub perm: usize,
}

/// Send `val` (and the page at `srcva`, if any) to `whom`, yielding until
/// it is ready to receive. Any error other than `IpcNotRecv` is fatal.
pub fn ipc_send<U: UserEnv + ?Sized>(u: &mut U, whom: EnvID, val: usize, srcva: VirtAddr, perm: usize) {
    loop {
        match u.sys_ipc_try_send(whom, val, srcva, perm) {
            Ok(()) => return,
            Err(Error::IpcNotRecv) => u.sys_yield(),
            Err(e) => user_panic!(u, "error in ipc_send: {}", e),
        }
    }
}

/// Block until a message arrives. A page sent along lands at `dstva`
/// when that is non-zero.
pub fn ipc_recv<U: UserEnv + ?Sized>(u: &mut U, dstva: VirtAddr) -> IpcMessage {
    if let Err(e) = u.sys_ipc_recv(dstva) {
        user_panic!(u, "error in ipc_recv: {}", e);
    }
    let env = u.env_record();
    IpcMessage {
        value: env.ipc_value,
        from: env.ipc_from,
        perm: env.ipc_perm,
    }
}

/// `ipc_send`, then wait for the receiver to echo `val + 1`.
pub fn ipc_send_acked<U: UserEnv + ?Sized>(u: &mut U, whom: EnvID, val: usize, srcva: VirtAddr, perm: usize) {
    ipc_send(u, whom, val, srcva, perm);
    let ack = ipc_recv(u, VirtAddr::zero());
    if ack.value != val.wrapping_add(1) {
        user_panic!(
            u,
            "ipc ack error: sent {:#x} to {:08x}, got {:#x} from {:08x}",
            val,
            whom,
            ack.value,
            ack.from
        );
    }
}

/// `ipc_recv`, then acknowledge with `value + 1` to the sender.
pub fn ipc_recv_acked<U: UserEnv + ?Sized>(u: &mut U, dstva: VirtAddr) -> IpcMessage {
    let msg = ipc_recv(u, dstva);
    ipc_send(u, msg.from, msg.value.wrapping_add(1), VirtAddr::zero(), 0);
    msg
}
