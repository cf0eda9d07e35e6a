pub mod mmu;
pub mod frame;
pub mod page_table;
#[cfg(target_os = "none")]
pub mod heap;

/// bytes reserved for the kernel heap on bare-metal targets
pub const KERNEL_HEAP_SIZE: usize = 0x0100_0000;
