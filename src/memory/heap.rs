//! Kernel heap for bare-metal builds. Hosted builds (tests) use the
//! platform allocator instead.

use buddy_system_allocator::LockedHeap;

use super::KERNEL_HEAP_SIZE;

#[global_allocator]
static HEAP_ALLOCATOR: LockedHeap<32> = LockedHeap::<32>::empty();

static mut HEAP_SPACE: [u8; KERNEL_HEAP_SIZE] = [0; KERNEL_HEAP_SIZE];

/// hand the static heap area to the allocator. Must run before anything
/// touches `alloc`.
pub fn init_heap() {
    unsafe {
        let start = core::ptr::addr_of_mut!(HEAP_SPACE) as usize;
        HEAP_ALLOCATOR.lock().init(start, KERNEL_HEAP_SIZE);
    }
}
