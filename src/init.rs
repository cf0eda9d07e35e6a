use lazy_static::lazy_static;
use log::LevelFilter;
use spin::Mutex;

use crate::{env::EnvManager, exception::traps::Trapframe, logger};

/// Machine parameters handed over by the boot code.
#[derive(Clone, Copy, Debug)]
pub struct BootConfig {
    /// bytes of physical memory
    pub memsize: usize,
    /// bytes at the bottom of memory taken by the kernel image
    pub reserved: usize,
    pub log_level: LevelFilter,
}

impl Default for BootConfig {
    fn default() -> Self {
        BootConfig {
            memsize: 8 * 1024 * 1024,
            reserved: 512 * 1024,
            log_level: LevelFilter::Info,
        }
    }
}

lazy_static! {
    /// The kernel instance, set up by `Init::init`.
    pub static ref KERNEL: Mutex<Option<EnvManager>> = Mutex::new(None);
}

pub struct Init;

impl Init {
    /// Build the kernel, create one environment per image and dispatch the
    /// first runnable one into `tf`. Any failure here is fatal.
    pub fn init(&mut self, config: BootConfig, images: &[&[u8]], tf: &mut Trapframe) {
        #[cfg(target_os = "none")]
        crate::memory::heap::init_heap();
        logger::init(config.log_level);
        log::info!(
            "mos init: {} KiB memory, {} KiB kernel",
            config.memsize / 1024,
            config.reserved / 1024
        );

        let mut em = EnvManager::new(config.memsize, config.reserved);
        for (i, image) in images.iter().enumerate() {
            match em.create(image) {
                Ok(id) => log::info!("created env {:08x} from image {}", id, i),
                Err(e) => panic!("cannot create env from image {}: {}", i, e),
            }
        }
        em.schedule(tf);
        *KERNEL.lock() = Some(em);
    }
}

fn with_kernel(tf: *mut Trapframe, f: impl FnOnce(&mut EnvManager, &mut Trapframe)) {
    let mut kernel = KERNEL.lock();
    let em = match kernel.as_mut() {
        Some(em) => em,
        None => panic!("trap before kernel init"),
    };
    // SAFETY: the trap entry passes its own save area, live for the call
    let tf = unsafe { &mut *tf };
    f(em, tf)
}

/// syscall trap entry
#[no_mangle]
pub extern "C" fn do_syscall(tf: *mut Trapframe) {
    with_kernel(tf, |em, tf| em.do_syscall(tf));
}

/// TLB-modify exception entry
#[no_mangle]
pub extern "C" fn do_tlb_mod(tf: *mut Trapframe) {
    with_kernel(tf, |em, tf| tf.do_tlb_mod(em));
}

/// run the scheduler, e.g. from the timer interrupt
#[no_mangle]
pub extern "C" fn schedule(tf: *mut Trapframe) {
    with_kernel(tf, |em, tf| em.schedule(tf));
}
