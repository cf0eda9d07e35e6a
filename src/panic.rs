use core::panic::PanicInfo;

use crate::println;

/// kernel panic implementation.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("kernel panic: {}", info);
    loop {
        core::hint::spin_loop();
    }
}
