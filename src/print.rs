use core::fmt::{self, Write};

use spin::Mutex;

/// byte sink of the console device
pub type ConsoleSink = fn(u8);

static CONSOLE: Mutex<Option<ConsoleSink>> = Mutex::new(None);

/// route console output to `sink`. Until a sink is set output is dropped.
pub fn set_console(sink: ConsoleSink) {
    *CONSOLE.lock() = Some(sink);
}

pub fn printcharc(byte: u8) {
    let sink = *CONSOLE.lock();
    if let Some(sink) = sink {
        if byte == b'\n' {
            sink(b'\r');
        }
        sink(byte);
    }
}

// Stdout to the console sink.
pub struct Stdout;

impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            printcharc(byte);
        }
        Ok(())
    }
}

/// kernel print implementation.
pub fn _print(args: fmt::Arguments) {
    let _ = Stdout.write_fmt(args);
}

/// print to console.
#[macro_export]
macro_rules! print {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::print::_print(format_args!($fmt $(, $($arg)+)?));
    };
}

/// println to console,
#[macro_export]
macro_rules! println {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::print::_print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?));
    };
}
