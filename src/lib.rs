#![cfg_attr(not(test), no_std)]

extern crate alloc;

/// error codes
pub mod err;
/// kernel print.
pub mod print;
/// log backend
pub mod logger;
/// kernel panic.
#[cfg(target_os = "none")]
mod panic;
/// kernel init and trap entries.
pub mod init;
/// memory management.
pub mod memory;
/// environments: pool, scheduler, syscalls
pub mod env;
/// handle exception
pub mod exception;
/// user-level library
pub mod user;
pub mod util;
