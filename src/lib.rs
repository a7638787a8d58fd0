//! rosh-kernel - an in-process Unix-like kernel
//!
//! Processes are cooperative tasks that talk to the kernel only through
//! syscalls; the kernel keeps a virtual filesystem, pipes, pseudo-terminals
//! and a process table, all inside the host program.
//!
//! Design principles:
//! - Tractable: bounded complexity, comprehensible by one human
//! - One task runs at a time, so kernel state needs no locks
//! - No ambient globals: the host owns its [`Kernel`]
//!
//! ```no_run
//! use rosh_kernel::KernelBuilder;
//!
//! let kernel = KernelBuilder::new().build()?;
//! kernel.spawn("echo", vec!["hello".into()])?;
//! kernel.run();
//! assert_eq!(kernel.take_console_output(), b"hello\r\n");
//! # Ok::<(), rosh_kernel::KernelError>(())
//! ```

pub mod config;
pub mod error;
pub mod kernel;
pub mod logger;
pub mod programs;
pub mod vfs;

pub use config::KernelConfig;
pub use error::{KResult, KernelError};
pub use kernel::{Connection, Kernel, KernelBuilder, ProcessContext, Program, Sys};

/// Log to stderr
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        eprintln!($($t)*)
    };
}
