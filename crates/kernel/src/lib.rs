#![cfg_attr(not(test), no_std)]

//! # Wey kernel
//!
//! The process and memory core of a single-CPU i386 kernel: processes and
//! their tasks, the scheduler and its switch protocol, page-fault policy, and
//! the exec pipeline with its ELF and script loaders. Address spaces come from
//! the [`mm`] crate.
//!
//! Everything here runs against the [`mm::KernelHeap`] collaborator and is
//! tested hosted on emulated memory. The bare-metal glue (boot, descriptor
//! tables, interrupt stubs and the resume trampoline) is only built for
//! `target_os = "none"`.

extern crate alloc;

#[cfg(target_os = "none")]
mod arch;
pub mod config;
pub mod console;
pub mod error;
pub mod exec;
pub mod fault;
pub mod interrupts;
pub mod kernel;
#[cfg(target_os = "none")]
mod mem;
#[cfg(target_os = "none")]
mod modules;
pub mod process;
#[cfg(target_os = "none")]
mod runtime;
pub mod sched;
#[cfg(target_os = "none")]
mod serial;
pub mod task;
#[cfg(test)]
mod testing;
pub mod vfs;

pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use kernel::Kernel;
pub use process::{Pid, Process};
pub use sched::{Dispatch, Scheduler};
pub use task::{Registers, Task, TaskHandle, TaskId, TaskState};

#[cfg(target_os = "none")]
pub use runtime::{handle_panic, kernel_main};
