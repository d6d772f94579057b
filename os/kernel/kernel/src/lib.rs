//! # Kernel Core
//!
//! Ties the frame allocator, address spaces, process table and per-core
//! scheduler together behind the trap dispatcher.
//!
//! ```text
//!  low-level entry stubs ──► Kernel::handle_trap(core, Trap)
//!                              │
//!          ┌───────────────────┼──────────────────────┬──────────────┐
//!          ▼                   ▼                      ▼              ▼
//!       timer (32)        page fault (14)        int 0x80       IPIs 0xF1/0xF2
//!   tick, wake TIMER,   grow heap / break COW   syscall table   reschedule /
//!   charge, yield       or kill the process      (0..=27)       local flush
//! ```
//!
//! The raw IDT plumbing, the file system, the network stack and the console
//! are collaborators reached through the traits in [`platform`]. Everything
//! else runs unchanged on the host, which is how the tests drive it.
//!
//! The dispatcher is the only place that turns a failure into a process
//! termination (user mode) or a [`KernelFault`] (kernel mode).

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod boot;
pub mod interrupts;
pub mod platform;
mod switch;
mod syscall;

pub use crate::interrupts::Trap;
pub use crate::platform::{Console, Keyboard, NetError, NetStack, Platform, Services};

use core::sync::atomic::AtomicU64;
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_info::config::KernelConfig;
use kernel_memory_addresses::VirtualAddress;
use kernel_proc::{ProcessError, ProcessTable};
use kernel_sched::{CoreId, Scheduler};

/// The running kernel: one instance shared by every core.
pub struct Kernel<'m, P: Platform, M: PhysMapper, A: FrameAlloc> {
    pub(crate) config: KernelConfig,
    pub(crate) platform: P,
    pub(crate) processes: ProcessTable<'m, M, A>,
    pub(crate) scheduler: Scheduler,
    pub(crate) services: Services,
    /// Advanced by the bootstrap core's timer only.
    pub(crate) ticks: AtomicU64,
    pub(crate) total_memory: u64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootError {
    #[error("firmware reported no usable memory")]
    NoUsableMemory,
    #[error("{slots} process slots cannot host {cores} idle tasks and a process")]
    TableTooSmall { slots: usize, cores: usize },
    #[error("{0} was never enumerated")]
    NoSuchCore(CoreId),
    #[error("{0} is already online")]
    AlreadyOnline(CoreId),
    #[error("idle task: {0}")]
    Idle(#[from] ProcessError),
}

/// A trap the kernel cannot survive.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelFault {
    #[error("exception {vector} (error code {error_code:#x}) in kernel mode on {core}")]
    Exception {
        core: CoreId,
        vector: u8,
        error_code: u64,
    },
    #[error("page fault at {addr} in kernel mode on {core}")]
    PageFault { core: CoreId, addr: VirtualAddress },
    #[error("user trap on {0} without a running process")]
    NoProcess(CoreId),
}

/// Install the QEMU debug-port logger. `core_id` reports the calling core.
///
/// # Errors
/// A logger was already installed.
#[cfg(feature = "qemu")]
pub fn init_logging(
    level: log::LevelFilter,
    core_id: fn() -> usize,
) -> Result<(), log::SetLoggerError> {
    static PORT: kernel_qemu::QemuPort = kernel_qemu::QemuPort;
    kernel_qemu::QemuLogger::new(&PORT, level)
        .with_core_source(core_id)
        .init()
}
