//! # Processes
//!
//! The process table and everything a process owns: its address space,
//! kernel stack, trap frame, heap boundary and open files.
//!
//! ```text
//!            spawn / fork
//! Unused ─────────────────► Initializing ──► Ready ◄──► Running
//!   ▲                                          ▲           │
//!   │ reap (wait)                        wake  │           │ sleep
//!   │                                          └─ Sleeping ◄┘
//!   └──────────────────────── Killed ◄──────────── exit ───┘
//! ```
//!
//! Scheduling state is owned by `kernel-sched`; [`ProcessTable`] implements
//! its [`Tasks`](kernel_sched::Tasks) view so every queue transition is
//! mirrored in the slot.
//!
//! ## Locking
//!
//! Every slot has its own [`SpinLock`](kernel_sync::SpinLock). At most one
//! slot lock is held at a time, and never across a call into the scheduler.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod context;
pub mod elf;
pub mod fs;
mod lifecycle;
mod loader;
mod process;
mod table;

pub use crate::context::ContextSlot;
pub use crate::lifecycle::{ExecError, Forked};
pub use crate::loader::{LoadedImage, load_image};
pub use crate::process::{CONTEXT_WORDS, Process};
pub use crate::table::ProcessTable;
pub use kernel_sched::{Pid, TaskId, TaskState};

use crate::elf::ElfError;
use crate::fs::FsError;
use kernel_vmem::{FaultError, VmemError};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error("process table full")]
    TableFull,
    #[error("no such process")]
    NoSuchProcess,
    #[error("bad executable: {0}")]
    BadImage(#[from] ElfError),
    #[error("file: {0}")]
    File(#[from] FsError),
    #[error("descriptor table full")]
    DescriptorTableFull,
    #[error("bad descriptor {0}")]
    BadDescriptor(i64),
    #[error(transparent)]
    Fault(#[from] FaultError),
    #[error(transparent)]
    Memory(#[from] VmemError),
    #[error("invalid user path")]
    InvalidPath,
    #[error("heap boundary out of range")]
    HeapExhausted,
}

impl From<kernel_alloc::FrameAllocError> for ProcessError {
    fn from(value: kernel_alloc::FrameAllocError) -> Self {
        Self::Memory(value.into())
    }
}
