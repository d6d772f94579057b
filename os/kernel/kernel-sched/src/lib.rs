//! # Per-core scheduling and SMP bookkeeping
//!
//! Every core owns a [`RunQueues`] instance behind its own lock:
//!
//! ```text
//!  cpu0                    cpu1
//! ┌──────────────────┐    ┌──────────────────┐
//! │ current, idle    │    │ current, idle    │
//! │ ready[0..4] FIFO │◄───┤ steal when empty │
//! │ waiting (chan)   │    │ waiting (chan)   │
//! │ zombies (pid)    │    │ zombies (pid)    │
//! └──────────────────┘    └──────────────────┘
//! ```
//!
//! There is no global run queue and no global scheduler lock. A core that
//! runs dry scans the other cores in id order and takes the first ready
//! task it finds, holding one foreign queue lock at a time.
//!
//! The scheduler never owns task state. It is handed a [`Tasks`]
//! implementation (the process table) and reports every transition through
//! it, so the state recorded in a process slot always agrees with the queue
//! holding the task.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod run_queue;
mod scheduler;
mod smp;

pub use crate::run_queue::RunQueues;
pub use crate::scheduler::Scheduler;
pub use crate::smp::{
    Core, CoreSet, IpiKind, IpiSender, RESCHEDULE_VECTOR, TLB_SHOOTDOWN_VECTOR,
};
use core::fmt;

/// Index of a process-table slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskId(usize);

impl TaskId {
    #[inline]
    #[must_use]
    pub const fn new(slot: usize) -> Self {
        Self(slot)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Logical core index, `0..CoreSet::len()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct CoreId(usize);

impl CoreId {
    pub const BOOT: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

/// Process identifier. `0` belongs to the idle tasks only.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Pid(u32);

impl Pid {
    pub const IDLE: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Opaque tag pairing a `sleep` with the `wake` that ends it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WaitChannel(i64);

impl WaitChannel {
    /// Woken by every timer tick on the sleeper's core.
    pub const TIMER: Self = Self(-1);
    /// Woken whenever a process on the same core exits.
    pub const CHILD_EXIT: Self = Self(-3);

    #[inline]
    #[must_use]
    pub const fn new(tag: i64) -> Self {
        Self(tag)
    }

    #[inline]
    #[must_use]
    pub const fn tag(self) -> i64 {
        self.0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum TaskState {
    #[default]
    Unused,
    Initializing,
    Running,
    Ready,
    Sleeping,
    Killed,
}

/// The scheduler's view of the process table.
pub trait Tasks {
    /// Priority class used when `task` is next enqueued.
    fn priority(&self, task: TaskId) -> u8;

    /// Record that `task` entered `state` on `core`.
    fn mark(&self, task: TaskId, state: TaskState, core: CoreId);
}

/// Outcome of a scheduling decision on one core.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Switch {
    pub prev: TaskId,
    pub next: TaskId,
}

impl Switch {
    /// The running task keeps the core.
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.prev == self.next
    }
}
