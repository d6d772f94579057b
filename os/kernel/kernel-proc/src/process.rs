//! Process control block.

use crate::fs::OpenFile;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_info::memory::{KERNEL_STACK_SIZE, USER_BASE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_sched::{CoreId, Pid, TaskState};
use kernel_syscall::{SchedInfo, TrapFrame};
use kernel_vmem::HeapLimit;

/// Callee-saved registers plus the return address pushed by the context
/// switch routine.
pub const CONTEXT_WORDS: u64 = 7;

/// Process descriptor; lives in a table slot for the whole table lifetime.
#[derive(Debug)]
pub struct Process {
    pub pid: Pid,
    pub state: TaskState,
    /// Priority class, `0` is the highest.
    pub priority: u8,
    /// Core that last ran or queued the process.
    pub core: CoreId,
    /// Timer ticks charged so far.
    pub runtime: u64,
    /// Root of the address space.
    pub space: Option<PhysicalFrame>,
    /// One granule; the trap frame sits at its top.
    pub kernel_stack: Option<PhysicalFrame>,
    /// Heap boundary.
    pub brk: VirtualAddress,
    /// Descriptor slots; `None` is free.
    pub files: Vec<Option<Arc<OpenFile>>>,
    /// Tick at which a pending `sleep` call completes.
    pub wake_at: Option<u64>,
    pub idle: bool,
}

impl Process {
    #[must_use]
    pub const fn unused() -> Self {
        Self {
            pid: Pid::IDLE,
            state: TaskState::Unused,
            priority: 0,
            core: CoreId::BOOT,
            runtime: 0,
            space: None,
            kernel_stack: None,
            brk: VirtualAddress::new(USER_BASE),
            files: Vec::new(),
            wake_at: None,
            idle: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.state == TaskState::Unused
    }

    #[must_use]
    pub const fn heap(&self, growth_window: u64) -> HeapLimit {
        HeapLimit {
            brk: self.brk,
            growth_window,
        }
    }

    /// Physical address of the trap frame, if the process has a kernel stack.
    #[must_use]
    pub fn trap_frame_addr(&self) -> Option<PhysicalAddress> {
        self.kernel_stack
            .map(|stack| stack.join(KERNEL_STACK_SIZE - TrapFrame::SIZE as u64))
    }

    /// Physical address of the initial saved context below the trap frame.
    #[must_use]
    pub fn initial_context_addr(&self) -> Option<PhysicalAddress> {
        self.kernel_stack.map(|stack| {
            stack.join(KERNEL_STACK_SIZE - TrapFrame::SIZE as u64 - CONTEXT_WORDS * 8)
        })
    }

    /// Lowest free descriptor slot.
    #[must_use]
    pub fn free_descriptor(&self) -> Option<usize> {
        self.files.iter().position(Option::is_none)
    }

    #[must_use]
    pub fn open_files(&self) -> usize {
        self.files.iter().flatten().count()
    }

    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn sched_info(&self) -> SchedInfo {
        SchedInfo {
            pid: self.pid.as_u32() as i32,
            priority: i32::from(self.priority),
            runtime: self.runtime,
            time_slice: 1,
        }
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::unused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_frame_sits_at_the_stack_top() {
        let mut p = Process::unused();
        assert_eq!(p.trap_frame_addr(), None);
        p.kernel_stack = Some(PhysicalFrame::from_addr(PhysicalAddress::new(0x40_0000)));
        let tf = p.trap_frame_addr().unwrap().as_u64();
        assert_eq!(tf + TrapFrame::SIZE as u64, 0x60_0000);
        assert_eq!(p.initial_context_addr().unwrap().as_u64(), tf - 56);
    }

    #[test]
    fn descriptors_fill_lowest_first() {
        let mut p = Process::unused();
        p.files = alloc::vec![None, None, None];
        assert_eq!(p.free_descriptor(), Some(0));
        assert_eq!(p.open_files(), 0);
    }
}
