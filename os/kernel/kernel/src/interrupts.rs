//! # Trap dispatch
//!
//! The low-level entry stubs save the trap frame on the kernel stack of the
//! running task and hand the kernel a [`Trap`]: the vector, the error code,
//! the faulting address and whether the CPU came from ring 3.
//!
//! | vector      | handling                                               |
//! |-------------|--------------------------------------------------------|
//! | 0..=19      | exceptions; 14 is the page fault                       |
//! | 32          | timer tick: wake sleepers, charge runtime, yield       |
//! | 33          | keyboard                                               |
//! | 39          | spurious IRQ 7, acknowledged only when in service      |
//! | `0x80`      | system call                                            |
//! | `0xF1`      | reschedule IPI                                         |
//! | `0xF2`      | TLB shootdown IPI                                      |
//!
//! Any other vector is acknowledged and otherwise ignored.

mod page_fault;
mod spurious;
mod timer;

pub use self::page_fault::{PAGE_FAULT_VECTOR, PageFaultError};
pub use self::spurious::{SPURIOUS_IRQ, SPURIOUS_VECTOR};
pub use self::timer::TIMER_VECTOR;

use crate::platform::Platform;
use crate::{Kernel, KernelFault};
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_sched::{CoreId, RESCHEDULE_VECTOR, TLB_SHOOTDOWN_VECTOR};
use kernel_syscall::SYSCALL_VECTOR;
use log::{error, warn};

/// Highest architectural exception vector the kernel installs.
pub const LAST_EXCEPTION_VECTOR: u8 = 19;

pub const KEYBOARD_VECTOR: u8 = 33;

/// What the entry stub reports about one trap.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Trap {
    pub vector: u8,
    /// Error code pushed by the CPU, 0 where there is none.
    pub error_code: u64,
    /// `CR2` for page faults.
    pub fault_address: u64,
    /// The interrupted context ran in ring 3.
    pub from_user: bool,
}

impl Trap {
    #[must_use]
    pub const fn new(vector: u8, from_user: bool) -> Self {
        Self {
            vector,
            error_code: 0,
            fault_address: 0,
            from_user,
        }
    }

    #[must_use]
    pub const fn syscall() -> Self {
        Self::new(SYSCALL_VECTOR, true)
    }

    #[must_use]
    pub const fn page_fault(addr: u64, error: PageFaultError, from_user: bool) -> Self {
        Self {
            vector: PAGE_FAULT_VECTOR,
            error_code: error.into_bits(),
            fault_address: addr,
            from_user,
        }
    }

    #[must_use]
    pub const fn is_exception(&self) -> bool {
        self.vector <= LAST_EXCEPTION_VECTOR
    }
}

impl<P: Platform, M: PhysMapper, A: FrameAlloc> Kernel<'_, P, M, A> {
    /// Handle one trap on `core`.
    ///
    /// Returns after the interrupted context, or whichever task the
    /// scheduler picked instead, is ready to resume.
    ///
    /// # Errors
    /// A [`KernelFault`] when the trap hit kernel code. The caller halts.
    pub fn handle_trap(&self, core: CoreId, trap: Trap) -> Result<(), KernelFault> {
        match trap.vector {
            PAGE_FAULT_VECTOR => self.page_fault(core, &trap),
            _ if trap.is_exception() => self.exception(core, &trap),
            TIMER_VECTOR => {
                self.timer_tick(core);
                Ok(())
            }
            KEYBOARD_VECTOR => {
                self.services.keyboard.handle_interrupt();
                self.platform.end_of_interrupt(core);
                Ok(())
            }
            SPURIOUS_VECTOR => {
                self.spurious(core);
                Ok(())
            }
            SYSCALL_VECTOR if trap.from_user => self.syscall(core),
            RESCHEDULE_VECTOR => {
                self.platform.end_of_interrupt(core);
                let next = self.scheduler.yield_now(core, &self.processes);
                self.switch(core, next);
                Ok(())
            }
            TLB_SHOOTDOWN_VECTOR => {
                self.platform.flush_tlb_local(core);
                self.platform.end_of_interrupt(core);
                Ok(())
            }
            _ => {
                self.platform.end_of_interrupt(core);
                Ok(())
            }
        }
    }

    /// [`Kernel::handle_trap`], halting the core on a kernel fault. This is
    /// what the entry stubs call.
    pub fn dispatch(&self, core: CoreId, trap: Trap) {
        if let Err(fault) = self.handle_trap(core, trap) {
            error!("{fault}");
            self.platform.halt(core);
        }
    }

    fn exception(&self, core: CoreId, trap: &Trap) -> Result<(), KernelFault> {
        if !trap.from_user {
            return Err(KernelFault::Exception {
                core,
                vector: trap.vector,
                error_code: trap.error_code,
            });
        }
        let task = self.running(core)?;
        warn!(
            "{} killed by exception {} (error code {:#x})",
            self.processes.pid(task),
            trap.vector,
            trap.error_code
        );
        self.exit_current(core, task);
        Ok(())
    }
}
