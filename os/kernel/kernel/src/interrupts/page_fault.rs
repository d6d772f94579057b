use crate::platform::Platform;
use crate::{Kernel, KernelFault, Trap};
use bitfield_struct::bitfield;
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::CoreId;
use log::{trace, warn};

pub const PAGE_FAULT_VECTOR: u8 = 0x0E; // 14

/// Page-fault error code layout (x86-64).
///
/// Reference: Intel SDM Vol. 3A, §6.15.1 "Page-Fault Exception (#PF)".
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page, 1 = protection violation.
    pub present: bool,

    /// 0 = read or execute, 1 = write access.
    pub write: bool,

    /// 1 = the access came from CPL 3.
    pub user: bool,

    /// 1 = reserved bit set in a paging structure.
    pub reserved_bit: bool,

    /// 1 = instruction fetch.
    pub instruction_fetch: bool,

    #[bits(59)]
    __: u64,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "non-present page"
        } else if self.instruction_fetch() {
            "instruction fetch on protected page"
        } else if self.write() {
            "write to protected page"
        } else {
            "read of protected page"
        }
    }
}

impl<P: Platform, M: PhysMapper, A: FrameAlloc> Kernel<'_, P, M, A> {
    /// Grow the heap or break COW sharing for a user fault; a fault that
    /// cannot be resolved ends the process. Kernel-mode faults are fatal:
    /// kernel accesses to user memory go through the checked copy helpers
    /// and never trap.
    pub(super) fn page_fault(&self, core: CoreId, trap: &Trap) -> Result<(), KernelFault> {
        let addr = VirtualAddress::new(trap.fault_address);
        let error = PageFaultError::from_bits(trap.error_code);
        if !trap.from_user {
            return Err(KernelFault::PageFault { core, addr });
        }
        let task = self.running(core)?;
        match self.processes.resolve_fault(task, addr, error.write()) {
            Ok(resolution) => {
                trace!("{core}: fault at {addr} resolved: {resolution:?}");
                self.flush(core, resolution.flush());
            }
            Err(e) => {
                warn!(
                    "{} killed: {} at {addr}: {e}",
                    self.processes.pid(task),
                    error.explain()
                );
                self.exit_current(core, task);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_bits() {
        let err = PageFaultError::from_bits(0b111);
        assert!(err.present() && err.write() && err.user());
        assert_eq!(err.explain(), "write to protected page");
        assert_eq!(PageFaultError::new().explain(), "non-present page");
        assert_eq!(
            PageFaultError::new().with_write(true).into_bits(),
            0b10
        );
    }
}
