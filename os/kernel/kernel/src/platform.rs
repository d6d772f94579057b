//! Seams to the hardware layer and to the device collaborators.

use alloc::sync::Arc;
use kernel_memory_addresses::PhysicalFrame;
use kernel_proc::ContextSlot;
use kernel_proc::fs::FileSystem;
use kernel_sched::{CoreId, IpiSender};

/// Per-core hardware operations the dispatcher drives.
///
/// The bare-metal implementation wraps the local APIC, CR3, the TSS and
/// the register-swapping switch routine; tests record the calls.
pub trait Platform: IpiSender + Sync {
    /// Load `root` as the translation root of `core`.
    fn activate_address_space(&self, core: CoreId, root: PhysicalFrame);

    /// Kernel stack entered on the next trap from user mode on `core`.
    fn set_kernel_stack(&self, core: CoreId, top: u64);

    /// Push the callee-saved registers, publish the resulting stack pointer
    /// through [`ContextSlot::save`] on `from` and continue on the stack at
    /// `to`. Returns once the outgoing task is resumed.
    fn switch_context(&self, core: CoreId, from: &ContextSlot, to: u64);

    /// Signal end of interrupt to the local interrupt controller.
    fn end_of_interrupt(&self, core: CoreId);

    /// Whether the interrupt controller reports `irq` as in service.
    fn in_service(&self, core: CoreId, irq: u8) -> bool;

    /// Drop every cached translation of `core`.
    fn flush_tlb_local(&self, core: CoreId);

    /// Kernel address that restores a trap frame and returns to user mode.
    fn trap_return_entry(&self) -> u64;

    /// Stop `core` for good.
    fn halt(&self, core: CoreId) -> !;
}

/// Text output for `write`.
pub trait Console: Send + Sync {
    fn write(&self, bytes: &[u8]);
}

/// Keyboard collaborator.
pub trait Keyboard: Send + Sync {
    /// Drain the controller after interrupt 33.
    fn handle_interrupt(&self);

    /// Next buffered character, if any.
    fn read_key(&self) -> Option<u8>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum NetError {
    #[error("no free socket")]
    NoSocket,
    #[error("bad socket {0}")]
    BadSocket(i64),
    #[error("device error")]
    Device,
}

/// Datagram sockets backed by the network stack.
pub trait NetStack: Send + Sync {
    /// # Errors
    /// [`NetError::NoSocket`] when the socket table is full.
    fn socket(&self, kind: i64) -> Result<i64, NetError>;

    /// # Errors
    /// [`NetError::BadSocket`] or a device failure.
    fn send(&self, socket: i64, data: &[u8]) -> Result<usize, NetError>;

    /// Receive one pending datagram into `buf`; 0 when none is pending.
    ///
    /// # Errors
    /// [`NetError::BadSocket`] or a device failure.
    fn recv(&self, socket: i64, buf: &mut [u8]) -> Result<usize, NetError>;
}

/// External services reachable from system calls.
#[derive(Clone)]
pub struct Services {
    pub fs: Arc<dyn FileSystem>,
    pub net: Arc<dyn NetStack>,
    pub console: Arc<dyn Console>,
    pub keyboard: Arc<dyn Keyboard>,
}

impl core::fmt::Debug for Services {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
