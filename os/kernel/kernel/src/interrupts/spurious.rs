use crate::Kernel;
use crate::platform::Platform;
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_sched::CoreId;
use log::trace;

/// Vector of the primary controller's IRQ 7.
pub const SPURIOUS_VECTOR: u8 = 0x27; // 39

pub const SPURIOUS_IRQ: u8 = 7;

impl<P: Platform, M: PhysMapper, A: FrameAlloc> Kernel<'_, P, M, A> {
    /// A spurious IRQ 7 is not in service and must not be acknowledged.
    pub(super) fn spurious(&self, core: CoreId) {
        if self.platform.in_service(core, SPURIOUS_IRQ) {
            self.platform.end_of_interrupt(core);
        } else {
            trace!("{core}: spurious IRQ {SPURIOUS_IRQ}");
        }
    }
}
