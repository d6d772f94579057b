use crate::Kernel;
use crate::platform::Platform;
use core::sync::atomic::Ordering;
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_sched::{CoreId, WaitChannel};

pub const TIMER_VECTOR: u8 = 0x20; // 32

impl<P: Platform, M: PhysMapper, A: FrameAlloc> Kernel<'_, P, M, A> {
    /// One quantum elapsed on `core`: account it, release local timer
    /// sleepers and preempt whatever runs.
    pub(super) fn timer_tick(&self, core: CoreId) {
        if core == CoreId::BOOT {
            self.ticks.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(task) = self.running(core) {
            self.processes.charge_tick(task);
        }
        self.scheduler
            .wake(core, WaitChannel::TIMER, &self.processes, &self.platform);
        self.platform.end_of_interrupt(core);

        let next = self.scheduler.yield_now(core, &self.processes);
        self.switch(core, next);
    }
}
