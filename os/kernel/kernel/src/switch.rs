//! Context switches, TLB maintenance and process termination.

use crate::platform::Platform;
use crate::{Kernel, KernelFault};
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_info::memory::{KERNEL_STACK_SIZE, phys_to_kernel_virt};
use kernel_proc::TaskId;
use kernel_sched::{CoreId, Switch, WaitChannel};
use kernel_vmem::TlbFlush;
use log::debug;

impl<P: Platform, M: PhysMapper, A: FrameAlloc> Kernel<'_, P, M, A> {
    /// The non-idle task running on `core`.
    pub(crate) fn running(&self, core: CoreId) -> Result<TaskId, KernelFault> {
        self.scheduler
            .current(core)
            .filter(|&task| !self.scheduler.is_idle(core, task))
            .ok_or(KernelFault::NoProcess(core))
    }

    /// Carry out a scheduling decision: address space, trap stack, then the
    /// register switch itself.
    pub(crate) fn switch(&self, core: CoreId, switch: Switch) {
        if switch.is_noop() {
            return;
        }
        let (space, stack) = self
            .processes
            .with(switch.next, |p| (p.space, p.kernel_stack));
        if let Some(root) = space {
            self.platform.activate_address_space(core, root);
        }
        if let Some(stack) = stack {
            let top = stack.base().as_u64() + KERNEL_STACK_SIZE;
            self.platform.set_kernel_stack(core, phys_to_kernel_virt(top));
        }
        let to = self.processes.context(switch.next).resume();
        self.platform
            .switch_context(core, self.processes.context(switch.prev), to);
    }

    /// Apply a pending flush here and on every other online core.
    pub(crate) fn flush(&self, core: CoreId, flush: TlbFlush) {
        if flush.is_required() {
            self.platform.flush_tlb_local(core);
            self.scheduler.tlb_shootdown(core, &self.platform);
        }
    }

    /// Terminate the process running on `core` and switch away for good.
    /// Its resources stay with the zombie until a `wait` reaps it.
    pub(crate) fn exit_current(&self, core: CoreId, task: TaskId) {
        let pid = self.processes.pid(task);
        self.scheduler.retire(core, pid, &self.processes);
        self.scheduler
            .wake(core, WaitChannel::CHILD_EXIT, &self.processes, &self.platform);
        debug!("{pid} exited on {core}");
        let next = self.scheduler.schedule(core, &self.processes);
        self.switch(core, next);
    }
}
