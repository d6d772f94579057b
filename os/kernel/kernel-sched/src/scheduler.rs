//! # Scheduling decisions
//!
//! All operations act on the calling core. `schedule` only picks the next
//! task; performing the switch (saving the outgoing context, swapping
//! address spaces) is the caller's job.
//!
//! A task put back on a ready queue by [`Scheduler::yield_now`] becomes
//! visible to stealing cores before the switch away from it has saved its
//! context. The context handoff must therefore wait until the outgoing
//! context is published before resuming it elsewhere.

use crate::{CoreId, CoreSet, IpiKind, IpiSender, Pid, Switch, TaskId, TaskState, Tasks, WaitChannel};
use alloc::vec::Vec;
use log::trace;

#[derive(Debug)]
pub struct Scheduler {
    cores: CoreSet,
}

impl Scheduler {
    #[must_use]
    pub const fn new(cores: CoreSet) -> Self {
        Self { cores }
    }

    #[inline]
    #[must_use]
    pub const fn cores(&self) -> &CoreSet {
        &self.cores
    }

    /// Make `idle` the fallback and current task of `core`.
    pub fn install_idle(&self, core: CoreId, idle: TaskId) {
        self.cores.core(core).with_queues(|q| q.install_idle(idle));
    }

    #[must_use]
    pub fn current(&self, core: CoreId) -> Option<TaskId> {
        self.cores.core(core).with_queues(|q| q.current())
    }

    #[must_use]
    pub fn is_idle(&self, core: CoreId, task: TaskId) -> bool {
        self.cores.core(core).with_queues(|q| q.is_idle(task))
    }

    /// Mark `task` ready on `core` and append it to its priority class.
    /// The idle task is never queued.
    pub fn enqueue<T: Tasks + ?Sized>(&self, core: CoreId, task: TaskId, tasks: &T) {
        if self.is_idle(core, task) {
            return;
        }
        let priority = tasks.priority(task);
        tasks.mark(task, TaskState::Ready, core);
        self.cores
            .core(core)
            .with_queues(|q| q.push_ready(task, priority));
        trace!("{core}: {task} ready at priority {priority}");
    }

    /// Pick the next task for `core`: local classes highest first, then the
    /// other cores in id order, then the idle task.
    ///
    /// The outgoing task must already be queued, parked or retired.
    ///
    /// # Panics
    /// If `core` has no idle task installed.
    pub fn schedule<T: Tasks + ?Sized>(&self, core: CoreId, tasks: &T) -> Switch {
        let local = self.cores.core(core);
        let (prev, found, idle) = local.with_queues(|q| (q.current(), q.pop_ready(), q.idle()));
        let (Some(prev), Some(idle)) = (prev, idle) else {
            panic!("{core} scheduled before its idle task was installed");
        };

        let next = found.or_else(|| self.steal(core)).unwrap_or(idle);
        tasks.mark(next, TaskState::Running, core);
        local.with_queues(|q| q.set_current(next));

        if prev != next {
            trace!("{core}: {prev} -> {next}");
        }
        Switch { prev, next }
    }

    fn steal(&self, thief: CoreId) -> Option<TaskId> {
        self.cores
            .iter()
            .filter(|c| c.id() != thief)
            .find_map(|victim| {
                let task = victim.with_queues(|q| q.pop_ready())?;
                trace!("{thief} stole {task} from {}", victim.id());
                Some(task)
            })
    }

    /// Put the running task back at the tail of its class and reschedule.
    pub fn yield_now<T: Tasks + ?Sized>(&self, core: CoreId, tasks: &T) -> Switch {
        if let Some(current) = self.current(core) {
            self.enqueue(core, current, tasks);
        }
        self.schedule(core, tasks)
    }

    /// Park the running task on `channel` and reschedule.
    ///
    /// # Panics
    /// If the running task is the idle task.
    pub fn sleep<T: Tasks + ?Sized>(&self, core: CoreId, channel: WaitChannel, tasks: &T) -> Switch {
        let current = self.running_non_idle(core, "sleep");
        tasks.mark(current, TaskState::Sleeping, core);
        self.cores
            .core(core)
            .with_queues(|q| q.park(current, channel));
        trace!("{core}: {current} sleeps on {}", channel.tag());
        self.schedule(core, tasks)
    }

    /// Make every sleeper on `channel` in **this core's** wait queue ready
    /// and ask the other cores to reschedule. Sleepers parked on other cores
    /// are not touched.
    pub fn wake<T: Tasks + ?Sized, I: IpiSender + ?Sized>(
        &self,
        core: CoreId,
        channel: WaitChannel,
        tasks: &T,
        ipi: &I,
    ) -> usize {
        let woken: Vec<TaskId> = self
            .cores
            .core(core)
            .with_queues(|q| q.take_waiting(channel));
        for &task in &woken {
            self.enqueue(core, task, tasks);
        }
        if !woken.is_empty() {
            trace!("{core}: woke {} on {}", woken.len(), channel.tag());
            self.reschedule_other_cpus(core, ipi);
        }
        woken.len()
    }

    /// Move the running task to the kill queue under `pid`. The caller
    /// schedules away afterwards and never resumes it.
    ///
    /// # Panics
    /// If the running task is the idle task.
    pub fn retire<T: Tasks + ?Sized>(&self, core: CoreId, pid: Pid, tasks: &T) -> TaskId {
        let current = self.running_non_idle(core, "exit");
        tasks.mark(current, TaskState::Killed, core);
        self.cores
            .core(core)
            .with_queues(|q| q.push_zombie(current, pid));
        current
    }

    /// Remove a zombie from this core's kill queue. `None` matches any pid.
    pub fn take_zombie(&self, core: CoreId, pid: Option<Pid>) -> Option<(TaskId, Pid)> {
        self.cores
            .core(core)
            .with_queues(|q| q.take_zombie(|z| pid.is_none_or(|p| p == z)))
    }

    pub fn reschedule_other_cpus<I: IpiSender + ?Sized>(&self, core: CoreId, ipi: &I) -> usize {
        self.cores.broadcast(core, IpiKind::Reschedule, ipi)
    }

    pub fn tlb_shootdown<I: IpiSender + ?Sized>(&self, core: CoreId, ipi: &I) -> usize {
        self.cores.broadcast(core, IpiKind::TlbShootdown, ipi)
    }

    #[must_use]
    pub fn ready_len(&self, core: CoreId) -> usize {
        self.cores.core(core).with_queues(|q| q.ready_len())
    }

    #[must_use]
    pub fn waiting_len(&self, core: CoreId) -> usize {
        self.cores.core(core).with_queues(|q| q.waiting_len())
    }

    #[must_use]
    pub fn zombie_count(&self, core: CoreId) -> usize {
        self.cores.core(core).with_queues(|q| q.zombie_count())
    }

    fn running_non_idle(&self, core: CoreId, what: &str) -> TaskId {
        let (current, idle) = self
            .cores
            .core(core)
            .with_queues(|q| (q.current(), q.idle()));
        match current {
            Some(task) if current != idle => task,
            _ => panic!("{core}: idle task cannot {what}"),
        }
    }
}
