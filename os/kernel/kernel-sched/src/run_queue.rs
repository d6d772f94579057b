use crate::{Pid, TaskId, WaitChannel};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use kernel_info::config::MAX_PRIORITY;

/// Scheduler state of a single core.
///
/// A task sits in at most one of `ready`, `waiting` and `zombies`, and
/// never in any of them while it is `current`. The idle task is never
/// queued.
#[derive(Debug)]
pub struct RunQueues {
    ready: [VecDeque<TaskId>; MAX_PRIORITY],
    waiting: VecDeque<(TaskId, WaitChannel)>,
    zombies: VecDeque<(TaskId, Pid)>,
    current: Option<TaskId>,
    idle: Option<TaskId>,
}

impl Default for RunQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl RunQueues {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ready: [const { VecDeque::new() }; MAX_PRIORITY],
            waiting: VecDeque::new(),
            zombies: VecDeque::new(),
            current: None,
            idle: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn current(&self) -> Option<TaskId> {
        self.current
    }

    #[inline]
    pub const fn set_current(&mut self, task: TaskId) {
        self.current = Some(task);
    }

    #[inline]
    #[must_use]
    pub const fn idle(&self) -> Option<TaskId> {
        self.idle
    }

    pub const fn install_idle(&mut self, task: TaskId) {
        self.idle = Some(task);
        self.current = Some(task);
    }

    #[inline]
    #[must_use]
    pub fn is_idle(&self, task: TaskId) -> bool {
        self.idle == Some(task)
    }

    /// Append to the tail of the task's class; out-of-range classes land in
    /// the lowest one.
    pub fn push_ready(&mut self, task: TaskId, priority: u8) {
        debug_assert!(!self.is_idle(task), "idle task queued");
        debug_assert!(!self.is_queued(task), "{task} queued twice");
        let class = usize::from(priority).min(MAX_PRIORITY - 1);
        self.ready[class].push_back(task);
    }

    /// Head of the highest non-empty class.
    pub fn pop_ready(&mut self) -> Option<TaskId> {
        self.ready.iter_mut().find_map(VecDeque::pop_front)
    }

    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.ready.iter().map(VecDeque::len).sum()
    }

    pub fn park(&mut self, task: TaskId, channel: WaitChannel) {
        debug_assert!(!self.is_queued(task), "{task} queued twice");
        self.waiting.push_back((task, channel));
    }

    /// Remove and return every sleeper on `channel`, oldest first.
    pub fn take_waiting(&mut self, channel: WaitChannel) -> Vec<TaskId> {
        let mut woken = Vec::new();
        self.waiting.retain(|&(task, ch)| {
            if ch == channel {
                woken.push(task);
                false
            } else {
                true
            }
        });
        woken
    }

    #[must_use]
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn push_zombie(&mut self, task: TaskId, pid: Pid) {
        debug_assert!(!self.is_queued(task), "{task} queued twice");
        self.zombies.push_back((task, pid));
    }

    /// First zombie whose pid satisfies `wanted`.
    pub fn take_zombie(&mut self, wanted: impl Fn(Pid) -> bool) -> Option<(TaskId, Pid)> {
        let pos = self.zombies.iter().position(|&(_, pid)| wanted(pid))?;
        self.zombies.remove(pos)
    }

    #[must_use]
    pub fn zombie_count(&self) -> usize {
        self.zombies.len()
    }

    fn is_queued(&self, task: TaskId) -> bool {
        self.ready.iter().any(|q| q.contains(&task))
            || self.waiting.iter().any(|&(t, _)| t == task)
            || self.zombies.iter().any(|&(t, _)| t == task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(n: usize) -> TaskId {
        TaskId::new(n)
    }

    #[test]
    fn higher_class_first_fifo_within() {
        let mut q = RunQueues::new();
        q.push_ready(t(1), 1);
        q.push_ready(t(2), 0);
        q.push_ready(t(3), 1);
        q.push_ready(t(4), 3);

        let order: Vec<_> = core::iter::from_fn(|| q.pop_ready()).collect();
        assert_eq!(order, [t(2), t(1), t(3), t(4)]);
    }

    #[test]
    fn oversized_priority_lands_in_lowest_class() {
        let mut q = RunQueues::new();
        q.push_ready(t(1), 200);
        q.push_ready(t(2), 2);
        assert_eq!(q.pop_ready(), Some(t(2)));
        assert_eq!(q.pop_ready(), Some(t(1)));
    }

    #[test]
    fn take_waiting_only_matches_channel() {
        let mut q = RunQueues::new();
        q.park(t(1), WaitChannel::TIMER);
        q.park(t(2), WaitChannel::new(7));
        q.park(t(3), WaitChannel::TIMER);

        assert_eq!(q.take_waiting(WaitChannel::TIMER), [t(1), t(3)]);
        assert_eq!(q.waiting_len(), 1);
        assert!(q.take_waiting(WaitChannel::CHILD_EXIT).is_empty());
    }

    #[test]
    fn zombies_are_found_by_pid() {
        let mut q = RunQueues::new();
        q.push_zombie(t(4), Pid::new(10));
        q.push_zombie(t(5), Pid::new(11));

        assert_eq!(q.take_zombie(|p| p == Pid::new(11)), Some((t(5), Pid::new(11))));
        assert_eq!(q.take_zombie(|p| p == Pid::new(11)), None);
        assert_eq!(q.take_zombie(|_| true), Some((t(4), Pid::new(10))));
        assert_eq!(q.zombie_count(), 0);
    }

    #[test]
    #[should_panic(expected = "queued twice")]
    fn double_enqueue_is_caught() {
        let mut q = RunQueues::new();
        q.push_ready(t(1), 1);
        q.park(t(1), WaitChannel::TIMER);
    }
}
