//! Lifecycle and scheduling calls.

use super::{Caller, Flow, SysResult};
use crate::Kernel;
use crate::platform::Platform;
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_proc::fs::read_file;
use kernel_proc::{ExecError, Pid, ProcessError};
use kernel_sched::WaitChannel;
use kernel_syscall::{SyscallArgs, SyscallError};
use log::warn;

impl<P: Platform, M: PhysMapper, A: FrameAlloc> Kernel<'_, P, M, A> {
    /// `sleep(ticks)`: the first call records the deadline, every re-issue
    /// after a timer wake-up checks it.
    pub(super) fn sys_sleep(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let ticks = args.get(0)?;
        if ticks <= 0 {
            return Ok(Flow::Return(0));
        }
        let now = self.ticks();
        let expired = self.processes.with(c.task, |p| {
            let deadline = *p
                .wake_at
                .get_or_insert(now.saturating_add(ticks.unsigned_abs()));
            let expired = now >= deadline;
            if expired {
                p.wake_at = None;
            }
            expired
        });
        if expired {
            Ok(Flow::Return(0))
        } else {
            Ok(Flow::Block(WaitChannel::TIMER))
        }
    }

    /// `wait(pid)`: reap a zombie from this core's kill queue, `pid <= 0`
    /// taking any. Blocks until one shows up; a specific pid that names no
    /// process fails instead.
    pub(super) fn sys_wait(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let wanted = args.get(0)?;
        let pid = if wanted <= 0 {
            None
        } else {
            let raw = u32::try_from(wanted).map_err(|_| ProcessError::NoSuchProcess)?;
            Some(Pid::new(raw))
        };

        if let Some((zombie, _)) = self.scheduler.take_zombie(c.core, pid) {
            let reaped = self.processes.reap(zombie);
            return Ok(Flow::Return(i64::from(reaped.as_u32())));
        }
        if let Some(pid) = pid
            && self.processes.find(pid).is_none()
        {
            return Err(ProcessError::NoSuchProcess.into());
        }
        Ok(Flow::Block(WaitChannel::CHILD_EXIT))
    }

    pub(super) fn sys_fork(&self, c: Caller) -> SysResult {
        let forked = self
            .processes
            .fork(c.task, self.platform.trap_return_entry())?;
        self.flush(c.core, forked.flush);
        self.scheduler
            .enqueue(c.core, forked.child, &self.processes);
        self.scheduler
            .reschedule_other_cpus(c.core, &self.platform);
        Ok(Flow::Return(i64::from(forked.pid.as_u32())))
    }

    /// `exec(path)`. A path that cannot be read fails the call; an image
    /// that cannot be loaded ends the process.
    pub(super) fn sys_exec(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let path = self.user_path(c, args, 0)?;
        let bytes = read_file(self.services.fs.as_ref(), &path)?;
        match self.processes.exec(c.task, &bytes) {
            Ok(flush) => {
                self.flush(c.core, flush);
                Ok(Flow::Replaced)
            }
            Err(ExecError { error, flush }) => {
                self.flush(c.core, flush);
                warn!("{} killed by exec {path}: {error}", self.processes.pid(c.task));
                Ok(Flow::Exit)
            }
        }
    }

    /// `sbrk(delta)`: the previous break.
    pub(super) fn sys_sbrk(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let (old, flush) = self.processes.sbrk(c.task, args.get(0)?)?;
        self.flush(c.core, flush);
        let old = i64::try_from(old.as_u64()).map_err(|_| SyscallError::InvalidArgument)?;
        Ok(Flow::Return(old))
    }

    pub(super) fn sys_set_priority(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        self.processes.set_priority(c.task, args.get(0)?);
        Ok(Flow::Return(0))
    }

    pub(super) fn sys_get_priority(&self, c: Caller) -> Flow {
        Flow::Return(i64::from(self.processes.priority(c.task)))
    }

    pub(super) fn sys_get_runtime(&self, c: Caller) -> Flow {
        let runtime = self.processes.sched_info(c.task).runtime;
        Flow::Return(i64::try_from(runtime).unwrap_or(i64::MAX))
    }

    pub(super) fn sys_get_sched_info(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let out = args.pointer(0)?;
        let info = self.processes.sched_info(c.task);
        self.copy_out(c, out, &info.to_bytes())?;
        Ok(Flow::Return(0))
    }
}
