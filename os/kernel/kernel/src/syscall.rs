//! # System call table
//!
//! `int 0x80` arrives with the number in `rax`, the argument count in `rdi`
//! and a user pointer to the `i64` arguments in `rsi`. The argument block is
//! copied in before any handler runs; a bad number or count never reaches
//! one. Every failure is reported as [`SYSCALL_FAILED`].
//!
//! Blocking calls (`sleep`, `wait`) are restartable: instead of sleeping
//! inside the handler they rewind `rip` onto the `int 0x80` and park the
//! process. Once woken it executes the same call again and re-checks its
//! condition.

mod devices;
mod files;
mod process;

use crate::platform::{NetError, Platform};
use crate::{Kernel, KernelFault};
use alloc::string::String;
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_proc::fs::FsError;
use kernel_proc::{ProcessError, TaskId};
use kernel_sched::{CoreId, WaitChannel};
use kernel_syscall::{
    MAX_SYSCALL_ARGS, SYSCALL_FAILED, SyscallArgs, SyscallError, SyscallRequest, Sysno,
};
use log::{debug, trace};

/// How the trap returns after a handler ran.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Flow {
    /// Resume the caller with this value in `rax`.
    Return(i64),
    /// Park the caller on the channel; the call is re-issued once woken.
    Block(WaitChannel),
    /// The handler installed a fresh trap frame (`exec`).
    Replaced,
    /// Terminate the caller.
    Exit,
}

impl Flow {
    /// A byte or item count as a return value.
    fn count(n: usize) -> Self {
        Self::Return(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
enum SyscallFailure {
    #[error(transparent)]
    Abi(#[from] SyscallError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error(transparent)]
    File(#[from] FsError),
    #[error(transparent)]
    Net(#[from] NetError),
}

type SysResult = Result<Flow, SyscallFailure>;

/// The process issuing the call and the core it runs on.
#[derive(Debug, Copy, Clone)]
struct Caller {
    core: CoreId,
    task: TaskId,
}

impl<P: Platform, M: PhysMapper, A: FrameAlloc> Kernel<'_, P, M, A> {
    pub(crate) fn syscall(&self, core: CoreId) -> Result<(), KernelFault> {
        let task = self.running(core)?;
        let mut tf = self
            .processes
            .trap_frame(task)
            .ok_or(KernelFault::NoProcess(core))?;
        let caller = Caller { core, task };

        let flow = SyscallRequest::decode(&tf)
            .map_err(SyscallFailure::from)
            .and_then(|req| {
                let args = self.read_args(caller, &req)?;
                trace!("{core}: {} calls {:?}", self.processes.pid(task), req.sysno);
                self.invoke(caller, req.sysno, &args)
            })
            .unwrap_or_else(|e| {
                debug!("{} system call failed: {e}", self.processes.pid(task));
                Flow::Return(SYSCALL_FAILED)
            });

        match flow {
            Flow::Return(value) => {
                tf.set_return(value);
                self.processes.store_trap_frame(task, &tf);
            }
            Flow::Block(channel) => {
                tf.rewind_syscall();
                self.processes.store_trap_frame(task, &tf);
                let next = self.scheduler.sleep(core, channel, &self.processes);
                self.switch(core, next);
            }
            Flow::Replaced => {}
            Flow::Exit => self.exit_current(core, task),
        }
        Ok(())
    }

    fn read_args(&self, caller: Caller, req: &SyscallRequest) -> Result<SyscallArgs, SyscallFailure> {
        let mut raw = [0u8; MAX_SYSCALL_ARGS * size_of::<i64>()];
        let raw = &mut raw[..req.arg_bytes()];
        self.copy_in(caller, req.arg_ptr, raw)?;
        Ok(SyscallArgs::from_bytes(raw))
    }

    fn invoke(&self, c: Caller, sysno: Sysno, args: &SyscallArgs) -> SysResult {
        match sysno {
            Sysno::Write => self.sys_write(c, args),
            Sysno::Sleep => self.sys_sleep(c, args),
            Sysno::Exit => Ok(Flow::Exit),
            Sysno::Wait => self.sys_wait(c, args),
            Sysno::KeyboardRead => Ok(self.sys_keyboard_read()),
            Sysno::GetTotalMemory => Ok(self.sys_get_total_memory()),
            Sysno::Open => self.sys_open(c, args),
            Sysno::Read => self.sys_read(c, args),
            Sysno::FileSize => self.sys_file_size(c, args),
            Sysno::Close => self.sys_close(c, args),
            Sysno::Fork => self.sys_fork(c),
            Sysno::Exec => self.sys_exec(c, args),
            Sysno::ReadRootDirectory => self.sys_read_root_directory(c, args),
            Sysno::Sbrk => self.sys_sbrk(c, args),
            Sysno::CreateFile => self.sys_create_file(c, args),
            Sysno::WriteFile => self.sys_write_file(c, args),
            Sysno::DeleteFile => self.sys_delete_file(c, args),
            Sysno::Socket => self.sys_socket(args),
            Sysno::SendTo => self.sys_sendto(c, args),
            Sysno::RecvFrom => self.sys_recvfrom(c, args),
            Sysno::SetPriority => self.sys_set_priority(c, args),
            Sysno::GetPriority => Ok(self.sys_get_priority(c)),
            Sysno::GetRuntime => Ok(self.sys_get_runtime(c)),
            Sysno::Mkdir => self.sys_mkdir(c, args),
            Sysno::Opendir => self.sys_opendir(c, args),
            Sysno::Readdir => self.sys_readdir(c, args),
            Sysno::Rmdir => self.sys_rmdir(c, args),
            Sysno::GetSchedInfo => self.sys_get_sched_info(c, args),
        }
    }

    fn copy_in(&self, c: Caller, addr: u64, buf: &mut [u8]) -> Result<(), SyscallFailure> {
        let flush = self.processes.copy_from_user(c.task, addr, buf)?;
        self.flush(c.core, flush);
        Ok(())
    }

    fn copy_out(&self, c: Caller, addr: u64, data: &[u8]) -> Result<(), SyscallFailure> {
        let flush = self.processes.copy_to_user(c.task, addr, data)?;
        self.flush(c.core, flush);
        Ok(())
    }

    /// Path argument `index`.
    fn user_path(&self, c: Caller, args: &SyscallArgs, index: usize) -> Result<String, SyscallFailure> {
        Ok(self.processes.read_user_path(c.task, args.pointer(index)?)?)
    }
}
