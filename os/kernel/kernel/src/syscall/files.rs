//! File and directory calls. Descriptors index the caller's open-file table.

use super::{Caller, Flow, SysResult};
use crate::Kernel;
use crate::platform::Platform;
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_proc::fs::OpenFile;
use kernel_syscall::SyscallArgs;

/// Bounce buffer between user memory and the file system.
const CHUNK: usize = 512;

impl<P: Platform, M: PhysMapper, A: FrameAlloc> Kernel<'_, P, M, A> {
    pub(super) fn sys_open(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let path = self.user_path(c, args, 0)?;
        let file = OpenFile::open(&self.services.fs, &path)?;
        let fd = self.processes.install_file(c.task, file)?;
        Ok(Flow::count(fd))
    }

    pub(super) fn sys_opendir(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let path = self.user_path(c, args, 0)?;
        let dir = OpenFile::open_dir(&self.services.fs, &path)?;
        let fd = self.processes.install_file(c.task, dir)?;
        Ok(Flow::count(fd))
    }

    /// `read(fd, buf, len)`: bytes read, 0 at end of file.
    pub(super) fn sys_read(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let file = self.processes.file(c.task, args.get(0)?)?;
        let (buf, len) = (args.pointer(1)?, args.length(2)?);
        let mut chunk = [0u8; CHUNK];
        let mut done = 0;
        while done < len {
            let want = CHUNK.min(len - done);
            let n = file.read(&mut chunk[..want])?;
            if n == 0 {
                break;
            }
            self.copy_out(c, buf.saturating_add(done as u64), &chunk[..n])?;
            done += n;
            if n < want {
                break;
            }
        }
        Ok(Flow::count(done))
    }

    /// `write_file(fd, buf, len)`: bytes written.
    pub(super) fn sys_write_file(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let file = self.processes.file(c.task, args.get(0)?)?;
        let (buf, len) = (args.pointer(1)?, args.length(2)?);
        let mut chunk = [0u8; CHUNK];
        let mut done = 0;
        while done < len {
            let want = CHUNK.min(len - done);
            self.copy_in(c, buf.saturating_add(done as u64), &mut chunk[..want])?;
            let n = file.write(&chunk[..want])?;
            done += n;
            if n < want {
                break;
            }
        }
        Ok(Flow::count(done))
    }

    pub(super) fn sys_file_size(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let size = self.processes.file(c.task, args.get(0)?)?.size()?;
        Ok(Flow::Return(i64::try_from(size).unwrap_or(i64::MAX)))
    }

    pub(super) fn sys_close(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        self.processes.close_file(c.task, args.get(0)?)?;
        Ok(Flow::Return(0))
    }

    /// `readdir(fd, entry)`: 1 with a record copied out, 0 at the end.
    pub(super) fn sys_readdir(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let dir = self.processes.file(c.task, args.get(0)?)?;
        let out = args.pointer(1)?;
        match dir.next_entry()? {
            Some(record) => {
                self.copy_out(c, out, &record)?;
                Ok(Flow::Return(1))
            }
            None => Ok(Flow::Return(0)),
        }
    }

    /// `read_root_directory(buf)`: every root record, returns their count.
    pub(super) fn sys_read_root_directory(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let out = args.pointer(0)?;
        let entries = self.services.fs.root_entries();
        self.copy_out(c, out, entries.as_flattened())?;
        Ok(Flow::count(entries.len()))
    }

    pub(super) fn sys_create_file(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        self.services.fs.create(&self.user_path(c, args, 0)?)?;
        Ok(Flow::Return(0))
    }

    pub(super) fn sys_delete_file(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        self.services.fs.delete(&self.user_path(c, args, 0)?)?;
        Ok(Flow::Return(0))
    }

    pub(super) fn sys_mkdir(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        self.services.fs.mkdir(&self.user_path(c, args, 0)?)?;
        Ok(Flow::Return(0))
    }

    pub(super) fn sys_rmdir(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        self.services.fs.rmdir(&self.user_path(c, args, 0)?)?;
        Ok(Flow::Return(0))
    }
}
