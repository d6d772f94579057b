//! Console, keyboard, memory statistics and sockets.

use super::{Caller, Flow, SysResult};
use crate::Kernel;
use crate::platform::Platform;
use alloc::vec;
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_syscall::SyscallArgs;

/// Largest datagram moved by one `sendto` / `recvfrom`.
const MAX_DATAGRAM: usize = u16::MAX as usize;

const CONSOLE_CHUNK: usize = 256;

impl<P: Platform, M: PhysMapper, A: FrameAlloc> Kernel<'_, P, M, A> {
    /// `write(buf, len)` to the console.
    pub(super) fn sys_write(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let (buf, len) = (args.pointer(0)?, args.length(1)?);
        let mut chunk = [0u8; CONSOLE_CHUNK];
        let mut done = 0;
        while done < len {
            let n = CONSOLE_CHUNK.min(len - done);
            self.copy_in(c, buf.saturating_add(done as u64), &mut chunk[..n])?;
            self.services.console.write(&chunk[..n]);
            done += n;
        }
        Ok(Flow::count(len))
    }

    /// Next buffered key, 0 if none.
    pub(super) fn sys_keyboard_read(&self) -> Flow {
        Flow::Return(self.services.keyboard.read_key().map_or(0, i64::from))
    }

    /// Usable memory in MiB.
    pub(super) fn sys_get_total_memory(&self) -> Flow {
        Flow::Return(i64::try_from(self.total_memory >> 20).unwrap_or(i64::MAX))
    }

    pub(super) fn sys_socket(&self, args: &SyscallArgs) -> SysResult {
        Ok(Flow::Return(self.services.net.socket(args.get(0)?)?))
    }

    /// `sendto(socket, buf, len)`.
    pub(super) fn sys_sendto(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let socket = args.get(0)?;
        let (buf, len) = (args.pointer(1)?, args.length(2)?.min(MAX_DATAGRAM));
        let mut data = vec![0u8; len];
        self.copy_in(c, buf, &mut data)?;
        Ok(Flow::count(self.services.net.send(socket, &data)?))
    }

    /// `recvfrom(socket, buf, len)`: bytes received, 0 if nothing is pending.
    pub(super) fn sys_recvfrom(&self, c: Caller, args: &SyscallArgs) -> SysResult {
        let socket = args.get(0)?;
        let (buf, len) = (args.pointer(1)?, args.length(2)?.min(MAX_DATAGRAM));
        let mut data = vec![0u8; len];
        let n = self.services.net.recv(socket, &mut data)?.min(len);
        self.copy_out(c, buf, &data[..n])?;
        Ok(Flow::count(n))
    }
}
