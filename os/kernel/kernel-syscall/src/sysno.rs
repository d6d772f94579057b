use crate::SyscallError;

/// Number of entries in the syscall table.
pub const SYSCALL_COUNT: usize = 28;

/// System call numbers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Sysno {
    /// `write(buf, len)` to the console.
    Write = 0,
    /// `sleep(ticks)`.
    Sleep = 1,
    Exit = 2,
    /// `wait(pid)`; `pid <= 0` reaps any zombie.
    Wait = 3,
    KeyboardRead = 4,
    /// Usable physical memory in MiB.
    GetTotalMemory = 5,
    Open = 6,
    /// `read(fd, buf, len)`.
    Read = 7,
    FileSize = 8,
    Close = 9,
    Fork = 10,
    Exec = 11,
    ReadRootDirectory = 12,
    /// `sbrk(delta)`; returns the previous break.
    Sbrk = 13,
    CreateFile = 14,
    WriteFile = 15,
    DeleteFile = 16,
    Socket = 17,
    SendTo = 18,
    RecvFrom = 19,
    SetPriority = 20,
    GetPriority = 21,
    GetRuntime = 22,
    Mkdir = 23,
    Opendir = 24,
    Readdir = 25,
    Rmdir = 26,
    /// Fills a [`SchedInfo`](crate::SchedInfo).
    GetSchedInfo = 27,
}

impl Sysno {
    const ALL: [Self; SYSCALL_COUNT] = [
        Self::Write,
        Self::Sleep,
        Self::Exit,
        Self::Wait,
        Self::KeyboardRead,
        Self::GetTotalMemory,
        Self::Open,
        Self::Read,
        Self::FileSize,
        Self::Close,
        Self::Fork,
        Self::Exec,
        Self::ReadRootDirectory,
        Self::Sbrk,
        Self::CreateFile,
        Self::WriteFile,
        Self::DeleteFile,
        Self::Socket,
        Self::SendTo,
        Self::RecvFrom,
        Self::SetPriority,
        Self::GetPriority,
        Self::GetRuntime,
        Self::Mkdir,
        Self::Opendir,
        Self::Readdir,
        Self::Rmdir,
        Self::GetSchedInfo,
    ];

    /// Index into the syscall table.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// All numbers in table order.
    pub fn iter() -> impl Iterator<Item = Self> {
        Self::ALL.into_iter()
    }
}

impl TryFrom<i64> for Sysno {
    type Error = SyscallError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(SyscallError::BadNumber(value))
    }
}
