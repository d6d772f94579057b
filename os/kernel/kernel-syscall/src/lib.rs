//! # System call ABI
//!
//! Shared between the kernel and user-space runtimes.
//!
//! A user program issues `int 0x80` with
//!
//! | register | meaning                                   |
//! |----------|-------------------------------------------|
//! | `rax`    | [`Sysno`]                                 |
//! | `rdi`    | number of arguments                       |
//! | `rsi`    | pointer to an array of `i64` arguments    |
//!
//! and finds the result in `rax`. Every failure is reported as
//! [`SYSCALL_FAILED`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod sched_info;
mod sysno;
mod trap_frame;

pub use crate::sched_info::SchedInfo;
pub use crate::sysno::{SYSCALL_COUNT, Sysno};
pub use crate::trap_frame::{
    KERNEL_CS, KERNEL_DS, TrapFrame, USER_CS, USER_DS, USER_RFLAGS,
};

/// Software interrupt vector of the syscall gate.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Encoded length of `int 0x80`; a restarted call rewinds `rip` by this much.
pub const SYSCALL_INSN_LEN: u64 = 2;

/// Arguments beyond this count are rejected.
pub const MAX_SYSCALL_ARGS: usize = 6;

/// Return value of every failed call.
pub const SYSCALL_FAILED: i64 = -1;

/// Longest accepted path, terminating NUL excluded.
pub const MAX_PATH_LEN: usize = 256;

/// Size of one raw directory record returned by `readdir` and
/// `read_root_directory`.
pub const DIR_ENTRY_SIZE: usize = 32;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SyscallError {
    #[error("unknown system call {0}")]
    BadNumber(i64),
    #[error("invalid argument count {0}")]
    BadArgumentCount(i64),
    #[error("argument {0} missing")]
    MissingArgument(usize),
    #[error("bad user pointer {0:#x}")]
    BadPointer(u64),
    #[error("invalid argument")]
    InvalidArgument,
    #[error("no such file or descriptor")]
    NotFound,
    #[error("out of resources")]
    Exhausted,
}

/// Decoded `int 0x80` request, before the argument block is read.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SyscallRequest {
    pub sysno: Sysno,
    pub arg_count: usize,
    pub arg_ptr: u64,
}

impl SyscallRequest {
    /// Validate number and count from a trap frame.
    ///
    /// # Errors
    /// [`SyscallError::BadNumber`] outside `0..SYSCALL_COUNT`,
    /// [`SyscallError::BadArgumentCount`] for a negative count or more than
    /// [`MAX_SYSCALL_ARGS`].
    pub fn decode(tf: &TrapFrame) -> Result<Self, SyscallError> {
        #[allow(clippy::cast_possible_wrap)]
        let (number, count) = (tf.rax as i64, tf.rdi as i64);
        let sysno = Sysno::try_from(number)?;
        let arg_count = usize::try_from(count)
            .ok()
            .filter(|&n| n <= MAX_SYSCALL_ARGS)
            .ok_or(SyscallError::BadArgumentCount(count))?;
        Ok(Self {
            sysno,
            arg_count,
            arg_ptr: tf.rsi,
        })
    }

    /// Bytes of user memory holding the argument array.
    #[inline]
    #[must_use]
    pub const fn arg_bytes(&self) -> usize {
        self.arg_count * size_of::<i64>()
    }
}

/// Argument block copied in from user space.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct SyscallArgs {
    values: [i64; MAX_SYSCALL_ARGS],
    count: usize,
}

impl SyscallArgs {
    /// Parse `count` little-endian `i64`s out of `raw`.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut args = Self::default();
        for (slot, chunk) in args.values.iter_mut().zip(raw.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *slot = i64::from_le_bytes(word);
            args.count += 1;
        }
        args
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// # Errors
    /// [`SyscallError::MissingArgument`] if the caller passed fewer.
    pub fn get(&self, index: usize) -> Result<i64, SyscallError> {
        if index < self.count {
            Ok(self.values[index])
        } else {
            Err(SyscallError::MissingArgument(index))
        }
    }

    /// Argument `index` as a user address.
    ///
    /// # Errors
    /// Missing argument, or [`SyscallError::BadPointer`] for null.
    #[allow(clippy::cast_sign_loss)]
    pub fn pointer(&self, index: usize) -> Result<u64, SyscallError> {
        match self.get(index)? as u64 {
            0 => Err(SyscallError::BadPointer(0)),
            p => Ok(p),
        }
    }

    /// Argument `index` as a non-negative length.
    ///
    /// # Errors
    /// Missing argument or [`SyscallError::InvalidArgument`] when negative.
    pub fn length(&self, index: usize) -> Result<usize, SyscallError> {
        usize::try_from(self.get(index)?).map_err(|_| SyscallError::InvalidArgument)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_sign_loss)]
    fn frame(rax: i64, rdi: i64, rsi: u64) -> TrapFrame {
        TrapFrame {
            rax: rax as u64,
            rdi: rdi as u64,
            rsi,
            ..TrapFrame::default()
        }
    }

    #[test]
    fn decode_rejects_out_of_range_numbers() {
        assert_eq!(
            SyscallRequest::decode(&frame(28, 0, 0)),
            Err(SyscallError::BadNumber(28))
        );
        assert_eq!(
            SyscallRequest::decode(&frame(-1, 0, 0)),
            Err(SyscallError::BadNumber(-1))
        );
    }

    #[test]
    fn decode_rejects_bad_counts() {
        assert_eq!(
            SyscallRequest::decode(&frame(0, -2, 0)),
            Err(SyscallError::BadArgumentCount(-2))
        );
        assert_eq!(
            SyscallRequest::decode(&frame(0, 7, 0)),
            Err(SyscallError::BadArgumentCount(7))
        );
    }

    #[test]
    fn decode_accepts_valid_request() {
        let req = SyscallRequest::decode(&frame(13, 1, 0x40_1000)).unwrap();
        assert_eq!(req.sysno, Sysno::Sbrk);
        assert_eq!(req.arg_bytes(), 8);
        assert_eq!(req.arg_ptr, 0x40_1000);
    }

    #[test]
    fn argument_accessors() {
        let mut raw = Vec::new();
        for v in [0x40_0000i64, -5, 0] {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        let args = SyscallArgs::from_bytes(&raw);
        assert_eq!(args.len(), 3);
        assert_eq!(args.pointer(0), Ok(0x40_0000));
        assert_eq!(args.length(1), Err(SyscallError::InvalidArgument));
        assert_eq!(args.pointer(2), Err(SyscallError::BadPointer(0)));
        assert_eq!(args.get(3), Err(SyscallError::MissingArgument(3)));
    }
}
