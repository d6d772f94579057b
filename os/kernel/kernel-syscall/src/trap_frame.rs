use crate::SYSCALL_INSN_LEN;

/// Kernel code selector (GDT index 1).
pub const KERNEL_CS: u64 = 0x08;
/// Kernel data selector (GDT index 2).
pub const KERNEL_DS: u64 = 0x10;
/// User data selector (GDT index 3, RPL 3).
pub const USER_DS: u64 = 0x1b;
/// User code selector (GDT index 4, RPL 3).
pub const USER_CS: u64 = 0x23;

/// `IF` set, reserved bit 1 set.
pub const USER_RFLAGS: u64 = 0x202;

/// Register state saved by the trap entry stub.
///
/// The stub pushes the general purpose registers (`rax` first) after the
/// vector number and error code; the CPU pushed `rip..ss` before that. In
/// memory, from the lowest address:
///
/// ```text
/// r15 r14 … rbx rax | trapno errorcode | rip cs rflags rsp ss
/// ```
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
#[repr(C)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub trapno: u64,
    pub errorcode: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

const _: () = assert!(size_of::<TrapFrame>() == 22 * 8);

impl TrapFrame {
    pub const SIZE: usize = size_of::<Self>();

    /// Fresh ring-3 frame entering at `entry` with stack pointer `stack_top`.
    #[must_use]
    pub const fn user(entry: u64, stack_top: u64) -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rbp: 0,
            rdi: 0,
            rsi: 0,
            rdx: 0,
            rcx: 0,
            rbx: 0,
            rax: 0,
            trapno: 0,
            errorcode: 0,
            rip: entry,
            cs: USER_CS,
            rflags: USER_RFLAGS,
            rsp: stack_top,
            ss: USER_DS,
        }
    }

    /// The trap interrupted ring 3.
    #[inline]
    #[must_use]
    pub const fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub const fn set_return(&mut self, value: i64) {
        self.rax = value as u64;
    }

    /// Point `rip` back at the `int 0x80` that trapped, so the call runs
    /// again on resume. `rax` still holds the syscall number.
    #[inline]
    pub const fn rewind_syscall(&mut self) {
        self.rip -= SYSCALL_INSN_LEN;
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8] {
        // SAFETY: repr(C), only u64 fields, no padding.
        unsafe { core::slice::from_raw_parts(core::ptr::from_ref(self).cast(), Self::SIZE) }
    }

    pub const fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: repr(C), only u64 fields, no padding; every bit pattern is valid.
        unsafe { core::slice::from_raw_parts_mut(core::ptr::from_mut(self).cast(), Self::SIZE) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn hardware_part_sits_at_the_top() {
        assert_eq!(offset_of!(TrapFrame, rax), 14 * 8);
        assert_eq!(offset_of!(TrapFrame, trapno), 15 * 8);
        assert_eq!(offset_of!(TrapFrame, rip), 17 * 8);
        assert_eq!(offset_of!(TrapFrame, ss), 21 * 8);
    }

    #[test]
    fn user_frame_runs_in_ring_three_with_interrupts() {
        let tf = TrapFrame::user(0x40_0000, 0x60_0000);
        assert!(tf.from_user());
        assert_eq!(tf.rflags, 0x202);
        assert_eq!((tf.rip, tf.rsp), (0x40_0000, 0x60_0000));
    }

    #[test]
    fn rewind_and_return() {
        let mut tf = TrapFrame::user(0x40_1002, 0);
        tf.rewind_syscall();
        assert_eq!(tf.rip, 0x40_1000);
        tf.set_return(-1);
        assert_eq!(tf.rax, u64::MAX);
    }

    #[test]
    fn byte_view_round_trips() {
        let mut a = TrapFrame::user(1, 2);
        a.rbx = 0xdead;
        let mut b = TrapFrame::default();
        b.as_bytes_mut().copy_from_slice(a.as_bytes());
        assert_eq!(a, b);
    }
}
