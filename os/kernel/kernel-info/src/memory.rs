//! # Memory Layout

use kernel_memory_addresses::GRANULE_SIZE as GRANULE;

/// Size of a mapping granule and of a physical frame.
pub const GRANULE_SIZE: u64 = GRANULE;

/// Virtual base of the kernel window. Physical address `pa` below
/// [`KERNEL_WINDOW_SIZE`] is reachable at `KERNEL_BASE + pa`.
pub const KERNEL_BASE: u64 = 0xffff_8000_0000_0000;

/// Bytes of physical memory mapped by the kernel window.
pub const KERNEL_WINDOW_SIZE: u64 = 1024 * 1024 * 1024;

/// First user virtual address; ELF images and the initial stack live above it.
pub const USER_BASE: u64 = 0x40_0000;

/// Exclusive upper bound of user virtual memory.
pub const USER_END: u64 = 0x4000_0000;

/// Kernel stack size per process: one granule.
pub const KERNEL_STACK_SIZE: u64 = GRANULE_SIZE;

/// Number of frames the frame table can describe; the table of 16-bit
/// reference counts fits in a single frame.
#[allow(clippy::cast_possible_truncation)]
pub const MAX_FRAMES: usize = (GRANULE_SIZE / 2) as usize;

/// Entries per page-table level.
pub const TABLE_ENTRIES: usize = 512;

const _: () = {
    assert!(KERNEL_BASE.is_multiple_of(GRANULE_SIZE));
    assert!(USER_BASE.is_multiple_of(GRANULE_SIZE));
    assert!(USER_END.is_multiple_of(GRANULE_SIZE));
    assert!(USER_END <= KERNEL_BASE);
    assert!(KERNEL_WINDOW_SIZE.is_multiple_of(GRANULE_SIZE));
};

/// Kernel-window virtual address of physical address `pa`.
#[inline]
#[must_use]
pub const fn phys_to_kernel_virt(pa: u64) -> u64 {
    KERNEL_BASE + pa
}
