//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw addresses, page bases and frame indices
//! used by the frame allocator and the address-space manager.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] / [`VirtualAddress`] | A raw 64-bit address in one of the two spaces. |
//! | [`PhysicalPage<S>`] / [`VirtualPage<S>`] | A page-aligned base for a page of size `S`. |
//! | [`FrameNumber`] | Index of a 2 MiB physical frame in the frame table. |
//!
//! The kernel maps memory exclusively in 2 MiB granules ([`Size2M`]); page
//! tables themselves are 4 KiB structures ([`Size4K`]) placed at the start
//! of a granule. [`PhysicalFrame`] and [`VirtualGranule`] name the granule
//! instantiations.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0060_1234);
//! let frame = PhysicalFrame::from_addr(pa);
//! assert_eq!(frame.base().as_u64(), 0x0060_0000);
//! assert_eq!(frame.number().as_usize(), 3);
//! assert_eq!(frame.join(pa.offset::<Size2M>()), pa);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod frame_number;
mod page;
mod page_size;
mod physical_address;
mod virtual_address;

pub use frame_number::FrameNumber;
pub use page::{PhysicalPage, VirtualPage};
pub use page_size::{PageSize, Size2M, Size4K};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// A 2 MiB physical frame, the unit tracked by the frame allocator.
pub type PhysicalFrame = PhysicalPage<Size2M>;

/// A 2 MiB virtual granule, the unit of every user mapping.
pub type VirtualGranule = VirtualPage<Size2M>;

/// Size of one mapping granule in bytes.
pub const GRANULE_SIZE: u64 = Size2M::SIZE;

/// Round `value` down to a multiple of `align` (power of two).
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x2f_ffff, 0x20_0000), 0x20_0000);
/// ```
#[inline]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Round `value` up to a multiple of `align` (power of two).
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0x20_0001, 0x20_0000), 0x40_0000);
/// assert_eq!(align_up(0x40_0000, 0x20_0000), 0x40_0000);
/// ```
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
