//! # Virtual Memory Support
//!
//! Per-process address spaces built from three-level page tables over
//! 2 MiB granules, with copy-on-write sharing for `fork` and on-demand
//! heap growth.
//!
//! ## What you get
//! - [`AddressSpace`]: a handle on one root table plus the frame allocator
//!   and physical mapper it draws from.
//! - [`TableEntry`] / [`LeafEntry`]: bitfield views of the hardware entries.
//! - [`TlbFlush`]: returned by every call that removes or demotes a live
//!   translation; the caller invalidates locally and asks the other cores
//!   for a shootdown.
//!
//! ## Ownership
//!
//! Each present user leaf owns exactly one reference on its frame. Sharing a
//! granule between two spaces adds a reference; unmapping drops one. The
//! kernel window leaves (supervisor only) point at unmanaged low memory and
//! carry no reference. Table frames are owned by the table that links them;
//! the root is owned by the [`AddressSpace`] until [`AddressSpace::destroy`].

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod address_space;
pub mod entry;
mod user_access;

pub use crate::address_space::{AddressSpace, FaultResolution, HeapLimit};
pub use crate::entry::{LeafEntry, MapFlags, Mapping, TableEntry, TableIndices};
use kernel_alloc::FrameAllocError;
use kernel_memory_addresses::{PhysicalFrame, VirtualAddress};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("granule at {0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("reference count overflow on frame {0}")]
    ReferenceOverflow(PhysicalFrame),
}

impl From<FrameAllocError> for VmemError {
    fn from(value: FrameAllocError) -> Self {
        match value {
            FrameAllocError::OutOfMemory => Self::OutOfMemory,
            FrameAllocError::ReferenceOverflow(f) => Self::ReferenceOverflow(f),
        }
    }
}

/// A page fault that cannot be resolved; fatal for the faulting context.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FaultError {
    #[error("address {0} is outside user space")]
    OutsideUserRange(VirtualAddress),
    #[error("address {addr} lies {distance:#x} bytes beyond the heap boundary")]
    BeyondGrowthWindow { addr: VirtualAddress, distance: u64 },
    #[error("access violation at {0}")]
    AccessViolation(VirtualAddress),
    #[error(transparent)]
    Memory(#[from] VmemError),
}

/// Pending TLB maintenance after a translation was removed or demoted.
#[must_use = "stale translations stay cached until flushed"]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct TlbFlush {
    needed: bool,
}

impl TlbFlush {
    #[inline]
    pub const fn none() -> Self {
        Self { needed: false }
    }

    #[inline]
    pub const fn required() -> Self {
        Self { needed: true }
    }

    #[inline]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            needed: self.needed || other.needed,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_required(self) -> bool {
        self.needed
    }

    /// The space is not live anywhere (e.g. a child under construction).
    #[inline]
    pub const fn ignore(self) {}
}
