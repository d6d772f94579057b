//! # Page-table entries
//!
//! The kernel uses three levels below CR3:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒0   |
//! |  L4   |  L3   |  L2   | Offset |
//! ```
//!
//! L4 and L3 entries always point at the next table ([`TableEntry`]); L2
//! entries are always 2 MiB leaves ([`LeafEntry`], `PS = 1`). Every table is
//! a 4 KiB structure at the base of its own 2 MiB frame.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};

/// L4/L3 entry: pointer to the next-level table (`PS = 0`).
#[bitfield(u64)]
pub struct TableEntry {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User (bit 2).
    pub user: bool,
    /// Write-Through (bit 3).
    pub write_through: bool,
    /// Cache Disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Dirty, PS and Global are ignored or must be zero in non-leaf form (bits 6..8).
    #[bits(3)]
    __ignored: u8,
    /// OS-available low (bits 9..11).
    #[bits(3)]
    pub os_available_low: u8,
    /// Next-level table physical address (bits 12..51).
    #[bits(40)]
    phys_addr_51_12: u64,
    #[bits(11)]
    __high: u16,
    /// No-Execute (bit 63).
    pub no_execute: bool,
}

impl TableEntry {
    /// Link to a table living at the base of `frame`.
    ///
    /// Links are present, writable and user-accessible so that the leaf
    /// alone decides the effective permissions.
    #[inline]
    #[must_use]
    pub const fn link(frame: PhysicalFrame) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(true)
            .with_phys_addr_51_12(frame.base().as_u64() >> 12)
    }

    /// Frame holding the next-level table, if present.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalFrame> {
        if self.present() {
            Some(PhysicalFrame::from_addr(PhysicalAddress::new(
                self.phys_addr_51_12() << 12,
            )))
        } else {
            None
        }
    }
}

/// L2 entry: maps one 2 MiB granule (`PS = 1`).
#[bitfield(u64)]
pub struct LeafEntry {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User (bit 2).
    pub user: bool,
    /// Write-Through (bit 3).
    pub write_through: bool,
    /// Cache Disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Dirty (bit 6).
    pub dirty: bool,
    /// Page Size (bit 7): must be 1 for a 2 MiB leaf.
    #[bits(default = true)]
    pub page_size: bool,
    /// Global (bit 8).
    pub global: bool,
    /// Demoted from writable by a copy-on-write share (bit 9, OS-available).
    pub copy_on_write: bool,
    /// OS-available (bits 10..11).
    #[bits(2)]
    pub os_available_low: u8,
    /// PAT (bit 12).
    pub pat: bool,
    /// Reserved, must be zero (bits 13..20).
    #[bits(8)]
    __res13_20: u8,
    /// Physical frame base (bits 21..51).
    #[bits(31)]
    phys_addr_51_21: u32,
    #[bits(11)]
    __high: u16,
    /// No-Execute (bit 63).
    pub no_execute: bool,
}

impl LeafEntry {
    #[inline]
    #[must_use]
    pub const fn map(frame: PhysicalFrame, flags: MapFlags) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(flags.writable())
            .with_user(flags.user())
            .with_frame(frame)
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_frame(self, frame: PhysicalFrame) -> Self {
        self.with_phys_addr_51_21((frame.base().as_u64() >> 21) as u32)
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn frame(self) -> PhysicalFrame {
        PhysicalFrame::from_addr(PhysicalAddress::new(
            (self.phys_addr_51_21() as u64) << 21,
        ))
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> MapFlags {
        MapFlags::new()
            .with_user(self.user())
            .with_writable(self.writable())
    }
}

/// Permissions requested for a user or kernel mapping.
#[bitfield(u8)]
#[derive(Eq, PartialEq)]
pub struct MapFlags {
    pub user: bool,
    pub writable: bool,
    #[bits(6)]
    __: u8,
}

impl MapFlags {
    pub const USER_RW: Self = Self::new().with_user(true).with_writable(true);
    pub const USER_RO: Self = Self::new().with_user(true);
    pub const KERNEL_RW: Self = Self::new().with_writable(true);
}

/// Decoded view of a present leaf.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Mapping {
    pub frame: PhysicalFrame,
    pub flags: MapFlags,
    pub copy_on_write: bool,
}

impl From<LeafEntry> for Mapping {
    fn from(leaf: LeafEntry) -> Self {
        Self {
            frame: leaf.frame(),
            flags: leaf.flags(),
            copy_on_write: leaf.copy_on_write(),
        }
    }
}

/// Per-level table indices of a virtual address.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TableIndices {
    pub l4: usize,
    pub l3: usize,
    pub l2: usize,
}

impl TableIndices {
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn of(va: VirtualAddress) -> Self {
        let v = va.as_u64();
        Self {
            l4: ((v >> 39) & 0x1ff) as usize,
            l3: ((v >> 30) & 0x1ff) as usize,
            l2: ((v >> 21) & 0x1ff) as usize,
        }
    }
}
