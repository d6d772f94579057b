//! Reference-counted 2 MiB frame allocator.

use crate::PhysMapper;
use alloc::vec::Vec;
use kernel_info::boot::{MemoryRegion, MemoryRegionKind};
use kernel_info::memory::{GRANULE_SIZE, MAX_FRAMES};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, PhysicalFrame, align_down, align_up};
use kernel_sync::SpinLock;
use log::{info, trace};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("out of physical frames")]
    OutOfMemory,
    #[error("reference count overflow on frame {0}")]
    ReferenceOverflow(PhysicalFrame),
}

/// Source of frames for the address-space manager and process layer.
///
/// All methods take `&self`; implementations lock internally so that every
/// core may call them concurrently.
pub trait FrameAlloc {
    /// Take a frame off the free list with reference count 1.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] when the free list is empty.
    fn allocate(&self) -> Result<PhysicalFrame, FrameAllocError>;

    /// Return a frame whose reference count already dropped to 0.
    fn release(&self, frame: PhysicalFrame);

    /// Add an owner; returns the new count.
    ///
    /// # Errors
    /// [`FrameAllocError::ReferenceOverflow`] if the 16-bit counter is saturated.
    fn increment_ref(&self, frame: PhysicalFrame) -> Result<u16, FrameAllocError>;

    /// Drop an owner; releases the frame at 0. Returns the remaining count.
    fn decrement_ref(&self, frame: PhysicalFrame) -> u16;

    fn ref_count(&self, frame: PhysicalFrame) -> u16;

    /// Allocate and clear a frame through `mapper`.
    ///
    /// # Errors
    /// See [`FrameAlloc::allocate`].
    fn allocate_zeroed<M: PhysMapper>(&self, mapper: &M) -> Result<PhysicalFrame, FrameAllocError> {
        let frame = self.allocate()?;
        mapper.zero_frame(frame);
        Ok(frame)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SlotState {
    /// Not backed by usable RAM, or reserved for the kernel image.
    Unmanaged,
    Free,
    InUse,
}

#[derive(Debug, Copy, Clone)]
struct FrameSlot {
    refs: u16,
    state: SlotState,
}

/// Snapshot of allocator occupancy.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameStats {
    pub total: usize,
    pub free: usize,
}

/// Frame table plus free list; callers serialize access.
struct FrameTable {
    slots: Vec<FrameSlot>,
    /// LIFO; the lowest frame sits on top after construction.
    free: Vec<FrameNumber>,
    total: usize,
}

impl FrameTable {
    fn slot_mut(&mut self, frame: PhysicalFrame) -> &mut FrameSlot {
        let slot = self
            .slots
            .get_mut(frame.number().as_usize())
            .filter(|s| s.state != SlotState::Unmanaged);
        match slot {
            Some(slot) => slot,
            None => panic!("frame {frame} is not managed by the allocator"),
        }
    }

    fn allocate(&mut self) -> Result<PhysicalFrame, FrameAllocError> {
        let number = self.free.pop().ok_or(FrameAllocError::OutOfMemory)?;
        let frame = PhysicalFrame::from_number(number);
        let slot = self.slot_mut(frame);
        assert!(
            slot.state == SlotState::Free && slot.refs == 0,
            "free list holds in-use frame {frame}"
        );
        slot.state = SlotState::InUse;
        slot.refs = 1;
        Ok(frame)
    }

    fn release(&mut self, frame: PhysicalFrame) {
        let slot = self.slot_mut(frame);
        assert_ne!(slot.state, SlotState::Free, "double release of frame {frame}");
        assert_eq!(slot.refs, 0, "releasing frame {frame} with live references");
        slot.state = SlotState::Free;
        self.free.push(frame.number());
    }

    fn increment(&mut self, frame: PhysicalFrame) -> Result<u16, FrameAllocError> {
        let slot = self.slot_mut(frame);
        assert_eq!(slot.state, SlotState::InUse, "sharing free frame {frame}");
        slot.refs = slot
            .refs
            .checked_add(1)
            .ok_or(FrameAllocError::ReferenceOverflow(frame))?;
        Ok(slot.refs)
    }

    fn decrement(&mut self, frame: PhysicalFrame) -> u16 {
        let slot = self.slot_mut(frame);
        assert!(
            slot.state == SlotState::InUse && slot.refs > 0,
            "reference count underflow on frame {frame}"
        );
        slot.refs -= 1;
        let remaining = slot.refs;
        if remaining == 0 {
            self.release(frame);
        }
        remaining
    }

    fn refs(&self, frame: PhysicalFrame) -> u16 {
        self.slots
            .get(frame.number().as_usize())
            .map_or(0, |s| s.refs)
    }
}

/// The kernel's physical frame allocator.
pub struct FrameAllocator {
    table: SpinLock<FrameTable>,
}

impl FrameAllocator {
    /// Build the frame table from the firmware memory map.
    ///
    /// Only whole granules inside usable regions are managed; anything below
    /// `reserved_end` (kernel image, boot structures) or at/above
    /// `phys_limit` (outside the kernel window) is left alone.
    #[must_use]
    pub fn new(regions: &[MemoryRegion], reserved_end: PhysicalAddress, phys_limit: u64) -> Self {
        let floor = align_up(reserved_end.as_u64(), GRANULE_SIZE);
        let mut managed: Vec<FrameNumber> = Vec::new();

        for region in regions.iter().filter(|r| r.kind == MemoryRegionKind::Usable) {
            let start = align_up(region.base, GRANULE_SIZE).max(floor);
            let end = align_down(region.end(), GRANULE_SIZE).min(phys_limit);
            let mut base = start;
            while base < end {
                let frame = PhysicalFrame::from_addr(PhysicalAddress::new(base));
                if frame.number().as_usize() < MAX_FRAMES {
                    managed.push(frame.number());
                }
                base += GRANULE_SIZE;
            }
        }

        managed.sort_unstable();
        managed.dedup();

        let len = managed.last().map_or(0, |n| n.as_usize() + 1);
        let mut slots = alloc::vec![
            FrameSlot {
                refs: 0,
                state: SlotState::Unmanaged,
            };
            len
        ];
        for n in &managed {
            slots[n.as_usize()].state = SlotState::Free;
        }

        let total = managed.len();
        managed.reverse();
        info!(
            "frame allocator: {total} frames ({} MiB) above {floor:#x}",
            (total as u64 * GRANULE_SIZE) >> 20
        );

        Self {
            table: SpinLock::new(FrameTable {
                slots,
                free: managed,
                total,
            }),
        }
    }

    #[must_use]
    pub fn stats(&self) -> FrameStats {
        self.table.with_lock(|t| FrameStats {
            total: t.total,
            free: t.free.len(),
        })
    }

    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.stats().free
    }

    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.stats().total
    }
}

impl FrameAlloc for FrameAllocator {
    fn allocate(&self) -> Result<PhysicalFrame, FrameAllocError> {
        let frame = self.table.with_lock(FrameTable::allocate)?;
        trace!("frame alloc {frame}");
        Ok(frame)
    }

    fn release(&self, frame: PhysicalFrame) {
        self.table.with_lock(|t| t.release(frame));
        trace!("frame release {frame}");
    }

    fn increment_ref(&self, frame: PhysicalFrame) -> Result<u16, FrameAllocError> {
        self.table.with_lock(|t| t.increment(frame))
    }

    fn decrement_ref(&self, frame: PhysicalFrame) -> u16 {
        let remaining = self.table.with_lock(|t| t.decrement(frame));
        if remaining == 0 {
            trace!("frame release {frame}");
        }
        remaining
    }

    fn ref_count(&self, frame: PhysicalFrame) -> u16 {
        self.table.with_lock(|t| t.refs(frame))
    }
}
