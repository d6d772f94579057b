//! # Address Space (three-level, 2 MiB leaves)
//!
//! ## Highlights
//!
//! - [`AddressSpace::create`] allocates a zeroed root and installs the
//!   kernel window so kernel code stays mapped after a switch.
//! - [`AddressSpace::map`] / [`AddressSpace::unmap_range`] install and remove
//!   granule leaves; both insist on granule-aligned ranges.
//! - [`AddressSpace::share_copy_on_write`] and
//!   [`AddressSpace::copy_private`] populate a child from a parent.
//! - [`AddressSpace::resolve_fault`] implements heap growth and COW breaks.
//! - [`AddressSpace::destroy`] returns every frame the space referenced.
//!
//! ## Safety
//!
//! Entries are read and written through the [`PhysMapper`] byte helpers, so
//! no references into table frames are ever held. Mutating a live space
//! requires TLB maintenance; see [`TlbFlush`].

use crate::entry::{LeafEntry, MapFlags, Mapping, TableEntry, TableIndices};
use crate::{FaultError, TlbFlush, VmemError};
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_info::memory::{
    GRANULE_SIZE, KERNEL_BASE, KERNEL_WINDOW_SIZE, TABLE_ENTRIES, USER_BASE, USER_END,
};
use kernel_memory_addresses::{
    PhysicalAddress, PhysicalFrame, Size2M, VirtualAddress, VirtualGranule,
};
use log::{debug, trace};

/// Heap boundary of the owning process and how far past it a fault may
/// still grow the heap.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct HeapLimit {
    pub brk: VirtualAddress,
    pub growth_window: u64,
}

/// How a page fault was resolved.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FaultResolution {
    /// The heap boundary moved to `brk` and a zeroed granule was installed.
    Grew { brk: VirtualAddress },
    /// A zeroed granule was installed below the boundary (lazy `sbrk`).
    Materialized,
    /// A shared frame was copied into a private one.
    Copied { flush: TlbFlush },
    /// The sole owner of a read-only frame got write access back.
    Reclaimed { flush: TlbFlush },
}

impl FaultResolution {
    #[must_use]
    pub const fn flush(self) -> TlbFlush {
        match self {
            Self::Grew { .. } | Self::Materialized => TlbFlush::none(),
            Self::Copied { flush } | Self::Reclaimed { flush } => flush,
        }
    }
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper, A: FrameAlloc> {
    root: PhysicalFrame,
    mapper: &'m M,
    frames: &'m A,
}

impl<'m, M: PhysMapper, A: FrameAlloc> AddressSpace<'m, M, A> {
    /// Re-attach to an existing root (e.g. the one stored in a PCB).
    #[inline]
    pub const fn from_root(root: PhysicalFrame, mapper: &'m M, frames: &'m A) -> Self {
        Self {
            root,
            mapper,
            frames,
        }
    }

    /// Allocate a zeroed root and map the kernel window into it.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if the root or a window table cannot be
    /// allocated; nothing is leaked in that case.
    pub fn create(mapper: &'m M, frames: &'m A) -> Result<Self, VmemError> {
        let root = frames.allocate_zeroed(mapper)?;
        let space = Self::from_root(root, mapper, frames);

        let window = VirtualGranule::from_addr(VirtualAddress::new(KERNEL_BASE));
        for (i, granule) in window
            .range_to(VirtualAddress::new(KERNEL_BASE + KERNEL_WINDOW_SIZE))
            .enumerate()
        {
            let pd = match space.ensure_directory(granule.base()) {
                Ok(pd) => pd,
                Err(e) => {
                    space.destroy(0);
                    return Err(e);
                }
            };
            let pa = PhysicalAddress::new(i as u64 * GRANULE_SIZE);
            let leaf = LeafEntry::map(PhysicalFrame::from_addr(pa), MapFlags::KERNEL_RW);
            space.write_leaf(pd, TableIndices::of(granule.base()).l2, leaf);
        }

        trace!("address space {root} created");
        Ok(space)
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalFrame {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &'m A {
        self.frames
    }

    /// The leaf covering `va`, if present.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<Mapping> {
        self.leaf(va).map(|(_, _, leaf)| leaf.into())
    }

    /// Translate `va` to a physical address.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.query(va)
            .map(|m| m.frame.join(va.offset::<Size2M>()))
    }

    /// Install leaves for `[start, start + len)` backed by consecutive
    /// frames from `phys`. Each mapping takes over one reference on its
    /// frame; reference counts are not touched here.
    ///
    /// # Panics
    /// If `start`, `len` or `phys` are not granule aligned.
    ///
    /// # Errors
    /// - [`VmemError::AlreadyMapped`] if any target granule is present; in
    ///   that case nothing is installed.
    /// - [`VmemError::OutOfMemory`] if an intermediate table cannot be
    ///   allocated; granules before the failing one stay mapped.
    pub fn map(
        &self,
        start: VirtualAddress,
        len: u64,
        phys: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        assert_granule_range(start, len);
        assert!(
            phys.is_aligned::<Size2M>(),
            "physical base {phys} is not granule aligned"
        );

        let first = VirtualGranule::from_addr(start);
        if let Some(taken) = first
            .range_to(start + len)
            .find(|g| self.leaf(g.base()).is_some())
        {
            return Err(VmemError::AlreadyMapped(taken.base()));
        }

        let mut frame = PhysicalFrame::from_addr(phys);
        for granule in first.range_to(start + len) {
            let pd = self.ensure_directory(granule.base())?;
            self.write_leaf(
                pd,
                TableIndices::of(granule.base()).l2,
                LeafEntry::map(frame, flags),
            );
            trace!("map {granule} -> {frame} {flags:?}");
            frame = frame.next();
        }
        Ok(())
    }

    /// Map a single granule.
    ///
    /// # Errors
    /// See [`AddressSpace::map`].
    pub fn map_granule(
        &self,
        granule: VirtualGranule,
        frame: PhysicalFrame,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        self.map(granule.base(), GRANULE_SIZE, frame.base(), flags)
    }

    /// Remove every present granule in `[start, start + len)`, dropping one
    /// reference on each backing frame.
    ///
    /// # Panics
    /// If the range is not granule aligned.
    pub fn unmap_range(&self, start: VirtualAddress, len: u64) -> TlbFlush {
        assert_granule_range(start, len);
        let mut flush = TlbFlush::none();
        for granule in VirtualGranule::from_addr(start).range_to(start + len) {
            let Some((pd, index, leaf)) = self.leaf(granule.base()) else {
                continue;
            };
            self.write_leaf(pd, index, LeafEntry::from_bits(0));
            if leaf.user() {
                self.frames.decrement_ref(leaf.frame());
            }
            trace!("unmap {granule} (was {})", leaf.frame());
            flush = TlbFlush::required();
        }
        flush
    }

    /// Tear the space down: unmap `[USER_BASE, USER_BASE + size)`, then
    /// release every table frame and finally the root.
    ///
    /// User leaves found outside the given range are dropped as well, so
    /// each referenced frame loses exactly one reference.
    pub fn destroy(self, size: u64) {
        let len = kernel_memory_addresses::align_up(size, GRANULE_SIZE)
            .min(USER_END - USER_BASE);
        self.unmap_range(VirtualAddress::new(USER_BASE), len).ignore();

        for l4 in 0..TABLE_ENTRIES {
            let Some(l3_table) = self.read_table(self.root, l4).next_table() else {
                continue;
            };
            for l3 in 0..TABLE_ENTRIES {
                let Some(directory) = self.read_table(l3_table, l3).next_table() else {
                    continue;
                };
                for l2 in 0..TABLE_ENTRIES {
                    let leaf = self.read_leaf(directory, l2);
                    if leaf.present() && leaf.user() {
                        self.frames.decrement_ref(leaf.frame());
                    }
                }
                self.frames.decrement_ref(directory);
            }
            self.frames.decrement_ref(l3_table);
        }

        self.frames.decrement_ref(self.root);
        trace!("address space {} destroyed", self.root);
    }

    /// Give `self` private copies of every present granule of `src` in
    /// `[USER_BASE, USER_BASE + size)`, with the same permissions.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`]; copies made so far stay mapped and are
    /// released by destroying `self`.
    pub fn copy_private(&self, src: &Self, size: u64) -> Result<(), VmemError> {
        for granule in user_granules(size) {
            let Some(mapping) = src.query(granule.base()) else {
                continue;
            };
            let frame = self.frames.allocate()?;
            self.mapper.copy_frame(frame, mapping.frame);
            let flags = if mapping.copy_on_write {
                MapFlags::USER_RW
            } else {
                mapping.flags
            };
            if let Err(e) = self.map_granule(granule, frame, flags) {
                self.frames.decrement_ref(frame);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Share every present granule of `src` in `[USER_BASE, USER_BASE + size)`
    /// with `self`. Writable granules are demoted to read-only COW in both
    /// spaces; each shared frame gains one reference.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] for intermediate tables in `self`, or
    /// [`VmemError::ReferenceOverflow`]. Granules shared so far stay shared.
    pub fn share_copy_on_write(&self, src: &Self, size: u64) -> Result<TlbFlush, VmemError> {
        let mut flush = TlbFlush::none();
        for granule in user_granules(size) {
            let Some((src_pd, index, leaf)) = src.leaf(granule.base()) else {
                continue;
            };
            let dst_pd = self.ensure_directory(granule.base())?;
            debug_assert!(self.leaf(granule.base()).is_none());
            self.frames.increment_ref(leaf.frame())?;

            let shared = if leaf.writable() || leaf.copy_on_write() {
                let demoted = leaf.with_writable(false).with_copy_on_write(true);
                if leaf.writable() {
                    src.write_leaf(src_pd, index, demoted);
                    flush = TlbFlush::required();
                }
                demoted
            } else {
                leaf
            };
            self.write_leaf(dst_pd, index, shared.with_accessed(false).with_dirty(false));
        }
        debug!(
            "shared {:#x} bytes of {} with {} copy-on-write",
            size, src.root, self.root
        );
        Ok(flush)
    }

    /// Resolve a page fault at `addr`.
    ///
    /// - Absent granule at or above `heap.brk` but inside the growth window:
    ///   move the boundary to at least `addr + GRANULE_SIZE` and install a
    ///   zeroed writable granule.
    /// - Absent granule below the boundary: install a zeroed granule.
    /// - Write to a present, read-only user granule: copy it if the frame
    ///   is shared, otherwise just restore write access. The `copy_on_write`
    ///   bit only records that the leaf was demoted by sharing.
    ///
    /// # Errors
    /// Anything else is a [`FaultError`]; the caller decides whether that
    /// terminates a process or halts the kernel.
    pub fn resolve_fault(
        &self,
        heap: &mut HeapLimit,
        addr: VirtualAddress,
        is_write: bool,
    ) -> Result<FaultResolution, FaultError> {
        if addr.as_u64() < USER_BASE || addr.as_u64() >= USER_END {
            return Err(FaultError::OutsideUserRange(addr));
        }

        let granule = VirtualGranule::from_addr(addr);
        let Some((pd, index, leaf)) = self.leaf(addr) else {
            let mut new_brk = None;
            if addr >= heap.brk {
                let distance = addr - heap.brk;
                if distance >= heap.growth_window {
                    return Err(FaultError::BeyondGrowthWindow { addr, distance });
                }
                new_brk = Some((addr + GRANULE_SIZE).min(VirtualAddress::new(USER_END)));
            }
            let frame = self.frames.allocate_zeroed(self.mapper).map_err(VmemError::from)?;
            if let Err(e) = self.map_granule(granule, frame, MapFlags::USER_RW) {
                self.frames.decrement_ref(frame);
                return Err(e.into());
            }
            return Ok(match new_brk {
                Some(brk) => {
                    heap.brk = heap.brk.max(brk);
                    trace!("heap grew to {} at {addr}", heap.brk);
                    FaultResolution::Grew { brk: heap.brk }
                }
                None => FaultResolution::Materialized,
            });
        };

        if !(is_write && leaf.user() && !leaf.writable()) {
            return Err(FaultError::AccessViolation(addr));
        }

        let old = leaf.frame();
        if self.frames.ref_count(old) > 1 {
            let copy = self.frames.allocate().map_err(VmemError::from)?;
            self.mapper.copy_frame(copy, old);
            self.write_leaf(pd, index, writable_again(leaf).with_frame(copy));
            self.frames.decrement_ref(old);
            debug!("cow break at {granule}: {old} -> {copy}");
            Ok(FaultResolution::Copied {
                flush: TlbFlush::required(),
            })
        } else {
            self.write_leaf(pd, index, writable_again(leaf));
            trace!("cow reclaim at {granule}: {old}");
            Ok(FaultResolution::Reclaimed {
                flush: TlbFlush::required(),
            })
        }
    }

    /// Number of present user granules (diagnostics and tests).
    #[must_use]
    pub fn user_granule_count(&self) -> usize {
        user_granules(USER_END - USER_BASE)
            .filter(|g| self.query(g.base()).is_some_and(|m| m.flags.user()))
            .count()
    }

    fn leaf(&self, va: VirtualAddress) -> Option<(PhysicalFrame, usize, LeafEntry)> {
        let idx = TableIndices::of(va);
        let l3_table = self.read_table(self.root, idx.l4).next_table()?;
        let directory = self.read_table(l3_table, idx.l3).next_table()?;
        let leaf = self.read_leaf(directory, idx.l2);
        leaf.present().then_some((directory, idx.l2, leaf))
    }

    /// Walk to the directory covering `va`, creating missing tables.
    fn ensure_directory(&self, va: VirtualAddress) -> Result<PhysicalFrame, VmemError> {
        let idx = TableIndices::of(va);
        let l3_table = self.ensure_table(self.root, idx.l4)?;
        self.ensure_table(l3_table, idx.l3)
    }

    fn ensure_table(&self, table: PhysicalFrame, index: usize) -> Result<PhysicalFrame, VmemError> {
        if let Some(next) = self.read_table(table, index).next_table() {
            return Ok(next);
        }
        let next = self.frames.allocate_zeroed(self.mapper)?;
        self.mapper
            .write_u64(entry_addr(table, index), TableEntry::link(next).into_bits());
        Ok(next)
    }

    fn read_table(&self, table: PhysicalFrame, index: usize) -> TableEntry {
        TableEntry::from_bits(self.mapper.read_u64(entry_addr(table, index)))
    }

    fn read_leaf(&self, directory: PhysicalFrame, index: usize) -> LeafEntry {
        LeafEntry::from_bits(self.mapper.read_u64(entry_addr(directory, index)))
    }

    fn write_leaf(&self, directory: PhysicalFrame, index: usize, leaf: LeafEntry) {
        self.mapper
            .write_u64(entry_addr(directory, index), leaf.into_bits());
    }
}

fn writable_again(leaf: LeafEntry) -> LeafEntry {
    leaf.with_writable(true).with_copy_on_write(false)
}

fn entry_addr(table: PhysicalFrame, index: usize) -> PhysicalAddress {
    debug_assert!(index < TABLE_ENTRIES);
    table.join(index as u64 * 8)
}

fn user_granules(size: u64) -> impl Iterator<Item = VirtualGranule> {
    let end = USER_BASE.saturating_add(size).min(USER_END);
    VirtualGranule::from_addr(VirtualAddress::new(USER_BASE)).range_to(VirtualAddress::new(end))
}

fn assert_granule_range(start: VirtualAddress, len: u64) {
    assert!(
        start.is_aligned::<Size2M>() && len.is_multiple_of(GRANULE_SIZE),
        "range {start}+{len:#x} is not granule aligned"
    );
}
