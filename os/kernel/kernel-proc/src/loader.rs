//! Maps an [`ElfImage`] into a user address space.

use crate::ProcessError;
use crate::elf::ElfImage;
use alloc::collections::BTreeMap;
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_info::memory::GRANULE_SIZE;
use kernel_memory_addresses::{Size2M, VirtualAddress, VirtualGranule};
use kernel_vmem::{AddressSpace, FaultError, MapFlags, VmemError};
use log::trace;

/// Where a freshly loaded image starts executing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LoadedImage {
    pub entry: VirtualAddress,
    pub stack_top: VirtualAddress,
}

/// Map every `PT_LOAD` granule plus a one-granule stack and copy the file
/// contents. The target range must be unmapped.
///
/// Granules shared by two segments are mapped once, writable if either
/// segment is. Everything beyond `filesz` stays zero.
///
/// # Errors
/// Out of memory or an already mapped granule. Granules mapped before the
/// failure stay mapped; the caller tears the space down.
pub fn load_image<M: PhysMapper, A: FrameAlloc>(
    space: &AddressSpace<'_, M, A>,
    image: &ElfImage<'_>,
) -> Result<LoadedImage, ProcessError> {
    let mut granules: BTreeMap<u64, bool> = BTreeMap::new();
    for seg in image.segments() {
        for g in VirtualGranule::from_addr(seg.vaddr).range_to(seg.end()) {
            *granules.entry(g.base().as_u64()).or_default() |= seg.flags.write();
        }
    }
    granules.insert(image.stack_base().as_u64(), true);

    for (&base, &writable) in &granules {
        let flags = if writable {
            MapFlags::USER_RW
        } else {
            MapFlags::USER_RO
        };
        let frame = space
            .frames()
            .allocate_zeroed(space.mapper())
            .map_err(VmemError::from)?;
        let granule = VirtualGranule::from_addr(VirtualAddress::new(base));
        if let Err(e) = space.map_granule(granule, frame, flags) {
            space.frames().decrement_ref(frame);
            return Err(e.into());
        }
    }

    for seg in image.segments() {
        let data = image.file_bytes(&seg)?;
        let mut done = 0;
        while done < data.len() {
            let at = seg.vaddr + done as u64;
            let pa = space
                .translate(at)
                .ok_or(ProcessError::Fault(FaultError::AccessViolation(at)))?;
            #[allow(clippy::cast_possible_truncation)]
            let room = (GRANULE_SIZE - at.offset::<Size2M>()) as usize;
            let chunk = room.min(data.len() - done);
            space.mapper().write(pa, &data[done..done + chunk]);
            done += chunk;
        }
        trace!(
            "loaded {:#x}/{:#x} bytes at {}",
            seg.filesz, seg.memsz, seg.vaddr
        );
    }

    Ok(LoadedImage {
        entry: image.entry(),
        stack_top: image.stack_top(),
    })
}
