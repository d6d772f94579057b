//! # Physical memory access
//!
//! Code can only dereference virtual addresses. A [`PhysMapper`] turns a
//! physical address into a pointer the kernel may use right now:
//!
//! - [`HhdmPhysMapper`] for the running kernel: every frame below
//!   `KERNEL_WINDOW_SIZE` is mapped at `KERNEL_BASE + pa` in every address
//!   space.
//! - [`ArenaPhysMapper`] for host runs: each frame is backed by a lazily
//!   allocated, 4 KiB aligned heap block, so a simulated machine with
//!   hundreds of frames only pays for the frames it touches.
//!
//! The byte helpers ([`PhysMapper::zero_frame`], [`PhysMapper::copy_frame`],
//! [`PhysMapper::read`], [`PhysMapper::write`]) never cross a frame boundary.

use alloc::vec::Vec;
use core::alloc::Layout;
use core::ptr::NonNull;
use kernel_info::memory::{GRANULE_SIZE, KERNEL_BASE, KERNEL_WINDOW_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, Size2M};
use kernel_sync::SpinLock;

#[allow(clippy::cast_possible_truncation)]
const FRAME_BYTES: usize = GRANULE_SIZE as usize;

pub trait PhysMapper: Sync {
    /// Kernel-usable pointer to the byte at `pa`.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;

    /// Borrow the object stored at `pa`.
    ///
    /// # Safety
    /// - `pa` must be suitably aligned for `T` and hold a valid `T`.
    /// - The caller guarantees no other live reference aliases it.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.phys_to_ptr(pa).cast::<T>();
        debug_assert!(ptr.is_aligned());
        unsafe { &mut *ptr }
    }

    fn zero_frame(&self, frame: PhysicalFrame) {
        let ptr = self.phys_to_ptr(frame.base());
        // SAFETY: a frame is FRAME_BYTES of plain memory behind one mapping.
        unsafe { core::ptr::write_bytes(ptr, 0, FRAME_BYTES) };
    }

    fn copy_frame(&self, dst: PhysicalFrame, src: PhysicalFrame) {
        assert_ne!(dst, src, "copying frame {src} onto itself");
        let from = self.phys_to_ptr(src.base());
        let to = self.phys_to_ptr(dst.base());
        // SAFETY: distinct frames never overlap.
        unsafe { core::ptr::copy_nonoverlapping(from, to, FRAME_BYTES) };
    }

    /// Copy out of a single frame starting at `pa`.
    fn read(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        assert_within_frame(pa, buf.len());
        let from = self.phys_to_ptr(pa);
        // SAFETY: bounds checked against the containing frame.
        unsafe { core::ptr::copy_nonoverlapping(from, buf.as_mut_ptr(), buf.len()) };
    }

    /// Copy into a single frame starting at `pa`.
    fn write(&self, pa: PhysicalAddress, data: &[u8]) {
        assert_within_frame(pa, data.len());
        let to = self.phys_to_ptr(pa);
        // SAFETY: bounds checked against the containing frame.
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), to, data.len()) };
    }

    fn read_u64(&self, pa: PhysicalAddress) -> u64 {
        let mut raw = [0u8; 8];
        self.read(pa, &mut raw);
        u64::from_le_bytes(raw)
    }

    fn write_u64(&self, pa: PhysicalAddress, value: u64) {
        self.write(pa, &value.to_le_bytes());
    }
}

fn assert_within_frame(pa: PhysicalAddress, len: usize) {
    let offset = pa.offset::<Size2M>();
    assert!(
        offset + len as u64 <= GRANULE_SIZE,
        "physical access {pa}+{len:#x} crosses a frame boundary"
    );
}

/// [`PhysMapper`] for the kernel window at [`KERNEL_BASE`].
pub struct HhdmPhysMapper;

impl HhdmPhysMapper {
    /// Kernel virtual address of `pa`.
    #[inline]
    #[must_use]
    pub const fn virt(pa: PhysicalAddress) -> u64 {
        KERNEL_BASE + pa.as_u64()
    }
}

impl PhysMapper for HhdmPhysMapper {
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        debug_assert!(pa.as_u64() < KERNEL_WINDOW_SIZE);
        Self::virt(pa) as *mut u8
    }
}

/// One lazily allocated frame of simulated RAM.
struct Backing(NonNull<u8>);

// SAFETY: the block is plain bytes owned by the arena.
unsafe impl Send for Backing {}

/// Simulated physical memory: frames `[first, first + count)`.
pub struct ArenaPhysMapper {
    first: PhysicalFrame,
    frames: SpinLock<Vec<Option<Backing>>>,
}

impl ArenaPhysMapper {
    /// Cover `bytes` of physical memory starting at address 0.
    #[must_use]
    pub fn new(bytes: u64) -> Self {
        Self::with_base(PhysicalAddress::zero(), bytes)
    }

    #[must_use]
    pub fn with_base(base: PhysicalAddress, bytes: u64) -> Self {
        let count = usize::try_from(bytes.div_ceil(GRANULE_SIZE)).unwrap_or(usize::MAX);
        let mut frames = Vec::with_capacity(count);
        frames.resize_with(count, || None);
        Self {
            first: PhysicalFrame::from_addr(base),
            frames: SpinLock::new(frames),
        }
    }

    /// Frames that have been touched so far.
    #[must_use]
    pub fn resident_frames(&self) -> usize {
        self.frames.with_lock(|f| f.iter().filter(|b| b.is_some()).count())
    }

    const fn layout() -> Layout {
        match Layout::from_size_align(FRAME_BYTES, 4096) {
            Ok(layout) => layout,
            Err(_) => panic!("invalid frame layout"),
        }
    }
}

impl PhysMapper for ArenaPhysMapper {
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let index = pa
            .page::<Size2M>()
            .number()
            .as_usize()
            .checked_sub(self.first.number().as_usize());
        let offset = usize::try_from(pa.offset::<Size2M>()).unwrap_or(0);

        self.frames.with_lock(|frames| {
            let Some(slot) = index.and_then(|i| frames.get_mut(i)) else {
                panic!("physical address {pa} outside simulated memory");
            };
            let block = slot.get_or_insert_with(|| {
                // SAFETY: non-zero size, valid alignment.
                let raw = unsafe { alloc::alloc::alloc_zeroed(Self::layout()) };
                match NonNull::new(raw) {
                    Some(ptr) => Backing(ptr),
                    None => alloc::alloc::handle_alloc_error(Self::layout()),
                }
            });
            // SAFETY: offset < FRAME_BYTES.
            unsafe { block.0.as_ptr().add(offset) }
        })
    }
}

impl Drop for ArenaPhysMapper {
    fn drop(&mut self) {
        for block in self.frames.get_mut().drain(..).flatten() {
            // SAFETY: allocated in `phys_to_ptr` with the same layout.
            unsafe { alloc::alloc::dealloc(block.0.as_ptr(), Self::layout()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::FrameNumber;

    fn frame(n: u32) -> PhysicalFrame {
        PhysicalFrame::from_number(FrameNumber::new(n))
    }

    #[test]
    fn frames_materialize_on_first_touch() {
        let ram = ArenaPhysMapper::new(16 * GRANULE_SIZE);
        assert_eq!(ram.resident_frames(), 0);
        ram.write(frame(3).join(0x10), b"hello");
        assert_eq!(ram.resident_frames(), 1);

        let mut buf = [0u8; 5];
        ram.read(frame(3).join(0x10), &mut buf);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn fresh_frames_read_as_zero() {
        let ram = ArenaPhysMapper::new(4 * GRANULE_SIZE);
        assert_eq!(ram.read_u64(frame(1).join(0x1000)), 0);
    }

    #[test]
    fn copy_and_zero_whole_frames() {
        let ram = ArenaPhysMapper::new(4 * GRANULE_SIZE);
        ram.write_u64(frame(1).join(GRANULE_SIZE - 8), 0xdead_beef);
        ram.copy_frame(frame(2), frame(1));
        assert_eq!(ram.read_u64(frame(2).join(GRANULE_SIZE - 8)), 0xdead_beef);
        ram.zero_frame(frame(1));
        assert_eq!(ram.read_u64(frame(1).join(GRANULE_SIZE - 8)), 0);
    }

    #[test]
    fn typed_access_is_aligned() {
        let ram = ArenaPhysMapper::new(2 * GRANULE_SIZE);
        let table: &mut [u64; 512] = unsafe { ram.phys_to_mut(frame(1).base()) };
        table[7] = 42;
        assert_eq!(ram.read_u64(frame(1).join(7 * 8)), 42);
    }

    #[test]
    #[should_panic(expected = "crosses a frame boundary")]
    fn cross_frame_access_panics() {
        let ram = ArenaPhysMapper::new(2 * GRANULE_SIZE);
        ram.write(frame(0).join(GRANULE_SIZE - 2), &[1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "outside simulated memory")]
    fn out_of_range_access_panics() {
        let ram = ArenaPhysMapper::new(2 * GRANULE_SIZE);
        ram.read_u64(frame(9).base());
    }

    #[test]
    fn kernel_window_translation() {
        let pa = PhysicalAddress::new(0x60_0000);
        assert_eq!(HhdmPhysMapper::virt(pa), 0xffff_8000_0060_0000);
    }
}
