//! Kernel access to user memory.
//!
//! The copies walk the owning space the way the MMU would: a granule that is
//! absent, or read-only when writing, goes through
//! [`AddressSpace::resolve_fault`] first. A fault that cannot be resolved is
//! returned to the caller instead of trapping.

use crate::address_space::{AddressSpace, HeapLimit};
use crate::{FaultError, Mapping, TlbFlush};
use kernel_alloc::{FrameAlloc, PhysMapper};
use kernel_info::memory::GRANULE_SIZE;
use kernel_memory_addresses::{Size2M, VirtualAddress};

impl<M: PhysMapper, A: FrameAlloc> AddressSpace<'_, M, A> {
    /// Copy `buf.len()` bytes from user address `addr`.
    ///
    /// # Errors
    /// The first unresolvable [`FaultError`].
    pub fn copy_from_user(
        &self,
        heap: &mut HeapLimit,
        addr: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<TlbFlush, FaultError> {
        let mut flush = TlbFlush::none();
        let mut done = 0;
        while done < buf.len() {
            let at = checked_at(addr, done)?;
            let (mapping, f) = self.accessible(heap, at, false)?;
            flush = flush.merge(f);
            let chunk = chunk_len(at, buf.len() - done);
            self.mapper()
                .read(mapping.frame.join(at.offset::<Size2M>()), &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(flush)
    }

    /// Copy `data` to user address `addr`, breaking COW where needed.
    ///
    /// # Errors
    /// The first unresolvable [`FaultError`].
    pub fn copy_to_user(
        &self,
        heap: &mut HeapLimit,
        addr: VirtualAddress,
        data: &[u8],
    ) -> Result<TlbFlush, FaultError> {
        let mut flush = TlbFlush::none();
        let mut done = 0;
        while done < data.len() {
            let at = checked_at(addr, done)?;
            let (mapping, f) = self.accessible(heap, at, true)?;
            flush = flush.merge(f);
            let chunk = chunk_len(at, data.len() - done);
            self.mapper()
                .write(mapping.frame.join(at.offset::<Size2M>()), &data[done..done + chunk]);
            done += chunk;
        }
        Ok(flush)
    }

    fn accessible(
        &self,
        heap: &mut HeapLimit,
        at: VirtualAddress,
        write: bool,
    ) -> Result<(Mapping, TlbFlush), FaultError> {
        let permitted = |m: &Mapping| m.flags.user() && (!write || m.flags.writable());
        if let Some(m) = self.query(at).filter(permitted) {
            return Ok((m, TlbFlush::none()));
        }
        let resolution = self.resolve_fault(heap, at, write)?;
        self.query(at)
            .filter(permitted)
            .map(|m| (m, resolution.flush()))
            .ok_or(FaultError::AccessViolation(at))
    }
}

fn checked_at(addr: VirtualAddress, done: usize) -> Result<VirtualAddress, FaultError> {
    addr.checked_add(done as u64)
        .ok_or(FaultError::OutsideUserRange(addr))
}

#[allow(clippy::cast_possible_truncation)]
fn chunk_len(at: VirtualAddress, remaining: usize) -> usize {
    let left_in_granule = (GRANULE_SIZE - at.offset::<Size2M>()) as usize;
    remaining.min(left_in_granule)
}
