use crate::{FrameNumber, PageSize, PhysicalAddress, Size2M, VirtualAddress};
use core::fmt;
use core::marker::PhantomData;

/// Physical page base for size `S`.
///
/// ### Invariants
/// - The low `S::SHIFT` bits of the base are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

/// Virtual page base for size `S`.
///
/// ### Invariants
/// - The low `S::SHIFT` bits of the base are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage<S: PageSize> {
    base: u64,
    _size: PhantomData<S>,
}

impl<S: PageSize> PhysicalPage<S> {
    /// The page containing `pa` (rounds down).
    #[inline]
    #[must_use]
    pub const fn from_addr(pa: PhysicalAddress) -> Self {
        Self {
            base: pa.as_u64() & !S::MASK,
            _size: PhantomData,
        }
    }

    /// `Some` only if `pa` is already page aligned.
    #[inline]
    #[must_use]
    pub const fn try_from_addr(pa: PhysicalAddress) -> Option<Self> {
        if pa.is_aligned::<S>() {
            Some(Self::from_addr(pa))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// Combine the base with an in-page offset.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> PhysicalAddress {
        debug_assert!(offset < S::SIZE);
        PhysicalAddress::new(self.base | (offset & S::MASK))
    }

    /// The directly following page.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            base: self.base + S::SIZE,
            _size: PhantomData,
        }
    }
}

impl PhysicalPage<Size2M> {
    /// Index of this frame in the frame table.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn number(self) -> FrameNumber {
        FrameNumber::new((self.base >> Size2M::SHIFT) as u32)
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn from_number(n: FrameNumber) -> Self {
        Self {
            base: (n.as_u32() as u64) << Size2M::SHIFT,
            _size: PhantomData,
        }
    }
}

impl<S: PageSize> VirtualPage<S> {
    /// The page containing `va` (rounds down).
    #[inline]
    #[must_use]
    pub const fn from_addr(va: VirtualAddress) -> Self {
        Self {
            base: va.as_u64() & !S::MASK,
            _size: PhantomData,
        }
    }

    /// `Some` only if `va` is already page aligned.
    #[inline]
    #[must_use]
    pub const fn try_from_addr(va: VirtualAddress) -> Option<Self> {
        if va.is_aligned::<S>() {
            Some(Self::from_addr(va))
        } else {
            None
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.base)
    }

    #[inline]
    #[must_use]
    pub const fn join(self, offset: u64) -> VirtualAddress {
        debug_assert!(offset < S::SIZE);
        VirtualAddress::new(self.base | (offset & S::MASK))
    }

    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            base: self.base + S::SIZE,
            _size: PhantomData,
        }
    }

    /// Iterate pages from `self` up to (excluding) the page at `end`.
    ///
    /// `end` is rounded up, so a partially covered last page is included.
    pub fn range_to(self, end: VirtualAddress) -> impl Iterator<Item = Self> {
        let end = end.align_up::<S>().as_u64();
        (self.base..end)
            .step_by(usize::try_from(S::SIZE).unwrap_or(usize::MAX))
            .map(|base| Self {
                base,
                _size: PhantomData,
            })
    }
}

impl<S: PageSize> fmt::Debug for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage<{}>({:#018X})", core::any::type_name::<S>(), self.base)
    }
}

impl<S: PageSize> fmt::Display for PhysicalPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#X}", self.base)
    }
}

impl<S: PageSize> fmt::Debug for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage<{}>({:#018X})", core::any::type_name::<S>(), self.base)
    }
}

impl<S: PageSize> fmt::Display for VirtualPage<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#X}", self.base)
    }
}
