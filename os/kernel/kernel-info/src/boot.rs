//! # Kernel Boot Information

/// Type of a firmware memory-map entry (E820 numbering).
#[repr(u32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MemoryRegionKind {
    Usable = 1,
    Reserved = 2,
    AcpiReclaimable = 3,
    AcpiNvs = 4,
    Bad = 5,
}

impl MemoryRegionKind {
    /// Decode a raw firmware type; unknown values are treated as reserved.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Usable,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::Bad,
            _ => Self::Reserved,
        }
    }
}

/// One contiguous physical range from the firmware memory map.
#[repr(C)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn usable(base: u64, length: u64) -> Self {
        Self {
            base,
            length,
            kind: MemoryRegionKind::Usable,
        }
    }

    /// Exclusive end address; saturates on bogus firmware entries.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }
}

/// Information the core kernel needs from the boot stage.
#[derive(Debug, Clone, Copy)]
pub struct BootInfo<'a> {
    /// Firmware memory map.
    pub memory_map: &'a [MemoryRegion],
    /// Physical end of the loaded kernel image; frames below are never handed out.
    pub kernel_end: u64,
    /// Cores reported by the firmware tables (including the bootstrap core).
    pub detected_cores: usize,
}

impl BootInfo<'_> {
    /// Total bytes in usable regions.
    #[must_use]
    pub fn usable_bytes(&self) -> u64 {
        self.memory_map
            .iter()
            .filter(|r| r.kind == MemoryRegionKind::Usable)
            .map(|r| r.length)
            .sum()
    }
}
