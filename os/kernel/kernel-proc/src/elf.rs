//! # ELF64 executable images
//!
//! Zero-copy view over a static x86-64 executable. [`ElfImage::parse`]
//! validates everything the loader relies on, so a failed parse never
//! leaves a process half torn down.

use bitfield_struct::bitfield;
use kernel_info::memory::{GRANULE_SIZE, USER_BASE, USER_END};
use kernel_memory_addresses::{VirtualAddress, align_up};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ElfError {
    #[error("image shorter than an ELF header")]
    TooShort,
    #[error("bad ELF magic")]
    BadMagic,
    #[error("not a 64-bit little-endian image")]
    BadClass,
    #[error("not an x86-64 image")]
    BadMachine,
    #[error("not a static executable")]
    NotExecutable,
    #[error("malformed header")]
    BadHeader,
    #[error("program header or segment out of bounds")]
    OutOfBounds,
    #[error("segment file size exceeds memory size")]
    BadSegment,
    #[error("segment at {0} outside user space")]
    OutsideUserRange(VirtualAddress),
    #[error("no loadable segments")]
    NoSegments,
}

/// `Elf64_Phdr.p_flags`: bit0=X, bit1=W, bit2=R.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct PFlags {
    pub execute: bool,
    pub write: bool,
    pub read: bool,
    #[bits(29)]
    __: u32,
}

const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;
const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;

#[inline]
fn le16(x: &[u8]) -> u16 {
    u16::from_le_bytes([x[0], x[1]])
}

#[inline]
fn le32(x: &[u8]) -> u32 {
    u32::from_le_bytes([x[0], x[1], x[2], x[3]])
}

#[inline]
fn le64(x: &[u8]) -> u64 {
    u64::from_le_bytes([x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7]])
}

/// One `PT_LOAD` program header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Segment {
    pub vaddr: VirtualAddress,
    pub flags: PFlags,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
}

impl Segment {
    /// First address past the segment in memory.
    #[inline]
    #[must_use]
    pub fn end(&self) -> VirtualAddress {
        self.vaddr + self.memsz
    }
}

#[derive(Clone, Copy)]
pub struct ElfImage<'a> {
    bytes: &'a [u8],
    entry: VirtualAddress,
    phoff: usize,
    phnum: usize,
}

impl core::fmt::Debug for ElfImage<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ElfImage")
            .field("len", &self.bytes.len())
            .field("entry", &self.entry)
            .field("phnum", &self.phnum)
            .finish()
    }
}

impl<'a> ElfImage<'a> {
    /// Validate header, program headers and every `PT_LOAD` segment.
    ///
    /// # Errors
    /// The first [`ElfError`] found.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ElfError> {
        if bytes.len() < EHDR_SIZE {
            return Err(ElfError::TooShort);
        }
        if &bytes[0..4] != b"\x7FELF" {
            return Err(ElfError::BadMagic);
        }
        // ELFCLASS64, ELFDATA2LSB
        if bytes[4] != 2 || bytes[5] != 1 {
            return Err(ElfError::BadClass);
        }
        if le16(&bytes[16..18]) != ET_EXEC {
            return Err(ElfError::NotExecutable);
        }
        if le16(&bytes[18..20]) != EM_X86_64 {
            return Err(ElfError::BadMachine);
        }
        if le32(&bytes[20..24]) != 1 || usize::from(le16(&bytes[54..56])) != PHDR_SIZE {
            return Err(ElfError::BadHeader);
        }

        let phoff = usize::try_from(le64(&bytes[32..40])).map_err(|_| ElfError::OutOfBounds)?;
        let phnum = usize::from(le16(&bytes[56..58]));
        let need = phnum
            .checked_mul(PHDR_SIZE)
            .and_then(|n| n.checked_add(phoff))
            .ok_or(ElfError::OutOfBounds)?;
        if need > bytes.len() {
            return Err(ElfError::OutOfBounds);
        }

        let image = Self {
            bytes,
            entry: VirtualAddress::new(le64(&bytes[24..32])),
            phoff,
            phnum,
        };
        let mut any = false;
        for seg in image.segments() {
            image.validate(&seg)?;
            any = true;
        }
        if !any {
            return Err(ElfError::NoSegments);
        }
        if image.stack_top().as_u64() > USER_END {
            return Err(ElfError::OutsideUserRange(image.stack_base()));
        }
        Ok(image)
    }

    fn validate(&self, seg: &Segment) -> Result<(), ElfError> {
        if seg.filesz > seg.memsz {
            return Err(ElfError::BadSegment);
        }
        let end = seg
            .vaddr
            .as_u64()
            .checked_add(seg.memsz)
            .ok_or(ElfError::OutsideUserRange(seg.vaddr))?;
        if seg.vaddr.as_u64() < USER_BASE || end > USER_END {
            return Err(ElfError::OutsideUserRange(seg.vaddr));
        }
        self.file_bytes(seg).map(|_| ())
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self) -> VirtualAddress {
        self.entry
    }

    /// `PT_LOAD` headers in file order.
    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        (0..self.phnum).filter_map(move |i| {
            let p = self.phoff + i * PHDR_SIZE;
            let s = self.bytes.get(p..p + PHDR_SIZE)?;
            (le32(&s[0..4]) == PT_LOAD).then(|| Segment {
                flags: PFlags::from_bits(le32(&s[4..8])),
                offset: le64(&s[8..16]),
                vaddr: VirtualAddress::new(le64(&s[16..24])),
                filesz: le64(&s[32..40]),
                memsz: le64(&s[40..48]),
            })
        })
    }

    /// File bytes backing `seg` (`filesz` of them).
    ///
    /// # Errors
    /// [`ElfError::OutOfBounds`] if the range lies outside the image.
    pub fn file_bytes(&self, seg: &Segment) -> Result<&'a [u8], ElfError> {
        let off = usize::try_from(seg.offset).map_err(|_| ElfError::OutOfBounds)?;
        let len = usize::try_from(seg.filesz).map_err(|_| ElfError::OutOfBounds)?;
        let end = off.checked_add(len).ok_or(ElfError::OutOfBounds)?;
        self.bytes.get(off..end).ok_or(ElfError::OutOfBounds)
    }

    /// First granule past the highest segment; the initial stack lives there.
    #[must_use]
    pub fn stack_base(&self) -> VirtualAddress {
        let high = self
            .segments()
            .map(|s| s.end().as_u64())
            .max()
            .unwrap_or(USER_BASE);
        VirtualAddress::new(align_up(high, GRANULE_SIZE))
    }

    #[must_use]
    pub fn stack_top(&self) -> VirtualAddress {
        self.stack_base() + GRANULE_SIZE
    }
}
