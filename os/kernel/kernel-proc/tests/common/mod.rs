#![allow(dead_code)]

use kernel_alloc::{ArenaPhysMapper, FrameAllocator};
use kernel_info::boot::MemoryRegion;
use kernel_info::config::KernelConfig;
use kernel_info::memory::GRANULE_SIZE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_proc::fs::{DirEntryRecord, FileHandle, FileSystem, FsError};
use std::collections::BTreeMap;
use std::sync::Mutex;

pub const TRAP_RETURN: u64 = 0xffff_8000_0010_0000;

pub fn machine(frames: u64) -> (ArenaPhysMapper, FrameAllocator) {
    let bytes = (frames + 1) * GRANULE_SIZE;
    let map = [MemoryRegion::usable(0, bytes)];
    let alloc = FrameAllocator::new(&map, PhysicalAddress::new(GRANULE_SIZE), u64::MAX);
    (ArenaPhysMapper::new(bytes), alloc)
}

pub fn config(slots: usize) -> KernelConfig {
    KernelConfig::default().with_max_processes(slots)
}

/// Loadable segment for [`build_image`].
pub struct Seg<'a> {
    pub vaddr: u64,
    pub writable: bool,
    pub data: &'a [u8],
    pub memsz: u64,
}

/// Minimal static ELF64 x86-64 executable.
pub fn build_image(entry: u64, segments: &[Seg<'_>]) -> Vec<u8> {
    const EHDR: usize = 64;
    const PHDR: usize = 56;
    let mut out = vec![0u8; EHDR + segments.len() * PHDR];
    out[0..4].copy_from_slice(b"\x7FELF");
    out[4] = 2;
    out[5] = 1;
    out[6] = 1;
    out[16..18].copy_from_slice(&2u16.to_le_bytes());
    out[18..20].copy_from_slice(&62u16.to_le_bytes());
    out[20..24].copy_from_slice(&1u32.to_le_bytes());
    out[24..32].copy_from_slice(&entry.to_le_bytes());
    out[32..40].copy_from_slice(&(EHDR as u64).to_le_bytes());
    out[52..54].copy_from_slice(&(EHDR as u16).to_le_bytes());
    out[54..56].copy_from_slice(&(PHDR as u16).to_le_bytes());
    out[56..58].copy_from_slice(&(segments.len() as u16).to_le_bytes());
    for (i, seg) in segments.iter().enumerate() {
        let offset = out.len() as u64;
        out.extend_from_slice(seg.data);
        let flags: u32 = if seg.writable { 0b110 } else { 0b101 };
        let ph = &mut out[EHDR + i * PHDR..EHDR + (i + 1) * PHDR];
        ph[0..4].copy_from_slice(&1u32.to_le_bytes());
        ph[4..8].copy_from_slice(&flags.to_le_bytes());
        ph[8..16].copy_from_slice(&offset.to_le_bytes());
        ph[16..24].copy_from_slice(&seg.vaddr.to_le_bytes());
        ph[32..40].copy_from_slice(&(seg.data.len() as u64).to_le_bytes());
        ph[40..48].copy_from_slice(&seg.memsz.to_le_bytes());
    }
    out
}

/// Text at `USER_BASE`, data one granule up.
pub fn two_segment_image(text: &[u8], data: &[u8]) -> Vec<u8> {
    build_image(
        0x40_0000,
        &[
            Seg {
                vaddr: 0x40_0000,
                writable: false,
                data: text,
                memsz: text.len() as u64,
            },
            Seg {
                vaddr: 0x60_0000,
                writable: true,
                data,
                memsz: 0x1000,
            },
        ],
    )
}

/// Flat in-memory file system: path → bytes.
#[derive(Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    open: Mutex<BTreeMap<u32, String>>,
    next: Mutex<u32>,
}

impl MemFs {
    pub fn with_file(self, path: &str, bytes: Vec<u8>) -> Self {
        self.files.lock().unwrap().insert(path.to_owned(), bytes);
        self
    }

    pub fn open_handles(&self) -> usize {
        self.open.lock().unwrap().len()
    }

    fn path_of(&self, h: FileHandle) -> Result<String, FsError> {
        self.open
            .lock()
            .unwrap()
            .get(&h.as_u32())
            .cloned()
            .ok_or(FsError::Io)
    }
}

impl FileSystem for MemFs {
    fn open(&self, path: &str) -> Result<FileHandle, FsError> {
        if !self.files.lock().unwrap().contains_key(path) {
            return Err(FsError::NotFound);
        }
        let mut next = self.next.lock().unwrap();
        *next += 1;
        self.open.lock().unwrap().insert(*next, path.to_owned());
        Ok(FileHandle::new(*next))
    }

    fn open_dir(&self, _: &str) -> Result<FileHandle, FsError> {
        Err(FsError::NotADirectory)
    }

    fn read(&self, file: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
        let path = self.path_of(file)?;
        let files = self.files.lock().unwrap();
        let content = &files[&path];
        let start = usize::try_from(offset).unwrap().min(content.len());
        let n = buf.len().min(content.len() - start);
        buf[..n].copy_from_slice(&content[start..start + n]);
        Ok(n)
    }

    fn write(&self, file: FileHandle, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        let path = self.path_of(file)?;
        let mut files = self.files.lock().unwrap();
        let content = files.get_mut(&path).ok_or(FsError::NotFound)?;
        let start = usize::try_from(offset).unwrap();
        if content.len() < start + data.len() {
            content.resize(start + data.len(), 0);
        }
        content[start..start + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn size(&self, file: FileHandle) -> Result<u64, FsError> {
        let path = self.path_of(file)?;
        Ok(self.files.lock().unwrap()[&path].len() as u64)
    }

    fn read_dir(&self, _: FileHandle, _: usize) -> Result<Option<DirEntryRecord>, FsError> {
        Err(FsError::NotADirectory)
    }

    fn close(&self, file: FileHandle) {
        self.open.lock().unwrap().remove(&file.as_u32());
    }

    fn create(&self, path: &str) -> Result<(), FsError> {
        let mut files = self.files.lock().unwrap();
        if files.contains_key(path) {
            return Err(FsError::AlreadyExists);
        }
        files.insert(path.to_owned(), Vec::new());
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), FsError> {
        self.files
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }

    fn mkdir(&self, _: &str) -> Result<(), FsError> {
        Err(FsError::NoSpace)
    }

    fn rmdir(&self, _: &str) -> Result<(), FsError> {
        Err(FsError::NotFound)
    }

    fn root_entries(&self) -> Vec<DirEntryRecord> {
        Vec::new()
    }
}
