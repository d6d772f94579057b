//! # Open files
//!
//! The kernel does not implement a file system. It talks to one through
//! [`FileSystem`] and keeps, per process, a table of [`OpenFile`]
//! descriptors. A descriptor is shared between parent and child after
//! `fork`; the underlying handle is closed when the last reference drops.

use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_sync::SpinLock;
use kernel_syscall::DIR_ENTRY_SIZE;

/// Raw 32-byte directory record as stored on disk.
pub type DirEntryRecord = [u8; DIR_ENTRY_SIZE];

/// File-system specific handle of an open file or directory.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FileHandle(u32);

impl FileHandle {
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("no space left")]
    NoSpace,
    #[error("invalid path")]
    InvalidPath,
    #[error("I/O error")]
    Io,
}

/// File-system collaborator. Implementations lock internally.
pub trait FileSystem: Send + Sync {
    /// Open a regular file.
    ///
    /// # Errors
    /// [`FsError::NotFound`], [`FsError::IsADirectory`] or an I/O failure.
    fn open(&self, path: &str) -> Result<FileHandle, FsError>;

    /// Open a directory for [`FileSystem::read_dir`].
    ///
    /// # Errors
    /// [`FsError::NotFound`] or [`FsError::NotADirectory`].
    fn open_dir(&self, path: &str) -> Result<FileHandle, FsError>;

    /// Read at `offset`; returns bytes read, 0 at end of file.
    ///
    /// # Errors
    /// I/O failures.
    fn read(&self, file: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Write at `offset`, extending the file; returns bytes written.
    ///
    /// # Errors
    /// [`FsError::NoSpace`] or I/O failures.
    fn write(&self, file: FileHandle, offset: u64, data: &[u8]) -> Result<usize, FsError>;

    /// # Errors
    /// I/O failures.
    fn size(&self, file: FileHandle) -> Result<u64, FsError>;

    /// Record `index` of an open directory, `None` past the end.
    ///
    /// # Errors
    /// [`FsError::NotADirectory`] or I/O failures.
    fn read_dir(&self, dir: FileHandle, index: usize) -> Result<Option<DirEntryRecord>, FsError>;

    fn close(&self, file: FileHandle);

    /// # Errors
    /// [`FsError::AlreadyExists`], [`FsError::NoSpace`], [`FsError::InvalidPath`].
    fn create(&self, path: &str) -> Result<(), FsError>;

    /// # Errors
    /// [`FsError::NotFound`].
    fn delete(&self, path: &str) -> Result<(), FsError>;

    /// # Errors
    /// [`FsError::AlreadyExists`], [`FsError::NoSpace`], [`FsError::InvalidPath`].
    fn mkdir(&self, path: &str) -> Result<(), FsError>;

    /// # Errors
    /// [`FsError::NotFound`] or [`FsError::NotADirectory`].
    fn rmdir(&self, path: &str) -> Result<(), FsError>;

    /// Every record of the root directory, empty slots included.
    fn root_entries(&self) -> Vec<DirEntryRecord>;
}

/// Read a whole file into memory.
///
/// # Errors
/// Whatever the file system reports.
pub fn read_file(fs: &dyn FileSystem, path: &str) -> Result<Vec<u8>, FsError> {
    let handle = fs.open(path)?;
    let result = (|| {
        let size = usize::try_from(fs.size(handle)?).map_err(|_| FsError::Io)?;
        let mut bytes = alloc::vec![0u8; size];
        let mut done = 0;
        while done < size {
            let n = fs.read(handle, done as u64, &mut bytes[done..])?;
            if n == 0 {
                return Err(FsError::Io);
            }
            done += n;
        }
        Ok(bytes)
    })();
    fs.close(handle);
    result
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpenKind {
    File,
    Directory,
}

/// One open-file description: handle plus position.
pub struct OpenFile {
    fs: Arc<dyn FileSystem>,
    handle: FileHandle,
    kind: OpenKind,
    position: SpinLock<u64>,
}

impl core::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenFile")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl OpenFile {
    /// # Errors
    /// Whatever the file system reports.
    pub fn open(fs: &Arc<dyn FileSystem>, path: &str) -> Result<Self, FsError> {
        let handle = fs.open(path)?;
        Ok(Self::new(Arc::clone(fs), handle, OpenKind::File))
    }

    /// # Errors
    /// Whatever the file system reports.
    pub fn open_dir(fs: &Arc<dyn FileSystem>, path: &str) -> Result<Self, FsError> {
        let handle = fs.open_dir(path)?;
        Ok(Self::new(Arc::clone(fs), handle, OpenKind::Directory))
    }

    fn new(fs: Arc<dyn FileSystem>, handle: FileHandle, kind: OpenKind) -> Self {
        Self {
            fs,
            handle,
            kind,
            position: SpinLock::new(0),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> OpenKind {
        self.kind
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        *self.position.lock()
    }

    /// Read at the current position and advance it.
    ///
    /// # Errors
    /// [`FsError::IsADirectory`] on a directory, else the file system's error.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, FsError> {
        if self.kind == OpenKind::Directory {
            return Err(FsError::IsADirectory);
        }
        let mut pos = self.position.lock();
        let n = self.fs.read(self.handle, *pos, buf)?;
        *pos += n as u64;
        Ok(n)
    }

    /// Write at the current position and advance it.
    ///
    /// # Errors
    /// [`FsError::IsADirectory`] on a directory, else the file system's error.
    pub fn write(&self, data: &[u8]) -> Result<usize, FsError> {
        if self.kind == OpenKind::Directory {
            return Err(FsError::IsADirectory);
        }
        let mut pos = self.position.lock();
        let n = self.fs.write(self.handle, *pos, data)?;
        *pos += n as u64;
        Ok(n)
    }

    /// # Errors
    /// Whatever the file system reports.
    pub fn size(&self) -> Result<u64, FsError> {
        self.fs.size(self.handle)
    }

    /// Next directory record, `None` at the end.
    ///
    /// # Errors
    /// [`FsError::NotADirectory`] on a regular file.
    pub fn next_entry(&self) -> Result<Option<DirEntryRecord>, FsError> {
        if self.kind != OpenKind::Directory {
            return Err(FsError::NotADirectory);
        }
        let mut pos = self.position.lock();
        #[allow(clippy::cast_possible_truncation)]
        let index = (*pos / DIR_ENTRY_SIZE as u64) as usize;
        let entry = self.fs.read_dir(self.handle, index)?;
        if entry.is_some() {
            *pos += DIR_ENTRY_SIZE as u64;
        }
        Ok(entry)
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.fs.close(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// One file `a` with fixed content, one directory `d` with two records.
    #[derive(Default)]
    struct Fixture {
        closed: Mutex<Vec<u32>>,
        written: Mutex<BTreeMap<u64, u8>>,
    }

    impl FileSystem for Fixture {
        fn open(&self, path: &str) -> Result<FileHandle, FsError> {
            match path {
                "a" => Ok(FileHandle::new(1)),
                "d" => Err(FsError::IsADirectory),
                _ => Err(FsError::NotFound),
            }
        }
        fn open_dir(&self, path: &str) -> Result<FileHandle, FsError> {
            if path == "d" {
                Ok(FileHandle::new(2))
            } else {
                Err(FsError::NotADirectory)
            }
        }
        fn read(&self, _: FileHandle, offset: u64, buf: &mut [u8]) -> Result<usize, FsError> {
            let content = b"hello world";
            let start = usize::try_from(offset).unwrap().min(content.len());
            let n = buf.len().min(content.len() - start);
            buf[..n].copy_from_slice(&content[start..start + n]);
            Ok(n)
        }
        fn write(&self, _: FileHandle, offset: u64, data: &[u8]) -> Result<usize, FsError> {
            let mut w = self.written.lock().unwrap();
            for (i, b) in data.iter().enumerate() {
                w.insert(offset + i as u64, *b);
            }
            Ok(data.len())
        }
        fn size(&self, _: FileHandle) -> Result<u64, FsError> {
            Ok(11)
        }
        fn read_dir(&self, _: FileHandle, index: usize) -> Result<Option<DirEntryRecord>, FsError> {
            Ok((index < 2).then(|| {
                let mut r = [0u8; DIR_ENTRY_SIZE];
                r[0] = b'A' + index as u8;
                r
            }))
        }
        fn close(&self, file: FileHandle) {
            self.closed.lock().unwrap().push(file.as_u32());
        }
        fn create(&self, _: &str) -> Result<(), FsError> {
            Ok(())
        }
        fn delete(&self, _: &str) -> Result<(), FsError> {
            Ok(())
        }
        fn mkdir(&self, _: &str) -> Result<(), FsError> {
            Ok(())
        }
        fn rmdir(&self, _: &str) -> Result<(), FsError> {
            Ok(())
        }
        fn root_entries(&self) -> Vec<DirEntryRecord> {
            Vec::new()
        }
    }

    fn fixture() -> (Arc<Fixture>, Arc<dyn FileSystem>) {
        let fx = Arc::new(Fixture::default());
        let fs: Arc<dyn FileSystem> = fx.clone();
        (fx, fs)
    }

    #[test]
    fn reads_advance_the_shared_position() {
        let (_, fs) = fixture();
        let file = Arc::new(OpenFile::open(&fs, "a").unwrap());
        let twin = Arc::clone(&file);

        let mut buf = [0u8; 6];
        assert_eq!(file.read(&mut buf).unwrap(), 6);
        assert_eq!(twin.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(file.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn handle_closes_with_the_last_reference() {
        let (fx, fs) = fixture();
        let file = Arc::new(OpenFile::open(&fs, "a").unwrap());
        let twin = Arc::clone(&file);
        drop(file);
        assert!(fx.closed.lock().unwrap().is_empty());
        drop(twin);
        assert_eq!(*fx.closed.lock().unwrap(), vec![1]);
    }

    #[test]
    fn directories_iterate_records() {
        let (_, fs) = fixture();
        let dir = OpenFile::open_dir(&fs, "d").unwrap();
        assert_eq!(dir.next_entry().unwrap().unwrap()[0], b'A');
        assert_eq!(dir.next_entry().unwrap().unwrap()[0], b'B');
        assert_eq!(dir.next_entry().unwrap(), None);
        assert_eq!(dir.read(&mut [0; 4]), Err(FsError::IsADirectory));
        assert!(OpenFile::open_dir(&fs, "a").is_err());
    }

    #[test]
    fn read_file_returns_whole_content() {
        let (fx, fs) = fixture();
        assert_eq!(read_file(fs.as_ref(), "a").unwrap(), b"hello world");
        assert_eq!(read_file(fs.as_ref(), "zz"), Err(FsError::NotFound));
        assert_eq!(*fx.closed.lock().unwrap(), vec![1]);
    }
}
