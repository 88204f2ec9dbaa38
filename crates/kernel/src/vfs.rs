//! The file access interface exec reads binaries through, and an in-memory
//! filesystem implementing it.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::error::{KernelError, KernelResult};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileHandle(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(usize),
    Current(isize),
    End(isize),
}

/// File access as seen by the exec pipeline.
pub trait FileSystem {
    fn open(&mut self, path: &str, flags: OpenFlags) -> KernelResult<FileHandle>;

    /// Reads from the current position, returning 0 at end of file.
    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> KernelResult<usize>;

    /// Moves the position and returns the new absolute offset.
    fn seek(&mut self, handle: FileHandle, position: SeekFrom) -> KernelResult<usize>;

    fn close(&mut self, handle: FileHandle) -> KernelResult<()>;
}

/// Reads a whole file.
pub fn read_all(fs: &mut dyn FileSystem, path: &str) -> KernelResult<Vec<u8>> {
    let handle = fs.open(path, OpenFlags::READ)?;
    let data = read_to_end(fs, handle);
    let closed = fs.close(handle);
    let data = data?;
    closed?;
    Ok(data)
}

fn read_to_end(fs: &mut dyn FileSystem, handle: FileHandle) -> KernelResult<Vec<u8>> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let read = fs.read(handle, &mut chunk)?;
        if read == 0 {
            return Ok(data);
        }
        data.extend_from_slice(&chunk[..read]);
    }
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    position: usize,
}

/// A read-only filesystem holding whole files in memory.
#[derive(Debug, Default)]
pub struct MemFs {
    files: BTreeMap<String, Vec<u8>>,
    open: BTreeMap<u32, OpenFile>,
    next_handle: u32,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the file at `path`.
    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.to_string(), contents.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of handles not yet closed.
    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    fn file(&self, handle: FileHandle) -> KernelResult<(&OpenFile, &[u8])> {
        let open = self.open.get(&handle.0).ok_or(KernelError::NullReference)?;
        let data = self.files.get(&open.path).ok_or(KernelError::NotFound)?;
        Ok((open, data))
    }
}

impl FileSystem for MemFs {
    fn open(&mut self, path: &str, flags: OpenFlags) -> KernelResult<FileHandle> {
        if flags.contains(OpenFlags::WRITE) {
            return Err(KernelError::NotSupported);
        }
        if !self.files.contains_key(path) {
            return Err(KernelError::NotFound);
        }

        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.open.insert(
            handle,
            OpenFile {
                path: path.to_string(),
                position: 0,
            },
        );
        Ok(FileHandle(handle))
    }

    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> KernelResult<usize> {
        let (open, data) = self.file(handle)?;
        let start = open.position.min(data.len());
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);

        if let Some(open) = self.open.get_mut(&handle.0) {
            open.position = start + count;
        }
        Ok(count)
    }

    fn seek(&mut self, handle: FileHandle, position: SeekFrom) -> KernelResult<usize> {
        let (open, data) = self.file(handle)?;
        let target = match position {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => open.position.checked_add_signed(delta),
            SeekFrom::End(delta) => data.len().checked_add_signed(delta),
        };
        let target = target
            .filter(|&target| target <= data.len())
            .ok_or(KernelError::OutOfBounds)?;

        if let Some(open) = self.open.get_mut(&handle.0) {
            open.position = target;
        }
        Ok(target)
    }

    fn close(&mut self, handle: FileHandle) -> KernelResult<()> {
        self.open
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(KernelError::NullReference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs() -> MemFs {
        let mut fs = MemFs::new();
        fs.insert("/bin/hello", b"hello world".to_vec());
        fs
    }

    #[test]
    fn read_in_pieces() {
        let mut fs = fs();
        let handle = fs.open("/bin/hello", OpenFlags::READ).unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(fs.read(handle, &mut buf), Ok(5));
        assert_eq!(&buf, b"hello");
        assert_eq!(fs.read(handle, &mut buf), Ok(5));
        assert_eq!(&buf, b" worl");
        assert_eq!(fs.read(handle, &mut buf), Ok(1));
        assert_eq!(fs.read(handle, &mut buf), Ok(0));
        fs.close(handle).unwrap();
        assert_eq!(fs.close(handle), Err(KernelError::NullReference));
    }

    #[test]
    fn seek_bounds() {
        let mut fs = fs();
        let handle = fs.open("/bin/hello", OpenFlags::READ).unwrap();

        assert_eq!(fs.seek(handle, SeekFrom::End(-5)), Ok(6));
        let mut buf = [0u8; 8];
        assert_eq!(fs.read(handle, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"world");

        assert_eq!(fs.seek(handle, SeekFrom::Current(-11)), Ok(0));
        assert_eq!(
            fs.seek(handle, SeekFrom::Current(-1)),
            Err(KernelError::OutOfBounds)
        );
        assert_eq!(
            fs.seek(handle, SeekFrom::Start(12)),
            Err(KernelError::OutOfBounds)
        );
    }

    #[test]
    fn open_errors() {
        let mut fs = fs();
        assert_eq!(
            fs.open("/missing", OpenFlags::READ),
            Err(KernelError::NotFound)
        );
        assert_eq!(
            fs.open("/bin/hello", OpenFlags::READ | OpenFlags::WRITE),
            Err(KernelError::NotSupported)
        );
    }

    #[test]
    fn read_all_closes_handle() {
        let mut fs = fs();
        let data = read_all(&mut fs, "/bin/hello").unwrap();
        assert_eq!(data, b"hello world");
        assert_eq!(fs.open_handles(), 0);
        assert_eq!(read_all(&mut fs, "/nope"), Err(KernelError::NotFound));
    }
}
