//! Memory-mapped file implementation of [`PersistentBuffer`].

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;
use memmap2::{Mmap, MmapMut};
use tracing::debug;

use crate::buffer::{PersistentBuffer, ProtectionLevel, check_writable_range, readable_len};
use crate::error::{Error, Result};

/// A [`PersistentBuffer`] backed by a memory-mapped file.
///
/// The file is locked exclusively for the lifetime of the buffer: a second
/// instance opened over the same path fails instead of silently corrupting
/// shared state. The lock is released on [`close`](PersistentBuffer::close)
/// or drop.
///
/// Capacity changes go through `ftruncate` and a remap, so growth is
/// zero-filled and truncated bytes never reappear.
#[derive(Debug)]
pub struct FileBuffer {
    /// File handle (owns the file lock)
    file: File,

    /// Current mapping; `None` while the file is empty (a zero-length
    /// region cannot be mapped).
    mapping: Option<Mapping>,

    capacity: u64,
    protection: ProtectionLevel,
    closed: bool,
}

#[derive(Debug)]
enum Mapping {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl FileBuffer {
    /// Opens (or, unless read-only, creates) a file-backed buffer.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the backing file
    /// * `protection` - Durability level for this buffer; `ReadOnly` opens
    ///   the file without write access
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, or if it is
    /// already locked by another buffer instance.
    pub fn open<P: AsRef<Path>>(path: P, protection: ProtectionLevel) -> Result<Self> {
        let path = path.as_ref();
        let read_only = protection == ProtectionLevel::ReadOnly;

        let file = if read_only {
            OpenOptions::new().read(true).open(path)?
        } else {
            OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?
        };

        // Exclusive file locking prevents two instances from corrupting the
        // same backing storage.
        file.try_lock_exclusive().map_err(|_| {
            Error::Io(std::io::Error::other(format!(
                "file is already open by another buffer instance: {}",
                path.display()
            )))
        })?;

        let capacity = file.metadata()?.len();
        let mapping = Self::map(&file, read_only, capacity)?;

        debug!(path = %path.display(), capacity, ?protection, "opened file buffer");

        Ok(Self { file, mapping, capacity, protection, closed: false })
    }

    fn map(file: &File, read_only: bool, capacity: u64) -> Result<Option<Mapping>> {
        if capacity == 0 {
            return Ok(None);
        }
        // SAFETY: the exclusive file lock taken at open keeps other
        // processes that honor the protocol from mutating the file while it
        // is mapped.
        let mapping = if read_only {
            Mapping::ReadOnly(unsafe { Mmap::map(file)? })
        } else {
            Mapping::ReadWrite(unsafe { MmapMut::map_mut(file)? })
        };
        Ok(Some(mapping))
    }

    fn check_open(&self) -> Result<()> {
        if self.closed { Err(Error::Closed) } else { Ok(()) }
    }

    fn bytes(&self) -> &[u8] {
        match &self.mapping {
            Some(Mapping::ReadWrite(m)) => &m[..],
            Some(Mapping::ReadOnly(m)) => &m[..],
            None => &[],
        }
    }
}

impl PersistentBuffer for FileBuffer {
    fn protection_level(&self) -> ProtectionLevel {
        self.protection
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if !self.is_read_only() {
            self.barrier(true)?;
        }
        self.mapping = None;
        self.closed = true;
        let _ = FileExt::unlock(&self.file);
        debug!("closed file buffer");
        Ok(())
    }

    fn capacity(&mut self) -> Result<u64> {
        self.check_open()?;
        Ok(self.capacity)
    }

    fn set_capacity(&mut self, new_capacity: u64) -> Result<()> {
        self.check_open()?;
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        if new_capacity == self.capacity {
            return Ok(());
        }
        // The old mapping must be dropped before the file shrinks; a remap
        // after ftruncate covers growth as well.
        self.mapping = None;
        self.file.set_len(new_capacity)?;
        self.mapping = Self::map(&self.file, false, new_capacity)?;
        self.capacity = new_capacity;
        Ok(())
    }

    fn get_some(&mut self, position: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let n = readable_len(self.capacity, position, buf.len())?;
        if n > 0 {
            let start = usize::try_from(position)
                .map_err(|_| Error::OutOfRange(format!("position {position} not addressable")))?;
            buf[..n].copy_from_slice(&self.bytes()[start..start + n]);
        }
        Ok(n)
    }

    fn put(&mut self, position: u64, buf: &[u8]) -> Result<()> {
        self.check_open()?;
        if self.is_read_only() {
            return Err(Error::ReadOnly);
        }
        check_writable_range(self.capacity, position, buf.len())?;
        if buf.is_empty() {
            return Ok(());
        }
        let start = usize::try_from(position)
            .map_err(|_| Error::OutOfRange(format!("position {position} not addressable")))?;
        match &mut self.mapping {
            Some(Mapping::ReadWrite(m)) => {
                m[start..start + buf.len()].copy_from_slice(buf);
                Ok(())
            }
            Some(Mapping::ReadOnly(_)) => Err(Error::ReadOnly),
            None => Err(Error::EndOfData),
        }
    }

    fn barrier(&mut self, force: bool) -> Result<()> {
        self.check_open()?;
        match self.protection {
            ProtectionLevel::None | ProtectionLevel::ReadOnly => Ok(()),
            ProtectionLevel::Barrier => {
                // Ordering only: schedule the dirty pages for writeback
                // without waiting for the device.
                if let Some(Mapping::ReadWrite(m)) = &self.mapping {
                    m.flush_async()?;
                }
                Ok(())
            }
            ProtectionLevel::Force => {
                if let Some(Mapping::ReadWrite(m)) = &self.mapping {
                    m.flush()?;
                }
                if force {
                    // fsync covers file length changes from set_capacity,
                    // which fdatasync may leave behind.
                    self.file.sync_all()?;
                }
                Ok(())
            }
        }
    }
}

impl Drop for FileBuffer {
    fn drop(&mut self) {
        // Explicitly unlock the file (happens automatically, but being explicit)
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn zero_length_open_and_grow() {
        let tmp = NamedTempFile::new().unwrap();
        let mut buf = FileBuffer::open(tmp.path(), ProtectionLevel::None).unwrap();
        assert_eq!(buf.capacity().unwrap(), 0);
        assert!(matches!(buf.get_some(0, &mut [0u8; 1]), Err(Error::EndOfData)));

        buf.set_capacity(16).unwrap();
        let mut b = [0xffu8; 16];
        buf.get(0, &mut b).unwrap();
        assert_eq!(b, [0u8; 16], "growth must zero-fill");
    }

    #[test]
    fn put_does_not_expand() {
        let tmp = NamedTempFile::new().unwrap();
        let mut buf = FileBuffer::open(tmp.path(), ProtectionLevel::None).unwrap();
        buf.set_capacity(8).unwrap();
        assert!(buf.put(4, &[1, 2, 3, 4]).is_ok());
        assert!(matches!(buf.put(5, &[1, 2, 3, 4]), Err(Error::EndOfData)));
    }

    #[test]
    fn closed_buffer_rejects_everything() {
        let tmp = NamedTempFile::new().unwrap();
        let mut buf = FileBuffer::open(tmp.path(), ProtectionLevel::None).unwrap();
        buf.set_capacity(8).unwrap();
        buf.close().unwrap();
        assert!(buf.is_closed());
        assert!(matches!(buf.capacity(), Err(Error::Closed)));
        assert!(matches!(buf.put(0, &[1]), Err(Error::Closed)));
        assert!(matches!(buf.get_some(0, &mut [0u8; 1]), Err(Error::Closed)));
        assert!(matches!(buf.barrier(true), Err(Error::Closed)));
    }
}
