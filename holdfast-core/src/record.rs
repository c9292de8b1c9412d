//! Fixed-record-length file manipulation.
//!
//! A [`FixedRecordFile`] views a plain file as a dense sequence of
//! equally-sized records: no header, no padding, record count implied by
//! file length. Records can be inserted in the middle, removed, and
//! swapped; the shifts behind insert and remove run through
//! [`copy_bytes`], an overlapping block copy whose direction is the
//! central correctness property of this module:
//!
//! - moving data **forward** (source before destination) copies chunks
//!   from the end of the range backward,
//! - moving data **backward** copies from the start forward.
//!
//! Copying in the wrong direction would overwrite source bytes before
//! they are read.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use fs2::FileExt as _;
use tracing::debug;

use crate::error::{Error, Result};

/// Size of the scratch buffer the copy loop moves data through.
const SCRATCH_SIZE: usize = 4096;

/// Reads exactly `buf.len()` bytes at `position`, reporting a short file
/// as [`Error::EndOfData`] rather than a generic I/O failure.
fn read_exact_at(file: &File, buf: &mut [u8], position: u64) -> Result<()> {
    file.read_exact_at(buf, position).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof { Error::EndOfData } else { Error::Io(e) }
    })
}

/// Copies `num_bytes` from `from_pos` in `from` to `to_pos` in `to`,
/// correct even when `from` and `to` are the same file and the ranges
/// overlap.
///
/// `num_bytes == 0` is a no-op.
///
/// # Errors
///
/// [`Error::EndOfData`] when the source range extends past the end of
/// `from`, or any underlying I/O failure.
pub fn copy_bytes(from: &File, from_pos: u64, to: &File, to_pos: u64, num_bytes: u64) -> Result<()> {
    if num_bytes == 0 {
        return Ok(());
    }
    let mut scratch = vec![0u8; SCRATCH_SIZE];

    if from_pos < to_pos {
        // Destination is ahead of the source: copy backward, last chunk
        // first, so overlapping source bytes are read before they are
        // overwritten.
        let mut remaining = num_bytes;
        while remaining > 0 {
            let chunk = remaining.min(SCRATCH_SIZE as u64) as usize;
            remaining -= chunk as u64;
            read_exact_at(from, &mut scratch[..chunk], from_pos + remaining)?;
            to.write_all_at(&scratch[..chunk], to_pos + remaining)?;
        }
    } else {
        // Destination is at or behind the source: copy forward.
        let mut copied = 0;
        while copied < num_bytes {
            let chunk = (num_bytes - copied).min(SCRATCH_SIZE as u64) as usize;
            read_exact_at(from, &mut scratch[..chunk], from_pos + copied)?;
            to.write_all_at(&scratch[..chunk], to_pos + copied)?;
            copied += chunk as u64;
        }
    }
    Ok(())
}

/// Copies `num_records` records between two record files (possibly the
/// same one) with identical record lengths.
///
/// # Errors
///
/// [`Error::OutOfRange`] when the record lengths differ; otherwise as
/// [`copy_bytes`].
pub fn copy_records(
    from: &FixedRecordFile,
    from_index: u64,
    to: &FixedRecordFile,
    to_index: u64,
    num_records: u64,
) -> Result<()> {
    if from.record_length != to.record_length {
        return Err(Error::OutOfRange(format!(
            "record length mismatch: from={}, to={}",
            from.record_length, to.record_length
        )));
    }
    let len = u64::from(from.record_length);
    copy_bytes(&from.file, from_index * len, &to.file, to_index * len, num_records * len)
}

/// A file of fixed-length records with insert, remove, and swap support.
///
/// Like every owner of backing storage in this crate, the file is locked
/// exclusively while open.
#[derive(Debug)]
pub struct FixedRecordFile {
    file: File,
    record_length: u32,
}

impl FixedRecordFile {
    /// Opens (or creates) a record file with the given record length.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] for a zero record length, [`Error::Corrupt`]
    /// when an existing file's length is not a whole number of records, or
    /// any I/O failure (including a lock held by another instance).
    pub fn open<P: AsRef<Path>>(path: P, record_length: u32) -> Result<Self> {
        if record_length == 0 {
            return Err(Error::OutOfRange("record length must be positive".into()));
        }
        let path = path.as_ref();
        let file =
            OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        file.try_lock_exclusive().map_err(|_| {
            Error::Io(std::io::Error::other(format!(
                "record file is already open by another instance: {}",
                path.display()
            )))
        })?;

        let len = file.metadata()?.len();
        if len % u64::from(record_length) != 0 {
            return Err(Error::Corrupt(format!(
                "file length {len} is not a multiple of the record length {record_length}"
            )));
        }

        debug!(path = %path.display(), record_length, records = len / u64::from(record_length), "opened record file");

        Ok(Self { file, record_length })
    }

    /// Returns the immutable record length in bytes.
    #[must_use]
    pub fn record_length(&self) -> u32 {
        self.record_length
    }

    /// Returns the number of records currently in the file.
    ///
    /// # Errors
    ///
    /// Any I/O failure while reading file metadata.
    pub fn record_count(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len() / u64::from(self.record_length))
    }

    /// Computes the byte offset of an existing record.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] when `index` is at or past the current record
    /// count.
    pub fn record_offset(&self, index: u64) -> Result<u64> {
        let offset = index
            .checked_mul(u64::from(self.record_length))
            .ok_or_else(|| Error::OutOfRange(format!("record index {index} overflows")))?;
        if offset >= self.file.metadata()?.len() {
            return Err(Error::OutOfRange(format!(
                "record index {index} >= record count {}",
                self.record_count()?
            )));
        }
        Ok(offset)
    }

    /// Reads the record at `index` into `buf`, which must be exactly one
    /// record long.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] for a bad index or a missized `buf`;
    /// otherwise any I/O failure.
    pub fn read_record(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.record_length as usize {
            return Err(Error::OutOfRange(format!(
                "buffer is {} bytes, record length is {}",
                buf.len(),
                self.record_length
            )));
        }
        let offset = self.record_offset(index)?;
        read_exact_at(&self.file, buf, offset)
    }

    /// Overwrites the record at `index` with `buf`, which must be exactly
    /// one record long.
    ///
    /// # Errors
    ///
    /// As [`read_record`](FixedRecordFile::read_record).
    pub fn write_record(&mut self, index: u64, buf: &[u8]) -> Result<()> {
        if buf.len() != self.record_length as usize {
            return Err(Error::OutOfRange(format!(
                "buffer is {} bytes, record length is {}",
                buf.len(),
                self.record_length
            )));
        }
        let offset = self.record_offset(index)?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    /// Opens a gap of `num_records` records at `index`, returning the byte
    /// offset of the first new record.
    ///
    /// Inserting at or past the current end simply extends the file; a
    /// mid-file insert shifts every record at or after `index` forward via
    /// the overlapping copy. The content of the new records is unspecified
    /// until written.
    ///
    /// `num_records == 0` is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] on arithmetic overflow, otherwise any I/O
    /// failure.
    pub fn add_records(&mut self, index: u64, num_records: u64) -> Result<u64> {
        let record_len = u64::from(self.record_length);
        let start = index
            .checked_mul(record_len)
            .ok_or_else(|| Error::OutOfRange(format!("record index {index} overflows")))?;
        if num_records == 0 {
            return Ok(start);
        }
        let added = num_records
            .checked_mul(record_len)
            .ok_or_else(|| Error::OutOfRange(format!("record count {num_records} overflows")))?;

        let len = self.file.metadata()?.len();
        if start >= len {
            // At or beyond the end: no shifting, just extend.
            self.file.set_len(start + added)?;
        } else {
            self.file.set_len(len + added)?;
            copy_bytes(&self.file, start, &self.file, start + added, len - start)?;
        }
        Ok(start)
    }

    /// Removes the record at `index`, shifting everything after it back
    /// and truncating the file by one record length.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] for a bad index, otherwise any I/O failure.
    pub fn remove_record(&mut self, index: u64) -> Result<()> {
        let start = self.record_offset(index)?;
        let record_len = u64::from(self.record_length);
        let new_end = self.file.metadata()?.len() - record_len;

        // Shift records only when the removed one is not last.
        if new_end > start {
            copy_bytes(&self.file, start + record_len, &self.file, start, new_end - start)?;
        }
        self.file.set_len(new_end)?;
        Ok(())
    }

    /// Truncates the file to zero records.
    ///
    /// # Errors
    ///
    /// Any I/O failure while truncating.
    pub fn remove_all_records(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        Ok(())
    }

    /// Exchanges the contents of two records. Equal indices are a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] when either index is bad, otherwise any I/O
    /// failure.
    pub fn swap(&mut self, index1: u64, index2: u64) -> Result<()> {
        if index1 == index2 {
            return Ok(());
        }
        let offset1 = self.record_offset(index1)?;
        let offset2 = self.record_offset(index2)?;

        let mut buf1 = vec![0u8; self.record_length as usize];
        let mut buf2 = vec![0u8; self.record_length as usize];
        read_exact_at(&self.file, &mut buf1, offset1)?;
        read_exact_at(&self.file, &mut buf2, offset2)?;
        self.file.write_all_at(&buf1, offset2)?;
        self.file.write_all_at(&buf2, offset1)?;
        Ok(())
    }

    /// Forces file content and length to stable storage.
    ///
    /// # Errors
    ///
    /// Any I/O failure during fsync.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for FixedRecordFile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn zero_record_length_is_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        assert!(matches!(FixedRecordFile::open(tmp.path(), 0), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn partial_record_is_corrupt() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), [0u8; 10]).unwrap();
        assert!(matches!(FixedRecordFile::open(tmp.path(), 4), Err(Error::Corrupt(_))));
    }

    #[test]
    fn copy_bytes_zero_is_noop() {
        let tmp = NamedTempFile::new().unwrap();
        let f = FixedRecordFile::open(tmp.path(), 4).unwrap();
        copy_bytes(&f.file, 0, &f.file, 0, 0).unwrap();
        assert_eq!(f.record_count().unwrap(), 0);
    }

    #[test]
    fn swap_on_missing_records_is_out_of_range() {
        let tmp = NamedTempFile::new().unwrap();
        let mut f = FixedRecordFile::open(tmp.path(), 4).unwrap();
        assert!(f.swap(3, 3).is_ok(), "equal indices are a no-op even when absent");
        assert!(matches!(f.swap(0, 1), Err(Error::OutOfRange(_))));
    }
}
