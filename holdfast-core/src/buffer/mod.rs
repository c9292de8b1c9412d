//! The persistent buffer capability and its implementations.
//!
//! A [`PersistentBuffer`] is an addressable, growable region of bytes with
//! explicit durability control. It is the storage substrate for the
//! persistent collections in this crate: collections serialize their state
//! into the buffer and call [`PersistentBuffer::barrier`] at the points
//! where ordering or durability matters.
//!
//! Three implementations ship with the crate:
//!
//! - [`FileBuffer`] — memory-mapped file backing, the durable variant
//! - [`HeapBuffer`] — plain `Vec<u8>` backing, for tests and ephemeral data
//! - [`RandomFailBuffer`] — a decorator that simulates power failures, used
//!   to validate crash recovery
//!
//! Buffers are single-process, single-writer: one instance owns its backing
//! storage exclusively, and no instance is safe for concurrent use from
//! multiple threads without external synchronization.

mod fail;
mod file;
mod heap;

pub use fail::{FailureOdds, RandomFailBuffer, SECTOR_SIZE};
pub use file::FileBuffer;
pub use heap::HeapBuffer;

use crate::error::{Error, Result};

/// Durability guarantee selected when a buffer is opened.
///
/// The level caps what [`PersistentBuffer::barrier`] may do: a barrier call
/// honors the configured level and never exceeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionLevel {
    /// Writes may be buffered indefinitely by the OS; barriers are no-ops.
    None,
    /// Barriers enforce write ordering but do not force stable storage.
    Barrier,
    /// Barriers with `force = true` additionally reach stable storage
    /// before returning.
    Force,
    /// The buffer is opened for reading only; all mutations fail.
    ReadOnly,
}

/// An addressable, growable region of bytes with explicit durability.
///
/// All multi-byte values read and written through the typed helpers are
/// big-endian; this is the wire format of every structure persisted by this
/// crate.
pub trait PersistentBuffer {
    /// Returns the durability level the buffer was opened with.
    fn protection_level(&self) -> ProtectionLevel;

    /// Checks whether this buffer has been closed.
    fn is_closed(&self) -> bool;

    /// Closes the buffer. Every subsequent operation fails with
    /// [`Error::Closed`].
    ///
    /// # Errors
    ///
    /// Returns an error if flushing pending state fails.
    fn close(&mut self) -> Result<()>;

    /// Returns the current capacity in bytes.
    ///
    /// Takes `&mut self` like every other buffer operation: a decorated
    /// buffer may treat even a capacity query as a failure point.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Closed`] after [`PersistentBuffer::close`].
    fn capacity(&mut self) -> Result<u64>;

    /// Grows or shrinks the buffer. New bytes are zero-filled; truncated
    /// bytes are discarded and do not reappear if the buffer grows again.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ReadOnly`] on a read-only buffer and
    /// [`Error::Closed`] on a closed one.
    fn set_capacity(&mut self, new_capacity: u64) -> Result<()>;

    /// Reads at least one and at most `buf.len()` bytes starting at
    /// `position`, returning the number of bytes read.
    ///
    /// An empty `buf` reads zero bytes. A non-empty request at or past the
    /// end of content fails with [`Error::EndOfData`].
    ///
    /// # Errors
    ///
    /// [`Error::EndOfData`], [`Error::Closed`], or an I/O failure.
    fn get_some(&mut self, position: u64, buf: &mut [u8]) -> Result<usize>;

    /// Writes `buf` at `position`. The buffer is never expanded by a
    /// write: writing past the current capacity fails with
    /// [`Error::EndOfData`] and the caller must
    /// [`set_capacity`](PersistentBuffer::set_capacity) first.
    ///
    /// # Errors
    ///
    /// [`Error::EndOfData`], [`Error::ReadOnly`], [`Error::Closed`], or an
    /// I/O failure.
    fn put(&mut self, position: u64, buf: &[u8]) -> Result<()>;

    /// Write checkpoint.
    ///
    /// No write issued after a barrier may reach stable storage before a
    /// write issued before it. With `force = true` the barrier additionally
    /// drives all prior writes to stable storage — if, and only if, the
    /// configured [`ProtectionLevel`] permits: `None` ignores barriers
    /// entirely and `Barrier` downgrades a forced barrier to ordering only.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] or an I/O failure while flushing.
    fn barrier(&mut self, force: bool) -> Result<()>;

    /// Whether the buffer rejects all mutating operations.
    fn is_read_only(&self) -> bool {
        self.protection_level() == ProtectionLevel::ReadOnly
    }

    /// Reads exactly `buf.len()` bytes starting at `position`.
    ///
    /// # Errors
    ///
    /// [`Error::EndOfData`] when the content ends early; otherwise as
    /// [`get_some`](PersistentBuffer::get_some).
    fn get(&mut self, position: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.get_some(position + done as u64, &mut buf[done..])?;
            done += n;
        }
        Ok(())
    }

    /// Forces everything written so far to stable storage, subject to the
    /// configured protection level. Equivalent to `barrier(true)`.
    ///
    /// # Errors
    ///
    /// As [`barrier`](PersistentBuffer::barrier).
    fn sync(&mut self) -> Result<()> {
        self.barrier(true)
    }

    /// Reads one byte at `position`.
    ///
    /// # Errors
    ///
    /// As [`get`](PersistentBuffer::get).
    fn read_u8(&mut self, position: u64) -> Result<u8> {
        let mut b = [0u8; 1];
        self.get(position, &mut b)?;
        Ok(b[0])
    }

    /// Reads a boolean at `position`: zero is `false`, anything else `true`.
    ///
    /// # Errors
    ///
    /// As [`get`](PersistentBuffer::get).
    fn read_bool(&mut self, position: u64) -> Result<bool> {
        Ok(self.read_u8(position)? != 0)
    }

    /// Reads a big-endian `u32` at an arbitrary (unaligned) byte offset.
    ///
    /// # Errors
    ///
    /// As [`get`](PersistentBuffer::get).
    fn read_u32(&mut self, position: u64) -> Result<u32> {
        let mut b = [0u8; 4];
        self.get(position, &mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    /// Reads a big-endian `u64` at an arbitrary (unaligned) byte offset.
    ///
    /// # Errors
    ///
    /// As [`get`](PersistentBuffer::get).
    fn read_u64(&mut self, position: u64) -> Result<u64> {
        let mut b = [0u8; 8];
        self.get(position, &mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    /// Writes a big-endian `u32` at `position` without expanding the buffer.
    ///
    /// # Errors
    ///
    /// As [`put`](PersistentBuffer::put).
    fn write_u32(&mut self, position: u64, value: u32) -> Result<()> {
        self.put(position, &value.to_be_bytes())
    }

    /// Writes a big-endian `u64` at `position` without expanding the buffer.
    ///
    /// # Errors
    ///
    /// As [`put`](PersistentBuffer::put).
    fn write_u64(&mut self, position: u64, value: u64) -> Result<()> {
        self.put(position, &value.to_be_bytes())
    }
}

/// Shared bounds check for reads: returns how many bytes are available for
/// a request at `position`, or the appropriate error.
pub(crate) fn readable_len(capacity: u64, position: u64, requested: usize) -> Result<usize> {
    if requested == 0 {
        return Ok(0);
    }
    if position >= capacity {
        return Err(Error::EndOfData);
    }
    let available = capacity - position;
    Ok(requested.min(usize::try_from(available).unwrap_or(usize::MAX)))
}

/// Shared bounds check for writes: a put must land entirely inside the
/// current capacity.
pub(crate) fn check_writable_range(capacity: u64, position: u64, len: usize) -> Result<()> {
    let end = position
        .checked_add(len as u64)
        .ok_or_else(|| Error::OutOfRange(format!("write range overflows at {position}")))?;
    if end > capacity {
        return Err(Error::EndOfData);
    }
    Ok(())
}
