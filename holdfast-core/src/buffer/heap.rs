//! In-memory implementation of [`PersistentBuffer`].

use crate::buffer::{PersistentBuffer, ProtectionLevel, check_writable_range, readable_len};
use crate::error::{Error, Result};

/// A [`PersistentBuffer`] backed by a heap-allocated byte vector.
///
/// Nothing survives the process — this variant exists for unit tests and
/// for collections that want buffer semantics without a file. Barriers are
/// accepted and ignored; the protection level is always
/// [`ProtectionLevel::None`].
#[derive(Debug, Default)]
pub struct HeapBuffer {
    bytes: Vec<u8>,
    closed: bool,
}

impl HeapBuffer {
    /// Creates an empty in-memory buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a zero-filled in-memory buffer of the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: u64) -> Self {
        Self { bytes: vec![0; usize::try_from(capacity).unwrap_or(0)], closed: false }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed { Err(Error::Closed) } else { Ok(()) }
    }
}

impl PersistentBuffer for HeapBuffer {
    fn protection_level(&self) -> ProtectionLevel {
        ProtectionLevel::None
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }

    fn capacity(&mut self) -> Result<u64> {
        self.check_open()?;
        Ok(self.bytes.len() as u64)
    }

    fn set_capacity(&mut self, new_capacity: u64) -> Result<()> {
        self.check_open()?;
        let new_len = usize::try_from(new_capacity)
            .map_err(|_| Error::OutOfRange(format!("capacity {new_capacity} not addressable")))?;
        self.bytes.resize(new_len, 0);
        Ok(())
    }

    fn get_some(&mut self, position: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let n = readable_len(self.bytes.len() as u64, position, buf.len())?;
        if n > 0 {
            let start = position as usize;
            buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        }
        Ok(n)
    }

    fn put(&mut self, position: u64, buf: &[u8]) -> Result<()> {
        self.check_open()?;
        check_writable_range(self.bytes.len() as u64, position, buf.len())?;
        let start = position as usize;
        self.bytes[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn barrier(&mut self, _force: bool) -> Result<()> {
        self.check_open()
    }
}
