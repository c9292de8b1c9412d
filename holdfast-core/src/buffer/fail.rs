//! Power-failure simulation for crash-recovery testing.
//!
//! [`RandomFailBuffer`] wraps another [`PersistentBuffer`] and holds every
//! write in a sector-granular cache until the next barrier. At randomly
//! chosen operations it simulates a power failure: an arbitrary subset of
//! the cached sectors is written through, the wrapped buffer is forced and
//! closed, and the harness refuses all further use.
//!
//! # Physical model
//!
//! The simulation encodes the assumptions recovery code is allowed to make
//! about real hardware:
//!
//! 1. A single sector is written completely or not at all.
//! 2. Sectors written between barriers may reach the medium in any order
//!    and any subset.
//! 3. A sector's versions are never applied out of chronological order.
//! 4. The wrapped buffer's own `barrier` implementation is correct.
//!
//! Until a failure triggers, the decorator is observationally identical to
//! the wrapped buffer.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::buffer::{PersistentBuffer, ProtectionLevel};
use crate::error::{Error, Result};

/// The number of bytes assumed to be written atomically by the backing
/// medium.
pub const SECTOR_SIZE: usize = 512;

/// Failure probability per operation category, expressed as "one in N"
/// (`0` disables failures for that category).
///
/// The defaults mirror how often each operation is a realistic failure
/// point: capacity queries and reads hardly ever fail, capacity changes and
/// writes do.
#[derive(Debug, Clone, Copy)]
pub struct FailureOdds {
    /// Odds for capacity queries.
    pub capacity: u32,
    /// Odds for capacity changes.
    pub set_capacity: u32,
    /// Odds for reads.
    pub get_some: u32,
    /// Odds for writes.
    pub put: u32,
    /// Odds for barriers.
    pub barrier: u32,
}

impl FailureOdds {
    /// Never fail: the decorator becomes a transparent write-caching layer.
    pub const NEVER: Self =
        Self { capacity: 0, set_capacity: 0, get_some: 0, put: 0, barrier: 0 };
}

impl Default for FailureOdds {
    fn default() -> Self {
        Self { capacity: 500_000, set_capacity: 50, get_some: 50_000, put: 5_000, barrier: 5_000 }
    }
}

/// A [`PersistentBuffer`] decorator that injects random power failures.
#[derive(Debug)]
pub struct RandomFailBuffer<B: PersistentBuffer> {
    wrapped: B,
    odds: FailureOdds,
    rng: StdRng,
    closed: bool,

    /// Latest pending content per sector-aligned offset, accumulated since
    /// the last completed barrier. Entries are always `SECTOR_SIZE` long,
    /// even for the final partial sector of the buffer.
    write_cache: HashMap<u64, Box<[u8; SECTOR_SIZE]>>,
}

fn sector_of(position: u64) -> u64 {
    position & !(SECTOR_SIZE as u64 - 1)
}

impl<B: PersistentBuffer> RandomFailBuffer<B> {
    /// Wraps `wrapped` with failure injection at the given odds, seeded
    /// from the operating system.
    pub fn new(wrapped: B, odds: FailureOdds) -> Self {
        Self::with_rng(wrapped, odds, StdRng::from_os_rng())
    }

    /// Wraps `wrapped` with a deterministic seed, for reproducible tests.
    pub fn with_seed(wrapped: B, odds: FailureOdds, seed: u64) -> Self {
        Self::with_rng(wrapped, odds, StdRng::seed_from_u64(seed))
    }

    fn with_rng(wrapped: B, odds: FailureOdds, rng: StdRng) -> Self {
        Self { wrapped, odds, rng, closed: false, write_cache: HashMap::new() }
    }

    /// Releases the wrapped buffer, discarding any unflushed cache.
    #[must_use]
    pub fn into_inner(self) -> B {
        self.wrapped
    }

    fn check_open(&self) -> Result<()> {
        if self.closed { Err(Error::Closed) } else { Ok(()) }
    }

    /// Rolls the dice for one operation category; on a hit, commits a
    /// random subset of the dirty sectors, closes everything, and reports
    /// the failure as an I/O error.
    fn maybe_fail(&mut self, category: &str, interval: u32) -> Result<()> {
        if interval == 0 || self.rng.random_range(0..interval) != 0 {
            return Ok(());
        }
        self.closed = true;
        if !self.write_cache.is_empty() {
            let capacity = self.wrapped.capacity()?;
            let mut sectors: Vec<u64> = self.write_cache.keys().copied().collect();
            sectors.shuffle(&mut self.rng);
            // Strict subset: at least one cached sector is always lost.
            let survivors = self.rng.random_range(0..sectors.len());
            for &sector in &sectors[..survivors] {
                let end = (sector + SECTOR_SIZE as u64).min(capacity);
                if let Some(block) = self.write_cache.get(&sector) {
                    self.wrapped.put(sector, &block[..(end - sector) as usize])?;
                }
            }
            self.write_cache.clear();
        }
        self.wrapped.barrier(true)?;
        self.wrapped.close()?;
        Err(Error::Io(std::io::Error::other(format!(
            "{category}: simulated power failure; the buffer is now unusable"
        ))))
    }

    /// Writes every cached sector through to the wrapped buffer.
    fn flush_write_cache(&mut self) -> Result<()> {
        if self.write_cache.is_empty() {
            return Ok(());
        }
        let capacity = self.wrapped.capacity()?;
        for (&sector, block) in &self.write_cache {
            let end = (sector + SECTOR_SIZE as u64).min(capacity);
            self.wrapped.put(sector, &block[..(end - sector) as usize])?;
        }
        self.write_cache.clear();
        Ok(())
    }
}

impl<B: PersistentBuffer> PersistentBuffer for RandomFailBuffer<B> {
    fn protection_level(&self) -> ProtectionLevel {
        self.wrapped.protection_level()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush_write_cache()?;
        self.closed = true;
        self.wrapped.close()
    }

    fn capacity(&mut self) -> Result<u64> {
        self.check_open()?;
        self.maybe_fail("capacity", self.odds.capacity)?;
        self.wrapped.capacity()
    }

    fn set_capacity(&mut self, new_capacity: u64) -> Result<()> {
        self.check_open()?;
        self.maybe_fail("set_capacity", self.odds.set_capacity)?;
        // Cached writes past the new end are dropped; a sector straddling
        // the boundary keeps its head and zeroes the truncated tail, so a
        // later regrowth cannot resurrect old bytes from the cache.
        self.write_cache.retain(|&sector, _| sector < new_capacity);
        for (&sector, block) in &mut self.write_cache {
            let sector_end = sector + SECTOR_SIZE as u64;
            if new_capacity < sector_end {
                block[(new_capacity - sector) as usize..].fill(0);
            }
        }
        self.wrapped.set_capacity(new_capacity)
    }

    fn get_some(&mut self, position: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let capacity = self.wrapped.capacity()?;
        if position >= capacity {
            return Err(Error::EndOfData);
        }
        self.maybe_fail("get_some", self.odds.get_some)?;

        let len = buf.len().min((capacity - position) as usize);
        let mut read = 0;
        while read < len {
            let pos = position + read as u64;
            let sector = sector_of(pos);
            let in_sector = (pos - sector) as usize;
            let chunk = (SECTOR_SIZE - in_sector).min(len - read);
            let count = if let Some(block) = self.write_cache.get(&sector) {
                buf[read..read + chunk].copy_from_slice(&block[in_sector..in_sector + chunk]);
                chunk
            } else {
                self.wrapped.get_some(pos, &mut buf[read..read + chunk])?
            };
            read += count;
            if count < chunk {
                break;
            }
        }
        Ok(read)
    }

    fn put(&mut self, position: u64, buf: &[u8]) -> Result<()> {
        self.check_open()?;
        if self.wrapped.is_read_only() {
            return Err(Error::ReadOnly);
        }
        let capacity = self.wrapped.capacity()?;
        let end = position + buf.len() as u64;
        if end > capacity {
            return Err(Error::EndOfData);
        }
        self.maybe_fail("put", self.odds.put)?;

        let Self { wrapped, write_cache, .. } = self;
        let mut written = 0;
        while written < buf.len() {
            let pos = position + written as u64;
            let sector = sector_of(pos);
            let in_sector = (pos - sector) as usize;
            let chunk = (SECTOR_SIZE - in_sector).min(buf.len() - written);
            let block = match write_cache.entry(sector) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(v) => {
                    // First touch of this sector since the last barrier:
                    // seed the cache with its current content.
                    let mut block = Box::new([0u8; SECTOR_SIZE]);
                    let sector_end = (sector + SECTOR_SIZE as u64).min(capacity);
                    wrapped.get(sector, &mut block[..(sector_end - sector) as usize])?;
                    v.insert(block)
                }
            };
            // Update the cache only; nothing reaches the wrapped buffer
            // until a barrier or a simulated failure.
            block[in_sector..in_sector + chunk].copy_from_slice(&buf[written..written + chunk]);
            written += chunk;
        }
        Ok(())
    }

    fn barrier(&mut self, force: bool) -> Result<()> {
        self.check_open()?;
        self.maybe_fail("barrier", self.odds.barrier)?;
        self.flush_write_cache()?;
        self.wrapped.barrier(force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::HeapBuffer;

    fn harness() -> RandomFailBuffer<HeapBuffer> {
        RandomFailBuffer::with_seed(HeapBuffer::with_capacity(4096), FailureOdds::NEVER, 42)
    }

    #[test]
    fn reads_see_cached_writes_before_barrier() {
        let mut buf = harness();
        buf.put(100, &[1, 2, 3, 4]).unwrap();
        let mut b = [0u8; 4];
        buf.get(100, &mut b).unwrap();
        assert_eq!(b, [1, 2, 3, 4]);
    }

    #[test]
    fn writes_span_sector_boundaries() {
        let mut buf = harness();
        let data: Vec<u8> = (0..=255).collect();
        buf.put(SECTOR_SIZE as u64 - 128, &data).unwrap();
        let mut back = vec![0u8; data.len()];
        buf.get(SECTOR_SIZE as u64 - 128, &mut back).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn writes_stay_cached_until_barrier() {
        // Without a barrier, the wrapped buffer never sees the put.
        let mut buf =
            RandomFailBuffer::with_seed(HeapBuffer::with_capacity(2048), FailureOdds::NEVER, 7);
        buf.put(512, &[5; 512]).unwrap();
        let mut inner = buf.into_inner();
        let mut b = [0u8; 512];
        inner.get(512, &mut b).unwrap();
        assert_eq!(b, [0u8; 512], "put must cache, not write through");

        // With a barrier, the put lands in full.
        let mut buf = RandomFailBuffer::with_seed(inner, FailureOdds::NEVER, 7);
        buf.put(512, &[5; 512]).unwrap();
        buf.barrier(true).unwrap();
        let mut inner = buf.into_inner();
        inner.get(512, &mut b).unwrap();
        assert_eq!(b, [5u8; 512]);
    }

    #[test]
    fn truncation_zeroes_cached_tail() {
        let mut buf = harness();
        buf.put(1000, &[0xAA; 24]).unwrap();
        buf.set_capacity(1012).unwrap();
        buf.set_capacity(1024).unwrap();
        let mut b = [0u8; 24];
        buf.get(1000, &mut b).unwrap();
        assert_eq!(&b[..12], &[0xAA; 12]);
        assert_eq!(&b[12..], &[0u8; 12], "cached bytes past a truncation must not survive");
    }

    #[test]
    fn failure_closes_permanently() {
        // Odds of 1 fail on the very first roll.
        let inner = HeapBuffer::with_capacity(1024);
        let odds = FailureOdds { put: 1, ..FailureOdds::NEVER };
        let mut buf = RandomFailBuffer::with_seed(inner, odds, 1);

        assert!(matches!(buf.put(0, &[1]), Err(Error::Io(_))));
        assert!(buf.is_closed());
        assert!(matches!(buf.capacity(), Err(Error::Closed)));
        assert!(matches!(buf.barrier(false), Err(Error::Closed)));
    }
}
