//! A doubly linked list persisted inside a [`PersistentBuffer`].
//!
//! The list survives process restart: its header and every node live in
//! the buffer, and each mutation drives the buffer through an ordered
//! sequence of writes and barriers so that a crash at any point leaves a
//! state the next open can reconcile.
//!
//! # On-buffer layout
//!
//! All fields are big-endian. `u64::MAX` ([`NIL`]) encodes "none".
//!
//! ```text
//! header (48 bytes at offset 0):
//! Offset  Size  Field
//! ------  ----  -----
//! 0       8     magic: b"HOLDFAST"
//! 8       4     format version
//! 12      4     reserved
//! 16      8     element count      ┐
//! 24      8     head node offset   │ the state block: committed
//! 32      8     tail node offset   │ together with a single write
//! 40      8     free chain offset  ┘
//!
//! node block:
//! 0       8     prev node offset (NIL at the head)
//! 8       8     next node offset (NIL at the tail; next free block
//!               while the node sits on the free chain)
//! 16      4     payload capacity — only for variable-size serializers;
//!               fixed for the lifetime of the block
//! 16|20   ...   serialized element (variable payloads self-describe
//!               their exact length via the serializer's 4-byte prefix)
//! ```
//!
//! The state block fits in one sector, so under the physical model of
//! [`crate::buffer::RandomFailBuffer`] a header commit is atomic: it is
//! the commit point of every mutation.
//!
//! # Crash consistency
//!
//! A mutation writes the new node first, patches neighbor links around the
//! commit point, and commits the header in between — each step separated
//! by a barrier. A crash can therefore leave at most one direction of the
//! chain out of step with the header, and
//! [`open`](PersistentLinkedList::open) repairs that direction from the
//! other. Blocks reachable from neither the chain nor the free chain are
//! leaked space, never corruption.
//!
//! Removed nodes are pushed onto the free chain and reused by later
//! insertions of equal or smaller serialized size; the buffer itself never
//! shrinks below its high-water mark.
//!
//! Like the buffers it runs on, a list is single-process and
//! single-writer; wrap it in a mutex if it must cross threads.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::buffer::PersistentBuffer;
use crate::error::{Error, Result};
use crate::serial::Serializer;

/// Magic bytes identifying a persisted list.
pub const MAGIC: &[u8; 8] = b"HOLDFAST";

/// Current list format version.
pub const FORMAT_VERSION: u32 = 1;

/// Sentinel offset meaning "none".
pub const NIL: u64 = u64::MAX;

/// Size of the persisted header in bytes.
pub const HEADER_SIZE: u64 = 48;

/// Offset of the atomically-committed state block inside the header.
const STATE_OFFSET: u64 = 16;

/// Byte size of a node's two link fields.
const NODE_LINKS: u64 = 16;

const NODE_PREV: u64 = 0;
const NODE_NEXT: u64 = 8;

/// A persistent doubly linked list of serialized elements.
///
/// Elements are encoded by `S` and stored in `B`; the list owns both. The
/// durability of each mutation follows the buffer's configured
/// [`ProtectionLevel`](crate::buffer::ProtectionLevel).
///
/// Positional operations walk node hops from whichever end is closer, so
/// `get(i)` costs `O(min(i, len - i))` buffer reads — the usual doubly
/// linked list profile, paid in persisted hops.
pub struct PersistentLinkedList<S: Serializer, B: PersistentBuffer> {
    buffer: B,
    serializer: S,

    // In-memory copy of the persisted state block; kept in step with the
    // buffer by committing after every change.
    count: u64,
    head: u64,
    tail: u64,
    free: u64,
}

struct Alloc {
    offset: u64,
    /// What the header's free pointer must become when this allocation
    /// commits.
    new_free: u64,
    /// Freshly appended block (needs its capacity field written) versus a
    /// reused free block (keeps its recorded capacity).
    fresh: bool,
}

impl<S: Serializer, B: PersistentBuffer> PersistentLinkedList<S, B> {
    /// Opens a list over `buffer`.
    ///
    /// An empty buffer is formatted in place. A non-empty buffer is
    /// validated: a writable open repairs the residue of an interrupted
    /// mutation (logging each repair), a read-only open reports any such
    /// residue as [`Error::Corrupt`].
    ///
    /// # Errors
    ///
    /// [`Error::Corrupt`] for an unrecognized or irreconcilable image, or
    /// any buffer failure.
    pub fn open(mut buffer: B, serializer: S) -> Result<Self> {
        let capacity = buffer.capacity()?;
        let needs_format = if capacity == 0 {
            true
        } else if capacity < HEADER_SIZE {
            return Err(Error::Corrupt(format!("buffer of {capacity} bytes cannot hold a header")));
        } else {
            // An all-zero header is the residue of a format interrupted
            // before its commit; anything else with a wrong magic is a
            // foreign file.
            let mut header = [0u8; HEADER_SIZE as usize];
            buffer.get(0, &mut header)?;
            capacity == HEADER_SIZE && header == [0u8; HEADER_SIZE as usize]
        };

        if needs_format {
            if buffer.is_read_only() {
                return Err(Error::Corrupt("buffer was never formatted as a list".into()));
            }
            buffer.set_capacity(HEADER_SIZE)?;
            let mut header = [0u8; HEADER_SIZE as usize];
            header[..8].copy_from_slice(MAGIC);
            header[8..12].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
            header[16..24].copy_from_slice(&0u64.to_be_bytes());
            header[24..32].copy_from_slice(&NIL.to_be_bytes());
            header[32..40].copy_from_slice(&NIL.to_be_bytes());
            header[40..48].copy_from_slice(&NIL.to_be_bytes());
            buffer.put(0, &header)?;
            buffer.barrier(true)?;
        }

        let mut magic = [0u8; 8];
        buffer.get(0, &mut magic)?;
        if &magic != MAGIC {
            return Err(Error::Corrupt("bad magic".into()));
        }
        let version = buffer.read_u32(8)?;
        if version == 0 || version > FORMAT_VERSION {
            return Err(Error::Corrupt(format!("unsupported format version {version}")));
        }

        let count = buffer.read_u64(16)?;
        let head = buffer.read_u64(24)?;
        let tail = buffer.read_u64(32)?;
        let free = buffer.read_u64(40)?;

        let mut list = Self { buffer, serializer, count, head, tail, free };
        list.check_consistency()?;
        debug!(count = list.count, "opened persistent list");
        Ok(list)
    }

    /// Number of elements in the list.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.count
    }

    /// Whether the list holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Reads the first element.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] on an empty list.
    pub fn first(&mut self) -> Result<S::Value> {
        if self.head == NIL {
            return Err(Error::OutOfRange("list is empty".into()));
        }
        let head = self.head;
        self.read_element(head)
    }

    /// Reads the last element.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] on an empty list.
    pub fn last(&mut self) -> Result<S::Value> {
        if self.tail == NIL {
            return Err(Error::OutOfRange("list is empty".into()));
        }
        let tail = self.tail;
        self.read_element(tail)
    }

    /// Reads the element at `index`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] for `index >= len()`.
    pub fn get(&mut self, index: u64) -> Result<S::Value> {
        let node = self.node_at(index)?;
        self.read_element(node)
    }

    /// Replaces the element at `index`, returning the previous value.
    ///
    /// When the new encoding fits the node's capacity (always, for a
    /// fixed-size serializer) the payload is overwritten in place;
    /// otherwise the node is relocated and the old block freed.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] for a bad index, or any buffer failure.
    pub fn set(&mut self, index: u64, value: &S::Value) -> Result<S::Value> {
        let node = self.node_at(index)?;
        let old = self.read_element(node)?;

        let size = self.serializer.serialized_size(value);
        if size <= self.node_cap(node)? {
            let mut payload = Vec::with_capacity(size as usize);
            self.serializer.serialize(value, &mut payload);
            let pos = self.payload_offset(node);
            self.buffer.put(pos, &payload)?;
            self.buffer.barrier(true)?;
            return Ok(old);
        }

        // Too big for the block: relocate, splice, then free the old one.
        let prev = self.node_prev(node)?;
        let next = self.node_next(node)?;
        let alloc = self.allocate(size)?;
        self.write_node(&alloc, prev, next, value, size)?;
        self.buffer.barrier(false)?;
        if prev != NIL {
            self.buffer.write_u64(prev + NODE_NEXT, alloc.offset)?;
        }
        if next != NIL {
            self.buffer.write_u64(next + NODE_PREV, alloc.offset)?;
        }
        self.buffer.barrier(false)?;
        if self.head == node {
            self.head = alloc.offset;
        }
        if self.tail == node {
            self.tail = alloc.offset;
        }
        self.free = alloc.new_free;
        self.commit_header()?;
        self.buffer.barrier(true)?;
        self.free_block(node)?;
        Ok(old)
    }

    /// Inserts an element before the position `index`; `index == len()`
    /// appends.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] for `index > len()`, or any buffer failure.
    pub fn insert(&mut self, index: u64, value: &S::Value) -> Result<()> {
        if index > self.count {
            return Err(Error::OutOfRange(format!("index {index} > length {}", self.count)));
        }
        if index == 0 {
            return self.push_front(value);
        }
        if index == self.count {
            return self.push_back(value);
        }

        let next = self.node_at(index)?;
        let prev = self.node_prev(next)?;
        let size = self.serializer.serialized_size(value);
        let alloc = self.allocate(size)?;
        self.write_node(&alloc, prev, next, value, size)?;
        self.buffer.barrier(false)?;
        self.buffer.write_u64(prev + NODE_NEXT, alloc.offset)?;
        self.buffer.write_u64(next + NODE_PREV, alloc.offset)?;
        self.buffer.barrier(false)?;
        self.count += 1;
        self.free = alloc.new_free;
        self.commit_header()?;
        self.buffer.barrier(true)
    }

    /// Prepends an element in O(1) node hops.
    ///
    /// # Errors
    ///
    /// Any buffer failure.
    pub fn push_front(&mut self, value: &S::Value) -> Result<()> {
        let size = self.serializer.serialized_size(value);
        let alloc = self.allocate(size)?;
        let old_head = self.head;
        self.write_node(&alloc, NIL, old_head, value, size)?;
        self.buffer.barrier(false)?;
        if old_head != NIL {
            self.buffer.write_u64(old_head + NODE_PREV, alloc.offset)?;
            self.buffer.barrier(false)?;
        }
        self.count += 1;
        self.head = alloc.offset;
        if self.tail == NIL {
            self.tail = alloc.offset;
        }
        self.free = alloc.new_free;
        self.commit_header()?;
        self.buffer.barrier(true)
    }

    /// Appends an element in O(1) node hops.
    ///
    /// # Errors
    ///
    /// Any buffer failure.
    pub fn push_back(&mut self, value: &S::Value) -> Result<()> {
        let size = self.serializer.serialized_size(value);
        let alloc = self.allocate(size)?;
        let old_tail = self.tail;
        self.write_node(&alloc, old_tail, NIL, value, size)?;
        self.buffer.barrier(false)?;
        if old_tail != NIL {
            self.buffer.write_u64(old_tail + NODE_NEXT, alloc.offset)?;
            self.buffer.barrier(false)?;
        }
        self.count += 1;
        self.tail = alloc.offset;
        if self.head == NIL {
            self.head = alloc.offset;
        }
        self.free = alloc.new_free;
        self.commit_header()?;
        self.buffer.barrier(true)
    }

    /// Removes and returns the element at `index`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] for a bad index, or any buffer failure.
    pub fn remove(&mut self, index: u64) -> Result<S::Value> {
        let node = self.node_at(index)?;
        let value = self.read_element(node)?;
        self.unlink(node)?;
        Ok(value)
    }

    /// Removes and returns the first element.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] on an empty list.
    pub fn pop_front(&mut self) -> Result<S::Value> {
        if self.head == NIL {
            return Err(Error::OutOfRange("list is empty".into()));
        }
        let node = self.head;
        let value = self.read_element(node)?;
        self.unlink(node)?;
        Ok(value)
    }

    /// Removes and returns the last element.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] on an empty list.
    pub fn pop_back(&mut self) -> Result<S::Value> {
        if self.tail == NIL {
            return Err(Error::OutOfRange("list is empty".into()));
        }
        let node = self.tail;
        let value = self.read_element(node)?;
        self.unlink(node)?;
        Ok(value)
    }

    /// Removes every element and releases all node storage back to the
    /// buffer.
    ///
    /// # Errors
    ///
    /// Any buffer failure.
    pub fn clear(&mut self) -> Result<()> {
        self.count = 0;
        self.head = NIL;
        self.tail = NIL;
        self.free = NIL;
        self.commit_header()?;
        self.buffer.barrier(true)?;
        // Safe to reclaim only after the empty state is committed.
        self.buffer.set_capacity(HEADER_SIZE)?;
        self.buffer.barrier(true)
    }

    /// Iterates the elements. The iterator is double-ended; items are
    /// `Result` because every hop reads the buffer.
    pub fn iter(&mut self) -> Iter<'_, S, B> {
        let (fwd, bwd, remaining) = (self.head, self.tail, self.count);
        Iter { list: self, fwd, bwd, remaining }
    }

    /// Collects the whole list front to back.
    ///
    /// # Errors
    ///
    /// Any buffer failure during iteration.
    pub fn to_vec(&mut self) -> Result<Vec<S::Value>> {
        self.iter().collect()
    }

    /// Forces all writes so far to stable storage, subject to the buffer's
    /// protection level.
    ///
    /// # Errors
    ///
    /// Any buffer failure.
    pub fn sync(&mut self) -> Result<()> {
        self.buffer.barrier(true)
    }

    /// Flushes and closes the list and its buffer.
    ///
    /// Consuming `self` makes the closed state terminal: no operation can
    /// reach a closed list.
    ///
    /// # Errors
    ///
    /// Any buffer failure while flushing.
    pub fn close(mut self) -> Result<()> {
        self.buffer.barrier(true)?;
        self.buffer.close()
    }

    /// Releases the underlying buffer without closing it.
    #[must_use]
    pub fn into_buffer(self) -> B {
        self.buffer
    }

    // ---- node primitives ----

    fn node_prev(&mut self, node: u64) -> Result<u64> {
        if node == NIL {
            return Err(Error::Corrupt("chain walked past a NIL link".into()));
        }
        self.buffer.read_u64(node + NODE_PREV)
    }

    fn node_next(&mut self, node: u64) -> Result<u64> {
        if node == NIL {
            return Err(Error::Corrupt("chain walked past a NIL link".into()));
        }
        self.buffer.read_u64(node + NODE_NEXT)
    }

    fn node_cap(&mut self, node: u64) -> Result<u32> {
        match self.serializer.fixed_size() {
            Some(n) => Ok(n),
            None => self.buffer.read_u32(node + NODE_LINKS),
        }
    }

    fn payload_offset(&self, node: u64) -> u64 {
        node + NODE_LINKS + if self.serializer.fixed_size().is_some() { 0 } else { 4 }
    }

    fn block_size(&self, cap: u32) -> u64 {
        NODE_LINKS + u64::from(cap) + if self.serializer.fixed_size().is_some() { 0 } else { 4 }
    }

    fn read_element(&mut self, node: u64) -> Result<S::Value> {
        let cap = self.node_cap(node)?;
        let mut payload = vec![0u8; cap as usize];
        let pos = self.payload_offset(node);
        self.buffer.get(pos, &mut payload)?;
        self.serializer.deserialize(&payload)
    }

    /// Walks to the node holding `index` from whichever end is closer.
    fn node_at(&mut self, index: u64) -> Result<u64> {
        if index >= self.count {
            return Err(Error::OutOfRange(format!("index {index} >= length {}", self.count)));
        }
        if index <= (self.count - 1) / 2 {
            let mut node = self.head;
            for _ in 0..index {
                node = self.node_next(node)?;
            }
            Ok(node)
        } else {
            let mut node = self.tail;
            for _ in 0..(self.count - 1 - index) {
                node = self.node_prev(node)?;
            }
            Ok(node)
        }
    }

    /// Finds storage for a `size`-byte payload: first fit from the free
    /// chain, else a fresh block appended to the buffer.
    fn allocate(&mut self, size: u32) -> Result<Alloc> {
        let mut prev = NIL;
        let mut cur = self.free;
        while cur != NIL {
            if self.node_cap(cur)? >= size {
                let next_free = self.node_next(cur)?;
                if prev == NIL {
                    return Ok(Alloc { offset: cur, new_free: next_free, fresh: false });
                }
                // Unlink from the middle of the chain. Losing this write
                // in a crash leaks the block, nothing more.
                self.buffer.write_u64(prev + NODE_NEXT, next_free)?;
                return Ok(Alloc { offset: cur, new_free: self.free, fresh: false });
            }
            prev = cur;
            cur = self.node_next(cur)?;
        }

        let offset = self.buffer.capacity()?;
        self.buffer.set_capacity(offset + self.block_size(size))?;
        Ok(Alloc { offset, new_free: self.free, fresh: true })
    }

    /// Writes a complete node block. A reused block keeps its recorded
    /// capacity; only a fresh one gets the capacity field written.
    fn write_node(
        &mut self,
        alloc: &Alloc,
        prev: u64,
        next: u64,
        value: &S::Value,
        size: u32,
    ) -> Result<()> {
        let fixed = self.serializer.fixed_size().is_some();
        let mut block = Vec::with_capacity(NODE_LINKS as usize + 4 + size as usize);
        block.extend_from_slice(&prev.to_be_bytes());
        block.extend_from_slice(&next.to_be_bytes());
        if fixed {
            self.serializer.serialize(value, &mut block);
            self.buffer.put(alloc.offset, &block)
        } else if alloc.fresh {
            block.extend_from_slice(&size.to_be_bytes());
            self.serializer.serialize(value, &mut block);
            self.buffer.put(alloc.offset, &block)
        } else {
            self.buffer.put(alloc.offset, &block)?;
            let mut payload = Vec::with_capacity(size as usize);
            self.serializer.serialize(value, &mut payload);
            let pos = self.payload_offset(alloc.offset);
            self.buffer.put(pos, &payload)
        }
    }

    /// Removes `node` from the chain and hands its block to the free
    /// chain. The ordering is the crash-consistency protocol: backward
    /// patch, commit, forward patch, free.
    fn unlink(&mut self, node: u64) -> Result<()> {
        let prev = self.node_prev(node)?;
        let next = self.node_next(node)?;

        if next != NIL {
            self.buffer.write_u64(next + NODE_PREV, prev)?;
        }
        self.buffer.barrier(false)?;

        self.count -= 1;
        if self.head == node {
            self.head = next;
        }
        if self.tail == node {
            self.tail = prev;
        }
        self.commit_header()?;
        self.buffer.barrier(true)?;

        if prev != NIL {
            self.buffer.write_u64(prev + NODE_NEXT, next)?;
        }
        self.free_block(node)
    }

    /// Pushes a no-longer-referenced block onto the free chain.
    fn free_block(&mut self, node: u64) -> Result<()> {
        let free = self.free;
        self.buffer.write_u64(node + NODE_NEXT, free)?;
        self.buffer.barrier(false)?;
        self.free = node;
        self.commit_header()?;
        self.buffer.barrier(true)
    }

    /// Commits the state block — count, head, tail, free — in one write.
    fn commit_header(&mut self) -> Result<()> {
        let mut state = [0u8; 32];
        state[..8].copy_from_slice(&self.count.to_be_bytes());
        state[8..16].copy_from_slice(&self.head.to_be_bytes());
        state[16..24].copy_from_slice(&self.tail.to_be_bytes());
        state[24..32].copy_from_slice(&self.free.to_be_bytes());
        self.buffer.put(STATE_OFFSET, &state)
    }

    // ---- open-time validation and repair ----

    /// Follows `prev` or `next` links from `start`, collecting node
    /// offsets until a NIL link, an implausible offset, or `limit` nodes.
    fn walk(&mut self, start: u64, forward: bool, limit: u64) -> Result<Vec<u64>> {
        let capacity = self.buffer.capacity()?;
        let mut chain = Vec::new();
        let mut node = start;
        while node != NIL && (chain.len() as u64) < limit {
            if node < HEADER_SIZE || node.checked_add(NODE_LINKS).is_none_or(|end| end > capacity)
            {
                break;
            }
            chain.push(node);
            let field = if forward { NODE_NEXT } else { NODE_PREV };
            node = self.buffer.read_u64(node + field)?;
        }
        Ok(chain)
    }

    /// Reconciles the chain with the header after open.
    ///
    /// A crash between barriers can leave exactly one direction of the
    /// chain out of step with the committed header (plus, possibly, a
    /// damaged free chain). Whichever direction still matches the header
    /// is authoritative; the other is rewritten from it.
    fn check_consistency(&mut self) -> Result<()> {
        let writable = !self.buffer.is_read_only();

        if self.count == 0 {
            if self.head != NIL || self.tail != NIL {
                return Err(Error::Corrupt("empty list with a non-NIL endpoint".into()));
            }
            return self.scrub_free_chain(&[], writable);
        }
        if self.head == NIL || self.tail == NIL {
            return Err(Error::Corrupt("non-empty list missing an endpoint".into()));
        }

        let limit = self.count.saturating_add(2);
        let fwd = self.walk(self.head, true, limit)?;
        let bwd = self.walk(self.tail, false, limit)?;
        let count = usize::try_from(self.count)
            .map_err(|_| Error::Corrupt("element count not addressable".into()))?;

        let coherent = fwd.len() == bwd.len() && fwd.iter().rev().eq(bwd.iter());
        let live: Vec<u64> = if coherent {
            if fwd.len() != count {
                if !writable {
                    return Err(Error::Corrupt(format!(
                        "chain of {} nodes disagrees with count {}",
                        fwd.len(),
                        self.count
                    )));
                }
                // Both directions agree, so only the in-flight count is
                // stale (an insert that patched its links but never
                // committed).
                warn!(persisted = self.count, observed = fwd.len(), "repairing element count");
                self.count = fwd.len() as u64;
                self.commit_header()?;
                self.buffer.barrier(true)?;
            }
            fwd
        } else if fwd.len() >= count && fwd.get(count - 1) == Some(&self.tail) {
            if !writable {
                return Err(Error::Corrupt("backward chain disagrees with the header".into()));
            }
            warn!("rebuilding backward links from the forward chain");
            let live = fwd[..count].to_vec();
            if fwd.len() > count {
                // Dangling pointer left by an uncommitted append.
                let tail = self.tail;
                self.buffer.write_u64(tail + NODE_NEXT, NIL)?;
            }
            let head = self.head;
            if self.node_prev(head)? != NIL {
                self.buffer.write_u64(head + NODE_PREV, NIL)?;
            }
            for pair in live.windows(2) {
                if self.node_prev(pair[1])? != pair[0] {
                    self.buffer.write_u64(pair[1] + NODE_PREV, pair[0])?;
                }
            }
            self.buffer.barrier(true)?;
            live
        } else if bwd.len() >= count && bwd.get(count - 1) == Some(&self.head) {
            if !writable {
                return Err(Error::Corrupt("forward chain disagrees with the header".into()));
            }
            warn!("rebuilding forward links from the backward chain");
            let mut live = bwd[..count].to_vec();
            live.reverse();
            if bwd.len() > count {
                let head = self.head;
                self.buffer.write_u64(head + NODE_PREV, NIL)?;
            }
            let tail = self.tail;
            if self.node_next(tail)? != NIL {
                self.buffer.write_u64(tail + NODE_NEXT, NIL)?;
            }
            for pair in live.windows(2) {
                if self.node_next(pair[0])? != pair[1] {
                    self.buffer.write_u64(pair[0] + NODE_NEXT, pair[1])?;
                }
            }
            self.buffer.barrier(true)?;
            live
        } else {
            return Err(Error::Corrupt("list chain cannot be reconciled with its header".into()));
        };

        self.scrub_free_chain(&live, writable)
    }

    /// Validates the free chain against the live chain, truncating it at
    /// the first implausible or live entry (the residue of an interrupted
    /// allocation).
    fn scrub_free_chain(&mut self, live: &[u64], writable: bool) -> Result<()> {
        let live: HashSet<u64> = live.iter().copied().collect();
        let capacity = self.buffer.capacity()?;
        let mut seen: HashSet<u64> = HashSet::new();
        let mut prev = NIL;
        let mut cur = self.free;
        while cur != NIL {
            let mut ok = cur >= HEADER_SIZE
                && cur.checked_add(NODE_LINKS).is_some_and(|end| end <= capacity)
                && !live.contains(&cur)
                && !seen.contains(&cur);
            if ok {
                let cap = self.node_cap(cur)?;
                ok = cur
                    .checked_add(self.block_size(cap))
                    .is_some_and(|end| end <= capacity);
            }
            if !ok {
                if !writable {
                    return Err(Error::Corrupt("free chain is damaged".into()));
                }
                warn!(offset = cur, "truncating damaged free chain");
                if prev == NIL {
                    self.free = NIL;
                    self.commit_header()?;
                } else {
                    self.buffer.write_u64(prev + NODE_NEXT, NIL)?;
                }
                self.buffer.barrier(true)?;
                break;
            }
            seen.insert(cur);
            prev = cur;
            cur = self.node_next(cur)?;
        }
        Ok(())
    }
}

/// Double-ended iterator over a list's elements.
///
/// Every hop reads the buffer, so items are `Result`; the first error ends
/// the iteration.
pub struct Iter<'a, S: Serializer, B: PersistentBuffer> {
    list: &'a mut PersistentLinkedList<S, B>,
    fwd: u64,
    bwd: u64,
    remaining: u64,
}

impl<S: Serializer, B: PersistentBuffer> Iterator for Iter<'_, S, B> {
    type Item = Result<S::Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.fwd;
        match self.list.read_element(node).and_then(|value| {
            self.fwd = self.list.node_next(node)?;
            Ok(value)
        }) {
            Ok(value) => {
                self.remaining -= 1;
                Some(Ok(value))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

impl<S: Serializer, B: PersistentBuffer> DoubleEndedIterator for Iter<'_, S, B> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let node = self.bwd;
        match self.list.read_element(node).and_then(|value| {
            self.bwd = self.list.node_prev(node)?;
            Ok(value)
        }) {
            Ok(value) => {
                self.remaining -= 1;
                Some(Ok(value))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}
