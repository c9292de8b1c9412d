//! Holdfast - Embeddable crash-consistent persistence core
//!
//! Holdfast is a local-first durable-storage toolkit for applications that
//! need collections to survive a power cut without dragging in a database
//! server. It is built in Rust and runs anywhere a file does.
//!
//! # Features
//!
//! - Byte-addressable persistent buffers over memory-mapped files
//! - Explicit durability control: write barriers with configurable
//!   protection levels
//! - A doubly linked list persisted inside a buffer, with open-time crash
//!   repair and free-block recycling
//! - Fixed-record-length file manipulation with correct overlapping moves
//! - A fault-injection buffer that simulates sector-granular power
//!   failures, so recovery code is tested against the hardware model it
//!   assumes
//!
//! # Example
//!
//! ```no_run
//! use holdfast_core::{FileBuffer, I32Serializer, PersistentLinkedList, ProtectionLevel};
//!
//! # fn main() -> holdfast_core::Result<()> {
//! // Open or create a durable list of integers.
//! let buffer = FileBuffer::open("queue.hold", ProtectionLevel::Force)?;
//! let mut list = PersistentLinkedList::open(buffer, I32Serializer)?;
//!
//! list.push_back(&1)?;
//! list.push_back(&2)?;
//! list.push_front(&0)?;
//! assert_eq!(list.to_vec()?, vec![0, 1, 2]);
//!
//! // Every mutation above is already ordered and forced; close flushes
//! // and releases the file lock.
//! list.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Design Philosophy
//!
//! Holdfast is intentionally small and explicit. It does not aim to be:
//! - A database server
//! - A replication or consensus layer
//! - A transaction manager spanning multiple objects
//! - Thread-safe (wrap an instance in a mutex if it must be shared)
//!
//! One buffer has one owner, every failure is surfaced to the caller, and
//! recovery is an explicit re-open — never a silent background fix.

pub mod buffer;
pub mod error;
pub mod list;
pub mod record;
pub mod serial;

pub use buffer::{
    FailureOdds, FileBuffer, HeapBuffer, PersistentBuffer, ProtectionLevel, RandomFailBuffer,
    SECTOR_SIZE,
};
pub use error::{Error, Result};
pub use list::PersistentLinkedList;
pub use record::{FixedRecordFile, copy_bytes, copy_records};
pub use serial::{
    BytesSerializer, F64Serializer, I32Serializer, I64Serializer, Serializer, StringSerializer,
    U32Serializer, U64Serializer,
};

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
