//! # cdb — constant key/value database
//!
//! Immutable, on-disk key/value store in the classic cdb format, widened to
//! 64-bit offsets so the combined data and index may exceed 4 GiB.
//!
//! A [`CdbWriter`] accepts a batch of key/value records and finalizes them
//! into a single file; any number of [`CdbReader`]s then serve exact-match
//! point lookups. Keys and values are opaque byte strings — the store never
//! interprets them. Once finalized a database is **write-never, read-many**:
//! there is no update, delete, or append.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ HEADER (4096 bytes = 256 x 16)                │
//! │                                               │
//! │ per subtable: offset (u64) | length (u64)     │
//! ├───────────────────────────────────────────────┤
//! │ RECORDS (insertion order)                     │
//! │                                               │
//! │ key_len (u64) | value_len (u64) | key | value │
//! ├───────────────────────────────────────────────┤
//! │ SUBTABLES (256, concatenated in index order)  │
//! │                                               │
//! │ per slot: slot_hash (u64) | offset (u64)      │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The low byte of a key's hash selects one
//! of 256 subtables; the remaining bits pick a starting slot, and a lookup
//! probes linearly from there until the slot hash and key bytes match or an
//! empty slot ends the search. Each subtable is sized to exactly twice its
//! entry count, so probe chains stay short.
//!
//! ## Example
//!
//! ```
//! use cdb::CdbWriter;
//!
//! # fn main() -> cdb::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let mut writer = CdbWriter::create(dir.path().join("example.cdb"))?;
//! writer.put(b"alice", b"practice")?;
//! writer.put(b"bob", b"hope")?;
//!
//! // Freeze the database and open it for reads.
//! let db = writer.freeze()?;
//! assert_eq!(db.get(b"alice")?, Some(b"practice".to_vec()));
//! assert_eq!(db.get(b"carol")?, None);
//! # Ok(())
//! # }
//! ```

use std::io;

use thiserror::Error;

mod format;
mod hash;
mod iter;
mod reader;
mod writer;

pub use format::{ReadAt, HEADER_SIZE, TABLE_COUNT, TUPLE_SIZE};
pub use hash::CdbHash;
pub use iter::CdbIter;
pub use reader::CdbReader;
pub use writer::CdbWriter;

#[derive(Debug, Error)]
pub enum CdbError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, CdbError>;
