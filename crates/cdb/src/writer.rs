use std::fs::{File, OpenOptions};
use std::hash::Hasher;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;

use crate::format::{
    write_header, write_tuple, Header, ReadAt, Table, HEADER_SIZE, TABLE_COUNT, TUPLE_SIZE,
};
use crate::hash::{hash_key, CdbHash};
use crate::reader::CdbReader;
use crate::{CdbError, Result};

const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Builds a database record by record.
///
/// Records stream through a buffered sink in insertion order while the
/// writer accumulates one `(hash, offset)` list per subtable in memory.
/// [`close`](CdbWriter::close) or [`freeze`](CdbWriter::freeze) then writes
/// the 256 subtables after the records and rewrites the header; both
/// consume the writer, so a database is finalized exactly once and nothing
/// can be added afterwards.
///
/// Dropping a writer without calling either leaves an invalid file behind.
pub struct CdbWriter<W: Write, H = CdbHash> {
    sink: BufWriter<W>,
    entries: [Vec<Entry>; TABLE_COUNT],
    buffered_offset: u64,
    _hasher: PhantomData<H>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    hash: u64,
    offset: u64,
}

impl Entry {
    fn is_empty(&self) -> bool {
        self.hash == 0 && self.offset == 0
    }
}

impl CdbWriter<File> {
    /// Creates a database at the given path, truncating any existing file.
    ///
    /// The file is opened read+write so the finished database can be handed
    /// straight to a reader via [`freeze`](CdbWriter::freeze).
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::new(file)
    }
}

impl<W: Write + Seek> CdbWriter<W> {
    /// Starts a database on any write-seek sink, hashing with the default
    /// format hash.
    pub fn new(sink: W) -> Result<Self> {
        Self::with_hasher(sink)
    }
}

impl<W: Write + Seek, H: Hasher + Default> CdbWriter<W, H> {
    /// Starts a database on `sink` with a caller-chosen hash.
    ///
    /// A 4096-byte placeholder header is written immediately; the real
    /// header replaces it at finalize time.
    pub fn with_hasher(mut sink: W) -> Result<Self> {
        sink.seek(SeekFrom::Start(0))?;
        sink.write_all(&[0u8; HEADER_SIZE as usize])?;

        Ok(Self {
            sink: BufWriter::with_capacity(WRITE_BUFFER_SIZE, sink),
            entries: std::array::from_fn(|_| Vec::new()),
            buffered_offset: HEADER_SIZE,
            _hasher: PhantomData,
        })
    }

    /// Adds a key/value record.
    ///
    /// Empty keys and empty values are valid. Records land in the file in
    /// insertion order; inserting the same key twice keeps both records,
    /// and lookups return the first-inserted one.
    ///
    /// On an I/O error the file is garbage and should be discarded.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let hash = hash_key::<H>(key);
        self.entries[(hash & 0xff) as usize].push(Entry {
            hash,
            offset: self.buffered_offset,
        });

        write_tuple(&mut self.sink, key.len() as u64, value.len() as u64)?;
        self.sink.write_all(key)?;
        self.sink.write_all(value)?;

        self.buffered_offset += TUPLE_SIZE + key.len() as u64 + value.len() as u64;
        Ok(())
    }

    /// Finalizes the database and closes it to further writes.
    pub fn close(mut self) -> Result<()> {
        self.finalize()?;
        Ok(())
    }

    /// Finalizes the database and opens it for reads over the same sink,
    /// reusing the in-memory header instead of re-reading the file.
    pub fn freeze(mut self) -> Result<CdbReader<W, H>>
    where
        W: ReadAt,
    {
        let header = self.finalize()?;
        let sink = self
            .sink
            .into_inner()
            .map_err(|e| CdbError::Io(e.into_error()))?;
        Ok(CdbReader::from_parts(sink, header))
    }

    /// Writes the 256 subtables after the records, then rewrites the
    /// header in place.
    fn finalize(&mut self) -> Result<Header> {
        let record_count: usize = self.entries.iter().map(Vec::len).sum();
        let mut header = [Table::default(); TABLE_COUNT];

        for (i, table_entries) in self.entries.iter().enumerate() {
            // Load factor is fixed at one half.
            let length = table_entries.len() as u64 * 2;
            header[i] = Table {
                offset: self.buffered_offset,
                length,
            };
            if length == 0 {
                continue;
            }

            // Open-addressed build: place each entry, in insertion order,
            // at the first empty slot from its home slot forward. Lookups
            // probe in the same order, so the first-inserted duplicate of
            // a key is the one found.
            let mut slots = vec![Entry { hash: 0, offset: 0 }; length as usize];
            for entry in table_entries {
                let mut slot = (entry.hash >> 8) % length;
                while !slots[slot as usize].is_empty() {
                    slot = (slot + 1) % length;
                }
                slots[slot as usize] = *entry;
            }

            for slot in &slots {
                write_tuple(&mut self.sink, slot.hash, slot.offset)?;
            }
            self.buffered_offset += length * TUPLE_SIZE;
        }

        self.sink.flush()?;

        let sink = self.sink.get_mut();
        sink.seek(SeekFrom::Start(0))?;
        write_header(sink, &header)?;

        log::debug!(
            "finalized cdb: {record_count} records, {} bytes",
            self.buffered_offset
        );
        Ok(header)
    }
}
