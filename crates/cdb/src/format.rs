//! Binary format constants and low-level read/write helpers.
//!
//! Every integer the format stores — subtable descriptors, slot entries,
//! and record prefixes — is one half of a 16-byte **tuple** of two
//! little-endian `u64`s:
//!
//! ```text
//! [first: u64 LE][second: u64 LE]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, Cursor, Result as IoResult, Write};

/// Number of hash subtables. The low byte of a key's hash selects one.
pub const TABLE_COUNT: usize = 256;

/// Size in bytes of one tuple: a slot, a descriptor, or a record prefix.
pub const TUPLE_SIZE: u64 = 16;

/// Size of the header region: 256 subtable descriptors of 16 bytes each.
pub const HEADER_SIZE: u64 = TABLE_COUNT as u64 * TUPLE_SIZE;

/// A random-access byte source.
///
/// Lookups read slots and records at absolute offsets without moving any
/// cursor, so a shared reference suffices and concurrent reads need no
/// locking. Implemented for [`File`] via the platform's positioned-read
/// call, and for [`Cursor`] over in-memory bytes.
pub trait ReadAt {
    /// Reads exactly `buf.len()` bytes starting at `offset`.
    ///
    /// A source that runs out of bytes before the buffer is full must fail
    /// with [`io::ErrorKind::UnexpectedEof`].
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> IoResult<()>;
}

impl ReadAt for File {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> IoResult<()> {
        #[cfg(unix)]
        {
            std::os::unix::fs::FileExt::read_exact_at(self, buf, offset)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;

            let mut buf = buf;
            let mut offset = offset;
            while !buf.is_empty() {
                match self.seek_read(buf, offset) {
                    Ok(0) => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "failed to fill whole buffer",
                        ))
                    }
                    Ok(n) => {
                        let rest = buf;
                        buf = &mut rest[n..];
                        offset += n as u64;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        }

        #[cfg(not(any(unix, windows)))]
        {
            compile_error!("unsupported platform");
        }
    }
}

impl<T: AsRef<[u8]>> ReadAt for Cursor<T> {
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> IoResult<()> {
        let data = self.get_ref().as_ref();
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "offset out of range"))?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of buffer")
            })?;
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }
}

/// One subtable descriptor: the absolute byte offset of the subtable's
/// first slot and its length in slots. An empty subtable has `length == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Table {
    pub offset: u64,
    pub length: u64,
}

pub(crate) type Header = [Table; TABLE_COUNT];

/// Writes a 16-byte tuple (`first` then `second`, little-endian) to `w`.
pub fn write_tuple<W: Write>(w: &mut W, first: u64, second: u64) -> IoResult<()> {
    w.write_u64::<LittleEndian>(first)?;
    w.write_u64::<LittleEndian>(second)?;
    Ok(())
}

/// Reads the 16-byte tuple at `offset` from `r`.
pub fn read_tuple<R: ReadAt>(r: &R, offset: u64) -> IoResult<(u64, u64)> {
    let mut buf = [0u8; TUPLE_SIZE as usize];
    r.read_exact_at(&mut buf, offset)?;
    let mut rdr = &buf[..];
    let first = rdr.read_u64::<LittleEndian>()?;
    let second = rdr.read_u64::<LittleEndian>()?;
    Ok((first, second))
}

/// Writes all 256 subtable descriptors (4096 bytes) to `w`.
pub(crate) fn write_header<W: Write>(w: &mut W, header: &Header) -> IoResult<()> {
    for table in header {
        write_tuple(w, table.offset, table.length)?;
    }
    Ok(())
}

/// Decodes 256 subtable descriptors from a 4096-byte header buffer.
pub(crate) fn decode_header(buf: &[u8; HEADER_SIZE as usize]) -> IoResult<Header> {
    let mut rdr = &buf[..];
    let mut header = [Table::default(); TABLE_COUNT];
    for table in &mut header {
        table.offset = rdr.read_u64::<LittleEndian>()?;
        table.length = rdr.read_u64::<LittleEndian>()?;
    }
    Ok(header)
}
