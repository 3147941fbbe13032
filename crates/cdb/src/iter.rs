use crate::format::{read_tuple, ReadAt, HEADER_SIZE, TUPLE_SIZE};
use crate::hash::CdbHash;
use crate::reader::CdbReader;
use crate::Result;

/// Walks every record in physical file order, duplicates included.
///
/// Yields `(key, value)` pairs from the start of the record region to the
/// first subtable. File order is insertion order; the format guarantees no
/// other ordering. Obtained from [`CdbReader::iter`].
pub struct CdbIter<'a, R, H = CdbHash> {
    db: &'a CdbReader<R, H>,
    pos: u64,
    end: u64,
}

impl<'a, R, H> CdbIter<'a, R, H> {
    pub(crate) fn new(db: &'a CdbReader<R, H>) -> Self {
        Self {
            db,
            pos: HEADER_SIZE,
            end: db.data_end(),
        }
    }
}

impl<R: ReadAt, H> CdbIter<'_, R, H> {
    fn read_record(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let (key_len, value_len) = read_tuple(self.db.source(), self.pos)?;

        let mut buf = vec![0u8; (key_len + value_len) as usize];
        self.db
            .source()
            .read_exact_at(&mut buf, self.pos + TUPLE_SIZE)?;

        self.pos += TUPLE_SIZE + key_len + value_len;
        let value = buf.split_off(key_len as usize);
        Ok((buf, value))
    }
}

impl<R: ReadAt, H> Iterator for CdbIter<'_, R, H> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }

        match self.read_record() {
            Ok(record) => Some(Ok(record)),
            Err(e) => {
                // A truncated record poisons the rest of the walk.
                self.pos = self.end;
                Some(Err(e))
            }
        }
    }
}
