use std::fs::File;
use std::hash::Hasher;
use std::marker::PhantomData;
use std::path::Path;

use crate::format::{decode_header, read_tuple, Header, ReadAt, HEADER_SIZE, TUPLE_SIZE};
use crate::hash::{hash_key, CdbHash};
use crate::iter::CdbIter;
use crate::Result;

/// Serves point lookups over a finalized database.
///
/// On construction the 4096-byte header is read once and decoded into an
/// in-memory table of 256 subtable descriptors; every [`get`](CdbReader::get)
/// afterwards costs one slot read per probe step plus one record read.
///
/// [`get`] takes `&self` and hashes with a fresh hasher per call, so a
/// reader can be shared across threads without locking.
///
/// [`get`]: CdbReader::get
pub struct CdbReader<R, H = CdbHash> {
    source: R,
    header: Header,
    _hasher: PhantomData<H>,
}

impl CdbReader<File> {
    /// Opens an existing database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(file)
    }
}

impl<R: ReadAt> CdbReader<R> {
    /// Opens a database over any random-access byte source, hashing with
    /// the default format hash.
    pub fn new(source: R) -> Result<Self> {
        Self::with_hasher(source)
    }
}

impl<R: ReadAt, H: Hasher + Default> CdbReader<R, H> {
    /// Opens a database over `source` with a caller-chosen hash.
    ///
    /// The hash must be the one the database was written with; a mismatch
    /// yields spurious not-found results, never corruption.
    pub fn with_hasher(source: R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE as usize];
        source.read_exact_at(&mut buf, 0)?;
        let header = decode_header(&buf)?;

        log::trace!(
            "loaded cdb header ({} live subtables)",
            header.iter().filter(|t| t.length > 0).count()
        );

        Ok(Self {
            source,
            header,
            _hasher: PhantomData,
        })
    }

    /// Returns the value stored for `key`, or `None` if the key is absent.
    ///
    /// An empty value comes back as `Some(vec![])`, distinct from `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = hash_key::<H>(key);

        let table = self.header[(hash & 0xff) as usize];
        if table.length == 0 {
            return Ok(None);
        }

        let starting_slot = (hash >> 8) % table.length;
        let mut slot = starting_slot;

        loop {
            let (slot_hash, offset) = read_tuple(&self.source, table.offset + TUPLE_SIZE * slot)?;

            // An empty slot ends the probe. Hash and offset must both be
            // zero: a key hashing to 0 still has a non-zero record offset.
            if slot_hash == 0 && offset == 0 {
                return Ok(None);
            }

            if slot_hash == hash {
                if let Some(value) = self.value_at(offset, key)? {
                    return Ok(Some(value));
                }
            }

            slot = (slot + 1) % table.length;
            if slot == starting_slot {
                return Ok(None);
            }
        }
    }

    /// Reads the record at `offset` and returns its value if the stored key
    /// equals `expected_key`.
    fn value_at(&self, offset: u64, expected_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let (key_len, value_len) = read_tuple(&self.source, offset)?;

        // Key lengths can rule out a match before reading any bytes.
        if key_len != expected_key.len() as u64 {
            return Ok(None);
        }

        let mut buf = vec![0u8; (key_len + value_len) as usize];
        self.source.read_exact_at(&mut buf, offset + TUPLE_SIZE)?;

        if &buf[..key_len as usize] != expected_key {
            return Ok(None);
        }

        Ok(Some(buf.split_off(key_len as usize)))
    }

    /// Returns the number of records in the database, duplicates included.
    pub fn len(&self) -> u64 {
        self.header.iter().map(|t| t.length).sum::<u64>() / 2
    }

    /// Returns `true` if the database holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R, H> CdbReader<R, H> {
    /// Builds a reader from a source whose header is already in memory.
    /// Used by the writer's freeze path to skip re-reading the file.
    pub(crate) fn from_parts(source: R, header: Header) -> Self {
        Self {
            source,
            header,
            _hasher: PhantomData,
        }
    }

    /// Returns an iterator over all records in physical file order.
    pub fn iter(&self) -> CdbIter<'_, R, H> {
        CdbIter::new(self)
    }

    pub(crate) fn source(&self) -> &R {
        &self.source
    }

    /// First byte past the record region: the lowest offset of any
    /// non-empty subtable, or the header size when there are no records.
    pub(crate) fn data_end(&self) -> u64 {
        self.header
            .iter()
            .filter(|t| t.length > 0)
            .map(|t| t.offset)
            .min()
            .unwrap_or(HEADER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CdbWriter;
    use anyhow::Result;
    use std::collections::hash_map::DefaultHasher;
    use std::io::Cursor;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// The record set the format's reference databases are built from.
    /// "playwright" and "snush" share a subtable under the default hash.
    fn test_records() -> Vec<(&'static [u8], &'static [u8])> {
        vec![
            (&b"foo"[..], &b"bar"[..]),
            (&b"baz"[..], &b"quuuux"[..]),
            (&b"playwright"[..], &b"wow"[..]),
            (&b"crystal"[..], &b"CASTLES"[..]),
            (&b"CRYSTAL"[..], &b"castles"[..]),
            (&b"snush"[..], &b"collision!"[..]),
            (&b"a"[..], &b"a"[..]),
            (&b"empty_value"[..], &b""[..]),
            (&b""[..], &b"empty_key"[..]),
        ]
    }

    fn write_test_db(path: &std::path::Path) -> Result<()> {
        let mut writer = CdbWriter::create(path)?;
        for (key, value) in test_records() {
            writer.put(key, value)?;
        }
        writer.close()?;
        Ok(())
    }

    // -------------------- Basic lookups --------------------

    #[test]
    fn get_every_record() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cdb");
        write_test_db(&path)?;

        let db = CdbReader::open(&path)?;
        for (key, value) in test_records() {
            assert_eq!(db.get(key)?, Some(value.to_vec()), "key {key:?}");
        }
        Ok(())
    }

    #[test]
    fn missing_key_is_none() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cdb");
        write_test_db(&path)?;

        let db = CdbReader::open(&path)?;
        assert_eq!(db.get(b"not in the table")?, None);
        assert_eq!(db.get(b"fop")?, None);
        Ok(())
    }

    #[test]
    fn case_is_preserved() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cdb");
        write_test_db(&path)?;

        let db = CdbReader::open(&path)?;
        assert_eq!(db.get(b"crystal")?, Some(b"CASTLES".to_vec()));
        assert_eq!(db.get(b"CRYSTAL")?, Some(b"castles".to_vec()));
        Ok(())
    }

    #[test]
    fn empty_value_is_some_empty() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cdb");
        write_test_db(&path)?;

        let db = CdbReader::open(&path)?;
        assert_eq!(db.get(b"empty_value")?, Some(Vec::new()));
        Ok(())
    }

    #[test]
    fn empty_key_is_a_valid_key() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cdb");
        write_test_db(&path)?;

        let db = CdbReader::open(&path)?;
        assert_eq!(db.get(b"")?, Some(b"empty_key".to_vec()));
        Ok(())
    }

    #[test]
    fn same_subtable_keys_both_retrievable() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cdb");
        write_test_db(&path)?;

        let db = CdbReader::open(&path)?;
        assert_eq!(db.get(b"playwright")?, Some(b"wow".to_vec()));
        assert_eq!(db.get(b"snush")?, Some(b"collision!".to_vec()));
        Ok(())
    }

    #[test]
    fn len_counts_records() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.cdb");
        write_test_db(&path)?;

        let db = CdbReader::open(&path)?;
        assert_eq!(db.len(), test_records().len() as u64);
        assert!(!db.is_empty());
        Ok(())
    }

    // -------------------- Empty database --------------------

    #[test]
    fn empty_database_finds_nothing() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("empty.cdb");
        CdbWriter::create(&path)?.close()?;

        let db = CdbReader::open(&path)?;
        assert_eq!(db.get(b"anything")?, None);
        assert_eq!(db.get(b"")?, None);
        assert!(db.is_empty());
        Ok(())
    }

    // -------------------- Duplicate keys --------------------

    #[test]
    fn duplicate_key_returns_first_inserted() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("dup.cdb");

        let mut writer = CdbWriter::create(&path)?;
        writer.put(b"k", b"first")?;
        writer.put(b"k", b"second")?;
        writer.close()?;

        let db = CdbReader::open(&path)?;
        assert_eq!(db.get(b"k")?, Some(b"first".to_vec()));
        Ok(())
    }

    // -------------------- In-memory sources --------------------

    #[test]
    fn freeze_over_in_memory_buffer() -> Result<()> {
        let mut writer = CdbWriter::new(Cursor::new(Vec::new()))?;
        writer.put(b"k1", b"v1")?;
        writer.put(b"k2", b"v2")?;

        let db = writer.freeze()?;
        assert_eq!(db.get(b"k1")?, Some(b"v1".to_vec()));
        assert_eq!(db.get(b"k2")?, Some(b"v2".to_vec()));
        assert_eq!(db.get(b"k3")?, None);
        Ok(())
    }

    // -------------------- Custom hashers --------------------

    /// Sums input bytes, so distinct keys with equal byte sums share a
    /// full 64-bit hash.
    #[derive(Default)]
    struct ByteSumHash(u64);

    impl Hasher for ByteSumHash {
        fn write(&mut self, bytes: &[u8]) {
            for &b in bytes {
                self.0 = self.0.wrapping_add(u64::from(b));
            }
        }

        fn finish(&self) -> u64 {
            self.0
        }
    }

    /// Hashes everything to zero, forcing slots whose stored hash is 0.
    #[derive(Default)]
    struct ZeroHash;

    impl Hasher for ZeroHash {
        fn write(&mut self, _bytes: &[u8]) {}

        fn finish(&self) -> u64 {
            0
        }
    }

    #[test]
    fn colliding_hashes_disambiguate_by_key() -> Result<()> {
        assert_eq!(
            crate::hash::hash_key::<ByteSumHash>(b"ab"),
            crate::hash::hash_key::<ByteSumHash>(b"ba")
        );

        let mut writer = CdbWriter::<_, ByteSumHash>::with_hasher(Cursor::new(Vec::new()))?;
        writer.put(b"ab", b"first")?;
        writer.put(b"ba", b"second")?;

        let db = writer.freeze()?;
        assert_eq!(db.get(b"ab")?, Some(b"first".to_vec()));
        assert_eq!(db.get(b"ba")?, Some(b"second".to_vec()));
        Ok(())
    }

    #[test]
    fn zero_hash_keys_are_still_found() -> Result<()> {
        let mut writer = CdbWriter::<_, ZeroHash>::with_hasher(Cursor::new(Vec::new()))?;
        writer.put(b"x", b"1")?;
        writer.put(b"y", b"2")?;
        writer.put(b"z", b"3")?;

        // Every slot stores hash 0; only a (0, 0) slot reads as empty.
        let db = writer.freeze()?;
        assert_eq!(db.get(b"x")?, Some(b"1".to_vec()));
        assert_eq!(db.get(b"y")?, Some(b"2".to_vec()));
        assert_eq!(db.get(b"z")?, Some(b"3".to_vec()));
        assert_eq!(db.get(b"w")?, None);
        Ok(())
    }

    #[test]
    fn mismatched_hasher_reads_come_back_empty() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("custom.cdb");

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = CdbWriter::<_, DefaultHasher>::with_hasher(file)?;
        writer.put(b"k", b"v")?;
        writer.close()?;

        // Same hasher: found.
        let db = CdbReader::<_, DefaultHasher>::with_hasher(std::fs::File::open(&path)?)?;
        assert_eq!(db.get(b"k")?, Some(b"v".to_vec()));

        // Default format hash: spurious not-found, no error.
        let db = CdbReader::open(&path)?;
        assert_eq!(db.get(b"k")?, None);
        Ok(())
    }

    // -------------------- Construction failures --------------------

    #[test]
    fn open_nonexistent_path_fails() {
        assert!(CdbReader::open("/tmp/no_such_cdb_database.cdb").is_err());
    }

    #[test]
    fn truncated_header_fails() {
        let cursor = Cursor::new(vec![0u8; 100]);
        assert!(CdbReader::new(cursor).is_err());
    }

    // -------------------- Volume --------------------

    #[test]
    fn roundtrip_10k_records() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("10k.cdb");

        let mut writer = CdbWriter::create(&path)?;
        for i in 0..10_000u64 {
            let key = format!("key{i:05}").into_bytes();
            let value = format!("value{i}").into_bytes();
            writer.put(&key, &value)?;
        }
        writer.close()?;

        let db = CdbReader::open(&path)?;
        assert_eq!(db.len(), 10_000);
        for i in 0..10_000u64 {
            let key = format!("key{i:05}").into_bytes();
            let value = format!("value{i}").into_bytes();
            assert_eq!(db.get(&key)?, Some(value));
        }
        assert_eq!(db.get(b"key10000")?, None);
        Ok(())
    }

    #[test]
    #[ignore = "writes more than 4 GiB to disk"]
    fn offsets_past_4gib() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("huge.cdb");

        let value = vec![b'x'; 1 << 20];
        let mut writer = CdbWriter::create(&path)?;
        for i in 0..4400u64 {
            writer.put(format!("big{i:04}").as_bytes(), &value)?;
        }
        writer.close()?;

        let db = CdbReader::open(&path)?;
        for i in [0u64, 2200, 4399] {
            let got = db.get(format!("big{i:04}").as_bytes())?;
            assert_eq!(got.as_deref(), Some(value.as_slice()));
        }
        assert_eq!(db.get(b"big4400")?, None);
        Ok(())
    }

    // -------------------- Concurrency --------------------

    #[test]
    fn concurrent_gets_match_sequential() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("par.cdb");

        let mut writer = CdbWriter::create(&path)?;
        for i in 0..200u64 {
            writer.put(format!("k{i:03}").as_bytes(), format!("v{i}").as_bytes())?;
        }
        writer.close()?;

        let db = Arc::new(CdbReader::open(&path)?);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let db = Arc::clone(&db);
            handles.push(std::thread::spawn(move || {
                for i in 0..200u64 {
                    let got = db.get(format!("k{i:03}").as_bytes()).unwrap();
                    assert_eq!(got, Some(format!("v{i}").into_bytes()));
                }
                assert_eq!(db.get(b"k200").unwrap(), None);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        Ok(())
    }
}
