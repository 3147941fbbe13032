use std::hash::Hasher;

const SEED: u64 = 5381;

/// The 64-bit hash documented by the cdb file format.
///
/// A DJB-style hash: starting from `5381`, each input byte `b` updates the
/// state as `state = ((state << 5) + state) ^ b` in wrapping `u64`
/// arithmetic. The low byte of the digest selects a subtable; the remaining
/// bits pick the starting slot within it.
///
/// A database written with a different [`Hasher`] must be read with that
/// same hasher, or lookups will come back empty. Readers and writers build
/// a fresh hasher per operation, so implementations only need `Default`.
#[derive(Debug, Clone, Copy)]
pub struct CdbHash(u64);

impl CdbHash {
    pub fn new() -> Self {
        Self(SEED)
    }
}

impl Default for CdbHash {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for CdbHash {
    fn write(&mut self, bytes: &[u8]) {
        let mut state = self.0;
        for &b in bytes {
            state = ((state << 5).wrapping_add(state)) ^ u64::from(b);
        }
        self.0 = state;
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

/// Hashes `key` with a freshly constructed `H`.
pub(crate) fn hash_key<H: Hasher + Default>(key: &[u8]) -> u64 {
    let mut hasher = H::default();
    hasher.write(key);
    hasher.finish()
}
