use std::hash::Hash;

/// A 32-byte BLAKE3 hash used as a stable content fingerprint.
///
/// In `kumiki`, this serves two purposes:
/// 1. It is the identity of a [`Job`](crate::Job), computed from every field
///    of the job, so two identical jobs always share an identity across runs
///    and processes.
/// 2. It names per-job files inside the run's temporary directory, such as
///    response files, so that they never collide within a run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    /// Feeds a value's `Hash` implementation into BLAKE3.
    ///
    /// Only deterministic `Hash` implementations (no `HashMap` fields) should
    /// be passed here, otherwise the result is not stable.
    pub(crate) fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = Blake3Hasher::default();
        value.hash(&mut hasher);
        hasher.into()
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }

    /// First 16 hex digits, enough to tell jobs apart in file names and logs.
    pub fn to_short_hex(self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(16);
        hex
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_short_hex())
    }
}

#[derive(Default)]
pub(crate) struct Blake3Hasher(blake3::Hasher);

impl From<Blake3Hasher> for Hash32 {
    fn from(value: Blake3Hasher) -> Self {
        let bytes: [u8; 32] = value.0.finalize().into();
        Hash32::from(bytes)
    }
}

impl std::hash::Hasher for Blake3Hasher {
    fn finish(&self) -> u64 {
        let mut output = [0u8; 8];
        self.0.finalize_xof().fill(&mut output);
        u64::from_le_bytes(output)
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = Hash32::of(&("swiftc", vec!["-c", "a.swift"]));
        let b = Hash32::of(&("swiftc", vec!["-c", "a.swift"]));
        let c = Hash32::of(&("swiftc", vec!["-c", "b.swift"]));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hex() {
        let hash = Hash32::from([0xABu8; 32]);
        assert_eq!(hash.to_hex().len(), 64);
        assert!(hash.to_hex().starts_with("abab"));
        assert_eq!(hash.to_short_hex(), "abababababababab");
        assert_eq!(format!("{hash}"), "abababababababab");
    }
}
