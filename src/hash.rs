//! Content hashes.
//!
//! Legends are addressed by the hash of their canonical bytes and the `hash`
//! path scheme shards features by the hash of their encoded primary key.
//! Both must be reproducible by any other implementation, so the protocol is
//! fixed per use site rather than configurable at runtime.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hasher;
use std::marker::PhantomData;
use std::str::FromStr;

use digest::typenum::U32;
use digest::Digest;
use hex::FromHex;
use hex::FromHexError;

pub use sha2::Sha256;

/// The length of a digest in bytes.
pub const HASH_LEN: usize = 32;

/// A raw 256 bit digest.
pub type RawHash = [u8; HASH_LEN];

/// A trait for hash functions usable for content addressing.
pub trait HashProtocol: Digest<OutputSize = U32> + Clone + Send + Sync + 'static {
    const NAME: &'static str;
}

impl HashProtocol for Sha256 {
    const NAME: &'static str = "sha256";
}

/// A fixed-size 256bit digest of a byte sequence, tagged with the protocol
/// that produced it.
pub struct Hash<H> {
    pub raw: RawHash,
    _hasher: PhantomData<fn(H) -> ()>,
}

impl<H: HashProtocol> Hash<H> {
    pub fn new(raw: RawHash) -> Self {
        Self {
            raw,
            _hasher: PhantomData,
        }
    }

    pub fn digest(bytes: &[u8]) -> Self {
        Self::new(H::digest(bytes).into())
    }

    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let raw = RawHash::from_hex(hex)?;
        Ok(Self::new(raw))
    }

    /// Lower-case hex, the form used in object names.
    pub fn to_hex(&self) -> String {
        hex::encode(self.raw)
    }
}

impl<H> Clone for Hash<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H> Copy for Hash<H> {}

impl<H> PartialEq for Hash<H> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<H> Eq for Hash<H> {}

impl<H> PartialOrd for Hash<H> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<H> Ord for Hash<H> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<H> std::hash::Hash for Hash<H> {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.raw.hash(state);
    }
}

impl<H: HashProtocol> fmt::Display for Hash<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl<H: HashProtocol> fmt::Debug for Hash<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", H::NAME, self.to_hex())
    }
}

impl<H: HashProtocol> FromStr for Hash<H> {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// An error that can occur when converting a hash from a string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HashError {
    BadHex(FromHexError),
}

impl From<FromHexError> for HashError {
    fn from(value: FromHexError) -> Self {
        HashError::BadHex(value)
    }
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHex(e) => write!(f, "invalid hash: {e}"),
        }
    }
}

impl std::error::Error for HashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BadHex(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        let h = Hash::<Sha256>::digest(b"abc");
        assert_eq!(
            h.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hex_roundtrip() {
        let h = Hash::<Sha256>::digest(b"legend");
        let parsed: Hash<Sha256> = h.to_hex().parse().expect("roundtrip should succeed");
        assert_eq!(parsed, h);
    }

    #[test]
    fn bad_hex() {
        let err = Hash::<Sha256>::from_hex("BAD!").expect_err("bad hex should fail");
        assert!(matches!(err, HashError::BadHex(..)));
        let err = Hash::<Sha256>::from_hex("abcd").expect_err("short hex should fail");
        assert!(matches!(err, HashError::BadHex(..)));
    }
}
