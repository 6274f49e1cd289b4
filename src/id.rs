//! Stable column identities.
//!
//! A [ColumnId] names a column for its whole lifetime. Renames, reorders and
//! type changes keep the id, which is what lets legends (see
//! [crate::legend]) be reused across schema versions that only touch column
//! metadata.
//!
//! Ids are 128 bit and rendered as hyphenated lower-case UUID strings in
//! `meta/schema.json` and inside legends. The nil id is never valid, so
//! `Option<ColumnId>` can stand in for "no column".

use std::fmt;
use std::fmt::Display;
use std::fmt::LowerHex;
use std::fmt::UpperHex;
use std::str::FromStr;

use rand::thread_rng;
use rand::RngCore;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use sha2::Digest;
use sha2::Sha256;
use uuid::Uuid;

/// The length of a 128bit column identifier in bytes.
pub const ID_LEN: usize = 16;

/// Represents a 16 byte column identifier.
pub type RawId = [u8; ID_LEN];

/// A unique, immutable 128 bit column identifier.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnId {
    raw: RawId,
}

impl ColumnId {
    /// Creates a new `ColumnId` from a [RawId] 16 byte array.
    /// Returns `None` for the nil id.
    pub const fn new(raw: RawId) -> Option<Self> {
        if u128::from_be_bytes(raw) == 0 {
            None
        } else {
            Some(ColumnId { raw })
        }
    }

    /// Generates a fresh random id.
    pub fn random() -> Self {
        let mut rng = thread_rng();
        loop {
            let mut raw = [0; ID_LEN];
            rng.fill_bytes(&mut raw[..]);
            if let Some(id) = ColumnId::new(raw) {
                return id;
            }
        }
    }

    /// Derives an id from a sequence of strings, typically an import salt
    /// followed by the column name and type.
    ///
    /// Importing the same table twice with the same salt yields the same ids,
    /// so independently created datasets agree on their column identities.
    pub fn deterministic<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parts: Vec<S> = parts.into_iter().collect();
        let mut buf = Vec::new();
        rmp::encode::write_array_len(&mut buf, parts.len() as u32)
            .expect("writing to a Vec cannot fail");
        for part in &parts {
            rmp::encode::write_str(&mut buf, part.as_ref()).expect("writing to a Vec cannot fail");
        }
        let digest = Sha256::digest(&buf);
        let mut raw = [0; ID_LEN];
        raw.copy_from_slice(&digest[..ID_LEN]);
        ColumnId::new(raw).unwrap_or_else(ColumnId::random)
    }

    /// Parses a hexadecimal (32 digit, unhyphenated) identifier.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let raw = <RawId as hex::FromHex>::from_hex(hex).ok()?;
        ColumnId::new(raw)
    }

    pub fn raw(&self) -> &RawId {
        &self.raw
    }

    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_bytes(self.raw)
    }
}

impl AsRef<[u8]> for ColumnId {
    fn as_ref(&self) -> &[u8] {
        &self.raw[..]
    }
}

impl From<ColumnId> for RawId {
    fn from(id: ColumnId) -> Self {
        id.raw
    }
}

impl From<ColumnId> for Uuid {
    fn from(id: ColumnId) -> Self {
        id.to_uuid()
    }
}

impl TryFrom<Uuid> for ColumnId {
    type Error = ParseIdError;

    fn try_from(id: Uuid) -> Result<Self, ParseIdError> {
        ColumnId::new(id.into_bytes()).ok_or(ParseIdError::Nil)
    }
}

impl Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid().hyphenated())
    }
}

impl fmt::Debug for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnId({self})")
    }
}

impl LowerHex for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.raw[..] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl UpperHex for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.raw[..] {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// An error that can occur when parsing a column id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    BadFormat(uuid::Error),
    Nil,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadFormat(e) => write!(f, "invalid column id: {e}"),
            Self::Nil => write!(f, "invalid column id: the nil id is reserved"),
        }
    }
}

impl std::error::Error for ParseIdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BadFormat(e) => Some(e),
            Self::Nil => None,
        }
    }
}

impl From<uuid::Error> for ParseIdError {
    fn from(e: uuid::Error) -> Self {
        Self::BadFormat(e)
    }
}

impl FromStr for ColumnId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)?.try_into()
    }
}

impl Serialize for ColumnId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ColumnId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[doc(hidden)]
pub use hex_literal::hex as _hex_literal_hex;

/// Creates a [ColumnId] from a hex string literal.
///
/// # Example
/// ```
/// use featurestore::column_id;
/// let id = column_id!("7D06820D69947D76E7177E5DEA4EA773");
/// assert_eq!(id.to_string(), "7d06820d-6994-7d76-e717-7e5dea4ea773");
/// ```
#[macro_export]
macro_rules! column_id {
    ( $data:expr ) => {
        $crate::id::ColumnId::new($crate::id::_hex_literal_hex!($data)).unwrap()
    };
}

pub use column_id;

#[cfg(feature = "proptest")]
pub struct ColumnIdValueTree(ColumnId);

#[cfg(feature = "proptest")]
#[derive(Debug)]
pub struct RandomColumnId();

#[cfg(feature = "proptest")]
impl proptest::strategy::Strategy for RandomColumnId {
    type Tree = ColumnIdValueTree;
    type Value = ColumnId;

    fn new_tree(
        &self,
        runner: &mut proptest::prelude::prop::test_runner::TestRunner,
    ) -> proptest::prelude::prop::strategy::NewTree<Self> {
        let rng = runner.rng();
        loop {
            let mut raw = [0; ID_LEN];
            rng.fill_bytes(&mut raw[..]);
            if let Some(id) = ColumnId::new(raw) {
                return Ok(ColumnIdValueTree(id));
            }
        }
    }
}

#[cfg(feature = "proptest")]
impl proptest::strategy::ValueTree for ColumnIdValueTree {
    type Value = ColumnId;

    fn simplify(&mut self) -> bool {
        false
    }
    fn complicate(&mut self) -> bool {
        false
    }
    fn current(&self) -> ColumnId {
        self.0
    }
}
