//! Feature paths.
//!
//! Every feature lives at `feature/<segment>/.../<filename>`. The filename is
//! the padded URL-safe base64 of the MessagePack-encoded primary-key tuple,
//! so the key can always be read back from it. The directory segments shard
//! the features into a tree with at most `branches` entries per level:
//!
//! * `int`: for a single integer key `n`, the `levels` least significant
//!   digits of `n / branches` in the encoding's base, most significant
//!   first. Neighbouring keys share their directory.
//! * `hash`: the first `levels` digits of the SHA-256 of the encoded key.
//!
//! Both are pure functions of the [PathStructure] and the key.

use std::error::Error;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::codec::decode_pk;
use crate::codec::encode_pk;
use crate::codec::MalformedError;
use crate::schema::DataType;
use crate::schema::Schema;
use crate::value::Value;

/// Directory holding the features below a dataset root.
pub const FEATURE_DIR: &str = "feature";

const BASE64_DIGITS: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Int,
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Hex,
    Base64,
}

impl Encoding {
    fn digits(self) -> &'static [u8] {
        match self {
            Encoding::Hex => HEX_DIGITS,
            Encoding::Base64 => BASE64_DIGITS,
        }
    }

    fn base(self) -> u32 {
        self.digits().len() as u32
    }

    fn encode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Hex => hex::encode(bytes),
            Encoding::Base64 => URL_SAFE_NO_PAD.encode(bytes),
        }
    }

    /// Characters of a SHA-256 digest that carry only digest bits.
    fn hash_chars(self) -> u32 {
        match self {
            Encoding::Hex => 64,
            Encoding::Base64 => 42,
        }
    }
}

/// How features are laid out below `feature/`, stored as
/// `meta/path-structure.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathStructure {
    pub scheme: Scheme,
    pub branches: u32,
    pub levels: u32,
    pub encoding: Encoding,
}

#[derive(Debug)]
pub enum PathError {
    /// `branches` is not a whole number of digits in `encoding`.
    BadBranches { branches: u32, encoding: Encoding },
    TooManyLevels { levels: u32, max: u32 },
    /// The `int` scheme needs exactly one integer key value.
    IntSchemeKey(String),
    MalformedFilename(MalformedError),
    /// The path is not `feature/<segments>/<filename>` for this structure.
    NotAFeaturePath(String),
    Json(serde_json::Error),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadBranches { branches, encoding } => {
                write!(f, "{branches} branches cannot be encoded as {encoding:?}")
            }
            Self::TooManyLevels { levels, max } => {
                write!(f, "{levels} levels exceed the maximum of {max}")
            }
            Self::IntSchemeKey(reason) => write!(f, "int path scheme: {reason}"),
            Self::MalformedFilename(e) => write!(f, "malformed feature filename: {e}"),
            Self::NotAFeaturePath(path) => write!(f, "{path:?} is not a feature path"),
            Self::Json(e) => write!(f, "malformed path structure: {e}"),
        }
    }
}

impl Error for PathError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MalformedFilename(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MalformedError> for PathError {
    fn from(e: MalformedError) -> Self {
        Self::MalformedFilename(e)
    }
}

impl From<serde_json::Error> for PathError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl PathStructure {
    /// The layout of datasets that have no `path-structure.json`.
    pub const fn legacy() -> Self {
        PathStructure {
            scheme: Scheme::Hash,
            branches: 256,
            levels: 2,
            encoding: Encoding::Hex,
        }
    }

    /// `int` for a single integer key, `hash` for anything else.
    pub fn recommended(schema: &Schema) -> Self {
        let pk = schema.pk_columns();
        let scheme = match pk.as_slice() {
            [column] if matches!(column.data_type, DataType::Integer { .. }) => Scheme::Int,
            _ => Scheme::Hash,
        };
        PathStructure {
            scheme,
            branches: 64,
            levels: 4,
            encoding: Encoding::Base64,
        }
    }

    /// Digits per path segment.
    fn width(&self) -> Result<u32, PathError> {
        let bad = PathError::BadBranches {
            branches: self.branches,
            encoding: self.encoding,
        };
        let base = self.encoding.base();
        let mut width = 0;
        let mut n = 1u64;
        while n < self.branches as u64 {
            n *= base as u64;
            width += 1;
        }
        if n != self.branches as u64 || width == 0 {
            return Err(bad);
        }
        match (self.encoding, self.branches) {
            (Encoding::Base64, 64) | (Encoding::Hex, 16) | (Encoding::Hex, 256) => Ok(width),
            _ => Err(bad),
        }
    }

    pub fn validate(&self) -> Result<(), PathError> {
        let width = self.width()?;
        let max = self.encoding.hash_chars() / width;
        if self.levels > max {
            return Err(PathError::TooManyLevels {
                levels: self.levels,
                max,
            });
        }
        Ok(())
    }

    /// Checks that this structure can address the keys of `schema`.
    pub fn validate_for(&self, schema: &Schema) -> Result<(), PathError> {
        self.validate()?;
        if self.scheme == Scheme::Int {
            let pk = schema.pk_columns();
            match pk.as_slice() {
                [column] if matches!(column.data_type, DataType::Integer { .. }) => {}
                _ => {
                    return Err(PathError::IntSchemeKey(
                        "the primary key must be a single integer column".into(),
                    ))
                }
            }
        }
        Ok(())
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, PathError> {
        let structure: PathStructure = serde_json::from_slice(bytes)?;
        structure.validate()?;
        Ok(structure)
    }

    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).expect("path structure serialization is infallible")
    }

    /// The directory segments for `pk`.
    pub fn segments(&self, pk: &[Value]) -> Result<Vec<String>, PathError> {
        let width = self.width()? as usize;
        let levels = self.levels as usize;
        let digits = match self.scheme {
            Scheme::Int => {
                let n = match pk {
                    [Value::Int(n)] => *n,
                    _ => {
                        return Err(PathError::IntSchemeKey(format!(
                            "expected one integer key value, got {pk:?}"
                        )))
                    }
                };
                int_digits(n, self.branches, levels * width, self.encoding)
            }
            Scheme::Hash => {
                let digest = Sha256::digest(encode_pk(pk));
                let mut encoded = self.encoding.encode(&digest);
                encoded.truncate(levels * width);
                encoded
            }
        };
        Ok(digits
            .as_bytes()
            .chunks(width)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect())
    }

    /// `feature/<segments...>/<filename>`, relative to the dataset root.
    pub fn feature_path(&self, pk: &[Value]) -> Result<String, PathError> {
        let mut parts = vec![FEATURE_DIR.to_owned()];
        parts.extend(self.segments(pk)?);
        parts.push(filename(pk));
        Ok(parts.join("/"))
    }

    /// Recovers the primary key from a path produced by [Self::feature_path].
    pub fn pk_from_path(&self, path: &str) -> Result<Vec<Value>, PathError> {
        let not_a_feature = || PathError::NotAFeaturePath(path.to_owned());
        let mut parts = path.split('/');
        let name = parts.next_back().ok_or_else(not_a_feature)?;
        if parts.next() != Some(FEATURE_DIR) || parts.count() != self.levels as usize {
            return Err(not_a_feature());
        }
        Ok(decode_filename(name)?)
    }
}

impl Default for PathStructure {
    fn default() -> Self {
        Self::legacy()
    }
}

/// `n / branches` as `len` digits in `encoding`, keeping the least
/// significant ones. Negative keys wrap like unsigned integers.
fn int_digits(n: i64, branches: u32, len: usize, encoding: Encoding) -> String {
    let digits = encoding.digits();
    let base = encoding.base() as i128;
    let mut q = (n as i128).div_euclid(branches as i128);
    let mut out = vec![digits[0]; len];
    for slot in out.iter_mut().rev() {
        *slot = digits[q.rem_euclid(base) as usize];
        q = q.div_euclid(base);
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Padded URL-safe base64 of the encoded key tuple.
pub fn filename(pk: &[Value]) -> String {
    URL_SAFE.encode(encode_pk(pk))
}

pub fn decode_filename(name: &str) -> Result<Vec<Value>, MalformedError> {
    let bytes = URL_SAFE
        .decode(name)
        .map_err(|_| MalformedError::BadBase64)?;
    decode_pk(&bytes)
}
