//! Content hash identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An uppercase hexadecimal content hash used as the cache key.
///
/// The hash is an opaque identifier: it names the file, it is never verified
/// against the bytes. Input is normalized to upper case on construction, so
/// equality and map lookups are case-insensitive. A file's on-disk name,
/// uppercased, equals its hash.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    /// Parse and normalize a hash.
    ///
    /// Accepts ASCII hex of length >= 2 (the shard prefix needs two
    /// characters) in either case.
    pub fn new(s: impl AsRef<str>) -> crate::Result<Self> {
        let s = s.as_ref();
        if s.len() < 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidHash(s.to_string()));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }

    /// The normalized uppercase hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading two hex digits, used as the shard directory name.
    pub fn shard_prefix(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHash({})", self.0)
    }
}

impl FromStr for FileHash {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for FileHash {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::new(s)
    }
}

impl From<FileHash> for String {
    fn from(hash: FileHash) -> String {
        hash.0
    }
}
