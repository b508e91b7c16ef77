// Re-export dependencies used in public interfaces of common types

use std::fmt::{self, Display};
use std::io::{self, Write};
use std::str::FromStr;

pub use serde::{Deserialize, Serialize};
use sha1::{Digest as _, Sha1};
use thiserror::Error;

mod fingerprint;

pub use fingerprint::{DigestEntry, FileMode, Fingerprint};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid digest {0:?}: expected 40 lowercase hex characters")]
    InvalidDigest(String),

    #[error("Invalid file mode {0:?}: expected octal permission bits no greater than 7777")]
    InvalidMode(String),

    #[error("Invalid entry name {0:?}: expected a relative path")]
    InvalidName(String),
}

/// Content digest of a stored blob: the SHA-1 of its bytes as 40 lowercase hex
/// characters. Doubles as the blob's storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    pub const HEX_LEN: usize = 40;

    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let valid = value.len() == Self::HEX_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(ParseError::InvalidDigest(value.to_string()))
        }
    }

    /// Digest of an in-memory buffer
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Writer adapter that hashes everything passing through it, so content can be
/// spooled and digested in a single read pass.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha1,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha1::new(),
            written: 0,
        }
    }

    /// Returns the inner writer, the digest of all bytes written and their count.
    pub fn finish(self) -> (W, Digest, u64) {
        let digest = Digest(hex::encode(self.hasher.finalize()));
        (self.inner, digest, self.written)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
