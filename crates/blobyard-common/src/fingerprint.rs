//! Fingerprints: the (digest, path, mode) triples exchanged with clients

use std::fmt::{self, Display};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Digest, ParseError};

/// Permission bits of an archive entry.
///
/// Serialized as an octal string (`"644"`). Deserialization also accepts a JSON
/// number holding raw mode bits, which is what older clients send; any file-type
/// bits in that form are masked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    pub const MAX: u32 = 0o7777;

    pub fn new(bits: u32) -> Result<Self, ParseError> {
        if bits > Self::MAX {
            return Err(ParseError::InvalidMode(format!("{bits:o}")));
        }
        Ok(Self(bits))
    }

    /// Keeps only the permission bits of a full unix mode (e.g. `0o100755`).
    pub fn from_unix_mode(mode: u32) -> Self {
        Self(mode & Self::MAX)
    }

    pub fn parse_octal(value: &str) -> Result<Self, ParseError> {
        let digits = value.trim();
        if digits.is_empty() || digits.len() > 5 {
            return Err(ParseError::InvalidMode(value.to_string()));
        }
        let bits = u32::from_str_radix(digits, 8)
            .map_err(|_| ParseError::InvalidMode(value.to_string()))?;
        Self::new(bits).map_err(|_| ParseError::InvalidMode(value.to_string()))
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self(0o644)
    }
}

impl Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:o}", self.0)
    }
}

impl Serialize for FileMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FileMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ModeVisitor;

        impl<'de> Visitor<'de> for ModeVisitor {
            type Value = FileMode;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an octal permission string or numeric mode bits")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<FileMode, E> {
                FileMode::parse_octal(value).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<FileMode, E> {
                let mode = u32::try_from(value)
                    .map_err(|_| E::custom(ParseError::InvalidMode(value.to_string())))?;
                Ok(FileMode::from_unix_mode(mode))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<FileMode, E> {
                let value = u64::try_from(value)
                    .map_err(|_| E::custom(ParseError::InvalidMode(value.to_string())))?;
                self.visit_u64(value)
            }
        }

        deserializer.deserialize_any(ModeVisitor)
    }
}

/// One desired archive entry: content digest, relative path and permission bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawFingerprint")]
pub struct Fingerprint {
    #[serde(rename = "sha1")]
    digest: Digest,
    #[serde(rename = "fn")]
    name: String,
    mode: FileMode,
}

#[derive(Deserialize)]
struct RawFingerprint {
    sha1: Digest,
    #[serde(rename = "fn")]
    name: String,
    #[serde(default)]
    mode: FileMode,
}

impl TryFrom<RawFingerprint> for Fingerprint {
    type Error = ParseError;

    fn try_from(raw: RawFingerprint) -> Result<Self, Self::Error> {
        Fingerprint::new(raw.sha1, raw.name, raw.mode)
    }
}

impl Fingerprint {
    pub fn new(digest: Digest, name: impl Into<String>, mode: FileMode) -> Result<Self, ParseError> {
        let name = name.into();
        validate_relative_name(&name)?;
        Ok(Self { digest, name, mode })
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> FileMode {
        self.mode
    }
}

fn validate_relative_name(name: &str) -> Result<(), ParseError> {
    let invalid = name.is_empty()
        || name.starts_with('/')
        || name.contains('\0')
        || name.split(['/', '\\']).any(|part| part == "..");
    if invalid {
        Err(ParseError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

/// Wire shape of a bare digest, as used by the match endpoint: `{"sha1": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestEntry {
    pub sha1: Digest,
}

impl From<Digest> for DigestEntry {
    fn from(sha1: Digest) -> Self {
        Self { sha1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";

    #[test]
    fn test_mode_accepts_octal_strings() {
        assert_eq!(FileMode::parse_octal("644").unwrap().bits(), 0o644);
        assert_eq!(FileMode::parse_octal("0755").unwrap().bits(), 0o755);
        assert!(FileMode::parse_octal("").is_err());
        assert!(FileMode::parse_octal("999").is_err());
        assert!(FileMode::parse_octal("17777").is_err());
    }

    #[test]
    fn test_mode_wire_forms() {
        let from_string: FileMode = serde_json::from_str("\"644\"").unwrap();
        let from_number: FileMode = serde_json::from_str("420").unwrap();
        let with_type_bits: FileMode = serde_json::from_str("33261").unwrap(); // 0o100755

        assert_eq!(from_string, from_number);
        assert_eq!(with_type_bits.bits(), 0o755);
        assert_eq!(serde_json::to_string(&from_number).unwrap(), "\"644\"");
        assert!(serde_json::from_str::<FileMode>("-1").is_err());
    }

    #[test]
    fn test_fingerprint_wire_contract() {
        let json = format!(r#"{{"sha1":"{ABC}","fn":"app/main.rb","mode":"755"}}"#);
        let fingerprint: Fingerprint = serde_json::from_str(&json).unwrap();

        assert_eq!(fingerprint.digest().as_str(), ABC);
        assert_eq!(fingerprint.name(), "app/main.rb");
        assert_eq!(fingerprint.mode().bits(), 0o755);
        assert_eq!(serde_json::to_string(&fingerprint).unwrap(), json);
    }

    #[test]
    fn test_fingerprint_mode_defaults() {
        let json = format!(r#"{{"sha1":"{ABC}","fn":"Gemfile"}}"#);
        let fingerprint: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fingerprint.mode(), FileMode::default());
    }

    #[test]
    fn test_fingerprint_rejects_escaping_names() {
        let digest = Digest::parse(ABC).unwrap();
        for name in ["", "/etc/passwd", "../outside", "a/../../b", "a\\..\\b"] {
            assert!(
                Fingerprint::new(digest.clone(), name, FileMode::default()).is_err(),
                "{name:?} should be rejected"
            );
        }
        assert!(Fingerprint::new(digest, "./a/b..c", FileMode::default()).is_ok());
    }

    #[test]
    fn test_fingerprint_rejects_bad_digest_on_wire() {
        let json = r#"[{"sha1":"abc","fn":"filename1","mode":"644"}]"#;
        assert!(serde_json::from_str::<Vec<Fingerprint>>(json).is_err());
    }

    #[test]
    fn test_digest_entry_shape() {
        let entry = DigestEntry::from(Digest::parse(ABC).unwrap());
        assert_eq!(
            serde_json::to_string(&entry).unwrap(),
            format!(r#"{{"sha1":"{ABC}"}}"#)
        );
    }
}
