//! core type-safe identifiers for the storage layer.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifier of a commit: the hex SHA256 of its serialized content.
///
/// This makes sure we don't accidentally pass a blob digest where a commit ID
/// is expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    /// build a CommitId from a finished digest
    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    /// parse a CommitId from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
        validate_hex_digest(hex)?;
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// short form of the commit ID
    pub fn short(&self) -> &str {
        &self.0[..7.min(self.0.len())]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SHA256 digest of stored bytes (database snapshots, licence texts).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// hash the given bytes
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// parse a digest from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, InvalidNameError> {
        validate_hex_digest(hex)?;
        Ok(Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_hex_digest(hex: &str) -> Result<(), InvalidNameError> {
    if hex.len() != 64 {
        return Err(InvalidNameError::InvalidDigest(hex.to_string()));
    }
    if let Some((position, char)) = hex.chars().enumerate().find(|(_, c)| !c.is_ascii_hexdigit()) {
        return Err(InvalidNameError::InvalidCharacter { char, position });
    }
    Ok(())
}

/// A hosted database, addressed by owner and name.
///
/// Owners compare case-insensitively, database names exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseRef {
    pub owner: String,
    pub name: String,
}

impl DatabaseRef {
    const MAX_OWNER_LEN: usize = 63;
    const MAX_NAME_LEN: usize = 256;

    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let owner = owner.into();
        let name = name.into();

        if owner.is_empty() || name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if owner.len() > Self::MAX_OWNER_LEN {
            return Err(InvalidNameError::TooLong(owner.len()));
        }
        if name.len() > Self::MAX_NAME_LEN {
            return Err(InvalidNameError::TooLong(name.len()));
        }
        for (i, c) in owner.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' && c != '.' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        for (i, c) in name.chars().enumerate() {
            if c == '/' || c == '\\' || c.is_control() {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(Self { owner, name })
    }

    /// lookup key for the owner
    pub fn owner_key(&self) -> String {
        self.owner.to_lowercase()
    }
}

impl PartialEq for DatabaseRef {
    fn eq(&self, other: &Self) -> bool {
        self.owner.eq_ignore_ascii_case(&other.owner) && self.name == other.name
    }
}

impl Eq for DatabaseRef {}

impl fmt::Display for DatabaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A branch on a specific database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    pub database: DatabaseRef,
    pub branch: String,
}

impl BranchRef {
    pub fn new(database: DatabaseRef, branch: impl Into<String>) -> Self {
        Self {
            database,
            branch: branch.into(),
        }
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.database, self.branch)
    }
}

/// A validated branch, tag or release name.
///
/// Valid names:
/// - 1 to 32 characters (or a caller supplied limit)
/// - Alphanumeric, dash, underscore, dot and space only
/// - No leading or trailing space, no `..`
///
/// Names are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefName(String);

impl RefName {
    pub const MAX_LEN: usize = 32;

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        Self::with_max_len(name, Self::MAX_LEN)
    }

    pub fn with_max_len(name: impl Into<String>, max_len: usize) -> Result<Self, InvalidNameError> {
        let name = name.into();

        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        let len = name.chars().count();
        if len > max_len {
            return Err(InvalidNameError::TooLong(len));
        }

        for (i, c) in name.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.' | ' ') {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        if name.starts_with(' ') || name.ends_with(' ') || name.contains("..") {
            return Err(InvalidNameError::InvalidPath(name));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// author/committer identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// error type for invalid names (databases, refs, digests)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
    InvalidDigest(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::InvalidPath(path) => write!(f, "invalid name: '{}'", path),
            Self::InvalidDigest(d) => write!(f, "not a 64 character hex digest: '{}'", d),
        }
    }
}

impl std::error::Error for InvalidNameError {}
