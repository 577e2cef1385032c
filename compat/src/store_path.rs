use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::nixbase32::{self, Nixbase32DecodeError};

pub const DIGEST_SIZE: usize = 20;
pub const ENCODED_DIGEST_SIZE: usize = nixbase32::encode_len(DIGEST_SIZE);

/// The store prefix, without trailing slash.
pub const STORE_DIR: &str = "/nix/store";
pub const STORE_DIR_WITH_SLASH: &str = "/nix/store/";

/// Errors that can occur when parsing a literal store path.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("path does not start with the store prefix")]
    MissingStoreDir,
    #[error("dash is missing between digest and name")]
    MissingDash,
    #[error("invalid digest encoding: {0}")]
    InvalidDigestEncoding(Nixbase32DecodeError),
    #[error("invalid length")]
    InvalidLength,
    #[error("invalid character '{0}' in name \"{1}\"")]
    InvalidName(char, String),
}

/// A path in the store, a direct child of [STORE_DIR].
///
/// It consists of a digest (20 bytes, nixbase32-encoded in the string
/// form) and a name. The name may only contain ASCII alphanumerics or
/// one of `-`, `_`, `.`, `+`, `?`, `=`. Derivation paths are store
/// paths too, their names just end in `.drv`.
///
/// Every [StorePath] is syntactically valid by construction; code that
/// receives paths off the wire parses them into this type before
/// attempting any I/O.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorePath {
    digest: [u8; DIGEST_SIZE],
    name: String,
}

impl StorePath {
    pub fn digest(&self) -> &[u8; DIGEST_SIZE] {
        &self.digest
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The nixbase32-encoded digest part of the basename.
    pub fn digest_part(&self) -> String {
        nixbase32::encode(&self.digest)
    }

    /// Construct a [StorePath] from the `$digest-$name` basename.
    pub fn from_basename(s: &str) -> Result<Self, Error> {
        if s.len() < ENCODED_DIGEST_SIZE + 1 {
            return Err(Error::InvalidLength);
        }

        let bytes = s.as_bytes();
        let digest = nixbase32::decode(&bytes[..ENCODED_DIGEST_SIZE])
            .map_err(Error::InvalidDigestEncoding)?;

        if bytes[ENCODED_DIGEST_SIZE] != b'-' {
            return Err(Error::MissingDash);
        }

        let name = validate_name(&s[ENCODED_DIGEST_SIZE + 1..])?;

        Ok(StorePath {
            digest: digest.try_into().expect("digest size checked above"),
            name: name.to_string(),
        })
    }

    /// Construct a [StorePath] from an absolute path under [STORE_DIR].
    pub fn from_absolute_path(s: &str) -> Result<Self, Error> {
        match s.strip_prefix(STORE_DIR_WITH_SLASH) {
            Some(basename) => Self::from_basename(basename),
            None => Err(Error::MissingStoreDir),
        }
    }

    /// The absolute path string, `$digest-$name` prefixed with
    /// [STORE_DIR_WITH_SLASH].
    pub fn to_absolute_path(&self) -> String {
        format!("{}{}", STORE_DIR_WITH_SLASH, self)
    }
}

fn validate_name(name: &str) -> Result<&str, Error> {
    if name.is_empty() {
        return Err(Error::InvalidLength);
    }

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '?' | '=') {
            continue;
        }
        return Err(Error::InvalidName(c, name.to_string()));
    }

    Ok(name)
}

impl PartialOrd for StorePath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Ordered by the encoded digest, then name, to match the sorting
/// order of the string form.
impl Ord for StorePath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.digest
            .iter()
            .rev()
            .cmp(other.digest.iter().rev())
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl FromStr for StorePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_absolute_path(s)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", nixbase32::encode(&self.digest), self.name)
    }
}

/// Store paths travel as their absolute-path string form on the wire.
impl Serialize for StorePath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_absolute_path())
    }
}

impl<'de> Deserialize<'de> for StorePath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        StorePath::from_absolute_path(&s)
            .map_err(|e| D::Error::custom(format!("invalid store path '{}': {}", s, e)))
    }
}
