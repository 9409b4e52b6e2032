use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// A certificate serial number, held as lowercase hex without separators.
///
/// The canonical text form is colon-separated hex (`1a:2b`), storage keys use
/// dashes (`1a-2b`) so they stay a single path segment.
#[derive(Debug, Clone, Eq)]
pub struct SerialNumber {
    hex: String,
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SerialNumberParseError {
    #[error("Invalid hex character: {0}")]
    InvalidHexCharacter(char),

    #[error("Empty string provided")]
    EmptyString,

    #[error("Invalid length: expected even number of hex characters")]
    InvalidLength,
}

pub type Result<T> = std::result::Result<T, SerialNumberParseError>;

impl SerialNumber {
    /// Parse a serial written as hex, with colon or dash separators or none at all
    pub fn parse(identifier: &str) -> Result<Self> {
        let cleaned: String = identifier
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        if cleaned.is_empty() {
            return Err(SerialNumberParseError::EmptyString);
        }

        // Check if length is even (hex pairs)
        if cleaned.len() % 2 != 0 {
            return Err(SerialNumberParseError::InvalidLength);
        }

        for ch in cleaned.chars() {
            if !ch.is_ascii_hexdigit() {
                return Err(SerialNumberParseError::InvalidHexCharacter(ch));
            }
        }

        Ok(Self { hex: cleaned })
    }

    /// Build a serial from its big-endian integer bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(SerialNumberParseError::EmptyString);
        }
        Ok(Self {
            hex: hex::encode(bytes),
        })
    }

    /// Get the raw hex format (no separators)
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Get the colon-separated hex format (e.g., "3b:fc:2e:b1...")
    pub fn as_colon_hex(&self) -> String {
        self.joined(":")
    }

    /// Get the dash-separated form used in storage keys
    pub fn as_storage_key(&self) -> String {
        self.joined("-")
    }

    /// Big-endian integer bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        // Validated at construction, always an even count of hex digits
        hex::decode(&self.hex).unwrap_or_default()
    }

    fn joined(&self, separator: &str) -> String {
        self.hex
            .as_bytes()
            .chunks(2)
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_colon_hex())
    }
}

impl FromStr for SerialNumber {
    type Err = SerialNumberParseError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Hash for SerialNumber {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hex.hash(state);
    }
}

impl PartialEq for SerialNumber {
    fn eq(&self, other: &Self) -> bool {
        self.hex == other.hex
    }
}

/// Orders by numeric value; equal values differing only in leading zeros
/// fall back to the hex text so the ordering agrees with `Eq`.
impl Ord for SerialNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.hex.trim_start_matches('0');
        let b = other.hex.trim_start_matches('0');
        a.len()
            .cmp(&b.len())
            .then_with(|| a.cmp(b))
            .then_with(|| self.hex.cmp(&other.hex))
    }
}

impl PartialOrd for SerialNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for SerialNumber {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.as_colon_hex())
    }
}

impl<'de> Deserialize<'de> for SerialNumber {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SerialNumber::parse(&s).map_err(serde::de::Error::custom)
    }
}
