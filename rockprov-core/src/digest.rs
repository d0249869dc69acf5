//! Content digests: algorithms, declared (expected) values and comparison.

use crate::errors::ProvisionError;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Length of the lowercase hex rendering.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    /// Guess the algorithm from a hex string's length.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Self::Md5),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn hasher(self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(Md5::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

/// Incremental hasher over either algorithm.
pub enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Md5(h) => h.update(bytes),
            Self::Sha256(h) => h.update(bytes),
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => format!("{:x}", h.finalize()),
            Self::Sha256(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// A declared digest: normalised to lowercase, length-checked for its algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedDigest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl ExpectedDigest {
    pub fn parse(algorithm: DigestAlgorithm, raw: &str) -> Result<Self, ProvisionError> {
        let hex = raw.trim().to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProvisionError::Config(format!(
                "{:?} is not a {}-character {} hex digest",
                raw,
                algorithm.hex_len(),
                algorithm
            )));
        }
        Ok(Self { algorithm, hex })
    }

    /// Parse a digest whose algorithm is implied by its length (32 = md5, 64 = sha256).
    pub fn parse_any(raw: &str) -> Result<Self, ProvisionError> {
        let algorithm = DigestAlgorithm::from_hex_len(raw.trim().len()).ok_or_else(|| {
            ProvisionError::Config(format!(
                "{:?} is neither an md5 (32) nor a sha256 (64) hex digest",
                raw
            ))
        })?;
        Self::parse(algorithm, raw)
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for ExpectedDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// Case-insensitive exact comparison. No prefix or partial matches.
pub fn digests_match(actual: &str, expected: &str) -> bool {
    actual.len() == expected.len() && actual.eq_ignore_ascii_case(expected)
}
