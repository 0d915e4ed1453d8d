use std::fmt;

use serde::{Deserialize, Serialize};

/// Hash algorithms supported by the checksum component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Crc32,
    Unknown,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Crc32 => "crc32",
            HashAlgorithm::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Signature algorithms supported by the checksum component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigAlgorithm {
    Ed25519,
    Rsa,
}

impl fmt::Display for SigAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigAlgorithm::Ed25519 => f.write_str("ed25519"),
            SigAlgorithm::Rsa => f.write_str("rsa"),
        }
    }
}
