//! Checksum and signature verification.
//!
//! Hashes files, buffers and strings with SHA-1, SHA-256 or CRC32 (IEEE)
//! and verifies Ed25519 and RSA (PKCS#1 v1.5 over SHA-256) signatures
//! against PEM-encoded public keys.
//!
//! # Key Features
//!
//! - **Incremental**: file hashing streams in fixed-size chunks
//! - **Lenient comparison**: digests compare case-insensitively; CRC32
//!   sums are also accepted in their decimal `u32` form
//! - **Public keys only**: any PEM block whose label mentions a private
//!   key is rejected before parsing

pub use self::checker::Checker;
pub use self::error::VerifyError;
pub use self::hasher::{Crc32Hasher, DigestHasher, Hasher, Sha1Hasher, Sha256Hasher};

mod checker;
mod error;
mod hasher;
mod signature;
