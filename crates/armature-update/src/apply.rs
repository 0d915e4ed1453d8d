//! The update applier contract: verify, patch, replace atomically.
//!
//! The embedded patcher and signature verifier stay behind traits so the
//! underlying libraries remain swappable; this module captures their
//! contract, not their internals.

use std::path::{Path, PathBuf};

use armature_core::ProgressHandle;
use p256::ecdsa::signature::hazmat::PrehashVerifier as _;
use p256::pkcs8::DecodePublicKey as _;
use sha2::{Digest, Sha256};

use crate::error::UpdateError;

/// Applies a binary patch to the currently installed executable bytes.
pub trait Patcher: Send + Sync {
    fn patch(&self, old: &[u8], patch: &[u8]) -> Result<Vec<u8>, UpdateError>;
}

/// BSDIFF-format patcher.
pub struct BsdiffPatcher;

impl Patcher for BsdiffPatcher {
    fn patch(&self, old: &[u8], patch: &[u8]) -> Result<Vec<u8>, UpdateError> {
        let mut new = Vec::new();
        bsdiff::patch(old, &mut &patch[..], &mut new)
            .map_err(|e| UpdateError::Apply(format!("bsdiff patch failed: {e}")))?;
        Ok(new)
    }
}

/// Verifies a signature over the payload digest.
pub trait Verifier: Send + Sync {
    fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<(), UpdateError>;
}

/// ECDSA P-256 verifier over a SHA-256 digest, DER-encoded signatures.
pub struct EcdsaVerifier {
    key: p256::ecdsa::VerifyingKey,
}

impl EcdsaVerifier {
    pub fn from_pem(public_key_pem: &str) -> Result<Self, UpdateError> {
        let key = p256::ecdsa::VerifyingKey::from_public_key_pem(public_key_pem)
            .map_err(|e| UpdateError::Verify(format!("failed to set public key: {e}")))?;
        Ok(EcdsaVerifier { key })
    }
}

impl Verifier for EcdsaVerifier {
    fn verify(&self, digest: &[u8], signature: &[u8]) -> Result<(), UpdateError> {
        let signature = p256::ecdsa::Signature::from_der(signature)
            .map_err(|e| UpdateError::Verify(format!("malformed update signature: {e}")))?;
        self.key
            .verify_prehash(digest, &signature)
            .map_err(|_| UpdateError::Verify("update signature verification failed".into()))
    }
}

/// What [`apply`] needs to know: where the binary lives, what the
/// downloaded payload must hash and sign to, and how to patch.
pub struct ApplyOptions {
    /// The executable to replace.
    pub target_path: PathBuf,
    /// Expected SHA-256 of the downloaded payload (patch or full binary).
    pub checksum: Vec<u8>,
    /// Signature over the payload's SHA-256 digest.
    pub signature: Vec<u8>,
    pub verifier: Box<dyn Verifier>,
    /// Present for patch downloads; absent means the payload is the
    /// complete binary.
    pub patcher: Option<Box<dyn Patcher>>,
}

/// Drain the download, verify checksum and signature, apply an optional
/// patch against the installed binary, and replace it atomically. The
/// original binary is restored if the final rename fails.
pub async fn apply(
    reader: &mut dyn ProgressHandle,
    options: ApplyOptions,
) -> Result<(), UpdateError> {
    let payload = reader.read_to_end().await?;

    let digest = Sha256::digest(&payload);
    if digest.as_slice() != options.checksum.as_slice() {
        return Err(UpdateError::Verify(format!(
            "update checksum mismatch: expected {}, got {}",
            hex::encode(&options.checksum),
            hex::encode(digest)
        )));
    }
    options.verifier.verify(&digest, &options.signature)?;

    let new_binary = match &options.patcher {
        Some(patcher) => {
            let old = std::fs::read(&options.target_path).map_err(|e| {
                UpdateError::Apply(format!(
                    "failed to read current binary {}: {e}",
                    options.target_path.display()
                ))
            })?;
            patcher.patch(&old, &payload)?
        }
        None => payload,
    };

    let target_path = options.target_path.clone();
    // Filesystem replacement is blocking work.
    tokio::task::spawn_blocking(move || replace_binary(&new_binary, &target_path))
        .await
        .map_err(|e| UpdateError::Apply(format!("apply task failed: {e}")))?
}

/// Stage the bytes next to the target and swap them in, keeping a backup
/// for rollback when the swap cannot complete.
fn replace_binary(bytes: &[u8], target_path: &Path) -> Result<(), UpdateError> {
    use std::io::Write;

    let parent = target_path
        .parent()
        .ok_or_else(|| UpdateError::Apply("target path must have a parent directory".into()))?;
    if !parent.exists() {
        std::fs::create_dir_all(parent)?;
    }

    let mut staged = tempfile::NamedTempFile::new_in(parent)?;
    staged.write_all(bytes)?;
    staged.flush()?;
    staged.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = staged.as_file().metadata()?.permissions();
        perms.set_mode(0o755);
        staged.as_file().set_permissions(perms)?;
    }

    let staged_path = staged.into_temp_path();

    let backup = if target_path.exists() {
        let mut candidate = target_path.with_extension("old");
        let mut counter = 0usize;
        while candidate.exists() {
            counter += 1;
            candidate = target_path.with_extension(format!("old{counter}"));
        }
        std::fs::rename(target_path, &candidate)?;
        Some(candidate)
    } else {
        None
    };

    if let Err(e) = staged_path.persist(target_path) {
        if let Some(backup) = &backup {
            let _ = std::fs::rename(backup, target_path);
        }
        return Err(UpdateError::Io(e.error));
    }

    if let Some(backup) = backup {
        let _ = std::fs::remove_file(backup);
    }
    Ok(())
}
