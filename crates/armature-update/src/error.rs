use armature_core::NetError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    /// Missing deploy URL, missing forge repo, or no compatible release.
    #[error("{0}")]
    Config(String),

    #[error("failed to fetch releases: {0}")]
    Fetch(String),

    #[error("{0}")]
    Decode(String),

    /// Checksum or signature mismatch.
    #[error("{0}")]
    Verify(String),

    #[error("failed to apply update: {0}")]
    Apply(String),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
