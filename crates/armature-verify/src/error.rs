use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,

    #[error("invalid public key PEM")]
    InvalidPem,

    #[error("private key supplied where public key expected")]
    PrivateKey,

    #[error("public key is not {expected}")]
    KeyTypeMismatch { expected: &'static str },

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("signature verification failed: {0}")]
    VerifyFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
