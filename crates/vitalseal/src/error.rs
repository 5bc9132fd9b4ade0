//! Error taxonomy of the analytics core.

use vitalseal_he::HeError;

/// Result alias used throughout `vitalseal`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Context setup with unusable parameters or a chain too short for the
    /// supported operations.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Decryption attempted on a context without a secret key.
    #[error("context holds no secret key")]
    MissingSecretKey,

    /// AEAD tag verification failed (tampered payload or wrong key).
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Zero records passed to a mean or variance.
    #[error("invalid record count {0}")]
    InvalidCount(usize),

    /// Operation name not in {sum, mean, variance}.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Column file whose chunk structure cannot be read.
    #[error("malformed column file {path}: {reason}")]
    MalformedColumnFile { path: String, reason: String },

    /// Field names become file names, so only [A-Za-z0-9_-] is allowed.
    #[error("invalid field name {0:?}")]
    InvalidFieldName(String),

    #[error("symmetric key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// AEAD encryption itself failed.
    #[error("symmetric encryption failed")]
    SymmetricEncryption,

    #[error("job {0} not found")]
    JobNotFound(u64),

    #[error("job {0} was cancelled")]
    JobCancelled(u64),

    #[error("homomorphic operation failed: {0}")]
    He(HeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Errors an outer API must collapse into one generic refusal, so that
    /// callers cannot learn which check failed.
    pub fn is_oracle_sensitive(&self) -> bool {
        matches!(self, Error::MissingSecretKey | Error::AuthenticationFailure)
    }
}

impl From<HeError> for Error {
    fn from(err: HeError) -> Self {
        match err {
            HeError::InvalidParameters(msg) => Error::InvalidParameters(msg),
            HeError::MissingSecretKey => Error::MissingSecretKey,
            other => Error::He(other),
        }
    }
}
