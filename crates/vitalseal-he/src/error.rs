//! Error type for scheme setup, evaluation and (de)serialization.

/// Result alias used throughout `vitalseal-he`.
pub type Result<T> = std::result::Result<T, HeError>;

/// Everything that can go wrong inside the homomorphic layer.
#[derive(Debug, thiserror::Error)]
pub enum HeError {
    /// Parameters cannot form a usable context (bad degree, chain too short for
    /// the required depth, unusable scale).
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Decryption attempted on a context that holds no secret key.
    #[error("context holds no secret key")]
    MissingSecretKey,

    /// More values than the ciphertext has slots.
    #[error("{len} values exceed slot capacity {capacity}")]
    CapacityExceeded { len: usize, capacity: usize },

    /// NaN or infinity in a plaintext vector or scalar.
    #[error("non-finite value at slot {0}")]
    NonFiniteInput(usize),

    /// A scaled coefficient does not fit the 62-bit signed encoding range.
    #[error("scaled coefficient {0:e} is out of encoding range")]
    EncodingOverflow(f64),

    /// Operands carry fixed-point scales that cannot be combined.
    #[error("scale mismatch: {left} vs {right}")]
    ScaleMismatch { left: f64, right: f64 },

    /// Not enough modulus levels left for the requested operation.
    #[error("insufficient depth: {required} levels required, {available} available")]
    InsufficientDepth { required: usize, available: usize },

    /// No rotation key for the requested step.
    #[error("no Galois key for rotation by {0}")]
    MissingGaloisKey(usize),

    /// Serialized bytes do not describe a valid object.
    #[error("malformed encoding: {0}")]
    Malformed(String),
}
