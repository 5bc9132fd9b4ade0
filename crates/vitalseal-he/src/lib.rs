//! VitalSeal-HE: RNS-CKKS homomorphic encryption for encrypted column analytics.
//!
//! The operation set is what population statistics over packed columns need:
//! - Encode/Decode (canonical embedding, CRT decoding)
//! - Encrypt (public key) / Decrypt (secret key)
//! - ct + ct, ct - ct with level alignment
//! - ct × ct with relinearization, rescale
//! - ct × real scalar landing on an explicit target scale
//! - Slot rotation and slot summation (Galois automorphisms)
//! - Binary serialization of contexts with or without the secret key
//!
//! Not implemented: bootstrapping, complex-valued slots, plaintext-ciphertext
//! multiplication by arbitrary vectors.

pub mod ciphertext;
pub mod context;
pub mod encoding;
pub mod error;
pub mod evaluator;
pub mod keys;
pub mod ntt;
pub mod params;
pub mod rns;
pub mod sampling;
pub mod serialize;

pub use ciphertext::Ciphertext;
pub use context::HeContext;
pub use error::{HeError, Result};
pub use params::CkksParams;
pub use serialize::ciphertext_to_bytes;
