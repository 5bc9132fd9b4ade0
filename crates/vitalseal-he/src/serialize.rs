//! Binary serialization of contexts and ciphertexts.
//!
//! Everything is little-endian. An RnsPoly is written as its limbs in order,
//! each N × u64. Uniform key components are stored as their 32-byte seeds.
//!
//! Context blob:
//!   "VSHE" | version u8 | flags u8 (bit 0 = secret key present)
//!   | N u32 | prime count u32 | primes u64* (special prime last) | scale f64
//!   | public key: seed | b (L limbs)
//!   | relinearization key: L × (seed | b (L+1 limbs))
//!   | Galois keys: count u32 | count × (element u64 | L × (seed | b))
//!   | secret key (only if flagged): N × i8
//!
//! Ciphertext blob:
//!   "VSCT" | scale f64 | limb count u32 | c0 | c1
//!
//! Every reader validates lengths, headers and coefficient ranges and
//! returns [`HeError::Malformed`] instead of panicking.

use crate::ciphertext::Ciphertext;
use crate::context::{build_tables, HeContext};
use crate::error::{HeError, Result};
use crate::keys::{GaloisKey, GaloisKeys, KeySwitchKey, PublicKey, SecretKey};
use crate::params::{CkksParams, Modulus};
use crate::rns::RnsPoly;
use crate::sampling::SEED_BYTES;

pub const CONTEXT_MAGIC: &[u8; 4] = b"VSHE";
pub const CIPHERTEXT_MAGIC: &[u8; 4] = b"VSCT";
pub const FORMAT_VERSION: u8 = 1;
const FLAG_SECRET_KEY: u8 = 0b0000_0001;
const MAX_POLY_DEGREE: usize = 1 << 17;

/// Append an RnsPoly (limbs × N × 8 bytes).
pub fn write_rns_poly(out: &mut Vec<u8>, poly: &RnsPoly) {
    out.reserve(poly.num_limbs() * poly.n * 8);
    for limb in &poly.limbs {
        for &c in limb {
            out.extend_from_slice(&c.to_le_bytes());
        }
    }
}

/// Serialize an RnsPoly on its own.
pub fn rns_poly_to_bytes(poly: &RnsPoly) -> Vec<u8> {
    let mut out = Vec::new();
    write_rns_poly(&mut out, poly);
    out
}

/// Deserialize an RnsPoly with one limb per modulus, rejecting any
/// coefficient not below its modulus.
pub fn rns_poly_from_bytes_checked(bytes: &[u8], n: usize, moduli: &[Modulus]) -> Result<RnsPoly> {
    let mut reader = ByteReader::new(bytes);
    let poly = reader.rns_poly(n, moduli)?;
    reader.finish()?;
    Ok(poly)
}

/// Serialize a ciphertext.
pub fn ciphertext_to_bytes(ct: &Ciphertext) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + 2 * ct.c0.num_limbs() * ct.c0.n * 8);
    out.extend_from_slice(CIPHERTEXT_MAGIC);
    out.extend_from_slice(&ct.scale.to_le_bytes());
    out.extend_from_slice(&(ct.c0.num_limbs() as u32).to_le_bytes());
    write_rns_poly(&mut out, &ct.c0);
    write_rns_poly(&mut out, &ct.c1);
    out
}

impl HeContext {
    /// Serialize the context. The secret key is written only when requested
    /// AND held; otherwise no byte of it reaches the output.
    pub fn serialize(&self, include_secret_key: bool) -> Vec<u8> {
        let secret = self.secret_key.as_ref().filter(|_| include_secret_key);
        let params = &self.params;

        let mut out = Vec::new();
        out.extend_from_slice(CONTEXT_MAGIC);
        out.push(FORMAT_VERSION);
        out.push(if secret.is_some() { FLAG_SECRET_KEY } else { 0 });

        out.extend_from_slice(&(params.poly_degree as u32).to_le_bytes());
        out.extend_from_slice(&(self.key_moduli.len() as u32).to_le_bytes());
        for m in &self.key_moduli {
            out.extend_from_slice(&m.value.to_le_bytes());
        }
        out.extend_from_slice(&params.scale.to_le_bytes());

        out.extend_from_slice(&self.public_key.seed);
        write_rns_poly(&mut out, &self.public_key.b);

        write_switching_key(&mut out, &self.relin_key);

        out.extend_from_slice(&(self.galois_keys.len() as u32).to_le_bytes());
        for (elt, key) in &self.galois_keys {
            out.extend_from_slice(&elt.to_le_bytes());
            write_switching_key(&mut out, &key.key);
        }

        if let Some(sk) = secret {
            out.extend(sk.coeffs().iter().map(|&c| c as u8));
        }
        out
    }

    /// Rebuild a context from [`HeContext::serialize`] output.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        if reader.take(4)? != CONTEXT_MAGIC {
            return Err(HeError::Malformed("not a context blob".into()));
        }
        let version = reader.u8()?;
        if version != FORMAT_VERSION {
            return Err(HeError::Malformed(format!("unsupported context version {version}")));
        }
        let flags = reader.u8()?;
        if flags & !FLAG_SECRET_KEY != 0 {
            return Err(HeError::Malformed(format!("unknown context flags {flags:#04x}")));
        }

        let poly_degree = reader.u32()? as usize;
        if poly_degree > MAX_POLY_DEGREE {
            return Err(HeError::Malformed(format!("poly_degree {poly_degree} too large")));
        }
        let prime_count = reader.u32()? as usize;
        if prime_count < 2 || prime_count > 64 {
            return Err(HeError::Malformed(format!("implausible prime count {prime_count}")));
        }
        let primes = (0..prime_count)
            .map(|_| reader.u64())
            .collect::<Result<Vec<u64>>>()?;
        let scale = reader.f64()?;
        let params = CkksParams::from_primes(poly_degree, &primes, scale)
            .map_err(|e| HeError::Malformed(e.to_string()))?;

        let n = params.poly_degree;
        let key_moduli = params.key_moduli();
        let ntt = build_tables(&params);

        let pk_seed = reader.seed()?;
        let pk_b = reader.rns_poly(n, &params.moduli)?;
        let public_key = PublicKey::from_seed(pk_seed, pk_b, &params);

        let relin_key = read_switching_key(&mut reader, &params, &key_moduli)?;

        let galois_count = reader.u32()? as usize;
        let mut galois_keys = GaloisKeys::new();
        for _ in 0..galois_count {
            let elt = reader.u64()?;
            if elt % 2 == 0 || elt >= 2 * n as u64 {
                return Err(HeError::Malformed(format!("invalid Galois element {elt}")));
            }
            let key = read_switching_key(&mut reader, &params, &key_moduli)?;
            galois_keys.insert(elt, GaloisKey::from_key(elt, key, &params));
        }

        let secret_key = if flags & FLAG_SECRET_KEY != 0 {
            let coeffs: Vec<i8> = reader.take(n)?.iter().map(|&b| b as i8).collect();
            if coeffs.iter().any(|c| !(-1..=1).contains(c)) {
                return Err(HeError::Malformed("secret key is not ternary".into()));
            }
            Some(SecretKey::from_coeffs(coeffs, &params, &ntt))
        } else {
            None
        };
        reader.finish()?;

        Ok(Self::from_parts(params, ntt, public_key, relin_key, galois_keys, secret_key))
    }

    /// Read a ciphertext produced under this context (or its public form).
    pub fn deserialize_ciphertext(&self, bytes: &[u8]) -> Result<Ciphertext> {
        let mut reader = ByteReader::new(bytes);
        if reader.take(4)? != CIPHERTEXT_MAGIC {
            return Err(HeError::Malformed("not a ciphertext blob".into()));
        }
        let scale = reader.f64()?;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(HeError::Malformed(format!("invalid ciphertext scale {scale}")));
        }
        let limbs = reader.u32()? as usize;
        if limbs == 0 || limbs > self.params.num_limbs {
            return Err(HeError::Malformed(format!(
                "ciphertext has {limbs} limbs, context allows 1..={}",
                self.params.num_limbs
            )));
        }
        let moduli = &self.params.moduli[..limbs];
        let n = self.params.poly_degree;
        let c0 = reader.rns_poly(n, moduli)?;
        let c1 = reader.rns_poly(n, moduli)?;
        reader.finish()?;
        Ok(Ciphertext { c0, c1, scale })
    }
}

fn write_switching_key(out: &mut Vec<u8>, key: &KeySwitchKey) {
    for (seed, b) in key.seeds.iter().zip(&key.b) {
        out.extend_from_slice(seed);
        write_rns_poly(out, b);
    }
}

fn read_switching_key(
    reader: &mut ByteReader<'_>,
    params: &CkksParams,
    key_moduli: &[Modulus],
) -> Result<KeySwitchKey> {
    let mut seeds = Vec::with_capacity(params.num_limbs);
    let mut b = Vec::with_capacity(params.num_limbs);
    for _ in 0..params.num_limbs {
        seeds.push(reader.seed()?);
        b.push(reader.rns_poly(params.poly_degree, key_moduli)?);
    }
    Ok(KeySwitchKey::from_seeds(seeds, b, params))
}

/// Bounds-checked cursor over a byte slice.
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                HeError::Malformed(format!(
                    "truncated: need {len} bytes at offset {}, have {}",
                    self.pos,
                    self.bytes.len() - self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.array().map(u64::from_le_bytes)
    }

    fn f64(&mut self) -> Result<f64> {
        self.array().map(f64::from_le_bytes)
    }

    fn seed(&mut self) -> Result<[u8; SEED_BYTES]> {
        self.array()
    }

    fn rns_poly(&mut self, n: usize, moduli: &[Modulus]) -> Result<RnsPoly> {
        let mut poly = RnsPoly::zero(n, moduli.len());
        for (l, (limb, m)) in poly.limbs.iter_mut().zip(moduli).enumerate() {
            let raw = self.take(n * 8)?;
            for (i, (dst, chunk)) in limb.iter_mut().zip(raw.chunks_exact(8)).enumerate() {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                let c = u64::from_le_bytes(word);
                if c >= m.value {
                    return Err(HeError::Malformed(format!(
                        "coefficient out of range at limb {l}, index {i}: {c} >= {}",
                        m.value
                    )));
                }
                *dst = c;
            }
        }
        Ok(poly)
    }

    fn finish(self) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(HeError::Malformed(format!(
                "{} trailing bytes",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}
