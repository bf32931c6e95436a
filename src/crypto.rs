//! RSA signature scheme over arbitrary-precision integers.
//!
//! Accounts are identified by their public modulus rendered as decimal
//! text, and every signature, draw and hash travels the wire in the same
//! decimal form. The scheme is deliberately textbook (fixed public
//! exponent 3, hash-then-exponentiate): consensus treats it as an opaque
//! sign/verify/encrypt/decrypt capability and nothing else depends on its
//! internals.

use num_bigint::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::One;
use rand::RngCore;
use sha3::{Digest, Sha3_256};
use thiserror::Error;

/// Fixed public exponent.
pub const PUBLIC_EXPONENT: u32 = 3;

/// Minimum modulus size. The modulus must dominate the 256-bit message
/// hash or raw-RSA signatures lose information.
pub const MIN_KEY_BITS: u64 = 320;

/// Miller-Rabin rounds. 2^-128 error bound.
const PRIMALITY_ROUNDS: u32 = 64;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key too small: {0} bits (min: {MIN_KEY_BITS})")]
    KeyTooSmall(u64),
    #[error("not a valid decimal integer: {0:?}")]
    BadDecimal(String),
    #[error("public exponent not invertible for generated primes")]
    BadExponent,
}

/// An RSA keypair. `n` is the public verification key (and the account
/// identifier once rendered as decimal), `d` the private signing exponent.
#[derive(Debug, Clone)]
pub struct Keypair {
    n: BigUint,
    e: BigUint,
    d: BigUint,
}

impl Keypair {
    /// Generate a fresh keypair with a modulus of roughly `bits` bits.
    pub fn generate<R: RngCore>(bits: u64, rng: &mut R) -> Result<Self, CryptoError> {
        if bits < MIN_KEY_BITS {
            return Err(CryptoError::KeyTooSmall(bits));
        }
        let e = BigUint::from(PUBLIC_EXPONENT);
        loop {
            let p = generate_prime(bits / 2, rng);
            let q = generate_prime(bits / 2, rng);
            if p == q {
                continue;
            }
            let n = &p * &q;
            let phi = (&p - 1u32) * (&q - 1u32);
            match invert(&e, &phi) {
                Some(d) => return Ok(Self { n, e, d }),
                // gcd(e, phi) != 1 despite the per-prime filter; redraw
                None => continue,
            }
        }
    }

    /// Reconstruct a keypair from an exported `(n, d)` pair in decimal.
    pub fn from_decimal(n: &str, d: &str) -> Result<Self, CryptoError> {
        Ok(Self {
            n: parse_decimal(n)?,
            e: BigUint::from(PUBLIC_EXPONENT),
            d: parse_decimal(d)?,
        })
    }

    /// Public verification key as decimal text (the account identifier).
    pub fn public_key(&self) -> String {
        self.n.to_str_radix(10)
    }

    /// Private signing exponent as decimal text, for export.
    pub fn secret_key(&self) -> String {
        self.d.to_str_radix(10)
    }

    /// Sign a message: `H(m)^d mod n`, returned as decimal.
    pub fn sign(&self, message: &str) -> String {
        let h = hash_to_int(message) % &self.n;
        h.modpow(&self.d, &self.n).to_str_radix(10)
    }

    /// Raw RSA decryption (also the signing primitive): `c^d mod n`.
    pub fn decrypt(&self, cipher: &BigUint) -> BigUint {
        cipher.modpow(&self.d, &self.n)
    }

    /// Raw RSA encryption under the own public key: `m^e mod n`.
    pub fn encrypt(&self, message: &BigUint) -> BigUint {
        message.modpow(&self.e, &self.n)
    }
}

/// Verify `signature` (decimal) over `message` under the decimal public
/// key `vk`. Malformed numbers simply fail verification.
pub fn verify(vk: &str, message: &str, signature: &str) -> bool {
    let (Ok(n), Ok(sig)) = (parse_decimal(vk), parse_decimal(signature)) else {
        return false;
    };
    if n.bits() < MIN_KEY_BITS || sig >= n {
        return false;
    }
    let e = BigUint::from(PUBLIC_EXPONENT);
    let recovered = sig.modpow(&e, &n);
    recovered == hash_to_int(message) % &n
}

/// Sha3-256 of the message, read as a big-endian integer.
pub fn hash_to_int(message: &str) -> BigUint {
    let digest = Sha3_256::digest(message.as_bytes());
    BigUint::from_bytes_be(&digest)
}

/// Sha3-256 of the message as decimal text. Block hashes and gossip
/// identifiers use this form.
pub fn hash_to_decimal(message: &str) -> String {
    hash_to_int(message).to_str_radix(10)
}

pub fn parse_decimal(s: &str) -> Result<BigUint, CryptoError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CryptoError::BadDecimal(s.into()));
    }
    BigUint::parse_bytes(trimmed.as_bytes(), 10)
        .ok_or_else(|| CryptoError::BadDecimal(s.into()))
}

/// Random probable prime of `bits` bits with gcd(p-1, e) = 1.
fn generate_prime<R: RngCore>(bits: u64, rng: &mut R) -> BigUint {
    let one = BigUint::one();
    let top = BigUint::one() << (bits - 1);
    loop {
        let candidate = rng.gen_biguint(bits) | &top | &one;
        // p ≡ 1 (mod 3) would make p-1 divisible by the public exponent
        if (&candidate % 3u32) == one {
            continue;
        }
        if is_probable_prime(&candidate, rng) {
            return candidate;
        }
    }
}

/// Miller-Rabin with random bases.
fn is_probable_prime<R: RngCore>(n: &BigUint, rng: &mut R) -> bool {
    let two = BigUint::from(2u32);
    let three = BigUint::from(3u32);
    if *n < two {
        return false;
    }
    if *n == two || *n == three {
        return true;
    }
    if n.is_even() {
        return false;
    }

    // n - 1 = d * 2^s with d odd
    let n_minus_one = n - 1u32;
    let mut d = n_minus_one.clone();
    let mut s = 0u64;
    while d.is_even() {
        d >>= 1;
        s += 1;
    }

    'witness: for _ in 0..PRIMALITY_ROUNDS {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 0..s - 1 {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Modular inverse of `a` mod `m`, if gcd(a, m) = 1.
fn invert(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a = BigInt::from(a.clone());
    let m = BigInt::from(m.clone());
    let eg = a.extended_gcd(&m);
    if !eg.gcd.is_one() {
        return None;
    }
    // mod_floor keeps the result in [0, m)
    eg.x.mod_floor(&m).to_biguint()
}
