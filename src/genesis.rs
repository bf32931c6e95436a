//! Genesis configuration and the demo founding keys.
//!
//! The ten founding keypairs are derived from a fixed ChaCha20 seed so
//! that every participant computes the same founder accounts without the
//! genesis block having to carry private material, and without shipping
//! ten thousand-digit constants. Anyone can derive the founding secret
//! keys: this is a demo convenience for spinning up test networks, not a
//! production key ceremony.

use num_bigint::BigUint;
use num_traits::One;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::crypto::{CryptoError, Keypair};
use crate::types::{GenesisBlock, FOUNDER_COUNT};

/// Domain seed for founder key derivation.
const FOUNDER_KEY_SEED: u64 = 0x4155_5255_4d47_454e; // "AURUMGEN"

/// Modulus size of the derived founding keys. Part of the demo protocol:
/// founder and joiners must agree on it to derive the same accounts.
pub const FOUNDER_KEY_BITS: u64 = 1024;

/// Default hardness: 2^272. Sized for ten founders at the genesis
/// allocation and a slot length of a few seconds; founders can override
/// it per network.
pub fn default_hardness() -> BigUint {
    BigUint::one() << 272
}

/// Derive founding keypair `index` (1-based, 1..=FOUNDER_COUNT).
pub fn founder_keypair(index: usize) -> Result<Keypair, CryptoError> {
    founder_keypair_sized(index, FOUNDER_KEY_BITS)
}

/// Derivation with an explicit key size; tests use small keys.
pub fn founder_keypair_sized(index: usize, bits: u64) -> Result<Keypair, CryptoError> {
    let mut rng = ChaCha20Rng::seed_from_u64(FOUNDER_KEY_SEED ^ index as u64);
    Keypair::generate(bits, &mut rng)
}

/// Parameters the founding node uses to build the genesis block.
#[derive(Debug, Clone)]
pub struct GenesisConfig {
    /// Lottery seed; defaults to a fresh random value.
    pub seed: Option<u64>,
    /// Hardness threshold in decimal; defaults to [`default_hardness`].
    pub hardness: Option<String>,
    pub founder_key_bits: u64,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self { seed: None, hardness: None, founder_key_bits: FOUNDER_KEY_BITS }
    }
}

impl GenesisConfig {
    /// Build the genesis block: ten founding public keys, the seed and
    /// the hardness threshold.
    pub fn build(&self) -> Result<GenesisBlock, CryptoError> {
        let mut founders = Vec::with_capacity(FOUNDER_COUNT);
        for index in 1..=FOUNDER_COUNT {
            founders.push(founder_keypair_sized(index, self.founder_key_bits)?.public_key());
        }
        Ok(GenesisBlock {
            founders,
            seed: self.seed.unwrap_or_else(rand::random),
            hardness: self
                .hardness
                .clone()
                .unwrap_or_else(|| default_hardness().to_str_radix(10)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn founder_derivation_is_deterministic() {
        let a = founder_keypair_sized(1, 512).unwrap();
        let b = founder_keypair_sized(1, 512).unwrap();
        assert_eq!(a.public_key(), b.public_key());

        let other = founder_keypair_sized(2, 512).unwrap();
        assert_ne!(a.public_key(), other.public_key());
    }

    #[test]
    fn genesis_block_carries_ten_founders() {
        let config = GenesisConfig {
            seed: Some(7),
            hardness: Some("0".into()),
            founder_key_bits: 512,
        };
        let genesis = config.build().unwrap();
        assert_eq!(genesis.founders.len(), FOUNDER_COUNT);
        assert_eq!(genesis.seed, 7);
        assert_eq!(genesis.hardness, "0");
    }
}
