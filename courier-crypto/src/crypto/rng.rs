// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Mutex;

use rand_chacha::rand_core::{SeedableRng, TryRngCore};
use thiserror::Error;

/// Cryptographically-secure random number generator based on ChaCha20.
///
/// The generator is shared behind a mutex so one instance can be handed to every component which
/// needs fresh key material (identity keys, ephemeral keys, attachment keys).
#[derive(Debug)]
pub struct Rng {
    rng: Mutex<rand_chacha::ChaCha20Rng>,
}

impl Default for Rng {
    fn default() -> Self {
        Self {
            rng: Mutex::new(rand_chacha::ChaCha20Rng::from_os_rng()),
        }
    }
}

#[cfg(any(test, feature = "test_utils"))]
impl Rng {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: Mutex::new(rand_chacha::ChaCha20Rng::from_seed(seed)),
        }
    }
}

impl Rng {
    pub fn random_array<const N: usize>(&self) -> Result<[u8; N], RngError> {
        let mut out = [0u8; N];
        self.fill(&mut out)?;
        Ok(out)
    }

    pub fn random_vec(&self, len: usize) -> Result<Vec<u8>, RngError> {
        let mut out = vec![0u8; len];
        self.fill(&mut out)?;
        Ok(out)
    }

    /// Uniformly distributed integer in `0..upper` (`upper` must be non-zero).
    pub fn random_below(&self, upper: u32) -> Result<u32, RngError> {
        let value = u64::from_le_bytes(self.random_array()?);
        Ok((value % upper as u64) as u32)
    }

    fn fill(&self, out: &mut [u8]) -> Result<(), RngError> {
        let mut rng = self.rng.lock().map_err(|_| RngError::LockPoisoned)?;
        rng.try_fill_bytes(out)
            .map_err(|_| RngError::NotEnoughRandomness)
    }
}

#[derive(Debug, Error)]
pub enum RngError {
    #[error("rng lock is poisoned")]
    LockPoisoned,

    #[error("unable to collect enough randomness")]
    NotEnoughRandomness,
}

#[cfg(test)]
mod tests {
    use super::Rng;

    #[test]
    fn deterministic_randomness() {
        let sample_1 = Rng::from_seed([1; 32]).random_vec(128).unwrap();
        let sample_2 = Rng::from_seed([1; 32]).random_vec(128).unwrap();
        assert_eq!(sample_1, sample_2);
    }

    #[test]
    fn bounded_values() {
        let rng = Rng::from_seed([2; 32]);
        for _ in 0..64 {
            assert!(rng.random_below(16380).unwrap() < 16380);
        }
    }
}
