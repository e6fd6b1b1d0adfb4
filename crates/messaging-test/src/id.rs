//! Random identifiers for per-test accounts.
//!
//! Identifiers become JID local parts, so the alphabet is restricted to
//! characters nodeprep leaves untouched.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Length of every generated identifier.
pub const ID_LEN: usize = 16;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Identifier source with an injectable entropy provider.
#[derive(Debug)]
pub struct IdGenerator {
    rng: Mutex<StdRng>,
}

impl IdGenerator {
    /// Generator seeded from the operating system.
    pub fn from_os_rng() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic generator, for reproducing a failing run.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn generate(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        sample(&mut *rng)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::from_os_rng()
    }
}

/// Identifier drawn from the thread-local RNG.
///
/// Handy for contact names, groups and other test data that does not need to
/// be reproducible.
pub fn random_id() -> String {
    sample(&mut rand::rng())
}

fn sample<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ID_LEN)
        .map(|_| char::from(CHARSET[rng.random_range(0..CHARSET.len())]))
        .collect()
}
