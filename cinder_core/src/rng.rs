use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::sync::Mutex;

/// The seed-reproducible generator shared by every driver.
///
/// The master generator lives behind a lock; drivers never draw from it
/// directly. Instead each minimization/mutation pass forks a child generator
/// whose seed is the master's next word, so the randomness any plugin sees is
/// a pure function of the master seed and the fork order. With parallelism 1
/// the fork order is the processing order, which keeps whole runs
/// reproducible; under parallelism the lock keeps forking safe.
pub struct SharedRng {
    master: Mutex<ChaCha8Rng>,
}

impl SharedRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            master: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    /// Derives an owned child generator from the master.
    pub fn fork(&self) -> ChaCha8Rng {
        let mut master = self.master.lock().unwrap();
        ChaCha8Rng::seed_from_u64(master.next_u64())
    }
}
