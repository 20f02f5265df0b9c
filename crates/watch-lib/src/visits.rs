//! Order-volume proxy
//!
//! There is no public source of order counts, so visits are simulated:
//! every place contributes a uniform draw from `[min, max]`.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Estimates the number of visits across the given number of places
pub trait VisitEstimator: Send + Sync {
    fn estimate(&self, places: usize) -> u64;
}

/// Uniformly simulated visits per place
pub struct SimulatedVisits {
    pub min: u64,
    pub max: u64,
    rng: Mutex<StdRng>,
}

impl SimulatedVisits {
    /// Create a simulator drawing `[min, max]` visits per place
    pub fn new(min: u64, max: u64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Use a fixed seed for reproducible draws
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }
}

impl Default for SimulatedVisits {
    fn default() -> Self {
        Self::new(3, 15)
    }
}

impl VisitEstimator for SimulatedVisits {
    fn estimate(&self, places: usize) -> u64 {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        (0..places).map(|_| rng.gen_range(self.min..=self.max)).sum()
    }
}
