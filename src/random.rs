use log::debug;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::f32::consts::TAU;

/// The one source of randomness for a simulation run. Owning it explicitly
/// (instead of reaching for a thread-local generator) is what makes a run
/// reproducible from its seed.
pub struct RandomService {
    rng: StdRng,
}

impl RandomService {
    pub fn from_seed(seed: u64) -> Self {
        debug!("seeding random service with {}", seed);
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Self::from_entropy(),
        }
    }

    /// Uniform in `[0, 1)`
    pub fn rand_float(&mut self) -> f32 {
        self.rng.random::<f32>()
    }

    /// Uniform in `[0, 2π)`
    pub fn random_direction(&mut self) -> f32 {
        TAU * self.rand_float()
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// Fills `order` with a fresh uniform permutation of `0..order.len()`.
    pub fn fill_move_order(&mut self, order: &mut [u32]) {
        order
            .iter_mut()
            .enumerate()
            .for_each(|(i, slot)| *slot = i as u32);
        self.shuffle(order);
    }

    pub fn fill_floats(&mut self, values: &mut [f32]) {
        values.iter_mut().for_each(|v| *v = self.rand_float());
    }
}
