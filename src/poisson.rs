//! Exponential think times between critical sections, so lock requests arrive as a Poisson
//! process.

use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::time::Duration;

pub struct Poisson<R: Rng + ?Sized> {
    pub rng: Box<R>,
    /// Expected events per second.
    pub rate: f64,
}

impl Poisson<SmallRng> {
    pub fn new(rate: f64, seed: &[u8; 32]) -> Self {
        Self {
            rng: Box::new(SmallRng::from_seed(*seed)),
            rate,
        }
    }

    pub fn from_u64(rate: f64, seed: u64) -> Self {
        Self {
            rng: Box::new(SmallRng::seed_from_u64(seed)),
            rate,
        }
    }

    /// Seconds until the next event.
    pub fn time_for_next_event(&mut self) -> f64 {
        -(1.0f64 - self.rng.random::<f64>()).ln() / self.rate
    }

    pub fn delay_for_next_event(&mut self) -> Duration {
        Duration::from_secs_f64(self.time_for_next_event())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_are_non_negative_and_seeded() {
        let mut a = Poisson::from_u64(4.0, 7);
        let mut b = Poisson::from_u64(4.0, 7);

        for _ in 0..100 {
            let delay = a.time_for_next_event();
            assert!(delay >= 0.0);
            assert_eq!(delay, b.time_for_next_event());
        }
    }

    #[test]
    fn mean_tracks_rate() {
        let mut poisson = Poisson::from_u64(10.0, 42);
        let samples = 20_000;
        let mean: f64 =
            (0..samples).map(|_| poisson.time_for_next_event()).sum::<f64>() / samples as f64;
        assert!((mean - 0.1).abs() < 0.01, "mean was {mean}");
    }
}
