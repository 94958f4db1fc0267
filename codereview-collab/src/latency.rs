//! Simulated network latency.
//!
//! Delays are plain Tokio sleeps, so tests on paused time skip them. The
//! randomness behind jitter and synthetic traffic is a [`StdRng`]; tests
//! seed it with `SeedableRng::seed_from_u64` for reproducible picks.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generator for the mock services, seeded from the OS.
pub fn entropy_rng() -> StdRng {
    StdRng::from_entropy()
}

/// `base` shifted by a random amount within `±jitter`, never negative.
pub fn jittered<R: Rng + ?Sized>(rng: &mut R, base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let offset = rng.gen_range(Duration::ZERO..=jitter * 2);
    (base + offset).saturating_sub(jitter)
}

/// Suspend the caller for `latency`, skipping the timer entirely at zero.
pub async fn simulate(latency: Duration) {
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}
