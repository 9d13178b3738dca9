//! Delays between checks while waiting on multi-factor approval

use std::time::Duration;

use rand::{Rng, SeedableRng};

/// A type that decides how long to wait before the next status check
pub trait PollDelay: Send {
    /// The delay before the next check
    fn next_delay(&mut self) -> Duration;
}

/// Always waits the same amount of time
#[derive(Clone, Copy, Debug)]
pub struct FixedPollDelay(pub Duration);

impl PollDelay for FixedPollDelay {
    #[inline]
    fn next_delay(&mut self) -> Duration {
        self.0
    }
}

/// Waits a random amount of time within a range
///
/// Delays produced by this type have a uniform distribution in the interval
/// `[min, max)`, so that many clients waiting on approvals do not check in
/// lockstep.
#[derive(Debug)]
pub struct RandomPollDelay<R> {
    min: Duration,
    max: Duration,
    rand_source: R,
}

impl RandomPollDelay<rand::rngs::StdRng> {
    /// Constructs a new instance producing delays between `min` and `max`
    ///
    /// If `max` is not after `min`, every delay is `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            rand_source: rand::rngs::StdRng::from_entropy(),
        }
    }
}

impl Default for RandomPollDelay<rand::rngs::StdRng> {
    /// Delays of between 5 and 8 seconds
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(8))
    }
}

impl<R> RandomPollDelay<R> {
    /// Uses a specific random number generator
    ///
    /// Useful for testing purposes
    pub fn with_rng<S>(self, rand_source: S) -> RandomPollDelay<S> {
        RandomPollDelay {
            min: self.min,
            max: self.max,
            rand_source,
        }
    }
}

impl<R: Rng + Send> PollDelay for RandomPollDelay<R> {
    fn next_delay(&mut self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        self.rand_source.gen_range(self.min..self.max)
    }
}
