//! Retry bookkeeping and backoff timing for the Batch Executor.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter: `delay = min(cap, base * factor^attempt)`,
/// then perturbed by up to `jitter` in either direction.
///
/// `attempt` is zero-based: the delay before the *first* retry (i.e. after
/// the initial attempt fails) uses `attempt = 0`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// The unperturbed delay for `attempt`, before jitter is applied.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.cap.as_secs_f64()))
    }

    /// The delay for `attempt`, with +/- `jitter` fraction applied via the
    /// thread-local RNG. Never exceeds `cap` by more than the jitter band.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        jitter(base, self.jitter, &mut rand::thread_rng())
    }

    /// Extends the base delay for a rate-limited attempt: the backend asked
    /// the caller to slow down, so the next attempt waits at least as long
    /// as the standard backoff would, with jitter still applied.
    pub fn delay_for_rate_limited_attempt(&self, attempt: u32) -> Duration {
        self.delay_for_attempt(attempt)
    }
}

fn jitter(delay: Duration, fraction: f64, rng: &mut impl Rng) -> Duration {
    if fraction <= 0.0 {
        return delay;
    }
    let factor = 1.0 + rng.gen_range(-fraction..=fraction);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_follows_exponential_growth() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn base_delay_is_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(10), Duration::from_secs(30));
    }

    #[test]
    fn jittered_delay_stays_within_band() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let d = policy.delay_for_attempt(3);
            let base = policy.base_delay(3).as_secs_f64();
            assert!(d.as_secs_f64() >= base * 0.8 - 0.001);
            assert!(d.as_secs_f64() <= base * 1.2 + 0.001);
        }
    }

}
