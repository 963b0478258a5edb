use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Growth factor per additional failure.
    pub multiplier: f64,
    /// Jitter fraction: the delay is scaled by a uniform factor in
    /// `[1 - jitter, 1 + jitter]`.
    pub jitter: f64,
    /// Delay after the first transient failure.
    pub initial: Duration,
    /// Upper bound on the delay.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            multiplier: 2.0,
            jitter: 0.2,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

/// Pure function of the attempt counter, so retry state lives on the
/// event itself and tests can compute deadlines without waiting.
#[derive(Clone, Copy, Debug, Default)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before the next try for an event that has failed `attempts`
    /// times (`attempts >= 1`), jittered and capped.
    pub fn delay(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(32);
        let base = self.config.initial.as_secs_f64() * self.config.multiplier.powi(exp as i32);
        let capped = base.min(self.config.max.as_secs_f64());

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = if jitter == 0.0 {
            1.0
        } else {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        };
        Duration::from_secs_f64(capped * factor)
    }
}
