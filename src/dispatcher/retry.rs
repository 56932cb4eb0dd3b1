//! Retransmission policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How many times a request is retransmitted after a timeout, and how long
/// to wait before each retransmission.
///
/// Retransmissions reuse the originally encoded bytes.
///
/// ```rust
/// use snmp_engine::dispatcher::Retry;
/// use std::time::Duration;
///
/// let retry = Retry::exponential(4)
///     .initial_delay(Duration::from_millis(250))
///     .max_delay(Duration::from_secs(2))
///     .build();
/// assert_eq!(retry.max_retries, 4);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Retry {
    /// Retransmissions after the first send (0 = send once).
    pub max_retries: u32,
    pub backoff: Backoff,
}

/// Delay inserted before a retransmission, on top of the request timeout.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Backoff {
    #[default]
    None,
    Fixed { delay: Duration },
    /// `initial * 2^retry`, capped at `max`, randomized by `jitter` (0.0..=1.0).
    Exponential {
        initial: Duration,
        max: Duration,
        jitter: f64,
    },
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::None,
        }
    }
}

impl Retry {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::None,
        }
    }

    /// Retransmit immediately after each timeout.
    pub fn immediate(retries: u32) -> Self {
        Self {
            max_retries: retries,
            backoff: Backoff::None,
        }
    }

    pub fn fixed(retries: u32, delay: Duration) -> Self {
        Self {
            max_retries: retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    pub fn exponential(retries: u32) -> RetryBuilder {
        RetryBuilder {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Delay before retransmission number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match &self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay } => *delay,
            Backoff::Exponential { initial, max, jitter } => {
                let multiplier = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
                let capped = initial.saturating_mul(multiplier).min(*max);
                capped.mul_f64(jitter_factor(*jitter))
            }
        }
    }
}

/// Builder for [`Backoff::Exponential`].
#[derive(Debug)]
pub struct RetryBuilder {
    max_retries: u32,
    initial: Duration,
    max: Duration,
    jitter: f64,
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
            jitter: 0.0,
        }
    }
}

impl RetryBuilder {
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max = delay;
        self
    }

    /// Randomize each delay by up to ±`jitter` of its value (clamped to 0.0..=1.0).
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn build(self) -> Retry {
        Retry {
            max_retries: self.max_retries,
            backoff: Backoff::Exponential {
                initial: self.initial,
                max: self.max,
                jitter: self.jitter,
            },
        }
    }
}

impl From<RetryBuilder> for Retry {
    fn from(builder: RetryBuilder) -> Self {
        builder.build()
    }
}

static JITTER_COUNTER: AtomicU64 = AtomicU64::new(0);

// Multiplicative hash of a counter; enough to desynchronize retransmissions.
fn jitter_factor(jitter: f64) -> f64 {
    if jitter <= 0.0 {
        return 1.0;
    }
    let counter = JITTER_COUNTER.fetch_add(1, Ordering::Relaxed);
    let hash = counter.wrapping_mul(0x5851_f42d_4c95_7f2d);
    let random = (hash >> 11) as f64 / (1u64 << 53) as f64;
    1.0 + (random - 0.5) * 2.0 * jitter
}
