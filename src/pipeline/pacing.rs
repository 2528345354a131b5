//! Waiting: retry backoff and the pause between images.
//!
//! Both waits go through the [`Sleeper`] trait so the batch and the retry
//! loop can be driven by a recording sleeper in tests, with no real time
//! passing. Production code uses [`TokioSleeper`].
//!
//! ## Backoff
//!
//! [`Backoff`] yields `initial, 2·initial, 4·initial, …`, optionally capped.
//! With the defaults (5 s, five attempts) the retry loop waits
//! 5 s → 10 s → 20 s → 40 s at most.
//!
//! ## Pacing
//!
//! After every image the batch pauses for a duration drawn uniformly from
//! `[pacing_min, pacing_max]`. This is a self-imposed request rate,
//! independent of any backoff.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Something that can suspend the current task.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeping via `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Doubling backoff schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    cap: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Option<Duration>) -> Self {
        let next = match cap {
            Some(c) => initial.min(c),
            None => initial,
        };
        Self { next, cap }
    }

    /// The wait that the next failure will incur, without advancing.
    pub fn peek(&self) -> Duration {
        self.next
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        let doubled = current.saturating_mul(2);
        self.next = match self.cap {
            Some(c) => doubled.min(c),
            None => doubled,
        };
        Some(current)
    }
}

/// Draw a pause uniformly from `[min, max]`.
pub fn pacing_delay<R: Rng + ?Sized>(rng: &mut R, min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rng.gen_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}
