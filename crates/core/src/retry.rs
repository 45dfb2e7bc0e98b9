//! Fixed-interval retry policy for completion attempts.
//!
//! Image renders are polled on a short interval and video renders on a
//! much longer one. The attempt ceiling is shared by both kinds.

use std::time::Duration;

use rand::Rng;

use crate::generation::MediaKind;

/// Default wait between attempts for image jobs.
pub const DEFAULT_IMAGE_INTERVAL: Duration = Duration::from_secs(60);

/// Default wait between attempts for video jobs.
pub const DEFAULT_VIDEO_INTERVAL: Duration = Duration::from_secs(300);

/// Default ceiling on orchestration attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Tunable parameters for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub image_interval: Duration,
    pub video_interval: Duration,
    /// Attempt number at which the job is given up on.
    pub max_attempts: u32,
    /// Upper bound of the uniform random delay added by
    /// [`RetryPolicy::jittered_delay`]. Zero disables jitter.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            image_interval: DEFAULT_IMAGE_INTERVAL,
            video_interval: DEFAULT_VIDEO_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_jitter: Duration::ZERO,
        }
    }
}

/// What to do after an attempt that did not finish the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// How long to wait before the next attempt.
    pub delay: Duration,
    /// `true` once the attempt budget is spent; the job must fail.
    pub exhausted: bool,
}

impl RetryPolicy {
    /// Base interval for a job kind.
    pub fn interval(&self, kind: MediaKind) -> Duration {
        match kind {
            MediaKind::Image => self.image_interval,
            MediaKind::Video => self.video_interval,
        }
    }

    /// Decide whether attempt number `attempt` (1-based) may be followed
    /// by another one.
    ///
    /// With `max_attempts = 3`, attempts 1 and 2 reschedule and attempt 3
    /// is exhausted, so exactly three attempts run.
    pub fn decide(&self, kind: MediaKind, attempt: u32) -> RetryDecision {
        RetryDecision {
            delay: self.interval(kind),
            exhausted: attempt >= self.max_attempts,
        }
    }

    /// Add up to `max_jitter` of random delay to `delay`.
    pub fn jittered_delay(&self, delay: Duration) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return delay;
        }
        let extra = rand::rng().random_range(0..=max_ms);
        delay + Duration::from_millis(extra)
    }
}
