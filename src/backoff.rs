//! Shared exponential backoff for retried external calls.
//!
//! Every remote collaborator (coordination store, trainer, lifecycle
//! manager) is called under the same policy shape: exponentially growing
//! intervals with jitter, a cap on the per-attempt interval, and a cap on
//! total elapsed retry time.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};

const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Retry policy for one call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Cap on the delay between consecutive attempts.
    pub max_interval: Duration,
    /// Budget on total time spent retrying before giving up.
    pub max_elapsed: Duration,
    /// Growth factor between attempts.
    pub multiplier: f64,
    /// Randomization applied to each interval (0.1 = +/-10%).
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// Policy for trainer and lifecycle-manager calls: give up after one
    /// minute, never wait more than five seconds between attempts.
    pub fn remote_call() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(5))
    }

    /// Policy for coordination-store interactions, parameterized per call
    /// site.
    pub fn store_interaction(max_elapsed: Duration, max_interval: Duration) -> Self {
        Self::new(max_elapsed, max_interval)
    }

    pub fn new(max_elapsed: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval,
            max_elapsed,
            multiplier: DEFAULT_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_interval)
    }

    fn jittered(&self, interval: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return interval;
        }
        let mut rng = rand::thread_rng();
        let factor = rng.gen_range(1.0 - self.jitter_factor..=1.0 + self.jitter_factor);
        interval.mul_f64(factor)
    }
}

/// Drives `operation` under `policy`, invoking `notify` with the error and
/// the upcoming wait before every retry. Returns the last error once the
/// elapsed budget would be exceeded.
pub async fn retry_notify<T, E, Op, Fut, Notify>(
    policy: &RetryPolicy,
    mut operation: Op,
    mut notify: Notify,
) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Notify: FnMut(&E, Duration),
{
    let started = Instant::now();
    let mut interval = policy.initial_interval.min(policy.max_interval);

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let wait = policy.jittered(interval);
                if started.elapsed() + wait > policy.max_elapsed {
                    return Err(err);
                }
                notify(&err, wait);
                sleep(wait).await;
                interval = policy.next_interval(interval);
            }
        }
    }
}

/// [`retry_notify`] without a per-retry callback.
pub async fn retry<T, E, Op, Fut>(policy: &RetryPolicy, operation: Op) -> Result<T, E>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_notify(policy, operation, |_, _| {}).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(max_elapsed: Duration, max_interval: Duration) -> RetryPolicy {
        RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::new(max_elapsed, max_interval)
        }
    }

    #[test]
    fn intervals_grow_exponentially_up_to_the_cap() {
        let policy = no_jitter(Duration::from_secs(60), Duration::from_secs(5));
        let mut interval = policy.initial_interval;
        let mut schedule = Vec::new();
        for _ in 0..6 {
            schedule.push(interval);
            interval = policy.next_interval(interval);
        }
        assert_eq!(schedule[0], Duration::from_millis(500));
        assert_eq!(schedule[1], Duration::from_secs(1));
        assert_eq!(schedule[2], Duration::from_secs(2));
        assert_eq!(schedule[3], Duration::from_secs(4));
        assert_eq!(schedule[4], Duration::from_secs(5));
        assert_eq!(schedule[5], Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_the_configured_factor() {
        let policy = RetryPolicy {
            jitter_factor: 0.2,
            ..RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(10))
        };
        for _ in 0..50 {
            let jittered = policy.jittered(Duration::from_secs(1));
            assert!(jittered >= Duration::from_millis(800));
            assert!(jittered <= Duration::from_millis(1200));
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            jitter_factor: 0.0,
            ..RetryPolicy::new(Duration::from_secs(1), Duration::from_millis(5))
        };
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = retry(&policy, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_once_the_elapsed_budget_is_spent() {
        let policy = RetryPolicy {
            initial_interval: Duration::from_millis(5),
            jitter_factor: 0.0,
            ..RetryPolicy::new(Duration::from_millis(30), Duration::from_millis(10))
        };
        let notified = AtomicU32::new(0);
        let result: Result<(), &str> = retry_notify(
            &policy,
            || async { Err("still down") },
            |_, _| {
                notified.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;
        assert_eq!(result, Err("still down"));
        assert!(notified.load(Ordering::SeqCst) >= 1);
    }
}
