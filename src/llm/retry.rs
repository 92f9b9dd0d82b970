//! Transport retry with exponential backoff and jitter.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::llm::scanner::Scanner;
use crate::pipeline::types::{ScanRequest, ScanResult};
use crate::pipeline::validator::failure_response;

/// Delay before the attempt following failed attempt `attempt` (0-based):
/// `min(base * 2^attempt + jitter, max)`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, jitter: Duration) -> Duration {
    let exp = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    exp.saturating_add(jitter).min(policy.max_delay)
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Scan outcome plus the number of provider attempts it took.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub result: ScanResult,
    pub attempts: u32,
}

/// Run `scanner.scan` until it succeeds, hits a fatal error, or exhausts `policy.attempts`.
///
/// Always produces a result: transport failures become a failure result
/// carrying the last error message.
pub async fn scan_with_retry(
    scanner: &Scanner,
    request: &ScanRequest,
    policy: &RetryPolicy,
) -> RetryOutcome {
    let max_attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match scanner.scan(request).await {
            Ok(mut result) => {
                result.retried |= attempt > 0;
                return RetryOutcome {
                    result,
                    attempts: attempt + 1,
                };
            }
            Err(e) => e,
        };

        let attempts = attempt + 1;
        let exhausted = err.is_retryable() && attempts >= max_attempts;
        if !err.is_retryable() || exhausted {
            warn!(
                scan_id = %request.scan_id(),
                attempts,
                retryable = err.is_retryable(),
                error = %err,
                "Scan failed"
            );
            return RetryOutcome {
                result: ScanResult {
                    success: false,
                    response: failure_response(),
                    retried: exhausted || attempts > 1,
                    error: Some(err.to_string()),
                },
                attempts,
            };
        }

        let delay = backoff_delay(policy, attempt, random_jitter(policy.max_jitter));
        debug!(
            scan_id = %request.scan_id(),
            attempt = attempts,
            backoff_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying scan after transient error"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_jitter: Duration::from_millis(1000),
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let p = policy();
        assert_eq!(backoff_delay(&p, 0, Duration::ZERO), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&p, 1, Duration::ZERO), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&p, 2, Duration::ZERO), Duration::from_millis(4000));
    }

    #[test]
    fn jitter_added_before_cap() {
        let p = policy();
        assert_eq!(
            backoff_delay(&p, 1, Duration::from_millis(250)),
            Duration::from_millis(2250)
        );
        assert_eq!(
            backoff_delay(&p, 4, Duration::from_millis(999)),
            Duration::from_millis(16_999)
        );
        assert_eq!(
            backoff_delay(&p, 5, Duration::from_millis(999)),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn huge_attempt_saturates_at_max() {
        assert_eq!(
            backoff_delay(&policy(), 40, Duration::ZERO),
            Duration::from_millis(30_000)
        );
    }

    #[test]
    fn jitter_within_bounds() {
        for _ in 0..100 {
            assert!(random_jitter(Duration::from_millis(1000)) <= Duration::from_millis(1000));
        }
        assert_eq!(random_jitter(Duration::ZERO), Duration::ZERO);
    }
}
