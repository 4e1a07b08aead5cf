//! Bounded retry with exponential backoff around a [`PostSource`].

use crate::import::error::ImportError;
use crate::import::fetcher::PostSource;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// Attempt budget and backoff unit.
///
/// The delay after a failed try is `base * 2^(max_attempts - remaining)`,
/// where `remaining` counts the attempts left before that try. With three
/// attempts and a 250ms base the waits are 250ms then 500ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn backoff(&self, remaining: u32) -> Duration {
        let exponent = self.max_attempts.saturating_sub(remaining);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250))
    }
}

/// Suspension between attempts. Injected so tests can observe delays without sleeping.
#[rocket::async_trait]
pub trait Delay: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Timer-backed [`Delay`] on the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[rocket::async_trait]
impl Delay for TokioDelay {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Successful fetch result and the number of attempts it took.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: String,
    pub attempts: u32,
}

pub struct RetryingFetcher {
    source: Arc<dyn PostSource>,
    delay: Arc<dyn Delay>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(source: Arc<dyn PostSource>, delay: Arc<dyn Delay>, policy: RetryPolicy) -> Self {
        Self {
            source,
            delay,
            policy,
        }
    }

    pub async fn fetch(&self) -> Result<Fetched, ImportError> {
        let max_attempts = self.policy.max_attempts;
        let mut remaining = max_attempts;

        loop {
            let attempt = max_attempts - remaining + 1;
            debug!("fetch: attempt {} of {}", attempt, max_attempts);

            match self.source.fetch().await {
                Ok(body) => {
                    return Ok(Fetched {
                        body,
                        attempts: attempt,
                    });
                }
                Err(err) if remaining > 1 => {
                    let delay = self.policy.backoff(remaining);
                    warn!(
                        "fetch: attempt {} of {} failed ({}), retrying in {:?}",
                        attempt, max_attempts, err, delay
                    );
                    self.delay.sleep(delay).await;
                    remaining -= 1;
                }
                Err(err) => {
                    return Err(ImportError::Fetch {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::fetcher::FetchError;
    use crate::test_support::{RecordingDelay, ScriptedSource, logs};
    use log::Level;

    fn fetcher(source: &Arc<ScriptedSource>, delay: &Arc<RecordingDelay>, attempts: u32) -> RetryingFetcher {
        RetryingFetcher::new(
            source.clone(),
            delay.clone(),
            RetryPolicy::new(attempts, Duration::from_millis(250)),
        )
    }

    #[test]
    fn backoff_doubles_from_the_base_unit() {
        let policy = RetryPolicy::new(3, Duration::from_millis(250));
        assert_eq!(policy.backoff(3), Duration::from_millis(250));
        assert_eq!(policy.backoff(2), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::new(200, Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(250).saturating_mul(u32::MAX));
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::from_millis(1)).max_attempts, 1);
    }

    #[tokio::test]
    async fn first_try_success_does_not_wait() {
        let source = Arc::new(ScriptedSource::new(vec![Ok("[]".to_string())]));
        let delay = Arc::new(RecordingDelay::default());

        let logs = logs::capture();

        let fetched = fetcher(&source, &delay, 3).fetch().await.unwrap();

        assert!(logs.messages(Level::Warn, "posts_api::import::retry").is_empty());
        assert_eq!(fetched.body, "[]");
        assert_eq!(fetched.attempts, 1);
        assert_eq!(source.attempts(), 1);
        assert!(delay.recorded().is_empty());
    }

    #[tokio::test]
    async fn always_failing_source_is_tried_exactly_max_attempts() {
        let source = Arc::new(ScriptedSource::always(|| FetchError::HttpStatus { code: 503 }));
        let delay = Arc::new(RecordingDelay::default());

        let err = fetcher(&source, &delay, 3).fetch().await.unwrap_err();

        assert_eq!(source.attempts(), 3);
        assert_eq!(
            delay.recorded(),
            vec![Duration::from_millis(250), Duration::from_millis(500)]
        );
        match err {
            ImportError::Fetch { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, FetchError::HttpStatus { code: 503 }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn recovers_after_one_transport_failure() {
        let source = Arc::new(ScriptedSource::new(vec![
            Err(FetchError::transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))),
            Ok("[]".to_string()),
        ]));
        let delay = Arc::new(RecordingDelay::default());

        let logs = logs::capture();

        let fetched = fetcher(&source, &delay, 3).fetch().await.unwrap();

        assert_eq!(fetched.attempts, 2);
        assert_eq!(source.attempts(), 2);
        assert_eq!(delay.recorded(), vec![Duration::from_millis(250)]);

        let warnings = logs.messages(Level::Warn, "posts_api::import::retry");
        assert_eq!(warnings.len(), 1, "warnings: {warnings:?}");
        assert!(warnings[0].contains("attempt 1 of 3"), "{}", warnings[0]);
        assert!(warnings[0].contains("reset"), "{}", warnings[0]);
    }

    #[tokio::test]
    async fn single_attempt_budget_never_waits() {
        let source = Arc::new(ScriptedSource::always(|| FetchError::HttpStatus { code: 500 }));
        let delay = Arc::new(RecordingDelay::default());

        let err = fetcher(&source, &delay, 1).fetch().await.unwrap_err();

        assert!(matches!(err, ImportError::Fetch { attempts: 1, .. }));
        assert!(delay.recorded().is_empty());
    }

    #[tokio::test]
    async fn tokio_delay_suspends_on_the_timer() {
        let started = tokio::time::Instant::now();
        TokioDelay.sleep(Duration::from_millis(20)).await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
