use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;

use crate::descriptor::{DEFAULT_MAX_RETRIES, RequestDescriptor};
use crate::error::{DEFAULT_RETRYABLE_STATUS_CODES, ErrorKind, ErrorRecord};

/// Outcome of consulting the policy after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Stop,
}

/// Overrides which classified failures count as transient.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, record: &ErrorRecord) -> bool;
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    jitter_ratio: f64,
    retryable_status_codes: BTreeSet<u16>,
    respect_retry_after: bool,
    retry_classifier: Option<Arc<dyn RetryClassifier>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_backoff", &self.base_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("jitter_ratio", &self.jitter_ratio)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("respect_retry_after", &self.respect_retry_after)
            .field("retry_classifier", &self.retry_classifier.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn standard() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(10),
            jitter_ratio: 0.0,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
            respect_retry_after: true,
            retry_classifier: None,
        }
    }

    pub fn disabled() -> Self {
        Self::standard().max_retries(0)
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        if self.max_backoff < self.base_backoff {
            self.max_backoff = self.base_backoff;
        }
        self
    }

    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.base_backoff);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    pub fn respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    pub fn retry_classifier(mut self, retry_classifier: Arc<dyn RetryClassifier>) -> Self {
        self.retry_classifier = Some(retry_classifier);
        self
    }

    pub fn configured_max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn is_retryable(&self, record: &ErrorRecord) -> bool {
        if let Some(retry_classifier) = &self.retry_classifier {
            return retry_classifier.is_retryable(record);
        }
        match record.kind() {
            ErrorKind::Network | ErrorKind::Timeout => true,
            ErrorKind::Http { status } => self.retryable_status_codes.contains(&status),
            ErrorKind::Business { .. } | ErrorKind::Cancelled | ErrorKind::Unknown => false,
        }
    }

    /// `attempt` is the 0-indexed attempt that just failed.
    pub fn should_retry(
        &self,
        record: &ErrorRecord,
        attempt: u32,
        max_retries: u32,
        retryable: bool,
    ) -> bool {
        retryable && attempt < max_retries && self.is_retryable(record)
    }

    /// `min(base * 2^attempt, max)`, with attempt 0 being the first retry.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(31);
        let multiplier = 1_u128 << exponent;
        let base_ms = self.base_backoff.as_millis();
        let max_ms = self.max_backoff.as_millis().max(base_ms);
        let delay_ms = base_ms
            .saturating_mul(multiplier)
            .min(max_ms)
            .min(u64::MAX as u128) as u64;
        Duration::from_millis(delay_ms)
    }

    pub fn decide(
        &self,
        record: &ErrorRecord,
        attempt: u32,
        descriptor: &RequestDescriptor,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if !self.should_retry(
            record,
            attempt,
            descriptor.max_retries(),
            descriptor.retryable(),
        ) {
            return RetryDecision::Stop;
        }

        let delay = match retry_after {
            Some(retry_after) if self.respect_retry_after => retry_after.min(self.max_backoff),
            _ => self.apply_jitter(self.backoff_delay(attempt)),
        };
        RetryDecision::Retry { delay }
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }
        let max_backoff_ms = self.max_backoff.as_millis().min(u64::MAX as u128) as u64;

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let sampled_ms = rng.random_range(low..=high).min(max_backoff_ms.max(1));
        Duration::from_millis(sampled_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::Method;

    use super::{RetryClassifier, RetryDecision, RetryPolicy};
    use crate::descriptor::{RequestConfig, RequestDescriptor};
    use crate::error::{ErrorKind, ErrorRecord};

    fn record(kind: ErrorKind) -> ErrorRecord {
        ErrorRecord::new(kind, "failure", 0)
    }

    #[test]
    fn backoff_sequence_doubles_and_caps_at_ten_seconds() {
        let policy = RetryPolicy::standard();
        let delays = (0..6)
            .map(|attempt| policy.backoff_delay(attempt).as_millis())
            .collect::<Vec<_>>();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10000, 10000]);
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn transient_kinds_are_retryable() {
        let policy = RetryPolicy::standard();
        assert!(policy.is_retryable(&record(ErrorKind::Network)));
        assert!(policy.is_retryable(&record(ErrorKind::Timeout)));
        for status in [429, 500, 502, 503, 504] {
            assert!(policy.is_retryable(&record(ErrorKind::Http { status })));
        }
    }

    #[test]
    fn terminal_kinds_are_not_retryable() {
        let policy = RetryPolicy::standard();
        for kind in [
            ErrorKind::Http { status: 400 },
            ErrorKind::Http { status: 401 },
            ErrorKind::Http { status: 404 },
            ErrorKind::Http { status: 501 },
            ErrorKind::Business { code: 500 },
            ErrorKind::Cancelled,
            ErrorKind::Unknown,
        ] {
            assert!(!policy.is_retryable(&record(kind)), "{kind} must be terminal");
        }
    }

    #[test]
    fn should_retry_requires_budget_and_flag() {
        let policy = RetryPolicy::standard();
        let network = record(ErrorKind::Network);
        assert!(policy.should_retry(&network, 0, 3, true));
        assert!(policy.should_retry(&network, 2, 3, true));
        assert!(!policy.should_retry(&network, 3, 3, true));
        assert!(!policy.should_retry(&network, 0, 3, false));
        assert!(!policy.should_retry(&network, 0, 0, true));
    }

    #[test]
    fn decide_uses_descriptor_settings() {
        let policy = RetryPolicy::standard();
        let descriptor = RequestDescriptor::new(Method::POST, "/keys");
        let server_error = record(ErrorKind::Http { status: 500 });

        assert_eq!(
            policy.decide(&server_error, 1, &descriptor, None),
            RetryDecision::Retry {
                delay: Duration::from_millis(2000)
            }
        );
        assert_eq!(
            policy.decide(&server_error, 3, &descriptor, None),
            RetryDecision::Stop
        );

        let not_retryable =
            descriptor.with_config(RequestConfig::default().with_retryable(false));
        assert_eq!(
            policy.decide(&server_error, 0, &not_retryable, None),
            RetryDecision::Stop
        );
    }

    #[test]
    fn retry_after_overrides_backoff_but_respects_cap() {
        let policy = RetryPolicy::standard();
        let descriptor = RequestDescriptor::new(Method::GET, "/stats");
        let throttled = record(ErrorKind::Http { status: 429 });

        assert_eq!(
            policy.decide(&throttled, 0, &descriptor, Some(Duration::from_secs(3))),
            RetryDecision::Retry {
                delay: Duration::from_secs(3)
            }
        );
        assert_eq!(
            policy.decide(&throttled, 0, &descriptor, Some(Duration::from_secs(120))),
            RetryDecision::Retry {
                delay: Duration::from_secs(10)
            }
        );

        let ignoring = RetryPolicy::standard().respect_retry_after(false);
        assert_eq!(
            ignoring.decide(&throttled, 0, &descriptor, Some(Duration::from_secs(3))),
            RetryDecision::Retry {
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn jittered_backoff_never_exceeds_configured_max_backoff() {
        let policy = RetryPolicy::standard()
            .base_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(120))
            .jitter_ratio(1.0);
        let descriptor = RequestDescriptor::new(Method::GET, "/stats");
        let network = record(ErrorKind::Network);

        for _ in 0..256 {
            match policy.decide(&network, 2, &descriptor, None) {
                RetryDecision::Retry { delay } => assert!(delay <= Duration::from_millis(120)),
                RetryDecision::Stop => panic!("network failure should be retried"),
            }
        }
    }

    struct NeverRetry;

    impl RetryClassifier for NeverRetry {
        fn is_retryable(&self, _record: &ErrorRecord) -> bool {
            false
        }
    }

    #[test]
    fn retry_classifier_overrides_kind_rules() {
        let policy = RetryPolicy::standard().retry_classifier(Arc::new(NeverRetry));
        assert!(!policy.is_retryable(&record(ErrorKind::Network)));
    }
}
