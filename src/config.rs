use std::time::Duration;

use serde::Deserialize;

use crate::classify::BusinessEnvelope;
use crate::error::BuildError;
use crate::retry::RetryPolicy;

/// File-loadable client settings; every field is optional.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub client_name: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub max_response_body_bytes: Option<usize>,
    pub retry: RetryConfig,
    pub business: Option<BusinessConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub base_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub jitter_ratio: Option<f64>,
    pub retryable_status_codes: Option<Vec<u16>>,
    pub respect_retry_after: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BusinessConfig {
    pub enabled: bool,
    pub code_field: String,
    pub message_fields: Vec<String>,
    pub success_codes: Vec<i64>,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            code_field: "code".to_owned(),
            message_fields: vec!["message".to_owned(), "msg".to_owned()],
            success_codes: vec![0, 200],
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(text: &str) -> Result<Self, BuildError> {
        serde_json::from_str(text).map_err(|source| BuildError::Config { source })
    }

    pub(crate) fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl RetryConfig {
    pub(crate) fn apply(&self, mut policy: RetryPolicy) -> RetryPolicy {
        if let Some(max_retries) = self.max_retries {
            policy = policy.max_retries(max_retries);
        }
        if let Some(base_backoff_ms) = self.base_backoff_ms {
            policy = policy.base_backoff(Duration::from_millis(base_backoff_ms));
        }
        if let Some(max_backoff_ms) = self.max_backoff_ms {
            policy = policy.max_backoff(Duration::from_millis(max_backoff_ms));
        }
        if let Some(jitter_ratio) = self.jitter_ratio {
            policy = policy.jitter_ratio(jitter_ratio);
        }
        if let Some(codes) = &self.retryable_status_codes {
            policy = policy.retryable_status_codes(codes.iter().copied());
        }
        if let Some(respect) = self.respect_retry_after {
            policy = policy.respect_retry_after(respect);
        }
        policy
    }
}

impl BusinessConfig {
    pub(crate) fn envelope(&self) -> BusinessEnvelope {
        let envelope = if self.enabled {
            BusinessEnvelope::standard()
        } else {
            BusinessEnvelope::disabled()
        };
        envelope
            .code_field(self.code_field.clone())
            .message_fields(self.message_fields.iter().cloned())
            .success_codes(self.success_codes.iter().copied())
    }
}
