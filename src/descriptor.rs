use std::time::Duration;

use bytes::Bytes;
use http::header::HeaderValue;
use http::{HeaderMap, Method};

use crate::multipart::Multipart;

pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-call behavior options recognised by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestConfig {
    /// Do not hand terminal failures to the error presenter.
    pub skip_error_handling: bool,
    /// Hold the shared busy indicator for the duration of the call.
    pub show_loading: bool,
    pub retryable: bool,
    /// `None` falls back to the client's retry policy.
    pub max_retries: Option<u32>,
    /// Allow parallel identical requests instead of superseding older ones.
    pub skip_dedup: bool,
    /// Replaces the derived fingerprint.
    pub dedup_key: Option<String>,
    /// Per-attempt timeout; `None` uses the client default.
    pub timeout: Option<Duration>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            skip_error_handling: false,
            show_loading: false,
            retryable: true,
            max_retries: None,
            skip_dedup: false,
            dedup_key: None,
            timeout: None,
        }
    }
}

impl RequestConfig {
    pub fn with_skip_error_handling(mut self, skip: bool) -> Self {
        self.skip_error_handling = skip;
        self
    }

    pub fn with_show_loading(mut self, show: bool) -> Self {
        self.show_loading = show;
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_skip_dedup(mut self, skip: bool) -> Self {
        self.skip_dedup = skip;
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }
}

#[derive(Clone, Debug, Default)]
pub enum RequestPayload {
    #[default]
    Empty,
    Json(serde_json::Value),
    Bytes {
        content_type: Option<HeaderValue>,
        bytes: Bytes,
    },
    Multipart(Multipart),
}

impl RequestPayload {
    pub(crate) fn encode(&self) -> Result<(Option<HeaderValue>, Bytes), serde_json::Error> {
        match self {
            Self::Empty => Ok((None, Bytes::new())),
            Self::Json(value) => {
                let body = serde_json::to_vec(value)?;
                Ok((
                    Some(HeaderValue::from_static("application/json")),
                    Bytes::from(body),
                ))
            }
            Self::Bytes {
                content_type,
                bytes,
            } => Ok((content_type.clone(), bytes.clone())),
            Self::Multipart(form) => {
                let (content_type, body) = form.encode();
                Ok((Some(content_type), body))
            }
        }
    }
}

/// Immutable description of one logical call, shared by all of its attempts.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    params: Vec<(String, String)>,
    body: RequestPayload,
    headers: HeaderMap,
    fingerprint_override_key: Option<String>,
    retryable: bool,
    max_retries: u32,
    show_loading: bool,
    skip_error_handling: bool,
    skip_dedup: bool,
    timeout: Option<Duration>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self::from_parts(
            method,
            url.into(),
            Vec::new(),
            RequestPayload::Empty,
            HeaderMap::new(),
            RequestConfig::default(),
            DEFAULT_MAX_RETRIES,
        )
    }

    pub(crate) fn from_parts(
        method: Method,
        url: String,
        params: Vec<(String, String)>,
        body: RequestPayload,
        headers: HeaderMap,
        config: RequestConfig,
        default_max_retries: u32,
    ) -> Self {
        Self {
            method,
            url,
            params,
            body,
            headers,
            fingerprint_override_key: config.dedup_key,
            retryable: config.retryable,
            max_retries: config.max_retries.unwrap_or(default_max_retries),
            show_loading: config.show_loading,
            skip_error_handling: config.skip_error_handling,
            skip_dedup: config.skip_dedup,
            timeout: config.timeout,
        }
    }

    pub fn with_params<K, V, I>(mut self, params: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.params = params
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        self
    }

    pub fn with_body(mut self, body: RequestPayload) -> Self {
        self.body = body;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_config(self, config: RequestConfig) -> Self {
        let max_retries = config.max_retries.unwrap_or(self.max_retries);
        Self {
            fingerprint_override_key: config.dedup_key,
            retryable: config.retryable,
            max_retries,
            show_loading: config.show_loading,
            skip_error_handling: config.skip_error_handling,
            skip_dedup: config.skip_dedup,
            timeout: config.timeout,
            ..self
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn body(&self) -> &RequestPayload {
        &self.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn fingerprint_override_key(&self) -> Option<&str> {
        self.fingerprint_override_key.as_deref()
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn show_loading(&self) -> bool {
        self.show_loading
    }

    pub fn skip_error_handling(&self) -> bool {
        self.skip_error_handling
    }

    pub fn skip_dedup(&self) -> bool {
        self.skip_dedup
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
