use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Uri};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::auth::AuthExpiryGuard;
use crate::classify::{BusinessEnvelope, ErrorClassifier, RawFailure, StandardErrorClassifier};
use crate::config::ClientConfig;
use crate::dedup::{DuplicateRequestGuard, InFlightHandle};
use crate::descriptor::RequestDescriptor;
use crate::error::{BuildError, ErrorRecord};
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::hooks::{
    AnonymousAuthStore, AuthStore, ErrorPresenter, LoadingIndicator, NoopLoadingIndicator,
    NoopRouter, Router, TracingErrorPresenter,
};
use crate::loading::LoadingCoordinator;
use crate::metrics::{HttpClientMetrics, HttpClientMetricsSnapshot};
use crate::multipart::Multipart;
use crate::request::RequestBuilder;
use crate::response::HttpResponse;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::transport::{HyperTransport, TlsBackend, Transport, TransportOptions, default_tls_backend};
use crate::util::{
    append_query_pairs, merge_headers, parse_header_name, parse_header_value, parse_retry_after,
    redact_uri_for_logs, resolve_uri,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
const DEFAULT_CLIENT_NAME: &str = "dashreq";
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

pub struct HttpClientBuilder {
    base_url: String,
    default_headers: HeaderMap,
    invalid_header: Option<BuildError>,
    request_timeout: Duration,
    connect_timeout: Option<Duration>,
    max_response_body_bytes: usize,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    tls_backend: TlsBackend,
    retry_policy: RetryPolicy,
    error_classifier: Option<Arc<dyn ErrorClassifier>>,
    business_envelope: BusinessEnvelope,
    transport: Option<Arc<dyn Transport>>,
    auth_store: Arc<dyn AuthStore>,
    router: Arc<dyn Router>,
    error_presenter: Arc<dyn ErrorPresenter>,
    loading_indicator: Arc<dyn LoadingIndicator>,
    client_name: String,
}

impl HttpClientBuilder {
    pub(crate) fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_headers: HeaderMap::new(),
            invalid_header: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: None,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            tls_backend: default_tls_backend(),
            retry_policy: RetryPolicy::standard(),
            error_classifier: None,
            business_envelope: BusinessEnvelope::standard(),
            transport: None,
            auth_store: Arc::new(AnonymousAuthStore),
            router: Arc::new(NoopRouter),
            error_presenter: Arc::new(TracingErrorPresenter),
            loading_indicator: Arc::new(NoopLoadingIndicator),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
        }
    }

    /// Applies every setting present in `config`; absent settings keep the
    /// builder's current values.
    pub fn from_config(mut self, config: &ClientConfig) -> Self {
        if let Some(base_url) = &config.base_url {
            self.base_url = base_url.clone();
        }
        if let Some(client_name) = &config.client_name {
            self.client_name = client_name.clone();
        }
        if let Some(request_timeout) = config.request_timeout() {
            self = self.request_timeout(request_timeout);
        }
        if let Some(connect_timeout) = config.connect_timeout() {
            self = self.connect_timeout(connect_timeout);
        }
        if let Some(max_response_body_bytes) = config.max_response_body_bytes {
            self = self.max_response_body_bytes(max_response_body_bytes);
        }
        self.retry_policy = config.retry.apply(self.retry_policy);
        if let Some(business) = &config.business {
            self.business_envelope = business.envelope();
        }
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host.max(1);
        self
    }

    pub fn tls_backend(mut self, tls_backend: TlsBackend) -> Self {
        self.tls_backend = tls_backend;
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// Invalid names or values are reported by [`HttpClientBuilder::try_build`].
    pub fn try_default_header(mut self, name: &str, value: &str) -> Self {
        let parsed = parse_header_name(name)
            .and_then(|parsed_name| Ok((parse_header_value(name, value)?, parsed_name)));
        match parsed {
            Ok((value, name)) => {
                self.default_headers.insert(name, value);
            }
            Err(record) => {
                self.invalid_header.get_or_insert(BuildError::InvalidHeader {
                    name: name.to_owned(),
                    message: record.message().to_owned(),
                });
            }
        }
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn business_envelope(mut self, business_envelope: BusinessEnvelope) -> Self {
        self.business_envelope = business_envelope;
        self
    }

    /// Replaces the standard classifier; `business_envelope` is then ignored.
    pub fn error_classifier(mut self, error_classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.error_classifier = Some(error_classifier);
        self
    }

    /// Replaces the hyper transport, e.g. with a test double.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn auth_store(mut self, auth_store: Arc<dyn AuthStore>) -> Self {
        self.auth_store = auth_store;
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = router;
        self
    }

    pub fn error_presenter(mut self, error_presenter: Arc<dyn ErrorPresenter>) -> Self {
        self.error_presenter = error_presenter;
        self
    }

    pub fn loading_indicator(mut self, loading_indicator: Arc<dyn LoadingIndicator>) -> Self {
        self.loading_indicator = loading_indicator;
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn try_build(self) -> Result<HttpClient, BuildError> {
        if let Some(error) = self.invalid_header {
            return Err(error);
        }
        validate_base_url(&self.base_url)?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::build(&TransportOptions {
                tls_backend: self.tls_backend,
                pool_idle_timeout: self.pool_idle_timeout,
                pool_max_idle_per_host: self.pool_max_idle_per_host,
                connect_timeout: self.connect_timeout,
                max_response_body_bytes: self.max_response_body_bytes,
            })?),
        };
        let classifier: Arc<dyn ErrorClassifier> = match self.error_classifier {
            Some(classifier) => classifier,
            None => Arc::new(StandardErrorClassifier::new(self.business_envelope)),
        };

        Ok(HttpClient {
            base_url: self.base_url.trim().to_owned(),
            default_headers: self.default_headers,
            request_timeout: self.request_timeout,
            retry_policy: self.retry_policy,
            classifier,
            transport,
            guard: DuplicateRequestGuard::new(),
            loading: LoadingCoordinator::new(self.loading_indicator),
            auth_store: self.auth_store,
            router: self.router,
            error_presenter: self.error_presenter,
            auth_expiry: Arc::new(AuthExpiryGuard::new()),
            metrics: HttpClientMetrics::default(),
            client_name: self.client_name,
        })
    }
}

fn validate_base_url(base_url: &str) -> Result<(), BuildError> {
    if base_url.is_empty() {
        return Ok(());
    }
    let invalid = |message: &str| BuildError::InvalidBaseUrl {
        base_url: base_url.to_owned(),
        message: message.to_owned(),
    };
    if base_url.trim() != base_url {
        return Err(invalid("surrounding whitespace"));
    }
    let parsed = url::Url::parse(base_url).map_err(|source| invalid(&source.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid("query and fragment are not allowed"));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid("userinfo is not allowed"));
    }
    Ok(())
}

/// Request dispatcher shared by every view of the dashboard.
///
/// Cloning is cheap and clones share the in-flight registry, the loading
/// counter, the auth-expiry latch and metrics. Independent instances share
/// nothing.
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    default_headers: HeaderMap,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    classifier: Arc<dyn ErrorClassifier>,
    transport: Arc<dyn Transport>,
    guard: DuplicateRequestGuard,
    loading: LoadingCoordinator,
    auth_store: Arc<dyn AuthStore>,
    router: Arc<dyn Router>,
    error_presenter: Arc<dyn ErrorPresenter>,
    auth_expiry: Arc<AuthExpiryGuard>,
    metrics: HttpClientMetrics,
    client_name: String,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpClient")
            .field("client_name", &self.client_name)
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

struct PreparedRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
}

impl PreparedRequest {
    fn to_request(&self) -> Request<Bytes> {
        let mut request = Request::new(self.body.clone());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        request
    }
}

impl HttpClient {
    pub fn builder(base_url: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder::new(base_url)
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder<'_> {
        RequestBuilder::new(self, method, path.into())
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    pub fn upload(&self, path: impl Into<String>, form: Multipart) -> RequestBuilder<'_> {
        self.request(Method::POST, path).multipart(form)
    }

    pub fn loading(&self) -> &LoadingCoordinator {
        &self.loading
    }

    pub fn duplicate_guard(&self) -> &DuplicateRequestGuard {
        &self.guard
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn metrics_snapshot(&self) -> HttpClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Re-arms auth-expiry handling, typically right after a fresh login.
    pub fn reset_auth_expiry(&self) {
        self.auth_expiry.reset();
    }

    pub(crate) fn default_max_retries(&self) -> u32 {
        self.retry_policy.configured_max_retries()
    }

    pub(crate) async fn dispatch(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<HttpResponse, ErrorRecord> {
        let request_fingerprint = (!descriptor.skip_dedup()).then(|| fingerprint(&descriptor));
        let span = info_span!(
            "dashreq.request",
            client = %self.client_name,
            method = %descriptor.method(),
            uri = %redact_uri_for_logs(descriptor.url()),
            fingerprint = request_fingerprint
                .as_ref()
                .map(Fingerprint::as_str)
                .unwrap_or("-"),
        );
        self.execute(descriptor, request_fingerprint)
            .instrument(span)
            .await
    }

    async fn execute(
        &self,
        descriptor: RequestDescriptor,
        fingerprint: Option<Fingerprint>,
    ) -> Result<HttpResponse, ErrorRecord> {
        self.metrics.record_request_started();
        let _in_flight_metric = self.metrics.enter_in_flight();
        let started_at = Instant::now();

        let mut in_flight = fingerprint.map(|fingerprint| self.guard.register(fingerprint));
        if in_flight
            .as_ref()
            .is_some_and(InFlightHandle::superseded_previous)
        {
            self.metrics.record_superseded();
        }
        let cancel = in_flight
            .as_ref()
            .map(|handle| handle.cancellation().clone())
            .unwrap_or_default();
        let loading = descriptor.show_loading().then(|| self.loading.acquire());
        let token = self.auth_store.token();

        let result = self
            .send_with_retry(&descriptor, token.as_deref(), &cancel)
            .await;

        if let Some(handle) = in_flight.as_mut() {
            self.guard.release(handle);
        }
        drop(in_flight);
        drop(loading);
        self.metrics
            .record_request_completed(&result, started_at.elapsed());

        result.map_err(|record| self.settle_failure(&descriptor, token.as_deref(), record))
    }

    async fn send_with_retry(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, ErrorRecord> {
        let prepared = self.prepare(descriptor, token)?;
        let attempt_timeout = descriptor.timeout().unwrap_or(self.request_timeout);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(self.classifier.classify(RawFailure::Aborted, attempt));
            }
            debug!(attempt, "sending request");
            self.metrics.record_attempt();

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(self.classifier.classify(RawFailure::Aborted, attempt));
                }
                outcome = timeout(attempt_timeout, self.transport.send(prepared.to_request())) => outcome,
            };

            let (record, retry_after) = match outcome {
                Ok(Ok(response)) => {
                    let (parts, body) = response.into_parts();
                    match self.classifier.check_response(parts.status, &body, attempt) {
                        None => {
                            return Ok(HttpResponse::new(
                                parts.status,
                                parts.headers,
                                body,
                                attempt + 1,
                            ));
                        }
                        Some(record) => (
                            record,
                            parse_retry_after(&parts.headers, SystemTime::now()),
                        ),
                    }
                }
                Ok(Err(error)) => {
                    let failure = RawFailure::Transport {
                        kind: error.kind(),
                        message: error.message(),
                    };
                    (self.classifier.classify(failure, attempt), None)
                }
                Err(_) => {
                    let failure = RawFailure::Timeout {
                        timeout: attempt_timeout,
                    };
                    (self.classifier.classify(failure, attempt), None)
                }
            };
            let record = {
                let retryable = self.retry_policy.is_retryable(&record);
                record.with_retryable(retryable)
            };

            match self
                .retry_policy
                .decide(&record, attempt, descriptor, retry_after)
            {
                RetryDecision::Stop => return Err(record),
                RetryDecision::Retry { delay } => {
                    warn!(
                        attempt,
                        kind = %record.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying request"
                    );
                    self.metrics.record_retry();
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return Err(self.classifier.classify(RawFailure::Aborted, attempt));
                        }
                        () = sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn prepare(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&str>,
    ) -> Result<PreparedRequest, ErrorRecord> {
        let path = append_query_pairs(descriptor.url(), descriptor.params());
        let (_, uri) = resolve_uri(&self.base_url, &path)?;
        let mut headers = merge_headers(&self.default_headers, descriptor.headers());

        let (content_type, body) = descriptor.body().encode().map_err(|source| {
            ErrorRecord::unknown(format!("failed to serialize request json: {source}"))
        })?;
        if let Some(content_type) = content_type
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, content_type);
        }
        if let Some(token) = token
            && !headers.contains_key(AUTHORIZATION)
        {
            let mut value = parse_header_value(AUTHORIZATION.as_str(), &format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(PreparedRequest {
            method: descriptor.method().clone(),
            uri,
            headers,
            body,
        })
    }

    fn settle_failure(
        &self,
        descriptor: &RequestDescriptor,
        token: Option<&str>,
        record: ErrorRecord,
    ) -> ErrorRecord {
        if record.is_cancelled() {
            debug!("request superseded by a newer duplicate");
            return record;
        }

        let mut present = !descriptor.skip_error_handling();
        if record.is_unauthorized() {
            // only the call that performed the redirect reports the expiry
            let handled = self
                .auth_expiry
                .handle(token, self.auth_store.as_ref(), self.router.as_ref());
            present &= handled;
        }
        if present {
            self.error_presenter.present_error(&record);
        }
        record
    }
}
