use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
#[cfg(any(
    feature = "tls-native",
    feature = "tls-rustls-ring",
    feature = "tls-rustls-aws-lc-rs"
))]
use hyper_util::client::legacy::Client;
#[cfg(any(
    feature = "tls-native",
    feature = "tls-rustls-ring",
    feature = "tls-rustls-aws-lc-rs"
))]
use hyper_util::client::legacy::connect::HttpConnector;
#[cfg(any(
    feature = "tls-native",
    feature = "tls-rustls-ring",
    feature = "tls-rustls-aws-lc-rs"
))]
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

#[cfg(any(feature = "tls-rustls-ring", feature = "tls-rustls-aws-lc-rs"))]
use hyper_rustls::HttpsConnectorBuilder;

use crate::error::{BuildError, TransportErrorKind};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type TransportFuture<'a> = BoxFuture<'a, Result<Response<Bytes>, TransportError>>;

/// Performs exactly one network exchange; retries and timeouts live above it.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request<Bytes>) -> TransportFuture<'_>;
}

#[derive(Debug, Error)]
#[error("{kind} transport error: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> String {
        self.source.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsBackend {
    RustlsRing,
    RustlsAwsLcRs,
    NativeTls,
}

impl TlsBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RustlsRing => "tls-rustls-ring",
            Self::RustlsAwsLcRs => "tls-rustls-aws-lc-rs",
            Self::NativeTls => "tls-native",
        }
    }
}

pub(crate) const fn default_tls_backend() -> TlsBackend {
    #[cfg(feature = "tls-rustls-ring")]
    {
        return TlsBackend::RustlsRing;
    }
    #[cfg(all(not(feature = "tls-rustls-ring"), feature = "tls-rustls-aws-lc-rs"))]
    {
        return TlsBackend::RustlsAwsLcRs;
    }
    #[cfg(all(
        not(feature = "tls-rustls-ring"),
        not(feature = "tls-rustls-aws-lc-rs"),
        feature = "tls-native"
    ))]
    {
        return TlsBackend::NativeTls;
    }
    #[allow(unreachable_code)]
    TlsBackend::RustlsRing
}

#[cfg(any(feature = "tls-rustls-ring", feature = "tls-rustls-aws-lc-rs"))]
type RustlsHyperClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

#[cfg(feature = "tls-native")]
type NativeHyperClient = Client<hyper_tls::HttpsConnector<HttpConnector>, Full<Bytes>>;

#[derive(Clone)]
enum TransportClient {
    #[cfg(any(feature = "tls-rustls-ring", feature = "tls-rustls-aws-lc-rs"))]
    Rustls(RustlsHyperClient),
    #[cfg(feature = "tls-native")]
    Native(NativeHyperClient),
}

/// Production transport: pooled hyper-util client over rustls or native-tls.
#[derive(Clone)]
pub struct HyperTransport {
    client: TransportClient,
    tls_backend: TlsBackend,
    max_response_body_bytes: usize,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HyperTransport")
            .field("tls_backend", &self.tls_backend)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct TransportOptions {
    pub(crate) tls_backend: TlsBackend,
    pub(crate) pool_idle_timeout: Duration,
    pub(crate) pool_max_idle_per_host: usize,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) max_response_body_bytes: usize,
}

impl HyperTransport {
    pub(crate) fn build(options: &TransportOptions) -> Result<Self, BuildError> {
        let client = match options.tls_backend {
            TlsBackend::RustlsRing => build_rustls_ring_transport(options)?,
            TlsBackend::RustlsAwsLcRs => build_rustls_aws_lc_rs_transport(options)?,
            TlsBackend::NativeTls => build_native_tls_transport(options)?,
        };
        Ok(Self {
            client,
            tls_backend: options.tls_backend,
            max_response_body_bytes: options.max_response_body_bytes,
        })
    }

    pub fn tls_backend(&self) -> TlsBackend {
        self.tls_backend
    }

    async fn exchange(&self, request: Request<Bytes>) -> Result<Response<Bytes>, TransportError> {
        let request = request.map(Full::new);
        let response = match &self.client {
            #[cfg(any(feature = "tls-rustls-ring", feature = "tls-rustls-aws-lc-rs"))]
            TransportClient::Rustls(client) => client.request(request).await,
            #[cfg(feature = "tls-native")]
            TransportClient::Native(client) => client.request(request).await,
            #[cfg(not(any(
                feature = "tls-native",
                feature = "tls-rustls-ring",
                feature = "tls-rustls-aws-lc-rs"
            )))]
            _ => unreachable!("no TLS transport backend is compiled"),
        }
        .map_err(|source| TransportError::new(classify_transport_error(&source), source))?;

        let (parts, body) = response.into_parts();
        let body = Limited::new(body, self.max_response_body_bytes)
            .collect()
            .await
            .map_err(|source| self.body_error(source))?
            .to_bytes();
        Ok(Response::from_parts(parts, body))
    }

    fn body_error(&self, source: BoxError) -> TransportError {
        if source.downcast_ref::<LengthLimitError>().is_some() {
            return TransportError::new(
                TransportErrorKind::BodyTooLarge,
                format!(
                    "response body exceeds {} bytes",
                    self.max_response_body_bytes
                ),
            );
        }
        TransportError::new(TransportErrorKind::Read, source)
    }
}

impl Transport for HyperTransport {
    fn send(&self, request: Request<Bytes>) -> TransportFuture<'_> {
        Box::pin(self.exchange(request))
    }
}

#[cfg(any(
    feature = "tls-native",
    feature = "tls-rustls-ring",
    feature = "tls-rustls-aws-lc-rs"
))]
fn http_connector(options: &TransportOptions) -> HttpConnector {
    let mut connector = HttpConnector::new();
    connector.enforce_http(false);
    connector.set_connect_timeout(options.connect_timeout);
    connector
}

#[cfg(feature = "tls-rustls-ring")]
fn build_rustls_ring_transport(options: &TransportOptions) -> Result<TransportClient, BuildError> {
    let https = HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
        .map_err(|source| BuildError::TlsBackendInit {
            backend: TlsBackend::RustlsRing.as_str(),
            message: source.to_string(),
        })?
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http_connector(options));
    let transport = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(options.pool_idle_timeout)
        .pool_max_idle_per_host(options.pool_max_idle_per_host)
        .build(https);
    Ok(TransportClient::Rustls(transport))
}

#[cfg(not(feature = "tls-rustls-ring"))]
fn build_rustls_ring_transport(_options: &TransportOptions) -> Result<TransportClient, BuildError> {
    Err(BuildError::TlsBackendUnavailable {
        backend: TlsBackend::RustlsRing.as_str(),
    })
}

#[cfg(feature = "tls-rustls-aws-lc-rs")]
fn build_rustls_aws_lc_rs_transport(
    options: &TransportOptions,
) -> Result<TransportClient, BuildError> {
    let https = HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(rustls::crypto::aws_lc_rs::default_provider())
        .map_err(|source| BuildError::TlsBackendInit {
            backend: TlsBackend::RustlsAwsLcRs.as_str(),
            message: source.to_string(),
        })?
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http_connector(options));
    let transport = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(options.pool_idle_timeout)
        .pool_max_idle_per_host(options.pool_max_idle_per_host)
        .build(https);
    Ok(TransportClient::Rustls(transport))
}

#[cfg(not(feature = "tls-rustls-aws-lc-rs"))]
fn build_rustls_aws_lc_rs_transport(
    _options: &TransportOptions,
) -> Result<TransportClient, BuildError> {
    Err(BuildError::TlsBackendUnavailable {
        backend: TlsBackend::RustlsAwsLcRs.as_str(),
    })
}

#[cfg(feature = "tls-native")]
fn build_native_tls_transport(options: &TransportOptions) -> Result<TransportClient, BuildError> {
    let https = hyper_tls::HttpsConnector::new_with_connector(http_connector(options));
    let transport = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(options.pool_idle_timeout)
        .pool_max_idle_per_host(options.pool_max_idle_per_host)
        .build(https);
    Ok(TransportClient::Native(transport))
}

#[cfg(not(feature = "tls-native"))]
fn build_native_tls_transport(_options: &TransportOptions) -> Result<TransportClient, BuildError> {
    Err(BuildError::TlsBackendUnavailable {
        backend: TlsBackend::NativeTls.as_str(),
    })
}

pub(crate) fn classify_transport_error(
    error: &hyper_util::client::legacy::Error,
) -> TransportErrorKind {
    if error.is_connect() {
        let text = error_chain_text(error);
        if text.contains("dns")
            || text.contains("name or service not known")
            || text.contains("failed to lookup address")
        {
            return TransportErrorKind::Dns;
        }
        if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }

    let text = error_chain_text(error);
    if text.contains("read")
        || text.contains("connection reset")
        || text.contains("connection closed")
        || text.contains("broken pipe")
        || text.contains("unexpected eof")
        || text.contains("incomplete message")
    {
        return TransportErrorKind::Read;
    }

    TransportErrorKind::Other
}

fn error_chain_text(error: &(dyn std::error::Error + 'static)) -> String {
    let mut text = error.to_string().to_ascii_lowercase();
    let mut source = error.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string().to_ascii_lowercase());
        source = inner.source();
    }
    text
}
