//! `dashreq` is the resilient request layer behind an admin dashboard: one
//! dispatcher that deduplicates identical in-flight calls, retries transient
//! failures with exponential backoff, classifies every failure into a stable
//! record, and coordinates the shared loading indicator.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use dashreq::prelude::{HttpClient, RetryPolicy};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Stats {
//!     active_users: u64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::builder("https://admin.example.com/api")
//!         .client_name("dashboard")
//!         .request_timeout(Duration::from_secs(10))
//!         .retry_policy(
//!             RetryPolicy::standard()
//!                 .max_retries(3)
//!                 .base_backoff(Duration::from_millis(500)),
//!         )
//!         .try_build()?;
//!
//!     let stats: Stats = client
//!         .get("/stats")
//!         .query_pair("range", "7d")
//!         .show_loading(true)
//!         .send_json()
//!         .await?;
//!
//!     println!("active users: {}", stats.active_users);
//!     Ok(())
//! }
//! ```
//!
//! # Behavior Summary
//!
//! - Identical requests in flight at the same time: the newest wins and the
//!   older call resolves with a `cancelled` record.
//! - Only network errors, timeouts and retryable HTTP statuses are retried.
//! - A `401` clears the session and redirects to login once per expired token.

#[cfg(all(
    not(feature = "tls-rustls-ring"),
    not(feature = "tls-rustls-aws-lc-rs"),
    not(feature = "tls-native")
))]
compile_error!(
    "dashreq requires one TLS backend feature: enable `tls-rustls-ring`, `tls-rustls-aws-lc-rs`, or `tls-native`"
);

mod auth;
mod classify;
mod client;
mod config;
mod dedup;
mod descriptor;
mod error;
mod fingerprint;
mod hooks;
mod loading;
mod metrics;
mod multipart;
mod registry;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::classify::{BusinessEnvelope, ErrorClassifier, RawFailure, StandardErrorClassifier};
pub use crate::client::{HttpClient, HttpClientBuilder};
pub use crate::config::{BusinessConfig, ClientConfig, RetryConfig};
pub use crate::dedup::{DuplicateRequestGuard, InFlightHandle};
pub use crate::descriptor::{RequestConfig, RequestDescriptor, RequestPayload};
pub use crate::error::{BuildError, ErrorKind, ErrorRecord, TransportErrorKind};
pub use crate::fingerprint::{Fingerprint, fingerprint};
pub use crate::hooks::{
    AnonymousAuthStore, AuthStore, ErrorPresenter, LoadingIndicator, NoopLoadingIndicator,
    NoopRouter, Router, TracingErrorPresenter,
};
pub use crate::loading::{LoadingCoordinator, LoadingToken};
pub use crate::metrics::HttpClientMetricsSnapshot;
pub use crate::multipart::Multipart;
pub use crate::request::RequestBuilder;
pub use crate::response::HttpResponse;
pub use crate::retry::{RetryClassifier, RetryDecision, RetryPolicy};
pub use crate::transport::{
    HyperTransport, TlsBackend, Transport, TransportError, TransportFuture,
};

pub type DashreqResult<T> = std::result::Result<T, ErrorRecord>;

pub mod prelude {
    pub use crate::{
        AuthStore, BusinessEnvelope, DashreqResult, ErrorKind, ErrorPresenter, ErrorRecord,
        HttpClient, HttpClientMetricsSnapshot, HttpResponse, LoadingIndicator, Multipart,
        RequestConfig, RetryPolicy, Router, TlsBackend,
    };
}
