use std::time::SystemTime;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    BodyTooLarge,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::BodyTooLarge => "body_too_large",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Closed failure taxonomy every dispatched call is classified into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No response: offline, DNS failure, refused or reset connection.
    Network,
    /// No response within the per-attempt timeout.
    Timeout,
    /// Response with a non-success status.
    Http { status: u16 },
    /// Response whose envelope carried an application failure code.
    Business { code: i64 },
    /// Superseded by a newer identical request.
    Cancelled,
    Unknown,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network_error",
            Self::Timeout => "timeout_error",
            Self::Http { .. } => "http_error",
            Self::Business { .. } => "business_error",
            Self::Cancelled => "cancelled_error",
            Self::Unknown => "unknown_error",
        }
    }

    pub const fn status(self) -> Option<u16> {
        match self {
            Self::Http { status } => Some(status),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http { status } => write!(formatter, "http_error({status})"),
            Self::Business { code } => write!(formatter, "business_error({code})"),
            other => formatter.write_str(other.as_str()),
        }
    }
}

/// Classified terminal (or intermediate) failure of one logical call.
///
/// Callers of the dispatcher only ever see this type, never the raw transport
/// error, so presentation and retry logic stay independent of hyper.
#[derive(Clone, Debug, Error)]
#[error("{kind} on attempt {attempt}: {message}")]
pub struct ErrorRecord {
    kind: ErrorKind,
    http_status: Option<u16>,
    message: String,
    retryable: bool,
    attempt: u32,
    timestamp: SystemTime,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>, attempt: u32) -> Self {
        Self {
            kind,
            http_status: kind.status(),
            message: message.into(),
            retryable: kind_is_transient(kind),
            attempt,
            timestamp: SystemTime::now(),
        }
    }

    pub(crate) fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub(crate) fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub(crate) fn cancelled(attempt: u32) -> Self {
        Self::new(
            ErrorKind::Cancelled,
            "superseded by a newer identical request",
            attempt,
        )
    }

    pub(crate) fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message, 0)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Status of the response that produced this record, if one was received.
    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    /// True for any failure that came from a 401 response, including business
    /// envelopes the backend wraps around it.
    pub fn is_unauthorized(&self) -> bool {
        self.http_status == Some(401)
    }
}

pub(crate) const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

fn kind_is_transient(kind: ErrorKind) -> bool {
    match kind {
        ErrorKind::Network | ErrorKind::Timeout => true,
        ErrorKind::Http { status } => DEFAULT_RETRYABLE_STATUS_CODES.contains(&status),
        ErrorKind::Business { .. } | ErrorKind::Cancelled | ErrorKind::Unknown => false,
    }
}

/// Failure while assembling a client, before any request is dispatched.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("invalid base url {base_url}: {message}")]
    InvalidBaseUrl { base_url: String, message: String },
    #[error("requested tls backend is not enabled in this build: {backend}")]
    TlsBackendUnavailable { backend: &'static str },
    #[error("failed to initialize tls backend {backend}: {message}")]
    TlsBackendInit {
        backend: &'static str,
        message: String,
    },
    #[error("invalid default header {name}: {message}")]
    InvalidHeader { name: String, message: String },
    #[error("failed to parse client config: {source}")]
    Config {
        #[source]
        source: serde_json::Error,
    },
}
