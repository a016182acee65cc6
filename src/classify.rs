use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;

use crate::error::{ErrorKind, ErrorRecord, TransportErrorKind};
use crate::util::truncate_body;

/// Unclassified outcome of a single attempt.
#[derive(Clone, Debug)]
pub enum RawFailure {
    /// No response; the transport reported why.
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    /// No response within the per-attempt timeout.
    Timeout { timeout: Duration },
    /// A response arrived but the call did not succeed.
    Response { status: StatusCode, body: Bytes },
    /// The duplicate guard superseded the call.
    Aborted,
    Other { message: String },
}

/// Application-level `{ code, message }` envelope some backends wrap every
/// response in, including HTTP 200s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusinessEnvelope {
    enabled: bool,
    code_field: String,
    message_fields: Vec<String>,
    success_codes: BTreeSet<i64>,
}

impl BusinessEnvelope {
    pub fn standard() -> Self {
        Self {
            enabled: true,
            code_field: "code".to_owned(),
            message_fields: vec!["message".to_owned(), "msg".to_owned()],
            success_codes: [0, 200].into_iter().collect(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::standard()
        }
    }

    pub fn code_field(mut self, field: impl Into<String>) -> Self {
        self.code_field = field.into();
        self
    }

    pub fn message_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.message_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn success_codes(mut self, codes: impl IntoIterator<Item = i64>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }

    /// Returns `(code, message)` when the body is an envelope with a failure code.
    pub fn failure(&self, body: &[u8]) -> Option<(i64, String)> {
        if !self.enabled || body.is_empty() {
            return None;
        }
        let Ok(Value::Object(object)) = serde_json::from_slice::<Value>(body) else {
            return None;
        };
        let code = match object.get(&self.code_field)? {
            Value::Number(number) => number.as_i64()?,
            Value::String(text) => text.trim().parse::<i64>().ok()?,
            _ => return None,
        };
        if self.success_codes.contains(&code) {
            return None;
        }
        let message = self
            .message_fields
            .iter()
            .find_map(|field| object.get(field).and_then(Value::as_str))
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("business error {code}"));
        Some((code, message))
    }
}

impl Default for BusinessEnvelope {
    fn default() -> Self {
        Self::standard()
    }
}

pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, failure: RawFailure, attempt: u32) -> ErrorRecord;

    /// Inspects a received response; `None` means the call succeeded.
    fn check_response(&self, status: StatusCode, body: &Bytes, attempt: u32) -> Option<ErrorRecord>;
}

#[derive(Clone, Debug, Default)]
pub struct StandardErrorClassifier {
    envelope: BusinessEnvelope,
}

impl StandardErrorClassifier {
    pub fn new(envelope: BusinessEnvelope) -> Self {
        Self { envelope }
    }

    pub fn envelope(&self) -> &BusinessEnvelope {
        &self.envelope
    }
}

impl ErrorClassifier for StandardErrorClassifier {
    fn classify(&self, failure: RawFailure, attempt: u32) -> ErrorRecord {
        match failure {
            RawFailure::Timeout { timeout } => ErrorRecord::new(
                ErrorKind::Timeout,
                format!("no response within {}ms", timeout.as_millis()),
                attempt,
            ),
            RawFailure::Transport { kind, message } => match kind {
                TransportErrorKind::Dns | TransportErrorKind::Connect | TransportErrorKind::Read => {
                    ErrorRecord::new(ErrorKind::Network, format!("{kind}: {message}"), attempt)
                }
                TransportErrorKind::Tls
                | TransportErrorKind::BodyTooLarge
                | TransportErrorKind::Other => {
                    ErrorRecord::new(ErrorKind::Unknown, format!("{kind}: {message}"), attempt)
                }
            },
            RawFailure::Response { status, body } => {
                if let Some((code, message)) = self.envelope.failure(&body) {
                    return ErrorRecord::new(ErrorKind::Business { code }, message, attempt)
                        .with_http_status(status.as_u16());
                }
                let message = if body.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("unexpected status")
                        .to_owned()
                } else {
                    truncate_body(&body)
                };
                ErrorRecord::new(
                    ErrorKind::Http {
                        status: status.as_u16(),
                    },
                    message,
                    attempt,
                )
            }
            RawFailure::Aborted => ErrorRecord::cancelled(attempt),
            RawFailure::Other { message } => ErrorRecord::new(ErrorKind::Unknown, message, attempt),
        }
    }

    fn check_response(&self, status: StatusCode, body: &Bytes, attempt: u32) -> Option<ErrorRecord> {
        if status.is_success() && self.envelope.failure(body).is_none() {
            return None;
        }
        Some(self.classify(
            RawFailure::Response {
                status,
                body: body.clone(),
            },
            attempt,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use http::StatusCode;

    use super::{BusinessEnvelope, ErrorClassifier, RawFailure, StandardErrorClassifier};
    use crate::error::{ErrorKind, TransportErrorKind};

    fn classifier() -> StandardErrorClassifier {
        StandardErrorClassifier::default()
    }

    #[test]
    fn timeout_maps_to_timeout_error() {
        let record = classifier().classify(
            RawFailure::Timeout {
                timeout: Duration::from_secs(10),
            },
            2,
        );
        assert_eq!(record.kind(), ErrorKind::Timeout);
        assert_eq!(record.attempt(), 2);
        assert!(record.retryable());
    }

    #[test]
    fn refused_and_offline_map_to_network_error() {
        for kind in [
            TransportErrorKind::Dns,
            TransportErrorKind::Connect,
            TransportErrorKind::Read,
        ] {
            let record = classifier().classify(
                RawFailure::Transport {
                    kind,
                    message: "connection refused".to_owned(),
                },
                0,
            );
            assert_eq!(record.kind(), ErrorKind::Network);
        }
    }

    #[test]
    fn tls_and_unrecognized_failures_are_unknown() {
        let tls = classifier().classify(
            RawFailure::Transport {
                kind: TransportErrorKind::Tls,
                message: "bad certificate".to_owned(),
            },
            0,
        );
        assert_eq!(tls.kind(), ErrorKind::Unknown);
        assert!(!tls.retryable());

        let oversized = classifier().classify(
            RawFailure::Transport {
                kind: TransportErrorKind::BodyTooLarge,
                message: "response body exceeds 100 bytes".to_owned(),
            },
            0,
        );
        assert_eq!(oversized.kind(), ErrorKind::Unknown);
        assert!(!oversized.retryable());

        let other = classifier().classify(
            RawFailure::Other {
                message: "boom".to_owned(),
            },
            0,
        );
        assert_eq!(other.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn status_maps_to_http_error() {
        let record = classifier().classify(
            RawFailure::Response {
                status: StatusCode::BAD_GATEWAY,
                body: Bytes::new(),
            },
            0,
        );
        assert_eq!(record.kind(), ErrorKind::Http { status: 502 });
        assert_eq!(record.http_status(), Some(502));
        assert_eq!(record.message(), "Bad Gateway");
    }

    #[test]
    fn envelope_failure_code_wins_over_status() {
        let record = classifier().classify(
            RawFailure::Response {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: Bytes::from_static(br#"{"code":10023,"msg":"quota exhausted"}"#),
            },
            0,
        );
        assert_eq!(record.kind(), ErrorKind::Business { code: 10023 });
        assert_eq!(record.message(), "quota exhausted");
        assert_eq!(record.http_status(), Some(500));
        assert!(!record.retryable());
    }

    #[test]
    fn check_response_flags_business_failure_on_success_status() {
        let failed = classifier().check_response(
            StatusCode::OK,
            &Bytes::from_static(br#"{"code":"4001","message":"key disabled","data":null}"#),
            1,
        );
        let failed = failed.expect("envelope failure should be reported");
        assert_eq!(failed.kind(), ErrorKind::Business { code: 4001 });
        assert_eq!(failed.attempt(), 1);

        let ok = classifier().check_response(
            StatusCode::OK,
            &Bytes::from_static(br#"{"code":0,"data":{"total":3}}"#),
            0,
        );
        assert!(ok.is_none());

        let plain = classifier().check_response(StatusCode::OK, &Bytes::from_static(b"[1,2]"), 0);
        assert!(plain.is_none());
    }

    #[test]
    fn disabled_envelope_ignores_codes() {
        let classifier = StandardErrorClassifier::new(BusinessEnvelope::disabled());
        let result = classifier.check_response(
            StatusCode::OK,
            &Bytes::from_static(br#"{"code":500}"#),
            0,
        );
        assert!(result.is_none());
    }

    #[test]
    fn aborted_maps_to_cancelled() {
        let record = classifier().classify(RawFailure::Aborted, 1);
        assert!(record.is_cancelled());
        assert!(!record.retryable());
    }
}
