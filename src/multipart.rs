use bytes::{BufMut, Bytes, BytesMut};
use http::header::HeaderValue;
use rand::RngExt;

use crate::util::sha256_hex;

#[derive(Clone, Debug, PartialEq, Eq)]
struct Part {
    name: String,
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

/// `multipart/form-data` body used by `HttpClient::upload`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Multipart {
    parts: Vec<Part>,
}

impl Multipart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part {
            name: name.into(),
            file_name: None,
            content_type: None,
            data: Bytes::from(value.into()),
        });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: Some(content_type.into()),
            data: data.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Boundary-independent description of the form, used for fingerprinting.
    pub(crate) fn identity(&self) -> String {
        let mut identity = String::new();
        for part in &self.parts {
            identity.push_str(&part.name);
            identity.push('\u{1f}');
            identity.push_str(part.file_name.as_deref().unwrap_or(""));
            identity.push('\u{1f}');
            identity.push_str(part.content_type.as_deref().unwrap_or(""));
            identity.push('\u{1f}');
            identity.push_str(&sha256_hex(&part.data));
            identity.push('\u{1e}');
        }
        identity
    }

    pub(crate) fn encode(&self) -> (HeaderValue, Bytes) {
        let boundary = random_boundary();
        self.encode_with_boundary(&boundary)
    }

    fn encode_with_boundary(&self, boundary: &str) -> (HeaderValue, Bytes) {
        let mut body = BytesMut::new();
        for part in &self.parts {
            body.put_slice(b"--");
            body.put_slice(boundary.as_bytes());
            body.put_slice(b"\r\n");
            let disposition = match &part.file_name {
                Some(file_name) => format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    escape_quoted(&part.name),
                    escape_quoted(file_name)
                ),
                None => format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n",
                    escape_quoted(&part.name)
                ),
            };
            body.put_slice(disposition.as_bytes());
            if let Some(content_type) = &part.content_type {
                body.put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
            body.put_slice(b"\r\n");
            body.put_slice(&part.data);
            body.put_slice(b"\r\n");
        }
        body.put_slice(b"--");
        body.put_slice(boundary.as_bytes());
        body.put_slice(b"--\r\n");

        // boundary is alphanumeric plus '-', always a valid header value
        let content_type = HeaderValue::from_str(&format!("multipart/form-data; boundary={boundary}"))
            .unwrap_or_else(|_| HeaderValue::from_static("multipart/form-data"));
        (content_type, body.freeze())
    }
}

fn random_boundary() -> String {
    let mut rng = rand::rng();
    let high: u64 = rng.random();
    let low: u64 = rng.random();
    format!("dashreq-{high:016x}{low:016x}")
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}
