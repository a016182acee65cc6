use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{ErrorKind, ErrorRecord};
use crate::util::truncate_body;

#[derive(Clone, Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    attempts: u32,
}

impl HttpResponse {
    pub(crate) fn new(status: StatusCode, headers: HeaderMap, body: Bytes, attempts: u32) -> Self {
        Self {
            status,
            headers,
            body,
            attempts,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Network attempts it took to obtain this response.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> Result<T, ErrorRecord>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| {
            ErrorRecord::new(
                ErrorKind::Unknown,
                format!(
                    "failed to decode response json: {source}; body={}",
                    truncate_body(&self.body)
                ),
                self.attempts.saturating_sub(1),
            )
            .with_http_status(self.status.as_u16())
        })
    }
}
