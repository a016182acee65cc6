use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::client::HttpClient;
use crate::descriptor::{RequestConfig, RequestDescriptor, RequestPayload};
use crate::error::ErrorRecord;
use crate::multipart::Multipart;
use crate::response::HttpResponse;
use crate::util::{parse_header_name, parse_header_value};

#[doc(hidden)]
pub struct RequestBuilder<'a> {
    client: &'a HttpClient,
    method: Method,
    path: String,
    query_pairs: Vec<(String, String)>,
    headers: HeaderMap,
    body: RequestPayload,
    config: RequestConfig,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a HttpClient, method: Method, path: String) -> Self {
        Self {
            client,
            method,
            path,
            query_pairs: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestPayload::Empty,
            config: RequestConfig::default(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self, ErrorRecord> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_pairs.push((name.into(), value.into()));
        self
    }

    pub fn query_pairs<K, V, I>(mut self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.query_pairs.extend(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn query<T>(mut self, params: &T) -> Result<Self, ErrorRecord>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(params).map_err(|source| {
            ErrorRecord::unknown(format!("failed to serialize query params: {source}"))
        })?;
        self.query_pairs.extend(
            url::form_urlencoded::parse(encoded.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned())),
        );
        Ok(self)
    }

    pub fn json<T>(self, payload: &T) -> Result<Self, ErrorRecord>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(payload).map_err(|source| {
            ErrorRecord::unknown(format!("failed to serialize request json: {source}"))
        })?;
        Ok(self.json_value(value))
    }

    pub fn json_value(mut self, value: serde_json::Value) -> Self {
        self.body = RequestPayload::Json(value);
        self
    }

    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestPayload::Bytes {
            content_type: None,
            bytes: body.into(),
        };
        self
    }

    pub fn multipart(mut self, form: Multipart) -> Self {
        self.body = RequestPayload::Multipart(form);
        self
    }

    /// Replaces every per-call option set so far.
    pub fn config(mut self, config: RequestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn skip_error_handling(mut self, skip: bool) -> Self {
        self.config.skip_error_handling = skip;
        self
    }

    pub fn show_loading(mut self, show: bool) -> Self {
        self.config.show_loading = show;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.config.retryable = retryable;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = Some(max_retries);
        self
    }

    pub fn skip_dedup(mut self, skip: bool) -> Self {
        self.config.skip_dedup = skip;
        self
    }

    pub fn dedup_key(mut self, key: impl Into<String>) -> Self {
        self.config.dedup_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    /// Freezes the builder into the descriptor `send` would dispatch.
    pub fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::from_parts(
            self.method.clone(),
            self.path.clone(),
            self.query_pairs.clone(),
            self.body.clone(),
            self.headers.clone(),
            self.config.clone(),
            self.client.default_max_retries(),
        )
    }

    pub async fn send(self) -> Result<HttpResponse, ErrorRecord> {
        let descriptor = RequestDescriptor::from_parts(
            self.method,
            self.path,
            self.query_pairs,
            self.body,
            self.headers,
            self.config,
            self.client.default_max_retries(),
        );
        self.client.dispatch(descriptor).await
    }

    pub async fn send_json<T>(self) -> Result<T, ErrorRecord>
    where
        T: DeserializeOwned,
    {
        let response = self.send().await?;
        response.json()
    }
}
