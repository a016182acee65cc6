//! Request identity used to detect duplicate in-flight calls.
//!
//! Only the method, url, query params and body participate. Headers never do,
//! so two call sites issuing the same logical request under different bearer
//! tokens or trace ids still collide.

use std::fmt;

use crate::descriptor::{RequestDescriptor, RequestPayload};
use crate::util::sha256_hex;

const FIELD_SEPARATOR: char = '\u{1f}';

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

pub fn fingerprint(descriptor: &RequestDescriptor) -> Fingerprint {
    if let Some(key) = descriptor.fingerprint_override_key() {
        return Fingerprint(key.to_owned());
    }

    let (path, inline_query) = split_query(descriptor.url());
    let mut canonical = String::new();
    canonical.push_str(descriptor.method().as_str());
    canonical.push(FIELD_SEPARATOR);
    canonical.push_str(path);
    canonical.push(FIELD_SEPARATOR);
    canonical.push_str(&canonical_params(inline_query, descriptor.params()));
    canonical.push(FIELD_SEPARATOR);
    canonical.push_str(&canonical_body(descriptor.body()));
    Fingerprint(sha256_hex(canonical.as_bytes()))
}

// The fragment is never sent, so it is dropped along with the query.
fn split_query(url: &str) -> (&str, &str) {
    let without_fragment = url.split_once('#').map_or(url, |(left, _)| left);
    without_fragment
        .split_once('?')
        .unwrap_or((without_fragment, ""))
}

fn canonical_params(inline_query: &str, params: &[(String, String)]) -> String {
    let mut sorted = url::form_urlencoded::parse(inline_query.as_bytes())
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .chain(params.iter().cloned())
        .collect::<Vec<_>>();
    sorted.sort();
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in &sorted {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

fn canonical_body(body: &RequestPayload) -> String {
    match body {
        RequestPayload::Empty => String::new(),
        // serde_json::Map is ordered by key, so this is already canonical
        RequestPayload::Json(value) => format!("json:{value}"),
        RequestPayload::Bytes { bytes, .. } => format!("bytes:{}", sha256_hex(bytes)),
        RequestPayload::Multipart(form) => format!("multipart:{}", form.identity()),
    }
}
