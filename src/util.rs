use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::{HeaderMap, Uri};
use sha2::{Digest, Sha256};

use crate::error::ErrorRecord;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: &HeaderMap) -> HeaderMap {
    let mut merged = default_headers.clone();
    for (name, value) in request_headers {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn resolve_uri(base_url: &str, path: &str) -> Result<(String, Uri), ErrorRecord> {
    let uri_text = if is_absolute_http(path) {
        path.to_owned()
    } else {
        join_base_path(base_url, path)
    };
    let uri = uri_text
        .parse::<Uri>()
        .map_err(|_| ErrorRecord::unknown(format!("invalid request uri: {uri_text}")))?;
    Ok((uri_text, uri))
}

fn is_absolute_http(path: &str) -> bool {
    let has_scheme = |scheme: &[u8]| {
        path.as_bytes()
            .get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    };
    has_scheme(b"http://") || has_scheme(b"https://")
}

pub(crate) fn join_base_path(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let relative = path.trim_start_matches('/');
    match (base.is_empty(), relative.is_empty()) {
        (true, true) => String::new(),
        (true, false) => relative.to_owned(),
        (false, true) => base.to_owned(),
        (false, false) => format!("{base}/{relative}"),
    }
}

pub(crate) fn append_query_pairs(path: &str, query_pairs: &[(String, String)]) -> String {
    if query_pairs.is_empty() {
        return path.to_owned();
    }

    let (without_fragment, fragment) = match path.split_once('#') {
        Some((left, right)) => (left, Some(right)),
        None => (path, None),
    };
    let (base, existing_query) = match without_fragment.split_once('?') {
        Some((left, right)) => (left, Some(right)),
        None => (without_fragment, None),
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    if let Some(existing_query) = existing_query {
        for (name, value) in url::form_urlencoded::parse(existing_query.as_bytes()) {
            serializer.append_pair(&name, &value);
        }
    }
    for (name, value) in query_pairs {
        serializer.append_pair(name, value);
    }
    let query = serializer.finish();

    let mut merged = format!("{base}?{query}");
    if let Some(fragment) = fragment {
        merged.push('#');
        merged.push_str(fragment);
    }
    merged
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, ErrorRecord> {
    name.parse()
        .map_err(|source| ErrorRecord::unknown(format!("invalid header name {name}: {source}")))
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, ErrorRecord> {
    value.parse().map_err(|source| {
        ErrorRecord::unknown(format!("invalid header value for {name}: {source}"))
    })
}

pub(crate) fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?;
    let raw_value = value.to_str().ok()?.trim();
    if let Ok(seconds) = raw_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = httpdate::parse_http_date(raw_value).ok()?;
    match date.duration_since(now) {
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    encode_hex_lower(&hasher.finalize())
}

fn encode_hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut encoded = String::with_capacity(bytes.len().saturating_mul(2));
    for byte in bytes {
        encoded.push(HEX[(byte >> 4) as usize] as char);
        encoded.push(HEX[(byte & 0x0f) as usize] as char);
    }
    encoded
}
