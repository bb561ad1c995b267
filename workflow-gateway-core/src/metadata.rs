//! Header and trailer metadata produced by a call.

use std::collections::BTreeMap;

use http::header::{self, HeaderName, HeaderValue};
use http::HeaderMap;

/// Prefix carrying trailer metadata in unary response headers.
pub const TRAILER_PREFIX: &str = "trailer-";

const PROTOCOL_HEADERS: &[HeaderName] = &[
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::DATE,
    header::SERVER,
    header::VARY,
];

/// Metadata a server attached to a call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerMetadata {
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
}

impl ServerMetadata {
    /// Split unary response headers into header and trailer metadata.
    ///
    /// Protocol headers are dropped; `trailer-` prefixed entries become trailers.
    pub fn from_unary_headers(response_headers: &HeaderMap) -> Self {
        let mut metadata = Self::default();
        for (name, value) in response_headers {
            if PROTOCOL_HEADERS.contains(name) {
                continue;
            }
            match name.as_str().strip_prefix(TRAILER_PREFIX) {
                Some(key) => {
                    if let Ok(key) = HeaderName::from_bytes(key.as_bytes()) {
                        metadata.trailers.append(key, value.clone());
                    }
                }
                None => {
                    metadata.headers.append(name.clone(), value.clone());
                }
            }
        }
        metadata
    }
}

/// Convert headers to the JSON metadata shape `{"key": ["v1", "v2"]}`.
///
/// Values that are not visible ASCII are skipped.
pub fn headers_to_map(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.as_str().to_owned())
                .or_default()
                .push(value.to_owned());
        }
    }
    map
}

/// Inverse of [`headers_to_map`]. Invalid names or values are skipped.
pub fn headers_from_map(map: &BTreeMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (key, values) in map {
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
    headers
}
