//! JSON <-> message translation for the REST surface.
//!
//! Requests are decoded from the JSON body, the query string and captured path
//! variables. Every decoding failure is an `invalid_argument` status raised
//! before any RPC is issued. Responses are JSON with the call's metadata
//! forwarded as `grpc-metadata-*` and `grpc-trailer-*` headers.

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;
use workflow_gateway_core::{Code, ServerMetadata, Status};
use workflow_template::RpcReply;

use crate::route::PathParams;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Prefix for header metadata forwarded to the HTTP client.
pub const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";

/// Prefix for trailer metadata forwarded to the HTTP client.
pub const METADATA_TRAILER_PREFIX: &str = "grpc-trailer-";

/// Read a request body, failing once it exceeds `limit` bytes.
pub async fn read_body(body: Body, limit: usize) -> Result<Bytes, Status> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        Status::new(
            Code::ResourceExhausted,
            format!("failed to read request body: {e}"),
        )
    })
}

/// Decode a JSON body. An empty or whitespace-only body yields the default
/// message.
pub fn decode_body<T>(body: &[u8]) -> Result<T, Status>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| Status::invalid_argument(e.to_string()))
}

/// Decode query parameters into `T`. A missing query yields the default.
pub fn decode_query<T>(query: Option<&str>) -> Result<T, Status>
where
    T: DeserializeOwned + Default,
{
    match query {
        None | Some("") => Ok(T::default()),
        Some(query) => serde_qs::from_str(query)
            .map_err(|e| Status::invalid_argument(format!("failed to parse query: {e}"))),
    }
}

/// A captured variable, percent-decoded.
pub fn path_string(params: &PathParams, name: &str) -> Result<String, Status> {
    let raw = params
        .get(name)
        .ok_or_else(|| Status::invalid_argument(format!("missing parameter {name}")))?;
    unescape(raw)
        .ok_or_else(|| Status::invalid_argument(format!("invalid escape in parameter {name}")))
}

/// A captured variable converted to a UUID.
pub fn path_uuid(params: &PathParams, name: &str) -> Result<Uuid, Status> {
    path_string(params, name)?.parse().map_err(|e| {
        Status::invalid_argument(format!("type mismatch, parameter: {name}, error: {e}"))
    })
}

/// `None` on a malformed `%XX` escape or a result that is not UTF-8.
fn unescape(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while let Some(offset) = bytes[i..].iter().position(|&b| b == b'%') {
        let at = i + offset;
        let escape = bytes.get(at + 1..at + 3)?;
        if !escape.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
        i = at + 3;
    }
    urlencoding::decode(raw).ok().map(|decoded| decoded.into_owned())
}

/// 200 response with `reply.message` as the JSON body.
pub fn forward_response<T: Serialize>(reply: RpcReply<T>) -> Response {
    let body = match serde_json::to_vec(&reply.message) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response message");
            return error_response(&Status::internal("failed to encode response"));
        }
    };

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        body,
    )
        .into_response();
    write_metadata(&reply.metadata, response.headers_mut());
    response
}

/// Copy call metadata into response headers under the gateway prefixes.
pub fn write_metadata(metadata: &ServerMetadata, headers: &mut HeaderMap) {
    append_prefixed(METADATA_HEADER_PREFIX, &metadata.headers, headers);
    append_prefixed(METADATA_TRAILER_PREFIX, &metadata.trailers, headers);
}

fn append_prefixed(prefix: &str, source: &HeaderMap, target: &mut HeaderMap) {
    for (name, value) in source {
        let prefixed = format!("{prefix}{}", name.as_str());
        if let Ok(prefixed) = HeaderName::from_bytes(prefixed.as_bytes()) {
            target.append(prefixed, value.clone());
        }
    }
}

/// Error response: mapped HTTP status and `{"code","message"}` body.
pub fn error_response(status: &Status) -> Response {
    (
        status.http_status(),
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        status.to_json_bytes(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;
    use workflow_template::pb::{FilterRequest, WorkflowTemplate};

    use super::*;

    #[test]
    fn test_decode_body() {
        let template: WorkflowTemplate =
            decode_body(br#"{"name":"build","data":"steps"}"#).unwrap();
        assert_eq!(template.name, "build");
        assert_eq!(template.data, "steps");

        let empty: WorkflowTemplate = decode_body(b"  \n").unwrap();
        assert_eq!(empty, WorkflowTemplate::default());

        let err = decode_body::<WorkflowTemplate>(b"{not json").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn test_decode_query() {
        let request: FilterRequest = decode_query(Some("filter=build*")).unwrap();
        assert_eq!(request.filter, "build*");

        let request: FilterRequest = decode_query(None).unwrap();
        assert!(request.filter.is_empty());
    }

    #[test]
    fn test_path_uuid_errors() {
        let mut params = PathParams::default();
        let err = path_uuid(&params, "id").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(err.message(), Some("missing parameter id"));

        params.push("id".into(), "42".into());
        let err = path_uuid(&params, "id").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert!(
            err.message()
                .unwrap()
                .starts_with("type mismatch, parameter: id, error: ")
        );

        let id = Uuid::new_v4();
        let mut params = PathParams::default();
        params.push("id".into(), id.to_string());
        assert_eq!(path_uuid(&params, "id").unwrap(), id);
    }

    #[test]
    fn test_path_variables_are_unescaped() {
        let mut params = PathParams::default();
        params.push("name".into(), "nightly%20build".into());
        params.push("plain".into(), "build-mac".into());
        params.push("bad".into(), "50%zz".into());
        params.push("cut".into(), "50%2".into());
        params.push("binary".into(), "%ff".into());

        assert_eq!(path_string(&params, "name").unwrap(), "nightly build");
        assert_eq!(path_string(&params, "plain").unwrap(), "build-mac");
        for name in ["bad", "cut", "binary"] {
            let err = path_string(&params, name).unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument);
            assert_eq!(
                err.message(),
                Some(format!("invalid escape in parameter {name}").as_str())
            );
        }
    }

    #[tokio::test]
    async fn test_forward_response_with_metadata() {
        let mut metadata = ServerMetadata::default();
        metadata.headers.insert("x-store", "memory".parse().unwrap());
        metadata.trailers.insert("x-rows", "1".parse().unwrap());
        let reply = RpcReply {
            message: FilterRequest {
                filter: "build".into(),
            },
            metadata,
        };

        let response = forward_response(reply);
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), JSON_CONTENT_TYPE);
        assert_eq!(headers.get("grpc-metadata-x-store").unwrap(), "memory");
        assert_eq!(headers.get("grpc-trailer-x-rows").unwrap(), "1");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"filter":"build"}"#);
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = error_response(&Status::already_exists("duplicate name: build"));
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["code"], "already_exists");
        assert_eq!(value["message"], "duplicate name: build");
    }
}
