//! Server-streaming responses over HTTP.
//!
//! Messages are written as newline-delimited JSON, one `{"result": ...}` line
//! per message in production order. A failure after the first message ends the
//! body with a single `{"error": {...}}` line. A failure before the first
//! message is answered as a regular error response instead.

use std::convert::Infallible;

use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt, future, stream};
use http::header::{self, HeaderValue};
use http::StatusCode;
use serde::Serialize;
use workflow_gateway_core::Status;
use workflow_template::RpcReply;

use crate::codec::{JSON_CONTENT_TYPE, error_response, write_metadata};

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum StreamChunk<'a, T> {
    Result(&'a T),
    Error(&'a Status),
}

/// Status returned for streaming routes on a backend that cannot stream.
pub fn unsupported_stream() -> Status {
    Status::unimplemented("streaming calls are not yet supported in the in-process transport")
}

/// Forward a message stream as a chunked NDJSON response.
pub async fn forward_stream<S, T>(reply: RpcReply<S>) -> Response
where
    S: Stream<Item = Result<T, Status>> + Send + Unpin + 'static,
    T: Serialize + Send + 'static,
{
    let RpcReply {
        message: mut messages,
        metadata,
    } = reply;

    let first = match messages.next().await {
        Some(Err(status)) => return error_response(&status),
        first => first,
    };

    let lines = stream::iter(first)
        .chain(messages)
        .scan(false, |finished, item| {
            if *finished {
                return future::ready(None);
            }
            let line = match item {
                Ok(message) => encode_line(&StreamChunk::Result(&message)),
                Err(status) => {
                    *finished = true;
                    encode_line(&StreamChunk::<T>::Error(&status))
                }
            };
            let line = line.unwrap_or_else(|e| {
                *finished = true;
                tracing::error!(error = %e, "failed to encode stream message");
                let status = Status::internal("failed to encode stream message");
                encode_line(&StreamChunk::<T>::Error(&status)).unwrap_or_default()
            });
            future::ready(Some(Ok::<_, Infallible>(line)))
        });

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        Body::from_stream(lines),
    )
        .into_response();
    write_metadata(&metadata, response.headers_mut());
    response
}

fn encode_line<T: Serialize>(chunk: &StreamChunk<'_, T>) -> Result<Bytes, serde_json::Error> {
    let mut line = serde_json::to_vec(chunk)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}
