//! Client for a remote template RPC server.
//!
//! [`TemplateClient`] speaks the protocol served by [`crate::rpc::rpc_router`]
//! over hyper_util's pooled client, HTTP/1.1 by default or HTTP/2 with prior
//! knowledge (h2c).

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use http::{HeaderMap, HeaderValue, Request, StatusCode, Uri, header};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use prost::Message;
use workflow_gateway_core::{
    CONNECT_TIMEOUT_MS_HEADER, Code, EnvelopeReader, Frame, ServerMetadata, Status, wrap_envelope,
};

use crate::context::{CallContext, Interrupted};
use crate::pb::{
    CreateResponse, Empty, FilterRequest, GetRequest, WorkflowTemplate, method_path, methods,
};
use crate::rpc::{STREAMING_CONTENT_TYPE, UNARY_CONTENT_TYPE};

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// Client-side failures.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered with an error status.
    #[error(transparent)]
    Status(#[from] Status),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// Malformed frames or an otherwise unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl ClientError {
    pub fn code(&self) -> Code {
        match self {
            ClientError::Status(status) => status.code(),
            ClientError::Transport(_) => Code::Unavailable,
            ClientError::Decode(_) | ClientError::Protocol(_) => Code::Internal,
            ClientError::Interrupted(Interrupted::Cancelled) => Code::Canceled,
            ClientError::Interrupted(Interrupted::DeadlineExceeded) => Code::DeadlineExceeded,
        }
    }
}

impl From<ClientError> for Status {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Status(status) => status,
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

/// A response message with the metadata the server attached to it.
#[derive(Debug)]
pub struct RpcReply<T> {
    pub message: T,
    pub metadata: ServerMetadata,
}

impl<T> RpcReply<T> {
    pub fn new(message: T) -> Self {
        Self {
            message,
            metadata: ServerMetadata::default(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RpcReply<U> {
        RpcReply {
            message: f(self.message),
            metadata: self.metadata,
        }
    }
}

/// Connection to a template RPC server.
#[derive(Clone)]
pub struct TemplateClient {
    http: HttpClient,
    base_url: String,
}

impl fmt::Debug for TemplateClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl TemplateClient {
    pub fn builder(base_url: impl Into<String>) -> TemplateClientBuilder {
        TemplateClientBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn create_template(
        &self,
        ctx: &CallContext,
        request: &WorkflowTemplate,
    ) -> Result<RpcReply<CreateResponse>, ClientError> {
        self.unary(ctx, methods::CREATE_TEMPLATE, request).await
    }

    pub async fn get_template(
        &self,
        ctx: &CallContext,
        request: &GetRequest,
    ) -> Result<RpcReply<WorkflowTemplate>, ClientError> {
        self.unary(ctx, methods::GET_TEMPLATE, request).await
    }

    pub async fn get_template_by_name(
        &self,
        ctx: &CallContext,
        request: &GetRequest,
    ) -> Result<RpcReply<WorkflowTemplate>, ClientError> {
        self.unary(ctx, methods::GET_TEMPLATE_BY_NAME, request).await
    }

    pub async fn delete_template(
        &self,
        ctx: &CallContext,
        request: &GetRequest,
    ) -> Result<RpcReply<Empty>, ClientError> {
        self.unary(ctx, methods::DELETE_TEMPLATE, request).await
    }

    pub async fn update_template(
        &self,
        ctx: &CallContext,
        request: &WorkflowTemplate,
    ) -> Result<RpcReply<Empty>, ClientError> {
        self.unary(ctx, methods::UPDATE_TEMPLATE, request).await
    }

    /// Start a `ListTemplates` stream.
    ///
    /// An error the server reports before the first message surfaces as the
    /// first item of the stream.
    pub async fn list_templates(
        &self,
        ctx: &CallContext,
        request: &FilterRequest,
    ) -> Result<RpcReply<FrameDecoder<Incoming, WorkflowTemplate>>, ClientError> {
        let payload = wrap_envelope(&request.encode_to_vec());
        let http_request =
            self.build_request(ctx, methods::LIST_TEMPLATES, STREAMING_CONTENT_TYPE, payload)?;
        let response = ctx
            .run(self.http.request(http_request))
            .await?
            .map_err(|e| ClientError::Transport(format!("request failed: {e}")))?;

        let (parts, body) = response.into_parts();
        if parts.status != StatusCode::OK {
            let body = ctx.run(collect(body)).await??;
            return Err(error_from_response(parts.status, &body).into());
        }

        Ok(RpcReply {
            message: FrameDecoder::new(body),
            metadata: ServerMetadata::from_unary_headers(&parts.headers),
        })
    }

    async fn unary<Req, Res>(
        &self,
        ctx: &CallContext,
        method: &str,
        request: &Req,
    ) -> Result<RpcReply<Res>, ClientError>
    where
        Req: Message,
        Res: Message + Default,
    {
        let http_request =
            self.build_request(ctx, method, UNARY_CONTENT_TYPE, request.encode_to_vec())?;
        let response = ctx
            .run(self.http.request(http_request))
            .await?
            .map_err(|e| ClientError::Transport(format!("request failed: {e}")))?;

        let (parts, body) = response.into_parts();
        let body = ctx.run(collect(body)).await??;
        if parts.status != StatusCode::OK {
            return Err(error_from_response(parts.status, &body).into());
        }

        let message = Res::decode(body)
            .map_err(|e| ClientError::Decode(format!("protobuf decoding failed: {e}")))?;
        Ok(RpcReply {
            message,
            metadata: ServerMetadata::from_unary_headers(&parts.headers),
        })
    }

    fn build_request(
        &self,
        ctx: &CallContext,
        method: &str,
        content_type: &'static str,
        payload: Vec<u8>,
    ) -> Result<Request<Full<Bytes>>, ClientError> {
        let mut builder = Request::post(format!("{}{}", self.base_url, method_path(method)))
            .header(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        if let Some(remaining) = ctx.remaining() {
            let millis = remaining.as_millis().max(1);
            builder = builder.header(CONNECT_TIMEOUT_MS_HEADER, millis.to_string());
        }
        builder
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| ClientError::Protocol(format!("invalid request: {e}")))
    }
}

async fn collect(body: Incoming) -> Result<Bytes, ClientError> {
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| ClientError::Transport(format!("failed to read response body: {e}")))
}

/// Status carried by a non-200 unary response.
///
/// Falls back to a code derived from the HTTP status when the body is not a
/// JSON error.
fn error_from_response(status: StatusCode, body: &[u8]) -> Status {
    serde_json::from_slice::<Status>(body).unwrap_or_else(|_| {
        Status::new(
            Code::from_http_status(status),
            format!("unexpected HTTP status {status}"),
        )
    })
}

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Builder for [`TemplateClient`].
#[derive(Debug)]
pub struct TemplateClientBuilder {
    base_url: String,
    http2_only: bool,
    connect_timeout: Option<Duration>,
}

impl TemplateClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http2_only: false,
            connect_timeout: None,
        }
    }

    /// Speak HTTP/2 without upgrade (h2c).
    pub fn http2_only(mut self, enabled: bool) -> Self {
        self.http2_only = enabled;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<TemplateClient, ClientError> {
        let base_url = self.base_url.trim_end_matches('/').to_owned();
        let uri: Uri = base_url
            .parse()
            .map_err(|e| ClientError::Protocol(format!("invalid base url {base_url:?}: {e}")))?;
        if uri.scheme_str() != Some("http") || uri.authority().is_none() {
            return Err(ClientError::Protocol(format!(
                "base url must be http://host:port, got {base_url:?}"
            )));
        }

        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(self.connect_timeout);

        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_timer(TokioTimer::new());
        builder.pool_idle_timeout(POOL_IDLE_TIMEOUT);
        if self.http2_only {
            builder.http2_only(true);
        }

        Ok(TemplateClient {
            http: builder.build(connector),
            base_url,
        })
    }
}

/// Decodes an enveloped response body into messages.
///
/// Ends after the end-stream frame; an error carried by that frame is
/// yielded as the last item. Trailers are available once the stream is done.
pub struct FrameDecoder<B, T> {
    body: B,
    reader: EnvelopeReader,
    trailers: Option<HeaderMap>,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<B, T> FrameDecoder<B, T> {
    pub fn new(body: B) -> Self {
        Self {
            body,
            reader: EnvelopeReader::new(),
            trailers: None,
            finished: false,
            _marker: PhantomData,
        }
    }

    /// Trailers from the end-stream frame.
    pub fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<B, T> Unpin for FrameDecoder<B, T> where B: Unpin {}

impl<B, T> Stream for FrameDecoder<B, T>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: fmt::Display,
    T: Message + Default,
{
    type Item = Result<T, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            match this.reader.next_frame() {
                Ok(Some(Frame::Message(payload))) => {
                    let message = T::decode(payload)
                        .map_err(|e| ClientError::Decode(format!("protobuf decoding failed: {e}")));
                    return Poll::Ready(Some(message));
                }
                Ok(Some(Frame::EndStream(end))) => {
                    this.finished = true;
                    this.trailers = Some(end.trailers);
                    return Poll::Ready(end.error.map(|status| Err(ClientError::Status(status))));
                }
                Ok(None) => {}
                Err(e) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(ClientError::Protocol(e.to_string()))));
                }
            }

            match Pin::new(&mut this.body).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if let Ok(data) = frame.into_data() {
                        this.reader.push(&data);
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(ClientError::Transport(format!(
                        "stream error: {e}"
                    )))));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    let err = match this.reader.finish() {
                        Err(e) => ClientError::Protocol(e.to_string()),
                        Ok(()) => ClientError::Protocol("stream ended without end-stream frame".into()),
                    };
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
