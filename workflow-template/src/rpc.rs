//! RPC surface of the template service and its HTTP server.
//!
//! Unary methods take a protobuf body (`application/proto`) and answer with a
//! protobuf body, or with an HTTP error status and a JSON `{"code","message"}`
//! body. `ListTemplates` is server streaming (`application/connect+proto`): the
//! request is one enveloped message, the response a sequence of enveloped
//! messages closed by an end-stream frame.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures::StreamExt;
use futures::stream::BoxStream;
use http::{HeaderMap, HeaderValue, header};
use prost::Message;
use workflow_gateway_core::{
    Code, EnvelopeReader, Frame, Status, compute_effective_timeout, end_stream_frame,
    timeout_from_headers, wrap_envelope,
};

use crate::context::CallContext;
use crate::pb::{
    CreateResponse, Empty, FilterRequest, GetRequest, WorkflowTemplate, method_path, methods,
};
use crate::service::TemplateService;
use crate::store::{Template, TemplateStore};

pub const UNARY_CONTENT_TYPE: &str = "application/proto";
pub const STREAMING_CONTENT_TYPE: &str = "application/connect+proto";

/// Default limit on request bodies.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024;

pub type RpcStream<T> = BoxStream<'static, Result<T, Status>>;

/// The `workflow.template.v1.TemplateService` interface.
#[async_trait]
pub trait TemplateRpc: Send + Sync + 'static {
    async fn create_template(
        &self,
        ctx: CallContext,
        request: WorkflowTemplate,
    ) -> Result<CreateResponse, Status>;

    async fn get_template(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<WorkflowTemplate, Status>;

    async fn get_template_by_name(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<WorkflowTemplate, Status>;

    async fn delete_template(&self, ctx: CallContext, request: GetRequest) -> Result<Empty, Status>;

    async fn update_template(
        &self,
        ctx: CallContext,
        request: WorkflowTemplate,
    ) -> Result<Empty, Status>;

    async fn list_templates(
        &self,
        ctx: CallContext,
        request: FilterRequest,
    ) -> Result<RpcStream<WorkflowTemplate>, Status>;
}

impl From<Template> for WorkflowTemplate {
    fn from(template: Template) -> Self {
        Self {
            id: template.id.to_string(),
            name: template.name,
            data: template.data,
            created_at: Some(template.created_at.into()),
            updated_at: Some(template.updated_at.into()),
        }
    }
}

#[async_trait]
impl<S: TemplateStore> TemplateRpc for TemplateService<S> {
    async fn create_template(
        &self,
        ctx: CallContext,
        request: WorkflowTemplate,
    ) -> Result<CreateResponse, Status> {
        let id = self.create(&ctx, &request.name, &request.data).await?;
        Ok(CreateResponse { id: id.to_string() })
    }

    async fn get_template(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<WorkflowTemplate, Status> {
        Ok(self.get_by_id(&ctx, &request.id).await?.into())
    }

    async fn get_template_by_name(
        &self,
        ctx: CallContext,
        request: GetRequest,
    ) -> Result<WorkflowTemplate, Status> {
        Ok(self.get_by_name(&ctx, &request.name).await?.into())
    }

    async fn delete_template(&self, ctx: CallContext, request: GetRequest) -> Result<Empty, Status> {
        self.delete(&ctx, &request.id, &request.name).await?;
        Ok(Empty {})
    }

    async fn update_template(
        &self,
        ctx: CallContext,
        request: WorkflowTemplate,
    ) -> Result<Empty, Status> {
        self.update(&ctx, &request.id, &request.name, &request.data)
            .await?;
        Ok(Empty {})
    }

    async fn list_templates(
        &self,
        ctx: CallContext,
        request: FilterRequest,
    ) -> Result<RpcStream<WorkflowTemplate>, Status> {
        let records = self.list(&ctx, &request.filter).await?;
        Ok(records
            .map(|record| {
                record.map(|template| WorkflowTemplate {
                    data: String::new(),
                    ..template.into()
                })
                .map_err(Status::from)
            })
            .boxed())
    }
}

/// Server-side limits applied by [`rpc_router`].
#[derive(Clone, Debug)]
pub struct RpcOptions {
    /// Upper bound on every call; a smaller client timeout still wins.
    pub server_timeout: Option<Duration>,
    pub max_request_bytes: usize,
}

impl Default for RpcOptions {
    fn default() -> Self {
        Self {
            server_timeout: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

#[derive(Clone)]
struct RpcState {
    rpc: Arc<dyn TemplateRpc>,
    server_timeout: Option<Duration>,
    max_request_bytes: usize,
}

impl RpcState {
    fn call_context(&self, headers: &HeaderMap) -> CallContext {
        let timeout = compute_effective_timeout(self.server_timeout, timeout_from_headers(headers));
        CallContext::new().with_timeout(timeout)
    }

    async fn read_body(&self, body: Body) -> Result<Bytes, Status> {
        axum::body::to_bytes(body, self.max_request_bytes)
            .await
            .map_err(|e| {
                Status::new(
                    Code::ResourceExhausted,
                    format!("failed to read request body: {e}"),
                )
            })
    }
}

/// Router serving every method at `/<service>/<method>`.
pub fn rpc_router(rpc: Arc<dyn TemplateRpc>, options: RpcOptions) -> Router {
    let state = RpcState {
        rpc,
        server_timeout: options.server_timeout,
        max_request_bytes: options.max_request_bytes,
    };

    Router::new()
        .route(&method_path(methods::CREATE_TEMPLATE), post(create_template))
        .route(&method_path(methods::GET_TEMPLATE), post(get_template))
        .route(
            &method_path(methods::GET_TEMPLATE_BY_NAME),
            post(get_template_by_name),
        )
        .route(&method_path(methods::DELETE_TEMPLATE), post(delete_template))
        .route(&method_path(methods::UPDATE_TEMPLATE), post(update_template))
        .route(&method_path(methods::LIST_TEMPLATES), post(list_templates))
        .with_state(state)
}

async fn create_template(State(state): State<RpcState>, headers: HeaderMap, body: Body) -> Response {
    let rpc = state.rpc.clone();
    unary(&state, &headers, body, move |ctx, request: WorkflowTemplate| async move {
        rpc.create_template(ctx, request).await
    })
    .await
}

async fn get_template(State(state): State<RpcState>, headers: HeaderMap, body: Body) -> Response {
    let rpc = state.rpc.clone();
    unary(&state, &headers, body, move |ctx, request: GetRequest| async move {
        rpc.get_template(ctx, request).await
    })
    .await
}

async fn get_template_by_name(
    State(state): State<RpcState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let rpc = state.rpc.clone();
    unary(&state, &headers, body, move |ctx, request: GetRequest| async move {
        rpc.get_template_by_name(ctx, request).await
    })
    .await
}

async fn delete_template(State(state): State<RpcState>, headers: HeaderMap, body: Body) -> Response {
    let rpc = state.rpc.clone();
    unary(&state, &headers, body, move |ctx, request: GetRequest| async move {
        rpc.delete_template(ctx, request).await
    })
    .await
}

async fn update_template(State(state): State<RpcState>, headers: HeaderMap, body: Body) -> Response {
    let rpc = state.rpc.clone();
    unary(&state, &headers, body, move |ctx, request: WorkflowTemplate| async move {
        rpc.update_template(ctx, request).await
    })
    .await
}

async fn unary<Req, Res, F, Fut>(
    state: &RpcState,
    headers: &HeaderMap,
    body: Body,
    call: F,
) -> Response
where
    Req: Message + Default,
    Res: Message,
    F: FnOnce(CallContext, Req) -> Fut,
    Fut: Future<Output = Result<Res, Status>>,
{
    if let Err(status) = check_content_type(headers, UNARY_CONTENT_TYPE) {
        return error_response(status);
    }
    let body = match state.read_body(body).await {
        Ok(body) => body,
        Err(status) => return error_response(status),
    };
    let request = match Req::decode(body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(Status::invalid_argument(format!(
                "failed to decode request: {e}"
            )));
        }
    };

    let ctx = state.call_context(headers);
    let _cancel = ctx.cancel_on_drop();
    match call(ctx, request).await {
        Ok(response) => (
            [(header::CONTENT_TYPE, HeaderValue::from_static(UNARY_CONTENT_TYPE))],
            response.encode_to_vec(),
        )
            .into_response(),
        Err(status) => error_response(status),
    }
}

async fn list_templates(State(state): State<RpcState>, headers: HeaderMap, body: Body) -> Response {
    if let Err(status) = check_content_type(&headers, STREAMING_CONTENT_TYPE) {
        return error_response(status);
    }
    let body = match state.read_body(body).await {
        Ok(body) => body,
        Err(status) => return stream_response(Err(status), None),
    };
    let request: FilterRequest = match decode_enveloped(&body) {
        Ok(request) => request,
        Err(status) => return stream_response(Err(status), None),
    };

    let ctx = state.call_context(&headers);
    let cancel = ctx.cancel_on_drop();
    let result = state.rpc.list_templates(ctx, request).await;
    stream_response(result, Some(cancel))
}

fn decode_enveloped<T: Message + Default>(body: &[u8]) -> Result<T, Status> {
    let mut reader = EnvelopeReader::new();
    reader.push(body);
    match reader.next_frame() {
        Ok(Some(Frame::Message(payload))) => T::decode(payload)
            .map_err(|e| Status::invalid_argument(format!("failed to decode request: {e}"))),
        Ok(_) => Err(Status::invalid_argument("missing request message")),
        Err(e) => Err(Status::invalid_argument(e.to_string())),
    }
}

fn stream_response(
    result: Result<RpcStream<WorkflowTemplate>, Status>,
    cancel: Option<tokio_util::sync::DropGuard>,
) -> Response {
    let frames = async_stream::stream! {
        let _cancel = cancel;
        let trailers = HeaderMap::new();
        let mut messages = match result {
            Ok(messages) => messages,
            Err(status) => {
                yield Ok::<_, std::convert::Infallible>(Bytes::from(end_stream_frame(Some(&status), &trailers)));
                return;
            }
        };
        while let Some(item) = messages.next().await {
            match item {
                Ok(message) => yield Ok(Bytes::from(wrap_envelope(&message.encode_to_vec()))),
                Err(status) => {
                    yield Ok(Bytes::from(end_stream_frame(Some(&status), &trailers)));
                    return;
                }
            }
        }
        yield Ok(Bytes::from(end_stream_frame(None, &trailers)));
    };

    (
        [(header::CONTENT_TYPE, HeaderValue::from_static(STREAMING_CONTENT_TYPE))],
        Body::from_stream(frames),
    )
        .into_response()
}

fn check_content_type(headers: &HeaderMap, expected: &str) -> Result<(), Status> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    if essence.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Status::invalid_argument(format!(
            "unsupported content-type {content_type:?}, expected {expected:?}"
        )))
    }
}

/// Unary error response: mapped HTTP status and JSON body.
pub fn error_response(status: Status) -> Response {
    (
        status.http_status(),
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        status.to_json_bytes(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use workflow_gateway_core::Code;

    use super::*;
    use crate::readiness::ReadinessFlag;
    use crate::store::MemoryStore;

    fn router(ready: bool) -> Router {
        let readiness = if ready {
            ReadinessFlag::ready()
        } else {
            ReadinessFlag::new()
        };
        let service = TemplateService::new(Arc::new(MemoryStore::new()), Arc::new(readiness));
        rpc_router(Arc::new(service), RpcOptions::default())
    }

    fn unary_request(method: &str, message: &impl Message) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(method_path(method))
            .header(header::CONTENT_TYPE, UNARY_CONTENT_TYPE)
            .body(Body::from(message.encode_to_vec()))
            .unwrap()
    }

    async fn call<T: Message + Default>(
        router: &Router,
        method: &str,
        message: &impl Message,
    ) -> Result<T, Status> {
        let response = router
            .clone()
            .oneshot(unary_request(method, message))
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        if status == StatusCode::OK {
            Ok(T::decode(body).unwrap())
        } else {
            Err(serde_json::from_slice(&body).unwrap())
        }
    }

    fn template(name: &str, data: &str) -> WorkflowTemplate {
        WorkflowTemplate {
            name: name.into(),
            data: data.into(),
            ..Default::default()
        }
    }

    async fn list(router: &Router, filter: &str) -> Vec<Frame> {
        let request = Request::builder()
            .method("POST")
            .uri(method_path(methods::LIST_TEMPLATES))
            .header(header::CONTENT_TYPE, STREAMING_CONTENT_TYPE)
            .body(Body::from(wrap_envelope(
                &FilterRequest {
                    filter: filter.into(),
                }
                .encode_to_vec(),
            )))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let mut reader = EnvelopeReader::new();
        reader.push(&body);
        let mut frames = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_unary_create_get_delete() {
        let router = router(true);

        let created: CreateResponse = call(&router, methods::CREATE_TEMPLATE, &template("build", "x"))
            .await
            .unwrap();

        let request = GetRequest {
            id: created.id.clone(),
            ..Default::default()
        };
        let fetched: WorkflowTemplate = call(&router, methods::GET_TEMPLATE, &request)
            .await
            .unwrap();
        assert_eq!(fetched.name, "build");
        assert_eq!(fetched.data, "x");

        let _: Empty = call(&router, methods::DELETE_TEMPLATE, &request).await.unwrap();
        let err = call::<WorkflowTemplate>(&router, methods::GET_TEMPLATE, &request)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_conflict() {
        let router = router(true);
        let first = template("build", "x");
        let _: CreateResponse = call(&router, methods::CREATE_TEMPLATE, &first).await.unwrap();

        let response = router
            .clone()
            .oneshot(unary_request(methods::CREATE_TEMPLATE, &first))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_update_with_malformed_id() {
        let router = router(true);
        let request = WorkflowTemplate {
            id: "42".into(),
            ..template("build", "x")
        };
        let err = call::<Empty>(&router, methods::UPDATE_TEMPLATE, &request)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_rejected() {
        let request = Request::builder()
            .method("POST")
            .uri(method_path(methods::GET_TEMPLATE))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = router(true).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_request_body_limit() {
        let large = template("large", &"x".repeat(3 * 1024 * 1024));
        let _: CreateResponse = call(&router(true), methods::CREATE_TEMPLATE, &large)
            .await
            .unwrap();

        let service = TemplateService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ReadinessFlag::ready()),
        );
        let limited = rpc_router(
            Arc::new(service),
            RpcOptions {
                max_request_bytes: 1024,
                ..Default::default()
            },
        );
        let response = limited
            .oneshot(unary_request(methods::CREATE_TEMPLATE, &large))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: Status = serde_json::from_slice(&body).unwrap();
        assert_eq!(status.code(), Code::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_list_streams_summaries_then_end_stream() {
        let router = router(true);
        for name in ["build", "deploy", "build-mac"] {
            let _: CreateResponse = call(&router, methods::CREATE_TEMPLATE, &template(name, "body"))
                .await
                .unwrap();
        }

        let frames = list(&router, "build*").await;
        assert_eq!(frames.len(), 3);

        let names: Vec<_> = frames[..2]
            .iter()
            .map(|frame| match frame {
                Frame::Message(payload) => {
                    let template = WorkflowTemplate::decode(payload.clone()).unwrap();
                    assert!(template.data.is_empty());
                    assert!(template.created_at.is_some());
                    template.name
                }
                Frame::EndStream(_) => panic!("unexpected end of stream"),
            })
            .collect();
        assert_eq!(names, ["build", "build-mac"]);
        assert!(matches!(&frames[2], Frame::EndStream(end) if end.error.is_none()));
    }

    #[tokio::test]
    async fn test_list_not_ready_ends_stream_with_error() {
        let frames = list(&router(false), "").await;

        assert_eq!(frames.len(), 1);
        let Frame::EndStream(end) = &frames[0] else {
            panic!("expected end-stream frame");
        };
        let status = end.error.as_ref().unwrap();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), Some("DB is not ready"));
    }
}
