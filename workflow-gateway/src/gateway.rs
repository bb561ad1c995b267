//! REST/JSON front for the template RPC interface.
//!
//! [`ServeMux`] owns an ordered [`RouteTable`] of handlers. Each request is
//! matched, its body read under a size limit, and a [`CallContext`] built from
//! the `connect-timeout-ms` / `grpc-timeout` headers capped by the configured
//! default. The handler decodes the typed request, calls the backend and
//! forwards the reply.
//!
//! | Method | Path | RPC |
//! |---|---|---|
//! | POST | `/v1/workflow` | `CreateTemplate` |
//! | GET | `/v1/workflows/{id}` | `GetTemplate` |
//! | GET | `/v1/workflows/name/{name}` | `GetTemplateByName` |
//! | PUT | `/v1/workflows/{id}` | `UpdateTemplate` |
//! | DELETE | `/v1/workflows/{id}` | `DeleteTemplate` |
//! | GET | `/v1/workflows` | `ListTemplates` |

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http::header::{self, HeaderValue};
use http::request::Parts;
use http::{Method, Request, StatusCode};
use workflow_gateway_core::{Status, compute_effective_timeout, timeout_from_headers};
use workflow_template::pb::{FilterRequest, GetRequest, WorkflowTemplate};
use workflow_template::{CallContext, TemplateClient, TemplateRpc};

use crate::codec::{
    JSON_CONTENT_TYPE, decode_body, decode_query, error_response, forward_response, path_string,
    path_uuid, read_body,
};
use crate::dispatch::{LocalBackend, StreamingBackend, UnaryBackend};
use crate::route::{PathParams, Pattern, RouteError, RouteMatch, RouteTable};
use crate::stream::{forward_stream, unsupported_stream};

pub const CREATE_PATH: &str = "/v1/workflow";
pub const TEMPLATE_PATH: &str = "/v1/workflows/{id}";
pub const TEMPLATE_BY_NAME_PATH: &str = "/v1/workflows/name/{name}";
pub const LIST_PATH: &str = "/v1/workflows";

/// Default limit on request bodies.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// A matched request, handed to a route handler.
#[derive(Debug)]
pub struct GatewayRequest {
    pub parts: Parts,
    pub body: Bytes,
    pub params: PathParams,
    pub ctx: CallContext,
}

type BoxHandler = Arc<dyn Fn(GatewayRequest) -> BoxFuture<'static, Response> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct GatewayOptions {
    /// Applied when the request carries no timeout header; a smaller header
    /// value still wins.
    pub default_timeout: Option<Duration>,
    pub max_body_bytes: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            default_timeout: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// HTTP request multiplexer.
pub struct ServeMux {
    routes: RouteTable<BoxHandler>,
    options: GatewayOptions,
}

impl Default for ServeMux {
    fn default() -> Self {
        Self::new(GatewayOptions::default())
    }
}

impl ServeMux {
    pub fn new(options: GatewayOptions) -> Self {
        Self {
            routes: RouteTable::new(),
            options,
        }
    }

    /// Register `handler` for `method` and the path `template`.
    pub fn handle<F, Fut>(
        &mut self,
        method: Method,
        template: &str,
        handler: F,
    ) -> Result<(), RouteError>
    where
        F: Fn(GatewayRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let pattern = Pattern::parse(template)?;
        let handler: BoxHandler = Arc::new(move |request| handler(request).boxed());
        self.routes.insert(method, pattern, handler);
        Ok(())
    }

    pub async fn serve_http(&self, request: Request<Body>) -> Response {
        let (parts, body) = request.into_parts();
        let (handler, params) = match self.routes.lookup(&parts.method, parts.uri.path()) {
            RouteMatch::Found { handler, params } => (handler.clone(), params),
            RouteMatch::MethodNotAllowed => return method_not_allowed(),
            RouteMatch::NotFound => return error_response(&Status::not_found("Not Found")),
        };

        let body = match read_body(body, self.options.max_body_bytes).await {
            Ok(body) => body,
            Err(status) => return error_response(&status),
        };

        let timeout = compute_effective_timeout(
            self.options.default_timeout,
            timeout_from_headers(&parts.headers),
        );
        let ctx = CallContext::new().with_timeout(timeout);
        let _cancel = ctx.cancel_on_drop();

        tracing::debug!(method = %parts.method, path = parts.uri.path(), "dispatching gateway request");
        handler(GatewayRequest {
            parts,
            body,
            params,
            ctx,
        })
        .await
    }

    pub fn into_router(self) -> Router {
        let mux = Arc::new(self);
        Router::new().fallback(move |request: Request<Body>| {
            let mux = mux.clone();
            async move { mux.serve_http(request).await }
        })
    }
}

/// 405 for a path registered under a different method.
fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        Status::unimplemented("Method Not Allowed").to_json_bytes(),
    )
        .into_response()
}

/// Routes served by an in-process [`TemplateRpc`]. `ListTemplates` answers
/// `unimplemented`.
pub fn register_local_handlers(
    mux: &mut ServeMux,
    rpc: Arc<dyn TemplateRpc>,
) -> Result<(), RouteError> {
    register_unary_handlers(mux, Arc::new(LocalBackend::new(rpc)))?;
    mux.handle(Method::GET, LIST_PATH, |_request| async {
        error_response(&unsupported_stream())
    })
}

/// Routes served by a remote RPC server, including `ListTemplates`.
pub fn register_client_handlers(
    mux: &mut ServeMux,
    client: TemplateClient,
) -> Result<(), RouteError> {
    let backend = Arc::new(client);
    register_unary_handlers(mux, backend.clone())?;
    mux.handle(Method::GET, LIST_PATH, with_backend(&backend, list_templates::<TemplateClient>))
}

fn register_unary_handlers<B: UnaryBackend>(
    mux: &mut ServeMux,
    backend: Arc<B>,
) -> Result<(), RouteError> {
    mux.handle(Method::POST, CREATE_PATH, with_backend(&backend, create_template::<B>))?;
    mux.handle(Method::GET, TEMPLATE_PATH, with_backend(&backend, get_template::<B>))?;
    mux.handle(
        Method::GET,
        TEMPLATE_BY_NAME_PATH,
        with_backend(&backend, get_template_by_name::<B>),
    )?;
    mux.handle(Method::PUT, TEMPLATE_PATH, with_backend(&backend, update_template::<B>))?;
    mux.handle(Method::DELETE, TEMPLATE_PATH, with_backend(&backend, delete_template::<B>))
}

fn with_backend<B, F, Fut>(
    backend: &Arc<B>,
    call: F,
) -> impl Fn(GatewayRequest) -> BoxFuture<'static, Response> + Send + Sync + 'static
where
    B: Send + Sync + 'static,
    F: Fn(Arc<B>, GatewayRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Status>> + Send + 'static,
{
    let backend = backend.clone();
    move |request| {
        let call = call(backend.clone(), request);
        async move {
            call.await.unwrap_or_else(|status| {
                tracing::debug!(code = status.code().as_str(), error = %status, "gateway call failed");
                error_response(&status)
            })
        }
        .boxed()
    }
}

async fn create_template<B: UnaryBackend>(
    backend: Arc<B>,
    request: GatewayRequest,
) -> Result<Response, Status> {
    let message: WorkflowTemplate = decode_body(&request.body)?;
    let reply = backend.create_template(request.ctx, message).await?;
    Ok(forward_response(reply))
}

async fn get_template<B: UnaryBackend>(
    backend: Arc<B>,
    request: GatewayRequest,
) -> Result<Response, Status> {
    let id = path_uuid(&request.params, "id")?;
    let mut message: GetRequest = decode_query(request.parts.uri.query())?;
    message.id = id.to_string();
    let reply = backend.get_template(request.ctx, message).await?;
    Ok(forward_response(reply))
}

async fn get_template_by_name<B: UnaryBackend>(
    backend: Arc<B>,
    request: GatewayRequest,
) -> Result<Response, Status> {
    let name = path_string(&request.params, "name")?;
    let mut message: GetRequest = decode_query(request.parts.uri.query())?;
    message.name = name;
    let reply = backend.get_template_by_name(request.ctx, message).await?;
    Ok(forward_response(reply))
}

async fn update_template<B: UnaryBackend>(
    backend: Arc<B>,
    request: GatewayRequest,
) -> Result<Response, Status> {
    let id = path_uuid(&request.params, "id")?;
    let mut message: WorkflowTemplate = decode_body(&request.body)?;
    message.id = id.to_string();
    let reply = backend.update_template(request.ctx, message).await?;
    Ok(forward_response(reply))
}

async fn delete_template<B: UnaryBackend>(
    backend: Arc<B>,
    request: GatewayRequest,
) -> Result<Response, Status> {
    let id = path_uuid(&request.params, "id")?;
    let mut message: GetRequest = decode_query(request.parts.uri.query())?;
    message.id = id.to_string();
    let reply = backend.delete_template(request.ctx, message).await?;
    Ok(forward_response(reply))
}

async fn list_templates<B: StreamingBackend>(
    backend: Arc<B>,
    request: GatewayRequest,
) -> Result<Response, Status> {
    let message: FilterRequest = decode_query(request.parts.uri.query())?;
    let reply = backend.list_templates(request.ctx, message).await?;
    Ok(forward_stream(reply).await)
}
