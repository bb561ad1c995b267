//! HTTP/JSON gateway for the workflow template RPC interface.
//!
//! - [`route`]: path templates and the ordered route table
//! - [`codec`]: JSON request decoding and response encoding
//! - [`stream`]: server-streaming responses as newline-delimited JSON
//! - [`dispatch`]: in-process and remote backends
//! - [`gateway`]: the [`ServeMux`] and handler registration
//!
//! ```ignore
//! use workflow_gateway::{ServeMux, register_client_handlers};
//! use workflow_template::TemplateClient;
//!
//! let client = TemplateClient::builder("http://127.0.0.1:42113").build()?;
//! let mut mux = ServeMux::default();
//! register_client_handlers(&mut mux, client)?;
//! let app = mux.into_router();
//! ```

pub mod codec;
pub mod dispatch;
pub mod gateway;
pub mod route;
pub mod stream;

pub use dispatch::{LocalBackend, StreamingBackend, UnaryBackend};
pub use gateway::{
    GatewayOptions, GatewayRequest, ServeMux, register_client_handlers, register_local_handlers,
};
pub use route::{PathParams, Pattern, RouteError, RouteMatch, RouteTable, Segment};
