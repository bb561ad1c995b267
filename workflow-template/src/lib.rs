//! Workflow template service.
//!
//! - [`service`]: the CRUD facade over a [`store::TemplateStore`]
//! - [`observe`]: per-call metrics and error logging
//! - [`rpc`]: the `workflow.template.v1.TemplateService` interface and its HTTP server
//! - [`client`]: client for a remote RPC server
//! - [`pb`]: wire messages
//!
//! ```ignore
//! use std::sync::Arc;
//! use workflow_template::{MemoryStore, ReadinessFlag, TemplateService, rpc_router, RpcOptions};
//!
//! let readiness = Arc::new(ReadinessFlag::new());
//! let service = TemplateService::new(Arc::new(MemoryStore::new()), readiness.clone());
//! readiness.mark_ready();
//!
//! let app = rpc_router(Arc::new(service), RpcOptions::default());
//! ```

pub mod client;
pub mod context;
pub mod error;
pub mod filter;
pub mod observe;
pub mod pb;
pub mod readiness;
pub mod rpc;
pub mod service;
pub mod store;

pub use client::{ClientError, FrameDecoder, RpcReply, TemplateClient, TemplateClientBuilder};
pub use context::{CallContext, Interrupted};
pub use error::TemplateError;
pub use filter::NameFilter;
pub use observe::describe_metrics;
pub use readiness::{ReadinessFlag, ReadinessSource};
pub use rpc::{RpcOptions, RpcStream, TemplateRpc, rpc_router};
pub use service::TemplateService;
pub use store::{DbDetail, MemoryStore, StoreError, Template, TemplateKey, TemplateStore};
