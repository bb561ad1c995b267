//! Core protocol types for the workflow template service.
//!
//! This crate provides the types shared by the RPC server, the connected RPC
//! client and the REST gateway.
//!
//! ## Modules
//!
//! - [`error`]: Status codes, the transport-level [`Status`] error and its HTTP mapping
//! - [`envelope`]: Streaming envelope framing
//! - [`metadata`]: Header/trailer metadata produced by a call
//! - [`timeout`]: Deadline header parsing

mod envelope;
mod error;
mod metadata;
mod timeout;

pub use envelope::*;
pub use error::*;
pub use metadata::*;
pub use timeout::*;
