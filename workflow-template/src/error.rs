//! Service-level errors and their transport classification.

use workflow_gateway_core::{Code, Status};

use crate::context::Interrupted;
use crate::store::{DbDetail, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("template name {0:?} already exists")]
    DuplicateName(String),

    #[error("template not found")]
    NotFound,

    #[error("DB is not ready")]
    NotReady,

    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error(transparent)]
    Store(StoreError),
}

impl TemplateError {
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        TemplateError::Malformed(message.into())
    }

    pub fn code(&self) -> Code {
        match self {
            TemplateError::DuplicateName(_) => Code::AlreadyExists,
            TemplateError::NotFound => Code::NotFound,
            TemplateError::NotReady => Code::Unavailable,
            TemplateError::Malformed(_) => Code::InvalidArgument,
            TemplateError::Interrupted(Interrupted::Cancelled) => Code::Canceled,
            TemplateError::Interrupted(Interrupted::DeadlineExceeded) => Code::DeadlineExceeded,
            TemplateError::Store(_) => Code::Internal,
        }
    }

    /// Database detail of a backend failure, if any.
    pub fn db_detail(&self) -> Option<&DbDetail> {
        match self {
            TemplateError::Store(err) => err.db_detail(),
            _ => None,
        }
    }
}

impl From<StoreError> for TemplateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateName(name) => TemplateError::DuplicateName(name),
            StoreError::NotFound => TemplateError::NotFound,
            other => TemplateError::Store(other),
        }
    }
}

impl From<TemplateError> for Status {
    fn from(err: TemplateError) -> Self {
        Status::new(err.code(), err.to_string())
    }
}
