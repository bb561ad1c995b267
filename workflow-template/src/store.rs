//! Backing store interface.
//!
//! The facade only talks to a [`TemplateStore`]. [`MemoryStore`] is the
//! in-process implementation.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::filter::NameFilter;

/// A stored workflow template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a single template is addressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateKey {
    Id(Uuid),
    Name(String),
}

impl std::fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateKey::Id(id) => write!(f, "id {id}"),
            TemplateKey::Name(name) => write!(f, "name {name:?}"),
        }
    }
}

/// Extra context a database backend attaches to a failure.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DbDetail {
    /// Detail line reported by the database.
    pub detail: String,
    /// Where in the backend the error was raised.
    pub location: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("template name {0:?} already exists")]
    DuplicateName(String),

    #[error("template not found")]
    NotFound,

    #[error("store failure: {message}")]
    Backend {
        message: String,
        detail: Option<DbDetail>,
    },
}

impl StoreError {
    pub fn backend<S: Into<String>>(message: S) -> Self {
        StoreError::Backend {
            message: message.into(),
            detail: None,
        }
    }

    /// Database detail, when the backend reported one.
    pub fn db_detail(&self) -> Option<&DbDetail> {
        match self {
            StoreError::Backend { detail, .. } => detail.as_ref(),
            _ => None,
        }
    }
}

pub type TemplateRecords = BoxStream<'static, Result<Template, StoreError>>;

/// Persistence for workflow templates.
///
/// Names are unique among live records: `create_template` and
/// `update_template` must check and write atomically.
#[async_trait]
pub trait TemplateStore: Send + Sync + 'static {
    async fn create_template(&self, id: Uuid, name: &str, data: &str) -> Result<(), StoreError>;

    async fn get_template_by_id(&self, id: Uuid) -> Result<Template, StoreError>;

    async fn get_template_by_name(&self, name: &str) -> Result<Template, StoreError>;

    /// Replace name and data of the template with `id`.
    async fn update_template(&self, id: Uuid, name: &str, data: &str) -> Result<(), StoreError>;

    /// Remove a template. Removing a missing template succeeds.
    async fn delete_template(&self, key: &TemplateKey) -> Result<(), StoreError>;

    /// Templates whose name matches `filter`, in store enumeration order.
    async fn list_templates(&self, filter: NameFilter) -> Result<TemplateRecords, StoreError>;
}
