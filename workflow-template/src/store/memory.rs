use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreError, Template, TemplateKey, TemplateRecords, TemplateStore};
use crate::filter::NameFilter;

/// In-memory template store. Enumerates in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    templates: RwLock<Vec<Template>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.templates.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.templates.read().await.is_empty()
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn create_template(&self, id: Uuid, name: &str, data: &str) -> Result<(), StoreError> {
        let mut templates = self.templates.write().await;
        if templates.iter().any(|t| t.name == name) {
            return Err(StoreError::DuplicateName(name.to_owned()));
        }
        if templates.iter().any(|t| t.id == id) {
            return Err(StoreError::backend(format!("id {id} already in use")));
        }

        let now = Utc::now();
        templates.push(Template {
            id,
            name: name.to_owned(),
            data: data.to_owned(),
            created_at: now,
            updated_at: now,
        });
        Ok(())
    }

    async fn get_template_by_id(&self, id: Uuid) -> Result<Template, StoreError> {
        let templates = self.templates.read().await;
        templates
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_template_by_name(&self, name: &str) -> Result<Template, StoreError> {
        let templates = self.templates.read().await;
        templates
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_template(&self, id: Uuid, name: &str, data: &str) -> Result<(), StoreError> {
        let mut templates = self.templates.write().await;
        if templates.iter().any(|t| t.name == name && t.id != id) {
            return Err(StoreError::DuplicateName(name.to_owned()));
        }

        let template = templates
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StoreError::NotFound)?;
        template.name = name.to_owned();
        template.data = data.to_owned();
        template.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_template(&self, key: &TemplateKey) -> Result<(), StoreError> {
        let mut templates = self.templates.write().await;
        templates.retain(|t| match key {
            TemplateKey::Id(id) => t.id != *id,
            TemplateKey::Name(name) => t.name != *name,
        });
        Ok(())
    }

    async fn list_templates(&self, filter: NameFilter) -> Result<TemplateRecords, StoreError> {
        let matching: Vec<Template> = self
            .templates
            .read()
            .await
            .iter()
            .filter(|t| filter.matches(&t.name))
            .cloned()
            .collect();
        Ok(futures::stream::iter(matching.into_iter().map(Ok)).boxed())
    }
}
