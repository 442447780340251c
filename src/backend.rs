//! Persistence collaborator. Only `build_document` talks to it; the compile
//! pass itself never does.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Template;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub entry: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTemplate {
    pub label: String,
    pub entry: Value,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub width_auto: Option<bool>,
}

/// Document and template CRUD.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_document(&self, id: &str, locale: Option<&str>) -> anyhow::Result<Document>;

    async fn create_document(&self, entry: Value) -> anyhow::Result<Document>;

    async fn update_document(&self, document: Document) -> anyhow::Result<Document>;

    async fn get_template(&self, id: &str) -> anyhow::Result<Template>;

    async fn get_templates(&self) -> anyhow::Result<Vec<Template>>;

    async fn create_template(&self, template: NewTemplate) -> anyhow::Result<Template>;

    async fn update_template(&self, id: &str, label: &str) -> anyhow::Result<Template>;

    async fn delete_template(&self, id: &str) -> anyhow::Result<()>;
}
