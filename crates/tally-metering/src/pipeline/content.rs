//! Content rendering seam
//!
//! The gate only meters access; producing the payload belongs to a
//! [`ContentSource`] supplied by the embedding service.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tally_core::effects::DistributionToken;
use tally_core::{ContentId, Result, TallyError};
use tokio::sync::RwLock;

/// Produces the payload served for a distribution token
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Render the token's content in `language`
    async fn render(&self, token: &DistributionToken, language: &str) -> Result<Value>;
}

#[async_trait]
impl<T: ContentSource + ?Sized> ContentSource for Arc<T> {
    async fn render(&self, token: &DistributionToken, language: &str) -> Result<Value> {
        (**self).render(token, language).await
    }
}

/// Fixed payloads keyed by content id, for tests and the simulator
#[derive(Debug, Default)]
pub struct StaticContentSource {
    payloads: RwLock<HashMap<ContentId, Value>>,
}

impl StaticContentSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the payload served for `content`
    pub async fn insert(&self, content: ContentId, payload: Value) {
        self.payloads.write().await.insert(content, payload);
    }
}

#[async_trait]
impl ContentSource for StaticContentSource {
    async fn render(&self, token: &DistributionToken, language: &str) -> Result<Value> {
        let payloads = self.payloads.read().await;
        let payload = payloads
            .get(&token.content)
            .cloned()
            .ok_or_else(|| TallyError::invalid(format!("no content for {}", token.content)))?;
        Ok(serde_json::json!({
            "contentId": token.content.as_str(),
            "language": language,
            "body": payload,
        }))
    }
}
