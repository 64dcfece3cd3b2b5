//! Document API endpoints

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{DocumentError, Result};
use crate::{AddedDocument, DmssClient, DocumentStore};

impl DmssClient {
    fn authorized(&self, request: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        request
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", token))
            .header("Access-Key", token)
    }
}

#[async_trait]
impl DocumentStore for DmssClient {
    async fn get_document(&self, reference: &str, depth: u32, token: &str) -> Result<Value> {
        debug!("Fetching document {} (depth {})", reference, depth);

        let request = self
            .client
            .get(self.documents_url(reference))
            .query(&[("depth", depth)]);
        let response = self.authorized(request, token).send().await?;

        self.handle_response(reference, response).await
    }

    async fn update_document(
        &self,
        reference: &str,
        document: &Value,
        token: &str,
    ) -> Result<Value> {
        debug!("Updating document {}", reference);

        let data = serde_json::to_string(document)
            .map_err(|e| DocumentError::ParseError(format!("Failed to serialize document: {}", e)))?;
        let request = self
            .client
            .put(self.documents_url(reference))
            .form(&[("data", data)]);
        let response = self.authorized(request, token).send().await?;

        self.handle_response(reference, response).await
    }

    async fn add_document(
        &self,
        parent: &str,
        document: &Value,
        token: &str,
    ) -> Result<AddedDocument> {
        debug!("Adding document below {}", parent);

        let data = serde_json::to_string(document)
            .map_err(|e| DocumentError::ParseError(format!("Failed to serialize document: {}", e)))?;
        let request = self
            .client
            .post(self.documents_url(parent))
            .form(&[("document", data)]);
        let response = self.authorized(request, token).send().await?;

        self.handle_response(parent, response).await
    }

    async fn get_credential(&self) -> Result<String> {
        let service_token = self
            .service_token
            .as_deref()
            .ok_or(DocumentError::MissingCredential)?;

        let request = self.client.post(self.token_url());
        let response = self.authorized(request, service_token).send().await?;

        self.handle_response("token", response).await
    }
}
