//! dmjobs Document Store Client
//!
//! The engine's only view of the external document store (DMSS). It reads job
//! definitions from there and writes the domain-visible job state back.
//!
//! This crate provides:
//! - [`DocumentStore`]: the contract the engine depends on
//! - [`DmssClient`]: the HTTP implementation
//! - [`memory::InMemoryDocumentStore`]: an in-process implementation for
//!   embedding and tests
//!
//! # Example
//!
//! ```no_run
//! use dmjobs_client::{DmssClient, DocumentStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = DmssClient::new("http://localhost:5000");
//!     let job = client
//!         .get_document("dmss://WorkflowDS/$my-job", 0, "access-token")
//!         .await?;
//!
//!     println!("Job type: {}", job["type"]);
//!     Ok(())
//! }
//! ```

mod documents;
pub mod error;
pub mod memory;

pub use error::{DocumentError, Result};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Answer of the document store after adding a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddedDocument {
    pub uid: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Operations the engine consumes from the document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetches the document at `reference`, resolving references `depth` levels deep
    async fn get_document(&self, reference: &str, depth: u32, token: &str) -> Result<Value>;

    /// Replaces the document at `reference`
    async fn update_document(&self, reference: &str, document: &Value, token: &str)
    -> Result<Value>;

    /// Adds `document` below `parent`, e.g. appending to a list attribute
    async fn add_document(&self, parent: &str, document: &Value, token: &str)
    -> Result<AddedDocument>;

    /// Obtains a long lived credential for the engine's own calls
    async fn get_credential(&self) -> Result<String>;
}

/// HTTP client for the DMSS API
#[derive(Debug, Clone)]
pub struct DmssClient {
    /// Base URL of the document store (e.g., "http://dmss:5000")
    base_url: String,
    /// Token used to mint access tokens when a caller did not supply one
    service_token: Option<String>,
    /// HTTP client instance
    client: Client,
}

impl DmssClient {
    /// Create a new client with reqwest's default settings
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client whose requests time out after `timeout`
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Create a new client with a custom HTTP client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_token: None,
            client,
        }
    }

    /// Sets the token used by [`DocumentStore::get_credential`]
    pub fn with_service_token(mut self, token: impl Into<String>) -> Self {
        self.service_token = Some(token.into());
        self
    }

    /// Get the base URL of the document store
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn documents_url(&self, reference: &str) -> String {
        format!("{}/api/documents/{}", self.base_url, reference)
    }

    fn token_url(&self) -> String {
        format!("{}/api/token", self.base_url)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Checks the status code and deserializes the JSON body
    ///
    /// A 404 becomes [`DocumentError::NotFound`] carrying `reference`.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        reference: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DocumentError::NotFound(reference.to_string()));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DocumentError::api_error(status.as_u16(), error_text));
        }

        response.json().await.map_err(|e| {
            DocumentError::ParseError(format!("Failed to parse JSON response: {}", e))
        })
    }
}
