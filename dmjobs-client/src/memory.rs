//! In-memory document store
//!
//! Keeps documents in a map keyed by their canonical reference. Dotted
//! attribute paths (`schedule.runs[0]`, `jobs.0`) are resolved inside the
//! stored document, and [`DocumentStore::add_document`] under a list attribute
//! appends to it while also making the new document addressable by id.

use std::collections::HashMap;

use async_trait::async_trait;
use dmjobs_core::domain::reference::Reference;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{DocumentError, Result};
use crate::{AddedDocument, DocumentStore};

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Key(String),
    Index(usize),
}

fn steps(attribute: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    for segment in attribute.split('.') {
        let (key, indices) = match segment.find('[') {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };
        if !key.is_empty() {
            steps.push(Step::Key(key.to_string()));
        }
        for index in indices
            .split(['[', ']'])
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
        {
            steps.push(Step::Index(index));
        }
    }
    steps
}

fn navigate_mut<'a>(mut value: &'a mut Value, steps: &[Step]) -> Option<&'a mut Value> {
    for step in steps {
        value = match (step, value) {
            (Step::Key(key), Value::Object(fields)) => fields.get_mut(key)?,
            (Step::Key(key), Value::Array(items)) => items.get_mut(key.parse::<usize>().ok()?)?,
            (Step::Index(index), Value::Array(items)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Document store held in process memory
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Value>>,
    credential: String,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            credential: Uuid::new_v4().to_string(),
        }
    }

    /// Stores `document` at `reference`, replacing any previous document
    pub async fn insert(&self, reference: &str, document: Value) -> Result<()> {
        let key = Reference::parse(reference)?.document().to_string();
        self.documents.write().await.insert(key, document);
        Ok(())
    }

    /// Current document at `reference`, attribute paths included
    pub async fn snapshot(&self, reference: &str) -> Option<Value> {
        self.read(reference).await.ok()
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    async fn read(&self, reference: &str) -> Result<Value> {
        let parsed = Reference::parse(reference)?;
        let mut documents = self.documents.write().await;
        let document = documents
            .get_mut(&parsed.document().to_string())
            .ok_or_else(|| DocumentError::NotFound(reference.to_string()))?;

        let path = steps(parsed.attribute.as_deref().unwrap_or_default());
        navigate_mut(document, &path)
            .map(|value| value.clone())
            .ok_or_else(|| DocumentError::NotFound(reference.to_string()))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, reference: &str, _depth: u32, _token: &str) -> Result<Value> {
        self.read(reference).await
    }

    async fn update_document(
        &self,
        reference: &str,
        document: &Value,
        _token: &str,
    ) -> Result<Value> {
        let parsed = Reference::parse(reference)?;
        let mut documents = self.documents.write().await;
        let stored = documents
            .get_mut(&parsed.document().to_string())
            .ok_or_else(|| DocumentError::NotFound(reference.to_string()))?;

        let path = steps(parsed.attribute.as_deref().unwrap_or_default());
        let target = navigate_mut(stored, &path)
            .ok_or_else(|| DocumentError::NotFound(reference.to_string()))?;
        *target = document.clone();
        Ok(document.clone())
    }

    async fn add_document(
        &self,
        parent: &str,
        document: &Value,
        _token: &str,
    ) -> Result<AddedDocument> {
        let parsed = Reference::parse(parent)?;
        let uid = Uuid::new_v4().to_string();

        let mut child = document.clone();
        if let Value::Object(fields) = &mut child {
            fields.insert("_id".to_string(), Value::String(uid.clone()));
        }

        let mut documents = self.documents.write().await;
        if let Some(attribute) = parsed.attribute.as_deref() {
            let stored = documents
                .get_mut(&parsed.document().to_string())
                .ok_or_else(|| DocumentError::NotFound(parent.to_string()))?;
            match navigate_mut(stored, &steps(attribute)) {
                Some(Value::Array(items)) => items.push(child.clone()),
                _ => return Err(DocumentError::NotFound(parent.to_string())),
            }
        }

        let key = Reference::by_id(&parsed.protocol, &parsed.data_source, &uid).to_string();
        documents.insert(key, child);

        Ok(AddedDocument {
            uid,
            attributes: Map::new(),
        })
    }

    async fn get_credential(&self) -> Result<String> {
        Ok(self.credential.clone())
    }
}
