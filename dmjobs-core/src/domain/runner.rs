//! Runner descriptor
//!
//! The `runner` attribute of a job document names the execution backend that
//! should run the job. The engine only reads `type`; every other attribute is
//! backend specific and is interpreted by the handler through [`Runner::view`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Runner descriptor of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runner {
    /// Runner type, used to resolve the job handler
    #[serde(rename = "type")]
    pub runner_type: String,

    /// Backend specific attributes
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Runner {
    pub fn new(runner_type: impl Into<String>) -> Self {
        Self {
            runner_type: runner_type.into(),
            attributes: Map::new(),
        }
    }

    /// Adds a backend specific attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Deserializes the descriptor into a handler's typed view
    pub fn view<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}
