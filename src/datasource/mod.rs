//! Datasource records and resolution
//!
//! A datasource is one configured log backend: its engine kind, endpoint and
//! an open configuration document holding auth, TLS and engine options.

pub mod config;
pub mod resolver;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::EngineKind;

pub use config::{
    AuthConfig, Credentials, DatasourceConfig, EsOptions, HttpOptions, LogFields, TlsConfig,
};
pub use resolver::{DatasourceResolver, ResolvedDatasource};

/// Stored datasource record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: EngineKind,
    /// Authoritative when non-empty; otherwise `config.endpoint` is used
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub config: Value,
}

impl Datasource {
    pub fn new(name: impl Into<String>, kind: EngineKind, endpoint: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            kind,
            endpoint: endpoint.into(),
            config: Value::Null,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Decode the configuration document.
    pub fn typed_config(&self) -> DatasourceConfig {
        DatasourceConfig::from_document(&self.config)
    }
}
