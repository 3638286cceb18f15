//! Log engine clients
//!
//! Each supported backend has a client that renders a logical query into the
//! backend's HTTP request and flattens the backend's response into
//! [`NormalizedRow`]s. [`Engine`] dispatches on the engine kind so callers never
//! branch on engine names themselves.

pub mod elasticsearch;
pub mod fields;
pub mod loki;
pub mod transport;
pub mod victorialogs;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::datasource::DatasourceConfig;

pub use elasticsearch::ElasticsearchClient;
pub use loki::{LabelFilter, LokiBuilder, LokiClient, LokiQueryType};
pub use transport::{build_client, EngineRequest, HttpMethod};
pub use victorialogs::VictoriaLogsClient;

/// Supported log backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Loki,
    Elasticsearch,
    #[serde(alias = "victoria_logs")]
    VictoriaLogs,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Loki => "loki",
            EngineKind::Elasticsearch => "elasticsearch",
            EngineKind::VictoriaLogs => "victorialogs",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = UnknownEngine;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "loki" => Ok(EngineKind::Loki),
            "elasticsearch" | "es" => Ok(EngineKind::Elasticsearch),
            "victorialogs" | "victoria_logs" => Ok(EngineKind::VictoriaLogs),
            _ => Err(UnknownEngine(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported engine: {0}")]
pub struct UnknownEngine(pub String);

/// Backend-agnostic query: text plus an optional nanosecond window and a row cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalQuery {
    pub text: String,
    /// Window start, unix epoch nanoseconds as a decimal string
    pub start: Option<String>,
    /// Window end, unix epoch nanoseconds as a decimal string
    pub end: Option<String>,
    pub limit: usize,
}

impl LogicalQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            start: None,
            end: None,
            limit,
        }
    }

    pub fn with_window(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }
}

/// Keys owned by [`NormalizedRow`] itself; extra fields never shadow them.
const RESERVED_KEYS: &[&str] = &["timestamp", "message", "level", "__raw"];

/// The common row shape every engine response is flattened into
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub timestamp: String,
    pub message: String,
    /// Empty when the backend carries no level
    #[serde(default)]
    pub level: String,
    /// Extra per-row fields (stream labels, VictoriaLogs fields)
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    /// Unmodified source document or labels, kept for drill-down
    #[serde(rename = "__raw", default)]
    pub raw: Map<String, Value>,
}

impl NormalizedRow {
    pub fn new(timestamp: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_raw(mut self, raw: Map<String, Value>) -> Self {
        self.raw = raw;
        self
    }

    /// Copy extra fields onto the row, skipping names the row already owns.
    pub fn with_fields<'a>(mut self, fields: impl IntoIterator<Item = (&'a String, &'a Value)>) -> Self {
        for (key, value) in fields {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                self.fields.insert(key.clone(), value.clone());
            }
        }
        self
    }
}

/// Engine-native rendering of a keyword OR-filter.
pub trait QuerySyntax {
    /// Combine `base` with an OR over `keywords`. Returns `base` unchanged when
    /// there are no keywords.
    fn append_keyword_filter(&self, base: &str, keywords: &[String]) -> String;
}

/// Request rendering and response parsing for one backend protocol.
pub trait EngineClient: QuerySyntax {
    fn kind(&self) -> EngineKind;

    fn build_request(
        &self,
        endpoint: &str,
        config: &DatasourceConfig,
        query: &LogicalQuery,
    ) -> Result<EngineRequest, EngineError>;

    fn parse_response(
        &self,
        body: &[u8],
        config: &DatasourceConfig,
    ) -> Result<Vec<NormalizedRow>, EngineError>;
}

/// Engine client selected by kind
#[derive(Debug, Clone)]
pub enum Engine {
    Loki(LokiClient),
    Elasticsearch(ElasticsearchClient),
    VictoriaLogs(VictoriaLogsClient),
}

impl Engine {
    /// Client with default options for the given kind
    pub fn for_kind(kind: EngineKind) -> Self {
        match kind {
            EngineKind::Loki => Engine::Loki(LokiClient::default()),
            EngineKind::Elasticsearch => Engine::Elasticsearch(ElasticsearchClient),
            EngineKind::VictoriaLogs => Engine::VictoriaLogs(VictoriaLogsClient),
        }
    }

    fn client(&self) -> &dyn EngineClient {
        match self {
            Engine::Loki(c) => c,
            Engine::Elasticsearch(c) => c,
            Engine::VictoriaLogs(c) => c,
        }
    }

    /// Send one request to the backend and normalize the response.
    ///
    /// A single attempt: transport failures and non-2xx statuses are returned
    /// as errors without retrying.
    pub async fn execute(
        &self,
        http: &reqwest::Client,
        endpoint: &str,
        config: &DatasourceConfig,
        query: &LogicalQuery,
    ) -> Result<Vec<NormalizedRow>, EngineError> {
        let request = self.build_request(endpoint, config, query)?;
        tracing::debug!(engine = %self.kind(), url = %request.url, "Sending log query");
        let body = transport::send(http, &request, config).await?;
        self.parse_response(&body, config)
    }
}

impl QuerySyntax for Engine {
    fn append_keyword_filter(&self, base: &str, keywords: &[String]) -> String {
        self.client().append_keyword_filter(base, keywords)
    }
}

impl EngineClient for Engine {
    fn kind(&self) -> EngineKind {
        self.client().kind()
    }

    fn build_request(
        &self,
        endpoint: &str,
        config: &DatasourceConfig,
        query: &LogicalQuery,
    ) -> Result<EngineRequest, EngineError> {
        self.client().build_request(endpoint, config, query)
    }

    fn parse_response(
        &self,
        body: &[u8],
        config: &DatasourceConfig,
    ) -> Result<Vec<NormalizedRow>, EngineError> {
        self.client().parse_response(body, config)
    }
}

/// Engine call errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("loki".parse::<EngineKind>().unwrap(), EngineKind::Loki);
        assert_eq!(
            "Elasticsearch".parse::<EngineKind>().unwrap(),
            EngineKind::Elasticsearch
        );
        assert_eq!(
            "victorialogs".parse::<EngineKind>().unwrap(),
            EngineKind::VictoriaLogs
        );
        assert!("splunk".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_engine_kind_serde() {
        let kind: EngineKind = serde_json::from_str("\"victorialogs\"").unwrap();
        assert_eq!(kind, EngineKind::VictoriaLogs);
        assert_eq!(
            serde_json::to_string(&EngineKind::Elasticsearch).unwrap(),
            "\"elasticsearch\""
        );
    }

    #[test]
    fn test_row_fields_skip_reserved_keys() {
        let mut extra = Map::new();
        extra.insert("message".to_string(), Value::String("shadow".into()));
        extra.insert("app".to_string(), Value::String("api".into()));

        let row = NormalizedRow::new("1", "hello").with_fields(&extra);
        assert_eq!(row.message, "hello");
        assert_eq!(row.fields.len(), 1);
        assert_eq!(row.fields["app"], "api");
    }

    #[test]
    fn test_row_serialization_shape() {
        let mut raw = Map::new();
        raw.insert("app".to_string(), Value::String("api".into()));
        let row = NormalizedRow::new("1700000000", "boom")
            .with_level("error")
            .with_fields(&raw)
            .with_raw(raw.clone());

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["timestamp"], "1700000000");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["level"], "error");
        assert_eq!(json["app"], "api");
        assert_eq!(json["__raw"]["app"], "api");
    }
}
