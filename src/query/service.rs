//! Query orchestration: resolve a datasource, build a client, call the engine

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::history::{QueryHistory, QueryMode};
use super::{lookback_window, QueryError};
use crate::datasource::{Datasource, DatasourceResolver, ResolvedDatasource};
use crate::engine::transport::{self, truncate_body, EngineRequest, HttpMethod};
use crate::engine::{
    build_client, Engine, EngineClient, EngineKind, LogicalQuery, LokiBuilder, LokiClient,
    LokiQueryType, NormalizedRow,
};
use crate::storage::Store;

/// Default row cap for ad-hoc queries
pub const DEFAULT_LINE_LIMIT: usize = 1000;

/// Window used when an ad-hoc query gives no start/end
pub const DEFAULT_ADHOC_WINDOW: Duration = Duration::from_secs(3600);

/// Per-call-site HTTP timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTimeouts {
    /// Bulk log queries
    pub query: Duration,
    /// Label listings and connectivity probes
    pub metadata: Duration,
}

impl Default for QueryTimeouts {
    fn default() -> Self {
        Self {
            query: Duration::from_secs(60),
            metadata: Duration::from_secs(5),
        }
    }
}

fn default_line_limit() -> usize {
    DEFAULT_LINE_LIMIT
}

/// Ad-hoc query request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdhocQuery {
    pub engine: String,
    #[serde(default)]
    pub datasource_id: Option<u64>,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub query: String,
    /// Loki builder filters, used in builder mode when `query` is empty
    #[serde(default)]
    pub builder: Option<LokiBuilder>,
    /// Loki only
    #[serde(default, rename = "type")]
    pub query_type: LokiQueryType,
    /// Window start, epoch nanoseconds
    #[serde(default)]
    pub start: Option<String>,
    /// Window end, epoch nanoseconds
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default = "default_line_limit")]
    pub line_limit: usize,
}

impl AdhocQuery {
    pub fn new(engine: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            datasource_id: None,
            mode: QueryMode::Code,
            query: query.into(),
            builder: None,
            query_type: LokiQueryType::Range,
            start: None,
            end: None,
            step: None,
            direction: None,
            line_limit: DEFAULT_LINE_LIMIT,
        }
    }

    /// Query text after builder rendering
    pub fn effective_text(&self) -> String {
        match (&self.mode, &self.builder) {
            (QueryMode::Builder, Some(builder)) if self.query.trim().is_empty() => builder.render(),
            _ => self.query.clone(),
        }
    }

    fn engine_for(&self, kind: EngineKind) -> Engine {
        match kind {
            EngineKind::Loki => {
                let mut client = LokiClient::default().with_query_type(self.query_type);
                if let Some(step) = &self.step {
                    client = client.with_step(step.clone());
                }
                if let Some(direction) = &self.direction {
                    client = client.with_direction(direction.clone());
                }
                Engine::Loki(client)
            }
            other => Engine::for_kind(other),
        }
    }

    fn logical_query(&self) -> LogicalQuery {
        let query = LogicalQuery::new(self.effective_text(), self.line_limit);
        match (&self.start, &self.end) {
            (Some(start), Some(end)) if !start.is_empty() && !end.is_empty() => {
                query.with_window(start.clone(), end.clone())
            }
            _ => {
                let (start, end) = lookback_window(DEFAULT_ADHOC_WINDOW);
                query.with_window(start, end)
            }
        }
    }
}

/// Ad-hoc query outcome
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdhocResult {
    pub items: Vec<NormalizedRow>,
    pub query: String,
    pub history_id: Option<u64>,
}

/// Rendered request, without credentials
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    pub engine: EngineKind,
    pub datasource_id: u64,
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

/// Successful connectivity probe
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub url: String,
    /// Probe response, truncated
    pub body: String,
}

/// Entry point for every backend call
#[derive(Clone)]
pub struct QueryService {
    resolver: DatasourceResolver,
    store: Arc<dyn Store>,
    timeouts: QueryTimeouts,
}

impl QueryService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            resolver: DatasourceResolver::new(store.clone()),
            store,
            timeouts: QueryTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: QueryTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn timeouts(&self) -> QueryTimeouts {
        self.timeouts
    }

    /// Run `query` against the datasource for `engine`.
    ///
    /// `start`/`end` are epoch nanosecond strings; an unknown engine name is an error.
    pub async fn execute_query(
        &self,
        engine: &str,
        datasource_id: Option<u64>,
        query: &str,
        start: Option<String>,
        end: Option<String>,
        limit: usize,
    ) -> Result<Vec<NormalizedRow>, QueryError> {
        let kind: EngineKind = engine.parse()?;
        let mut logical = LogicalQuery::new(query, limit);
        logical.start = start;
        logical.end = end;
        self.execute(&Engine::for_kind(kind), datasource_id, &logical).await
    }

    /// Run a logical query through an already-selected engine client.
    pub async fn execute(
        &self,
        engine: &Engine,
        datasource_id: Option<u64>,
        query: &LogicalQuery,
    ) -> Result<Vec<NormalizedRow>, QueryError> {
        let resolved = self.resolve(engine.kind(), datasource_id)?;
        let client = build_client(&resolved.config, self.timeouts.query)?;
        let rows = engine
            .execute(&client, &resolved.endpoint, &resolved.config, query)
            .await?;
        tracing::debug!(
            engine = %engine.kind(),
            datasource_id = resolved.datasource.id,
            rows = rows.len(),
            "Query completed"
        );
        Ok(rows)
    }

    /// Execute an ad-hoc query and record it in history whatever the outcome.
    pub async fn run_adhoc(&self, request: &AdhocQuery) -> Result<AdhocResult, QueryError> {
        let kind: EngineKind = request.engine.parse()?;
        let engine = request.engine_for(kind);
        let logical = request.logical_query();

        let outcome = self.execute(&engine, request.datasource_id, &logical).await;

        let entry = QueryHistory::new(kind, request.mode, logical.text.clone(), request.line_limit);
        let history_id = match self.store.insert_history(entry) {
            Ok(saved) => Some(saved.id),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to record query history");
                None
            }
        };

        if let Err(e) = &outcome {
            tracing::warn!(engine = %kind, error = %e, "Ad-hoc query failed");
        }

        Ok(AdhocResult {
            items: outcome?,
            query: logical.text,
            history_id,
        })
    }

    /// Render the backend request for an ad-hoc query without sending it.
    pub fn inspect(&self, request: &AdhocQuery) -> Result<InspectResult, QueryError> {
        let kind: EngineKind = request.engine.parse()?;
        let resolved = self.resolve(kind, request.datasource_id)?;
        let rendered = request
            .engine_for(kind)
            .build_request(&resolved.endpoint, &resolved.config, &request.logical_query())?;

        Ok(InspectResult {
            engine: kind,
            datasource_id: resolved.datasource.id,
            method: match rendered.method {
                HttpMethod::Get => "GET".to_string(),
                HttpMethod::Post => "POST".to_string(),
            },
            url: rendered.url,
            headers: rendered.headers,
            body: rendered.body,
        })
    }

    /// Loki label names
    pub async fn label_names(&self, datasource_id: Option<u64>) -> Result<Vec<String>, QueryError> {
        let resolved = self.resolve(EngineKind::Loki, datasource_id)?;
        let loki = LokiClient::default();
        let request = loki.labels_request(&resolved.endpoint)?;
        let body = self.send_metadata(&resolved, &request).await?;
        Ok(loki.parse_label_list(&body)?)
    }

    /// Values of one Loki label
    pub async fn label_values(
        &self,
        datasource_id: Option<u64>,
        label: &str,
    ) -> Result<Vec<String>, QueryError> {
        if label.trim().is_empty() {
            return Err(QueryError::Invalid("label is required".to_string()));
        }
        let resolved = self.resolve(EngineKind::Loki, datasource_id)?;
        let loki = LokiClient::default();
        let request = loki.label_values_request(&resolved.endpoint, label)?;
        let body = self.send_metadata(&resolved, &request).await?;
        Ok(loki.parse_label_list(&body)?)
    }

    /// Probe a datasource (stored or not) with the engine's health request.
    pub async fn test_datasource(&self, datasource: Datasource) -> Result<ConnectionCheck, QueryError> {
        let resolved = ResolvedDatasource::from_datasource(datasource);
        let request = match resolved.datasource.kind {
            EngineKind::Loki => LokiClient::default().health_request(&resolved.endpoint)?,
            EngineKind::Elasticsearch => {
                crate::engine::ElasticsearchClient.health_request(&resolved.endpoint)?
            }
            EngineKind::VictoriaLogs => {
                crate::engine::VictoriaLogsClient.health_request(&resolved.endpoint)?
            }
        };
        let body = self.send_metadata(&resolved, &request).await?;
        Ok(ConnectionCheck {
            url: request.url,
            body: truncate_body(&String::from_utf8_lossy(&body)),
        })
    }

    fn resolve(
        &self,
        kind: EngineKind,
        datasource_id: Option<u64>,
    ) -> Result<ResolvedDatasource, QueryError> {
        self.resolver
            .resolve(kind, datasource_id)?
            .ok_or(QueryError::DatasourceNotFound(kind))
    }

    async fn send_metadata(
        &self,
        resolved: &ResolvedDatasource,
        request: &EngineRequest,
    ) -> Result<Vec<u8>, QueryError> {
        let client = build_client(&resolved.config, self.timeouts.metadata)?;
        Ok(transport::send(&client, request, &resolved.config).await?)
    }
}
