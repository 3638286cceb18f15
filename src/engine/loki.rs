//! Grafana Loki client

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use super::fields::value_to_string;
use super::transport::{endpoint_with_params, require_endpoint, EngineRequest};
use super::{EngineClient, EngineError, EngineKind, LogicalQuery, NormalizedRow, QuerySyntax};
use crate::datasource::DatasourceConfig;

const QUERY_RANGE_PATH: &str = "/loki/api/v1/query_range";
const QUERY_PATH: &str = "/loki/api/v1/query";
const LABELS_PATH: &str = "/loki/api/v1/labels";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LokiQueryType {
    #[default]
    Range,
    Instant,
}

/// Loki request options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LokiClient {
    pub query_type: LokiQueryType,
    pub step: String,
    pub direction: String,
}

impl Default for LokiClient {
    fn default() -> Self {
        Self {
            query_type: LokiQueryType::Range,
            step: "60s".to_string(),
            direction: "BACKWARD".to_string(),
        }
    }
}

impl LokiClient {
    pub fn with_query_type(mut self, query_type: LokiQueryType) -> Self {
        self.query_type = query_type;
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        let step = step.into();
        if !step.trim().is_empty() {
            self.step = step;
        }
        self
    }

    pub fn with_direction(mut self, direction: impl Into<String>) -> Self {
        let direction = direction.into();
        if !direction.trim().is_empty() {
            self.direction = direction.to_ascii_uppercase();
        }
        self
    }

    /// Request listing label names.
    pub fn labels_request(&self, endpoint: &str) -> Result<EngineRequest, EngineError> {
        Ok(EngineRequest::get(metadata_url(endpoint, &["loki", "api", "v1", "labels"])?))
    }

    /// Request listing the values of one label. The label name is path-escaped.
    pub fn label_values_request(&self, endpoint: &str, label: &str) -> Result<EngineRequest, EngineError> {
        if label.trim().is_empty() {
            return Err(EngineError::Config("label name is required".to_string()));
        }
        Ok(EngineRequest::get(metadata_url(
            endpoint,
            &["loki", "api", "v1", "label", label, "values"],
        )?))
    }

    /// Connectivity probe
    pub fn health_request(&self, endpoint: &str) -> Result<EngineRequest, EngineError> {
        let endpoint = require_endpoint(endpoint)?;
        Ok(EngineRequest::get(endpoint_with_params(
            endpoint,
            LABELS_PATH,
            &[("limit", "1".to_string())],
        )))
    }

    /// Parse a `{"status": "success", "data": [...]}` label listing.
    pub fn parse_label_list(&self, body: &[u8]) -> Result<Vec<String>, EngineError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| EngineError::Parse(format!("invalid Loki metadata response: {}", e)))?;
        Ok(value
            .get("data")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default())
    }
}

fn metadata_url(endpoint: &str, segments: &[&str]) -> Result<String, EngineError> {
    let endpoint = require_endpoint(endpoint)?;
    let mut url = Url::parse(endpoint)
        .map_err(|e| EngineError::Config(format!("invalid endpoint {}: {}", endpoint, e)))?;
    url.path_segments_mut()
        .map_err(|_| EngineError::Config(format!("endpoint cannot carry a path: {}", endpoint)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

impl QuerySyntax for LokiClient {
    fn append_keyword_filter(&self, base: &str, keywords: &[String]) -> String {
        if keywords.is_empty() {
            return base.to_string();
        }
        format!("{} |~ \"{}\"", base, escape_quoted(&keywords.join("|")))
    }
}

impl EngineClient for LokiClient {
    fn kind(&self) -> EngineKind {
        EngineKind::Loki
    }

    fn build_request(
        &self,
        endpoint: &str,
        _config: &DatasourceConfig,
        query: &LogicalQuery,
    ) -> Result<EngineRequest, EngineError> {
        let endpoint = require_endpoint(endpoint)?;

        let url = match self.query_type {
            LokiQueryType::Range => {
                let mut params = vec![("query", query.text.clone())];
                if let Some(start) = &query.start {
                    params.push(("start", start.clone()));
                }
                if let Some(end) = &query.end {
                    params.push(("end", end.clone()));
                }
                params.push(("limit", query.limit.to_string()));
                params.push(("direction", self.direction.clone()));
                params.push(("step", self.step.clone()));
                endpoint_with_params(endpoint, QUERY_RANGE_PATH, &params)
            }
            LokiQueryType::Instant => {
                let mut params = vec![("query", query.text.clone())];
                if let Some(end) = &query.end {
                    params.push(("time", end.clone()));
                }
                params.push(("limit", query.limit.to_string()));
                params.push(("direction", self.direction.clone()));
                endpoint_with_params(endpoint, QUERY_PATH, &params)
            }
        };

        Ok(EngineRequest::get(url))
    }

    fn parse_response(
        &self,
        body: &[u8],
        _config: &DatasourceConfig,
    ) -> Result<Vec<NormalizedRow>, EngineError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| EngineError::Parse(format!("invalid Loki response: {}", e)))?;

        let data = value.get("data").unwrap_or(&value);
        let streams = match data
            .get("result")
            .or_else(|| data.get("streams"))
            .and_then(Value::as_array)
        {
            Some(streams) => streams,
            None => return Ok(Vec::new()),
        };

        let mut rows = Vec::new();
        for stream in streams {
            let labels = ["stream", "metric", "labels"]
                .iter()
                .find_map(|key| stream.get(*key).and_then(Value::as_object))
                .cloned()
                .unwrap_or_default();

            if let Some(values) = stream.get("values").and_then(Value::as_array) {
                for pair in values {
                    if let Some(row) = pair_to_row(pair, &labels) {
                        rows.push(row);
                    }
                }
            } else if let Some(pair) = stream.get("value") {
                if let Some(row) = pair_to_row(pair, &labels) {
                    rows.push(row);
                }
            }

            if let Some(entries) = stream.get("entries").and_then(Value::as_array) {
                for entry in entries {
                    let ts = entry.get("ts").or_else(|| entry.get("timestamp"));
                    let line = entry.get("line");
                    if let (Some(ts), Some(line)) = (ts, line) {
                        rows.push(labelled_row(value_to_string(ts), value_to_string(line), &labels));
                    }
                }
            }
        }

        Ok(rows)
    }
}

fn pair_to_row(pair: &Value, labels: &Map<String, Value>) -> Option<NormalizedRow> {
    let pair = pair.as_array()?;
    let ts = pair.first()?;
    let line = pair.get(1)?;
    Some(labelled_row(value_to_string(ts), value_to_string(line), labels))
}

fn labelled_row(ts: String, line: String, labels: &Map<String, Value>) -> NormalizedRow {
    NormalizedRow::new(ts, line)
        .with_fields(labels)
        .with_raw(labels.clone())
}

fn escape_quoted(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_label_name(name: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").ok())
        .as_ref()
        .map_or(false, |re| re.is_match(name))
}

/// One structured stream-selector filter from the query builder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelFilter {
    pub label: String,
    pub op: String,
    pub values: Vec<String>,
}

impl LabelFilter {
    pub fn new(label: impl Into<String>, op: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            label: label.into(),
            op: op.into(),
            values,
        }
    }

    fn render(&self) -> Option<String> {
        let label = self.label.trim();
        if !is_label_name(label) {
            return None;
        }
        let value = self.values.first()?;
        let op = match self.op.trim() {
            op @ ("=" | "!=" | "=~" | "!~") => op,
            _ => "=",
        };
        Some(format!("{}{}\"{}\"", label, op, escape_quoted(value)))
    }
}

/// Structured LogQL builder: label filters plus an optional line regex
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LokiBuilder {
    pub label_filters: Vec<LabelFilter>,
    pub contains: String,
}

impl LokiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: LabelFilter) -> Self {
        self.label_filters.push(filter);
        self
    }

    pub fn with_contains(mut self, contains: impl Into<String>) -> Self {
        self.contains = contains.into();
        self
    }

    /// Render the stream selector and line filter as LogQL.
    pub fn render(&self) -> String {
        let selectors: Vec<String> = self
            .label_filters
            .iter()
            .filter_map(LabelFilter::render)
            .collect();

        let mut query = format!("{{{}}}", selectors.join(","));
        let contains = self.contains.trim();
        if !contains.is_empty() {
            query.push_str(&format!(" |~ \"{}\"", escape_quoted(contains)));
        }
        query
    }
}
