//! Elasticsearch client

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

use super::fields::{first_match, flatten_into, lookup, value_to_string, LEVEL_CANDIDATES, MESSAGE_CANDIDATES};
use super::transport::{endpoint_with_path, require_endpoint, EngineRequest};
use super::{EngineClient, EngineError, EngineKind, LogicalQuery, NormalizedRow, QuerySyntax};
use crate::datasource::DatasourceConfig;

/// Hit metadata copied into `raw` alongside the flattened source
const HIT_METADATA: &[&str] = &["_id", "_index", "_type", "_score", "sort", "highlight"];

/// Message field value meaning "serialize the whole source document"
pub const WHOLE_SOURCE: &str = "_source";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElasticsearchClient;

impl ElasticsearchClient {
    /// The `_search` body for a logical query
    pub fn search_body(&self, config: &DatasourceConfig, query: &LogicalQuery) -> Value {
        let time_field = config.time_field();
        let now = Utc::now();
        let start_ms = query
            .start
            .as_deref()
            .and_then(nanos_to_millis)
            .unwrap_or_else(|| (now - Duration::hours(1)).timestamp_millis());
        let end_ms = query
            .end
            .as_deref()
            .and_then(nanos_to_millis)
            .unwrap_or_else(|| now.timestamp_millis());

        let text = query.text.trim();
        let text_clause = if text.is_empty() || text == "*" {
            json!({"match_all": {}})
        } else {
            json!({"query_string": {"query": text}})
        };

        json!({
            "query": {
                "bool": {
                    "must": [
                        text_clause,
                        {
                            "range": {
                                time_field: {
                                    "gte": start_ms,
                                    "lte": end_ms,
                                    "format": "epoch_millis"
                                }
                            }
                        }
                    ]
                }
            },
            "sort": [{time_field: {"order": "desc"}}],
            "size": query.limit
        })
    }

    /// Connectivity probe
    pub fn health_request(&self, endpoint: &str) -> Result<EngineRequest, EngineError> {
        let endpoint = require_endpoint(endpoint)?;
        Ok(EngineRequest::get(endpoint_with_path(endpoint, "/_cluster/health")))
    }

    fn hit_to_row(&self, hit: &Value, config: &DatasourceConfig) -> NormalizedRow {
        let empty = Map::new();
        let source = hit.get("_source").and_then(Value::as_object).unwrap_or(&empty);

        let timestamp = lookup(source, config.time_field())
            .map(value_to_string)
            .unwrap_or_default();

        let message_field = config.message_field();
        let message = if message_field == WHOLE_SOURCE {
            Value::Object(source.clone()).to_string()
        } else {
            lookup(source, message_field)
                .filter(|v| !v.is_null())
                .or_else(|| first_match(source, MESSAGE_CANDIDATES))
                .map(value_to_string)
                .unwrap_or_else(|| Value::Object(source.clone()).to_string())
        };

        let level = config
            .level_field()
            .and_then(|field| lookup(source, field))
            .filter(|v| !v.is_null())
            .or_else(|| first_match(source, LEVEL_CANDIDATES))
            .map(value_to_string)
            .unwrap_or_default();

        let mut raw = Map::new();
        for key in HIT_METADATA {
            if let Some(value) = hit.get(*key) {
                raw.insert((*key).to_string(), value.clone());
            }
        }
        flatten_into(source, "", &mut raw);

        NormalizedRow::new(timestamp, message)
            .with_level(level)
            .with_raw(raw)
    }
}

fn nanos_to_millis(nanos: &str) -> Option<i64> {
    let nanos: i128 = nanos.trim().parse().ok()?;
    i64::try_from(nanos / 1_000_000).ok()
}

impl QuerySyntax for ElasticsearchClient {
    fn append_keyword_filter(&self, base: &str, keywords: &[String]) -> String {
        if keywords.is_empty() {
            return base.to_string();
        }
        let group = format!("({})", keywords.join(" OR "));
        let base = base.trim();
        if base.is_empty() || base == "*" {
            group
        } else {
            format!("{} AND {}", base, group)
        }
    }
}

impl EngineClient for ElasticsearchClient {
    fn kind(&self) -> EngineKind {
        EngineKind::Elasticsearch
    }

    fn build_request(
        &self,
        endpoint: &str,
        config: &DatasourceConfig,
        query: &LogicalQuery,
    ) -> Result<EngineRequest, EngineError> {
        let endpoint = require_endpoint(endpoint)?;
        let url = format!("{}{}/_search", endpoint.trim_end_matches('/'), config.index_path());

        let mut request = EngineRequest::post_json(url, self.search_body(config, query));
        if config.es.xpack {
            request = request.with_header("X-Elastic-Product", "Elasticsearch");
        }
        Ok(request)
    }

    fn parse_response(
        &self,
        body: &[u8],
        config: &DatasourceConfig,
    ) -> Result<Vec<NormalizedRow>, EngineError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| EngineError::Parse(format!("invalid Elasticsearch response: {}", e)))?;

        let hits = value
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(Value::as_array);

        Ok(hits
            .map(|hits| hits.iter().map(|hit| self.hit_to_row(hit, config)).collect())
            .unwrap_or_default())
    }
}
