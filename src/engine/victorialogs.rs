//! VictoriaLogs client

use serde_json::{Map, Value};

use super::fields::value_to_string;
use super::transport::{endpoint_with_params, endpoint_with_path, require_endpoint, EngineRequest};
use super::{EngineClient, EngineError, EngineKind, LogicalQuery, NormalizedRow, QuerySyntax};
use crate::datasource::DatasourceConfig;

const QUERY_PATH: &str = "/select/logsql/query";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VictoriaLogsClient;

impl VictoriaLogsClient {
    /// Connectivity probe
    pub fn health_request(&self, endpoint: &str) -> Result<EngineRequest, EngineError> {
        let endpoint = require_endpoint(endpoint)?;
        Ok(EngineRequest::get(endpoint_with_path(endpoint, "/health")))
    }

    fn line_to_row(line: &str) -> Option<NormalizedRow> {
        let entry: Map<String, Value> = serde_json::from_str(line).ok()?;

        let timestamp = entry.get("_time").map(value_to_string).unwrap_or_default();
        let message = entry
            .get("_msg")
            .map(value_to_string)
            .unwrap_or_else(|| line.to_string());
        let level = entry
            .get("level")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let extra = entry
            .iter()
            .filter(|(key, _)| key.as_str() != "_time" && key.as_str() != "_msg");

        Some(
            NormalizedRow::new(timestamp, message)
                .with_level(level)
                .with_fields(extra)
                .with_raw(entry.clone()),
        )
    }
}

impl QuerySyntax for VictoriaLogsClient {
    fn append_keyword_filter(&self, base: &str, keywords: &[String]) -> String {
        if keywords.is_empty() {
            return base.to_string();
        }
        let group = format!("({})", keywords.join(" or "));
        let base = base.trim();
        if base.is_empty() || base == "*" {
            group
        } else {
            format!("{} {}", base, group)
        }
    }
}

impl EngineClient for VictoriaLogsClient {
    fn kind(&self) -> EngineKind {
        EngineKind::VictoriaLogs
    }

    fn build_request(
        &self,
        endpoint: &str,
        _config: &DatasourceConfig,
        query: &LogicalQuery,
    ) -> Result<EngineRequest, EngineError> {
        let endpoint = require_endpoint(endpoint)?;

        let text = query.text.trim();
        let mut params = vec![(
            "query",
            if text.is_empty() { "*".to_string() } else { text.to_string() },
        )];
        if let Some(start) = &query.start {
            params.push(("start", start.clone()));
        }
        if let Some(end) = &query.end {
            params.push(("end", end.clone()));
        }
        params.push(("limit", query.limit.to_string()));

        Ok(EngineRequest::get(endpoint_with_params(endpoint, QUERY_PATH, &params)))
    }

    fn parse_response(
        &self,
        body: &[u8],
        _config: &DatasourceConfig,
    ) -> Result<Vec<NormalizedRow>, EngineError> {
        let text = String::from_utf8_lossy(body);
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(Self::line_to_row)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_to_star() {
        let query = LogicalQuery::new("  ", 100).with_window("1", "2");
        let request = VictoriaLogsClient
            .build_request("http://vl:9428", &DatasourceConfig::default(), &query)
            .unwrap();
        assert_eq!(
            request.url,
            "http://vl:9428/select/logsql/query?query=*&start=1&end=2&limit=100"
        );
    }

    #[test]
    fn test_request_without_window() {
        let query = LogicalQuery::new("error", 10);
        let request = VictoriaLogsClient
            .build_request("http://vl:9428/", &DatasourceConfig::default(), &query)
            .unwrap();
        assert_eq!(request.url, "http://vl:9428/select/logsql/query?query=error&limit=10");
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let body = concat!(
            r#"{"_time":"2024-01-01T00:00:00Z","_msg":"first","level":"error","app":"api"}"#,
            "\n",
            "{not json\n",
            "\n",
            r#"{"_time":"2024-01-01T00:00:01Z","_msg":"second"}"#,
            "\n"
        );
        let rows = VictoriaLogsClient
            .parse_response(body.as_bytes(), &DatasourceConfig::default())
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, "2024-01-01T00:00:00Z");
        assert_eq!(rows[0].message, "first");
        assert_eq!(rows[0].level, "error");
        assert_eq!(rows[0].fields["app"], "api");
        assert!(!rows[0].fields.contains_key("_msg"));
        assert_eq!(rows[0].raw["_msg"], "first");
        assert_eq!(rows[1].message, "second");
    }

    #[test]
    fn test_message_falls_back_to_line() {
        let line = r#"{"_time":"t","text":"no msg field"}"#;
        let rows = VictoriaLogsClient
            .parse_response(line.as_bytes(), &DatasourceConfig::default())
            .unwrap();
        assert_eq!(rows[0].message, line);
    }

    #[test]
    fn test_keyword_filter() {
        let keywords = vec!["error".to_string(), "timeout".to_string()];
        assert_eq!(
            VictoriaLogsClient.append_keyword_filter("_stream:{app=\"api\"}", &keywords),
            "_stream:{app=\"api\"} (error or timeout)"
        );
        assert_eq!(VictoriaLogsClient.append_keyword_filter("*", &keywords), "(error or timeout)");
    }

    #[test]
    fn test_health_request() {
        assert_eq!(
            VictoriaLogsClient.health_request("http://vl:9428").unwrap().url,
            "http://vl:9428/health"
        );
    }
}
