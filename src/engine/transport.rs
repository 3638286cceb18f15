//! HTTP plumbing shared by the engine clients

use std::time::Duration;

use url::Url;

use super::EngineError;
use crate::datasource::DatasourceConfig;

/// Maximum number of characters of a backend error body kept for diagnostics
pub const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// A fully rendered backend request, before auth headers are applied
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl EngineRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Reject datasources that resolved without any endpoint.
pub fn require_endpoint(endpoint: &str) -> Result<&str, EngineError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(EngineError::Config("datasource has no endpoint".to_string()));
    }
    Ok(endpoint)
}

/// True when the endpoint URL already carries a non-root path, meaning the
/// caller has fully specified the target resource.
pub fn has_custom_path(endpoint: &str) -> bool {
    match Url::parse(endpoint) {
        Ok(url) => {
            let path = url.path();
            !path.is_empty() && path != "/"
        }
        Err(_) => false,
    }
}

/// Encode query parameters in the given order.
pub fn encode_params(params: &[(&str, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
        .finish()
}

/// Attach `params` to the endpoint.
///
/// A bare endpoint gets `default_path` appended first; an endpoint with its
/// own path only gets the parameters.
pub fn endpoint_with_params(endpoint: &str, default_path: &str, params: &[(&str, String)]) -> String {
    let encoded = encode_params(params);
    if has_custom_path(endpoint) {
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}{}", endpoint, separator, encoded)
    } else {
        format!("{}{}?{}", endpoint.trim_end_matches('/'), default_path, encoded)
    }
}

/// The endpoint itself when it carries a path, else the endpoint plus `default_path`.
pub fn endpoint_with_path(endpoint: &str, default_path: &str) -> String {
    if has_custom_path(endpoint) {
        endpoint.to_string()
    } else {
        format!("{}{}", endpoint.trim_end_matches('/'), default_path)
    }
}

/// Truncate a response body on a character boundary.
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

/// Build an HTTP client for one call, honoring the datasource TLS block.
pub fn build_client(config: &DatasourceConfig, timeout: Duration) -> Result<reqwest::Client, EngineError> {
    let tls = &config.tls;
    let mut builder = reqwest::Client::builder().timeout(timeout);

    if tls.skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(ca) = non_empty(tls.ca_cert.as_deref()) {
        let cert = reqwest::Certificate::from_pem(ca.as_bytes())
            .map_err(|e| EngineError::Config(format!("invalid CA certificate: {}", e)))?;
        builder = builder.add_root_certificate(cert);
    }

    if let (Some(cert), Some(key)) = (
        non_empty(tls.client_cert.as_deref()),
        non_empty(tls.client_key.as_deref()),
    ) {
        let mut pem = Vec::with_capacity(cert.len() + key.len() + 1);
        pem.extend_from_slice(cert.as_bytes());
        pem.push(b'\n');
        pem.extend_from_slice(key.as_bytes());
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| EngineError::Config(format!("invalid client certificate: {}", e)))?;
        builder = builder.identity(identity);
    }

    if let Some(server_name) = non_empty(tls.server_name.as_deref()) {
        tracing::warn!(
            server_name = %server_name,
            "TLS server name override is not supported; verifying against the endpoint host"
        );
    }

    builder
        .build()
        .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Execute a rendered request and return the raw body of a 2xx response.
pub async fn send(
    client: &reqwest::Client,
    request: &EngineRequest,
    config: &DatasourceConfig,
) -> Result<Vec<u8>, EngineError> {
    let mut builder = match request.method {
        HttpMethod::Get => client.get(&request.url),
        HttpMethod::Post => client.post(&request.url),
    };

    for (name, value) in request.headers.iter().chain(config.request_headers().iter()) {
        builder = builder.header(name.as_str(), value.as_str());
    }

    if let Some(body) = &request.body {
        builder = builder.json(body);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))?;

    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))?;

    if !status.is_success() {
        return Err(EngineError::Status {
            status: status.as_u16(),
            body: truncate_body(&String::from_utf8_lossy(&body)),
        });
    }

    Ok(body.to_vec())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_custom_path() {
        assert!(!has_custom_path("http://loki:3100"));
        assert!(!has_custom_path("http://loki:3100/"));
        assert!(has_custom_path("http://gateway/loki/api/v1/query_range"));
        assert!(!has_custom_path("not a url"));
    }

    #[test]
    fn test_endpoint_with_params() {
        let params = vec![("query", "*".to_string()), ("limit", "10".to_string())];

        assert_eq!(
            endpoint_with_params("http://vl:9428/", "/select/logsql/query", &params),
            "http://vl:9428/select/logsql/query?query=*&limit=10"
        );
        assert_eq!(
            endpoint_with_params("http://proxy/custom", "/select/logsql/query", &params),
            "http://proxy/custom?query=*&limit=10"
        );
        assert_eq!(
            endpoint_with_params("http://proxy/custom?tenant=a", "/x", &params),
            "http://proxy/custom?tenant=a&query=*&limit=10"
        );
    }

    #[test]
    fn test_endpoint_with_path() {
        assert_eq!(endpoint_with_path("http://vl:9428/", "/health"), "http://vl:9428/health");
        assert_eq!(endpoint_with_path("http://vl:9428/ping", "/health"), "http://vl:9428/ping");
    }

    #[test]
    fn test_truncate_body() {
        let short = "bad request";
        assert_eq!(truncate_body(short), short);

        let long = "é".repeat(MAX_ERROR_BODY_CHARS + 10);
        let truncated = truncate_body(&long);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncated.chars().count(), MAX_ERROR_BODY_CHARS + 3);
    }

    #[test]
    fn test_require_endpoint() {
        assert!(require_endpoint("  ").is_err());
        assert_eq!(require_endpoint(" http://x ").unwrap(), "http://x");
    }

    #[test]
    fn test_build_client_defaults() {
        let plain = DatasourceConfig::default();
        assert!(build_client(&plain, Duration::from_secs(1)).is_ok());

        let mut plain = DatasourceConfig::default();
        plain.tls.skip_verify = true;
        assert!(build_client(&plain, Duration::from_secs(1)).is_ok());
    }
}
