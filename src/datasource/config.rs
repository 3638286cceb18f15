//! Typed datasource configuration
//!
//! Datasource records carry an open JSON document. It is decoded once, with
//! defaults for every missing field, into [`DatasourceConfig`].

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default Elasticsearch time field
pub const DEFAULT_TIME_FIELD: &str = "@timestamp";

/// Default message field; `_source` serializes the whole document
pub const DEFAULT_MESSAGE_FIELD: &str = "_source";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatasourceConfig {
    pub endpoint: Option<String>,
    pub is_default: bool,
    pub token: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth: AuthConfig,
    pub tls: TlsConfig,
    pub http: HttpOptions,
    pub es: EsOptions,
    pub logs: LogFields,
}

/// Nested `auth` block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthConfig {
    pub method: Option<String>,
    pub token: Option<String>,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsConfig {
    pub skip_verify: bool,
    pub server_name: Option<String>,
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
}

/// Static request decorations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpOptions {
    /// Raw `name=value` cookie strings, each sent as a `Cookie` header
    pub allowed_cookies: Vec<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EsOptions {
    pub index: Option<String>,
    pub time_field: Option<String>,
    pub xpack: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogFields {
    pub message_field: Option<String>,
    pub level_field: Option<String>,
}

/// Resolved authentication scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    ApiKey(String),
    Basic { username: String, password: String },
}

impl Credentials {
    pub fn header_value(&self) -> String {
        match self {
            Credentials::Bearer(token) => format!("Bearer {}", token),
            Credentials::ApiKey(key) => format!("ApiKey {}", key),
            Credentials::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
            }
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl DatasourceConfig {
    /// Decode a stored document. Unknown keys are ignored; a document that
    /// does not decode at all falls back to defaults.
    pub fn from_document(doc: &Value) -> Self {
        if doc.is_null() {
            return Self::default();
        }
        match serde_json::from_value(doc.clone()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid datasource config, using defaults");
                Self::default()
            }
        }
    }

    /// Bearer token, then API key, then basic auth. Top-level fields win over
    /// the nested `auth` block.
    pub fn credentials(&self) -> Option<Credentials> {
        let auth = &self.auth;
        if let Some(token) = present(&self.token).or_else(|| present(&auth.token)) {
            return Some(Credentials::Bearer(token.to_string()));
        }
        if let Some(key) = present(&self.api_key).or_else(|| present(&auth.api_key)) {
            return Some(Credentials::ApiKey(key.to_string()));
        }

        let (username, password) = match present(&self.username) {
            Some(user) => (Some(user), self.password.as_deref()),
            None => (present(&auth.username), auth.password.as_deref()),
        };
        username.map(|username| Credentials::Basic {
            username: username.to_string(),
            password: password.unwrap_or_default().to_string(),
        })
    }

    /// Every header derived from the config: auth, static headers, cookies
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(credentials) = self.credentials() {
            headers.push(("Authorization".to_string(), credentials.header_value()));
        }
        for (name, value) in self.auth.headers.iter().chain(self.http.headers.iter()) {
            headers.push((name.clone(), value.clone()));
        }
        for cookie in &self.http.allowed_cookies {
            let cookie = cookie.trim();
            if !cookie.is_empty() {
                headers.push(("Cookie".to_string(), cookie.to_string()));
            }
        }
        headers
    }

    pub fn time_field(&self) -> &str {
        present(&self.es.time_field).unwrap_or(DEFAULT_TIME_FIELD)
    }

    /// `/<index>` or empty when no index is configured
    pub fn index_path(&self) -> String {
        match present(&self.es.index) {
            Some(index) => format!("/{}", index.trim_matches('/')),
            None => String::new(),
        }
    }

    pub fn message_field(&self) -> &str {
        present(&self.logs.message_field).unwrap_or(DEFAULT_MESSAGE_FIELD)
    }

    pub fn level_field(&self) -> Option<&str> {
        present(&self.logs.level_field)
    }

    pub fn endpoint(&self) -> Option<&str> {
        present(&self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_with_defaults() {
        let config = DatasourceConfig::from_document(&json!({
            "isDefault": true,
            "tls": {"skipVerify": true},
            "es": {"index": "logs-*"},
            "unknown": 1
        }));
        assert!(config.is_default);
        assert!(config.tls.skip_verify);
        assert_eq!(config.index_path(), "/logs-*");
        assert_eq!(config.time_field(), "@timestamp");
        assert_eq!(config.message_field(), "_source");
        assert!(config.level_field().is_none());
    }

    #[test]
    fn test_invalid_document_falls_back() {
        let config = DatasourceConfig::from_document(&json!({"isDefault": "yes please"}));
        assert_eq!(config, DatasourceConfig::default());
        assert_eq!(DatasourceConfig::from_document(&Value::Null), DatasourceConfig::default());
    }

    #[test]
    fn test_credentials_precedence() {
        let config = DatasourceConfig::from_document(&json!({
            "token": "t",
            "apiKey": "k",
            "username": "u",
            "password": "p"
        }));
        assert_eq!(config.credentials(), Some(Credentials::Bearer("t".into())));

        let config = DatasourceConfig::from_document(&json!({"apiKey": "k", "username": "u"}));
        assert_eq!(config.credentials().unwrap().header_value(), "ApiKey k");

        let config = DatasourceConfig::from_document(&json!({"username": "u", "password": "p"}));
        assert_eq!(config.credentials().unwrap().header_value(), "Basic dTpw");

        let config = DatasourceConfig::from_document(&json!({
            "auth": {"method": "basic", "username": "admin", "password": "secret"}
        }));
        assert_eq!(
            config.credentials(),
            Some(Credentials::Basic {
                username: "admin".into(),
                password: "secret".into()
            })
        );

        assert!(DatasourceConfig::default().credentials().is_none());
    }

    #[test]
    fn test_request_headers() {
        let config = DatasourceConfig::from_document(&json!({
            "token": "abc",
            "auth": {"headers": {"X-Scope-OrgID": "tenant-1"}},
            "http": {"allowedCookies": ["session=1", " "], "headers": {"X-Extra": "y"}}
        }));
        let headers = config.request_headers();
        assert_eq!(
            headers,
            vec![
                ("Authorization".to_string(), "Bearer abc".to_string()),
                ("X-Scope-OrgID".to_string(), "tenant-1".to_string()),
                ("X-Extra".to_string(), "y".to_string()),
                ("Cookie".to_string(), "session=1".to_string()),
            ]
        );
    }
}
