//! Monitor and notification channel types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::EngineKind;

/// Default cron schedule for new monitors: every five minutes
pub const DEFAULT_CRON: &str = "0 */5 * * * *";

/// Whether a monitor should have a live job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    #[default]
    Active,
    Paused,
}

/// Scheduled keyword monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    /// Store-assigned ID
    #[serde(default)]
    pub id: u64,
    /// Human-readable name, used in alert titles
    pub name: String,
    /// Preferred datasource; resolution falls back to the engine default
    #[serde(default)]
    pub datasource_id: Option<u64>,
    /// Engine the query is written for
    pub engine: EngineKind,
    /// Cron expression (5 or 6 fields, descriptor, or `@every`)
    #[serde(alias = "cron", default = "default_cron")]
    pub cron_expression: String,
    /// Query before keyword filtering; empty means match everything
    #[serde(alias = "query", default)]
    pub base_query: String,
    /// Comma-separated keyword list
    #[serde(default)]
    pub keywords: String,
    /// Channel that receives alerts
    #[serde(default)]
    pub channel_id: Option<u64>,
    #[serde(default)]
    pub status: MonitorStatus,
    /// Completion time of the last successful query phase
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

fn default_cron() -> String {
    DEFAULT_CRON.to_string()
}

impl Monitor {
    pub fn new(name: impl Into<String>, engine: EngineKind, cron_expression: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            datasource_id: None,
            engine,
            cron_expression: cron_expression.into(),
            base_query: String::new(),
            keywords: String::new(),
            channel_id: None,
            status: MonitorStatus::Active,
            last_run_at: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.base_query = query.into();
        self
    }

    pub fn with_keywords(mut self, keywords: impl Into<String>) -> Self {
        self.keywords = keywords.into();
        self
    }

    pub fn with_datasource(mut self, datasource_id: u64) -> Self {
        self.datasource_id = Some(datasource_id);
        self
    }

    pub fn with_channel(mut self, channel_id: u64) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn with_status(mut self, status: MonitorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == MonitorStatus::Active
    }

    /// Split the keyword list on commas, trimming and dropping empties.
    pub fn keyword_list(&self) -> Vec<String> {
        self.keywords
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Webhook,
    Email,
}

/// Alert destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    #[serde(default)]
    pub id: u64,
    pub name: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: ChannelKind,
    /// Transport settings, decoded by the notifier on send
    #[serde(default)]
    pub config: Value,
}

impl NotificationChannel {
    pub fn new(name: impl Into<String>, kind: ChannelKind, config: Value) -> Self {
        Self {
            id: 0,
            name: name.into(),
            kind,
            config,
        }
    }
}
