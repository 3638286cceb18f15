//! One monitor run: query, summarize, notify

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};

use super::config::Monitor;
use super::notifier::Dispatcher;
use super::summarizer::Summarizer;
use crate::engine::{Engine, LogicalQuery, QuerySyntax};
use crate::query::{lookback_window, QueryService};
use crate::storage::Store;

/// Tunables shared by every monitor run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Window queried on each run, ending now
    pub lookback: Duration,
    /// Row cap for the query feeding the summarizer
    pub analysis_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(3600),
            analysis_limit: 100,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Monitor record no longer exists
    MonitorMissing,
    QueryFailed,
    NoMatches,
    ChannelMissing { matches: usize },
    NotifyFailed { matches: usize },
    Alerted { matches: usize },
}

/// Alert pipeline
pub struct AlertPipeline {
    query: QueryService,
    store: Arc<dyn Store>,
    summarizer: Arc<dyn Summarizer>,
    dispatcher: Arc<dyn Dispatcher>,
    config: PipelineConfig,
}

impl AlertPipeline {
    pub fn new(
        query: QueryService,
        summarizer: Arc<dyn Summarizer>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            store: query.store().clone(),
            query,
            summarizer,
            dispatcher,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Base query (default `*`) combined with the keyword filter
    pub fn effective_query(monitor: &Monitor) -> String {
        let base = match monitor.base_query.trim() {
            "" => "*",
            base => base,
        };
        Engine::for_kind(monitor.engine).append_keyword_filter(base, &monitor.keyword_list())
    }

    /// Re-read the monitor and run it.
    pub async fn run_by_id(&self, id: u64) -> RunOutcome {
        match self.store.get_monitor(id) {
            Ok(Some(monitor)) => self.run(&monitor).await,
            Ok(None) => {
                tracing::warn!(monitor_id = id, "Monitor no longer exists, skipping run");
                RunOutcome::MonitorMissing
            }
            Err(e) => {
                tracing::error!(monitor_id = id, error = %e, "Failed to load monitor");
                RunOutcome::MonitorMissing
            }
        }
    }

    /// Run a monitor once. Every failure is logged and reported in the outcome.
    pub async fn run(&self, monitor: &Monitor) -> RunOutcome {
        tracing::info!(monitor_id = monitor.id, monitor = %monitor.name, "Monitor run started");

        let (start, end) = lookback_window(self.config.lookback);
        let query = LogicalQuery::new(Self::effective_query(monitor), self.config.analysis_limit)
            .with_window(start, end);

        let rows = match self
            .query
            .execute(&Engine::for_kind(monitor.engine), monitor.datasource_id, &query)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(
                    monitor_id = monitor.id,
                    engine = %monitor.engine,
                    error = %e,
                    "Monitor query failed"
                );
                return RunOutcome::QueryFailed;
            }
        };

        if let Err(e) = self.store.touch_monitor(monitor.id, Utc::now()) {
            tracing::warn!(monitor_id = monitor.id, error = %e, "Failed to record last run time");
        }

        if rows.is_empty() {
            tracing::info!(monitor_id = monitor.id, "Monitor found no matching logs");
            return RunOutcome::NoMatches;
        }
        let matches = rows.len();

        let instruction = format!(
            "Monitoring alert: found {} abnormal log lines containing keywords [{}]. Please analyze.",
            matches, monitor.keywords
        );
        let analysis = match self.summarizer.summarize(&instruction, &rows).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(monitor_id = monitor.id, error = %e, "Monitor analysis failed");
                format!("AI analysis failed: {}", e)
            }
        };

        let channel = match monitor.channel_id.map(|id| self.store.get_channel(id)) {
            Some(Ok(Some(channel))) => channel,
            other => {
                if let Some(Err(e)) = other {
                    tracing::error!(monitor_id = monitor.id, error = %e, "Failed to load channel");
                } else {
                    tracing::error!(
                        monitor_id = monitor.id,
                        channel_id = ?monitor.channel_id,
                        "Monitor channel not found"
                    );
                }
                return RunOutcome::ChannelMissing { matches };
            }
        };

        let title = alert_title(monitor);
        let body = alert_body(monitor, matches, &analysis);

        match self.dispatcher.send(&channel, &title, &body).await {
            Ok(()) => {
                tracing::info!(monitor_id = monitor.id, channel_id = channel.id, matches, "Monitor alert sent");
                RunOutcome::Alerted { matches }
            }
            Err(e) => {
                tracing::error!(
                    monitor_id = monitor.id,
                    channel_id = channel.id,
                    error = %e,
                    "Monitor notification failed"
                );
                RunOutcome::NotifyFailed { matches }
            }
        }
    }
}

fn alert_title(monitor: &Monitor) -> String {
    format!("Smart Alert: {}", monitor.name)
}

fn alert_body(monitor: &Monitor, matches: usize, analysis: &str) -> String {
    format!(
        "Monitor: {}\nTime: {}\nMatches: {}\nKeywords: {}\n\nAI Analysis:\n{}",
        monitor.name,
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        matches,
        monitor.keywords,
        analysis
    )
}
