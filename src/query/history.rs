//! Ad-hoc query history and its retention worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time;

use crate::engine::EngineKind;
use crate::storage::{Store, StoreError};

/// Number of entries in the "recent" view
pub const RECENT_LIMIT: usize = 50;

/// Default age after which non-favourite entries are pruned
pub const DEFAULT_RETENTION_DAYS: i64 = 14;

/// Upper bound on configured retention
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Code,
    Builder,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryView {
    #[default]
    Recent,
    Favorite,
}

/// One executed ad-hoc query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryHistory {
    #[serde(default)]
    pub id: u64,
    pub engine: EngineKind,
    #[serde(default)]
    pub mode: QueryMode,
    pub query: String,
    pub line_limit: usize,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueryHistory {
    pub fn new(engine: EngineKind, mode: QueryMode, query: impl Into<String>, line_limit: usize) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            engine,
            mode,
            query: query.into(),
            line_limit,
            is_favorite: false,
            note: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Flip the favourite flag of an entry.
pub fn toggle_favorite(store: &dyn Store, id: u64) -> Result<QueryHistory, StoreError> {
    let mut entry = store
        .get_history(id)?
        .ok_or(StoreError::NotFound { entity: "History entry", id })?;
    entry.is_favorite = !entry.is_favorite;
    entry.updated_at = Utc::now();
    store.update_history(entry)
}

pub fn set_note(store: &dyn Store, id: u64, note: impl Into<String>) -> Result<QueryHistory, StoreError> {
    let mut entry = store
        .get_history(id)?
        .ok_or(StoreError::NotFound { entity: "History entry", id })?;
    entry.note = note.into();
    entry.updated_at = Utc::now();
    store.update_history(entry)
}

/// Prune non-favourites older than `retention` relative to now.
pub fn run_history_cleanup(store: &dyn Store, retention: chrono::Duration) -> Result<usize, StoreError> {
    store.prune_history(Utc::now() - retention)
}

/// Background worker that prunes old history entries
pub struct HistoryRetentionWorker {
    store: Arc<dyn Store>,
    retention: chrono::Duration,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl HistoryRetentionWorker {
    /// `interval` is raised to at least one second.
    pub fn new(store: Arc<dyn Store>, retention: chrono::Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval: interval.max(Duration::from_secs(1)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(
                "History retention worker started with interval {:?}, retention {} days",
                self.interval,
                self.retention.num_days()
            );

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                match run_history_cleanup(self.store.as_ref(), self.retention) {
                    Ok(0) => {}
                    Ok(removed) => tracing::info!("History retention pruned {} entries", removed),
                    Err(e) => tracing::error!(error = %e, "History retention failed"),
                }
            }

            tracing::info!("History retention worker stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
