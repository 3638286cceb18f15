pub mod history;
pub mod service;

use std::time::Duration;

use chrono::Utc;

use crate::engine::{EngineError, EngineKind, UnknownEngine};
use crate::storage::StoreError;

pub use history::{HistoryRetentionWorker, HistoryView, QueryHistory, QueryMode};
pub use service::{
    AdhocQuery, AdhocResult, ConnectionCheck, InspectResult, QueryService, QueryTimeouts,
};

/// `(start, end)` epoch nanosecond strings for the window ending now
pub fn lookback_window(lookback: Duration) -> (String, String) {
    let end = Utc::now();
    let start = end - chrono::Duration::from_std(lookback).unwrap_or_else(|_| chrono::Duration::hours(1));
    (nanos(start), nanos(end))
}

fn nanos(at: chrono::DateTime<Utc>) -> String {
    at.timestamp_nanos_opt().unwrap_or_default().to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    UnknownEngine(#[from] UnknownEngine),

    #[error("No {0} datasource configured")]
    DatasourceNotFound(EngineKind),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
