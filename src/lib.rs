//! LogScout: a log query gateway for Loki, Elasticsearch and VictoriaLogs
//!
//! One query surface over three log backends, plus keyword monitors that run
//! on a cron schedule, summarize matches with an OpenAI-compatible model and
//! deliver alerts by webhook or email.
//!
//! # Features
//!
//! - **Engine clients**: request rendering and response normalization per backend
//! - **Datasource resolution**: explicit id, flagged default, or first of a kind
//! - **Ad-hoc queries**: Loki label builder, request inspection, query history
//! - **Monitors**: cron jobs with per-engine keyword filters
//! - **Alerts**: AI summary plus webhook (generic or Lark) and SMTP delivery
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use logscout::datasource::Datasource;
//! use logscout::engine::EngineKind;
//! use logscout::query::QueryService;
//! use logscout::storage::{MemoryStore, Store};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! store.insert_datasource(Datasource::new("loki", EngineKind::Loki, "http://loki:3100"))?;
//!
//! let service = QueryService::new(store);
//! let rows = service
//!     .execute_query("loki", None, "{app=\"api\"}", None, None, 100)
//!     .await?;
//! println!("{} rows", rows.len());
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod datasource;
pub mod engine;
pub mod query;
pub mod storage;

// Re-export commonly used types
pub use engine::{EngineKind, LogicalQuery, NormalizedRow};
pub use query::{QueryError, QueryService};
pub use storage::{MemoryStore, Store, StoreError};
