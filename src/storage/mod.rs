//! Record persistence
//!
//! The gateway consumes persistence through the [`Store`] trait. The bundled
//! implementation keeps every table in memory and optionally mirrors the whole
//! state to a JSON snapshot file.

pub mod memory;
pub mod snapshot;

use chrono::{DateTime, Utc};

use crate::alerts::{Monitor, MonitorStatus, NotificationChannel};
use crate::alerts::summarizer::ModelProfile;
use crate::datasource::Datasource;
use crate::engine::EngineKind;
use crate::query::history::{HistoryView, QueryHistory};

pub use memory::MemoryStore;
pub use snapshot::Snapshot;

/// CRUD access to every record the gateway reads or writes
pub trait Store: Send + Sync {
    // Datasources
    fn insert_datasource(&self, datasource: Datasource) -> Result<Datasource, StoreError>;
    fn get_datasource(&self, id: u64) -> Result<Option<Datasource>, StoreError>;
    /// Ascending id order, optionally restricted to one engine kind
    fn list_datasources(&self, kind: Option<EngineKind>) -> Result<Vec<Datasource>, StoreError>;
    fn update_datasource(&self, datasource: Datasource) -> Result<Datasource, StoreError>;
    fn delete_datasource(&self, id: u64) -> Result<bool, StoreError>;

    // Monitors
    fn insert_monitor(&self, monitor: Monitor) -> Result<Monitor, StoreError>;
    fn get_monitor(&self, id: u64) -> Result<Option<Monitor>, StoreError>;
    fn list_monitors(&self, status: Option<MonitorStatus>) -> Result<Vec<Monitor>, StoreError>;
    fn update_monitor(&self, monitor: Monitor) -> Result<Monitor, StoreError>;
    fn delete_monitor(&self, id: u64) -> Result<bool, StoreError>;
    /// Record the completion time of a monitor's query phase.
    fn touch_monitor(&self, id: u64, at: DateTime<Utc>) -> Result<(), StoreError>;

    // Notification channels
    fn insert_channel(&self, channel: NotificationChannel) -> Result<NotificationChannel, StoreError>;
    fn get_channel(&self, id: u64) -> Result<Option<NotificationChannel>, StoreError>;
    fn list_channels(&self) -> Result<Vec<NotificationChannel>, StoreError>;
    fn update_channel(&self, channel: NotificationChannel) -> Result<NotificationChannel, StoreError>;
    fn delete_channel(&self, id: u64) -> Result<bool, StoreError>;

    // AI model profiles
    fn insert_model(&self, model: ModelProfile) -> Result<ModelProfile, StoreError>;
    fn get_model(&self, id: u64) -> Result<Option<ModelProfile>, StoreError>;
    fn list_models(&self) -> Result<Vec<ModelProfile>, StoreError>;
    fn update_model(&self, model: ModelProfile) -> Result<ModelProfile, StoreError>;
    fn delete_model(&self, id: u64) -> Result<bool, StoreError>;
    /// The enabled profile flagged default, else the first enabled profile
    fn default_model(&self) -> Result<Option<ModelProfile>, StoreError>;

    // Query history
    fn insert_history(&self, entry: QueryHistory) -> Result<QueryHistory, StoreError>;
    fn get_history(&self, id: u64) -> Result<Option<QueryHistory>, StoreError>;
    /// Recent: the newest entries by insertion. Favorite: every favourite,
    /// most recently updated first.
    fn list_history(&self, view: HistoryView) -> Result<Vec<QueryHistory>, StoreError>;
    fn update_history(&self, entry: QueryHistory) -> Result<QueryHistory, StoreError>;
    fn delete_history(&self, id: u64) -> Result<bool, StoreError>;
    /// Delete non-favourite entries created before `cutoff`; returns the count removed.
    fn prune_history(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("Invalid record: {0}")]
    Invalid(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}
