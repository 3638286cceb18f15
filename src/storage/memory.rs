//! In-memory store with optional snapshot persistence

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::snapshot::{Snapshot, SnapshotFile, SNAPSHOT_VERSION};
use super::{Store, StoreError};
use crate::alerts::summarizer::ModelProfile;
use crate::alerts::{Monitor, MonitorStatus, NotificationChannel};
use crate::datasource::Datasource;
use crate::engine::EngineKind;
use crate::query::history::{HistoryView, QueryHistory, RECENT_LIMIT};

/// A stored record with a store-assigned numeric id
pub trait Record: Clone + Send + Sync + 'static {
    const ENTITY: &'static str;

    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
}

macro_rules! impl_record {
    ($ty:ty, $entity:literal) => {
        impl Record for $ty {
            const ENTITY: &'static str = $entity;

            fn id(&self) -> u64 {
                self.id
            }

            fn set_id(&mut self, id: u64) {
                self.id = id;
            }
        }
    };
}

impl_record!(Datasource, "Datasource");
impl_record!(Monitor, "Monitor");
impl_record!(NotificationChannel, "Channel");
impl_record!(ModelProfile, "Model");
impl_record!(QueryHistory, "History entry");

/// One table: rows keyed by id plus the next id to hand out
struct Table<T: Record> {
    rows: DashMap<u64, T>,
    next_id: AtomicU64,
}

impl<T: Record> Table<T> {
    fn from_rows(rows: Vec<T>) -> Self {
        let next_id = rows.iter().map(|r| r.id()).max().unwrap_or(0) + 1;
        let map = DashMap::with_capacity(rows.len());
        for row in rows {
            map.insert(row.id(), row);
        }
        Self {
            rows: map,
            next_id: AtomicU64::new(next_id),
        }
    }

    fn insert(&self, mut record: T) -> T {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        record.set_id(id);
        self.rows.insert(id, record.clone());
        record
    }

    fn get(&self, id: u64) -> Option<T> {
        self.rows.get(&id).map(|r| r.value().clone())
    }

    /// Ascending id order
    fn list(&self) -> Vec<T> {
        let mut rows: Vec<T> = self.rows.iter().map(|r| r.value().clone()).collect();
        rows.sort_by_key(|r| r.id());
        rows
    }

    fn update(&self, record: T) -> Result<T, StoreError> {
        let id = record.id();
        match self.rows.get_mut(&id) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(record)
            }
            None => Err(StoreError::NotFound {
                entity: T::ENTITY,
                id,
            }),
        }
    }

    fn modify(&self, id: u64, f: impl FnOnce(&mut T)) -> Result<(), StoreError> {
        match self.rows.get_mut(&id) {
            Some(mut existing) => {
                f(existing.value_mut());
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: T::ENTITY,
                id,
            }),
        }
    }

    fn delete(&self, id: u64) -> bool {
        self.rows.remove(&id).is_some()
    }

    /// Keep rows matching `keep`; returns the number removed.
    fn retain(&self, keep: impl Fn(&T) -> bool) -> usize {
        let mut removed = 0;
        self.rows.retain(|_, row| {
            let kept = keep(row);
            if !kept {
                removed += 1;
            }
            kept
        });
        removed
    }
}

/// DashMap-backed [`Store`]
///
/// With a snapshot path, the state is loaded at open and rewritten after every
/// mutation.
pub struct MemoryStore {
    datasources: Table<Datasource>,
    monitors: Table<Monitor>,
    channels: Table<NotificationChannel>,
    models: Table<ModelProfile>,
    history: Table<QueryHistory>,
    snapshot_file: Option<SnapshotFile>,
    persist_lock: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default(), None)
    }

    /// Store mirrored to `path`, loading any existing snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file = SnapshotFile::new(path);
        let snapshot = file.load()?.unwrap_or_default();
        tracing::info!(
            path = %file.path().display(),
            datasources = snapshot.datasources.len(),
            monitors = snapshot.monitors.len(),
            history = snapshot.history.len(),
            "Loaded store snapshot"
        );
        Ok(Self::from_snapshot(snapshot, Some(file)))
    }

    fn from_snapshot(snapshot: Snapshot, snapshot_file: Option<SnapshotFile>) -> Self {
        Self {
            datasources: Table::from_rows(snapshot.datasources),
            monitors: Table::from_rows(snapshot.monitors),
            channels: Table::from_rows(snapshot.channels),
            models: Table::from_rows(snapshot.models),
            history: Table::from_rows(snapshot.history),
            snapshot_file,
            persist_lock: Mutex::new(()),
        }
    }

    /// Copy of every table
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            datasources: self.datasources.list(),
            monitors: self.monitors.list(),
            channels: self.channels.list(),
            models: self.models.list(),
            history: self.history.list(),
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        let Some(file) = &self.snapshot_file else {
            return Ok(());
        };
        let write = || {
            // Build and write under one lock so an older state never lands last.
            let _guard = self.persist_lock.lock();
            file.write(&self.snapshot())
        };

        // The write fsyncs; on a multi-threaded runtime hand this worker's
        // other tasks off while it blocks.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(write)
            }
            _ => write(),
        }
    }

    fn persisted<T>(&self, value: T) -> Result<T, StoreError> {
        self.persist()?;
        Ok(value)
    }
}

impl Store for MemoryStore {
    fn insert_datasource(&self, datasource: Datasource) -> Result<Datasource, StoreError> {
        if datasource.name.trim().is_empty() {
            return Err(StoreError::Invalid("datasource name is required".to_string()));
        }
        let inserted = self.datasources.insert(datasource);
        self.persisted(inserted)
    }

    fn get_datasource(&self, id: u64) -> Result<Option<Datasource>, StoreError> {
        Ok(self.datasources.get(id))
    }

    fn list_datasources(&self, kind: Option<EngineKind>) -> Result<Vec<Datasource>, StoreError> {
        let mut all = self.datasources.list();
        if let Some(kind) = kind {
            all.retain(|ds| ds.kind == kind);
        }
        Ok(all)
    }

    fn update_datasource(&self, datasource: Datasource) -> Result<Datasource, StoreError> {
        let updated = self.datasources.update(datasource)?;
        self.persisted(updated)
    }

    fn delete_datasource(&self, id: u64) -> Result<bool, StoreError> {
        let deleted = self.datasources.delete(id);
        self.persisted(deleted)
    }

    fn insert_monitor(&self, monitor: Monitor) -> Result<Monitor, StoreError> {
        if monitor.name.trim().is_empty() {
            return Err(StoreError::Invalid("monitor name is required".to_string()));
        }
        let inserted = self.monitors.insert(monitor);
        self.persisted(inserted)
    }

    fn get_monitor(&self, id: u64) -> Result<Option<Monitor>, StoreError> {
        Ok(self.monitors.get(id))
    }

    fn list_monitors(&self, status: Option<MonitorStatus>) -> Result<Vec<Monitor>, StoreError> {
        let mut all = self.monitors.list();
        if let Some(status) = status {
            all.retain(|m| m.status == status);
        }
        Ok(all)
    }

    fn update_monitor(&self, monitor: Monitor) -> Result<Monitor, StoreError> {
        let updated = self.monitors.update(monitor)?;
        self.persisted(updated)
    }

    fn delete_monitor(&self, id: u64) -> Result<bool, StoreError> {
        let deleted = self.monitors.delete(id);
        self.persisted(deleted)
    }

    fn touch_monitor(&self, id: u64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.monitors.modify(id, |m| m.last_run_at = Some(at))?;
        self.persist()
    }

    fn insert_channel(&self, channel: NotificationChannel) -> Result<NotificationChannel, StoreError> {
        if channel.name.trim().is_empty() {
            return Err(StoreError::Invalid("channel name is required".to_string()));
        }
        let inserted = self.channels.insert(channel);
        self.persisted(inserted)
    }

    fn get_channel(&self, id: u64) -> Result<Option<NotificationChannel>, StoreError> {
        Ok(self.channels.get(id))
    }

    fn list_channels(&self) -> Result<Vec<NotificationChannel>, StoreError> {
        Ok(self.channels.list())
    }

    fn update_channel(&self, channel: NotificationChannel) -> Result<NotificationChannel, StoreError> {
        let updated = self.channels.update(channel)?;
        self.persisted(updated)
    }

    fn delete_channel(&self, id: u64) -> Result<bool, StoreError> {
        let deleted = self.channels.delete(id);
        self.persisted(deleted)
    }

    fn insert_model(&self, model: ModelProfile) -> Result<ModelProfile, StoreError> {
        if model.model.trim().is_empty() {
            return Err(StoreError::Invalid("model identifier is required".to_string()));
        }
        let inserted = self.models.insert(model);
        self.persisted(inserted)
    }

    fn get_model(&self, id: u64) -> Result<Option<ModelProfile>, StoreError> {
        Ok(self.models.get(id))
    }

    fn list_models(&self) -> Result<Vec<ModelProfile>, StoreError> {
        Ok(self.models.list())
    }

    fn update_model(&self, model: ModelProfile) -> Result<ModelProfile, StoreError> {
        let updated = self.models.update(model)?;
        self.persisted(updated)
    }

    fn delete_model(&self, id: u64) -> Result<bool, StoreError> {
        let deleted = self.models.delete(id);
        self.persisted(deleted)
    }

    fn default_model(&self) -> Result<Option<ModelProfile>, StoreError> {
        let enabled: Vec<ModelProfile> = self.models.list().into_iter().filter(|m| m.enabled).collect();
        let preferred = enabled.iter().find(|m| m.is_default).cloned();
        Ok(preferred.or_else(|| enabled.into_iter().next()))
    }

    fn insert_history(&self, entry: QueryHistory) -> Result<QueryHistory, StoreError> {
        let inserted = self.history.insert(entry);
        self.persisted(inserted)
    }

    fn get_history(&self, id: u64) -> Result<Option<QueryHistory>, StoreError> {
        Ok(self.history.get(id))
    }

    fn list_history(&self, view: HistoryView) -> Result<Vec<QueryHistory>, StoreError> {
        let mut entries = self.history.list();
        match view {
            HistoryView::Recent => {
                entries.reverse();
                entries.truncate(RECENT_LIMIT);
            }
            HistoryView::Favorite => {
                entries.retain(|h| h.is_favorite);
                entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
            }
        }
        Ok(entries)
    }

    fn update_history(&self, entry: QueryHistory) -> Result<QueryHistory, StoreError> {
        let updated = self.history.update(entry)?;
        self.persisted(updated)
    }

    fn delete_history(&self, id: u64) -> Result<bool, StoreError> {
        let deleted = self.history.delete(id);
        self.persisted(deleted)
    }

    fn prune_history(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let removed = self.history.retain(|h| h.is_favorite || h.created_at >= cutoff);
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::history::QueryMode;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Arc;

    fn history_at(query: &str, created_at: DateTime<Utc>) -> QueryHistory {
        let mut entry = QueryHistory::new(EngineKind::Loki, QueryMode::Code, query, 1000);
        entry.created_at = created_at;
        entry.updated_at = created_at;
        entry
    }

    #[test]
    fn test_ids_increase_per_table() {
        let store = MemoryStore::new();
        let a = store
            .insert_datasource(Datasource::new("a", EngineKind::Loki, "http://a"))
            .unwrap();
        let b = store
            .insert_datasource(Datasource::new("b", EngineKind::VictoriaLogs, "http://b"))
            .unwrap();
        let m = store
            .insert_monitor(Monitor::new("m", EngineKind::Loki, "@hourly"))
            .unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(m.id, 1);
        assert_eq!(store.list_datasources(Some(EngineKind::Loki)).unwrap(), vec![a]);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let mut monitor = Monitor::new("m", EngineKind::Loki, "@hourly");
        monitor.id = 42;
        assert!(matches!(
            store.update_monitor(monitor),
            Err(StoreError::NotFound { id: 42, .. })
        ));
        assert!(store.touch_monitor(42, Utc::now()).is_err());
        assert!(!store.delete_monitor(42).unwrap());
    }

    #[test]
    fn test_monitor_status_filter_and_touch() {
        let store = MemoryStore::new();
        let active = store
            .insert_monitor(Monitor::new("a", EngineKind::Loki, "@hourly"))
            .unwrap();
        store
            .insert_monitor(
                Monitor::new("p", EngineKind::Loki, "@hourly").with_status(MonitorStatus::Paused),
            )
            .unwrap();

        let listed = store.list_monitors(Some(MonitorStatus::Active)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);

        let now = Utc::now();
        store.touch_monitor(active.id, now).unwrap();
        assert_eq!(store.get_monitor(active.id).unwrap().unwrap().last_run_at, Some(now));
    }

    #[test]
    fn test_default_model_selection() {
        let store = MemoryStore::new();
        assert!(store.default_model().unwrap().is_none());

        let first = store
            .insert_model(ModelProfile::new("first", "gpt-4o-mini", "https://api.example.com/v1"))
            .unwrap();
        let mut disabled = ModelProfile::new("off", "gpt-4o", "https://api.example.com/v1");
        disabled.enabled = false;
        disabled.is_default = true;
        store.insert_model(disabled).unwrap();

        assert_eq!(store.default_model().unwrap().unwrap().id, first.id);

        let mut preferred = ModelProfile::new("main", "gpt-4o", "https://api.example.com/v1");
        preferred.is_default = true;
        let preferred = store.insert_model(preferred).unwrap();
        assert_eq!(store.default_model().unwrap().unwrap().id, preferred.id);
    }

    #[test]
    fn test_history_views_and_prune() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let old = store.insert_history(history_at("old", now - Duration::days(20))).unwrap();
        let mut fav = history_at("old favourite", now - Duration::days(30));
        fav.is_favorite = true;
        let fav = store.insert_history(fav).unwrap();
        for i in 0..RECENT_LIMIT {
            store
                .insert_history(history_at(&format!("q{}", i), now - Duration::seconds(i as i64)))
                .unwrap();
        }

        let recent = store.list_history(HistoryView::Recent).unwrap();
        assert_eq!(recent.len(), RECENT_LIMIT);
        assert_eq!(recent[0].query, format!("q{}", RECENT_LIMIT - 1));
        assert!(recent.iter().all(|h| h.id != old.id));

        let favourites = store.list_history(HistoryView::Favorite).unwrap();
        assert_eq!(favourites.len(), 1);
        assert_eq!(favourites[0].id, fav.id);

        let removed = store.prune_history(now - Duration::days(14)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_history(old.id).unwrap().is_none());
        assert!(store.get_history(fav.id).unwrap().is_some());
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logscout.json");

        {
            let store = MemoryStore::open(&path).unwrap();
            store
                .insert_datasource(
                    Datasource::new("es", EngineKind::Elasticsearch, "http://es:9200")
                        .with_config(json!({"es": {"index": "logs-*"}})),
                )
                .unwrap();
            store
                .insert_monitor(Monitor::new("m", EngineKind::Elasticsearch, "@hourly"))
                .unwrap();
        }

        let reopened = MemoryStore::open(&path).unwrap();
        let datasources = reopened.list_datasources(None).unwrap();
        assert_eq!(datasources.len(), 1);
        assert_eq!(datasources[0].config["es"]["index"], "logs-*");
        assert_eq!(reopened.list_monitors(None).unwrap().len(), 1);

        let next = reopened
            .insert_datasource(Datasource::new("loki", EngineKind::Loki, "http://loki:3100"))
            .unwrap();
        assert_eq!(next.id, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_writes_from_runtime_workers_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logscout.json");
        let store = Arc::new(MemoryStore::open(&path).unwrap());

        let monitor = store
            .insert_monitor(Monitor::new("m", EngineKind::Loki, "@hourly"))
            .unwrap();
        let touched = Utc::now();
        let handle = {
            let store = store.clone();
            tokio::spawn(async move { store.touch_monitor(monitor.id, touched) })
        };
        handle.await.unwrap().unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        let saved = reopened.get_monitor(monitor.id).unwrap().unwrap();
        assert_eq!(saved.last_run_at, Some(touched));
    }

    #[test]
    fn test_rejects_unnamed_records() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.insert_datasource(Datasource::new(" ", EngineKind::Loki, "http://a")),
            Err(StoreError::Invalid(_))
        ));
    }
}
