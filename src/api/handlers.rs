use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerts::{
    Dispatcher, ModelProfile, Monitor, MonitorScheduler, NotificationChannel,
    NotifyError, ScheduleError,
};
use crate::datasource::Datasource;
use crate::engine::{EngineError, EngineKind};
use crate::query::history::{self, HistoryView, QueryHistory};
use crate::query::{AdhocQuery, AdhocResult, ConnectionCheck, InspectResult, QueryError, QueryService};
use crate::storage::{Store, StoreError};

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub query: QueryService,
    pub scheduler: Arc<MonitorScheduler>,
    pub dispatcher: Arc<dyn Dispatcher>,
}

#[derive(Serialize)]
pub struct Items<T> {
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for Items<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

fn found<T>(value: Option<T>, entity: &str, id: u64) -> Result<T, ApiError> {
    value.ok_or_else(|| ApiError::NotFound(format!("{} {} not found", entity, id)))
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub scheduled_monitors: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        scheduled_monitors: state.scheduler.job_count().await,
    })
}

// ============================================================================
// Log queries
// ============================================================================

pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AdhocQuery>,
) -> Result<Json<AdhocResult>, ApiError> {
    Ok(Json(state.query.run_adhoc(&request).await?))
}

pub async fn inspect_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AdhocQuery>,
) -> Result<Json<InspectResult>, ApiError> {
    Ok(Json(state.query.inspect(&request)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataParams {
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub datasource_id: Option<u64>,
    #[serde(default)]
    pub label: Option<String>,
}

impl MetadataParams {
    /// Label metadata only exists for Loki
    fn is_loki(&self) -> bool {
        self.engine
            .as_deref()
            .map(|engine| engine.parse::<EngineKind>().ok() == Some(EngineKind::Loki))
            .unwrap_or(true)
    }
}

pub async fn label_suggestions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetadataParams>,
) -> Result<Json<Items<String>>, ApiError> {
    if !params.is_loki() {
        return Ok(Json(Vec::new().into()));
    }
    Ok(Json(state.query.label_names(params.datasource_id).await?.into()))
}

pub async fn label_values(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetadataParams>,
) -> Result<Json<Items<String>>, ApiError> {
    if !params.is_loki() {
        return Ok(Json(Vec::new().into()));
    }
    let label = params.label.as_deref().unwrap_or_default();
    Ok(Json(
        state
            .query
            .label_values(params.datasource_id, label)
            .await?
            .into(),
    ))
}

// ============================================================================
// Query history
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    #[serde(rename = "type", default)]
    pub view: HistoryView,
}

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Items<QueryHistory>>, ApiError> {
    Ok(Json(state.store.list_history(params.view)?.into()))
}

pub async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<QueryHistory>, ApiError> {
    Ok(Json(history::toggle_favorite(state.store.as_ref(), id)?))
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    #[serde(default)]
    pub note: String,
}

pub async fn update_note(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(request): Json<NoteRequest>,
) -> Result<Json<QueryHistory>, ApiError> {
    Ok(Json(history::set_note(state.store.as_ref(), id, request.note)?))
}

pub async fn delete_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    found(state.store.delete_history(id)?.then_some(()), "History entry", id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Datasources
// ============================================================================

pub async fn list_datasources(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Items<Datasource>>, ApiError> {
    Ok(Json(state.store.list_datasources(None)?.into()))
}

pub async fn create_datasource(
    State(state): State<Arc<AppState>>,
    Json(datasource): Json<Datasource>,
) -> Result<(StatusCode, Json<Datasource>), ApiError> {
    let saved = state.store.insert_datasource(datasource)?;
    tracing::info!(datasource_id = saved.id, engine = %saved.kind, "Datasource created");
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn update_datasource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(mut datasource): Json<Datasource>,
) -> Result<Json<Datasource>, ApiError> {
    datasource.id = id;
    Ok(Json(state.store.update_datasource(datasource)?))
}

pub async fn delete_datasource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    found(state.store.delete_datasource(id)?.then_some(()), "Datasource", id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Probe an unsaved datasource
pub async fn test_datasource(
    State(state): State<Arc<AppState>>,
    Json(datasource): Json<Datasource>,
) -> Result<Json<ConnectionCheck>, ApiError> {
    Ok(Json(state.query.test_datasource(datasource).await?))
}

pub async fn test_saved_datasource(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<ConnectionCheck>, ApiError> {
    let datasource = found(state.store.get_datasource(id)?, "Datasource", id)?;
    Ok(Json(state.query.test_datasource(datasource).await?))
}

// ============================================================================
// Monitors
// ============================================================================

pub async fn list_monitors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Items<Monitor>>, ApiError> {
    Ok(Json(state.store.list_monitors(None)?.into()))
}

pub async fn get_monitor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<Monitor>, ApiError> {
    Ok(Json(found(state.store.get_monitor(id)?, "Monitor", id)?))
}

pub async fn create_monitor(
    State(state): State<Arc<AppState>>,
    Json(monitor): Json<Monitor>,
) -> Result<(StatusCode, Json<Monitor>), ApiError> {
    state.scheduler.validate(&monitor.cron_expression)?;
    let saved = state.store.insert_monitor(monitor)?;
    state.scheduler.add_job(&saved).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn update_monitor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(mut monitor): Json<Monitor>,
) -> Result<Json<Monitor>, ApiError> {
    state.scheduler.validate(&monitor.cron_expression)?;
    let existing = found(state.store.get_monitor(id)?, "Monitor", id)?;
    monitor.id = id;
    if monitor.last_run_at.is_none() {
        monitor.last_run_at = existing.last_run_at;
    }

    let saved = state.store.update_monitor(monitor)?;
    state.scheduler.add_job(&saved).await?;
    Ok(Json(saved))
}

pub async fn delete_monitor(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.remove_job(id).await?;
    found(state.store.delete_monitor(id)?.then_some(()), "Monitor", id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Notification channels
// ============================================================================

pub async fn list_channels(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Items<NotificationChannel>>, ApiError> {
    Ok(Json(state.store.list_channels()?.into()))
}

pub async fn get_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<NotificationChannel>, ApiError> {
    Ok(Json(found(state.store.get_channel(id)?, "Channel", id)?))
}

pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    Json(channel): Json<NotificationChannel>,
) -> Result<(StatusCode, Json<NotificationChannel>), ApiError> {
    Ok((StatusCode::CREATED, Json(state.store.insert_channel(channel)?)))
}

pub async fn update_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(mut channel): Json<NotificationChannel>,
) -> Result<Json<NotificationChannel>, ApiError> {
    channel.id = id;
    Ok(Json(state.store.update_channel(channel)?))
}

pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    found(state.store.delete_channel(id)?.then_some(()), "Channel", id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Send the fixed test message through an unsaved channel
pub async fn test_channel(
    State(state): State<Arc<AppState>>,
    Json(channel): Json<NotificationChannel>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.dispatcher.send_test(&channel).await?;
    Ok(Json(serde_json::json!({ "sent": true })))
}

// ============================================================================
// AI models
// ============================================================================

/// Clear the default flag on every profile except `keep`.
fn clear_other_defaults(store: &dyn Store, keep: u64) -> Result<(), StoreError> {
    for mut model in store.list_models()? {
        if model.id != keep && model.is_default {
            model.is_default = false;
            store.update_model(model)?;
        }
    }
    Ok(())
}

pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Items<ModelProfile>>, ApiError> {
    Ok(Json(state.store.list_models()?.into()))
}

pub async fn create_model(
    State(state): State<Arc<AppState>>,
    Json(model): Json<ModelProfile>,
) -> Result<(StatusCode, Json<ModelProfile>), ApiError> {
    let saved = state.store.insert_model(model)?;
    if saved.is_default {
        clear_other_defaults(state.store.as_ref(), saved.id)?;
    }
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn update_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(mut model): Json<ModelProfile>,
) -> Result<Json<ModelProfile>, ApiError> {
    model.id = id;
    let saved = state.store.update_model(model)?;
    if saved.is_default {
        clear_other_defaults(state.store.as_ref(), saved.id)?;
    }
    Ok(Json(saved))
}

pub async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    found(state.store.delete_model(id)?.then_some(()), "Model", id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_model_enabled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<ModelProfile>, ApiError> {
    let mut model = found(state.store.get_model(id)?, "Model", id)?;
    model.enabled = !model.enabled;
    Ok(Json(state.store.update_model(model)?))
}

pub async fn set_default_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<ModelProfile>, ApiError> {
    let mut model = found(state.store.get_model(id)?, "Model", id)?;
    model.is_default = true;
    let saved = state.store.update_model(model)?;
    clear_other_defaults(state.store.as_ref(), id)?;
    Ok(Json(saved))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// A backend, model provider or notification target failed
    Upstream(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            StoreError::Invalid(_) => ApiError::BadRequest(e.to_string()),
            StoreError::Persistence(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::UnknownEngine(_) | QueryError::Invalid(_) => ApiError::BadRequest(e.to_string()),
            QueryError::DatasourceNotFound(_) => ApiError::NotFound(e.to_string()),
            QueryError::Engine(EngineError::Config(_)) => ApiError::BadRequest(e.to_string()),
            QueryError::Engine(_) => ApiError::Upstream(e.to_string()),
            QueryError::Store(inner) => inner.into(),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(e: ScheduleError) -> Self {
        match e {
            ScheduleError::Invalid { .. } => ApiError::BadRequest(e.to_string()),
            ScheduleError::Scheduler(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<NotifyError> for ApiError {
    fn from(e: NotifyError) -> Self {
        match e {
            NotifyError::Config(_) => ApiError::BadRequest(e.to_string()),
            NotifyError::Webhook(_) | NotifyError::Email(_) => ApiError::Upstream(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
