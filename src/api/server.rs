use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    create_channel, create_datasource, create_model, create_monitor, delete_channel,
    delete_datasource, delete_history, delete_model, delete_monitor, get_channel, get_monitor,
    health_check, inspect_query, label_suggestions, label_values, list_channels,
    list_datasources, list_history, list_models, list_monitors, run_query, set_default_model,
    test_channel, test_datasource, test_saved_datasource, toggle_favorite, toggle_model_enabled,
    update_channel, update_datasource, update_model, update_monitor, update_note, AppState,
};
use crate::alerts::{AlertPipeline, MonitorScheduler, Notifier, OpenAiSummarizer, PipelineConfig};
use crate::query::history::{HistoryRetentionWorker, DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS};
use crate::query::{QueryService, QueryTimeouts};
use crate::storage::{MemoryStore, Store};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JSON snapshot backing the store; memory only when unset
    pub data_file: Option<String>,
    pub query_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub history_retention_days: i64,
    pub history_check_interval_secs: u64,
    pub monitor_lookback_secs: u64,
    pub analysis_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_file: None,
            query_timeout_secs: 60,
            metadata_timeout_secs: 5,
            history_retention_days: DEFAULT_RETENTION_DAYS,
            history_check_interval_secs: 3600,
            monitor_lookback_secs: 3600,
            analysis_limit: 100,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    /// Read `LOGSCOUT_*` variables, keeping defaults for unset or unparsable ones.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("LOGSCOUT_HOST").unwrap_or(defaults.host),
            port: env_or("LOGSCOUT_PORT", defaults.port),
            data_file: std::env::var("LOGSCOUT_DATA_FILE")
                .ok()
                .filter(|path| !path.trim().is_empty()),
            query_timeout_secs: env_or("LOGSCOUT_QUERY_TIMEOUT_SECS", defaults.query_timeout_secs),
            metadata_timeout_secs: env_or(
                "LOGSCOUT_METADATA_TIMEOUT_SECS",
                defaults.metadata_timeout_secs,
            ),
            history_retention_days: env_or(
                "LOGSCOUT_HISTORY_RETENTION_DAYS",
                defaults.history_retention_days,
            )
            .clamp(1, MAX_RETENTION_DAYS),
            history_check_interval_secs: env_or(
                "LOGSCOUT_HISTORY_CHECK_SECS",
                defaults.history_check_interval_secs,
            )
            .max(1),
            monitor_lookback_secs: env_or(
                "LOGSCOUT_MONITOR_LOOKBACK_SECS",
                defaults.monitor_lookback_secs,
            ),
            analysis_limit: env_or("LOGSCOUT_ANALYSIS_LIMIT", defaults.analysis_limit),
        }
    }

    pub fn timeouts(&self) -> QueryTimeouts {
        QueryTimeouts {
            query: Duration::from_secs(self.query_timeout_secs),
            metadata: Duration::from_secs(self.metadata_timeout_secs),
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            lookback: Duration::from_secs(self.monitor_lookback_secs),
            analysis_limit: self.analysis_limit,
        }
    }
}

/// Wire the query service, alert pipeline and scheduler around one store.
pub async fn build_state(
    store: Arc<dyn Store>,
    config: &ServerConfig,
) -> Result<Arc<AppState>, Box<dyn std::error::Error>> {
    let query = QueryService::new(Arc::clone(&store)).with_timeouts(config.timeouts());
    let dispatcher = Arc::new(Notifier::new());
    let summarizer = Arc::new(OpenAiSummarizer::new(Arc::clone(&store)));

    let pipeline = AlertPipeline::new(query.clone(), summarizer, dispatcher.clone())
        .with_config(config.pipeline());
    let scheduler = Arc::new(MonitorScheduler::new(Arc::new(pipeline)).await?);

    Ok(Arc::new(AppState {
        store,
        query,
        scheduler,
        dispatcher,
    }))
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Log queries
        .route("/api/logs/query", post(run_query))
        .route("/api/logs/inspect", post(inspect_query))
        .route("/api/logs/suggestions", get(label_suggestions))
        .route("/api/logs/label-values", get(label_values))
        // Query history
        .route("/api/logs/history", get(list_history))
        .route("/api/logs/history/:id", axum::routing::delete(delete_history))
        .route("/api/logs/history/:id/favorite", post(toggle_favorite))
        .route("/api/logs/history/:id/note", put(update_note))
        // Datasources
        .route("/api/datasources", get(list_datasources).post(create_datasource))
        .route("/api/datasources/test", post(test_datasource))
        .route(
            "/api/datasources/:id",
            put(update_datasource).delete(delete_datasource),
        )
        .route("/api/datasources/:id/test", post(test_saved_datasource))
        // Monitors
        .route("/api/monitors", get(list_monitors).post(create_monitor))
        .route(
            "/api/monitors/:id",
            get(get_monitor).put(update_monitor).delete(delete_monitor),
        )
        // Notification channels
        .route("/api/channels", get(list_channels).post(create_channel))
        .route("/api/channels/test", post(test_channel))
        .route(
            "/api/channels/:id",
            get(get_channel).put(update_channel).delete(delete_channel),
        )
        // AI models
        .route("/api/models", get(list_models).post(create_model))
        .route("/api/models/:id", put(update_model).delete(delete_model))
        .route("/api/models/:id/enabled", post(toggle_model_enabled))
        .route("/api/models/:id/default", post(set_default_model))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn Store> = match &config.data_file {
        Some(path) => {
            tracing::info!("Loading state from {}", path);
            Arc::new(MemoryStore::open(path)?)
        }
        None => {
            tracing::info!("No data file configured, state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let state = build_state(Arc::clone(&store), &config).await?;

    // Rebuild the job table from persisted active monitors
    state.scheduler.load_active().await?;
    state.scheduler.start().await?;

    let history_worker = Arc::new(HistoryRetentionWorker::new(
        Arc::clone(&store),
        chrono::Duration::days(config.history_retention_days.clamp(1, MAX_RETENTION_DAYS)),
        Duration::from_secs(config.history_check_interval_secs),
    ));
    let history_handle = Arc::clone(&history_worker).start();

    let scheduler = Arc::clone(&state.scheduler);
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting LogScout server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(history_worker))
        .await?;

    history_handle.abort();
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "Monitor scheduler did not stop cleanly");
    }

    tracing::info!("LogScout server stopped");
    Ok(())
}

async fn shutdown_signal(history_worker: Arc<HistoryRetentionWorker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    history_worker.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{Monitor, MonitorStatus};
    use crate::engine::EngineKind;
    use crate::query::history::{QueryHistory, QueryMode};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    async fn create_test_app() -> (Router, Arc<AppState>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let state = build_state(store, &ServerConfig::default()).await.unwrap();
        (build_router(Arc::clone(&state)), state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.timeouts(), QueryTimeouts::default());
        assert_eq!(config.pipeline(), PipelineConfig::default());
    }

    #[test]
    fn test_history_settings_are_clamped() {
        std::env::set_var("LOGSCOUT_HISTORY_CHECK_SECS", "0");
        std::env::set_var("LOGSCOUT_HISTORY_RETENTION_DAYS", "9223372036854775807");

        let config = ServerConfig::from_env();

        std::env::remove_var("LOGSCOUT_HISTORY_CHECK_SECS");
        std::env::remove_var("LOGSCOUT_HISTORY_RETENTION_DAYS");
        assert_eq!(config.history_check_interval_secs, 1);
        assert_eq!(config.history_retention_days, MAX_RETENTION_DAYS);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_health_check() {
        let (app, _) = create_test_app().await;

        let response = send(&app, "GET", "/health", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["scheduled_monitors"], 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_monitor_lifecycle_drives_scheduler() {
        let (app, state) = create_test_app().await;

        let response = send(
            &app,
            "POST",
            "/api/monitors",
            Some(json!({
                "name": "auth errors",
                "engine": "elasticsearch",
                "cronExpression": "*/5 * * * *",
                "baseQuery": "service:auth",
                "keywords": "error, timeout"
            })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        let id = created["id"].as_u64().unwrap();
        assert!(state.scheduler.is_scheduled(id).await);

        let mut paused = created.clone();
        paused["status"] = json!("paused");
        let response = send(&app, "PUT", &format!("/api/monitors/{}", id), Some(paused)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.scheduler.is_scheduled(id).await);

        let response = send(&app, "DELETE", &format!("/api/monitors/{}", id), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.store.get_monitor(id).unwrap().is_none());

        let response = send(&app, "GET", &format!("/api/monitors/{}", id), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalid_cron_is_rejected_before_save() {
        let (app, state) = create_test_app().await;

        let response = send(
            &app,
            "POST",
            "/api/monitors",
            Some(json!({"name": "bad", "engine": "loki", "cronExpression": "every minute"})),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());
        assert!(state.store.list_monitors(None).unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_out_of_range_cron_keeps_store_and_jobs_unchanged() {
        let (app, state) = create_test_app().await;

        let response = send(
            &app,
            "POST",
            "/api/monitors",
            Some(json!({"name": "bad", "engine": "loki", "cronExpression": "61 * * * *"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.list_monitors(None).unwrap().is_empty());
        assert_eq!(state.scheduler.job_count().await, 0);

        let response = send(
            &app,
            "POST",
            "/api/monitors",
            Some(json!({"name": "good", "engine": "loki", "cronExpression": "*/5 * * * *"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let mut monitor = json_body(response).await;
        let id = monitor["id"].as_u64().unwrap();

        monitor["cronExpression"] = json!("0 25 * * *");
        let response = send(&app, "PUT", &format!("/api/monitors/{}", id), Some(monitor)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let saved = state.store.get_monitor(id).unwrap().unwrap();
        assert_eq!(saved.cron_expression, "*/5 * * * *");
        assert!(state.scheduler.is_scheduled(id).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_query_errors_map_to_status() {
        let (app, _) = create_test_app().await;

        let response = send(
            &app,
            "POST",
            "/api/logs/query",
            Some(json!({"engine": "splunk", "query": "*"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &app,
            "POST",
            "/api/logs/query",
            Some(json!({"engine": "loki", "query": "{app=\"api\"}"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, "GET", "/api/logs/label-values?engine=loki", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, "GET", "/api/logs/suggestions?engine=elasticsearch", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["items"], json!([]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_history_favorite_and_note() {
        let (app, state) = create_test_app().await;
        let entry = state
            .store
            .insert_history(QueryHistory::new(EngineKind::Loki, QueryMode::Code, "{app=\"api\"}", 1000))
            .unwrap();

        let response = send(&app, "POST", &format!("/api/logs/history/{}/favorite", entry.id), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["isFavorite"], true);

        let response = send(
            &app,
            "PUT",
            &format!("/api/logs/history/{}/note", entry.id),
            Some(json!({"note": "checkout outage"})),
        )
        .await;
        assert_eq!(json_body(response).await["note"], "checkout outage");

        let response = send(&app, "GET", "/api/logs/history?type=favorite", None).await;
        let body = json_body(response).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);

        let response = send(&app, "DELETE", &format!("/api/logs/history/{}", entry.id), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = send(&app, "DELETE", &format!("/api/logs/history/{}", entry.id), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_set_default_model_clears_others() {
        let (app, state) = create_test_app().await;

        for name in ["first", "second"] {
            let response = send(
                &app,
                "POST",
                "/api/models",
                Some(json!({
                    "name": name,
                    "model": "gpt-4o-mini",
                    "apiBase": "https://api.example.com/v1",
                    "isDefault": true
                })),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }
        let defaults: Vec<String> = state
            .store
            .list_models()
            .unwrap()
            .into_iter()
            .filter(|m| m.is_default)
            .map(|m| m.name)
            .collect();
        assert_eq!(defaults, vec!["second"]);

        let response = send(&app, "POST", "/api/models/1/default", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.store.default_model().unwrap().unwrap().name, "first");

        let response = send(&app, "POST", "/api/models/1/enabled", None).await;
        assert_eq!(json_body(response).await["enabled"], false);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_datasource_crud() {
        let (app, _) = create_test_app().await;

        let response = send(
            &app,
            "POST",
            "/api/datasources",
            Some(json!({"name": "loki", "type": "loki", "endpoint": "http://loki:3100"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = json_body(response).await["id"].as_u64().unwrap();

        let response = send(
            &app,
            "PUT",
            &format!("/api/datasources/{}", id),
            Some(json!({"name": "loki-prod", "type": "loki", "endpoint": "http://loki:3100"})),
        )
        .await;
        assert_eq!(json_body(response).await["name"], "loki-prod");

        let response = send(&app, "GET", "/api/datasources", None).await;
        assert_eq!(json_body(response).await["items"].as_array().unwrap().len(), 1);

        let response = send(&app, "PUT", "/api/datasources/99", Some(json!({"name": "x", "type": "loki"}))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_channel_test_without_url() {
        let (app, _) = create_test_app().await;

        let response = send(
            &app,
            "POST",
            "/api/channels/test",
            Some(json!({"name": "ops", "type": "webhook", "config": {}})),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_load_active_after_restart() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store
            .insert_monitor(Monitor::new("a", EngineKind::Loki, "*/5 * * * *"))
            .unwrap();
        store
            .insert_monitor(
                Monitor::new("b", EngineKind::Loki, "*/5 * * * *").with_status(MonitorStatus::Paused),
            )
            .unwrap();

        let state = build_state(store, &ServerConfig::default()).await.unwrap();
        assert_eq!(state.scheduler.load_active().await.unwrap(), 1);
        assert_eq!(state.scheduler.job_count().await, 1);
    }
}
