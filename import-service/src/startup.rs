//! Application startup and lifecycle management.

use crate::config::{ImportConfig, ProviderKind};
use crate::handlers;
use crate::mapping::ImportSessions;
use crate::services::providers::gemini::{GeminiConfig, GeminiSuggestionProvider, GEMINI_API_BASE};
use crate::services::providers::mock::MockSuggestionProvider;
use crate::services::{
    init_metrics, EntryService, PgEntryStore, RedisTagCache, SuggestionProvider,
};
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::tracing::{make_request_span, request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub entries: EntryService,
    pub sessions: ImportSessions,
    pub provider: Arc<dyn SuggestionProvider>,
}

impl AppState {
    pub fn new(entries: EntryService, sessions: ImportSessions) -> Self {
        let provider = sessions.provider();
        Self {
            entries,
            sessions,
            provider,
        }
    }
}

/// Router with every endpoint and the request id and tracing layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_handler))
        .route(
            "/entries",
            post(handlers::entries::create_entries).get(handlers::entries::list_entries),
        )
        .route("/mappings/suggest", post(handlers::mappings::suggest_mapping))
        .route("/imports", post(handlers::sessions::create_session))
        .route(
            "/imports/:id",
            get(handlers::sessions::get_session).delete(handlers::sessions::delete_session),
        )
        .route("/imports/:id/sample", put(handlers::sessions::set_sample))
        .route(
            "/imports/:id/suggestions",
            post(handlers::sessions::restart_suggestions),
        )
        .route("/imports/:id/fields/:field", put(handlers::sessions::set_field))
        .route("/imports/:id/account", put(handlers::sessions::select_account))
        .route("/imports/:id/currency", put(handlers::sessions::set_currency))
        .route("/imports/:id/confirm", post(handlers::sessions::confirm))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_request_span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

fn build_provider(config: &ImportConfig) -> Result<Arc<dyn SuggestionProvider>, AppError> {
    match config.suggestions.provider {
        ProviderKind::Mock => {
            tracing::info!("Using mock suggestion provider");
            Ok(Arc::new(MockSuggestionProvider::name_match()))
        }
        ProviderKind::Gemini => {
            let api_key = config.suggestions.api_key.clone().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("GOOGLE_API_KEY is required"))
            })?;
            let provider = GeminiSuggestionProvider::new(GeminiConfig {
                api_key,
                model: config.suggestions.text_model.clone(),
                base_url: GEMINI_API_BASE.to_string(),
                timeout: Duration::from_secs(config.suggestions.request_timeout_seconds),
            })
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
            tracing::info!(model = %config.suggestions.text_model, "Using Gemini suggestion provider");
            Ok(Arc::new(provider))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    session_sweep_interval: Duration,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ImportConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    pub async fn build_without_migrations(config: ImportConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: ImportConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let store = PgEntryStore::new(
            config.database.url.expose_secret(),
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            store.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let cache = RedisTagCache::new(config.redis.url.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to Redis");
                AppError::ConfigError(e)
            })?;

        let provider = build_provider(&config)?;
        let entries = EntryService::new(
            Arc::new(store),
            Arc::new(cache),
            config.redis.cache_ttl_seconds,
        );
        let sessions = ImportSessions::new(
            provider,
            config.suggestions.overwrite_policy,
            Duration::from_secs(config.sessions.idle_ttl_seconds),
        );
        let state = AppState::new(entries, sessions);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(http_port = port, "Import service listener bound");

        Ok(Self {
            port,
            listener,
            state,
            session_sweep_interval: Duration::from_secs(
                config.sessions.sweep_interval_seconds.max(1),
            ),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let sweeper = self
            .state
            .sessions
            .spawn_sweeper(self.session_sweep_interval);
        let router = build_router(self.state);

        tracing::info!(
            service = "import-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.port,
            "Service ready to accept connections"
        );

        let result = axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        });
        sweeper.abort();
        result
    }
}
