//! Management API server.
//!
//! A thin JSON facade over the update engine: configuration, feeds,
//! episodes, live progress (snapshot + SSE), and job history. When the
//! local storage backend is active, the data directory is also served so
//! published feed documents and media are reachable under the configured
//! hostname.

use crate::config::StorageType;
use crate::error::{Error, Result};
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

pub mod auth;
pub mod error_response;
pub mod routes;
pub mod state;

pub use state::AppState;

/// Maximum request body size (bounded by the TLS upload limit)
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Build the API router with every route definition.
///
/// # Routes
///
/// ## Configuration
/// - `GET /config` - Current effective configuration (secrets masked)
/// - `PUT /config/:section` - Partial update of one section
/// - `POST /config/tls/upload` - Upload TLS certificate and key
/// - `POST /config/restart` - Trigger in-process shutdown
///
/// ## Feeds
/// - `GET /feeds`, `POST /feeds`
/// - `GET|PUT|DELETE /feeds/:id`
/// - `POST /feeds/:id/refresh` - Asynchronous enqueue
///
/// ## Episodes
/// - `GET /episodes` - Filtered listing
/// - `DELETE /episodes/:feed_id/:episode_id`
/// - `POST /episodes/:feed_id/:episode_id/retry`
/// - `POST /episodes/:feed_id/:episode_id/block`
///
/// ## Progress
/// - `GET /progress` - Single JSON snapshot
/// - `GET /progress/stream` - Server-Sent Events, one frame per 500 ms
///
/// ## History
/// - `GET /history`, `DELETE /history`
/// - `GET|DELETE /history/:id`
/// - `GET /history/stats`, `POST /history/cleanup`
///
/// ## System
/// - `GET /health`
pub fn create_router(state: AppState) -> Router {
    let config = state.config_snapshot();

    let router = Router::new()
        // Configuration
        .route("/config", get(routes::get_config))
        .route("/config/:section", put(routes::update_config_section))
        .route("/config/tls/upload", post(routes::upload_tls))
        .route("/config/restart", post(routes::restart))
        // Feeds
        .route("/feeds", get(routes::list_feeds).post(routes::create_feed))
        .route(
            "/feeds/:id",
            get(routes::get_feed)
                .put(routes::update_feed)
                .delete(routes::delete_feed),
        )
        .route("/feeds/:id/refresh", post(routes::refresh_feed))
        // Episodes
        .route("/episodes", get(routes::list_episodes))
        .route(
            "/episodes/:feed_id/:episode_id",
            delete(routes::delete_episode),
        )
        .route(
            "/episodes/:feed_id/:episode_id/retry",
            post(routes::retry_episode),
        )
        .route(
            "/episodes/:feed_id/:episode_id/block",
            post(routes::block_episode),
        )
        // Progress
        .route("/progress", get(routes::get_progress))
        .route("/progress/stream", get(routes::stream_progress))
        // History
        .route(
            "/history",
            get(routes::list_history).delete(routes::delete_all_history),
        )
        .route("/history/stats", get(routes::history_stats))
        .route("/history/cleanup", post(routes::cleanup_history))
        .route(
            "/history/:id",
            get(routes::get_history_entry).delete(routes::delete_history_entry),
        )
        // System
        .route("/health", get(routes::health));

    // The local backend serves published documents and media directly.
    let router = if config.storage.storage_type == StorageType::Local {
        router.fallback_service(ServeDir::new(config.storage.local.data_dir.clone()))
    } else {
        router
    };

    // Basic auth is the innermost layer, CORS the outermost.
    router
        .with_state(state)
        .layer(middleware::from_fn_with_state(
            config.server.basic_auth.clone(),
            auth::require_basic_auth,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
}

/// Start the API server on the configured bind address.
///
/// Serves plain HTTP or TLS depending on the server configuration and runs
/// until the state's cancellation token fires.
pub async fn start_api_server(state: AppState) -> Result<()> {
    let config = state.config_snapshot();
    let shutdown = state.shutdown.clone();

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .map_err(|e| Error::Config {
            message: format!("invalid bind address: {e}"),
            key: Some("server.bind_address".into()),
        })?;

    let app = create_router(state);

    if config.server.tls {
        let certificate = config.server.certificate_path.ok_or_else(|| Error::Config {
            message: "tls enabled without certificate_path".into(),
            key: Some("server.certificate_path".into()),
        })?;
        let key = config.server.key_file_path.ok_or_else(|| Error::Config {
            message: "tls enabled without key_file_path".into(),
            key: Some("server.key_file_path".into()),
        })?;

        let tls = RustlsConfig::from_pem_file(&certificate, &key)
            .await
            .map_err(|e| Error::ApiServer(format!("failed to load TLS material: {e}")))?;

        tracing::info!(%addr, "API server listening (TLS)");

        let handle = axum_server::Handle::new();
        {
            let handle = handle.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
            });
        }

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .map_err(|e| Error::ApiServer(e.to_string()))?;
    } else {
        let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
        tracing::info!(%addr, "API server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| Error::ApiServer(e.to_string()))?;
    }

    tracing::info!("API server stopped");
    Ok(())
}
