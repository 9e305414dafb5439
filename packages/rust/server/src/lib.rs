//! HTTP front end for discovery runs.
//!
//! Exposes the discovery pipeline as an NDJSON event stream, plus a
//! single-identifier lookup and a health probe. Every run is spawned as its
//! own task, so a client that disconnects mid-run only loses the events;
//! the resolutions still reach the cache.

mod api;
mod error;

use std::sync::Arc;

use axum::Router;
use prospector_core::DiscoveryPipeline;
use prospector_discovery::{SearchProvider, UnavailableSearch, search_provider_from_config};
use prospector_registry::Resolver;
use prospector_shared::{AppConfig, PipelineConfig, ProspectorError, Result, cache_db_path};
use prospector_storage::Storage;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use api::DiscoverRequest;
pub use error::{ApiError, ApiResult};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<DiscoveryPipeline>,
}

/// Build the full router: `/api/v1/*` plus `/health`.
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", api::router())
        .merge(api::health_router())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Wire storage, resolver and search backend from configuration.
///
/// A search backend that cannot be configured (typically a missing API key)
/// does not stop the server: lookups keep working and discovery runs fail
/// with a search-unavailable error.
pub async fn build_state(config: &AppConfig) -> Result<AppState> {
    let db_path = cache_db_path(config)?;
    let storage = Arc::new(Storage::open(&db_path).await?);
    let resolver = Arc::new(Resolver::from_config(config, storage)?);

    let search: Arc<dyn SearchProvider> = match search_provider_from_config(config) {
        Ok(provider) => Arc::from(provider),
        Err(ProspectorError::SearchUnavailable(reason)) => {
            warn!(%reason, "search backend unavailable, discovery runs will fail");
            Arc::new(UnavailableSearch::new(reason))
        }
        Err(e) => return Err(e),
    };

    info!(
        db = %db_path.display(),
        search = search.id(),
        "server state ready"
    );
    Ok(AppState {
        pipeline: Arc::new(DiscoveryPipeline::new(
            search,
            resolver,
            PipelineConfig::from(config),
        )),
    })
}

/// Bind `listen_addr` and serve until Ctrl-C.
pub async fn serve(config: &AppConfig, listen_addr: &str) -> Result<()> {
    let state = build_state(config).await?;
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| ProspectorError::Network(format!("failed to bind {listen_addr}: {e}")))?;

    info!(addr = %listen_addr, "listening");
    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(|e| ProspectorError::Transport(format!("server error: {e}")))
}
