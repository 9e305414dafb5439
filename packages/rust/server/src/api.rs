//! HTTP handlers.
//!
//! - `POST /api/v1/discover`: run a discovery, streamed as NDJSON by default
//! - `GET /api/v1/lookup/{cnpj}`: resolve a single identifier
//! - `GET /health`

use std::convert::Infallible;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use prospector_core::{
    ChannelSink, NDJSON_CONTENT_TYPE, SilentSink, StreamEvent, encode_frame,
};
use prospector_registry::EntityResolver;
use prospector_shared::{Cnpj, FilterSet, SizeBand};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use crate::AppState;
use crate::error::{ApiError, ApiResult};

/// Body of `POST /api/v1/discover`.
#[derive(Debug, Deserialize)]
pub struct DiscoverRequest {
    #[serde(default)]
    pub segment: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: Option<String>,
    /// Band names as users type them ("EPP", "MICRO EMPRESA", "demais").
    #[serde(default)]
    pub size_bands: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// NDJSON stream (default) or one JSON document at the end.
    #[serde(default)]
    pub stream: Option<bool>,
}

impl DiscoverRequest {
    fn into_filters(self, limit: usize) -> ApiResult<FilterSet> {
        let size_bands = self
            .size_bands
            .iter()
            .map(|raw| {
                SizeBand::parse_label(raw)
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown size band {raw:?}")))
            })
            .collect::<ApiResult<Vec<_>>>()?;
        Ok(FilterSet {
            segment: self.segment,
            region: self.region,
            city: self.city,
            size_bands,
            limit,
        })
    }
}

async fn discover(
    State(state): State<AppState>,
    body: Result<Json<DiscoverRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let stream = request.stream.unwrap_or(true);
    let limit = state.pipeline.target_for(request.limit);
    let filters = request.into_filters(limit)?;
    filters.validate()?;

    info!(
        segment = %filters.segment,
        region = %filters.region,
        limit,
        stream,
        "discover request"
    );

    // Every run owns its own task: if the client disconnects, the handler
    // future is dropped but resolution continues and fills the cache.
    let pipeline = state.pipeline.clone();
    if !stream {
        let outcome = tokio::spawn(async move { pipeline.run(&filters, &SilentSink).await })
            .await
            .map_err(|e| ApiError::Internal(format!("discovery task failed: {e}")))??;
        return Ok(Json(outcome).into_response());
    }

    let (tx, rx) = mpsc::unbounded_channel::<StreamEvent>();
    tokio::spawn(async move {
        let sink = ChannelSink::new(tx);
        if let Err(e) = pipeline.run(&filters, &sink).await {
            debug!(error = %e, "streamed run ended with an error event");
        }
    });

    let frames = UnboundedReceiverStream::new(rx).map(|event| {
        let frame = encode_frame(&event).unwrap_or_else(|e| {
            let mut fallback = serde_json::json!({"type": "error", "message": e.to_string()})
                .to_string();
            fallback.push('\n');
            fallback
        });
        Ok::<_, Infallible>(frame)
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(frames))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn lookup(State(state): State<AppState>, Path(raw): Path<String>) -> ApiResult<Response> {
    let cnpj = Cnpj::parse(&raw).ok_or_else(|| ApiError::BadRequest("invalid identifier".into()))?;
    let resolution = state
        .pipeline
        .resolver()
        .resolve(&cnpj)
        .await
        .ok_or(ApiError::NotFound)?;
    Ok(Json(resolution).into_response())
}

async fn health() -> &'static str {
    "ok"
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/discover", post(discover))
        .route("/lookup/{cnpj}", get(lookup))
}

pub fn health_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
