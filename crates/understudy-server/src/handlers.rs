//! API route handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::{debug, info};

use understudy_core::{Mode, RecordsView};

use crate::error::{ApiError, Result};
use crate::models::{
    CountResponse, HealthResponse, MessageResponse, MetadataResponse, SetMetadataRequest,
    StateRequest, StateResponse, Stats, StatsResponse,
};
use crate::state::AppState;

/// GET /api/records - All recorded pairs.
pub async fn get_records(State(state): State<AppState>) -> Result<Json<RecordsView>> {
    let records = state.engine.records().await?;
    debug!("Returning {} records", records.data.len());
    Ok(Json(records))
}

/// POST /api/records - Import an envelope of pairs.
pub async fn import_records(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MessageResponse>> {
    let view: RecordsView =
        serde_json::from_slice(&body).map_err(|e| ApiError::Unprocessable(e.to_string()))?;
    let imported = state.engine.import_records(view).await?;
    Ok(Json(MessageResponse::new(format!(
        "{} payloads import complete.",
        imported
    ))))
}

/// DELETE /api/records - Remove every recorded pair.
pub async fn delete_records(State(state): State<AppState>) -> Result<Json<MessageResponse>> {
    state.engine.delete_records().await?;
    Ok(Json(MessageResponse::new("Proxy cache deleted successfully")))
}

/// GET /api/count - Number of recorded pairs.
pub async fn get_count(State(state): State<AppState>) -> Result<Json<CountResponse>> {
    let count = state.engine.records_count().await?;
    Ok(Json(CountResponse { count }))
}

/// GET /api/stats - Per-mode counters and record count.
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let records_count = state.engine.records_count().await?;
    Ok(Json(StatsResponse {
        stats: Stats {
            counters: state.engine.counter().snapshot(),
        },
        records_count,
    }))
}

fn current_state(state: &AppState) -> StateResponse {
    StateResponse {
        mode: state.engine.mode(),
        destination: state.engine.destination(),
    }
}

/// GET /api/state - Active mode and destination.
pub async fn get_state(State(state): State<AppState>) -> Json<StateResponse> {
    Json(current_state(&state))
}

/// POST /api/state - Change mode and/or destination.
pub async fn set_state(
    State(state): State<AppState>,
    Json(req): Json<StateRequest>,
) -> Result<Json<StateResponse>> {
    // Validate both before applying either
    let mode = req.mode.as_deref().map(str::parse::<Mode>).transpose()?;
    if let Some(mode) = mode {
        if mode.requires_transform() && state.engine.middleware().is_none() {
            return Err(ApiError::BadRequest(format!(
                "{} mode requires middleware",
                mode
            )));
        }
    }

    if let Some(destination) = req.destination.as_deref() {
        state.engine.set_destination(destination)?;
    }
    if let Some(mode) = mode {
        state.engine.set_mode(mode)?;
        info!("Mode set to {} through the admin API", mode);
    }

    Ok(Json(current_state(&state)))
}

/// GET /api/metadata - All metadata entries.
pub async fn get_metadata(State(state): State<AppState>) -> Result<Json<MetadataResponse>> {
    let data = state.engine.metadata().await?;
    Ok(Json(MetadataResponse { data }))
}

/// PUT /api/metadata - Store one entry.
pub async fn set_metadata(
    State(state): State<AppState>,
    Json(req): Json<SetMetadataRequest>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    if req.key.is_empty() {
        return Err(ApiError::BadRequest("key is required".to_string()));
    }
    state.engine.set_metadata(&req.key, &req.value).await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new(format!(
            "Key:{} Value:{} added to metadata.",
            req.key, req.value
        ))),
    ))
}

/// DELETE /api/metadata - Remove every entry.
pub async fn delete_metadata(State(state): State<AppState>) -> Result<Json<MessageResponse>> {
    state.engine.delete_metadata().await?;
    Ok(Json(MessageResponse::new("Metadata deleted successfully")))
}

/// GET /api/health - Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
