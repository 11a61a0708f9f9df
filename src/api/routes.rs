//! Read API handlers
//!
//! - `GET  /api/stats/health` - liveness
//! - `GET  /api/stats/states?stateName=` - list, optional substring filter
//! - `GET  /api/stats/states/{stateName}` - one state, exact name
//! - `POST /api/stats/refresh` - synchronous manual refresh
//! - `GET  /health` - store connectivity and data presence

use super::error::ApiError;
use super::AppState;
use crate::pipeline::error::RefreshError;
use crate::pipeline::types::StatePopulationSnapshot;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MIN_FILTER_CHARS: usize = 2;
const CACHE_CONTROL_VALUE: &str = "public, max-age=60";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatesQuery {
    pub state_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub refreshed_at_utc: DateTime<Utc>,
    pub states_count: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct DataHealthResponse {
    pub status: DataHealth,
    pub description: String,
}

impl AppState {
    fn internal_error(&self, message: &str, err: &RefreshError) -> ApiError {
        ApiError::Internal {
            message: message.to_string(),
            details: self.expose_error_details.then(|| err.to_string()),
        }
    }
}

/// Trimmed filter; `None` when absent or blank
fn normalize_filter(raw: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(trimmed) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if trimmed.chars().count() < MIN_FILTER_CHARS {
        return Err(ApiError::BadRequest(format!(
            "State name filter must be at least {} characters long.",
            MIN_FILTER_CHARS
        )));
    }
    Ok(Some(trimmed.to_string()))
}

pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        utc: Utc::now(),
    })
}

pub async fn list_states(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = normalize_filter(params.state_name.as_deref())?;
    if let Some(f) = &filter {
        log::debug!("Filtering states by name: {}", f);
    }

    let rows: Vec<StatePopulationSnapshot> = state
        .store
        .list(filter.as_deref())
        .await
        .map_err(|e| state.internal_error("Failed to read state populations.", &e))?;

    log::info!("📤 Retrieved {} states", rows.len());
    Ok(([(header::CACHE_CONTROL, CACHE_CONTROL_VALUE)], Json(rows)))
}

pub async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(state_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state_name.trim().is_empty() {
        return Err(ApiError::BadRequest("State name cannot be empty.".to_string()));
    }

    let row = state
        .store
        .get(&state_name)
        .await
        .map_err(|e| state.internal_error("Failed to read state population.", &e))?;

    match row {
        Some(row) => Ok(([(header::CACHE_CONTROL, CACHE_CONTROL_VALUE)], Json(row))),
        None => {
            log::warn!("⚠️  State not found: {}", state_name);
            Err(ApiError::NotFound(format!(
                "State '{}' not found. The data might not have been refreshed yet.",
                state_name
            )))
        }
    }
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> Result<Json<RefreshResponse>, ApiError> {
    log::info!("🔄 Manual refresh triggered");
    let cancel = state.shutdown.child_token();

    let refreshed_at_utc = state.refresher.refresh(&cancel).await.map_err(|e| {
        if e.is_cancelled() {
            log::debug!("Manual refresh interrupted by shutdown");
        } else {
            log::error!("❌ Manual refresh failed: {}", e);
        }
        state.internal_error(
            "Failed to refresh demographics data. Please check logs for details.",
            &e,
        )
    })?;

    let states_count = state
        .store
        .count()
        .await
        .map_err(|e| state.internal_error("Failed to count refreshed states.", &e))?;

    Ok(Json(RefreshResponse {
        refreshed_at_utc,
        states_count,
    }))
}

pub async fn data_health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<DataHealthResponse>) {
    let (status, description) = match state.store.probe().await {
        Ok(true) => (DataHealth::Healthy, "Database is connected and contains data".to_string()),
        Ok(false) => (
            DataHealth::Degraded,
            "Database is connected but contains no data yet".to_string(),
        ),
        Err(e) => {
            log::error!("❌ Health check failed for database: {}", e);
            (DataHealth::Unhealthy, "Database health check failed".to_string())
        }
    };

    let code = match status {
        DataHealth::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(DataHealthResponse { status, description }))
}
