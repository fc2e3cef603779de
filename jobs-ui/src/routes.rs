//! HTTP route handlers: collaborator listings, active runs and the log browser.

use std::io::ErrorKind;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use jobs::io::pairs::read_pair_whitelist;
use jobs::io::run_logs::{list_run_logs, run_log_path};
use jobs::io::strategy_files::{list_apply_candidates, list_parameter_files, list_strategies};
use jobs::io::workdirs::read_workdirs;
use jobs::registry::ActiveRun;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/strategies", get(get_strategies))
        .route("/parameter-files", get(get_parameter_files))
        .route("/workdirs", get(get_workdirs))
        .route("/pairs", get(get_pairs))
        .route("/runs", get(get_runs))
        .route("/runs/{run_id}/cancel", post(cancel_run))
}

/// Build the read-only log browser router.
pub fn logs_router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_logs))
        .route("/{name}", get(get_log))
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct StrategiesResponse {
    strategies: Vec<String>,
    default: String,
}

/// GET /api/strategies - strategy names plus the configured default.
async fn get_strategies(
    State(state): State<AppState>,
) -> Result<Json<StrategiesResponse>, StatusCode> {
    let config = state.config();
    let strategies = list_strategies(&config.strategies_dir()).map_err(internal)?;
    Ok(Json(StrategiesResponse {
        strategies,
        default: config.default_strategy.clone(),
    }))
}

#[derive(Debug, Serialize)]
struct ParameterFilesResponse {
    /// Files a backtest may be pointed at.
    eligible: Vec<String>,
    /// Files that may be promoted to a strategy default.
    apply_candidates: Vec<String>,
}

/// GET /api/parameter-files
async fn get_parameter_files(
    State(state): State<AppState>,
) -> Result<Json<ParameterFilesResponse>, StatusCode> {
    let dir = state.config().strategies_dir();
    Ok(Json(ParameterFilesResponse {
        eligible: list_parameter_files(&dir).map_err(internal)?,
        apply_candidates: list_apply_candidates(&dir).map_err(internal)?,
    }))
}

/// GET /api/workdirs - publishable working directories.
async fn get_workdirs(State(state): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    let config = state.config();
    let dirs = read_workdirs(&config.workdirs_file(), &config.project_dir).map_err(internal)?;
    Ok(Json(dirs.iter().map(|d| d.display().to_string()).collect()))
}

#[derive(Debug, Serialize)]
struct PairsResponse {
    count: usize,
    pairs: Vec<String>,
}

/// GET /api/pairs - the exchange whitelist; never fails.
async fn get_pairs(State(state): State<AppState>) -> Json<PairsResponse> {
    let pairs = read_pair_whitelist(&state.config().exchange_config());
    Json(PairsResponse {
        count: pairs.len(),
        pairs,
    })
}

/// GET /api/runs - runs currently holding an exclusion group.
async fn get_runs(State(state): State<AppState>) -> Json<Vec<ActiveRun>> {
    Json(state.registry().active())
}

/// POST /api/runs/:run_id/cancel
async fn cancel_run(State(state): State<AppState>, Path(run_id): Path<String>) -> StatusCode {
    if state.registry().cancel(&run_id) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}

/// GET /logs - sorted run log names.
async fn get_logs(State(state): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    list_run_logs(&state.log_dir()).map(Json).map_err(internal)
}

/// GET /logs/:name - one run log as text.
async fn get_log(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<String, StatusCode> {
    let path = run_log_path(&state.log_dir(), &name).map_err(|_| StatusCode::BAD_REQUEST)?;
    match tokio::fs::read(&path).await {
        Ok(raw) => Ok(String::from_utf8_lossy(&raw).into_owned()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            warn!(path = %path.display(), err = %e, "failed to read run log");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn internal(err: anyhow::Error) -> StatusCode {
    warn!(err = %format!("{err:#}"), "listing failed");
    StatusCode::INTERNAL_SERVER_ERROR
}
