//! REST endpoints for leads, metrics and pipeline control.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::error::{DatabaseError, PipelineError};
use crate::leads::model::{LeadStatus, NewLead};
use crate::pipeline::Orchestrator;
use crate::pipeline::types::{ChannelSelection, EnrichmentMode, RunConfig, RunReport};
use crate::store::LeadStore;

const DEFAULT_LEAD_COUNT: usize = 200;
const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_SEED: u64 = 42;

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn LeadStore>,
    /// Dry-run default for requests that do not say.
    pub default_dry_run: bool,
}

/// Body of `POST /pipeline/run`. Missing fields take defaults.
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    pub dry_run: Option<bool>,
    pub enrichment_mode: Option<EnrichmentMode>,
    pub lead_count: Option<usize>,
    pub channel: Option<ChannelSelection>,
}

/// Body of `POST /stages/generate`.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    pub count: Option<usize>,
    pub seed: Option<u64>,
}

/// Body of `POST /stages/enrich`.
#[derive(Debug, Default, Deserialize)]
pub struct EnrichRequest {
    pub mode: Option<EnrichmentMode>,
    pub limit: Option<usize>,
}

/// Body of `POST /stages/messages`.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesRequest {
    pub limit: Option<usize>,
}

/// Body of `POST /stages/send`.
#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    pub channel: Option<ChannelSelection>,
    pub dry_run: Option<bool>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// Build the API router.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/leads", get(list_leads).post(submit_lead).delete(clear_leads))
        .route("/leads/{id}", get(get_lead))
        .route("/pipeline/run", post(run_pipeline))
        .route("/pipeline/stop", post(stop_pipeline))
        .route("/pipeline/status", get(pipeline_status))
        .route("/stages/generate", post(stage_generate))
        .route("/stages/enrich", post(stage_enrich))
        .route("/stages/messages", post(stage_messages))
        .route("/stages/send", post(stage_send))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({"error": message.into()}))).into_response()
}

fn db_error(e: DatabaseError) -> Response {
    error!(error = %e, "Store request failed");
    error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn start_error(e: PipelineError) -> Response {
    match e {
        PipelineError::Conflict { .. } => error_json(StatusCode::CONFLICT, e.to_string()),
        PipelineError::InvalidConfig(_) => error_json(StatusCode::BAD_REQUEST, e.to_string()),
        other => {
            error!(error = %other, "Pipeline start failed");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

// ── Service ─────────────────────────────────────────────────────────────

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "lead-outreach",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health", "/metrics", "/leads", "/leads/{id}",
            "/pipeline/run", "/pipeline/stop", "/pipeline/status",
            "/stages/generate", "/stages/enrich", "/stages/messages", "/stages/send"
        ]
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "lead-outreach"
    }))
}

async fn metrics(State(state): State<AppState>) -> Response {
    let metrics = match state.store.metrics().await {
        Ok(m) => m,
        Err(e) => return db_error(e),
    };
    let run = state.orchestrator.status().await;
    Json(serde_json::json!({
        "store": metrics,
        "pipeline": run,
    }))
    .into_response()
}

// ── Leads ───────────────────────────────────────────────────────────────

async fn list_leads(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => match raw.parse::<LeadStatus>() {
            Ok(status) => Some(status),
            Err(e) => return error_json(StatusCode::BAD_REQUEST, e),
        },
        None => None,
    };

    let leads = match state.store.list_by_status(status).await {
        Ok(leads) => leads,
        Err(e) => return db_error(e),
    };
    let total = leads.len();
    let page: Vec<_> = leads
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(DEFAULT_PAGE_SIZE))
        .collect();

    Json(serde_json::json!({
        "total": total,
        "leads": page,
    }))
    .into_response()
}

async fn get_lead(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let detail = match state.store.get_with_enrichment(id).await {
        Ok(Some(detail)) => detail,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, format!("Lead {id} not found")),
        Err(e) => return db_error(e),
    };
    let messages = match state.store.get_lead_messages(id).await {
        Ok(messages) => messages,
        Err(e) => return db_error(e),
    };
    let dispatch_results = match state.store.list_dispatch_results(id).await {
        Ok(results) => results,
        Err(e) => return db_error(e),
    };

    Json(serde_json::json!({
        "lead": detail.lead,
        "enrichment": detail.enrichment,
        "messages": messages,
        "dispatch_results": dispatch_results,
    }))
    .into_response()
}

/// POST /leads: intake one external lead and run it through the pipeline.
async fn submit_lead(State(state): State<AppState>, Json(lead): Json<NewLead>) -> Response {
    let mut config = RunConfig::single(lead);
    config.dry_run = state.default_dry_run;

    match state.orchestrator.start_run(config).await {
        Ok(ticket) => {
            info!(run_id = %ticket.run_id, "Single-lead run accepted");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "message": "Lead accepted",
                    "run_id": ticket.run_id,
                })),
            )
                .into_response()
        }
        Err(e) => start_error(e),
    }
}

/// DELETE /leads: wipe all stored data. Refused while a run is active.
async fn clear_leads(State(state): State<AppState>) -> Response {
    if state.orchestrator.is_running().await {
        return error_json(
            StatusCode::CONFLICT,
            "Cannot clear data while the pipeline is running",
        );
    }
    match state.store.clear_all().await {
        Ok(()) => {
            info!("All lead data cleared");
            Json(serde_json::json!({"message": "All data cleared"})).into_response()
        }
        Err(e) => db_error(e),
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────

async fn run_pipeline(
    State(state): State<AppState>,
    body: Option<Json<RunRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let mut config = RunConfig::bulk(request.lead_count.unwrap_or(DEFAULT_LEAD_COUNT));
    config.dry_run = request.dry_run.unwrap_or(state.default_dry_run);
    config.enrichment_mode = request.enrichment_mode.unwrap_or_default();
    config.channels = request.channel.unwrap_or_default();

    match state.orchestrator.start_run(config).await {
        Ok(ticket) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "message": "Pipeline started",
                "run_id": ticket.run_id,
                "config": ticket.config,
            })),
        )
            .into_response(),
        Err(e) => start_error(e),
    }
}

async fn stop_pipeline(State(state): State<AppState>) -> impl IntoResponse {
    let stopped = state.orchestrator.stop().await;
    let message = if stopped {
        "Pipeline stop requested"
    } else {
        "Pipeline is not running"
    };
    Json(serde_json::json!({
        "message": message,
        "stopped": stopped,
    }))
}

async fn pipeline_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.status().await)
}

// ── Single stages ───────────────────────────────────────────────────────
//
// These run inline and answer with the run report once the stage is done.

fn stage_response(result: Result<RunReport, PipelineError>) -> Response {
    match result {
        Ok(report) => Json(report).into_response(),
        Err(e) => start_error(e),
    }
}

async fn stage_generate(
    State(state): State<AppState>,
    body: Option<Json<GenerateRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    stage_response(
        state
            .orchestrator
            .generate_leads(
                request.count.unwrap_or(DEFAULT_LEAD_COUNT),
                request.seed.unwrap_or(DEFAULT_SEED),
            )
            .await,
    )
}

async fn stage_enrich(
    State(state): State<AppState>,
    body: Option<Json<EnrichRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    stage_response(
        state
            .orchestrator
            .enrich_leads(request.mode.unwrap_or_default(), request.limit)
            .await,
    )
}

async fn stage_messages(
    State(state): State<AppState>,
    body: Option<Json<MessagesRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    stage_response(state.orchestrator.generate_messages(request.limit).await)
}

async fn stage_send(
    State(state): State<AppState>,
    body: Option<Json<SendRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    stage_response(
        state
            .orchestrator
            .send_outreach(
                request.channel.unwrap_or_default(),
                request.dry_run.unwrap_or(state.default_dry_run),
                request.limit,
            )
            .await,
    )
}
