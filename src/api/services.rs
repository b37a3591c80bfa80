use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use std::collections::BTreeMap;

use super::{
    error::ApiError,
    models::{CreateJobRequest, CreateJobResponse, HealthResponse, MetricsResponse},
    state::AppState,
    validation::validate_create_job,
};
use crate::jobs::NewJob;

/// Job creation endpoint (POST /jobs)
///
/// Validates the request, partitions the job into chunks and dispatches the
/// first wave. Returns 202 with the new job id; a zero-image job is already
/// `completed` in the response.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_create_job(&request)?;

    let new_job = NewJob::builder()
        .project_id(request.project_id.trim())
        .keywords(request.keywords)
        .max_images(request.max_images)
        .maybe_priority(request.priority)
        .build();

    let job_id = state.manager.create_job(new_job).await?;
    let status = state.manager.get_job_status(&job_id)?;

    let response = CreateJobResponse {
        job_id,
        status: status.status,
        total_chunks: status.total_chunks,
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Job status endpoint (GET /jobs/{job_id})
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.manager.get_job_status(&job_id)?;
    Ok((StatusCode::OK, Json(status)))
}

/// Chunk counts by status (GET /jobs/{job_id}/chunks)
pub async fn get_chunk_statistics(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.manager.get_chunk_statistics(&job_id)?;
    Ok((StatusCode::OK, Json(stats)))
}

/// Cancel a job (POST /jobs/{job_id}/cancel)
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.manager.cancel_job(&job_id).await?;
    Ok((StatusCode::OK, Json(status)))
}

/// Counter snapshot and queue depth (GET /metrics)
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(MetricsResponse {
        counters: state.metrics.snapshot(),
        task_backlog: state.broker.backlog(),
    })
}

/// Health check endpoint (GET /health)
///
/// Returns 503 Service Unavailable if the ledger or the task broker is
/// unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = BTreeMap::new();

    components.insert("api".to_string(), "healthy".to_string());

    let ledger = match state.manager.store().stats() {
        Ok(_) => "healthy",
        Err(e) => {
            tracing::warn!(error = %e, "Ledger health check failed");
            "unhealthy"
        }
    };
    components.insert("ledger".to_string(), ledger.to_string());

    let broker = if state.broker.health_check().await {
        "healthy"
    } else {
        "unhealthy"
    };
    components.insert("task_broker".to_string(), broker.to_string());

    let all_healthy = components.values().all(|status| status == "healthy");
    let (status_code, overall_status) = if all_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
