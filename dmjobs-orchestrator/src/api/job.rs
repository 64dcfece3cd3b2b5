//! Job API Handlers
//!
//! HTTP endpoints for the job lifecycle. Each handler is a thin mapping onto
//! [`JobService`].

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
};
use dmjobs_core::domain::progress::ProgressUpdate;
use dmjobs_core::dto::job::{
    JobResultResponse, JobStatusReport, JobSummary, RegisterJob, Registration, RemoveJobResponse,
    ServiceResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::service::JobService;

const ACCESS_KEY: &str = "access-key";

/// Document store token of the caller, if any
///
/// `Access-Key` wins over `Authorization`; the latter must be a bearer token.
pub fn request_token(headers: &HeaderMap) -> ApiResult<Option<String>> {
    if let Some(key) = headers.get(ACCESS_KEY) {
        let key = key
            .to_str()
            .map_err(|_| ApiError::BadRequest("Malformed Access-Key header".to_string()))?;
        return Ok(Some(key.to_string()));
    }

    let Some(authorization) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    authorization
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim())
        .filter(|token| !token.is_empty())
        .map(|token| Some(token.to_string()))
        .ok_or_else(|| {
            ApiError::BadRequest(
                "Malformed Authorization header, expected 'Bearer <token>'".to_string(),
            )
        })
}

// =============================================================================
// Job Lifecycle Endpoints
// =============================================================================

/// POST /jobs
/// Register the job document at `reference`
pub async fn register_job(
    State(service): State<Arc<JobService>>,
    headers: HeaderMap,
    Json(req): Json<RegisterJob>,
) -> ApiResult<(StatusCode, Json<Registration>)> {
    tracing::info!("Registering job from {}", req.reference);

    let token = request_token(&headers)?;
    let registration = service.register_job(&req.reference, token).await?;

    Ok((StatusCode::CREATED, Json(registration)))
}

/// GET /jobs/{uid}
/// Current status, log and progress of a job
pub async fn job_status(
    State(service): State<Arc<JobService>>,
    Path(uid): Path<Uuid>,
) -> ApiResult<Json<JobStatusReport>> {
    tracing::debug!("Getting status of job: {}", uid);

    Ok(Json(service.job_status(uid).await?))
}

/// DELETE /jobs/{uid}
/// Terminate a job and forget it
pub async fn remove_job(
    State(service): State<Arc<JobService>>,
    Path(uid): Path<Uuid>,
) -> ApiResult<Json<RemoveJobResponse>> {
    tracing::info!("Removing job: {}", uid);

    Ok(Json(service.remove_job(uid).await?))
}

/// GET /jobs/{uid}/result
/// Result of a completed job
pub async fn job_result(
    State(service): State<Arc<JobService>>,
    Path(uid): Path<Uuid>,
) -> ApiResult<Json<JobResultResponse>> {
    tracing::debug!("Getting result of job: {}", uid);

    let (message, result) = service.job_result(uid).await?;
    Ok(Json(JobResultResponse::new(message, &result)))
}

// =============================================================================
// Progress Endpoints
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ProgressQuery {
    #[serde(default)]
    pub overwrite_log: bool,
}

/// PUT /jobs/{uid}/progress
/// Progress pushed by the job itself
pub async fn push_progress(
    State(service): State<Arc<JobService>>,
    Path(uid): Path<Uuid>,
    Query(query): Query<ProgressQuery>,
    Json(update): Json<ProgressUpdate>,
) -> ApiResult<Json<JobSummary>> {
    tracing::debug!("Progress pushed for job: {}", uid);

    let job = service
        .push_progress(uid, query.overwrite_log, update)
        .await?;
    Ok(Json(job.into()))
}

// =============================================================================
// Service Endpoints
// =============================================================================

/// POST /jobs/{uid}/services/{service_id}
pub async fn setup_service(
    State(service): State<Arc<JobService>>,
    Path((uid, service_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<ServiceResponse>> {
    tracing::info!("Setting up service {} for job {}", service_id, uid);

    let message = service.setup_service(uid, &service_id).await?;
    Ok(Json(ServiceResponse { message }))
}

/// DELETE /jobs/{uid}/services/{service_id}
pub async fn teardown_service(
    State(service): State<Arc<JobService>>,
    Path((uid, service_id)): Path<(Uuid, String)>,
) -> ApiResult<Json<ServiceResponse>> {
    tracing::info!("Tearing down service {} for job {}", service_id, uid);

    let message = service.teardown_service(uid, &service_id).await?;
    Ok(Json(ServiceResponse { message }))
}
