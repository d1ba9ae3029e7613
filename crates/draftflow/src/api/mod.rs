use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::api::models::{
    AcceptedResponse, CancelResponse, ErrorBody, JobSnapshot, RunRequest, RunResponse,
};
use crate::error::EngineError;
use crate::jobs::logs::JobLogsRepo;
use crate::jobs::metrics::MetricsRepo;
use crate::jobs::model::{JobMode, JobResult};
use crate::jobs::pipeline::{Pipeline, PipelineOutcome};
use crate::jobs::repo::JobsRepo;
use crate::jobs::{CreateJobRequest, JobFactory};

pub mod models;
pub mod stream;

#[derive(Clone)]
pub struct ApiState {
    pub jobs: JobsRepo,
    pub logs: JobLogsRepo,
    pub factory: JobFactory,
    pub pipeline: Pipeline,
    pub metrics: MetricsRepo,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Job orchestration
        .route("/run", post(run_job))
        .route("/job/:id", get(get_job).delete(cancel_job))
        .route("/job/:id/stream", get(stream::stream_job))
        // Metrics
        .route("/metrics", get(metrics))
        .route("/metrics/prom", get(metrics_prom))
        // Health
        .route("/health", get(health))
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn engine_err(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::RateLimitExceeded { .. } | EngineError::ConcurrencyExceeded { .. } => {
            StatusCode::TOO_MANY_REQUESTS
        }
        EngineError::LockAcquisitionFailure(_) => StatusCode::CONFLICT,
        EngineError::JobNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(ErrorBody { error: e.to_string() }))
}

fn internal_err(e: anyhow::Error) -> ApiError {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: format!("internal error: {e}"),
        }),
    )
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
}

/// Create a job and, unless `async` was requested, run the pipeline in the
/// same request. An idempotent replay of an already-finished job returns
/// its stored outcome instead of re-running anything.
pub async fn run_job(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<RunRequest>,
) -> Result<Response, ApiError> {
    let mode = match body.mode.as_deref() {
        None => None,
        Some(raw) => Some(
            JobMode::parse(raw).ok_or_else(|| bad_request("mode must be 'dry_run' or 'full'"))?,
        ),
    };

    let idempotency_key = body.idempotency_key.or_else(|| {
        headers
            .get("idempotency-key")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let job = state
        .factory
        .create_job(CreateJobRequest {
            mode,
            collection_handle: body.collection_handle,
            target_word_count: body.target_word_count,
            triggered_by: body.triggered_by,
            idempotency_key,
            request_id,
        })
        .await
        .map_err(engine_err)?;

    if body.run_async {
        return Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { job_id: job.id })).into_response());
    }

    // Idempotent replay of a job that already ran: report what happened,
    // do not run it again.
    if job.status != "pending" {
        let logs = state.logs.list_for_job(job.id).await.map_err(internal_err)?;
        let result = job
            .result
            .clone()
            .and_then(|v| serde_json::from_value::<JobResult>(v).ok());
        return Ok((
            StatusCode::OK,
            Json(RunResponse {
                job_id: job.id,
                result,
                logs,
            }),
        )
            .into_response());
    }

    let outcome = state.pipeline.process_job(job.id).await.map_err(engine_err)?;
    let logs = state.logs.list_for_job(job.id).await.map_err(internal_err)?;

    let result = match outcome {
        PipelineOutcome::Completed(result) => Some(result),
        PipelineOutcome::Cancelled { .. } => None,
    };

    Ok((
        StatusCode::OK,
        Json(RunResponse {
            job_id: job.id,
            result,
            logs,
        }),
    )
        .into_response())
}

pub async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let job = state
        .jobs
        .get_job(id)
        .await
        .map_err(internal_err)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: "job not found".into(),
                }),
            )
        })?;

    let logs = state.logs.list_for_job(id).await.map_err(internal_err)?;

    Ok(Json(JobSnapshot { job, logs }))
}

/// Cancellation request. Succeeds only while the job is still `pending` or
/// `running`; the executor observes the flip at its next checkpoint.
pub async fn cancel_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = state.jobs.request_cancel(id).await.map_err(internal_err)?;
    if cancelled {
        return Ok(Json(CancelResponse {
            job_id: id,
            cancelled: true,
        }));
    }

    match state.jobs.get_job(id).await.map_err(internal_err)? {
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "job not found".into(),
            }),
        )),
        Some(job) => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: format!("job is already {}", job.status),
            }),
        )),
    }
}

pub async fn metrics(
    State(state): State<ApiState>,
) -> Result<Json<crate::jobs::metrics::Metrics>, ApiError> {
    let snapshot = state.metrics.snapshot().await.map_err(internal_err)?;
    Ok(Json(snapshot))
}

pub async fn metrics_prom(State(state): State<ApiState>) -> Response {
    // Minimal Prometheus text format (no extra crate needed).
    match state.metrics.snapshot().await {
        Ok(m) => {
            let body = format!(
                concat!(
                    "# HELP draftflow_pending_jobs Number of pending jobs\n",
                    "# TYPE draftflow_pending_jobs gauge\n",
                    "draftflow_pending_jobs {}\n",
                    "# HELP draftflow_running_jobs Number of running jobs\n",
                    "# TYPE draftflow_running_jobs gauge\n",
                    "draftflow_running_jobs {}\n",
                    "# HELP draftflow_jobs_completed_last_60s Jobs completed in last 60s\n",
                    "# TYPE draftflow_jobs_completed_last_60s gauge\n",
                    "draftflow_jobs_completed_last_60s {}\n",
                    "# HELP draftflow_jobs_failed_last_60s Jobs failed in last 60s\n",
                    "# TYPE draftflow_jobs_failed_last_60s gauge\n",
                    "draftflow_jobs_failed_last_60s {}\n",
                    "# HELP draftflow_jobs_cancelled_last_60s Jobs cancelled in last 60s\n",
                    "# TYPE draftflow_jobs_cancelled_last_60s gauge\n",
                    "draftflow_jobs_cancelled_last_60s {}\n"
                ),
                m.pending, m.running, m.completed_last_60s, m.failed_last_60s, m.cancelled_last_60s
            );

            (StatusCode::OK, body).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics error: {e}"),
        )
            .into_response(),
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
