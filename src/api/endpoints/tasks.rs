//! Task submission, polling, cancellation and removal, plus manual source
//! edits of a finished report.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Deleted, GenerateBody, ModifyBody, TaskCreated, UpdateSourceBody};
use crate::pipeline::{EditOutcome, GenerateRequest, ModifyRequest, TaskRecord, TaskResult, TaskStatus};

/// `POST /api/generate`: queues a generation task and returns at once.
pub async fn generate(
    State(ctx): State<ApiContext>,
    Json(body): Json<GenerateBody>,
) -> Result<(StatusCode, Json<TaskCreated>), ApiError> {
    if body.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing session_id".into()));
    }
    let task_id = ctx
        .scheduler
        .submit(GenerateRequest {
            session_id: body.session_id,
            metadata: body.metadata,
            credentials: body.credentials,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskCreated {
            task_id,
            status: TaskStatus::Queued,
        }),
    ))
}

/// `POST /api/modify`: queues a revision of the session's latest report.
pub async fn modify(
    State(ctx): State<ApiContext>,
    Json(body): Json<ModifyBody>,
) -> Result<(StatusCode, Json<TaskCreated>), ApiError> {
    let task_id = ctx
        .scheduler
        .modify(ModifyRequest {
            session_id: body.session_id,
            instruction: body.modification,
            credentials: body.credentials,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TaskCreated {
            task_id,
            status: TaskStatus::Queued,
        }),
    ))
}

/// `GET /api/task/:id`
pub async fn poll(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    ctx.scheduler
        .poll(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Task '{id}' not found")))
}

/// `POST /api/task/:id/cancel`
pub async fn cancel(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    ctx.scheduler.cancel(&id)?;
    ctx.scheduler
        .poll(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Task '{id}' not found")))
}

/// `DELETE /api/task/:id`: forgets a finished task. Running tasks answer 409.
pub async fn delete(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Deleted>, ApiError> {
    ctx.scheduler.delete_task(&id).await?;
    Ok(Json(Deleted { id, deleted: true }))
}

/// `POST /api/update-source`: recompiles a hand-edited source in place.
///
/// A source that fails to compile answers 422 with the compiler log and
/// leaves the previous document untouched.
pub async fn update_source(
    State(ctx): State<ApiContext>,
    Json(body): Json<UpdateSourceBody>,
) -> Result<Json<TaskResult>, ApiError> {
    if body.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing session_id".into()));
    }
    match ctx.scheduler.update_source(&body.session_id, body.source).await? {
        EditOutcome::Compiled(result) => Ok(Json(result)),
        EditOutcome::Rejected(log) => Err(ApiError::CompilationFailed(log)),
    }
}
