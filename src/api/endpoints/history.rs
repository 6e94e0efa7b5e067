//! History and file download endpoints.

use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Deleted, HistoryDetail, HistoryList, ListQuery, SearchQuery};
use crate::history::{HistoryStats, DEFAULT_LIST_LIMIT};

/// `GET /api/history?limit=`
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(query): Query<ListQuery>,
) -> Json<HistoryList> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Json(HistoryList {
        records: ctx.scheduler.history().list(limit).await,
    })
}

/// `GET /api/history/search?q=`
pub async fn search(
    State(ctx): State<ApiContext>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<HistoryList>, ApiError> {
    if query.q.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing search query".into()));
    }
    Ok(Json(HistoryList {
        records: ctx.scheduler.history().search(&query.q).await,
    }))
}

/// `GET /api/history/stats`
pub async fn stats(State(ctx): State<ApiContext>) -> Json<HistoryStats> {
    Json(ctx.scheduler.history().stats().await)
}

/// `GET /api/history/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<HistoryDetail>, ApiError> {
    let record = ctx.scheduler.history().get(&id).await?;
    if !record.has_document() {
        return Err(ApiError::NotFound(format!(
            "Document for record '{id}' no longer exists"
        )));
    }
    Ok(Json(record.into()))
}

/// `DELETE /api/history/:id`: removes the record and its files.
pub async fn delete(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Deleted>, ApiError> {
    ctx.scheduler.history().delete(&id).await?;
    Ok(Json(Deleted { id, deleted: true }))
}

/// `GET /api/files/:id/document`
pub async fn document(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let record = ctx.scheduler.history().get(&id).await?;
    let name = format!("{}.pdf", download_stem(&record.experiment_name, &record.student_name));
    serve_file(&record.document_path, &name).await
}

/// `GET /api/files/:id/source`
pub async fn source(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let record = ctx.scheduler.history().get(&id).await?;
    let name = format!("{}.tex", download_stem(&record.experiment_name, &record.student_name));
    serve_file(&record.source_path, &name).await
}

fn download_stem(experiment: &str, student: &str) -> String {
    let stem: String = format!("{}_{}", student.trim(), experiment.trim())
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "report".to_string()
    } else {
        stem.to_string()
    }
}

async fn serve_file(path: &FsPath, download_name: &str) -> Result<Response, ApiError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("{} no longer exists", download_name)));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    };

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let disposition = format!(
        "attachment; filename=\"{}\"",
        download_name.replace('"', "")
    );
    Ok((
        [
            (header::CONTENT_TYPE, mime.essence_str().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response())
}
