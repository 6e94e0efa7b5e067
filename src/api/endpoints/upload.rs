//! Upload and session endpoints.

use axum::extract::{Multipart, Path, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Deleted, UploadResponse};
use crate::session::{ArtifactRole, IncomingFile};

/// `POST /api/upload`: multipart with `files` (repeated), `type` and an
/// optional `session_id`.
pub async fn upload(
    State(ctx): State<ApiContext>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut role: Option<String> = None;
    let mut session_id: Option<String> = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "type" => {
                role = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            "session_id" => {
                session_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            "files" | "file" => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let data = field.bytes().await.map_err(|e| {
                    tracing::warn!("Failed to read upload bytes: {e}");
                    ApiError::BadRequest("Failed to read file data".into())
                })?;
                if file_name.is_empty() && data.is_empty() {
                    continue;
                }
                files.push(IncomingFile {
                    name: file_name,
                    data: data.to_vec(),
                });
            }
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".into()));
    }
    let role: ArtifactRole = role
        .ok_or_else(|| ApiError::BadRequest("Missing upload type".into()))?
        .parse()?;

    let (session_id, stored) = ctx
        .scheduler
        .sessions()
        .upload(session_id.as_deref(), role, files)
        .await?;

    Ok(Json(UploadResponse {
        session_id,
        files: stored,
    }))
}

/// `DELETE /api/session/:id`
pub async fn delete_session(
    State(ctx): State<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Deleted>, ApiError> {
    ctx.scheduler.sessions().delete(&id).await?;
    Ok(Json(Deleted { id, deleted: true }))
}
