use crate::dtos::{CreateDocumentRequest, CreateDocumentResponse, DocumentResponse, SuccessResponse};
use crate::middleware::UserId;
use crate::services::documents::NewDocument;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{Datelike, Utc};
use service_core::error::AppError;
use validator::Validate;

#[tracing::instrument(skip(state, request, user_id), fields(user_id = %user_id.0))]
pub async fn create_document(
    State(state): State<AppState>,
    user_id: UserId,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<CreateDocumentResponse>), AppError> {
    request.validate()?;

    let now = Utc::now();
    let year = request.date.map(|d| d.year()).unwrap_or_else(|| now.year());
    let created = state
        .documents
        .create_document(NewDocument::from(request), &user_id.0, now)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateDocumentResponse::new(created, year)),
    ))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    let found = state.documents.get_document(&id).await?;
    Ok(Json(found.into()))
}

/// Delete a document with its lines. Sales put their unreturned
/// quantities back on the lots first.
#[tracing::instrument(skip(state, user_id), fields(user_id = %user_id.0))]
pub async fn delete_document(
    State(state): State<AppState>,
    user_id: UserId,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    let deleted = state.documents.delete_document(&id).await?;
    Ok(Json(SuccessResponse {
        success: true,
        deleted,
    }))
}
