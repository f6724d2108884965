use crate::dtos::{LotResponse, SuccessResponse};
use crate::middleware::UserId;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;

pub async fn get_lot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LotResponse>, AppError> {
    let lot = state.documents.get_lot(&id).await?;
    Ok(Json(lot.into()))
}

/// Soft-deactivate: the lot stays readable but can no longer be sold from
/// or returned to.
#[tracing::instrument(skip(state, user_id), fields(user_id = %user_id.0))]
pub async fn deactivate_lot(
    State(state): State<AppState>,
    user_id: UserId,
    Path(id): Path<String>,
) -> Result<Json<LotResponse>, AppError> {
    let lot = state.documents.deactivate_lot(&id).await?;
    Ok(Json(lot.into()))
}

#[tracing::instrument(skip(state, user_id), fields(user_id = %user_id.0))]
pub async fn delete_lot(
    State(state): State<AppState>,
    user_id: UserId,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    let deleted = state.documents.delete_lot(&id).await?;
    Ok(Json(SuccessResponse {
        success: true,
        deleted,
    }))
}
