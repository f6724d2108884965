use crate::dtos::{CreateReturnRequest, CreateReturnResponse, ReturnResponse};
use crate::middleware::UserId;
use crate::services::returns::ReturnRequest;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use validator::Validate;

#[tracing::instrument(
    skip(state, request, user_id),
    fields(user_id = %user_id.0, original = %request.original_code)
)]
pub async fn create_return(
    State(state): State<AppState>,
    user_id: UserId,
    Json(request): Json<CreateReturnRequest>,
) -> Result<(StatusCode, Json<CreateReturnResponse>), AppError> {
    request.validate()?;

    let created = state
        .returns
        .create_return(ReturnRequest::from(request), &user_id.0, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn get_return(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReturnResponse>, AppError> {
    let ret = state.returns.get_return(&id).await?;
    Ok(Json(ret.into()))
}
