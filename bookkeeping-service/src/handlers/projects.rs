use crate::dtos::{CreateChildRequest, CreateChildResponse, CreateProjectRequest, ProjectResponse};
use crate::middleware::UserId;
use crate::models::{ChildRef, ParentRef};
use crate::services::hierarchy::{CascadeReport, ReconcileReport};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use service_core::error::AppError;
use validator::Validate;

#[tracing::instrument(skip(state, request, user_id), fields(user_id = %user_id.0))]
pub async fn create_project(
    State(state): State<AppState>,
    user_id: UserId,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectResponse>), AppError> {
    request.validate()?;

    let project = state
        .hierarchy
        .create_project(&request.name, &user_id.0)
        .await?;
    let tree = state.hierarchy.project_tree(&project.id).await?;

    Ok((StatusCode::CREATED, Json(tree.into())))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectResponse>, AppError> {
    let tree = state.hierarchy.project_tree(&id).await?;
    Ok(Json(tree.into()))
}

#[tracing::instrument(skip(state, user_id), fields(user_id = %user_id.0))]
pub async fn delete_project(
    State(state): State<AppState>,
    user_id: UserId,
    Path(id): Path<String>,
) -> Result<Json<CascadeReport>, AppError> {
    let report = state.hierarchy.delete_project_cascade(&id).await?;
    Ok(Json(report))
}

#[tracing::instrument(skip(state, user_id), fields(user_id = %user_id.0))]
pub async fn reconcile_project(
    State(state): State<AppState>,
    user_id: UserId,
    Path(id): Path<String>,
) -> Result<Json<ReconcileReport>, AppError> {
    let report = state.hierarchy.reconcile_project(&id).await?;
    Ok(Json(report))
}

/// `POST /hierarchy/{projects|tasks}/:parent_id/children`
#[tracing::instrument(skip(state, request, user_id), fields(user_id = %user_id.0))]
pub async fn create_child(
    State(state): State<AppState>,
    user_id: UserId,
    Path((parent_type, parent_id)): Path<(String, String)>,
    Json(request): Json<CreateChildRequest>,
) -> Result<(StatusCode, Json<CreateChildResponse>), AppError> {
    request.validate()?;

    let parent = ParentRef::parse(&parent_type, parent_id.clone()).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "Invalid parent type '{}', expected projects or tasks",
            parent_type
        ))
    })?;

    let id = state
        .hierarchy
        .create_child(parent, &request.title, &user_id.0)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateChildResponse {
            id,
            parent_type,
            parent_id,
        }),
    ))
}

/// `DELETE /hierarchy/{tasks|subtasks}/:child_id`
#[tracing::instrument(skip(state, user_id), fields(user_id = %user_id.0))]
pub async fn delete_child(
    State(state): State<AppState>,
    user_id: UserId,
    Path((child_type, child_id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let child = ChildRef::parse(&child_type, child_id).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!(
            "Invalid child type '{}', expected tasks or subtasks",
            child_type
        ))
    })?;

    state.hierarchy.delete_child_detached(child).await?;
    Ok(Json(json!({ "success": true })))
}
