use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};

use super::models::{
    CreateImageRepoRequest, DeleteImageReposRequest, DeleteResult, ImageRepoOption,
    ImageRepoResponse, OperateById, PageResult, SearchWithPage, UpdateImageRepoRequest,
    UpdateResult,
};
use crate::server::error::ServerError;
use crate::server::middleware::RequestId;
use crate::server::registry::LoginAttempt;
use crate::server::state::AppState;

/// Paged search over configured registries
pub async fn search_repos(
    State(state): State<AppState>,
    Json(payload): Json<SearchWithPage>,
) -> Result<Json<PageResult<ImageRepoResponse>>, ServerError> {
    let page = state.repo_service.page(&payload).await?;
    Ok(Json(page))
}

/// All registries as `{id, name, endpoint}` options
pub async fn list_repos(
    State(state): State<AppState>,
) -> Result<Json<Vec<ImageRepoOption>>, ServerError> {
    Ok(Json(state.repo_service.list().await?))
}

pub async fn get_repo(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ImageRepoResponse>, ServerError> {
    Ok(Json(state.repo_service.get(id).await?))
}

/// Live login check; the outcome is returned but not stored
pub async fn check_repo_status(
    State(state): State<AppState>,
    Query(query): Query<OperateById>,
) -> Result<Json<LoginAttempt>, ServerError> {
    let attempt = state
        .repo_service
        .login(query.id)
        .await
        .map_err(|e| ServerError::from(e).with_context("repo_id", query.id.to_string()))?;
    Ok(Json(attempt))
}

pub async fn create_repo(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<CreateImageRepoRequest>,
) -> Result<(StatusCode, Json<ImageRepoResponse>), ServerError> {
    let created = state.repo_service.create(payload).await?;

    tracing::info!(
        target: "audit",
        request_id = %request_id.0,
        repo_id = created.id,
        "create image repo [{}]",
        created.name
    );

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_repo(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<UpdateImageRepoRequest>,
) -> Result<Json<UpdateResult>, ServerError> {
    let id = payload.id;
    let result = state
        .repo_service
        .update(payload)
        .await
        .map_err(|e| ServerError::from(e).with_context("repo_id", id.to_string()))?;

    tracing::info!(
        target: "audit",
        request_id = %request_id.0,
        repo_id = result.id,
        new_name = %result.name,
        "update image repo information [{}]",
        result.previous_name
    );

    Ok(Json(result))
}

pub async fn delete_repos(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<DeleteImageReposRequest>,
) -> Result<Json<DeleteResult>, ServerError> {
    let result = state.repo_service.batch_delete(&payload.ids).await?;

    tracing::info!(
        target: "audit",
        request_id = %request_id.0,
        "delete image repo [{}]",
        result.deleted_names.join(",")
    );

    Ok(Json(result))
}
