//! Collection API handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::Value;
use tracing::instrument;

use storefront_core::CollectionId;

use super::json_body;
use crate::db::CollectionRepository;
use crate::error::Result;
use crate::serializers::{CollectionData, collections};
use crate::state::AppState;

/// GET /collections
///
/// First page of collections, each with its product count.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
#[instrument(skip(state))]
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<CollectionData>>> {
    let collections = CollectionRepository::new(state.db())
        .list(state.page_size())
        .await?;
    Ok(Json(collections.iter().map(CollectionData::from).collect()))
}

/// POST /collections
///
/// # Errors
///
/// Returns `AppError::Validation` with every failing field.
#[instrument(skip(state, body))]
pub async fn create(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<CollectionData>)> {
    let body = json_body(body)?;
    let input = collections::validate(state.db(), &body).await?;
    let collection = CollectionRepository::new(state.db()).create(&input).await?;
    Ok((StatusCode::CREATED, Json(CollectionData::from(&collection))))
}

/// GET /collections/{id}
///
/// # Errors
///
/// Returns `AppError::NotFound` if no collection has this id.
#[instrument(skip(state))]
pub async fn retrieve(
    State(state): State<AppState>,
    Path(id): Path<CollectionId>,
) -> Result<Json<CollectionData>> {
    let collection = CollectionRepository::new(state.db()).get(id).await?;
    Ok(Json(CollectionData::from(&collection)))
}

/// PUT /collections/{id}
///
/// # Errors
///
/// Returns `AppError::NotFound` if no collection has this id, or
/// `AppError::Validation` with every failing field.
#[instrument(skip(state, body))]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<CollectionId>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<CollectionData>> {
    let repo = CollectionRepository::new(state.db());
    repo.get(id).await?;

    let body = json_body(body)?;
    let input = collections::validate(state.db(), &body).await?;
    let collection = repo.update(id, &input).await?;
    Ok(Json(CollectionData::from(&collection)))
}

/// DELETE /collections/{id}
///
/// # Errors
///
/// Returns `AppError::NotFound` if no collection has this id, or
/// `AppError::ReferentialConflict` if it still holds products.
#[instrument(skip(state))]
pub async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<CollectionId>,
) -> Result<StatusCode> {
    CollectionRepository::new(state.db()).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
