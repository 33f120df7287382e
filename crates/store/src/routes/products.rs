//! Product API handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::Value;
use tracing::instrument;

use storefront_core::ProductId;

use super::json_body;
use crate::db::ProductRepository;
use crate::error::Result;
use crate::serializers::{ProductData, products};
use crate::state::AppState;

/// GET /products
///
/// First page of products with their collections joined.
///
/// # Errors
///
/// Returns `AppError::Database` if the query fails.
#[instrument(skip(state))]
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ProductData>>> {
    let products = ProductRepository::new(state.db())
        .list(state.page_size())
        .await?;
    Ok(Json(products.iter().map(ProductData::from).collect()))
}

/// POST /products
///
/// # Errors
///
/// Returns `AppError::Validation` with every failing field.
#[instrument(skip(state, body))]
pub async fn create(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<ProductData>)> {
    let body = json_body(body)?;
    let input = products::validate(state.db(), &body).await?;
    let product = ProductRepository::new(state.db()).create(&input).await?;
    Ok((StatusCode::CREATED, Json(ProductData::from(&product))))
}

/// GET /products/{id}
///
/// # Errors
///
/// Returns `AppError::NotFound` if no product has this id.
#[instrument(skip(state))]
pub async fn retrieve(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
) -> Result<Json<ProductData>> {
    let product = ProductRepository::new(state.db()).get(id).await?;
    Ok(Json(ProductData::from(&product)))
}

/// PUT /products/{id}
///
/// # Errors
///
/// Returns `AppError::NotFound` if no product has this id, or
/// `AppError::Validation` with every failing field.
#[instrument(skip(state, body))]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<Json<ProductData>> {
    let repo = ProductRepository::new(state.db());
    repo.get(id).await?;

    let body = json_body(body)?;
    let input = products::validate(state.db(), &body).await?;
    let product = repo.update(id, &input).await?;
    Ok(Json(ProductData::from(&product)))
}

/// DELETE /products/{id}
///
/// # Errors
///
/// Returns `AppError::NotFound` if no product has this id, or
/// `AppError::ReferentialConflict` if order items reference it.
#[instrument(skip(state))]
pub async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<ProductId>,
) -> Result<StatusCode> {
    ProductRepository::new(state.db()).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
