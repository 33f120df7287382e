//! Order API handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::Value;
use tracing::instrument;

use storefront_core::OrderId;

use super::json_body;
use crate::db::OrderRepository;
use crate::error::Result;
use crate::serializers::{OrderData, orders};
use crate::state::AppState;

/// POST /orders
///
/// Places the order and its lines in one transaction. Each line is priced
/// at the product's current unit price.
///
/// # Errors
///
/// Returns `AppError::Validation` with every failing field; nothing is
/// written in that case.
#[instrument(skip(state, body))]
pub async fn create(
    State(state): State<AppState>,
    body: std::result::Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderData>)> {
    let body = json_body(body)?;
    let new_order = orders::validate(state.db(), &body).await?;
    let order = OrderRepository::new(state.db()).place(&new_order).await?;
    Ok((StatusCode::CREATED, Json(OrderData::from(&order))))
}

/// GET /orders/{id}
///
/// # Errors
///
/// Returns `AppError::NotFound` if no order has this id.
#[instrument(skip(state))]
pub async fn retrieve(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderData>> {
    let order = OrderRepository::new(state.db()).get(id).await?;
    Ok(Json(OrderData::from(&order)))
}
