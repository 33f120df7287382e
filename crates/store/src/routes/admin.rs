//! Admin API handlers.

use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use tracing::instrument;

use storefront_core::OrderId;

use crate::admin::{
    self, ActionOutcome, ActionRequest, ChangeList, EditRequest, OrderDetail, Params,
    collections::collection_admin, customers::customer_admin, orders::order_admin,
    products::product_admin,
};
use crate::error::{AppError, Result};
use crate::state::AppState;

/// GET /admin/{model}
///
/// Change list for `products`, `collections`, `customers` or `orders`.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown model and
/// `AppError::BadRequest` for unknown or invalid parameters.
#[instrument(skip(state))]
pub async fn changelist(
    State(state): State<AppState>,
    Path(model): Path<String>,
    Query(params): Query<Params>,
) -> Result<Json<ChangeList>> {
    let db = state.db();
    let list = match model.as_str() {
        "products" => admin::changelist(db, &product_admin(), &params).await?,
        "collections" => admin::changelist(db, &collection_admin(), &params).await?,
        "customers" => admin::changelist(db, &customer_admin(), &params).await?,
        "orders" => admin::changelist(db, &order_admin(), &params).await?,
        _ => return Err(AppError::NotFound),
    };
    Ok(Json(list))
}

/// POST /admin/{model}/actions/{action}
///
/// Body: `{"ids": [...]}`.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown model or action.
#[instrument(skip(state, body))]
pub async fn run_action(
    State(state): State<AppState>,
    Path((model, action)): Path<(String, String)>,
    body: std::result::Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<ActionOutcome>> {
    let Json(request) = body.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let db = state.db();
    let ids = &request.ids;
    let outcome = match model.as_str() {
        "products" => admin::run_action(db, &product_admin(), &action, ids).await?,
        "collections" => admin::run_action(db, &collection_admin(), &action, ids).await?,
        "customers" => admin::run_action(db, &customer_admin(), &action, ids).await?,
        "orders" => admin::run_action(db, &order_admin(), &action, ids).await?,
        _ => return Err(AppError::NotFound),
    };
    Ok(Json(outcome))
}

/// PATCH /admin/{model}
///
/// Body: `{"rows": [{"id": 1, "unit_price": "9.99"}]}`. Saves in-place
/// edits of editable columns in one transaction.
///
/// # Errors
///
/// Returns `AppError::NotFound` for an unknown model and
/// `AppError::Validation` keyed `rows[i].column` if any row is invalid;
/// nothing is written in that case.
#[instrument(skip(state, body))]
pub async fn edit_rows(
    State(state): State<AppState>,
    Path(model): Path<String>,
    body: std::result::Result<Json<EditRequest>, JsonRejection>,
) -> Result<Json<ActionOutcome>> {
    let Json(request) = body.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let rows = &request.rows;
    let tx = state.db().begin().await?;
    let outcome = match model.as_str() {
        "products" => admin::edit_rows(&tx, &product_admin(), rows).await?,
        "collections" => admin::edit_rows(&tx, &collection_admin(), rows).await?,
        "customers" => admin::edit_rows(&tx, &customer_admin(), rows).await?,
        "orders" => admin::edit_rows(&tx, &order_admin(), rows).await?,
        _ => return Err(AppError::NotFound),
    };
    tx.commit().await?;
    Ok(Json(outcome))
}

/// GET /admin/orders/{id}
///
/// # Errors
///
/// Returns `AppError::NotFound` if no order has this id.
#[instrument(skip(state))]
pub async fn order_detail(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderDetail>> {
    Ok(Json(admin::order_detail(state.db(), id).await?))
}
