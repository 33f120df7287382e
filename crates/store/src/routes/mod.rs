//! HTTP route handlers.
//!
//! Request bodies are JSON; malformed bodies answer 400 with a `detail`
//! message instead of the framework's plain-text rejection.

pub mod admin;
pub mod collections;
pub mod health;
pub mod orders;
pub mod products;

use axum::{
    Json, Router,
    extract::rejection::JsonRejection,
    routing::{get, post},
};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::state::AppState;

/// Unwrap a JSON body or turn the rejection into a 400.
fn json_body(body: std::result::Result<Json<Value>, JsonRejection>) -> Result<Value> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(products::list).post(products::create))
        .route(
            "/{id}",
            get(products::retrieve)
                .put(products::update)
                .delete(products::destroy),
        )
}

pub fn collection_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(collections::list).post(collections::create))
        .route(
            "/{id}",
            get(collections::retrieve)
                .put(collections::update)
                .delete(collections::destroy),
        )
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(orders::create))
        .route("/{id}", get(orders::retrieve))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/{id}", get(admin::order_detail))
        .route("/{model}", get(admin::changelist).patch(admin::edit_rows))
        .route("/{model}/actions/{action}", post(admin::run_action))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/products", product_routes())
        .nest("/collections", collection_routes())
        .nest("/orders", order_routes())
        .nest("/admin", admin_routes())
}
