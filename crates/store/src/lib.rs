//! Storefront store: catalogue, ordering and admin API.
//!
//! # Layers
//!
//! - [`db`]: typed query builder, repositories and storage backends
//!   (`PostgreSQL` through `sqlx`, or an in-process memory store)
//! - [`serializers`]: request validation and response shapes
//! - [`routes`]: axum handlers for products, collections and orders
//! - [`admin`]: configurable change lists and bulk actions
//! - [`reports`]: named read-only queries used by `store-cli report`

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod admin;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod reports;
pub mod routes;
pub mod serializers;
pub mod state;

use axum::Router;
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

pub use config::StoreConfig;
pub use state::AppState;

/// Build the application router with its middleware stack.
pub fn app(state: AppState) -> Router {
    routes::routes()
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}
