//! HTTP integration tests for the storefront store.
//!
//! Every test builds the full router (middleware included) over a fresh
//! in-memory store and drives it with `tower::ServiceExt::oneshot`, so no
//! database or running server is needed.
//!
//! ```bash
//! cargo test -p storefront-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;

use storefront_core::{CollectionId, Email, Membership, PaymentStatus, ProductId};
use storefront_store::db::{
    CollectionRepository, CustomerRepository, Db, OrderRepository, ProductRepository,
};
use storefront_store::models::{
    CollectionInput, Customer, CustomerInput, NewOrder, NewOrderItem, Order, Product,
    ProductInput, SCHEMA,
};
use storefront_store::{AppState, StoreConfig, app};

/// A router over an empty memory store, plus direct access to that store
/// for arranging data the API cannot create.
pub struct TestContext {
    pub db: Db,
    router: Router,
}

impl TestContext {
    #[must_use]
    pub fn new() -> Self {
        let db = Db::memory(SCHEMA);
        let state = AppState::new(StoreConfig::memory(), db.clone());
        Self {
            db,
            router: app(state),
        }
    }

    /// Send a request and return the status and the body parsed as JSON
    /// (`Value::Null` for an empty body, a string for non-JSON text).
    pub async fn send(&self, method: Method, uri: &str, body: Option<&Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn put(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, body: &Value) -> (StatusCode, Value) {
        self.send(Method::PATCH, uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::DELETE, uri, None).await
    }

    pub async fn collection(&self, title: &str) -> CollectionId {
        CollectionRepository::new(&self.db)
            .create(&CollectionInput {
                title: title.to_owned(),
                featured_product_id: None,
            })
            .await
            .unwrap()
            .collection
            .id
    }

    pub async fn product(
        &self,
        title: &str,
        price: i64,
        inventory: i32,
        collection: CollectionId,
    ) -> Product {
        ProductRepository::new(&self.db)
            .create(&ProductInput {
                title: title.to_owned(),
                slug: title.to_lowercase().replace(' ', "-"),
                description: None,
                unit_price: Decimal::from(price),
                inventory,
                collection_id: collection,
            })
            .await
            .unwrap()
    }

    pub async fn customer(&self, first: &str, last: &str) -> Customer {
        CustomerRepository::new(&self.db)
            .create(&CustomerInput {
                first_name: first.to_owned(),
                last_name: last.to_owned(),
                email: Email::parse(&format!("{}@example.com", first.to_lowercase())).unwrap(),
                phone: "555-0100".to_owned(),
                birth_date: None,
                membership: Membership::Bronze,
            })
            .await
            .unwrap()
    }

    pub async fn order(
        &self,
        customer: &Customer,
        lines: &[(ProductId, i32)],
        status: PaymentStatus,
    ) -> Order {
        let orders = OrderRepository::new(&self.db);
        let order = orders
            .place(&NewOrder {
                customer_id: customer.id,
                items: lines
                    .iter()
                    .map(|&(product_id, quantity)| NewOrderItem {
                        product_id,
                        quantity,
                    })
                    .collect(),
            })
            .await
            .unwrap();
        orders.set_payment_status(order.id, status).await.unwrap();
        order
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
