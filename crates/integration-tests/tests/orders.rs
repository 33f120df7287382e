//! Order placement flows.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use serde_json::json;
use storefront_integration_tests::TestContext;

#[tokio::test]
async fn test_place_order_captures_prices() {
    let ctx = TestContext::new();
    let bath = ctx.collection("Bath").await;
    let soap = ctx.product("Soap", 4, 10, bath).await;
    let brush = ctx.product("Brush", 3, 10, bath).await;
    let ada = ctx.customer("Ada", "Lovelace").await;

    let (status, order) = ctx
        .post(
            "/orders",
            &json!({
                "customer": ada.id.as_i32(),
                "items": [
                    {"product": soap.id.as_i32(), "quantity": 2},
                    {"product": brush.id.as_i32(), "quantity": 1},
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["customer"], ada.id.as_i32());
    assert_eq!(order["payment_status"], "pending");
    let items = order["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items.first().unwrap()["unit_price"], "4.00");

    let id = order["id"].as_i64().unwrap();
    let (status, fetched) = ctx.get(&format!("/orders/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, order);
}

#[tokio::test]
async fn test_invalid_lines_are_reported_by_position() {
    let ctx = TestContext::new();
    let bath = ctx.collection("Bath").await;
    let soap = ctx.product("Soap", 4, 10, bath).await;

    let (status, errors) = ctx
        .post(
            "/orders",
            &json!({
                "customer": 5,
                "items": [
                    {"product": soap.id.as_i32(), "quantity": 1},
                    {"product": 99, "quantity": 0},
                ],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        errors["customer"],
        json!(["Invalid pk \"5\" - object does not exist."])
    );
    assert_eq!(
        errors["items[1].product"],
        json!(["Invalid pk \"99\" - object does not exist."])
    );
    assert_eq!(
        errors["items[1].quantity"],
        json!(["Ensure this value is greater than or equal to 1."])
    );
    assert!(errors.get("items[0].product").is_none());
}

#[tokio::test]
async fn test_empty_order_is_rejected() {
    let ctx = TestContext::new();
    let ada = ctx.customer("Ada", "Lovelace").await;

    let (status, errors) = ctx
        .post("/orders", &json!({"customer": ada.id.as_i32(), "items": []}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        errors["items"],
        json!(["Ensure this field has at least 1 elements."])
    );

    let (status, _) = ctx.get("/orders/1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
