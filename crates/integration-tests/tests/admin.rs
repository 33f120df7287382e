//! Admin change lists, bulk actions and the order page.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use serde_json::json;
use storefront_core::PaymentStatus;
use storefront_integration_tests::TestContext;

#[tokio::test]
async fn test_products_changelist_filters_and_sorts() {
    let ctx = TestContext::new();
    let bath = ctx.collection("Bath").await;
    let kitchen = ctx.collection("Kitchen").await;
    ctx.product("Soap", 4, 3, bath).await;
    ctx.product("Brush", 3, 50, bath).await;
    ctx.product("Spoon", 12, 2, kitchen).await;

    let (status, list) = ctx.get("/admin/products?inventory=%3C10&o=-title").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 2);
    assert_eq!(list["total"], 3);
    let rows = list["rows"].as_array().unwrap();
    let titles: Vec<_> = rows.iter().map(|row| row["cells"]["title"].clone()).collect();
    assert_eq!(titles, [json!("Spoon"), json!("Soap")]);
    assert_eq!(rows.first().unwrap()["cells"]["inventory_status"], "Low");
    assert_eq!(rows.first().unwrap()["cells"]["collection_title"], "Kitchen");

    let (status, list) = ctx
        .get(&format!("/admin/products?collection={bath}&q=bru"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["count"], 1);
}

#[tokio::test]
async fn test_unknown_parameter_is_rejected() {
    let ctx = TestContext::new();

    let (status, body) = ctx.get("/admin/products?colour=red").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("colour"));

    let (status, _) = ctx.get("/admin/widgets").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_clear_inventory_action() {
    let ctx = TestContext::new();
    let bath = ctx.collection("Bath").await;
    let soap = ctx.product("Soap", 4, 3, bath).await;
    let brush = ctx.product("Brush", 3, 50, bath).await;

    let (status, outcome) = ctx
        .post(
            "/admin/products/actions/clear_inventory",
            &json!({"ids": [soap.id.as_i32(), brush.id.as_i32()]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        outcome,
        json!({"count": 2, "message": "2 products were successfully updated."})
    );

    let (_, product) = ctx.get(&format!("/products/{}", brush.id)).await;
    assert_eq!(product["inventory"], 0);

    let (status, _) = ctx
        .post("/admin/products/actions/explode", &json!({"ids": []}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_customers_changelist_links_to_orders() {
    let ctx = TestContext::new();
    let bath = ctx.collection("Bath").await;
    let soap = ctx.product("Soap", 4, 3, bath).await;
    let ada = ctx.customer("Ada", "Lovelace").await;
    ctx.customer("Grace", "Hopper").await;
    ctx.order(&ada, &[(soap.id, 1)], PaymentStatus::Complete).await;
    ctx.order(&ada, &[(soap.id, 2)], PaymentStatus::Pending).await;

    let (status, list) = ctx.get("/admin/customers?o=-orders").await;
    assert_eq!(status, StatusCode::OK);
    let first = list["rows"].as_array().unwrap().first().unwrap().clone();
    assert_eq!(first["cells"]["first_name"], "Ada");
    assert_eq!(first["cells"]["orders"], 2);
    assert_eq!(
        first["links"]["orders"],
        format!("/admin/orders?customer={}", ada.id)
    );

    let (status, orders) = ctx.get(&format!("/admin/orders?customer={}", ada.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders["count"], 2);
}

#[tokio::test]
async fn test_order_detail_shows_inline_items() {
    let ctx = TestContext::new();
    let bath = ctx.collection("Bath").await;
    let soap = ctx.product("Soap", 4, 3, bath).await;
    let ada = ctx.customer("Ada", "Lovelace").await;
    let order = ctx.order(&ada, &[(soap.id, 3)], PaymentStatus::Failed).await;

    let (status, detail) = ctx.get(&format!("/admin/orders/{}", order.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["customer_name"], "Ada Lovelace");
    assert_eq!(detail["payment_status"], "failed");
    assert_eq!(detail["min_items"], 1);
    assert_eq!(detail["max_items"], 10);
    let line = detail["items"].as_array().unwrap().first().unwrap().clone();
    assert_eq!(line["product_title"], "Soap");
    assert_eq!(line["quantity"], 3);

    let (status, _) = ctx.get("/admin/orders/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_inline_price_edit() {
    let ctx = TestContext::new();
    let bath = ctx.collection("Bath").await;
    let soap = ctx.product("Soap", 4, 3, bath).await;
    let brush = ctx.product("Brush", 3, 50, bath).await;

    let (status, list) = ctx.get("/admin/products").await;
    assert_eq!(status, StatusCode::OK);
    let price_column = list["columns"]
        .as_array()
        .unwrap()
        .iter()
        .find(|column| column["name"] == "unit_price")
        .unwrap();
    assert_eq!(price_column["editable"], true);

    let (status, errors) = ctx
        .patch(
            "/admin/products",
            &json!({"rows": [
                {"id": soap.id.as_i32(), "unit_price": "6.00"},
                {"id": brush.id.as_i32(), "unit_price": "abc"},
            ]}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        errors["rows[1].unit_price"],
        json!(["A valid number is required."])
    );
    let (_, unchanged) = ctx.get(&format!("/products/{}", soap.id)).await;
    assert_eq!(unchanged["unit_price"], "4.00");

    let (status, outcome) = ctx
        .patch(
            "/admin/products",
            &json!({"rows": [{"id": soap.id.as_i32(), "unit_price": "6.00"}]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["message"], "1 product was changed successfully.");
    let (_, changed) = ctx.get(&format!("/products/{}", soap.id)).await;
    assert_eq!(changed["unit_price"], "6.00");

    let (status, _) = ctx
        .patch(
            "/admin/collections",
            &json!({"rows": [{"id": bath.as_i32(), "title": "Spa"}]}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
