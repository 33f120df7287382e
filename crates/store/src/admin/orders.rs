//! Orders change list and order detail with inline items.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use storefront_core::{CustomerId, OrderId, OrderItemId, PaymentStatus, ProductId, to_currency};

use super::{AdminError, Column, ListFilter, ModelAdmin};
use crate::db::{Annotated, Executor, Model, OrderRepository, Record};
use crate::models::{Customer, Order};

/// Fewest lines an order can be saved with.
pub const MIN_ITEMS: usize = 1;
/// Most lines an order can hold.
pub const MAX_ITEMS: usize = 10;

/// Orders admin: newest activity last, filterable by customer.
#[must_use]
pub fn order_admin() -> ModelAdmin<Order> {
    ModelAdmin::new(|order: &Order| order.id.as_i32())
        .queryset(Order::objects().select_related(Order::CUSTOMER))
        .column(
            Column::new("id", "Id", |row: &Annotated<Order>| json!(row.object.id))
                .ordering(Order::ID.expr())
                .link(|row: &Annotated<Order>| format!("/admin/orders/{}", row.object.id)),
        )
        .column(
            Column::new("placed_at", "Placed at", |row: &Annotated<Order>| {
                json!(row.object.placed_at)
            })
            .ordering(Order::PLACED_AT.expr()),
        )
        .column(Column::new(
            "customer",
            "Customer",
            |row: &Annotated<Order>| json!(row.object.customer.as_ref().map(full_name)),
        ))
        .filter(ListFilter::related(
            "customer",
            "Customer",
            Customer::objects()
                .order_by([Customer::FIRST_NAME.asc(), Customer::LAST_NAME.asc()])
                .query()
                .clone(),
            customer_label,
            |value| {
                let id = value.parse::<i32>().ok()?;
                Some(Order::CUSTOMER_ID.eq(CustomerId::new(id)))
            },
        ))
        .ordering([Order::PLACED_AT.asc()])
        .per_page(10)
}

fn full_name(customer: &Customer) -> String {
    format!("{} {}", customer.first_name, customer.last_name)
}

fn customer_label(record: &Record) -> String {
    let first = record.get::<String>("first_name").unwrap_or_default();
    let last = record.get::<String>("last_name").unwrap_or_default();
    format!("{first} {last}")
}

/// An order line as shown inline on the order page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineItem {
    pub id: OrderItemId,
    pub product: ProductId,
    pub product_title: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// The order page: the order, its customer and its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub id: OrderId,
    pub placed_at: DateTime<Utc>,
    pub payment_status: PaymentStatus,
    pub customer: CustomerId,
    pub customer_name: Option<String>,
    pub min_items: usize,
    pub max_items: usize,
    pub items: Vec<InlineItem>,
}

impl From<&Order> for OrderDetail {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            placed_at: order.placed_at,
            payment_status: order.payment_status,
            customer: order.customer_id,
            customer_name: order.customer.as_ref().map(full_name),
            min_items: MIN_ITEMS,
            max_items: MAX_ITEMS,
            items: order
                .items
                .iter()
                .map(|item| InlineItem {
                    id: item.id,
                    product: item.product_id,
                    product_title: item.product.as_ref().map(|p| p.title.clone()),
                    quantity: item.quantity,
                    unit_price: to_currency(item.unit_price),
                })
                .collect(),
        }
    }
}

/// Load the order page for `id`.
///
/// # Errors
///
/// Returns `AdminError::Repository` wrapping `NotFound` if no order has
/// this id.
pub async fn order_detail<E: Executor + ?Sized>(
    db: &E,
    id: OrderId,
) -> Result<OrderDetail, AdminError> {
    let order = OrderRepository::new(db).get(id).await?;
    Ok(OrderDetail::from(&order))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use storefront_core::{Email, Membership};

    use super::*;
    use crate::admin::{Params, changelist};
    use crate::db::{CollectionRepository, CustomerRepository, Db, ProductRepository};
    use crate::models::{CollectionInput, CustomerInput, NewOrder, NewOrderItem, ProductInput, SCHEMA};

    async fn customer(db: &Db, first: &str) -> Customer {
        CustomerRepository::new(db)
            .create(&CustomerInput {
                first_name: first.into(),
                last_name: "Smith".into(),
                email: Email::parse(&format!("{first}@example.com")).unwrap(),
                phone: "555-0100".into(),
                birth_date: None,
                membership: Membership::Bronze,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_filter_by_customer_and_detail() {
        let db = Db::memory(SCHEMA);
        let collection = CollectionRepository::new(&db)
            .create(&CollectionInput {
                title: "Books".into(),
                featured_product_id: None,
            })
            .await
            .unwrap();
        let book = ProductRepository::new(&db)
            .create(&ProductInput {
                title: "Atlas".into(),
                slug: "atlas".into(),
                description: None,
                unit_price: Decimal::from(30),
                inventory: 5,
                collection_id: collection.collection.id,
            })
            .await
            .unwrap();
        let alice = customer(&db, "alice").await;
        let bob = customer(&db, "bob").await;
        let orders = OrderRepository::new(&db);
        for buyer in [&alice, &bob, &alice] {
            orders
                .place(&NewOrder {
                    customer_id: buyer.id,
                    items: vec![NewOrderItem {
                        product_id: book.id,
                        quantity: 2,
                    }],
                })
                .await
                .unwrap();
        }

        let params: Params = [("customer".to_owned(), alice.id.to_string())].into();
        let list = changelist(&db, &order_admin(), &params).await.unwrap();
        assert_eq!(list.count, 2);
        assert_eq!(list.total, 3);
        let row = list.rows.first().unwrap();
        assert_eq!(row.cells["customer"], "alice Smith");
        let filter = list.filters.first().unwrap();
        assert!(filter.choices.iter().any(|c| c.selected && c.label == "alice Smith"));

        let detail = order_detail(&db, OrderId::new(row.id)).await.unwrap();
        assert_eq!(detail.items.len(), 1);
        let line = detail.items.first().unwrap();
        assert_eq!(line.product_title.as_deref(), Some("Atlas"));
        assert_eq!(line.unit_price.to_string(), "30.00");
        assert_eq!(detail.max_items, 10);

        let missing = order_detail(&db, OrderId::new(999)).await.unwrap_err();
        assert!(matches!(
            missing,
            AdminError::Repository(crate::db::RepositoryError::NotFound)
        ));
    }
}
