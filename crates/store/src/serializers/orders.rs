//! Order representation and validation of new orders.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use storefront_core::{CustomerId, OrderId, OrderItemId, PaymentStatus, ProductId, to_currency};

use super::{Payload, SerializerError, ValidationErrors};
use crate::db::{Executor, Model, ProductRepository};
use crate::models::{Customer, NewOrder, NewOrderItem, Order, OrderItem};

/// Upper bound on lines in a single order.
pub const MAX_ITEMS: usize = 10;

/// One order line as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderItemData {
    pub id: OrderItemId,
    pub product: ProductId,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl From<&OrderItem> for OrderItemData {
    fn from(item: &OrderItem) -> Self {
        Self {
            id: item.id,
            product: item.product_id,
            quantity: item.quantity,
            unit_price: to_currency(item.unit_price),
        }
    }
}

/// Order as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderData {
    pub id: OrderId,
    pub customer: CustomerId,
    pub placed_at: DateTime<Utc>,
    pub payment_status: PaymentStatus,
    pub items: Vec<OrderItemData>,
}

impl From<&Order> for OrderData {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            customer: order.customer_id,
            placed_at: order.placed_at,
            payment_status: order.payment_status,
            items: order.items.iter().map(OrderItemData::from).collect(),
        }
    }
}

/// Validate a new order: an existing customer and 1 to [`MAX_ITEMS`] lines,
/// each naming an existing product and a positive quantity.
///
/// Errors of a line are reported under `items[<index>].<field>`.
///
/// # Errors
///
/// Returns `SerializerError::Invalid` listing every failing field, or
/// `SerializerError::Repository` if a lookup fails.
pub async fn validate<E: Executor + ?Sized>(
    db: &E,
    body: &Value,
) -> Result<NewOrder, SerializerError> {
    let mut payload = Payload::new(body)?;

    let customer = match payload.pk("customer") {
        Some(pk) => {
            let found = Customer::objects()
                .filter(Customer::ID.eq(CustomerId::new(pk)))
                .exists(db)
                .await?;
            payload.existing("customer", pk, found)
        }
        None => None,
    };

    let mut items = Vec::new();
    if let Some(lines) = payload.list("items", 1, MAX_ITEMS) {
        for (index, line) in lines.iter().enumerate() {
            match validate_item(db, line).await? {
                Ok(item) => items.push(item),
                Err(errors) => payload.reject_nested(&format!("items[{index}]"), errors),
            }
        }
    }

    match customer {
        Some(customer) if payload.errors().is_empty() => Ok(NewOrder {
            customer_id: CustomerId::new(customer),
            items,
        }),
        _ => Err(payload.into_errors().into()),
    }
}

async fn validate_item<E: Executor + ?Sized>(
    db: &E,
    line: &Value,
) -> Result<Result<NewOrderItem, ValidationErrors>, SerializerError> {
    let mut payload = match Payload::new(line) {
        Ok(payload) => payload,
        Err(errors) => return Ok(Err(errors)),
    };

    let product = match payload.pk("product") {
        Some(pk) => {
            let found = ProductRepository::new(db)
                .exists(ProductId::new(pk))
                .await?;
            payload.existing("product", pk, found)
        }
        None => None,
    };
    let quantity = payload.integer("quantity", Some(1));

    let (Some(product), Some(quantity)) = (product, quantity) else {
        return Ok(Err(payload.into_errors()));
    };
    Ok(Ok(NewOrderItem {
        product_id: ProductId::new(product),
        quantity,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::Db;
    use crate::models::SCHEMA;

    #[tokio::test]
    async fn test_item_count_bounds() {
        let db = Db::memory(SCHEMA);

        let body = json!({"customer": 1, "items": []});
        let Err(SerializerError::Invalid(errors)) = validate(&db, &body).await else {
            panic!("expected validation errors");
        };
        assert_eq!(
            errors.field("items"),
            ["Ensure this field has at least 1 elements."]
        );
        assert_eq!(
            errors.field("customer"),
            ["Invalid pk \"1\" - object does not exist."]
        );

        let lines: Vec<_> = (0..11).map(|_| json!({"product": 1, "quantity": 1})).collect();
        let body = json!({"customer": 1, "items": lines});
        let Err(SerializerError::Invalid(errors)) = validate(&db, &body).await else {
            panic!("expected validation errors");
        };
        assert_eq!(
            errors.field("items"),
            ["Ensure this field has no more than 10 elements."]
        );
    }

    #[tokio::test]
    async fn test_line_errors_are_indexed() {
        let db = Db::memory(SCHEMA);
        let body = json!({"customer": 1, "items": [{"product": 5, "quantity": 0}]});
        let Err(SerializerError::Invalid(errors)) = validate(&db, &body).await else {
            panic!("expected validation errors");
        };
        assert_eq!(
            errors.field("items[0].product"),
            ["Invalid pk \"5\" - object does not exist."]
        );
        assert_eq!(
            errors.field("items[0].quantity"),
            ["Ensure this value is greater than or equal to 1."]
        );
    }
}
