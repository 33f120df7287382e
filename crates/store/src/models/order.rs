//! Orders and their line items.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use storefront_core::{CustomerId, OrderId, OrderItemId, PaymentStatus, ProductId};

use super::customer::{Customer, customer_meta};
use super::product::{Product, product_meta};
use crate::db::schema::{FieldKind, FieldMeta, ModelMeta, OnDelete, RelationKind, RelationMeta};
use crate::db::{Col, ForeignKey, Many, Model, Record, Result};

static ORDER: ModelMeta = ModelMeta {
    name: "order",
    table: "store_order",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("placed_at", FieldKind::Timestamp),
        FieldMeta::new("payment_status", FieldKind::Text),
        FieldMeta::new("customer_id", FieldKind::Integer),
    ],
    relations: &[
        RelationMeta {
            name: "customer",
            target: customer_meta,
            kind: RelationKind::ForeignKey {
                column: "customer_id",
                on_delete: OnDelete::Protect,
            },
        },
        RelationMeta {
            name: "items",
            target: order_item_meta,
            kind: RelationKind::Reverse { column: "order_id" },
        },
    ],
};

static ORDER_ITEM: ModelMeta = ModelMeta {
    name: "orderitem",
    table: "store_orderitem",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("order_id", FieldKind::Integer),
        FieldMeta::new("product_id", FieldKind::Integer),
        FieldMeta::new("quantity", FieldKind::Integer),
        FieldMeta::new("unit_price", FieldKind::Decimal),
    ],
    relations: &[
        RelationMeta {
            name: "order",
            target: order_meta,
            kind: RelationKind::ForeignKey {
                column: "order_id",
                on_delete: OnDelete::Protect,
            },
        },
        RelationMeta {
            name: "product",
            target: product_meta,
            kind: RelationKind::ForeignKey {
                column: "product_id",
                on_delete: OnDelete::Protect,
            },
        },
    ],
};

pub fn order_meta() -> &'static ModelMeta {
    &ORDER
}

pub fn order_item_meta() -> &'static ModelMeta {
    &ORDER_ITEM
}

/// A customer's order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub placed_at: DateTime<Utc>,
    pub payment_status: PaymentStatus,
    pub customer_id: CustomerId,
    /// Present when loaded with `select_related(Order::CUSTOMER)`.
    pub customer: Option<Customer>,
    /// Present when loaded with `prefetch_related(Order::ITEMS)`.
    pub items: Vec<OrderItem>,
}

impl Order {
    pub const ID: Col<Self, OrderId> = Col::new("id");
    pub const PLACED_AT: Col<Self, DateTime<Utc>> = Col::new("placed_at");
    pub const PAYMENT_STATUS: Col<Self, PaymentStatus> = Col::new("payment_status");
    pub const CUSTOMER_ID: Col<Self, CustomerId> = Col::new("customer_id");

    pub const CUSTOMER: ForeignKey<Self, Customer> = ForeignKey::new("customer");
    pub const ITEMS: Many<Self, OrderItem> = Many::new("items");
}

impl Model for Order {
    fn meta() -> &'static ModelMeta {
        &ORDER
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            placed_at: record.get("placed_at")?,
            payment_status: record.get("payment_status")?,
            customer_id: record.get("customer_id")?,
            customer: record
                .related("customer")
                .map(Customer::from_record)
                .transpose()?,
            items: record
                .prefetched("items")
                .iter()
                .map(OrderItem::from_record)
                .collect::<Result<_>>()?,
        })
    }
}

/// A line of an order. `unit_price` is the price when the order was placed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Present when loaded with `select_related(OrderItem::PRODUCT)`.
    pub product: Option<Product>,
    /// Present when loaded with `select_related(OrderItem::ORDER)`.
    pub order: Option<Box<Order>>,
}

impl OrderItem {
    pub const ID: Col<Self, OrderItemId> = Col::new("id");
    pub const ORDER_ID: Col<Self, OrderId> = Col::new("order_id");
    pub const PRODUCT_ID: Col<Self, ProductId> = Col::new("product_id");
    pub const QUANTITY: Col<Self, i32> = Col::new("quantity");
    pub const UNIT_PRICE: Col<Self, Decimal> = Col::new("unit_price");

    pub const ORDER: ForeignKey<Self, Order> = ForeignKey::new("order");
    pub const PRODUCT: ForeignKey<Self, Product> = ForeignKey::new("product");
}

impl Model for OrderItem {
    fn meta() -> &'static ModelMeta {
        &ORDER_ITEM
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            order_id: record.get("order_id")?,
            product_id: record.get("product_id")?,
            quantity: record.get("quantity")?,
            unit_price: record.get("unit_price")?,
            product: record
                .related("product")
                .map(Product::from_record)
                .transpose()?,
            order: record
                .related("order")
                .map(|order| Order::from_record(order).map(Box::new))
                .transpose()?,
        })
    }
}

/// An order to place: the customer and the products with their quantities.
///
/// Prices are not part of the input; each line captures the product's
/// current unit price when the order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: i32,
}
