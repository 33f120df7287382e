//! Anonymous shopping carts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use storefront_core::{CartId, CartItemId, ProductId};

use super::product::{Product, product_meta};
use crate::db::schema::{FieldKind, FieldMeta, ModelMeta, OnDelete, RelationKind, RelationMeta};
use crate::db::{Col, ForeignKey, Many, Model, Record, Result};

static CART: ModelMeta = ModelMeta {
    name: "cart",
    table: "store_cart",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("created_at", FieldKind::Timestamp),
    ],
    relations: &[RelationMeta {
        name: "items",
        target: cart_item_meta,
        kind: RelationKind::Reverse { column: "cart_id" },
    }],
};

static CART_ITEM: ModelMeta = ModelMeta {
    name: "cartitem",
    table: "store_cartitem",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("cart_id", FieldKind::Integer),
        FieldMeta::new("product_id", FieldKind::Integer),
        FieldMeta::new("quantity", FieldKind::Integer),
    ],
    relations: &[
        RelationMeta {
            name: "cart",
            target: cart_meta,
            kind: RelationKind::ForeignKey {
                column: "cart_id",
                on_delete: OnDelete::Cascade,
            },
        },
        RelationMeta {
            name: "product",
            target: product_meta,
            kind: RelationKind::ForeignKey {
                column: "product_id",
                on_delete: OnDelete::Cascade,
            },
        },
    ],
};

pub fn cart_meta() -> &'static ModelMeta {
    &CART
}

pub fn cart_item_meta() -> &'static ModelMeta {
    &CART_ITEM
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cart {
    pub id: CartId,
    pub created_at: DateTime<Utc>,
    /// Present when loaded with `prefetch_related(Cart::ITEMS)`.
    pub items: Vec<CartItem>,
}

impl Cart {
    pub const ID: Col<Self, CartId> = Col::new("id");
    pub const CREATED_AT: Col<Self, DateTime<Utc>> = Col::new("created_at");

    pub const ITEMS: Many<Self, CartItem> = Many::new("items");
}

impl Model for Cart {
    fn meta() -> &'static ModelMeta {
        &CART
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            created_at: record.get("created_at")?,
            items: record
                .prefetched("items")
                .iter()
                .map(CartItem::from_record)
                .collect::<Result<_>>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    pub quantity: i32,
    /// Present when loaded with `select_related(CartItem::PRODUCT)`.
    pub product: Option<Product>,
}

impl CartItem {
    pub const ID: Col<Self, CartItemId> = Col::new("id");
    pub const CART_ID: Col<Self, CartId> = Col::new("cart_id");
    pub const PRODUCT_ID: Col<Self, ProductId> = Col::new("product_id");
    pub const QUANTITY: Col<Self, i32> = Col::new("quantity");

    pub const CART: ForeignKey<Self, Cart> = ForeignKey::new("cart");
    pub const PRODUCT: ForeignKey<Self, Product> = ForeignKey::new("product");
}

impl Model for CartItem {
    fn meta() -> &'static ModelMeta {
        &CART_ITEM
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            cart_id: record.get("cart_id")?,
            product_id: record.get("product_id")?,
            quantity: record.get("quantity")?,
            product: record
                .related("product")
                .map(Product::from_record)
                .transpose()?,
        })
    }
}
