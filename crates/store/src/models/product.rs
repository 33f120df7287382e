//! Catalogue: products and promotions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use storefront_core::{CollectionId, ProductId, PromotionId};

use super::cart::{CartItem, cart_item_meta};
use super::collection::{Collection, collection_meta};
use super::order::{OrderItem, order_item_meta};
use crate::db::schema::{FieldKind, FieldMeta, ModelMeta, OnDelete, RelationKind, RelationMeta};
use crate::db::{Col, ForeignKey, Many, Model, Record, Result};

static PRODUCT: ModelMeta = ModelMeta {
    name: "product",
    table: "store_product",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("title", FieldKind::Text),
        FieldMeta::new("slug", FieldKind::Text),
        FieldMeta::new("description", FieldKind::Text).nullable(),
        FieldMeta::new("unit_price", FieldKind::Decimal),
        FieldMeta::new("inventory", FieldKind::Integer),
        FieldMeta::new("last_update", FieldKind::Timestamp),
        FieldMeta::new("collection_id", FieldKind::Integer),
    ],
    relations: &[
        RelationMeta {
            name: "collection",
            target: collection_meta,
            kind: RelationKind::ForeignKey {
                column: "collection_id",
                on_delete: OnDelete::Protect,
            },
        },
        RelationMeta {
            name: "promotions",
            target: promotion_meta,
            kind: RelationKind::ManyToMany {
                through: product_promotion_meta,
                source: "product_id",
                target: "promotion_id",
            },
        },
        RelationMeta {
            name: "order_items",
            target: order_item_meta,
            kind: RelationKind::Reverse {
                column: "product_id",
            },
        },
        RelationMeta {
            name: "cart_items",
            target: cart_item_meta,
            kind: RelationKind::Reverse {
                column: "product_id",
            },
        },
    ],
};

static PROMOTION: ModelMeta = ModelMeta {
    name: "promotion",
    table: "store_promotion",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("description", FieldKind::Text),
        FieldMeta::new("discount", FieldKind::Decimal),
    ],
    relations: &[RelationMeta {
        name: "products",
        target: product_meta,
        kind: RelationKind::ManyToMany {
            through: product_promotion_meta,
            source: "promotion_id",
            target: "product_id",
        },
    }],
};

static PRODUCT_PROMOTION: ModelMeta = ModelMeta {
    name: "product_promotion",
    table: "store_product_promotions",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("product_id", FieldKind::Integer),
        FieldMeta::new("promotion_id", FieldKind::Integer),
    ],
    relations: &[
        RelationMeta {
            name: "product",
            target: product_meta,
            kind: RelationKind::ForeignKey {
                column: "product_id",
                on_delete: OnDelete::Cascade,
            },
        },
        RelationMeta {
            name: "promotion",
            target: promotion_meta,
            kind: RelationKind::ForeignKey {
                column: "promotion_id",
                on_delete: OnDelete::Cascade,
            },
        },
    ],
};

pub fn product_meta() -> &'static ModelMeta {
    &PRODUCT
}

pub fn promotion_meta() -> &'static ModelMeta {
    &PROMOTION
}

pub fn product_promotion_meta() -> &'static ModelMeta {
    &PRODUCT_PROMOTION
}

/// A product offered in the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub inventory: i32,
    pub last_update: DateTime<Utc>,
    pub collection_id: CollectionId,
    /// Present when loaded with `select_related(Product::COLLECTION)`.
    pub collection: Option<Collection>,
    /// Present when loaded with `prefetch_related(Product::PROMOTIONS)`.
    pub promotions: Vec<Promotion>,
}

impl Product {
    pub const ID: Col<Self, ProductId> = Col::new("id");
    pub const TITLE: Col<Self, String> = Col::new("title");
    pub const SLUG: Col<Self, String> = Col::new("slug");
    pub const DESCRIPTION: Col<Self, Option<String>> = Col::new("description");
    pub const UNIT_PRICE: Col<Self, Decimal> = Col::new("unit_price");
    pub const INVENTORY: Col<Self, i32> = Col::new("inventory");
    pub const LAST_UPDATE: Col<Self, DateTime<Utc>> = Col::new("last_update");
    pub const COLLECTION_ID: Col<Self, CollectionId> = Col::new("collection_id");

    pub const COLLECTION: ForeignKey<Self, Collection> = ForeignKey::new("collection");
    pub const PROMOTIONS: Many<Self, Promotion> = Many::new("promotions");
    pub const ORDER_ITEMS: Many<Self, OrderItem> = Many::new("order_items");
    pub const CART_ITEMS: Many<Self, CartItem> = Many::new("cart_items");
}

impl Model for Product {
    fn meta() -> &'static ModelMeta {
        &PRODUCT
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            title: record.get("title")?,
            slug: record.get("slug")?,
            description: record.get("description")?,
            unit_price: record.get("unit_price")?,
            inventory: record.get("inventory")?,
            last_update: record.get("last_update")?,
            collection_id: record.get("collection_id")?,
            collection: record
                .related("collection")
                .map(Collection::from_record)
                .transpose()?,
            promotions: record
                .prefetched("promotions")
                .iter()
                .map(Promotion::from_record)
                .collect::<Result<_>>()?,
        })
    }
}

/// Every writable column of a product, used for create and full update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductInput {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub inventory: i32,
    pub collection_id: CollectionId,
}

/// A discount that can apply to several products.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Promotion {
    pub id: PromotionId,
    pub description: String,
    pub discount: Decimal,
}

impl Promotion {
    pub const ID: Col<Self, PromotionId> = Col::new("id");
    pub const DESCRIPTION: Col<Self, String> = Col::new("description");
    pub const DISCOUNT: Col<Self, Decimal> = Col::new("discount");

    pub const PRODUCTS: Many<Self, Product> = Many::new("products");
}

impl Model for Promotion {
    fn meta() -> &'static ModelMeta {
        &PROMOTION
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            description: record.get("description")?,
            discount: record.get("discount")?,
        })
    }
}

/// Link row between a product and a promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductPromotion {
    pub id: i32,
    pub product_id: ProductId,
    pub promotion_id: PromotionId,
}

impl ProductPromotion {
    pub const PRODUCT_ID: Col<Self, ProductId> = Col::new("product_id");
    pub const PROMOTION_ID: Col<Self, PromotionId> = Col::new("promotion_id");
}

impl Model for ProductPromotion {
    fn meta() -> &'static ModelMeta {
        &PRODUCT_PROMOTION
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            product_id: record.get("product_id")?,
            promotion_id: record.get("promotion_id")?,
        })
    }
}
