//! Product collections.

use serde::{Deserialize, Serialize};
use storefront_core::{CollectionId, ProductId};

use super::product::{Product, product_meta};
use crate::db::schema::{FieldKind, FieldMeta, ModelMeta, OnDelete, RelationKind, RelationMeta};
use crate::db::{Col, ForeignKey, Many, Model, Record, Result};

static COLLECTION: ModelMeta = ModelMeta {
    name: "collection",
    table: "store_collection",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("title", FieldKind::Text),
        FieldMeta::new("featured_product_id", FieldKind::Integer).nullable(),
    ],
    relations: &[
        RelationMeta {
            name: "featured_product",
            target: product_meta,
            kind: RelationKind::ForeignKey {
                column: "featured_product_id",
                on_delete: OnDelete::SetNull,
            },
        },
        RelationMeta {
            name: "products",
            target: product_meta,
            kind: RelationKind::Reverse {
                column: "collection_id",
            },
        },
    ],
};

pub fn collection_meta() -> &'static ModelMeta {
    &COLLECTION
}

/// A named grouping of products, optionally highlighting one of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub id: CollectionId,
    pub title: String,
    pub featured_product_id: Option<ProductId>,
}

impl Collection {
    pub const ID: Col<Self, CollectionId> = Col::new("id");
    pub const TITLE: Col<Self, String> = Col::new("title");
    pub const FEATURED_PRODUCT_ID: Col<Self, Option<ProductId>> = Col::new("featured_product_id");

    pub const FEATURED_PRODUCT: ForeignKey<Self, Product> = ForeignKey::new("featured_product");
    pub const PRODUCTS: Many<Self, Product> = Many::new("products");
}

impl Model for Collection {
    fn meta() -> &'static ModelMeta {
        &COLLECTION
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            title: record.get("title")?,
            featured_product_id: record.get("featured_product_id")?,
        })
    }
}

/// A collection with the number of products it holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionWithCount {
    #[serde(flatten)]
    pub collection: Collection,
    pub products_count: i64,
}

/// Writable columns of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectionInput {
    pub title: String,
    pub featured_product_id: Option<ProductId>,
}
