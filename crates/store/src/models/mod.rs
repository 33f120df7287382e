//! Domain models for the store.
//!
//! Each model carries its table metadata and typed column handles as
//! associated constants, e.g. `Product::UNIT_PRICE` or
//! `Customer::ORDERS`. Relation fields (`Product::collection`,
//! `Order::items`) are filled only when the query loaded them with
//! `select_related` / `prefetch_related`.

pub mod cart;
pub mod collection;
pub mod customer;
pub mod order;
pub mod product;
pub mod tag;

use crate::db::Schema;

pub use cart::{Cart, CartItem};
pub use collection::{Collection, CollectionInput, CollectionWithCount};
pub use customer::{Customer, CustomerInput};
pub use order::{NewOrder, NewOrderItem, Order, OrderItem};
pub use product::{Product, ProductInput, ProductPromotion, Promotion};
pub use tag::{Tag, TaggedItem};

/// Every table the store owns, in dependency order.
pub const SCHEMA: Schema = &[
    collection::collection_meta,
    product::product_meta,
    product::promotion_meta,
    product::product_promotion_meta,
    customer::customer_meta,
    order::order_meta,
    order::order_item_meta,
    cart::cart_meta,
    cart::cart_item_meta,
    tag::tag_meta,
    tag::tagged_item_meta,
];
