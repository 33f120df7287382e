//! Cart repository.

use chrono::Utc;
use tracing::instrument;

use storefront_core::{CartId, CartItemId, ProductId};

use super::{Db, Executor, Model, RepositoryError, Result, Value, create};
use crate::models::{Cart, CartItem};

/// Repository for cart operations.
pub struct CartRepository<'a, E: Executor + ?Sized> {
    db: &'a E,
}

impl<'a, E: Executor + ?Sized> CartRepository<'a, E> {
    /// Create a new cart repository.
    #[must_use]
    pub const fn new(db: &'a E) -> Self {
        Self { db }
    }

    /// Create an empty cart.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    #[instrument(skip(self))]
    pub async fn create(&self) -> Result<Cart> {
        create(self.db, vec![("created_at", Value::from(Utc::now()))]).await
    }

    /// Get a cart with its items and their products.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no cart has this id.
    pub async fn get(&self, id: CartId) -> Result<Cart> {
        Cart::objects()
            .filter(Cart::ID.eq(id))
            .prefetch_related_with(Cart::ITEMS, |items| {
                items
                    .select_related(CartItem::PRODUCT)
                    .order_by([CartItem::ID.asc()])
            })
            .get(self.db)
            .await
    }

    /// Get a single cart item.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no item has this id.
    pub async fn get_item(&self, id: CartItemId) -> Result<CartItem> {
        CartItem::objects()
            .filter(CartItem::ID.eq(id))
            .get(self.db)
            .await
    }

    /// Add a product to a cart.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Integrity` if the cart or product does not
    /// exist.
    #[instrument(skip(self), fields(cart_id = %cart_id, product_id = %product_id))]
    pub async fn add_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i32,
    ) -> Result<CartItem> {
        create(
            self.db,
            vec![
                ("cart_id", Value::from(cart_id)),
                ("product_id", Value::from(product_id)),
                ("quantity", Value::from(quantity)),
            ],
        )
        .await
    }

    /// Change the quantity of a cart item.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the item does not exist.
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn set_quantity(&self, id: CartItemId, quantity: i32) -> Result<CartItem> {
        let changed = CartItem::objects()
            .filter(CartItem::ID.eq(id))
            .update(self.db, [CartItem::QUANTITY.set(quantity)])
            .await?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.get_item(id).await
    }

    /// Delete a cart together with its items.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the cart does not exist.
    #[instrument(skip(self), fields(cart_id = %id))]
    pub async fn delete(&self, id: CartId) -> Result<()> {
        let removed = Cart::objects()
            .filter(Cart::ID.eq(id))
            .delete(self.db)
            .await?;
        if removed == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

impl CartRepository<'_, Db> {
    /// Create a cart already holding `items` in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Integrity` if a product does not exist;
    /// no cart is created in that case.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn create_with_items(&self, items: &[(ProductId, i32)]) -> Result<Cart> {
        let tx = self.db.begin().await?;
        let cart = {
            let repo = CartRepository::new(&tx);
            let cart = repo.create().await?;
            for &(product_id, quantity) in items {
                repo.add_item(cart.id, product_id, quantity).await?;
            }
            cart
        };
        tx.commit().await?;
        self.get(cart.id).await
    }
}
