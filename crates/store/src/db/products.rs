//! Product repository.

use chrono::Utc;
use tracing::instrument;

use storefront_core::ProductId;

use super::{Executor, Model, RepositoryError, Result, Value, create};
use crate::models::{OrderItem, Product, ProductInput};

/// Message returned when a product still has order lines.
pub const PRODUCT_PROTECTED: &str =
    "Product cannot be deleted because it is associated with an order item.";

/// Repository for product operations.
pub struct ProductRepository<'a, E: Executor + ?Sized> {
    db: &'a E,
}

impl<'a, E: Executor + ?Sized> ProductRepository<'a, E> {
    /// Create a new product repository.
    #[must_use]
    pub const fn new(db: &'a E) -> Self {
        Self { db }
    }

    /// First `limit` products by id, each with its collection loaded.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list(&self, limit: usize) -> Result<Vec<Product>> {
        Product::objects()
            .select_related(Product::COLLECTION)
            .order_by([Product::ID.asc()])
            .limit(limit)
            .all(self.db)
            .await
    }

    /// Get a product by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no product has this id.
    pub async fn get(&self, id: ProductId) -> Result<Product> {
        Product::objects()
            .filter(Product::ID.eq(id))
            .select_related(Product::COLLECTION)
            .get(self.db)
            .await
    }

    /// Whether a product with this id exists.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn exists(&self, id: ProductId) -> Result<bool> {
        Product::objects()
            .filter(Product::ID.eq(id))
            .exists(self.db)
            .await
    }

    /// Number of order lines referencing the product.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn order_item_count(&self, id: ProductId) -> Result<i64> {
        OrderItem::objects()
            .filter(OrderItem::PRODUCT_ID.eq(id))
            .count(self.db)
            .await
    }

    /// Insert a product; `last_update` is set to now.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Integrity` if the collection does not exist.
    #[instrument(skip(self, input), fields(title = %input.title))]
    pub async fn create(&self, input: &ProductInput) -> Result<Product> {
        let product: Product = create(
            self.db,
            vec![
                ("title", Value::from(input.title.as_str())),
                ("slug", Value::from(input.slug.as_str())),
                ("description", Value::from(input.description.clone())),
                ("unit_price", Value::from(input.unit_price)),
                ("inventory", Value::from(input.inventory)),
                ("last_update", Value::from(Utc::now())),
                ("collection_id", Value::from(input.collection_id)),
            ],
        )
        .await?;
        tracing::info!(product_id = %product.id, "product created");
        Ok(product)
    }

    /// Replace every writable column of a product.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the product does not exist and
    /// `RepositoryError::Integrity` if the collection does not exist.
    #[instrument(skip(self, input), fields(product_id = %id))]
    pub async fn update(&self, id: ProductId, input: &ProductInput) -> Result<Product> {
        let changed = Product::objects()
            .filter(Product::ID.eq(id))
            .update(
                self.db,
                [
                    Product::TITLE.set(input.title.clone()),
                    Product::SLUG.set(input.slug.clone()),
                    Product::DESCRIPTION.set(input.description.clone()),
                    Product::UNIT_PRICE.set(input.unit_price),
                    Product::INVENTORY.set(input.inventory),
                    Product::LAST_UPDATE.set(Utc::now()),
                    Product::COLLECTION_ID.set(input.collection_id),
                ],
            )
            .await?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.get(id).await
    }

    /// Delete a product that no order references.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the product does not exist and
    /// `RepositoryError::Protected` if an order item references it.
    #[instrument(skip(self), fields(product_id = %id))]
    pub async fn delete(&self, id: ProductId) -> Result<()> {
        if !self.exists(id).await? {
            return Err(RepositoryError::NotFound);
        }
        if self.order_item_count(id).await? > 0 {
            return Err(RepositoryError::Protected(PRODUCT_PROTECTED.to_owned()));
        }
        Product::objects()
            .filter(Product::ID.eq(id))
            .delete(self.db)
            .await?;
        tracing::info!("product deleted");
        Ok(())
    }

    /// Set the inventory of the given products to zero.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the update fails.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn clear_inventory(&self, ids: &[ProductId]) -> Result<u64> {
        Product::objects()
            .filter(Product::ID.is_in(ids.iter().copied()))
            .update(self.db, [Product::INVENTORY.set(0)])
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use storefront_core::CollectionId;

    use super::*;
    use crate::db::{CollectionRepository, Db};
    use crate::models::{CollectionInput, SCHEMA};

    async fn seeded() -> (Db, CollectionId) {
        let db = Db::memory(SCHEMA);
        let collection = CollectionRepository::new(&db)
            .create(&CollectionInput {
                title: "Beauty".into(),
                featured_product_id: None,
            })
            .await
            .unwrap();
        (db, collection.collection.id)
    }

    fn input(collection_id: CollectionId) -> ProductInput {
        ProductInput {
            title: "Bread Ww Cluster".into(),
            slug: "bread-ww-cluster".into(),
            description: None,
            unit_price: Decimal::new(450, 2),
            inventory: 7,
            collection_id,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_loads_collection() {
        let (db, collection_id) = seeded().await;
        let repo = ProductRepository::new(&db);
        let created = repo.create(&input(collection_id)).await.unwrap();

        let fetched = repo.get(created.id).await.unwrap();
        assert_eq!(fetched.title, "Bread Ww Cluster");
        assert_eq!(fetched.collection.unwrap().title, "Beauty");
    }

    #[tokio::test]
    async fn test_create_with_unknown_collection_fails() {
        let (db, _) = seeded().await;
        let err = ProductRepository::new(&db)
            .create(&input(CollectionId::new(99)))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_update_replaces_every_column() {
        let (db, collection_id) = seeded().await;
        let repo = ProductRepository::new(&db);
        let created = repo.create(&input(collection_id)).await.unwrap();

        let mut changed = input(collection_id);
        changed.title = "Bread".into();
        changed.description = Some("Whole wheat".into());
        let updated = repo.update(created.id, &changed).await.unwrap();
        assert_eq!(updated.title, "Bread");
        assert_eq!(updated.description.as_deref(), Some("Whole wheat"));
        assert!(updated.last_update >= created.last_update);

        let err = repo.update(ProductId::new(42), &changed).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_delete_unreferenced_product() {
        let (db, collection_id) = seeded().await;
        let repo = ProductRepository::new(&db);
        let created = repo.create(&input(collection_id)).await.unwrap();

        repo.delete(created.id).await.unwrap();
        assert!(matches!(
            repo.get(created.id).await.unwrap_err(),
            RepositoryError::NotFound
        ));
        assert!(matches!(
            repo.delete(created.id).await.unwrap_err(),
            RepositoryError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_clear_inventory_counts_rows() {
        let (db, collection_id) = seeded().await;
        let repo = ProductRepository::new(&db);
        let a = repo.create(&input(collection_id)).await.unwrap();
        let b = repo.create(&input(collection_id)).await.unwrap();
        repo.create(&input(collection_id)).await.unwrap();

        assert_eq!(repo.clear_inventory(&[a.id, b.id]).await.unwrap(), 2);
        assert_eq!(repo.get(a.id).await.unwrap().inventory, 0);
        assert_eq!(repo.clear_inventory(&[]).await.unwrap(), 0);
    }
}
