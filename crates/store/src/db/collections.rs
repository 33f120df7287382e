//! Collection repository.

use tracing::instrument;

use storefront_core::CollectionId;

use super::{Annotated, Executor, Model, QuerySet, RepositoryError, Result, Value, create};
use crate::models::{Collection, CollectionInput, CollectionWithCount, Product};

/// Message returned when a collection still holds products.
pub const COLLECTION_PROTECTED: &str =
    "Collection cannot be deleted because it is associated with a product.";

const PRODUCTS_COUNT: &str = "products_count";

/// Collections annotated with the number of products in each.
#[must_use]
pub fn counted() -> QuerySet<Collection> {
    Collection::objects().annotate(PRODUCTS_COUNT, Collection::PRODUCTS.count())
}

/// Repository for collection operations.
pub struct CollectionRepository<'a, E: Executor + ?Sized> {
    db: &'a E,
}

impl<'a, E: Executor + ?Sized> CollectionRepository<'a, E> {
    /// Create a new collection repository.
    #[must_use]
    pub const fn new(db: &'a E) -> Self {
        Self { db }
    }

    fn with_count(row: Annotated<Collection>) -> Result<CollectionWithCount> {
        Ok(CollectionWithCount {
            products_count: row.get(PRODUCTS_COUNT)?,
            collection: row.object,
        })
    }

    /// First `limit` collections by id, with product counts.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list(&self, limit: usize) -> Result<Vec<CollectionWithCount>> {
        counted()
            .order_by([Collection::ID.asc()])
            .limit(limit)
            .annotated(self.db)
            .await?
            .into_iter()
            .map(Self::with_count)
            .collect()
    }

    /// Get a collection by id, with its product count.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no collection has this id.
    pub async fn get(&self, id: CollectionId) -> Result<CollectionWithCount> {
        let mut rows = counted()
            .filter(Collection::ID.eq(id))
            .annotated(self.db)
            .await?;
        match rows.pop() {
            Some(row) if rows.is_empty() => Self::with_count(row),
            Some(_) => Err(RepositoryError::MultipleObjectsReturned(
                Collection::meta().name,
            )),
            None => Err(RepositoryError::NotFound),
        }
    }

    /// Whether a collection with this id exists.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn exists(&self, id: CollectionId) -> Result<bool> {
        Collection::objects()
            .filter(Collection::ID.eq(id))
            .exists(self.db)
            .await
    }

    /// Insert a collection.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Integrity` if the featured product does not
    /// exist.
    #[instrument(skip(self, input), fields(title = %input.title))]
    pub async fn create(&self, input: &CollectionInput) -> Result<CollectionWithCount> {
        let collection: Collection = create(
            self.db,
            vec![
                ("title", Value::from(input.title.as_str())),
                ("featured_product_id", Value::from(input.featured_product_id)),
            ],
        )
        .await?;
        tracing::info!(collection_id = %collection.id, "collection created");
        Ok(CollectionWithCount {
            collection,
            products_count: 0,
        })
    }

    /// Replace every writable column of a collection.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the collection does not exist
    /// and `RepositoryError::Integrity` if the featured product does not.
    #[instrument(skip(self, input), fields(collection_id = %id))]
    pub async fn update(
        &self,
        id: CollectionId,
        input: &CollectionInput,
    ) -> Result<CollectionWithCount> {
        let changed = Collection::objects()
            .filter(Collection::ID.eq(id))
            .update(
                self.db,
                [
                    Collection::TITLE.set(input.title.clone()),
                    Collection::FEATURED_PRODUCT_ID.set(input.featured_product_id),
                ],
            )
            .await?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        self.get(id).await
    }

    /// Delete a collection that holds no products.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the collection does not exist
    /// and `RepositoryError::Protected` if any product belongs to it.
    #[instrument(skip(self), fields(collection_id = %id))]
    pub async fn delete(&self, id: CollectionId) -> Result<()> {
        let collection = self.get(id).await?;
        if collection.products_count > 0 {
            return Err(RepositoryError::Protected(COLLECTION_PROTECTED.to_owned()));
        }
        Collection::objects()
            .filter(Collection::ID.eq(id))
            .delete(self.db)
            .await?;
        tracing::info!("collection deleted");
        Ok(())
    }

    /// Collections without a featured product, by title.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn without_featured_product(&self) -> Result<Vec<Collection>> {
        Collection::objects()
            .filter(Collection::FEATURED_PRODUCT_ID.is_null(true))
            .order_by([Collection::TITLE.asc()])
            .all(self.db)
            .await
    }

    /// Feature one of the products, or clear the featured product.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Integrity` if the product does not exist.
    #[instrument(skip(self), fields(collection_id = %id))]
    pub async fn set_featured_product(
        &self,
        id: CollectionId,
        product: Option<&Product>,
    ) -> Result<u64> {
        Collection::objects()
            .filter(Collection::ID.eq(id))
            .update(
                self.db,
                [Collection::FEATURED_PRODUCT_ID.set(product.map(|p| p.id))],
            )
            .await
    }
}
