//! Tag repository.
//!
//! Tagged items reference their target by model name and id, so any model
//! of the schema can carry tags without a dedicated join table.

use tracing::instrument;

use storefront_core::TagId;

use super::{Executor, Model, Result, Value, create};
use crate::models::{Tag, TaggedItem};

/// Repository for tag operations.
pub struct TagRepository<'a, E: Executor + ?Sized> {
    db: &'a E,
}

impl<'a, E: Executor + ?Sized> TagRepository<'a, E> {
    /// Create a new tag repository.
    #[must_use]
    pub const fn new(db: &'a E) -> Self {
        Self { db }
    }

    /// Create a tag.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    #[instrument(skip(self))]
    pub async fn create(&self, label: &str) -> Result<Tag> {
        create(self.db, vec![("label", Value::from(label))]).await
    }

    /// Attach a tag to the `M` with id `object_id`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Integrity` if the tag does not exist.
    #[instrument(skip(self), fields(content_type = M::meta().name))]
    pub async fn tag<M: Model>(&self, tag_id: TagId, object_id: i32) -> Result<TaggedItem> {
        create(
            self.db,
            vec![
                ("tag_id", Value::from(tag_id)),
                ("content_type", Value::from(M::meta().name)),
                ("object_id", Value::from(object_id)),
            ],
        )
        .await
    }

    /// Tagged items pointing at the `M` with id `object_id`, with their tags.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn tagged_items_for<M: Model>(&self, object_id: i32) -> Result<Vec<TaggedItem>> {
        TaggedItem::objects()
            .select_related(TaggedItem::TAG)
            .filter(
                TaggedItem::CONTENT_TYPE.eq(M::meta().name.to_owned())
                    & TaggedItem::OBJECT_ID.eq(object_id),
            )
            .order_by([TaggedItem::ID.asc()])
            .all(self.db)
            .await
    }

    /// Tags on the `M` with id `object_id`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn tags_for<M: Model>(&self, object_id: i32) -> Result<Vec<Tag>> {
        Ok(self
            .tagged_items_for::<M>(object_id)
            .await?
            .into_iter()
            .filter_map(|item| item.tag)
            .collect())
    }
}
