//! Collection representation and validation.

use serde::Serialize;
use serde_json::Value;

use storefront_core::{CollectionId, ProductId};

use super::{Payload, SerializerError, Text};
use crate::db::{Executor, ProductRepository};
use crate::models::{CollectionInput, CollectionWithCount};

/// Collection as returned by the API. `products_count` is read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionData {
    pub id: CollectionId,
    pub title: String,
    pub featured_product: Option<ProductId>,
    pub products_count: i64,
}

impl From<&CollectionWithCount> for CollectionData {
    fn from(counted: &CollectionWithCount) -> Self {
        Self {
            id: counted.collection.id,
            title: counted.collection.title.clone(),
            featured_product: counted.collection.featured_product_id,
            products_count: counted.products_count,
        }
    }
}

/// Validate a collection body. `products_count` is ignored if sent.
///
/// # Errors
///
/// Returns `SerializerError::Invalid` listing every failing field, or
/// `SerializerError::Repository` if the product lookup fails.
pub async fn validate<E: Executor + ?Sized>(
    db: &E,
    body: &Value,
) -> Result<CollectionInput, SerializerError> {
    let mut payload = Payload::new(body)?;

    let title = payload.text("title", Text::max(255));
    let featured = match payload.optional_pk("featured_product") {
        Some(Some(pk)) => {
            let found = ProductRepository::new(db)
                .exists(ProductId::new(pk))
                .await?;
            payload.existing("featured_product", pk, found).map(Some)
        }
        other => other,
    };

    let (Some(title), Some(featured)) = (title, featured) else {
        return Err(payload.into_errors().into());
    };

    Ok(CollectionInput {
        title,
        featured_product_id: featured.map(ProductId::new),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::Db;
    use crate::models::{Collection, SCHEMA};

    #[test]
    fn test_representation() {
        let counted = CollectionWithCount {
            collection: Collection {
                id: CollectionId::new(3),
                title: "Beauty".into(),
                featured_product_id: None,
            },
            products_count: 4,
        };
        assert_eq!(
            serde_json::to_value(CollectionData::from(&counted)).unwrap(),
            json!({"id": 3, "title": "Beauty", "featured_product": null, "products_count": 4})
        );
    }

    #[tokio::test]
    async fn test_featured_product_must_exist() {
        let db = Db::memory(SCHEMA);
        let body = json!({"title": "Beauty", "featured_product": 12});
        let Err(SerializerError::Invalid(errors)) = validate(&db, &body).await else {
            panic!("expected validation errors");
        };
        assert_eq!(
            errors.field("featured_product"),
            ["Invalid pk \"12\" - object does not exist."]
        );
    }

    #[tokio::test]
    async fn test_read_only_count_is_ignored() {
        let db = Db::memory(SCHEMA);
        let body = json!({"title": "Beauty", "products_count": 99});
        let input = validate(&db, &body).await.unwrap();
        assert_eq!(input.title, "Beauty");
        assert_eq!(input.featured_product_id, None);
    }
}
