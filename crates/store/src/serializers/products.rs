//! Product representation and validation.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use storefront_core::{CollectionId, ProductId, price_with_tax, to_currency};

use super::{DecimalRules, Payload, SerializerError, Text};
use crate::db::{CollectionRepository, Executor};
use crate::models::{Product, ProductInput};

/// Limits on a product's unit price.
pub const UNIT_PRICE: DecimalRules = DecimalRules {
    max_digits: 6,
    decimal_places: 2,
    min_value: Some(Decimal::ONE),
};

/// Product as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductData {
    pub id: ProductId,
    pub title: String,
    pub description: Option<String>,
    pub slug: String,
    pub inventory: i32,
    pub unit_price: Decimal,
    pub price_with_tax: Decimal,
    pub collection: CollectionId,
}

impl From<&Product> for ProductData {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            title: product.title.clone(),
            description: product.description.clone(),
            slug: product.slug.clone(),
            inventory: product.inventory,
            unit_price: to_currency(product.unit_price),
            price_with_tax: price_with_tax(product.unit_price),
            collection: product.collection_id,
        }
    }
}

/// Validate a product body, including that its collection exists.
///
/// # Errors
///
/// Returns `SerializerError::Invalid` listing every failing field, or
/// `SerializerError::Repository` if the collection lookup fails.
pub async fn validate<E: Executor + ?Sized>(
    db: &E,
    body: &Value,
) -> Result<ProductInput, SerializerError> {
    let mut payload = Payload::new(body)?;

    let title = payload.text("title", Text::max(255));
    let slug = payload.slug_or("slug", 50, title.as_deref());
    let description = payload.optional_text("description", usize::MAX);
    let unit_price = payload.decimal("unit_price", UNIT_PRICE);
    let inventory = payload.integer("inventory", Some(0));
    let collection = match payload.pk("collection") {
        Some(pk) => {
            let found = CollectionRepository::new(db)
                .exists(CollectionId::new(pk))
                .await?;
            payload.existing("collection", pk, found)
        }
        None => None,
    };

    let (
        Some(title),
        Some(slug),
        Some(description),
        Some(unit_price),
        Some(inventory),
        Some(collection),
    ) = (title, slug, description, unit_price, inventory, collection)
    else {
        return Err(payload.into_errors().into());
    };

    Ok(ProductInput {
        title,
        slug,
        description,
        unit_price,
        inventory,
        collection_id: CollectionId::new(collection),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::db::Db;
    use crate::models::{CollectionInput, SCHEMA};

    #[test]
    fn test_representation_formats_prices() {
        let product = Product {
            id: ProductId::new(1),
            title: "Bread".into(),
            slug: "bread".into(),
            description: None,
            unit_price: Decimal::from(100),
            inventory: 3,
            last_update: Utc::now(),
            collection_id: CollectionId::new(2),
            collection: None,
            promotions: Vec::new(),
        };
        let json = serde_json::to_value(ProductData::from(&product)).unwrap();
        assert_eq!(
            json,
            json!({
                "id": 1,
                "title": "Bread",
                "description": null,
                "slug": "bread",
                "inventory": 3,
                "unit_price": "100.00",
                "price_with_tax": "110.00",
                "collection": 2,
            })
        );
    }

    #[tokio::test]
    async fn test_validate_reports_every_field() {
        let db = Db::memory(SCHEMA);
        let body = json!({"slug": "bread", "unit_price": "0.5", "inventory": -2, "collection": 9});
        let Err(SerializerError::Invalid(errors)) = validate(&db, &body).await else {
            panic!("expected validation errors");
        };

        assert_eq!(errors.field("title"), ["This field is required."]);
        assert_eq!(
            errors.field("unit_price"),
            ["Ensure this value is greater than or equal to 1."]
        );
        assert_eq!(
            errors.field("inventory"),
            ["Ensure this value is greater than or equal to 0."]
        );
        assert_eq!(
            errors.field("collection"),
            ["Invalid pk \"9\" - object does not exist."]
        );
        assert!(errors.field("slug").is_empty());
    }

    #[tokio::test]
    async fn test_slug_is_derived_from_title() {
        let db = Db::memory(SCHEMA);
        let collection = CollectionRepository::new(&db)
            .create(&CollectionInput {
                title: "Bakery".into(),
                featured_product_id: None,
            })
            .await
            .unwrap();
        let body = json!({
            "title": "Rye Bread, Sliced",
            "unit_price": "4.00",
            "inventory": 3,
            "collection": collection.collection.id,
        });

        let input = validate(&db, &body).await.unwrap();
        assert_eq!(input.slug, "rye-bread-sliced");
    }

    #[tokio::test]
    async fn test_validate_accepts_valid_body() {
        let db = Db::memory(SCHEMA);
        let collection = CollectionRepository::new(&db)
            .create(&CollectionInput {
                title: "Bakery".into(),
                featured_product_id: None,
            })
            .await
            .unwrap();
        let body = json!({
            "title": " Bread ",
            "slug": "bread",
            "unit_price": 2.5,
            "inventory": 10,
            "collection": collection.collection.id,
        });

        let input = validate(&db, &body).await.unwrap();
        assert_eq!(input.title, "Bread");
        assert_eq!(input.description, None);
        assert_eq!(input.unit_price, Decimal::new(25, 1));
        assert_eq!(input.collection_id, collection.collection.id);
    }
}
