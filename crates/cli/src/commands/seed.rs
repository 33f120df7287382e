//! Seed the store from a YAML fixture.
//!
//! Entities refer to each other by natural keys: products name their
//! collection by title, orders name their customer by email and their
//! products by slug.
//!
//! ```yaml
//! collections:
//!   - title: Bath
//!     featured_product: lavender-soap
//! products:
//!   - title: Lavender Soap
//!     slug: lavender-soap
//!     unit_price: "4.50"
//!     inventory: 12
//!     collection: Bath
//!     tags: [organic]
//! customers:
//!   - first_name: Ada
//!     last_name: Lovelace
//!     email: ada@example.com
//!     phone: "555-0100"
//!     membership: gold
//! orders:
//!   - customer: ada@example.com
//!     payment_status: complete
//!     items:
//!       - product: lavender-soap
//!         quantity: 2
//! ```

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use storefront_core::{CollectionId, Email, Membership, PaymentStatus};
use storefront_store::db::{
    CollectionRepository, CustomerRepository, Db, OrderRepository, ProductRepository,
    RepositoryError, TagRepository,
};
use storefront_store::models::{
    CollectionInput, Customer, CustomerInput, NewOrder, NewOrderItem, Product, ProductInput,
};

use super::open;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read fixture: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid fixture: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unknown {kind} `{key}` referenced in fixture")]
    UnknownReference { kind: &'static str, key: String },

    #[error(transparent)]
    Open(#[from] super::OpenError),

    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// A complete fixture file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    #[serde(default)]
    pub collections: Vec<CollectionFixture>,
    #[serde(default)]
    pub products: Vec<ProductFixture>,
    #[serde(default)]
    pub customers: Vec<CustomerFixture>,
    #[serde(default)]
    pub orders: Vec<OrderFixture>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionFixture {
    pub title: String,
    /// Slug of the product to feature.
    pub featured_product: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductFixture {
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub unit_price: Decimal,
    pub inventory: i32,
    /// Title of the owning collection.
    pub collection: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomerFixture {
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
    pub phone: String,
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub membership: Membership,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderFixture {
    /// Email of the customer placing the order.
    pub customer: Email,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub items: Vec<OrderItemFixture>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderItemFixture {
    /// Slug of the product ordered.
    pub product: String,
    pub quantity: i32,
}

/// What a seed run created.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub collections: usize,
    pub products: usize,
    pub customers: usize,
    pub orders: usize,
    pub tags: usize,
}

/// Load the fixture at `file_path` into the configured store.
///
/// # Errors
///
/// Returns an error if the file is missing or malformed, a reference does
/// not resolve, or a write fails.
pub async fn run(file_path: &str) -> Result<(), SeedError> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(SeedError::FileNotFound(file_path.to_owned()));
    }

    info!(path = %file_path, "Loading fixture");

    // Parse before connecting so a bad file fails fast
    let content = tokio::fs::read_to_string(path).await?;
    let fixture: Fixture = serde_yaml::from_str(&content)?;

    let db = open().await?;
    let summary = seed(&db, &fixture).await?;

    info!("Seeding complete!");
    info!("  Collections: {}", summary.collections);
    info!("  Products: {}", summary.products);
    info!("  Customers: {}", summary.customers);
    info!("  Orders: {}", summary.orders);
    info!("  Tags: {}", summary.tags);
    Ok(())
}

fn lookup<'m, V>(
    map: &'m HashMap<String, V>,
    kind: &'static str,
    key: &str,
) -> Result<&'m V, SeedError> {
    map.get(key).ok_or_else(|| SeedError::UnknownReference {
        kind,
        key: key.to_owned(),
    })
}

/// Write every entity of `fixture`, resolving natural-key references.
///
/// # Errors
///
/// Returns `SeedError::UnknownReference` for a dangling reference and
/// `SeedError::Storage` if a write fails.
pub async fn seed(db: &Db, fixture: &Fixture) -> Result<SeedSummary, SeedError> {
    let mut summary = SeedSummary::default();

    let collection_repo = CollectionRepository::new(db);
    let mut collections: HashMap<String, CollectionId> = HashMap::new();
    for entry in &fixture.collections {
        let created = collection_repo
            .create(&CollectionInput {
                title: entry.title.clone(),
                featured_product_id: None,
            })
            .await?;
        collections.insert(entry.title.clone(), created.collection.id);
        summary.collections += 1;
    }

    let product_repo = ProductRepository::new(db);
    let tag_repo = TagRepository::new(db);
    let mut products: HashMap<String, Product> = HashMap::new();
    let mut tags = HashMap::new();
    for entry in &fixture.products {
        let collection_id = *lookup(&collections, "collection", &entry.collection)?;
        let product = product_repo
            .create(&ProductInput {
                title: entry.title.clone(),
                slug: entry.slug.clone(),
                description: entry.description.clone(),
                unit_price: entry.unit_price,
                inventory: entry.inventory,
                collection_id,
            })
            .await?;
        for label in &entry.tags {
            let tag_id = match tags.get(label) {
                Some(id) => *id,
                None => {
                    let tag = tag_repo.create(label).await?;
                    tags.insert(label.clone(), tag.id);
                    summary.tags += 1;
                    tag.id
                }
            };
            tag_repo.tag::<Product>(tag_id, product.id.as_i32()).await?;
        }
        products.insert(entry.slug.clone(), product);
        summary.products += 1;
    }

    for entry in &fixture.collections {
        if let Some(slug) = &entry.featured_product {
            let product = lookup(&products, "product", slug)?;
            let id = *lookup(&collections, "collection", &entry.title)?;
            collection_repo
                .set_featured_product(id, Some(product))
                .await?;
        }
    }

    let customer_repo = CustomerRepository::new(db);
    let mut customers: HashMap<String, Customer> = HashMap::new();
    for entry in &fixture.customers {
        let customer = customer_repo
            .create(&CustomerInput {
                first_name: entry.first_name.clone(),
                last_name: entry.last_name.clone(),
                email: entry.email.clone(),
                phone: entry.phone.clone(),
                birth_date: entry.birth_date,
                membership: entry.membership,
            })
            .await?;
        customers.insert(entry.email.as_str().to_owned(), customer);
        summary.customers += 1;
    }

    let order_repo = OrderRepository::new(db);
    for entry in &fixture.orders {
        let customer = lookup(&customers, "customer", entry.customer.as_str())?;
        let items = entry
            .items
            .iter()
            .map(|item| {
                Ok(NewOrderItem {
                    product_id: lookup(&products, "product", &item.product)?.id,
                    quantity: item.quantity,
                })
            })
            .collect::<Result<Vec<_>, SeedError>>()?;
        let order = order_repo
            .place(&NewOrder {
                customer_id: customer.id,
                items,
            })
            .await?;
        if entry.payment_status != PaymentStatus::Pending {
            order_repo
                .set_payment_status(order.id, entry.payment_status)
                .await?;
        }
        summary.orders += 1;
    }

    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use storefront_store::models::SCHEMA;
    use storefront_store::reports;

    use super::*;

    const FIXTURE: &str = r#"
collections:
  - title: Bath
    featured_product: lavender-soap
  - title: Kitchen
products:
  - title: Lavender Soap
    slug: lavender-soap
    description: Cold-pressed bar
    unit_price: "4.50"
    inventory: 3
    collection: Bath
    tags: [organic, bestseller]
  - title: Oak Spoon
    slug: oak-spoon
    unit_price: "12.00"
    inventory: 40
    collection: Kitchen
    tags: [organic]
customers:
  - first_name: Ada
    last_name: Lovelace
    email: ada@example.com
    phone: "555-0100"
    birth_date: 1815-12-10
    membership: gold
orders:
  - customer: ada@example.com
    payment_status: complete
    items:
      - product: lavender-soap
        quantity: 2
      - product: oak-spoon
        quantity: 1
  - customer: ada@example.com
    items:
      - product: oak-spoon
        quantity: 4
"#;

    #[tokio::test]
    async fn test_seed_resolves_references() {
        let fixture: Fixture = serde_yaml::from_str(FIXTURE).unwrap();
        let db = Db::memory(SCHEMA);

        let summary = seed(&db, &fixture).await.unwrap();
        assert_eq!(
            summary,
            SeedSummary {
                collections: 2,
                products: 2,
                customers: 1,
                orders: 2,
                tags: 2,
            }
        );

        let unfeatured = reports::unfeatured_collections(&db).await.unwrap();
        let titles: Vec<_> = unfeatured.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Kitchen"]);

        let soap = ProductRepository::new(&db).list(10).await.unwrap();
        let soap = soap.first().unwrap();
        let tags = reports::product_tags(&db, soap.id).await.unwrap();
        assert_eq!(tags.len(), 2);

        assert_eq!(reports::units_sold(&db, soap.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unknown_reference() {
        let fixture: Fixture = serde_yaml::from_str(
            r"
collections: []
products:
  - title: Lost
    slug: lost
    unit_price: '1.00'
    inventory: 1
    collection: Nowhere
",
        )
        .unwrap();
        let db = Db::memory(SCHEMA);

        let err = seed(&db, &fixture).await.unwrap_err();
        assert!(matches!(
            err,
            SeedError::UnknownReference { kind: "collection", .. }
        ));
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let result = serde_yaml::from_str::<Fixture>("products:\n  - title: X\n    colour: red\n");
        assert!(result.is_err());
    }
}
