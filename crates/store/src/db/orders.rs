//! Order repository.
//!
//! Placing an order writes the order row and every line in one
//! [`Transaction`](super::Transaction); a failure on any line leaves no
//! trace of the order.

use chrono::Utc;
use tracing::instrument;

use storefront_core::{CustomerId, OrderId, PaymentStatus};

use super::{Db, Executor, Model, QuerySet, RepositoryError, Result, Value, create};
use crate::models::{NewOrder, Order, OrderItem, Product};

/// Orders with their customer joined and their lines (with products)
/// prefetched.
#[must_use]
pub fn with_items() -> QuerySet<Order> {
    Order::objects()
        .select_related(Order::CUSTOMER)
        .prefetch_related_with(Order::ITEMS, |items| {
            items
                .select_related(OrderItem::PRODUCT)
                .order_by([OrderItem::ID.asc()])
        })
}

/// Repository for order operations.
pub struct OrderRepository<'a, E: Executor + ?Sized> {
    db: &'a E,
}

impl<'a, E: Executor + ?Sized> OrderRepository<'a, E> {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(db: &'a E) -> Self {
        Self { db }
    }

    /// Get an order with its customer and lines.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no order has this id.
    pub async fn get(&self, id: OrderId) -> Result<Order> {
        with_items()
            .filter(Order::ID.eq(id))
            .get(self.db)
            .await
    }

    /// The most recent orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Order>> {
        with_items()
            .order_by([Order::PLACED_AT.desc(), Order::ID.desc()])
            .limit(limit)
            .all(self.db)
            .await
    }

    /// Orders placed by one customer, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        Order::objects()
            .filter(Order::CUSTOMER_ID.eq(customer_id))
            .order_by([Order::PLACED_AT.asc()])
            .all(self.db)
            .await
    }

    /// Change the payment status of an order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn set_payment_status(&self, id: OrderId, status: PaymentStatus) -> Result<()> {
        let changed = Order::objects()
            .filter(Order::ID.eq(id))
            .update(self.db, [Order::PAYMENT_STATUS.set(status)])
            .await?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

impl OrderRepository<'_, Db> {
    /// Place an order: the order row plus one line per item, each line
    /// capturing the product's current unit price.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Integrity` if the customer or a product
    /// does not exist; nothing is written in that case.
    #[instrument(skip(self, order), fields(customer_id = %order.customer_id, items = order.items.len()))]
    pub async fn place(&self, order: &NewOrder) -> Result<Order> {
        let tx = self.db.begin().await?;

        let placed: Order = create(
            &tx,
            vec![
                ("placed_at", Value::from(Utc::now())),
                ("payment_status", Value::from(PaymentStatus::Pending)),
                ("customer_id", Value::from(order.customer_id)),
            ],
        )
        .await?;

        for item in &order.items {
            let product = Product::objects()
                .filter(Product::ID.eq(item.product_id))
                .first(&tx)
                .await?
                .ok_or_else(|| {
                    RepositoryError::Integrity(format!(
                        "product {} does not exist",
                        item.product_id
                    ))
                })?;
            let _: OrderItem = create(
                &tx,
                vec![
                    ("order_id", Value::from(placed.id)),
                    ("product_id", Value::from(product.id)),
                    ("quantity", Value::from(item.quantity)),
                    ("unit_price", Value::from(product.unit_price)),
                ],
            )
            .await?;
        }

        tx.commit().await?;
        tracing::info!(order_id = %placed.id, "order placed");
        self.get(placed.id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;
    use storefront_core::{Email, ProductId};

    use super::*;
    use crate::db::{CollectionRepository, CustomerRepository, ProductRepository};
    use crate::models::{
        CollectionInput, Customer, CustomerInput, NewOrderItem, ProductInput, SCHEMA,
    };

    async fn seeded() -> (Db, Customer, Product) {
        let db = Db::memory(SCHEMA);
        let collection = CollectionRepository::new(&db)
            .create(&CollectionInput {
                title: "Stationery".into(),
                featured_product_id: None,
            })
            .await
            .unwrap();
        let product = ProductRepository::new(&db)
            .create(&ProductInput {
                title: "Pen".into(),
                slug: "pen".into(),
                description: None,
                unit_price: Decimal::new(250, 2),
                inventory: 100,
                collection_id: collection.collection.id,
            })
            .await
            .unwrap();
        let customer = CustomerRepository::new(&db)
            .create(&CustomerInput {
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: Email::parse("ada@example.com").unwrap(),
                phone: "555-0100".into(),
                birth_date: None,
                membership: storefront_core::Membership::Silver,
            })
            .await
            .unwrap();
        (db, customer, product)
    }

    #[tokio::test]
    async fn test_place_captures_current_price() {
        let (db, customer, product) = seeded().await;
        let placed = OrderRepository::new(&db)
            .place(&NewOrder {
                customer_id: customer.id,
                items: vec![NewOrderItem {
                    product_id: product.id,
                    quantity: 3,
                }],
            })
            .await
            .unwrap();

        assert_eq!(placed.payment_status, PaymentStatus::Pending);
        assert_eq!(placed.customer.as_ref().unwrap().first_name, "Ada");
        assert_eq!(placed.items.len(), 1);

        let changed = ProductInput {
            title: product.title.clone(),
            slug: product.slug.clone(),
            description: None,
            unit_price: Decimal::from(9),
            inventory: product.inventory,
            collection_id: product.collection_id,
        };
        ProductRepository::new(&db)
            .update(product.id, &changed)
            .await
            .unwrap();

        let reloaded = OrderRepository::new(&db).get(placed.id).await.unwrap();
        let line = reloaded.items.first().unwrap();
        assert_eq!(line.unit_price, Decimal::new(250, 2));
        assert_eq!(line.product.as_ref().unwrap().unit_price, Decimal::from(9));
    }

    #[tokio::test]
    async fn test_failed_line_rolls_back_whole_order() {
        let (db, customer, product) = seeded().await;
        let err = OrderRepository::new(&db)
            .place(&NewOrder {
                customer_id: customer.id,
                items: vec![
                    NewOrderItem {
                        product_id: product.id,
                        quantity: 1,
                    },
                    NewOrderItem {
                        product_id: ProductId::new(404),
                        quantity: 1,
                    },
                ],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Integrity(_)));
        assert_eq!(Order::objects().count(&db).await.unwrap(), 0);
        assert_eq!(OrderItem::objects().count(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_referenced_product_cannot_be_deleted() {
        let (db, customer, product) = seeded().await;
        OrderRepository::new(&db)
            .place(&NewOrder {
                customer_id: customer.id,
                items: vec![NewOrderItem {
                    product_id: product.id,
                    quantity: 1,
                }],
            })
            .await
            .unwrap();

        let products = ProductRepository::new(&db);
        let err = products.delete(product.id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Protected(_)));
        assert!(products.exists(product.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_payment_status_update() {
        let (db, customer, product) = seeded().await;
        let repo = OrderRepository::new(&db);
        let placed = repo
            .place(&NewOrder {
                customer_id: customer.id,
                items: vec![NewOrderItem {
                    product_id: product.id,
                    quantity: 2,
                }],
            })
            .await
            .unwrap();

        repo.set_payment_status(placed.id, PaymentStatus::Complete)
            .await
            .unwrap();
        let orders = repo.for_customer(customer.id).await.unwrap();
        assert_eq!(orders.first().unwrap().payment_status, PaymentStatus::Complete);
        assert!(matches!(
            repo.set_payment_status(OrderId::new(77), PaymentStatus::Failed)
                .await
                .unwrap_err(),
            RepositoryError::NotFound
        ));
    }
}
