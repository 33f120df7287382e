//! Read-only reports over the catalogue and sales data.
//!
//! Every report is a typed async function over any [`Executor`]; [`run`]
//! looks one up by name and renders its rows as JSON for the CLI.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use storefront_core::{
    CollectionId, CustomerId, OrderId, PaymentStatus, ProductId, to_currency,
};

use crate::db::{
    Agg, Annotated, CollectionRepository, Executor, Expr, Model, OrderRepository, Record,
    RepositoryError, TagRepository,
};
use crate::models::{Collection, Customer, Order, OrderItem, Product, Tag};
use crate::serializers::{OrderData, ProductData};

/// Errors raised while running a report.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unknown report: {0}")]
    Unknown(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;

/// Knobs shared by the parameterised reports.
#[derive(Debug, Clone)]
pub struct ReportArgs {
    /// Product for `units-sold` and `product-tags`.
    pub product: ProductId,
    /// Restrict `price-stats` to one collection.
    pub collection: Option<CollectionId>,
    /// Inclusive bounds for `price-range`.
    pub min_price: Decimal,
    pub max_price: Decimal,
    /// Orders above which a customer counts as frequent.
    pub min_orders: i64,
    /// Row limit for the "recent" and "top" reports.
    pub limit: usize,
}

impl Default for ReportArgs {
    fn default() -> Self {
        Self {
            product: ProductId::new(1),
            collection: None,
            min_price: Decimal::from(20),
            max_price: Decimal::from(30),
            min_orders: 5,
            limit: 5,
        }
    }
}

/// Name and one-line description of every report.
pub const CATALOGUE: [(&str, &str); 16] = [
    ("low-inventory", "Products with fewer than 10 units in stock"),
    ("price-range", "Products priced within a range"),
    ("ordered-products", "Products ordered at least once"),
    ("recent-order-items", "Latest order lines with order, customer and product"),
    ("recent-orders", "Latest orders with their customer and lines"),
    ("price-stats", "Product count and price statistics"),
    ("units-sold", "Units of a product sold on completed orders"),
    ("customer-orders", "Orders placed and last order per customer"),
    ("customer-names", "Customer full names"),
    ("frequent-customers", "Customers with many orders"),
    ("customer-spend", "Customer spend on completed orders"),
    ("top-products", "Best selling products on completed orders"),
    ("discounted-prices", "Product prices with a 20% discount"),
    ("unfeatured-collections", "Collections without a featured product"),
    ("product-tags", "Tags attached to a product"),
    ("raw-products", "Products listed through hand-written SQL"),
];

/// Run the report called `name` and render its rows.
///
/// # Errors
///
/// Returns `ReportError::Unknown` for a name outside [`CATALOGUE`].
#[instrument(skip(db, args))]
pub async fn run<E: Executor + ?Sized>(
    db: &E,
    name: &str,
    args: &ReportArgs,
) -> Result<serde_json::Value> {
    let rendered = match name {
        "low-inventory" => serde_json::to_value(low_inventory(db).await?)?,
        "price-range" => {
            serde_json::to_value(price_range(db, args.min_price, args.max_price).await?)?
        }
        "ordered-products" => serde_json::to_value(ordered_products(db).await?)?,
        "recent-order-items" => serde_json::to_value(recent_order_items(db, args.limit).await?)?,
        "recent-orders" => serde_json::to_value(recent_orders(db, args.limit).await?)?,
        "price-stats" => serde_json::to_value(price_stats(db, args.collection).await?)?,
        "units-sold" => serde_json::to_value(units_sold(db, args.product).await?)?,
        "customer-orders" => serde_json::to_value(customer_orders(db).await?)?,
        "customer-names" => serde_json::to_value(customer_names(db).await?)?,
        "frequent-customers" => {
            serde_json::to_value(frequent_customers(db, args.min_orders).await?)?
        }
        "customer-spend" => serde_json::to_value(customer_spend(db).await?)?,
        "top-products" => serde_json::to_value(top_products(db, args.limit).await?)?,
        "discounted-prices" => serde_json::to_value(discounted_prices(db).await?)?,
        "unfeatured-collections" => serde_json::to_value(unfeatured_collections(db).await?)?,
        "product-tags" => serde_json::to_value(product_tags(db, args.product).await?)?,
        "raw-products" => serde_json::to_value(raw_products(db).await?)?,
        other => return Err(ReportError::Unknown(other.to_owned())),
    };
    Ok(rendered)
}

fn products_data(products: &[Product]) -> Vec<ProductData> {
    products.iter().map(ProductData::from).collect()
}

/// Products with fewer than 10 units, by title.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn low_inventory<E: Executor + ?Sized>(db: &E) -> Result<Vec<ProductData>> {
    let products = Product::objects()
        .filter(Product::INVENTORY.lt(10))
        .order_by([Product::TITLE.asc()])
        .all(db)
        .await?;
    Ok(products_data(&products))
}

/// Products priced between `min` and `max` inclusive, cheapest first.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn price_range<E: Executor + ?Sized>(
    db: &E,
    min: Decimal,
    max: Decimal,
) -> Result<Vec<ProductData>> {
    let products = Product::objects()
        .filter(Product::UNIT_PRICE.between(min, max))
        .order_by([Product::UNIT_PRICE.asc(), Product::TITLE.asc()])
        .all(db)
        .await?;
    Ok(products_data(&products))
}

/// Products appearing on at least one order line, by title.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn ordered_products<E: Executor + ?Sized>(db: &E) -> Result<Vec<ProductData>> {
    let ordered = OrderItem::objects()
        .distinct()
        .project(OrderItem::PRODUCT_ID);
    let products = Product::objects()
        .filter(Product::ID.in_subquery(ordered))
        .order_by([Product::TITLE.asc()])
        .all(db)
        .await?;
    Ok(products_data(&products))
}

/// The latest `limit` order lines with their order and customer joined,
/// oldest of them first. Products are attached without their descriptions.
///
/// # Errors
///
/// Returns `ReportError::Repository` if a query fails.
pub async fn recent_order_items<E: Executor + ?Sized>(
    db: &E,
    limit: usize,
) -> Result<Vec<Record>> {
    let mut items = OrderItem::objects()
        .select_related(OrderItem::ORDER.join(Order::CUSTOMER))
        .order_by([
            OrderItem::ORDER.then(Order::PLACED_AT).desc(),
            OrderItem::ID.desc(),
        ])
        .limit(limit)
        .records(db)
        .await?;
    items.reverse();

    let product_ids = items
        .iter()
        .map(|item| item.get::<ProductId>("product_id"))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let products = Product::objects()
        .filter(Product::ID.is_in(product_ids))
        .defer([Product::DESCRIPTION.field()])
        .records(db)
        .await?;
    for item in &mut items {
        let product_id = item.get::<i64>("product_id")?;
        if let Some(product) = products.iter().find(|p| p.id().ok() == Some(product_id)) {
            item.related.insert("product".to_owned(), product.clone());
        }
    }
    Ok(items)
}

/// The latest `limit` orders, newest first.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn recent_orders<E: Executor + ?Sized>(db: &E, limit: usize) -> Result<Vec<OrderData>> {
    let orders = OrderRepository::new(db).recent(limit).await?;
    Ok(orders.iter().map(OrderData::from).collect())
}

/// Product price statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceStats {
    pub count: i64,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub avg_price: Option<Decimal>,
}

/// Count and min/max/average unit price, optionally within one collection.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn price_stats<E: Executor + ?Sized>(
    db: &E,
    collection: Option<CollectionId>,
) -> Result<PriceStats> {
    let mut products = Product::objects();
    if let Some(collection) = collection {
        products = products.filter(Product::COLLECTION_ID.eq(collection));
    }
    let stats = products
        .aggregate(
            db,
            [
                ("count", Agg::count()),
                ("min_price", Agg::min(Product::UNIT_PRICE)),
                ("max_price", Agg::max(Product::UNIT_PRICE)),
                ("avg_price", Agg::avg(Product::UNIT_PRICE)),
            ],
        )
        .await?;
    Ok(PriceStats {
        count: stats.get("count")?,
        min_price: stats.get("min_price")?,
        max_price: stats.get("max_price")?,
        avg_price: stats.get::<Option<Decimal>>("avg_price")?.map(to_currency),
    })
}

/// Units of `product` sold on completed orders.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn units_sold<E: Executor + ?Sized>(db: &E, product: ProductId) -> Result<i64> {
    let sold = OrderItem::objects()
        .filter(
            OrderItem::PRODUCT_ID.eq(product)
                & OrderItem::ORDER
                    .then(Order::PAYMENT_STATUS)
                    .eq(PaymentStatus::Complete),
        )
        .aggregate(db, [("units", Agg::sum(OrderItem::QUANTITY))])
        .await?;
    Ok(sold.get::<Option<i64>>("units")?.unwrap_or(0))
}

/// Orders placed by one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerOrders {
    pub id: CustomerId,
    pub first_name: String,
    pub last_name: String,
    pub orders_count: i64,
    pub last_order: Option<OrderId>,
}

fn customer_orders_row(
    row: &Annotated<Customer>,
) -> std::result::Result<CustomerOrders, RepositoryError> {
    Ok(CustomerOrders {
        id: row.object.id,
        first_name: row.object.first_name.clone(),
        last_name: row.object.last_name.clone(),
        orders_count: row.get("orders_count")?,
        last_order: row.get("last_order")?,
    })
}

/// Every customer with their order count and latest order id.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn customer_orders<E: Executor + ?Sized>(db: &E) -> Result<Vec<CustomerOrders>> {
    let rows = Customer::objects()
        .annotate("orders_count", Customer::ORDERS.count())
        .annotate("last_order", Customer::ORDERS.max(Order::ID))
        .order_by([Customer::ID.asc()])
        .annotated(db)
        .await?;
    Ok(rows
        .iter()
        .map(customer_orders_row)
        .collect::<std::result::Result<_, _>>()?)
}

/// Customers with more than `min_orders` orders.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn frequent_customers<E: Executor + ?Sized>(
    db: &E,
    min_orders: i64,
) -> Result<Vec<CustomerOrders>> {
    let rows = Customer::objects()
        .annotate("orders_count", Customer::ORDERS.count())
        .annotate("last_order", Customer::ORDERS.max(Order::ID))
        .filter(Expr::annotation("orders_count").gt(Expr::lit(min_orders)))
        .order_by([Expr::<Customer>::annotation("orders_count").desc(), Customer::ID.asc()])
        .annotated(db)
        .await?;
    Ok(rows
        .iter()
        .map(customer_orders_row)
        .collect::<std::result::Result<_, _>>()?)
}

/// A customer's display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerName {
    pub id: CustomerId,
    pub full_name: String,
}

/// `first_name last_name` for every customer, computed by the database.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn customer_names<E: Executor + ?Sized>(db: &E) -> Result<Vec<CustomerName>> {
    let rows = Customer::objects()
        .annotate(
            "full_name",
            Expr::concat([
                Customer::FIRST_NAME.expr(),
                Expr::lit(" "),
                Customer::LAST_NAME.expr(),
            ]),
        )
        .order_by([Customer::FIRST_NAME.asc(), Customer::LAST_NAME.asc()])
        .annotated(db)
        .await?;
    rows.iter()
        .map(|row| {
            Ok(CustomerName {
                id: row.object.id,
                full_name: row.get("full_name")?,
            })
        })
        .collect()
}

/// Spend of one customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerSpend {
    pub id: CustomerId,
    pub first_name: String,
    pub last_name: String,
    pub total_spend: Decimal,
}

/// Customers with at least one completed order and what they spent on
/// completed orders (quantity × unit price), biggest spenders first.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn customer_spend<E: Executor + ?Sized>(db: &E) -> Result<Vec<CustomerSpend>> {
    let completed = OrderItem::ORDER
        .then(Order::PAYMENT_STATUS)
        .eq(PaymentStatus::Complete);
    let rows = Customer::objects()
        .filter(
            Customer::ORDERS.exists_where(Order::PAYMENT_STATUS.eq(PaymentStatus::Complete)),
        )
        .annotate(
            "total_spend",
            Customer::ORDERS.via(Order::ITEMS).sum_of(
                OrderItem::QUANTITY.expr() * OrderItem::UNIT_PRICE.expr(),
                Some(completed),
            ),
        )
        .order_by([Expr::<Customer>::annotation("total_spend").desc(), Customer::ID.asc()])
        .annotated(db)
        .await?;
    rows.iter()
        .map(|row| {
            let spend: Option<Decimal> = row.get("total_spend")?;
            Ok(CustomerSpend {
                id: row.object.id,
                first_name: row.object.first_name.clone(),
                last_name: row.object.last_name.clone(),
                total_spend: to_currency(spend.unwrap_or_default()),
            })
        })
        .collect()
}

/// Sales of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSales {
    pub id: ProductId,
    pub title: String,
    pub sales: Decimal,
}

/// The `limit` products with the highest sales (quantity × unit price) on
/// completed orders.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn top_products<E: Executor + ?Sized>(db: &E, limit: usize) -> Result<Vec<ProductSales>> {
    let completed = || {
        OrderItem::ORDER
            .then(Order::PAYMENT_STATUS)
            .eq(PaymentStatus::Complete)
    };
    let rows = Product::objects()
        .filter(Product::ORDER_ITEMS.exists_where(completed()))
        .annotate(
            "sales",
            Product::ORDER_ITEMS.sum_of(
                OrderItem::QUANTITY.expr() * OrderItem::UNIT_PRICE.expr(),
                Some(completed()),
            ),
        )
        .order_by([Expr::<Product>::annotation("sales").desc(), Product::ID.asc()])
        .limit(limit)
        .annotated(db)
        .await?;
    rows.iter()
        .map(|row| {
            let sales: Option<Decimal> = row.get("sales")?;
            Ok(ProductSales {
                id: row.object.id,
                title: row.object.title.clone(),
                sales: to_currency(sales.unwrap_or_default()),
            })
        })
        .collect()
}

/// A product price with its discount applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscountedPrice {
    pub id: ProductId,
    pub title: String,
    pub unit_price: Decimal,
    pub discounted_price: Decimal,
}

/// Every product at 80% of its unit price, computed by the database.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn discounted_prices<E: Executor + ?Sized>(db: &E) -> Result<Vec<DiscountedPrice>> {
    let rows = Product::objects()
        .annotate(
            "discounted_price",
            Product::UNIT_PRICE.expr() * Expr::lit(Decimal::new(8, 1)),
        )
        .order_by([Product::ID.asc()])
        .annotated(db)
        .await?;
    rows.iter()
        .map(|row| {
            Ok(DiscountedPrice {
                id: row.object.id,
                title: row.object.title.clone(),
                unit_price: to_currency(row.object.unit_price),
                discounted_price: to_currency(row.get("discounted_price")?),
            })
        })
        .collect()
}

/// Collections without a featured product, by title.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn unfeatured_collections<E: Executor + ?Sized>(db: &E) -> Result<Vec<Collection>> {
    Ok(CollectionRepository::new(db)
        .without_featured_product()
        .await?)
}

/// Tags on `product`.
///
/// # Errors
///
/// Returns `ReportError::Repository` if the query fails.
pub async fn product_tags<E: Executor + ?Sized>(db: &E, product: ProductId) -> Result<Vec<Tag>> {
    Ok(TagRepository::new(db)
        .tags_for::<Product>(product.as_i32())
        .await?)
}

/// Every product, read with hand-written SQL. `PostgreSQL` only.
///
/// # Errors
///
/// Returns `ReportError::Repository` wrapping `Unsupported` on the memory
/// backend.
pub async fn raw_products<E: Executor + ?Sized>(db: &E) -> Result<Vec<ProductData>> {
    let records = db
        .fetch_raw(
            Product::meta(),
            "SELECT * FROM store_product ORDER BY id",
            Vec::new(),
        )
        .await?;
    let products = records
        .iter()
        .map(Product::from_record)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(products_data(&products))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use storefront_core::{Email, Membership};

    use super::*;
    use crate::db::{CustomerRepository, Db, ProductRepository};
    use crate::models::{CollectionInput, CustomerInput, NewOrder, NewOrderItem, ProductInput, SCHEMA};

    struct Fixture {
        db: Db,
        soap: ProductId,
        brush: ProductId,
    }

    async fn fixture() -> Fixture {
        let db = Db::memory(SCHEMA);
        let collection = CollectionRepository::new(&db)
            .create(&CollectionInput {
                title: "Bath".into(),
                featured_product_id: None,
            })
            .await
            .unwrap();
        let products = ProductRepository::new(&db);
        let mut ids = Vec::new();
        for (title, price, inventory) in [("Soap", 25, 3), ("Brush", 12, 40)] {
            let product = products
                .create(&ProductInput {
                    title: title.into(),
                    slug: title.to_lowercase(),
                    description: Some("long text".into()),
                    unit_price: Decimal::from(price),
                    inventory,
                    collection_id: collection.collection.id,
                })
                .await
                .unwrap();
            ids.push(product.id);
        }
        let customer = CustomerRepository::new(&db)
            .create(&CustomerInput {
                first_name: "Mosh".into(),
                last_name: "Hamedani".into(),
                email: Email::parse("mosh@example.com").unwrap(),
                phone: "555-0100".into(),
                birth_date: None,
                membership: Membership::Gold,
            })
            .await
            .unwrap();

        let soap = *ids.first().unwrap();
        let brush = *ids.last().unwrap();
        let orders = OrderRepository::new(&db);
        let completed = orders
            .place(&NewOrder {
                customer_id: customer.id,
                items: vec![
                    NewOrderItem {
                        product_id: soap,
                        quantity: 2,
                    },
                    NewOrderItem {
                        product_id: brush,
                        quantity: 1,
                    },
                ],
            })
            .await
            .unwrap();
        orders
            .set_payment_status(completed.id, PaymentStatus::Complete)
            .await
            .unwrap();
        orders
            .place(&NewOrder {
                customer_id: customer.id,
                items: vec![NewOrderItem {
                    product_id: soap,
                    quantity: 5,
                }],
            })
            .await
            .unwrap();
        Fixture { db, soap, brush }
    }

    #[tokio::test]
    async fn test_product_reports() {
        let f = fixture().await;

        let low = low_inventory(&f.db).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low.first().unwrap().id, f.soap);

        let ranged = price_range(&f.db, Decimal::from(20), Decimal::from(30))
            .await
            .unwrap();
        assert_eq!(ranged.len(), 1);

        let ordered = ordered_products(&f.db).await.unwrap();
        let titles: Vec<_> = ordered.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, ["Brush", "Soap"]);

        let stats = price_stats(&f.db, None).await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min_price, Some(Decimal::from(12)));
        assert_eq!(stats.avg_price.unwrap().to_string(), "18.50");

        let discounted = discounted_prices(&f.db).await.unwrap();
        assert_eq!(discounted.first().unwrap().discounted_price.to_string(), "20.00");
    }

    #[tokio::test]
    async fn test_sales_reports_count_completed_orders_only() {
        let f = fixture().await;

        assert_eq!(units_sold(&f.db, f.soap).await.unwrap(), 2);
        assert_eq!(units_sold(&f.db, ProductId::new(99)).await.unwrap(), 0);

        let spend = customer_spend(&f.db).await.unwrap();
        assert_eq!(spend.len(), 1);
        assert_eq!(spend.first().unwrap().total_spend.to_string(), "62.00");

        let top = top_products(&f.db, 5).await.unwrap();
        assert_eq!(top.first().unwrap().id, f.soap);
        assert_eq!(top.last().unwrap().id, f.brush);
        assert_eq!(top.first().unwrap().sales.to_string(), "50.00");
    }

    #[tokio::test]
    async fn test_customer_reports() {
        let f = fixture().await;

        let counts = customer_orders(&f.db).await.unwrap();
        assert_eq!(counts.first().unwrap().orders_count, 2);
        assert_eq!(counts.first().unwrap().last_order, Some(OrderId::new(2)));

        assert!(frequent_customers(&f.db, 5).await.unwrap().is_empty());
        assert_eq!(frequent_customers(&f.db, 1).await.unwrap().len(), 1);

        let names = customer_names(&f.db).await.unwrap();
        assert_eq!(names.first().unwrap().full_name, "Mosh Hamedani");
    }

    #[tokio::test]
    async fn test_run_by_name() {
        let f = fixture().await;
        for (name, _) in CATALOGUE {
            let result = run(&f.db, name, &ReportArgs::default()).await;
            if name == "raw-products" {
                assert!(matches!(
                    result,
                    Err(ReportError::Repository(RepositoryError::Unsupported(_)))
                ));
            } else {
                assert!(result.is_ok(), "{name} failed: {result:?}");
            }
        }

        let items = recent_order_items(&f.db, 5).await.unwrap();
        assert_eq!(items.len(), 3);
        let last = items.last().unwrap();
        assert!(last.related("order").unwrap().related("customer").is_some());
        let product = last.related("product").unwrap();
        assert!(product.value("title").is_some());
        assert!(product.value("description").is_none());

        assert!(matches!(
            run(&f.db, "nope", &ReportArgs::default()).await,
            Err(ReportError::Unknown(_))
        ));
    }
}
