//! Collections change list.

use serde_json::json;

use super::{Column, ModelAdmin, SearchField};
use crate::db::{Annotated, Expr};
use crate::db::collections::counted;
use crate::models::Collection;

/// Collections admin: titles with their product counts, each count linking
/// to the products list filtered by that collection.
#[must_use]
pub fn collection_admin() -> ModelAdmin<Collection> {
    ModelAdmin::new(|collection: &Collection| collection.id.as_i32())
        .queryset(counted())
        .column(
            Column::new("title", "Title", |row: &Annotated<Collection>| {
                json!(row.object.title)
            })
            .ordering(Collection::TITLE.expr()),
        )
        .column(
            Column::new(
                "products_count",
                "Products count",
                |row: &Annotated<Collection>| json!(products_count(row)),
            )
            .ordering(Expr::annotation("products_count"))
            .link(|row: &Annotated<Collection>| {
                format!("/admin/products?collection={}", row.object.id)
            }),
        )
        .search(SearchField::Contains(Collection::TITLE))
        .ordering([Collection::TITLE.asc()])
}

fn products_count(row: &Annotated<Collection>) -> i64 {
    row.get::<i64>("products_count").unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::admin::{Params, changelist};
    use crate::db::{CollectionRepository, Db, ProductRepository};
    use crate::models::{CollectionInput, ProductInput, SCHEMA};

    #[tokio::test]
    async fn test_counts_and_links() {
        let db = Db::memory(SCHEMA);
        let collections = CollectionRepository::new(&db);
        let mut ids = Vec::new();
        for title in ["Toys", "Garden"] {
            let created = collections
                .create(&CollectionInput {
                    title: title.into(),
                    featured_product_id: None,
                })
                .await
                .unwrap();
            ids.push(created.collection.id);
        }
        let toys = *ids.first().unwrap();
        for slug in ["kite", "yoyo"] {
            ProductRepository::new(&db)
                .create(&ProductInput {
                    title: slug.into(),
                    slug: slug.into(),
                    description: None,
                    unit_price: Decimal::from(5),
                    inventory: 1,
                    collection_id: toys,
                })
                .await
                .unwrap();
        }

        let params: Params = [("o".to_owned(), "-products_count".to_owned())].into();
        let list = changelist(&db, &collection_admin(), &params).await.unwrap();
        let first = list.rows.first().unwrap();
        assert_eq!(first.cells["title"], "Toys");
        assert_eq!(first.cells["products_count"], 2);
        assert_eq!(
            first.links["products_count"],
            format!("/admin/products?collection={toys}")
        );
        let last = list.rows.last().unwrap();
        assert_eq!(last.cells["products_count"], 0);
    }
}
