//! Products change list.

use serde_json::json;

use storefront_core::{CollectionId, to_currency};

use super::{Action, Column, ListFilter, ModelAdmin, SearchField, date_lookup};
use crate::db::{Annotated, Model, Record};
use crate::models::{Collection, Product};
use crate::serializers::products::UNIT_PRICE;

/// Inventory below this is reported as low.
pub const LOW_INVENTORY: i32 = 10;

/// `Low` below [`LOW_INVENTORY`] units, `OK` otherwise.
#[must_use]
pub const fn inventory_status(inventory: i32) -> &'static str {
    if inventory < LOW_INVENTORY { "Low" } else { "OK" }
}

/// Products admin: stock levels at a glance, filterable by collection,
/// update date and inventory, with a bulk "clear inventory" action and
/// prices editable in place.
#[must_use]
pub fn product_admin() -> ModelAdmin<Product> {
    ModelAdmin::new(|product: &Product| product.id.as_i32())
        .queryset(Product::objects().select_related(Product::COLLECTION))
        .column(
            Column::new("title", "Title", |row: &Annotated<Product>| {
                json!(row.object.title)
            })
            .ordering(Product::TITLE.expr()),
        )
        .column(
            Column::new("unit_price", "Unit price", |row: &Annotated<Product>| {
                json!(to_currency(row.object.unit_price))
            })
            .ordering(Product::UNIT_PRICE.expr()),
        )
        .column(
            Column::new(
                "inventory_status",
                "Inventory status",
                |row: &Annotated<Product>| json!(inventory_status(row.object.inventory)),
            )
            .ordering(Product::INVENTORY.expr()),
        )
        .column(Column::new(
            "collection_title",
            "Collection",
            |row: &Annotated<Product>| {
                json!(row.object.collection.as_ref().map(|c| c.title.as_str()))
            },
        ))
        .filter(ListFilter::related(
            "collection",
            "Collection",
            Collection::objects()
                .order_by([Collection::TITLE.asc()])
                .query()
                .clone(),
            collection_label,
            |value| {
                let id = value.parse::<i32>().ok()?;
                Some(Product::COLLECTION_ID.eq(CollectionId::new(id)))
            },
        ))
        .filter(ListFilter::date("last_update", "Last update", |value| {
            date_lookup(&Product::LAST_UPDATE, value)
        }))
        .filter(ListFilter::simple(
            "inventory",
            "Inventory",
            vec![("<10", "Low")],
            |value| (value == "<10").then(|| Product::INVENTORY.lt(LOW_INVENTORY)),
        ))
        .search(SearchField::Contains(Product::TITLE))
        .ordering([Product::TITLE.asc()])
        .per_page(10)
        .editable("unit_price", |payload| {
            payload
                .decimal("unit_price", UNIT_PRICE)
                .map(|price| Product::UNIT_PRICE.set(price))
        })
        .action(Action {
            name: "clear_inventory",
            description: "Clear inventory",
            assignments: || vec![Product::INVENTORY.set(0)],
            message: |count| format!("{count} products were successfully updated."),
        })
}

fn collection_label(record: &Record) -> String {
    record.get::<String>("title").unwrap_or_default()
}
