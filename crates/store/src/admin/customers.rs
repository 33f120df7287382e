//! Customers change list.

use serde_json::json;

use super::{Column, ModelAdmin, SearchField};
use crate::db::{Annotated, Expr, Model};
use crate::models::Customer;

/// Customers admin: names, membership and how many orders each placed.
/// Membership can be changed in place.
#[must_use]
pub fn customer_admin() -> ModelAdmin<Customer> {
    ModelAdmin::new(|customer: &Customer| customer.id.as_i32())
        .queryset(Customer::objects().annotate("orders_count", Customer::ORDERS.count()))
        .column(
            Column::new("first_name", "First name", |row: &Annotated<Customer>| {
                json!(row.object.first_name)
            })
            .ordering(Customer::FIRST_NAME.expr()),
        )
        .column(
            Column::new("last_name", "Last name", |row: &Annotated<Customer>| {
                json!(row.object.last_name)
            })
            .ordering(Customer::LAST_NAME.expr()),
        )
        .column(
            Column::new("membership", "Membership", |row: &Annotated<Customer>| {
                json!(row.object.membership.label())
            })
            .ordering(Customer::MEMBERSHIP.expr()),
        )
        .column(
            Column::new("orders", "Orders", |row: &Annotated<Customer>| {
                json!(row.get::<i64>("orders_count").unwrap_or_default())
            })
            .ordering(Expr::annotation("orders_count"))
            .link(|row: &Annotated<Customer>| {
                format!("/admin/orders?customer={}", row.object.id)
            }),
        )
        .search(SearchField::StartsWith(Customer::FIRST_NAME))
        .search(SearchField::StartsWith(Customer::LAST_NAME))
        .ordering([Customer::FIRST_NAME.asc(), Customer::LAST_NAME.asc()])
        .per_page(10)
        .editable("membership", |payload| {
            payload
                .choice("membership")
                .map(|tier| Customer::MEMBERSHIP.set(tier))
        })
}
