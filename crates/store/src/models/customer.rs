//! Customers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use storefront_core::{CustomerId, Email, Membership};

use super::order::{Order, order_meta};
use crate::db::schema::{FieldKind, FieldMeta, ModelMeta, RelationKind, RelationMeta};
use crate::db::{Col, Many, Model, Record, Result};

static CUSTOMER: ModelMeta = ModelMeta {
    name: "customer",
    table: "store_customer",
    fields: &[
        FieldMeta::new("id", FieldKind::Integer),
        FieldMeta::new("first_name", FieldKind::Text),
        FieldMeta::new("last_name", FieldKind::Text),
        FieldMeta::new("email", FieldKind::Text).unique(),
        FieldMeta::new("phone", FieldKind::Text),
        FieldMeta::new("birth_date", FieldKind::Date).nullable(),
        FieldMeta::new("membership", FieldKind::Text),
    ],
    relations: &[RelationMeta {
        name: "orders",
        target: order_meta,
        kind: RelationKind::Reverse {
            column: "customer_id",
        },
    }],
};

pub fn customer_meta() -> &'static ModelMeta {
    &CUSTOMER
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customer {
    pub id: CustomerId,
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
    pub phone: String,
    pub birth_date: Option<NaiveDate>,
    pub membership: Membership,
}

impl Customer {
    pub const ID: Col<Self, CustomerId> = Col::new("id");
    pub const FIRST_NAME: Col<Self, String> = Col::new("first_name");
    pub const LAST_NAME: Col<Self, String> = Col::new("last_name");
    pub const EMAIL: Col<Self, Email> = Col::new("email");
    pub const PHONE: Col<Self, String> = Col::new("phone");
    pub const BIRTH_DATE: Col<Self, Option<NaiveDate>> = Col::new("birth_date");
    pub const MEMBERSHIP: Col<Self, Membership> = Col::new("membership");

    pub const ORDERS: Many<Self, Order> = Many::new("orders");
}

impl Model for Customer {
    fn meta() -> &'static ModelMeta {
        &CUSTOMER
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            first_name: record.get("first_name")?,
            last_name: record.get("last_name")?,
            email: record.get("email")?,
            phone: record.get("phone")?,
            birth_date: record.get("birth_date")?,
            membership: record.get("membership")?,
        })
    }
}

/// Writable columns of a customer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomerInput {
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
    pub phone: String,
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub membership: Membership,
}
