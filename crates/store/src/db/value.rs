//! Dynamically typed column values and result records.
//!
//! Every executor speaks in [`Value`]s: the `PostgreSQL` backend decodes rows
//! into them and the memory backend stores them directly. Models convert a
//! [`Record`] back into typed structs through [`FromValue`].

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use storefront_core::{
    CartId, CartItemId, CollectionId, CustomerId, Email, Membership, OrderId, OrderItemId,
    PaymentStatus, ProductId, PromotionId, TagId, TaggedItemId,
};

use super::{RepositoryError, Result};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

impl Value {
    /// Returns `true` for SQL `NULL`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short type name used in error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Decimal(_) => "decimal",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Date(_) => "date",
        }
    }

    /// Numeric view of the value, widening integers.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Int(i) => Some(Decimal::from(*i)),
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Text rendering used by string concatenation. `NULL` renders as nothing.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Decimal(d) => d.to_string(),
            Self::Text(s) => s.clone(),
            Self::Timestamp(ts) => ts.to_rfc3339(),
            Self::Date(d) => d.to_string(),
        }
    }

    /// Compare two values the way SQL does.
    ///
    /// Returns `Ok(None)` when either side is `NULL`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` when the two values have incomparable types.
    pub fn try_cmp(&self, other: &Self) -> Result<Option<Ordering>> {
        let ordering = match (self, other) {
            (Self::Null, _) | (_, Self::Null) => return Ok(None),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (a, b) => match (a.as_decimal(), b.as_decimal()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => {
                    return Err(RepositoryError::InvalidQuery(format!(
                        "cannot compare {} with {}",
                        a.type_name(),
                        b.type_name()
                    )));
                }
            },
        };
        Ok(Some(ordering))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<Email> for Value {
    fn from(value: Email) -> Self {
        Self::Text(value.into_inner())
    }
}

impl From<PaymentStatus> for Value {
    fn from(value: PaymentStatus) -> Self {
        Self::Text(value.code().to_owned())
    }
}

impl From<Membership> for Value {
    fn from(value: Membership) -> Self {
        Self::Text(value.code().to_owned())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Conversion from a stored [`Value`] into a Rust type.
pub trait FromValue: Sized {
    /// Convert a value.
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` if the value has the wrong type.
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &str, value: &Value) -> RepositoryError {
    RepositoryError::DataCorruption(format!("expected {expected}, found {}", value.type_name()))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch("boolean", other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Int(i) => Ok(*i),
            other => Err(mismatch("integer", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self> {
        let wide = i64::from_value(value)?;
        Self::try_from(wide)
            .map_err(|_| RepositoryError::DataCorruption(format!("integer out of range: {wide}")))
    }
}

impl FromValue for Decimal {
    fn from_value(value: &Value) -> Result<Self> {
        value.as_decimal().ok_or_else(|| mismatch("decimal", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(s.clone()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(*ts),
            other => Err(mismatch("timestamp", other)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Date(d) => Ok(*d),
            other => Err(mismatch("date", other)),
        }
    }
}

impl FromValue for Email {
    fn from_value(value: &Value) -> Result<Self> {
        let raw = String::from_value(value)?;
        Self::parse(&raw).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
        })
    }
}

impl FromValue for PaymentStatus {
    fn from_value(value: &Value) -> Result<Self> {
        let raw = String::from_value(value)?;
        Self::from_code(&raw).map_err(|e| RepositoryError::DataCorruption(e.to_string()))
    }
}

impl FromValue for Membership {
    fn from_value(value: &Value) -> Result<Self> {
        let raw = String::from_value(value)?;
        Self::from_code(&raw).map_err(|e| RepositoryError::DataCorruption(e.to_string()))
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

macro_rules! id_values {
    ($($name:ident),* $(,)?) => {
        $(
            impl From<$name> for Value {
                fn from(id: $name) -> Self {
                    Self::Int(i64::from(id.as_i32()))
                }
            }

            impl FromValue for $name {
                fn from_value(value: &Value) -> Result<Self> {
                    i32::from_value(value).map($name::new)
                }
            }
        )*
    };
}

id_values!(
    ProductId,
    CollectionId,
    PromotionId,
    CustomerId,
    OrderId,
    OrderItemId,
    CartId,
    CartItemId,
    TagId,
    TaggedItemId,
);

/// One result row: column values plus annotations, joined rows and
/// prefetched children.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    pub values: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub related: BTreeMap<String, Record>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub prefetched: BTreeMap<String, Vec<Record>>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column assignment.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Raw column value, if loaded.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Typed column value.
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` if the column was not loaded or has the
    /// wrong type.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| RepositoryError::DataCorruption(format!("missing column `{name}`")))?;
        T::from_value(value)
    }

    /// Typed annotation value.
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` if the annotation is missing or has the
    /// wrong type.
    pub fn annotation<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.annotations.get(name).ok_or_else(|| {
            RepositoryError::DataCorruption(format!("missing annotation `{name}`"))
        })?;
        T::from_value(value)
    }

    /// Primary key of the row.
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` if the `id` column is missing.
    pub fn id(&self) -> Result<i64> {
        self.get("id")
    }

    /// Row joined through a forward relation, if it was selected.
    #[must_use]
    pub fn related(&self, relation: &str) -> Option<&Self> {
        self.related.get(relation)
    }

    /// Children loaded by a prefetch; empty when nothing was prefetched.
    #[must_use]
    pub fn prefetched(&self, relation: &str) -> &[Self] {
        self.prefetched.get(relation).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
        assert_eq!(Value::from(ProductId::new(3)), Value::Int(3));
    }

    #[test]
    fn test_enum_values_use_storage_codes() {
        assert_eq!(Value::from(PaymentStatus::Complete), Value::Text("C".into()));
        let tier = Membership::from_value(&Value::Text("G".into())).unwrap();
        assert_eq!(tier, Membership::Gold);
        assert!(Membership::from_value(&Value::Text("Z".into())).is_err());
    }

    #[test]
    fn test_try_cmp_mixes_int_and_decimal() {
        let ordering = Value::Int(10).try_cmp(&Value::Decimal(Decimal::new(995, 2))).unwrap();
        assert_eq!(ordering, Some(Ordering::Greater));
        assert_eq!(Value::Null.try_cmp(&Value::Int(1)).unwrap(), None);
        assert!(Value::Text("a".into()).try_cmp(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_record_get() {
        let record = Record::new().with("id", 7).with("description", None::<String>);
        assert_eq!(record.get::<ProductId>("id").unwrap(), ProductId::new(7));
        assert_eq!(record.get::<Option<String>>("description").unwrap(), None);
        assert!(matches!(
            record.get::<String>("title"),
            Err(RepositoryError::DataCorruption(_))
        ));
        assert!(record.prefetched("items").is_empty());
    }

    #[test]
    fn test_value_serializes_untagged() {
        let json = serde_json::to_string(&vec![
            Value::Null,
            Value::Int(2),
            Value::Decimal(Decimal::new(1050, 2)),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,2,"10.50"]"#);
    }
}
