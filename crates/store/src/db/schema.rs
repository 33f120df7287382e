//! Static model metadata.
//!
//! Each model declares its table, columns and relations once as a
//! `static ModelMeta`. Relations point at their target through a function
//! pointer so that mutually referencing models (product and collection) can
//! be declared without cyclic statics.

use super::query::QuerySet;
use super::value::{Record, Value};
use super::{RepositoryError, Result};

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    BigInteger,
    Decimal,
    Text,
    Boolean,
    Timestamp,
    Date,
}

impl FieldKind {
    /// `PostgreSQL` type name.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::BigInteger => "BIGINT",
            Self::Decimal => "NUMERIC",
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
            Self::Timestamp => "TIMESTAMPTZ",
            Self::Date => "DATE",
        }
    }

    /// Type computed expressions are cast to before decoding.
    #[must_use]
    pub const fn widened(self) -> Self {
        match self {
            Self::Integer => Self::BigInteger,
            other => other,
        }
    }

    /// Coerce a value for storage in a column of this kind.
    ///
    /// Integers are accepted by decimal columns; `NULL` is accepted by all
    /// kinds (nullability is checked separately).
    #[must_use]
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (Self::Integer | Self::BigInteger, v @ Value::Int(_))
            | (Self::Decimal, v @ Value::Decimal(_))
            | (Self::Text, v @ Value::Text(_))
            | (Self::Boolean, v @ Value::Bool(_))
            | (Self::Timestamp, v @ Value::Timestamp(_))
            | (Self::Date, v @ Value::Date(_)) => Some(v),
            (Self::Decimal, Value::Int(i)) => Some(Value::Decimal(i.into())),
            _ => None,
        }
    }
}

/// A column.
#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
    pub unique: bool,
}

impl FieldMeta {
    /// A required, non-unique column.
    #[must_use]
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
            unique: false,
        }
    }

    /// Allow `NULL`.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Enforce uniqueness.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// What happens to referencing rows when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    /// Refuse the delete.
    Protect,
    /// Delete the referencing rows too.
    Cascade,
    /// Null out the referencing column.
    SetNull,
}

impl OnDelete {
    /// `ON DELETE` clause used in migrations.
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Protect => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
        }
    }
}

/// Shape of a relation.
#[derive(Debug, Clone, Copy)]
pub enum RelationKind {
    /// Many-to-one: `column` on this model holds the target id.
    ForeignKey {
        column: &'static str,
        on_delete: OnDelete,
    },
    /// One-to-many: `column` on the target holds this model's id.
    Reverse { column: &'static str },
    /// Many-to-many through a join model.
    ManyToMany {
        through: fn() -> &'static ModelMeta,
        source: &'static str,
        target: &'static str,
    },
}

/// A named relation to another model.
#[derive(Debug, Clone, Copy)]
pub struct RelationMeta {
    pub name: &'static str,
    pub target: fn() -> &'static ModelMeta,
    pub kind: RelationKind,
}

impl RelationMeta {
    /// Returns `true` for to-many relations.
    #[must_use]
    pub const fn is_many(&self) -> bool {
        !matches!(self.kind, RelationKind::ForeignKey { .. })
    }
}

/// Table-level metadata for one model.
#[derive(Debug)]
pub struct ModelMeta {
    /// Lower-case model name, also used as the tagging content type.
    pub name: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldMeta],
    pub relations: &'static [RelationMeta],
}

impl ModelMeta {
    /// Look up a column.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if the model has no such column.
    pub fn field(&self, name: &str) -> Result<&'static FieldMeta> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .ok_or_else(|| RepositoryError::UnknownField {
                model: self.name,
                field: name.to_owned(),
            })
    }

    /// Look up a relation.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRelation` if the model has no such relation.
    pub fn relation(&self, name: &str) -> Result<&'static RelationMeta> {
        self.relations
            .iter()
            .find(|relation| relation.name == name)
            .ok_or_else(|| RepositoryError::UnknownRelation {
                model: self.name,
                relation: name.to_owned(),
            })
    }

    /// Follow a chain of forward relations.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRelation` for a missing hop and `InvalidQuery` when a
    /// hop is a to-many relation.
    pub fn follow(&'static self, path: &[&str]) -> Result<&'static Self> {
        let mut meta = self;
        for hop in path {
            let relation = meta.relation(hop)?;
            if relation.is_many() {
                return Err(RepositoryError::InvalidQuery(format!(
                    "`{hop}` on {} is a to-many relation and cannot be used in a scalar position",
                    meta.name
                )));
            }
            meta = (relation.target)();
        }
        Ok(meta)
    }
}

/// The set of models a storage backend knows about.
pub type Schema = &'static [fn() -> &'static ModelMeta];

/// Find a model of the schema by table name.
#[must_use]
pub fn find_model(schema: Schema, table: &str) -> Option<&'static ModelMeta> {
    schema.iter().map(|meta| meta()).find(|meta| meta.table == table)
}

/// A persisted entity type.
pub trait Model: Sized + Send + Sync + 'static {
    /// Schema metadata.
    fn meta() -> &'static ModelMeta;

    /// Build the entity from a fetched row.
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` when a column is missing or mistyped.
    fn from_record(record: &Record) -> Result<Self>;

    /// A query over every row of the model.
    #[must_use]
    fn objects() -> QuerySet<Self> {
        QuerySet::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{Collection, Product};

    #[test]
    fn test_field_lookup() {
        let meta = Product::meta();
        assert_eq!(meta.field("unit_price").unwrap().kind, FieldKind::Decimal);
        assert!(matches!(
            meta.field("price"),
            Err(RepositoryError::UnknownField { model: "product", .. })
        ));
    }

    #[test]
    fn test_follow_forward_relation() {
        let target = Product::meta().follow(&["collection"]).unwrap();
        assert_eq!(target.table, Collection::meta().table);
    }

    #[test]
    fn test_follow_rejects_to_many() {
        let err = Collection::meta().follow(&["products"]).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidQuery(_)));
    }

    #[test]
    fn test_coerce() {
        assert_eq!(
            FieldKind::Decimal.coerce(Value::Int(3)),
            Some(Value::Decimal(3.into()))
        );
        assert_eq!(FieldKind::Integer.coerce(Value::Text("3".into())), None);
        assert_eq!(FieldKind::Text.coerce(Value::Null), Some(Value::Null));
    }
}
