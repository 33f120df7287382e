//! `PostgreSQL` backend.
//!
//! Every function takes a concrete connection so the same code serves the
//! pool (one acquired connection per call) and an open transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query as SqlxQuery;
use sqlx::{Column as _, PgConnection, Postgres, Row};

use super::expr::{AggregateExpr, Node};
use super::query::Query;
use super::schema::{FieldKind, ModelMeta};
use super::sql::{self, Column, Statement, Target};
use super::value::{Record, Value};
use super::{RepositoryError, Result};

pub async fn fetch(conn: &mut PgConnection, query: &Query) -> Result<Vec<Record>> {
    let statement = sql::select(query)?;
    tracing::debug!(sql = %statement.sql, "fetch");
    let rows = bind(sqlx::query(&statement.sql), &statement.params)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(|row| decode(row, &statement.columns)).collect()
}

pub async fn aggregate(
    conn: &mut PgConnection,
    query: &Query,
    aggregates: &[(String, AggregateExpr)],
) -> Result<Record> {
    let statement = sql::aggregate(query, aggregates)?;
    tracing::debug!(sql = %statement.sql, "aggregate");
    let row = bind(sqlx::query(&statement.sql), &statement.params)
        .fetch_one(&mut *conn)
        .await?;
    decode(&row, &statement.columns)
}

pub async fn insert(
    conn: &mut PgConnection,
    meta: &'static ModelMeta,
    values: Vec<(&'static str, Value)>,
) -> Result<Record> {
    let statement = sql::insert(meta, values)?;
    tracing::debug!(sql = %statement.sql, "insert");
    let row = bind(sqlx::query(&statement.sql), &statement.params)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| write_error(e, false))?;
    decode(&row, &statement.columns)
}

pub async fn update(
    conn: &mut PgConnection,
    query: &Query,
    assignments: &[(&'static str, Node)],
) -> Result<u64> {
    let statement = sql::update(query, assignments)?;
    execute(conn, &statement, false).await
}

pub async fn delete(conn: &mut PgConnection, query: &Query) -> Result<u64> {
    let statement = sql::delete(query)?;
    execute(conn, &statement, true).await
}

/// Rows of `meta` from hand-written SQL. Columns that are not fields of
/// `meta` are ignored; fields the statement does not select stay unloaded.
pub async fn fetch_raw(
    conn: &mut PgConnection,
    meta: &'static ModelMeta,
    sql: &str,
    params: Vec<Value>,
) -> Result<Vec<Record>> {
    tracing::debug!(sql, "raw query");
    let rows = bind(sqlx::query(sql), &params).fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| {
            let mut record = Record::new();
            for column in row.columns() {
                if let Ok(field) = meta.field(column.name()) {
                    let value = decode_value(row, column.ordinal(), field.kind)?;
                    record.values.insert(field.name.to_owned(), value);
                }
            }
            Ok(record)
        })
        .collect()
}

async fn execute(conn: &mut PgConnection, statement: &Statement, deleting: bool) -> Result<u64> {
    tracing::debug!(sql = %statement.sql, "execute");
    let done = bind(sqlx::query(&statement.sql), &statement.params)
        .execute(&mut *conn)
        .await
        .map_err(|e| write_error(e, deleting))?;
    Ok(done.rows_affected())
}

fn bind<'q>(
    mut query: SqlxQuery<'q, Postgres, PgArguments>,
    params: &[Value],
) -> SqlxQuery<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(value) => query.bind(*value),
            Value::Int(value) => query.bind(*value),
            Value::Decimal(value) => query.bind(*value),
            Value::Text(value) => query.bind(value.clone()),
            Value::Timestamp(value) => query.bind(*value),
            Value::Date(value) => query.bind(*value),
        };
    }
    query
}

/// Map constraint violations to the repository taxonomy.
fn write_error(err: sqlx::Error, deleting: bool) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        let message = db_err.message().to_owned();
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict(message);
        }
        if db_err.is_foreign_key_violation() {
            return if deleting {
                RepositoryError::Protected(message)
            } else {
                RepositoryError::Integrity(message)
            };
        }
        if db_err.is_check_violation() || db_err.code().as_deref() == Some("23502") {
            return RepositoryError::Integrity(message);
        }
    }
    RepositoryError::Database(err)
}

fn decode(row: &PgRow, columns: &[Column]) -> Result<Record> {
    let mut record = Record::new();
    for (index, column) in columns.iter().enumerate() {
        let value = decode_value(row, index, column.kind)?;
        match &column.target {
            Target::Field(name) => {
                record.values.insert((*name).to_owned(), value);
            }
            Target::Related(path, name) => {
                let mut node = &mut record;
                for hop in path {
                    node = node.related.entry((*hop).to_owned()).or_default();
                }
                node.values.insert((*name).to_owned(), value);
            }
            Target::Annotation(name) => {
                record.annotations.insert(name.clone(), value);
            }
            Target::Value(key) => {
                record.values.insert(key.clone(), value);
            }
        }
    }
    prune_missing(&mut record);
    Ok(record)
}

/// Drop joined records whose `LEFT JOIN` found no row.
fn prune_missing(record: &mut Record) {
    record
        .related
        .retain(|_, related| related.value("id").is_some_and(|id| !id.is_null()));
    for related in record.related.values_mut() {
        prune_missing(related);
    }
}

fn decode_value(row: &PgRow, index: usize, kind: FieldKind) -> Result<Value> {
    Ok(match kind {
        FieldKind::Integer => row.try_get::<Option<i32>, _>(index)?.into(),
        FieldKind::BigInteger => row.try_get::<Option<i64>, _>(index)?.into(),
        FieldKind::Decimal => row.try_get::<Option<Decimal>, _>(index)?.into(),
        FieldKind::Text => row.try_get::<Option<String>, _>(index)?.into(),
        FieldKind::Boolean => row.try_get::<Option<bool>, _>(index)?.into(),
        FieldKind::Timestamp => row.try_get::<Option<DateTime<Utc>>, _>(index)?.into(),
        FieldKind::Date => row.try_get::<Option<NaiveDate>, _>(index)?.into(),
    })
}
