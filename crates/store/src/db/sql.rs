//! Compile query descriptions to parameterised `PostgreSQL`.
//!
//! Values are always bound as `$n` parameters; only `NULL` and
//! `LIMIT`/`OFFSET` counts are written inline. Forward relations become
//! `LEFT JOIN`s, to-many aggregates and `EXISTS` become correlated
//! sub-queries so several annotations never multiply rows.
//!
//! Compilation is pure: the result is a [`Statement`] plus a decoding plan
//! (`columns`) for the `PostgreSQL` backend.

use std::collections::HashMap;

use super::expr::{AggFunc, AggregateExpr, FieldRef, Node};
use super::filter::Condition;
use super::query::Query;
use super::schema::{FieldKind, ModelMeta, RelationKind};
use super::value::Value;
use super::{RepositoryError, Result};

/// Where a selected column lands in the decoded [`Record`](super::Record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Field(&'static str),
    Related(Vec<&'static str>, &'static str),
    Annotation(String),
    Value(String),
}

/// One selected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub target: Target,
    pub kind: FieldKind,
}

/// Compiled statement.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    pub columns: Vec<Column>,
}

/// `SELECT` for [`Executor::fetch`](super::Executor::fetch).
///
/// # Errors
///
/// Returns `UnknownField`, `UnknownRelation` or `InvalidQuery`.
pub fn select(query: &Query) -> Result<Statement> {
    let mut compiler = Compiler::default();
    let (sql, columns) = compiler.select(query, &Projection::Rows)?;
    Ok(compiler.finish(sql, columns))
}

/// Aggregate `SELECT` for [`Executor::aggregate`](super::Executor::aggregate).
///
/// # Errors
///
/// Returns `InvalidQuery` for aggregates other than a row count over a
/// projected or distinct query.
pub fn aggregate(query: &Query, aggregates: &[(String, AggregateExpr)]) -> Result<Statement> {
    let mut compiler = Compiler::default();

    if query.values.is_some() || query.distinct {
        let only_counts = aggregates.iter().all(|(_, aggregate)| {
            aggregate.func == AggFunc::Count && aggregate.arg.is_none() && aggregate.filter.is_none()
        });
        if !only_counts {
            return Err(RepositoryError::InvalidQuery(
                "only row counts are supported on projected or distinct queries".to_owned(),
            ));
        }
        let (inner, _) = compiler.select(query, &Projection::Rows)?;
        let mut items = Vec::new();
        let mut columns = Vec::new();
        for (name, _) in aggregates {
            items.push(format!("CAST(COUNT(*) AS BIGINT) AS \"{name}\""));
            columns.push(Column {
                target: Target::Value(name.clone()),
                kind: FieldKind::BigInteger,
            });
        }
        let sql = format!("SELECT {} FROM ({inner}) AS sub", items.join(", "));
        return Ok(compiler.finish(sql, columns));
    }

    let alias = compiler.alias();
    let mut scope = Scope::new(query.meta, alias, &query.annotations);
    let where_sql = if query.is_sliced() {
        let (ids, _) = compiler.select(query, &Projection::Column(FieldRef::local("id")))?;
        Some(format!("{}.\"id\" IN ({ids})", scope.alias))
    } else {
        compiler.conditions(&mut scope, &query.filter)?
    };

    let mut items = Vec::new();
    let mut columns = Vec::new();
    for (name, aggregate) in aggregates {
        let (arg, arg_kind) = match &aggregate.arg {
            Some(arg) => {
                let compiled = compiler.node(&mut scope, arg)?;
                (compiled.sql, Some(compiled.kind))
            }
            None => ("*".to_owned(), None),
        };
        let filter = match &aggregate.filter {
            Some(filter) => format!(" FILTER (WHERE {})", compiler.condition(&mut scope, filter)?),
            None => String::new(),
        };
        let kind = aggregate_kind(aggregate.func, arg_kind);
        items.push(format!(
            "CAST({}({arg}){filter} AS {}) AS \"{name}\"",
            aggregate.func.sql(),
            kind.sql_type()
        ));
        columns.push(Column {
            target: Target::Value(name.clone()),
            kind,
        });
    }

    let mut sql = format!(
        "SELECT {} FROM \"{}\" {}",
        items.join(", "),
        query.meta.table,
        scope.alias
    );
    for join in &scope.joins {
        sql.push(' ');
        sql.push_str(join);
    }
    if let Some(where_sql) = where_sql {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    Ok(compiler.finish(sql, columns))
}

/// `INSERT ... RETURNING` every column.
///
/// # Errors
///
/// Returns `UnknownField` for unknown columns and `InvalidQuery` for values
/// of the wrong type.
pub fn insert(meta: &'static ModelMeta, values: Vec<(&'static str, Value)>) -> Result<Statement> {
    let mut compiler = Compiler::default();
    let mut names = Vec::new();
    let mut placeholders = Vec::new();
    for (name, value) in values {
        let field = meta.field(name)?;
        let value = field.kind.coerce(value).ok_or_else(|| {
            RepositoryError::InvalidQuery(format!("wrong type for {}.{name}", meta.name))
        })?;
        names.push(format!("\"{name}\""));
        placeholders.push(compiler.param(value));
    }

    let returning: Vec<String> = meta
        .fields
        .iter()
        .map(|field| format!("\"{}\"", field.name))
        .collect();
    let columns = meta
        .fields
        .iter()
        .map(|field| Column {
            target: Target::Field(field.name),
            kind: field.kind,
        })
        .collect();

    let sql = if names.is_empty() {
        format!(
            "INSERT INTO \"{}\" DEFAULT VALUES RETURNING {}",
            meta.table,
            returning.join(", ")
        )
    } else {
        format!(
            "INSERT INTO \"{}\" ({}) VALUES ({}) RETURNING {}",
            meta.table,
            names.join(", "),
            placeholders.join(", "),
            returning.join(", ")
        )
    };
    Ok(compiler.finish(sql, columns))
}

/// `UPDATE` of every row matching `query`.
///
/// # Errors
///
/// Returns `InvalidQuery` when an assignment reaches through a relation.
pub fn update(query: &Query, assignments: &[(&'static str, Node)]) -> Result<Statement> {
    let mut compiler = Compiler::default();
    let alias = compiler.alias();
    let mut scope = Scope::new(query.meta, alias, &[]);

    let mut sets = Vec::new();
    for (name, node) in assignments {
        let field = query.meta.field(name)?;
        let value = match node {
            Node::Value(value) => {
                let value = field.kind.coerce(value.clone()).ok_or_else(|| {
                    RepositoryError::InvalidQuery(format!(
                        "wrong type for {}.{name}",
                        query.meta.name
                    ))
                })?;
                compiler.param(value)
            }
            other => compiler.node(&mut scope, other)?.sql,
        };
        sets.push(format!("\"{name}\" = {value}"));
    }
    if !scope.joins.is_empty() {
        return Err(RepositoryError::InvalidQuery(
            "update expressions cannot reach through relations".to_owned(),
        ));
    }

    let (ids, _) = compiler.select(query, &Projection::Column(FieldRef::local("id")))?;
    let sql = format!(
        "UPDATE \"{}\" AS {} SET {} WHERE {}.\"id\" IN ({ids})",
        query.meta.table,
        scope.alias,
        sets.join(", "),
        scope.alias
    );
    Ok(compiler.finish(sql, Vec::new()))
}

/// `DELETE` of every row matching `query`.
///
/// # Errors
///
/// Returns `UnknownField`, `UnknownRelation` or `InvalidQuery`.
pub fn delete(query: &Query) -> Result<Statement> {
    let mut compiler = Compiler::default();
    let (ids, _) = compiler.select(query, &Projection::Column(FieldRef::local("id")))?;
    let sql = format!(
        "DELETE FROM \"{}\" WHERE \"id\" IN ({ids})",
        query.meta.table
    );
    Ok(compiler.finish(sql, Vec::new()))
}

fn aggregate_kind(func: AggFunc, arg: Option<FieldKind>) -> FieldKind {
    match (func, arg) {
        (AggFunc::Count, _) => FieldKind::BigInteger,
        (AggFunc::Avg, _) | (AggFunc::Sum, Some(FieldKind::Decimal)) => FieldKind::Decimal,
        (AggFunc::Sum, _) => FieldKind::BigInteger,
        (AggFunc::Min | AggFunc::Max, kind) => kind.unwrap_or(FieldKind::BigInteger).widened(),
    }
}

fn value_kind(value: &Value) -> FieldKind {
    match value {
        Value::Null | Value::Text(_) => FieldKind::Text,
        Value::Bool(_) => FieldKind::Boolean,
        Value::Int(_) => FieldKind::BigInteger,
        Value::Decimal(_) => FieldKind::Decimal,
        Value::Timestamp(_) => FieldKind::Timestamp,
        Value::Date(_) => FieldKind::Date,
    }
}

fn arithmetic_kind(left: FieldKind, right: FieldKind) -> FieldKind {
    match (left, right) {
        (FieldKind::Decimal, _) | (_, FieldKind::Decimal) => FieldKind::Decimal,
        (FieldKind::Integer | FieldKind::BigInteger, FieldKind::Integer | FieldKind::BigInteger) => {
            FieldKind::BigInteger
        }
        (other, _) => other,
    }
}

enum Projection {
    /// Model columns, related columns, annotations (or the `values` keys).
    Rows,
    /// A single column, for `IN (SELECT ...)`.
    Column(FieldRef),
}

struct Compiled {
    sql: String,
    kind: FieldKind,
}

/// Aliases and joins of one `SELECT` level.
struct Scope<'q> {
    meta: &'static ModelMeta,
    alias: String,
    joins: Vec<String>,
    joined: HashMap<Vec<&'static str>, (String, &'static ModelMeta)>,
    annotations: &'q [(String, Node)],
}

impl<'q> Scope<'q> {
    fn new(meta: &'static ModelMeta, alias: String, annotations: &'q [(String, Node)]) -> Self {
        Self {
            meta,
            alias,
            joins: Vec::new(),
            joined: HashMap::new(),
            annotations,
        }
    }
}

#[derive(Default)]
struct Compiler {
    params: Vec<Value>,
    next_alias: usize,
}

impl Compiler {
    fn finish(self, sql: String, columns: Vec<Column>) -> Statement {
        Statement {
            sql,
            params: self.params,
            columns,
        }
    }

    fn alias(&mut self) -> String {
        let alias = format!("t{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn param(&mut self, value: Value) -> String {
        if value.is_null() {
            return "NULL".to_owned();
        }
        self.params.push(value);
        format!("${}", self.params.len())
    }

    /// Alias and model at the end of a forward path, joining as needed.
    fn resolve(
        &mut self,
        scope: &mut Scope<'_>,
        path: &[&'static str],
    ) -> Result<(String, &'static ModelMeta)> {
        let mut alias = scope.alias.clone();
        let mut meta = scope.meta;
        for (depth, hop) in path.iter().enumerate() {
            let prefix: Vec<&'static str> = path.iter().take(depth + 1).copied().collect();
            if let Some((joined_alias, joined_meta)) = scope.joined.get(&prefix) {
                alias.clone_from(joined_alias);
                meta = *joined_meta;
                continue;
            }
            let relation = meta.relation(hop)?;
            let RelationKind::ForeignKey { column, .. } = relation.kind else {
                return Err(RepositoryError::InvalidQuery(format!(
                    "`{hop}` on {} is a to-many relation and cannot be used in a scalar position",
                    meta.name
                )));
            };
            let target = (relation.target)();
            let next = self.alias();
            scope.joins.push(format!(
                "LEFT JOIN \"{}\" {next} ON {next}.\"id\" = {alias}.\"{column}\"",
                target.table
            ));
            scope.joined.insert(prefix, (next.clone(), target));
            alias = next;
            meta = target;
        }
        Ok((alias, meta))
    }

    fn field(&mut self, scope: &mut Scope<'_>, field: &FieldRef) -> Result<Compiled> {
        let (alias, meta) = self.resolve(scope, &field.path)?;
        let meta_field = meta.field(field.name)?;
        Ok(Compiled {
            sql: format!("{alias}.\"{}\"", meta_field.name),
            kind: meta_field.kind,
        })
    }

    fn node(&mut self, scope: &mut Scope<'_>, node: &Node) -> Result<Compiled> {
        match node {
            Node::Field(field) => self.field(scope, field),
            Node::Value(value) => Ok(Compiled {
                kind: value_kind(value),
                sql: self.param(value.clone()),
            }),
            Node::Annotation(name) => {
                let annotations = scope.annotations;
                let (_, expr) = annotations
                    .iter()
                    .find(|(candidate, _)| candidate == name)
                    .ok_or_else(|| {
                        RepositoryError::InvalidQuery(format!("unknown annotation `{name}`"))
                    })?;
                self.node(scope, expr)
            }
            Node::Binary { op, left, right } => {
                let left = self.node(scope, left)?;
                let right = self.node(scope, right)?;
                Ok(Compiled {
                    sql: format!("({} {} {})", left.sql, op.sql(), right.sql),
                    kind: arithmetic_kind(left.kind, right.kind),
                })
            }
            Node::Concat(parts) => {
                let parts = parts
                    .iter()
                    .map(|part| self.node(scope, part).map(|compiled| compiled.sql))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Compiled {
                    sql: format!("CONCAT({})", parts.join(", ")),
                    kind: FieldKind::Text,
                })
            }
            Node::Aggregate(aggregate) => self.correlated_aggregate(scope, aggregate),
        }
    }

    /// `FROM`/`WHERE` of a sub-query walking `hops` from the outer scope.
    fn correlate(
        &mut self,
        outer: &Scope<'_>,
        hops: &[&'static str],
    ) -> Result<(String, String, String, &'static ModelMeta)> {
        let mut from = String::new();
        let mut correlation = String::new();
        let mut alias = outer.alias.clone();
        let mut meta = outer.meta;

        for hop in hops {
            let relation = meta.relation(hop)?;
            let target = (relation.target)();
            match relation.kind {
                RelationKind::Reverse { column } => {
                    let next = self.alias();
                    let table = format!("\"{}\" {next}", target.table);
                    let condition = format!("{next}.\"{column}\" = {alias}.\"id\"");
                    if from.is_empty() {
                        from = table;
                        correlation = condition;
                    } else {
                        from.push_str(&format!(" INNER JOIN {table} ON {condition}"));
                    }
                    alias = next;
                }
                RelationKind::ManyToMany {
                    through,
                    source,
                    target: target_column,
                } => {
                    let link = self.alias();
                    let next = self.alias();
                    let link_table = format!("\"{}\" {link}", through().table);
                    let link_condition = format!("{link}.\"{source}\" = {alias}.\"id\"");
                    let target_join = format!(
                        "INNER JOIN \"{}\" {next} ON {next}.\"id\" = {link}.\"{target_column}\"",
                        target.table
                    );
                    if from.is_empty() {
                        from = format!("{link_table} {target_join}");
                        correlation = link_condition;
                    } else {
                        from.push_str(&format!(
                            " INNER JOIN {link_table} ON {link_condition} {target_join}"
                        ));
                    }
                    alias = next;
                }
                RelationKind::ForeignKey { .. } => {
                    return Err(RepositoryError::InvalidQuery(format!(
                        "`{hop}` on {} is not a to-many relation",
                        meta.name
                    )));
                }
            }
            meta = target;
        }

        if from.is_empty() {
            return Err(RepositoryError::InvalidQuery(
                "an aggregate inside an expression needs a to-many relation".to_owned(),
            ));
        }
        Ok((from, correlation, alias, meta))
    }

    fn correlated_aggregate(
        &mut self,
        outer: &mut Scope<'_>,
        aggregate: &AggregateExpr,
    ) -> Result<Compiled> {
        let (from, correlation, alias, meta) = self.correlate(outer, &aggregate.hops)?;
        let mut inner = Scope::new(meta, alias, &[]);

        let (arg, arg_kind) = match &aggregate.arg {
            Some(arg) => {
                let compiled = self.node(&mut inner, arg)?;
                (compiled.sql, Some(compiled.kind))
            }
            None => ("*".to_owned(), None),
        };
        let mut where_sql = correlation;
        if let Some(filter) = &aggregate.filter {
            let filter = self.condition(&mut inner, filter)?;
            where_sql = format!("{where_sql} AND ({filter})");
        }
        let joins = joined(&inner.joins);
        Ok(Compiled {
            sql: format!(
                "(SELECT {}({arg}) FROM {from}{joins} WHERE {where_sql})",
                aggregate.func.sql()
            ),
            kind: aggregate_kind(aggregate.func, arg_kind),
        })
    }

    fn conditions(
        &mut self,
        scope: &mut Scope<'_>,
        conditions: &[Condition],
    ) -> Result<Option<String>> {
        if conditions.is_empty() {
            return Ok(None);
        }
        let parts = conditions
            .iter()
            .map(|condition| self.condition(scope, condition))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(parts.join(" AND ")))
    }

    fn condition(&mut self, scope: &mut Scope<'_>, condition: &Condition) -> Result<String> {
        Ok(match condition {
            Condition::Compare { left, op, right } => {
                let left = self.node(scope, left)?;
                let right = self.node(scope, right)?;
                format!("{} {} {}", left.sql, op.sql(), right.sql)
            }
            Condition::In { left, values } => {
                if values.is_empty() {
                    return Ok("FALSE".to_owned());
                }
                let left = self.node(scope, left)?;
                let values: Vec<String> = values
                    .iter()
                    .map(|value| self.param(value.clone()))
                    .collect();
                format!("{} IN ({})", left.sql, values.join(", "))
            }
            Condition::InQuery {
                left,
                query,
                column,
            } => {
                let left = self.node(scope, left)?;
                let (inner, _) = self.select(query, &Projection::Column(column.clone()))?;
                format!("{} IN ({inner})", left.sql)
            }
            Condition::Range { left, low, high } => {
                let left = self.node(scope, left)?;
                let low = self.param(low.clone());
                let high = self.param(high.clone());
                format!("{} BETWEEN {low} AND {high}", left.sql)
            }
            Condition::Text {
                left,
                mode,
                needle,
                case_insensitive,
            } => {
                let left = self.node(scope, left)?;
                let pattern = self.param(Value::Text(mode.like_pattern(needle)));
                let operator = if *case_insensitive { "ILIKE" } else { "LIKE" };
                format!("{} {operator} {pattern}", left.sql)
            }
            Condition::IsNull { left, negated } => {
                let left = self.node(scope, left)?;
                if *negated {
                    format!("{} IS NOT NULL", left.sql)
                } else {
                    format!("{} IS NULL", left.sql)
                }
            }
            Condition::Year { left, year } => {
                let left = self.node(scope, left)?;
                let year = self.param(Value::from(*year));
                format!("EXTRACT(YEAR FROM {} AT TIME ZONE 'UTC') = {year}", left.sql)
            }
            Condition::Exists { hops, filter } => {
                let (from, correlation, alias, meta) = self.correlate(scope, hops)?;
                let mut inner = Scope::new(meta, alias, &[]);
                let mut where_sql = correlation;
                if let Some(filter) = filter {
                    let filter = self.condition(&mut inner, filter)?;
                    where_sql = format!("{where_sql} AND ({filter})");
                }
                let joins = joined(&inner.joins);
                format!("EXISTS (SELECT 1 FROM {from}{joins} WHERE {where_sql})")
            }
            Condition::And(parts) => {
                if parts.is_empty() {
                    return Ok("TRUE".to_owned());
                }
                let parts = parts
                    .iter()
                    .map(|part| self.condition(scope, part))
                    .collect::<Result<Vec<_>>>()?;
                format!("({})", parts.join(" AND "))
            }
            Condition::Or(parts) => {
                if parts.is_empty() {
                    return Ok("FALSE".to_owned());
                }
                let parts = parts
                    .iter()
                    .map(|part| self.condition(scope, part))
                    .collect::<Result<Vec<_>>>()?;
                format!("({})", parts.join(" OR "))
            }
            Condition::Not(inner) => format!("NOT ({})", self.condition(scope, inner)?),
        })
    }

    fn select(&mut self, query: &Query, projection: &Projection) -> Result<(String, Vec<Column>)> {
        let alias = self.alias();
        let mut scope = Scope::new(query.meta, alias, &query.annotations);
        let mut items = Vec::new();
        let mut columns = Vec::new();

        match projection {
            Projection::Column(field) => {
                let compiled = self.field(&mut scope, field)?;
                items.push(compiled.sql);
                columns.push(Column {
                    target: Target::Value(field.key()),
                    kind: compiled.kind,
                });
            }
            Projection::Rows => {
                if let Some(values) = &query.values {
                    for field in values {
                        let compiled = self.field(&mut scope, field)?;
                        items.push(compiled.sql);
                        columns.push(Column {
                            target: Target::Value(field.key()),
                            kind: compiled.kind,
                        });
                    }
                } else {
                    for field in query.selected_fields() {
                        items.push(format!("{}.\"{}\"", scope.alias, field.name));
                        columns.push(Column {
                            target: Target::Field(field.name),
                            kind: field.kind,
                        });
                    }
                    for path in related_paths(&query.select_related) {
                        let (alias, meta) = self.resolve(&mut scope, &path)?;
                        for field in meta.fields {
                            items.push(format!("{alias}.\"{}\"", field.name));
                            columns.push(Column {
                                target: Target::Related(path.clone(), field.name),
                                kind: field.kind,
                            });
                        }
                    }
                }
                for (name, node) in &query.annotations {
                    let compiled = self.node(&mut scope, node)?;
                    let kind = compiled.kind.widened();
                    items.push(format!("CAST({} AS {})", compiled.sql, kind.sql_type()));
                    columns.push(Column {
                        target: Target::Annotation(name.clone()),
                        kind,
                    });
                }
            }
        }

        let where_sql = self.conditions(&mut scope, &query.filter)?;
        let mut order = Vec::new();
        for key in &query.ordering {
            let compiled = self.node(&mut scope, &key.node)?;
            let direction = if key.descending { "DESC" } else { "ASC" };
            order.push(format!("{} {direction}", compiled.sql));
        }

        let distinct = if query.distinct { "DISTINCT " } else { "" };
        let mut sql = format!(
            "SELECT {distinct}{} FROM \"{}\" {}",
            items.join(", "),
            query.meta.table,
            scope.alias
        );
        for join in &scope.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if let Some(where_sql) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if query.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", query.offset));
        }
        Ok((sql, columns))
    }
}

fn joined(joins: &[String]) -> String {
    joins.iter().map(|join| format!(" {join}")).collect()
}

/// Every prefix of every `select_related` path, parents first.
fn related_paths(paths: &[Vec<&'static str>]) -> Vec<Vec<&'static str>> {
    let mut all: Vec<Vec<&'static str>> = Vec::new();
    for path in paths {
        for depth in 1..=path.len() {
            let prefix: Vec<&'static str> = path.iter().take(depth).copied().collect();
            if !all.contains(&prefix) {
                all.push(prefix);
            }
        }
    }
    all
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::db::{Agg, Expr, Model};
    use crate::models::{Collection, Customer, Order, OrderItem, Product};
    use storefront_core::PaymentStatus;

    #[test]
    fn test_select_with_filter_binds_params() {
        let qs = Product::objects()
            .filter(Product::UNIT_PRICE.between(Decimal::from(20), Decimal::from(30)))
            .order_by([Product::TITLE.asc()])
            .limit(5);
        let stmt = select(qs.query()).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT t0.\"id\", t0.\"title\", t0.\"slug\", t0.\"description\", \
             t0.\"unit_price\", t0.\"inventory\", t0.\"last_update\", t0.\"collection_id\" \
             FROM \"store_product\" t0 WHERE t0.\"unit_price\" BETWEEN $1 AND $2 \
             ORDER BY t0.\"title\" ASC LIMIT 5"
        );
        assert_eq!(
            stmt.params,
            vec![Value::Decimal(Decimal::from(20)), Value::Decimal(Decimal::from(30))]
        );
    }

    #[test]
    fn test_select_related_joins_once() {
        let qs = Product::objects()
            .select_related(Product::COLLECTION)
            .filter(Product::COLLECTION.then(Collection::TITLE).eq("Beauty".to_owned()));
        let stmt = select(qs.query()).unwrap();
        assert_eq!(stmt.sql.matches("LEFT JOIN").count(), 1);
        assert!(stmt.sql.contains("LEFT JOIN \"store_collection\" t1 ON t1.\"id\" = t0.\"collection_id\""));
        assert!(stmt.sql.contains("WHERE t1.\"title\" = $1"));
        assert!(
            stmt.columns
                .iter()
                .any(|c| c.target == Target::Related(vec!["collection"], "title"))
        );
    }

    #[test]
    fn test_null_comparison_is_inlined() {
        let qs = Collection::objects().filter(Collection::FEATURED_PRODUCT_ID.is_null(true));
        let stmt = select(qs.query()).unwrap();
        assert!(stmt.sql.ends_with("WHERE t0.\"featured_product_id\" IS NULL"));
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_annotation_compiles_to_correlated_subquery() {
        let qs = Customer::objects()
            .annotate("orders_count", Customer::ORDERS.count())
            .filter(Expr::annotation("orders_count").gt(Expr::lit(5)));
        let stmt = select(qs.query()).unwrap();
        assert!(stmt.sql.contains(
            "CAST((SELECT COUNT(*) FROM \"store_order\" t1 WHERE t1.\"customer_id\" = t0.\"id\") AS BIGINT)"
        ));
        assert!(stmt.sql.contains("WHERE (SELECT COUNT(*) FROM \"store_order\" t2"));
        assert_eq!(stmt.params, vec![Value::Int(5)]);
        assert_eq!(
            stmt.columns.last().unwrap().target,
            Target::Annotation("orders_count".to_owned())
        );
    }

    #[test]
    fn test_multi_hop_filtered_sum() {
        let spend = Customer::ORDERS.via(Order::ITEMS).sum_of(
            OrderItem::QUANTITY.expr() * OrderItem::UNIT_PRICE.expr(),
            Some(OrderItem::ORDER.then(Order::PAYMENT_STATUS).eq(PaymentStatus::Complete)),
        );
        let qs = Customer::objects().annotate("spent", spend);
        let stmt = select(qs.query()).unwrap();
        assert!(stmt.sql.contains("INNER JOIN \"store_orderitem\""));
        assert!(stmt.sql.contains("AS NUMERIC)"));
        assert_eq!(stmt.params, vec![Value::Text("C".to_owned())]);
    }

    #[test]
    fn test_to_many_in_scalar_position_is_rejected() {
        let mut query = Collection::objects().query().clone();
        query.filter.push(Condition::IsNull {
            left: Node::Field(FieldRef {
                path: vec!["products"],
                name: "title",
            }),
            negated: false,
        });
        assert!(matches!(select(&query), Err(RepositoryError::InvalidQuery(_))));
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let qs = Product::objects().filter(Product::ID.is_in(Vec::new()));
        let stmt = select(qs.query()).unwrap();
        assert!(stmt.sql.ends_with("WHERE FALSE"));
    }

    #[test]
    fn test_in_subquery() {
        let ordered = OrderItem::objects().distinct().project(OrderItem::PRODUCT_ID);
        let qs = Product::objects().filter(Product::ID.in_subquery(ordered));
        let stmt = select(qs.query()).unwrap();
        assert!(stmt.sql.contains(
            "WHERE t0.\"id\" IN (SELECT DISTINCT t1.\"product_id\" FROM \"store_orderitem\" t1)"
        ));
    }

    #[test]
    fn test_text_lookup_uses_ilike() {
        let qs = Customer::objects().filter(Customer::FIRST_NAME.istarts_with("mo"));
        let stmt = select(qs.query()).unwrap();
        assert!(stmt.sql.ends_with("WHERE t0.\"first_name\" ILIKE $1"));
        assert_eq!(stmt.params, vec![Value::Text("mo%".to_owned())]);
    }

    #[test]
    fn test_aggregate_statement() {
        let query = Product::objects()
            .filter(Product::COLLECTION_ID.eq(storefront_core::CollectionId::new(3)))
            .query()
            .clone();
        let aggregates = vec![
            ("count".to_owned(), Agg::<Product>::count().inner),
            ("min_price".to_owned(), Agg::min(Product::UNIT_PRICE).inner),
        ];
        let stmt = aggregate(&query, &aggregates).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT CAST(COUNT(*) AS BIGINT) AS \"count\", \
             CAST(MIN(t0.\"unit_price\") AS NUMERIC) AS \"min_price\" \
             FROM \"store_product\" t0 WHERE t0.\"collection_id\" = $1"
        );
    }

    #[test]
    fn test_sliced_aggregate_uses_id_subquery() {
        let query = Product::objects().limit(3).query().clone();
        let aggregates = vec![("count".to_owned(), Agg::<Product>::count().inner)];
        let stmt = aggregate(&query, &aggregates).unwrap();
        assert!(stmt.sql.contains("WHERE t0.\"id\" IN (SELECT t1.\"id\" FROM \"store_product\" t1 LIMIT 3)"));
    }

    #[test]
    fn test_update_and_delete_target_ids() {
        let qs = Product::objects().filter(Product::INVENTORY.lt(10));
        let stmt = update(
            qs.query(),
            &[("inventory", Node::Value(Value::Int(0)))],
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"store_product\" AS t0 SET \"inventory\" = $1 WHERE t0.\"id\" IN \
             (SELECT t1.\"id\" FROM \"store_product\" t1 WHERE t1.\"inventory\" < $2)"
        );

        let stmt = delete(qs.query()).unwrap();
        assert!(stmt.sql.starts_with("DELETE FROM \"store_product\" WHERE \"id\" IN (SELECT"));
    }

    #[test]
    fn test_insert_returns_all_columns() {
        let stmt = insert(
            Collection::meta(),
            vec![("title", Value::from("Beauty")), ("featured_product_id", Value::Null)],
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"store_collection\" (\"title\", \"featured_product_id\") \
             VALUES ($1, NULL) RETURNING \"id\", \"title\", \"featured_product_id\""
        );
        assert_eq!(stmt.params.len(), 1);
    }

    #[test]
    fn test_insert_rejects_wrong_type() {
        let err = insert(Collection::meta(), vec![("title", Value::Int(1))]).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidQuery(_)));
    }
}
