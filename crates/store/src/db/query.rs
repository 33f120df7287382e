//! Lazily evaluated query descriptions.
//!
//! A [`QuerySet`] is a value: every builder method returns a new description
//! and nothing touches storage until a terminal method (`all`, `first`,
//! `get`, `count`, `values`, `aggregate`, `update`, `delete`, ...) is awaited
//! with an executor.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Range;

use super::executor::Executor;
use super::expr::{Agg, AggregateExpr, Assignment, Col, Expr, FieldRef, ForeignKey, Many, Node, OrderBy};
use super::filter::{CompareOp, Condition, Q};
use super::schema::{FieldMeta, Model, ModelMeta, RelationKind};
use super::value::{FromValue, Record, Value};
use super::{RepositoryError, Result};

/// Which columns of the queried model are loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Only(Vec<&'static str>),
    Defer(Vec<&'static str>),
}

/// Backend-independent description of a `SELECT`.
#[derive(Debug, Clone)]
pub struct Query {
    pub meta: &'static ModelMeta,
    /// Conditions, combined with `AND`.
    pub filter: Vec<Condition>,
    /// Named expressions, in definition order.
    pub annotations: Vec<(String, Node)>,
    pub ordering: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub selection: Selection,
    /// Forward relation paths loaded by join.
    pub select_related: Vec<Vec<&'static str>>,
    /// Projection; when set, rows carry these keys instead of model columns.
    pub values: Option<Vec<FieldRef>>,
    pub distinct: bool,
}

impl Query {
    /// A query over every row of `meta`.
    #[must_use]
    pub const fn new(meta: &'static ModelMeta) -> Self {
        Self {
            meta,
            filter: Vec::new(),
            annotations: Vec::new(),
            ordering: Vec::new(),
            limit: None,
            offset: 0,
            selection: Selection::All,
            select_related: Vec::new(),
            values: None,
            distinct: false,
        }
    }

    /// Returns `true` when a limit or offset applies.
    #[must_use]
    pub const fn is_sliced(&self) -> bool {
        self.limit.is_some() || self.offset > 0
    }

    /// Columns of the queried model to load. `id` is always included.
    #[must_use]
    pub fn selected_fields(&self) -> Vec<&'static FieldMeta> {
        self.meta
            .fields
            .iter()
            .filter(|field| {
                field.name == "id"
                    || match &self.selection {
                        Selection::All => true,
                        Selection::Only(names) => names.contains(&field.name),
                        Selection::Defer(names) => !names.contains(&field.name),
                    }
            })
            .collect()
    }

    /// Expression of a named annotation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if no annotation has that name.
    pub fn annotation(&self, name: &str) -> Result<&Node> {
        self.annotations
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, node)| node)
            .ok_or_else(|| RepositoryError::InvalidQuery(format!("unknown annotation `{name}`")))
    }

    /// Resolve every name the description uses against the schema.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField`, `UnknownRelation` or `InvalidQuery`.
    pub fn validate(&self) -> Result<()> {
        if let Selection::Only(names) | Selection::Defer(names) = &self.selection {
            for name in names {
                self.meta.field(name)?;
            }
        }
        for path in &self.select_related {
            self.meta.follow(path)?;
        }
        for (index, (name, node)) in self.annotations.iter().enumerate() {
            if self.meta.field(name).is_ok() {
                return Err(RepositoryError::InvalidQuery(format!(
                    "annotation `{name}` conflicts with a field on {}",
                    self.meta.name
                )));
            }
            let earlier = self.annotations.get(..index).unwrap_or_default();
            check_node(self.meta, node, earlier)?;
        }
        for condition in &self.filter {
            check_condition(self.meta, condition, &self.annotations)?;
        }
        for key in &self.ordering {
            check_node(self.meta, &key.node, &self.annotations)?;
        }
        if let Some(values) = &self.values {
            for field in values {
                self.meta.follow(&field.path)?.field(field.name)?;
            }
        }
        Ok(())
    }

    /// Validate aggregates computed over the rows of this query.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for unknown names or a nested relation hop.
    pub fn validate_aggregates(&self, aggregates: &[(String, AggregateExpr)]) -> Result<()> {
        self.validate()?;
        for (_, aggregate) in aggregates {
            if !aggregate.hops.is_empty() {
                return Err(RepositoryError::InvalidQuery(
                    "query aggregates cannot traverse relations".to_owned(),
                ));
            }
            if let Some(arg) = &aggregate.arg {
                check_node(self.meta, arg, &self.annotations)?;
            }
            if let Some(filter) = &aggregate.filter {
                check_condition(self.meta, filter, &self.annotations)?;
            }
        }
        Ok(())
    }
}

/// Target model of a chain of to-many relations.
pub(crate) fn many_target(
    meta: &'static ModelMeta,
    hops: &[&'static str],
) -> Result<&'static ModelMeta> {
    let mut current = meta;
    for hop in hops {
        let relation = current.relation(hop)?;
        if !relation.is_many() {
            return Err(RepositoryError::InvalidQuery(format!(
                "`{hop}` on {} is not a to-many relation",
                current.name
            )));
        }
        current = (relation.target)();
    }
    Ok(current)
}

fn check_node(meta: &'static ModelMeta, node: &Node, annotations: &[(String, Node)]) -> Result<()> {
    match node {
        Node::Field(field) => meta.follow(&field.path)?.field(field.name).map(|_| ()),
        Node::Value(_) => Ok(()),
        Node::Annotation(name) => {
            if annotations.iter().any(|(candidate, _)| candidate == name) {
                Ok(())
            } else {
                Err(RepositoryError::InvalidQuery(format!(
                    "unknown annotation `{name}`"
                )))
            }
        }
        Node::Binary { left, right, .. } => {
            check_node(meta, left, annotations)?;
            check_node(meta, right, annotations)
        }
        Node::Concat(parts) => parts
            .iter()
            .try_for_each(|part| check_node(meta, part, annotations)),
        Node::Aggregate(aggregate) => {
            if aggregate.hops.is_empty() {
                return Err(RepositoryError::InvalidQuery(
                    "an aggregate inside an expression needs a to-many relation".to_owned(),
                ));
            }
            let target = many_target(meta, &aggregate.hops)?;
            if let Some(arg) = &aggregate.arg {
                check_node(target, arg, &[])?;
            }
            if let Some(filter) = &aggregate.filter {
                check_condition(target, filter, &[])?;
            }
            Ok(())
        }
    }
}

fn check_condition(
    meta: &'static ModelMeta,
    condition: &Condition,
    annotations: &[(String, Node)],
) -> Result<()> {
    match condition {
        Condition::Compare { left, right, .. } => {
            check_node(meta, left, annotations)?;
            check_node(meta, right, annotations)
        }
        Condition::In { left, .. }
        | Condition::Range { left, .. }
        | Condition::Text { left, .. }
        | Condition::IsNull { left, .. }
        | Condition::Year { left, .. } => check_node(meta, left, annotations),
        Condition::InQuery {
            left,
            query,
            column,
        } => {
            check_node(meta, left, annotations)?;
            query.validate()?;
            query.meta.follow(&column.path)?.field(column.name).map(|_| ())
        }
        Condition::Exists { hops, filter } => {
            let target = many_target(meta, hops)?;
            match filter {
                Some(filter) => check_condition(target, filter, &[]),
                None => Ok(()),
            }
        }
        Condition::And(parts) | Condition::Or(parts) => parts
            .iter()
            .try_for_each(|part| check_condition(meta, part, annotations)),
        Condition::Not(inner) => check_condition(meta, inner, annotations),
    }
}

fn id_equals(id: i64) -> Condition {
    Condition::Compare {
        left: Node::Field(FieldRef::local("id")),
        op: CompareOp::Eq,
        right: Node::Value(Value::Int(id)),
    }
}

// =============================================================================
// QuerySet
// =============================================================================

#[derive(Debug, Clone)]
struct Prefetch {
    relation: &'static str,
    query: Query,
}

/// Typed, lazily evaluated query over model `M`.
pub struct QuerySet<M> {
    query: Query,
    prefetch: Vec<Prefetch>,
    error: Option<String>,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for QuerySet<M> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            prefetch: self.prefetch.clone(),
            error: self.error.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for QuerySet<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySet")
            .field("query", &self.query)
            .field("prefetch", &self.prefetch)
            .finish_non_exhaustive()
    }
}

impl<M: Model> Default for QuerySet<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> QuerySet<M> {
    /// Every row of `M`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            query: Query::new(M::meta()),
            prefetch: Vec::new(),
            error: None,
            _marker: PhantomData,
        }
    }

    /// The underlying description.
    #[must_use]
    pub const fn query(&self) -> &Query {
        &self.query
    }

    fn fail_if_sliced(&mut self, operation: &str) {
        if self.query.is_sliced() && self.error.is_none() {
            self.error = Some(format!("cannot {operation} a query once a slice has been taken"));
        }
    }

    /// Keep rows matching `predicate`.
    #[must_use]
    pub fn filter(mut self, predicate: Q<M>) -> Self {
        self.fail_if_sliced("filter");
        self.query.filter.push(predicate.into_condition());
        self
    }

    /// Drop rows matching `predicate`.
    #[must_use]
    pub fn exclude(self, predicate: Q<M>) -> Self {
        self.filter(!predicate)
    }

    /// Add a named computed column.
    #[must_use]
    pub fn annotate(mut self, name: &str, expr: Expr<M>) -> Self {
        self.query
            .annotations
            .push((name.to_owned(), expr.into_node()));
        self
    }

    /// Replace the ordering.
    #[must_use]
    pub fn order_by(mut self, keys: impl IntoIterator<Item = OrderBy>) -> Self {
        self.fail_if_sliced("reorder");
        self.query.ordering = keys.into_iter().collect();
        self
    }

    /// Flip the ordering; an unordered query becomes `id` descending.
    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.fail_if_sliced("reverse");
        self.query.ordering = if self.query.ordering.is_empty() {
            vec![OrderBy {
                node: Node::Field(FieldRef::local("id")),
                descending: true,
            }]
        } else {
            self.query.ordering.iter().map(OrderBy::reversed).collect()
        };
        self
    }

    /// Rows `range.start..range.end` of the current result.
    #[must_use]
    pub fn slice(mut self, range: Range<usize>) -> Self {
        let length = range.end.saturating_sub(range.start);
        let length = self
            .query
            .limit
            .map_or(length, |limit| length.min(limit.saturating_sub(range.start)));
        self.query.offset += range.start;
        self.query.limit = Some(length);
        self
    }

    /// At most `count` rows.
    #[must_use]
    pub fn limit(self, count: usize) -> Self {
        self.slice(0..count)
    }

    /// Load a forward relation in the same statement.
    #[must_use]
    pub fn select_related<T>(mut self, relation: ForeignKey<M, T>) -> Self {
        let path = relation.path();
        if !self.query.select_related.contains(&path) {
            self.query.select_related.push(path);
        }
        self
    }

    /// Load a to-many relation with one extra query per relation.
    #[must_use]
    pub fn prefetch_related<T: Model>(self, relation: Many<M, T>) -> Self {
        self.prefetch_related_with(relation, |related| related)
    }

    /// Like [`prefetch_related`](Self::prefetch_related), shaping the
    /// children's query (ordering, filters, their own `select_related`).
    #[must_use]
    pub fn prefetch_related_with<T: Model>(
        mut self,
        relation: Many<M, T>,
        build: impl FnOnce(QuerySet<T>) -> QuerySet<T>,
    ) -> Self {
        let hops = relation.hops();
        match *hops.as_slice() {
            [name] => {
                let related = build(QuerySet::<T>::new());
                if let Some(error) = related.error {
                    self.error.get_or_insert(error);
                }
                self.prefetch.push(Prefetch {
                    relation: name,
                    query: related.query,
                });
            }
            _ => {
                self.error.get_or_insert_with(|| {
                    "prefetch one relation at a time; nest further loads in the child query"
                        .to_owned()
                });
            }
        }
        self
    }

    /// Load only these columns (plus `id`); the rest load on first access.
    #[must_use]
    pub fn only(mut self, fields: impl IntoIterator<Item = FieldRef>) -> Self {
        let names = self.local_names(fields);
        self.query.selection = Selection::Only(names);
        self
    }

    /// Load every column except these.
    #[must_use]
    pub fn defer(mut self, fields: impl IntoIterator<Item = FieldRef>) -> Self {
        let names = self.local_names(fields);
        self.query.selection = Selection::Defer(names);
        self
    }

    fn local_names(&mut self, fields: impl IntoIterator<Item = FieldRef>) -> Vec<&'static str> {
        let mut names = Vec::new();
        for field in fields {
            if field.path.is_empty() {
                names.push(field.name);
            } else {
                self.error
                    .get_or_insert_with(|| format!("cannot defer related column `{}`", field.key()));
            }
        }
        names
    }

    /// Remove duplicate rows.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.query.distinct = true;
        self
    }

    /// Use one column of this query as a sub-query (`IN (SELECT ...)`).
    #[must_use]
    pub fn project<T>(self, column: Col<M, T>) -> Subquery<T> {
        Subquery {
            query: self.query,
            column: column.field(),
            _marker: PhantomData,
        }
    }

    fn checked(&self) -> Result<&Query> {
        if let Some(error) = &self.error {
            return Err(RepositoryError::InvalidQuery(error.clone()));
        }
        self.query.validate()?;
        Ok(&self.query)
    }

    fn ordered_by_default(mut self) -> Self {
        if self.query.ordering.is_empty() {
            self.query.ordering.push(OrderBy {
                node: Node::Field(FieldRef::local("id")),
                descending: false,
            });
        }
        self
    }

    // -------------------------------------------------------------------------
    // Terminal operations
    // -------------------------------------------------------------------------

    /// Fetch raw records, including joined and prefetched rows.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn records<E: Executor + ?Sized>(&self, db: &E) -> Result<Vec<Record>> {
        let query = self.checked()?;
        let mut records = db.fetch(query).await?;
        self.load_prefetches(db, &mut records).await?;
        Ok(records)
    }

    /// Fetch every matching entity.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn all<E: Executor + ?Sized>(&self, db: &E) -> Result<Vec<M>> {
        self.records(db)
            .await?
            .iter()
            .map(M::from_record)
            .collect()
    }

    /// Fetch entities together with their annotations.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn annotated<E: Executor + ?Sized>(&self, db: &E) -> Result<Vec<Annotated<M>>> {
        self.records(db)
            .await?
            .into_iter()
            .map(|record| {
                Ok(Annotated {
                    object: M::from_record(&record)?,
                    annotations: record.annotations,
                })
            })
            .collect()
    }

    /// Fetch rows with deferred columns left unloaded.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn partial<E: Executor + ?Sized>(&self, db: &E) -> Result<Vec<Deferred<M>>> {
        Ok(self
            .records(db)
            .await?
            .into_iter()
            .map(|record| Deferred {
                record,
                _marker: PhantomData,
            })
            .collect())
    }

    /// First row by the current ordering (`id` when unordered).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn first<E: Executor + ?Sized>(&self, db: &E) -> Result<Option<M>> {
        let rows = self.clone().ordered_by_default().limit(1).all(db).await?;
        Ok(rows.into_iter().next())
    }

    /// Last row by the current ordering (`id` when unordered).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn last<E: Executor + ?Sized>(&self, db: &E) -> Result<Option<M>> {
        let rows = self
            .clone()
            .ordered_by_default()
            .reverse()
            .limit(1)
            .all(db)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// The `index`-th row (zero based), `None` past the end.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn nth<E: Executor + ?Sized>(&self, db: &E, index: usize) -> Result<Option<M>> {
        let rows = self
            .clone()
            .ordered_by_default()
            .slice(index..index + 1)
            .all(db)
            .await?;
        Ok(rows.into_iter().next())
    }

    /// Exactly one row.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing matches and `MultipleObjectsReturned`
    /// when more than one row matches.
    pub async fn get<E: Executor + ?Sized>(&self, db: &E) -> Result<M> {
        let mut rows = self.clone().limit(2).all(db).await?;
        match rows.len() {
            0 => Err(RepositoryError::NotFound),
            1 => rows.pop().ok_or(RepositoryError::NotFound),
            _ => Err(RepositoryError::MultipleObjectsReturned(M::meta().name)),
        }
    }

    /// Row with the smallest value of `column`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing matches.
    pub async fn earliest<T, E: Executor + ?Sized>(&self, db: &E, column: Col<M, T>) -> Result<M> {
        self.clone()
            .order_by([column.asc()])
            .first(db)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    /// Row with the largest value of `column`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing matches.
    pub async fn latest<T, E: Executor + ?Sized>(&self, db: &E, column: Col<M, T>) -> Result<M> {
        self.clone()
            .order_by([column.desc()])
            .first(db)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    /// Compute aggregates over the matching rows.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn aggregate<E: Executor + ?Sized>(
        &self,
        db: &E,
        aggregates: impl IntoIterator<Item = (&str, Agg<M>)>,
    ) -> Result<Record> {
        let aggregates: Vec<(String, AggregateExpr)> = aggregates
            .into_iter()
            .map(|(name, aggregate)| (name.to_owned(), aggregate.inner))
            .collect();
        if let Some(error) = &self.error {
            return Err(RepositoryError::InvalidQuery(error.clone()));
        }
        self.query.validate_aggregates(&aggregates)?;
        db.aggregate(&self.query, &aggregates).await
    }

    /// Number of matching rows.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn count<E: Executor + ?Sized>(&self, db: &E) -> Result<i64> {
        self.aggregate(db, [("count", Agg::count())])
            .await?
            .get("count")
    }

    /// Whether any row matches.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn exists<E: Executor + ?Sized>(&self, db: &E) -> Result<bool> {
        Ok(self.clone().limit(1).count(db).await? > 0)
    }

    /// Project rows onto `fields` (plus annotations).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid or the
    /// backend fails.
    pub async fn values<E: Executor + ?Sized>(
        &self,
        db: &E,
        fields: impl IntoIterator<Item = FieldRef>,
    ) -> Result<Vec<Record>> {
        let mut projected = self.clone();
        projected.query.values = Some(fields.into_iter().collect());
        projected.prefetch.clear();
        projected.records(db).await
    }

    /// Project rows onto a single typed column.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the description is invalid, the backend
    /// fails or a value has the wrong type.
    pub async fn values_list<T: FromValue, E: Executor + ?Sized>(
        &self,
        db: &E,
        column: Col<M, T>,
    ) -> Result<Vec<T>> {
        let field = column.field();
        let key = field.key();
        self.values(db, [field])
            .await?
            .iter()
            .map(|record| record.get(&key))
            .collect()
    }

    /// Bulk update; returns the number of rows changed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for related columns, `Integrity` for dangling
    /// references and `RepositoryError::Database` on backend failure.
    pub async fn update<E: Executor + ?Sized>(
        &self,
        db: &E,
        assignments: impl IntoIterator<Item = Assignment<M>>,
    ) -> Result<u64> {
        let query = self.checked()?;
        let mut lowered = Vec::new();
        for assignment in assignments {
            if !assignment.column.path.is_empty() {
                return Err(RepositoryError::InvalidQuery(format!(
                    "cannot update related column `{}`",
                    assignment.column.key()
                )));
            }
            self.query.meta.field(assignment.column.name)?;
            check_node(self.query.meta, &assignment.value, &[])?;
            lowered.push((assignment.column.name, assignment.value));
        }
        if lowered.is_empty() {
            return Ok(0);
        }
        db.update(query, &lowered).await
    }

    /// Bulk delete; returns the number of matching rows removed.
    ///
    /// # Errors
    ///
    /// Returns `Protected` when a protected reference blocks the delete.
    pub async fn delete<E: Executor + ?Sized>(&self, db: &E) -> Result<u64> {
        let query = self.checked()?;
        db.delete(query).await
    }

    async fn load_prefetches<E: Executor + ?Sized>(
        &self,
        db: &E,
        records: &mut [Record],
    ) -> Result<()> {
        for prefetch in &self.prefetch {
            let relation = self.query.meta.relation(prefetch.relation)?;
            let ids = records
                .iter()
                .map(|record| record.id().map(Value::Int))
                .collect::<Result<Vec<_>>>()?;
            let mut grouped: BTreeMap<i64, Vec<Record>> = BTreeMap::new();

            if !ids.is_empty() {
                match relation.kind {
                    RelationKind::Reverse { column } => {
                        let mut query = prefetch.query.clone();
                        if let Selection::Only(names) = &mut query.selection {
                            names.push(column);
                        }
                        query.filter.push(Condition::In {
                            left: Node::Field(FieldRef::local(column)),
                            values: ids,
                        });
                        query.validate()?;
                        for child in db.fetch(&query).await? {
                            let parent: i64 = child.get(column)?;
                            grouped.entry(parent).or_default().push(child);
                        }
                    }
                    RelationKind::ManyToMany {
                        through,
                        source,
                        target,
                    } => {
                        let mut links = Query::new(through());
                        links.filter.push(Condition::In {
                            left: Node::Field(FieldRef::local(source)),
                            values: ids,
                        });
                        let mut parents_of: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
                        for link in db.fetch(&links).await? {
                            let parent: i64 = link.get(source)?;
                            let child: i64 = link.get(target)?;
                            parents_of.entry(child).or_default().push(parent);
                        }
                        if !parents_of.is_empty() {
                            let mut query = prefetch.query.clone();
                            query.filter.push(Condition::In {
                                left: Node::Field(FieldRef::local("id")),
                                values: parents_of.keys().copied().map(Value::Int).collect(),
                            });
                            query.validate()?;
                            for child in db.fetch(&query).await? {
                                let child_id = child.id()?;
                                for parent in parents_of.get(&child_id).into_iter().flatten() {
                                    grouped.entry(*parent).or_default().push(child.clone());
                                }
                            }
                        }
                    }
                    RelationKind::ForeignKey { .. } => {
                        return Err(RepositoryError::InvalidQuery(format!(
                            "`{}` is a forward relation; use select_related",
                            prefetch.relation
                        )));
                    }
                }
            }

            for record in records.iter_mut() {
                let children = grouped.remove(&record.id()?).unwrap_or_default();
                record
                    .prefetched
                    .insert(prefetch.relation.to_owned(), children);
            }
        }
        Ok(())
    }
}

/// One column of a query, usable in `Col::in_subquery`.
pub struct Subquery<T> {
    query: Query,
    column: FieldRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Subquery<T> {
    pub(crate) fn into_parts(self) -> (Query, FieldRef) {
        (self.query, self.column)
    }
}

/// An entity with the annotations computed alongside it.
#[derive(Debug, Clone)]
pub struct Annotated<M> {
    pub object: M,
    pub annotations: BTreeMap<String, Value>,
}

impl<M> Annotated<M> {
    /// Typed annotation value.
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` if missing or mistyped.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.annotations.get(name).ok_or_else(|| {
            RepositoryError::DataCorruption(format!("missing annotation `{name}`"))
        })?;
        T::from_value(value)
    }
}

/// A row loaded with `only`/`defer`; missing columns are fetched on first
/// access.
#[derive(Debug, Clone)]
pub struct Deferred<M> {
    record: Record,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Model> Deferred<M> {
    /// Primary key.
    ///
    /// # Errors
    ///
    /// Returns `DataCorruption` if the id is missing.
    pub fn id(&self) -> Result<i64> {
        self.record.id()
    }

    /// Whether `column` was loaded by the original query (or a later access).
    #[must_use]
    pub fn is_loaded<T>(&self, column: &Col<M, T>) -> bool {
        self.record.values.contains_key(column.name())
    }

    /// Read a column, loading the deferred columns first if needed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the row disappeared, `InvalidQuery` for related
    /// columns.
    pub async fn get<T: FromValue, E: Executor + ?Sized>(
        &mut self,
        db: &E,
        column: &Col<M, T>,
    ) -> Result<T> {
        if !column.field().path.is_empty() {
            return Err(RepositoryError::InvalidQuery(format!(
                "`{}` is not a column of {}",
                column.field().key(),
                M::meta().name
            )));
        }
        if !self.is_loaded(column) {
            self.load(db).await?;
        }
        self.record.get(column.name())
    }

    /// Load everything and build the entity.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the row disappeared.
    pub async fn into_model<E: Executor + ?Sized>(mut self, db: &E) -> Result<M> {
        if M::meta()
            .fields
            .iter()
            .any(|field| !self.record.values.contains_key(field.name))
        {
            self.load(db).await?;
        }
        M::from_record(&self.record)
    }

    async fn load<E: Executor + ?Sized>(&mut self, db: &E) -> Result<()> {
        let mut query = Query::new(M::meta());
        query.filter.push(id_equals(self.record.id()?));
        tracing::debug!(model = M::meta().name, "loading deferred columns");
        let row = db
            .fetch(&query)
            .await?
            .into_iter()
            .next()
            .ok_or(RepositoryError::NotFound)?;
        for (name, value) in row.values {
            self.record.values.entry(name).or_insert(value);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::{Collection, Customer, Order, Product};

    #[test]
    fn test_queryset_is_lazy_and_reusable() {
        let base = Product::objects().filter(Product::INVENTORY.lt(10));
        let narrowed = base.clone().filter(Product::TITLE.starts_with("A"));
        assert_eq!(base.query().filter.len(), 1);
        assert_eq!(narrowed.query().filter.len(), 2);
    }

    #[test]
    fn test_slice_composes() {
        let qs = Product::objects().slice(5..15).slice(2..4);
        assert_eq!(qs.query().offset, 7);
        assert_eq!(qs.query().limit, Some(2));

        let qs = Product::objects().limit(3).slice(1..10);
        assert_eq!(qs.query().offset, 1);
        assert_eq!(qs.query().limit, Some(2));
    }

    #[test]
    fn test_filter_after_slice_is_an_error() {
        let qs = Product::objects().limit(5).filter(Product::INVENTORY.lt(1));
        assert!(matches!(
            qs.checked(),
            Err(RepositoryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_reverse_without_ordering_uses_id() {
        let qs = Product::objects().reverse();
        let key = qs.query().ordering.first().unwrap();
        assert!(key.descending);
        assert!(matches!(&key.node, Node::Field(f) if f.name == "id"));
    }

    #[test]
    fn test_selected_fields_always_include_id() {
        let qs = Product::objects().only([Product::TITLE.field()]);
        let names: Vec<_> = qs
            .query()
            .selected_fields()
            .iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["id", "title"]);

        let qs = Product::objects().defer([Product::DESCRIPTION.field()]);
        assert!(
            !qs.query()
                .selected_fields()
                .iter()
                .any(|f| f.name == "description")
        );
    }

    #[test]
    fn test_validate_rejects_unknown_annotation() {
        let qs = Customer::objects().filter(Expr::annotation("orders_count").gt(Expr::lit(5)));
        assert!(matches!(
            qs.query().validate(),
            Err(RepositoryError::InvalidQuery(_))
        ));

        let qs = Customer::objects()
            .annotate("orders_count", Customer::ORDERS.count())
            .filter(Expr::annotation("orders_count").gt(Expr::lit(5)));
        assert!(qs.query().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_annotation_shadowing_field() {
        let qs = Collection::objects().annotate("title", Expr::lit("x"));
        assert!(qs.query().validate().is_err());
    }

    #[test]
    fn test_multi_hop_prefetch_is_rejected() {
        let qs = Customer::objects().prefetch_related(Customer::ORDERS.via(Order::ITEMS));
        assert!(qs.checked().is_err());
    }
}
