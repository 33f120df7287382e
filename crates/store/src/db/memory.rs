//! In-process storage backend.
//!
//! Evaluates query descriptions directly over rows kept in memory, with the
//! semantics the `PostgreSQL` compilation has: three-valued logic for
//! `NULL`, `NULL`s sorting last ascending and first descending, `CONCAT`
//! skipping `NULL`s, integer division truncating, foreign keys checked on
//! every write and `on_delete` rules applied on delete.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use chrono::Datelike;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::expr::{AggFunc, AggregateExpr, ArithOp, FieldRef, Node};
use super::filter::Condition;
use super::query::Query;
use super::schema::{ModelMeta, OnDelete, RelationKind, Schema};
use super::value::{Record, Value};
use super::{RepositoryError, Result};

type Row = BTreeMap<String, Value>;

static NO_ANNOTATIONS: BTreeMap<String, Value> = BTreeMap::new();

#[derive(Debug, Clone, Default)]
struct Table {
    next_id: i64,
    rows: BTreeMap<i64, Row>,
}

/// Every table of a schema.
#[derive(Debug, Clone)]
pub(crate) struct Tables {
    schema: Schema,
    tables: BTreeMap<&'static str, Table>,
}

/// Shared handle to in-memory tables.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Empty tables for every model of `schema`.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        let tables = schema
            .iter()
            .map(|meta| (meta().table, Table::default()))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(Tables { schema, tables })),
        }
    }

    /// Exclusive hold on the tables. Every other reader and writer waits
    /// until the guard is dropped.
    pub(crate) async fn lock_owned(&self) -> OwnedMutexGuard<Tables> {
        Arc::clone(&self.inner).lock_owned().await
    }

    /// A store over `tables` that shares nothing with any other handle.
    pub(crate) fn detached(tables: Tables) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tables)),
        }
    }

    pub(crate) async fn snapshot(&self) -> Tables {
        self.inner.lock().await.clone()
    }

    pub async fn fetch(&self, query: &Query) -> Result<Vec<Record>> {
        let tables = self.inner.lock().await;
        Eval { tables: &tables }.records(query)
    }

    pub async fn aggregate(
        &self,
        query: &Query,
        aggregates: &[(String, AggregateExpr)],
    ) -> Result<Record> {
        let tables = self.inner.lock().await;
        let eval = Eval { tables: &tables };
        let mut record = Record::new();

        if query.values.is_some() || query.distinct {
            let rows = count_of(eval.records(query)?.len());
            for (name, aggregate) in aggregates {
                if aggregate.func != AggFunc::Count
                    || aggregate.arg.is_some()
                    || aggregate.filter.is_some()
                {
                    return Err(RepositoryError::InvalidQuery(
                        "only row counts are supported on projected or distinct queries"
                            .to_owned(),
                    ));
                }
                record.values.insert(name.clone(), Value::Int(rows));
            }
            return Ok(record);
        }

        let matched = slice(eval.matching(query)?, query);
        for (name, aggregate) in aggregates {
            let mut values = Vec::new();
            for row in &matched {
                let at = row.at(query.meta);
                if let Some(filter) = &aggregate.filter {
                    if eval.condition(at, filter)? != Some(true) {
                        continue;
                    }
                }
                values.push(match &aggregate.arg {
                    Some(arg) => eval.node(at, arg)?,
                    None => Value::Int(1),
                });
            }
            let value = fold(aggregate.func, aggregate.arg.is_none(), values)?;
            record.values.insert(name.clone(), value);
        }
        Ok(record)
    }

    pub async fn insert(
        &self,
        meta: &'static ModelMeta,
        values: Vec<(&'static str, Value)>,
    ) -> Result<Record> {
        let mut tables = self.inner.lock().await;
        let mut row = Row::new();
        let mut explicit_id = None;
        for (name, value) in values {
            let value = coerce(meta, name, value)?;
            if name == "id" {
                if let Value::Int(id) = value {
                    explicit_id = Some(id);
                }
                continue;
            }
            row.insert(name.to_owned(), value);
        }
        for field in meta.fields {
            if field.nullable {
                row.entry(field.name.to_owned()).or_insert(Value::Null);
            }
        }

        let table = tables.table(meta)?;
        let id = match explicit_id {
            Some(id) if table.rows.contains_key(&id) => {
                return Err(RepositoryError::Conflict(format!(
                    "{} with id {id} already exists",
                    meta.name
                )));
            }
            Some(id) => id,
            None => table.next_id + 1,
        };
        row.insert("id".to_owned(), Value::Int(id));
        tables.check_row(meta, id, &row)?;

        let table = tables.table_mut(meta.table)?;
        table.next_id = table.next_id.max(id);
        table.rows.insert(id, row.clone());
        Ok(Record {
            values: row,
            ..Record::default()
        })
    }

    pub async fn update(&self, query: &Query, assignments: &[(&'static str, Node)]) -> Result<u64> {
        let mut tables = self.inner.lock().await;
        let meta = query.meta;
        let changes = {
            let eval = Eval { tables: &tables };
            let mut changes = Vec::new();
            for matched in slice(eval.matching(query)?, query) {
                let at = RowRef {
                    meta,
                    row: matched.row,
                    annotations: &NO_ANNOTATIONS,
                };
                let mut row = matched.row.clone();
                for (name, node) in assignments {
                    let value = coerce(meta, name, eval.node(at, node)?)?;
                    row.insert((*name).to_owned(), value);
                }
                changes.push((row_id(matched.row)?, row));
            }
            changes
        };

        let mut candidate = tables.clone();
        let table = candidate.table_mut(meta.table)?;
        for (id, row) in &changes {
            table.rows.insert(*id, row.clone());
        }
        for (id, row) in &changes {
            candidate.check_row(meta, *id, row)?;
        }
        *tables = candidate;
        Ok(changes.len() as u64)
    }

    pub async fn delete(&self, query: &Query) -> Result<u64> {
        let mut tables = self.inner.lock().await;
        let roots = {
            let eval = Eval { tables: &tables };
            slice(eval.matching(query)?, query)
                .iter()
                .map(|matched| row_id(matched.row))
                .collect::<Result<Vec<_>>>()?
        };
        let plan = tables.plan_delete(query.meta, &roots)?;
        tables.apply_delete(plan)?;
        Ok(roots.len() as u64)
    }
}

#[derive(Default)]
struct DeletePlan {
    doomed: BTreeMap<&'static str, BTreeSet<i64>>,
    set_null: Vec<(&'static str, i64, &'static str)>,
    protected: Vec<(&'static str, i64, String)>,
}

impl DeletePlan {
    fn is_doomed(&self, table: &str, id: i64) -> bool {
        self.doomed.get(table).is_some_and(|ids| ids.contains(&id))
    }
}

impl Tables {
    fn table(&self, meta: &ModelMeta) -> Result<&Table> {
        self.tables.get(meta.table).ok_or_else(|| {
            RepositoryError::InvalidQuery(format!("{} is not part of the schema", meta.table))
        })
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut Table> {
        self.tables.get_mut(table).ok_or_else(|| {
            RepositoryError::InvalidQuery(format!("{table} is not part of the schema"))
        })
    }

    /// Not-null, unique and foreign key checks for a row about to be stored.
    fn check_row(&self, meta: &ModelMeta, id: i64, row: &Row) -> Result<()> {
        let table = self.table(meta)?;
        for field in meta.fields {
            let value = row.get(field.name).unwrap_or(&Value::Null);
            if value.is_null() {
                if !field.nullable {
                    return Err(RepositoryError::Integrity(format!(
                        "null value in column \"{}\" of relation \"{}\"",
                        field.name, meta.table
                    )));
                }
                continue;
            }
            if field.unique
                && table
                    .rows
                    .iter()
                    .any(|(other, existing)| *other != id && existing.get(field.name) == Some(value))
            {
                return Err(RepositoryError::Conflict(format!(
                    "duplicate value for {}.{}",
                    meta.table, field.name
                )));
            }
        }
        for relation in meta.relations {
            let RelationKind::ForeignKey { column, .. } = relation.kind else {
                continue;
            };
            if let Some(Value::Int(target_id)) = row.get(column) {
                let target = (relation.target)();
                if !self.table(target)?.rows.contains_key(target_id) {
                    return Err(RepositoryError::Integrity(format!(
                        "{}.{column} references missing {} {target_id}",
                        meta.table, target.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn plan_delete(&self, meta: &'static ModelMeta, ids: &[i64]) -> Result<DeletePlan> {
        let mut plan = DeletePlan::default();
        let mut queue: VecDeque<(&'static ModelMeta, i64)> =
            ids.iter().map(|id| (meta, *id)).collect();

        while let Some((meta, id)) = queue.pop_front() {
            if !plan.doomed.entry(meta.table).or_default().insert(id) {
                continue;
            }
            for referrer in self.schema.iter().map(|referrer| referrer()) {
                for relation in referrer.relations {
                    let RelationKind::ForeignKey { column, on_delete } = relation.kind else {
                        continue;
                    };
                    if (relation.target)().table != meta.table {
                        continue;
                    }
                    for (child, row) in &self.table(referrer)?.rows {
                        if row.get(column) != Some(&Value::Int(id)) {
                            continue;
                        }
                        match on_delete {
                            OnDelete::Cascade => queue.push_back((referrer, *child)),
                            OnDelete::SetNull => plan.set_null.push((referrer.table, *child, column)),
                            OnDelete::Protect => plan.protected.push((
                                referrer.table,
                                *child,
                                format!(
                                    "cannot delete {} {id}: referenced through protected foreign key {}.{}",
                                    meta.name, referrer.name, relation.name
                                ),
                            )),
                        }
                    }
                }
            }
        }

        for (table, id, message) in &plan.protected {
            if !plan.is_doomed(table, *id) {
                return Err(RepositoryError::Protected(message.clone()));
            }
        }
        Ok(plan)
    }

    fn apply_delete(&mut self, plan: DeletePlan) -> Result<()> {
        for (table, id, column) in &plan.set_null {
            if plan.is_doomed(table, *id) {
                continue;
            }
            if let Some(row) = self.table_mut(table)?.rows.get_mut(id) {
                row.insert((*column).to_owned(), Value::Null);
            }
        }
        for (table, ids) in &plan.doomed {
            let table = self.table_mut(table)?;
            for id in ids {
                table.rows.remove(id);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Evaluation
// =============================================================================

#[derive(Clone, Copy)]
struct RowRef<'t, 'a> {
    meta: &'static ModelMeta,
    row: &'t Row,
    annotations: &'a BTreeMap<String, Value>,
}

struct Matched<'t> {
    row: &'t Row,
    annotations: BTreeMap<String, Value>,
}

impl<'t> Matched<'t> {
    fn at(&self, meta: &'static ModelMeta) -> RowRef<'t, '_> {
        RowRef {
            meta,
            row: self.row,
            annotations: &self.annotations,
        }
    }
}

struct Eval<'t> {
    tables: &'t Tables,
}

impl<'t> Eval<'t> {
    /// Filtered and ordered rows, annotations computed. Not sliced.
    fn matching(&self, query: &Query) -> Result<Vec<Matched<'t>>> {
        let table = self.tables.table(query.meta)?;
        let mut matched = Vec::new();

        'rows: for row in table.rows.values() {
            let mut annotations = BTreeMap::new();
            for (name, node) in &query.annotations {
                let at = RowRef {
                    meta: query.meta,
                    row,
                    annotations: &annotations,
                };
                let value = self.node(at, node)?;
                annotations.insert(name.clone(), value);
            }
            let at = RowRef {
                meta: query.meta,
                row,
                annotations: &annotations,
            };
            for condition in &query.filter {
                if self.condition(at, condition)? != Some(true) {
                    continue 'rows;
                }
            }
            matched.push(Matched { row, annotations });
        }

        if query.ordering.is_empty() {
            return Ok(matched);
        }

        let mut keyed = matched
            .into_iter()
            .map(|row| {
                let keys = query
                    .ordering
                    .iter()
                    .map(|key| self.node(row.at(query.meta), &key.node))
                    .collect::<Result<Vec<_>>>()?;
                Ok((keys, row))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut failure = None;
        keyed.sort_by(|(left, _), (right, _)| {
            for ((a, b), key) in left.iter().zip(right).zip(&query.ordering) {
                match sort_cmp(a, b) {
                    Ok(Ordering::Equal) => {}
                    Ok(ordering) if key.descending => return ordering.reverse(),
                    Ok(ordering) => return ordering,
                    Err(err) => {
                        failure.get_or_insert(err);
                        return Ordering::Equal;
                    }
                }
            }
            Ordering::Equal
        });
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    fn records(&self, query: &Query) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for matched in self.matching(query)? {
            let at = matched.at(query.meta);
            let mut record = Record::new();
            if let Some(values) = &query.values {
                for field in values {
                    let value = self.node(at, &Node::Field(field.clone()))?;
                    record.values.insert(field.key(), value);
                }
            } else {
                for field in query.selected_fields() {
                    let value = matched.row.get(field.name).cloned().unwrap_or(Value::Null);
                    record.values.insert(field.name.to_owned(), value);
                }
                for path in &query.select_related {
                    self.attach_related(&mut record, at, path)?;
                }
            }
            record.annotations.clone_from(&matched.annotations);
            records.push(record);
        }

        if query.distinct {
            let mut unique: Vec<Record> = Vec::with_capacity(records.len());
            for record in records {
                if !unique.contains(&record) {
                    unique.push(record);
                }
            }
            records = unique;
        }
        Ok(slice(records, query))
    }

    fn attach_related(&self, record: &mut Record, at: RowRef<'t, '_>, path: &[&'static str]) -> Result<()> {
        let mut current = at;
        let mut node = record;
        for hop in path {
            let Some(next) = self.follow(current, std::slice::from_ref(hop))? else {
                break;
            };
            node = node
                .related
                .entry((*hop).to_owned())
                .or_insert_with(|| full_record(next));
            current = next;
        }
        Ok(())
    }

    /// The row at the end of a forward path; `None` when a reference is null.
    fn follow<'a>(&self, at: RowRef<'t, 'a>, path: &[&'static str]) -> Result<Option<RowRef<'t, 'a>>> {
        let mut current = at;
        for hop in path {
            let relation = current.meta.relation(hop)?;
            let RelationKind::ForeignKey { column, .. } = relation.kind else {
                return Err(RepositoryError::InvalidQuery(format!(
                    "`{hop}` on {} is a to-many relation and cannot be used in a scalar position",
                    current.meta.name
                )));
            };
            let Some(Value::Int(id)) = current.row.get(column) else {
                return Ok(None);
            };
            let target = (relation.target)();
            let Some(row) = self.tables.table(target)?.rows.get(id) else {
                return Ok(None);
            };
            current = RowRef {
                meta: target,
                row,
                annotations: &NO_ANNOTATIONS,
            };
        }
        Ok(Some(current))
    }

    /// Rows reached from `row` through to-many relations, one per path.
    fn related(
        &self,
        meta: &'static ModelMeta,
        row: &'t Row,
        hops: &[&'static str],
    ) -> Result<(&'static ModelMeta, Vec<&'t Row>)> {
        let mut meta = meta;
        let mut rows = vec![row];
        for hop in hops {
            let relation = meta.relation(hop)?;
            let target = (relation.target)();
            let target_table = self.tables.table(target)?;
            let mut next = Vec::new();
            match relation.kind {
                RelationKind::Reverse { column } => {
                    for parent in &rows {
                        let parent = Value::Int(row_id(parent)?);
                        next.extend(
                            target_table
                                .rows
                                .values()
                                .filter(|child| child.get(column) == Some(&parent)),
                        );
                    }
                }
                RelationKind::ManyToMany {
                    through,
                    source,
                    target: target_column,
                } => {
                    let links = self.tables.table(through())?;
                    for parent in &rows {
                        let parent = Value::Int(row_id(parent)?);
                        for link in links.rows.values() {
                            if link.get(source) != Some(&parent) {
                                continue;
                            }
                            if let Some(Value::Int(child)) = link.get(target_column) {
                                next.extend(target_table.rows.get(child));
                            }
                        }
                    }
                }
                RelationKind::ForeignKey { .. } => {
                    return Err(RepositoryError::InvalidQuery(format!(
                        "`{hop}` on {} is not a to-many relation",
                        meta.name
                    )));
                }
            }
            rows = next;
            meta = target;
        }
        Ok((meta, rows))
    }

    fn node(&self, at: RowRef<'t, '_>, node: &Node) -> Result<Value> {
        match node {
            Node::Field(field) => self.field(at, field),
            Node::Value(value) => Ok(value.clone()),
            Node::Annotation(name) => at.annotations.get(name).cloned().ok_or_else(|| {
                RepositoryError::InvalidQuery(format!("unknown annotation `{name}`"))
            }),
            Node::Binary { op, left, right } => {
                arithmetic(*op, self.node(at, left)?, self.node(at, right)?)
            }
            Node::Concat(parts) => {
                let mut text = String::new();
                for part in parts {
                    text.push_str(&self.node(at, part)?.to_text());
                }
                Ok(Value::Text(text))
            }
            Node::Aggregate(aggregate) => self.correlated(at, aggregate),
        }
    }

    fn field(&self, at: RowRef<'t, '_>, field: &FieldRef) -> Result<Value> {
        let Some(target) = self.follow(at, &field.path)? else {
            return Ok(Value::Null);
        };
        target.meta.field(field.name)?;
        Ok(target.row.get(field.name).cloned().unwrap_or(Value::Null))
    }

    fn correlated(&self, at: RowRef<'t, '_>, aggregate: &AggregateExpr) -> Result<Value> {
        let (meta, rows) = self.related(at.meta, at.row, &aggregate.hops)?;
        let mut values = Vec::new();
        for row in rows {
            let child = RowRef {
                meta,
                row,
                annotations: &NO_ANNOTATIONS,
            };
            if let Some(filter) = &aggregate.filter {
                if self.condition(child, filter)? != Some(true) {
                    continue;
                }
            }
            values.push(match &aggregate.arg {
                Some(arg) => self.node(child, arg)?,
                None => Value::Int(1),
            });
        }
        fold(aggregate.func, aggregate.arg.is_none(), values)
    }

    /// Three-valued evaluation: `None` is SQL `UNKNOWN`.
    fn condition(&self, at: RowRef<'t, '_>, condition: &Condition) -> Result<Option<bool>> {
        Ok(match condition {
            Condition::Compare { left, op, right } => {
                let left = self.node(at, left)?;
                let right = self.node(at, right)?;
                left.try_cmp(&right)?.map(|ordering| op.holds(ordering))
            }
            Condition::In { left, values } => membership(&self.node(at, left)?, values)?,
            Condition::InQuery {
                left,
                query,
                column,
            } => {
                let values = self.column_values(query, column)?;
                membership(&self.node(at, left)?, &values)?
            }
            Condition::Range { left, low, high } => {
                let left = self.node(at, left)?;
                match (left.try_cmp(low)?, left.try_cmp(high)?) {
                    (Some(above), Some(below)) => Some(above.is_ge() && below.is_le()),
                    _ => None,
                }
            }
            Condition::Text {
                left,
                mode,
                needle,
                case_insensitive,
            } => match self.node(at, left)? {
                Value::Null => None,
                value => Some(mode.matches(&value.to_text(), needle, *case_insensitive)),
            },
            Condition::IsNull { left, negated } => Some(self.node(at, left)?.is_null() != *negated),
            Condition::Year { left, year } => match self.node(at, left)? {
                Value::Null => None,
                Value::Timestamp(timestamp) => Some(timestamp.year() == *year),
                Value::Date(date) => Some(date.year() == *year),
                other => {
                    return Err(RepositoryError::InvalidQuery(format!(
                        "cannot extract a year from {}",
                        other.type_name()
                    )));
                }
            },
            Condition::Exists { hops, filter } => {
                let (meta, rows) = self.related(at.meta, at.row, hops)?;
                let mut found = false;
                for row in rows {
                    let child = RowRef {
                        meta,
                        row,
                        annotations: &NO_ANNOTATIONS,
                    };
                    let keep = match filter {
                        Some(filter) => self.condition(child, filter)? == Some(true),
                        None => true,
                    };
                    if keep {
                        found = true;
                        break;
                    }
                }
                Some(found)
            }
            Condition::And(parts) => {
                let mut result = Some(true);
                for part in parts {
                    match self.condition(at, part)? {
                        Some(false) => result = Some(false),
                        None if result == Some(true) => result = None,
                        _ => {}
                    }
                }
                result
            }
            Condition::Or(parts) => {
                let mut result = Some(false);
                for part in parts {
                    match self.condition(at, part)? {
                        Some(true) => result = Some(true),
                        None if result == Some(false) => result = None,
                        _ => {}
                    }
                }
                result
            }
            Condition::Not(inner) => self.condition(at, inner)?.map(|holds| !holds),
        })
    }

    /// One column of a sub-query, after `DISTINCT` and slicing.
    fn column_values(&self, query: &Query, column: &FieldRef) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        for matched in self.matching(query)? {
            let value = self.field(matched.at(query.meta), column)?;
            if !query.distinct || !values.contains(&value) {
                values.push(value);
            }
        }
        Ok(slice(values, query))
    }
}

fn full_record(at: RowRef<'_, '_>) -> Record {
    let mut record = Record::new();
    for field in at.meta.fields {
        let value = at.row.get(field.name).cloned().unwrap_or(Value::Null);
        record.values.insert(field.name.to_owned(), value);
    }
    record
}

fn row_id(row: &Row) -> Result<i64> {
    match row.get("id") {
        Some(Value::Int(id)) => Ok(*id),
        _ => Err(RepositoryError::DataCorruption("row without id".to_owned())),
    }
}

fn coerce(meta: &ModelMeta, name: &str, value: Value) -> Result<Value> {
    let field = meta.field(name)?;
    field.kind.coerce(value).ok_or_else(|| {
        RepositoryError::InvalidQuery(format!("wrong type for {}.{name}", meta.name))
    })
}

fn count_of(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}

fn slice<T>(items: Vec<T>, query: &Query) -> Vec<T> {
    items
        .into_iter()
        .skip(query.offset)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect()
}

/// Sort order with `NULL` greater than every value.
fn sort_cmp(a: &Value, b: &Value) -> Result<Ordering> {
    Ok(match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.try_cmp(b)?.unwrap_or(Ordering::Equal),
    })
}

fn membership(left: &Value, values: &[Value]) -> Result<Option<bool>> {
    if left.is_null() {
        return Ok(None);
    }
    let mut unknown = false;
    for value in values {
        match left.try_cmp(value)? {
            Some(Ordering::Equal) => return Ok(Some(true)),
            None => unknown = true,
            Some(_) => {}
        }
    }
    Ok(if unknown { None } else { Some(false) })
}

fn arithmetic(op: ArithOp, left: Value, right: Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let overflow = || RepositoryError::InvalidQuery(format!("numeric overflow in `{}`", op.sql()));
    let division_by_zero = || RepositoryError::InvalidQuery("division by zero".to_owned());

    if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
        let result = match op {
            ArithOp::Add => a.checked_add(*b),
            ArithOp::Sub => a.checked_sub(*b),
            ArithOp::Mul => a.checked_mul(*b),
            ArithOp::Div if *b == 0 => return Err(division_by_zero()),
            ArithOp::Div => a.checked_div(*b),
        };
        return result.map(Value::Int).ok_or_else(overflow);
    }

    let (Some(a), Some(b)) = (left.as_decimal(), right.as_decimal()) else {
        return Err(RepositoryError::InvalidQuery(format!(
            "cannot apply `{}` to {} and {}",
            op.sql(),
            left.type_name(),
            right.type_name()
        )));
    };
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div if b.is_zero() => return Err(division_by_zero()),
        ArithOp::Div => a.checked_div(b),
    };
    result.map(Value::Decimal).ok_or_else(overflow)
}

/// Fold aggregated values. `star` counts rows rather than non-null values.
fn fold(func: AggFunc, star: bool, values: Vec<Value>) -> Result<Value> {
    if func == AggFunc::Count && star {
        return Ok(Value::Int(count_of(values.len())));
    }
    let values: Vec<Value> = values.into_iter().filter(|value| !value.is_null()).collect();
    match func {
        AggFunc::Count => Ok(Value::Int(count_of(values.len()))),
        AggFunc::Sum => {
            let mut total: Option<Value> = None;
            for value in values {
                total = Some(match total {
                    None => value,
                    Some(sum) => arithmetic(ArithOp::Add, sum, value)?,
                });
            }
            Ok(total.unwrap_or(Value::Null))
        }
        AggFunc::Avg => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let mut total = Decimal::ZERO;
            for value in &values {
                total += value.as_decimal().ok_or_else(|| {
                    RepositoryError::InvalidQuery(format!("cannot average {}", value.type_name()))
                })?;
            }
            Ok(Value::Decimal(total / Decimal::from(values.len())))
        }
        AggFunc::Min | AggFunc::Max => {
            let mut best: Option<Value> = None;
            for value in values {
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let ordering = value.try_cmp(&current)?.unwrap_or(Ordering::Equal);
                        let better = if func == AggFunc::Min {
                            ordering.is_lt()
                        } else {
                            ordering.is_gt()
                        };
                        if better { value } else { current }
                    }
                });
            }
            Ok(best.unwrap_or(Value::Null))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::db::{Agg, Expr, Model};
    use crate::models::{Cart, CartItem, Collection, Customer, Order, OrderItem, Product, SCHEMA};
    use storefront_core::{CollectionId, ProductId};

    async fn collection(store: &MemoryStore, title: &str) -> i64 {
        store
            .insert(Collection::meta(), vec![("title", Value::from(title))])
            .await
            .unwrap()
            .id()
            .unwrap()
    }

    async fn product(store: &MemoryStore, title: &str, price: i64, inventory: i32, collection: i64) -> i64 {
        store
            .insert(
                Product::meta(),
                vec![
                    ("title", Value::from(title)),
                    ("slug", Value::from(title.to_lowercase())),
                    ("unit_price", Value::Decimal(Decimal::from(price))),
                    ("inventory", Value::from(inventory)),
                    ("last_update", Value::from(Utc::now())),
                    ("collection_id", Value::Int(collection)),
                ],
            )
            .await
            .unwrap()
            .id()
            .unwrap()
    }

    async fn customer(store: &MemoryStore, first: &str, email: &str) -> Result<Record> {
        store
            .insert(
                Customer::meta(),
                vec![
                    ("first_name", Value::from(first)),
                    ("last_name", Value::from("Doe")),
                    ("email", Value::from(email)),
                    ("phone", Value::from("555")),
                    ("membership", Value::from("B")),
                ],
            )
            .await
    }

    async fn order(store: &MemoryStore, customer: i64, status: &str) -> i64 {
        store
            .insert(
                Order::meta(),
                vec![
                    ("placed_at", Value::from(Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap())),
                    ("payment_status", Value::from(status)),
                    ("customer_id", Value::Int(customer)),
                ],
            )
            .await
            .unwrap()
            .id()
            .unwrap()
    }

    async fn order_item(store: &MemoryStore, order: i64, product: i64, quantity: i32, price: i64) {
        store
            .insert(
                OrderItem::meta(),
                vec![
                    ("order_id", Value::Int(order)),
                    ("product_id", Value::Int(product)),
                    ("quantity", Value::from(quantity)),
                    ("unit_price", Value::Decimal(Decimal::from(price))),
                ],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_checks_references() {
        let store = MemoryStore::new(SCHEMA);
        let beauty = collection(&store, "Beauty").await;
        assert_eq!(beauty, 1);
        assert_eq!(collection(&store, "Grocery").await, 2);

        let err = store
            .insert(
                Product::meta(),
                vec![
                    ("title", Value::from("Orphan")),
                    ("slug", Value::from("orphan")),
                    ("unit_price", Value::Int(10)),
                    ("inventory", Value::from(1)),
                    ("last_update", Value::from(Utc::now())),
                    ("collection_id", Value::Int(99)),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Integrity(_)));

        let err = store
            .insert(Product::meta(), vec![("title", Value::from("Incomplete"))])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_unique_email_conflicts() {
        let store = MemoryStore::new(SCHEMA);
        customer(&store, "Mosh", "mosh@example.com").await.unwrap();
        let err = customer(&store, "Other", "mosh@example.com").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_filter_order_and_slice() {
        let store = MemoryStore::new(SCHEMA);
        let c = collection(&store, "Beauty").await;
        product(&store, "Cheap", 5, 3, c).await;
        product(&store, "Mid", 25, 30, c).await;
        product(&store, "Pricey", 80, 8, c).await;
        product(&store, "Also mid", 22, 1, c).await;

        let low = Product::objects()
            .filter(Product::INVENTORY.lt(10))
            .order_by([Product::UNIT_PRICE.desc()]);
        let titles: Vec<String> = low
            .all(&store_db(&store))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(titles, vec!["Pricey", "Also mid", "Cheap"]);

        let page = low.clone().slice(1..2).all(&store_db(&store)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].title, "Also mid");

        let ranged = Product::objects()
            .filter(Product::UNIT_PRICE.between(Decimal::from(20), Decimal::from(30)))
            .count(&store_db(&store))
            .await
            .unwrap();
        assert_eq!(ranged, 2);
    }

    fn store_db(store: &MemoryStore) -> crate::db::Db {
        crate::db::Db::Memory(store.clone())
    }

    #[tokio::test]
    async fn test_null_ordering_and_three_valued_not() {
        let store = MemoryStore::new(SCHEMA);
        let db = store_db(&store);
        let with = collection(&store, "With").await;
        collection(&store, "Without").await;
        let p = product(&store, "Featured", 10, 1, with).await;
        Collection::objects()
            .filter(Collection::ID.eq(CollectionId::new(1)))
            .update(&db, [Collection::FEATURED_PRODUCT_ID.set(Some(ProductId::new(1)))])
            .await
            .unwrap();
        assert_eq!(p, 1);

        let ascending = Collection::objects()
            .order_by([Collection::FEATURED_PRODUCT_ID.asc()])
            .all(&db)
            .await
            .unwrap();
        assert_eq!(ascending[0].title, "With");
        let descending = Collection::objects()
            .order_by([Collection::FEATURED_PRODUCT_ID.desc()])
            .all(&db)
            .await
            .unwrap();
        assert_eq!(descending[0].title, "Without");

        // NOT (featured_product_id = 1) is unknown for the NULL row.
        let excluded = Collection::objects()
            .exclude(Collection::FEATURED_PRODUCT_ID.eq(Some(ProductId::new(1))))
            .count(&db)
            .await
            .unwrap();
        assert_eq!(excluded, 0);
    }

    #[tokio::test]
    async fn test_annotations_aggregate_per_row() {
        let store = MemoryStore::new(SCHEMA);
        let db = store_db(&store);
        let c = collection(&store, "Beauty").await;
        let p = product(&store, "Soap", 10, 5, c).await;
        let mosh = customer(&store, "Mosh", "m@example.com").await.unwrap().id().unwrap();
        let john = customer(&store, "John", "j@example.com").await.unwrap().id().unwrap();
        let first = order(&store, mosh, "C").await;
        order(&store, mosh, "P").await;
        order_item(&store, first, p, 2, 10).await;
        order_item(&store, first, p, 1, 12).await;

        let rows = Customer::objects()
            .annotate("orders_count", Customer::ORDERS.count())
            .annotate(
                "spent",
                Customer::ORDERS.via(Order::ITEMS).sum_of(
                    OrderItem::QUANTITY.expr() * OrderItem::UNIT_PRICE.expr(),
                    Some(OrderItem::ORDER.then(Order::PAYMENT_STATUS).eq(storefront_core::PaymentStatus::Complete)),
                ),
            )
            .order_by([Customer::ID.asc()])
            .annotated(&db)
            .await
            .unwrap();
        assert_eq!(rows[0].get::<i64>("orders_count").unwrap(), 2);
        assert_eq!(rows[0].get::<Decimal>("spent").unwrap(), Decimal::from(32));
        assert_eq!(rows[1].object.id.as_i32(), i32::try_from(john).unwrap());
        assert_eq!(rows[1].get::<i64>("orders_count").unwrap(), 0);
        assert_eq!(rows[1].get::<Option<Decimal>>("spent").unwrap(), None);

        let frequent = Customer::objects()
            .annotate("orders_count", Customer::ORDERS.count())
            .filter(Expr::annotation("orders_count").gt(Expr::lit(1)))
            .count(&db)
            .await
            .unwrap();
        assert_eq!(frequent, 1);
    }

    #[tokio::test]
    async fn test_query_aggregates() {
        let store = MemoryStore::new(SCHEMA);
        let db = store_db(&store);
        let c = collection(&store, "Beauty").await;
        product(&store, "A", 10, 5, c).await;
        product(&store, "B", 30, 5, c).await;

        let stats = Product::objects()
            .aggregate(
                &db,
                [
                    ("count", Agg::count()),
                    ("min_price", Agg::min(Product::UNIT_PRICE)),
                    ("avg_price", Agg::avg(Product::UNIT_PRICE)),
                    ("stock", Agg::sum(Product::INVENTORY)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(stats.get::<i64>("count").unwrap(), 2);
        assert_eq!(stats.get::<Decimal>("min_price").unwrap(), Decimal::from(10));
        assert_eq!(stats.get::<Decimal>("avg_price").unwrap(), Decimal::from(20));
        assert_eq!(stats.get::<i64>("stock").unwrap(), 10);

        let empty = Product::objects()
            .filter(Product::INVENTORY.gt(100))
            .aggregate(&db, [("min_price", Agg::min(Product::UNIT_PRICE))])
            .await
            .unwrap();
        assert_eq!(empty.value("min_price"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_delete_protect_cascade_and_set_null() {
        let store = MemoryStore::new(SCHEMA);
        let db = store_db(&store);
        let c = collection(&store, "Beauty").await;
        let ordered = product(&store, "Ordered", 10, 5, c).await;
        let carted = product(&store, "Carted", 10, 5, c).await;
        let buyer = customer(&store, "Mosh", "m@example.com").await.unwrap().id().unwrap();
        let o = order(&store, buyer, "P").await;
        order_item(&store, o, ordered, 1, 10).await;

        let cart = store
            .insert(Cart::meta(), vec![("created_at", Value::from(Utc::now()))])
            .await
            .unwrap()
            .id()
            .unwrap();
        store
            .insert(
                CartItem::meta(),
                vec![
                    ("cart_id", Value::Int(cart)),
                    ("product_id", Value::Int(carted)),
                    ("quantity", Value::from(1)),
                ],
            )
            .await
            .unwrap();
        Collection::objects()
            .update(&db, [Collection::FEATURED_PRODUCT_ID.set(Some(ProductId::new(2)))])
            .await
            .unwrap();

        let err = Product::objects()
            .filter(Product::ID.eq(ProductId::new(1)))
            .delete(&db)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Protected(_)));
        assert_eq!(Product::objects().count(&db).await.unwrap(), 2);

        let removed = Product::objects()
            .filter(Product::ID.eq(ProductId::new(2)))
            .delete(&db)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(CartItem::objects().count(&db).await.unwrap(), 0);
        let beauty = Collection::objects().get(&db).await.unwrap();
        assert_eq!(beauty.featured_product_id, None);

        let err = Collection::objects().delete(&db).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Protected(_)));
    }

    #[tokio::test]
    async fn test_update_validates_before_writing() {
        let store = MemoryStore::new(SCHEMA);
        let db = store_db(&store);
        let c = collection(&store, "Beauty").await;
        product(&store, "A", 10, 5, c).await;
        product(&store, "B", 10, 5, c).await;

        let err = Product::objects()
            .update(&db, [Product::COLLECTION_ID.set(CollectionId::new(42))])
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Integrity(_)));

        let changed = Product::objects()
            .filter(Product::INVENTORY.lt(10))
            .update(&db, [Product::INVENTORY.set_expr(Product::INVENTORY.expr() - Expr::lit(2))])
            .await
            .unwrap();
        assert_eq!(changed, 2);
        let stock: Vec<i32> = Product::objects()
            .values_list(&db, Product::INVENTORY)
            .await
            .unwrap();
        assert_eq!(stock, vec![3, 3]);
    }

    #[tokio::test]
    async fn test_concat_and_distinct_values() {
        let store = MemoryStore::new(SCHEMA);
        let db = store_db(&store);
        customer(&store, "Mosh", "m@example.com").await.unwrap();
        customer(&store, "John", "j@example.com").await.unwrap();

        let names = Customer::objects()
            .annotate(
                "full_name",
                Expr::concat([
                    Customer::FIRST_NAME.expr(),
                    Expr::lit(" "),
                    Customer::LAST_NAME.expr(),
                ]),
            )
            .order_by([Customer::FIRST_NAME.asc()])
            .annotated(&db)
            .await
            .unwrap();
        assert_eq!(names[0].get::<String>("full_name").unwrap(), "John Doe");

        let last_names = Customer::objects()
            .distinct()
            .values(&db, [Customer::LAST_NAME.field()])
            .await
            .unwrap();
        assert_eq!(last_names.len(), 1);
    }
}
