//! Typed column handles and expressions.
//!
//! Models expose their columns as associated constants:
//!
//! ```rust,ignore
//! Product::UNIT_PRICE.between(low, high)
//! Product::COLLECTION.then(Collection::TITLE).eq("Beauty".to_string())
//! Customer::ORDERS.count()
//! ```
//!
//! A `Col<M, T>` only accepts values of type `T`, so comparing a price with
//! a string does not compile. Everything lowers to the untyped [`Node`] /
//! [`Condition`] trees the executors understand.

use std::marker::PhantomData;
use std::ops::{Add, Div, Mul, Sub};

use chrono::{DateTime, Utc};

use super::filter::{CompareOp, Condition, Q, TextMatch};
use super::query::Subquery;
use super::value::Value;

/// Path to a column, possibly through forward relations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub path: Vec<&'static str>,
    pub name: &'static str,
}

impl FieldRef {
    /// A column of the queried model itself.
    #[must_use]
    pub const fn local(name: &'static str) -> Self {
        Self {
            path: Vec::new(),
            name,
        }
    }

    /// Result key, `collection__title` style.
    #[must_use]
    pub fn key(&self) -> String {
        let mut key = String::new();
        for hop in &self.path {
            key.push_str(hop);
            key.push_str("__");
        }
        key.push_str(self.name);
        key
    }
}

/// Arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggFunc {
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Avg => "AVG",
        }
    }
}

/// An aggregate, either over the rows of a query (`hops` empty) or, inside
/// an annotation, over the rows reached through to-many relations.
#[derive(Debug, Clone)]
pub struct AggregateExpr {
    pub func: AggFunc,
    pub hops: Vec<&'static str>,
    /// `None` counts rows.
    pub arg: Option<Node>,
    pub filter: Option<Condition>,
}

/// Untyped expression tree.
#[derive(Debug, Clone)]
pub enum Node {
    Field(FieldRef),
    Value(Value),
    Annotation(String),
    Binary {
        op: ArithOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Concat(Vec<Node>),
    Aggregate(Box<AggregateExpr>),
}

/// Sort key.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub node: Node,
    pub descending: bool,
}

impl OrderBy {
    /// The same key sorted the other way.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            node: self.node.clone(),
            descending: !self.descending,
        }
    }
}

/// Column assignment for bulk updates.
#[derive(Debug, Clone)]
pub struct Assignment<M> {
    pub(crate) column: FieldRef,
    pub(crate) value: Node,
    _marker: PhantomData<fn() -> M>,
}

// =============================================================================
// Columns
// =============================================================================

/// Column of model `M` holding values of type `T`.
pub struct Col<M, T> {
    path: Vec<&'static str>,
    name: &'static str,
    _marker: PhantomData<fn() -> (M, T)>,
}

impl<M, T> Clone for Col<M, T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<M, T> std::fmt::Debug for Col<M, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Col").field(&self.field().key()).finish()
    }
}

impl<M, T> Col<M, T> {
    /// Column declared on `M` itself.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            path: Vec::new(),
            name,
            _marker: PhantomData,
        }
    }

    /// Column name (last path segment).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Untyped reference to the column.
    #[must_use]
    pub fn field(&self) -> FieldRef {
        FieldRef {
            path: self.path.clone(),
            name: self.name,
        }
    }

    /// Use the column inside an expression.
    #[must_use]
    pub fn expr(&self) -> Expr<M> {
        Expr::from_node(Node::Field(self.field()))
    }

    /// Ascending sort key.
    #[must_use]
    pub fn asc(&self) -> OrderBy {
        OrderBy {
            node: Node::Field(self.field()),
            descending: false,
        }
    }

    /// Descending sort key.
    #[must_use]
    pub fn desc(&self) -> OrderBy {
        OrderBy {
            node: Node::Field(self.field()),
            descending: true,
        }
    }

    /// Assign the result of an expression in a bulk update.
    #[must_use]
    pub fn set_expr(&self, value: Expr<M>) -> Assignment<M> {
        Assignment {
            column: self.field(),
            value: value.node,
            _marker: PhantomData,
        }
    }
}

impl<M, T: Into<Value>> Col<M, T> {
    fn compare(&self, op: CompareOp, value: T) -> Q<M> {
        let value = value.into();
        let left = Node::Field(self.field());
        match (op, value.is_null()) {
            (CompareOp::Eq, true) => Q::new(Condition::IsNull {
                left,
                negated: false,
            }),
            (CompareOp::Ne, true) => Q::new(Condition::IsNull {
                left,
                negated: true,
            }),
            _ => Q::new(Condition::Compare {
                left,
                op,
                right: Node::Value(value),
            }),
        }
    }

    /// Equality. Comparing with `None` tests for `NULL`.
    #[must_use]
    pub fn eq(&self, value: T) -> Q<M> {
        self.compare(CompareOp::Eq, value)
    }

    #[must_use]
    pub fn ne(&self, value: T) -> Q<M> {
        self.compare(CompareOp::Ne, value)
    }

    #[must_use]
    pub fn gt(&self, value: T) -> Q<M> {
        self.compare(CompareOp::Gt, value)
    }

    #[must_use]
    pub fn gte(&self, value: T) -> Q<M> {
        self.compare(CompareOp::Gte, value)
    }

    #[must_use]
    pub fn lt(&self, value: T) -> Q<M> {
        self.compare(CompareOp::Lt, value)
    }

    #[must_use]
    pub fn lte(&self, value: T) -> Q<M> {
        self.compare(CompareOp::Lte, value)
    }

    /// Inclusive range.
    #[must_use]
    pub fn between(&self, low: T, high: T) -> Q<M> {
        Q::new(Condition::Range {
            left: Node::Field(self.field()),
            low: low.into(),
            high: high.into(),
        })
    }

    /// Membership in a list. An empty list matches nothing.
    #[must_use]
    pub fn is_in(&self, values: impl IntoIterator<Item = T>) -> Q<M> {
        Q::new(Condition::In {
            left: Node::Field(self.field()),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    /// Membership in the projected column of another query.
    #[must_use]
    pub fn in_subquery(&self, subquery: Subquery<T>) -> Q<M> {
        let (query, column) = subquery.into_parts();
        Q::new(Condition::InQuery {
            left: Node::Field(self.field()),
            query: Box::new(query),
            column,
        })
    }

    /// Assign a constant in a bulk update.
    #[must_use]
    pub fn set(&self, value: T) -> Assignment<M> {
        Assignment {
            column: self.field(),
            value: Node::Value(value.into()),
            _marker: PhantomData,
        }
    }
}

impl<M> Col<M, String> {
    fn text(&self, mode: TextMatch, needle: &str, case_insensitive: bool) -> Q<M> {
        Q::new(Condition::Text {
            left: Node::Field(self.field()),
            mode,
            needle: needle.to_owned(),
            case_insensitive,
        })
    }

    #[must_use]
    pub fn contains(&self, needle: &str) -> Q<M> {
        self.text(TextMatch::Contains, needle, false)
    }

    #[must_use]
    pub fn icontains(&self, needle: &str) -> Q<M> {
        self.text(TextMatch::Contains, needle, true)
    }

    #[must_use]
    pub fn starts_with(&self, needle: &str) -> Q<M> {
        self.text(TextMatch::StartsWith, needle, false)
    }

    #[must_use]
    pub fn istarts_with(&self, needle: &str) -> Q<M> {
        self.text(TextMatch::StartsWith, needle, true)
    }

    #[must_use]
    pub fn ends_with(&self, needle: &str) -> Q<M> {
        self.text(TextMatch::EndsWith, needle, false)
    }

    #[must_use]
    pub fn iends_with(&self, needle: &str) -> Q<M> {
        self.text(TextMatch::EndsWith, needle, true)
    }
}

impl<M, T> Col<M, Option<T>> {
    /// `IS NULL` when `is_null` is true, `IS NOT NULL` otherwise.
    #[must_use]
    pub fn is_null(&self, is_null: bool) -> Q<M> {
        Q::new(Condition::IsNull {
            left: Node::Field(self.field()),
            negated: !is_null,
        })
    }
}

impl<M> Col<M, DateTime<Utc>> {
    /// Calendar year (UTC) equals `year`.
    #[must_use]
    pub fn year(&self, year: i32) -> Q<M> {
        Q::new(Condition::Year {
            left: Node::Field(self.field()),
            year,
        })
    }
}

// =============================================================================
// Relations
// =============================================================================

/// Many-to-one relation from `M` to `T`.
pub struct ForeignKey<M, T> {
    prefix: Vec<&'static str>,
    name: &'static str,
    _marker: PhantomData<fn() -> (M, T)>,
}

impl<M, T> Clone for ForeignKey<M, T> {
    fn clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<M, T> ForeignKey<M, T> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            prefix: Vec::new(),
            name,
            _marker: PhantomData,
        }
    }

    /// Relation names from `M` to `T`.
    #[must_use]
    pub fn path(&self) -> Vec<&'static str> {
        let mut path = self.prefix.clone();
        path.push(self.name);
        path
    }

    /// A column of the related model, reached through this relation.
    #[must_use]
    pub fn then<U>(&self, col: Col<T, U>) -> Col<M, U> {
        let mut path = self.path();
        path.extend(col.path);
        Col {
            path,
            name: col.name,
            _marker: PhantomData,
        }
    }

    /// Chain another forward relation of the related model.
    #[must_use]
    pub fn join<U>(&self, next: ForeignKey<T, U>) -> ForeignKey<M, U> {
        let mut prefix = self.path();
        prefix.extend(next.prefix);
        ForeignKey {
            prefix,
            name: next.name,
            _marker: PhantomData,
        }
    }
}

/// One-to-many or many-to-many relation from `M` to `T`.
pub struct Many<M, T> {
    first: &'static str,
    rest: Vec<&'static str>,
    _marker: PhantomData<fn() -> (M, T)>,
}

impl<M, T> Clone for Many<M, T> {
    fn clone(&self) -> Self {
        Self {
            first: self.first,
            rest: self.rest.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M, T> Many<M, T> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            first: name,
            rest: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Relation names from `M` to `T`.
    #[must_use]
    pub fn hops(&self) -> Vec<&'static str> {
        let mut hops = vec![self.first];
        hops.extend(self.rest.iter().copied());
        hops
    }

    /// Continue through a to-many relation of `T`.
    #[must_use]
    pub fn via<U>(&self, next: Many<T, U>) -> Many<M, U> {
        let mut rest = self.rest.clone();
        rest.extend(next.hops());
        Many {
            first: self.first,
            rest,
            _marker: PhantomData,
        }
    }

    fn aggregate(&self, func: AggFunc, arg: Option<Node>, filter: Option<Q<T>>) -> Expr<M> {
        Expr::from_node(Node::Aggregate(Box::new(AggregateExpr {
            func,
            hops: self.hops(),
            arg,
            filter: filter.map(Q::into_condition),
        })))
    }

    /// Number of related rows.
    #[must_use]
    pub fn count(&self) -> Expr<M> {
        self.aggregate(AggFunc::Count, None, None)
    }

    /// Number of related rows matching `filter`.
    #[must_use]
    pub fn count_where(&self, filter: Q<T>) -> Expr<M> {
        self.aggregate(AggFunc::Count, None, Some(filter))
    }

    #[must_use]
    pub fn sum<U>(&self, col: Col<T, U>) -> Expr<M> {
        self.aggregate(AggFunc::Sum, Some(Node::Field(col.field())), None)
    }

    #[must_use]
    pub fn sum_where<U>(&self, col: Col<T, U>, filter: Q<T>) -> Expr<M> {
        self.aggregate(AggFunc::Sum, Some(Node::Field(col.field())), Some(filter))
    }

    /// Sum of an expression over the related rows.
    #[must_use]
    pub fn sum_of(&self, expr: Expr<T>, filter: Option<Q<T>>) -> Expr<M> {
        self.aggregate(AggFunc::Sum, Some(expr.node), filter)
    }

    #[must_use]
    pub fn min<U>(&self, col: Col<T, U>) -> Expr<M> {
        self.aggregate(AggFunc::Min, Some(Node::Field(col.field())), None)
    }

    #[must_use]
    pub fn max<U>(&self, col: Col<T, U>) -> Expr<M> {
        self.aggregate(AggFunc::Max, Some(Node::Field(col.field())), None)
    }

    #[must_use]
    pub fn avg<U>(&self, col: Col<T, U>) -> Expr<M> {
        self.aggregate(AggFunc::Avg, Some(Node::Field(col.field())), None)
    }

    /// At least one related row exists.
    #[must_use]
    pub fn exists(&self) -> Q<M> {
        Q::new(Condition::Exists {
            hops: self.hops(),
            filter: None,
        })
    }

    /// At least one related row matching `filter` exists.
    #[must_use]
    pub fn exists_where(&self, filter: Q<T>) -> Q<M> {
        Q::new(Condition::Exists {
            hops: self.hops(),
            filter: Some(Box::new(filter.into_condition())),
        })
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// Expression evaluated against rows of `M`.
pub struct Expr<M> {
    node: Node,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for Expr<M> {
    fn clone(&self) -> Self {
        Self::from_node(self.node.clone())
    }
}

impl<M> std::fmt::Debug for Expr<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.node.fmt(f)
    }
}

impl<M> Expr<M> {
    pub(crate) const fn from_node(node: Node) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    /// A constant.
    #[must_use]
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::from_node(Node::Value(value.into()))
    }

    /// Refer to an annotation added earlier on the same query.
    #[must_use]
    pub fn annotation(name: &str) -> Self {
        Self::from_node(Node::Annotation(name.to_owned()))
    }

    /// String concatenation; `NULL` parts contribute nothing.
    #[must_use]
    pub fn concat(parts: impl IntoIterator<Item = Self>) -> Self {
        Self::from_node(Node::Concat(parts.into_iter().map(|p| p.node).collect()))
    }

    #[must_use]
    pub const fn node(&self) -> &Node {
        &self.node
    }

    #[must_use]
    pub fn into_node(self) -> Node {
        self.node
    }

    fn compare(self, op: CompareOp, other: Self) -> Q<M> {
        Q::new(Condition::Compare {
            left: self.node,
            op,
            right: other.node,
        })
    }

    #[must_use]
    pub fn eq(self, other: Self) -> Q<M> {
        self.compare(CompareOp::Eq, other)
    }

    #[must_use]
    pub fn ne(self, other: Self) -> Q<M> {
        self.compare(CompareOp::Ne, other)
    }

    #[must_use]
    pub fn gt(self, other: Self) -> Q<M> {
        self.compare(CompareOp::Gt, other)
    }

    #[must_use]
    pub fn gte(self, other: Self) -> Q<M> {
        self.compare(CompareOp::Gte, other)
    }

    #[must_use]
    pub fn lt(self, other: Self) -> Q<M> {
        self.compare(CompareOp::Lt, other)
    }

    #[must_use]
    pub fn lte(self, other: Self) -> Q<M> {
        self.compare(CompareOp::Lte, other)
    }

    #[must_use]
    pub fn asc(self) -> OrderBy {
        OrderBy {
            node: self.node,
            descending: false,
        }
    }

    #[must_use]
    pub fn desc(self) -> OrderBy {
        OrderBy {
            node: self.node,
            descending: true,
        }
    }

    fn binary(self, op: ArithOp, rhs: Self) -> Self {
        Self::from_node(Node::Binary {
            op,
            left: Box::new(self.node),
            right: Box::new(rhs.node),
        })
    }
}

impl<M> Add for Expr<M> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.binary(ArithOp::Add, rhs)
    }
}

impl<M> Sub for Expr<M> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.binary(ArithOp::Sub, rhs)
    }
}

impl<M> Mul for Expr<M> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        self.binary(ArithOp::Mul, rhs)
    }
}

impl<M> Div for Expr<M> {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        self.binary(ArithOp::Div, rhs)
    }
}

/// Aggregate over the rows of a query, for `QuerySet::aggregate`.
pub struct Agg<M> {
    pub(crate) inner: AggregateExpr,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Agg<M> {
    const fn of(func: AggFunc, arg: Option<Node>) -> Self {
        Self {
            inner: AggregateExpr {
                func,
                hops: Vec::new(),
                arg,
                filter: None,
            },
            _marker: PhantomData,
        }
    }

    /// Number of rows.
    #[must_use]
    pub const fn count() -> Self {
        Self::of(AggFunc::Count, None)
    }

    #[must_use]
    pub fn sum<T>(col: Col<M, T>) -> Self {
        Self::of(AggFunc::Sum, Some(Node::Field(col.field())))
    }

    /// Sum of an expression, e.g. `quantity * unit_price`.
    #[must_use]
    pub fn sum_of(expr: Expr<M>) -> Self {
        Self::of(AggFunc::Sum, Some(expr.node))
    }

    #[must_use]
    pub fn min<T>(col: Col<M, T>) -> Self {
        Self::of(AggFunc::Min, Some(Node::Field(col.field())))
    }

    #[must_use]
    pub fn max<T>(col: Col<M, T>) -> Self {
        Self::of(AggFunc::Max, Some(Node::Field(col.field())))
    }

    #[must_use]
    pub fn avg<T>(col: Col<M, T>) -> Self {
        Self::of(AggFunc::Avg, Some(Node::Field(col.field())))
    }

    /// Only aggregate rows matching `filter`.
    #[must_use]
    pub fn filtered(mut self, filter: Q<M>) -> Self {
        self.inner.filter = Some(filter.into_condition());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Collection, Customer, Order, OrderItem, Product};

    #[test]
    fn test_then_builds_path() {
        let col = Product::COLLECTION.then(Collection::TITLE);
        assert_eq!(col.field().key(), "collection__title");
    }

    #[test]
    fn test_join_chains_relations() {
        let fk = OrderItem::ORDER.join(Order::CUSTOMER);
        assert_eq!(fk.path(), vec!["order", "customer"]);
        let col = fk.then(Customer::FIRST_NAME);
        assert_eq!(col.field().key(), "order__customer__first_name");
    }

    #[test]
    fn test_eq_none_is_null_check() {
        let q = Collection::FEATURED_PRODUCT_ID.eq(None);
        assert!(matches!(
            q.condition(),
            Condition::IsNull { negated: false, .. }
        ));
    }

    #[test]
    fn test_via_collects_hops() {
        let many = Customer::ORDERS.via(Order::ITEMS);
        assert_eq!(many.hops(), vec!["orders", "items"]);
        let expr = many.count();
        assert!(matches!(expr.node(), Node::Aggregate(agg) if agg.hops.len() == 2));
    }

    #[test]
    fn test_arithmetic_builds_binary_nodes() {
        let expr = OrderItem::QUANTITY.expr() * OrderItem::UNIT_PRICE.expr();
        assert!(matches!(
            expr.node(),
            Node::Binary {
                op: ArithOp::Mul,
                ..
            }
        ));
    }
}
