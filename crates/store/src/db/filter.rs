//! Predicates.
//!
//! [`Q`] is the typed wrapper handed out by column handles; `&`, `|` and `!`
//! combine predicates over the same model. [`Condition`] is the untyped tree
//! both executors evaluate.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ops::{BitAnd, BitOr, Not};

use super::expr::{FieldRef, Node};
use super::query::Query;
use super::value::Value;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    /// Whether `left <op> right` holds given `left.cmp(right)`.
    #[must_use]
    pub const fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering.is_eq(),
            Self::Ne => ordering.is_ne(),
            Self::Gt => ordering.is_gt(),
            Self::Gte => ordering.is_ge(),
            Self::Lt => ordering.is_lt(),
            Self::Lte => ordering.is_le(),
        }
    }
}

/// Where a text needle must appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMatch {
    Contains,
    StartsWith,
    EndsWith,
}

impl TextMatch {
    /// `LIKE` pattern for `needle`, with `%`, `_` and `\` escaped.
    #[must_use]
    pub fn like_pattern(self, needle: &str) -> String {
        let mut escaped = String::with_capacity(needle.len() + 2);
        for ch in needle.chars() {
            if matches!(ch, '%' | '_' | '\\') {
                escaped.push('\\');
            }
            escaped.push(ch);
        }
        match self {
            Self::Contains => format!("%{escaped}%"),
            Self::StartsWith => format!("{escaped}%"),
            Self::EndsWith => format!("%{escaped}"),
        }
    }

    /// Evaluate the match in memory.
    #[must_use]
    pub fn matches(self, haystack: &str, needle: &str, case_insensitive: bool) -> bool {
        let (haystack, needle) = if case_insensitive {
            (haystack.to_lowercase(), needle.to_lowercase())
        } else {
            (haystack.to_owned(), needle.to_owned())
        };
        match self {
            Self::Contains => haystack.contains(&needle),
            Self::StartsWith => haystack.starts_with(&needle),
            Self::EndsWith => haystack.ends_with(&needle),
        }
    }
}

/// Untyped predicate tree.
#[derive(Debug, Clone)]
pub enum Condition {
    Compare {
        left: Node,
        op: CompareOp,
        right: Node,
    },
    In {
        left: Node,
        values: Vec<Value>,
    },
    InQuery {
        left: Node,
        query: Box<Query>,
        column: FieldRef,
    },
    Range {
        left: Node,
        low: Value,
        high: Value,
    },
    Text {
        left: Node,
        mode: TextMatch,
        needle: String,
        case_insensitive: bool,
    },
    IsNull {
        left: Node,
        negated: bool,
    },
    Year {
        left: Node,
        year: i32,
    },
    Exists {
        hops: Vec<&'static str>,
        filter: Option<Box<Condition>>,
    },
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

/// Predicate over rows of `M`.
pub struct Q<M> {
    condition: Condition,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Clone for Q<M> {
    fn clone(&self) -> Self {
        Self::new(self.condition.clone())
    }
}

impl<M> std::fmt::Debug for Q<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.condition.fmt(f)
    }
}

impl<M> Q<M> {
    pub(crate) const fn new(condition: Condition) -> Self {
        Self {
            condition,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub const fn condition(&self) -> &Condition {
        &self.condition
    }

    #[must_use]
    pub fn into_condition(self) -> Condition {
        self.condition
    }

    /// Conjunction of all predicates; `None` when the iterator is empty.
    pub fn all(predicates: impl IntoIterator<Item = Self>) -> Option<Self> {
        predicates.into_iter().reduce(|acc, q| acc & q)
    }

    /// Disjunction of all predicates; `None` when the iterator is empty.
    pub fn any(predicates: impl IntoIterator<Item = Self>) -> Option<Self> {
        predicates.into_iter().reduce(|acc, q| acc | q)
    }
}

impl<M> BitAnd for Q<M> {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        let mut parts = match self.condition {
            Condition::And(parts) => parts,
            other => vec![other],
        };
        match rhs.condition {
            Condition::And(more) => parts.extend(more),
            other => parts.push(other),
        }
        Self::new(Condition::And(parts))
    }
}

impl<M> BitOr for Q<M> {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        let mut parts = match self.condition {
            Condition::Or(parts) => parts,
            other => vec![other],
        };
        match rhs.condition {
            Condition::Or(more) => parts.extend(more),
            other => parts.push(other),
        }
        Self::new(Condition::Or(parts))
    }
}

impl<M> Not for Q<M> {
    type Output = Self;

    fn not(self) -> Self {
        match self.condition {
            Condition::Not(inner) => Self::new(*inner),
            other => Self::new(Condition::Not(Box::new(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Product;
    use rust_decimal::Decimal;

    #[test]
    fn test_and_flattens() {
        let q = Product::INVENTORY.lt(10)
            & Product::UNIT_PRICE.lt(Decimal::from(20))
            & Product::TITLE.contains("coffee");
        match q.condition() {
            Condition::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_double_negation_cancels() {
        let q = !!Product::INVENTORY.lt(10);
        assert!(matches!(q.condition(), Condition::Compare { .. }));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(TextMatch::Contains.like_pattern("50%_off"), r"%50\%\_off%");
        assert_eq!(TextMatch::StartsWith.like_pattern("a"), "a%");
        assert_eq!(TextMatch::EndsWith.like_pattern("a"), "%a");
    }

    #[test]
    fn test_text_match_in_memory() {
        assert!(TextMatch::StartsWith.matches("Mosh", "mo", true));
        assert!(!TextMatch::StartsWith.matches("Mosh", "mo", false));
        assert!(TextMatch::Contains.matches("Coffee - Decaf", "Decaf", false));
    }

    #[test]
    fn test_any_and_all_of_empty() {
        assert!(Q::<Product>::all(Vec::new()).is_none());
        assert!(Q::any(vec![Product::INVENTORY.lt(1)]).is_some());
    }
}
