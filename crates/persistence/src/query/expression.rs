//! Expression tokens produced by the query builder.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::types::Value;

/// Comparison applied by a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "operand", rename_all = "kebab-case")]
pub enum Condition {
    /// Field equals the value.
    Equal(Value),
    /// Field is strictly greater than the value.
    Greater(Value),
    /// Field is greater than or equal to the value.
    GreaterEqual(Value),
    /// Field is strictly less than the value.
    Less(Value),
    /// Field is less than or equal to the value.
    LessEqual(Value),
    /// Field lies in the inclusive range.
    Between(Value, Value),
    /// Field equals one of the values.
    In(Vec<Value>),
    /// Field is null or absent.
    IsNull,
    /// Field is present and not null.
    IsNotNull,
}

impl Condition {
    /// Evaluates the condition against a field of a serialized record.
    ///
    /// A missing field behaves as `null`. Incomparable types never match.
    pub fn matches(&self, field: Option<&Json>) -> bool {
        let field = field.unwrap_or(&Json::Null);
        let cmp = |value: &Value| value.compare_json(field);
        match self {
            Condition::IsNull => field.is_null(),
            Condition::IsNotNull => !field.is_null(),
            _ if field.is_null() => false,
            Condition::Equal(v) => cmp(v) == Some(Ordering::Equal),
            Condition::Greater(v) => cmp(v) == Some(Ordering::Greater),
            Condition::GreaterEqual(v) => {
                matches!(cmp(v), Some(Ordering::Greater | Ordering::Equal))
            }
            Condition::Less(v) => cmp(v) == Some(Ordering::Less),
            Condition::LessEqual(v) => matches!(cmp(v), Some(Ordering::Less | Ordering::Equal)),
            Condition::Between(begin, end) => {
                matches!(cmp(begin), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(cmp(end), Some(Ordering::Less | Ordering::Equal))
            }
            Condition::In(values) => values.iter().any(|v| cmp(v) == Some(Ordering::Equal)),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Equal(v) => write!(f, "= {}", v),
            Condition::Greater(v) => write!(f, "> {}", v),
            Condition::GreaterEqual(v) => write!(f, ">= {}", v),
            Condition::Less(v) => write!(f, "< {}", v),
            Condition::LessEqual(v) => write!(f, "<= {}", v),
            Condition::Between(a, b) => write!(f, "BETWEEN {} AND {}", a, b),
            Condition::In(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "IN ({})", parts.join(", "))
            }
            Condition::IsNull => write!(f, "IS NULL"),
            Condition::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// A completed comparison on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Field name; dots address nested objects.
    pub field: String,
    /// Whether the outcome is inverted.
    pub negated: bool,
    /// The comparison.
    pub condition: Condition,
}

impl Predicate {
    /// Evaluates the predicate against a serialized record.
    pub fn matches(&self, record: &Json) -> bool {
        self.condition.matches(lookup(record, &self.field)) != self.negated
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "NOT ")?;
        }
        write!(f, "{} {}", self.field, self.condition)
    }
}

/// One token of a query's filter sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Expression {
    /// Boolean conjunction.
    And,
    /// Boolean disjunction.
    Or,
    /// Opening parenthesis.
    OpenParen,
    /// Closing parenthesis.
    CloseParen,
    /// Comparison predicate.
    Predicate(Predicate),
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::And => write!(f, "AND"),
            Expression::Or => write!(f, "OR"),
            Expression::OpenParen => write!(f, "("),
            Expression::CloseParen => write!(f, ")"),
            Expression::Predicate(p) => write!(f, "{}", p),
        }
    }
}

/// A sort key: field name and direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field to sort by.
    pub field: String,
    /// True for ascending order.
    pub ascending: bool,
}

impl OrderBy {
    /// Parses `"field"` or `"field ASC|DESC"` (direction is case-insensitive).
    ///
    /// Returns `None` for an empty name, an unknown direction or trailing
    /// tokens.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split_whitespace();
        let field = parts.next()?.to_string();
        let ascending = match parts.next() {
            None => true,
            Some(dir) if dir.eq_ignore_ascii_case("asc") => true,
            Some(dir) if dir.eq_ignore_ascii_case("desc") => false,
            Some(_) => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { field, ascending })
    }
}

impl From<(&str, bool)> for OrderBy {
    fn from((field, ascending): (&str, bool)) -> Self {
        Self {
            field: field.to_string(),
            ascending,
        }
    }
}

/// Resolves a dotted field path inside a serialized record.
pub(crate) fn lookup<'a>(record: &'a Json, path: &str) -> Option<&'a Json> {
    path.split('.').try_fold(record, |node, segment| node.get(segment))
}
