//! Fluent, stateful query builder.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::types::Value;

use super::expression::{Condition, Expression, OrderBy, Predicate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pending {
    field: String,
    negated: bool,
}

/// A single-use filter, ordering and paging description.
///
/// Tokens are appended left to right. `element` opens a predicate, a
/// terminal operator closes it, and connectives sit between predicates.
/// The builder checks only local syntax; whole-sequence validity is left to
/// the consuming backend.
///
/// # Examples
///
/// ```
/// use helios_storage_spi::query::Query;
///
/// let mut query = Query::new();
/// query
///     .element("age")?.greater(18)?
///     .and()?
///     .open_paren()?
///     .element("city")?.equal("Oslo")?
///     .or()?
///     .element("city")?.not()?.is_null()?
///     .close_paren()?
///     .order(&["age DESC", "name"])?
///     .limit(10)?;
///
/// assert_eq!(query.expressions().len(), 7);
/// assert_eq!(query.result_limit(), Some(10));
/// # Ok::<(), helios_storage_spi::StorageError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    expressions: Vec<Expression>,
    current: Option<Pending>,
    ordering: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Query {
    /// Creates an empty query matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a predicate on the named field.
    pub fn element(&mut self, name: impl Into<String>) -> StorageResult<&mut Self> {
        if self.current.is_some() {
            return Err(StorageError::illegal_state("previous expression is unfinished"));
        }
        let field = name.into();
        if field.trim().is_empty() {
            return Err(StorageError::illegal_argument("element name must not be empty"));
        }
        self.current = Some(Pending {
            field,
            negated: false,
        });
        Ok(self)
    }

    /// Negates the pending predicate. Two negations cancel out.
    pub fn not(&mut self) -> StorageResult<&mut Self> {
        match self.current.as_mut() {
            Some(pending) => {
                pending.negated = !pending.negated;
                Ok(self)
            }
            None => Err(StorageError::illegal_state("element name should be first")),
        }
    }

    /// Completes the pending predicate with `field = value`.
    pub fn equal(&mut self, value: impl Into<Value>) -> StorageResult<&mut Self> {
        let value = non_null(value.into(), "equal")?;
        self.finish(Condition::Equal(value))
    }

    /// Completes the pending predicate with `field > value`.
    pub fn greater(&mut self, value: impl Into<Value>) -> StorageResult<&mut Self> {
        let value = non_null(value.into(), "greater")?;
        self.finish(Condition::Greater(value))
    }

    /// Completes the pending predicate with `field >= value`.
    pub fn greater_equal(&mut self, value: impl Into<Value>) -> StorageResult<&mut Self> {
        let value = non_null(value.into(), "greater_equal")?;
        self.finish(Condition::GreaterEqual(value))
    }

    /// Completes the pending predicate with `field < value`.
    pub fn less(&mut self, value: impl Into<Value>) -> StorageResult<&mut Self> {
        let value = non_null(value.into(), "less")?;
        self.finish(Condition::Less(value))
    }

    /// Completes the pending predicate with `field <= value`.
    pub fn less_equal(&mut self, value: impl Into<Value>) -> StorageResult<&mut Self> {
        let value = non_null(value.into(), "less_equal")?;
        self.finish(Condition::LessEqual(value))
    }

    /// Completes the pending predicate with an inclusive range.
    pub fn between(
        &mut self,
        begin: impl Into<Value>,
        end: impl Into<Value>,
    ) -> StorageResult<&mut Self> {
        let begin = non_null(begin.into(), "between")?;
        let end = non_null(end.into(), "between")?;
        self.finish(Condition::Between(begin, end))
    }

    /// Completes the pending predicate with set membership.
    pub fn in_values<I, V>(&mut self, values: I) -> StorageResult<&mut Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values
            .into_iter()
            .map(|v| non_null(v.into(), "in"))
            .collect::<StorageResult<Vec<_>>>()?;
        if values.is_empty() {
            return Err(StorageError::illegal_argument("in() requires at least one value"));
        }
        self.finish(Condition::In(values))
    }

    /// Completes the pending predicate with a null check.
    pub fn is_null(&mut self) -> StorageResult<&mut Self> {
        self.finish(Condition::IsNull)
    }

    /// Completes the pending predicate with a not-null check.
    pub fn is_not_null(&mut self) -> StorageResult<&mut Self> {
        self.finish(Condition::IsNotNull)
    }

    /// Appends a conjunction.
    pub fn and(&mut self) -> StorageResult<&mut Self> {
        self.connective(Expression::And)
    }

    /// Appends a disjunction.
    pub fn or(&mut self) -> StorageResult<&mut Self> {
        self.connective(Expression::Or)
    }

    /// Appends an opening parenthesis.
    pub fn open_paren(&mut self) -> StorageResult<&mut Self> {
        self.expressions.push(Expression::OpenParen);
        Ok(self)
    }

    /// Appends a closing parenthesis.
    pub fn close_paren(&mut self) -> StorageResult<&mut Self> {
        self.expressions.push(Expression::CloseParen);
        Ok(self)
    }

    /// Limits the number of returned records.
    pub fn limit(&mut self, limit: i64) -> StorageResult<&mut Self> {
        let limit = u64::try_from(limit)
            .map_err(|_| StorageError::illegal_argument(format!("negative limit: {}", limit)))?;
        self.limit = Some(limit);
        Ok(self)
    }

    /// Skips the given number of records.
    pub fn offset(&mut self, offset: i64) -> StorageResult<&mut Self> {
        let offset = u64::try_from(offset)
            .map_err(|_| StorageError::illegal_argument(format!("negative offset: {}", offset)))?;
        self.offset = Some(offset);
        Ok(self)
    }

    /// Replaces the ordering with entries of the form `"field"` or
    /// `"field ASC|DESC"`.
    pub fn order(&mut self, names: &[&str]) -> StorageResult<&mut Self> {
        let ordering = names
            .iter()
            .map(|name| {
                OrderBy::parse(name).ok_or_else(|| {
                    StorageError::illegal_argument(format!("invalid order entry '{}'", name))
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        self.ordering = ordering;
        Ok(self)
    }

    /// Returns the token sequence.
    pub fn expressions(&self) -> &[Expression] {
        &self.expressions
    }

    /// Returns the ordering.
    pub fn ordering(&self) -> &[OrderBy] {
        &self.ordering
    }

    /// Returns the limit, if set.
    pub fn result_limit(&self) -> Option<u64> {
        self.limit
    }

    /// Returns the offset, if set.
    pub fn result_offset(&self) -> Option<u64> {
        self.offset
    }

    /// Returns the field of the unfinished predicate, if any.
    pub fn pending_element(&self) -> Option<&str> {
        self.current.as_ref().map(|p| p.field.as_str())
    }

    /// Returns true if no predicate is waiting for an operator.
    pub fn is_complete(&self) -> bool {
        self.current.is_none()
    }

    fn finish(&mut self, condition: Condition) -> StorageResult<&mut Self> {
        let pending = self
            .current
            .take()
            .ok_or_else(|| StorageError::illegal_state("element name should be first"))?;
        self.expressions.push(Expression::Predicate(Predicate {
            field: pending.field,
            negated: pending.negated,
            condition,
        }));
        Ok(self)
    }

    fn connective(&mut self, token: Expression) -> StorageResult<&mut Self> {
        if self.current.is_some() {
            return Err(StorageError::illegal_state("previous expression is unfinished"));
        }
        self.expressions.push(token);
        Ok(self)
    }
}

fn non_null(value: Value, operator: &str) -> StorageResult<Value> {
    if value.is_null() {
        return Err(StorageError::illegal_argument(format!(
            "{}() does not accept a null value",
            operator
        )));
    }
    Ok(value)
}
