//! Evaluation of a [`Query`] against serialized records.
//!
//! The builder accepts any locally well-formed token sequence. The evaluator
//! is where the whole sequence is checked: it parses the tokens into a
//! filter tree with precedence `NOT` > `AND` > `OR`, honouring parentheses,
//! and rejects malformed sequences with `IllegalArgument`.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::slice::Iter;

use serde_json::Value as Json;

use crate::error::{StorageError, StorageResult};

use super::builder::Query;
use super::expression::{Expression, OrderBy, Predicate, lookup};

/// A parsed boolean filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every record.
    All,
    /// A single predicate.
    Predicate(Predicate),
    /// All children must match.
    And(Vec<Filter>),
    /// At least one child must match.
    Or(Vec<Filter>),
}

impl Filter {
    /// Evaluates the filter against a serialized record.
    pub fn matches(&self, record: &Json) -> bool {
        match self {
            Filter::All => true,
            Filter::Predicate(p) => p.matches(record),
            Filter::And(children) => children.iter().all(|c| c.matches(record)),
            Filter::Or(children) => children.iter().any(|c| c.matches(record)),
        }
    }
}

/// A compiled query ready to run over in-memory records.
#[derive(Debug, Clone)]
pub struct QueryEvaluator {
    filter: Filter,
    ordering: Vec<OrderBy>,
    limit: Option<u64>,
    offset: u64,
}

impl QueryEvaluator {
    /// Compiles a query.
    ///
    /// # Errors
    ///
    /// `IllegalState` if a predicate is still pending, `IllegalArgument` if
    /// the token sequence is not a valid boolean expression.
    pub fn compile(query: &Query) -> StorageResult<Self> {
        if let Some(field) = query.pending_element() {
            return Err(StorageError::illegal_state(format!(
                "previous expression is unfinished: '{}'",
                field
            )));
        }
        let filter = parse(query.expressions())?;
        Ok(Self {
            filter,
            ordering: query.ordering().to_vec(),
            limit: query.result_limit(),
            offset: query.result_offset().unwrap_or(0),
        })
    }

    /// Returns the parsed filter.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Evaluates the filter against one record.
    pub fn matches(&self, record: &Json) -> bool {
        self.filter.matches(record)
    }

    /// Filters, sorts and pages a set of records.
    pub fn apply<T, F>(&self, records: Vec<T>, json: F) -> Vec<T>
    where
        F: Fn(&T) -> &Json,
    {
        let mut selected: Vec<T> = records
            .into_iter()
            .filter(|r| self.filter.matches(json(r)))
            .collect();
        if !self.ordering.is_empty() {
            selected.sort_by(|a, b| compare_records(json(a), json(b), &self.ordering));
        }
        let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
        let limit = self
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        selected.into_iter().skip(offset).take(limit).collect()
    }
}

fn compare_records(a: &Json, b: &Json, ordering: &[OrderBy]) -> Ordering {
    for order in ordering {
        let cmp = compare_fields(lookup(a, &order.field), lookup(b, &order.field));
        let cmp = if order.ascending { cmp } else { cmp.reverse() };
        if cmp != Ordering::Equal {
            return cmp;
        }
    }
    Ordering::Equal
}

/// Total order over JSON field values; missing and null sort first.
fn compare_fields(a: Option<&Json>, b: Option<&Json>) -> Ordering {
    let a = a.unwrap_or(&Json::Null);
    let b = b.unwrap_or(&Json::Null);
    match (a, b) {
        (Json::Null, Json::Null) => Ordering::Equal,
        (Json::Null, _) => Ordering::Less,
        (_, Json::Null) => Ordering::Greater,
        (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
        (Json::Number(x), Json::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        },
        (Json::String(x), Json::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)).then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

fn rank(value: &Json) -> u8 {
    match value {
        Json::Null => 0,
        Json::Bool(_) => 1,
        Json::Number(_) => 2,
        Json::String(_) => 3,
        Json::Array(_) => 4,
        Json::Object(_) => 5,
    }
}

fn parse(tokens: &[Expression]) -> StorageResult<Filter> {
    if tokens.is_empty() {
        return Ok(Filter::All);
    }
    let mut iter = tokens.iter().peekable();
    let filter = parse_or(&mut iter)?;
    match iter.next() {
        None => Ok(filter),
        Some(Expression::CloseParen) => Err(malformed("unbalanced ')'")),
        Some(token) => Err(malformed(&format!("unexpected '{}'", token))),
    }
}

type Tokens<'a> = Peekable<Iter<'a, Expression>>;

fn parse_or(tokens: &mut Tokens<'_>) -> StorageResult<Filter> {
    let mut children = vec![parse_and(tokens)?];
    while matches!(tokens.peek(), Some(Expression::Or)) {
        tokens.next();
        children.push(parse_and(tokens)?);
    }
    Ok(collapse(children, Filter::Or))
}

fn parse_and(tokens: &mut Tokens<'_>) -> StorageResult<Filter> {
    let mut children = vec![parse_operand(tokens)?];
    while matches!(tokens.peek(), Some(Expression::And)) {
        tokens.next();
        children.push(parse_operand(tokens)?);
    }
    Ok(collapse(children, Filter::And))
}

fn parse_operand(tokens: &mut Tokens<'_>) -> StorageResult<Filter> {
    match tokens.next() {
        Some(Expression::Predicate(p)) => Ok(Filter::Predicate(p.clone())),
        Some(Expression::OpenParen) => {
            let inner = parse_or(tokens)?;
            match tokens.next() {
                Some(Expression::CloseParen) => Ok(inner),
                Some(token) => Err(malformed(&format!("expected ')' but found '{}'", token))),
                None => Err(malformed("unbalanced '('")),
            }
        }
        Some(token) => Err(malformed(&format!("expected a predicate but found '{}'", token))),
        None => Err(malformed("expression ends with a dangling connective")),
    }
}

fn collapse(mut children: Vec<Filter>, wrap: fn(Vec<Filter>) -> Filter) -> Filter {
    if children.len() == 1 {
        children.remove(0)
    } else {
        wrap(children)
    }
}

fn malformed(detail: &str) -> StorageError {
    StorageError::illegal_argument(format!("malformed query: {}", detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn people() -> Vec<Json> {
        vec![
            json!({"name": "ann", "age": 31, "city": "Oslo"}),
            json!({"name": "bob", "age": 17, "city": "Bergen"}),
            json!({"name": "cid", "age": 45}),
            json!({"name": "dee", "age": 31, "city": "Bergen"}),
        ]
    }

    fn names(records: &[Json]) -> Vec<&str> {
        records.iter().filter_map(|r| r["name"].as_str()).collect()
    }

    #[test]
    fn test_empty_query_matches_all() {
        let evaluator = QueryEvaluator::compile(&Query::new()).unwrap();
        assert_eq!(evaluator.filter(), &Filter::All);
        assert_eq!(evaluator.apply(people(), |r| r).len(), 4);
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        // city = Oslo OR city = Bergen AND age > 18
        let mut query = Query::new();
        query
            .element("city")
            .unwrap()
            .equal("Oslo")
            .unwrap()
            .or()
            .unwrap()
            .element("city")
            .unwrap()
            .equal("Bergen")
            .unwrap()
            .and()
            .unwrap()
            .element("age")
            .unwrap()
            .greater(18)
            .unwrap();
        let evaluator = QueryEvaluator::compile(&query).unwrap();
        assert_eq!(names(&evaluator.apply(people(), |r| r)), vec!["ann", "dee"]);
    }

    #[test]
    fn test_parentheses_override_precedence() {
        // (city = Oslo OR city = Bergen) AND age < 20
        let mut query = Query::new();
        query
            .open_paren()
            .unwrap()
            .element("city")
            .unwrap()
            .equal("Oslo")
            .unwrap()
            .or()
            .unwrap()
            .element("city")
            .unwrap()
            .equal("Bergen")
            .unwrap()
            .close_paren()
            .unwrap()
            .and()
            .unwrap()
            .element("age")
            .unwrap()
            .less(20)
            .unwrap();
        let evaluator = QueryEvaluator::compile(&query).unwrap();
        assert_eq!(names(&evaluator.apply(people(), |r| r)), vec!["bob"]);
    }

    #[test]
    fn test_malformed_sequences_rejected() {
        let mut unbalanced = Query::new();
        unbalanced
            .open_paren()
            .unwrap()
            .element("a")
            .unwrap()
            .equal(1)
            .unwrap();
        let err = QueryEvaluator::compile(&unbalanced).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);

        let mut dangling = Query::new();
        dangling
            .element("a")
            .unwrap()
            .equal(1)
            .unwrap()
            .and()
            .unwrap();
        assert_eq!(
            QueryEvaluator::compile(&dangling).unwrap_err().kind(),
            ErrorKind::IllegalArgument
        );

        let mut adjacent = Query::new();
        adjacent
            .element("a")
            .unwrap()
            .equal(1)
            .unwrap()
            .element("b")
            .unwrap()
            .equal(2)
            .unwrap();
        assert_eq!(
            QueryEvaluator::compile(&adjacent).unwrap_err().kind(),
            ErrorKind::IllegalArgument
        );

        let mut stray_close = Query::new();
        stray_close
            .element("a")
            .unwrap()
            .equal(1)
            .unwrap()
            .close_paren()
            .unwrap();
        assert_eq!(
            QueryEvaluator::compile(&stray_close).unwrap_err().kind(),
            ErrorKind::IllegalArgument
        );
    }

    #[test]
    fn test_unfinished_query_is_illegal_state() {
        let mut query = Query::new();
        query.element("a").unwrap();
        assert_eq!(
            QueryEvaluator::compile(&query).unwrap_err().kind(),
            ErrorKind::IllegalState
        );
    }

    #[test]
    fn test_ordering_and_paging() {
        let mut query = Query::new();
        query
            .order(&["city", "age DESC"])
            .unwrap()
            .offset(1)
            .unwrap()
            .limit(2)
            .unwrap();
        let evaluator = QueryEvaluator::compile(&query).unwrap();
        // Missing city sorts first: cid, then Bergen (dee 31, bob 17), then Oslo.
        assert_eq!(names(&evaluator.apply(people(), |r| r)), vec!["dee", "bob"]);
    }
}
