//! Query builder and evaluation tests.

mod common;

use common::*;
use helios_storage_spi::backends::memory::MemoryBackend;
use helios_storage_spi::core::{DataSource, DataSourceHandle, Provider};
use helios_storage_spi::error::{ErrorKind, StorageResult};
use helios_storage_spi::query::Query;

fn names(people: &DataSourceHandle<Person>, query: &Query) -> Vec<String> {
    people
        .cursor(None, None, query)
        .expect("query failed")
        .map(|p| p.expect("decode failed").name)
        .collect()
}

fn setup() -> (Provider<MemoryBackend>, DataSourceHandle<Person>) {
    let provider = memory_provider();
    let people = seeded_people(&provider);
    (provider, people)
}

// ============================================================================
// Builder Validation
// ============================================================================

#[test]
fn test_terminal_requires_element() {
    let mut query = Query::new();
    assert_kind(query.equal("Ann").map(|_| ()), ErrorKind::IllegalState);
    assert_kind(query.in_values(["Ann"]).map(|_| ()), ErrorKind::IllegalState);
    assert_kind(query.not().map(|_| ()), ErrorKind::IllegalState);
}

#[test]
fn test_connective_rejected_while_predicate_pending() {
    let mut query = Query::new();
    query.element("name").unwrap();
    assert_kind(query.and().map(|_| ()), ErrorKind::IllegalState);
    assert_kind(query.element("age").map(|_| ()), ErrorKind::IllegalState);
    assert_eq!(query.pending_element(), Some("name"));
}

#[test]
fn test_invalid_arguments() {
    let mut query = Query::new();
    assert_kind(query.limit(-1).map(|_| ()), ErrorKind::IllegalArgument);
    assert_kind(query.offset(-5).map(|_| ()), ErrorKind::IllegalArgument);
    assert_kind(query.element(" ").map(|_| ()), ErrorKind::IllegalArgument);
    assert_kind(query.order(&["age SIDEWAYS"]).map(|_| ()), ErrorKind::IllegalArgument);

    query.element("name").unwrap();
    let nothing: Vec<&str> = Vec::new();
    assert_kind(query.in_values(nothing).map(|_| ()), ErrorKind::IllegalArgument);
}

#[test]
fn test_unfinished_query_fails_at_execution() {
    let (_provider, people) = setup();
    let mut query = Query::new();
    query.element("age").unwrap();
    assert_kind(people.count(None, None, &query), ErrorKind::IllegalState);
}

#[test]
fn test_malformed_sequences_fail_at_execution() {
    let (_provider, people) = setup();

    let mut adjacent = Query::new();
    adjacent
        .element("age")
        .unwrap()
        .greater(30)
        .unwrap()
        .element("city")
        .unwrap()
        .equal("Oslo")
        .unwrap();
    assert_kind(
        people.cursor(None, None, &adjacent).map(|c| c.remaining()),
        ErrorKind::IllegalArgument,
    );

    let mut dangling = Query::new();
    dangling
        .element("age")
        .unwrap()
        .greater(30)
        .unwrap()
        .or()
        .unwrap();
    assert_kind(people.count(None, None, &dangling), ErrorKind::IllegalArgument);

    let mut unbalanced = Query::new();
    unbalanced
        .open_paren()
        .unwrap()
        .element("age")
        .unwrap()
        .greater(30)
        .unwrap();
    assert_kind(people.count(None, None, &unbalanced), ErrorKind::IllegalArgument);

    let mut stray = Query::new();
    stray
        .element("age")
        .unwrap()
        .greater(30)
        .unwrap()
        .close_paren()
        .unwrap();
    assert_kind(people.count(None, None, &stray), ErrorKind::IllegalArgument);
}

// ============================================================================
// Filtering
// ============================================================================

#[test]
fn test_empty_query_matches_everything() {
    let (_provider, people) = setup();
    assert_eq!(people.count(None, None, &Query::new()).unwrap(), 5);
}

#[test]
fn test_comparison_operators() -> StorageResult<()> {
    let (_provider, people) = setup();

    let mut query = Query::new();
    query.element("age")?.greater_equal(34)?.order(&["name"])?;
    assert_eq!(names(&people, &query), vec!["Ann", "Cid", "Dag"]);

    let mut query = Query::new();
    query.element("age")?.less(27)?;
    assert_eq!(names(&people, &query), vec!["Eva"]);

    let mut query = Query::new();
    query.element("age")?.between(20, 34)?.order(&["name"])?;
    assert_eq!(names(&people, &query), vec!["Ann", "Bob", "Cid"]);

    let mut query = Query::new();
    query
        .element("name")?
        .in_values(["Eva", "Ann", "Zed"])?
        .order(&["name"])?;
    assert_eq!(names(&people, &query), vec!["Ann", "Eva"]);
    Ok(())
}

#[test]
fn test_null_checks_and_negation() -> StorageResult<()> {
    let (_provider, people) = setup();

    let mut query = Query::new();
    query.element("city")?.is_null()?;
    assert_eq!(names(&people, &query), vec!["Dag"]);

    let mut query = Query::new();
    query.element("city")?.not()?.is_null()?;
    assert_eq!(people.count(None, None, &query)?, 4);

    // A null field never satisfies a comparison, so its negation holds.
    let mut query = Query::new();
    query.element("city")?.not()?.equal("Oslo")?.order(&["name"])?;
    assert_eq!(names(&people, &query), vec!["Bob", "Dag", "Eva"]);

    let mut query = Query::new();
    query.element("city")?.not()?.not()?.equal("Oslo")?;
    assert_eq!(people.count(None, None, &query)?, 2);
    Ok(())
}

#[test]
fn test_and_binds_tighter_than_or() -> StorageResult<()> {
    let (_provider, people) = setup();
    let mut query = Query::new();
    query
        .element("city")?
        .equal("Bergen")?
        .or()?
        .element("city")?
        .equal("Oslo")?
        .and()?
        .element("age")?
        .greater(30)?
        .order(&["name"])?;
    assert_eq!(names(&people, &query), vec!["Ann", "Bob", "Cid", "Eva"]);
    Ok(())
}

#[test]
fn test_parentheses_override_precedence() -> StorageResult<()> {
    let (_provider, people) = setup();
    let mut query = Query::new();
    query
        .open_paren()?
        .element("city")?
        .equal("Bergen")?
        .or()?
        .element("city")?
        .equal("Oslo")?
        .close_paren()?
        .and()?
        .element("age")?
        .greater(30)?
        .order(&["name"])?;
    assert_eq!(names(&people, &query), vec!["Ann", "Cid"]);
    Ok(())
}

// ============================================================================
// Ordering and Paging
// ============================================================================

#[test]
fn test_multi_field_ordering() -> StorageResult<()> {
    let (_provider, people) = setup();
    let mut query = Query::new();
    query.order(&["age DESC", "name"])?;
    assert_eq!(names(&people, &query), vec!["Dag", "Ann", "Cid", "Bob", "Eva"]);

    query.order(&["city", "name desc"])?;
    assert_eq!(names(&people, &query), vec!["Dag", "Eva", "Bob", "Cid", "Ann"]);
    Ok(())
}

#[test]
fn test_limit_and_offset() -> StorageResult<()> {
    let (_provider, people) = setup();
    let mut query = Query::new();
    query.order(&["name"])?.offset(1)?.limit(2)?;
    assert_eq!(names(&people, &query), vec!["Bob", "Cid"]);
    assert_eq!(people.count(None, None, &query)?, 2);

    query.offset(10)?;
    assert!(names(&people, &query).is_empty());
    Ok(())
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn test_query_sees_transaction_writes() -> StorageResult<()> {
    let (provider, people) = setup();
    let txn = provider.begin("t1")?;
    people.create(Some(&txn), None, &Person::new("p6", "Fay", 40).with_city("Oslo"))?;

    let mut query = Query::new();
    query.element("city")?.equal("Oslo")?;
    assert_eq!(people.count(Some(&txn), None, &query)?, 3);
    assert_eq!(people.count(None, None, &query)?, 2);

    provider.rollback(&txn)?;
    Ok(())
}
