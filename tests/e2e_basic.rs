//! End-to-end integration tests for the full Cypher pipeline.
//!
//! Each test exercises: tokenize -> parse -> translate/interpret -> SQLite.
//! Everything goes through the public `Database` handle.

use leangraph::{Database, Node, PropertyMap, Value};
use pretty_assertions::assert_eq;

fn db() -> Database {
    Database::open_memory().unwrap()
}

fn run(db: &Database, query: &str) -> leangraph::QueryResult {
    db.execute(query, PropertyMap::new()).unwrap()
}

// ============================================================================
// 1. CREATE a node, then MATCH it back
// ============================================================================

#[test]
fn test_create_and_query_node() {
    let db = db();
    run(&db, "CREATE (n:Person)");

    let result = run(&db, "MATCH (n:Person) RETURN n");
    assert_eq!(result.columns, vec!["n"]);
    assert_eq!(result.rows.len(), 1);

    let node: Node = result.rows[0].get("n").unwrap();
    assert!(node.has_label("Person"));
}

// ============================================================================
// 2. CREATE with properties, query back properties
// ============================================================================

#[test]
fn test_create_with_properties() {
    let db = db();
    run(&db, "CREATE (n:Person {name: 'Ada', age: 3})");

    let result = run(&db, "MATCH (n:Person) RETURN n");
    assert_eq!(result.rows.len(), 1);
    let node: Node = result.rows[0].get("n").unwrap();
    assert_eq!(node.get("name"), Some(&Value::String("Ada".into())));
    assert_eq!(node.get("age"), Some(&Value::Int(3)));
}

// ============================================================================
// 3. Multi-label create and labels() accessor
// ============================================================================

#[test]
fn test_multi_label_create_round_trip() {
    let db = db();
    let result = run(
        &db,
        "CREATE (n:Person:Employee {name: 'Alice', age: 30}) RETURN labels(n) AS l, n.age AS a",
    );
    assert_eq!(result.rows.len(), 1);
    assert_eq!(
        result.rows[0].get_value("l"),
        Some(&Value::List(vec![
            Value::String("Person".into()),
            Value::String("Employee".into()),
        ]))
    );
    assert_eq!(result.rows[0].get::<i64>("a").unwrap(), 30);
}

// ============================================================================
// 4. WHERE filtering
// ============================================================================

#[test]
fn test_match_with_where_filter() {
    let db = db();
    run(&db, "CREATE (n:Person {name: 'Ada', age: 3})");
    run(&db, "CREATE (n:Person {name: 'Bob', age: 30})");
    run(&db, "CREATE (n:Person {name: 'Charlie', age: 25})");

    let result = run(&db, "MATCH (n:Person) WHERE n.age > 10 RETURN n.name AS name ORDER BY name");
    let names: Vec<String> = result.rows.iter().map(|r| r.get("name").unwrap()).collect();
    assert_eq!(names, vec!["Bob".to_string(), "Charlie".to_string()]);
}

// ============================================================================
// 5. Parameters are honored (and never spliced into SQL)
// ============================================================================

#[test]
fn test_query_parameters() {
    let db = db();
    let mut params = PropertyMap::new();
    params.insert("name".into(), Value::from("O'Brien; DROP TABLE nodes"));
    db.execute("CREATE (n:Person {name: $name, age: 1})", params.clone()).unwrap();

    let result = db
        .execute("MATCH (n:Person {name: $name}) RETURN n.age AS a", params)
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<i64>("a").unwrap(), 1);
}

// ============================================================================
// 6. Property round-trip: nested values and type fidelity
// ============================================================================

#[test]
fn test_property_round_trip_nested() {
    let db = db();
    run(
        &db,
        "CREATE (n:Doc {name: 'x', tags: ['a', 'b'], meta: {k: 1}, flag: true})",
    );

    let result = run(
        &db,
        "MATCH (n:Doc) RETURN n.tags AS tags, n.meta AS meta, n.flag AS flag",
    );
    assert_eq!(
        result.rows[0].get_value("tags"),
        Some(&Value::List(vec![Value::String("a".into()), Value::String("b".into())]))
    );
    let meta: PropertyMap = result.rows[0].get("meta").unwrap();
    assert_eq!(meta.get("k"), Some(&Value::Int(1)));
    assert_eq!(result.rows[0].get_value("flag"), Some(&Value::Bool(true)));
}

#[test]
fn test_large_integer_not_narrowed() {
    let db = db();
    run(&db, "CREATE (n:Big {v: 9007199254740993})");
    let result = run(&db, "MATCH (n:Big) RETURN n.v AS v");
    assert_eq!(result.rows[0].get::<i64>("v").unwrap(), 9_007_199_254_740_993);
}

#[test]
fn test_string_that_looks_like_json_stays_a_string() {
    let db = db();
    run(&db, "CREATE (n:SJ {s: 'true', t: '42'})");
    let result = run(&db, "MATCH (n:SJ) RETURN n.s AS s, n.t AS t");
    assert_eq!(result.rows[0].get_value("s"), Some(&Value::String("true".into())));
    assert_eq!(result.rows[0].get_value("t"), Some(&Value::String("42".into())));
}

// ============================================================================
// 7. Column naming: AS alias, else normalized source text
// ============================================================================

#[test]
fn test_column_naming() {
    let db = db();
    run(&db, "CREATE (n:CN {age: 7})");

    let result = run(&db, "MATCH (n:CN) RETURN n.age, n.age   +   1 AS next");
    assert_eq!(result.columns, vec!["n.age", "next"]);
    assert_eq!(result.rows[0].get::<i64>("n.age").unwrap(), 7);
    assert_eq!(result.rows[0].get::<i64>("next").unwrap(), 8);
}

// ============================================================================
// 8. ORDER BY / SKIP / LIMIT
// ============================================================================

#[test]
fn test_order_skip_limit() {
    let db = db();
    for age in [9, 30, 11, 2] {
        run(&db, &format!("CREATE (n:OS {{age: {age}}})"));
    }

    let result = run(&db, "MATCH (n:OS) RETURN n.age AS age ORDER BY age DESC SKIP 1 LIMIT 2");
    let ages: Vec<i64> = result.rows.iter().map(|r| r.get("age").unwrap()).collect();
    // Numeric ordering, not lexicographic: 30, [11, 9], 2
    assert_eq!(ages, vec![11, 9]);
}

// ============================================================================
// 9. RETURN * and RETURN of constants
// ============================================================================

#[test]
fn test_return_star() {
    let db = db();
    run(&db, "CREATE (a:RS {v: 1})");
    let result = run(&db, "MATCH (a:RS) RETURN *");
    assert_eq!(result.columns, vec!["a"]);
    let node: Node = result.rows[0].get("a").unwrap();
    assert_eq!(node.get("v"), Some(&Value::Int(1)));
}

#[test]
fn test_return_constants() {
    let db = db();
    let result = run(
        &db,
        "RETURN 1 + 2 AS sum, 'a' + 'b' AS s, true AS b, [1, 2] AS l, null AS n",
    );
    let row = &result.rows[0];
    assert_eq!(row.get::<i64>("sum").unwrap(), 3);
    assert_eq!(row.get::<String>("s").unwrap(), "ab");
    assert_eq!(row.get_value("b"), Some(&Value::Bool(true)));
    assert_eq!(row.get_value("l"), Some(&Value::List(vec![Value::Int(1), Value::Int(2)])));
    assert_eq!(row.get_value("n"), Some(&Value::Null));
}

// ============================================================================
// 10. Result metadata
// ============================================================================

#[test]
fn test_meta_and_stats() {
    let db = db();
    let created = run(&db, "CREATE (n:MS {v: 1}) RETURN n");
    assert_eq!(created.stats.nodes_created, 1);
    assert_eq!(created.meta.count, 1);

    let empty = run(&db, "MATCH (n:Nothing) RETURN n");
    assert_eq!(empty.meta.count, 0);
    assert!(empty.rows.is_empty());
}

// ============================================================================
// 11. Backtick identifiers
// ============================================================================

#[test]
fn test_backtick_identifiers() {
    let db = db();
    run(&db, "CREATE (n:`Weird Label` {`strange key`: 1})");
    let result = run(&db, "MATCH (n:`Weird Label`) RETURN n.`strange key` AS v");
    assert_eq!(result.rows[0].get::<i64>("v").unwrap(), 1);
}

// ============================================================================
// 12. UNION and UNION ALL
// ============================================================================

#[test]
fn test_union_and_union_all() {
    let db = db();
    run(&db, "CREATE (a:UA {x: 1})");
    run(&db, "CREATE (b:UB {y: 1})");

    let all = run(&db, "MATCH (a:UA) RETURN a.x AS v UNION ALL MATCH (b:UB) RETURN b.y AS v");
    assert_eq!(all.rows.len(), 2);

    let deduped = run(&db, "MATCH (a:UA) RETURN a.x AS v UNION MATCH (b:UB) RETURN b.y AS v");
    assert_eq!(deduped.rows.len(), 1);
    assert_eq!(deduped.rows[0].get::<i64>("v").unwrap(), 1);
}
