//! End-to-end integration tests for aggregation, grouping, and projection
//! pipelines (WITH, DISTINCT, list comprehensions).

use leangraph::{Database, PropertyMap, Value};
use pretty_assertions::assert_eq;

fn db() -> Database {
    Database::open_memory().unwrap()
}

fn run(db: &Database, query: &str) -> leangraph::QueryResult {
    db.execute(query, PropertyMap::new()).unwrap()
}

fn seed_people(db: &Database) {
    run(db, "CREATE (n:Person {name: 'Ada', age: 30, city: 'London'})");
    run(db, "CREATE (n:Person {name: 'Bob', age: 20, city: 'Oslo'})");
    run(db, "CREATE (n:Person {name: 'Cid', age: 40, city: 'Oslo'})");
}

// ============================================================================
// 1. Plain aggregates
// ============================================================================

#[test]
fn test_count_sum_avg_min_max() {
    let db = db();
    seed_people(&db);

    let result = run(
        &db,
        "MATCH (n:Person) RETURN count(*) AS c, sum(n.age) AS s, avg(n.age) AS a, \
         min(n.age) AS lo, max(n.age) AS hi",
    );
    let row = &result.rows[0];
    assert_eq!(row.get::<i64>("c").unwrap(), 3);
    assert_eq!(row.get::<i64>("s").unwrap(), 90);
    assert_eq!(row.get::<f64>("a").unwrap(), 30.0);
    assert_eq!(row.get::<i64>("lo").unwrap(), 20);
    assert_eq!(row.get::<i64>("hi").unwrap(), 40);
}

#[test]
fn test_count_over_empty_match_is_zero() {
    let db = db();
    let result = run(&db, "MATCH (n:Nothing) RETURN count(*) AS c");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 0);
}

// ============================================================================
// 2. Implicit GROUP BY over non-aggregated projections
// ============================================================================

#[test]
fn test_implicit_group_by() {
    let db = db();
    seed_people(&db);

    let result = run(
        &db,
        "MATCH (n:Person) RETURN n.city AS city, count(*) AS c ORDER BY city",
    );
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].get::<String>("city").unwrap(), "London");
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 1);
    assert_eq!(result.rows[1].get::<String>("city").unwrap(), "Oslo");
    assert_eq!(result.rows[1].get::<i64>("c").unwrap(), 2);
}

#[test]
fn test_mixed_aggregate_and_column_is_rejected() {
    let db = db();
    seed_people(&db);
    let err = db
        .execute("MATCH (n:Person) RETURN n.age + count(*) AS bad", PropertyMap::new())
        .unwrap_err();
    assert!(matches!(err, leangraph::Error::Semantic(_)));
}

// ============================================================================
// 3. collect() and DISTINCT
// ============================================================================

#[test]
fn test_collect() {
    let db = db();
    seed_people(&db);

    let result = run(
        &db,
        "MATCH (n:Person) WHERE n.city = 'Oslo' RETURN collect(n.name) AS names",
    );
    let names: Vec<Value> = result.rows[0].get("names").unwrap();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&Value::String("Bob".into())));
    assert!(names.contains(&Value::String("Cid".into())));
}

#[test]
fn test_count_distinct() {
    let db = db();
    seed_people(&db);

    let result = run(&db, "MATCH (n:Person) RETURN count(DISTINCT n.city) AS c");
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 2);
}

#[test]
fn test_return_distinct() {
    let db = db();
    seed_people(&db);

    let result = run(&db, "MATCH (n:Person) RETURN DISTINCT n.city AS city ORDER BY city");
    let cities: Vec<String> = result.rows.iter().map(|r| r.get("city").unwrap()).collect();
    assert_eq!(cities, vec!["London".to_string(), "Oslo".to_string()]);
}

// ============================================================================
// 4. Percentiles (interpreted aggregation)
// ============================================================================

#[test]
fn test_percentiles() {
    let db = db();
    for v in [10, 20, 30] {
        run(&db, &format!("CREATE (n:PC {{v: {v}}})"));
    }

    let disc = run(&db, "MATCH (n:PC) RETURN percentileDisc(n.v, 0.5) AS p");
    assert_eq!(disc.rows[0].get::<i64>("p").unwrap(), 20);

    let cont = run(&db, "MATCH (n:PC) RETURN percentileCont(n.v, 0.5) AS p");
    assert_eq!(cont.rows[0].get::<f64>("p").unwrap(), 20.0);
}

// ============================================================================
// 5. WITH pipelines
// ============================================================================

#[test]
fn test_with_projection_and_where() {
    let db = db();
    seed_people(&db);

    let result = run(
        &db,
        "MATCH (n:Person) WITH n.age AS age WHERE age > 25 RETURN sum(age) AS s",
    );
    assert_eq!(result.rows[0].get::<i64>("s").unwrap(), 70);
}

#[test]
fn test_with_aggregation_feeds_next_stage() {
    let db = db();
    seed_people(&db);

    let result = run(
        &db,
        "MATCH (n:Person) WITH n.city AS city, count(*) AS c WHERE c > 1 RETURN city",
    );
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<String>("city").unwrap(), "Oslo");
}

#[test]
fn test_with_order_limit_then_match() {
    let db = db();
    run(&db, "CREATE (a:MW {v: 1})");
    run(&db, "CREATE (b:MW {v: 2})");

    // Clause order is observable: the second MATCH runs against the WITH
    // projection (the single highest-v row).
    let result = run(
        &db,
        "MATCH (n:MW) WITH n ORDER BY n.v DESC LIMIT 1 \
         MATCH (m:MW) WHERE m.v < n.v RETURN m.v AS v",
    );
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<i64>("v").unwrap(), 1);
}

#[test]
fn test_with_distinct() {
    let db = db();
    seed_people(&db);

    let result = run(
        &db,
        "MATCH (n:Person) WITH DISTINCT n.city AS city RETURN count(*) AS c",
    );
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 2);
}

// ============================================================================
// 6. List comprehensions and list expressions
// ============================================================================

#[test]
fn test_list_comprehension_filter_and_map() {
    let db = db();
    let result = run(&db, "RETURN [x IN range(1, 5) WHERE x % 2 = 0 | x * 10] AS evens");
    assert_eq!(
        result.rows[0].get_value("evens"),
        Some(&Value::List(vec![Value::Int(20), Value::Int(40)]))
    );
}

#[test]
fn test_list_comprehension_over_property() {
    let db = db();
    run(&db, "CREATE (n:LC {xs: [1, 2, 3]})");
    let result = run(&db, "MATCH (n:LC) RETURN [x IN n.xs WHERE x > 1] AS big");
    assert_eq!(
        result.rows[0].get_value("big"),
        Some(&Value::List(vec![Value::Int(2), Value::Int(3)]))
    );
}

#[test]
fn test_list_concatenation() {
    let db = db();
    let result = run(&db, "RETURN [1, 2] + [3] AS l");
    assert_eq!(
        result.rows[0].get_value("l"),
        Some(&Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
    );
}

#[test]
fn test_list_predicates() {
    let db = db();
    run(&db, "CREATE (n:LP {name: 'yes', tags: ['a', 'b']})");
    run(&db, "CREATE (n:LP {name: 'no', tags: ['c']})");

    let any = run(
        &db,
        "MATCH (n:LP) WHERE ANY(x IN n.tags WHERE x = 'a') RETURN n.name AS name",
    );
    assert_eq!(any.rows.len(), 1);
    assert_eq!(any.rows[0].get::<String>("name").unwrap(), "yes");

    let none = run(
        &db,
        "MATCH (n:LP) WHERE NONE(x IN n.tags WHERE x = 'a') RETURN n.name AS name",
    );
    assert_eq!(none.rows.len(), 1);
    assert_eq!(none.rows[0].get::<String>("name").unwrap(), "no");

    let single = run(
        &db,
        "MATCH (n:LP) WHERE SINGLE(x IN n.tags WHERE x = 'c') RETURN n.name AS name",
    );
    assert_eq!(single.rows[0].get::<String>("name").unwrap(), "no");

    let all = run(
        &db,
        "MATCH (n:LP) WHERE ALL(x IN n.tags WHERE x <> 'z') RETURN count(*) AS c",
    );
    assert_eq!(all.rows[0].get::<i64>("c").unwrap(), 2);
}

// ============================================================================
// 7. UNWIND as a read-side row source
// ============================================================================

#[test]
fn test_unwind_read_only() {
    let db = db();
    let result = run(&db, "UNWIND [3, 1, 2] AS x RETURN x ORDER BY x");
    let xs: Vec<i64> = result.rows.iter().map(|r| r.get("x").unwrap()).collect();
    assert_eq!(xs, vec![1, 2, 3]);
}

#[test]
fn test_unwind_aggregates() {
    let db = db();
    let result = run(&db, "UNWIND [1, 2, 3, 4] AS x RETURN sum(x) AS s, count(x) AS c");
    assert_eq!(result.rows[0].get::<i64>("s").unwrap(), 10);
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 4);
}

// ============================================================================
// 8. Introspection procedures
// ============================================================================

#[test]
fn test_call_db_labels() {
    let db = db();
    run(&db, "CREATE (a:Alpha {x: 1})");
    run(&db, "CREATE (b:Beta {y: 2})");

    let result = run(&db, "CALL db.labels() YIELD label RETURN label ORDER BY label");
    let labels: Vec<String> = result.rows.iter().map(|r| r.get("label").unwrap()).collect();
    assert_eq!(labels, vec!["Alpha".to_string(), "Beta".to_string()]);
}

#[test]
fn test_call_relationship_types_and_property_keys() {
    let db = db();
    run(&db, "CREATE (a:CA {x: 1})-[:REL {w: 2}]->(b:CB {y: 3})");

    let types = run(&db, "CALL db.relationshipTypes()");
    assert_eq!(types.columns, vec!["relationshipType"]);
    assert_eq!(types.rows.len(), 1);
    assert_eq!(types.rows[0].get::<String>("relationshipType").unwrap(), "REL");

    let keys = run(&db, "CALL db.propertyKeys() YIELD propertyKey RETURN propertyKey ORDER BY propertyKey");
    let keys: Vec<String> = keys.rows.iter().map(|r| r.get("propertyKey").unwrap()).collect();
    assert_eq!(keys, vec!["w".to_string(), "x".to_string(), "y".to_string()]);
}
