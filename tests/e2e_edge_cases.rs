//! End-to-end integration tests for edge cases: error reporting, null
//! semantics, string predicates, scalar functions, and CASE.

use leangraph::{Database, Error, PropertyMap, Value};
use pretty_assertions::assert_eq;

fn db() -> Database {
    Database::open_memory().unwrap()
}

fn run(db: &Database, query: &str) -> leangraph::QueryResult {
    db.execute(query, PropertyMap::new()).unwrap()
}

fn fail(db: &Database, query: &str) -> Error {
    db.execute(query, PropertyMap::new()).unwrap_err()
}

// ============================================================================
// 1. Error taxonomy and positions
// ============================================================================

#[test]
fn test_parse_error_carries_position() {
    let db = db();
    match fail(&db, "MATCH (n RETURN n") {
        Error::Syntax { line, column, position, .. } => {
            assert_eq!(line, 1);
            assert_eq!(column, 10);
            assert_eq!(position, 9);
        }
        other => panic!("expected syntax error, got {other:?}"),
    }
}

#[test]
fn test_tokenize_error() {
    let db = db();
    assert!(matches!(fail(&db, "RETURN ^"), Error::Tokenize { .. }));
}

#[test]
fn test_unknown_variable() {
    let db = db();
    assert!(matches!(fail(&db, "MATCH (n:X) RETURN m.age"), Error::Semantic(_)));
}

#[test]
fn test_missing_parameter() {
    let db = db();
    assert!(matches!(
        fail(&db, "MATCH (n:X {k: $nope}) RETURN n"),
        Error::Semantic(_)
    ));
}

#[test]
fn test_union_column_mismatch() {
    let db = db();
    assert!(matches!(
        fail(&db, "MATCH (a:A) RETURN a.x AS v UNION MATCH (b:B) RETURN b.y AS w"),
        Error::Semantic(_)
    ));
}

#[test]
fn test_match_without_return_is_a_syntax_error() {
    let db = db();
    assert!(matches!(fail(&db, "MATCH (n:X)"), Error::Syntax { .. }));
}

#[test]
fn test_create_without_label_is_rejected() {
    let db = db();
    assert!(matches!(fail(&db, "CREATE (n)"), Error::Semantic(_)));
}

// ============================================================================
// 2. Null semantics
// ============================================================================

#[test]
fn test_is_null_predicates() {
    let db = db();
    run(&db, "CREATE (n:NU {name: 'has', email: 'x@y'})");
    run(&db, "CREATE (n:NU {name: 'hasnt'})");

    let with = run(&db, "MATCH (n:NU) WHERE n.email IS NOT NULL RETURN n.name AS name");
    assert_eq!(with.rows.len(), 1);
    assert_eq!(with.rows[0].get::<String>("name").unwrap(), "has");

    let without = run(&db, "MATCH (n:NU) WHERE n.email IS NULL RETURN n.name AS name");
    assert_eq!(without.rows.len(), 1);
    assert_eq!(without.rows[0].get::<String>("name").unwrap(), "hasnt");
}

#[test]
fn test_null_propagation_in_comparison() {
    let db = db();
    run(&db, "CREATE (n:NP {v: 1})");
    // A comparison against a missing property is NULL, never true.
    let result = run(&db, "MATCH (n:NP) WHERE n.missing > 0 RETURN n");
    assert!(result.rows.is_empty());
}

#[test]
fn test_coalesce() {
    let db = db();
    run(&db, "CREATE (n:CO {v: 1})");
    let result = run(&db, "MATCH (n:CO) RETURN coalesce(n.missing, n.v, 99) AS c");
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 1);
}

// ============================================================================
// 3. IN predicates
// ============================================================================

#[test]
fn test_in_literal_list() {
    let db = db();
    for v in 1..=5 {
        run(&db, &format!("CREATE (n:IN1 {{v: {v}}})"));
    }
    let result = run(&db, "MATCH (n:IN1) WHERE n.v IN [1, 2, 3] RETURN count(*) AS c");
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 3);
}

#[test]
fn test_in_parameter_list() {
    let db = db();
    for v in 1..=5 {
        run(&db, &format!("CREATE (n:IN2 {{v: {v}}})"));
    }
    let mut params = PropertyMap::new();
    params.insert(
        "list".into(),
        Value::List(vec![Value::Int(4), Value::Int(5), Value::Int(6)]),
    );
    let result = db
        .execute("MATCH (n:IN2) WHERE n.v IN $list RETURN count(*) AS c", params)
        .unwrap();
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 2);
}

// ============================================================================
// 4. String predicates and functions
// ============================================================================

#[test]
fn test_string_predicates() {
    let db = db();
    run(&db, "CREATE (n:SP {s: 'Hello World'})");
    run(&db, "CREATE (n:SP {s: 'hello'})");

    let starts = run(&db, "MATCH (n:SP) WHERE n.s STARTS WITH 'Hello' RETURN count(*) AS c");
    assert_eq!(starts.rows[0].get::<i64>("c").unwrap(), 1);

    let ends = run(&db, "MATCH (n:SP) WHERE n.s ENDS WITH 'World' RETURN count(*) AS c");
    assert_eq!(ends.rows[0].get::<i64>("c").unwrap(), 1);

    let contains = run(&db, "MATCH (n:SP) WHERE n.s CONTAINS 'ello' RETURN count(*) AS c");
    assert_eq!(contains.rows[0].get::<i64>("c").unwrap(), 2);
}

#[test]
fn test_like_wildcards_are_escaped() {
    let db = db();
    run(&db, "CREATE (n:LW {s: 'literal%percent'})");
    run(&db, "CREATE (n:LW {s: 'literalXpercent'})");

    // '%' in the needle is a literal character, not a wildcard.
    let result = run(&db, "MATCH (n:LW) WHERE n.s CONTAINS '%' RETURN count(*) AS c");
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 1);
}

#[test]
fn test_string_functions() {
    let db = db();
    let result = run(
        &db,
        "RETURN toUpper('ab') AS up, toLower('AB') AS lo, trim('  x  ') AS t, \
         left('hello', 2) AS l, right('hello', 2) AS r, reverse('abc') AS rev, \
         substring('hello', 1, 3) AS sub, replace('aXa', 'X', 'b') AS rep, \
         split('a,b,c', ',') AS parts",
    );
    let row = &result.rows[0];
    assert_eq!(row.get::<String>("up").unwrap(), "AB");
    assert_eq!(row.get::<String>("lo").unwrap(), "ab");
    assert_eq!(row.get::<String>("t").unwrap(), "x");
    assert_eq!(row.get::<String>("l").unwrap(), "he");
    assert_eq!(row.get::<String>("r").unwrap(), "lo");
    assert_eq!(row.get::<String>("rev").unwrap(), "cba");
    assert_eq!(row.get::<String>("sub").unwrap(), "ell");
    assert_eq!(row.get::<String>("rep").unwrap(), "aba");
    assert_eq!(
        row.get_value("parts"),
        Some(&Value::List(vec![
            Value::String("a".into()),
            Value::String("b".into()),
            Value::String("c".into()),
        ]))
    );
}

// ============================================================================
// 5. Conversions and numeric functions
// ============================================================================

#[test]
fn test_conversions() {
    let db = db();
    let result = run(
        &db,
        "RETURN toInteger('42') AS i, toInteger('nope') AS bad, toFloat('1.5') AS f, \
         toBoolean('true') AS b, toString(7) AS s",
    );
    let row = &result.rows[0];
    assert_eq!(row.get::<i64>("i").unwrap(), 42);
    assert_eq!(row.get_value("bad"), Some(&Value::Null));
    assert_eq!(row.get::<f64>("f").unwrap(), 1.5);
    assert_eq!(row.get_value("b"), Some(&Value::Bool(true)));
    assert_eq!(row.get::<String>("s").unwrap(), "7");
}

#[test]
fn test_numeric_functions() {
    let db = db();
    let result = run(
        &db,
        "RETURN abs(-3) AS a, floor(1.7) AS f, ceil(1.2) AS c, round(1.5) AS r, sqrt(9.0) AS q",
    );
    let row = &result.rows[0];
    assert_eq!(row.get::<i64>("a").unwrap(), 3);
    assert_eq!(row.get::<f64>("f").unwrap(), 1.0);
    assert_eq!(row.get::<f64>("c").unwrap(), 2.0);
    assert_eq!(row.get::<f64>("r").unwrap(), 2.0);
    assert_eq!(row.get::<f64>("q").unwrap(), 3.0);
}

#[test]
fn test_temporal_functions_honor_arguments_on_both_paths() {
    let db = db();

    // Single-statement path.
    let compiled = run(
        &db,
        "RETURN date('2024-01-01') AS d, datetime('2024-03-05T10:30:00') AS dt, \
         date('2024-03-05T10:30:00') AS dd",
    );
    let row = &compiled.rows[0];
    assert_eq!(row.get::<String>("d").unwrap(), "2024-01-01");
    assert_eq!(row.get::<String>("dt").unwrap(), "2024-03-05T10:30:00.000Z");
    assert_eq!(row.get::<String>("dd").unwrap(), "2024-03-05");

    // Interpreted path (WITH forces multi-phase); results must be identical —
    // strategy choice is invisible to the caller.
    let interpreted = run(
        &db,
        "WITH 1 AS one RETURN date('2024-01-01') AS d, \
         datetime('2024-03-05T10:30:00') AS dt, date('2024-03-05T10:30:00') AS dd",
    );
    assert_eq!(compiled.rows[0].values, interpreted.rows[0].values);

    // Unparseable input is NULL on both paths.
    let bad = run(&db, "RETURN date('not a date') AS d");
    assert_eq!(bad.rows[0].get_value("d"), Some(&Value::Null));
    let bad = run(&db, "WITH 1 AS one RETURN date('not a date') AS d");
    assert_eq!(bad.rows[0].get_value("d"), Some(&Value::Null));

    // No-argument forms are wall-clock on both paths.
    let now = run(&db, "RETURN timestamp() AS t");
    assert!(now.rows[0].get::<i64>("t").unwrap() > 0);
    let now = run(&db, "WITH 1 AS one RETURN timestamp() AS t");
    assert!(now.rows[0].get::<i64>("t").unwrap() > 0);
}

#[test]
fn test_list_functions() {
    let db = db();
    let result = run(
        &db,
        "RETURN head([1, 2, 3]) AS h, last([1, 2, 3]) AS l, tail([1, 2, 3]) AS t, \
         size([1, 2, 3]) AS s, size('abcd') AS sl",
    );
    let row = &result.rows[0];
    assert_eq!(row.get::<i64>("h").unwrap(), 1);
    assert_eq!(row.get::<i64>("l").unwrap(), 3);
    assert_eq!(row.get_value("t"), Some(&Value::List(vec![Value::Int(2), Value::Int(3)])));
    assert_eq!(row.get::<i64>("s").unwrap(), 3);
    assert_eq!(row.get::<i64>("sl").unwrap(), 4);
}

#[test]
fn test_keys_and_properties() {
    let db = db();
    run(&db, "CREATE (n:KP {b: 2, a: 1})");
    let result = run(&db, "MATCH (n:KP) RETURN keys(n) AS k, properties(n) AS p");
    let mut keys: Vec<String> = match result.rows[0].get_value("k") {
        Some(Value::List(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect(),
        other => panic!("expected list, got {other:?}"),
    };
    keys.sort();
    assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

    let props: PropertyMap = result.rows[0].get("p").unwrap();
    assert_eq!(props.get("a"), Some(&Value::Int(1)));
    assert_eq!(props.get("b"), Some(&Value::Int(2)));
}

// ============================================================================
// 6. CASE expressions
// ============================================================================

#[test]
fn test_searched_case() {
    let db = db();
    run(&db, "CREATE (n:CS {age: 30})");
    run(&db, "CREATE (n:CS {age: 10})");

    let result = run(
        &db,
        "MATCH (n:CS) RETURN n.age AS age, \
         CASE WHEN n.age >= 18 THEN 'adult' ELSE 'minor' END AS bracket ORDER BY age",
    );
    assert_eq!(result.rows[0].get::<String>("bracket").unwrap(), "minor");
    assert_eq!(result.rows[1].get::<String>("bracket").unwrap(), "adult");
}

#[test]
fn test_simple_case() {
    let db = db();
    let result = run(
        &db,
        "RETURN CASE 2 WHEN 1 THEN 'one' WHEN 2 THEN 'two' ELSE 'many' END AS w",
    );
    assert_eq!(result.rows[0].get::<String>("w").unwrap(), "two");
}

// ============================================================================
// 7. Property existence and label checks in expressions
// ============================================================================

#[test]
fn test_exists_property_form() {
    let db = db();
    run(&db, "CREATE (n:EP {here: 1})");
    let result = run(
        &db,
        "MATCH (n:EP) RETURN exists(n.here) AS yes, exists(n.gone) AS no",
    );
    assert_eq!(result.rows[0].get_value("yes"), Some(&Value::Bool(true)));
    assert_eq!(result.rows[0].get_value("no"), Some(&Value::Bool(false)));
}

#[test]
fn test_has_label_expression() {
    let db = db();
    run(&db, "CREATE (n:HL:Extra {k: 1})");
    run(&db, "CREATE (n:HL {k: 2})");
    let result = run(&db, "MATCH (n:HL) WHERE n:Extra RETURN n.k AS k");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<i64>("k").unwrap(), 1);
}

// ============================================================================
// 8. List indexing
// ============================================================================

#[test]
fn test_list_indexing() {
    let db = db();
    run(&db, "CREATE (n:LI {xs: [10, 20, 30]})");
    let result = run(&db, "MATCH (n:LI) RETURN n.xs[1] AS second");
    assert_eq!(result.rows[0].get::<i64>("second").unwrap(), 20);
}

// ============================================================================
// 9. Storage errors surface with a statement index
// ============================================================================

#[test]
fn test_storage_error_carries_statement_index() {
    let db = db();
    // Exceed SQLite's maximum depth guard by disabling nothing — instead,
    // force a constraint failure: inserting an edge whose endpoint vanished
    // mid-query is not expressible through the API, so go through the
    // engine directly.
    use leangraph::StorageEngine;
    let err = db
        .engine()
        .execute(
            "INSERT INTO edges (id, type, source_id, target_id, properties) \
             VALUES ('e1', 'K', 'missing-a', 'missing-b', '{}')",
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, Error::Storage { .. }));
}

// ============================================================================
// 10. Queries are transactional: a failing phase rolls everything back
// ============================================================================

#[test]
fn test_failed_query_rolls_back_earlier_phases() {
    let db = db();
    run(&db, "CREATE (a:RB {n: 1})-[:K]->(b:RB {n: 2})");

    // The CREATE phase succeeds, then DELETE (without DETACH) fails; the
    // created node must not survive.
    let err = db
        .execute(
            "MATCH (a:RB {n: 1}) CREATE (c:RBNew {n: 3}) WITH a MATCH (x:RB {n: 1}) DELETE x",
            PropertyMap::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Semantic(_)));

    let check = run(&db, "MATCH (c:RBNew) RETURN count(*) AS c");
    assert_eq!(check.rows[0].get::<i64>("c").unwrap(), 0);
}
