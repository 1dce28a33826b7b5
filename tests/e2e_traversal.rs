//! End-to-end integration tests for relationship traversal patterns.
//!
//! Directions, multi-type edges, variable-length paths, path bindings,
//! OPTIONAL MATCH, and EXISTS subpatterns.

use leangraph::{Database, Path, PropertyMap, Value};
use pretty_assertions::assert_eq;

fn db() -> Database {
    Database::open_memory().unwrap()
}

fn run(db: &Database, query: &str) -> leangraph::QueryResult {
    db.execute(query, PropertyMap::new()).unwrap()
}

// ============================================================================
// 1. Directed traversal, both syntactic orientations
// ============================================================================

#[test]
fn test_directed_match() {
    let db = db();
    run(&db, "CREATE (a:T {n: 'a'})-[:K]->(b:T {n: 'b'})");

    let fwd = run(&db, "MATCH (x:T)-[:K]->(y:T) RETURN x.n AS xn, y.n AS yn");
    assert_eq!(fwd.rows.len(), 1);
    assert_eq!(fwd.rows[0].get::<String>("xn").unwrap(), "a");
    assert_eq!(fwd.rows[0].get::<String>("yn").unwrap(), "b");

    let rev = run(&db, "MATCH (y:T)<-[:K]-(x:T) RETURN x.n AS xn, y.n AS yn");
    assert_eq!(rev.rows.len(), 1);
    assert_eq!(rev.rows[0].get::<String>("xn").unwrap(), "a");
    assert_eq!(rev.rows[0].get::<String>("yn").unwrap(), "b");
}

// ============================================================================
// 2. Undirected traversal enumerates both orientations
// ============================================================================

#[test]
fn test_undirected_match() {
    let db = db();
    run(&db, "CREATE (a:U2 {n: 'a'})-[:K]->(b:U2 {n: 'b'})");

    let result = run(&db, "MATCH (x:U2 {n: 'a'})-[:K]-(y:U2) RETURN y.n AS yn");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<String>("yn").unwrap(), "b");

    // And from the other side.
    let result = run(&db, "MATCH (x:U2 {n: 'b'})--(y:U2) RETURN y.n AS yn");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<String>("yn").unwrap(), "a");
}

// ============================================================================
// 3. Relationship variables: type(), properties
// ============================================================================

#[test]
fn test_relationship_variable() {
    let db = db();
    run(&db, "CREATE (a:RV {n: 1})-[:LIKES {w: 5}]->(b:RV {n: 2})");

    let result = run(&db, "MATCH (:RV)-[r:LIKES]->(:RV) RETURN type(r) AS t, r.w AS w");
    assert_eq!(result.rows[0].get::<String>("t").unwrap(), "LIKES");
    assert_eq!(result.rows[0].get::<i64>("w").unwrap(), 5);
}

// ============================================================================
// 4. Multi-type edges
// ============================================================================

#[test]
fn test_multi_type_edge() {
    let db = db();
    run(&db, "CREATE (a:MT {n: 1})-[:A]->(b:MT {n: 2})");
    run(&db, "MATCH (a:MT {n: 1}), (b:MT {n: 2}) CREATE (a)-[:B]->(b)");
    run(&db, "MATCH (a:MT {n: 1}), (b:MT {n: 2}) CREATE (a)-[:C]->(b)");

    let result = run(&db, "MATCH (:MT {n: 1})-[r:A|B]->(:MT) RETURN count(r) AS c");
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 2);
}

// ============================================================================
// 5. Parallel edges are distinct matches
// ============================================================================

#[test]
fn test_parallel_edges_count_separately() {
    let db = db();
    run(&db, "CREATE (a:PE {n: 1})-[:K]->(b:PE {n: 2})");
    run(&db, "MATCH (a:PE {n: 1}), (b:PE {n: 2}) CREATE (a)-[:K]->(b)");

    let result = run(&db, "MATCH (:PE {n: 1})-[r:K]->(:PE {n: 2}) RETURN count(r) AS c");
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 2);
}

// ============================================================================
// 6. Variable-length paths
// ============================================================================

#[test]
fn test_var_length_range() {
    let db = db();
    run(&db, "CREATE (a:U {id: 1})-[:K]->(b:U {id: 2})-[:K]->(c:U {id: 3})");

    let result = run(&db, "MATCH (x:U {id: 1})-[:K*1..2]->(y:U) RETURN y.id AS id ORDER BY id");
    let ids: Vec<i64> = result.rows.iter().map(|r| r.get("id").unwrap()).collect();
    assert_eq!(ids, vec![2, 3]);
}

#[test]
fn test_var_length_exact() {
    let db = db();
    run(&db, "CREATE (a:VE {id: 1})-[:K]->(b:VE {id: 2})-[:K]->(c:VE {id: 3})");

    let result = run(&db, "MATCH (x:VE {id: 1})-[:K*2]->(y:VE) RETURN y.id AS id");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<i64>("id").unwrap(), 3);
}

#[test]
fn test_var_length_unbounded_respects_bounds() {
    let db = db();
    run(
        &db,
        "CREATE (a:VU {id: 1})-[:K]->(b:VU {id: 2})-[:K]->(c:VU {id: 3})-[:K]->(d:VU {id: 4})",
    );

    // Unbounded `*` reaches everything within the default depth cap.
    let result = run(&db, "MATCH (x:VU {id: 1})-[:K*]->(y:VU) RETURN y.id AS id ORDER BY id");
    let ids: Vec<i64> = result.rows.iter().map(|r| r.get("id").unwrap()).collect();
    assert_eq!(ids, vec![2, 3, 4]);

    // A lower bound above the chain length matches nothing.
    let none = run(&db, "MATCH (x:VU {id: 1})-[:K*4..]->(y:VU) RETURN y.id AS id");
    assert!(none.rows.is_empty());
}

#[test]
fn test_var_length_diamond_deduplicates_endpoints() {
    let db = db();
    // Diamond: s -> a -> t and s -> b -> t. Two distinct depth-2 traversals
    // reach t; the result carries t once.
    run(&db, "CREATE (s:DM {n: 's'})-[:K]->(a:DM {n: 'a'})-[:K]->(t:DM {n: 't'})");
    run(
        &db,
        "MATCH (s:DM {n: 's'}), (t:DM {n: 't'}) CREATE (s)-[:K]->(b:DM {n: 'b'})-[:K]->(t)",
    );

    let result = run(&db, "MATCH (x:DM {n: 's'})-[:K*1..2]->(y:DM) RETURN y.n AS n ORDER BY n");
    let ns: Vec<String> = result.rows.iter().map(|r| r.get("n").unwrap()).collect();
    assert_eq!(ns, vec!["a".to_string(), "b".to_string(), "t".to_string()]);

    // Same traversal through the interpreted plan (WITH forces multi-phase).
    let interpreted = run(
        &db,
        "MATCH (x:DM {n: 's'}) WITH x MATCH (x)-[:K*1..2]->(y:DM) RETURN y.n AS n ORDER BY n",
    );
    let ns: Vec<String> = interpreted.rows.iter().map(|r| r.get("n").unwrap()).collect();
    assert_eq!(ns, vec!["a".to_string(), "b".to_string(), "t".to_string()]);
}

#[test]
fn test_var_length_cycle_deduplicates_endpoints() {
    let db = db();
    // a -> b -> a: depths 1..4 revisit both endpoints repeatedly.
    run(&db, "CREATE (a:CY {n: 'a'})-[:K]->(b:CY {n: 'b'})");
    run(&db, "MATCH (a:CY {n: 'a'}), (b:CY {n: 'b'}) CREATE (b)-[:K]->(a)");

    let result = run(&db, "MATCH (x:CY {n: 'a'})-[:K*1..4]->(y:CY) RETURN y.n AS n ORDER BY n");
    let ns: Vec<String> = result.rows.iter().map(|r| r.get("n").unwrap()).collect();
    assert_eq!(ns, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_var_length_incoming() {
    let db = db();
    run(&db, "CREATE (a:VI {id: 1})-[:K]->(b:VI {id: 2})-[:K]->(c:VI {id: 3})");

    let result = run(&db, "MATCH (x:VI {id: 3})<-[:K*1..2]-(y:VI) RETURN y.id AS id ORDER BY id");
    let ids: Vec<i64> = result.rows.iter().map(|r| r.get("id").unwrap()).collect();
    assert_eq!(ids, vec![1, 2]);
}

// ============================================================================
// 7. Path expressions
// ============================================================================

#[test]
fn test_fixed_path_binding() {
    let db = db();
    run(&db, "CREATE (a:PH {n: 1})-[:K {w: 9}]->(b:PH {n: 2})");

    let result = run(
        &db,
        "MATCH p = (a:PH {n: 1})-[:K]->(b:PH) \
         RETURN p, length(p) AS len, nodes(p) AS ns, relationships(p) AS rs",
    );
    assert_eq!(result.rows.len(), 1);
    let row = &result.rows[0];

    assert_eq!(row.get::<i64>("len").unwrap(), 1);

    let path: Path = row.get("p").unwrap();
    assert_eq!(path.len(), 1);
    assert_eq!(path.nodes.len(), 2);
    assert_eq!(path.start().get("n"), Some(&Value::Int(1)));
    assert_eq!(path.end().get("n"), Some(&Value::Int(2)));
    assert_eq!(path.relationships[0].rel_type, "K");

    // nodes(p) / relationships(p) are property maps in order.
    let ns: Vec<Value> = row.get("ns").unwrap();
    assert_eq!(ns.len(), 2);
    let rs: Vec<Value> = row.get("rs").unwrap();
    assert_eq!(rs.len(), 1);
    match &rs[0] {
        Value::Map(m) => assert_eq!(m.get("w"), Some(&Value::Int(9))),
        other => panic!("expected map, got {other:?}"),
    }
}

#[test]
fn test_var_length_path_binding() {
    let db = db();
    run(&db, "CREATE (a:PV {id: 1})-[:K]->(b:PV {id: 2})-[:K]->(c:PV {id: 3})");

    let result = run(
        &db,
        "MATCH p = (x:PV {id: 1})-[:K*1..2]->(y:PV) RETURN length(p) AS len ORDER BY len",
    );
    let lens: Vec<i64> = result.rows.iter().map(|r| r.get("len").unwrap()).collect();
    assert_eq!(lens, vec![1, 2]);
}

// ============================================================================
// 8. OPTIONAL MATCH
// ============================================================================

#[test]
fn test_optional_match_preserves_anchor() {
    let db = db();
    run(&db, "CREATE (a:P {n: 'A'})");

    let result = run(
        &db,
        "MATCH (p:P {n: 'A'}) OPTIONAL MATCH (p)-[:K]->(q:P) RETURN p.n AS pn, q.n AS qn",
    );
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<String>("pn").unwrap(), "A");
    assert_eq!(result.rows[0].get_value("qn"), Some(&Value::Null));
}

#[test]
fn test_optional_match_null_fill_per_anchor_row() {
    let db = db();
    run(&db, "CREATE (a:OM {n: 1})-[:K]->(x:OMX {n: 10})");
    run(&db, "CREATE (b:OM {n: 2})");

    let result = run(
        &db,
        "MATCH (p:OM) OPTIONAL MATCH (p)-[:K]->(q:OMX) \
         RETURN p.n AS pn, q.n AS qn ORDER BY pn",
    );
    // Exactly one row per anchor: the miss row carries nulls.
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.rows[0].get::<i64>("pn").unwrap(), 1);
    assert_eq!(result.rows[0].get::<i64>("qn").unwrap(), 10);
    assert_eq!(result.rows[1].get::<i64>("pn").unwrap(), 2);
    assert_eq!(result.rows[1].get_value("qn"), Some(&Value::Null));
}

// ============================================================================
// 9. EXISTS subpattern
// ============================================================================

#[test]
fn test_exists_subpattern() {
    let db = db();
    run(&db, "CREATE (a:EX {n: 1})-[:K]->(x:EXT {n: 0})");
    run(&db, "CREATE (b:EX {n: 2})");

    let result = run(&db, "MATCH (a:EX) WHERE EXISTS((a)-[:K]->()) RETURN a.n AS n");
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<i64>("n").unwrap(), 1);

    let negated = run(&db, "MATCH (a:EX) WHERE NOT EXISTS((a)-[:K]->()) RETURN a.n AS n");
    assert_eq!(negated.rows.len(), 1);
    assert_eq!(negated.rows[0].get::<i64>("n").unwrap(), 2);
}

// ============================================================================
// 10. Chained patterns and repeated variables
// ============================================================================

#[test]
fn test_chained_pattern_and_multi_clause_match() {
    let db = db();
    run(&db, "CREATE (a:CH {n: 1})-[:K]->(b:CH {n: 2})-[:K]->(c:CH {n: 3})");

    let chained = run(
        &db,
        "MATCH (a:CH)-[:K]->(b:CH)-[:K]->(c:CH) RETURN a.n AS an, c.n AS cn",
    );
    assert_eq!(chained.rows.len(), 1);
    assert_eq!(chained.rows[0].get::<i64>("an").unwrap(), 1);
    assert_eq!(chained.rows[0].get::<i64>("cn").unwrap(), 3);

    // The same traversal split across two MATCH clauses sharing `b`.
    let split = run(
        &db,
        "MATCH (a:CH)-[:K]->(b:CH) MATCH (b)-[:K]->(c:CH) RETURN a.n AS an, c.n AS cn",
    );
    assert_eq!(split.rows.len(), 1);
    assert_eq!(split.rows[0].get::<i64>("cn").unwrap(), 3);
}
