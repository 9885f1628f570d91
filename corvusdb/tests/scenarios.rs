use corvusdb::Db;
use corvusdb_api::Value;
use tempfile::tempdir;

#[test]
fn knows_relationship_projects_endpoint_and_edge_properties() {
    let mut db = Db::open().unwrap();
    db.execute("CREATE (a:Person {name:'Alice', age:30})").unwrap();
    db.execute("CREATE (b:Person {name:'Bob'})").unwrap();
    db.execute(
        "MATCH (a:Person {name:'Alice'}), (b:Person {name:'Bob'}) CREATE (a)-[:KNOWS {since:2020}]->(b)",
    )
    .unwrap();

    let rows = db
        .execute("MATCH (x)-[r:KNOWS]->(y) RETURN x.name AS from, y.name AS to, r.since AS since")
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("from"), Some(&Value::Str("Alice".into())));
    assert_eq!(rows[0].get("to"), Some(&Value::Str("Bob".into())));
    assert_eq!(rows[0].get("since"), Some(&Value::Int(2020)));
}

#[test]
fn self_loop_under_undirected_match_counts_once() {
    let mut db = Db::open().unwrap();
    db.execute("CREATE (a:Person {name:'Alice'})").unwrap();
    db.execute("MATCH (a:Person {name:'Alice'}) CREATE (a)-[:LIKES]->(a)").unwrap();

    let rows = db.execute("MATCH (n)-[r:LIKES]-(n) RETURN count(*) AS c").unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("c"), Some(&Value::Int(1)));
}

#[test]
fn aggregates_over_missing_property_are_null_except_count_star() {
    let mut db = Db::open().unwrap();
    db.execute("CREATE (:Person {name:'Alice'})").unwrap();
    db.execute("CREATE (:Person {name:'Bob'})").unwrap();
    db.execute("CREATE (:Person)").unwrap();

    let rows = db
        .execute(
            "MATCH (p:Person) RETURN sum(p.age) AS s, avg(p.age) AS a, count(p.age) AS c, count(p) AS ca",
        )
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("s"), Some(&Value::Null));
    assert_eq!(rows[0].get("a"), Some(&Value::Null));
    assert_eq!(rows[0].get("c"), Some(&Value::Int(0)));
    assert_eq!(rows[0].get("ca"), Some(&Value::Int(3)));
}

#[test]
fn order_by_desc_with_skip_and_limit() {
    let mut db = Db::open().unwrap();
    for v in 1..=5 {
        db.execute(&format!("CREATE (:Num {{value:{v}}})")).unwrap();
    }

    let rows = db
        .execute("MATCH (n:Num) WITH n.value AS v ORDER BY v DESC SKIP 1 LIMIT 2 RETURN v")
        .unwrap();

    let values: Vec<_> = rows.iter().map(|r| r.get("v").cloned()).collect();
    assert_eq!(values, vec![Some(Value::Int(4)), Some(Value::Int(3))]);
}

#[test]
fn merge_distinguishes_on_create_from_on_match() {
    let mut db = Db::open().unwrap();

    let first = db
        .execute("MERGE (n:User {id:'u1'}) ON CREATE SET n.created=100 ON MATCH SET n.lastSeen=200 RETURN n.created AS c, n.lastSeen AS s")
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].get("c"), Some(&Value::Int(100)));
    assert_eq!(first[0].get("s"), Some(&Value::Null));

    let second = db
        .execute("MERGE (n:User {id:'u1'}) ON CREATE SET n.created=100 ON MATCH SET n.lastSeen=200 RETURN n.created AS c, n.lastSeen AS s")
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].get("c"), Some(&Value::Int(100)));
    assert_eq!(second[0].get("s"), Some(&Value::Int(200)));
}

#[test]
fn variable_length_path_orders_by_length() {
    let mut db = Db::open().unwrap();
    db.execute("CREATE (:Person {name:'A'})").unwrap();
    db.execute("CREATE (:Person {name:'B'})").unwrap();
    db.execute("CREATE (:Person {name:'C'})").unwrap();
    db.execute(
        "MATCH (a:Person {name:'A'}), (b:Person {name:'B'}) CREATE (a)-[:KNOWS]->(b)",
    )
    .unwrap();
    db.execute(
        "MATCH (b:Person {name:'B'}), (c:Person {name:'C'}) CREATE (b)-[:KNOWS]->(c)",
    )
    .unwrap();

    let rows = db
        .execute("MATCH p=(a {name:'A'})-[:KNOWS*1..2]->(x) RETURN x.name AS n, length(p) AS l ORDER BY l")
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("n"), Some(&Value::Str("B".into())));
    assert_eq!(rows[0].get("l"), Some(&Value::Int(1)));
    assert_eq!(rows[1].get("n"), Some(&Value::Str("C".into())));
    assert_eq!(rows[1].get("l"), Some(&Value::Int(2)));
}

#[test]
fn closing_and_reopening_a_durable_handle_preserves_every_node_and_edge() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("graph.db");

    {
        let mut db = Db::open_path(&path).unwrap();
        db.execute("CREATE (a:Person {name:'Alice'})").unwrap();
        db.execute("CREATE (b:Person {name:'Bob'})").unwrap();
        db.execute(
            "MATCH (a:Person {name:'Alice'}), (b:Person {name:'Bob'}) CREATE (a)-[:KNOWS {since:2020}]->(b)",
        )
        .unwrap();
        db.close().unwrap();
    }

    let mut reopened = Db::open_path(&path).unwrap();
    let rows = reopened
        .execute("MATCH (x)-[r:KNOWS]->(y) RETURN x.name AS from, y.name AS to, r.since AS since")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("from"), Some(&Value::Str("Alice".into())));
    assert_eq!(rows[0].get("to"), Some(&Value::Str("Bob".into())));
    assert_eq!(rows[0].get("since"), Some(&Value::Int(2020)));

    // a later write must not collide with the ids reconstructed on reopen
    reopened.execute("CREATE (:Person {name:'Carol'})").unwrap();
    let count = reopened.execute("MATCH (p:Person) RETURN count(p) AS c").unwrap();
    assert_eq!(count[0].get("c"), Some(&Value::Int(3)));
}

#[test]
fn json_export_then_import_round_trips_an_equivalent_graph() {
    let mut db = Db::open().unwrap();
    db.execute("CREATE (a:Person {name:'Alice', age:30})").unwrap();
    db.execute("CREATE (b:Person {name:'Bob'})").unwrap();
    db.execute(
        "MATCH (a:Person {name:'Alice'}), (b:Person {name:'Bob'}) CREATE (a)-[:KNOWS {since:2020}]->(b)",
    )
    .unwrap();

    let exported = db.export_json();

    let mut other = Db::open().unwrap();
    other.import_json(&exported).unwrap();

    let rows = other
        .execute("MATCH (x)-[r:KNOWS]->(y) RETURN x.name AS from, y.name AS to, r.since AS since")
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("from"), Some(&Value::Str("Alice".into())));
    assert_eq!(rows[0].get("to"), Some(&Value::Str("Bob".into())));
    assert_eq!(rows[0].get("since"), Some(&Value::Int(2020)));
}

#[test]
fn three_valued_logic_for_null_comparisons_and_boolean_operators() {
    let mut db = Db::open().unwrap();
    let rows = db
        .execute(
            "RETURN NOT NULL AS not_null, (NULL AND false) AS and_false, (NULL AND true) AS and_true, \
             (NULL OR true) AS or_true, (NULL = NULL) AS eq_null",
        )
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("not_null"), Some(&Value::Null));
    assert_eq!(rows[0].get("and_false"), Some(&Value::Bool(false)));
    assert_eq!(rows[0].get("and_true"), Some(&Value::Null));
    assert_eq!(rows[0].get("or_true"), Some(&Value::Bool(true)));
    assert_eq!(rows[0].get("eq_null"), Some(&Value::Null));
}
