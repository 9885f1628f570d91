//! The JSON-graph interchange format: a typed `{"t": tag, "v": value}`
//! wrapper around every property value, and a top-level
//! `{"nodes":[...],"edges":[...],"directed":true,"metadata":{...}}` document
//! for a whole graph. Round-tripping through this form must preserve the
//! semantic type of every value (an `Int` must never silently become a
//! `Float` on reload).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime};
use corvusdb_api::{Crs, Duration, Point, TimeValue, Value};
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::graph::{Edge, Graph, Node};

#[derive(Debug)]
pub enum InterchangeError {
    Malformed(String),
}

impl std::fmt::Display for InterchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterchangeError::Malformed(msg) => write!(f, "malformed interchange document: {msg}"),
        }
    }
}

impl std::error::Error for InterchangeError {}

type Result<T> = std::result::Result<T, InterchangeError>;

fn malformed<T>(msg: impl Into<String>) -> Result<T> {
    Err(InterchangeError::Malformed(msg.into()))
}

pub fn value_to_json(value: &Value) -> Json {
    let (tag, v) = match value {
        Value::Null => ("null", Json::Null),
        Value::Bool(b) => ("bool", json!(b)),
        Value::Int(i) => ("int", json!(i)),
        Value::Float(f) => ("float", json!(f.0)),
        Value::Str(s) => ("string", json!(s)),
        Value::Date(d) => ("date", json!(d.format("%Y-%m-%d").to_string())),
        Value::Time(t) => (
            "time",
            json!(match t.offset {
                Some(off) => format!("{}{}", t.time.format("%H:%M:%S%.f"), off),
                None => t.time.format("%H:%M:%S%.f").to_string(),
            }),
        ),
        Value::DateTime(dt) => ("datetime", json!(dt.to_rfc3339())),
        Value::Duration(d) => ("duration", json!(d.to_iso8601())),
        Value::Point(p) => (
            "point",
            json!({
                "crs": p.crs.as_str(),
                "a": p.a,
                "b": p.b,
                "c": p.c,
            }),
        ),
        Value::Distance(d) => ("distance", json!(d.0)),
        Value::List(items) => ("list", Json::Array(items.iter().map(value_to_json).collect())),
        Value::Map(map) => {
            let mut obj = JsonMap::new();
            for (k, v) in map {
                obj.insert(k.clone(), value_to_json(v));
            }
            ("map", Json::Object(obj))
        }
        Value::Node(_) | Value::Edge(_) | Value::Path(_) => {
            ("null", Json::Null) // graph-shaped values never appear as properties
        }
    };
    json!({ "t": tag, "v": v })
}

pub fn json_to_value(json: &Json) -> Result<Value> {
    let obj = json.as_object().ok_or_else(|| InterchangeError::Malformed("value must be an object".into()))?;
    let tag = obj.get("t").and_then(Json::as_str).ok_or_else(|| InterchangeError::Malformed("missing 't'".into()))?;
    let v = obj.get("v").ok_or_else(|| InterchangeError::Malformed("missing 'v'".into()))?;
    match tag {
        "null" => Ok(Value::Null),
        "bool" => v.as_bool().map(Value::Bool).ok_or_else(|| InterchangeError::Malformed("bad bool".into())),
        "int" => v.as_i64().map(Value::Int).ok_or_else(|| InterchangeError::Malformed("bad int".into())),
        "float" => v.as_f64().map(Value::float).ok_or_else(|| InterchangeError::Malformed("bad float".into())),
        "string" => v.as_str().map(|s| Value::Str(s.to_string())).ok_or_else(|| InterchangeError::Malformed("bad string".into())),
        "date" => {
            let s = v.as_str().ok_or_else(|| InterchangeError::Malformed("bad date".into()))?;
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| InterchangeError::Malformed(e.to_string()))
        }
        "time" => {
            let s = v.as_str().ok_or_else(|| InterchangeError::Malformed("bad time".into()))?;
            parse_time(s)
        }
        "datetime" => {
            let s = v.as_str().ok_or_else(|| InterchangeError::Malformed("bad datetime".into()))?;
            DateTime::parse_from_rfc3339(s)
                .map(Value::DateTime)
                .map_err(|e| InterchangeError::Malformed(e.to_string()))
        }
        "duration" => {
            let s = v.as_str().ok_or_else(|| InterchangeError::Malformed("bad duration".into()))?;
            Duration::parse(s).map(Value::Duration).ok_or_else(|| InterchangeError::Malformed("bad duration".into()))
        }
        "point" => {
            let crs = v.get("crs").and_then(Json::as_str).unwrap_or("cartesian");
            let crs = match crs {
                "cartesian" => Crs::Cartesian,
                "cartesian-3d" => Crs::Cartesian3D,
                "wgs-84" => Crs::Wgs84,
                other => return malformed(format!("unknown crs {other}")),
            };
            let a = v.get("a").and_then(Json::as_f64).ok_or_else(|| InterchangeError::Malformed("missing a".into()))?;
            let b = v.get("b").and_then(Json::as_f64).ok_or_else(|| InterchangeError::Malformed("missing b".into()))?;
            let c = v.get("c").and_then(Json::as_f64);
            Ok(Value::Point(Point { crs, a, b, c }))
        }
        "distance" => v.as_f64().map(Value::distance).ok_or_else(|| InterchangeError::Malformed("bad distance".into())),
        "list" => {
            let arr = v.as_array().ok_or_else(|| InterchangeError::Malformed("bad list".into()))?;
            Ok(Value::List(arr.iter().map(json_to_value).collect::<Result<_>>()?))
        }
        "map" => {
            let obj = v.as_object().ok_or_else(|| InterchangeError::Malformed("bad map".into()))?;
            let mut map = BTreeMap::new();
            for (k, v) in obj {
                map.insert(k.clone(), json_to_value(v)?);
            }
            Ok(Value::Map(map))
        }
        other => malformed(format!("unknown tag {other}")),
    }
}

fn parse_time(s: &str) -> Result<Value> {
    if let Some(split) = s.find(['+', '-']).filter(|&i| i > 0) {
        let (time_part, offset_part) = s.split_at(split);
        let time = NaiveTime::parse_from_str(time_part, "%H:%M:%S%.f")
            .map_err(|e| InterchangeError::Malformed(e.to_string()))?;
        let sign = if offset_part.starts_with('-') { -1 } else { 1 };
        let rest = &offset_part[1..];
        let mut parts = rest.split(':');
        let hours: i32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let minutes: i32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let offset = chrono::FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .ok_or_else(|| InterchangeError::Malformed("bad offset".into()))?;
        Ok(Value::Time(TimeValue { time, offset: Some(offset) }))
    } else {
        let time = NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .map_err(|e| InterchangeError::Malformed(e.to_string()))?;
        Ok(Value::Time(TimeValue { time, offset: None }))
    }
}

pub fn export_graph(graph: &Graph) -> Json {
    let nodes: Vec<Json> = graph
        .all_node_ids()
        .map(|id| {
            let node = graph.get_node(id).expect("id came from all_node_ids");
            node_to_json(node)
        })
        .collect();
    let edges: Vec<Json> = graph
        .all_edge_ids()
        .map(|id| {
            let edge = graph.get_edge(id).expect("id came from all_edge_ids");
            edge_to_json(edge)
        })
        .collect();
    json!({
        "nodes": nodes,
        "edges": edges,
        "directed": true,
        "metadata": {},
    })
}

fn node_to_json(node: &Node) -> Json {
    let mut props = JsonMap::new();
    for (k, v) in &node.properties {
        props.insert(k.clone(), value_to_json(v));
    }
    json!({
        "id": node.id.to_string(),
        "labels": node.labels,
        "properties": props,
    })
}

fn edge_to_json(edge: &Edge) -> Json {
    let mut props = JsonMap::new();
    for (k, v) in &edge.properties {
        props.insert(k.clone(), value_to_json(v));
    }
    json!({
        "id": edge.id.to_string(),
        "type": edge.rel_type,
        "source": edge.src.to_string(),
        "target": edge.dst.to_string(),
        "properties": props,
    })
}

/// Imports a JSON-graph document into a fresh graph. Node/edge ids in the
/// document are parsed as `u64` and used verbatim, so the caller should bump
/// the graph's id counters afterward via [`Graph::bump_id_counters`].
pub fn import_graph(json: &Json) -> Result<Graph> {
    let mut graph = Graph::new();
    let obj = json.as_object().ok_or_else(|| InterchangeError::Malformed("top level must be an object".into()))?;
    let nodes = obj.get("nodes").and_then(Json::as_array).ok_or_else(|| InterchangeError::Malformed("missing nodes".into()))?;
    for n in nodes {
        let node = json_to_node(n)?;
        graph.add_node(node);
    }
    let edges = obj.get("edges").and_then(Json::as_array).ok_or_else(|| InterchangeError::Malformed("missing edges".into()))?;
    for e in edges {
        let edge = json_to_edge(e)?;
        graph
            .add_edge(edge)
            .map_err(|err| InterchangeError::Malformed(err.to_string()))?;
    }
    Ok(graph)
}

fn json_to_node(json: &Json) -> Result<Node> {
    let obj = json.as_object().ok_or_else(|| InterchangeError::Malformed("node must be an object".into()))?;
    let id = parse_id(obj, "id")?;
    let labels = obj
        .get("labels")
        .and_then(Json::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let properties = parse_properties(obj)?;
    Ok(Node { id: corvusdb_api::NodeId(id), labels, properties })
}

fn json_to_edge(json: &Json) -> Result<Edge> {
    let obj = json.as_object().ok_or_else(|| InterchangeError::Malformed("edge must be an object".into()))?;
    let id = parse_id(obj, "id")?;
    let src = parse_id(obj, "source")?;
    let dst = parse_id(obj, "target")?;
    let rel_type = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| InterchangeError::Malformed("missing edge type".into()))?
        .to_string();
    let properties = parse_properties(obj)?;
    Ok(Edge {
        id: corvusdb_api::EdgeId(id),
        rel_type,
        src: corvusdb_api::NodeId(src),
        dst: corvusdb_api::NodeId(dst),
        properties,
    })
}

fn parse_id(obj: &JsonMap<String, Json>, key: &str) -> Result<u64> {
    obj.get(key)
        .and_then(Json::as_str)
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| InterchangeError::Malformed(format!("missing or invalid {key}")))
}

fn parse_properties(obj: &JsonMap<String, Json>) -> Result<BTreeMap<String, Value>> {
    let mut props = BTreeMap::new();
    if let Some(p) = obj.get("properties").and_then(Json::as_object) {
        for (k, v) in p {
            props.insert(k.clone(), json_to_value(v)?);
        }
    }
    Ok(props)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trips_as_int_not_float() {
        let json = value_to_json(&Value::Int(7));
        let back = json_to_value(&json).unwrap();
        assert_eq!(back, Value::Int(7));
    }

    #[test]
    fn graph_round_trips_through_json() {
        let mut graph = Graph::new();
        graph.add_node(Node {
            id: corvusdb_api::NodeId(0),
            labels: vec!["Person".into()],
            properties: BTreeMap::from([("name".to_string(), Value::Str("Ada".into()))]),
        });
        graph.add_node(Node { id: corvusdb_api::NodeId(1), labels: vec![], properties: BTreeMap::new() });
        graph
            .add_edge(Edge {
                id: corvusdb_api::EdgeId(0),
                rel_type: "KNOWS".into(),
                src: corvusdb_api::NodeId(0),
                dst: corvusdb_api::NodeId(1),
                properties: BTreeMap::new(),
            })
            .unwrap();

        let json = export_graph(&graph);
        let reimported = import_graph(&json).unwrap();
        assert_eq!(reimported.all_node_ids().count(), 2);
        assert_eq!(reimported.all_edge_ids().count(), 1);
        assert_eq!(
            reimported.get_node(corvusdb_api::NodeId(0)).unwrap().properties.get("name"),
            Some(&Value::Str("Ada".into()))
        );
    }
}
