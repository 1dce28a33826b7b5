//! Result shaper: engine rows back into structured values.
//!
//! JSON-stored columns arrive as strings; this is the single place they are
//! parsed back into nested values, node/relationship/path objects are
//! normalized, and column naming follows the translated shape.

use crate::model::{EdgeId, Node, NodeId, Path, PropertyMap, Relationship, Value};
use crate::storage::SqlRow;
use crate::translate::{ColumnKind, ReturnShape};
use crate::{Error, Result};

use super::ResultRow;

/// Reassemble shaped result rows from raw SQL rows. Each shape column
/// consumes a fixed number of SQL columns, positionally.
pub fn shape_rows(sql_rows: &[SqlRow], shape: &ReturnShape) -> Result<Vec<ResultRow>> {
    let mut out = Vec::with_capacity(sql_rows.len());
    for sql_row in sql_rows {
        let mut cursor = 0usize;
        let mut values = Vec::with_capacity(shape.columns.len());
        for column in &shape.columns {
            let width = column.kind.sql_width();
            let cells: Vec<&Value> = (cursor..cursor + width)
                .map(|i| {
                    sql_row.at(i).ok_or_else(|| {
                        Error::Internal(format!(
                            "result row is missing column {i} for '{}'",
                            column.name
                        ))
                    })
                })
                .collect::<Result<_>>()?;
            cursor += width;
            values.push((column.name.clone(), shape_cell(column.kind, &cells)?));
        }
        out.push(ResultRow { values });
    }
    Ok(out)
}

fn shape_cell(kind: ColumnKind, cells: &[&Value]) -> Result<Value> {
    match kind {
        ColumnKind::Scalar => Ok((*cells[0]).clone()),
        ColumnKind::Bool => Ok(match cells[0] {
            Value::Int(i) => Value::Bool(*i != 0),
            other => (*other).clone(),
        }),
        ColumnKind::Json => Ok(parse_json_cell(cells[0])),
        ColumnKind::Node => {
            if cells[0].is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Node(Box::new(node_from_cells(cells[0], cells[1], cells[2])?)))
        }
        ColumnKind::Edge => {
            if cells[0].is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Relationship(Box::new(edge_from_cells(
                cells[0], cells[1], cells[2], cells[3], cells[4],
            )?)))
        }
        ColumnKind::Path => {
            if cells[0].is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Path(Box::new(path_from_json(cells[0])?)))
        }
    }
}

/// Parse a JSON-valued column. Non-JSON text passes through unchanged so a
/// plain string column routed here stays a string.
fn parse_json_cell(cell: &Value) -> Value {
    match cell {
        Value::String(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(json) => Value::from_json(&json),
            Err(_) => cell.clone(),
        },
        other => other.clone(),
    }
}

pub fn node_from_cells(id: &Value, labels: &Value, properties: &Value) -> Result<Node> {
    let id = parse_node_id(id)?;
    let labels = match parse_json_cell(labels) {
        Value::List(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Default::default(),
    };
    Ok(Node { id, labels, properties: parse_properties(properties) })
}

pub fn edge_from_cells(
    id: &Value,
    rel_type: &Value,
    source: &Value,
    target: &Value,
    properties: &Value,
) -> Result<Relationship> {
    Ok(Relationship {
        id: parse_edge_id(id)?,
        src: parse_node_id(source)?,
        dst: parse_node_id(target)?,
        rel_type: rel_type.as_str().unwrap_or_default().to_owned(),
        properties: parse_properties(properties),
    })
}

fn parse_properties(cell: &Value) -> PropertyMap {
    match parse_json_cell(cell) {
        Value::Map(map) => map,
        _ => PropertyMap::new(),
    }
}

fn parse_node_id(cell: &Value) -> Result<NodeId> {
    cell.as_str()
        .and_then(NodeId::parse)
        .ok_or_else(|| Error::Internal(format!("malformed node id: {cell}")))
}

fn parse_edge_id(cell: &Value) -> Result<EdgeId> {
    cell.as_str()
        .and_then(EdgeId::parse)
        .ok_or_else(|| Error::Internal(format!("malformed edge id: {cell}")))
}

/// Parse the `{"nodes": [...], "edges": [...]}` JSON the translator emits
/// for path values.
fn path_from_json(cell: &Value) -> Result<Path> {
    let text = cell
        .as_str()
        .ok_or_else(|| Error::Internal("path column is not JSON text".into()))?;
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::Internal(format!("malformed path JSON: {e}")))?;

    let mut nodes = Vec::new();
    for item in json.get("nodes").and_then(|v| v.as_array()).into_iter().flatten() {
        nodes.push(node_from_json_object(item)?);
    }
    let mut relationships = Vec::new();
    for item in json.get("edges").and_then(|v| v.as_array()).into_iter().flatten() {
        relationships.push(edge_from_json_object(item)?);
    }
    Ok(Path { nodes, relationships })
}

fn node_from_json_object(json: &serde_json::Value) -> Result<Node> {
    let id = json
        .get("id")
        .and_then(|v| v.as_str())
        .and_then(NodeId::parse)
        .ok_or_else(|| Error::Internal("path node without id".into()))?;
    let labels = json
        .get("labels")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default();
    let properties = match json.get("properties").map(Value::from_json) {
        Some(Value::Map(map)) => map,
        _ => PropertyMap::new(),
    };
    Ok(Node { id, labels, properties })
}

fn edge_from_json_object(json: &serde_json::Value) -> Result<Relationship> {
    let parse_id = |key: &str| {
        json.get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Internal(format!("path edge without {key}")))
    };
    let id = EdgeId::parse(parse_id("id")?)
        .ok_or_else(|| Error::Internal("malformed path edge id".into()))?;
    let src = NodeId::parse(parse_id("source")?)
        .ok_or_else(|| Error::Internal("malformed path edge source".into()))?;
    let dst = NodeId::parse(parse_id("target")?)
        .ok_or_else(|| Error::Internal("malformed path edge target".into()))?;
    let rel_type = json
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned();
    let properties = match json.get("properties").map(Value::from_json) {
        Some(Value::Map(map)) => map,
        _ => PropertyMap::new(),
    };
    Ok(Relationship { id, src, dst, rel_type, properties })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::ShapedColumn;

    #[test]
    fn test_json_cell_parsing() {
        assert_eq!(parse_json_cell(&Value::String("[1,2]".into())), Value::List(vec![
            Value::Int(1),
            Value::Int(2)
        ]));
        assert_eq!(parse_json_cell(&Value::String("\"x\"".into())), Value::String("x".into()));
        assert_eq!(parse_json_cell(&Value::String("true".into())), Value::Bool(true));
        // Non-JSON text stays text.
        assert_eq!(
            parse_json_cell(&Value::String("plain words".into())),
            Value::String("plain words".into())
        );
        assert_eq!(parse_json_cell(&Value::Int(7)), Value::Int(7));
    }

    #[test]
    fn test_node_shaping_and_null_fill() {
        let id = NodeId::generate();
        let shape = ReturnShape {
            columns: vec![ShapedColumn { name: "n".into(), kind: ColumnKind::Node }],
        };
        let present = SqlRow::new(vec![
            ("c0".into(), Value::String(id.to_string())),
            ("c1".into(), Value::String("[\"P\"]".into())),
            ("c2".into(), Value::String("{\"age\": 3}".into())),
        ]);
        let absent = SqlRow::new(vec![
            ("c0".into(), Value::Null),
            ("c1".into(), Value::Null),
            ("c2".into(), Value::Null),
        ]);

        let rows = shape_rows(&[present, absent], &shape).unwrap();
        match rows[0].values[0].1 {
            Value::Node(ref n) => {
                assert_eq!(n.id, id);
                assert!(n.has_label("P"));
                assert_eq!(n.get("age"), Some(&Value::Int(3)));
            }
            ref other => panic!("expected node, got {other:?}"),
        }
        assert_eq!(rows[1].values[0].1, Value::Null);
    }
}
