//! Row reconciliation
//!
//! Rows are matched by `_id` only. Updates are minimal: a payload carries just
//! the cells whose new value differs from the destination under the equality
//! rules of the destination column type.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde_json::{Map, Value};

use cds_common::types::{Column, ColumnType, Row};

/// Row ids to append, update and delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDiff {
    /// In source order
    pub to_append: Vec<String>,
    /// In source order
    pub to_update: Vec<String>,
    /// In destination order
    pub to_delete: Vec<String>,
}

impl RowDiff {
    pub fn is_empty(&self) -> bool {
        self.to_append.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

pub fn diff_row_ids(source_ids: &[String], destination_ids: &[String]) -> RowDiff {
    let source: HashSet<&str> = source_ids.iter().map(String::as_str).collect();
    let destination: HashSet<&str> = destination_ids.iter().map(String::as_str).collect();

    let (to_update, to_append): (Vec<String>, Vec<String>) = source_ids
        .iter()
        .cloned()
        .partition(|id| destination.contains(id.as_str()));

    let mut seen = HashSet::new();
    let mut to_delete = Vec::new();
    for id in destination_ids {
        if !source.contains(id.as_str()) && seen.insert(id.as_str()) {
            to_delete.push(id.clone());
        }
    }

    RowDiff {
        to_append,
        to_update,
        to_delete,
    }
}

/// Cells of `new_row` that differ from `current`, keyed by column key
pub fn build_update_payload(columns: &[Column], new_row: &Row, current: &Row) -> Row {
    let mut payload = Map::new();
    for column in columns {
        let new_value = new_row.get(&column.key).unwrap_or(&Value::Null);
        let current_value = current.get(&column.key).unwrap_or(&Value::Null);
        if !cells_equal(&column.column_type, new_value, current_value) {
            payload.insert(column.key.clone(), new_value.clone());
        }
    }
    payload
}

/// Equality of two cells of a destination column
pub fn cells_equal(column_type: &ColumnType, a: &Value, b: &Value) -> bool {
    match column_type {
        ColumnType::Text
        | ColumnType::Date
        | ColumnType::SingleSelect
        | ColumnType::Url
        | ColumnType::Creator
        | ColumnType::LastModifier
        | ColumnType::Ctime
        | ColumnType::Mtime
        | ColumnType::Email => values_equal(&empty_as_blank(a), &empty_as_blank(b)),
        ColumnType::Checkbox => is_truthy(a) == is_truthy(b),
        ColumnType::File => file_urls(a) == file_urls(b),
        ColumnType::LongText => long_text(a) == long_text(b),
        ColumnType::MultipleSelect => sorted_truthy(a) == sorted_truthy(b),
        _ => values_equal(a, b),
    }
}

/// `==`, except that numbers compare by value (`1` equals `1.0`)
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn empty_as_blank(value: &Value) -> Value {
    if is_truthy(value) {
        value.clone()
    } else {
        Value::String(String::new())
    }
}

fn file_urls(value: &Value) -> Vec<Option<&Value>> {
    match value {
        Value::Array(files) => files.iter().map(|file| file.get("url")).collect(),
        _ => Vec::new(),
    }
}

fn long_text(value: &Value) -> String {
    match value {
        Value::Object(map) => map
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sorted_truthy(value: &Value) -> Vec<Value> {
    let mut items: Vec<Value> = match value {
        Value::Array(items) => items.iter().filter(|item| is_truthy(item)).cloned().collect(),
        _ => Vec::new(),
    };
    items.sort_by(compare_values);
    items
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_diff_preserves_source_order() {
        let diff = diff_row_ids(&ids(&["r3", "r1", "r4", "r2"]), &ids(&["r2", "r5", "r1", "r6"]));
        assert_eq!(diff.to_append, ids(&["r3", "r4"]));
        assert_eq!(diff.to_update, ids(&["r1", "r2"]));
        assert_eq!(diff.to_delete, ids(&["r5", "r6"]));
    }

    #[test]
    fn test_identical_sets_produce_only_updates() {
        let diff = diff_row_ids(&ids(&["a", "b"]), &ids(&["b", "a"]));
        assert!(diff.to_append.is_empty());
        assert!(diff.to_delete.is_empty());
        assert_eq!(diff.to_update.len(), 2);
        assert!(!diff.is_empty());
        assert!(diff_row_ids(&[], &[]).is_empty());
    }

    #[test]
    fn test_text_like_blank_equality() {
        assert!(cells_equal(&ColumnType::Text, &Value::Null, &json!("")));
        assert!(cells_equal(&ColumnType::SingleSelect, &json!("a"), &json!("a")));
        assert!(!cells_equal(&ColumnType::Url, &json!("a"), &Value::Null));
    }

    #[test]
    fn test_type_specific_equality() {
        assert!(cells_equal(&ColumnType::Checkbox, &Value::Null, &json!(false)));
        assert!(cells_equal(&ColumnType::Number, &json!(1), &json!(1.0)));
        assert!(!cells_equal(&ColumnType::Number, &json!(1), &json!(2)));
        assert!(cells_equal(
            &ColumnType::LongText,
            &json!({"text": "", "preview": ""}),
            &Value::Null
        ));
        assert!(cells_equal(&ColumnType::LongText, &json!({"text": "hi"}), &json!("hi")));
        assert!(cells_equal(
            &ColumnType::MultipleSelect,
            &json!(["b", "", "a"]),
            &json!(["a", "b"])
        ));
        assert!(cells_equal(
            &ColumnType::File,
            &json!([{"url": "u1", "name": "a.txt"}]),
            &json!([{"url": "u1", "name": "renamed.txt"}])
        ));
        assert!(!cells_equal(&ColumnType::Image, &json!(["u1"]), &json!(["u2"])));
    }

    #[test]
    fn test_update_payload_contains_only_changes() {
        let columns = vec![
            Column::new("a", "A", ColumnType::Text),
            Column::new("b", "B", ColumnType::Number),
            Column::new("c", "C", ColumnType::Checkbox),
        ];
        let new_row = row(json!({"a": "x", "b": 2, "c": false}));
        let current = row(json!({"_id": "r1", "a": "x", "b": 1}));

        let payload = build_update_payload(&columns, &new_row, &current);
        assert_eq!(payload, row(json!({"b": 2})));

        let payload = build_update_payload(&columns, &new_row, &row(json!({"a": "x", "b": 2.0})));
        assert!(payload.is_empty());
    }
}
