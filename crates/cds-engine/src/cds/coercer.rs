//! Per-cell value coercion
//!
//! A source cell is first projected onto the destination column type (derived
//! columns yield plain values, link arrays collapse to a single value or a
//! flat list) and then checked against the shapes the destination type
//! accepts. Cells that fail the check are written as empty and reported.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use serde_json::{Number, Value};

use cds_common::types::{Column, ColumnType, ResultType};

/// First real number inside a formula result
static NUMBER_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[-+]?\d+(?:\.\d+)?(?:e[-+]?\d+)?").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidType {
    /// The destination type cannot hold synced values at all
    ColumnTypeInvalid,
    /// The value's shape does not fit the destination type
    CellTypeInvalid,
}

/// Why a cell was written as empty
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidCellInfo {
    pub column_key: String,
    pub src_column_type: ColumnType,
    pub dst_column_type: ColumnType,
    pub src_column_name: String,
    pub dst_column_name: String,
    pub invalid_type: InvalidType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Convert one source cell into the value written to the destination
pub fn coerce_cell(src: &Column, dst: &Column, value: &Value) -> (Value, Option<InvalidCellInfo>) {
    let projected = project(src, dst, value);
    if projected.is_null() {
        return (Value::Null, None);
    }

    let invalid = |invalid_type, value| InvalidCellInfo {
        column_key: src.key.clone(),
        src_column_type: src.column_type.clone(),
        dst_column_type: dst.column_type.clone(),
        src_column_name: src.name.clone(),
        dst_column_name: dst.name.clone(),
        invalid_type,
        value,
    };

    match shape_fits(&dst.column_type, &projected) {
        None => (Value::Null, Some(invalid(InvalidType::ColumnTypeInvalid, None))),
        Some(false) => (
            Value::Null,
            Some(invalid(InvalidType::CellTypeInvalid, Some(projected))),
        ),
        Some(true) => (projected, None),
    }
}

fn project(src: &Column, dst: &Column, value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }

    match &src.column_type {
        ColumnType::DepartmentSingleSelect => to_integer(value),
        ColumnType::SingleSelect => match value {
            Value::String(_) => value.clone(),
            _ => Value::Null,
        },
        ColumnType::MultipleSelect => match value {
            Value::Array(_) => value.clone(),
            _ => Value::Null,
        },
        ColumnType::Link => project_array(value, dst, true),
        ColumnType::Formula => project_formula(src, value),
        ColumnType::LinkFormula => match src.result_type() {
            Some(ResultType::Array) => project_array(value, dst, false),
            _ => project_formula(src, value),
        },
        _ => value.clone(),
    }
}

fn project_formula(src: &Column, value: &Value) -> Value {
    match src.result_type() {
        Some(ResultType::Number) => match value {
            Value::Number(_) => value.clone(),
            other => extract_number(&plain_string(other)),
        },
        Some(ResultType::Date) => value.clone(),
        Some(ResultType::Bool) => match value {
            Value::Bool(_) => value.clone(),
            other => Value::Bool(plain_string(other).to_uppercase() == "TRUE"),
        },
        Some(ResultType::String) => {
            if src.options().is_empty() {
                join_or_stringify(value)
            } else {
                option_names(src, value)
            }
        }
        _ => match value {
            Value::Array(_) => join_or_stringify(value),
            other => other.clone(),
        },
    }
}

/// Project a list of linked values onto the destination type
fn project_array(value: &Value, dst: &Column, from_link: bool) -> Value {
    let mut items = match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    if from_link {
        items = items
            .into_iter()
            .map(|item| match item.get("display_value") {
                Some(display) => display.clone(),
                None => item,
            })
            .collect();
    }

    let first = items.first().cloned().unwrap_or(Value::Null);

    match &dst.column_type {
        ColumnType::Text
        | ColumnType::LongText
        | ColumnType::Rate
        | ColumnType::Number
        | ColumnType::Duration
        | ColumnType::Email
        | ColumnType::Checkbox
        | ColumnType::AutoNumber
        | ColumnType::Creator
        | ColumnType::Ctime
        | ColumnType::LastModifier
        | ColumnType::Mtime
        | ColumnType::Url
        | ColumnType::Geolocation
        | ColumnType::SingleSelect => first,
        ColumnType::Collaborator => match first {
            Value::Array(nested) => Value::Array(dedupe(nested)),
            _ => Value::Array(dedupe(items)),
        },
        ColumnType::Image | ColumnType::File => match first {
            Value::Array(_) => first,
            _ => Value::Array(items),
        },
        ColumnType::MultipleSelect => {
            let flat = items
                .into_iter()
                .flat_map(|item| match item {
                    Value::Array(nested) => nested,
                    other => vec![other],
                })
                .collect();
            let mut values = dedupe(flat);
            values.sort_by_key(plain_string);
            Value::Array(values)
        }
        ColumnType::Date => format_date(&first, dst.data_str("format")),
        ColumnType::DepartmentSingleSelect => to_integer(&first),
        _ => Value::Array(items),
    }
}

/// Whether `value` has a shape `column_type` accepts; `None` when the type
/// cannot be synced
fn shape_fits(column_type: &ColumnType, value: &Value) -> Option<bool> {
    let fits = match column_type {
        ColumnType::Text
        | ColumnType::Date
        | ColumnType::LongText
        | ColumnType::SingleSelect
        | ColumnType::Url
        | ColumnType::Email
        | ColumnType::Creator
        | ColumnType::LastModifier
        | ColumnType::Ctime
        | ColumnType::Mtime => value.is_string(),
        ColumnType::Image
        | ColumnType::File
        | ColumnType::MultipleSelect
        | ColumnType::Collaborator => value.is_array(),
        ColumnType::Checkbox => value.is_boolean(),
        ColumnType::Duration | ColumnType::Number => value.is_number(),
        ColumnType::Rate | ColumnType::DepartmentSingleSelect => {
            value.is_i64() || value.is_u64()
        }
        ColumnType::Geolocation => value.is_object(),
        _ => return None,
    };
    Some(fits)
}

/// String form of a value without JSON quoting of strings
fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn extract_number(text: &str) -> Value {
    let Some(pattern) = NUMBER_PATTERN.as_ref() else {
        return Value::Null;
    };

    pattern
        .find(text)
        .and_then(|found| found.as_str().parse::<f64>().ok())
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn to_integer(value: &Value) -> Value {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.map(Value::from).unwrap_or(Value::Null)
}

fn join_or_stringify(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::String(join(items.iter())),
        Value::Object(map) => Value::String(join(map.values())),
        Value::Null => Value::Null,
        other => Value::String(plain_string(other)),
    }
}

fn join<'a>(values: impl Iterator<Item = &'a Value>) -> String {
    values.map(plain_string).collect::<Vec<_>>().join(", ")
}

/// Option ids of a string formula resolved to option names
fn option_names(src: &Column, value: &Value) -> Value {
    let name = |id: &Value| {
        let id = plain_string(id);
        src.option_name(&id).map(str::to_string).unwrap_or(id)
    };

    match value {
        Value::Array(ids) => Value::String(ids.iter().map(name).collect::<Vec<_>>().join(", ")),
        other => Value::String(name(other)),
    }
}

fn dedupe(values: Vec<Value>) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::with_capacity(values.len());
    for value in values {
        if !unique.contains(&value) {
            unique.push(value);
        }
    }
    unique
}

/// Reformat an ISO 8601 date or datetime for a date column
fn format_date(value: &Value, format: Option<&str>) -> Value {
    let Some(text) = value.as_str() else {
        return Value::Null;
    };
    let Some(parsed) = parse_iso_datetime(text) else {
        return Value::Null;
    };

    let pattern = match format {
        Some("YYYY-MM-DD HH:mm") => "%Y-%m-%d %H:%M",
        _ => "%Y-%m-%d",
    };
    Value::String(parsed.format(pattern).to_string())
}

fn parse_iso_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(text) {
        return Some(with_offset.naive_local());
    }
    for pattern in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, pattern) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}
