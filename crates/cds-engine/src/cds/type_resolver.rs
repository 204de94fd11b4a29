//! Source column to destination column translation
//!
//! Derived columns (formula, link, link-formula) cannot be copied as is: the
//! destination stores their computed values, so each one becomes a plain
//! column of its logical result type. Buttons have no values and are dropped.

use serde_json::{json, Map, Value};

use cds_common::types::{Column, ColumnType, ResultType};

const DATE_FORMATS: &[&str] = &[
    "YYYY-MM-DD",
    "M/D/YYYY",
    "DD/MM/YYYY",
    "YYYY-MM-DD HH:mm",
    "DD.MM.YYYY",
    "DD.MM.YYYY HH:mm",
    "M/D/YYYY HH:mm",
];
const DURATION_FORMATS: &[&str] = &["h:mm", "h:mm:ss"];
const NUMBER_FORMATS: &[&str] = &["number", "percent", "yuan", "dollar", "euro", "custom_currency"];
const NUMBER_DECIMALS: &[&str] = &["dot", "comma"];
const NUMBER_THOUSANDS: &[&str] = &["no", "comma", "dot", "space"];
const GEO_FORMATS: &[&str] = &[
    "geolocation",
    "lng_lat",
    "country_region",
    "province_city_district",
    "province",
    "province_city",
];

/// `data` keys a formula number result carries over to the number column
const FORMULA_NUMBER_KEYS: &[&str] = &[
    "format",
    "precision",
    "decimal",
    "thousands",
    "currency_symbol",
    "enable_precision",
    "enable_fill_default_value",
];

/// Translate a source column; `None` means the column is not synced
pub fn resolve_column(column: &Column) -> Option<Column> {
    let (column_type, data) = match &column.column_type {
        ColumnType::Button => return None,
        ColumnType::AutoNumber => (ColumnType::Text, None),
        ColumnType::Formula => resolve_result(column, false),
        ColumnType::Link => resolve_array(column.array_type(), column.array_data()),
        ColumnType::LinkFormula => resolve_result(column, true),
        ColumnType::Other(_) => (ColumnType::Text, None),
        other => (other.clone(), column.data.clone()),
    };

    Some(Column {
        key: column.key.clone(),
        name: column.name.clone(),
        data: normalize_data(&column_type, data),
        column_type,
    })
}

/// Translate every column, skipping the untranslatable ones
pub fn resolve_columns<'a>(columns: impl IntoIterator<Item = &'a Column>) -> Vec<Column> {
    columns.into_iter().filter_map(resolve_column).collect()
}

fn resolve_result(column: &Column, allow_array: bool) -> (ColumnType, Option<Map<String, Value>>) {
    match column.result_type() {
        Some(ResultType::String) => (ColumnType::Text, None),
        Some(ResultType::Number) => (
            ColumnType::Number,
            Some(pick(column.data.as_ref(), FORMULA_NUMBER_KEYS)),
        ),
        Some(ResultType::Date) => (ColumnType::Date, Some(pick(column.data.as_ref(), &["format"]))),
        Some(ResultType::Bool) => (ColumnType::Checkbox, None),
        Some(ResultType::Array) if allow_array => {
            resolve_array(column.array_type(), column.array_data())
        }
        _ => (ColumnType::Text, None),
    }
}

fn resolve_array(
    array_type: Option<ColumnType>,
    array_data: Option<&Map<String, Value>>,
) -> (ColumnType, Option<Map<String, Value>>) {
    let Some(array_type) = array_type else {
        return (ColumnType::Text, None);
    };

    match array_type {
        // A list of single-select values only fits a multiple-select column
        ColumnType::SingleSelect => (ColumnType::MultipleSelect, array_data.cloned()),
        ColumnType::Number
        | ColumnType::Date
        | ColumnType::Duration
        | ColumnType::Geolocation
        | ColumnType::MultipleSelect
        | ColumnType::Rate => (array_type, array_data.cloned()),
        ColumnType::Text
        | ColumnType::LongText
        | ColumnType::Checkbox
        | ColumnType::Url
        | ColumnType::Email
        | ColumnType::Image
        | ColumnType::File
        | ColumnType::DigitalSign
        | ColumnType::Collaborator
        | ColumnType::Creator
        | ColumnType::LastModifier
        | ColumnType::Ctime
        | ColumnType::Mtime
        | ColumnType::DepartmentSingleSelect => (array_type, None),
        _ => (ColumnType::Text, None),
    }
}

fn pick(data: Option<&Map<String, Value>>, keys: &[&str]) -> Map<String, Value> {
    let mut picked = Map::new();
    if let Some(data) = data {
        for key in keys {
            if let Some(value) = data.get(*key) {
                picked.insert((*key).to_string(), value.clone());
            }
        }
    }
    picked
}

/// Fill every required `data` key that is absent or outside its allowed set
pub fn normalize_data(
    column_type: &ColumnType,
    data: Option<Map<String, Value>>,
) -> Option<Map<String, Value>> {
    let required = matches!(
        column_type,
        ColumnType::Date
            | ColumnType::Duration
            | ColumnType::Number
            | ColumnType::Geolocation
            | ColumnType::SingleSelect
            | ColumnType::MultipleSelect
    );
    if !required {
        return data;
    }

    let mut data = data.unwrap_or_default();
    match column_type {
        ColumnType::Date => ensure_one_of(&mut data, "format", DATE_FORMATS),
        ColumnType::Duration => {
            ensure_one_of(&mut data, "duration_format", DURATION_FORMATS);
            data.insert("format".to_string(), json!("duration"));
        }
        ColumnType::Number => {
            ensure_one_of(&mut data, "format", NUMBER_FORMATS);
            ensure_one_of(&mut data, "decimal", NUMBER_DECIMALS);
            ensure_one_of(&mut data, "thousands", NUMBER_THOUSANDS);
        }
        ColumnType::Geolocation => {
            if !is_one_of(data.get("geo_format"), GEO_FORMATS) {
                data.insert("geo_format".to_string(), json!("lng_lat"));
            }
        }
        ColumnType::SingleSelect | ColumnType::MultipleSelect => {
            if !data.get("options").is_some_and(Value::is_array) {
                data.insert("options".to_string(), json!([]));
            }
        }
        _ => {}
    }

    Some(data)
}

fn is_one_of(value: Option<&Value>, allowed: &[&str]) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|value| allowed.contains(&value))
}

/// The first allowed value is the default
fn ensure_one_of(data: &mut Map<String, Value>, key: &str, allowed: &[&str]) {
    if !is_one_of(data.get(key), allowed) {
        if let Some(default) = allowed.first() {
            data.insert(key.to_string(), json!(default));
        }
    }
}
