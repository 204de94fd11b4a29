//! Destination schema planning
//!
//! Columns are matched by key. A destination column that shares a key with a
//! source column is updated in place when its definition drifted; source
//! columns without a counterpart are appended. Destination columns that no
//! source column matches are left alone.

use std::collections::HashMap;

use cds_common::types::{Column, ColumnType, SelectOption};

use crate::error::SyncError;

/// Column changes needed to bring the destination in line with the source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaPlan {
    pub to_update: Vec<Column>,
    pub to_append: Vec<Column>,
    pub to_keep: Vec<Column>,
}

impl SchemaPlan {
    pub fn is_noop(&self) -> bool {
        self.to_update.is_empty() && self.to_append.is_empty()
    }
}

/// Plan the destination columns for already translated source columns
pub fn plan_schema(source: &[Column], destination: &[Column]) -> Result<SchemaPlan, SyncError> {
    let by_key: HashMap<&str, &Column> = destination
        .iter()
        .map(|column| (column.key.as_str(), column))
        .collect();
    let by_name: HashMap<&str, &Column> = destination
        .iter()
        .map(|column| (column.name.as_str(), column))
        .collect();

    let name_taken_by_other = |column: &Column| {
        by_name
            .get(column.name.as_str())
            .is_some_and(|existing| existing.key != column.key)
    };

    let mut plan = SchemaPlan::default();
    for column in source {
        match by_key.get(column.key.as_str()) {
            Some(existing) => {
                if existing.name != column.name && name_taken_by_other(column) {
                    return Err(name_collision(column));
                }
                if existing.name == column.name && same_definition(column, existing) {
                    plan.to_keep.push((*existing).clone());
                } else {
                    plan.to_update.push(Column {
                        key: existing.key.clone(),
                        name: column.name.clone(),
                        column_type: column.column_type.clone(),
                        data: column.data.clone(),
                    });
                }
            }
            None if by_name.contains_key(column.name.as_str()) => {
                return Err(name_collision(column));
            }
            None => plan.to_append.push(column.clone()),
        }
    }

    Ok(plan)
}

fn name_collision(column: &Column) -> SyncError {
    SyncError::Planning(format!(
        "column {} already exists in the destination table",
        column.name
    ))
}

/// Whether two columns of the same key need no update
pub fn same_definition(source: &Column, destination: &Column) -> bool {
    if source.column_type != destination.column_type {
        return false;
    }

    let same_keys = |keys: &[&str]| {
        keys.iter()
            .all(|key| source.data_value(key) == destination.data_value(key))
    };

    match source.column_type {
        ColumnType::Text
        | ColumnType::LongText
        | ColumnType::Collaborator
        | ColumnType::Image
        | ColumnType::File
        | ColumnType::Email
        | ColumnType::Url
        | ColumnType::Checkbox
        | ColumnType::Creator
        | ColumnType::Ctime
        | ColumnType::LastModifier
        | ColumnType::Mtime
        | ColumnType::DigitalSign
        | ColumnType::DepartmentSingleSelect => true,
        ColumnType::Rate => same_keys(&["rate_max_number", "rate_style_color", "rate_style_type"]),
        ColumnType::Date => same_keys(&["format"]),
        ColumnType::Number => same_keys(&["format", "decimal", "thousands"]),
        ColumnType::Geolocation => same_keys(&["geo_format"]),
        ColumnType::Duration => same_keys(&["duration_format", "format"]),
        ColumnType::SingleSelect | ColumnType::MultipleSelect => {
            sorted_options(source) == sorted_options(destination)
        }
        _ => false,
    }
}

fn sorted_options(column: &Column) -> Vec<SelectOption> {
    let mut options = column.select_options();
    options.sort_by(|a, b| a.id.cmp(&b.id));
    options
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn column(key: &str, name: &str, column_type: ColumnType, data: Option<Value>) -> Column {
        let column = Column::new(key, name, column_type);
        match data {
            Some(data) => column.with_data(data.as_object().unwrap().clone()),
            None => column,
        }
    }

    fn tags(options: Value) -> Column {
        column(
            "t1",
            "Tags",
            ColumnType::MultipleSelect,
            Some(json!({ "options": options })),
        )
    }

    #[test]
    fn test_fresh_destination_appends_everything() {
        let source = vec![
            column("a", "A", ColumnType::Text, None),
            column("b", "B", ColumnType::Number, Some(json!({"format": "number"}))),
        ];

        let plan = plan_schema(&source, &[]).unwrap();
        assert_eq!(plan.to_append, source);
        assert!(plan.to_update.is_empty());
        assert!(plan.to_keep.is_empty());
    }

    #[test]
    fn test_name_collision_with_other_key_fails() {
        let source = vec![column("new", "C", ColumnType::Text, None)];
        let destination = vec![column("old", "C", ColumnType::Text, None)];

        let err = plan_schema(&source, &destination).unwrap_err();
        assert!(matches!(err, SyncError::Planning(ref msg) if msg.contains('C')));
        assert_eq!(err.error_type(), "generate_synced_columns_error");
    }

    #[test]
    fn test_option_change_updates_column() {
        let source = vec![tags(json!([
            {"id": "o1", "name": "a", "color": "#111"},
            {"id": "o2", "name": "b", "color": "#222"}
        ]))];
        let destination = vec![tags(json!([{"id": "o1", "name": "a", "color": "#111"}]))];

        let plan = plan_schema(&source, &destination).unwrap();
        assert_eq!(plan.to_update, source);
        assert!(plan.to_append.is_empty());
    }

    #[test]
    fn test_option_order_does_not_matter() {
        let source = vec![tags(json!([
            {"id": "o2", "name": "b", "color": "#222"},
            {"id": "o1", "name": "a", "color": "#111"}
        ]))];
        let destination = vec![tags(json!([
            {"id": "o1", "name": "a", "color": "#111"},
            {"id": "o2", "name": "b", "color": "#222"}
        ]))];

        let plan = plan_schema(&source, &destination).unwrap();
        assert_eq!(plan.to_keep.len(), 1);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_planning_twice_is_idempotent() {
        let source = vec![
            column("a", "A", ColumnType::Text, None),
            column("d", "Due", ColumnType::Date, Some(json!({"format": "YYYY-MM-DD"}))),
        ];

        let first = plan_schema(&source, &[]).unwrap();
        let destination = first.to_append.clone();
        let second = plan_schema(&source, &destination).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.to_keep.len(), 2);
    }

    #[test]
    fn test_type_or_format_drift_updates_in_place() {
        let source = vec![column("d", "Due", ColumnType::Date, Some(json!({"format": "M/D/YYYY"})))];
        let destination = vec![
            column("d", "Due", ColumnType::Date, Some(json!({"format": "YYYY-MM-DD"}))),
            column("x", "Notes", ColumnType::LongText, None),
        ];

        let plan = plan_schema(&source, &destination).unwrap();
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].key, "d");
        assert_eq!(plan.to_update[0].data_str("format"), Some("M/D/YYYY"));
    }

    #[test]
    fn test_rename_propagates_by_key() {
        let source = vec![column("a", "Title", ColumnType::Text, None)];
        let destination = vec![column("a", "Name", ColumnType::Text, None)];

        let plan = plan_schema(&source, &destination).unwrap();
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(plan.to_update[0].name, "Title");

        let destination = vec![
            column("a", "Name", ColumnType::Text, None),
            column("z", "Title", ColumnType::Text, None),
        ];
        assert!(plan_schema(&source, &destination).is_err());
    }

    #[test]
    fn test_rate_compares_style() {
        let src = column(
            "r",
            "Stars",
            ColumnType::Rate,
            Some(json!({"rate_max_number": 5, "rate_style_color": "#f00", "rate_style_type": "star"})),
        );
        let mut dst = src.clone();
        assert!(same_definition(&src, &dst));

        dst.data
            .as_mut()
            .unwrap()
            .insert("rate_max_number".to_string(), json!(10));
        assert!(!same_definition(&src, &dst));
    }
}
