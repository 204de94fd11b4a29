//! Data model shared by the engine and its service clients
//!
//! Mirrors what the row service reports in a base's metadata: an ordered list
//! of tables, each with ordered columns and named views. Rows are plain JSON
//! objects keyed by column key plus the `_id` field.

mod column;
mod view;

pub use column::{Column, ColumnType, ResultType, SelectOption};
pub use view::{Filter, FilterConjunction, Sort, SortType, View};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CdsError, Result};
use view::null_as_default;

/// Key of the row identifier field
pub const ROW_ID_KEY: &str = "_id";

/// A row, keyed by column key
pub type Row = Map<String, Value>;

/// Identifier of a row, if it carries one
pub fn row_id(row: &Row) -> Option<&str> {
    row.get(ROW_ID_KEY).and_then(Value::as_str)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub columns: Vec<Column>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub views: Vec<View>,
}

impl Table {
    pub fn view_by_id(&self, view_id: &str) -> Result<&View> {
        self.views
            .iter()
            .find(|view| view.id == view_id)
            .ok_or_else(|| CdsError::ViewNotFound(format!("{} in table {}", view_id, self.id)))
    }

    /// Columns not hidden by the view, in table order
    pub fn visible_columns(&self, view: &View) -> Vec<Column> {
        self.columns
            .iter()
            .filter(|column| !view.is_hidden(&column.key))
            .cloned()
            .collect()
    }
}

/// Metadata of one base
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Opaque version token, advanced by the row service on every change
    #[serde(default)]
    pub version: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tables: Vec<Table>,
}

impl Metadata {
    pub fn table_by_id(&self, table_id: &str) -> Result<&Table> {
        self.tables
            .iter()
            .find(|table| table.id == table_id)
            .ok_or_else(|| CdsError::TableNotFound(table_id.to_string()))
    }

    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|table| table.name == name)
    }
}
