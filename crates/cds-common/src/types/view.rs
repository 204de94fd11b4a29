//! Views: named filter and sort projections over a table

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// How the filters of a view are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterConjunction {
    #[default]
    And,
    Or,
}

impl FilterConjunction {
    pub fn as_sql(self) -> &'static str {
        match self {
            FilterConjunction::And => "AND",
            FilterConjunction::Or => "OR",
        }
    }
}

/// A single predicate over one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column_key: String,
    pub filter_predicate: String,
    #[serde(default)]
    pub filter_term: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_term_modifier: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortType {
    #[default]
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub column_key: String,
    #[serde(default)]
    pub sort_type: SortType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filters: Vec<Filter>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub filter_conjunction: FilterConjunction,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sorts: Vec<Sort>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hidden_columns: Vec<String>,
}

impl View {
    /// An unfiltered, unsorted view showing every column
    pub fn unfiltered(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            filters: Vec::new(),
            filter_conjunction: FilterConjunction::And,
            sorts: Vec::new(),
            hidden_columns: Vec::new(),
        }
    }

    pub fn is_hidden(&self, column_key: &str) -> bool {
        self.hidden_columns.iter().any(|key| key == column_key)
    }
}

/// The row service sends `null` for empty lists on older views
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
