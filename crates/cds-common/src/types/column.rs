//! Column descriptors and the closed set of column types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column type as reported by the row service
///
/// Unknown type strings are kept in [`ColumnType::Other`] so they survive a
/// round trip; every component treats them as untranslatable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    Text,
    LongText,
    Number,
    Checkbox,
    Date,
    Duration,
    Url,
    Email,
    Rate,
    AutoNumber,
    Image,
    File,
    Geolocation,
    DigitalSign,
    Collaborator,
    Creator,
    LastModifier,
    Ctime,
    Mtime,
    DepartmentSingleSelect,
    SingleSelect,
    MultipleSelect,
    Formula,
    Link,
    LinkFormula,
    Button,
    Other(String),
}

impl ColumnType {
    pub fn as_str(&self) -> &str {
        match self {
            ColumnType::Text => "text",
            ColumnType::LongText => "long-text",
            ColumnType::Number => "number",
            ColumnType::Checkbox => "checkbox",
            ColumnType::Date => "date",
            ColumnType::Duration => "duration",
            ColumnType::Url => "url",
            ColumnType::Email => "email",
            ColumnType::Rate => "rate",
            ColumnType::AutoNumber => "auto-number",
            ColumnType::Image => "image",
            ColumnType::File => "file",
            ColumnType::Geolocation => "geolocation",
            ColumnType::DigitalSign => "digital-sign",
            ColumnType::Collaborator => "collaborator",
            ColumnType::Creator => "creator",
            ColumnType::LastModifier => "last-modifier",
            ColumnType::Ctime => "ctime",
            ColumnType::Mtime => "mtime",
            ColumnType::DepartmentSingleSelect => "department-single-select",
            ColumnType::SingleSelect => "single-select",
            ColumnType::MultipleSelect => "multiple-select",
            ColumnType::Formula => "formula",
            ColumnType::Link => "link",
            ColumnType::LinkFormula => "link-formula",
            ColumnType::Button => "button",
            ColumnType::Other(other) => other,
        }
    }
}

impl From<String> for ColumnType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => ColumnType::Text,
            "long-text" => ColumnType::LongText,
            "number" => ColumnType::Number,
            "checkbox" => ColumnType::Checkbox,
            "date" => ColumnType::Date,
            "duration" => ColumnType::Duration,
            "url" => ColumnType::Url,
            "email" => ColumnType::Email,
            "rate" => ColumnType::Rate,
            "auto-number" => ColumnType::AutoNumber,
            "image" => ColumnType::Image,
            "file" => ColumnType::File,
            "geolocation" => ColumnType::Geolocation,
            "digital-sign" => ColumnType::DigitalSign,
            "collaborator" => ColumnType::Collaborator,
            "creator" => ColumnType::Creator,
            "last-modifier" => ColumnType::LastModifier,
            "ctime" => ColumnType::Ctime,
            "mtime" => ColumnType::Mtime,
            "department-single-select" => ColumnType::DepartmentSingleSelect,
            "single-select" => ColumnType::SingleSelect,
            "multiple-select" => ColumnType::MultipleSelect,
            "formula" => ColumnType::Formula,
            "link" => ColumnType::Link,
            "link-formula" => ColumnType::LinkFormula,
            "button" => ColumnType::Button,
            _ => ColumnType::Other(value),
        }
    }
}

impl From<&str> for ColumnType {
    fn from(value: &str) -> Self {
        ColumnType::from(value.to_string())
    }
}

impl From<ColumnType> for String {
    fn from(value: ColumnType) -> Self {
        match value {
            ColumnType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical result type of formula, link and link-formula columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    String,
    Number,
    Bool,
    Date,
    Array,
}

impl ResultType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "string" => Some(ResultType::String),
            "number" => Some(ResultType::Number),
            "bool" => Some(ResultType::Bool),
            "date" => Some(ResultType::Date),
            "array" => Some(ResultType::Array),
            _ => None,
        }
    }
}

/// One entry of a select column's option list
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SelectOption {
    pub id: String,
    pub name: String,
    pub color: String,
}

/// A column of a table, identified by its stable `key`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl Column {
    pub fn new(key: impl Into<String>, name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            column_type,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }

    pub fn data_value(&self, key: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(key))
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data_value(key).and_then(Value::as_str)
    }

    /// `data.result_type` of a derived column
    pub fn result_type(&self) -> Option<ResultType> {
        self.data_str("result_type").and_then(ResultType::parse)
    }

    /// `data.array_type`; an empty string counts as absent
    pub fn array_type(&self) -> Option<ColumnType> {
        self.data_str("array_type")
            .filter(|value| !value.is_empty())
            .map(ColumnType::from)
    }

    pub fn array_data(&self) -> Option<&Map<String, Value>> {
        self.data_value("array_data").and_then(Value::as_object)
    }

    /// Raw option list, empty when `data.options` is absent or malformed
    pub fn options(&self) -> &[Value] {
        self.data_value("options")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Option list normalised to `{id, name, color}` triples
    pub fn select_options(&self) -> Vec<SelectOption> {
        self.options()
            .iter()
            .map(|option| {
                let field = |name: &str| {
                    option
                        .get(name)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                SelectOption {
                    id: field("id"),
                    name: field("name"),
                    color: field("color"),
                }
            })
            .collect()
    }

    /// Name of the option with the given id
    pub fn option_name(&self, option_id: &str) -> Option<&str> {
        self.options()
            .iter()
            .find(|option| option.get("id").and_then(Value::as_str) == Some(option_id))
            .and_then(|option| option.get("name"))
            .and_then(Value::as_str)
    }
}
