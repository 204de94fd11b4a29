//! View filters and sorts compiled to query service SQL
//!
//! Identifiers are column names quoted with back-quotes; literals use single
//! quotes. Filters whose term is empty are ignored, as the row service does
//! when it evaluates a view itself.

use chrono::{Duration, Local, NaiveDate};
use serde_json::Value;
use thiserror::Error;

use cds_common::types::{Column, ColumnType, Filter, ResultType, SortType, View};

/// Filter compilation failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The view holds a filter the user has to fix
    #[error("wrong filter: {0}")]
    WrongFilter(String),

    #[error("filter compilation failed: {0}")]
    Internal(String),
}

/// `WHERE` and `ORDER BY` parts of a view query; each is empty when unused
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlFragments {
    pub where_clause: String,
    pub order_clause: String,
}

pub trait FilterCompiler: Send + Sync {
    fn compile(
        &self,
        table_name: &str,
        columns: &[Column],
        view: &View,
    ) -> Result<SqlFragments, FilterError>;
}

/// Quote an identifier for the query service
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quote a string literal for the query service
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// How a column can be filtered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterKind {
    Text,
    Number,
    Date,
    Checkbox,
    SingleSelect,
    MultipleSelect,
    Collaborator,
}

impl FilterKind {
    fn of(column: &Column) -> Option<Self> {
        match &column.column_type {
            ColumnType::Text
            | ColumnType::LongText
            | ColumnType::Url
            | ColumnType::Email
            | ColumnType::AutoNumber
            | ColumnType::Creator
            | ColumnType::LastModifier => Some(FilterKind::Text),
            ColumnType::Number | ColumnType::Duration | ColumnType::Rate => {
                Some(FilterKind::Number)
            }
            ColumnType::Date | ColumnType::Ctime | ColumnType::Mtime => Some(FilterKind::Date),
            ColumnType::Checkbox => Some(FilterKind::Checkbox),
            ColumnType::SingleSelect => Some(FilterKind::SingleSelect),
            ColumnType::MultipleSelect => Some(FilterKind::MultipleSelect),
            ColumnType::Collaborator => Some(FilterKind::Collaborator),
            ColumnType::Formula | ColumnType::LinkFormula => match column.result_type() {
                Some(ResultType::String) => Some(FilterKind::Text),
                Some(ResultType::Number) => Some(FilterKind::Number),
                Some(ResultType::Date) => Some(FilterKind::Date),
                Some(ResultType::Bool) => Some(FilterKind::Checkbox),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Default [`FilterCompiler`]
#[derive(Debug, Clone, Default)]
pub struct SqlFilterCompiler {
    today: Option<NaiveDate>,
}

impl SqlFilterCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the date `today`, `yesterday` and `tomorrow` resolve against
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    fn compile_filter(&self, column: &Column, filter: &Filter) -> Result<Option<String>, FilterError> {
        let kind = FilterKind::of(column).ok_or_else(|| {
            FilterError::WrongFilter(format!(
                "column {} of type {} cannot be filtered",
                column.name, column.column_type
            ))
        })?;
        let ident = quote_ident(&column.name);
        let predicate = filter.filter_predicate.as_str();

        match predicate {
            "is empty" => return Ok(Some(format!("{} IS NULL", ident))),
            "is not empty" => return Ok(Some(format!("{} IS NOT NULL", ident))),
            _ => {}
        }

        match kind {
            FilterKind::Text => text_clause(&ident, predicate, &filter.filter_term),
            FilterKind::Number => number_clause(&ident, predicate, &filter.filter_term),
            FilterKind::Date => self.date_clause(&ident, filter),
            FilterKind::Checkbox => checkbox_clause(&ident, predicate, &filter.filter_term),
            FilterKind::SingleSelect => single_select_clause(&ident, column, filter),
            FilterKind::MultipleSelect | FilterKind::Collaborator => {
                multiple_select_clause(&ident, column, kind, filter)
            }
        }
    }

    fn date_clause(&self, ident: &str, filter: &Filter) -> Result<Option<String>, FilterError> {
        let modifier = filter
            .filter_term_modifier
            .as_deref()
            .unwrap_or("exact_date");
        let today = self.today();

        let date = match modifier {
            "today" => today,
            "yesterday" => today - Duration::days(1),
            "tomorrow" => today + Duration::days(1),
            "exact_date" => {
                let Some(term) = term_string(&filter.filter_term) else {
                    return Ok(None);
                };
                let day = term.get(..10).unwrap_or(term.as_str());
                NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| {
                    FilterError::WrongFilter(format!("invalid date term: {}", term))
                })?
            }
            other => {
                return Err(FilterError::WrongFilter(format!(
                    "unsupported date modifier: {}",
                    other
                )))
            }
        };

        let start = quote_literal(&date.format("%Y-%m-%d").to_string());
        let next = quote_literal(&(date + Duration::days(1)).format("%Y-%m-%d").to_string());

        let clause = match filter.filter_predicate.as_str() {
            "is" => format!("({ident} >= {start} AND {ident} < {next})"),
            "is not" => format!("({ident} < {start} OR {ident} >= {next})"),
            "is before" => format!("{ident} < {start}"),
            "is after" => format!("{ident} >= {next}"),
            "is on or before" => format!("{ident} < {next}"),
            "is on or after" => format!("{ident} >= {start}"),
            other => return Err(unsupported(other)),
        };

        Ok(Some(clause))
    }
}

impl FilterCompiler for SqlFilterCompiler {
    fn compile(
        &self,
        table_name: &str,
        columns: &[Column],
        view: &View,
    ) -> Result<SqlFragments, FilterError> {
        let column = |key: &str| {
            columns
                .iter()
                .find(|column| column.key == key)
                .ok_or_else(|| {
                    FilterError::WrongFilter(format!(
                        "column {} not found in table {}",
                        key, table_name
                    ))
                })
        };

        let mut clauses = Vec::new();
        for filter in &view.filters {
            if let Some(clause) = self.compile_filter(column(&filter.column_key)?, filter)? {
                clauses.push(clause);
            }
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            let joined = clauses
                .iter()
                .map(|clause| format!("({})", clause))
                .collect::<Vec<_>>()
                .join(&format!(" {} ", view.filter_conjunction.as_sql()));
            format!("WHERE {}", joined)
        };

        let mut orders = Vec::new();
        for sort in &view.sorts {
            let direction = match sort.sort_type {
                SortType::Up => "ASC",
                SortType::Down => "DESC",
            };
            orders.push(format!(
                "{} {}",
                quote_ident(&column(&sort.column_key)?.name),
                direction
            ));
        }

        let order_clause = if orders.is_empty() {
            String::new()
        } else {
            format!("ORDER BY {}", orders.join(", "))
        };

        Ok(SqlFragments {
            where_clause,
            order_clause,
        })
    }
}

fn unsupported(predicate: &str) -> FilterError {
    FilterError::WrongFilter(format!("unsupported predicate: {}", predicate))
}

/// Non-empty scalar term as a string
fn term_string(term: &Value) -> Option<String> {
    match term {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// List term, accepting a single scalar as a one-element list
fn term_list(term: &Value) -> Vec<String> {
    match term {
        Value::Array(items) => items.iter().filter_map(term_string).collect(),
        other => term_string(other).into_iter().collect(),
    }
}

fn literal_list(values: &[String]) -> String {
    values
        .iter()
        .map(|value| quote_literal(value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `LIKE` pattern matching `term` anywhere, with its wildcards taken literally
fn contains_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn text_clause(ident: &str, predicate: &str, term: &Value) -> Result<Option<String>, FilterError> {
    let Some(term) = term_string(term) else {
        return Ok(None);
    };

    let clause = match predicate {
        "contains" => format!("{} LIKE {}", ident, quote_literal(&contains_pattern(&term))),
        "does not contain" => {
            format!("{} NOT LIKE {}", ident, quote_literal(&contains_pattern(&term)))
        }
        "is" => format!("{} = {}", ident, quote_literal(&term)),
        "is not" => format!("{} <> {}", ident, quote_literal(&term)),
        other => return Err(unsupported(other)),
    };

    Ok(Some(clause))
}

fn number_clause(
    ident: &str,
    predicate: &str,
    term: &Value,
) -> Result<Option<String>, FilterError> {
    let Some(term) = term_string(term) else {
        return Ok(None);
    };
    let number: f64 = term
        .trim()
        .parse()
        .map_err(|_| FilterError::WrongFilter(format!("invalid number term: {}", term)))?;

    let operator = match predicate {
        "equal" | "=" => "=",
        "not equal" | "≠" | "!=" => "<>",
        "less" | "<" => "<",
        "greater" | ">" => ">",
        "less or equal" | "<=" | "≤" => "<=",
        "greater or equal" | ">=" | "≥" => ">=",
        other => return Err(unsupported(other)),
    };

    Ok(Some(format!("{} {} {}", ident, operator, number)))
}

fn checkbox_clause(
    ident: &str,
    predicate: &str,
    term: &Value,
) -> Result<Option<String>, FilterError> {
    if predicate != "is" {
        return Err(unsupported(predicate));
    }

    let checked = match term {
        Value::Bool(b) => *b,
        Value::String(s) if s.eq_ignore_ascii_case("true") => true,
        Value::String(s) if s.eq_ignore_ascii_case("false") => false,
        Value::Null => return Ok(None),
        other => {
            return Err(FilterError::WrongFilter(format!(
                "invalid checkbox term: {}",
                other
            )))
        }
    };

    Ok(Some(if checked {
        format!("{} = true", ident)
    } else {
        format!("({} = false OR {} IS NULL)", ident, ident)
    }))
}

fn option_names(column: &Column, ids: &[String]) -> Result<Vec<String>, FilterError> {
    ids.iter()
        .map(|id| {
            column.option_name(id).map(str::to_string).ok_or_else(|| {
                FilterError::WrongFilter(format!("option {} not found in column {}", id, column.name))
            })
        })
        .collect()
}

fn single_select_clause(
    ident: &str,
    column: &Column,
    filter: &Filter,
) -> Result<Option<String>, FilterError> {
    let ids = term_list(&filter.filter_term);
    if ids.is_empty() {
        return Ok(None);
    }
    let names = option_names(column, &ids)?;

    let clause = match filter.filter_predicate.as_str() {
        "is" => format!("{} = {}", ident, quote_literal(&names[0])),
        "is not" => format!("{} <> {}", ident, quote_literal(&names[0])),
        "is any of" => format!("{} IN ({})", ident, literal_list(&names)),
        "is none of" => format!("{} NOT IN ({})", ident, literal_list(&names)),
        other => return Err(unsupported(other)),
    };

    Ok(Some(clause))
}

fn multiple_select_clause(
    ident: &str,
    column: &Column,
    kind: FilterKind,
    filter: &Filter,
) -> Result<Option<String>, FilterError> {
    let terms = term_list(&filter.filter_term);
    if terms.is_empty() {
        return Ok(None);
    }
    let values = if kind == FilterKind::MultipleSelect {
        option_names(column, &terms)?
    } else {
        terms
    };

    let operator = match filter.filter_predicate.as_str() {
        "has any of" => "HAS ANY OF",
        "has all of" => "HAS ALL OF",
        "has none of" => "HAS NONE OF",
        "is exactly" => "IS EXACTLY",
        other => return Err(unsupported(other)),
    };

    Ok(Some(format!("{} {} ({})", ident, operator, literal_list(&values))))
}
