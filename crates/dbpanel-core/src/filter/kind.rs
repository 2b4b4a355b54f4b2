use serde::Deserialize;

use crate::error::{PanelError, Result};

/// How a filter's options are sourced and how its selection is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    /// Options come from `SELECT DISTINCT id, display FROM table`.
    Lookup {
        table: String,
        display_column: String,
        id_column: String,
    },
    /// Fixed list; each value maps to itself.
    Enum { values: Vec<String> },
    /// "Yes" / "No".
    Boolean,
    /// Free date input, passed through.
    Date,
    /// `column >= value`
    DateRangeStart { column: String },
    /// `column <= value`
    DateRangeEnd { column: String },
}

impl FilterKind {
    pub fn is_date_range(&self) -> bool {
        matches!(
            self,
            FilterKind::DateRangeStart { .. } | FilterKind::DateRangeEnd { .. }
        )
    }

    pub fn is_date(&self) -> bool {
        matches!(self, FilterKind::Date) || self.is_date_range()
    }
}

/// Where a selected value ends up in the report statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Positional argument of a set-returning function; `NULL` when unset.
    Argument,
    /// Condition in the WHERE clause; omitted when unset.
    Predicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDecl {
    pub key: String,
    pub kind: FilterKind,
    pub placement: Placement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    View,
    Function,
}

/// A reporting view or function together with its filters, in declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTarget {
    pub name: String,
    pub kind: TargetKind,
    pub filters: Vec<FilterDecl>,
}

impl ReportTarget {
    pub fn is_callable(&self) -> bool {
        self.kind == TargetKind::Function
    }

    pub fn filter(&self, key: &str) -> Option<&FilterDecl> {
        self.filters.iter().find(|f| f.key == key)
    }
}

/// A `[[report.filter]]` entry as written in the catalog file.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawFilter {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub table: Option<String>,
    pub display: Option<String>,
    pub id: Option<String>,
    pub values: Option<Vec<String>>,
    pub column: Option<String>,
    pub placement: Option<String>,
}

/// A `[[report]]` entry as written in the catalog file.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawReport {
    pub name: String,
    #[serde(default = "default_target_kind")]
    pub kind: String,
    #[serde(default)]
    pub filter: Vec<RawFilter>,
}

fn default_target_kind() -> String {
    "view".to_string()
}

fn required(report: &str, raw: &RawFilter, field: &str, value: &Option<String>) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(PanelError::configuration(
            format!("{report}.{}", raw.key),
            format!("`{}` filter requires `{field}`", raw.kind),
        )),
    }
}

impl RawFilter {
    pub(crate) fn parse(&self, report: &str, target: TargetKind) -> Result<FilterDecl> {
        let key = format!("{report}.{}", self.key);
        if self.key.trim().is_empty() {
            return Err(PanelError::configuration(report, "filter with an empty key"));
        }

        let kind = match self.kind.as_str() {
            "lookup" => FilterKind::Lookup {
                table: required(report, self, "table", &self.table)?,
                display_column: required(report, self, "display", &self.display)?,
                id_column: required(report, self, "id", &self.id)?,
            },
            "enum" => match &self.values {
                Some(values) if !values.is_empty() => FilterKind::Enum {
                    values: values.clone(),
                },
                _ => {
                    return Err(PanelError::configuration(
                        key,
                        "`enum` filter requires a non-empty `values` list",
                    ))
                }
            },
            "boolean" => FilterKind::Boolean,
            "date" => FilterKind::Date,
            "date_range_start" => FilterKind::DateRangeStart {
                column: required(report, self, "column", &self.column)?,
            },
            "date_range_end" => FilterKind::DateRangeEnd {
                column: required(report, self, "column", &self.column)?,
            },
            other => {
                return Err(PanelError::configuration(
                    key,
                    format!("unsupported filter type `{other}`"),
                ))
            }
        };

        let placement = match (self.placement.as_deref(), target) {
            (None, TargetKind::Function) if !kind.is_date_range() => Placement::Argument,
            (None, _) => Placement::Predicate,
            (Some("predicate"), _) => Placement::Predicate,
            (Some("argument"), TargetKind::Function) if !kind.is_date_range() => Placement::Argument,
            (Some("argument"), _) => {
                return Err(PanelError::configuration(
                    key,
                    "only non-range filters of a function can be arguments",
                ))
            }
            (Some(other), _) => {
                return Err(PanelError::configuration(
                    key,
                    format!("unknown placement `{other}`"),
                ))
            }
        };

        Ok(FilterDecl {
            key: self.key.clone(),
            kind,
            placement,
        })
    }
}

impl RawReport {
    pub(crate) fn parse(&self) -> Result<ReportTarget> {
        let kind = match self.kind.as_str() {
            "view" => TargetKind::View,
            "function" => TargetKind::Function,
            other => {
                return Err(PanelError::configuration(
                    &self.name,
                    format!("unknown target kind `{other}`"),
                ))
            }
        };

        let mut filters: Vec<FilterDecl> = Vec::with_capacity(self.filter.len());
        for raw in &self.filter {
            let decl = raw.parse(&self.name, kind)?;
            if filters.iter().any(|f| f.key == decl.key) {
                return Err(PanelError::configuration(
                    format!("{}.{}", self.name, decl.key),
                    "duplicate filter key",
                ));
            }
            filters.push(decl);
        }

        Ok(ReportTarget {
            name: self.name.clone(),
            kind,
            filters,
        })
    }
}
