use std::collections::HashMap;

use chrono::NaiveDate;
use dbpanel_shared::PerfTimer;
use tracing::debug;

use super::kind::{FilterDecl, FilterKind, Placement, ReportTarget};
use crate::error::{PanelError, Result};
use crate::executor::execute_read_only;
use crate::session::Session;
use crate::sql::{build_lookup, build_select, Predicate, StatementPlan};
use crate::value::SqlValue;

/// Sentinel option meaning "leave this filter out".
pub const ANY_OPTION: &str = "Any";

pub const YES_OPTION: &str = "Yes";
pub const NO_OPTION: &str = "No";

/// The option list of one filter and what each option stands for.
///
/// `options` always starts with [`ANY_OPTION`], which has no `id_map` entry.
/// Date filters have no other options; their input is parsed instead.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilterOption {
    pub options: Vec<String>,
    pub id_map: HashMap<String, SqlValue>,
}

impl ResolvedFilterOption {
    fn any_only() -> Self {
        Self {
            options: vec![ANY_OPTION.to_string()],
            id_map: HashMap::new(),
        }
    }

    /// Record `display -> value`. A display seen before keeps its position
    /// in `options` but takes the newer value.
    fn push(&mut self, display: String, value: SqlValue) {
        if !self.id_map.contains_key(&display) {
            self.options.push(display.clone());
        }
        self.id_map.insert(display, value);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilter {
    pub decl: FilterDecl,
    pub option: ResolvedFilterOption,
}

/// Every filter of one report target, resolved, in declared order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilters {
    pub target: String,
    pub filters: Vec<ResolvedFilter>,
}

impl ResolvedFilters {
    pub fn get(&self, key: &str) -> Option<&ResolvedFilter> {
        self.filters.iter().find(|f| f.decl.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedFilter> {
        self.filters.iter()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl ResolvedFilter {
    /// Translate what the user picked into the value to bind.
    ///
    /// `None` means "Any": blank input or the sentinel itself. Date filters
    /// have no option list; their input is parsed as an ISO `YYYY-MM-DD`
    /// date and anything else is a `Validation` error.
    pub fn selection(&self, raw: &str) -> Result<Option<SqlValue>> {
        let raw = raw.trim();
        if raw.is_empty() || raw == ANY_OPTION {
            return Ok(None);
        }

        if self.decl.kind.is_date() {
            return NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|d| Some(SqlValue::Date(d)))
                .map_err(|_| {
                    PanelError::validation(format!(
                        "`{}` expects a date (YYYY-MM-DD)",
                        self.decl.key
                    ))
                });
        }

        self.option
            .id_map
            .get(raw)
            .cloned()
            .map(Some)
            .ok_or_else(|| {
                PanelError::validation(format!("unknown option for filter `{}`", self.decl.key))
            })
    }
}

async fn resolve_one<S: Session + ?Sized>(
    session: &mut S,
    target: &str,
    decl: &FilterDecl,
) -> Result<ResolvedFilterOption> {
    let mut option = ResolvedFilterOption::any_only();

    match &decl.kind {
        FilterKind::Lookup {
            table,
            display_column,
            id_column,
        } => {
            let plan = build_lookup(table, display_column, id_column)?;
            let rows = execute_read_only(session, &plan).await.map_err(|e| {
                PanelError::introspection(target, format!("lookup for `{}` failed: {e}", decl.key))
            })?;
            for row in rows.rows {
                let mut cells = row.into_iter();
                let (Some(id), Some(display)) = (cells.next(), cells.next()) else {
                    continue;
                };
                if display.is_null() {
                    continue;
                }
                option.push(display.to_string(), id);
            }
        }
        FilterKind::Enum { values } => {
            for value in values {
                option.push(value.clone(), SqlValue::from(value.as_str()));
            }
        }
        FilterKind::Boolean => {
            option.push(YES_OPTION.to_string(), SqlValue::Bool(true));
            option.push(NO_OPTION.to_string(), SqlValue::Bool(false));
        }
        FilterKind::Date | FilterKind::DateRangeStart { .. } | FilterKind::DateRangeEnd { .. } => {}
    }

    Ok(option)
}

/// Resolve every filter of `target` into its option list.
///
/// Lookup filters issue one query each; nothing else touches the database.
pub async fn resolve_filters<S: Session + ?Sized>(
    session: &mut S,
    target: &ReportTarget,
) -> Result<ResolvedFilters> {
    let _timer = PerfTimer::new("dbpanel_filter_resolve_seconds");

    let mut filters = Vec::with_capacity(target.filters.len());
    for decl in &target.filters {
        let option = resolve_one(session, &target.name, decl).await?;
        debug!(
            report = %target.name,
            key = %decl.key,
            options = option.options.len(),
            "Resolved filter"
        );
        filters.push(ResolvedFilter {
            decl: decl.clone(),
            option,
        });
    }

    Ok(ResolvedFilters {
        target: target.name.clone(),
        filters,
    })
}

/// Build the report SELECT from `(filter key, raw selection)` pairs.
///
/// Arguments of a function target are bound in declared order, `NULL`
/// standing in for "Any". Predicate filters left at "Any" are omitted.
pub fn build_report_select<K: AsRef<str>, V: AsRef<str>>(
    target: &ReportTarget,
    resolved: &ResolvedFilters,
    selections: &[(K, V)],
) -> Result<StatementPlan> {
    if resolved.target != target.name {
        return Err(PanelError::validation(format!(
            "filters of `{}` cannot be applied to `{}`",
            resolved.target, target.name
        )));
    }

    for (key, _) in selections {
        if resolved.get(key.as_ref()).is_none() {
            return Err(PanelError::validation(format!(
                "`{}` has no filter `{}`",
                target.name,
                key.as_ref()
            )));
        }
    }

    let mut args = Vec::new();
    let mut predicates = Vec::new();

    for filter in resolved.iter() {
        let raw = selections
            .iter()
            .find(|(key, _)| key.as_ref() == filter.decl.key)
            .map(|(_, raw)| raw.as_ref())
            .unwrap_or("");
        let value = filter.selection(raw)?;

        match filter.decl.placement {
            Placement::Argument => args.push(value.unwrap_or(SqlValue::Null)),
            Placement::Predicate => {
                let Some(value) = value else { continue };
                let predicate = match &filter.decl.kind {
                    FilterKind::DateRangeStart { column } => Predicate::at_least(column.as_str(), value),
                    FilterKind::DateRangeEnd { column } => Predicate::at_most(column.as_str(), value),
                    _ => Predicate::eq(filter.decl.key.as_str(), value),
                };
                predicates.push(predicate);
            }
        }
    }

    build_select(&target.name, &predicates, target.is_callable(), &args)
}
