//! Per-table choice between generic statements and stored procedures.

use std::collections::HashMap;

use dbpanel_shared::IsolationLevel;
use serde::Deserialize;

use crate::error::{PanelError, Result};
use crate::filter::Catalog;
use crate::sql::{
    build_call, build_insert_with_lookups, quote_ident, validate_type_name, ForeignKeyLookup,
    StatementPlan,
};
use crate::value::SqlValue;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureParam {
    pub column: String,
    pub sql_type: String,
}

/// A write routed through `CALL procedure(CAST($n AS type), ...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureCall {
    pub procedure: String,
    pub params: Vec<ProcedureParam>,
    /// Overrides the configured write isolation when set.
    pub isolation: Option<IsolationLevel>,
}

impl ProcedureCall {
    /// Build the CALL, taking each argument by column name from `values`.
    pub fn plan(&self, values: &[(String, SqlValue)]) -> Result<StatementPlan> {
        let mut typed = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let value = values
                .iter()
                .find(|(column, _)| *column == param.column)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| {
                    PanelError::validation(format!(
                        "`{}` requires a value for `{}`",
                        self.procedure, param.column
                    ))
                })?;
            typed.push((value, param.sql_type.as_str()));
        }
        build_call(&self.procedure, &typed)
    }
}

/// An INSERT whose foreign keys are given by display value and resolved
/// with a sub-select per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupInsert {
    pub lookups: Vec<ForeignKeyLookup>,
}

impl LookupInsert {
    pub fn resolves(&self, column: &str) -> bool {
        self.lookups.iter().any(|lookup| lookup.column == column)
    }

    pub fn plan(&self, table: &str, values: &[(String, SqlValue)]) -> Result<StatementPlan> {
        build_insert_with_lookups(table, values, &self.lookups)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WriteStrategy {
    #[default]
    Generic,
    Procedure(ProcedureCall),
    Lookup(LookupInsert),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStrategy {
    pub insert: WriteStrategy,
    pub delete: WriteStrategy,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawParam {
    column: String,
    #[serde(rename = "type")]
    sql_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawLookup {
    column: String,
    table: String,
    #[serde(rename = "match")]
    match_column: String,
    #[serde(rename = "id")]
    id_column: String,
}

/// `[table.insert]` / `[table.delete]`: either a procedure or, for inserts,
/// a list of foreign key lookups.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawWrite {
    #[serde(default)]
    procedure: Option<String>,
    #[serde(default)]
    params: Vec<RawParam>,
    #[serde(default)]
    isolation: Option<IsolationLevel>,
    #[serde(default)]
    lookups: Vec<RawLookup>,
}

/// A `[[table]]` entry as written in the catalog file.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawTable {
    pub name: String,
    #[serde(default)]
    insert: Option<RawWrite>,
    #[serde(default)]
    delete: Option<RawWrite>,
}

impl RawWrite {
    fn parse(&self, key: &str, allow_lookups: bool) -> Result<WriteStrategy> {
        match (&self.procedure, self.lookups.is_empty()) {
            (Some(procedure), true) => self.parse_procedure(key, procedure),
            (None, false) if allow_lookups => self.parse_lookups(key),
            (None, false) => Err(PanelError::configuration(key, "lookups only apply to inserts")),
            (Some(_), false) => Err(PanelError::configuration(
                key,
                "set either `procedure` or `lookups`, not both",
            )),
            (None, true) => Err(PanelError::configuration(key, "missing `procedure`")),
        }
    }

    fn parse_procedure(&self, key: &str, procedure: &str) -> Result<WriteStrategy> {
        quote_ident(procedure).map_err(|e| PanelError::configuration(key, e.to_string()))?;

        let mut params = Vec::with_capacity(self.params.len());
        for raw in &self.params {
            let sql_type = validate_type_name(&raw.sql_type)
                .map_err(|e| PanelError::configuration(format!("{key}.{}", raw.column), e.to_string()))?;
            params.push(ProcedureParam {
                column: raw.column.clone(),
                sql_type: sql_type.to_string(),
            });
        }

        Ok(WriteStrategy::Procedure(ProcedureCall {
            procedure: procedure.to_string(),
            params,
            isolation: self.isolation,
        }))
    }

    fn parse_lookups(&self, key: &str) -> Result<WriteStrategy> {
        let mut lookups = Vec::with_capacity(self.lookups.len());
        for raw in &self.lookups {
            for name in [&raw.column, &raw.table, &raw.match_column, &raw.id_column] {
                quote_ident(name).map_err(|e| {
                    PanelError::configuration(format!("{key}.{}", raw.column), e.to_string())
                })?;
            }
            lookups.push(ForeignKeyLookup {
                column: raw.column.clone(),
                table: raw.table.clone(),
                match_column: raw.match_column.clone(),
                id_column: raw.id_column.clone(),
            });
        }
        Ok(WriteStrategy::Lookup(LookupInsert { lookups }))
    }
}

impl RawTable {
    pub(crate) fn parse(&self) -> Result<TableStrategy> {
        let parse = |raw: &Option<RawWrite>, op: &str| match raw {
            Some(raw) => raw.parse(&format!("{}.{op}", self.name), op == "insert"),
            None => Ok(WriteStrategy::Generic),
        };
        Ok(TableStrategy {
            insert: parse(&self.insert, "insert")?,
            delete: parse(&self.delete, "delete")?,
        })
    }
}

/// Table name to builder strategy, generic for anything not registered.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    tables: HashMap<String, TableStrategy>,
    fallback: TableStrategy,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut registry = Self::new();
        for (name, strategy) in catalog.table_strategies() {
            registry.register(name.clone(), strategy.clone());
        }
        registry
    }

    pub fn register(&mut self, table: impl Into<String>, strategy: TableStrategy) {
        self.tables.insert(table.into(), strategy);
    }

    pub fn get(&self, table: &str) -> &TableStrategy {
        self.tables.get(table).unwrap_or(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
