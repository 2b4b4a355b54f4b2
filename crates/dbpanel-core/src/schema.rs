//! Catalog introspection: columns, primary keys, and navigable objects.
//!
//! Nothing here is cached. Every dialog asks the catalog afresh so schema
//! changes between calls are picked up.

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{PanelError, Result};
use crate::session::Session;
use crate::value::SqlValue;

const COLUMNS_QUERY: &str = "\
SELECT column_name::text AS column_name, data_type::text AS data_type, \
(is_nullable = 'YES') AS nullable \
FROM information_schema.columns \
WHERE table_schema::text = $1 AND table_name::text = $2 \
ORDER BY ordinal_position";

const PRIMARY_KEY_QUERY: &str = "\
SELECT kcu.column_name::text AS column_name \
FROM information_schema.table_constraints tc \
JOIN information_schema.key_column_usage kcu \
ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
WHERE tc.constraint_type = 'PRIMARY KEY' \
AND tc.table_schema::text = $1 AND tc.table_name::text = $2 \
ORDER BY kcu.ordinal_position";

const USER_TABLES_QUERY: &str = "\
SELECT table_name::text AS table_name \
FROM information_schema.tables \
WHERE table_schema::text = $1 AND table_type = 'BASE TABLE' \
AND has_table_privilege(current_user, quote_ident(table_schema) || '.' || quote_ident(table_name), 'SELECT') \
ORDER BY table_name";

const VIEWS_QUERY: &str = "\
SELECT table_name::text AS table_name \
FROM information_schema.views \
WHERE table_schema::text = $1 \
ORDER BY table_name";

/// Input archetype of a column, derived from its catalog `data_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    Text,
}

impl SqlType {
    pub fn from_catalog(data_type: &str) -> Self {
        match data_type {
            "integer" | "bigint" | "smallint" => SqlType::Integer,
            "numeric" | "real" | "double precision" | "decimal" => SqlType::Numeric,
            "boolean" => SqlType::Boolean,
            "date" => SqlType::Date,
            "timestamp without time zone" | "timestamp with time zone" => SqlType::Timestamp,
            _ => SqlType::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Catalog type name as reported, e.g. `character varying`.
    pub data_type: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            sql_type: SqlType::from_catalog(&data_type),
            data_type,
            nullable,
        }
    }

    /// Convert raw form text into a value of this column's type.
    ///
    /// Blank input becomes `Null`. Text columns store the input untrimmed,
    /// leading and trailing spaces included; every other type is parsed from
    /// the trimmed input.
    pub fn coerce(&self, raw: &str) -> Result<SqlValue> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(SqlValue::Null);
        }

        let invalid = |expected: &str| {
            PanelError::validation(format!("`{}` expects {expected}", self.name))
        };

        match self.sql_type {
            SqlType::Integer => trimmed
                .parse::<i64>()
                .map(SqlValue::Int)
                .map_err(|_| invalid("an integer")),
            SqlType::Numeric => Decimal::from_str(trimmed)
                .map(|d| SqlValue::Numeric(d.normalize().to_string()))
                .map_err(|_| invalid("a number")),
            SqlType::Boolean => parse_bool(trimmed)
                .map(SqlValue::Bool)
                .ok_or_else(|| invalid("yes or no")),
            SqlType::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map(SqlValue::Date)
                .map_err(|_| invalid("a date (YYYY-MM-DD)")),
            SqlType::Timestamp => parse_timestamp(trimmed)
                .map(SqlValue::Timestamp)
                .ok_or_else(|| invalid("a timestamp (YYYY-MM-DD HH:MM:SS)")),
            SqlType::Text => Ok(SqlValue::Text(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub table_name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == name)
    }

    /// Coerce `(column, raw)` form inputs in the order given. A column the
    /// table does not have is rejected rather than dropped.
    pub fn coerce_inputs<C: AsRef<str>, V: AsRef<str>>(
        &self,
        inputs: &[(C, V)],
    ) -> Result<Vec<(String, SqlValue)>> {
        self.coerce_inputs_with(inputs, |_| false)
    }

    /// As [`coerce_inputs`](Self::coerce_inputs), except columns for which
    /// `as_text` holds keep the trimmed input as text. Used for foreign keys
    /// given by display value.
    pub fn coerce_inputs_with<C, V, F>(&self, inputs: &[(C, V)], as_text: F) -> Result<Vec<(String, SqlValue)>>
    where
        C: AsRef<str>,
        V: AsRef<str>,
        F: Fn(&str) -> bool,
    {
        inputs
            .iter()
            .map(|(column, raw)| {
                let column = column.as_ref();
                let descriptor = self.column(column).ok_or_else(|| {
                    PanelError::validation(format!(
                        "`{}` has no column `{column}`",
                        self.table_name
                    ))
                })?;
                let value = match raw.as_ref().trim() {
                    "" if as_text(column) => SqlValue::Null,
                    display if as_text(column) => SqlValue::from(display),
                    _ => descriptor.coerce(raw.as_ref())?,
                };
                Ok((column.to_string(), value))
            })
            .collect()
    }
}

fn text_cell(target: &str, row: &[SqlValue], idx: usize) -> Result<String> {
    match row.get(idx) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        other => Err(PanelError::introspection(
            target,
            format!("unexpected catalog value {other:?}"),
        )),
    }
}

/// Catalog queries scoped to one schema.
#[derive(Debug, Clone)]
pub struct SchemaIntrospector {
    schema: String,
}

impl SchemaIntrospector {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    async fn names<S: Session + ?Sized>(
        &self,
        session: &mut S,
        target: &str,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<String>> {
        let rows = session
            .query(sql, params)
            .await
            .map_err(|e| PanelError::introspection(target, e.message()))?;
        rows.rows
            .iter()
            .map(|row| text_cell(target, row, 0))
            .collect()
    }

    /// Columns of `table` in ordinal order. An unknown table, or one with
    /// no visible columns, is an error.
    pub async fn table_columns<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>> {
        let params = [SqlValue::from(self.schema.as_str()), SqlValue::from(table)];
        let rows = session
            .query(COLUMNS_QUERY, &params)
            .await
            .map_err(|e| PanelError::introspection(table, e.message()))?;

        if rows.is_empty() {
            return Err(PanelError::introspection(
                table,
                format!("no such table in schema `{}`", self.schema),
            ));
        }

        let columns = rows
            .rows
            .iter()
            .map(|row| {
                let name = text_cell(table, row, 0)?;
                let data_type = text_cell(table, row, 1)?;
                let nullable = row.get(2).and_then(SqlValue::as_bool).unwrap_or(true);
                Ok(ColumnDescriptor::new(name, data_type, nullable))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(table, columns = columns.len(), "Introspected columns");
        Ok(columns)
    }

    /// Primary-key columns of `table` in key order; empty when it has none.
    pub async fn primary_key_columns<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
    ) -> Result<Vec<String>> {
        let params = [SqlValue::from(self.schema.as_str()), SqlValue::from(table)];
        self.names(session, table, PRIMARY_KEY_QUERY, &params).await
    }

    pub async fn describe_table<S: Session + ?Sized>(
        &self,
        session: &mut S,
        table: &str,
    ) -> Result<TableDescriptor> {
        let columns = self.table_columns(session, table).await?;
        let primary_key = self.primary_key_columns(session, table).await?;
        Ok(TableDescriptor {
            table_name: table.to_string(),
            columns,
            primary_key,
        })
    }

    /// Base tables the current principal may SELECT from.
    pub async fn user_tables<S: Session + ?Sized>(&self, session: &mut S) -> Result<Vec<String>> {
        let params = [SqlValue::from(self.schema.as_str())];
        self.names(session, &self.schema, USER_TABLES_QUERY, &params).await
    }

    pub async fn views<S: Session + ?Sized>(&self, session: &mut S) -> Result<Vec<String>> {
        let params = [SqlValue::from(self.schema.as_str())];
        self.names(session, &self.schema, VIEWS_QUERY, &params).await
    }
}
