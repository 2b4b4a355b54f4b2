//! Core of dbpanel: safe statement building, report filters and retrying
//! execution for a role-gated database admin panel.

pub mod error;
pub mod executor;
pub mod filter;
pub mod panel;
pub mod privilege;
pub mod schema;
pub mod session;
pub mod sql;
pub mod sqlx_postgres;
pub mod strategy;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use error::*;
pub use executor::{execute_read_only, execute_with_retry, ExecOutcome, TransactionExecutor};
pub use filter::*;
pub use panel::{AdminPanel, ResultSink, WriteOutcome};
pub use privilege::{table_privileges, TablePrivileges};
pub use schema::{ColumnDescriptor, SchemaIntrospector, SqlType, TableDescriptor};
pub use session::{DbError, Session};
pub use sql::{
    build_call, build_count, build_delete, build_insert, build_insert_with_lookups, build_listing,
    build_lookup, build_select, build_update, quote_ident, Comparison, ForeignKeyLookup, Predicate,
    StatementKind, StatementPlan,
};
pub use sqlx_postgres::PgSession;
pub use strategy::{
    LookupInsert, ProcedureCall, ProcedureParam, StrategyRegistry, TableStrategy, WriteStrategy,
};
pub use value::{RowSet, SqlValue};
