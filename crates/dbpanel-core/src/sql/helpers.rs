use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{PanelError, Result};

/// Words PostgreSQL will not accept as a bare column or table name.
const RESERVED: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning", "right",
    "select", "session_user", "similar", "some", "symmetric", "table", "tablesample",
    "then", "to", "trailing", "true", "union", "unique", "user", "using", "variadic",
    "verbose", "when", "where", "window", "with",
];

/// Identifier characters PostgreSQL accepts unquoted without case folding.
pub(crate) fn is_bare_ident(name: &str) -> bool {
    static BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap());
    BARE.is_match(name) && !RESERVED.contains(&name)
}

/// Render a single identifier for statement text.
///
/// Plain lower-case names are emitted as-is; anything else is wrapped in
/// double quotes with embedded quotes doubled.
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(PanelError::validation("invalid identifier: empty"));
    }
    if name.contains('\0') {
        return Err(PanelError::validation("invalid identifier: contains NUL"));
    }
    if is_bare_ident(name) {
        Ok(name.to_string())
    } else {
        Ok(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// `schema.name`, each part quoted independently.
pub fn quote_qualified(schema: &str, name: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(name)?))
}

/// Guard for the type names that appear in `CAST(... AS <type>)`.
///
/// Accepts things like `INTEGER`, `DOUBLE PRECISION`, `VARCHAR(64)`,
/// `NUMERIC(10, 2)` and `TEXT[]`.
pub fn validate_type_name(type_name: &str) -> Result<&str> {
    static TYPE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"^[A-Za-z_][A-Za-z0-9_]*( [A-Za-z_][A-Za-z0-9_]*)*(\(\d+( *, *\d+)?\))?(\[\])?$",
        )
        .unwrap()
    });
    let trimmed = type_name.trim();
    if !TYPE.is_match(trimmed) {
        return Err(PanelError::validation(format!(
            "invalid SQL type name `{type_name}`"
        )));
    }
    Ok(trimmed)
}
