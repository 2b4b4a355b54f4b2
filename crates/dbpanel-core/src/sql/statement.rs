//! Parameterized statement builders.
//!
//! Every builder returns a [`StatementPlan`] whose text contains only quoted
//! identifiers, keywords and `$n` placeholders. User-supplied values live in
//! `params` and nowhere else; the single exception is a boolean select
//! predicate, which is rendered as the keyword `TRUE` or `FALSE`.

use std::fmt;

use super::helpers::{quote_ident, validate_type_name};
use crate::error::{PanelError, Result};
use crate::value::SqlValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Select,
    Call,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Select => "SELECT",
            StatementKind::Call => "CALL",
        }
    }

    /// Statements whose "zero rows affected" means the target row was not found.
    pub fn expects_match(&self) -> bool {
        matches!(self, StatementKind::Update | StatementKind::Delete)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    AtLeast,
    AtMost,
}

impl Comparison {
    fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::AtLeast => ">=",
            Comparison::AtMost => "<=",
        }
    }
}

/// One `column <op> value` condition of a select.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: Comparison,
    pub value: SqlValue,
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            column: column.into(),
            op: Comparison::Eq,
            value: value.into(),
        }
    }

    pub fn at_least(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            column: column.into(),
            op: Comparison::AtLeast,
            value: value.into(),
        }
    }

    pub fn at_most(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self {
            column: column.into(),
            op: Comparison::AtMost,
            value: value.into(),
        }
    }
}

/// A statement ready for the executor: text plus the values bound to its
/// placeholders, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementPlan {
    kind: StatementKind,
    target: String,
    text: String,
    params: Vec<SqlValue>,
}

impl StatementPlan {
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.text, self.params)
    }
}

/// Hands out `$1`, `$2`, ... while collecting the values they stand for.
#[derive(Default)]
struct Binder {
    params: Vec<SqlValue>,
}

impl Binder {
    fn bind(&mut self, value: SqlValue) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }
}

fn blank_to_error(table: &str, column: &str, value: &SqlValue, what: &str) -> Result<()> {
    if value.is_blank() {
        return Err(PanelError::validation(format!(
            "{what} `{column}` required for `{table}`"
        )));
    }
    Ok(())
}

/// Foreign key filled by matching a human-readable value in a lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyLookup {
    pub column: String,
    pub table: String,
    pub match_column: String,
    pub id_column: String,
}

impl ForeignKeyLookup {
    /// `(SELECT id FROM lookup WHERE match = $n)`
    fn render(&self, placeholder: &str) -> Result<String> {
        Ok(format!(
            "(SELECT {} FROM {} WHERE {} = {placeholder})",
            quote_ident(&self.id_column)?,
            quote_ident(&self.table)?,
            quote_ident(&self.match_column)?,
        ))
    }
}

/// `INSERT INTO t (a, b) VALUES ($1, $2)`; blank values are left out.
pub fn build_insert<S: AsRef<str>>(
    table: &str,
    column_values: &[(S, SqlValue)],
) -> Result<StatementPlan> {
    build_insert_with_lookups(table, column_values, &[])
}

/// Like [`build_insert`], but a column named in `lookups` gets a sub-select
/// whose parameter is the display value, bound in column order.
pub fn build_insert_with_lookups<S: AsRef<str>>(
    table: &str,
    column_values: &[(S, SqlValue)],
    lookups: &[ForeignKeyLookup],
) -> Result<StatementPlan> {
    let mut binder = Binder::default();
    let mut columns = Vec::new();
    let mut placeholders = Vec::new();

    for (column, value) in column_values {
        if value.is_blank() {
            continue;
        }
        let column = column.as_ref();
        columns.push(quote_ident(column)?);
        let placeholder = binder.bind(value.clone());
        match lookups.iter().find(|lookup| lookup.column == column) {
            Some(lookup) => placeholders.push(lookup.render(&placeholder)?),
            None => placeholders.push(placeholder),
        }
    }

    if columns.is_empty() {
        return Err(PanelError::validation(format!(
            "nothing to insert into `{table}`"
        )));
    }

    let text = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table)?,
        columns.join(", "),
        placeholders.join(", ")
    );

    Ok(StatementPlan {
        kind: StatementKind::Insert,
        target: table.to_string(),
        text,
        params: binder.params,
    })
}

/// `UPDATE t SET a = $1 WHERE pk = $2`; SET values bind before WHERE values.
pub fn build_update<S: AsRef<str>, T: AsRef<str>>(
    table: &str,
    pk_predicates: &[(S, SqlValue)],
    set_values: &[(T, SqlValue)],
) -> Result<StatementPlan> {
    if pk_predicates.is_empty() {
        return Err(PanelError::validation(format!(
            "primary key required to update `{table}`"
        )));
    }
    for (column, value) in pk_predicates {
        blank_to_error(table, column.as_ref(), value, "primary key")?;
    }

    let mut binder = Binder::default();
    let mut assignments = Vec::new();
    for (column, value) in set_values {
        if value.is_blank() {
            continue;
        }
        let column = quote_ident(column.as_ref())?;
        assignments.push(format!("{column} = {}", binder.bind(value.clone())));
    }
    if assignments.is_empty() {
        return Err(PanelError::validation(format!(
            "nothing to update in `{table}`"
        )));
    }

    let mut conditions = Vec::with_capacity(pk_predicates.len());
    for (column, value) in pk_predicates {
        let column = quote_ident(column.as_ref())?;
        conditions.push(format!("{column} = {}", binder.bind(value.clone())));
    }

    let text = format!(
        "UPDATE {} SET {} WHERE {}",
        quote_ident(table)?,
        assignments.join(", "),
        conditions.join(" AND ")
    );

    Ok(StatementPlan {
        kind: StatementKind::Update,
        target: table.to_string(),
        text,
        params: binder.params,
    })
}

/// `DELETE FROM t WHERE a = $1 AND b = $2`; every predicate must carry a value.
pub fn build_delete<S: AsRef<str>>(
    table: &str,
    predicates: &[(S, SqlValue)],
) -> Result<StatementPlan> {
    if predicates.is_empty() {
        return Err(PanelError::validation(format!(
            "refusing to delete from `{table}` without a key"
        )));
    }

    let mut binder = Binder::default();
    let mut conditions = Vec::with_capacity(predicates.len());
    for (column, value) in predicates {
        blank_to_error(table, column.as_ref(), value, "value for")?;
        let column = quote_ident(column.as_ref())?;
        conditions.push(format!("{column} = {}", binder.bind(value.clone())));
    }

    let text = format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(table)?,
        conditions.join(" AND ")
    );

    Ok(StatementPlan {
        kind: StatementKind::Delete,
        target: table.to_string(),
        text,
        params: binder.params,
    })
}

fn render_predicates(
    target: &str,
    predicates: &[Predicate],
    binder: &mut Binder,
) -> Result<String> {
    let mut conditions = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        let column = quote_ident(&predicate.column)?;
        let condition = match (&predicate.value, predicate.op) {
            (SqlValue::Bool(b), op) => {
                format!("{column} {} {}", op.operator(), if *b { "TRUE" } else { "FALSE" })
            }
            (SqlValue::Null, Comparison::Eq) => format!("{column} IS NULL"),
            (SqlValue::Null, _) => {
                return Err(PanelError::validation(format!(
                    "range bound on `{}` of `{target}` has no value",
                    predicate.column
                )))
            }
            (value, op) => format!("{column} {} {}", op.operator(), binder.bind(value.clone())),
        };
        conditions.push(condition);
    }
    Ok(conditions.join(" AND "))
}

/// Select everything from a table/view, or from a set-returning function.
///
/// For functions, `positional_args` become the call's arguments in order
/// (`Null` included) and any predicates filter the function's output through
/// a wrapping `SELECT * FROM (...) AS r`.
pub fn build_select(
    target: &str,
    predicates: &[Predicate],
    is_callable: bool,
    positional_args: &[SqlValue],
) -> Result<StatementPlan> {
    let mut binder = Binder::default();
    let name = quote_ident(target)?;

    let text = if is_callable {
        let args: Vec<String> = positional_args
            .iter()
            .map(|arg| binder.bind(arg.clone()))
            .collect();
        let inner = format!("SELECT * FROM {name}({})", args.join(", "));
        if predicates.is_empty() {
            inner
        } else {
            let conditions = render_predicates(target, predicates, &mut binder)?;
            format!("SELECT * FROM ({inner}) AS r WHERE {conditions}")
        }
    } else {
        if !positional_args.is_empty() {
            return Err(PanelError::validation(format!(
                "`{target}` is not callable but arguments were supplied"
            )));
        }
        if predicates.is_empty() {
            format!("SELECT * FROM {name}")
        } else {
            let conditions = render_predicates(target, predicates, &mut binder)?;
            format!("SELECT * FROM {name} WHERE {conditions}")
        }
    };

    Ok(StatementPlan {
        kind: StatementKind::Select,
        target: target.to_string(),
        text,
        params: binder.params,
    })
}

/// `SELECT * FROM t LIMIT $1`.
pub fn build_listing(table: &str, limit: i64) -> Result<StatementPlan> {
    if limit <= 0 {
        return Err(PanelError::validation(format!(
            "listing limit for `{table}` must be positive"
        )));
    }
    let mut binder = Binder::default();
    let text = format!(
        "SELECT * FROM {} LIMIT {}",
        quote_ident(table)?,
        binder.bind(SqlValue::Int(limit))
    );
    Ok(StatementPlan {
        kind: StatementKind::Select,
        target: table.to_string(),
        text,
        params: binder.params,
    })
}

/// `SELECT COUNT(*) AS count FROM t`.
pub fn build_count(table: &str) -> Result<StatementPlan> {
    Ok(StatementPlan {
        kind: StatementKind::Select,
        target: table.to_string(),
        text: format!("SELECT COUNT(*) AS count FROM {}", quote_ident(table)?),
        params: Vec::new(),
    })
}

/// Distinct `(id, display)` pairs of a lookup table ordered by display.
///
/// The columns are aliased `id` and `display` so that a table whose id and
/// display column coincide still yields an unambiguous ORDER BY.
pub fn build_lookup(table: &str, display_column: &str, id_column: &str) -> Result<StatementPlan> {
    let text = format!(
        "SELECT DISTINCT {} AS id, {} AS display FROM {} ORDER BY display",
        quote_ident(id_column)?,
        quote_ident(display_column)?,
        quote_ident(table)?
    );
    Ok(StatementPlan {
        kind: StatementKind::Select,
        target: table.to_string(),
        text,
        params: Vec::new(),
    })
}

/// `CALL p(CAST($1 AS T1), CAST($2 AS T2), ...)`.
///
/// The type list is the procedure's positional signature as declared by the
/// caller, one entry per parameter.
pub fn build_call<T: AsRef<str>>(
    procedure: &str,
    typed_params: &[(SqlValue, T)],
) -> Result<StatementPlan> {
    let mut binder = Binder::default();
    let mut args = Vec::with_capacity(typed_params.len());
    for (value, sql_type) in typed_params {
        let sql_type = validate_type_name(sql_type.as_ref())?;
        args.push(format!("CAST({} AS {sql_type})", binder.bind(value.clone())));
    }

    let text = format!("CALL {}({})", quote_ident(procedure)?, args.join(", "));
    Ok(StatementPlan {
        kind: StatementKind::Call,
        target: procedure.to_string(),
        text,
        params: binder.params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assert_values_not_in_text;
    use chrono::NaiveDate;

    const HOSTILE: &[&str] = &[
        "'; DROP TABLE employees; --",
        "Robert'); DELETE FROM labs;",
        "/* comment */ OR 1=1",
        "\"quoted\"",
        "semi;colon",
    ];

    #[test]
    fn test_delete_by_primary_key() {
        let plan = build_delete("employees", &[("w_id", SqlValue::Int(7))]).unwrap();
        assert_eq!(plan.text(), "DELETE FROM employees WHERE w_id = $1");
        assert_eq!(plan.params(), &[SqlValue::Int(7)]);
        assert_eq!(plan.kind(), StatementKind::Delete);
        assert_eq!(plan.target(), "employees");
    }

    #[test]
    fn test_call_with_casts() {
        let plan = build_call(
            "sp_add_employee",
            &[
                (SqlValue::from("Ivanov"), "VARCHAR"),
                (SqlValue::Int(3), "INTEGER"),
            ],
        )
        .unwrap();
        assert_eq!(
            plan.text(),
            "CALL sp_add_employee(CAST($1 AS VARCHAR), CAST($2 AS INTEGER))"
        );
        assert_eq!(plan.params(), &[SqlValue::from("Ivanov"), SqlValue::Int(3)]);
    }

    #[test]
    fn test_call_rejects_injected_type() {
        let err = build_call("sp_x", &[(SqlValue::Int(1), "INTEGER); DROP TABLE t; --")]);
        assert!(matches!(err, Err(PanelError::Validation(_))));
    }

    #[test]
    fn test_insert_skips_blank_values() {
        let plan = build_insert(
            "labs",
            &[
                ("l_id", SqlValue::Null),
                ("name", SqlValue::from("Lab 1")),
                ("note", SqlValue::from("")),
                ("capacity", SqlValue::Int(4)),
            ],
        )
        .unwrap();
        assert_eq!(plan.text(), "INSERT INTO labs (name, capacity) VALUES ($1, $2)");
        assert_eq!(plan.params(), &[SqlValue::from("Lab 1"), SqlValue::Int(4)]);
    }

    #[test]
    fn test_empty_insert_is_rejected() {
        let err = build_insert("labs", &[("name", SqlValue::from("")), ("x", SqlValue::Null)]);
        assert!(matches!(err, Err(PanelError::Validation(_))));
    }

    #[test]
    fn test_update_orders_set_before_where() {
        let plan = build_update(
            "employees",
            &[("w_id", SqlValue::Int(7))],
            &[
                ("full_name", SqlValue::from("Petrov")),
                ("leave_date", SqlValue::Null),
                ("experience", SqlValue::Int(12)),
            ],
        )
        .unwrap();
        assert_eq!(
            plan.text(),
            "UPDATE employees SET full_name = $1, experience = $2 WHERE w_id = $3"
        );
        assert_eq!(
            plan.params(),
            &[SqlValue::from("Petrov"), SqlValue::Int(12), SqlValue::Int(7)]
        );
    }

    #[test]
    fn test_update_with_nothing_to_set_fails() {
        for set in [
            vec![],
            vec![("full_name", SqlValue::from(""))],
            vec![("full_name", SqlValue::Null), ("grade_id", SqlValue::from(""))],
        ] {
            let err = build_update("employees", &[("w_id", SqlValue::Int(7))], &set);
            assert!(matches!(err, Err(PanelError::Validation(ref m)) if m.contains("nothing to update")));
        }
    }

    #[test]
    fn test_update_requires_every_key_value() {
        let err = build_update(
            "assignments",
            &[("w_id", SqlValue::Int(1)), ("b_id", SqlValue::Null)],
            &[("role", SqlValue::from("lead"))],
        );
        assert!(matches!(err, Err(PanelError::Validation(ref m)) if m.contains("primary key")));

        let none: &[(&str, SqlValue)] = &[];
        let err = build_update("assignments", none, &[("role", SqlValue::from("lead"))]);
        assert!(matches!(err, Err(PanelError::Validation(_))));
    }

    #[test]
    fn test_delete_never_drops_a_predicate() {
        let err = build_delete(
            "assignments",
            &[("w_id", SqlValue::Int(1)), ("b_id", SqlValue::from(""))],
        );
        assert!(matches!(err, Err(PanelError::Validation(_))));

        let none: &[(&str, SqlValue)] = &[];
        assert!(build_delete("assignments", none).is_err());
    }

    #[test]
    fn test_select_boolean_is_literal() {
        let plan = build_select(
            "v_staff_composition",
            &[Predicate::eq("active_only", true)],
            false,
            &[],
        )
        .unwrap();
        assert_eq!(
            plan.text(),
            "SELECT * FROM v_staff_composition WHERE active_only = TRUE"
        );
        assert!(plan.params().is_empty());
    }

    #[test]
    fn test_select_date_range_start() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let plan = build_select(
            "v_lab_tested_products",
            &[Predicate::at_least("test_date", start)],
            false,
            &[],
        )
        .unwrap();
        assert_eq!(
            plan.text(),
            "SELECT * FROM v_lab_tested_products WHERE test_date >= $1"
        );
        assert_eq!(plan.params(), &[SqlValue::Date(start)]);
    }

    #[test]
    fn test_select_mixed_predicates_number_in_order() {
        let plan = build_select(
            "v_testers_activity",
            &[
                Predicate::eq("lab_id", 2),
                Predicate::eq("is_master", false),
                Predicate::at_most("test_date", "2024-12-31"),
            ],
            false,
            &[],
        )
        .unwrap();
        assert_eq!(
            plan.text(),
            "SELECT * FROM v_testers_activity WHERE lab_id = $1 AND is_master = FALSE AND test_date <= $2"
        );
        assert_eq!(plan.params().len(), 2);
    }

    #[test]
    fn test_select_function_with_args_and_wrap() {
        let plan = build_select(
            "get_product_assembly_summary",
            &[Predicate::eq("workshop", "North")],
            true,
            &[SqlValue::Null, SqlValue::from("enterprise_total")],
        )
        .unwrap();
        assert_eq!(
            plan.text(),
            "SELECT * FROM (SELECT * FROM get_product_assembly_summary($1, $2)) AS r WHERE workshop = $3"
        );
        assert_eq!(
            plan.params(),
            &[
                SqlValue::Null,
                SqlValue::from("enterprise_total"),
                SqlValue::from("North")
            ]
        );
    }

    #[test]
    fn test_select_function_without_predicates() {
        let plan = build_select("get_summary", &[], true, &[]).unwrap();
        assert_eq!(plan.text(), "SELECT * FROM get_summary()");
    }

    #[test]
    fn test_select_plain_table() {
        let plan = build_select("labs", &[], false, &[]).unwrap();
        assert_eq!(plan.text(), "SELECT * FROM labs");
        assert!(build_select("labs", &[], false, &[SqlValue::Int(1)]).is_err());
    }

    #[test]
    fn test_null_equality_and_null_range() {
        let plan = build_select("employees", &[Predicate::eq("leave_date", SqlValue::Null)], false, &[]).unwrap();
        assert_eq!(plan.text(), "SELECT * FROM employees WHERE leave_date IS NULL");
        assert!(build_select("employees", &[Predicate::at_least("hire_date", SqlValue::Null)], false, &[]).is_err());
    }

    #[test]
    fn test_listing_and_count() {
        let plan = build_listing("labs", 100).unwrap();
        assert_eq!(plan.text(), "SELECT * FROM labs LIMIT $1");
        assert_eq!(plan.params(), &[SqlValue::Int(100)]);
        assert!(build_listing("labs", 0).is_err());

        assert_eq!(
            build_count("labs").unwrap().text(),
            "SELECT COUNT(*) AS count FROM labs"
        );
    }

    #[test]
    fn test_lookup_query() {
        let plan = build_lookup("workshops", "name", "wsh_id").unwrap();
        assert_eq!(
            plan.text(),
            "SELECT DISTINCT wsh_id AS id, name AS display FROM workshops ORDER BY display"
        );
    }

    #[test]
    fn test_hostile_values_only_travel_as_parameters() {
        for hostile in HOSTILE {
            let v = SqlValue::from(*hostile);

            let insert = build_insert("employees", &[("full_name", v.clone())]).unwrap();
            assert_values_not_in_text(&insert);

            let update =
                build_update("employees", &[("w_id", v.clone())], &[("full_name", v.clone())])
                    .unwrap();
            assert_values_not_in_text(&update);

            let delete = build_delete("employees", &[("full_name", v.clone())]).unwrap();
            assert_values_not_in_text(&delete);

            let select =
                build_select("employees", &[Predicate::eq("full_name", v.clone())], false, &[])
                    .unwrap();
            assert_values_not_in_text(&select);

            let call = build_call("sp_add_employee", &[(v.clone(), "VARCHAR")]).unwrap();
            assert_values_not_in_text(&call);

            let numeric = SqlValue::Numeric(format!("1{hostile}"));
            let set = build_update("employees", &[("w_id", SqlValue::Int(1))], &[("salary", numeric)])
                .unwrap();
            assert_values_not_in_text(&set);
        }
    }

    fn employee_lookups() -> Vec<ForeignKeyLookup> {
        vec![
            ForeignKeyLookup {
                column: "worker_type".into(),
                table: "worker_types".into(),
                match_column: "name".into(),
                id_column: "tp_id".into(),
            },
            ForeignKeyLookup {
                column: "grade_id".into(),
                table: "grades".into(),
                match_column: "grade_title".into(),
                id_column: "g_id".into(),
            },
        ]
    }

    #[test]
    fn test_insert_resolves_foreign_keys_by_display_value() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let plan = build_insert_with_lookups(
            "employees",
            &[
                ("full_name", SqlValue::from("Ivanov")),
                ("hire_date", SqlValue::Date(start)),
                ("leave_date", SqlValue::Null),
                ("worker_type", SqlValue::from("Engineer")),
                ("experience", SqlValue::Int(4)),
                ("grade_id", SqlValue::from("Shop chief")),
            ],
            &employee_lookups(),
        )
        .unwrap();
        assert_eq!(
            plan.text(),
            "INSERT INTO employees (full_name, hire_date, worker_type, experience, grade_id) \
             VALUES ($1, $2, (SELECT tp_id FROM worker_types WHERE name = $3), $4, \
             (SELECT g_id FROM grades WHERE grade_title = $5))"
        );
        assert_eq!(
            plan.params(),
            &[
                SqlValue::from("Ivanov"),
                SqlValue::Date(start),
                SqlValue::from("Engineer"),
                SqlValue::Int(4),
                SqlValue::from("Shop chief"),
            ]
        );
        assert_eq!(plan.kind(), StatementKind::Insert);
    }

    #[test]
    fn test_insert_lookup_skipped_when_blank() {
        let plan = build_insert_with_lookups(
            "employees",
            &[("full_name", SqlValue::from("Ivanov")), ("grade_id", SqlValue::from(""))],
            &employee_lookups(),
        )
        .unwrap();
        assert_eq!(plan.text(), "INSERT INTO employees (full_name) VALUES ($1)");
    }

    #[test]
    fn test_hostile_lookup_values_and_identifiers() {
        for hostile in HOSTILE {
            let plan = build_insert_with_lookups(
                "employees",
                &[("worker_type", SqlValue::from(*hostile))],
                &employee_lookups(),
            )
            .unwrap();
            assert_values_not_in_text(&plan);
            assert_eq!(plan.params(), &[SqlValue::from(*hostile)]);
        }

        let lookup = ForeignKeyLookup {
            column: "worker_type".into(),
            table: "worker_types\"; DROP TABLE x; --".into(),
            match_column: "name".into(),
            id_column: "tp_id".into(),
        };
        let plan =
            build_insert_with_lookups("employees", &[("worker_type", SqlValue::from("x"))], &[lookup])
                .unwrap();
        assert_eq!(
            plan.text(),
            "INSERT INTO employees (worker_type) VALUES \
             ((SELECT tp_id FROM \"worker_types\"\"; DROP TABLE x; --\" WHERE name = $1))"
        );
    }

    #[test]
    fn test_hostile_set_columns_are_quoted() {
        let plan = build_update(
            "employees",
            &[("w_id", SqlValue::Int(7))],
            &[
                ("full_name = 'x', salary", SqlValue::from("Petrov")),
                ("note\"; DROP TABLE employees; --", SqlValue::from("Sidorov")),
            ],
        )
        .unwrap();
        assert_eq!(
            plan.text(),
            "UPDATE employees SET \"full_name = 'x', salary\" = $1, \
             \"note\"\"; DROP TABLE employees; --\" = $2 WHERE w_id = $3"
        );
        assert_values_not_in_text(&plan);
    }

    #[test]
    fn test_hostile_identifiers_are_quoted() {
        let plan = build_delete("employees\"; DROP TABLE x; --", &[("w_id", SqlValue::Int(1))]).unwrap();
        assert_eq!(
            plan.text(),
            "DELETE FROM \"employees\"\"; DROP TABLE x; --\" WHERE w_id = $1"
        );
    }
}
