//! The dashboard-facing entry point: one role's session plus everything
//! needed to turn form input into executed statements.

use dbpanel_shared::{IsolationLevel, PanelConfig, Role};
use tracing::{debug, info, instrument, warn};

use crate::error::{PanelError, Result};
use crate::executor::{execute_read_only, ExecOutcome, TransactionExecutor};
use crate::filter::{build_report_select, resolve_filters, Catalog, ResolvedFilters};
use crate::privilege::{table_privileges, TablePrivileges};
use crate::schema::{SchemaIntrospector, TableDescriptor};
use crate::session::Session;
use crate::sql::{
    build_count, build_delete, build_insert, build_listing, build_select, build_update, Predicate,
    StatementPlan,
};
use crate::sqlx_postgres::PgSession;
use crate::strategy::{StrategyRegistry, WriteStrategy};
use crate::value::{RowSet, SqlValue};

/// Receives finished result sets. The core never renders anything itself.
#[cfg_attr(test, mockall::automock)]
pub trait ResultSink: Send {
    fn display(&mut self, target_key: &str, columns: &[String], rows: &[Vec<SqlValue>]);
}

/// Result of a write the user should hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied(u64),
    /// The statement ran but matched no row; shown as a warning.
    NoRowsMatched,
}

impl WriteOutcome {
    pub fn is_warning(&self) -> bool {
        matches!(self, WriteOutcome::NoRowsMatched)
    }
}

pub struct AdminPanel<S: Session> {
    session: S,
    introspector: SchemaIntrospector,
    catalog: Catalog,
    strategies: StrategyRegistry,
    executor: TransactionExecutor,
    show_all_limit: i64,
}

impl AdminPanel<PgSession> {
    /// Connect as `role` and load the configured catalog.
    #[instrument(skip(config))]
    pub async fn connect(config: &PanelConfig, role: Role) -> Result<Self> {
        let catalog = Catalog::load(config.catalog_path.as_deref())?;
        let session = PgSession::connect_role(&config.database, role).await?;
        Ok(Self::new(session, config, catalog))
    }
}

impl<S: Session> AdminPanel<S> {
    pub fn new(session: S, config: &PanelConfig, catalog: Catalog) -> Self {
        Self {
            session,
            introspector: SchemaIntrospector::new(config.database.schema.clone()),
            strategies: StrategyRegistry::from_catalog(&catalog),
            catalog,
            executor: TransactionExecutor::from_config(&config.execution),
            show_all_limit: config.execution.show_all_limit,
        }
    }

    /// Replace the write executor, e.g. to change the retry policy.
    pub fn with_executor(mut self, executor: TransactionExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn into_session(self) -> S {
        self.session
    }

    pub async fn user_tables(&mut self) -> Result<Vec<String>> {
        self.introspector.user_tables(&mut self.session).await
    }

    pub async fn views(&mut self) -> Result<Vec<String>> {
        self.introspector.views(&mut self.session).await
    }

    /// Which write actions to offer for `table`.
    pub async fn table_actions(&mut self, table: &str) -> TablePrivileges {
        table_privileges(&mut self.session, self.introspector.schema(), table).await
    }

    pub async fn describe(&mut self, table: &str) -> Result<TableDescriptor> {
        self.introspector.describe_table(&mut self.session, table).await
    }

    async fn write(&mut self, plan: &StatementPlan, isolation: Option<IsolationLevel>) -> Result<WriteOutcome> {
        debug!(
            kind = %plan.kind(),
            table = plan.target(),
            params = plan.params().len(),
            "Submitting write"
        );
        let outcome = match isolation {
            Some(level) if level != self.executor.isolation() => {
                self.executor
                    .with_isolation(level)
                    .execute(&mut self.session, plan)
                    .await?
            }
            _ => self.executor.execute(&mut self.session, plan).await?,
        };

        match outcome {
            ExecOutcome::NoRowsMatched => {
                warn!("{} on `{}` matched no rows", plan.kind(), plan.target());
                Ok(WriteOutcome::NoRowsMatched)
            }
            ExecOutcome::Applied(n) => {
                info!("{} on `{}` affected {} row(s)", plan.kind(), plan.target(), n);
                Ok(WriteOutcome::Applied(n))
            }
            ExecOutcome::Rows(rows) => Ok(WriteOutcome::Applied(rows.len() as u64)),
        }
    }

    /// Coerced values for exactly the primary-key columns of `table`.
    fn key_values<C: AsRef<str>, V: AsRef<str>>(
        table: &TableDescriptor,
        pk_inputs: &[(C, V)],
    ) -> Result<Vec<(String, SqlValue)>> {
        if table.primary_key.is_empty() {
            return Err(PanelError::validation(format!(
                "`{}` has no primary key",
                table.table_name
            )));
        }
        if let Some((column, _)) = pk_inputs
            .iter()
            .find(|(column, _)| !table.is_primary_key(column.as_ref()))
        {
            return Err(PanelError::validation(format!(
                "`{}` is not part of the primary key of `{}`",
                column.as_ref(),
                table.table_name
            )));
        }

        let coerced = table.coerce_inputs(pk_inputs)?;
        table
            .primary_key
            .iter()
            .map(|pk| {
                coerced
                    .iter()
                    .find(|(column, value)| column == pk && !value.is_blank())
                    .cloned()
                    .ok_or_else(|| {
                        PanelError::validation(format!(
                            "primary key `{pk}` required for `{}`",
                            table.table_name
                        ))
                    })
            })
            .collect()
    }

    /// Insert a row from raw form text; blank fields are left to defaults.
    #[instrument(skip(self, inputs))]
    pub async fn submit_insert<C: AsRef<str>, V: AsRef<str>>(
        &mut self,
        table: &str,
        inputs: &[(C, V)],
    ) -> Result<WriteOutcome> {
        let descriptor = self.describe(table).await?;
        let strategy = &self.strategies.get(table).insert;
        let values = match strategy {
            WriteStrategy::Lookup(insert) => {
                descriptor.coerce_inputs_with(inputs, |column| insert.resolves(column))?
            }
            _ => descriptor.coerce_inputs(inputs)?,
        };

        let (plan, isolation) = match strategy {
            WriteStrategy::Generic => (build_insert(table, &values)?, None),
            WriteStrategy::Procedure(call) => (call.plan(&values)?, call.isolation),
            WriteStrategy::Lookup(insert) => (insert.plan(table, &values)?, None),
        };
        self.write(&plan, isolation).await
    }

    #[instrument(skip(self, pk_inputs, set_inputs))]
    pub async fn submit_update<C: AsRef<str>, V: AsRef<str>, D: AsRef<str>, W: AsRef<str>>(
        &mut self,
        table: &str,
        pk_inputs: &[(C, V)],
        set_inputs: &[(D, W)],
    ) -> Result<WriteOutcome> {
        let descriptor = self.describe(table).await?;
        let keys = Self::key_values(&descriptor, pk_inputs)?;
        let values = descriptor.coerce_inputs(set_inputs)?;

        let plan = build_update(table, &keys, &values)?;
        self.write(&plan, None).await
    }

    #[instrument(skip(self, pk_inputs))]
    pub async fn submit_delete<C: AsRef<str>, V: AsRef<str>>(
        &mut self,
        table: &str,
        pk_inputs: &[(C, V)],
    ) -> Result<WriteOutcome> {
        let descriptor = self.describe(table).await?;
        let keys = Self::key_values(&descriptor, pk_inputs)?;

        let (plan, isolation) = match &self.strategies.get(table).delete {
            WriteStrategy::Generic | WriteStrategy::Lookup(_) => (build_delete(table, &keys)?, None),
            WriteStrategy::Procedure(call) => (call.plan(&keys)?, call.isolation),
        };
        self.write(&plan, isolation).await
    }

    async fn read_into<K: ResultSink + ?Sized>(
        &mut self,
        plan: &StatementPlan,
        sink: &mut K,
    ) -> Result<RowSet> {
        let rows = execute_read_only(&mut self.session, plan).await?;
        sink.display(plan.target(), &rows.columns, &rows.rows);
        Ok(rows)
    }

    /// Equality-filtered SELECT over a table; blank inputs are ignored.
    #[instrument(skip(self, inputs, sink))]
    pub async fn submit_lookup<C: AsRef<str>, V: AsRef<str>, K: ResultSink + ?Sized>(
        &mut self,
        table: &str,
        inputs: &[(C, V)],
        sink: &mut K,
    ) -> Result<usize> {
        let descriptor = self.describe(table).await?;
        let predicates: Vec<Predicate> = descriptor
            .coerce_inputs(inputs)?
            .into_iter()
            .filter(|(_, value)| !value.is_blank())
            .map(|(column, value)| Predicate::eq(column, value))
            .collect();

        let plan = build_select(table, &predicates, false, &[])?;
        Ok(self.read_into(&plan, sink).await?.len())
    }

    /// Options for every filter of a report target, in declared order.
    pub async fn report_filters(&mut self, target: &str) -> Result<ResolvedFilters> {
        let report = self.catalog.report(target)?;
        resolve_filters(&mut self.session, report).await
    }

    /// Run a report with the user's selections against the options they
    /// were offered.
    #[instrument(skip(self, resolved, selections, sink), fields(report = %resolved.target))]
    pub async fn run_report<C: AsRef<str>, V: AsRef<str>, K: ResultSink + ?Sized>(
        &mut self,
        resolved: &ResolvedFilters,
        selections: &[(C, V)],
        sink: &mut K,
    ) -> Result<usize> {
        let report = self.catalog.report(&resolved.target)?;
        let plan = build_report_select(report, resolved, selections)?;
        Ok(self.read_into(&plan, sink).await?.len())
    }

    /// First rows of a table, capped by the configured limit.
    pub async fn show_all<K: ResultSink + ?Sized>(&mut self, table: &str, sink: &mut K) -> Result<usize> {
        let plan = build_listing(table, self.show_all_limit)?;
        Ok(self.read_into(&plan, sink).await?.len())
    }

    pub async fn count_rows<K: ResultSink + ?Sized>(&mut self, table: &str, sink: &mut K) -> Result<i64> {
        let plan = build_count(table)?;
        let rows = self.read_into(&plan, sink).await?;
        rows.get(0, "count")
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| PanelError::Execution {
                target: table.to_string(),
                operation: "SELECT".to_string(),
                message: "count returned no value".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{conflict, fatal, rows, Reply, ScriptedSession};
    use dbpanel_shared::{ExponentialBackoff, RetryConfig};

    fn employees() -> ScriptedSession {
        ScriptedSession::new()
            .on(
                "information_schema.columns",
                rows(
                    &["column_name", "data_type", "nullable"],
                    vec![
                        vec!["w_id".into(), "integer".into(), SqlValue::Bool(false)],
                        vec!["full_name".into(), "character varying".into(), SqlValue::Bool(false)],
                        vec!["hire_date".into(), "date".into(), SqlValue::Bool(false)],
                        vec!["is_master".into(), "boolean".into(), SqlValue::Bool(false)],
                    ],
                ),
            )
            .on("PRIMARY KEY", rows(&["column_name"], vec![vec!["w_id".into()]]))
    }

    fn panel(session: ScriptedSession) -> AdminPanel<ScriptedSession> {
        AdminPanel::new(session, &PanelConfig::default(), Catalog::builtin().unwrap()).with_executor(
            TransactionExecutor::new(
                ExponentialBackoff::new(RetryConfig::immediate(), 5),
                IsolationLevel::RepeatableRead,
            ),
        )
    }

    fn writes(panel: &AdminPanel<ScriptedSession>) -> Vec<&(String, Vec<SqlValue>)> {
        panel
            .session()
            .statements
            .iter()
            .filter(|(sql, _)| !sql.contains("information_schema"))
            .collect()
    }

    #[tokio::test]
    async fn test_insert_coerces_and_skips_blanks() {
        let mut panel = panel(employees());
        let outcome = panel
            .submit_insert(
                "employees",
                &[("w_id", ""), ("full_name", "Ivanov"), ("hire_date", "2024-03-01"), ("is_master", "no")],
            )
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Applied(1));

        let writes = writes(&panel);
        assert_eq!(writes.len(), 1);
        assert_eq!(
            writes[0].0,
            "INSERT INTO employees (full_name, hire_date, is_master) VALUES ($1, $2, $3)"
        );
        assert_eq!(writes[0].1[0], SqlValue::from("Ivanov"));
        assert!(matches!(writes[0].1[1], SqlValue::Date(_)));
        assert_eq!(writes[0].1[2], SqlValue::Bool(false));
    }

    #[tokio::test]
    async fn test_employee_delete_goes_through_procedure() {
        let mut panel = panel(employees());
        panel.submit_delete("employees", &[("w_id", "7")]).await.unwrap();

        let writes = writes(&panel);
        assert_eq!(writes[0].0, "CALL sp_remove_employee(CAST($1 AS INTEGER))");
        assert_eq!(writes[0].1, vec![SqlValue::Int(7)]);
        assert_eq!(panel.session().events, vec!["BEGIN REPEATABLE READ", "COMMIT"]);
    }

    #[tokio::test]
    async fn test_procedure_business_error_is_not_retried() {
        let session = employees().on("CALL", Reply::Fail(fatal("cannot remove an active master")));
        let mut panel = panel(session);
        let err = panel.submit_delete("employees", &[("w_id", "7")]).await.unwrap_err();

        assert!(matches!(err, PanelError::Execution { ref target, .. } if target == "sp_remove_employee"));
        assert_eq!(panel.session().attempts(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_delete_exhausts_retries() {
        let session = employees().on("CALL", Reply::Fail(conflict()));
        let mut panel = panel(session);
        let err = panel.submit_delete("employees", &[("w_id", "7")]).await.unwrap_err();

        assert!(matches!(err, PanelError::RetryExhausted { attempts: 5, .. }));
        assert_eq!(panel.session().attempts(), 5);
        assert_eq!(panel.session().count("ROLLBACK"), 5);
    }

    #[tokio::test]
    async fn test_delete_requires_the_key() {
        let mut panel = panel(employees());
        for inputs in [vec![("w_id", "")], vec![], vec![("full_name", "Ivanov")]] {
            let err = panel.submit_delete("employees", &inputs).await.unwrap_err();
            assert!(err.is_user_error());
        }
        assert!(writes(&panel).is_empty());
    }

    #[tokio::test]
    async fn test_update_and_missing_row() {
        let session = employees().on("UPDATE", Reply::Affected(0));
        let mut panel = panel(session);
        let outcome = panel
            .submit_update("employees", &[("w_id", "404")], &[("full_name", "Petrov"), ("hire_date", "")])
            .await
            .unwrap();

        assert_eq!(outcome, WriteOutcome::NoRowsMatched);
        assert!(outcome.is_warning());
        let writes = writes(&panel);
        assert_eq!(writes[0].0, "UPDATE employees SET full_name = $1 WHERE w_id = $2");
        assert_eq!(writes[0].1, vec![SqlValue::from("Petrov"), SqlValue::Int(404)]);
    }

    #[tokio::test]
    async fn test_bad_input_never_reaches_the_database() {
        let mut panel = panel(employees());
        let err = panel
            .submit_insert("employees", &[("hire_date", "tomorrow")])
            .await
            .unwrap_err();
        assert!(err.is_user_error());
        assert!(writes(&panel).is_empty());
        assert!(panel.session().events.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_displays_rows() {
        let session = employees().on(
            "SELECT * FROM employees",
            rows(&["w_id", "full_name"], vec![vec![SqlValue::Int(7), "Ivanov".into()]]),
        );
        let mut panel = panel(session);

        let mut sink = MockResultSink::new();
        sink.expect_display()
            .withf(|key, columns, rows| {
                key == "employees" && columns.len() == 2 && rows.len() == 1
            })
            .times(1)
            .return_const(());

        let n = panel
            .submit_lookup("employees", &[("is_master", "yes"), ("full_name", "")], &mut sink)
            .await
            .unwrap();
        assert_eq!(n, 1);

        let writes = writes(&panel);
        assert_eq!(writes[0].0, "SELECT * FROM employees WHERE is_master = TRUE");
        assert!(writes[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_report_flow() {
        let session = ScriptedSession::new()
            .on(
                "FROM labs",
                rows(&["id", "display"], vec![vec![SqlValue::Int(2), "Stress".into()]]),
            )
            .on(
                "FROM v_lab_tested_products",
                rows(&["product", "test_date"], vec![]),
            );
        let mut panel = panel(session);

        let resolved = panel.report_filters("v_lab_tested_products").await.unwrap();
        assert_eq!(resolved.get("lab_id").unwrap().option.options, vec!["Any", "Stress"]);

        let mut sink = MockResultSink::new();
        sink.expect_display()
            .withf(|key, _, rows| key == "v_lab_tested_products" && rows.is_empty())
            .times(1)
            .return_const(());

        let n = panel
            .run_report(&resolved, &[("lab_id", "Stress"), ("start_date", "2024-01-01")], &mut sink)
            .await
            .unwrap();
        assert_eq!(n, 0);

        let (sql, params) = panel.session().statements.last().unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM v_lab_tested_products WHERE lab_id = $1 AND test_date >= $2"
        );
        assert_eq!(params[0], SqlValue::Int(2));
        assert!(panel.session().events.is_empty());
    }

    #[tokio::test]
    async fn test_insert_resolves_worker_type_and_grade_by_name() {
        let session = ScriptedSession::new()
            .on(
                "information_schema.columns",
                rows(
                    &["column_name", "data_type", "nullable"],
                    vec![
                        vec!["w_id".into(), "integer".into(), SqlValue::Bool(false)],
                        vec!["full_name".into(), "character varying".into(), SqlValue::Bool(false)],
                        vec!["worker_type".into(), "integer".into(), SqlValue::Bool(false)],
                        vec!["experience".into(), "integer".into(), SqlValue::Bool(true)],
                        vec!["grade_id".into(), "integer".into(), SqlValue::Bool(true)],
                    ],
                ),
            )
            .on("PRIMARY KEY", rows(&["column_name"], vec![vec!["w_id".into()]]));
        let mut panel = panel(session);

        let outcome = panel
            .submit_insert(
                "employees",
                &[
                    ("full_name", "Ivanov"),
                    ("worker_type", "Engineer"),
                    ("experience", "4"),
                    ("grade_id", "Shop chief"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Applied(1));

        let writes = writes(&panel);
        assert_eq!(
            writes[0].0,
            "INSERT INTO employees (full_name, worker_type, experience, grade_id) VALUES ($1, \
             (SELECT tp_id FROM worker_types WHERE name = $2), $3, \
             (SELECT g_id FROM grades WHERE grade_title = $4))"
        );
        assert_eq!(
            writes[0].1,
            vec![
                SqlValue::from("Ivanov"),
                SqlValue::from("Engineer"),
                SqlValue::Int(4),
                SqlValue::from("Shop chief"),
            ]
        );
    }

    #[tokio::test]
    async fn test_hostile_lookup_options_reach_the_report_as_parameters() {
        let session = ScriptedSession::new()
            .on(
                "FROM workshops",
                rows(
                    &["id", "display"],
                    vec![vec![
                        "North'); DROP TABLE workshops; --".into(),
                        "North\" OR 1=1 --".into(),
                    ]],
                ),
            )
            .on(
                "FROM get_product_assembly_summary",
                rows(&["product", "assembled"], vec![]),
            );
        let mut panel = panel(session);

        let resolved = panel.report_filters("get_product_assembly_summary").await.unwrap();
        let mut sink = MockResultSink::new();
        sink.expect_display().times(1).return_const(());

        panel
            .run_report(
                &resolved,
                &[("workshop", "North\" OR 1=1 --"), ("agg_level", "workshop_total")],
                &mut sink,
            )
            .await
            .unwrap();

        let (sql, params) = panel.session().statements.last().unwrap();
        assert!(!sql.contains("North"), "{sql}");
        assert!(params.contains(&SqlValue::from("North'); DROP TABLE workshops; --")));
        assert!(params.contains(&SqlValue::from("workshop_total")));
    }

    #[tokio::test]
    async fn test_unknown_report_is_a_configuration_error() {
        let mut panel = panel(ScriptedSession::new());
        let err = panel.report_filters("v_unknown").await.unwrap_err();
        assert!(matches!(err, PanelError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_show_all_and_count() {
        let session = ScriptedSession::new()
            .on("COUNT(*)", rows(&["count"], vec![vec![SqlValue::Int(42)]]))
            .on("LIMIT", rows(&["l_id"], vec![vec![SqlValue::Int(1)]]));
        let mut panel = panel(session);

        let mut sink = MockResultSink::new();
        sink.expect_display().times(2).return_const(());

        assert_eq!(panel.show_all("labs", &mut sink).await.unwrap(), 1);
        assert_eq!(panel.count_rows("labs", &mut sink).await.unwrap(), 42);

        let (sql, params) = &panel.session().statements[0];
        assert_eq!(sql, "SELECT * FROM labs LIMIT $1");
        assert_eq!(params, &vec![SqlValue::Int(100)]);
    }

    #[tokio::test]
    async fn test_table_actions() {
        let session = ScriptedSession::new()
            .then(rows(&["granted"], vec![vec![SqlValue::Bool(false)]]))
            .then(rows(&["granted"], vec![vec![SqlValue::Bool(true)]]))
            .then(rows(&["granted"], vec![vec![SqlValue::Bool(false)]]));
        let mut panel = panel(session);
        let actions = panel.table_actions("employees").await;
        assert!(!actions.insert && actions.update && !actions.delete);
    }
}
