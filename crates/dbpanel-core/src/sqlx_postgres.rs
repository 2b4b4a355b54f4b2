//! [`Session`] over a single sqlx `PgConnection`.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use dbpanel_shared::{DatabaseConfig, IsolationLevel, Role};
use rust_decimal::Decimal;
use sqlx::{
    decode::Decode,
    encode::{Encode, IsNull},
    postgres::{
        types::{Oid, PgInterval, PgMoney},
        PgArgumentBuffer, PgArguments, PgConnectOptions, PgConnection, PgRow, PgTypeInfo,
        PgTypeKind, PgValueRef, Postgres,
    },
    query::Query,
    types::{JsonValue, Uuid},
    Column, ConnectOptions, Connection, Executor, Row, Statement, Type, TypeInfo, ValueRef,
};
use tracing::{debug, info, instrument, warn};

use crate::error::{PanelError, Result};
use crate::session::{DbError, Session};
use crate::sql::quote_ident;
use crate::value::{RowSet, SqlValue};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// A NULL parameter with no declared type, so the server infers it from
/// context the way it would for a literal `NULL`.
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> IsNull {
        IsNull::Yes
    }
}

fn bind_value<'q>(query: PgQuery<'q>, value: &SqlValue) -> std::result::Result<PgQuery<'q>, DbError> {
    Ok(match value {
        SqlValue::Null => query.bind(UntypedNull),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Float(f) => query.bind(*f),
        SqlValue::Numeric(s) => {
            let decimal = Decimal::from_str(s)
                .map_err(|e| DbError::new(None, format!("invalid numeric parameter: {e}")))?;
            query.bind(decimal)
        }
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Date(d) => query.bind(*d),
        SqlValue::Timestamp(ts) => query.bind(*ts),
    })
}

fn decode_value(raw: PgValueRef<'_>) -> std::result::Result<SqlValue, DbError> {
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }

    let type_info = raw.type_info().into_owned();
    let tn = type_info.name().to_string();
    let raw_kind = type_info.kind();

    macro_rules! dec {
        ($t:ty) => {{
            <$t as Decode<'_, Postgres>>::decode(raw).map_err(|e| {
                DbError::new(
                    None,
                    format!(
                        "decode {} as {} failed: {}",
                        tn,
                        std::any::type_name::<$t>(),
                        e
                    ),
                )
            })?
        }};
    }

    let value = match tn.as_str() {
        "INT8" => SqlValue::Int(dec!(i64)),
        "INT4" => SqlValue::Int(dec!(i32) as i64),
        "INT2" => SqlValue::Int(dec!(i16) as i64),
        "FLOAT8" => SqlValue::Float(dec!(f64)),
        "FLOAT4" => SqlValue::Float(dec!(f32) as f64),
        "NUMERIC" => SqlValue::Numeric(dec!(Decimal).normalize().to_string()),
        "BOOL" => SqlValue::Bool(dec!(bool)),

        "TEXT" | "VARCHAR" | "CHAR" | "NAME" => SqlValue::Text(dec!(String)),

        "DATE" => SqlValue::Date(dec!(chrono::NaiveDate)),
        "TIMESTAMP" => SqlValue::Timestamp(dec!(chrono::NaiveDateTime)),
        "TIMESTAMPTZ" => SqlValue::Timestamp(dec!(chrono::DateTime<chrono::Utc>).naive_utc()),
        "TIME" => SqlValue::Text(dec!(chrono::NaiveTime).format("%H:%M:%S").to_string()),
        "INTERVAL" => SqlValue::Text(format_interval(&dec!(PgInterval))),

        "UUID" => SqlValue::Text(dec!(Uuid).to_string()),
        "JSON" | "JSONB" => SqlValue::Text(dec!(JsonValue).to_string()),
        "MONEY" => SqlValue::Numeric(dec!(PgMoney).to_decimal(2).normalize().to_string()),
        "OID" => SqlValue::Int(dec!(Oid).0 as i64),
        "citext" => SqlValue::Text(dec!(String)),

        // Enum labels travel as their text in both wire formats.
        _ if matches!(raw_kind, PgTypeKind::Enum(_)) => SqlValue::Text(dec!(String)),

        other => {
            debug!(column_type = other, "No decoder for column type, showing placeholder");
            SqlValue::Text(format!("<{other}>"))
        }
    };
    Ok(value)
}

/// `1 year 2 mons 3 days 04:05:06.789` in the shape `psql` prints.
fn format_interval(interval: &PgInterval) -> String {
    let mut parts = Vec::new();
    let (years, months) = (interval.months / 12, interval.months % 12);
    for (n, unit) in [(years, "year"), (months, "mon"), (interval.days, "day")] {
        match n {
            0 => {}
            1 | -1 => parts.push(format!("{n} {unit}")),
            _ => parts.push(format!("{n} {unit}s")),
        }
    }

    let micros = interval.microseconds;
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let micros = micros.unsigned_abs();
        let (secs, frac) = (micros / 1_000_000, micros % 1_000_000);
        let mut clock = format!("{sign}{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
        if frac != 0 {
            let digits = format!("{frac:06}");
            clock.push('.');
            clock.push_str(digits.trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

fn decode_row(row: &PgRow) -> std::result::Result<Vec<SqlValue>, DbError> {
    row.columns()
        .iter()
        .map(|col| decode_value(row.try_get_raw(col.ordinal())?))
        .collect()
}

/// One live connection owned by one logged-in role.
pub struct PgSession {
    conn: PgConnection,
    role: Option<Role>,
    /// Set when a transaction was abandoned mid-flight; cleared by the
    /// ROLLBACK issued before the next statement.
    pending_rollback: bool,
}

impl PgSession {
    /// Connect with an explicit URL. The URL is never logged.
    #[instrument(skip(url))]
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| PanelError::Connection(format!("invalid connection URL: {e}")))?;

        let conn = tokio::time::timeout(timeout, options.connect())
            .await
            .map_err(|_| PanelError::Connection(format!("connection timed out after {timeout:?}")))?
            .map_err(|e| PanelError::Connection(DbError::from(e).to_string()))?;

        Ok(Self {
            conn,
            role: None,
            pending_rollback: false,
        })
    }

    /// Connect as `role` using that role's URL and scope name resolution to
    /// the configured schema.
    #[instrument(skip(config))]
    pub async fn connect_role(config: &DatabaseConfig, role: Role) -> Result<Self> {
        let url = config
            .url_for(role)
            .map_err(|e| PanelError::configuration("database", e.to_string()))?;

        let mut session = Self::connect(url, Duration::from_secs(config.connect_timeout)).await?;
        session.role = Some(role);

        let search_path = format!("SET search_path TO {}", quote_ident(&config.schema)?);
        (&mut session.conn)
            .execute(search_path.as_str())
            .await
            .map_err(|e| PanelError::Connection(DbError::from(e).to_string()))?;

        info!("Connected as {}", role);
        Ok(session)
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub async fn close(self) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| PanelError::Connection(DbError::from(e).to_string()))
    }

    async fn recover(&mut self) -> std::result::Result<(), DbError> {
        if self.pending_rollback {
            warn!("Rolling back abandoned transaction");
            (&mut self.conn).execute("ROLLBACK").await?;
            self.pending_rollback = false;
        }
        Ok(())
    }

    async fn control(&mut self, statement: &str) -> std::result::Result<(), DbError> {
        self.recover().await?;
        debug!(statement, "transaction control");
        (&mut self.conn).execute(statement).await?;
        Ok(())
    }
}

#[async_trait]
impl Session for PgSession {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<RowSet, DbError> {
        self.recover().await?;
        debug!(sql, params = params.len(), "query");

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param)?;
        }
        let rows = query.fetch_all(&mut self.conn).await?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => {
                let statement = (&mut self.conn).prepare(sql).await?;
                statement
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            }
        };

        let decoded = rows
            .iter()
            .map(decode_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(RowSet::new(columns, decoded))
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, DbError> {
        self.recover().await?;
        debug!(sql, params = params.len(), "execute");

        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param)?;
        }
        let result = query.execute(&mut self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn begin(&mut self, isolation: IsolationLevel) -> std::result::Result<(), DbError> {
        let statement = format!("BEGIN ISOLATION LEVEL {}", isolation.as_sql());
        self.control(&statement).await
    }

    async fn commit(&mut self) -> std::result::Result<(), DbError> {
        self.control("COMMIT").await
    }

    async fn rollback(&mut self) -> std::result::Result<(), DbError> {
        self.control("ROLLBACK").await
    }

    fn abandon_transaction(&mut self) {
        self.pending_rollback = true;
    }
}
