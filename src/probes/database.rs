//! Relational database probes
//!
//! Every probe opens a dedicated connection, runs one statement and closes the
//! connection again, each step under its own timeout. MySQL, SQL Server and
//! SQLite are supported; other engines are rejected as invalid configuration.

use std::future::Future;

use serde_json::{Number, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row, TypeInfo};
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, instrument};

use crate::business;
use crate::config::DatabaseTimeouts;
use crate::outcome::{Metrics, Outcome, Status};
use crate::target::{BusinessSpec, DatabaseSpec};

use super::ProbeError;

const LIVENESS_QUERY: &str = "SELECT 1";

const MYSQL_PORT: u16 = 3306;
const SQLSERVER_PORT: u16 = 1433;
const SQLSERVER_DATABASE: &str = "master";

/// SQL Server error number for a rejected login
const SQLSERVER_LOGIN_FAILED: u32 = 18456;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Engine {
    MySql,
    SqlServer,
    Sqlite,
}

impl Engine {
    fn of(spec: &DatabaseSpec) -> Result<Self, ProbeError> {
        match spec.db_type.trim().to_ascii_lowercase().as_str() {
            "mysql" | "" => Ok(Engine::MySql),
            "sqlserver" | "mssql" => Ok(Engine::SqlServer),
            "sqlite" => Ok(Engine::Sqlite),
            other => Err(ProbeError::InvalidConfig(format!(
                "unsupported database type: {other}"
            ))),
        }
    }
}

pub struct DatabaseProbe {
    timeouts: DatabaseTimeouts,
}

impl DatabaseProbe {
    pub fn new(timeouts: DatabaseTimeouts) -> Self {
        Self { timeouts }
    }

    /// Connect, run `SELECT 1`, disconnect. Any failure on the way means the
    /// database is `offline`.
    #[instrument(skip_all, fields(host = %spec.host))]
    pub async fn probe_liveness(&self, spec: &DatabaseSpec) -> Result<Outcome, ProbeError> {
        let engine = Engine::of(spec)?;

        match self.fetch(engine, spec, LIVENESS_QUERY).await {
            Ok(_) => Ok(Outcome::normal(Metrics::new())
                .with_metric("status", "online")
                .with_metric("host", spec.host.clone())),
            Err(e) => {
                debug!("database unavailable: {e}");
                Ok(Outcome::failure(Status::Offline, e.to_string())
                    .with_metric("host", spec.host.clone()))
            }
        }
    }

    /// Run the business query and judge its rows.
    #[instrument(skip_all, fields(host = %spec.database.host))]
    pub async fn probe_business(&self, spec: &BusinessSpec) -> Result<Outcome, ProbeError> {
        let engine = Engine::of(&spec.database)?;
        if spec.query.trim().is_empty() {
            return Err(ProbeError::InvalidConfig("business query is empty".into()));
        }

        let rows = self.fetch(engine, &spec.database, &spec.query).await?;
        debug!("business query returned {} rows", rows.len());
        Ok(business::evaluate(rows, spec.threshold).into_outcome())
    }

    async fn fetch(
        &self,
        engine: Engine,
        spec: &DatabaseSpec,
        sql: &str,
    ) -> Result<Vec<Vec<Value>>, ProbeError> {
        match engine {
            Engine::MySql => self.fetch_mysql(spec, sql).await,
            Engine::SqlServer => self.fetch_sqlserver(spec, sql).await,
            Engine::Sqlite => self.fetch_sqlite(spec, sql).await,
        }
    }

    async fn fetch_mysql(&self, spec: &DatabaseSpec, sql: &str) -> Result<Vec<Vec<Value>>, ProbeError> {
        if spec.host.is_empty() {
            return Err(ProbeError::InvalidConfig("database host is empty".into()));
        }
        let mut options = MySqlConnectOptions::new()
            .host(&spec.host)
            .port(spec.port.unwrap_or(MYSQL_PORT))
            .username(&spec.user)
            .password(&spec.password);
        if !spec.database.is_empty() {
            options = options.database(&spec.database);
        }

        let mut conn: MySqlConnection = self.connect(options.connect()).await?;
        let fetched = timeout(self.timeouts.read, sqlx::query(sql).fetch_all(&mut conn)).await;
        self.close(conn).await;

        let rows = self.unwrap_query(fetched)?;
        Ok(rows.iter().map(mysql_row).collect())
    }

    async fn fetch_sqlserver(
        &self,
        spec: &DatabaseSpec,
        sql: &str,
    ) -> Result<Vec<Vec<Value>>, ProbeError> {
        if spec.host.is_empty() {
            return Err(ProbeError::InvalidConfig("database host is empty".into()));
        }
        let mut config = Config::new();
        config.host(&spec.host);
        config.port(spec.port.unwrap_or(SQLSERVER_PORT));
        config.authentication(AuthMethod::sql_server(&spec.user, &spec.password));
        config.database(if spec.database.is_empty() {
            SQLSERVER_DATABASE
        } else {
            spec.database.as_str()
        });
        config.trust_cert();

        let mut client = self.connect(connect_sqlserver(config)).await?;
        let fetched = timeout(self.timeouts.read, async {
            client.simple_query(sql).await?.into_first_result().await
        })
        .await;
        match timeout(self.timeouts.write, client.close()).await {
            Err(_) => debug!("closing database connection timed out"),
            Ok(Err(e)) => debug!("error while closing database connection: {e}"),
            Ok(Ok(())) => {}
        }

        let rows = match fetched {
            Err(_) => {
                return Err(ProbeError::TimeoutFailure(format!(
                    "query did not finish within {:?}",
                    self.timeouts.read
                )));
            }
            Ok(Err(e)) => return Err(ProbeError::ProtocolFailure(e.to_string())),
            Ok(Ok(rows)) => rows,
        };
        Ok(rows.iter().map(sqlserver_row).collect())
    }

    async fn fetch_sqlite(&self, spec: &DatabaseSpec, sql: &str) -> Result<Vec<Vec<Value>>, ProbeError> {
        if spec.database.is_empty() {
            return Err(ProbeError::InvalidConfig("sqlite database path is empty".into()));
        }
        let options = SqliteConnectOptions::new()
            .filename(&spec.database)
            .create_if_missing(false);

        let mut conn: SqliteConnection = self.connect(options.connect()).await?;
        let fetched = timeout(self.timeouts.read, sqlx::query(sql).fetch_all(&mut conn)).await;
        self.close(conn).await;

        let rows = self.unwrap_query(fetched)?;
        Ok(rows.iter().map(sqlite_row).collect())
    }

    async fn connect<C, E, F>(&self, connecting: F) -> Result<C, ProbeError>
    where
        F: Future<Output = Result<C, E>>,
        E: Into<ConnectError>,
    {
        match timeout(self.timeouts.connect, connecting).await {
            Err(_) => Err(ProbeError::ConnectFailure(format!(
                "no connection within {:?}",
                self.timeouts.connect
            ))),
            Ok(Err(e)) => Err(e.into().into_probe_error()),
            Ok(Ok(conn)) => Ok(conn),
        }
    }

    fn unwrap_query<R>(
        &self,
        fetched: Result<Result<Vec<R>, sqlx::Error>, tokio::time::error::Elapsed>,
    ) -> Result<Vec<R>, ProbeError> {
        match fetched {
            Err(_) => Err(ProbeError::TimeoutFailure(format!(
                "query did not finish within {:?}",
                self.timeouts.read
            ))),
            Ok(Err(e)) => Err(ProbeError::ProtocolFailure(e.to_string())),
            Ok(Ok(rows)) => Ok(rows),
        }
    }

    async fn close<C: Connection>(&self, conn: C) {
        match timeout(self.timeouts.write, conn.close()).await {
            Err(_) => debug!("closing database connection timed out"),
            Ok(Err(e)) => debug!("error while closing database connection: {e}"),
            Ok(Ok(())) => {}
        }
    }
}

type SqlServerClient = Client<Compat<TcpStream>>;

async fn connect_sqlserver(config: Config) -> Result<SqlServerClient, ConnectError> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Ok(Client::connect(config, tcp.compat_write()).await?)
}

/// Connection failures of any supported engine
enum ConnectError {
    Sqlx(sqlx::Error),
    Tiberius(tiberius::error::Error),
    Io(std::io::Error),
}

impl From<sqlx::Error> for ConnectError {
    fn from(err: sqlx::Error) -> Self {
        ConnectError::Sqlx(err)
    }
}

impl From<tiberius::error::Error> for ConnectError {
    fn from(err: tiberius::error::Error) -> Self {
        ConnectError::Tiberius(err)
    }
}

impl From<std::io::Error> for ConnectError {
    fn from(err: std::io::Error) -> Self {
        ConnectError::Io(err)
    }
}

impl ConnectError {
    fn into_probe_error(self) -> ProbeError {
        match self {
            // SQLSTATE 28000: invalid authorization specification
            ConnectError::Sqlx(sqlx::Error::Database(db)) if db.code().as_deref() == Some("28000") => {
                ProbeError::AuthFailure(db.message().to_string())
            }
            ConnectError::Tiberius(tiberius::error::Error::Server(token))
                if token.code() == SQLSERVER_LOGIN_FAILED =>
            {
                ProbeError::AuthFailure(token.message().to_string())
            }
            ConnectError::Sqlx(e) => ProbeError::ConnectFailure(e.to_string()),
            ConnectError::Tiberius(e) => ProbeError::ConnectFailure(e.to_string()),
            ConnectError::Io(e) => ProbeError::ConnectFailure(e.to_string()),
        }
    }
}

fn float(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn text(value: Option<String>) -> Value {
    value.map(Value::String).unwrap_or(Value::Null)
}

fn mysql_row(row: &MySqlRow) -> Vec<Value> {
    (0..row.len()).map(|index| mysql_cell(row, index)).collect()
}

fn mysql_cell(row: &MySqlRow, index: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<u64>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return float(value);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return text(value);
    }
    if let Ok(value) = row.try_get::<Option<chrono::NaiveDateTime>, _>(index) {
        return text(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<chrono::NaiveDate>, _>(index) {
        return text(value.map(|v| v.to_string()));
    }
    // DECIMAL arrives as text on the wire but has no checked String decoding
    if row.column(index).type_info().name() == "DECIMAL" {
        if let Ok(Some(value)) = row.try_get_unchecked::<Option<String>, _>(index) {
            return match value.parse::<f64>() {
                Ok(number) => float(Some(number)),
                Err(_) => Value::String(value),
            };
        }
    }
    Value::Null
}

fn sqlite_row(row: &SqliteRow) -> Vec<Value> {
    (0..row.len()).map(|index| sqlite_cell(row, index)).collect()
}

fn sqlite_cell(row: &SqliteRow, index: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return float(value);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return text(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return Value::String(format!("<{} bytes>", value.len()));
    }
    Value::Null
}

fn sqlserver_row(row: &tiberius::Row) -> Vec<Value> {
    (0..row.len()).map(|index| sqlserver_cell(row, index)).collect()
}

fn sqlserver_cell(row: &tiberius::Row, index: usize) -> Value {
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<i32, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<i16, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<u8, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        return float(value);
    }
    if let Ok(value) = row.try_get::<f32, _>(index) {
        return float(value.map(f64::from));
    }
    if let Ok(value) = row.try_get::<tiberius::numeric::Numeric, _>(index) {
        return float(value.map(numeric_to_f64));
    }
    if let Ok(value) = row.try_get::<bool, _>(index) {
        return value.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(value) = row.try_get::<&str, _>(index) {
        return text(value.map(str::to_string));
    }
    if let Ok(value) = row.try_get::<chrono::NaiveDateTime, _>(index) {
        return text(value.map(|v| v.to_string()));
    }
    if let Ok(value) = row.try_get::<chrono::NaiveDate, _>(index) {
        return text(value.map(|v| v.to_string()));
    }
    if let Ok(Some(value)) = row.try_get::<&[u8], _>(index) {
        return Value::String(format!("<{} bytes>", value.len()));
    }
    Value::Null
}

fn numeric_to_f64(value: tiberius::numeric::Numeric) -> f64 {
    value.value() as f64 / 10f64.powi(i32::from(value.scale()))
}
