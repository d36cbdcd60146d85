use std::{env, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use dotenv::dotenv;
use futures::FutureExt;
use rusqlite::params_from_iter;
use tokio::{
    runtime::Handle,
    sync::{Mutex, OwnedMutexGuard},
    task,
};
use tracing::{debug, error, info, warn};

use crate::database::{
    connection::{Connection, ConnectionId},
    dialect::Dialect,
    error::DatabaseError,
    schema::{ColumnDescriptor, TableName},
    sql_value::SqlValue,
    sqlite::generate::SQLITE_DIALECT,
};

pub const IN_MEMORY: &str = ":memory:";

pub fn connection_string() -> Result<String, env::VarError> {
    dotenv().ok();
    // Default to ./bulksync.db if DATABASE_URL is not set
    let connection = env::var("DATABASE_URL").unwrap_or_else(|_| "./bulksync.db".to_string());
    Ok(connection)
}

#[derive(thiserror::Error, Debug)]
pub enum SqliteConnectionError {
    #[error("The database connection string is wrong please check your environment: {0}")]
    DatabaseConnectionConfigWrong(#[from] env::VarError),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] DatabaseError),

    #[error("Can not connect to the database please make sure your connection string is correct")]
    CanNotConnectToDatabase,
}

/// A single SQLite session. rusqlite is synchronous so every statement runs on
/// the blocking pool while holding the connection lock.
///
/// The lock is taken before the blocking task is spawned, and tokio's mutex
/// hands it out in request order. A statement whose caller stopped waiting
/// still runs before anything issued after it.
pub struct SqliteConnection {
    id: ConnectionId,
    cache_key: String,
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteConnection {
    pub async fn open(path: &str) -> Result<Self, SqliteConnectionError> {
        info!("Connecting to SQLite database at: {}", path);

        let db_path = path.to_string();
        let conn = task::spawn_blocking(move || {
            if db_path != IN_MEMORY {
                if let Some(parent) = PathBuf::from(&db_path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            error!("Failed to create parent directories for SQLite database: {}", e);
                            SqliteConnectionError::CanNotConnectToDatabase
                        })?;
                    }
                }
            }

            let conn = rusqlite::Connection::open(&db_path).map_err(|e| {
                error!("Error connecting to SQLite database: {}", e);
                SqliteConnectionError::CanNotConnectToDatabase
            })?;

            if db_path != IN_MEMORY {
                conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;").map_err(
                    |e| {
                        error!("Error setting SQLite pragmas: {}", e);
                        SqliteConnectionError::CanNotConnectToDatabase
                    },
                )?;
            }

            Ok::<rusqlite::Connection, SqliteConnectionError>(conn)
        })
        .await
        .map_err(|_| SqliteConnectionError::CanNotConnectToDatabase)??;

        let id = ConnectionId::next();
        let cache_key = if path == IN_MEMORY {
            // every in-memory connection is its own database
            format!("sqlite:{}#{:?}", IN_MEMORY, id)
        } else {
            format!("sqlite:{}", path)
        };

        Ok(SqliteConnection { id, cache_key, conn: Arc::new(Mutex::new(conn)) })
    }

    pub async fn open_in_memory() -> Result<Self, SqliteConnectionError> {
        Self::open(IN_MEMORY).await
    }

    /// Connects to `DATABASE_URL`, or `./bulksync.db` when it is not set.
    pub async fn new() -> Result<Self, SqliteConnectionError> {
        let connection_str = connection_string()?;
        Self::open(&connection_str).await
    }

    async fn run<T, F>(&self, f: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn).lock_owned().await;
        task::spawn_blocking(move || f(&conn).map_err(DatabaseError::from)).await?
    }

    /// Runs a query and returns every row as plain values.
    pub async fn query(&self, sql: &str) -> Result<Vec<Vec<SqlValue>>, DatabaseError> {
        let sql = sql.to_string();
        self.run(move |conn| {
            let mut statement = conn.prepare(&sql)?;
            let width = statement.column_count();
            let rows = statement.query_map([], |row| {
                (0..width)
                    .map(|index| row.get_ref(index).map(SqlValue::from_sqlite))
                    .collect::<Result<Vec<_>, _>>()
            })?;
            rows.collect()
        })
        .await
    }
}

fn rollback_if_open(conn: OwnedMutexGuard<rusqlite::Connection>) {
    if !conn.is_autocommit() {
        if let Err(e) = conn.execute_batch(SQLITE_DIALECT.rollback_sql()) {
            warn!("Failed to discard abandoned transaction: {}", e);
        }
    }
}

fn column_from_pragma(
    name: String,
    declared_type: String,
    not_null: bool,
    primary_key_position: i64,
) -> ColumnDescriptor {
    ColumnDescriptor {
        name,
        is_nullable: !not_null && primary_key_position == 0,
        is_primary: primary_key_position > 0,
        is_identity: false,
        declared_type,
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn dialect(&self) -> &'static dyn Dialect {
        &SQLITE_DIALECT
    }

    fn cache_key(&self) -> String {
        self.cache_key.clone()
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), DatabaseError> {
        debug!("Executing: {}", sql);
        let sql = sql.to_string();
        self.run(move |conn| conn.execute_batch(&sql)).await
    }

    async fn execute(&self, sql: &str) -> Result<u64, DatabaseError> {
        debug!("Executing: {}", sql);
        let sql = sql.to_string();
        self.run(move |conn| conn.execute(&sql, []).map(|changed| changed as u64)).await
    }

    async fn execute_with_params(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<u64, DatabaseError> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |conn| {
            let mut statement = conn.prepare_cached(&sql)?;
            statement.execute(params_from_iter(params.iter())).map(|changed| changed as u64)
        })
        .await
    }

    async fn fetch_columns(
        &self,
        table: &TableName,
    ) -> Result<Vec<ColumnDescriptor>, DatabaseError> {
        let table = table.clone();
        self.run(move |conn| {
            let mut statement = match &table.schema {
                Some(_) => conn.prepare(
                    "SELECT name, type, \"notnull\", pk FROM pragma_table_xinfo(?1, ?2) WHERE hidden = 0",
                )?,
                None => conn.prepare(
                    "SELECT name, type, \"notnull\", pk FROM pragma_table_xinfo(?1) WHERE hidden = 0",
                )?,
            };

            let map_row = |row: &rusqlite::Row<'_>| {
                Ok(column_from_pragma(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            };
            let rows = match &table.schema {
                Some(schema) => statement.query_map([&table.name, schema], map_row)?,
                None => statement.query_map([&table.name], map_row)?,
            };
            let mut columns = rows.collect::<Result<Vec<_>, _>>()?;

            // A lone INTEGER PRIMARY KEY aliases the rowid and is generated on insert.
            let primary: Vec<usize> = columns
                .iter()
                .enumerate()
                .filter(|(_, column)| column.is_primary)
                .map(|(index, _)| index)
                .collect();
            if let [index] = primary.as_slice() {
                if columns[*index].declared_type.eq_ignore_ascii_case("INTEGER") {
                    columns[*index].is_identity = true;
                }
            }

            Ok(columns)
        })
        .await
    }

    fn discard_transaction(&self) {
        // polling once queues the request now, so it keeps its place behind any
        // statement still holding the connection
        let mut lock = Box::pin(Arc::clone(&self.conn).lock_owned());
        match (lock.as_mut().now_or_never(), Handle::try_current()) {
            (Some(conn), Ok(handle)) => {
                handle.spawn_blocking(move || rollback_if_open(conn));
            }
            (Some(conn), Err(_)) => rollback_if_open(conn),
            (None, Ok(handle)) => {
                handle.spawn(async move {
                    let conn = lock.await;
                    if let Err(e) = task::spawn_blocking(move || rollback_if_open(conn)).await {
                        warn!("Failed to discard abandoned transaction: {}", e);
                    }
                });
            }
            (None, Err(_)) => {
                warn!("SQLite connection busy outside a runtime, abandoned transaction left open")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_columns_reads_keys_and_identity() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, email TEXT NOT NULL, age INTEGER);",
        )
        .await
        .unwrap();

        let columns = conn.fetch_columns(&TableName::parse("people")).await.unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns[0].is_primary && columns[0].is_identity && !columns[0].is_nullable);
        assert_eq!(columns[1].name, "email");
        assert!(!columns[1].is_nullable);
        assert!(columns[2].is_nullable && !columns[2].is_primary);
    }

    #[tokio::test]
    async fn test_composite_key_has_no_identity() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute("CREATE TABLE pairs (a INTEGER, b INTEGER, v TEXT, PRIMARY KEY (a, b));")
            .await
            .unwrap();

        let columns = conn.fetch_columns(&TableName::parse("main.pairs")).await.unwrap();
        assert!(columns[0].is_primary && columns[1].is_primary);
        assert!(columns.iter().all(|column| !column.is_identity));
    }

    #[tokio::test]
    async fn test_missing_table_has_no_columns() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        let columns = conn.fetch_columns(&TableName::parse("nope")).await.unwrap();
        assert!(columns.is_empty());
    }

    #[tokio::test]
    async fn test_execute_with_params_and_query() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute("CREATE TABLE t (a INTEGER, b TEXT);").await.unwrap();

        let inserted = conn
            .execute_with_params(
                "INSERT INTO t (a, b) VALUES (?1, ?2), (?3, ?4);",
                &[SqlValue::from("1"), SqlValue::from("x"), SqlValue::Int(2), SqlValue::Null],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let rows = conn.query("SELECT a, b FROM t ORDER BY a").await.unwrap();
        assert_eq!(rows[0], vec![SqlValue::Int(1), SqlValue::Text("x".to_string())]);
        assert_eq!(rows[1], vec![SqlValue::Int(2), SqlValue::Null]);
    }

    #[tokio::test]
    async fn test_discard_rolls_back_open_transaction() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute("CREATE TABLE t (a INTEGER);").await.unwrap();
        conn.batch_execute("BEGIN; INSERT INTO t VALUES (1);").await.unwrap();

        conn.discard_transaction();

        let rows = conn.query("SELECT COUNT(*) FROM t").await.unwrap();
        assert_eq!(rows[0][0], SqlValue::Int(0));
    }

    #[tokio::test]
    async fn test_abandoned_statement_runs_before_later_rollback() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute("CREATE TABLE t (a INTEGER);").await.unwrap();
        conn.batch_execute("BEGIN;").await.unwrap();

        // the insert is started, then its caller gives up waiting on it
        let abandoned = tokio::time::timeout(
            std::time::Duration::ZERO,
            conn.execute("INSERT INTO t VALUES (1);"),
        )
        .await;
        assert!(abandoned.is_err());

        conn.batch_execute("ROLLBACK;").await.unwrap();

        let rows = conn.query("SELECT COUNT(*) FROM t").await.unwrap();
        assert_eq!(rows[0][0], SqlValue::Int(0));
    }

    #[tokio::test]
    async fn test_discard_queues_behind_running_statement() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute("CREATE TABLE t (a INTEGER);").await.unwrap();
        conn.batch_execute("BEGIN;").await.unwrap();

        let abandoned = tokio::time::timeout(
            std::time::Duration::ZERO,
            conn.execute("INSERT INTO t VALUES (1);"),
        )
        .await;
        assert!(abandoned.is_err());

        // returns at once even though the insert may still hold the connection
        conn.discard_transaction();

        let rows = conn.query("SELECT COUNT(*) FROM t").await.unwrap();
        assert_eq!(rows[0][0], SqlValue::Int(0));
    }
}
