#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use bulksync::{
    async_trait, database::dialect::Dialect, ColumnDescriptor, Connection, ConnectionId,
    DatabaseError, SqlValue, SqliteConnection, TableName,
};

/// In-memory SQLite connection that records every statement it runs and can be
/// told to fail statements containing a fragment.
pub struct RecordingConnection {
    pub inner: SqliteConnection,
    statements: Mutex<Vec<String>>,
    schema_lookups: AtomicUsize,
    fail_on: Mutex<Option<(String, usize)>>,
}

impl RecordingConnection {
    pub async fn open() -> Self {
        bulksync::setup_test_logger();
        RecordingConnection {
            inner: SqliteConnection::open_in_memory().await.unwrap(),
            statements: Mutex::new(Vec::new()),
            schema_lookups: AtomicUsize::new(0),
            fail_on: Mutex::new(None),
        }
    }

    /// Opens a connection holding a `people` table with two rows.
    pub async fn with_people() -> Self {
        let conn = Self::open().await;
        conn.inner
            .batch_execute(
                "CREATE TABLE people (
                    id INTEGER PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT,
                    age INTEGER
                );
                INSERT INTO people (id, email, name, age) VALUES
                    (1, 'ann@example.com', 'Ann', 30),
                    (2, 'bob@example.com', 'Bob', 40);",
            )
            .await
            .unwrap();
        conn
    }

    pub fn fail_when_contains(&self, fragment: &str) {
        self.fail_when_contains_after(fragment, 0);
    }

    /// Lets `skip` matching statements through before failing the rest.
    pub fn fail_when_contains_after(&self, fragment: &str, skip: usize) {
        *self.fail_on.lock().unwrap() = Some((fragment.to_string(), skip));
    }

    pub fn stop_failing(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn schema_lookups(&self) -> usize {
        self.schema_lookups.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.statements.lock().unwrap().clear();
        self.schema_lookups.store(0, Ordering::SeqCst);
    }

    pub async fn query(&self, sql: &str) -> Vec<Vec<SqlValue>> {
        self.inner.query(sql).await.unwrap()
    }

    pub async fn people(&self) -> Vec<(i64, String, Option<String>, Option<i64>)> {
        self.query("SELECT id, email, name, age FROM people ORDER BY id")
            .await
            .into_iter()
            .map(|row| {
                (
                    row[0].as_i64().unwrap(),
                    row[1].as_str().unwrap().to_string(),
                    row[2].as_str().map(str::to_string),
                    row[3].as_i64(),
                )
            })
            .collect()
    }

    pub async fn staging_tables(&self) -> usize {
        self.query(
            "SELECT name FROM sqlite_temp_master WHERE type = 'table' AND name LIKE '\\_bulksync%' ESCAPE '\\'
             UNION ALL
             SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE '\\_bulksync%' ESCAPE '\\'",
        )
        .await
        .len()
    }

    fn record(&self, sql: &str) -> Result<(), DatabaseError> {
        self.statements.lock().unwrap().push(sql.to_string());
        match self.fail_on.lock().unwrap().as_mut() {
            Some((fragment, skip)) if sql.contains(fragment.as_str()) => {
                if *skip > 0 {
                    *skip -= 1;
                    Ok(())
                } else {
                    Err(DatabaseError::Unsupported("injected failure", "recording"))
                }
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    fn dialect(&self) -> &'static dyn Dialect {
        self.inner.dialect()
    }

    fn cache_key(&self) -> String {
        self.inner.cache_key()
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), DatabaseError> {
        self.record(sql)?;
        self.inner.batch_execute(sql).await
    }

    async fn execute(&self, sql: &str) -> Result<u64, DatabaseError> {
        self.record(sql)?;
        self.inner.execute(sql).await
    }

    async fn execute_with_params(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<u64, DatabaseError> {
        self.record(sql)?;
        self.inner.execute_with_params(sql, params).await
    }

    async fn fetch_columns(
        &self,
        table: &TableName,
    ) -> Result<Vec<ColumnDescriptor>, DatabaseError> {
        self.schema_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_columns(table).await
    }

    fn discard_transaction(&self) {
        self.inner.discard_transaction()
    }
}
