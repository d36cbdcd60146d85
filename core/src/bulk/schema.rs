use std::sync::Arc;

use mini_moka::sync::Cache;
use tracing::debug;

use crate::{
    bulk::error::BulkSyncError,
    config::SchemaCacheConfig,
    database::{
        connection::Connection,
        schema::{ColumnDescriptor, TableName},
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SchemaCacheKey {
    database: String,
    table: String,
}

impl SchemaCacheKey {
    fn new<C: Connection + ?Sized>(connection: &C, table: &TableName) -> Self {
        SchemaCacheKey {
            database: connection.cache_key(),
            table: table.to_string().to_lowercase(),
        }
    }
}

type ColumnsCache = Cache<SchemaCacheKey, Arc<Vec<ColumnDescriptor>>>;

/// Column snapshots per database and table.
#[derive(Clone)]
pub struct SchemaCache {
    cache: ColumnsCache,
}

impl SchemaCache {
    pub fn new(config: &SchemaCacheConfig) -> Self {
        SchemaCache {
            cache: Cache::builder()
                .max_capacity(config.max_capacity)
                .time_to_live(config.time_to_live())
                .build(),
        }
    }

    /// Columns of `table`, read through `connection` (and so inside any transaction
    /// open on it) unless a snapshot is cached and no refresh is forced.
    pub async fn get_columns<C: Connection + ?Sized>(
        &self,
        connection: &C,
        table: &TableName,
        force_refresh: bool,
    ) -> Result<Arc<Vec<ColumnDescriptor>>, BulkSyncError> {
        let key = SchemaCacheKey::new(connection, table);

        if !force_refresh {
            if let Some(columns) = self.cache.get(&key) {
                return Ok(columns);
            }
        }

        debug!("Reading schema of {}", table);
        let columns = connection.fetch_columns(table).await.map_err(|e| {
            BulkSyncError::SchemaLookup { table: table.to_string(), reason: e.to_string() }
        })?;

        if columns.is_empty() {
            self.cache.invalidate(&key);
            return Err(BulkSyncError::SchemaLookup {
                table: table.to_string(),
                reason: "table does not exist or has no columns".to_string(),
            });
        }

        let columns = Arc::new(columns);
        self.cache.insert(key, Arc::clone(&columns));
        Ok(columns)
    }

    pub fn invalidate<C: Connection + ?Sized>(&self, connection: &C, table: &TableName) {
        self.cache.invalidate(&SchemaCacheKey::new(connection, table));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::client::SqliteConnection;

    #[tokio::test]
    async fn test_snapshot_is_reused_until_refresh_is_forced() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        conn.batch_execute("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT);")
            .await
            .unwrap();
        let cache = SchemaCache::new(&SchemaCacheConfig::default());
        let table = TableName::parse("items");

        let first = cache.get_columns(&conn, &table, false).await.unwrap();
        assert_eq!(first.len(), 2);

        conn.batch_execute("ALTER TABLE items ADD COLUMN price REAL;").await.unwrap();
        let cached = cache.get_columns(&conn, &table, false).await.unwrap();
        assert_eq!(cached.len(), 2);

        let refreshed = cache.get_columns(&conn, &table, true).await.unwrap();
        assert_eq!(refreshed.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_table_is_a_schema_lookup_error() {
        let conn = SqliteConnection::open_in_memory().await.unwrap();
        let cache = SchemaCache::new(&SchemaCacheConfig::default());

        let error = cache.get_columns(&conn, &TableName::parse("ghost"), false).await.unwrap_err();
        assert!(matches!(error, BulkSyncError::SchemaLookup { ref table, .. } if table == "ghost"));
    }

    #[tokio::test]
    async fn test_in_memory_connections_do_not_share_snapshots() {
        let cache = SchemaCache::new(&SchemaCacheConfig::default());
        let table = TableName::parse("items");

        let wide = SqliteConnection::open_in_memory().await.unwrap();
        wide.batch_execute("CREATE TABLE items (a INTEGER, b INTEGER, c INTEGER);").await.unwrap();
        let narrow = SqliteConnection::open_in_memory().await.unwrap();
        narrow.batch_execute("CREATE TABLE items (a INTEGER);").await.unwrap();

        assert_eq!(cache.get_columns(&wide, &table, false).await.unwrap().len(), 3);
        assert_eq!(cache.get_columns(&narrow, &table, false).await.unwrap().len(), 1);
    }
}
