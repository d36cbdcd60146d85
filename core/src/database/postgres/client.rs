use std::{env, sync::Arc, time::Duration};

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use bb8_postgres::PostgresConnectionManager;
use bytes::Buf;
use dotenv::dotenv;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::{runtime::Handle, task, time::timeout};
pub use tokio_postgres::types::{ToSql, Type as PgType};
use tokio_postgres::{config::SslMode, Config, CopyInSink};
use tracing::{debug, error, info, warn};

use crate::database::{
    connection::{Connection, ConnectionId},
    dialect::Dialect,
    error::DatabaseError,
    postgres::{
        generate::POSTGRES_DIALECT,
        schema::fetch_table_columns,
    },
    schema::{ColumnDescriptor, TableName},
    sql_value::SqlValue,
};

type PostgresManager = PostgresConnectionManager<MakeTlsConnector>;

pub fn connection_string() -> Result<String, env::VarError> {
    dotenv().ok();
    let connection = env::var("DATABASE_URL")?;
    Ok(connection)
}

#[derive(thiserror::Error, Debug)]
pub enum PostgresConnectionError {
    #[error("The database connection string is wrong please check your environment: {0}")]
    DatabaseConnectionConfigWrong(#[from] env::VarError),

    #[error("Connection pool error: {0}")]
    ConnectionPoolError(#[from] tokio_postgres::Error),

    #[error("Can not connect to the database please make sure your connection string is correct")]
    CanNotConnectToDatabase,

    #[error("Could not parse connection string make sure it is correctly formatted")]
    CouldNotParseConnectionString,

    #[error("Could not create tls connector")]
    CouldNotCreateTlsConnector,
}

/// Pool of PostgreSQL sessions. Bulk operations run on a single
/// [`PostgresConnection`] checked out with [`PostgresClient::connection`].
pub struct PostgresClient {
    pool: Pool<PostgresManager>,
    cache_key: String,
}

impl PostgresClient {
    /// Connects using `DATABASE_URL` from the environment or a `.env` file.
    pub async fn new(pool_max_size: u32) -> Result<Self, PostgresConnectionError> {
        let connection_str = connection_string()?;
        Self::connect(&connection_str, pool_max_size).await
    }

    pub async fn connect(
        connection_str: &str,
        pool_max_size: u32,
    ) -> Result<Self, PostgresConnectionError> {
        async fn _connect(
            connection_str: &str,
            pool_max_size: u32,
            disable_ssl: bool,
        ) -> Result<PostgresClient, PostgresConnectionError> {
            let mut config: Config = connection_str
                .parse()
                .map_err(|_| PostgresConnectionError::CouldNotParseConnectionString)?;

            if disable_ssl {
                config.ssl_mode(SslMode::Disable);
            }

            let connector = TlsConnector::builder()
                .build()
                .map_err(|_| PostgresConnectionError::CouldNotCreateTlsConnector)?;
            let tls_connector = MakeTlsConnector::new(connector);

            let (client, connection) =
                match timeout(Duration::from_millis(5000), config.connect(tls_connector.clone()))
                    .await
                {
                    Ok(Ok((client, connection))) => (client, connection),
                    Ok(Err(e)) => {
                        // retry without ssl if ssl has been attempted and failed
                        if !disable_ssl &&
                            config.get_ssl_mode() != SslMode::Disable &&
                            !connection_str.contains("sslmode=require")
                        {
                            return Box::pin(_connect(connection_str, pool_max_size, true)).await;
                        }
                        error!("Error connecting to database: {}", e);
                        return Err(PostgresConnectionError::CanNotConnectToDatabase);
                    }
                    Err(e) => {
                        error!("Timeout connecting to database: {}", e);
                        return Err(PostgresConnectionError::CanNotConnectToDatabase);
                    }
                };

            let connection_handle = task::spawn(connection);

            if client.query_one("SELECT 1", &[]).await.is_err() {
                return Err(PostgresConnectionError::CanNotConnectToDatabase);
            }

            drop(client);
            match connection_handle.await {
                Ok(Ok(())) => (),
                Ok(Err(_)) | Err(_) => return Err(PostgresConnectionError::CanNotConnectToDatabase),
            }

            let cache_key =
                format!("postgres:{:?}:{}", config.get_hosts(), config.get_dbname().unwrap_or(""));
            let manager = PostgresConnectionManager::new(config, tls_connector);
            let pool = Pool::builder().max_size(pool_max_size.max(1)).build(manager).await?;

            info!("Connected to PostgreSQL ({} pooled sessions max)", pool_max_size.max(1));
            Ok(PostgresClient { pool, cache_key })
        }

        _connect(connection_str, pool_max_size, false).await
    }

    /// Checks a session out of the pool. It goes back when the returned value is dropped.
    pub async fn connection(&self) -> Result<PostgresConnection, DatabaseError> {
        let client = self.pool.get_owned().await?;
        Ok(PostgresConnection {
            id: ConnectionId::next(),
            cache_key: self.cache_key.clone(),
            client: Arc::new(client),
        })
    }
}

/// A single pooled PostgreSQL session.
pub struct PostgresConnection {
    id: ConnectionId,
    cache_key: String,
    client: Arc<PooledConnection<'static, PostgresManager>>,
}

impl PostgresConnection {
    pub async fn copy_in<U>(&self, statement: &str) -> Result<CopyInSink<U>, DatabaseError>
    where
        U: Buf + 'static + Send,
    {
        Ok(self.client.copy_in(statement).await?)
    }

    /// Server types of `columns` on `table`, resolved by preparing a zero row select.
    pub async fn column_types(
        &self,
        table: &TableName,
        columns: &[String],
    ) -> Result<Vec<PgType>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM {} LIMIT 0",
            columns
                .iter()
                .map(|column| POSTGRES_DIALECT.quote_identifier(column))
                .collect::<Vec<_>>()
                .join(", "),
            POSTGRES_DIALECT.format_table_name(table)
        );

        let statement = self.client.prepare(&sql).await?;
        Ok(statement.columns().iter().map(|column| column.type_().clone()).collect())
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn dialect(&self) -> &'static dyn Dialect {
        &POSTGRES_DIALECT
    }

    fn cache_key(&self) -> String {
        self.cache_key.clone()
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), DatabaseError> {
        debug!("Executing: {}", sql);
        Ok(self.client.batch_execute(sql).await?)
    }

    async fn execute(&self, sql: &str) -> Result<u64, DatabaseError> {
        debug!("Executing: {}", sql);
        Ok(self.client.execute(sql, &[]).await?)
    }

    async fn execute_with_params(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<u64, DatabaseError> {
        let params: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|param| param as &(dyn ToSql + Sync)).collect();
        Ok(self.client.execute(sql, &params).await?)
    }

    async fn fetch_columns(
        &self,
        table: &TableName,
    ) -> Result<Vec<ColumnDescriptor>, DatabaseError> {
        Ok(fetch_table_columns(&self.client, table).await?)
    }

    fn discard_transaction(&self) {
        let client = Arc::clone(&self.client);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.batch_execute(POSTGRES_DIALECT.rollback_sql()).await {
                        warn!("Failed to discard abandoned transaction: {}", e);
                    }
                });
            }
            Err(_) => {
                warn!("No tokio runtime available, abandoned transaction ends with the session")
            }
        }
    }
}
