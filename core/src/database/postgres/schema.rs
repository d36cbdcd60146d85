//! Live column metadata read from `pg_catalog`.
//!
//! `information_schema` hides columns the current role has no privileges on and
//! does not expose identity defaults consistently across versions, so the
//! catalog tables are queried directly.

use tokio_postgres::{Client, Row};
use tracing::debug;

use crate::database::{
    dialect::Dialect,
    postgres::generate::POSTGRES_DIALECT,
    schema::{ColumnDescriptor, TableName},
};

const TABLE_COLUMNS_SQL: &str = r#"
SELECT
    a.attname::text AS column_name,
    NOT a.attnotnull AS is_nullable,
    EXISTS (
        SELECT 1
        FROM pg_catalog.pg_index i
        WHERE i.indrelid = a.attrelid
          AND i.indisprimary
          AND a.attnum = ANY (i.indkey)
    ) AS is_primary,
    (
        a.attidentity <> ''
        OR COALESCE(pg_catalog.pg_get_expr(d.adbin, d.adrelid), '') LIKE 'nextval(%'
    ) AS is_identity,
    pg_catalog.format_type(a.atttypid, a.atttypmod) AS declared_type
FROM pg_catalog.pg_attribute a
LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
WHERE a.attrelid = to_regclass($1::text)
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum
"#;

fn column_from_row(row: &Row) -> ColumnDescriptor {
    ColumnDescriptor {
        name: row.get("column_name"),
        is_nullable: row.get("is_nullable"),
        is_primary: row.get("is_primary"),
        is_identity: row.get("is_identity"),
        declared_type: row.get("declared_type"),
    }
}

/// Columns of `table` in ordinal order. A table that does not exist yields no columns.
pub async fn fetch_table_columns(
    client: &Client,
    table: &TableName,
) -> Result<Vec<ColumnDescriptor>, tokio_postgres::Error> {
    let regclass = POSTGRES_DIALECT.format_table_name(table);
    debug!("Reading catalog columns for {}", regclass);

    let rows = client.query(TABLE_COLUMNS_SQL, &[&regclass]).await?;
    Ok(rows.iter().map(column_from_row).collect())
}
