use crate::{
    bulk::query_builder::{column_list, ReconcilePlan},
    database::schema::{ColumnDescriptor, TableName},
    types::code::Code,
};

/// Column appended to staging tables on backends without an implicit row id.
/// Holds the load order so duplicate keys resolve to the last loaded row.
pub const LOAD_ORDINAL_COLUMN: &str = "__bulksync_ordinal";

/// Lifetime of a staging table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingScope {
    /// Visible to the creating session only and gone when the session ends.
    Session,
    /// A regular table. Survives crashes, so it is dropped before every use.
    Physical,
}

/// Backend specific SQL rendering.
pub trait Dialect: Send + Sync {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn format_table_name(&self, table: &TableName) -> String {
        match &table.schema {
            Some(schema) => {
                format!("{}.{}", self.quote_identifier(schema), self.quote_identifier(&table.name))
            }
            None => self.quote_identifier(&table.name),
        }
    }

    /// Positional bind marker, `index` starts at 1.
    fn placeholder(&self, index: usize) -> String;

    /// Upper bound of bind parameters in a single statement.
    fn max_parameters(&self) -> usize;

    fn create_staging_table_sql(
        &self,
        staging: &TableName,
        scope: StagingScope,
        columns: &[ColumnDescriptor],
    ) -> Code;

    fn drop_table_sql(&self, table: &TableName) -> Code {
        Code::new(format!("DROP TABLE IF EXISTS {};", self.format_table_name(table)))
    }

    fn create_index_sql(&self, index_name: &str, table: &TableName, columns: &[String]) -> Code {
        Code::new(format!(
            "CREATE INDEX {} ON {} ({});",
            self.quote_identifier(index_name),
            self.format_table_name(table),
            column_list(self, columns),
        ))
    }

    /// Statements moving staged rows into the target, executed in order.
    /// Their affected row counts are summed.
    fn reconcile_statements(&self, plan: &ReconcilePlan<'_>) -> Vec<Code>;

    /// Multi-row `INSERT ... VALUES` with positional parameters.
    fn insert_values_sql(
        &self,
        table: &TableName,
        columns: &[String],
        rows: usize,
        identity_insert: bool,
    ) -> Code;

    fn truncate_sql(&self, table: &TableName) -> Code;

    fn apply_hints(&self, statement: Code, hints: Option<&str>) -> Code;

    fn begin_sql(&self) -> &'static str {
        "BEGIN"
    }

    fn commit_sql(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback_sql(&self) -> &'static str {
        "ROLLBACK"
    }

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVEPOINT {}", self.quote_identifier(name))
    }

    fn release_savepoint_sql(&self, name: &str) -> String {
        format!("RELEASE SAVEPOINT {}", self.quote_identifier(name))
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", self.quote_identifier(name))
    }
}
