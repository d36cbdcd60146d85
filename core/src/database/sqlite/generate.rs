use tracing::debug;

use crate::{
    bulk::query_builder::{
        build_insert_values, build_key_filter, build_update_from, build_where_condition, column_list,
        prefixed_column_list, ReconcileMode, ReconcilePlan, SOURCE_ALIAS, TARGET_ALIAS,
    },
    database::{
        dialect::{Dialect, StagingScope},
        schema::{ColumnDescriptor, TableName},
    },
    types::code::Code,
};

/// SQLITE_MAX_VARIABLE_NUMBER of the bundled library.
const SQLITE_MAX_PARAMETERS: usize = 32766;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

pub static SQLITE_DIALECT: SqliteDialect = SqliteDialect;

impl SqliteDialect {
    // rowid increases with insertion order so the highest rowid is the last loaded row.
    // Rows with a NULL qualifier never match each other and are all kept.
    fn deduplicated_source(&self, plan: &ReconcilePlan<'_>) -> String {
        let staging = self.format_table_name(plan.staging);
        format!(
            "(SELECT * FROM {} WHERE rowid IN (SELECT MAX(rowid) FROM {} WHERE {} GROUP BY {}) OR {})",
            staging,
            staging,
            build_key_filter(self, plan.qualifiers, true),
            column_list(self, plan.qualifiers),
            build_key_filter(self, plan.qualifiers, false),
        )
    }

    fn insert_missing_sql(&self, plan: &ReconcilePlan<'_>, source: &str) -> Code {
        let insert_columns = plan.insert_columns();
        Code::new(format!(
            "INSERT INTO {} ({})\nSELECT {} FROM {} AS {}\nWHERE NOT EXISTS (SELECT 1 FROM {} AS {} WHERE {});",
            self.format_table_name(plan.target),
            column_list(self, &insert_columns),
            prefixed_column_list(self, SOURCE_ALIAS, &insert_columns),
            source,
            SOURCE_ALIAS,
            self.format_table_name(plan.target),
            TARGET_ALIAS,
            build_where_condition(self, plan.qualifiers),
        ))
    }
}

impl Dialect for SqliteDialect {
    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn max_parameters(&self) -> usize {
        SQLITE_MAX_PARAMETERS
    }

    fn create_staging_table_sql(
        &self,
        staging: &TableName,
        scope: StagingScope,
        columns: &[ColumnDescriptor],
    ) -> Code {
        let keyword = match scope {
            StagingScope::Session => "CREATE TEMP TABLE",
            StagingScope::Physical => "CREATE TABLE",
        };

        let definitions = columns
            .iter()
            .map(|column| {
                let name = self.quote_identifier(&column.name);
                if column.declared_type.is_empty() {
                    name
                } else {
                    format!("{} {}", name, column.declared_type)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        Code::new(format!("{} {} ({});", keyword, self.format_table_name(staging), definitions))
    }

    // SQLite places the index in the schema named on the index, never on the table.
    fn create_index_sql(&self, index_name: &str, table: &TableName, columns: &[String]) -> Code {
        let index = TableName { schema: table.schema.clone(), name: index_name.to_string() };
        Code::new(format!(
            "CREATE INDEX {} ON {} ({});",
            self.format_table_name(&index),
            self.quote_identifier(&table.name),
            column_list(self, columns),
        ))
    }

    fn reconcile_statements(&self, plan: &ReconcilePlan<'_>) -> Vec<Code> {
        let source = self.deduplicated_source(plan);
        let mut statements = Vec::with_capacity(2);

        if !plan.update_columns().is_empty() {
            statements.push(build_update_from(self, plan, &source));
        }
        if plan.mode == ReconcileMode::Merge {
            statements.push(self.insert_missing_sql(plan, &source));
        }

        statements.into_iter().map(|statement| self.apply_hints(statement, plan.hints)).collect()
    }

    fn insert_values_sql(
        &self,
        table: &TableName,
        columns: &[String],
        rows: usize,
        _identity_insert: bool,
    ) -> Code {
        // explicit values for an INTEGER PRIMARY KEY are always accepted
        build_insert_values(self, table, columns, rows, None)
    }

    fn truncate_sql(&self, table: &TableName) -> Code {
        Code::new(format!("DELETE FROM {};", self.format_table_name(table)))
    }

    fn apply_hints(&self, statement: Code, hints: Option<&str>) -> Code {
        if let Some(hints) = hints {
            debug!("SQLite has no optimizer hints, ignoring '{}'", hints);
        }
        statement
    }
}
