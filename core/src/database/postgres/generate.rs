use crate::{
    bulk::query_builder::{
        build_insert_values, build_key_filter, build_set_clause, build_update_from, build_where_condition,
        column_list, prefixed_column_list, ReconcileMode, ReconcilePlan, SOURCE_ALIAS,
        TARGET_ALIAS,
    },
    database::{
        dialect::{Dialect, StagingScope, LOAD_ORDINAL_COLUMN},
        schema::{ColumnDescriptor, TableName},
    },
    types::code::Code,
};

/// PostgreSQL's wire protocol caps bind parameters at an i16 count.
const POSTGRES_MAX_PARAMETERS: usize = 65535;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

pub static POSTGRES_DIALECT: PostgresDialect = PostgresDialect;

impl PostgresDialect {
    /// Staged rows reduced to the last loaded row per qualifier tuple. Rows with
    /// a NULL qualifier cannot match anything and pass through untouched.
    fn deduplicated_source(&self, plan: &ReconcilePlan<'_>) -> String {
        let qualifiers = column_list(self, plan.qualifiers);
        let staging = self.format_table_name(plan.staging);
        format!(
            "((SELECT DISTINCT ON ({}) * FROM {} WHERE {} ORDER BY {}, {} DESC) UNION ALL (SELECT * FROM {} WHERE {}))",
            qualifiers,
            staging,
            build_key_filter(self, plan.qualifiers, true),
            qualifiers,
            self.quote_identifier(LOAD_ORDINAL_COLUMN),
            staging,
            build_key_filter(self, plan.qualifiers, false),
        )
    }

    fn merge_sql(&self, plan: &ReconcilePlan<'_>, source: &str) -> Code {
        let update_columns = plan.update_columns();
        let insert_columns = plan.insert_columns();

        let matched = if update_columns.is_empty() {
            "WHEN MATCHED THEN DO NOTHING".to_string()
        } else {
            format!("WHEN MATCHED THEN UPDATE SET {}", build_set_clause(self, &update_columns))
        };

        let overriding = if plan.inserts_identity() { " OVERRIDING SYSTEM VALUE" } else { "" };

        Code::new(format!(
            "MERGE INTO {} AS {}\nUSING {} AS {}\nON {}\n{}\nWHEN NOT MATCHED THEN INSERT ({}){} VALUES ({});",
            self.format_table_name(plan.target),
            TARGET_ALIAS,
            source,
            SOURCE_ALIAS,
            build_where_condition(self, plan.qualifiers),
            matched,
            column_list(self, &insert_columns),
            overriding,
            prefixed_column_list(self, SOURCE_ALIAS, &insert_columns),
        ))
    }
}

impl Dialect for PostgresDialect {
    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn max_parameters(&self) -> usize {
        POSTGRES_MAX_PARAMETERS
    }

    fn create_staging_table_sql(
        &self,
        staging: &TableName,
        scope: StagingScope,
        columns: &[ColumnDescriptor],
    ) -> Code {
        let keyword = match scope {
            StagingScope::Session => "CREATE TEMPORARY TABLE",
            StagingScope::Physical => "CREATE TABLE",
        };

        let mut definitions: Vec<String> = columns
            .iter()
            .map(|column| {
                format!("{} {}", self.quote_identifier(&column.name), column.declared_type)
            })
            .collect();
        definitions.push(format!(
            "{} BIGINT GENERATED ALWAYS AS IDENTITY",
            self.quote_identifier(LOAD_ORDINAL_COLUMN)
        ));

        Code::new(format!(
            "{} {} ({});",
            keyword,
            self.format_table_name(staging),
            definitions.join(", ")
        ))
    }

    fn reconcile_statements(&self, plan: &ReconcilePlan<'_>) -> Vec<Code> {
        let source = self.deduplicated_source(plan);
        let statement = match plan.mode {
            ReconcileMode::Update => build_update_from(self, plan, &source),
            ReconcileMode::Merge => self.merge_sql(plan, &source),
        };

        vec![self.apply_hints(statement, plan.hints)]
    }

    fn insert_values_sql(
        &self,
        table: &TableName,
        columns: &[String],
        rows: usize,
        identity_insert: bool,
    ) -> Code {
        let overriding = if identity_insert { Some("OVERRIDING SYSTEM VALUE") } else { None };
        build_insert_values(self, table, columns, rows, overriding)
    }

    fn truncate_sql(&self, table: &TableName) -> Code {
        Code::new(format!("TRUNCATE TABLE {};", self.format_table_name(table)))
    }

    /// Hints are emitted as a leading `/*+ ... */` block, the form pg_hint_plan reads.
    fn apply_hints(&self, statement: Code, hints: Option<&str>) -> Code {
        match hints.map(str::trim).filter(|hints| !hints.is_empty()) {
            Some(hints) => statement.prefixed(&format!("/*+ {} */ ", hints)),
            None => statement,
        }
    }
}

/// `COPY table ("a", "b") FROM STDIN WITH (FORMAT binary)`
pub fn copy_in_sql(table: &TableName, columns: &[String]) -> Code {
    Code::new(format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT binary)",
        POSTGRES_DIALECT.format_table_name(table),
        column_list(&POSTGRES_DIALECT, columns)
    ))
}
