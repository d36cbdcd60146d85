//! Shared SQL building blocks for the reconcile statements.
//!
//! The dialects decide how the staged rows are deduplicated and which statement
//! shapes they support; the clause builders here are common to all of them.

use crate::{
    database::{
        dialect::Dialect,
        schema::{ColumnDescriptor, TableName},
    },
    types::code::Code,
};

/// Alias of the target table inside reconcile statements.
pub const TARGET_ALIAS: &str = "t";
/// Alias of the deduplicated staging rows inside reconcile statements.
pub const SOURCE_ALIAS: &str = "s";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Update matching target rows, ignore the rest.
    Update,
    /// Update matching target rows and insert the rest.
    Merge,
}

/// Everything a dialect needs to render the reconcile statements.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilePlan<'a> {
    pub target: &'a TableName,
    pub staging: &'a TableName,
    /// Columns present in the staging table, in target order.
    pub columns: &'a [ColumnDescriptor],
    pub qualifiers: &'a [String],
    pub keep_identity: bool,
    pub mode: ReconcileMode,
    pub hints: Option<&'a str>,
}

impl<'a> ReconcilePlan<'a> {
    fn is_qualifier(&self, column: &ColumnDescriptor) -> bool {
        self.qualifiers.iter().any(|qualifier| column.matches(qualifier))
    }

    /// Columns written by the update branch. Keys and identity columns are never updated.
    pub fn update_columns(&self) -> Vec<&'a str> {
        let columns: &'a [ColumnDescriptor] = self.columns;
        columns
            .iter()
            .filter(|column| !column.is_primary && !column.is_identity && !self.is_qualifier(column))
            .map(|column| column.name.as_str())
            .collect()
    }

    /// Columns written by the insert branch of a merge.
    pub fn insert_columns(&self) -> Vec<&'a str> {
        let columns: &'a [ColumnDescriptor] = self.columns;
        columns
            .iter()
            .filter(|column| !column.is_identity || self.keep_identity)
            .map(|column| column.name.as_str())
            .collect()
    }

    pub fn inserts_identity(&self) -> bool {
        self.keep_identity && self.columns.iter().any(|column| column.is_identity)
    }
}

/// `"a", "b", "c"`
pub fn column_list<D, S>(dialect: &D, columns: &[S]) -> String
where
    D: Dialect + ?Sized,
    S: AsRef<str>,
{
    columns
        .iter()
        .map(|column| dialect.quote_identifier(column.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `s."a", s."b"`
pub fn prefixed_column_list<D, S>(dialect: &D, alias: &str, columns: &[S]) -> String
where
    D: Dialect + ?Sized,
    S: AsRef<str>,
{
    columns
        .iter()
        .map(|column| format!("{}.{}", alias, dialect.quote_identifier(column.as_ref())))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `"a" = s."a", "b" = s."b"`
pub fn build_set_clause<D: Dialect + ?Sized>(dialect: &D, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|column| {
            let column = dialect.quote_identifier(column);
            format!("{} = {}.{}", column, SOURCE_ALIAS, column)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `t."q1" = s."q1" AND t."q2" = s."q2"`
pub fn build_where_condition<D: Dialect + ?Sized>(dialect: &D, qualifiers: &[String]) -> String {
    qualifiers
        .iter()
        .map(|qualifier| {
            let column = dialect.quote_identifier(qualifier);
            format!("{}.{} = {}.{}", TARGET_ALIAS, column, SOURCE_ALIAS, column)
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `"q1" IS NOT NULL AND "q2" IS NOT NULL`, or with `keyed` false
/// `"q1" IS NULL OR "q2" IS NULL`.
pub fn build_key_filter<D: Dialect + ?Sized>(dialect: &D, qualifiers: &[String], keyed: bool) -> String {
    let (test, joiner) = if keyed { ("IS NOT NULL", " AND ") } else { ("IS NULL", " OR ") };
    qualifiers
        .iter()
        .map(|qualifier| format!("{} {}", dialect.quote_identifier(qualifier), test))
        .collect::<Vec<_>>()
        .join(joiner)
}

/// `UPDATE target AS t SET ... FROM <source> AS s WHERE <qualifiers match>`
pub fn build_update_from<D: Dialect + ?Sized>(
    dialect: &D,
    plan: &ReconcilePlan<'_>,
    source: &str,
) -> Code {
    Code::new(format!(
        "UPDATE {} AS {}\nSET {}\nFROM {} AS {}\nWHERE {};",
        dialect.format_table_name(plan.target),
        TARGET_ALIAS,
        build_set_clause(dialect, &plan.update_columns()),
        source,
        SOURCE_ALIAS,
        build_where_condition(dialect, plan.qualifiers),
    ))
}

/// `INSERT INTO t ("a", "b") VALUES ($1, $2), ($3, $4)`
pub fn build_insert_values<D: Dialect + ?Sized>(
    dialect: &D,
    table: &TableName,
    columns: &[String],
    rows: usize,
    overriding: Option<&str>,
) -> Code {
    let width = columns.len();
    let values = (0..rows)
        .map(|row| {
            let placeholders = (1..=width)
                .map(|column| dialect.placeholder(row * width + column))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", placeholders)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let overriding = overriding.map(|clause| format!(" {}", clause)).unwrap_or_default();

    Code::new(format!(
        "INSERT INTO {} ({}){} VALUES {};",
        dialect.format_table_name(table),
        column_list(dialect, columns),
        overriding,
        values
    ))
}
