//! Decides which columns move, which ones match rows and where each source
//! column lands. Pure, so every rule is testable without a database.

use tracing::debug;

use crate::{
    bulk::{error::BulkSyncError, options::ColumnMapping},
    database::schema::{find_column, ColumnDescriptor, TableName},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Insert,
    Update,
    Merge,
}

/// One source column loaded into one destination column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadColumn {
    pub source_index: usize,
    pub destination: String,
}

#[derive(Debug, Clone)]
pub struct ReconcileInput<'a> {
    pub table: &'a TableName,
    pub target: &'a [ColumnDescriptor],
    pub source_columns: &'a [String],
    pub mappings: &'a [ColumnMapping],
    pub qualifiers: &'a [String],
    pub keep_identity: Option<bool>,
    pub mode: SyncMode,
}

#[derive(Debug, Clone)]
pub struct ReconciledFields {
    /// Target columns also present in the source and, when mappings are given,
    /// named as a mapping source. Target order.
    pub fields: Vec<ColumnDescriptor>,
    /// Columns actually written by the load, target order, same order as `load_plan`.
    pub columns: Vec<ColumnDescriptor>,
    pub load_plan: Vec<LoadColumn>,
    /// Matching columns spelled as in the target schema. Empty for inserts.
    pub qualifiers: Vec<String>,
    pub keep_identity: bool,
}

impl ReconciledFields {
    /// Identity values are written to the target only when they are loaded and kept.
    pub fn inserts_identity(&self) -> bool {
        self.keep_identity && self.columns.iter().any(|column| column.is_identity)
    }
}

fn contains_name(names: &[String], name: &str) -> bool {
    names.iter().any(|candidate| candidate.eq_ignore_ascii_case(name))
}

fn position_of(names: &[String], name: &str) -> Option<usize> {
    names.iter().position(|candidate| candidate.eq_ignore_ascii_case(name))
}

fn table_label(table: &TableName) -> String {
    table.to_string()
}

fn resolve_qualifiers(
    input: &ReconcileInput<'_>,
    primary: &[ColumnDescriptor],
    identity: Option<&ColumnDescriptor>,
) -> Result<Vec<String>, BulkSyncError> {
    if input.mode == SyncMode::Insert {
        return Ok(Vec::new());
    }

    if !input.qualifiers.is_empty() {
        return input
            .qualifiers
            .iter()
            .map(|qualifier| {
                find_column(input.target, qualifier).map(|column| column.name.clone()).ok_or_else(
                    || BulkSyncError::UnknownQualifier {
                        table: table_label(input.table),
                        column: qualifier.clone(),
                    },
                )
            })
            .collect();
    }

    if !primary.is_empty() {
        return Ok(primary.iter().map(|column| column.name.clone()).collect());
    }

    match identity {
        Some(identity) => Ok(vec![identity.name.clone()]),
        None => Err(BulkSyncError::MissingKey { table: table_label(input.table) }),
    }
}

fn build_load_plan(
    input: &ReconcileInput<'_>,
    fields: &[ColumnDescriptor],
) -> Result<Vec<LoadColumn>, BulkSyncError> {
    if input.mappings.is_empty() {
        return Ok(fields
            .iter()
            .filter_map(|field| {
                position_of(input.source_columns, &field.name)
                    .map(|source_index| LoadColumn { source_index, destination: field.name.clone() })
            })
            .collect());
    }

    let mut plan: Vec<LoadColumn> = Vec::with_capacity(input.mappings.len());
    for mapping in input.mappings {
        let invalid = || BulkSyncError::InvalidMapping {
            source_column: mapping.source.clone(),
            destination_column: mapping.destination.clone(),
        };

        let source_index = position_of(input.source_columns, &mapping.source).ok_or_else(invalid)?;
        let destination = find_column(fields, &mapping.destination).ok_or_else(invalid)?;

        if plan.iter().any(|entry| entry.destination == destination.name) {
            return Err(invalid());
        }
        plan.push(LoadColumn { source_index, destination: destination.name.clone() });
    }

    for field in fields {
        if !plan.iter().any(|entry| entry.destination == field.name) {
            debug!("Column {} has no mapping targeting it and is not loaded", field.name);
        }
    }

    Ok(plan)
}

pub fn reconcile_fields(input: &ReconcileInput<'_>) -> Result<ReconciledFields, BulkSyncError> {
    // target ∩ source ∩ mappings, in that order, keeping target order
    let fields: Vec<ColumnDescriptor> = input
        .target
        .iter()
        .filter(|column| contains_name(input.source_columns, &column.name))
        .filter(|column| {
            input.mappings.is_empty() ||
                input.mappings.iter().any(|mapping| mapping.source.eq_ignore_ascii_case(&column.name))
        })
        .cloned()
        .collect();

    if fields.is_empty() {
        return Err(BulkSyncError::NoFields { table: table_label(input.table) });
    }

    let primary: Vec<ColumnDescriptor> =
        input.target.iter().filter(|column| column.is_primary).cloned().collect();
    let identity = input.target.iter().find(|column| column.is_identity).cloned();

    let qualifiers = resolve_qualifiers(input, &primary, identity.as_ref())?;

    let keep_identity = input.keep_identity.unwrap_or_else(|| match &identity {
        Some(identity) => {
            find_column(&fields, &identity.name).is_some() &&
                contains_name(&qualifiers, &identity.name)
        }
        None => false,
    });

    let mut load_plan = build_load_plan(input, &fields)?;

    // Without identity preservation the target generates the identity value itself.
    if input.mode == SyncMode::Insert && !keep_identity {
        if let Some(identity) = &identity {
            load_plan.retain(|entry| !entry.destination.eq_ignore_ascii_case(&identity.name));
        }
    }

    let columns: Vec<ColumnDescriptor> = fields
        .iter()
        .filter(|field| load_plan.iter().any(|entry| entry.destination == field.name))
        .cloned()
        .collect();
    load_plan.sort_by_key(|entry| {
        columns.iter().position(|column| column.name == entry.destination).unwrap_or(usize::MAX)
    });

    if columns.is_empty() {
        return Err(BulkSyncError::NoFields { table: table_label(input.table) });
    }

    for qualifier in &qualifiers {
        if find_column(&columns, qualifier).is_none() {
            return Err(BulkSyncError::UnknownQualifier {
                table: table_label(input.table),
                column: qualifier.clone(),
            });
        }
    }

    if input.mode == SyncMode::Update {
        let has_mutable = columns.iter().any(|column| {
            !column.is_primary && !column.is_identity && !contains_name(&qualifiers, &column.name)
        });
        if !has_mutable {
            return Err(BulkSyncError::NothingToUpdate { table: table_label(input.table) });
        }
    }

    Ok(ReconciledFields { fields, columns, load_plan, qualifiers, keep_identity })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("Id", "integer").primary().identity(),
            ColumnDescriptor::new("Email", "text").not_null(),
            ColumnDescriptor::new("Name", "text"),
            ColumnDescriptor::new("Age", "integer"),
        ]
    }

    fn names(columns: &[ColumnDescriptor]) -> Vec<&str> {
        columns.iter().map(|column| column.name.as_str()).collect()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn input<'a>(
        table: &'a TableName,
        target: &'a [ColumnDescriptor],
        source: &'a [String],
        mappings: &'a [ColumnMapping],
        qualifiers: &'a [String],
        mode: SyncMode,
    ) -> ReconcileInput<'a> {
        ReconcileInput {
            table,
            target,
            source_columns: source,
            mappings,
            qualifiers,
            keep_identity: None,
            mode,
        }
    }

    #[test]
    fn test_fields_are_target_source_intersection_in_target_order() {
        let table = TableName::parse("people");
        let target = target();
        let source = strings(&["age", "unknown", "EMAIL", "id"]);
        let reconciled =
            reconcile_fields(&input(&table, &target, &source, &[], &[], SyncMode::Update)).unwrap();

        assert_eq!(names(&reconciled.fields), vec!["Id", "Email", "Age"]);
        assert_eq!(reconciled.qualifiers, vec!["Id".to_string()]);
        assert!(reconciled.keep_identity);
        assert_eq!(
            reconciled.load_plan,
            vec![
                LoadColumn { source_index: 3, destination: "Id".to_string() },
                LoadColumn { source_index: 2, destination: "Email".to_string() },
                LoadColumn { source_index: 0, destination: "Age".to_string() },
            ]
        );
    }

    #[test]
    fn test_mappings_filter_by_source_name() {
        let table = TableName::parse("people");
        let target = target();
        let source = strings(&["id", "email", "name"]);
        let mappings = vec![ColumnMapping::new("id", "id"), ColumnMapping::new("email", "email")];
        let reconciled =
            reconcile_fields(&input(&table, &target, &source, &mappings, &[], SyncMode::Update))
                .unwrap();

        assert_eq!(names(&reconciled.fields), vec!["Id", "Email"]);
        assert_eq!(names(&reconciled.columns), vec!["Id", "Email"]);
    }

    #[test]
    fn test_mapping_to_unknown_source_is_invalid() {
        let table = TableName::parse("people");
        let target = target();
        let source = strings(&["id", "email"]);
        let mappings = vec![ColumnMapping::new("email", "email"), ColumnMapping::new("mail", "email")];
        let error =
            reconcile_fields(&input(&table, &target, &source, &mappings, &[], SyncMode::Insert))
                .unwrap_err();

        assert!(matches!(
            error,
            BulkSyncError::InvalidMapping { ref source_column, .. } if source_column == "mail"
        ));
    }

    #[test]
    fn test_no_overlap_is_no_fields() {
        let table = TableName::parse("people");
        let target = target();
        let source = strings(&["x", "y"]);
        let error = reconcile_fields(&input(&table, &target, &source, &[], &[], SyncMode::Insert))
            .unwrap_err();
        assert!(matches!(error, BulkSyncError::NoFields { .. }));
    }

    #[test]
    fn test_qualifier_fallbacks() {
        let table = TableName::parse("log");
        let source = strings(&["seq", "message"]);

        let identity_only = vec![
            ColumnDescriptor::new("seq", "bigint").identity(),
            ColumnDescriptor::new("message", "text"),
        ];
        let reconciled =
            reconcile_fields(&input(&table, &identity_only, &source, &[], &[], SyncMode::Update))
                .unwrap();
        assert_eq!(reconciled.qualifiers, vec!["seq".to_string()]);

        let keyless =
            vec![ColumnDescriptor::new("seq", "bigint"), ColumnDescriptor::new("message", "text")];
        let error = reconcile_fields(&input(&table, &keyless, &source, &[], &[], SyncMode::Update))
            .unwrap_err();
        assert!(matches!(error, BulkSyncError::MissingKey { .. }));
    }

    #[test]
    fn test_composite_primary_key_qualifiers() {
        let table = TableName::parse("pairs");
        let target = vec![
            ColumnDescriptor::new("a", "integer").primary(),
            ColumnDescriptor::new("b", "integer").primary(),
            ColumnDescriptor::new("v", "text"),
        ];
        let source = strings(&["v", "b", "a"]);
        let reconciled =
            reconcile_fields(&input(&table, &target, &source, &[], &[], SyncMode::Merge)).unwrap();
        assert_eq!(reconciled.qualifiers, strings(&["a", "b"]));
        assert!(!reconciled.keep_identity);
    }

    #[test]
    fn test_explicit_qualifiers_take_schema_spelling() {
        let table = TableName::parse("people");
        let target = target();
        let source = strings(&["email", "name"]);
        let qualifiers = strings(&["EMAIL"]);
        let reconciled = reconcile_fields(&input(
            &table,
            &target,
            &source,
            &[],
            &qualifiers,
            SyncMode::Update,
        ))
        .unwrap();

        assert_eq!(reconciled.qualifiers, vec!["Email".to_string()]);
        assert!(!reconciled.keep_identity);

        let unknown = strings(&["missing"]);
        let error =
            reconcile_fields(&input(&table, &target, &source, &[], &unknown, SyncMode::Update))
                .unwrap_err();
        assert!(matches!(error, BulkSyncError::UnknownQualifier { .. }));
    }

    #[test]
    fn test_insert_drops_identity_unless_kept() {
        let table = TableName::parse("people");
        let target = target();
        let source = strings(&["id", "email"]);

        let reconciled =
            reconcile_fields(&input(&table, &target, &source, &[], &[], SyncMode::Insert)).unwrap();
        assert_eq!(names(&reconciled.fields), vec!["Id", "Email"]);
        assert_eq!(names(&reconciled.columns), vec!["Email"]);
        assert!(!reconciled.inserts_identity());

        let keep = ReconcileInput {
            keep_identity: Some(true),
            ..input(&table, &target, &source, &[], &[], SyncMode::Insert)
        };
        let reconciled = reconcile_fields(&keep).unwrap();
        assert_eq!(names(&reconciled.columns), vec!["Id", "Email"]);
        assert!(reconciled.inserts_identity());
    }

    #[test]
    fn test_update_needs_a_mutable_column() {
        let table = TableName::parse("people");
        let target = target();
        let source = strings(&["id", "email"]);
        let qualifiers = strings(&["email"]);
        let error = reconcile_fields(&input(
            &table,
            &target,
            &source,
            &[],
            &qualifiers,
            SyncMode::Update,
        ))
        .unwrap_err();
        assert!(matches!(error, BulkSyncError::NothingToUpdate { .. }));
    }
}
