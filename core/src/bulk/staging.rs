use crate::{
    database::{
        dialect::{Dialect, StagingScope},
        schema::{ColumnDescriptor, TableName},
    },
    types::code::Code,
};

pub const STAGING_TABLE_PREFIX: &str = "_bulksync_BulkUpdate_";

/// The table a batch is loaded into before it is reconciled against its target.
///
/// The name only depends on the target table name, so a physical staging table
/// left behind by a crashed run is found and dropped by the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingTable {
    pub name: TableName,
    pub scope: StagingScope,
}

impl StagingTable {
    pub fn for_target(target: &TableName, physical: bool) -> Self {
        let name = format!("{}{}", STAGING_TABLE_PREFIX, target.name);
        if physical {
            StagingTable {
                name: TableName { schema: target.schema.clone(), name },
                scope: StagingScope::Physical,
            }
        } else {
            StagingTable { name: TableName { schema: None, name }, scope: StagingScope::Session }
        }
    }

    pub fn index_name(&self) -> String {
        format!("ix{}", self.name.name)
    }

    pub fn create_sql(&self, dialect: &dyn Dialect, columns: &[ColumnDescriptor]) -> Code {
        dialect.create_staging_table_sql(&self.name, self.scope, columns)
    }

    pub fn drop_sql(&self, dialect: &dyn Dialect) -> Code {
        dialect.drop_table_sql(&self.name)
    }

    pub fn index_sql(&self, dialect: &dyn Dialect, qualifiers: &[String]) -> Code {
        dialect.create_index_sql(&self.index_name(), &self.name, qualifiers)
    }
}
