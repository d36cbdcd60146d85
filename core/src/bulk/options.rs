use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// Routes a source column into a differently named destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source: String,
    pub destination: String,
}

impl ColumnMapping {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        ColumnMapping { source: source.into(), destination: destination.into() }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Column mapping '{0}' must look like source=destination")]
pub struct ParseColumnMappingError(String);

impl FromStr for ColumnMapping {
    type Err = ParseColumnMappingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once('=') {
            Some((source, destination))
                if !source.trim().is_empty() && !destination.trim().is_empty() =>
            {
                Ok(ColumnMapping::new(source.trim(), destination.trim()))
            }
            _ => Err(ParseColumnMappingError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BulkInsertOptions {
    pub mappings: Vec<ColumnMapping>,
    /// `None` lets the engine decide, see the field reconciler.
    pub keep_identity: Option<bool>,
    pub hints: Option<String>,
    pub timeout: Option<Duration>,
    /// Rows per load round trip, falls back to the engine configuration.
    pub batch_size: Option<usize>,
    pub force_schema_refresh: bool,
}

impl BulkInsertOptions {
    pub fn with_mappings(mut self, mappings: Vec<ColumnMapping>) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn with_keep_identity(mut self, keep_identity: bool) -> Self {
        self.keep_identity = Some(keep_identity);
        self
    }

    pub fn with_hints(mut self, hints: impl Into<String>) -> Self {
        self.hints = Some(hints.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_force_schema_refresh(mut self) -> Self {
        self.force_schema_refresh = true;
        self
    }
}

/// Options of `bulk_update` and `bulk_merge`.
#[derive(Debug, Clone, Default)]
pub struct BulkUpdateOptions {
    pub insert: BulkInsertOptions,
    /// Columns that match staged rows to target rows. Primary key, then identity, when empty.
    pub qualifiers: Vec<String>,
    /// Stage into a regular table instead of a session temporary one.
    pub use_physical_staging: Option<bool>,
}

impl BulkUpdateOptions {
    pub fn with_qualifiers<S: Into<String>>(mut self, qualifiers: impl IntoIterator<Item = S>) -> Self {
        self.qualifiers = qualifiers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_physical_staging(mut self, use_physical_staging: bool) -> Self {
        self.use_physical_staging = Some(use_physical_staging);
        self
    }

    pub fn with_mappings(mut self, mappings: Vec<ColumnMapping>) -> Self {
        self.insert = self.insert.with_mappings(mappings);
        self
    }

    pub fn with_keep_identity(mut self, keep_identity: bool) -> Self {
        self.insert = self.insert.with_keep_identity(keep_identity);
        self
    }

    pub fn with_hints(mut self, hints: impl Into<String>) -> Self {
        self.insert = self.insert.with_hints(hints);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.insert = self.insert.with_timeout(timeout);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.insert = self.insert.with_batch_size(batch_size);
        self
    }

    pub fn with_force_schema_refresh(mut self) -> Self {
        self.insert = self.insert.with_force_schema_refresh();
        self
    }
}
