use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A single column of a live table as reported by the database catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub is_nullable: bool,
    pub is_primary: bool,
    pub is_identity: bool,
    /// Declared type exactly as the catalog renders it, e.g. `numeric(10,2)`.
    pub declared_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        ColumnDescriptor {
            name: name.into(),
            is_nullable: true,
            is_primary: false,
            is_identity: false,
            declared_type: declared_type.into(),
        }
    }

    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self.is_nullable = false;
        self
    }

    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

pub fn find_column<'a>(
    columns: &'a [ColumnDescriptor],
    name: &str,
) -> Option<&'a ColumnDescriptor> {
    columns.iter().find(|column| column.matches(name))
}

/// A possibly schema-qualified table name with any surrounding quotes removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: Option<String>,
    pub name: String,
}

impl TableName {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        TableName { schema: schema.map(|s| s.to_string()), name: name.to_string() }
    }

    /// Parses `table`, `schema.table` or `"schema"."table"`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let parts = split_qualified(raw);
        if parts.len() == 2 {
            TableName { schema: Some(parts[0].clone()), name: parts[1].clone() }
        } else {
            TableName { schema: None, name: unquote(raw) }
        }
    }
}

impl Display for TableName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn unquote(part: &str) -> String {
    let trimmed = part.trim();
    let stripped = trimmed
        .strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .or_else(|| trimmed.strip_prefix('[').and_then(|p| p.strip_suffix(']')))
        .or_else(|| trimmed.strip_prefix('`').and_then(|p| p.strip_suffix('`')));

    match stripped {
        Some(inner) => inner.replace("\"\"", "\""),
        None => trimmed.to_string(),
    }
}

// Splits on dots outside of double quotes.
fn split_qualified(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in raw.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '.' if !in_quotes => {
                parts.push(unquote(&current));
                current.clear();
            }
            _ => current.push(c),
        }
    }
    parts.push(unquote(&current));
    parts
}
