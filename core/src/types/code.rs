use std::fmt::Display;

/// Rendered SQL text. Statements built by the dialects are passed around as
/// `Code` so they can be logged and executed without re-formatting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Code(String);

impl From<String> for Code {
    fn from(value: String) -> Self {
        Code(value)
    }
}

impl From<&str> for Code {
    fn from(value: &str) -> Self {
        Code(value.to_string())
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Code {
    pub fn new(value: String) -> Self {
        Code(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Returns the statement with `prefix` placed in front of it.
    pub fn prefixed(self, prefix: &str) -> Self {
        Code(format!("{}{}", prefix, self.0))
    }
}
