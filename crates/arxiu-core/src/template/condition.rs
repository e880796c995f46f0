//! Column-level and inline conditions, evaluated against one CSV row.

use std::sync::LazyLock;

use regex::Regex;

/// One CSV row indexed by header name (case-insensitive).
#[derive(Debug, Clone, Default)]
pub struct RowValues {
    headers: Vec<String>,
    values: Vec<String>,
}

impl RowValues {
    pub fn new(headers: &[String], values: Vec<String>) -> Self {
        Self {
            headers: headers.iter().map(|h| normalize_header(h)).collect(),
            values,
        }
    }

    /// Trimmed value of the first column whose header matches `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        let wanted = normalize_header(name);
        self.headers
            .iter()
            .position(|h| *h == wanted)
            .and_then(|i| self.values.get(i))
            .map(|v| v.trim())
    }

    /// Trimmed value at a resolved column index.
    pub fn at(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(|v| v.trim())
    }

    /// `(header, value)` pairs, for error snapshots.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

/// Header comparison form: BOM-free, trimmed, lowercase.
pub fn normalize_header(h: &str) -> String {
    h.trim_start_matches('\u{feff}').trim().to_lowercase()
}

/// Column-level condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnCondition {
    /// The column's own value is non-empty.
    NotEmpty,
    /// `column:<name> == 'v'`.
    Equals { column: String, value: String },
    /// `column:<name> != 'v'`.
    NotEquals { column: String, value: String },
}

static COLUMN_COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^column:\s*([^=!]+?)\s*(==|!=)\s*(?:'([^']*)'|"([^"]*)")$"#).unwrap()
});

impl ColumnCondition {
    /// Parse the expression syntax. Returns `None` for anything else.
    pub fn parse(expr: &str) -> Option<ColumnCondition> {
        let expr = expr.trim();
        if expr == "not_empty" {
            return Some(ColumnCondition::NotEmpty);
        }
        let caps = COLUMN_COMPARISON.captures(expr)?;
        let column = caps.get(1)?.as_str().trim().to_string();
        let value = caps
            .get(3)
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        match caps.get(2)?.as_str() {
            "==" => Some(ColumnCondition::Equals { column, value }),
            "!=" => Some(ColumnCondition::NotEquals { column, value }),
            _ => None,
        }
    }

    pub fn evaluate(&self, own_value: &str, row: &RowValues) -> bool {
        match self {
            ColumnCondition::NotEmpty => !own_value.trim().is_empty(),
            ColumnCondition::Equals { column, value } => {
                row.get(column).unwrap_or("") == value.as_str()
            }
            ColumnCondition::NotEquals { column, value } => {
                row.get(column).unwrap_or("") != value.as_str()
            }
        }
    }
}

/// Condition attached to a single `map_to` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineCondition {
    /// The named column (or the current column) is non-empty.
    NotEmpty { column: Option<String> },
    /// The named column (or the current column) equals `value`.
    Equals {
        column: Option<String>,
        value: String,
    },
}

impl InlineCondition {
    pub fn parse(op: &str, column: Option<String>, value: Option<String>) -> Option<Self> {
        match op.trim() {
            "not_empty" => Some(InlineCondition::NotEmpty { column }),
            "equals" | "eq" | "==" => value.map(|value| InlineCondition::Equals { column, value }),
            _ => None,
        }
    }

    pub fn evaluate(&self, own_value: &str, row: &RowValues) -> bool {
        let read = |column: &Option<String>| -> String {
            match column {
                Some(c) => row.get(c).unwrap_or("").to_string(),
                None => own_value.trim().to_string(),
            }
        };
        match self {
            InlineCondition::NotEmpty { column } => !read(column).is_empty(),
            InlineCondition::Equals { column, value } => read(column) == *value,
        }
    }
}
