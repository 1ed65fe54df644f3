//! Schema contracts for structured variables.

use crate::core::{json_type_name, VarType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// One way in which data fails a schema contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    /// The column involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// The zero-based row involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    /// What went wrong.
    pub message: String,
}

impl Discrepancy {
    /// Creates a discrepancy with no location.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            column: None,
            row: None,
            message: message.into(),
        }
    }

    /// Sets the column.
    #[must_use]
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Sets the row.
    #[must_use]
    pub fn with_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.column, self.row) {
            (Some(column), Some(row)) => write!(f, "column '{column}', row {row}: {}", self.message),
            (Some(column), None) => write!(f, "column '{column}': {}", self.message),
            (None, Some(row)) => write!(f, "row {row}: {}", self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

/// The outcome of validating data against a contract.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when no discrepancies were found.
    pub ok: bool,
    /// Ordered discrepancies.
    #[serde(default)]
    pub diffs: Vec<Discrepancy>,
}

impl ValidationResult {
    /// A passing result.
    #[must_use]
    pub fn valid() -> Self {
        Self {
            ok: true,
            diffs: Vec::new(),
        }
    }

    /// Builds a result from a list of discrepancies.
    #[must_use]
    pub fn from_diffs(diffs: Vec<Discrepancy>) -> Self {
        Self {
            ok: diffs.is_empty(),
            diffs,
        }
    }
}

/// A black-box structural contract on variable data.
pub trait SchemaContract: Send + Sync + fmt::Debug {
    /// Returns the contract name.
    fn name(&self) -> &str;

    /// Validates the data.
    fn validate(&self, data: &Value) -> ValidationResult;
}

/// A value-level check on a column.
#[derive(Debug, Clone)]
pub enum ColumnCheck {
    /// Numeric value greater than or equal to the bound.
    Ge(f64),
    /// Numeric value less than or equal to the bound.
    Le(f64),
    /// String length at most the bound, in characters.
    MaxLength(usize),
    /// String matching the pattern.
    Pattern(Regex),
    /// Value equal to one of the listed values.
    OneOf(Vec<Value>),
}

impl ColumnCheck {
    /// Builds a pattern check.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Pattern)
    }

    fn check(&self, value: &Value) -> Option<String> {
        match self {
            Self::Ge(bound) => match value.as_f64() {
                Some(n) if n >= *bound => None,
                Some(n) => Some(format!("{n} is less than {bound}")),
                None => Some(format!("expected a number for >= {bound}")),
            },
            Self::Le(bound) => match value.as_f64() {
                Some(n) if n <= *bound => None,
                Some(n) => Some(format!("{n} is greater than {bound}")),
                None => Some(format!("expected a number for <= {bound}")),
            },
            Self::MaxLength(max) => match value.as_str() {
                Some(s) if s.chars().count() <= *max => None,
                Some(s) => Some(format!("length {} exceeds {max}", s.chars().count())),
                None => Some("expected a string for length check".to_string()),
            },
            Self::Pattern(regex) => match value.as_str() {
                Some(s) if regex.is_match(s) => None,
                Some(s) => Some(format!("'{s}' does not match /{}/", regex.as_str())),
                None => Some("expected a string for pattern check".to_string()),
            },
            Self::OneOf(allowed) => {
                if allowed.contains(value) {
                    None
                } else {
                    Some(format!("{value} is not an allowed value"))
                }
            }
        }
    }
}

/// A typed column of a [`TableSchema`].
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Declared type of non-null values.
    pub dtype: VarType,
    /// Whether nulls (and missing keys) are allowed.
    pub nullable: bool,
    /// Value checks applied to non-null values.
    pub checks: Vec<ColumnCheck>,
}

impl ColumnSpec {
    /// Creates a non-nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, dtype: VarType) -> Self {
        Self {
            name: name.into(),
            dtype,
            nullable: false,
            checks: Vec::new(),
        }
    }

    /// Allows nulls.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Adds a value check.
    #[must_use]
    pub fn check(mut self, check: ColumnCheck) -> Self {
        self.checks.push(check);
        self
    }
}

/// A row/column contract for tabular variables (arrays of row objects).
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnSpec>,
    strict: bool,
}

impl TableSchema {
    /// Creates a strict schema with no columns.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            strict: true,
        }
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Allows columns not declared by the schema.
    #[must_use]
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Returns the declared columns.
    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    fn validate_row(&self, index: usize, row: &Value, diffs: &mut Vec<Discrepancy>) {
        let Some(fields) = row.as_object() else {
            diffs.push(
                Discrepancy::new(format!("expected an object, found {}", json_type_name(row)))
                    .with_row(index),
            );
            return;
        };

        for column in &self.columns {
            match fields.get(&column.name) {
                None | Some(Value::Null) if column.nullable => {}
                None => diffs.push(
                    Discrepancy::new("missing value")
                        .with_column(&column.name)
                        .with_row(index),
                ),
                Some(Value::Null) => diffs.push(
                    Discrepancy::new("null in non-nullable column")
                        .with_column(&column.name)
                        .with_row(index),
                ),
                Some(value) if !column.dtype.accepts(value) => diffs.push(
                    Discrepancy::new(format!(
                        "expected {}, found {}",
                        column.dtype,
                        json_type_name(value)
                    ))
                    .with_column(&column.name)
                    .with_row(index),
                ),
                Some(value) => {
                    for check in &column.checks {
                        if let Some(message) = check.check(value) {
                            diffs.push(
                                Discrepancy::new(message)
                                    .with_column(&column.name)
                                    .with_row(index),
                            );
                        }
                    }
                }
            }
        }

        if self.strict {
            let declared: HashSet<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
            let mut extra: Vec<&String> = fields
                .keys()
                .filter(|k| !declared.contains(k.as_str()))
                .collect();
            extra.sort();
            for key in extra {
                diffs.push(
                    Discrepancy::new("unexpected column")
                        .with_column(key)
                        .with_row(index),
                );
            }
        }
    }
}

impl SchemaContract for TableSchema {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, data: &Value) -> ValidationResult {
        let Some(rows) = data.as_array() else {
            return ValidationResult::from_diffs(vec![Discrepancy::new(format!(
                "expected an array of rows, found {}",
                json_type_name(data)
            ))]);
        };

        let mut diffs = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            self.validate_row(index, row, &mut diffs);
        }
        ValidationResult::from_diffs(diffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sales_schema() -> TableSchema {
        TableSchema::new("sales")
            .column(
                ColumnSpec::new("product", VarType::String)
                    .check(ColumnCheck::MaxLength(10))
                    .check(ColumnCheck::pattern("^[a-z]+$").unwrap()),
            )
            .column(ColumnSpec::new("quantity", VarType::Integer).check(ColumnCheck::Ge(0.0)))
            .column(ColumnSpec::new("price", VarType::Number).check(ColumnCheck::Le(1000.0)))
            .column(ColumnSpec::new("note", VarType::String).nullable())
    }

    #[test]
    fn test_valid_table() {
        let data = json!([
            {"product": "apple", "quantity": 3, "price": 1.5},
            {"product": "pear", "quantity": 0, "price": 2, "note": null},
        ]);
        let result = sales_schema().validate(&data);
        assert!(result.ok);
        assert!(result.diffs.is_empty());
    }

    #[test]
    fn test_diffs_are_ordered_by_row_then_column() {
        let data = json!([
            {"product": "Apple", "quantity": -1, "price": 1.5},
            {"product": "pear", "price": "cheap", "extra": true},
        ]);
        let result = sales_schema().validate(&data);
        assert!(!result.ok);

        let located: Vec<(Option<usize>, Option<String>)> = result
            .diffs
            .iter()
            .map(|d| (d.row, d.column.clone()))
            .collect();
        assert_eq!(
            located,
            vec![
                (Some(0), Some("product".to_string())),
                (Some(0), Some("quantity".to_string())),
                (Some(1), Some("quantity".to_string())),
                (Some(1), Some("price".to_string())),
                (Some(1), Some("extra".to_string())),
            ]
        );
    }

    #[test]
    fn test_non_array_is_rejected() {
        let result = sales_schema().validate(&json!({"product": "apple"}));
        assert!(!result.ok);
        assert_eq!(result.diffs.len(), 1);
        assert!(result.diffs[0].message.contains("found object"));
    }

    #[test]
    fn test_lenient_schema_allows_extra_columns() {
        let schema = TableSchema::new("ids")
            .column(ColumnSpec::new("id", VarType::Integer))
            .lenient();
        assert!(schema.validate(&json!([{"id": 1, "other": "x"}])).ok);
    }

    #[test]
    fn test_one_of_check() {
        let schema = TableSchema::new("status").column(
            ColumnSpec::new("state", VarType::String)
                .check(ColumnCheck::OneOf(vec![json!("open"), json!("closed")])),
        );
        assert!(schema.validate(&json!([{"state": "open"}])).ok);
        assert!(!schema.validate(&json!([{"state": "pending"}])).ok);
    }

    #[test]
    fn test_discrepancy_display() {
        let diff = Discrepancy::new("bad").with_column("price").with_row(2);
        assert_eq!(diff.to_string(), "column 'price', row 2: bad");
        assert_eq!(Discrepancy::new("bad").to_string(), "bad");
    }
}
