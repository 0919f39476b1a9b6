//! Rule-based validation of parsed records.
//!
//! Findings accumulate in a `ValidationResult`; nothing short-circuits, so
//! one pass reports every problem in the dataset. Only
//! `ValidationResult::raise_on_errors` turns findings into an error.

use std::collections::{HashMap, HashSet};
use std::fmt;

use regex::Regex;
use serde_json::{Map, Value};

use crate::errors::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// 1-based row number; 0 for dataset-level findings.
    pub row: usize,
    pub column: Option<String>,
    pub message: String,
    pub severity: Severity,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
        };
        match (&self.column, self.row) {
            (Some(col), 0) => write!(f, "[{tag}] column '{col}': {}", self.message),
            (Some(col), row) => write!(f, "[{tag}] row {row}, column '{col}': {}", self.message),
            (None, 0) => write!(f, "[{tag}] {}", self.message),
            (None, row) => write!(f, "[{tag}] row {row}: {}", self.message),
        }
    }
}

#[derive(Debug, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn summary(&self) -> String {
        let errors = self.errors().count();
        let warnings = self.warnings().count();
        if errors == 0 && warnings == 0 {
            return "Validation passed with no findings.".to_string();
        }
        let mut out = format!("{errors} error(s), {warnings} warning(s)");
        for issue in &self.issues {
            out.push('\n');
            out.push_str(&issue.to_string());
        }
        out
    }

    pub fn raise_on_errors(&self) -> Result<(), IngestError> {
        let count = self.errors().count();
        if count > 0 {
            return Err(IngestError::ValidationFailed(count));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    String,
    Int,
    Float,
    Bool,
}

impl DType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            DType::String => value.is_string(),
            DType::Int => value.is_i64() || value.is_u64(),
            // Integers are acceptable where floats are expected.
            DType::Float => value.is_number(),
            DType::Bool => value.is_boolean(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DType::String => "string",
            DType::Int => "int",
            DType::Float => "float",
            DType::Bool => "bool",
        }
    }
}

type CustomCheck = Box<dyn Fn(&Value) -> Option<String>>;

/// Validation rules for one column, built up fluently.
pub struct ColumnRule {
    pub name: String,
    required: bool,
    dtype: Option<DType>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Regex>,
    allowed: Option<Vec<Value>>,
    custom: Option<CustomCheck>,
    severity: Severity,
}

impl ColumnRule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            dtype: None,
            min_value: None,
            max_value: None,
            min_length: None,
            max_length: None,
            pattern: None,
            allowed: None,
            custom: None,
            severity: Severity::Error,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn min_value(mut self, min: f64) -> Self {
        self.min_value = Some(min);
        self
    }

    pub fn max_value(mut self, max: f64) -> Self {
        self.max_value = Some(max);
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn allowed(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }

    pub fn custom(mut self, check: CustomCheck) -> Self {
        self.custom = Some(check);
        self
    }

    pub fn as_warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }

    fn check(&self, value: Option<&Value>, row: usize, result: &mut ValidationResult) {
        let mut report = |message: String| {
            result.issues.push(ValidationIssue {
                row,
                column: Some(self.name.clone()),
                message,
                severity: self.severity,
            });
        };

        let value = match value {
            None | Some(Value::Null) => {
                if self.required {
                    report("value is required but missing".to_string());
                }
                return;
            }
            Some(v) => v,
        };

        if let Some(dtype) = self.dtype {
            if !dtype.matches(value) {
                report(format!("expected {} but got {value}", dtype.name()));
                return;
            }
        }
        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min_value {
                if n < min {
                    report(format!("{n} is below the minimum {min}"));
                }
            }
            if let Some(max) = self.max_value {
                if n > max {
                    report(format!("{n} is above the maximum {max}"));
                }
            }
        }
        if let Some(s) = value.as_str() {
            if let Some(min) = self.min_length {
                if s.chars().count() < min {
                    report(format!("length {} is below the minimum {min}", s.chars().count()));
                }
            }
            if let Some(max) = self.max_length {
                if s.chars().count() > max {
                    report(format!("length {} is above the maximum {max}", s.chars().count()));
                }
            }
            if let Some(pattern) = &self.pattern {
                if !pattern.is_match(s) {
                    report(format!("'{s}' does not match pattern {}", pattern.as_str()));
                }
            }
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                report(format!("{value} is not an allowed value"));
            }
        }
        if let Some(custom) = &self.custom {
            if let Some(message) = custom(value) {
                report(message);
            }
        }
    }
}

/// Dataset-level schema: column rules plus row-count and uniqueness bounds.
#[derive(Default)]
pub struct DataSchema {
    pub columns: Vec<ColumnRule>,
    /// Reject columns not covered by a rule.
    pub strict: bool,
    pub min_rows: Option<usize>,
    pub max_rows: Option<usize>,
    pub unique_columns: Vec<String>,
}

impl DataSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, rule: ColumnRule) -> Self {
        self.columns.push(rule);
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn min_rows(mut self, min: usize) -> Self {
        self.min_rows = Some(min);
        self
    }

    pub fn max_rows(mut self, max: usize) -> Self {
        self.max_rows = Some(max);
        self
    }

    pub fn unique(mut self, column: &str) -> Self {
        self.unique_columns.push(column.to_string());
        self
    }
}

/// Run every rule over every record.
pub fn validate(records: &[Map<String, Value>], schema: &DataSchema) -> ValidationResult {
    let mut result = ValidationResult::default();

    if let Some(min) = schema.min_rows {
        if records.len() < min {
            result.issues.push(ValidationIssue {
                row: 0,
                column: None,
                message: format!("dataset has {} rows; at least {min} required", records.len()),
                severity: Severity::Error,
            });
        }
    }
    if let Some(max) = schema.max_rows {
        if records.len() > max {
            result.issues.push(ValidationIssue {
                row: 0,
                column: None,
                message: format!("dataset has {} rows; at most {max} allowed", records.len()),
                severity: Severity::Error,
            });
        }
    }

    let known: HashSet<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
    for (i, record) in records.iter().enumerate() {
        let row = i + 1;
        for rule in &schema.columns {
            rule.check(record.get(&rule.name), row, &mut result);
        }
        if schema.strict {
            for key in record.keys() {
                if !known.contains(key.as_str()) {
                    result.issues.push(ValidationIssue {
                        row,
                        column: Some(key.clone()),
                        message: "column is not declared in the schema".to_string(),
                        severity: Severity::Error,
                    });
                }
            }
        }
    }

    for column in &schema.unique_columns {
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            let row = i + 1;
            let value = match record.get(column) {
                Some(v) if !v.is_null() => v.to_string(),
                _ => continue,
            };
            if let Some(first) = seen.get(&value) {
                result.issues.push(ValidationIssue {
                    row,
                    column: Some(column.clone()),
                    message: format!("duplicate value {value} (first seen at row {first})"),
                    severity: Severity::Error,
                });
            } else {
                seen.insert(value, row);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn required_and_dtype_rules_fire() {
        let records = vec![
            record(&[("name", json!("ada")), ("age", json!(36))]),
            record(&[("age", json!("not a number"))]),
        ];
        let schema = DataSchema::new()
            .column(ColumnRule::new("name").required())
            .column(ColumnRule::new("age").dtype(DType::Int));
        let result = validate(&records, &schema);
        assert!(!result.is_valid());
        assert_eq!(result.errors().count(), 2);
        assert!(result.issues.iter().all(|i| i.row == 2));
    }

    #[test]
    fn range_and_pattern_rules_fire() {
        let records = vec![record(&[
            ("age", json!(150)),
            ("email", json!("not-an-email")),
        ])];
        let schema = DataSchema::new()
            .column(ColumnRule::new("age").min_value(0.0).max_value(120.0))
            .column(
                ColumnRule::new("email")
                    .pattern(Regex::new(r"^[^@]+@[^@]+$").expect("regex")),
            );
        let result = validate(&records, &schema);
        assert_eq!(result.errors().count(), 2);
    }

    #[test]
    fn warnings_do_not_invalidate() {
        let records = vec![record(&[("nickname", json!(""))])];
        let schema =
            DataSchema::new().column(ColumnRule::new("nickname").min_length(1).as_warning());
        let result = validate(&records, &schema);
        assert!(result.is_valid());
        assert_eq!(result.warnings().count(), 1);
        result.raise_on_errors().expect("no errors to raise");
    }

    #[test]
    fn uniqueness_reports_later_duplicates() {
        let records = vec![
            record(&[("id", json!(1))]),
            record(&[("id", json!(2))]),
            record(&[("id", json!(1))]),
        ];
        let schema = DataSchema::new().unique("id");
        let result = validate(&records, &schema);
        assert_eq!(result.errors().count(), 1);
        assert_eq!(result.issues[0].row, 3);
    }

    #[test]
    fn strict_mode_rejects_undeclared_columns() {
        let records = vec![record(&[("id", json!(1)), ("extra", json!("x"))])];
        let schema = DataSchema::new()
            .column(ColumnRule::new("id"))
            .strict();
        let result = validate(&records, &schema);
        assert_eq!(result.errors().count(), 1);
        assert_eq!(result.issues[0].column.as_deref(), Some("extra"));
    }

    #[test]
    fn raise_on_errors_counts_only_errors() {
        let records = vec![record(&[])];
        let schema = DataSchema::new()
            .column(ColumnRule::new("a").required())
            .column(ColumnRule::new("b").required().as_warning());
        let result = validate(&records, &schema);
        let err = result.raise_on_errors().expect_err("should raise");
        assert!(matches!(err, IngestError::ValidationFailed(1)));
    }

    #[test]
    fn custom_check_runs() {
        let records = vec![record(&[("code", json!("xx"))])];
        let schema = DataSchema::new().column(ColumnRule::new("code").custom(Box::new(|v| {
            match v.as_str() {
                Some(s) if s.starts_with('x') => Some("codes may not start with x".to_string()),
                _ => None,
            }
        })));
        let result = validate(&records, &schema);
        assert_eq!(result.errors().count(), 1);
    }
}
