//! Built-in result validators.

use plotloom_core::{Validation, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{describe, lookup};

/// Validator backed by a closure.
pub struct FnValidator<F> {
    f: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&Value) -> Validation + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&Value) -> Validation + Send + Sync,
{
    fn validate(&self, result: &Value) -> Validation {
        (self.f)(result)
    }
}

/// Every listed path must be present and not null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredFields {
    /// Paths to check
    pub paths: Vec<String>,
}

impl RequiredFields {
    /// Create a new check.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RequiredFields {
    fn validate(&self, result: &Value) -> Validation {
        let missing: Vec<&str> = self
            .paths
            .iter()
            .filter(|p| lookup(result, p).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Validation::valid()
        } else {
            Validation::invalid(format!("missing field(s): {}", missing.join(", ")))
        }
    }
}

/// The array at a path must be absent or empty, e.g. a list of violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyCollection {
    /// Path to the array
    pub path: String,
}

impl EmptyCollection {
    /// Create a new check.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Validator for EmptyCollection {
    fn validate(&self, result: &Value) -> Validation {
        match lookup(result, &self.path) {
            None | Some(Value::Null) => Validation::valid(),
            Some(Value::Array(items)) if items.is_empty() => Validation::valid(),
            Some(Value::Array(items)) => {
                let shown: Vec<String> = items.iter().take(3).map(describe).collect();
                let more = if items.len() > 3 { ", ..." } else { "" };
                Validation::invalid(format!(
                    "`{}` has {} item(s): {}{}",
                    self.path,
                    items.len(),
                    shown.join(", "),
                    more
                ))
            }
            Some(other) => Validation::invalid(format!(
                "`{}` is not a list: {}",
                self.path,
                describe(other)
            )),
        }
    }
}

/// The number at a path must be at least `min`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Path to the number
    pub path: String,
    /// Minimum accepted value
    pub min: f64,
}

impl Threshold {
    /// Create a new check.
    pub fn new(path: impl Into<String>, min: f64) -> Self {
        Self {
            path: path.into(),
            min,
        }
    }
}

impl Validator for Threshold {
    fn validate(&self, result: &Value) -> Validation {
        match lookup(result, &self.path).and_then(Value::as_f64) {
            Some(n) if n >= self.min => Validation::valid(),
            Some(n) => Validation::invalid(format!(
                "`{}` is {} (threshold {})",
                self.path, n, self.min
            )),
            None => Validation::invalid(format!("`{}` is missing or not a number", self.path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_fields() {
        let check = RequiredFields::new(["goal", "conflict", "outcome"]);
        assert!(check
            .validate(&json!({"goal": "escape", "conflict": "guards", "outcome": "caught"}))
            .valid);

        let v = check.validate(&json!({"goal": "escape", "conflict": null}));
        assert!(!v.valid);
        assert_eq!(v.message, "missing field(s): conflict, outcome");
    }

    #[test]
    fn test_empty_collection() {
        let check = EmptyCollection::new("violations");
        assert!(check.validate(&json!({})).valid);
        assert!(check.validate(&json!({"violations": []})).valid);

        let v = check.validate(&json!({"violations": ["a", "b", "c", "d"]}));
        assert!(!v.valid);
        assert_eq!(v.message, "`violations` has 4 item(s): a, b, c, ...");

        assert!(!check.validate(&json!({"violations": "none"})).valid);
    }

    #[test]
    fn test_threshold() {
        let check = Threshold::new("coverage_percentage", 70.0);
        assert!(check.validate(&json!({"coverage_percentage": 70})).valid);

        let v = check.validate(&json!({"coverage_percentage": 42.5}));
        assert_eq!(v.message, "`coverage_percentage` is 42.5 (threshold 70)");

        assert!(!check.validate(&json!({"coverage_percentage": "high"})).valid);
    }

    #[test]
    fn test_fn_validator() {
        let arcs_present = FnValidator::new(|v: &Value| {
            match v.get("arcs").and_then(Value::as_array) {
                Some(arcs) if !arcs.is_empty() => Validation::valid(),
                _ => Validation::invalid("arc structure invalid"),
            }
        });
        assert!(arcs_present.validate(&json!({"arcs": [1]})).valid);
        assert!(!arcs_present.validate(&json!({"arcs": []})).valid);
    }
}
