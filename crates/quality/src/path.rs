//! Path lookup into structured results.

use serde_json::Value;

/// Navigate a result using a dotted path.
///
/// Supports simple dot notation and array indexing:
/// - `field` - root field
/// - `field.nested` - nested field
/// - `array[0]` - array element
/// - `field.array[0].nested` - combined
///
/// An empty path returns the value itself.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;

    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }

        match part.find('[') {
            Some(bracket) => {
                let key = &part[..bracket];
                if !key.is_empty() {
                    current = current.get(key)?;
                }
                for index in part[bracket..].split('[').skip(1) {
                    let index: usize = index.strip_suffix(']')?.parse().ok()?;
                    current = current.get(index)?;
                }
            }
            None => current = current.get(part)?,
        }
    }

    Some(current)
}

/// Short rendering of a value for diagnostics.
pub fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup() {
        let value = json!({
            "arcs": [{"name": "fall"}, {"name": "rise"}],
            "coverage": {"percentage": 82.5},
            "grid": [[1, 2], [3, 4]]
        });

        assert_eq!(lookup(&value, "coverage.percentage"), Some(&json!(82.5)));
        assert_eq!(lookup(&value, "arcs[1].name"), Some(&json!("rise")));
        assert_eq!(lookup(&value, "grid[1][0]"), Some(&json!(3)));
        assert_eq!(lookup(&value, ""), Some(&value));
        assert_eq!(lookup(&value, "arcs[5]"), None);
        assert_eq!(lookup(&value, "missing.field"), None);
        assert_eq!(lookup(&value, "arcs[x]"), None);
    }
}
