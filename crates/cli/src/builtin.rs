//! Demo capabilities available to pipeline files.

use plotloom_core::capability::{blocking, from_fn};
use plotloom_core::{Capability, CapabilityError, Context, REVISION_FEEDBACK_KEY};
use plotloom_execution::{CapabilityRegistry, RegistryError};
use plotloom_quality::path;
use serde_json::{json, Value};
use std::sync::Arc;

/// Registry holding every built-in capability.
pub fn registry() -> Result<CapabilityRegistry, RegistryError> {
    CapabilityRegistry::new()
        .with(echo())?
        .with(template())?
        .with(fail())?
        .with(flaky())
}

/// Returns its context unchanged.
pub fn echo() -> Arc<dyn Capability> {
    from_fn("echo", |ctx: Context| async move { Ok(Value::Object(ctx)) })
}

/// Renders the `template` string into `output`.
///
/// `{key}` placeholders are looked up in the context; dot paths reach into
/// dependency results, e.g. `{premise.output}`.
pub fn template() -> Arc<dyn Capability> {
    blocking("template", |ctx: Context| {
        let template = ctx
            .get("template")
            .and_then(Value::as_str)
            .ok_or_else(|| CapabilityError::fatal("context has no `template` string"))?;
        let output = render(template, &Value::Object(ctx.clone()))?;
        Ok(json!({ "output": output }))
    })
}

/// Always fails fatally with the context's `message`.
pub fn fail() -> Arc<dyn Capability> {
    from_fn("fail", |ctx: Context| async move {
        let message = ctx
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("failure requested");
        Err(CapabilityError::fatal(message))
    })
}

/// Fails transiently until attempt `succeed_on` (default 2).
///
/// Attempts are counted from the revision feedback the task has collected,
/// so the capability itself stays stateless.
pub fn flaky() -> Arc<dyn Capability> {
    from_fn("flaky", |ctx: Context| async move {
        let succeed_on = ctx.get("succeed_on").and_then(Value::as_u64).unwrap_or(2);
        let attempt = ctx
            .get(REVISION_FEEDBACK_KEY)
            .and_then(Value::as_array)
            .map_or(0, Vec::len) as u64
            + 1;

        if attempt < succeed_on {
            Err(CapabilityError::transient(format!(
                "attempt {attempt} of {succeed_on} not there yet"
            )))
        } else {
            Ok(json!({ "attempt": attempt }))
        }
    })
}

fn render(template: &str, scope: &Value) -> Result<String, CapabilityError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| CapabilityError::fatal("unclosed `{` in template"))?;
        let key = after[..close].trim();
        match path::lookup(scope, key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(Value::Null) | None => {
                return Err(CapabilityError::fatal(format!("unknown placeholder `{key}`")))
            }
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(value: Value) -> Context {
        match value {
            Value::Object(map) => map,
            _ => Context::new(),
        }
    }

    #[test]
    fn test_registry_has_builtins() {
        let registry = registry().unwrap();
        let mut ids: Vec<&str> = registry.ids().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["echo", "fail", "flaky", "template"]);
    }

    #[tokio::test]
    async fn test_template_reads_dependency_results() {
        let ctx = context(json!({
            "template": "{hero} faces {premise.threat} ({premise.stakes})",
            "hero": "Ada",
            "premise": {"threat": "the tide", "stakes": 3}
        }));
        let result = template().execute(ctx).await.unwrap();
        assert_eq!(result, json!({"output": "Ada faces the tide (3)"}));
    }

    #[tokio::test]
    async fn test_template_unknown_placeholder_is_fatal() {
        let ctx = context(json!({"template": "{missing}"}));
        let err = template().execute(ctx).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.message(), "unknown placeholder `missing`");
    }

    #[tokio::test]
    async fn test_flaky_counts_feedback() {
        let first = context(json!({"succeed_on": 2}));
        assert!(!flaky().execute(first).await.unwrap_err().is_fatal());

        let second = context(json!({"succeed_on": 2, REVISION_FEEDBACK_KEY: ["not yet"]}));
        assert_eq!(flaky().execute(second).await.unwrap(), json!({"attempt": 2}));
    }

    #[tokio::test]
    async fn test_fail_is_fatal() {
        let err = fail().execute(Context::new()).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.message(), "failure requested");
    }
}
