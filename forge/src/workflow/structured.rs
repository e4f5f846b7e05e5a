//! Validation of model-emitted structured output.
//!
//! Model JSON is checked against an embedded JSON Schema (Draft 2020-12)
//! before deserializing, so shape violations surface as one readable error
//! instead of a serde trail.

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse `content` as JSON, validate it against `schema_raw`, and deserialize.
pub fn parse_structured<T: DeserializeOwned>(content: &str, schema_raw: &str) -> Result<T> {
    let instance: Value = serde_json::from_str(content.trim()).context("parse model output")?;
    let schema: Value = serde_json::from_str(schema_raw).context("parse schema json")?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    serde_json::from_value(instance).context("deserialize model output")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::Plan;

    const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

    #[test]
    fn valid_plan_parses() {
        let content = r#"{
            "title": "Add retries",
            "problem_statement": "Webhooks give up after one attempt",
            "proposed_approach": "Add bounded backoff",
            "affected_files": ["src/webhook.rs"],
            "estimated_complexity": "low",
            "risks": []
        }"#;
        let plan: Plan = parse_structured(content, PLAN_SCHEMA).expect("parse");
        assert_eq!(plan.title, "Add retries");
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let content = r#"{"title": "Add retries"}"#;
        let err = parse_structured::<Plan>(content, PLAN_SCHEMA).expect_err("should fail");
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn non_json_content_is_rejected() {
        let err = parse_structured::<Plan>("Sure! Here's a plan:", PLAN_SCHEMA)
            .expect_err("should fail");
        assert!(err.to_string().contains("parse model output"));
    }
}
