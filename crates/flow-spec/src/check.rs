//! Advisory lint pass over a [`FormSchema`]. The engines never call it.

use std::collections::{BTreeMap, BTreeSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::computed::engine::topological_order;
use crate::computed::parser::parse;
use crate::error::ComputeError;
use crate::spec::form::FormSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CheckIssue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub message: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CheckReport {
    pub ok: bool,
    pub issues: Vec<CheckIssue>,
}

pub fn check(schema: &FormSchema) -> CheckReport {
    let mut issues = Vec::new();

    let mut seen = BTreeSet::new();
    for step in &schema.steps {
        if !seen.insert(step.id.as_str()) {
            issues.push(step_issue(
                &step.id,
                format!("step id '{}' is declared more than once", step.id),
                "duplicate_step",
            ));
        }
        for entry in &step.fields {
            if let Err(error) = schema.resolve_field(entry) {
                issues.push(step_issue(&step.id, error.to_string(), "unresolved_ref"));
            }
        }
    }

    let mut defaults: BTreeMap<&str, usize> = BTreeMap::new();
    for transition in &schema.transitions {
        for end in [&transition.from, &transition.to] {
            if !seen.contains(end.as_str()) {
                issues.push(step_issue(
                    end,
                    format!(
                        "transition {} -> {} references unknown step '{end}'",
                        transition.from, transition.to
                    ),
                    "unknown_step",
                ));
            }
        }
        if transition.default {
            *defaults.entry(transition.from.as_str()).or_default() += 1;
        }
    }
    for (from, count) in defaults.into_iter().filter(|(_, count)| *count > 1) {
        issues.push(step_issue(
            from,
            format!("step '{from}' declares {count} default transitions"),
            "ambiguous_default",
        ));
    }

    if let Some(review) = &schema.review_step
        && !seen.contains(review.as_str())
    {
        issues.push(step_issue(
            review,
            format!("review step '{review}' is not declared"),
            "unknown_step",
        ));
    }

    for field in &schema.computed {
        if let Err(error) = parse(&field.expr) {
            issues.push(path_issue(&field.path, error.to_string(), "invalid_expression"));
        }
    }
    if let Err(ComputeError::CircularDependency { field }) = topological_order(&schema.computed) {
        issues.push(path_issue(
            &field,
            format!("computed field '{field}' is part of a dependency cycle"),
            "circular_dependency",
        ));
    }

    CheckReport {
        ok: issues.is_empty(),
        issues,
    }
}

fn step_issue(step_id: &str, message: String, code: &str) -> CheckIssue {
    CheckIssue {
        step_id: Some(step_id.to_string()),
        path: None,
        message,
        code: code.into(),
    }
}

fn path_issue(path: &str, message: String, code: &str) -> CheckIssue {
    CheckIssue {
        step_id: None,
        path: Some(path.to_string()),
        message,
        code: code.into(),
    }
}
