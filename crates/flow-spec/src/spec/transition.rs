use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::rule::Rule;

/// Directed edge between two steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepTransition {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Rule>,
    /// Name of a host guard that may veto this transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default)]
    pub default: bool,
    /// Lets path planning revisit a step through this edge.
    #[serde(default, alias = "allowCycle")]
    pub allow_cycle: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Conditional,
    Default,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Conditional => "conditional",
            TransitionKind::Default => "default",
        }
    }
}

/// Diagnostic record of an accepted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionHistoryEntry {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    pub timestamp: DateTime<Utc>,
}
