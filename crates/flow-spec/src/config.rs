use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tunables shared by the engines. Every field has a default, so a partial
/// JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    /// Rule nodes a single top-level evaluation may visit.
    pub max_evaluations: usize,
    /// Transition history entries kept before the oldest is evicted.
    pub history_capacity: usize,
    /// Hop bound used by `get_transition_path` when the caller does not pass one.
    pub max_path_steps: usize,
    /// Step ids treated as terminal review steps when the schema names none.
    pub review_steps: Vec<String>,
    /// Value returned for the `@env` context reference.
    pub environment: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_evaluations: 1000,
            history_capacity: 100,
            max_path_steps: 20,
            review_steps: vec!["review".into()],
            environment: "production".into(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
