use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A data field derived from other fields through an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ComputedField {
    pub path: String,
    pub expr: String,
    #[serde(default, alias = "dependsOn")]
    pub depends_on: Vec<String>,
    /// Decimal places to round numeric results to. Negative values round to
    /// whole numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<i32>,
    /// Written instead of the result when evaluation fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Value>,
    /// `Some(false)` keeps the value out of the engine's value cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
}

impl ComputedField {
    pub fn new(path: impl Into<String>, expr: impl Into<String>, depends_on: &[&str]) -> Self {
        Self {
            path: path.into(),
            expr: expr.into(),
            depends_on: depends_on.iter().map(|dep| dep.to_string()).collect(),
            round: None,
            fallback: None,
            cache: None,
        }
    }

    pub fn with_round(mut self, places: i32) -> Self {
        self.round = Some(places);
        self
    }

    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }
}
