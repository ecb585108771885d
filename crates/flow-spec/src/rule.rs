use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declarative boolean rule used for `visible_when` and transition `when`.
///
/// Rules are plain data: they serialize to JSON with a `type` tag and never
/// embed executable code. Host predicates are reached through `Custom`,
/// which names a function registered on the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
    Comparison {
        op: ComparisonOp,
        #[schemars(with = "Value")]
        left: Operand,
        #[schemars(with = "Value")]
        right: Operand,
    },
    Logical {
        op: LogicalOp,
        #[serde(default)]
        args: Vec<Rule>,
    },
    Custom {
        #[serde(rename = "fn")]
        function: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Value>,
    },
    Always {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<bool>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// One side of a comparison.
///
/// In JSON an operand is any value: strings starting with `$.` (or `$` on
/// its own) point into the data snapshot, strings starting with `@` point
/// into the context, and everything else is a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Operand {
    Data(String),
    Context(String),
    Literal(Value),
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) if is_data_ref(&text) => Operand::Data(text),
            Value::String(text) if text.len() > 1 && text.starts_with('@') => {
                Operand::Context(text[1..].to_string())
            }
            other => Operand::Literal(other),
        }
    }
}

impl From<Operand> for Value {
    fn from(operand: Operand) -> Self {
        match operand {
            Operand::Data(path) => Value::String(path),
            Operand::Context(key) => Value::String(format!("@{key}")),
            Operand::Literal(value) => value,
        }
    }
}

fn is_data_ref(text: &str) -> bool {
    text == "$" || text.starts_with("$.") || text.starts_with("$[")
}

impl Rule {
    pub fn compare(op: ComparisonOp, left: impl Into<Value>, right: impl Into<Value>) -> Self {
        Rule::Comparison {
            op,
            left: Operand::from(left.into()),
            right: Operand::from(right.into()),
        }
    }

    pub fn equals(left: impl Into<Value>, right: impl Into<Value>) -> Self {
        Self::compare(ComparisonOp::Eq, left, right)
    }

    pub fn all(args: Vec<Rule>) -> Self {
        Rule::Logical {
            op: LogicalOp::And,
            args,
        }
    }

    pub fn any(args: Vec<Rule>) -> Self {
        Rule::Logical {
            op: LogicalOp::Or,
            args,
        }
    }

    pub fn negate(rule: Rule) -> Self {
        Rule::Logical {
            op: LogicalOp::Not,
            args: vec![rule],
        }
    }

    pub fn custom(function: impl Into<String>, args: Vec<Value>) -> Self {
        Rule::Custom {
            function: function.into(),
            args,
        }
    }

    pub fn always() -> Self {
        Rule::Always { value: None }
    }

    /// True when any operand in the tree reads the data snapshot.
    pub fn reads_data(&self) -> bool {
        match self {
            Rule::Comparison { left, right, .. } => {
                matches!(left, Operand::Data(_)) || matches!(right, Operand::Data(_))
            }
            Rule::Logical { args, .. } => args.iter().any(Rule::reads_data),
            Rule::Custom { args, .. } => args
                .iter()
                .any(|arg| matches!(arg, Value::String(text) if is_data_ref(text))),
            Rule::Always { .. } => false,
        }
    }

    /// True when the rule reads the wall clock through `@now`/`@today`.
    pub(crate) fn reads_clock(&self) -> bool {
        let clock = |operand: &Operand| {
            matches!(operand, Operand::Context(key) if key == "now" || key == "today")
        };
        match self {
            Rule::Comparison { left, right, .. } => clock(left) || clock(right),
            Rule::Logical { args, .. } => args.iter().any(Rule::reads_clock),
            Rule::Custom { .. } => true,
            Rule::Always { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operands_classify_by_prefix() {
        assert_eq!(Operand::from(json!("$.age")), Operand::Data("$.age".into()));
        assert_eq!(Operand::from(json!("@now")), Operand::Context("now".into()));
        assert_eq!(Operand::from(json!("@")), Operand::Literal(json!("@")));
        assert_eq!(Operand::from(json!(18)), Operand::Literal(json!(18)));
        assert_eq!(Operand::from(json!("adult")), Operand::Literal(json!("adult")));
    }

    #[test]
    fn rule_deserializes_from_tagged_json() {
        let rule: Rule = serde_json::from_value(json!({
            "type": "logical",
            "op": "and",
            "args": [
                { "type": "comparison", "op": "gte", "left": "$.age", "right": 18 },
                { "type": "custom", "fn": "has_role", "args": ["admin"] },
                { "type": "always" }
            ]
        }))
        .expect("deserialize");

        let Rule::Logical { op, args } = rule else {
            panic!("expected logical rule");
        };
        assert_eq!(op, LogicalOp::And);
        assert_eq!(args.len(), 3);
        assert_eq!(
            args[0],
            Rule::compare(ComparisonOp::Gte, json!("$.age"), json!(18))
        );
        assert_eq!(args[2], Rule::always());
    }
}
