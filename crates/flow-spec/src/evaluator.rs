use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::context::Context;
use crate::dates::format_date;
use crate::error::RuleError;
use crate::path;
use crate::rule::{ComparisonOp, LogicalOp, Operand, Rule};

/// Host function reachable from `Custom` rules. Arguments arrive already
/// resolved: data and context references are replaced by their values.
pub type RuleFn = Arc<dyn Fn(&[Value], &Value, &Context) -> Result<bool, String> + Send + Sync>;

/// Evaluates [`Rule`] trees against a data snapshot.
///
/// Top-level results are memoized by (rule, data, context). Each top-level
/// call may visit at most `max_evaluations` rule nodes.
pub struct RuleEvaluator {
    max_evaluations: usize,
    environment: String,
    functions: BTreeMap<String, RuleFn>,
    cache: HashMap<String, bool>,
    patterns: HashMap<String, Regex>,
    evaluations: usize,
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuleEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEvaluator")
            .field("max_evaluations", &self.max_evaluations)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("cached", &self.cache.len())
            .field("evaluations", &self.evaluations)
            .finish()
    }
}

impl RuleEvaluator {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            max_evaluations: config.max_evaluations,
            environment: config.environment.clone(),
            functions: BTreeMap::new(),
            cache: HashMap::new(),
            patterns: HashMap::new(),
            evaluations: 0,
        }
    }

    /// Registers (or replaces) a function callable from `Custom` rules.
    pub fn register_function<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value], &Value, &Context) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self.cache.clear();
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Rule nodes visited by the most recent uncached evaluation.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        debug!(entries = self.cache.len(), "clearing rule cache");
        self.cache.clear();
        self.patterns.clear();
        self.evaluations = 0;
    }

    pub fn evaluate(
        &mut self,
        rule: &Rule,
        data: &Value,
        context: &Context,
    ) -> Result<bool, RuleError> {
        let key = (!rule.reads_clock() || context.clock_pinned())
            .then(|| cache_key(rule, data, context));
        if let Some(key) = &key
            && let Some(hit) = self.cache.get(key)
        {
            return Ok(*hit);
        }

        self.evaluations = 0;
        let result = self.eval_node(rule, data, context)?;
        if let Some(key) = key {
            self.cache.insert(key, result);
        }
        Ok(result)
    }

    fn eval_node(
        &mut self,
        rule: &Rule,
        data: &Value,
        context: &Context,
    ) -> Result<bool, RuleError> {
        self.evaluations += 1;
        if self.evaluations > self.max_evaluations {
            return Err(RuleError::EvaluationLimit {
                limit: self.max_evaluations,
            });
        }

        match rule {
            Rule::Always { value } => Ok(value.unwrap_or(true)),
            Rule::Comparison { op, left, right } => {
                let left = resolve(left, data, context, &self.environment);
                let right = resolve(right, data, context, &self.environment);
                self.compare(*op, left.as_deref(), right.as_deref())
            }
            Rule::Logical {
                op: LogicalOp::And,
                args,
            } => {
                for arg in args {
                    if !self.eval_node(arg, data, context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Rule::Logical {
                op: LogicalOp::Or,
                args,
            } => {
                for arg in args {
                    if self.eval_node(arg, data, context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Rule::Logical {
                op: LogicalOp::Not,
                args,
            } => match args.as_slice() {
                [] => Ok(true),
                [only] => Ok(!self.eval_node(only, data, context)?),
                [first, rest @ ..] => {
                    warn!(ignored = rest.len(), "`not` takes a single argument");
                    Ok(!self.eval_node(first, data, context)?)
                }
            },
            Rule::Custom { function, args } => {
                let callable = self
                    .functions
                    .get(function)
                    .cloned()
                    .ok_or_else(|| RuleError::UnknownFunction(function.clone()))?;
                let resolved: Vec<Value> = args
                    .iter()
                    .map(|arg| {
                        let operand = Operand::from(arg.clone());
                        resolve(&operand, data, context, &self.environment)
                            .map(Cow::into_owned)
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                callable(&resolved, data, context).map_err(|message| RuleError::Function {
                    name: function.clone(),
                    message,
                })
            }
        }
    }

    fn compare(
        &mut self,
        op: ComparisonOp,
        left: Option<&Value>,
        right: Option<&Value>,
    ) -> Result<bool, RuleError> {
        // Absent data never satisfies a comparison, not even `neq`.
        let left = match left {
            Some(value) if !value.is_null() => value,
            _ => return Ok(false),
        };

        let outcome = match op {
            ComparisonOp::Eq => right.is_some_and(|right| strict_eq(left, right)),
            ComparisonOp::Neq => !right.is_some_and(|right| strict_eq(left, right)),
            ComparisonOp::Gt => to_number(Some(left)) > to_number(right),
            ComparisonOp::Gte => to_number(Some(left)) >= to_number(right),
            ComparisonOp::Lt => to_number(Some(left)) < to_number(right),
            ComparisonOp::Lte => to_number(Some(left)) <= to_number(right),
            ComparisonOp::In => matches!(
                right,
                Some(Value::Array(items)) if items.iter().any(|item| strict_eq(left, item))
            ),
            ComparisonOp::Regex => {
                let Some(text) = left.as_str() else {
                    return Ok(false);
                };
                match self.pattern(right)? {
                    Some(regex) => regex.is_match(text),
                    None => false,
                }
            }
        };
        Ok(outcome)
    }

    fn pattern(&mut self, right: Option<&Value>) -> Result<Option<&Regex>, RuleError> {
        let source = match right {
            Some(Value::String(pattern)) => pattern.clone(),
            Some(Value::Object(spec)) => {
                let Some(pattern) = spec.get("pattern").and_then(Value::as_str) else {
                    return Ok(None);
                };
                let flags: String = spec
                    .get("flags")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .chars()
                    .filter(|flag| matches!(flag, 'i' | 'm' | 's'))
                    .collect();
                if flags.is_empty() {
                    pattern.to_string()
                } else {
                    format!("(?{flags}){pattern}")
                }
            }
            _ => return Ok(None),
        };

        if !self.patterns.contains_key(&source) {
            let regex = Regex::new(&source).map_err(|source_err| RuleError::InvalidPattern {
                pattern: source.clone(),
                source: source_err,
            })?;
            self.patterns.insert(source.clone(), regex);
        }
        Ok(self.patterns.get(&source))
    }
}

fn cache_key(rule: &Rule, data: &Value, context: &Context) -> String {
    format!(
        "{}\u{1f}{}\u{1f}{}",
        serde_json::to_string(rule).unwrap_or_default(),
        data,
        context.cache_key()
    )
}

fn resolve<'a>(
    operand: &'a Operand,
    data: &'a Value,
    context: &'a Context,
    environment: &str,
) -> Option<Cow<'a, Value>> {
    match operand {
        Operand::Literal(value) => Some(Cow::Borrowed(value)),
        Operand::Data(reference) => path::get(data, reference).map(Cow::Borrowed),
        Operand::Context(key) => {
            if let Some(value) = context.value(key) {
                return Some(Cow::Borrowed(value));
            }
            let builtin = match key.as_str() {
                "now" => Value::from(context.now().timestamp_millis()),
                "today" => Value::String(format_date(&context.now())),
                "env" => Value::String(context.environment().unwrap_or(environment).to_string()),
                _ => return None,
            };
            Some(Cow::Owned(builtin))
        }
    }
}

/// Equality without coercion, except that numbers compare by value.
pub(crate) fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Numeric coercion used by ordering comparisons. Unconvertible values
/// become NaN, which makes every ordering comparison false.
pub(crate) fn to_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(flag)) => f64::from(u8::from(*flag)),
        Some(Value::Number(number)) => number.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(text)) => {
            let text = text.trim();
            if text.is_empty() {
                0.0
            } else {
                text.parse().unwrap_or(f64::NAN)
            }
        }
        Some(_) => f64::NAN,
    }
}
