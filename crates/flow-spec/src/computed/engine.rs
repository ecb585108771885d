use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::builtins::{self, number_value, round_to};
use super::interpret::{ExprFn, Scope};
use super::parser::{Expr, parse};
use crate::error::ComputeError;
use crate::path::{self, leaf_name, normalize};
use crate::spec::computed::ComputedField;

/// Outcome of evaluating one computed field.
///
/// `error` is set when the expression failed and `value` holds the
/// fallback that was written instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputedResult {
    pub path: String,
    pub value: Value,
    pub dependencies: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Parsed {
    source: String,
    expr: Arc<Expr>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Maintains the dependency graph of computed fields and evaluates them.
///
/// Graph edges point from a source path to the computed paths that read
/// it. Paths are normalized (`$.a.b[0]`) before they enter the graph.
pub struct ComputedFieldEngine {
    graph: BTreeMap<String, BTreeSet<String>>,
    fields: BTreeMap<String, ComputedField>,
    expressions: HashMap<String, Parsed>,
    values: HashMap<String, Value>,
    functions: BTreeMap<String, ExprFn>,
    user: Option<Value>,
    now: Option<DateTime<Utc>>,
}

impl Default for ComputedFieldEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComputedFieldEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedFieldEngine")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("cached", &self.values.len())
            .field("now", &self.now)
            .finish()
    }
}

impl ComputedFieldEngine {
    pub fn new() -> Self {
        Self {
            graph: BTreeMap::new(),
            fields: BTreeMap::new(),
            expressions: HashMap::new(),
            values: HashMap::new(),
            functions: BTreeMap::new(),
            user: None,
            now: None,
        }
    }

    /// Pins the time seen by `now()` and `today()`.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn register_custom_function<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        let name = name.into();
        if builtins::NAMES.contains(&name.as_str()) {
            warn!(function = %name, "custom function shadows a built-in");
        }
        self.functions.insert(name, Arc::new(function));
    }

    /// Object bound to `user` inside expressions.
    pub fn set_user_context(&mut self, user: Value) {
        self.user = Some(user);
    }

    /// Adds `field` to the dependency graph. Parsing happens on first
    /// evaluation.
    pub fn register_computed_field(&mut self, field: &ComputedField) {
        let target = normalize(&field.path);
        for dependency in &field.depends_on {
            self.graph
                .entry(normalize(dependency))
                .or_default()
                .insert(target.clone());
        }
        self.fields.insert(target, field.clone());
    }

    /// Evaluates one field and writes the result into `data`. Failures are
    /// reported in the result and never returned as `Err`.
    pub fn evaluate(&mut self, field: &ComputedField, data: &mut Value) -> ComputedResult {
        let target = normalize(&field.path);
        let dependencies: Vec<String> = field.depends_on.iter().map(|dep| normalize(dep)).collect();

        let outcome = self.compute(field, &target, &dependencies, data).and_then(|value| {
            path::set(data, &target, value.clone())?;
            Ok(value)
        });

        let (value, error) = match outcome {
            Ok(value) => (value, None),
            Err(error) => {
                let fallback = field.fallback.clone().unwrap_or(Value::Null);
                warn!(field = %target, %error, "computed field failed; writing fallback");
                if let Err(write) = path::set(data, &target, fallback.clone()) {
                    debug!(field = %target, error = %write, "fallback could not be written");
                }
                (fallback, Some(error.to_string()))
            }
        };

        if field.cache != Some(false) {
            self.values.insert(target.clone(), value.clone());
        }

        ComputedResult {
            path: target,
            value,
            dependencies,
            timestamp: self.now(),
            error,
        }
    }

    /// Registers and evaluates `fields` in dependency order. A cycle among
    /// them is returned as an error before anything is evaluated.
    pub fn evaluate_all(
        &mut self,
        fields: &[ComputedField],
        data: &mut Value,
    ) -> Result<Vec<ComputedResult>, ComputeError> {
        for field in fields {
            self.register_computed_field(field);
        }
        let order = topological_order(fields)?;
        debug!(
            order = ?order.iter().map(|field| field.path.as_str()).collect::<Vec<_>>(),
            "evaluating computed fields"
        );
        Ok(order
            .into_iter()
            .map(|field| self.evaluate(field, data))
            .collect())
    }

    /// Re-evaluates the registered fields downstream of `changed`.
    pub fn evaluate_affected(
        &mut self,
        changed: &str,
        data: &mut Value,
    ) -> Result<Vec<ComputedResult>, ComputeError> {
        let affected: Vec<ComputedField> = self
            .get_affected_fields(changed)
            .iter()
            .filter_map(|path| self.fields.get(path).cloned())
            .collect();
        self.evaluate_all(&affected, data)
    }

    /// Computed paths transitively downstream of `changed`, nearest first.
    pub fn get_affected_fields(&self, changed: &str) -> Vec<String> {
        let start = normalize(changed);
        let mut seen = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([start]);
        let mut affected = Vec::new();

        while let Some(current) = queue.pop_front() {
            let Some(dependents) = self.graph.get(&current) else {
                continue;
            };
            for dependent in dependents {
                if seen.insert(dependent.clone()) {
                    affected.push(dependent.clone());
                    queue.push_back(dependent.clone());
                }
            }
        }
        affected
    }

    pub fn get_computed_value(&self, path: &str) -> Option<&Value> {
        self.values.get(&normalize(path))
    }

    /// Drops cached values. The graph and parsed expressions are kept.
    pub fn clear_cache(&mut self) {
        debug!(entries = self.values.len(), "clearing computed value cache");
        self.values.clear();
    }

    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    fn compile(&mut self, target: &str, source: &str) -> Result<Arc<Expr>, ComputeError> {
        if let Some(parsed) = self.expressions.get(target)
            && parsed.source == source
        {
            return Ok(Arc::clone(&parsed.expr));
        }
        let expr = Arc::new(parse(source)?);
        self.expressions.insert(
            target.to_string(),
            Parsed {
                source: source.to_string(),
                expr: Arc::clone(&expr),
            },
        );
        Ok(expr)
    }

    fn compute(
        &mut self,
        field: &ComputedField,
        target: &str,
        dependencies: &[String],
        data: &Value,
    ) -> Result<Value, ComputeError> {
        let expr = self.compile(target, &field.expr)?;

        let mut locals = BTreeMap::new();
        let mut bound: BTreeMap<String, &str> = BTreeMap::new();
        for dependency in dependencies {
            let Some(name) = leaf_name(dependency) else {
                continue;
            };
            if let Some(previous) = bound.insert(name.clone(), dependency.as_str())
                && previous != dependency.as_str()
            {
                warn!(
                    field = %target,
                    %name,
                    previous,
                    dependency = %dependency,
                    "dependencies share a name; the later one is bound, use `data.` paths to reach the other"
                );
            }
            let value = path::get(data, dependency).cloned().unwrap_or(Value::Null);
            locals.insert(name, value);
        }

        let scope = Scope {
            locals,
            data,
            user: self.user.as_ref(),
            functions: &self.functions,
            now: self.now(),
        };
        let value = scope.eval(&expr)?;

        match (field.round, &value) {
            (Some(places), Value::Number(number)) => {
                let places = places.max(0).unsigned_abs();
                let rounded = round_to(number.as_f64().unwrap_or_default(), places);
                number_value(rounded).map_err(ComputeError::Eval)
            }
            _ => Ok(value),
        }
    }
}

/// Orders `fields` so every field follows the computed fields it reads.
/// Dependencies outside the batch are leaves.
///
/// Depth-first with an explicit stack, so long chains do not grow the call
/// stack.
pub(crate) fn topological_order(fields: &[ComputedField]) -> Result<Vec<&ComputedField>, ComputeError> {
    let by_path: BTreeMap<String, &ComputedField> = fields
        .iter()
        .map(|field| (normalize(&field.path), field))
        .collect();
    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut order = Vec::with_capacity(by_path.len());

    for field in fields {
        let root = normalize(&field.path);
        if marks.contains_key(&root) {
            continue;
        }
        let Some(start) = by_path.get(&root).copied() else {
            continue;
        };
        marks.insert(root.clone(), Mark::Visiting);
        let mut stack = vec![(root, start, 0usize)];

        while let Some(frame) = stack.last_mut() {
            let current = frame.1;
            let Some(dependency) = current.depends_on.get(frame.2) else {
                if let Some((path, done, _)) = stack.pop() {
                    marks.insert(path, Mark::Done);
                    order.push(done);
                }
                continue;
            };
            frame.2 += 1;

            let dependency = normalize(dependency);
            let Some(next) = by_path.get(&dependency).copied() else {
                continue;
            };
            match marks.get(&dependency) {
                Some(Mark::Done) => {}
                Some(Mark::Visiting) => {
                    return Err(ComputeError::CircularDependency { field: dependency });
                }
                None => {
                    marks.insert(dependency.clone(), Mark::Visiting);
                    stack.push((dependency, next, 0));
                }
            }
        }
    }
    Ok(order)
}
