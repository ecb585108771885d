use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::FlowError;
use crate::evaluator::RuleEvaluator;
use crate::functions::register_builtin_predicates;
use crate::rule::Rule;
use crate::spec::form::FormSchema;

/// Visibility of every step (keyed by step id) and field (keyed by
/// `step.field`).
pub type VisibilityMap = BTreeMap<String, bool>;

/// Decides which steps and fields are shown for a data snapshot.
///
/// Results are memoized per (element, data, context). The controller does
/// not watch the data: call [`VisibilityController::clear_cache`] after
/// mutating it. A rule that fails to evaluate leaves its element visible.
#[derive(Debug)]
pub struct VisibilityController {
    evaluator: RuleEvaluator,
    cache: HashMap<String, bool>,
}

impl Default for VisibilityController {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityController {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        let mut evaluator = RuleEvaluator::with_config(config);
        register_builtin_predicates(&mut evaluator);
        Self {
            evaluator,
            cache: HashMap::new(),
        }
    }

    pub fn evaluator(&self) -> &RuleEvaluator {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut RuleEvaluator {
        &mut self.evaluator
    }

    pub fn register_function<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value], &Value, &Context) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.evaluator.register_function(name, function);
        self.cache.clear();
    }

    pub fn is_visible(
        &mut self,
        element_id: &str,
        rule: Option<&Rule>,
        data: &Value,
        context: &Context,
    ) -> bool {
        let Some(rule) = rule else {
            return true;
        };

        let key = (!rule.reads_clock() || context.clock_pinned())
            .then(|| format!("{element_id}\u{1f}{data}\u{1f}{}", context.cache_key()));
        if let Some(key) = &key
            && let Some(hit) = self.cache.get(key)
        {
            return *hit;
        }

        let visible = match self.evaluator.evaluate(rule, data, context) {
            Ok(visible) => visible,
            Err(error) => {
                warn!(element = element_id, %error, "visibility rule failed; showing element");
                true
            }
        };
        if let Some(key) = key {
            self.cache.insert(key, visible);
        }
        visible
    }

    pub fn get_visible_steps(
        &mut self,
        schema: &FormSchema,
        data: &Value,
        context: &Context,
    ) -> Vec<String> {
        schema
            .steps
            .iter()
            .filter(|step| self.is_visible(&step.id, step.visible_when.as_ref(), data, context))
            .map(|step| step.id.clone())
            .collect()
    }

    /// Visible field names of `step_id`, in declaration order. An unknown
    /// step has no visible fields; an unresolvable `$ref` is an error.
    pub fn get_visible_fields(
        &mut self,
        schema: &FormSchema,
        step_id: &str,
        data: &Value,
        context: &Context,
    ) -> Result<Vec<String>, FlowError> {
        let Some(step) = schema.step(step_id) else {
            return Ok(Vec::new());
        };

        let mut visible = Vec::new();
        for entry in &step.fields {
            let field = schema.resolve_field(entry)?;
            let element_id = format!("{step_id}.{}", field.name);
            if self.is_visible(&element_id, field.visible_when.as_ref(), data, context) {
                visible.push(field.name.clone());
            }
        }
        Ok(visible)
    }

    /// Visibility of every step and field in the schema.
    pub fn resolve_visibility(
        &mut self,
        schema: &FormSchema,
        data: &Value,
        context: &Context,
    ) -> Result<VisibilityMap, FlowError> {
        let mut map = VisibilityMap::new();
        for step in &schema.steps {
            let step_visible =
                self.is_visible(&step.id, step.visible_when.as_ref(), data, context);
            map.insert(step.id.clone(), step_visible);
            for entry in &step.fields {
                let field = schema.resolve_field(entry)?;
                let element_id = format!("{}.{}", step.id, field.name);
                let visible =
                    self.is_visible(&element_id, field.visible_when.as_ref(), data, context);
                map.insert(element_id, visible);
            }
        }
        Ok(map)
    }

    pub fn clear_cache(&mut self) {
        debug!(entries = self.cache.len(), "clearing visibility cache");
        self.cache.clear();
        self.evaluator.clear_cache();
    }
}
