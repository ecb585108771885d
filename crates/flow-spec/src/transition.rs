use std::collections::VecDeque;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::FlowError;
use crate::spec::form::FormSchema;
use crate::spec::transition::{StepTransition, TransitionHistoryEntry, TransitionKind};
use crate::visibility::VisibilityController;

struct Resolved<'a> {
    transition: &'a StepTransition,
    kind: TransitionKind,
}

/// Step navigation for a form instance.
///
/// Forward moves follow the schema's transitions; backward moves follow
/// the list of currently visible steps. A dead end is `None`, never an
/// error. Accepted forward moves are kept in a bounded history.
#[derive(Debug)]
pub struct TransitionEngine {
    visibility: VisibilityController,
    history: VecDeque<TransitionHistoryEntry>,
    history_capacity: usize,
    max_path_steps: usize,
    review_steps: Vec<String>,
}

impl Default for TransitionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionEngine {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            visibility: VisibilityController::with_config(config),
            history: VecDeque::new(),
            history_capacity: config.history_capacity,
            max_path_steps: config.max_path_steps,
            review_steps: config.review_steps.clone(),
        }
    }

    pub fn visibility(&self) -> &VisibilityController {
        &self.visibility
    }

    pub fn visibility_mut(&mut self) -> &mut VisibilityController {
        &mut self.visibility
    }

    pub fn is_review_step(&self, schema: &FormSchema, step_id: &str) -> bool {
        match &schema.review_step {
            Some(review) => review == step_id,
            None => self.review_steps.iter().any(|review| review == step_id),
        }
    }

    pub fn get_next_step(
        &mut self,
        schema: &FormSchema,
        current: &str,
        data: &Value,
        context: &Context,
    ) -> Result<Option<String>, FlowError> {
        let Some(resolved) = self.resolve(schema, current, data, context)? else {
            debug!(step = current, "no outgoing transition matched");
            return Ok(None);
        };
        let next = resolved.transition.to.clone();
        self.record(current, &next, resolved.kind);
        Ok(Some(next))
    }

    /// Predecessor of `current` among the visible steps.
    pub fn get_previous_step(
        &mut self,
        schema: &FormSchema,
        current: &str,
        data: &Value,
        context: &Context,
    ) -> Option<String> {
        let visible = self.visibility.get_visible_steps(schema, data, context);
        let position = visible.iter().position(|step| step == current)?;
        position.checked_sub(1).map(|index| visible[index].clone())
    }

    /// Whether `get_next_step` from `from` would land on `to`. Does not
    /// touch the history.
    pub fn can_transition(
        &mut self,
        schema: &FormSchema,
        from: &str,
        to: &str,
        data: &Value,
        context: &Context,
    ) -> Result<bool, FlowError> {
        Ok(self
            .resolve(schema, from, data, context)?
            .is_some_and(|resolved| resolved.transition.to == to))
    }

    /// Steps visited walking forward from `start` to `end`, both included.
    ///
    /// Empty when `end` is not reached within `max_steps` hops (the
    /// configured bound when `None`), when the walk dead-ends, or when it
    /// would revisit a step through an edge without `allow_cycle`.
    pub fn get_transition_path(
        &mut self,
        schema: &FormSchema,
        start: &str,
        end: &str,
        data: &Value,
        max_steps: Option<usize>,
        context: &Context,
    ) -> Result<Vec<String>, FlowError> {
        let limit = max_steps.unwrap_or(self.max_path_steps);
        let mut path = vec![start.to_string()];
        if start == end {
            return Ok(path);
        }

        let mut current = start.to_string();
        for _ in 0..limit {
            let Some(resolved) = self.resolve(schema, &current, data, context)? else {
                return Ok(Vec::new());
            };
            let next = resolved.transition.to.clone();
            if path.contains(&next) && !resolved.transition.allow_cycle {
                debug!(from = %current, to = %next, "path revisits a step without allow_cycle");
                return Ok(Vec::new());
            }
            path.push(next.clone());
            if next == end {
                return Ok(path);
            }
            current = next;
        }

        debug!(start, end, limit, "transition path not found within bound");
        Ok(Vec::new())
    }

    pub fn history(&self) -> &VecDeque<TransitionHistoryEntry> {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn clear_cache(&mut self) {
        self.visibility.clear_cache();
    }

    fn resolve<'s>(
        &mut self,
        schema: &'s FormSchema,
        current: &str,
        data: &Value,
        context: &Context,
    ) -> Result<Option<Resolved<'s>>, FlowError> {
        if context.review_terminal().unwrap_or(true) && self.is_review_step(schema, current) {
            return Ok(None);
        }

        let candidates: Vec<&StepTransition> = schema.transitions_from(current).collect();
        let defaults: Vec<&StepTransition> = candidates
            .iter()
            .copied()
            .filter(|transition| transition.default)
            .collect();
        if defaults.len() > 1 {
            return Err(FlowError::AmbiguousDefault {
                from: current.to_string(),
                count: defaults.len(),
            });
        }

        for transition in candidates.into_iter().filter(|transition| !transition.default) {
            let matched = match &transition.when {
                Some(rule) => self.visibility.evaluator_mut().evaluate(rule, data, context)?,
                None => true,
            };
            if matched && guard_allows(transition, data, context) {
                return Ok(Some(Resolved {
                    transition,
                    kind: TransitionKind::Conditional,
                }));
            }
        }

        Ok(defaults.first().copied().map(|transition| Resolved {
            transition,
            kind: TransitionKind::Default,
        }))
    }

    fn record(&mut self, from: &str, to: &str, kind: TransitionKind) {
        debug!(from, to, kind = kind.as_str(), "transition accepted");
        self.history.push_back(TransitionHistoryEntry {
            from: from.to_string(),
            to: to.to_string(),
            kind,
            timestamp: Utc::now(),
        });
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
    }
}

/// Guards only apply when the context supplies a guard table. A guard name
/// missing from the table does not veto.
fn guard_allows(transition: &StepTransition, data: &Value, context: &Context) -> bool {
    let (Some(name), Some(guards)) = (&transition.guard, context.guards()) else {
        return true;
    };
    match guards.get(name) {
        Some(guard) => guard(data, context),
        None => {
            warn!(
                guard = %name,
                from = %transition.from,
                to = %transition.to,
                "guard is not registered in context; ignoring"
            );
            true
        }
    }
}
