use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::path::{self, Segment};

/// Host predicate consulted when a transition names a `guard`.
pub type GuardFn = Arc<dyn Fn(&Value, &Context) -> bool + Send + Sync>;

/// Per-call evaluation context supplied by the host.
///
/// Holds the values reachable through `@` operands, the guard table used by
/// transitions, and the review-step override.
#[derive(Clone, Default)]
pub struct Context {
    values: Map<String, Value>,
    environment: Option<String>,
    guards: Option<BTreeMap<String, GuardFn>>,
    review_terminal: Option<bool>,
    now: Option<DateTime<Utc>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn with_values(mut self, values: Map<String, Value>) -> Self {
        self.values.extend(values);
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_guard<F>(mut self, name: impl Into<String>, guard: F) -> Self
    where
        F: Fn(&Value, &Context) -> bool + Send + Sync + 'static,
    {
        self.guards
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), Arc::new(guard));
        self
    }

    /// Supplies an empty guard table, so transitions may consult guards
    /// even before any are registered.
    pub fn with_guard_table(mut self) -> Self {
        self.guards.get_or_insert_with(BTreeMap::new);
        self
    }

    /// Overrides whether review steps end the flow.
    pub fn with_review_terminal(mut self, terminal: bool) -> Self {
        self.review_terminal = Some(terminal);
        self
    }

    /// Pins the clock seen by `@now`, `@today` and date predicates.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    pub fn clock_pinned(&self) -> bool {
        self.now.is_some()
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn guards(&self) -> Option<&BTreeMap<String, GuardFn>> {
        self.guards.as_ref()
    }

    pub fn review_terminal(&self) -> Option<bool> {
        self.review_terminal
    }

    /// Looks up a host value. Dotted keys such as `user.role` walk into
    /// nested objects.
    pub fn value(&self, key: &str) -> Option<&Value> {
        let parts = path::segments(key);
        let (head, rest) = parts.split_first()?;
        let Segment::Key(head) = head else {
            return None;
        };
        path::walk(self.values.get(head)?, rest)
    }

    /// Stable text used as part of memoization keys. Guard functions are
    /// represented by their names.
    pub fn cache_key(&self) -> String {
        let guards: Vec<&String> = self
            .guards
            .as_ref()
            .map(|table| table.keys().collect())
            .unwrap_or_default();
        json!({
            "values": self.values,
            "env": self.environment,
            "guards": guards,
            "review_terminal": self.review_terminal,
            "now": self.now.map(|now| now.to_rfc3339()),
        })
        .to_string()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.values)
            .field("environment", &self.environment)
            .field(
                "guards",
                &self
                    .guards
                    .as_ref()
                    .map(|table| table.keys().collect::<Vec<_>>()),
            )
            .field("review_terminal", &self.review_terminal)
            .field("now", &self.now)
            .finish()
    }
}
