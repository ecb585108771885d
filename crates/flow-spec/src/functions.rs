//! Predicates pre-registered for `Custom` rules so schema authors can use
//! common checks without host wiring.

use chrono::{Datelike, Weekday};
use serde_json::Value;

use crate::context::Context;
use crate::dates::parse_instant;
use crate::evaluator::RuleEvaluator;

pub fn register_builtin_predicates(evaluator: &mut RuleEvaluator) {
    evaluator.register_function("is_weekday", is_weekday);
    evaluator.register_function("has_role", has_role);
    evaluator.register_function("step_completed", step_completed);
    evaluator.register_function("is_filled", is_filled);
}

/// `is_weekday()` checks the context clock; `is_weekday(date)` checks `date`.
fn is_weekday(args: &[Value], _data: &Value, context: &Context) -> Result<bool, String> {
    let instant = match args.first() {
        Some(Value::Null) | None => context.now(),
        Some(value) => parse_instant(value).ok_or_else(|| format!("'{value}' is not a date"))?,
    };
    Ok(!matches!(instant.weekday(), Weekday::Sat | Weekday::Sun))
}

/// `has_role(role)` looks at `user.roles` (array) or `user.role` (string).
fn has_role(args: &[Value], _data: &Value, context: &Context) -> Result<bool, String> {
    let role = args
        .first()
        .and_then(Value::as_str)
        .ok_or("has_role expects a role name")?;
    let by_list = context
        .value("user.roles")
        .and_then(Value::as_array)
        .is_some_and(|roles| roles.iter().any(|candidate| candidate.as_str() == Some(role)));
    let by_single = context.value("user.role").and_then(Value::as_str) == Some(role);
    Ok(by_list || by_single)
}

/// `step_completed(step_id)` looks at the `completed_steps` context array.
fn step_completed(args: &[Value], _data: &Value, context: &Context) -> Result<bool, String> {
    let step = args
        .first()
        .and_then(Value::as_str)
        .ok_or("step_completed expects a step id")?;
    Ok(context
        .value("completed_steps")
        .and_then(Value::as_array)
        .is_some_and(|steps| steps.iter().any(|candidate| candidate.as_str() == Some(step))))
}

/// `is_filled($.path)` is true for anything but null, `""`, `[]` and `{}`.
fn is_filled(args: &[Value], _data: &Value, _context: &Context) -> Result<bool, String> {
    Ok(match args.first() {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    })
}
