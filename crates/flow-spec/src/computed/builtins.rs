//! Functions available to every computed expression.

use chrono::{DateTime, Datelike, Utc};
use serde_json::{Number, Value};

use crate::dates::{format_date, parse_instant};
use crate::evaluator::to_number;

pub const NAMES: &[&str] = &[
    "now", "today", "year", "month", "day", "round", "floor", "ceil", "abs", "min", "max",
    "upper", "lower", "trim", "concat", "sum", "avg", "count",
];

/// Calls a built-in. `None` when `name` is not a built-in.
pub(crate) fn call(name: &str, args: &[Value], now: DateTime<Utc>) -> Option<Result<Value, String>> {
    let result = match name {
        "now" => Ok(Value::String(now.to_rfc3339())),
        "today" => Ok(Value::String(format_date(&now))),
        "year" => date_arg(name, args).map(|date| Value::from(date.year())),
        "month" => date_arg(name, args).map(|date| Value::from(date.month())),
        "day" => date_arg(name, args).map(|date| Value::from(date.day())),
        "round" => {
            let places = match args.get(1) {
                Some(value) => number_arg(name, value).map(|places| places.max(0.0) as u32),
                None => Ok(0),
            };
            places.and_then(|places| {
                let value = number_arg(name, first(args))?;
                number_value(round_to(value, places))
            })
        }
        "floor" => number_arg(name, first(args)).and_then(|value| number_value(value.floor())),
        "ceil" => number_arg(name, first(args)).and_then(|value| number_value(value.ceil())),
        "abs" => number_arg(name, first(args)).and_then(|value| number_value(value.abs())),
        "min" => extremum(name, args, f64::min),
        "max" => extremum(name, args, f64::max),
        "upper" => text_arg(name, args).map(|text| Value::String(text.to_uppercase())),
        "lower" => text_arg(name, args).map(|text| Value::String(text.to_lowercase())),
        "trim" => text_arg(name, args).map(|text| Value::String(text.trim().to_string())),
        "concat" => Ok(Value::String(
            args.iter()
                .filter(|value| !value.is_null())
                .map(display)
                .collect(),
        )),
        "sum" => array_numbers(name, args).and_then(|items| number_value(items.iter().sum())),
        "avg" => array_numbers(name, args).and_then(|items| {
            if items.is_empty() {
                Ok(Value::from(0))
            } else {
                number_value(items.iter().sum::<f64>() / items.len() as f64)
            }
        }),
        "count" => match first(args) {
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Null => Ok(Value::from(0)),
            other => Err(format!("count expects an array, got {other}")),
        },
        _ => return None,
    };
    Some(result)
}

static NULL: Value = Value::Null;

fn first(args: &[Value]) -> &Value {
    args.first().unwrap_or(&NULL)
}

fn number_arg(name: &str, value: &Value) -> Result<f64, String> {
    let number = to_number(Some(value));
    if number.is_nan() {
        Err(format!("{name} expects a number, got {value}"))
    } else {
        Ok(number)
    }
}

fn text_arg(name: &str, args: &[Value]) -> Result<String, String> {
    match first(args) {
        Value::Null => Err(format!("{name} expects a string, got null")),
        other => Ok(display(other)),
    }
}

fn date_arg(name: &str, args: &[Value]) -> Result<DateTime<Utc>, String> {
    let value = first(args);
    parse_instant(value).ok_or_else(|| format!("{name} expects a date, got {value}"))
}

fn extremum(name: &str, args: &[Value], pick: fn(f64, f64) -> f64) -> Result<Value, String> {
    let values: Vec<f64> = match args {
        [Value::Array(items)] => items
            .iter()
            .map(|item| number_arg(name, item))
            .collect::<Result<_, _>>()?,
        _ => args
            .iter()
            .map(|item| number_arg(name, item))
            .collect::<Result<_, _>>()?,
    };
    let result = values
        .into_iter()
        .reduce(pick)
        .ok_or_else(|| format!("{name} expects at least one value"))?;
    number_value(result)
}

fn array_numbers(name: &str, args: &[Value]) -> Result<Vec<f64>, String> {
    match first(args) {
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| number_arg(name, item))
            .collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(format!("{name} expects an array, got {other}")),
    }
}

pub(crate) fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places.min(15) as i32);
    (value * factor).round() / factor
}

/// Converts a float into a JSON number, using an integer representation
/// for whole values so `9.0` is stored as `9`.
pub(crate) fn number_value(value: f64) -> Result<Value, String> {
    if !value.is_finite() {
        return Err(format!("result {value} is not a finite number"));
    }
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        return Ok(Value::from(value as i64));
    }
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| format!("result {value} is not representable"))
}

/// Text form used for string concatenation.
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => match number.as_f64() {
            Some(float) if float.fract() == 0.0 && float.abs() < 9_007_199_254_740_992.0 => {
                (float as i64).to_string()
            }
            _ => number.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(name: &str, args: &[Value]) -> Result<Value, String> {
        let now = DateTime::parse_from_rfc3339("2024-03-15T10:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        call(name, args, now).expect("builtin exists")
    }

    #[test]
    fn whole_numbers_become_integers() {
        assert_eq!(number_value(9.0), Ok(json!(9)));
        assert_eq!(number_value(2.5), Ok(json!(2.5)));
        assert!(number_value(f64::INFINITY).is_err());
    }

    #[test]
    fn date_helpers_read_parts() {
        assert_eq!(run("year", &[json!("1990-07-04")]), Ok(json!(1990)));
        assert_eq!(run("month", &[json!("1990-07-04")]), Ok(json!(7)));
        assert_eq!(run("today", &[]), Ok(json!("2024-03-15")));
        assert!(run("day", &[json!("soon")]).is_err());
    }

    #[test]
    fn array_aggregates() {
        let items = json!([1, 2, 3.5]);
        assert_eq!(run("sum", std::slice::from_ref(&items)), Ok(json!(6.5)));
        assert_eq!(run("count", std::slice::from_ref(&items)), Ok(json!(3)));
        assert_eq!(run("avg", &[json!([])]), Ok(json!(0)));
        assert_eq!(run("max", &[json!(4), json!(9), json!(1)]), Ok(json!(9)));
    }

    #[test]
    fn string_helpers() {
        assert_eq!(run("upper", &[json!("ada")]), Ok(json!("ADA")));
        assert_eq!(run("trim", &[json!("  x ")]), Ok(json!("x")));
        assert_eq!(
            run("concat", &[json!("n-"), json!(7), Value::Null]),
            Ok(json!("n-7"))
        );
        assert_eq!(run("round", &[json!(2.346), json!(2)]), Ok(json!(2.35)));
        assert!(call("missing", &[], Utc::now()).is_none());
    }
}
