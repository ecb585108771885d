use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::builtins::{self, display, number_value};
use super::parser::{BinaryOp, Expr, UnaryOp};
use crate::error::ComputeError;
use crate::evaluator::{strict_eq, to_number};

/// Host function callable from computed expressions.
pub type ExprFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Bindings visible while one computed field is evaluated.
///
/// Lookup order: dependency leaf names, then `data`, then `user`.
pub(crate) struct Scope<'a> {
    pub locals: BTreeMap<String, Value>,
    pub data: &'a Value,
    pub user: Option<&'a Value>,
    pub functions: &'a BTreeMap<String, ExprFn>,
    pub now: DateTime<Utc>,
}

impl Scope<'_> {
    pub fn eval(&self, expr: &Expr) -> Result<Value, ComputeError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Ident(name) => self.lookup(name),
            Expr::Member(target, name) => member(self.eval(target)?, name),
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(target, &index)
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, &args)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => number(-coerce(&value)?),
                    UnaryOp::Plus => number(coerce(&value)?),
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                }
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
            Expr::Conditional(condition, then, otherwise) => {
                if truthy(&self.eval(condition)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, ComputeError> {
        if let Some(value) = self.locals.get(name) {
            return Ok(value.clone());
        }
        match name {
            "data" => Ok(self.data.clone()),
            "user" => Ok(self.user.cloned().unwrap_or(Value::Null)),
            _ => Err(ComputeError::Eval(format!("unknown identifier '{name}'"))),
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, ComputeError> {
        let result = match self.functions.get(name) {
            Some(function) => function(args),
            None => builtins::call(name, args, self.now)
                .ok_or_else(|| ComputeError::Eval(format!("unknown function '{name}'")))?,
        };
        result.map_err(|message| ComputeError::Eval(format!("{name}: {message}")))
    }
}

fn member(target: Value, name: &str) -> Result<Value, ComputeError> {
    match target {
        Value::Object(mut map) => Ok(map.remove(name).unwrap_or(Value::Null)),
        Value::Array(items) if name == "length" => Ok(Value::from(items.len())),
        Value::String(text) if name == "length" => Ok(Value::from(text.chars().count())),
        Value::Null => Err(ComputeError::Eval(format!(
            "cannot read property '{name}' of null"
        ))),
        _ => Ok(Value::Null),
    }
}

fn index_value(target: Value, index: &Value) -> Result<Value, ComputeError> {
    match (target, index) {
        (Value::Array(mut items), Value::Number(number)) => {
            let position = number.as_f64().unwrap_or(-1.0);
            if position >= 0.0 && position.fract() == 0.0 && (position as usize) < items.len() {
                Ok(items.swap_remove(position as usize))
            } else {
                Ok(Value::Null)
            }
        }
        (Value::Object(mut map), Value::String(key)) => Ok(map.remove(key).unwrap_or(Value::Null)),
        (Value::Null, _) => Err(ComputeError::Eval(format!(
            "cannot read index {index} of null"
        ))),
        _ => Ok(Value::Null),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ComputeError> {
    match op {
        BinaryOp::Add if left.is_string() || right.is_string() => {
            Ok(Value::String(format!("{}{}", display(left), display(right))))
        }
        BinaryOp::Add => number(coerce(left)? + coerce(right)?),
        BinaryOp::Sub => number(coerce(left)? - coerce(right)?),
        BinaryOp::Mul => number(coerce(left)? * coerce(right)?),
        BinaryOp::Div | BinaryOp::Rem => {
            let dividend = coerce(left)?;
            let divisor = coerce(right)?;
            if divisor == 0.0 {
                return Err(ComputeError::Eval("division by zero".into()));
            }
            number(if op == BinaryOp::Div {
                dividend / divisor
            } else {
                dividend % divisor
            })
        }
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => to_number(Some(left)).partial_cmp(&to_number(Some(right))),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Lte => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::Eq => Ok(Value::Bool(strict_eq(left, right))),
        BinaryOp::Neq => Ok(Value::Bool(!strict_eq(left, right))),
        BinaryOp::And | BinaryOp::Or => Err(ComputeError::Eval(
            "logical operators are evaluated lazily".into(),
        )),
    }
}

fn coerce(value: &Value) -> Result<f64, ComputeError> {
    let number = to_number(Some(value));
    if number.is_nan() {
        Err(ComputeError::Eval(format!("{value} is not a number")))
    } else {
        Ok(number)
    }
}

fn number(value: f64) -> Result<Value, ComputeError> {
    number_value(value).map_err(ComputeError::Eval)
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
