#![allow(missing_docs)]

pub mod check;
pub mod computed;
pub mod config;
pub mod context;
pub mod dates;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod path;
pub mod rule;
pub mod spec;
pub mod transition;
pub mod visibility;

pub use check::{CheckIssue, CheckReport, check};
pub use computed::{ComputedFieldEngine, ComputedResult, ExprFn};
pub use config::EngineConfig;
pub use context::{Context, GuardFn};
pub use error::{ComputeError, FlowError, PathError, RuleError};
pub use evaluator::{RuleEvaluator, RuleFn};
pub use functions::register_builtin_predicates;
pub use rule::{ComparisonOp, LogicalOp, Operand, Rule};
pub use spec::{
    ComputedField, FieldEntry, FieldSpec, FormSchema, FormStep, StepTransition,
    TransitionHistoryEntry, TransitionKind,
};
pub use transition::TransitionEngine;
pub use visibility::{VisibilityController, VisibilityMap};
