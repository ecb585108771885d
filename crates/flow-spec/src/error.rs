use thiserror::Error;

/// Failures raised while evaluating a rule tree.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("custom rule function '{0}' is not registered")]
    UnknownFunction(String),
    #[error("rule evaluation exceeded the limit of {limit} evaluations")]
    EvaluationLimit { limit: usize },
    #[error("invalid regex pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("custom rule function '{name}' failed: {message}")]
    Function { name: String, message: String },
}

/// Failures raised by the computed field engine.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("circular dependency detected at computed field '{field}'")]
    CircularDependency { field: String },
    #[error("failed to parse expression at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("{0}")]
    Eval(String),
    #[error(transparent)]
    Path(#[from] PathError),
}

/// Failures writing into a data snapshot.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("cannot write to an empty path")]
    Empty,
    #[error("cannot write '{path}': segment '{segment}' passes through a non-container value")]
    Conflict { path: String, segment: String },
    #[error("cannot write '{path}': index {index} is too far past the end of an array of length {len}")]
    IndexOutOfRange { path: String, index: usize, len: usize },
}

/// Umbrella error for the flow engines.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error(transparent)]
    Compute(#[from] ComputeError),
    #[error("step '{from}' declares {count} default transitions; at most one is allowed")]
    AmbiguousDefault { from: String, count: usize },
    #[error("unresolved schema reference '{0}'")]
    UnresolvedRef(String),
}
