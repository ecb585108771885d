pub mod builtins;
pub mod engine;
pub mod interpret;
pub mod parser;

pub use engine::{ComputedFieldEngine, ComputedResult};
pub use interpret::ExprFn;
pub use parser::{BinaryOp, Expr, UnaryOp, parse};
