pub mod computed;
pub mod form;
pub mod transition;

pub use computed::ComputedField;
pub use form::{FieldEntry, FieldSpec, FormSchema, FormStep};
pub use transition::{StepTransition, TransitionHistoryEntry, TransitionKind};
