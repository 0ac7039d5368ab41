//! Tasks: the catalogue, precondition validation, execution plans and the
//! orchestrator that runs them.

pub mod errors;
pub mod orchestrator;
pub mod preconditions;
pub mod procedures;
pub mod registry;
pub mod session;
pub mod types;

pub use errors::{ExportError, ResolveError, TaskError};
pub use orchestrator::{EmptyStepPolicy, Orchestrator};
pub use preconditions::{validate, Precondition, Validation};
pub use procedures::Procedure;
pub use registry::{TaskDescriptor, TaskKind};
pub use session::Conversation;
pub use types::{
    ExecutionContext, MissingCondition, ParamValue, ProgressSink, ResolvedParameters, TaskData,
    TaskResult,
};
