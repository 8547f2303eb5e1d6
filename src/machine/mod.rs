// ABOUTME: Generic step-execution substrate for deployment state machines.
// ABOUTME: A declarative step table interpreted by a single engine with retries and tracing.

mod engine;
mod retry;
mod step;

pub use engine::{DefinitionError, ExecutionFailure, StateMachine, ran};
pub use retry::RetryPolicy;
pub use step::{Step, StepBody, StepContext, StepError, StepTask, TaskOutcome};
