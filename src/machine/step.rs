// ABOUTME: Step definitions for the state machine: bodies, edges, and the task trait.
// ABOUTME: Steps are data; all interpretation lives in the engine.

use async_trait::async_trait;
use std::time::Duration;

use super::retry::RetryPolicy;

/// Error classification the engine consults to decide retry-vs-route.
///
/// Handlers return typed errors and never make flow-control decisions; the
/// engine is the only place a retry or a failure edge is chosen.
pub trait StepError: std::error::Error + Send + Sync + 'static {
    /// Whether the engine may re-run the failed step under its retry budget.
    fn retryable(&self) -> bool;

    /// Stable class name surfaced in step output (e.g. `"Timeout"`).
    fn class(&self) -> &'static str;
}

/// Per-execution state threaded through every step.
pub trait StepContext: Send {
    /// Detail payload recorded after successful steps and embedded in the
    /// terminal success output.
    fn report(&self) -> serde_json::Value;
}

/// What a task handler decided about where execution goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Follow the step's success edge.
    Advance,
    /// Follow the step's repeat edge (polling loops).
    Repeat,
}

/// A task step's handler.
#[async_trait]
pub trait StepTask<C, E>: Send + Sync {
    async fn run(&self, ctx: &mut C) -> Result<TaskOutcome, E>;
}

/// What a step does when entered.
pub enum StepBody<C, E> {
    /// Run a handler; outcome and errors route through the step's edges.
    Task(Box<dyn StepTask<C, E>>),
    /// Pause for a context-derived duration, then follow the success edge.
    /// No handler runs, so the trace shows only the step name.
    Wait(fn(&C) -> Duration),
    /// Terminal: execution succeeded.
    Success,
    /// Terminal: execution failed; the step name becomes the output's `Error`.
    Failure,
}

/// One named node of the machine's step table.
pub struct Step<C, E> {
    pub name: &'static str,
    pub body: StepBody<C, E>,
    /// Success edge. Required for task and wait steps.
    pub next: Option<&'static str>,
    /// Failure edge. Required for task steps.
    pub catch: Option<&'static str>,
    /// Where `TaskOutcome::Repeat` goes. Only meaningful for task steps.
    pub repeat: Option<&'static str>,
    pub retry: RetryPolicy,
}

impl<C, E> Step<C, E> {
    pub fn task(
        name: &'static str,
        task: impl StepTask<C, E> + 'static,
        next: &'static str,
        catch: &'static str,
    ) -> Self {
        Self {
            name,
            body: StepBody::Task(Box::new(task)),
            next: Some(next),
            catch: Some(catch),
            repeat: None,
            retry: RetryPolicy::none(),
        }
    }

    pub fn wait(name: &'static str, delay: fn(&C) -> Duration, next: &'static str) -> Self {
        Self {
            name,
            body: StepBody::Wait(delay),
            next: Some(next),
            catch: None,
            repeat: None,
            retry: RetryPolicy::none(),
        }
    }

    pub fn success(name: &'static str) -> Self {
        Self {
            name,
            body: StepBody::Success,
            next: None,
            catch: None,
            repeat: None,
            retry: RetryPolicy::none(),
        }
    }

    pub fn failure(name: &'static str) -> Self {
        Self {
            name,
            body: StepBody::Failure,
            next: None,
            catch: None,
            repeat: None,
            retry: RetryPolicy::none(),
        }
    }

    pub fn repeats_to(mut self, target: &'static str) -> Self {
        self.repeat = Some(target);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
