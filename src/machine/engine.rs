// ABOUTME: The state machine interpreter: runs steps, routes on results, records the trace.
// ABOUTME: Generic over context and error; knows nothing about deployment semantics.

use serde_json::{Map, Value};
use thiserror::Error;

use super::retry::RetryPolicy;
use super::step::{Step, StepBody, StepContext, StepError, TaskOutcome};

/// Trace marker appended when a task step's handler actually ran, as opposed
/// to the bare step-name entry recorded on entering any step. Wait-only and
/// terminal steps never get one.
pub fn ran(step: &str) -> String {
    format!("{step}/run")
}

/// Step-table problems caught when the machine is built, not when it runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("start step '{0}' is not defined")]
    UnknownStart(&'static str),

    #[error("step '{step}' routes to undefined step '{target}'")]
    UnknownEdge {
        step: &'static str,
        target: &'static str,
    },

    #[error("task step '{0}' must define success and failure edges")]
    MissingEdges(&'static str),

    #[error("wait step '{0}' must define a success edge")]
    MissingNext(&'static str),

    #[error("duplicate step name '{0}'")]
    Duplicate(&'static str),
}

/// A finished execution that ended in a failure terminal.
///
/// `output` always carries an `Error` key naming the terminal state, plus the
/// class and cause of the step failure that routed execution there.
#[derive(Debug, Error)]
#[error("execution ended in {state}: {cause}")]
pub struct ExecutionFailure {
    pub state: String,
    pub cause: String,
    pub output: Map<String, Value>,
}

/// Interprets a step table over a per-execution context.
///
/// The engine owns all flow control: edge selection, retry budgets, backoff,
/// and the execution trace. Step handlers only return typed results.
pub struct StateMachine<C, E> {
    steps: Vec<Step<C, E>>,
    start: &'static str,
    path: Vec<String>,
    last_output: String,
}

impl<C, E> std::fmt::Debug for StateMachine<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("steps", &self.steps.len())
            .field("start", &self.start)
            .field("path", &self.path)
            .field("last_output", &self.last_output)
            .finish()
    }
}

impl<C: StepContext, E: StepError> StateMachine<C, E> {
    pub fn new(start: &'static str, steps: Vec<Step<C, E>>) -> Result<Self, DefinitionError> {
        let mut seen = std::collections::HashSet::new();
        for step in &steps {
            if !seen.insert(step.name) {
                return Err(DefinitionError::Duplicate(step.name));
            }
        }

        let defined = |name: &str| steps.iter().any(|s| s.name == name);
        if !defined(start) {
            return Err(DefinitionError::UnknownStart(start));
        }

        for step in &steps {
            match &step.body {
                StepBody::Task(_) => {
                    let (Some(next), Some(catch)) = (step.next, step.catch) else {
                        return Err(DefinitionError::MissingEdges(step.name));
                    };
                    for target in [Some(next), Some(catch), step.repeat].into_iter().flatten() {
                        if !defined(target) {
                            return Err(DefinitionError::UnknownEdge {
                                step: step.name,
                                target,
                            });
                        }
                    }
                }
                StepBody::Wait(_) => {
                    let Some(next) = step.next else {
                        return Err(DefinitionError::MissingNext(step.name));
                    };
                    if !defined(next) {
                        return Err(DefinitionError::UnknownEdge {
                            step: step.name,
                            target: next,
                        });
                    }
                }
                StepBody::Success | StepBody::Failure => {}
            }
        }

        Ok(Self {
            steps,
            start,
            path: Vec::new(),
            last_output: String::new(),
        })
    }

    /// Run the machine over a fresh context until a terminal step.
    pub async fn execute(&mut self, mut ctx: C) -> Result<Map<String, Value>, ExecutionFailure> {
        let Self {
            steps,
            start,
            path,
            last_output,
        } = self;
        let steps = &*steps;

        path.clear();
        last_output.clear();

        let mut current: &str = *start;
        // Class and cause of the first step failure. Later failures on the
        // failure branch are logged but the root cause stays the output.
        let mut failure: Option<(String, String)> = None;

        loop {
            let step = steps
                .iter()
                .find(|s| s.name == current)
                .expect("edges are validated at construction");
            path.push(step.name.to_string());

            match &step.body {
                StepBody::Success => {
                    let mut output = object(ctx.report());
                    output.insert("success".to_string(), Value::Bool(true));
                    *last_output = Value::Object(output.clone()).to_string();
                    return Ok(output);
                }
                StepBody::Failure => {
                    let (class, cause) = failure.take().unwrap_or_else(|| {
                        ("Unknown".to_string(), "no failing step recorded".to_string())
                    });
                    let mut output = Map::new();
                    output.insert("Error".to_string(), Value::String(step.name.to_string()));
                    output.insert("Class".to_string(), Value::String(class));
                    output.insert("Cause".to_string(), Value::String(cause.clone()));
                    output.insert("success".to_string(), Value::Bool(false));
                    return Err(ExecutionFailure {
                        state: step.name.to_string(),
                        cause,
                        output,
                    });
                }
                StepBody::Wait(delay) => {
                    tokio::time::sleep(delay(&ctx)).await;
                    current = step.next.expect("edges are validated at construction");
                }
                StepBody::Task(task) => {
                    path.push(ran(step.name));
                    let result = run_with_retries(task.as_ref(), &mut ctx, step.name, step.retry).await;
                    match result {
                        Ok(TaskOutcome::Advance) => {
                            if failure.is_none() {
                                *last_output = ctx.report().to_string();
                            }
                            current = step.next.expect("edges are validated at construction");
                        }
                        Ok(TaskOutcome::Repeat) => {
                            if failure.is_none() {
                                *last_output = ctx.report().to_string();
                            }
                            current = step
                                .repeat
                                .expect("step returned Repeat without a repeat edge");
                        }
                        Err(e) => {
                            if failure.is_none() {
                                *last_output = serde_json::json!({
                                    "Class": e.class(),
                                    "Cause": e.to_string(),
                                    "success": false,
                                })
                                .to_string();
                                failure = Some((e.class().to_string(), e.to_string()));
                            } else {
                                tracing::warn!(step = step.name, error = %e, "failure-path step failed");
                            }
                            current = step.catch.expect("edges are validated at construction");
                        }
                    }
                }
            }
        }
    }

    /// Ordered record of every step entered (and `{name}/run` markers for
    /// steps whose handler ran) during the most recent execution.
    pub fn execution_path(&self) -> &[String] {
        &self.path
    }

    /// JSON string of the most recent meaningful step output. On the failure
    /// branch this stays the failing step's output all the way to the
    /// terminal.
    pub fn last_output(&self) -> &str {
        &self.last_output
    }
}

async fn run_with_retries<C, E: StepError>(
    task: &dyn super::step::StepTask<C, E>,
    ctx: &mut C,
    name: &str,
    retry: RetryPolicy,
) -> Result<TaskOutcome, E> {
    let mut attempt = 1u32;
    loop {
        match task.run(ctx).await {
            Err(e) if e.retryable() && attempt < retry.max_attempts => {
                tracing::warn!(
                    step = name,
                    attempt,
                    error = %e,
                    "retryable step failure, backing off"
                );
                tokio::time::sleep(retry.delay(attempt)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("report".to_string(), other);
            map
        }
    }
}
