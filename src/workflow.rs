use crate::context::WorkflowContext;
use crate::error::{panic_message, HookType, WorkflowError};
use crate::hooks::{HookEvent, HookPayload, HookRegistry};
use crate::item::elapsed_ms;
use crate::status::{StepStatus, WorkflowStatus};
use crate::step::{Step, StepName, StepResult};
use crate::store::{FileRunStore, RunRecord, RunStore, StepRecord};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Runs an ordered list of steps against one shared context.
///
/// Steps run strictly one after another. A failed step either aborts the run
/// (`fail_fast`) or is recorded and the run continues. Every run ends by
/// writing a [`RunRecord`] to the configured [`RunStore`].
///
/// # Examples
///
/// ```
/// use bulkflow::{FunctionStep, MemoryRunStore, Workflow, WorkflowStatus};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = Arc::new(MemoryRunStore::new());
/// let workflow = Workflow::new("demo")
///     .store(store.clone())
///     .add_step(FunctionStep::new("fetch", |ctx| {
///         Box::pin(async move {
///             ctx.insert("items", json!([1, 2, 3]));
///             Ok(json!({ "count": 3 }))
///         })
///     }))
///     .add_step(FunctionStep::new("sum", |ctx| {
///         Box::pin(async move {
///             let items: Vec<u32> = ctx.get("items").unwrap_or_default();
///             Ok(json!(items.iter().sum::<u32>()))
///         })
///     }));
///
/// let report = workflow.run(None).await.expect("state saved");
/// assert!(report.success);
/// assert_eq!(report.status, WorkflowStatus::Completed);
/// assert_eq!(report.results["sum"].data, Some(json!(6)));
/// assert_eq!(store.len(), 1);
/// # }
/// ```
pub struct Workflow {
    name: String,
    description: String,
    steps: Vec<Box<dyn Step>>,
    fail_fast: bool,
    store: Arc<dyn RunStore>,
    hooks: HookRegistry,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .field("fail_fast", &self.fail_fast)
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Outcome of [`Workflow::run`].
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// `true` for completed and partial runs.
    pub success: bool,
    pub status: WorkflowStatus,
    pub workflow_id: String,
    /// Per-step results in execution order.
    pub results: IndexMap<StepName, StepResult>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl Workflow {
    /// Creates an empty workflow that saves run state under
    /// `<temp_dir>/workflows`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            fail_fast: false,
            store: Arc::new(FileRunStore::default()),
            hooks: HookRegistry::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Abort the run at the first failed step.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Save run records as JSON files in `dir`.
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store = Arc::new(FileRunStore::new(dir));
        self
    }

    /// Uses a custom [`RunStore`] for run records
    pub fn store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = store;
        self
    }

    /// Appends a step. Steps run in the order they were added.
    pub fn add_step<S: Step + 'static>(mut self, step: S) -> Self {
        let name = step.name();
        if self.steps.iter().any(|s| s.name() == name) {
            warn!(
                "Workflow '{}' already has a step named '{}'; its result will be overwritten",
                self.name, name
            );
        }
        self.steps.push(Box::new(step));
        self
    }

    /// Registers a callback for `event`. Callbacks of one event run in
    /// registration order; a failing callback is logged and otherwise ignored.
    pub fn add_hook<F>(mut self, event: HookEvent, hook: F) -> Self
    where
        F: Fn(&mut WorkflowContext, &HookPayload<'_>) -> Result<(), WorkflowError>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.register(event, hook);
        self
    }

    /// Like [`add_hook`](Self::add_hook) with the event given by name,
    /// e.g. `"after_step"`.
    pub fn add_hook_named<F>(self, event: &str, hook: F) -> Result<Self, WorkflowError>
    where
        F: Fn(&mut WorkflowContext, &HookPayload<'_>) -> Result<(), WorkflowError>
            + Send
            + Sync
            + 'static,
    {
        let event = event.parse::<HookEvent>()?;
        Ok(self.add_hook(event, hook))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_fail_fast(&self) -> bool {
        self.fail_fast
    }

    pub fn step_names(&self) -> Vec<StepName> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    fn workflow_id(&self, started_at: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}",
            self.name,
            started_at.format("%Y%m%d-%H%M%S"),
            &suffix[..8]
        )
    }

    /// Executes every step and persists the run record.
    ///
    /// Step failures, faults and hook errors are all reported through the
    /// returned [`RunReport`]. The only error returned is
    /// [`WorkflowError::Persistence`], when the run record cannot be saved.
    pub async fn run(
        &self,
        initial_data: Option<HashMap<String, Value>>,
    ) -> Result<RunReport, WorkflowError> {
        let started_at = Utc::now();
        let workflow_id = self.workflow_id(started_at);
        let mut ctx = WorkflowContext::started(workflow_id.clone(), started_at);
        if let Some(data) = initial_data {
            ctx.extend(data);
        }

        info!(workflow_id = %workflow_id, "Starting workflow: {} [{}]", self.name, workflow_id);
        self.hooks.trigger(&mut ctx, HookPayload::BeforeRun);

        let started = Instant::now();
        let mut aborted = false;

        for step in &self.steps {
            let name = step.name();

            match std::panic::catch_unwind(AssertUnwindSafe(|| step.should_skip(&ctx))) {
                Ok(true) => {
                    info!(workflow_id = %workflow_id, "Step '{}' skipped", name);
                    ctx.record_step(name, StepResult::skipped());
                    continue;
                }
                Ok(false) => {}
                Err(panic) => {
                    let message = format!("skip condition {}", panic_message(panic.as_ref()));
                    ctx.add_error(format!("Step '{}' {}", name, message));
                    ctx.record_step(name.clone(), panic_result(message));
                    if self.fail_fast {
                        warn!(workflow_id = %workflow_id, "Fail-fast: aborting after step '{}'", name);
                        aborted = true;
                        break;
                    }
                    continue;
                }
            }

            info!(workflow_id = %workflow_id, "Step '{}' started", name);
            self.hooks
                .trigger(&mut ctx, HookPayload::BeforeStep { step: &name });

            let step_started = Instant::now();
            let (mut result, faulted) = match AssertUnwindSafe(step.execute(&mut ctx))
                .catch_unwind()
                .await
            {
                Ok(Ok(result)) => (result, false),
                Ok(Err(e)) => {
                    ctx.add_error(format!("Step '{}' raised an error: {}", name, e));
                    (fault_result(&e), true)
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    ctx.add_error(format!("Step '{}' {}", name, message));
                    (panic_result(message), true)
                }
            };
            result.duration_ms = elapsed_ms(step_started);

            match result.status {
                StepStatus::Success => info!(
                    workflow_id = %workflow_id,
                    "Step '{}' completed successfully ({}ms)", name, result.duration_ms
                ),
                StepStatus::Failed => warn!(
                    workflow_id = %workflow_id,
                    "Step '{}' failed: {}",
                    name,
                    result.error.as_deref().unwrap_or("no error message")
                ),
                other => info!(workflow_id = %workflow_id, "Step '{}' finished as {}", name, other),
            }
            self.notify_step(step.as_ref(), &mut ctx, &result).await;

            self.hooks.trigger(
                &mut ctx,
                HookPayload::AfterStep {
                    step: &name,
                    result: &result,
                },
            );

            let failed = result.is_failed();
            let error = result.error.clone();
            ctx.record_step(name.clone(), result);

            if self.fail_fast && failed {
                if !faulted {
                    ctx.add_error(format!(
                        "Step '{}' failed: {}",
                        name,
                        error.as_deref().unwrap_or("no error message")
                    ));
                }
                warn!(workflow_id = %workflow_id, "Fail-fast: aborting after step '{}'", name);
                aborted = true;
                break;
            }
        }

        let status = if aborted {
            WorkflowStatus::Failed
        } else {
            resolve_status(ctx.step_results().values())
        };

        let duration_ms = elapsed_ms(started);
        info!(
            workflow_id = %workflow_id,
            "Workflow {}: {} [{}] ({}ms)", status, self.name, workflow_id, duration_ms
        );

        let record = self.build_record(&ctx, status);
        self.store
            .save(&record)
            .await
            .map_err(|source| WorkflowError::Persistence {
                workflow_id: workflow_id.clone(),
                source,
            })?;

        self.hooks
            .trigger(&mut ctx, HookPayload::AfterRun { status });

        let errors = ctx.errors().to_vec();
        Ok(RunReport {
            success: status.is_success(),
            status,
            workflow_id,
            results: ctx.into_step_results(),
            errors,
            duration_ms,
        })
    }

    /// Calls the step's own success or failure callback, isolating faults.
    async fn notify_step(&self, step: &dyn Step, ctx: &mut WorkflowContext, result: &StepResult) {
        let (hook_type, call) = if result.is_success() {
            (HookType::OnSuccess, step.on_success(ctx, result))
        } else {
            (HookType::OnFailure, step.on_failure(ctx, result))
        };
        let details = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };
        let error = WorkflowError::HookError { hook_type, details };
        warn!("Error in {} handler of step '{}': {}", hook_type, step.name(), error);
    }

    fn build_record(&self, ctx: &WorkflowContext, status: WorkflowStatus) -> RunRecord {
        RunRecord {
            workflow_id: ctx.workflow_id().to_string(),
            workflow_name: self.name.clone(),
            status,
            started_at: ctx.started_at(),
            completed_at: Utc::now(),
            data: ctx.snapshot(),
            step_results: ctx
                .step_results()
                .iter()
                .map(|(name, result)| {
                    (
                        name.to_string(),
                        StepRecord {
                            status: result.status,
                            duration_ms: result.duration_ms,
                            error: result.error.clone(),
                        },
                    )
                })
                .collect(),
            errors: ctx.errors().to_vec(),
        }
    }
}

/// Terminal status of a run that was not aborted.
fn resolve_status<'a>(results: impl ExactSizeIterator<Item = &'a StepResult>) -> WorkflowStatus {
    let total = results.len();
    let failed = results.filter(|r| r.is_failed()).count();
    if failed == 0 {
        WorkflowStatus::Completed
    } else if failed < total {
        WorkflowStatus::Partial
    } else {
        WorkflowStatus::Failed
    }
}

fn fault_result(error: &WorkflowError) -> StepResult {
    let mut chain = Vec::new();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    StepResult::failed(error.to_string())
        .with_metadata("error_kind", error.kind())
        .with_metadata("debug", format!("{:?}", error))
        .with_metadata("source_chain", chain)
        .with_metadata("engine_backtrace", engine_backtrace())
}

fn panic_result(message: String) -> StepResult {
    StepResult::failed(message)
        .with_metadata("error_kind", "panic")
        .with_metadata("engine_backtrace", engine_backtrace())
}

/// Stack of the engine at the point the fault was handled, not of the step
/// itself. Empty unless `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE` is set.
fn engine_backtrace() -> String {
    let trace = Backtrace::capture();
    match trace.status() {
        BacktraceStatus::Captured => trace.to_string(),
        _ => String::new(),
    }
}
