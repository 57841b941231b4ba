use crate::context::WorkflowContext;
use crate::error::WorkflowError;
use crate::status::StepStatus;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Type-safe step name wrapper.
///
/// # Examples
///
/// ```
/// use bulkflow::StepName;
///
/// let name = StepName::new("fetch-orders");
/// assert_eq!(name.as_str(), "fetch-orders");
///
/// let name: StepName = "push-stock".into();
/// assert_eq!(name.to_string(), "push-stock");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Outcome of one step.
///
/// `duration_ms` is filled in by the engine after `execute` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Free-form diagnostics, e.g. the error chain of a faulted step.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl StepResult {
    fn with_status(status: StepStatus) -> Self {
        Self {
            status,
            data: None,
            error: None,
            duration_ms: 0,
            metadata: HashMap::new(),
        }
    }

    /// Successful result carrying `data`
    pub fn success(data: impl Into<Value>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::with_status(StepStatus::Success)
        }
    }

    /// Successful result without data
    pub fn success_empty() -> Self {
        Self::with_status(StepStatus::Success)
    }

    /// Failed result with an error message
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(StepStatus::Failed)
        }
    }

    /// Result of a step that did not run
    pub fn skipped() -> Self {
        Self::with_status(StepStatus::Skipped)
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Attaches a diagnostic entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// A named unit of workflow logic.
///
/// Implement this trait for steps that need their own state or skip logic;
/// [`FunctionStep`] and [`ConditionalStep`] cover the common cases.
///
/// # Examples
///
/// ```
/// use bulkflow::{Step, StepName, StepResult, WorkflowContext, WorkflowError};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct ExportStep {
///     name: StepName,
/// }
///
/// #[async_trait]
/// impl Step for ExportStep {
///     fn name(&self) -> StepName {
///         self.name.clone()
///     }
///
///     async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, WorkflowError> {
///         match ctx.get::<Vec<u32>>("order_ids") {
///             Some(ids) => Ok(StepResult::success(ids.len())),
///             None => Ok(StepResult::failed("no orders loaded")),
///         }
///     }
///
///     fn should_skip(&self, ctx: &WorkflowContext) -> bool {
///         ctx.get::<bool>("export_disabled").unwrap_or(false)
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync {
    /// Name under which the result is recorded.
    fn name(&self) -> StepName;

    fn description(&self) -> &str {
        ""
    }

    /// Runs the step.
    ///
    /// Return `Ok` with a failed [`StepResult`] for an expected failure.
    /// An `Err` is treated as a fault: the engine records a failed result with
    /// diagnostic metadata and carries on according to its failure policy.
    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, WorkflowError>;

    /// When `true` the step is recorded as skipped and not executed.
    fn should_skip(&self, _ctx: &WorkflowContext) -> bool {
        false
    }

    /// Called after the step succeeded.
    async fn on_success(
        &self,
        _ctx: &mut WorkflowContext,
        _result: &StepResult,
    ) -> Result<(), WorkflowError> {
        Ok(())
    }

    /// Called after the step failed or faulted.
    async fn on_failure(
        &self,
        _ctx: &mut WorkflowContext,
        _result: &StepResult,
    ) -> Result<(), WorkflowError> {
        Ok(())
    }
}

type StepFn =
    dyn for<'a> Fn(&'a mut WorkflowContext) -> BoxFuture<'a, Result<Value, WorkflowError>>
        + Send
        + Sync;

/// Step backed by an async function.
///
/// The function's `Ok` value becomes the result data; an `Err` is a fault.
///
/// ```
/// use bulkflow::{FunctionStep, Step, WorkflowContext};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() {
/// let step = FunctionStep::new("fetch-orders", |ctx| {
///     Box::pin(async move {
///         ctx.insert("order_ids", json!([1, 2, 3]));
///         Ok(json!({ "count": 3 }))
///     })
/// })
/// .with_description("Fetch open orders");
///
/// let mut ctx = WorkflowContext::new("demo");
/// let result = step.execute(&mut ctx).await.expect("no fault");
/// assert!(result.is_success());
/// assert_eq!(result.data, Some(json!({ "count": 3 })));
/// # }
/// ```
pub struct FunctionStep {
    name: StepName,
    description: String,
    func: Box<StepFn>,
}

impl FunctionStep {
    /// Wraps an async closure as a step. The closure's output becomes the result data.
    pub fn new<F>(name: impl Into<StepName>, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut WorkflowContext) -> BoxFuture<'a, Result<Value, WorkflowError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            func: Box::new(func),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl fmt::Debug for FunctionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionStep")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[async_trait]
impl Step for FunctionStep {
    fn name(&self) -> StepName {
        self.name.clone()
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, WorkflowError> {
        let data = (self.func)(ctx).await?;
        Ok(StepResult::success(data))
    }
}

type Predicate = dyn Fn(&WorkflowContext) -> bool + Send + Sync;

/// Runs one of two branches depending on a predicate.
///
/// The predicate is evaluated once per execution. With a false predicate and
/// no `otherwise` branch the step reports skipped and touches nothing.
pub struct ConditionalStep {
    name: StepName,
    description: String,
    condition: Box<Predicate>,
    if_true: Box<dyn Step>,
    if_false: Option<Box<dyn Step>>,
}

impl ConditionalStep {
    /// Runs `if_true` when `condition` holds, otherwise reports skipped
    pub fn new<F, S>(name: impl Into<StepName>, condition: F, if_true: S) -> Self
    where
        F: Fn(&WorkflowContext) -> bool + Send + Sync + 'static,
        S: Step + 'static,
    {
        Self {
            name: name.into(),
            description: format!("Conditional: {}", if_true.name()),
            condition: Box::new(condition),
            if_true: Box::new(if_true),
            if_false: None,
        }
    }

    /// Branch executed when the predicate is false.
    pub fn otherwise<S: Step + 'static>(mut self, if_false: S) -> Self {
        self.if_false = Some(Box::new(if_false));
        self
    }
}

impl fmt::Debug for ConditionalStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalStep")
            .field("name", &self.name)
            .field("if_true", &self.if_true.name())
            .field("if_false", &self.if_false.as_ref().map(|s| s.name()))
            .finish()
    }
}

#[async_trait]
impl Step for ConditionalStep {
    fn name(&self) -> StepName {
        self.name.clone()
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, WorkflowError> {
        if (self.condition)(ctx) {
            self.if_true.execute(ctx).await
        } else if let Some(if_false) = &self.if_false {
            if_false.execute(ctx).await
        } else {
            Ok(StepResult::skipped())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn writer(name: &'static str, key: &'static str) -> FunctionStep {
        FunctionStep::new(name, move |ctx| {
            Box::pin(async move {
                ctx.insert(key, true);
                Ok(json!(key))
            })
        })
    }

    #[tokio::test]
    async fn test_function_step_success() {
        let step = writer("load", "loaded").with_description("Load data");
        let mut ctx = WorkflowContext::new("wf");

        let result = step.execute(&mut ctx).await.expect("no fault");
        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(result.data, Some(json!("loaded")));
        assert_eq!(ctx.get::<bool>("loaded"), Some(true));
        assert_eq!(step.name(), StepName::new("load"));
        assert_eq!(step.description(), "Load data");
    }

    #[tokio::test]
    async fn test_function_step_error_is_returned() {
        let step = FunctionStep::new("broken", |_ctx| {
            Box::pin(async move { Err(WorkflowError::step("broken", "remote said no")) })
        });
        let mut ctx = WorkflowContext::new("wf");
        let err = step.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Step failed: broken, details: remote said no");
    }

    #[tokio::test]
    async fn test_conditional_true_branch() {
        let step = ConditionalStep::new(
            "maybe",
            |ctx| ctx.get::<bool>("enabled").unwrap_or(false),
            writer("on", "took_true"),
        )
        .otherwise(writer("off", "took_false"));
        assert_eq!(step.description(), "Conditional: on");

        let mut ctx = WorkflowContext::new("wf");
        ctx.insert("enabled", true);
        let result = step.execute(&mut ctx).await.expect("no fault");
        assert_eq!(result.data, Some(json!("took_true")));
        assert!(ctx.contains_key("took_true"));
        assert!(!ctx.contains_key("took_false"));
    }

    #[tokio::test]
    async fn test_conditional_false_branch() {
        let step = ConditionalStep::new("maybe", |_| false, writer("on", "took_true"))
            .otherwise(writer("off", "took_false"));

        let mut ctx = WorkflowContext::new("wf");
        let result = step.execute(&mut ctx).await.expect("no fault");
        assert_eq!(result.data, Some(json!("took_false")));
        assert!(!ctx.contains_key("took_true"));
    }

    #[tokio::test]
    async fn test_conditional_without_else_skips_untouched() {
        let step = ConditionalStep::new("maybe", |_| false, writer("on", "took_true"));

        let mut ctx = WorkflowContext::new("wf");
        ctx.insert("existing", json!({"a": 1}));
        let before = ctx.snapshot();

        let result = step.execute(&mut ctx).await.expect("no fault");
        assert_eq!(result, StepResult::skipped());
        assert_eq!(ctx.snapshot(), before);
    }

    #[tokio::test]
    async fn test_conditional_predicate_evaluated_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let step = ConditionalStep::new(
            "maybe",
            move |_| counter.fetch_add(1, Ordering::SeqCst) == 0,
            writer("on", "took_true"),
        )
        .otherwise(writer("off", "took_false"));

        let mut ctx = WorkflowContext::new("wf");
        step.execute(&mut ctx).await.expect("no fault");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(ctx.contains_key("took_true"));
    }

    #[test]
    fn test_step_result_builders() {
        let result = StepResult::failed("nope").with_metadata("code", 42);
        assert!(result.is_failed());
        assert_eq!(result.error.as_deref(), Some("nope"));
        assert_eq!(result.metadata["code"], json!(42));

        let result = StepResult::success_empty().with_data(json!([1]));
        assert!(result.is_success());
        assert_eq!(result.data, Some(json!([1])));
    }
}
