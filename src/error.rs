use crate::hooks::HookEvent;
use crate::step::StepName;
use crate::store::StoreError;
use thiserror::Error;

/// The step-level callback that failed.
///
/// Used in [`WorkflowError::HookError`] to identify which callback caused the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    /// The step's `on_success` callback.
    OnSuccess,
    /// The step's `on_failure` callback.
    OnFailure,
    /// A callback registered on the workflow for the given event.
    Workflow(HookEvent),
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookType::OnSuccess => write!(f, "on_success"),
            HookType::OnFailure => write!(f, "on_failure"),
            HookType::Workflow(event) => write!(f, "{}", event),
        }
    }
}

/// Errors produced while configuring or running a workflow.
///
/// Step bodies return this type to signal a fault. The engine never lets a
/// step fault escape [`Workflow::run`](crate::Workflow::run): it is turned
/// into a failed [`StepResult`](crate::StepResult). Only
/// [`WorkflowError::Persistence`] is returned to the caller of `run`.
///
/// ```
/// use bulkflow::{WorkflowError, StepName};
///
/// fn describe(error: &WorkflowError) -> String {
///     match error {
///         WorkflowError::StepError { step_name, details } => {
///             format!("step {} failed: {}", step_name, details)
///         }
///         WorkflowError::Persistence { workflow_id, .. } => {
///             format!("run {} could not be saved", workflow_id)
///         }
///         other => other.to_string(),
///     }
/// }
///
/// let error = WorkflowError::StepError {
///     step_name: StepName::new("fetch-orders"),
///     details: "connection reset".to_string(),
/// };
/// assert_eq!(describe(&error), "step fetch-orders failed: connection reset");
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A step failed during execution.
    #[error("Step failed: {step_name}, details: {details}")]
    StepError {
        /// The name of the step that failed
        step_name: StepName,
        /// Details about the failure
        details: String,
    },

    /// The workflow or batch configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A lifecycle callback failed.
    #[error("Hook '{hook_type}' failed: {details}")]
    HookError {
        /// Which callback failed
        hook_type: HookType,
        /// Details about the failure
        details: String,
    },

    /// A hook was registered under a name that is not a known event.
    #[error("Unknown hook event: {0}")]
    UnknownHookEvent(String),

    /// A context value could not be converted to or from JSON.
    #[error("Context value error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run-state record could not be written.
    #[error("Failed to persist state of run '{workflow_id}': {source}")]
    Persistence {
        /// The run whose record was lost
        workflow_id: String,
        #[source]
        source: StoreError,
    },
}

impl WorkflowError {
    /// Shorthand for [`WorkflowError::StepError`].
    pub fn step(step_name: impl Into<StepName>, details: impl Into<String>) -> Self {
        WorkflowError::StepError {
            step_name: step_name.into(),
            details: details.into(),
        }
    }

    /// Short variant label used in diagnostic metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::StepError { .. } => "step_error",
            WorkflowError::Configuration(_) => "configuration",
            WorkflowError::HookError { .. } => "hook_error",
            WorkflowError::UnknownHookEvent(_) => "unknown_hook_event",
            WorkflowError::Serialization(_) => "serialization",
            WorkflowError::Persistence { .. } => "persistence",
        }
    }
}

/// Extracts the message of a caught panic.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "panicked: boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "panicked: bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(
            panic_message(payload.as_ref()),
            "panicked with a non-string payload"
        );
    }

    #[test]
    fn test_error_display() {
        let error = WorkflowError::step("test_step", "test error");
        assert_eq!(
            error.to_string(),
            "Step failed: test_step, details: test error"
        );

        let error = WorkflowError::Configuration("batch_size must be at least 1".into());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: batch_size must be at least 1"
        );
    }

    #[test]
    fn test_hook_error_display() {
        let error = WorkflowError::HookError {
            hook_type: HookType::OnSuccess,
            details: "hook failed".to_string(),
        };
        assert_eq!(error.to_string(), "Hook 'on_success' failed: hook failed");

        let error = WorkflowError::HookError {
            hook_type: HookType::Workflow(HookEvent::AfterStep),
            details: "notifier offline".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Hook 'after_step' failed: notifier offline"
        );
    }

    #[test]
    fn test_persistence_error_keeps_source() {
        let error = WorkflowError::Persistence {
            workflow_id: "sync-20240101-000000-abcd1234".to_string(),
            source: StoreError::NotFound("x".to_string()),
        };
        assert!(std::error::Error::source(&error).is_some());
        assert_eq!(error.kind(), "persistence");
    }
}
