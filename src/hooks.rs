//! Workflow-level extension points.

use crate::context::WorkflowContext;
use crate::error::{panic_message, HookType, WorkflowError};
use crate::status::WorkflowStatus;
use crate::step::{StepName, StepResult};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// The four points at which a [`Workflow`](crate::Workflow) calls hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeRun,
    AfterRun,
    BeforeStep,
    AfterStep,
}

impl HookEvent {
    pub const ALL: [HookEvent; 4] = [
        HookEvent::BeforeRun,
        HookEvent::AfterRun,
        HookEvent::BeforeStep,
        HookEvent::AfterStep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeRun => "before_run",
            HookEvent::AfterRun => "after_run",
            HookEvent::BeforeStep => "before_step",
            HookEvent::AfterStep => "after_step",
        }
    }

    fn index(&self) -> usize {
        match self {
            HookEvent::BeforeRun => 0,
            HookEvent::AfterRun => 1,
            HookEvent::BeforeStep => 2,
            HookEvent::AfterStep => 3,
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| WorkflowError::UnknownHookEvent(s.to_string()))
    }
}

/// What a hook is told about the moment it is called for.
#[derive(Debug, Clone, Copy)]
pub enum HookPayload<'a> {
    BeforeRun,
    AfterRun {
        status: WorkflowStatus,
    },
    BeforeStep {
        step: &'a StepName,
    },
    AfterStep {
        step: &'a StepName,
        result: &'a StepResult,
    },
}

impl HookPayload<'_> {
    pub fn event(&self) -> HookEvent {
        match self {
            HookPayload::BeforeRun => HookEvent::BeforeRun,
            HookPayload::AfterRun { .. } => HookEvent::AfterRun,
            HookPayload::BeforeStep { .. } => HookEvent::BeforeStep,
            HookPayload::AfterStep { .. } => HookEvent::AfterStep,
        }
    }
}

type Hook =
    Arc<dyn Fn(&mut WorkflowContext, &HookPayload<'_>) -> Result<(), WorkflowError> + Send + Sync>;

/// Ordered callbacks per [`HookEvent`].
#[derive(Clone, Default)]
pub(crate) struct HookRegistry {
    hooks: [Vec<Hook>; 4],
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for event in HookEvent::ALL {
            map.entry(&event.as_str(), &self.count(event));
        }
        map.finish()
    }
}

impl HookRegistry {
    pub(crate) fn register<F>(&mut self, event: HookEvent, hook: F)
    where
        F: Fn(&mut WorkflowContext, &HookPayload<'_>) -> Result<(), WorkflowError>
            + Send
            + Sync
            + 'static,
    {
        self.hooks[event.index()].push(Arc::new(hook));
    }

    pub(crate) fn count(&self, event: HookEvent) -> usize {
        self.hooks[event.index()].len()
    }

    /// Calls every hook for the payload's event in registration order.
    /// Errors and panics are logged and do not stop later hooks.
    pub(crate) fn trigger(&self, ctx: &mut WorkflowContext, payload: HookPayload<'_>) {
        let event = payload.event();
        for hook in &self.hooks[event.index()] {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| hook(ctx, &payload)));
            let details = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            let error = WorkflowError::HookError {
                hook_type: HookType::Workflow(event),
                details,
            };
            warn!(workflow_id = %ctx.workflow_id(), "Hook error ({}): {}", event, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_event_names_round_trip() {
        for event in HookEvent::ALL {
            assert_eq!(event.as_str().parse::<HookEvent>().ok(), Some(event));
        }
        match "on_deploy".parse::<HookEvent>() {
            Err(WorkflowError::UnknownHookEvent(name)) => assert_eq!(name, "on_deploy"),
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn test_hooks_run_in_order_despite_faults() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::default();

        let log = Arc::clone(&calls);
        registry.register(HookEvent::BeforeRun, move |_, _| {
            log.lock().expect("lock").push("first");
            Err(WorkflowError::Configuration("bad hook".into()))
        });
        registry.register(HookEvent::BeforeRun, |_, _| panic!("hook panicked"));
        let log = Arc::clone(&calls);
        registry.register(HookEvent::BeforeRun, move |ctx, _| {
            log.lock().expect("lock").push("third");
            ctx.insert("touched", true);
            Ok(())
        });
        assert_eq!(registry.count(HookEvent::BeforeRun), 3);
        assert_eq!(registry.count(HookEvent::AfterRun), 0);

        let mut ctx = WorkflowContext::new("wf");
        registry.trigger(&mut ctx, HookPayload::BeforeRun);

        assert_eq!(*calls.lock().expect("lock"), vec!["first", "third"]);
        assert_eq!(ctx.get::<bool>("touched"), Some(true));
    }

    #[test]
    fn test_trigger_only_matching_event() {
        let mut registry = HookRegistry::default();
        registry.register(HookEvent::AfterStep, |ctx, payload| {
            if let HookPayload::AfterStep { step, result } = payload {
                ctx.insert(format!("seen_{}", step), result.status.as_str());
            }
            Ok(())
        });

        let mut ctx = WorkflowContext::new("wf");
        let name = StepName::new("load");
        registry.trigger(&mut ctx, HookPayload::BeforeStep { step: &name });
        assert!(!ctx.contains_key("seen_load"));

        let result = StepResult::success_empty();
        registry.trigger(
            &mut ctx,
            HookPayload::AfterStep {
                step: &name,
                result: &result,
            },
        );
        assert_eq!(ctx.get::<String>("seen_load").as_deref(), Some("success"));
    }
}
