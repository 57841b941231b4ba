//! Commonly used types and traits

pub use crate::backoff::Backoff;
pub use crate::batch::{BatchConfig, BatchProcessor};
pub use crate::context::WorkflowContext;
pub use crate::error::WorkflowError;
pub use crate::hooks::{HookEvent, HookPayload};
pub use crate::item::{BatchResult, ProcessedItem};
pub use crate::status::{ItemStatus, StepStatus, WorkflowStatus};
pub use crate::step::{ConditionalStep, FunctionStep, Step, StepName, StepResult};
pub use crate::store::{FileRunStore, MemoryRunStore, RunStore};
pub use crate::workflow::{RunReport, Workflow};
