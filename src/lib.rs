//! # Bulkflow
//!
//! Bounded-concurrency batch processing and a sequential workflow engine
//! for bulk data jobs.
//!
//! ## Features
//!
//! - **Batch processing**: [`BatchProcessor`] splits a list into fixed-size
//!   chunks and runs a fallible async operation on every item with at most
//!   `max_workers` in flight, retrying each item with a configurable [`Backoff`]
//! - **Fault containment**: an item that errors or panics is recorded as
//!   failed; it never aborts its chunk
//! - **Workflows**: [`Workflow`] runs [`Step`]s in order over a shared
//!   [`WorkflowContext`], with per-step skip logic, conditional branching
//!   and lifecycle hooks
//! - **Run records**: every run is saved through a [`RunStore`]
//!   (JSON files by default)
//!
//! ## Batch processing
//!
//! ```rust
//! use bulkflow::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let processor = BatchProcessor::builder(|order_id: u32| async move {
//!     if order_id % 5 == 0 {
//!         Err(format!("order {} is locked", order_id))
//!     } else {
//!         Ok(order_id * 10)
//!     }
//! })
//! .batch_size(4)
//! .max_workers(2)
//! .max_retries(2)
//! .retry_delay(Duration::ZERO)
//! .skip_if(|order_id| *order_id == 7)
//! .build()
//! .expect("valid config");
//!
//! let result = processor.process((1..=10).collect()).await;
//! assert_eq!(result.total, 10);
//! assert_eq!(result.succeeded, 7);
//! assert_eq!(result.failed, 2);
//! assert_eq!(result.skipped, 1);
//! # }
//! ```
//!
//! ## Workflows
//!
//! ```rust
//! use bulkflow::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let dir = tempfile::tempdir().expect("temp dir");
//!
//! let workflow = Workflow::new("nightly-sync")
//!     .state_dir(dir.path())
//!     .add_step(FunctionStep::new("load", |ctx| {
//!         Box::pin(async move {
//!             ctx.insert("rows", json!([3, 4]));
//!             Ok(json!({ "loaded": 2 }))
//!         })
//!     }))
//!     .add_step(ConditionalStep::new(
//!         "export",
//!         |ctx| ctx.get::<bool>("export").unwrap_or(false),
//!         FunctionStep::new("export-csv", |_ctx| Box::pin(async move { Ok(json!("ok")) })),
//!     ));
//!
//! let report = workflow.run(None).await.expect("state saved");
//! assert_eq!(report.status, WorkflowStatus::Completed);
//! assert_eq!(report.results["export"].status, StepStatus::Skipped);
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Failed items and steps are data, not errors. [`Workflow::run`] only
//! returns `Err` when the run record cannot be saved:
//!
//! ```rust
//! use bulkflow::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() {
//! # let workflow = Workflow::new("demo").store(std::sync::Arc::new(MemoryRunStore::new()));
//! match workflow.run(None).await {
//!     Ok(report) => {
//!         for error in &report.errors {
//!             eprintln!("{}", error);
//!         }
//!     }
//!     Err(WorkflowError::Persistence { workflow_id, source }) => {
//!         eprintln!("run {} not saved: {}", workflow_id, source);
//!     }
//!     Err(other) => eprintln!("Error: {}", other),
//! }
//! # }
//! ```

mod backoff;
mod batch;
mod context;
mod error;
mod hooks;
mod item;
mod status;
mod step;
mod store;
mod workflow;

pub mod prelude;

pub use backoff::{Backoff, BackoffError};
pub use batch::{batch_process, BatchConfig, BatchProcessor, BatchProcessorBuilder};
pub use context::{ContextKey, WorkflowContext};
pub use error::{HookType, WorkflowError};
pub use hooks::{HookEvent, HookPayload};
pub use item::{BatchResult, BatchSummary, ProcessedItem};
pub use status::{ItemStatus, StepStatus, WorkflowStatus};
pub use step::{ConditionalStep, FunctionStep, Step, StepName, StepResult};
pub use store::{FileRunStore, MemoryRunStore, RunRecord, RunStore, StepRecord, StoreError};
pub use workflow::{RunReport, Workflow};
