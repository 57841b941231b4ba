use async_trait::async_trait;
use bulkflow::prelude::*;
use bulkflow::{RunRecord, StepRecord, StoreError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio_test::assert_ok;

/// Pushes every order through a batch processor and stores the summary.
#[derive(Debug)]
struct SyncOrders;

#[async_trait]
impl Step for SyncOrders {
    fn name(&self) -> StepName {
        StepName::new("sync_orders")
    }

    fn description(&self) -> &str {
        "Push orders to the upstream service"
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, WorkflowError> {
        let orders: Vec<u32> = ctx.get("orders").unwrap_or_default();

        let processor = BatchProcessor::builder(|id: u32| async move {
            if id == 13 {
                Err(format!("order {} rejected", id))
            } else {
                Ok(id * 2)
            }
        })
        .batch_size(3)
        .max_workers(2)
        .max_retries(2)
        .retry_delay(Duration::ZERO)
        .build()?;

        let result = processor.process(orders).await;
        ctx.insert("synced", result.succeeded);
        ctx.set("sync_summary", &result.summary())?;

        if result.failed > 0 {
            return Ok(StepResult::failed(format!("{} orders failed", result.failed))
                .with_metadata("errors", result.errors.clone()));
        }
        Ok(StepResult::success(json!({ "synced": result.succeeded })))
    }
}

fn load_orders(orders: Vec<u32>) -> FunctionStep {
    FunctionStep::new("load_orders", move |ctx| {
        let orders = orders.clone();
        Box::pin(async move {
            ctx.insert("orders", json!(orders));
            Ok(json!({ "count": orders.len() }))
        })
    })
    .with_description("Load pending orders")
}

fn initial(key: &str, value: Value) -> Option<HashMap<String, Value>> {
    Some(HashMap::from([(key.to_string(), value)]))
}

#[tokio::test]
async fn test_workflow_with_batch_step() {
    let store = Arc::new(MemoryRunStore::new());
    let workflow = Workflow::new("order-sync")
        .store(store.clone())
        .add_step(load_orders((1..=10).collect()))
        .add_step(SyncOrders);

    let report = workflow.run(None).await.expect("state saved");

    assert_eq!(report.status, WorkflowStatus::Completed);
    assert_eq!(report.results["load_orders"].data, Some(json!({ "count": 10 })));
    assert_eq!(report.results["sync_orders"].data, Some(json!({ "synced": 10 })));

    let record = assert_ok!(store.load(&report.workflow_id).await);
    assert_eq!(record.data["synced"], "10");
    assert!(record.data["sync_summary"].contains("\"success_rate\":\"100.0%\""));
}

#[tokio::test]
async fn test_failed_items_make_step_fail_and_run_partial() {
    let store = Arc::new(MemoryRunStore::new());
    let workflow = Workflow::new("order-sync")
        .store(store.clone())
        .add_step(load_orders(vec![11, 12, 13, 14]))
        .add_step(SyncOrders);

    let report = workflow.run(None).await.expect("state saved");

    assert_eq!(report.status, WorkflowStatus::Partial);
    assert!(report.success);
    let sync = &report.results["sync_orders"];
    assert_eq!(sync.error.as_deref(), Some("1 orders failed"));
    assert_eq!(
        sync.metadata["errors"],
        json!(["Item failed: order 13 rejected"])
    );
}

#[tokio::test]
async fn test_fail_fast_skips_remaining_steps() {
    let store = Arc::new(MemoryRunStore::new());
    let reached = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&reached);

    let workflow = Workflow::new("order-sync")
        .store(store.clone())
        .fail_fast(true)
        .add_step(load_orders(vec![13]))
        .add_step(SyncOrders)
        .add_step(FunctionStep::new("notify", move |_ctx| {
            *flag.lock().expect("lock") = true;
            Box::pin(async move { Ok(Value::Null) })
        }));

    let report = workflow.run(None).await.expect("state saved");

    assert_eq!(report.status, WorkflowStatus::Failed);
    assert!(!report.success);
    assert!(!*reached.lock().expect("lock"));
    assert_eq!(report.results.len(), 2);
    assert!(report.results["sync_orders"].is_failed());
    assert!(report.errors[0].contains("Step 'sync_orders' failed: 1 orders failed"));
}

#[tokio::test]
async fn test_conditional_branches_follow_context() {
    let store = Arc::new(MemoryRunStore::new());
    let workflow = Workflow::new("export")
        .store(store.clone())
        .add_step(
            ConditionalStep::new(
                "export",
                |ctx| ctx.get::<String>("format").as_deref() == Some("csv"),
                FunctionStep::new("csv", |ctx| {
                    Box::pin(async move {
                        ctx.insert("exported_as", "csv");
                        Ok(json!("csv"))
                    })
                }),
            )
            .otherwise(FunctionStep::new("json", |ctx| {
                Box::pin(async move {
                    ctx.insert("exported_as", "json");
                    Ok(json!("json"))
                })
            })),
        )
        .add_step(ConditionalStep::new(
            "archive",
            |ctx| ctx.contains_key("archive"),
            FunctionStep::new("archive_files", |ctx| {
                Box::pin(async move {
                    ctx.insert("archived", true);
                    Ok(Value::Null)
                })
            }),
        ));

    let csv = workflow
        .run(initial("format", json!("csv")))
        .await
        .expect("state saved");
    assert_eq!(csv.results["export"].data, Some(json!("csv")));
    assert_eq!(csv.results["archive"].status, StepStatus::Skipped);
    assert_eq!(csv.status, WorkflowStatus::Completed);

    let other = workflow
        .run(initial("format", json!("xml")))
        .await
        .expect("state saved");
    assert_eq!(other.results["export"].data, Some(json!("json")));

    let record = assert_ok!(store.load(&csv.workflow_id).await);
    assert_eq!(record.data["exported_as"], "csv");
    assert!(!record.data.contains_key("archived"));
    assert_eq!(record.step_results["archive"].status, StepStatus::Skipped);
}

#[tokio::test]
async fn test_file_store_record_layout() {
    let dir = tempdir().expect("temp dir");
    let workflow = Workflow::new("order-sync")
        .state_dir(dir.path().join("runs"))
        .add_step(load_orders(vec![1, 13]))
        .add_step(SyncOrders);

    let report = workflow
        .run(initial("batch", json!("nightly")))
        .await
        .expect("state saved");

    let path = dir
        .path()
        .join("runs")
        .join(format!("{}.json", report.workflow_id));
    let raw: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("record written"))
            .expect("valid json");

    assert_eq!(raw["workflow_id"], json!(report.workflow_id));
    assert_eq!(raw["workflow_name"], "order-sync");
    assert_eq!(raw["status"], "partial");
    assert_eq!(raw["data"]["batch"], "nightly");
    assert_eq!(raw["data"]["orders"], "[1,13]");
    assert_eq!(raw["step_results"]["load_orders"]["status"], "success");
    assert_eq!(raw["step_results"]["sync_orders"]["status"], "failed");
    assert_eq!(raw["step_results"]["sync_orders"]["error"], "1 orders failed");
    assert!(raw["started_at"].is_string());
    assert!(raw["completed_at"].is_string());

    let keys: Vec<_> = raw["step_results"]
        .as_object()
        .expect("object")
        .keys()
        .cloned()
        .collect();
    assert_eq!(keys.len(), 2);

    let loaded = assert_ok!(FileRunStore::new(dir.path().join("runs"))
        .load(&report.workflow_id)
        .await);
    assert_eq!(loaded.status, WorkflowStatus::Partial);
    assert!(loaded.started_at <= loaded.completed_at);
}

#[tokio::test]
async fn test_run_records_are_independent() {
    let dir = tempdir().expect("temp dir");
    let workflow = Workflow::new("order-sync")
        .state_dir(dir.path())
        .add_step(load_orders(vec![1]));

    let first = workflow.run(initial("run", json!(1))).await.expect("state saved");
    let second = workflow.run(initial("run", json!(2))).await.expect("state saved");
    assert_ne!(first.workflow_id, second.workflow_id);

    let store = FileRunStore::new(dir.path());
    let first = assert_ok!(store.load(&first.workflow_id).await);
    let second = assert_ok!(store.load(&second.workflow_id).await);
    assert_eq!(first.data["run"], "1");
    assert_eq!(second.data["run"], "2");
}

#[tokio::test]
async fn test_workflow_name_with_path_separator_is_saved_in_state_dir() {
    let dir = tempdir().expect("temp dir");
    let workflow = Workflow::new("orders/eu")
        .state_dir(dir.path().join("runs"))
        .add_step(load_orders(vec![1]));

    let report = workflow.run(None).await.expect("state saved");
    assert!(report.workflow_id.starts_with("orders/eu-"));

    let files: Vec<_> = std::fs::read_dir(dir.path().join("runs"))
        .expect("state dir created")
        .map(|entry| entry.expect("dir entry").file_name())
        .collect();
    assert_eq!(files.len(), 1);

    let store = FileRunStore::new(dir.path().join("runs"));
    let record = assert_ok!(store.load(&report.workflow_id).await);
    assert_eq!(record.workflow_name, "orders/eu");
}

#[tokio::test]
async fn test_hooks_can_annotate_context() {
    let store = Arc::new(MemoryRunStore::new());
    let workflow = Workflow::new("audited")
        .store(store.clone())
        .add_step(load_orders(vec![1, 2]))
        .add_hook(HookEvent::AfterStep, |ctx, payload| {
            if let HookPayload::AfterStep { step, result } = payload {
                ctx.insert(format!("audit_{}", step), result.status.as_str());
            }
            Ok(())
        })
        .add_hook_named("before_run", |ctx, _| {
            ctx.insert("operator", "cron");
            Ok(())
        })
        .expect("known event");

    let report = workflow.run(None).await.expect("state saved");
    let record = assert_ok!(store.load(&report.workflow_id).await);
    assert_eq!(record.data["audit_load_orders"], "success");
    assert_eq!(record.data["operator"], "cron");
}

struct ReadOnlyStore;

#[async_trait]
impl RunStore for ReadOnlyStore {
    async fn save(&self, _record: &RunRecord) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only",
        )))
    }

    async fn load(&self, workflow_id: &str) -> Result<RunRecord, StoreError> {
        Err(StoreError::NotFound(workflow_id.to_string()))
    }
}

#[tokio::test]
async fn test_persistence_failure_is_returned() {
    let workflow = Workflow::new("order-sync")
        .store(Arc::new(ReadOnlyStore))
        .add_step(load_orders(vec![1]));

    let error = workflow.run(None).await.expect_err("store is read-only");
    assert!(matches!(error, WorkflowError::Persistence { .. }));
    assert_eq!(error.kind(), "persistence");
    assert!(error.to_string().contains("read-only"));
}

#[test]
fn test_step_record_shape() {
    let record = StepRecord {
        status: StepStatus::Failed,
        duration_ms: 5,
        error: Some("boom".to_string()),
    };
    assert_eq!(
        serde_json::to_value(&record).expect("serializable"),
        json!({ "status": "failed", "duration_ms": 5, "error": "boom" })
    );
}
