use async_trait::async_trait;
use bulkflow::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    id: u32,
    customer: String,
    total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Receipt {
    order_id: u32,
    reference: String,
}

// Stands in for an HTTP call that occasionally fails.
async fn push_order(order: Order) -> Result<Receipt, String> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    if order.total > 900.0 {
        return Err(format!("order {} exceeds the credit limit", order.id));
    }
    Ok(Receipt {
        order_id: order.id,
        reference: format!("UP-{:05}", order.id),
    })
}

// Step 1: load pending orders
fn load_orders() -> FunctionStep {
    FunctionStep::new("load_orders", |ctx| {
        Box::pin(async move {
            let count: u32 = ctx.get("order_count").unwrap_or(25);
            let orders: Vec<Order> = (1..=count)
                .map(|id| Order {
                    id,
                    customer: format!("CUST-{:03}", id % 7),
                    total: f64::from(id * 37 % 1000),
                })
                .collect();
            println!("Loaded {} pending orders", orders.len());
            ctx.set("orders", &orders)?;
            Ok(json!({ "count": orders.len() }))
        })
    })
    .with_description("Read pending orders")
}

// Step 2: push every order upstream in parallel
#[derive(Debug)]
struct PushOrdersStep {
    config: BatchConfig,
}

#[async_trait]
impl Step for PushOrdersStep {
    fn name(&self) -> StepName {
        StepName::new("push_orders")
    }

    fn description(&self) -> &str {
        "Push orders to the upstream service"
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<StepResult, WorkflowError> {
        let orders: Vec<Order> = ctx.get("orders").ok_or_else(|| WorkflowError::StepError {
            step_name: self.name(),
            details: "Order data not found".to_string(),
        })?;

        let processor = BatchProcessor::builder(push_order)
            .config(self.config.clone())
            .skip_if(|order: &Order| order.total == 0.0)
            .on_batch_complete(|batch, total, size| {
                println!("  batch {}/{} done ({} orders)", batch, total, size);
            })
            .build()?;

        let result = processor
            .process_with_progress(orders, |done, total| {
                if done % 10 == 0 || done == total {
                    println!("  {}/{} orders pushed", done, total);
                }
            })
            .await;

        let receipts: Vec<&Receipt> = result.results().collect();
        ctx.set("receipts", &receipts)?;
        let summary = result.summary();
        ctx.set("push_summary", &summary)?;

        if result.failed > 0 {
            return Ok(StepResult::failed(format!(
                "{} of {} orders failed",
                result.failed, result.total
            ))
            .with_data(json!(summary)));
        }
        Ok(StepResult::success(json!(summary)))
    }

    async fn on_failure(
        &self,
        ctx: &mut WorkflowContext,
        result: &StepResult,
    ) -> Result<(), WorkflowError> {
        println!(
            "Push incomplete: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        ctx.insert("needs_review", true);
        Ok(())
    }
}

// Step 3: notify only when something needs a human
fn notify_review() -> ConditionalStep {
    ConditionalStep::new(
        "notify_review",
        |ctx| ctx.get::<bool>("needs_review").unwrap_or(false),
        FunctionStep::new("send_review_email", |ctx| {
            Box::pin(async move {
                println!("Emailing operations about orders needing review");
                ctx.insert("review_email_sent", true);
                Ok(json!({ "recipients": ["ops@example.com"] }))
            })
        }),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = BatchConfig {
        batch_size: 10,
        max_workers: 4,
        max_retries: 2,
        backoff: Backoff::linear(Duration::from_millis(50)),
    };

    let workflow = Workflow::new("order-sync")
        .with_description("Nightly upstream order sync")
        .state_dir(std::env::temp_dir().join("bulkflow-demo"))
        .add_step(load_orders())
        .add_step(PushOrdersStep { config })
        .add_step(notify_review())
        .add_hook(HookEvent::AfterStep, |_ctx, payload| {
            if let HookPayload::AfterStep { step, result } = payload {
                println!("[{}] {} ({}ms)", result.status, step, result.duration_ms);
            }
            Ok(())
        });

    let report = workflow
        .run(Some(HashMap::from([(
            "order_count".to_string(),
            json!(40),
        )])))
        .await?;

    println!("\nWorkflow {} finished: {}", report.workflow_id, report.status);
    for (name, result) in &report.results {
        println!("  {:<16} {}", name.as_str(), result.status);
    }
    for error in &report.errors {
        println!("  error: {}", error);
    }

    Ok(())
}
