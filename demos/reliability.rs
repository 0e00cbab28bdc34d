//! Reliability features example
//!
//! This example demonstrates:
//! - Retry with exponential backoff
//! - Per-job execution timeouts
//! - Permanent failure after exhausting attempts
//! - Graceful shutdown that drains in-flight work

use async_trait::async_trait;
use jobmill::{
    Backoff, JobContext, JobError, JobOptions, Processor, QueueConfig, QueueManagerBuilder,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A processor that fails a few times before succeeding
struct FlakyProcessor {
    attempts: Arc<AtomicU32>,
    failures_before_success: u32,
}

#[async_trait]
impl Processor for FlakyProcessor {
    async fn process(&self, job: JobContext) -> Result<serde_json::Value, JobError> {
        match job.name.as_str() {
            "flaky" => {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                println!("  [{}] attempt {}", job.name, attempt + 1);

                if attempt < self.failures_before_success {
                    return Err(JobError::new(format!(
                        "temporary failure (attempt {})",
                        attempt + 1
                    )));
                }
                Ok(serde_json::json!({"attempts": attempt + 1, "status": "success"}))
            }
            "slow" => {
                // Sleeps longer than its timeout allows
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(serde_json::json!(null))
            }
            "doomed" => Err(JobError::new("this job never succeeds")),
            other => Err(JobError::new(format!("unknown job '{}'", other))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== Jobmill: Reliability Features Example ===\n");

    let attempts = Arc::new(AtomicU32::new(0));
    let manager = QueueManagerBuilder::new()
        .with_queue(
            "work",
            QueueConfig::new(2)
                .with_attempts(5)
                .with_backoff(Backoff::exponential(Duration::from_millis(100))),
        )
        .build();

    manager.register_processor(
        "work",
        Arc::new(FlakyProcessor {
            attempts: Arc::clone(&attempts),
            failures_before_success: 2,
        }),
    )?;
    manager.initialize().await?;
    println!("✓ Queue manager initialized\n");

    // Example 1: retry until success
    println!("=== Example 1: Retry with Backoff ===");
    manager
        .add_job("work", "flaky", serde_json::json!({}), JobOptions::default())
        .await?;

    loop {
        let stats = manager.get_queue_stats("work").await?;
        if stats.completed >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!(
        "✓ Flaky job completed after {} attempts\n",
        attempts.load(Ordering::SeqCst)
    );

    // Example 2: execution timeout
    println!("=== Example 2: Execution Timeout ===");
    manager
        .add_job(
            "work",
            "slow",
            serde_json::json!({}),
            JobOptions::new()
                .with_attempts(1)
                .with_timeout(Duration::from_millis(200)),
        )
        .await?;

    loop {
        let stats = manager.get_queue_stats("work").await?;
        if stats.failed >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!("✓ Slow job timed out and was marked failed\n");

    // Example 3: permanent failure
    println!("=== Example 3: Permanent Failure ===");
    manager
        .add_job(
            "work",
            "doomed",
            serde_json::json!({}),
            JobOptions::new()
                .with_attempts(3)
                .with_backoff(Backoff::fixed(Duration::from_millis(50))),
        )
        .await?;

    loop {
        let stats = manager.get_queue_stats("work").await?;
        if stats.failed >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    println!("✓ Doomed job failed permanently after 3 attempts\n");

    // Graceful shutdown drains whatever is still running
    println!("Shutting down...");
    manager.shutdown().await;
    println!("✓ Shut down cleanly");
    Ok(())
}
