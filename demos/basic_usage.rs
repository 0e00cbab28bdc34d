//! Basic usage example
//!
//! This example demonstrates the basic usage of jobmill:
//! - Building a queue manager with a configured queue
//! - Registering a processor
//! - Enqueuing jobs and watching them complete

use async_trait::async_trait;
use jobmill::{JobContext, JobError, JobOptions, Processor, QueueConfig, QueueManagerBuilder};
use std::sync::Arc;
use std::time::Duration;

/// A processor that greets people by name
struct GreetProcessor;

#[async_trait]
impl Processor for GreetProcessor {
    async fn process(&self, job: JobContext) -> Result<serde_json::Value, JobError> {
        // Simulate some work
        tokio::time::sleep(Duration::from_millis(100)).await;

        let name = job.payload["name"].as_str().unwrap_or("stranger");
        Ok(serde_json::json!({
            "greeting": format!("Hello, {}!", name),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("=== Jobmill: Basic Usage Example ===\n");

    // Build the queue manager with one queue, two worker slots
    let manager = QueueManagerBuilder::new()
        .with_queue("greetings", QueueConfig::new(2))
        .build();

    manager.register_processor("greetings", Arc::new(GreetProcessor))?;
    manager.initialize().await?;
    println!("✓ Queue manager initialized\n");

    // Enqueue a few jobs
    println!("Enqueuing jobs...");
    let names = vec!["Alice", "Bob", "Charlie"];
    let mut ids = Vec::new();

    for name in names {
        let id = manager
            .add_job(
                "greetings",
                "greet",
                serde_json::json!({"name": name}),
                JobOptions::default(),
            )
            .await?;
        ids.push((name, id));
        println!("  → Enqueued greeting for {}", name);
    }

    // Wait for everything to complete
    println!("\nWaiting for results...\n");
    loop {
        let stats = manager.get_queue_stats("greetings").await?;
        if stats.completed >= ids.len() as u64 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for (name, _id) in &ids {
        println!("✓ Greeted {}", name);
    }

    let stats = manager.get_queue_stats("greetings").await?;
    println!(
        "\nFinal stats: {} completed, {} failed",
        stats.completed, stats.failed
    );

    manager.shutdown().await;
    println!("✓ Shut down cleanly");
    Ok(())
}
