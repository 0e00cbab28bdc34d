//! Recurring schedules and observability example
//!
//! This example demonstrates:
//! - Cron-style recurring jobs
//! - The stats observer and raw event stream
//! - Queue pause/resume
//! - The admin health check

use async_trait::async_trait;
use jobmill::{
    EventKind, JobContext, JobError, JobOptions, Processor, QueueConfig, QueueManagerBuilder,
    StatsObserver,
};
use std::sync::Arc;
use std::time::Duration;

/// A processor standing in for a nightly digest sender
struct DigestProcessor;

#[async_trait]
impl Processor for DigestProcessor {
    async fn process(&self, job: JobContext) -> Result<serde_json::Value, JobError> {
        job.update_progress(50);
        tokio::time::sleep(Duration::from_millis(50)).await;
        job.update_progress(100);
        Ok(serde_json::json!({"sent": true}))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("=== Jobmill: Recurring Schedules & Health Example ===\n");

    let stats = Arc::new(StatsObserver::new());
    let manager = QueueManagerBuilder::new()
        .with_queue("digests", QueueConfig::new(1))
        .with_observer(Arc::clone(&stats) as Arc<dyn jobmill::QueueObserver>)
        .build();

    manager.register_processor("digests", Arc::new(DigestProcessor))?;

    // Fire every second so the example finishes quickly; a real deployment
    // would use something like "0 0 6 * * *".
    let schedule_id = manager
        .add_recurring(
            "digests",
            "send-digest",
            serde_json::json!({"edition": "daily"}),
            "* * * * * *",
            JobOptions::default(),
        )
        .await?;
    println!("✓ Recurring schedule registered: {}\n", schedule_id);

    manager.initialize().await?;

    // Watch completions on the raw event stream
    let mut completions = manager.subscribe_events();
    println!("Waiting for the schedule to fire...");
    let mut seen = 0;
    while seen < 3 {
        if let Some(event) = completions.recv().await {
            if event.kind == EventKind::Completed {
                seen += 1;
                println!("  → digest run {} completed", seen);
            }
        }
    }

    // Pause: the schedule keeps enqueuing, workers stop pulling
    println!("\nPausing the queue for 2 seconds...");
    manager.pause_queue("digests").await?;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let queue_stats = manager.get_queue_stats("digests").await?;
    println!(
        "  paused={}, waiting={}, completed={}",
        queue_stats.paused, queue_stats.waiting, queue_stats.completed
    );

    manager.resume_queue("digests").await?;
    println!("✓ Resumed\n");

    // Observer counters and the health report
    let snapshot = stats.snapshot();
    println!(
        "Observer counters: {} enqueued, {} started, {} completed",
        snapshot.waiting, snapshot.started, snapshot.completed
    );

    let report = manager.health_check().await?;
    println!(
        "Health: {}",
        if report.healthy { "ok" } else { "degraded" }
    );
    for issue in &report.issues {
        println!("  issue: {}", issue);
    }

    manager.remove_recurring(schedule_id).await?;
    manager.shutdown().await;
    println!("\n✓ Shut down cleanly");
    Ok(())
}
