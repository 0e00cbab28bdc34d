//! Recurring (cron) schedules
//!
//! The scheduler evaluates every registered schedule on a fixed tick and
//! enqueues a fresh job whenever wall-clock time passes `next_run_at`.
//! `next_run_at` is persisted through the store, and after a firing it
//! advances from *now*, so ticks missed while the process was down collapse
//! into at most one firing on resume.

use crate::error::{QueueError, Result};
use crate::event::{EventEmitter, EventKind, QueueEvent};
use crate::job::JobOptions;
use crate::queue::Queue;
use crate::store::JobStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique identifier for a recurring schedule.
pub type ScheduleId = Uuid;

/// Parse a cron expression.
///
/// The `cron` crate wants a seconds column; classic 5-field expressions
/// get one prepended so "*/5 * * * *" works as producers expect.
pub(crate) fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    match cron::Schedule::from_str(expr) {
        Ok(schedule) => Ok(schedule),
        Err(_) if expr.split_whitespace().count() == 5 => {
            cron::Schedule::from_str(&format!("0 {}", expr))
                .map_err(|e| QueueError::InvalidCron(format!("{}: {}", expr, e)))
        }
        Err(e) => Err(QueueError::InvalidCron(format!("{}: {}", expr, e))),
    }
}

/// A cron-defined rule that periodically spawns new jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringSchedule {
    /// Schedule id
    pub id: ScheduleId,
    /// Queue the spawned jobs go to
    pub queue_name: String,
    /// Job name for the spawned jobs
    pub job_name: String,
    /// Payload template, cloned into each spawned job
    pub payload: serde_json::Value,
    /// Cron expression (5, 6, or 7 fields)
    pub cron: String,
    /// Next wall-clock firing time
    pub next_run_at: DateTime<Utc>,
    /// Enqueue options for spawned jobs
    #[serde(default)]
    pub options: JobOptions,
}

impl RecurringSchedule {
    /// Create a schedule and compute its first firing time.
    pub fn new(
        queue_name: impl Into<String>,
        job_name: impl Into<String>,
        payload: serde_json::Value,
        cron_expr: &str,
    ) -> Result<Self> {
        let schedule = parse_cron(cron_expr)?;
        let next_run_at = schedule
            .after(&Utc::now())
            .next()
            .ok_or_else(|| QueueError::InvalidCron(format!("{}: never fires", cron_expr)))?;

        Ok(Self {
            id: Uuid::new_v4(),
            queue_name: queue_name.into(),
            job_name: job_name.into(),
            payload,
            cron: cron_expr.to_string(),
            next_run_at,
            options: JobOptions::default(),
        })
    }

    /// Set enqueue options for spawned jobs (builder pattern)
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether the schedule should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at <= now
    }

    /// Advance `next_run_at` to the next occurrence strictly after `now`.
    ///
    /// Returns false when the expression has no future occurrence.
    pub(crate) fn advance(&mut self, now: DateTime<Utc>) -> Result<bool> {
        let schedule = parse_cron(&self.cron)?;
        match schedule.after(&now).next() {
            Some(next) => {
                self.next_run_at = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Evaluates recurring schedules and enqueues jobs on trigger.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    schedules: Mutex<HashMap<ScheduleId, RecurringSchedule>>,
    emitter: EventEmitter,
}

impl Scheduler {
    pub(crate) fn new(store: Arc<dyn JobStore>, emitter: EventEmitter) -> Self {
        Self {
            store,
            schedules: Mutex::new(HashMap::new()),
            emitter,
        }
    }

    /// Load persisted schedules into the live set.
    pub(crate) async fn load(&self) -> Result<()> {
        let loaded = self.store.load_schedules().await?;
        let mut schedules = self.schedules.lock().await;
        for schedule in loaded {
            schedules.entry(schedule.id).or_insert(schedule);
        }
        Ok(())
    }

    /// Register a schedule: persist it and add it to the live set.
    pub(crate) async fn add(&self, schedule: RecurringSchedule) -> Result<ScheduleId> {
        let id = schedule.id;
        self.store.save_schedule(schedule.clone()).await?;
        self.schedules.lock().await.insert(id, schedule);
        debug!(schedule_id = %id, "recurring schedule registered");
        Ok(id)
    }

    /// Remove a schedule from the live set and the store.
    pub(crate) async fn remove(&self, id: ScheduleId) -> Result<()> {
        self.schedules.lock().await.remove(&id);
        self.store.remove_schedule(id).await
    }

    /// Number of live schedules.
    pub(crate) async fn len(&self) -> usize {
        self.schedules.lock().await.len()
    }

    /// Evaluate all schedules against `now`; fire each due one exactly once
    /// and advance its `next_run_at` past `now`. Returns how many fired.
    pub(crate) async fn tick(
        &self,
        queues: &HashMap<String, Arc<Queue>>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut schedules = self.schedules.lock().await;
        let mut fired = 0;
        let mut dead = Vec::new();

        for schedule in schedules.values_mut() {
            if !schedule.is_due(now) {
                continue;
            }

            match queues.get(&schedule.queue_name) {
                Some(queue) => {
                    let enqueued = queue
                        .add_job(
                            schedule.job_name.clone(),
                            schedule.payload.clone(),
                            schedule.options.clone(),
                        )
                        .await;
                    match enqueued {
                        Ok(job_id) => {
                            fired += 1;
                            self.emitter.emit(
                                QueueEvent::for_queue(
                                    EventKind::ScheduleFired,
                                    &schedule.queue_name,
                                )
                                .with_detail(schedule.id.to_string()),
                            );
                            info!(
                                schedule_id = %schedule.id,
                                queue = %schedule.queue_name,
                                job_name = %schedule.job_name,
                                job_id = %job_id,
                                "recurring schedule fired"
                            );
                        }
                        Err(e) => {
                            warn!(schedule_id = %schedule.id, error = %e, "failed to enqueue scheduled job");
                        }
                    }
                }
                None => {
                    warn!(
                        schedule_id = %schedule.id,
                        queue = %schedule.queue_name,
                        "schedule points at an unknown queue"
                    );
                }
            }

            // Advance from now, not from the missed tick: downtime collapses
            // into the single firing above.
            match schedule.advance(now) {
                Ok(true) => {
                    if let Err(e) = self.store.save_schedule(schedule.clone()).await {
                        warn!(schedule_id = %schedule.id, error = %e, "failed to persist schedule");
                    }
                }
                Ok(false) | Err(_) => dead.push(schedule.id),
            }
        }

        for id in dead {
            schedules.remove(&id);
            let _ = self.store.remove_schedule(id).await;
        }

        fired
    }

    /// Start the tick loop.
    pub(crate) fn start(
        self: Arc<Self>,
        queues: Arc<HashMap<String, Arc<Queue>>>,
        tick: Duration,
        shutting_down: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                self.tick(&queues, Utc::now()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::job::JobState;
    use crate::store::MemoryStore;

    fn make_queues(store: &Arc<MemoryStore>) -> HashMap<String, Arc<Queue>> {
        let emitter = EventEmitter::new(64);
        let mut queues = HashMap::new();
        queues.insert(
            "emails".to_string(),
            Arc::new(Queue::new(
                "emails",
                QueueConfig::default(),
                Arc::clone(store) as Arc<dyn JobStore>,
                emitter,
            )),
        );
        queues
    }

    #[test]
    fn test_parse_cron_six_fields() {
        assert!(parse_cron("0 * * * * *").is_ok());
    }

    #[test]
    fn test_parse_cron_five_fields_normalized() {
        // Classic crontab form gets a seconds column prepended.
        assert!(parse_cron("*/5 * * * *").is_ok());
    }

    #[test]
    fn test_parse_cron_invalid() {
        let err = parse_cron("not a cron");
        assert!(matches!(err, Err(QueueError::InvalidCron(_))));
    }

    #[test]
    fn test_schedule_new_computes_future_run() {
        let schedule =
            RecurringSchedule::new("emails", "digest", serde_json::json!({}), "0 * * * * *")
                .unwrap();
        assert!(schedule.next_run_at > Utc::now());
        assert!(!schedule.is_due(Utc::now()));
    }

    #[test]
    fn test_schedule_invalid_cron_rejected() {
        let err = RecurringSchedule::new("emails", "digest", serde_json::json!({}), "bogus");
        assert!(matches!(err, Err(QueueError::InvalidCron(_))));
    }

    #[tokio::test]
    async fn test_tick_fires_due_schedule_once() {
        let store = Arc::new(MemoryStore::new());
        let queues = make_queues(&store);
        let scheduler = Scheduler::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            EventEmitter::new(64),
        );

        let mut schedule = RecurringSchedule::new(
            "emails",
            "digest",
            serde_json::json!({"kind": "daily"}),
            "0 * * * * *",
        )
        .unwrap();
        // Pretend the process slept through ten firings.
        schedule.next_run_at = Utc::now() - chrono::Duration::minutes(10);
        scheduler.add(schedule).await.unwrap();

        let now = Utc::now();
        let fired = scheduler.tick(&queues, now).await;
        assert_eq!(fired, 1);

        // Exactly one job was enqueued despite the backlog of missed ticks.
        let counts = store.counts("emails").await.unwrap();
        assert_eq!(counts.waiting, 1);

        // And the schedule advanced into the future.
        let schedules = store.load_schedules().await.unwrap();
        assert!(schedules[0].next_run_at > now);

        // A second tick right away fires nothing.
        assert_eq!(scheduler.tick(&queues, Utc::now()).await, 0);
    }

    #[tokio::test]
    async fn test_tick_skips_undue_schedules() {
        let store = Arc::new(MemoryStore::new());
        let queues = make_queues(&store);
        let scheduler = Scheduler::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            EventEmitter::new(64),
        );

        let schedule =
            RecurringSchedule::new("emails", "digest", serde_json::json!({}), "0 0 * * * *")
                .unwrap();
        scheduler.add(schedule).await.unwrap();

        assert_eq!(scheduler.tick(&queues, Utc::now()).await, 0);
        assert_eq!(store.counts("emails").await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn test_tick_unknown_queue_does_not_fire() {
        let store = Arc::new(MemoryStore::new());
        let queues = make_queues(&store);
        let scheduler = Scheduler::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            EventEmitter::new(64),
        );

        let mut schedule =
            RecurringSchedule::new("missing", "x", serde_json::json!({}), "0 * * * * *").unwrap();
        schedule.next_run_at = Utc::now() - chrono::Duration::seconds(5);
        scheduler.add(schedule).await.unwrap();

        assert_eq!(scheduler.tick(&queues, Utc::now()).await, 0);
    }

    #[tokio::test]
    async fn test_spawned_job_carries_template_and_options() {
        let store = Arc::new(MemoryStore::new());
        let queues = make_queues(&store);
        let scheduler = Scheduler::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            EventEmitter::new(64),
        );

        let mut schedule = RecurringSchedule::new(
            "emails",
            "digest",
            serde_json::json!({"hour": 6}),
            "0 * * * * *",
        )
        .unwrap()
        .with_options(JobOptions::new().with_priority(2).with_attempts(1));
        schedule.next_run_at = Utc::now() - chrono::Duration::seconds(1);
        scheduler.add(schedule).await.unwrap();

        scheduler.tick(&queues, Utc::now()).await;

        let jobs = store.list_by_state("emails", JobState::Waiting).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_name, "digest");
        assert_eq!(jobs[0].payload["hour"], 6);
        assert_eq!(jobs[0].priority, 2);
        assert_eq!(jobs[0].attempts_limit, 1);
    }

    #[tokio::test]
    async fn test_load_restores_persisted_schedules() {
        let store = Arc::new(MemoryStore::new());
        let schedule =
            RecurringSchedule::new("emails", "digest", serde_json::json!({}), "0 * * * * *")
                .unwrap();
        store.save_schedule(schedule).await.unwrap();

        let scheduler = Scheduler::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            EventEmitter::new(64),
        );
        scheduler.load().await.unwrap();
        assert_eq!(scheduler.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_schedule() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(
            Arc::clone(&store) as Arc<dyn JobStore>,
            EventEmitter::new(64),
        );

        let schedule =
            RecurringSchedule::new("emails", "digest", serde_json::json!({}), "0 * * * * *")
                .unwrap();
        let id = scheduler.add(schedule).await.unwrap();
        assert_eq!(scheduler.len().await, 1);

        scheduler.remove(id).await.unwrap();
        assert_eq!(scheduler.len().await, 0);
        assert!(store.load_schedules().await.unwrap().is_empty());
    }

    #[test]
    fn test_schedule_serialization() {
        let schedule = RecurringSchedule::new(
            "payments",
            "poll-pending",
            serde_json::json!({"window": 30}),
            "0 */5 * * * *",
        )
        .unwrap();

        let json = serde_json::to_string(&schedule).unwrap();
        let parsed: RecurringSchedule = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.id, schedule.id);
        assert_eq!(parsed.cron, "0 */5 * * * *");
        assert_eq!(parsed.next_run_at, schedule.next_run_at);
    }
}
