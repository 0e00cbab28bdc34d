//! Queue manager: lifecycle facade over queues, pools, scheduler, observers
//!
//! The manager is constructed explicitly through [`QueueManagerBuilder`] and
//! owned by the process composition root; there is no global instance.
//! Processors are registered first, `initialize()` builds a queue, worker
//! pool, and observer wiring for each registered name, and `shutdown()`
//! drains in-flight work before reclaiming anything.

use crate::config::{ManagerConfig, QueueConfig};
use crate::error::{QueueError, Result};
use crate::event::{EventEmitter, EventKind, EventStream, QueueEvent};
use crate::job::{JobId, JobOptions};
use crate::observer::{spawn_observer, QueueObserver};
use crate::processor::{Processor, ProcessorRegistry};
use crate::queue::Queue;
use crate::scheduler::{RecurringSchedule, ScheduleId, Scheduler};
use crate::store::{JobStore, MemoryStore};
use crate::worker::{spawn_reaper, WorkerPool};
use crate::QueueStats;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Health check outcome for the admin endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// False when any queue crossed a threshold.
    pub healthy: bool,
    /// Human-readable descriptions of the threshold breaches.
    pub issues: Vec<String>,
}

/// Queue manager
pub struct QueueManager {
    store: Arc<dyn JobStore>,
    emitter: EventEmitter,
    registry: ProcessorRegistry,
    configs: HashMap<String, QueueConfig>,
    default_config: QueueConfig,
    manager_config: ManagerConfig,
    observers: Mutex<Vec<Arc<dyn QueueObserver>>>,
    scheduler: Arc<Scheduler>,
    queues: RwLock<Arc<HashMap<String, Arc<Queue>>>>,
    pools: Mutex<Vec<WorkerPool>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutting_down: Arc<AtomicBool>,
    initialized: AtomicBool,
}

impl QueueManager {
    /// Bind a processor to a queue name.
    ///
    /// Must happen before `initialize()`; fails with a configuration error
    /// on a duplicate binding or after initialization.
    pub fn register_processor(
        &self,
        queue_name: impl Into<String>,
        processor: Arc<dyn Processor>,
    ) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Err(QueueError::Configuration(
                "cannot register a processor after initialize()".to_string(),
            ));
        }
        self.registry.register(queue_name, processor)
    }

    /// Create a queue, worker pool, and observer wiring for every
    /// registered processor, then start the scheduler and stall reaper.
    ///
    /// Idempotent: a second call warns and returns Ok.
    pub async fn initialize(&self) -> Result<()> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("queue manager already initialized, ignoring");
            return Ok(());
        }

        let names = self.registry.queue_names();
        if names.is_empty() {
            warn!("initializing with no registered processors");
        }

        let mut queues = HashMap::new();
        for name in &names {
            let config = self
                .configs
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.default_config.clone());
            queues.insert(
                name.clone(),
                Arc::new(Queue::new(
                    name.clone(),
                    config,
                    Arc::clone(&self.store),
                    self.emitter.clone(),
                )),
            );
        }
        let queues = Arc::new(queues);
        *self.queues.write().await = Arc::clone(&queues);

        let mut background = self.background.lock().await;

        // Observers each get their own dispatch task.
        for observer in self.observers.lock().await.drain(..) {
            background.push(spawn_observer(observer, &self.emitter));
        }

        // Worker pools, one per queue.
        let mut pools = self.pools.lock().await;
        for (name, queue) in queues.iter() {
            let processor = self
                .registry
                .get(name)
                .ok_or_else(|| QueueError::QueueNotFound(name.clone()))?;
            pools.push(WorkerPool::start(
                Arc::clone(queue),
                processor,
                self.manager_config.poll_interval,
                Arc::clone(&self.shutting_down),
            ));
        }

        // Stalled-lease reaper.
        background.push(spawn_reaper(
            Arc::clone(&queues),
            self.manager_config.reaper_interval,
            Arc::clone(&self.shutting_down),
        ));

        // Recurring schedules: restore persisted state, then tick.
        self.scheduler.load().await?;
        background.push(Arc::clone(&self.scheduler).start(
            queues,
            self.manager_config.scheduler_tick,
            Arc::clone(&self.shutting_down),
        ));

        info!(queues = names.len(), "queue manager initialized");
        Ok(())
    }

    /// Enqueue a job, merging `options` over the queue's defaults.
    ///
    /// Returns the new job id; the job runs asynchronously and any handler
    /// failure is retried and reported through events, never through this
    /// call.
    pub async fn add_job(
        &self,
        queue_name: &str,
        job_name: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<JobId> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(QueueError::ShutdownInProgress);
        }
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(QueueError::Configuration(
                "initialize() must be called before enqueuing jobs".to_string(),
            ));
        }

        let queues = self.queues.read().await.clone();
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound(queue_name.to_string()))?;
        queue.add_job(job_name, payload, options).await
    }

    /// Register a recurring schedule; the first firing time comes from the
    /// cron expression. Returns the schedule id.
    pub async fn add_recurring(
        &self,
        queue_name: &str,
        job_name: impl Into<String>,
        payload: serde_json::Value,
        cron_expr: &str,
        options: JobOptions,
    ) -> Result<ScheduleId> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(QueueError::ShutdownInProgress);
        }
        if !self.registry.contains(queue_name) {
            return Err(QueueError::QueueNotFound(queue_name.to_string()));
        }

        let schedule = RecurringSchedule::new(queue_name, job_name, payload, cron_expr)?
            .with_options(options);
        self.scheduler.add(schedule).await
    }

    /// Remove a recurring schedule.
    pub async fn remove_recurring(&self, id: ScheduleId) -> Result<()> {
        self.scheduler.remove(id).await
    }

    /// Per-state counts for one queue.
    pub async fn get_queue_stats(&self, queue_name: &str) -> Result<QueueStats> {
        let queues = self.queues.read().await.clone();
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound(queue_name.to_string()))?;
        queue.stats().await
    }

    /// Per-state counts for every queue.
    pub async fn get_all_stats(&self) -> Result<HashMap<String, QueueStats>> {
        let queues = self.queues.read().await.clone();
        let mut stats = HashMap::new();
        for (name, queue) in queues.iter() {
            stats.insert(name.clone(), queue.stats().await?);
        }
        Ok(stats)
    }

    /// Stop the queue's workers from dequeuing; in-flight jobs finish.
    pub async fn pause_queue(&self, queue_name: &str) -> Result<()> {
        let queues = self.queues.read().await.clone();
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound(queue_name.to_string()))?;
        queue.pause();
        Ok(())
    }

    /// Resume a paused queue.
    pub async fn resume_queue(&self, queue_name: &str) -> Result<()> {
        let queues = self.queues.read().await.clone();
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| QueueError::QueueNotFound(queue_name.to_string()))?;
        queue.resume();
        Ok(())
    }

    /// Flag queues whose waiting or failed counts crossed the configured
    /// thresholds.
    pub async fn health_check(&self) -> Result<HealthReport> {
        let thresholds = &self.manager_config.health;
        let stats = self.get_all_stats().await?;

        let mut issues = Vec::new();
        for (name, queue_stats) in &stats {
            if queue_stats.waiting > thresholds.max_waiting {
                issues.push(format!(
                    "queue '{}' has {} waiting jobs (threshold {})",
                    name, queue_stats.waiting, thresholds.max_waiting
                ));
            }
            if queue_stats.failed > thresholds.max_failed as u64 {
                issues.push(format!(
                    "queue '{}' has {} failed jobs (threshold {})",
                    name, queue_stats.failed, thresholds.max_failed
                ));
            }
        }
        issues.sort();

        Ok(HealthReport {
            healthy: issues.is_empty(),
            issues,
        })
    }

    /// Subscribe to the raw lifecycle event stream.
    pub fn subscribe_events(&self) -> EventStream {
        self.emitter.subscribe_stream()
    }

    /// Whether shutdown has started.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Graceful shutdown: stop intake, let in-flight jobs finish within the
    /// grace timeout, then requeue whatever is still active and stop every
    /// background task. Best-effort: one component failing to stop never
    /// prevents the others from stopping.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            warn!("shutdown already in progress");
            return;
        }
        self.emitter.emit(QueueEvent::manager(EventKind::ShutdownStarted));
        info!(grace = ?self.manager_config.grace_timeout, "queue manager shutting down");

        let queues = self.queues.read().await.clone();
        for queue in queues.values() {
            queue.wake_all();
        }

        // Wait out in-flight jobs up to the grace timeout.
        let deadline = std::time::Instant::now() + self.manager_config.grace_timeout;
        loop {
            let mut active = 0;
            for queue in queues.values() {
                match queue.store().counts(queue.name()).await {
                    Ok(counts) => active += counts.active,
                    Err(e) => warn!(queue = queue.name(), error = %e, "count failed during drain"),
                }
            }
            if active == 0 {
                break;
            }
            if std::time::Instant::now() >= deadline {
                warn!(active, "grace timeout expired with jobs still active");
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        // Reclaim the slots, then requeue anything that was still running so
        // the next process start picks it up. Waiting jobs stay put.
        for pool in self.pools.lock().await.iter() {
            pool.abort();
        }
        for queue in queues.values() {
            match queue.store().reclaim_active(queue.name()).await {
                Ok(0) => {}
                Ok(count) => info!(queue = queue.name(), count, "requeued interrupted jobs"),
                Err(e) => warn!(queue = queue.name(), error = %e, "failed to requeue active jobs"),
            }
        }

        for handle in self.background.lock().await.drain(..) {
            handle.abort();
        }

        self.emitter.emit(QueueEvent::manager(EventKind::ShutdownComplete));
        info!("queue manager shut down");
    }
}

/// Builder for [`QueueManager`]
pub struct QueueManagerBuilder {
    store: Option<Arc<dyn JobStore>>,
    event_capacity: usize,
    configs: HashMap<String, QueueConfig>,
    default_config: QueueConfig,
    manager_config: ManagerConfig,
    observers: Vec<Arc<dyn QueueObserver>>,
}

impl Default for QueueManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueManagerBuilder {
    /// Create a builder with defaults: in-memory store, default configs.
    pub fn new() -> Self {
        Self {
            store: None,
            event_capacity: 256,
            configs: HashMap::new(),
            default_config: QueueConfig::default(),
            manager_config: ManagerConfig::default(),
            observers: Vec::new(),
        }
    }

    /// Use a specific backing store
    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Configure one queue by name
    pub fn with_queue(mut self, name: impl Into<String>, config: QueueConfig) -> Self {
        self.configs.insert(name.into(), config);
        self
    }

    /// Configuration applied to queues without an explicit entry
    pub fn with_default_queue_config(mut self, config: QueueConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Manager-level tunables (grace timeout, tick intervals, thresholds)
    pub fn with_manager_config(mut self, config: ManagerConfig) -> Self {
        self.manager_config = config;
        self
    }

    /// Register a lifecycle observer
    pub fn with_observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Event broadcast channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Build the manager
    pub fn build(self) -> QueueManager {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn JobStore>);
        let emitter = EventEmitter::new(self.event_capacity);
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&store), emitter.clone()));

        QueueManager {
            store,
            emitter,
            registry: ProcessorRegistry::new(),
            configs: self.configs,
            default_config: self.default_config,
            manager_config: self.manager_config,
            observers: Mutex::new(self.observers),
            scheduler,
            queues: RwLock::new(Arc::new(HashMap::new())),
            pools: Mutex::new(Vec::new()),
            background: Mutex::new(Vec::new()),
            shutting_down: Arc::new(AtomicBool::new(false)),
            initialized: AtomicBool::new(false),
        }
    }
}
