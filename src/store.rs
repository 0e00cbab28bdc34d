//! Persisted job state behind the `JobStore` trait
//!
//! The store owns the only shared mutable state in the engine: per queue, a
//! pending ordered set (waiting + delayed, sorted by priority then due time),
//! an active lease map, and a bounded history of terminal records. Every
//! mutation happens under one lock so dequeue is linearizable: two workers
//! can never take the same job.
//!
//! Two implementations are provided: [`MemoryStore`] for tests and
//! single-process deployments, and [`LocalStore`] which snapshots pending
//! jobs and recurring schedules to JSON files so they survive a restart.

use crate::config::RetentionPolicy;
use crate::error::{QueueError, Result};
use crate::job::{JobId, JobRecord, JobState};
use crate::scheduler::{RecurringSchedule, ScheduleId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

/// Per-state job counts for one queue.
///
/// `waiting`/`delayed` are computed from due time at call time; `completed`
/// and `failed` are cumulative totals, unaffected by history trimming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: u64,
    pub failed: u64,
}

/// What the store did with an expired lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallAction {
    /// First stall: requeued to waiting without consuming an attempt.
    Requeued,
    /// Later stall, attempts remain: delayed for a retry.
    Retried,
    /// Later stall, attempts exhausted: failed permanently.
    Failed,
}

/// Storage interface for job and schedule state.
///
/// All job mutations are keyed by id and validate the current state, so a
/// completed or reclaimed job cannot be transitioned twice even under
/// concurrent workers.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job into its queue's pending set.
    async fn enqueue(&self, job: JobRecord) -> Result<()>;

    /// Atomically take the next eligible job: the due record with the lowest
    /// `(priority, scheduled_at, enqueue order)`. Marks it `Active`, bumps
    /// `attempts_made`, and holds a lease until `lease_until`.
    async fn dequeue_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<JobRecord>>;

    /// Transition an active job to `Completed`, recording its result.
    async fn mark_completed(&self, queue: &str, id: JobId, result: serde_json::Value)
        -> Result<()>;

    /// Transition an active job to `Failed` permanently.
    async fn mark_failed(&self, queue: &str, id: JobId, reason: &str) -> Result<()>;

    /// Transition an active job to `Delayed` for a retry at `run_at`.
    async fn mark_retry(
        &self,
        queue: &str,
        id: JobId,
        reason: &str,
        run_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Extend the lease on an active job. Returns false if the job is no
    /// longer active (completed, reclaimed, or unknown).
    async fn renew_lease(&self, queue: &str, id: JobId, lease_until: DateTime<Utc>)
        -> Result<bool>;

    /// Reclaim jobs whose lease expired before `now`, applying the stall
    /// policy: requeue once, then treat the next stall as a failed attempt.
    async fn reclaim_expired(
        &self,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(JobRecord, StallAction)>>;

    /// Requeue every active job to waiting (shutdown-time recovery).
    /// The interrupted attempt is not counted. Returns how many were moved.
    async fn reclaim_active(&self, queue: &str) -> Result<usize>;

    /// Per-state counts for one queue.
    async fn counts(&self, queue: &str) -> Result<StateCounts>;

    /// List records currently in the given state.
    async fn list_by_state(&self, queue: &str, state: JobState) -> Result<Vec<JobRecord>>;

    /// Look up a single job anywhere in the queue.
    async fn get_job(&self, queue: &str, id: JobId) -> Result<Option<JobRecord>>;

    /// Evict terminal records beyond the retention window. Returns how many
    /// were dropped.
    async fn trim_history(&self, queue: &str, retention: &RetentionPolicy) -> Result<usize>;

    /// Persist (insert or update) a recurring schedule.
    async fn save_schedule(&self, schedule: RecurringSchedule) -> Result<()>;

    /// Load all recurring schedules.
    async fn load_schedules(&self) -> Result<Vec<RecurringSchedule>>;

    /// Remove a recurring schedule.
    async fn remove_schedule(&self, id: ScheduleId) -> Result<()>;
}

/// Pending jobs sort by priority, then due time, then enqueue order.
type PendingKey = (i32, i64, u64);

struct ActiveEntry {
    record: JobRecord,
    lease_until: DateTime<Utc>,
}

#[derive(Default)]
struct QueueSlot {
    pending: BTreeMap<PendingKey, JobRecord>,
    active: HashMap<JobId, ActiveEntry>,
    history: VecDeque<JobRecord>,
    completed_total: u64,
    failed_total: u64,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, QueueSlot>,
    schedules: HashMap<ScheduleId, RecurringSchedule>,
    seq: u64,
}

impl Inner {
    fn slot(&mut self, queue: &str) -> &mut QueueSlot {
        self.queues.entry(queue.to_string()).or_default()
    }

    fn push_pending(&mut self, job: JobRecord) {
        self.seq += 1;
        let key = (job.priority, job.scheduled_at.timestamp_millis(), self.seq);
        self.slot(&job.queue_name).pending.insert(key, job);
    }

    fn take_active(&mut self, queue: &str, id: JobId) -> Result<JobRecord> {
        self.slot(queue)
            .active
            .remove(&id)
            .map(|entry| entry.record)
            .ok_or_else(|| {
                QueueError::Storage(format!("job {} is not active in queue {}", id, queue))
            })
    }
}

/// In-memory store.
///
/// The default backing store; state does not survive the process.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every non-terminal job, with active leases normalized back
    /// to waiting so the snapshot can be replayed into a fresh store.
    pub async fn snapshot_jobs(&self) -> Vec<JobRecord> {
        let inner = self.inner.lock().await;
        let mut jobs = Vec::new();
        for slot in inner.queues.values() {
            jobs.extend(slot.pending.values().cloned());
            for entry in slot.active.values() {
                let mut record = entry.record.clone();
                record.state = JobState::Waiting;
                record.attempts_made = record.attempts_made.saturating_sub(1);
                record.scheduled_at = Utc::now();
                jobs.push(record);
            }
        }
        jobs
    }

    /// Snapshot all recurring schedules.
    pub async fn snapshot_schedules(&self) -> Vec<RecurringSchedule> {
        let inner = self.inner.lock().await;
        inner.schedules.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn enqueue(&self, job: JobRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.push_pending(job);
        Ok(())
    }

    async fn dequeue_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let mut inner = self.inner.lock().await;
        let slot = inner.slot(queue);

        let key = slot
            .pending
            .iter()
            .find(|(_, job)| job.is_due(now))
            .map(|(key, _)| *key);

        let Some(key) = key else {
            return Ok(None);
        };

        let Some(mut record) = slot.pending.remove(&key) else {
            return Ok(None);
        };
        record.state = JobState::Active;
        record.attempts_made += 1;
        record.processed_at = Some(now);

        slot.active.insert(
            record.id,
            ActiveEntry {
                record: record.clone(),
                lease_until,
            },
        );

        Ok(Some(record))
    }

    async fn mark_completed(
        &self,
        queue: &str,
        id: JobId,
        result: serde_json::Value,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let mut record = inner.take_active(queue, id)?;
        record.state = JobState::Completed;
        record.result = Some(result);
        record.finished_at = Some(Utc::now());

        let slot = inner.slot(queue);
        slot.completed_total += 1;
        slot.history.push_back(record);
        Ok(())
    }

    async fn mark_failed(&self, queue: &str, id: JobId, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let mut record = inner.take_active(queue, id)?;
        record.state = JobState::Failed;
        record.failure_reason = Some(reason.to_string());
        record.finished_at = Some(Utc::now());

        let slot = inner.slot(queue);
        slot.failed_total += 1;
        slot.history.push_back(record);
        Ok(())
    }

    async fn mark_retry(
        &self,
        queue: &str,
        id: JobId,
        reason: &str,
        run_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let mut record = inner.take_active(queue, id)?;
        record.state = JobState::Delayed;
        record.failure_reason = Some(reason.to_string());
        record.scheduled_at = run_at;
        inner.push_pending(record);
        Ok(())
    }

    async fn renew_lease(
        &self,
        queue: &str,
        id: JobId,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.slot(queue).active.get_mut(&id) {
            Some(entry) => {
                entry.lease_until = lease_until;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reclaim_expired(
        &self,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(JobRecord, StallAction)>> {
        let mut inner = self.inner.lock().await;
        let slot = inner.slot(queue);

        let expired: Vec<JobId> = slot
            .active
            .iter()
            .filter(|(_, entry)| entry.lease_until <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut outcomes = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(entry) = inner.slot(queue).active.remove(&id) else {
                continue;
            };
            let mut record = entry.record;

            if record.stalls == 0 {
                // First stall: back to waiting, the interrupted attempt
                // does not count against the limit.
                record.stalls = 1;
                record.state = JobState::Waiting;
                record.attempts_made = record.attempts_made.saturating_sub(1);
                record.scheduled_at = now;
                let snapshot = record.clone();
                inner.push_pending(record);
                outcomes.push((snapshot, StallAction::Requeued));
            } else if record.attempts_made < record.attempts_limit {
                record.stalls += 1;
                record.state = JobState::Delayed;
                record.failure_reason = Some("job stalled: lease expired".to_string());
                let delay = record.backoff.delay_for_attempt(record.attempts_made);
                record.scheduled_at = now
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                let snapshot = record.clone();
                inner.push_pending(record);
                outcomes.push((snapshot, StallAction::Retried));
            } else {
                record.stalls += 1;
                record.state = JobState::Failed;
                record.failure_reason = Some("job stalled: lease expired".to_string());
                record.finished_at = Some(now);
                let snapshot = record.clone();
                let slot = inner.slot(queue);
                slot.failed_total += 1;
                slot.history.push_back(record);
                outcomes.push((snapshot, StallAction::Failed));
            }
        }

        Ok(outcomes)
    }

    async fn reclaim_active(&self, queue: &str) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let slot = inner.slot(queue);

        let ids: Vec<JobId> = slot.active.keys().copied().collect();
        let count = ids.len();
        for id in ids {
            let Some(entry) = inner.slot(queue).active.remove(&id) else {
                continue;
            };
            let mut record = entry.record;
            record.state = JobState::Waiting;
            record.attempts_made = record.attempts_made.saturating_sub(1);
            record.scheduled_at = Utc::now();
            inner.push_pending(record);
        }
        Ok(count)
    }

    async fn counts(&self, queue: &str) -> Result<StateCounts> {
        let mut inner = self.inner.lock().await;
        let slot = inner.slot(queue);
        let now = Utc::now();

        let waiting = slot.pending.values().filter(|j| j.is_due(now)).count();
        let delayed = slot.pending.len() - waiting;

        Ok(StateCounts {
            waiting,
            active: slot.active.len(),
            delayed,
            completed: slot.completed_total,
            failed: slot.failed_total,
        })
    }

    async fn list_by_state(&self, queue: &str, state: JobState) -> Result<Vec<JobRecord>> {
        let mut inner = self.inner.lock().await;
        let slot = inner.slot(queue);
        let now = Utc::now();

        let jobs = match state {
            JobState::Waiting => slot
                .pending
                .values()
                .filter(|j| j.is_due(now))
                .cloned()
                .collect(),
            JobState::Delayed => slot
                .pending
                .values()
                .filter(|j| !j.is_due(now))
                .cloned()
                .collect(),
            JobState::Active => slot.active.values().map(|e| e.record.clone()).collect(),
            JobState::Completed | JobState::Failed => slot
                .history
                .iter()
                .filter(|j| j.state == state)
                .cloned()
                .collect(),
            // Stalled is transient: reclaim immediately requeues or fails.
            JobState::Stalled => Vec::new(),
        };
        Ok(jobs)
    }

    async fn get_job(&self, queue: &str, id: JobId) -> Result<Option<JobRecord>> {
        let mut inner = self.inner.lock().await;
        let slot = inner.slot(queue);

        if let Some(job) = slot.pending.values().find(|j| j.id == id) {
            return Ok(Some(job.clone()));
        }
        if let Some(entry) = slot.active.get(&id) {
            return Ok(Some(entry.record.clone()));
        }
        Ok(slot.history.iter().find(|j| j.id == id).cloned())
    }

    async fn trim_history(&self, queue: &str, retention: &RetentionPolicy) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let slot = inner.slot(queue);
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention.max_age)
                .unwrap_or_else(|_| chrono::Duration::zero());

        let before = slot.history.len();
        slot.history
            .retain(|job| job.finished_at.map(|t| t > cutoff).unwrap_or(true));
        while slot.history.len() > retention.max_count {
            slot.history.pop_front();
        }
        Ok(before - slot.history.len())
    }

    async fn save_schedule(&self, schedule: RecurringSchedule) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.schedules.insert(schedule.id, schedule);
        Ok(())
    }

    async fn load_schedules(&self) -> Result<Vec<RecurringSchedule>> {
        let inner = self.inner.lock().await;
        Ok(inner.schedules.values().cloned().collect())
    }

    async fn remove_schedule(&self, id: ScheduleId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.schedules.remove(&id);
        Ok(())
    }
}

/// Filesystem-backed store.
///
/// Keeps all state in a [`MemoryStore`] and snapshots pending jobs and
/// recurring schedules to JSON files after each mutation. Jobs that were
/// active at crash time are replayed as waiting on the next start.
pub struct LocalStore {
    storage_dir: PathBuf,
    inner: MemoryStore,
}

impl LocalStore {
    /// Open (or create) a store rooted at `storage_dir`.
    pub async fn new(storage_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&storage_dir)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to create storage dir: {}", e)))?;

        let store = Self {
            storage_dir,
            inner: MemoryStore::new(),
        };
        store.load_from_disk().await?;
        Ok(store)
    }

    fn jobs_path(&self) -> PathBuf {
        self.storage_dir.join("jobs.json")
    }

    fn schedules_path(&self) -> PathBuf {
        self.storage_dir.join("schedules.json")
    }

    async fn load_from_disk(&self) -> Result<()> {
        if let Ok(data) = fs::read_to_string(self.jobs_path()).await {
            if let Ok(jobs) = serde_json::from_str::<Vec<JobRecord>>(&data) {
                for job in jobs {
                    self.inner.enqueue(job).await?;
                }
            }
        }

        if let Ok(data) = fs::read_to_string(self.schedules_path()).await {
            if let Ok(schedules) = serde_json::from_str::<Vec<RecurringSchedule>>(&data) {
                for schedule in schedules {
                    self.inner.save_schedule(schedule).await?;
                }
            }
        }

        Ok(())
    }

    async fn persist_jobs(&self) -> Result<()> {
        let jobs = self.inner.snapshot_jobs().await;
        let json = serde_json::to_string_pretty(&jobs)
            .map_err(|e| QueueError::Storage(format!("failed to serialize jobs: {}", e)))?;
        fs::write(self.jobs_path(), json)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to write jobs file: {}", e)))
    }

    async fn persist_schedules(&self) -> Result<()> {
        let schedules = self.inner.snapshot_schedules().await;
        let json = serde_json::to_string_pretty(&schedules)
            .map_err(|e| QueueError::Storage(format!("failed to serialize schedules: {}", e)))?;
        fs::write(self.schedules_path(), json)
            .await
            .map_err(|e| QueueError::Storage(format!("failed to write schedules file: {}", e)))
    }
}

#[async_trait]
impl JobStore for LocalStore {
    async fn enqueue(&self, job: JobRecord) -> Result<()> {
        self.inner.enqueue(job).await?;
        self.persist_jobs().await
    }

    async fn dequeue_next(
        &self,
        queue: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<Option<JobRecord>> {
        let job = self.inner.dequeue_next(queue, now, lease_until).await?;
        if job.is_some() {
            self.persist_jobs().await?;
        }
        Ok(job)
    }

    async fn mark_completed(
        &self,
        queue: &str,
        id: JobId,
        result: serde_json::Value,
    ) -> Result<()> {
        self.inner.mark_completed(queue, id, result).await?;
        self.persist_jobs().await
    }

    async fn mark_failed(&self, queue: &str, id: JobId, reason: &str) -> Result<()> {
        self.inner.mark_failed(queue, id, reason).await?;
        self.persist_jobs().await
    }

    async fn mark_retry(
        &self,
        queue: &str,
        id: JobId,
        reason: &str,
        run_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.mark_retry(queue, id, reason, run_at).await?;
        self.persist_jobs().await
    }

    async fn renew_lease(
        &self,
        queue: &str,
        id: JobId,
        lease_until: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner.renew_lease(queue, id, lease_until).await
    }

    async fn reclaim_expired(
        &self,
        queue: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<(JobRecord, StallAction)>> {
        let outcomes = self.inner.reclaim_expired(queue, now).await?;
        if !outcomes.is_empty() {
            self.persist_jobs().await?;
        }
        Ok(outcomes)
    }

    async fn reclaim_active(&self, queue: &str) -> Result<usize> {
        let count = self.inner.reclaim_active(queue).await?;
        if count > 0 {
            self.persist_jobs().await?;
        }
        Ok(count)
    }

    async fn counts(&self, queue: &str) -> Result<StateCounts> {
        self.inner.counts(queue).await
    }

    async fn list_by_state(&self, queue: &str, state: JobState) -> Result<Vec<JobRecord>> {
        self.inner.list_by_state(queue, state).await
    }

    async fn get_job(&self, queue: &str, id: JobId) -> Result<Option<JobRecord>> {
        self.inner.get_job(queue, id).await
    }

    async fn trim_history(&self, queue: &str, retention: &RetentionPolicy) -> Result<usize> {
        self.inner.trim_history(queue, retention).await
    }

    async fn save_schedule(&self, schedule: RecurringSchedule) -> Result<()> {
        self.inner.save_schedule(schedule).await?;
        self.persist_schedules().await
    }

    async fn load_schedules(&self) -> Result<Vec<RecurringSchedule>> {
        self.inner.load_schedules().await
    }

    async fn remove_schedule(&self, id: ScheduleId) -> Result<()> {
        self.inner.remove_schedule(id).await?;
        self.persist_schedules().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(queue: &str, name: &str) -> JobRecord {
        JobRecord::new(queue, name, serde_json::json!({}))
    }

    fn lease(now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(30)
    }

    #[tokio::test]
    async fn test_enqueue_and_dequeue_fifo() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let first = job("emails", "first");
        let second = job("emails", "second");
        store.enqueue(first.clone()).await.unwrap();
        store.enqueue(second.clone()).await.unwrap();

        let a = store
            .dequeue_next("emails", now, lease(now))
            .await
            .unwrap()
            .unwrap();
        let b = store
            .dequeue_next("emails", now, lease(now))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(a.id, first.id);
        assert_eq!(b.id, second.id);
        assert_eq!(a.state, JobState::Active);
        assert_eq!(a.attempts_made, 1);
    }

    #[tokio::test]
    async fn test_dequeue_respects_priority() {
        let store = MemoryStore::new();
        let now = Utc::now();

        // Lower priority number runs first, even if enqueued later.
        let low = job("q", "low").with_priority(5);
        let high = job("q", "high").with_priority(1);
        store.enqueue(low.clone()).await.unwrap();
        store.enqueue(high.clone()).await.unwrap();

        let first = store
            .dequeue_next("q", now, lease(now))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, high.id);
    }

    #[tokio::test]
    async fn test_dequeue_skips_delayed_until_due() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let delayed = job("q", "later").with_delay(Duration::from_secs(60));
        store.enqueue(delayed.clone()).await.unwrap();

        assert!(store
            .dequeue_next("q", now, lease(now))
            .await
            .unwrap()
            .is_none());

        let future = now + chrono::Duration::seconds(61);
        let taken = store
            .dequeue_next("q", future, lease(future))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(taken.id, delayed.id);
    }

    #[tokio::test]
    async fn test_concurrent_dequeue_mutual_exclusion() {
        let store = Arc::new(MemoryStore::new());

        for i in 0..20 {
            store.enqueue(job("q", &format!("job-{}", i))).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let now = Utc::now();
                store.dequeue_next("q", now, lease(now)).await.unwrap()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            if let Some(record) = handle.await.unwrap() {
                assert!(seen.insert(record.id), "job dequeued twice");
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test]
    async fn test_mark_completed() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.enqueue(job("q", "work")).await.unwrap();
        let record = store
            .dequeue_next("q", now, lease(now))
            .await
            .unwrap()
            .unwrap();

        store
            .mark_completed("q", record.id, serde_json::json!({"ok": true}))
            .await
            .unwrap();

        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.active, 0);
        assert_eq!(counts.completed, 1);

        let done = store.get_job("q", record.id).await.unwrap().unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.result, Some(serde_json::json!({"ok": true})));
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_completed_twice_is_an_error() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.enqueue(job("q", "work")).await.unwrap();
        let record = store
            .dequeue_next("q", now, lease(now))
            .await
            .unwrap()
            .unwrap();

        store
            .mark_completed("q", record.id, serde_json::json!(null))
            .await
            .unwrap();
        let err = store
            .mark_completed("q", record.id, serde_json::json!(null))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_mark_retry_requeues_delayed() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.enqueue(job("q", "flaky")).await.unwrap();
        let record = store
            .dequeue_next("q", now, lease(now))
            .await
            .unwrap()
            .unwrap();

        let run_at = now + chrono::Duration::milliseconds(500);
        store
            .mark_retry("q", record.id, "boom", run_at)
            .await
            .unwrap();

        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.active, 0);
        assert_eq!(counts.delayed, 1);

        // Not due yet.
        assert!(store
            .dequeue_next("q", now, lease(now))
            .await
            .unwrap()
            .is_none());

        // Due after the delay; retry preserved attempt count and reason.
        let later = now + chrono::Duration::seconds(1);
        let again = store
            .dequeue_next("q", later, lease(later))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.id, record.id);
        assert_eq!(again.attempts_made, 2);
        assert_eq!(again.failure_reason.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_retry_preserves_priority() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.enqueue(job("q", "urgent").with_priority(1)).await.unwrap();
        let record = store
            .dequeue_next("q", now, lease(now))
            .await
            .unwrap()
            .unwrap();
        store.mark_retry("q", record.id, "err", now).await.unwrap();

        store.enqueue(job("q", "casual").with_priority(5)).await.unwrap();

        let next = store
            .dequeue_next("q", now, lease(now))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, record.id);
        assert_eq!(next.priority, 1);
    }

    #[tokio::test]
    async fn test_renew_lease() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.enqueue(job("q", "long")).await.unwrap();
        let record = store
            .dequeue_next("q", now, lease(now))
            .await
            .unwrap()
            .unwrap();

        assert!(store
            .renew_lease("q", record.id, now + chrono::Duration::seconds(60))
            .await
            .unwrap());

        store
            .mark_completed("q", record.id, serde_json::json!(null))
            .await
            .unwrap();
        assert!(!store
            .renew_lease("q", record.id, now + chrono::Duration::seconds(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reclaim_expired_first_stall_requeues() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.enqueue(job("q", "crashy")).await.unwrap();
        let record = store
            .dequeue_next("q", now, now + chrono::Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();

        let later = now + chrono::Duration::seconds(2);
        let outcomes = store.reclaim_expired("q", later).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0.id, record.id);
        assert_eq!(outcomes[0].1, StallAction::Requeued);

        // Back in the pending set without a consumed attempt.
        let again = store
            .dequeue_next("q", later, lease(later))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.attempts_made, 1);
        assert_eq!(again.stalls, 1);
    }

    #[tokio::test]
    async fn test_reclaim_expired_second_stall_counts_as_attempt() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .enqueue(
                job("q", "crashy")
                    .with_attempts_limit(3)
                    .with_backoff(Backoff::fixed(Duration::from_millis(10))),
            )
            .await
            .unwrap();

        // First stall cycle.
        store
            .dequeue_next("q", now, now + chrono::Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        let t1 = now + chrono::Duration::seconds(2);
        store.reclaim_expired("q", t1).await.unwrap();

        // Second stall cycle: counts as a failed attempt, goes to delayed.
        store
            .dequeue_next("q", t1, t1 + chrono::Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        let t2 = t1 + chrono::Duration::seconds(2);
        let outcomes = store.reclaim_expired("q", t2).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, StallAction::Retried);
        assert_eq!(store.counts("q").await.unwrap().delayed, 1);
    }

    #[tokio::test]
    async fn test_reclaim_expired_exhausted_fails() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .enqueue(job("q", "crashy").with_attempts_limit(1))
            .await
            .unwrap();

        store
            .dequeue_next("q", now, now + chrono::Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        let t1 = now + chrono::Duration::seconds(2);
        store.reclaim_expired("q", t1).await.unwrap();

        store
            .dequeue_next("q", t1, t1 + chrono::Duration::seconds(1))
            .await
            .unwrap()
            .unwrap();
        let t2 = t1 + chrono::Duration::seconds(2);
        let outcomes = store.reclaim_expired("q", t2).await.unwrap();

        assert_eq!(outcomes[0].1, StallAction::Failed);
        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.failed, 1);
    }

    #[tokio::test]
    async fn test_reclaim_active_on_shutdown() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.enqueue(job("q", "one")).await.unwrap();
        store.enqueue(job("q", "two")).await.unwrap();
        store.dequeue_next("q", now, lease(now)).await.unwrap();
        store.dequeue_next("q", now, lease(now)).await.unwrap();

        let moved = store.reclaim_active("q").await.unwrap();
        assert_eq!(moved, 2);

        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.active, 0);
        assert_eq!(counts.waiting, 2);
    }

    #[tokio::test]
    async fn test_counts_and_list_by_state() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store.enqueue(job("q", "ready")).await.unwrap();
        store
            .enqueue(job("q", "later").with_delay(Duration::from_secs(300)))
            .await
            .unwrap();
        store.enqueue(job("q", "running")).await.unwrap();
        store.dequeue_next("q", now, lease(now)).await.unwrap();

        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.delayed, 1);
        assert_eq!(counts.active, 1);

        assert_eq!(store.list_by_state("q", JobState::Waiting).await.unwrap().len(), 1);
        assert_eq!(store.list_by_state("q", JobState::Delayed).await.unwrap().len(), 1);
        assert_eq!(store.list_by_state("q", JobState::Active).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trim_history_by_count() {
        let store = MemoryStore::new();
        let now = Utc::now();

        for i in 0..5 {
            store.enqueue(job("q", &format!("j{}", i))).await.unwrap();
            let record = store
                .dequeue_next("q", now, lease(now))
                .await
                .unwrap()
                .unwrap();
            store
                .mark_completed("q", record.id, serde_json::json!(null))
                .await
                .unwrap();
        }

        let retention = RetentionPolicy::new(Duration::from_secs(3600), 2);
        let dropped = store.trim_history("q", &retention).await.unwrap();
        assert_eq!(dropped, 3);

        // Cumulative totals are unaffected by trimming.
        assert_eq!(store.counts("q").await.unwrap().completed, 5);
        assert_eq!(
            store.list_by_state("q", JobState::Completed).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_schedules_roundtrip() {
        let store = MemoryStore::new();

        let schedule =
            RecurringSchedule::new("emails", "digest", serde_json::json!({}), "0 * * * * *")
                .unwrap();
        let id = schedule.id;
        store.save_schedule(schedule).await.unwrap();

        let loaded = store.load_schedules().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, id);

        store.remove_schedule(id).await.unwrap();
        assert!(store.load_schedules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_store_survives_restart() {
        let temp_dir = tempfile::TempDir::new().unwrap();

        {
            let store = LocalStore::new(temp_dir.path().to_path_buf()).await.unwrap();
            store.enqueue(job("emails", "send")).await.unwrap();
            let schedule = RecurringSchedule::new(
                "emails",
                "digest",
                serde_json::json!({}),
                "0 * * * * *",
            )
            .unwrap();
            store.save_schedule(schedule).await.unwrap();
        }

        // Simulated restart: a fresh store over the same directory.
        let store = LocalStore::new(temp_dir.path().to_path_buf()).await.unwrap();
        let counts = store.counts("emails").await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(store.load_schedules().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_store_replays_active_as_waiting() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let now = Utc::now();

        {
            let store = LocalStore::new(temp_dir.path().to_path_buf()).await.unwrap();
            store.enqueue(job("q", "interrupted")).await.unwrap();
            // Dequeue but never finish, as if the process died mid-run.
            store.dequeue_next("q", now, lease(now)).await.unwrap();
        }

        let store = LocalStore::new(temp_dir.path().to_path_buf()).await.unwrap();
        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.active, 0);

        let record = store
            .dequeue_next("q", Utc::now(), lease(Utc::now()))
            .await
            .unwrap()
            .unwrap();
        // The interrupted attempt did not count.
        assert_eq!(record.attempts_made, 1);
    }
}
