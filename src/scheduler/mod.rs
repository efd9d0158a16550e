//! Slot scheduler: admission, placement, cancellation, completion.
//!
//! The scheduler loop is a single task that owns the queue, slot pool,
//! and running set behind one mutex (never held across an await).
//! Executors run as spawned tasks, one per admitted job. Each executor
//! finalizes its own job, which is what guarantees that slots are
//! released on success, failure, and cancellation alike.

use crate::engine::EngineSet;
use crate::error::Result;
use crate::events::JobEvent;
use crate::history::JobHistory;
use crate::jobs::{JobState, JobView, QueryJob};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub mod queue;
pub mod slots;

use queue::JobQueue;
use slots::{Slot, SlotPool};

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued and has been removed outright.
    Removed,
    /// The job is running; its cancellation token has been set and the
    /// executor will wind down cooperatively.
    Marked,
    /// No queued or running job with that id.
    NotFound,
}

/// Aggregate counters for the status surface.
#[derive(Debug, Clone)]
pub struct SlotUsage {
    pub total_slots: usize,
    pub available_slots: usize,
    /// Slots held by the running set, per its own bookkeeping.
    pub held_slots: usize,
    pub queued_jobs: usize,
    pub running_jobs: usize,
    pub slots: Vec<Slot>,
}

struct RunningJob {
    job: QueryJob,
    slot_ids: Vec<String>,
    cancel: CancellationToken,
}

/// Queue + slots + running set. One lock guards all three so job
/// hand-offs are atomic with respect to external observers.
struct Core {
    slots: SlotPool,
    queue: JobQueue,
    running: HashMap<String, RunningJob>,
}

struct Inner {
    core: Mutex<Core>,
    notify: Notify,
    events: broadcast::Sender<JobEvent>,
    history: JobHistory,
    engines: EngineSet,
    tick: Duration,
}

/// Handle to the scheduler, cheap to clone. `run` drives the admission
/// loop; everything else is safe to call from any task.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        total_slots: usize,
        tick: Duration,
        engines: EngineSet,
        history: JobHistory,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    slots: SlotPool::new(total_slots),
                    queue: JobQueue::new(),
                    running: HashMap::new(),
                }),
                notify: Notify::new(),
                events,
                history,
                engines,
                tick,
            }),
        }
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub fn history(&self) -> &JobHistory {
        &self.inner.history
    }

    /// Accept a job into the queue and wake the loop.
    pub fn submit(&self, job: QueryJob) -> JobView {
        let view = JobView::from(&job);
        {
            let mut core = self.inner.core.lock().expect("scheduler lock poisoned");
            core.queue.enqueue(job);
        }
        debug!(job_id = view.job_id, priority = view.priority, "job queued");
        let _ = self.inner.events.send(JobEvent::Created { job: view.clone() });
        self.inner.notify.notify_one();
        view
    }

    /// Cancel a queued or running job.
    ///
    /// Queued jobs are removed synchronously and recorded as CANCELLED.
    /// Running jobs only get their token set; the executor observes it
    /// cooperatively and finalizes the job itself.
    pub async fn cancel(&self, job_id: &str) -> Result<CancelOutcome> {
        let removed = {
            let mut core = self.inner.core.lock().expect("scheduler lock poisoned");
            if let Some(mut job) = core.queue.remove(job_id) {
                job.state = JobState::Cancelled;
                job.completed_at = Some(Utc::now());
                Some(job)
            } else if let Some(running) = core.running.get(job_id) {
                running.cancel.cancel();
                None
            } else {
                return Ok(CancelOutcome::NotFound);
            }
        };

        match removed {
            Some(job) => {
                self.inner.history.append(&job).await?;
                info!(job_id, "queued job cancelled");
                let _ = self.inner.events.send(JobEvent::Finished {
                    job_id: job.job_id.clone(),
                    state: JobState::Cancelled,
                });
                Ok(CancelOutcome::Removed)
            }
            None => {
                info!(job_id, "running job marked for cancellation");
                Ok(CancelOutcome::Marked)
            }
        }
    }

    /// Snapshot a job that is still queued or running.
    ///
    /// Terminal jobs live in history; callers fall back there on None.
    pub fn get_active(&self, job_id: &str) -> Option<JobView> {
        let core = self.inner.core.lock().expect("scheduler lock poisoned");
        if let Some(running) = core.running.get(job_id) {
            return Some(JobView::from(&running.job));
        }
        core.queue
            .iter()
            .find(|job| job.job_id == job_id)
            .map(JobView::from)
    }

    /// Snapshot all queued and running jobs.
    pub fn active_jobs(&self) -> (Vec<JobView>, Vec<JobView>) {
        let core = self.inner.core.lock().expect("scheduler lock poisoned");
        let queued = core.queue.iter().map(JobView::from).collect();
        let running = core.running.values().map(|r| JobView::from(&r.job)).collect();
        (queued, running)
    }

    /// Slot and queue counters for the status surface.
    pub fn usage(&self) -> SlotUsage {
        let core = self.inner.core.lock().expect("scheduler lock poisoned");
        SlotUsage {
            total_slots: core.slots.total(),
            available_slots: core.slots.count_available(),
            held_slots: core
                .running
                .values()
                .map(|r| r.job.actual_slots_used)
                .sum(),
            queued_jobs: core.queue.len(),
            running_jobs: core.running.len(),
            slots: core.slots.snapshot(),
        }
    }

    /// Run the admission loop until a shutdown signal arrives.
    ///
    /// Wakes on new submissions, executor completions, and a periodic
    /// tick. On shutdown, stops admitting and cancels the tokens of
    /// everything still running; executors finish finalization on
    /// their own.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(tick = ?self.inner.tick, "scheduler started");
        let mut interval = tokio::time::interval(self.inner.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.inner.notify.notified() => {}
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
            self.dispatch_ready();
        }

        let cancelled = {
            let core = self.inner.core.lock().expect("scheduler lock poisoned");
            for running in core.running.values() {
                running.cancel.cancel();
            }
            core.running.len()
        };
        if cancelled > 0 {
            warn!(count = cancelled, "cancelled running jobs for shutdown");
        }
        info!("scheduler exiting gracefully");
    }

    /// Admit queued jobs while the head of the queue fits in the free
    /// slots. Executors are spawned outside the lock.
    fn dispatch_ready(&self) {
        let mut dispatches = Vec::new();
        {
            let mut core = self.inner.core.lock().expect("scheduler lock poisoned");
            loop {
                let needed = match core.queue.peek() {
                    Some(next) => next.estimated_slots,
                    None => break,
                };
                if core.slots.count_available() < needed {
                    break;
                }
                let Some(mut job) = core.queue.pop() else { break };

                let Some(slot_ids) = core.slots.reserve(needed, &job.job_id) else {
                    // Availability changed between peek and reserve;
                    // put the job back and retry on the next wake.
                    core.queue.enqueue(job);
                    break;
                };

                job.state = JobState::Running;
                job.started_at = Some(Utc::now());
                job.actual_slots_used = slot_ids.len();

                let cancel = CancellationToken::new();
                core.running.insert(
                    job.job_id.clone(),
                    RunningJob {
                        job: job.clone(),
                        slot_ids,
                        cancel: cancel.clone(),
                    },
                );
                dispatches.push((job, cancel));
            }
        }

        for (job, cancel) in dispatches {
            info!(
                job_id = job.job_id,
                engine = job.engine,
                slots = job.actual_slots_used,
                "job started"
            );
            let _ = self.inner.events.send(JobEvent::Started {
                job_id: job.job_id.clone(),
                slots: job.actual_slots_used,
            });
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.run_executor(job, cancel).await;
            });
        }
    }

    /// Execute one admitted job and finalize it.
    ///
    /// The engine call races the cancellation token and the job's own
    /// max execution time; whichever resolves first decides the
    /// terminal state.
    async fn run_executor(&self, job: QueryJob, cancel: CancellationToken) {
        let job_id = job.job_id.clone();

        let outcome = match self.inner.engines.get(&job.engine) {
            None => ExecOutcome::Failed(format!("Engine '{}' not available", job.engine)),
            Some(engine) => {
                tokio::select! {
                    _ = cancel.cancelled() => ExecOutcome::Cancelled,
                    result = tokio::time::timeout(job.max_execution_time, engine.execute(&job.sql)) => {
                        match result {
                            Err(_) => ExecOutcome::Failed(format!(
                                "Query exceeded max execution time of {}s",
                                job.max_execution_time.as_secs()
                            )),
                            Ok(Ok(execution)) => ExecOutcome::Completed(Box::new(execution)),
                            Ok(Err(e)) => ExecOutcome::Failed(e.to_string()),
                        }
                    }
                }
            }
        };

        self.finalize(&job_id, outcome).await;
    }

    /// Move a job out of the running set, release its slots, and
    /// append the terminal snapshot to history.
    async fn finalize(&self, job_id: &str, outcome: ExecOutcome) {
        let job = {
            let mut core = self.inner.core.lock().expect("scheduler lock poisoned");
            let Some(running) = core.running.remove(job_id) else {
                // Finalized elsewhere (should not happen; executors own
                // their job exclusively).
                return;
            };
            core.slots.release(&running.slot_ids);

            let mut job = running.job;
            job.completed_at = Some(Utc::now());
            match outcome {
                ExecOutcome::Completed(result) => {
                    job.state = JobState::Completed;
                    job.rows_processed = result.rows;
                    job.memory_used_mb = result.performance_metrics.memory_used_mb;
                    job.result = Some(*result);
                }
                ExecOutcome::Failed(message) => {
                    job.state = JobState::Failed;
                    job.error = Some(message);
                }
                ExecOutcome::Cancelled => {
                    job.state = JobState::Cancelled;
                }
            }
            job
        };

        match job.state {
            JobState::Completed => info!(
                job_id,
                rows = job.rows_processed,
                execution_time = job.execution_time(),
                "job completed"
            ),
            JobState::Failed => warn!(job_id, error = ?job.error, "job failed"),
            _ => info!(job_id, "job cancelled"),
        }

        if let Err(e) = self.inner.history.append(&job).await {
            error!(job_id, error = %e, "failed to append job to history");
        }
        let _ = self.inner.events.send(JobEvent::Finished {
            job_id: job.job_id.clone(),
            state: job.state,
        });
        // Freed slots may let the next queued job through immediately.
        self.inner.notify.notify_one();
    }
}

enum ExecOutcome {
    Completed(Box<crate::engine::ExecutionResult>),
    Failed(String),
    Cancelled,
}
