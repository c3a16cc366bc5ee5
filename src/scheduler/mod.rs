//! Feed update scheduling.
//!
//! The scheduler owns a cron-style timer set keyed by feed ID and a bounded
//! in-process job queue consumed by a single worker, so feed updates are
//! strictly serialized across the whole process. A feed with an explicit
//! cron expression waits for its next tick; a feed with only an interval is
//! kicked once at startup and then fires every interval. A fire is dropped
//! when the previous run for that entry is still queued or executing.

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::model::TriggerType;
use crate::update::Updater;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod cron;

use cron::CronSchedule;

/// Capacity of the in-process update queue
const QUEUE_CAPACITY: usize = 16;

/// How often the timer scans for due entries
const TICK: Duration = Duration::from_secs(10);

/// Effective schedule of one feed
#[derive(Clone, Debug)]
enum Schedule {
    /// Explicit cron expression; first fire waits for the next tick
    Cron(CronSchedule),
    /// Interval; implies an immediate boot-time kick
    Every(Duration),
}

impl Schedule {
    fn next_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(schedule) => schedule.next_after(now),
            Schedule::Every(interval) => {
                Some(now + chrono::Duration::from_std(*interval).unwrap_or_default())
            }
        }
    }
}

struct Entry {
    schedule: Schedule,
    next_fire: Option<DateTime<Utc>>,
    /// Set while a fire for this entry is queued or executing; further
    /// fires are dropped until the worker clears it.
    in_flight: Arc<AtomicBool>,
}

/// One unit of work for the worker
struct Job {
    config: FeedConfig,
    trigger: TriggerType,
    in_flight: Option<Arc<AtomicBool>>,
}

/// Drives periodic feed refreshes through a bounded queue and one worker
pub struct Scheduler {
    updater: Arc<Updater>,
    shutdown: CancellationToken,
    queue_tx: mpsc::Sender<Job>,
    queue_rx: Mutex<Option<mpsc::Receiver<Job>>>,
    entries: Mutex<HashMap<String, Entry>>,
    tick: Duration,
}

impl Scheduler {
    /// Create a scheduler wired to the updater and the root cancellation
    /// token
    pub fn new(updater: Arc<Updater>, shutdown: CancellationToken) -> Self {
        Self::with_tick(updater, shutdown, TICK)
    }

    fn with_tick(updater: Arc<Updater>, shutdown: CancellationToken, tick: Duration) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            updater,
            shutdown,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            entries: Mutex::new(HashMap::new()),
            tick,
        }
    }

    /// Register a feed's schedule.
    ///
    /// Interval-only feeds are pushed onto the queue immediately (the
    /// boot-time kick); feeds with an explicit cron expression wait for
    /// their next tick.
    pub fn register_feed(&self, config: &FeedConfig) -> Result<()> {
        let (schedule, has_explicit_cron) = effective_schedule(config)?;

        let now = Utc::now();
        let in_flight = Arc::new(AtomicBool::new(false));
        let next_fire = schedule.next_fire(now);

        tracing::debug!(
            feed_id = %config.id,
            ?schedule,
            next_fire = ?next_fire,
            "registered feed schedule"
        );

        self.lock_entries().insert(
            config.id.clone(),
            Entry {
                schedule,
                next_fire,
                in_flight: Arc::clone(&in_flight),
            },
        );

        if !has_explicit_cron {
            in_flight.store(true, Ordering::SeqCst);
            let job = Job {
                config: config.clone(),
                trigger: TriggerType::Scheduled,
                in_flight: Some(Arc::clone(&in_flight)),
            };
            if self.queue_tx.try_send(job).is_err() {
                // Queue full at boot; fall back to firing on the first tick.
                in_flight.store(false, Ordering::SeqCst);
                if let Some(entry) = self.lock_entries().get_mut(&config.id) {
                    entry.next_fire = Some(now);
                }
            }
        }

        Ok(())
    }

    /// Forget a feed's schedule
    pub fn unregister_feed(&self, feed_id: &str) {
        self.lock_entries().remove(feed_id);
    }

    /// Enqueue a manual refresh; fails when the queue is full
    pub fn enqueue_refresh(&self, config: FeedConfig) -> Result<()> {
        let job = Job {
            config,
            trigger: TriggerType::Manual,
            in_flight: None,
        };
        self.queue_tx
            .try_send(job)
            .map_err(|_| Error::ApiServer("update queue is full".into()))
    }

    /// Next scheduled fire time for a feed, for reporting
    pub fn next_fire(&self, feed_id: &str) -> Option<DateTime<Utc>> {
        self.lock_entries().get(feed_id).and_then(|e| e.next_fire)
    }

    /// Spawn the timer and the single worker.
    ///
    /// Both exit when the cancellation token fires; the queue is then
    /// drained and closed. Calling `start` twice is an error.
    #[allow(clippy::type_complexity)]
    pub fn start(
        self: &Arc<Self>,
    ) -> Result<(tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>)> {
        let receiver = self
            .queue_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| Error::ApiServer("scheduler already started".into()))?;

        let worker = tokio::spawn(Arc::clone(self).run_worker(receiver));
        let timer = tokio::spawn(Arc::clone(self).run_timer());
        Ok((worker, timer))
    }

    async fn run_timer(self: Arc<Self>) {
        tracing::info!("scheduler timer started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }

            let now = Utc::now();
            for due in self.collect_due(now) {
                let Some(config) = self.updater.feed_config(&due.feed_id) else {
                    tracing::debug!(feed_id = %due.feed_id, "feed gone, unregistering");
                    self.unregister_feed(&due.feed_id);
                    due.in_flight.store(false, Ordering::SeqCst);
                    continue;
                };

                tracing::debug!(feed_id = %due.feed_id, "adding feed to update queue");
                let job = Job {
                    config,
                    trigger: TriggerType::Scheduled,
                    in_flight: Some(Arc::clone(&due.in_flight)),
                };
                if self.queue_tx.try_send(job).is_err() {
                    tracing::warn!(feed_id = %due.feed_id, "update queue full, dropping fire");
                    due.in_flight.store(false, Ordering::SeqCst);
                }
            }
        }

        tracing::info!("scheduler timer stopped");
    }

    /// Collect entries due at `now`, marking them in flight and advancing
    /// their next fire time. Entries whose previous run is still executing
    /// are skipped (overlap is dropped, not queued).
    fn collect_due(&self, now: DateTime<Utc>) -> Vec<DueFire> {
        let mut due = Vec::new();
        let mut entries = self.lock_entries();

        for (feed_id, entry) in entries.iter_mut() {
            let Some(next_fire) = entry.next_fire else {
                continue;
            };
            if next_fire > now {
                continue;
            }

            entry.next_fire = entry.schedule.next_fire(now);

            if entry.in_flight.load(Ordering::SeqCst) {
                tracing::debug!(feed_id, "previous run still executing, dropping fire");
                continue;
            }

            entry.in_flight.store(true, Ordering::SeqCst);
            due.push(DueFire {
                feed_id: feed_id.clone(),
                in_flight: Arc::clone(&entry.in_flight),
            });
        }

        due
    }

    async fn run_worker(self: Arc<Self>, mut receiver: mpsc::Receiver<Job>) {
        tracing::info!("update worker started");

        loop {
            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            // Strictly serial: one feed update at a time across the
            // process.
            if let Err(e) = self.updater.update(&job.config, job.trigger).await {
                tracing::error!(feed_id = %job.config.id, error = %e, "failed to update feed");
            } else if let Some(next) = self.next_fire(&job.config.id) {
                tracing::info!(feed_id = %job.config.id, next = %next, "next scheduled update");
            }

            if let Some(in_flight) = job.in_flight {
                in_flight.store(false, Ordering::SeqCst);
            }
        }

        receiver.close();
        tracing::info!("update worker stopped");
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct DueFire {
    feed_id: String,
    in_flight: Arc<AtomicBool>,
}

/// Resolve a feed's effective schedule.
///
/// Returns the schedule plus whether it came from an explicit cron
/// expression (which defers the first run to the next tick).
fn effective_schedule(config: &FeedConfig) -> Result<(Schedule, bool)> {
    if !config.cron_schedule.is_empty() {
        let schedule = CronSchedule::parse(&config.cron_schedule)?;
        Ok((Schedule::Cron(schedule), true))
    } else {
        Ok((Schedule::Every(config.update_period), false))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
