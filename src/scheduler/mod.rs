//! Per-site discovery scheduling
//!
//! Each active site owns one cancellable timer task. The task sleeps until
//! the site is due, runs discovery under the site's run lock, then
//! recomputes the next due time from the persisted last successful run and
//! sleeps again. There is no global tick.
//!
//! Timers live in the process that armed them. Management operations made
//! by another process only touch the store; a long-running scheduler picks
//! them up through [`Scheduler::sync_with_store`].

use crate::config::Config;
use crate::discovery::{DiscoveryReport, DiscoveryTracker};
use crate::error::{Error, Result};
use crate::meta::{DiscoveryRunLog, MetaDb, RunOutcome, SiteConfig};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// When a site is next due.
///
/// A site that never completed a run is due immediately; otherwise it is
/// due one frequency period after its last successful run, which may
/// already be in the past.
pub fn compute_next_due(
    last_run: Option<DateTime<Utc>>,
    frequency: Duration,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match last_run {
        Some(last) => last + frequency,
        None => now,
    }
}

/// Time left until `due`, zero when it already passed
pub fn delay_until(due: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (due - now).to_std().unwrap_or(std::time::Duration::ZERO)
}

/// Scheduling state of one site
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub site_id: String,
    pub active: bool,
    /// A timer is armed, or when read from the store, will be armed by a
    /// serving scheduler
    pub is_scheduled: bool,
    pub next_due: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub frequency_minutes: u32,
}

impl ScheduleStatus {
    /// Status derived from persisted state alone
    pub fn from_site(site: &SiteConfig, now: DateTime<Utc>) -> Self {
        Self {
            site_id: site.id.clone(),
            active: site.active,
            is_scheduled: site.active,
            next_due: site
                .active
                .then(|| compute_next_due(site.last_successful_run, site.frequency(), now)),
            last_run: site.last_successful_run,
            frequency_minutes: site.frequency_minutes,
        }
    }
}

/// Execution counters since the scheduler was created
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SchedulerStats {
    pub scheduled: usize,
    pub executions: u64,
    pub failures: u64,
}

struct Timer {
    generation: u64,
    token: CancellationToken,
    next_due: DateTime<Utc>,
    /// Site state the due time was computed from
    frequency_minutes: u32,
    last_run: Option<DateTime<Utc>>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunTrigger {
    Timer,
    Manual,
}

struct Inner {
    db: MetaDb,
    tracker: Arc<DiscoveryTracker>,
    run_timeout: std::time::Duration,
    timers: Mutex<HashMap<String, Timer>>,
    run_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    generations: AtomicU64,
    executions: AtomicU64,
    failures: AtomicU64,
}

/// Timer-driven discovery scheduler
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(db: MetaDb, tracker: Arc<DiscoveryTracker>, config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                tracker,
                run_timeout: config.scheduler.run_timeout(),
                timers: Mutex::new(HashMap::new()),
                run_locks: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
                executions: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// Arm (or re-arm) the timer for a site and return its next due time.
    ///
    /// Any existing timer for the site is cancelled first. Inactive sites
    /// are not armed.
    pub fn schedule_site(&self, site: &SiteConfig) -> Option<DateTime<Utc>> {
        self.inner.cancel_timer(&site.id);
        if !site.active {
            debug!("Site {} is paused, not scheduling", site.id);
            return None;
        }

        let now = Utc::now();
        let next_due = compute_next_due(site.last_successful_run, site.frequency(), now);
        self.arm(site, next_due);

        if next_due <= now {
            info!("Site {} is due now", site.id);
        } else {
            info!("Site {} scheduled for {}", site.id, next_due.to_rfc3339());
        }
        Some(next_due)
    }

    fn arm(&self, site: &SiteConfig, next_due: DateTime<Utc>) {
        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        // Holding the map lock while spawning keeps the task from observing
        // a missing entry on its first re-arm.
        let mut timers = lock(&self.inner.timers);
        let handle = tokio::spawn(site_loop(
            self.inner.clone(),
            site.id.clone(),
            site.frequency(),
            generation,
            token.clone(),
            next_due,
        ));
        timers.insert(
            site.id.clone(),
            Timer {
                generation,
                token,
                next_due,
                frequency_minutes: site.frequency_minutes,
                last_run: site.last_successful_run,
                handle,
            },
        );
    }

    /// Arm every active site, returning how many were scheduled
    pub async fn schedule_all_active(&self) -> Result<usize> {
        let sites = self.inner.db.list_active_sites().await?;
        for site in &sites {
            self.schedule_site(site);
        }
        info!("Scheduled {} active sites", sites.len());
        Ok(sites.len())
    }

    /// Bring this scheduler's timers in line with the store.
    ///
    /// Sites paused elsewhere lose their timer, active sites without one are
    /// armed, and a timer whose site changed frequency or last successful run
    /// since it was armed is re-armed. Returns how many sites changed.
    pub async fn sync_with_store(&self) -> Result<usize> {
        let sites = self.inner.db.list_sites().await?;
        let mut changed = 0;

        for site in &sites {
            let armed = lock(&self.inner.timers)
                .get(&site.id)
                .map(|t| (t.frequency_minutes, t.last_run));

            match armed {
                Some(_) if !site.active => {
                    self.inner.cancel_timer(&site.id);
                    info!("Site {} was paused, timer cancelled", site.id);
                }
                None if site.active => {
                    self.schedule_site(site);
                }
                Some((frequency, last_run))
                    if site.active
                        && (frequency != site.frequency_minutes || last_run != site.last_successful_run) =>
                {
                    debug!("Site {} changed since it was armed", site.id);
                    self.schedule_site(site);
                }
                _ => continue,
            }
            changed += 1;
        }

        if changed > 0 {
            info!("Synced {} sites from the store", changed);
        }
        Ok(changed)
    }

    /// Cancel the pending timer, run discovery now, then re-arm.
    ///
    /// Runs even when the site is paused; a paused site is not re-armed.
    pub async fn trigger_now(&self, site_id: &str) -> Result<DiscoveryReport> {
        let site = self.inner.db.require_site(site_id).await?;
        self.inner.cancel_timer(site_id);

        let report = self
            .inner
            .execute(&site.id, RunTrigger::Manual)
            .await
            .ok_or_else(|| Error::Other(format!("Run for {} was skipped", site.id)))?;

        match self.inner.db.get_site(site_id).await? {
            Some(fresh) if fresh.active => {
                self.inner.cancel_timer(site_id);
                self.arm(&fresh, next_after_run(&fresh, Utc::now()));
            }
            _ => debug!("Site {} not re-armed", site_id),
        }
        Ok(report)
    }

    /// Clear the active flag and cancel the timer; an in-flight run finishes
    pub async fn pause(&self, site_id: &str) -> Result<()> {
        self.inner.db.set_site_active(site_id, false).await?;
        self.inner.cancel_timer(site_id);
        info!("Paused {}", site_id);
        Ok(())
    }

    /// Set the active flag and re-arm from the persisted last run
    pub async fn resume(&self, site_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.inner.db.set_site_active(site_id, true).await?;
        let site = self.inner.db.require_site(site_id).await?;
        info!("Resumed {}", site_id);
        Ok(self.schedule_site(&site))
    }

    /// Recompute the due time from stored state and re-arm
    pub async fn reschedule(&self, site_id: &str) -> Result<Option<DateTime<Utc>>> {
        let site = self.inner.db.require_site(site_id).await?;
        Ok(self.schedule_site(&site))
    }

    pub async fn status(&self, site_id: &str) -> Result<ScheduleStatus> {
        let site = self.inner.db.require_site(site_id).await?;
        let armed = lock(&self.inner.timers).get(site_id).map(|t| t.next_due);

        let next_due = match armed {
            Some(due) => Some(due),
            None if site.active => Some(compute_next_due(
                site.last_successful_run,
                site.frequency(),
                Utc::now(),
            )),
            None => None,
        };

        Ok(ScheduleStatus {
            site_id: site.id.clone(),
            active: site.active,
            is_scheduled: armed.is_some(),
            next_due,
            last_run: site.last_successful_run,
            frequency_minutes: site.frequency_minutes,
        })
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            scheduled: lock(&self.inner.timers).len(),
            executions: self.inner.executions.load(Ordering::SeqCst),
            failures: self.inner.failures.load(Ordering::SeqCst),
        }
    }

    /// Cancel every timer and wait for in-flight runs to finish
    pub async fn shutdown(&self) {
        let timers: Vec<Timer> = lock(&self.inner.timers).drain().map(|(_, t)| t).collect();
        for timer in &timers {
            timer.token.cancel();
        }
        for timer in timers {
            if let Err(e) = timer.handle.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }
        info!("Scheduler stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn cancel_timer(&self, site_id: &str) {
        if let Some(timer) = lock(&self.timers).remove(site_id) {
            timer.token.cancel();
            debug!("Cancelled timer for {}", site_id);
        }
    }

    /// Update the due time of a timer that still belongs to this generation
    fn rearm(&self, site: &SiteConfig, generation: u64, next_due: DateTime<Utc>) -> bool {
        match lock(&self.timers).get_mut(&site.id) {
            Some(timer) if timer.generation == generation => {
                timer.next_due = next_due;
                timer.frequency_minutes = site.frequency_minutes;
                timer.last_run = site.last_successful_run;
                true
            }
            _ => false,
        }
    }

    fn release(&self, site_id: &str, generation: u64) {
        let mut timers = lock(&self.timers);
        if timers.get(site_id).is_some_and(|t| t.generation == generation) {
            timers.remove(site_id);
        }
    }

    fn run_lock(&self, site_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.run_locks)
            .entry(site_id.to_string())
            .or_default()
            .clone()
    }

    /// Run discovery once; execution errors never escape.
    ///
    /// The site is reloaded under the run lock. A timed run of a site that
    /// was paused in the meantime, possibly by another process, is skipped
    /// and yields `None`.
    async fn execute(&self, site_id: &str, trigger: RunTrigger) -> Option<DiscoveryReport> {
        let run_lock = self.run_lock(site_id);
        let _guard = run_lock.lock().await;

        let site = match self.db.require_site(site_id).await {
            Ok(site) => site,
            Err(e) => {
                error!("Cannot load site {}: {}", site_id, e);
                self.executions.fetch_add(1, Ordering::SeqCst);
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Some(failed_report(site_id, &e));
            }
        };
        if trigger == RunTrigger::Timer && !site.active {
            info!("Site {} is paused, skipping timed run", site_id);
            return None;
        }

        self.executions.fetch_add(1, Ordering::SeqCst);
        let started_at = Utc::now();

        let result = match tokio::time::timeout(self.run_timeout, self.tracker.discover(&site)).await {
            Ok(result) => result,
            Err(_) => {
                let e = Error::Timeout(format!(
                    "discovery for {} exceeded {}s",
                    site.id,
                    self.run_timeout.as_secs_f64()
                ));
                let log = DiscoveryRunLog::failed(&site.id, &site.listing_url, started_at, &e);
                if let Err(log_err) = self.db.insert_run(&log).await {
                    error!("Failed to record run for {}: {}", site.id, log_err);
                }
                Err(e)
            }
        };

        let report = match result {
            Ok(report) if report.success => {
                if let Err(e) = self.db.mark_site_success(&site.id, started_at).await {
                    error!("Failed to record success for {}: {}", site.id, e);
                }
                report
            }
            Ok(report) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                report
            }
            Err(e) => {
                error!("Discovery for {} failed: {}", site.id, e);
                self.failures.fetch_add(1, Ordering::SeqCst);
                failed_report(&site.id, &e)
            }
        };
        Some(report)
    }
}

/// Due time once a run finished.
///
/// A failed run leaves the last success untouched, so the site may already
/// be due; it then waits one period instead of spinning.
fn next_after_run(site: &SiteConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let due = compute_next_due(site.last_successful_run, site.frequency(), now);
    if due <= now {
        now + site.frequency()
    } else {
        due
    }
}

fn failed_report(site_id: &str, error: &Error) -> DiscoveryReport {
    DiscoveryReport {
        site_id: site_id.to_string(),
        success: false,
        error: Some(error.to_string()),
        outcome: Some(RunOutcome::Failed),
        ..DiscoveryReport::default()
    }
}

async fn site_loop(
    inner: Arc<Inner>,
    site_id: String,
    mut frequency: Duration,
    generation: u64,
    token: CancellationToken,
    mut next_due: DateTime<Utc>,
) {
    loop {
        let delay = delay_until(next_due, Utc::now());
        if !delay.is_zero() {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if token.is_cancelled() {
            return;
        }

        if inner.execute(&site_id, RunTrigger::Timer).await.is_none() {
            inner.release(&site_id, generation);
            return;
        }

        if token.is_cancelled() {
            return;
        }

        let now = Utc::now();
        let site = match inner.db.get_site(&site_id).await {
            Ok(Some(site)) if site.active => {
                frequency = site.frequency();
                next_due = next_after_run(&site, now);
                site
            }
            Ok(_) => {
                debug!("Site {} paused or removed, timer released", site_id);
                inner.release(&site_id, generation);
                return;
            }
            Err(e) => {
                warn!("Cannot reload {}: {}, retrying in one period", site_id, e);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay_until(now + frequency, now)) => {}
                }
                continue;
            }
        };

        if !inner.rearm(&site, generation, next_due) {
            return;
        }
        debug!("Site {} next due {}", site_id, next_due.to_rfc3339());
    }
}
