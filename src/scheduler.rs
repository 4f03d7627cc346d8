//! Periodic organization runs.
//!
//! The scheduler owns one worker thread that sleeps until the next run time
//! and then invokes a job, usually a closure that organizes the configured
//! directory. It wakes at least once per poll interval, and immediately when
//! stopped.

use crate::config::{ConfigError, SchedulerConfig};
use chrono::{Datelike, Duration as ChronoDuration, Local, NaiveDateTime};
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Work performed on every scheduled run.
pub type Job = Arc<dyn Fn() + Send + Sync>;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// When the next run after `now` is due.
///
/// With `interval_hours > 0` runs are `interval_hours` apart. Otherwise runs
/// happen daily at `time` on the listed `days` (all days if empty).
pub fn next_run_after(
    config: &SchedulerConfig,
    now: NaiveDateTime,
) -> Result<NaiveDateTime, ConfigError> {
    if config.interval_hours > 0 {
        return Ok(now + ChronoDuration::hours(i64::from(config.interval_hours)));
    }

    let time = config.time_of_day()?;
    let allowed = |weekday: u32| {
        config.days.is_empty() || config.days.iter().any(|day| u32::from(*day) == weekday)
    };

    for offset in 0..=7 {
        let date = now.date() + ChronoDuration::days(offset);
        let candidate = date.and_time(time);
        if candidate > now && allowed(date.weekday().num_days_from_monday()) {
            return Ok(candidate);
        }
    }

    Err(ConfigError::InvalidValue {
        field: "scheduler.days",
        reason: "no valid day to run on".to_string(),
    })
}

/// Runs a job on a schedule from a background thread.
pub struct Scheduler {
    config: SchedulerConfig,
    job: Job,
    poll_interval: Duration,
    next_run: Arc<Mutex<Option<NaiveDateTime>>>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, job: Job) -> Self {
        Self {
            config,
            job,
            poll_interval: DEFAULT_POLL_INTERVAL,
            next_run: Arc::new(Mutex::new(None)),
            stop_tx: None,
            worker: None,
        }
    }

    /// How often the worker re-checks the clock while waiting.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts the worker thread.
    ///
    /// Returns `Ok(false)` without starting anything when the scheduler is
    /// disabled or already running.
    pub fn start(&mut self) -> Result<bool, ConfigError> {
        if self.is_running() {
            warn!("Scheduler is already running");
            return Ok(false);
        }
        if !self.config.enabled {
            info!("Scheduler is disabled in configuration");
            return Ok(false);
        }

        let first_run = next_run_after(&self.config, Local::now().naive_local())?;
        set_next_run(&self.next_run, Some(first_run));

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let config = self.config.clone();
        let job = Arc::clone(&self.job);
        let next_run = Arc::clone(&self.next_run);
        let poll_interval = self.poll_interval;

        let worker = thread::spawn(move || {
            info!("Scheduler thread started");
            let mut due = first_run;
            loop {
                let now = Local::now().naive_local();
                if now >= due {
                    run_job(&job);
                    due = match next_run_after(&config, Local::now().naive_local()) {
                        Ok(next) => next,
                        Err(e) => {
                            error!("Cannot compute next run, stopping scheduler: {}", e);
                            break;
                        }
                    };
                    set_next_run(&next_run, Some(due));
                    continue;
                }

                let remaining = (due - now).to_std().unwrap_or(Duration::ZERO);
                match stop_rx.recv_timeout(remaining.min(poll_interval)) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            set_next_run(&next_run, None);
            info!("Scheduler thread stopped");
        });

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        info!(next_run = %first_run, "Scheduler started");
        Ok(true)
    }

    /// Signals the worker and waits for it to finish.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if worker.join().is_err() {
            error!("Scheduler thread panicked");
        }
        set_next_run(&self.next_run, None);
        info!("Scheduler stopped");
    }

    /// Blocks until the worker exits.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Scheduler thread panicked");
            }
        }
        self.stop_tx = None;
    }

    /// Invokes the job on the calling thread.
    pub fn run_now(&self) {
        info!("Manual organization triggered");
        run_job(&self.job);
    }

    pub fn next_run_time(&self) -> Option<NaiveDateTime> {
        self.next_run.lock().ok().and_then(|guard| *guard)
    }

    /// Stops the scheduler, swaps in new settings and restarts it if enabled.
    pub fn update_schedule(&mut self, config: SchedulerConfig) -> Result<bool, ConfigError> {
        config.time_of_day()?;
        self.stop();
        self.config = config;
        self.start()
    }

    pub fn status(&self) -> String {
        if !self.config.enabled {
            return "Disabled".to_string();
        }
        if !self.is_running() {
            return "Stopped".to_string();
        }
        match self.next_run_time() {
            Some(next) => format!("Running - Next: {}", next.format("%Y-%m-%d %H:%M:%S")),
            None => "Running - No jobs scheduled".to_string(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_next_run(slot: &Mutex<Option<NaiveDateTime>>, value: Option<NaiveDateTime>) {
    if let Ok(mut guard) = slot.lock() {
        *guard = value;
    }
}

fn run_job(job: &Job) {
    info!("Running scheduled organization");
    if catch_unwind(AssertUnwindSafe(|| job())).is_err() {
        error!("Scheduled organization panicked");
    }
}
