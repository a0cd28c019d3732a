//! Calendar-aligned cycle scheduling.
//!
//! The scheduler sleeps until the next cron tick in the configured timezone
//! and starts one cycle per tick. At most one cycle runs at a time: a tick
//! that arrives while the previous cycle is still in flight is skipped and
//! logged. Errors and panics inside a cycle are contained here and never
//! stop later ticks.

use crate::config::ScheduleConfig;
use crate::internal_metrics::Metrics;
use crate::pipeline::AlertPipeline;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A cron expression bound to a timezone.
#[derive(Debug, Clone)]
pub struct Cadence {
    schedule: Schedule,
    tz: Tz,
}

impl Cadence {
    pub fn new(schedule: Schedule, tz: Tz) -> Self {
        Self { schedule, tz }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let schedule = Schedule::from_str(&config.cron)
            .map_err(|e| anyhow!("invalid cron '{}': {}", config.cron, e))?;
        let tz = Tz::from_str(&config.timezone)
            .map_err(|e| anyhow!("invalid timezone '{}': {}", config.timezone, e))?;
        Ok(Self::new(schedule, tz))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// The first tick strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.tz))
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// The next tick to wait for. Never returns `last_fired` again, even when
    /// the wall clock reads earlier than the slot that just fired.
    pub fn next_tick(
        &self,
        now: DateTime<Utc>,
        last_fired: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let from = last_fired.map_or(now, |fired| fired.max(now));
        self.next_after(from)
    }
}

/// What happened when a tick fired.
#[derive(Debug)]
pub enum Tick {
    /// A cycle was started; the handle resolves when it has finished.
    Started(JoinHandle<()>),
    /// The previous cycle was still running.
    Skipped,
}

impl Tick {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Tick::Skipped)
    }
}

pub struct AlertScheduler {
    pipeline: Arc<AlertPipeline>,
    cadence: Cadence,
    in_flight: Arc<Mutex<()>>,
    metrics: Arc<Metrics>,
}

impl AlertScheduler {
    pub fn new(pipeline: Arc<AlertPipeline>, cadence: Cadence, metrics: Arc<Metrics>) -> Self {
        Self {
            pipeline,
            cadence,
            in_flight: Arc::new(Mutex::new(())),
            metrics,
        }
    }

    /// Starts a cycle unless one is already running.
    pub fn tick(&self) -> Tick {
        let guard = match self.in_flight.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Previous alert cycle still running; skipping this tick.");
                self.metrics.cycles_skipped_total.increment(1);
                return Tick::Skipped;
            }
        };

        let pipeline = self.pipeline.clone();
        Tick::Started(tokio::spawn(async move {
            let _guard = guard;
            // Run the cycle in its own task so a panic surfaces as a JoinError.
            let cycle = tokio::spawn(async move { pipeline.run_cycle().await });
            match cycle.await {
                Ok(Ok(report)) => {
                    let failed = report.outcomes().iter().filter(|o| !o.success).count();
                    info!(
                        outcome = report.outcome(),
                        recipients = report.outcomes().len(),
                        failed,
                        "Alert cycle complete"
                    );
                }
                Ok(Err(e)) if e.is_malformed_data() => {
                    warn!("Skipping alert cycle, latest reading is malformed: {}", e);
                }
                Ok(Err(e)) => error!("Alert cycle failed: {}", e),
                Err(e) => error!("Alert cycle panicked: {}", e),
            }
        }))
    }

    /// Fires cycles on every tick until shutdown, then waits for the cycle
    /// in flight (if any) to finish.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(timezone = %self.cadence.timezone(), "Alert scheduler started.");
        let mut last_fired = None;
        loop {
            let now = Utc::now();
            let Some(next) = self.cadence.next_tick(now, last_fired) else {
                warn!("Schedule has no upcoming ticks; scheduler stopping.");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!(next = %next.with_timezone(&self.cadence.timezone()), "Next alert cycle scheduled.");

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Alert scheduler received shutdown signal.");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    last_fired = Some(next);
                    self.tick();
                }
            }
        }

        let _ = self.in_flight.lock().await;
        info!("Alert scheduler finished.");
    }
}
