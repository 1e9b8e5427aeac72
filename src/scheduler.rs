use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::engine::Engine;
use crate::error::EngineError;

/// When cycles fire.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fixed local times every day.
    Daily { times: Vec<NaiveTime> },
    /// Cron expression, evaluated in the configured timezone.
    Cron { schedule: Box<cron::Schedule> },
}

impl Schedule {
    /// Parse "at:08:00,12:30" or "cron:0 8 * * *".
    pub fn parse(s: &str) -> Result<Self> {
        if let Some(times_str) = s.strip_prefix("at:") {
            let mut times = Vec::new();
            for part in times_str.split(',') {
                let t = NaiveTime::parse_from_str(part.trim(), "%H:%M")
                    .with_context(|| format!("invalid time '{}'", part.trim()))?;
                times.push(t);
            }
            times.sort();
            times.dedup();
            Ok(Schedule::Daily { times })
        } else if let Some(expr) = s.strip_prefix("cron:") {
            // The cron crate wants seconds and year fields around the usual five.
            let cron_expr = format!("0 {} *", expr.trim());
            let schedule =
                cron::Schedule::from_str(&cron_expr).with_context(|| format!("invalid cron expression '{expr}'"))?;
            Ok(Schedule::Cron {
                schedule: Box::new(schedule),
            })
        } else {
            anyhow::bail!("invalid schedule '{s}': must start with 'at:' or 'cron:'");
        }
    }

    /// Next tick strictly after `after`.
    ///
    /// Local times that fall into a DST gap are skipped.
    pub fn next_tick(&self, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let after_local = after.with_timezone(&tz);

        match self {
            Schedule::Daily { times } => {
                let today = after_local.date_naive();
                for day_offset in 0..4i64 {
                    let date = today + chrono::Duration::days(day_offset);
                    for &time in times {
                        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest()
                            && candidate > after_local
                        {
                            return Some(candidate.with_timezone(&Utc));
                        }
                    }
                }
                None
            }
            Schedule::Cron { schedule } => schedule.after(&after_local).next().map(|t| t.with_timezone(&Utc)),
        }
    }

    /// True when a tick after `after` has arrived by `now`.
    pub fn is_due(&self, tz: Tz, after: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.next_tick(tz, after).is_some_and(|next| next <= now)
    }
}

/// Wakes every 30 seconds and runs a cycle when the schedule is due.
///
/// Missed ticks (daemon down, or a cycle still running) are skipped, not replayed.
/// Cycles run on `tracker` so shutdown can wait for them.
pub async fn scheduler_loop(engine: Arc<Engine>, tracker: TaskTracker, cancel: CancellationToken) {
    let config = engine.config();
    let tz = config.timezone();
    let schedule = match Schedule::parse(&config.global.schedule) {
        Ok(s) => s,
        Err(e) => {
            error!(schedule = %config.global.schedule, error = %e, "invalid schedule, scheduler disabled");
            return;
        }
    };

    info!(schedule = %config.global.schedule, "scheduler started");
    let mut last_tick = Utc::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => {}
        }

        let now = Utc::now();
        if !schedule.is_due(tz, last_tick, now) {
            continue;
        }
        last_tick = now;

        spawn_cycle(&tracker, engine.clone(), cancel.clone());
    }
}

fn spawn_cycle(tracker: &TaskTracker, engine: Arc<Engine>, cancel: CancellationToken) {
    tracker.spawn(async move {
        info!("scheduled cycle starting");
        match engine.run_cycle(None, false, &cancel).await {
            Ok(report) => {
                info!(cycle = %report.id, delivered = report.delivered(), "scheduled cycle complete");
            }
            Err(EngineError::CycleInProgress) => {
                info!("previous cycle still running, skipping tick");
            }
            Err(e) => {
                error!(error = %e, "scheduled cycle failed");
            }
        }
    });
}
