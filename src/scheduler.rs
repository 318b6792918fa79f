use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::config::GlobalSchedule;
use crate::oplog::{Action, OperationEntry, Source};
use crate::runtime::Runtime;
use crate::server::{Dispatcher, OrchestrationTask};
use crate::status;

/* ============================= CONSTANTS ============================= */

pub const TICK_INTERVAL: Duration = Duration::from_secs(300);

/// Width of the firing window, matching the tick cadence so each window
/// fires exactly once.
const WINDOW_MINUTES: u32 = 5;

const MINUTES_PER_DAY: u32 = 24 * 60;

/* ============================= TIME HELPERS ============================= */

/// Parse a 24-hour `HH:MM` string.
pub fn parse_hhmm(value: &str) -> anyhow::Result<(u32, u32)> {
    let (hours, minutes) = value
        .split_once(':')
        .with_context(|| format!("invalid time {value:?}, expected HH:MM"))?;
    let hours: u32 = hours.parse().with_context(|| format!("invalid hour in {value:?}"))?;
    let minutes: u32 = minutes.parse().with_context(|| format!("invalid minute in {value:?}"))?;
    anyhow::ensure!(hours < 24 && minutes < 60, "time {value:?} out of range");
    Ok((hours, minutes))
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// An empty weekday list means every day.
fn weekday_included(weekdays: &[String], weekday: Weekday) -> bool {
    weekdays.is_empty() || weekdays.iter().any(|d| d == weekday_name(weekday))
}

/// Whether `now` falls inside `[at, at + 5m)`, minute-granular, wrapping
/// across midnight.
fn in_window(now_minute_of_day: u32, window_start: u32) -> bool {
    (now_minute_of_day + MINUTES_PER_DAY - window_start) % MINUTES_PER_DAY < WINDOW_MINUTES
}

/* ============================= EVALUATION ============================= */

/// Decide which action, if any, the schedule calls for at the given civil
/// time. Pure; the caller supplies the clock.
pub fn evaluate(schedule: &GlobalSchedule, now: &DateTime<Tz>) -> anyhow::Result<Option<(Action, String)>> {
    let (start_h, start_m) = parse_hhmm(&schedule.start_time)?;
    let (stop_h, stop_m) = parse_hhmm(&schedule.stop_time)?;

    let minute_of_day = now.hour() * 60 + now.minute();
    let weekday = now.weekday();
    let weekend = matches!(weekday, Weekday::Sat | Weekday::Sun);

    let start_window = in_window(minute_of_day, start_h * 60 + start_m)
        && weekday_included(&schedule.weekdays_start, weekday)
        && !(schedule.weekend_shutdown && weekend);

    // Weekend shutdown forces the stop window on Sat/Sun even when the
    // weekday list would not include it.
    let stop_window = in_window(minute_of_day, stop_h * 60 + stop_m)
        && (weekday_included(&schedule.weekdays_stop, weekday) || (schedule.weekend_shutdown && weekend));

    if start_window {
        let reason = format!("scheduled start at {} {}", schedule.start_time, schedule.timezone);
        Ok(Some((Action::Start, reason)))
    } else if stop_window {
        let reason = format!("scheduled stop at {} {}", schedule.stop_time, schedule.timezone);
        Ok(Some((Action::Stop, reason)))
    } else {
        Ok(None)
    }
}

/* ============================= TICK ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub apps_checked: usize,
    pub actions_triggered: usize,
}

/// One scheduler pass at the current wall time.
pub async fn tick(rt: &Runtime, dispatcher: &Dispatcher) -> anyhow::Result<TickSummary> {
    tick_at(rt, dispatcher, Utc::now()).await
}

/// One scheduler pass evaluated against an explicit instant.
///
/// Fail-safe status policy: an app whose quick probe errors or returns
/// UNKNOWN is treated as UP, so a running app is never started again and
/// an ambiguous one is never left running past its stop window by mistake
/// in the other direction.
pub async fn tick_at(
    rt: &Runtime,
    dispatcher: &Dispatcher,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<TickSummary> {
    let schedule = rt
        .settings
        .global_schedule
        .as_ref()
        .context("global_schedule is not configured")?;
    let tz: Tz = schedule
        .timezone
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown timezone {:?}", schedule.timezone))?;
    let now = now_utc.with_timezone(&tz);

    info!(
        local_time = %now.format("%Y-%m-%d %H:%M"),
        timezone = %schedule.timezone,
        "scheduler_tick"
    );

    let decision = evaluate(schedule, &now)?;
    let apps = rt.registry.scan().await.context("failed to scan registry")?;
    let mut summary = TickSummary { apps_checked: 0, actions_triggered: 0 };

    let Some((action, reason)) = decision else {
        return Ok(summary);
    };

    for app in apps {
        let app_name = app.app_name.clone();
        summary.apps_checked += 1;

        let enabled = match rt.registry.schedule_enabled(&app_name).await {
            Ok(flag) => flag.unwrap_or(true),
            Err(e) => {
                warn!(app = %app_name, error = %e, "schedule_flag_read_failed");
                true
            }
        };
        if !enabled {
            info!(app = %app_name, "scheduling_disabled_skipping");
            continue;
        }

        let quick = status::quick_status(rt, &app_name).await;
        let is_up = quick.status != "DOWN";

        let should_fire = match action {
            Action::Start => !is_up,
            Action::Stop => is_up,
        };
        if !should_fire {
            continue;
        }

        info!(app = %app_name, action = %action, reason = %reason, "schedule_action_triggered");
        let task = OrchestrationTask {
            action,
            app_name: app_name.clone(),
            source: Source::Scheduler,
        };
        match dispatcher.enqueue(task) {
            Ok(()) => {
                summary.actions_triggered += 1;
                let entry = OperationEntry::new(&app_name, action, Source::Scheduler, reason.clone());
                if let Err(e) = rt.oplog.record(&entry).await {
                    warn!(app = %app_name, error = %e, "operation_log_write_failed");
                }
            }
            Err(e) => warn!(app = %app_name, error = %e, "orchestration_enqueue_failed"),
        }
    }

    Ok(summary)
}

/// Tick every five minutes until interrupted.
pub async fn run_loop(rt: Runtime, dispatcher: Dispatcher) -> anyhow::Result<()> {
    rt.settings
        .global_schedule
        .as_ref()
        .context("global_schedule is not configured; the scheduler cannot run")?;

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match tick(&rt, &dispatcher).await {
                    Ok(summary) => info!(
                        apps = summary.apps_checked,
                        actions = summary.actions_triggered,
                        "scheduler_tick_complete"
                    ),
                    Err(e) => warn!(error = %e, "scheduler_tick_failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("scheduler_shutdown");
                return Ok(());
            }
        }
    }
}

/* ============================= TESTS ============================= */
