use chrono::TimeZone;
use chrono_tz::Tz;
use fleet_controller::config::GlobalSchedule;
use fleet_controller::oplog::Action;
use fleet_controller::scheduler::{evaluate, parse_hhmm};

fn business_schedule() -> GlobalSchedule {
    GlobalSchedule {
        timezone: "Asia/Kolkata".to_string(),
        weekdays_start: ["Mon", "Tue", "Wed", "Thu", "Fri"].iter().map(|d| d.to_string()).collect(),
        weekdays_stop: ["Mon", "Tue", "Wed", "Thu", "Fri"].iter().map(|d| d.to_string()).collect(),
        start_time: "09:00".to_string(),
        stop_time: "22:00".to_string(),
        weekend_shutdown: true,
    }
}

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> chrono::DateTime<Tz> {
    let tz: Tz = "Asia/Kolkata".parse().unwrap();
    tz.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

#[test]
fn test_start_window_is_five_minutes_wide() {
    let schedule = business_schedule();
    // 2026-01-05 is a Monday.
    for minute in 0..5 {
        let decision = evaluate(&schedule, &at(2026, 1, 5, 9, minute)).unwrap();
        assert_eq!(decision.map(|d| d.0), Some(Action::Start), "minute {minute}");
    }
    assert!(evaluate(&schedule, &at(2026, 1, 5, 9, 5)).unwrap().is_none());
    assert!(evaluate(&schedule, &at(2026, 1, 5, 8, 59)).unwrap().is_none());
}

#[test]
fn test_stop_window_fires_on_weekdays() {
    let schedule = business_schedule();
    let decision = evaluate(&schedule, &at(2026, 1, 6, 22, 4)).unwrap();
    assert_eq!(decision.map(|d| d.0), Some(Action::Stop));
}

#[test]
fn test_weekday_gating() {
    let mut schedule = business_schedule();
    schedule.weekend_shutdown = false;
    // Sunday 2026-01-04 is outside both weekday lists.
    assert!(evaluate(&schedule, &at(2026, 1, 4, 9, 2)).unwrap().is_none());
    assert!(evaluate(&schedule, &at(2026, 1, 4, 22, 2)).unwrap().is_none());
}

#[test]
fn test_weekend_shutdown_policy() {
    let schedule = business_schedule();
    // Saturday: start suppressed even inside the window...
    assert!(evaluate(&schedule, &at(2026, 1, 3, 9, 2)).unwrap().is_none());
    // ...and stop forced despite the weekday list.
    let decision = evaluate(&schedule, &at(2026, 1, 3, 22, 2)).unwrap();
    assert_eq!(decision.map(|d| d.0), Some(Action::Stop));
}

#[test]
fn test_civil_time_conversion() {
    // 03:32 UTC on Monday is 09:02 IST, inside the start window.
    let utc = chrono::Utc.with_ymd_and_hms(2026, 1, 5, 3, 32, 0).unwrap();
    let tz: Tz = "Asia/Kolkata".parse().unwrap();
    let decision = evaluate(&business_schedule(), &utc.with_timezone(&tz)).unwrap();
    assert_eq!(decision.map(|d| d.0), Some(Action::Start));
}

#[test]
fn test_reason_names_the_window() {
    let (_, reason) = evaluate(&business_schedule(), &at(2026, 1, 5, 9, 0)).unwrap().unwrap();
    assert!(reason.contains("09:00"));
    assert!(reason.contains("Asia/Kolkata"));
}

#[test]
fn test_time_format_validation() {
    assert!(parse_hhmm("07:30").is_ok());
    assert!(parse_hhmm("7:30").is_ok());
    assert!(parse_hhmm("24:01").is_err());
    assert!(parse_hhmm("12:99").is_err());
    assert!(parse_hhmm("").is_err());
}
