// A day in the life of one schedule table, driven only through the public API.

use chrono::{DateTime, Duration, TimeZone, Utc};
use cronkeeper_core::CronkeeperConfig;
use cronkeeper_scheduler::{
    Activation, Cadence, RunStatus, ScheduleFilter, ScheduleManager, ScheduleReason,
};
use rusqlite::Connection;

const CONFIG: &str = r#"
[scheduler]
schedule_ahead_for = 10
schedule_generate_every = 5
history_cleanup_every = 5
history_success_lifetime = 30
history_failure_lifetime = 120
max_successful_history = 2

[[jobs]]
code = "every_five"
schedule = "*/5 * * * *"

[[jobs]]
code = "hourly"
schedule = "0 * * * *"

[[jobs]]
code = "paused"
schedule = "* * * * *"
active = false

[[jobs]]
code = "consumer"
always = true
"#;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, h, m, 0).unwrap()
}

fn manager() -> ScheduleManager {
    let config = CronkeeperConfig::from_toml_str(CONFIG).unwrap();
    ScheduleManager::open(Connection::open_in_memory().unwrap(), &config).unwrap()
}

fn pending(m: &ScheduleManager, code: &str) -> Vec<DateTime<Utc>> {
    m.store()
        .list(
            &ScheduleFilter::new()
                .status(RunStatus::Pending)
                .job_code(code),
        )
        .unwrap()
        .into_iter()
        .map(|r| r.scheduled_at)
        .collect()
}

#[test]
fn first_tick_fills_the_window() {
    let m = manager();
    let report = m.tick(at(11, 53)).unwrap();

    assert!(!report.generate.skipped);
    assert_eq!(report.generate.jobs_considered, 2);
    assert_eq!(pending(&m, "every_five"), vec![at(11, 55), at(12, 0)]);
    assert_eq!(pending(&m, "hourly"), vec![at(12, 0)]);
    assert!(pending(&m, "paused").is_empty());
    assert!(pending(&m, "consumer").is_empty());
}

#[test]
fn runs_flow_from_pending_to_history() {
    let m = manager();
    m.tick(at(11, 53)).unwrap();

    // Worker claims and finishes the 11:55 run.
    let due = m.pending_due(at(11, 56), &[], &[]).unwrap();
    assert_eq!(due.len(), 1);
    let run = &due[0];
    assert!(m.store().try_claim(run.id, at(11, 56)).unwrap());
    assert!(m
        .store()
        .try_finish(run.id, RunStatus::Success, at(11, 57), None)
        .unwrap());

    // Nobody picks up 12:00 or 12:05; by 12:12 both are overdue and only
    // the newer one stays pending.
    m.tick(at(11, 58)).unwrap();
    let report = m.tick(at(12, 12)).unwrap();
    assert_eq!(report.sweep.skipped, 1);

    let overdue_pending = m.pending_due(at(12, 12), &["every_five".into()], &[]).unwrap();
    assert_eq!(overdue_pending.len(), 1);
    assert_eq!(overdue_pending[0].scheduled_at, at(12, 5));

    let skipped = m
        .store()
        .list(&ScheduleFilter::new().status(RunStatus::SkipPilingUp))
        .unwrap();
    assert!(skipped.iter().all(|r| r.messages.is_some()));

    // Well past the success lifetime the finished run is gone.
    m.tick(at(12, 40)).unwrap();
    assert!(m.store().get(run.id).unwrap().is_none());
}

#[test]
fn always_job_activation_is_exclusive() {
    let m = manager();
    let first = m.activate_always("consumer", None, at(12, 0)).unwrap();
    let run = first.created().cloned().unwrap();
    assert_eq!(run.reason, ScheduleReason::Always);
    assert_eq!(
        m.activate_always("consumer", None, at(12, 1)).unwrap(),
        Activation::AlreadyRunning
    );

    m.store()
        .try_finish(run.id, RunStatus::Success, at(12, 2), None)
        .unwrap();
    assert!(m
        .activate_always("consumer", None, at(12, 3))
        .unwrap()
        .created()
        .is_some());
}

#[test]
fn cadence_reflects_tick_spacing() {
    let m = manager();
    let mut now = at(10, 0);
    for gap in [1, 1, 2] {
        m.tick(now).unwrap();
        now += Duration::minutes(gap);
    }
    m.tick(now).unwrap();

    match m.measure_interval().unwrap() {
        Cadence::Measured(stats) => {
            assert_eq!(stats.count, 3);
            assert_eq!(stats.min_minutes, 1.0);
            assert_eq!(stats.max_minutes, 2.0);
            assert_eq!(stats.average_minutes, 1.33);
            assert_eq!(stats.last, now);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn flush_then_delete_all() {
    let m = manager();
    m.tick(at(11, 53)).unwrap();
    assert_eq!(m.flush(Some("hourly"), at(11, 53)).unwrap(), 1);
    assert_eq!(pending(&m, "every_five").len(), 2);

    let report = m.tick(at(11, 54)).unwrap();
    assert!(!report.generate.skipped);
    assert_eq!(pending(&m, "hourly"), vec![at(12, 0)]);

    assert_eq!(m.delete_all().unwrap(), 3);
    assert!(m.store().list(&ScheduleFilter::new()).unwrap().is_empty());
}
