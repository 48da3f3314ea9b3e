//! Daily trigger arithmetic for the scheduler loop in `main`.
//!
//! The engine itself knows nothing about schedules; `main` runs one cycle at
//! startup and then sleeps until the next configured local wall-clock time.

use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};

/// Time until the next occurrence of `run_at` local time, strictly in the
/// future relative to `now`.
pub fn next_run_delay(now: DateTime<Local>, run_at: NaiveTime) -> Duration {
    let today = now.date_naive().and_time(run_at);
    let candidate = match Local.from_local_datetime(&today).earliest() {
        Some(dt) if dt > now => dt,
        // Already past today's slot (or the local time doesn't exist, e.g.
        // inside a DST gap): take tomorrow's occurrence.
        _ => {
            let tomorrow = today + Days::new(1);
            match Local.from_local_datetime(&tomorrow).earliest() {
                Some(dt) => dt,
                None => return Duration::from_secs(24 * 60 * 60),
            }
        }
    };
    (candidate - now)
        .to_std()
        .unwrap_or(Duration::from_secs(1))
}

/// Parse the `--run-at HH:MM` flag.
pub fn parse_run_at(raw: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|e| anyhow::anyhow!("cannot parse '{raw}' as HH:MM: {e}"))
}
