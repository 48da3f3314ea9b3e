use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::remote::transport::parse_resolve_entry;
use crate::retry::{RecoveryPolicy, RetryConfig};
use crate::schedule::parse_run_at;
use crate::types::{DateWindow, LogLevel};

/// Application configuration, resolved from CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    // Paths
    pub library_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub marker_path: PathBuf,
    pub token_file: PathBuf,

    // Remote
    pub base_url: String,
    pub resolve: Vec<(String, SocketAddr)>,

    // Sync behavior
    pub window: DateWindow,
    pub page_size: usize,
    pub empty_page_streak: u32,
    pub concurrent_downloads: usize,
    pub page_pace: Duration,
    pub recovery: RecoveryPolicy,

    // Scheduling
    pub run_at: NaiveTime,
    pub once: bool,

    // Output
    pub no_progress_bar: bool,
    #[allow(dead_code)] // Copied from CLI but read from cli.log_level directly in main.rs
    pub log_level: LogLevel,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> anyhow::Result<Self> {
        let start = parse_date_or_interval(&cli.window_start)?.with_timezone(&Utc);
        let end = window_end_of(&cli.window_end)?;
        anyhow::ensure!(
            start <= end,
            "window start {start} is after window end {end}"
        );

        let state_dir = expand_tilde(&cli.state_dir);
        let resolve = cli
            .resolve
            .iter()
            .map(|raw| parse_resolve_entry(raw))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            library_dir: expand_tilde(&cli.library_dir),
            checkpoint_path: state_dir.join("checkpoint.json"),
            marker_path: state_dir.join(".last_sync"),
            token_file: expand_tilde(&cli.token_file),
            base_url: cli.base_url,
            resolve,
            window: DateWindow { start, end },
            page_size: cli.page_size.clamp(1, 100),
            empty_page_streak: cli.empty_page_streak.max(1),
            concurrent_downloads: cli.concurrent_downloads.max(1),
            page_pace: Duration::from_millis(cli.page_pace_ms),
            recovery: RecoveryPolicy {
                backoff: RetryConfig {
                    max_retries: cli.max_retries,
                    base_delay_secs: cli.retry_delay,
                    max_delay_secs: 60,
                },
                auth_attempts: cli.auth_retries,
                network_cooldown: Duration::from_secs(cli.network_cooldown),
            },
            run_at: parse_run_at(&cli.run_at)?,
            once: cli.once,
            no_progress_bar: cli.no_progress_bar,
            log_level: cli.log_level,
        })
    }
}

/// A bare date given as the window end means "through the end of that day".
fn window_end_of(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date
            .and_hms_opt(23, 59, 59)
            .and_then(|naive| naive.and_local_timezone(Local).single())
        {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    Ok(parse_date_or_interval(raw)?.with_timezone(&Utc))
}

/// Parse a human-friendly date spec into a concrete timestamp.
///
/// Supports three formats:
/// - Relative interval: `"20d"` (20 days ago from now)
/// - ISO date: `"2025-01-02"` (midnight local time)
/// - ISO datetime: `"2025-01-02T14:30:00"` (local time)
pub(crate) fn parse_date_or_interval(s: &str) -> anyhow::Result<DateTime<Local>> {
    if let Some(days_str) = s.strip_suffix('d') {
        if let Ok(days) = days_str.parse::<i64>() {
            return Ok(Local::now() - chrono::Duration::days(days));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive_dt) = date.and_hms_opt(0, 0, 0) {
            if let Some(dt) = naive_dt.and_local_timezone(Local).single() {
                return Ok(dt);
            }
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        if let Some(local) = dt.and_local_timezone(Local).single() {
            return Ok(local);
        }
    }
    anyhow::bail!(
        "Cannot parse '{}' as a date. Expected ISO date (2025-01-02), \
         datetime (2025-01-02T14:30:00), or interval (20d)",
        s
    )
}
