use clap::Parser;

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "photomirror",
    about = "Incrementally mirror a remote photo library to local storage"
)]
pub struct Cli {
    /// Local directory receiving the mirrored media files
    #[arg(short = 'd', long, default_value = "./library")]
    pub library_dir: String,

    /// Directory for checkpoint and marker state
    #[arg(long, default_value = "~/.photomirror")]
    pub state_dir: String,

    /// Start of the creation-time window (2025-01-02, 2025-01-02T14:30:00, or 20d)
    #[arg(long)]
    pub window_start: String,

    /// End of the creation-time window (same formats as --window-start)
    #[arg(long)]
    pub window_end: String,

    /// Base URL of the remote library API
    #[arg(long, default_value = "https://photoslibrary.googleapis.com")]
    pub base_url: String,

    /// File holding the bearer token for the listing API.
    /// Kept fresh by an external auth helper.
    #[arg(long, default_value = "~/.photomirror/token", env = "PHOTOMIRROR_TOKEN_FILE")]
    pub token_file: String,

    /// Listing page size
    #[arg(long, default_value_t = 100)]
    pub page_size: usize,

    /// Stop after this many consecutive pages with no in-scope items
    #[arg(long, default_value_t = 90)]
    pub empty_page_streak: u32,

    /// Concurrent downloads within a page
    #[arg(short = 'n', long, default_value_t = 4)]
    pub concurrent_downloads: usize,

    /// Minimum milliseconds between listing requests
    #[arg(long, default_value_t = 500)]
    pub page_pace_ms: u64,

    /// Retries for rate-limit and server errors
    #[arg(long, default_value_t = 5)]
    pub max_retries: u32,

    /// Base backoff delay in seconds
    #[arg(long, default_value_t = 1)]
    pub retry_delay: u64,

    /// Re-authentication attempts before aborting the cycle
    #[arg(long, default_value_t = 3)]
    pub auth_retries: u32,

    /// Cooldown in seconds after a network failure
    #[arg(long, default_value_t = 60)]
    pub network_cooldown: u64,

    /// Daily local time (HH:MM) for scheduled cycles
    #[arg(long, default_value = "03:00")]
    pub run_at: String,

    /// Run a single cycle and exit instead of scheduling daily runs
    #[arg(long)]
    pub once: bool,

    /// Pin a host to a fixed address, bypassing the system resolver
    /// (host=ip:port, repeatable)
    #[arg(long = "resolve")]
    pub resolve: Vec<String>,

    /// Disable the download progress counter
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}
