//! Configuration settings for objsync
//!
//! Defines the CLI arguments, the persistent settings file and the
//! defaults every command falls back to.

use crate::error::{Result, SyncError};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// objsync - resumable sync between local trees and object storage
#[derive(Parser, Debug, Clone)]
#[command(name = "objsync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resumable, concurrent sync between local trees and S3-compatible storage")]
#[command(long_about = r#"
objsync synchronizes trees of objects between a local filesystem and an
S3-compatible object store, or between two remote locations.

Large files are transferred with resumable multipart uploads and downloads:
an interrupted transfer picks up where it stopped on the next run.

Examples:
  objsync sync ./photos s3://bucket/photos            # upload changes
  objsync sync s3://bucket/photos ./photos --delete   # mirror down
  objsync cp -r s3://a/data s3://b/data               # server-side copy
  objsync ls s3://bucket/photos -r
"#)]
pub struct CliArgs {
    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Settings file (defaults to ~/.objsync/config.json)
    #[arg(long, value_name = "PATH", env = "OBJSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List buckets, or objects under s3://bucket/prefix
    #[command(name = "ls")]
    List {
        /// s3://bucket[/prefix]; omit to list buckets
        target: Option<String>,
        /// List recursively instead of one level
        #[arg(short, long)]
        recursive: bool,
    },

    /// Create a bucket
    #[command(name = "mb")]
    MakeBucket {
        /// s3://bucket
        bucket: String,
    },

    /// Remove an empty bucket
    #[command(name = "rb")]
    RemoveBucket {
        /// s3://bucket
        bucket: String,
    },

    /// Remove an object, or every object under a prefix with -r
    #[command(name = "rm")]
    Remove {
        /// s3://bucket/key
        target: String,
        /// Remove everything under the prefix
        #[arg(short, long)]
        recursive: bool,
        /// Only print what would be removed
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Copy a file or tree (always transfers, never deletes)
    #[command(name = "cp")]
    Copy {
        /// Source path or s3:// URL
        source: String,
        /// Destination path or s3:// URL
        destination: String,
        /// Copy a whole tree
        #[arg(short, long)]
        recursive: bool,
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Synchronize destination with source
    #[command(name = "sync")]
    Sync {
        /// Source path or s3:// URL
        source: String,
        /// Destination path or s3:// URL
        destination: String,
        /// Delete destination entries that do not exist at the source
        #[arg(long)]
        delete: bool,
        /// Glob of destination keys that are never deleted
        #[arg(long = "delete-exclude", value_name = "PATTERN")]
        delete_exclude: Vec<String>,
        /// How two entries with the same key are compared
        #[arg(long, value_enum, default_value = "time-size")]
        strategy: CompareStrategy,
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Generate a pre-signed download URL
    #[command(name = "sign")]
    Sign {
        /// s3://bucket/key
        target: String,
        /// Validity, e.g. 15m, 1h, 7d
        #[arg(long, default_value = "1h", value_name = "DURATION")]
        expires: String,
    },
}

/// Options shared by `cp` and `sync`
#[derive(Args, Debug, Clone, Default)]
pub struct TransferArgs {
    /// Concurrent file operations (0 = from settings)
    #[arg(short = 'j', long, default_value = "0", value_name = "NUM")]
    pub concurrency: usize,

    /// Concurrent parts within one multipart transfer (0 = from settings)
    #[arg(long, default_value = "0", value_name = "NUM")]
    pub part_threads: usize,

    /// Initial multipart part size (e.g., 8M)
    #[arg(long, value_name = "SIZE")]
    pub part_size: Option<String>,

    /// Files at least this large use multipart transfer (e.g., 100M)
    #[arg(long, value_name = "SIZE")]
    pub multipart_threshold: Option<String>,

    /// Key pattern to include (glob)
    #[arg(long, value_name = "PATTERN")]
    pub include: Vec<String>,

    /// Key pattern to exclude (glob)
    #[arg(long, value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Only entries modified after this time (RFC3339 or age like 3d)
    #[arg(long, value_name = "TIME")]
    pub newer_than: Option<String>,

    /// Only entries modified before this time (RFC3339 or age like 3d)
    #[arg(long, value_name = "TIME")]
    pub older_than: Option<String>,

    /// Minimum entry size (e.g., 1K)
    #[arg(long, value_name = "SIZE")]
    pub min_size: Option<String>,

    /// Maximum entry size (e.g., 1G)
    #[arg(long, value_name = "SIZE")]
    pub max_size: Option<String>,

    /// Follow symbolic links in local trees
    #[arg(short = 'L', long)]
    pub follow_symlinks: bool,

    /// Ignore breakpoint records and start every transfer fresh
    #[arg(long)]
    pub restart: bool,

    /// Show what would be transferred without doing it
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Show a progress spinner with running counts
    #[arg(short = 'p', long)]
    pub progress: bool,

    /// Directory holding breakpoint records
    #[arg(long, value_name = "PATH")]
    pub breakpoint_dir: Option<PathBuf>,
}

/// How entries present on both sides are compared
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CompareStrategy {
    /// Same size and modification time
    #[default]
    #[value(name = "time-size")]
    TimeSize,
    /// Same size and time, or failing that the same CRC32
    #[value(name = "time-size-crc32")]
    TimeSizeCrc32,
    /// Same CRC32, ignoring size and time
    #[value(name = "only-crc32")]
    OnlyCrc32,
}

impl CompareStrategy {
    /// Get the name used on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Self::TimeSize => "time-size",
            Self::TimeSizeCrc32 => "time-size-crc32",
            Self::OnlyCrc32 => "only-crc32",
        }
    }
}

/// Persistent settings, loaded from the settings file and environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Concurrent file operations for sync/cp
    pub default_concurrency: usize,
    /// Concurrent parts within one multipart transfer
    pub part_threads: usize,
    /// Initial multipart part size in bytes
    pub part_size: u64,
    /// Files at least this large use multipart transfer
    pub multipart_threshold: u64,
    /// Breakpoint records older than this many days are ignored
    pub breakpoint_expire_days: u64,
    /// Directory for breakpoint records
    pub breakpoint_dir: PathBuf,
    /// Seconds between background breakpoint flushes
    pub flush_interval_secs: u64,
    /// Storage region
    pub region: String,
    /// Custom endpoint URL (MinIO, Ceph, ...)
    pub endpoint: Option<String>,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Use path-style URLs
    pub path_style: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_concurrency: num_cpus::get().max(4),
            part_threads: 4,
            part_size: 8 * 1024 * 1024,              // 8MB
            multipart_threshold: 100 * 1024 * 1024, // 100MB
            breakpoint_expire_days: 7,
            breakpoint_dir: objsync_home().join("breakpoints"),
            flush_interval_secs: 20,
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            path_style: false,
        }
    }
}

impl Settings {
    /// Load settings from a file (or the default location) plus environment
    ///
    /// A missing file means defaults; an unreadable one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| objsync_home().join("config.json"));

        let mut settings = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|e| SyncError::io(&path, e))?;
            serde_json::from_str::<Settings>(&data).map_err(|e| {
                SyncError::Config(format!("invalid settings file {}: {}", path.display(), e))
            })?
        } else {
            Settings::default()
        };

        settings.apply_env();
        Ok(settings)
    }

    /// Layer environment variables on top of the file values
    pub fn apply_env(&mut self) {
        if let Ok(region) =
            std::env::var("AWS_REGION").or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        {
            self.region = region;
        }
        if let Ok(endpoint) = std::env::var("AWS_ENDPOINT_URL") {
            self.endpoint = Some(endpoint);
        }
        if let Ok(key) = std::env::var("AWS_ACCESS_KEY_ID") {
            self.access_key_id = Some(key);
        }
        if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
            self.secret_access_key = Some(secret);
        }
        if let Some(n) = env_usize("OBJSYNC_CONCURRENCY") {
            self.default_concurrency = n;
        }
        if let Some(n) = env_usize("OBJSYNC_PART_THREADS") {
            self.part_threads = n;
        }
    }

    /// Background flush interval
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Per-user directory for settings and breakpoint records
pub fn objsync_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".objsync")
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("TB") || size.ends_with('T') {
        (size.trim_end_matches(['T', 'B']), 1024u64 * 1024 * 1024 * 1024)
    } else if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(['G', 'B']), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(['M', 'B']), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(['K', 'B']), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    if num < 0.0 {
        return Err(format!("Negative size: {}", size));
    }

    Ok((num * multiplier as f64) as u64)
}

/// Parse a modification-time bound
///
/// Accepts an RFC3339 timestamp or an age such as `3d` / `12h`, which is
/// taken relative to now.
pub fn parse_time_bound(value: &str) -> std::result::Result<SystemTime, String> {
    let value = value.trim();
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(value) {
        return Ok(SystemTime::from(ts));
    }
    let age = humantime::parse_duration(value)
        .map_err(|e| format!("Invalid time '{}': {}", value, e))?;
    SystemTime::now()
        .checked_sub(age)
        .ok_or_else(|| format!("Time '{}' is before the epoch", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("8MB").unwrap(), 8 * 1024 * 1024);
        assert_eq!(parse_size("1.5G").unwrap(), (1.5 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
    }

    #[test]
    fn test_parse_time_bound() {
        let fixed = parse_time_bound("2024-01-02T03:04:05Z").unwrap();
        let secs = fixed.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(secs, 1_704_164_645);

        let ago = parse_time_bound("2h").unwrap();
        let delta = SystemTime::now().duration_since(ago).unwrap();
        assert!(delta >= Duration::from_secs(7200));
        assert!(delta < Duration::from_secs(7300));

        assert!(parse_time_bound("yesterday-ish").is_err());
    }

    #[test]
    fn test_settings_file_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "part_threads": 9, "breakpoint_expire_days": 2 }"#).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.breakpoint_expire_days, 2);
        assert_eq!(settings.part_size, 8 * 1024 * 1024);

        let missing = Settings::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(missing.flush_interval(), Duration::from_secs(20));
    }

    #[test]
    fn test_settings_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Settings::load(Some(&path)), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(CompareStrategy::default(), CompareStrategy::TimeSize);
        assert_eq!(CompareStrategy::OnlyCrc32.name(), "only-crc32");
        assert_eq!(
            CompareStrategy::from_str("time-size-crc32", true).unwrap(),
            CompareStrategy::TimeSizeCrc32
        );
    }
}
