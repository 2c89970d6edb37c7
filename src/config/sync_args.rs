//! Resolved parameters for one sync or copy invocation

use crate::config::{parse_size, parse_time_bound, CompareStrategy, Location, Settings, TransferArgs};
use crate::error::{Result, SyncError};
use crate::fs::{EntryFilter, FilterSpec};
use std::path::PathBuf;
use std::time::Duration;

/// Whether unmatched-but-equal entries are skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Compare both sides and transfer only what differs
    Sync,
    /// Transfer every source entry
    Copy,
}

/// Direction of the data flow, derived from the location pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    /// Local source, remote destination
    Upload,
    /// Remote source, local destination
    Download,
    /// Remote source, remote destination
    Copy,
}

/// Validated parameters for one sync/cp invocation
///
/// Immutable once validated; workers share it through an `Arc`.
#[derive(Debug, Clone)]
pub struct SyncArgs {
    /// Source root
    pub source: Location,
    /// Destination root
    pub destination: Location,
    /// Sync or plain copy
    pub mode: RunMode,
    /// Maximum concurrently running file operations
    pub concurrency: usize,
    /// Maximum concurrently running parts within one transfer
    pub part_threads: usize,
    /// Initial multipart part size
    pub part_size: u64,
    /// Multipart transfer threshold
    pub multipart_threshold: u64,
    /// Comparison of entries present on both sides
    pub strategy: CompareStrategy,
    /// Delete destination-only entries
    pub delete: bool,
    /// Destination keys exempt from deletion
    pub delete_exclude: Vec<String>,
    /// Listing filter for both sides
    pub filter: FilterSpec,
    /// Follow symlinks in local trees
    pub follow_symlinks: bool,
    /// Ignore breakpoint records
    pub restart: bool,
    /// Print decisions without executing them
    pub dry_run: bool,
    /// Breakpoint record directory
    pub breakpoint_dir: PathBuf,
    /// Breakpoint record time-to-live in days
    pub breakpoint_expire_days: u64,
    /// Background flush interval for breakpoint records
    pub flush_interval: Duration,
}

impl SyncArgs {
    /// Arguments with settings defaults for a source/destination pair
    pub fn new(source: Location, destination: Location) -> Self {
        Self::with_settings(source, destination, &Settings::default())
    }

    /// Arguments with the given settings as defaults
    pub fn with_settings(source: Location, destination: Location, settings: &Settings) -> Self {
        Self {
            source,
            destination,
            mode: RunMode::Sync,
            concurrency: settings.default_concurrency,
            part_threads: settings.part_threads,
            part_size: settings.part_size,
            multipart_threshold: settings.multipart_threshold,
            strategy: CompareStrategy::default(),
            delete: false,
            delete_exclude: Vec::new(),
            filter: FilterSpec::default(),
            follow_symlinks: false,
            restart: false,
            dry_run: false,
            breakpoint_dir: settings.breakpoint_dir.clone(),
            breakpoint_expire_days: settings.breakpoint_expire_days,
            flush_interval: settings.flush_interval(),
        }
    }

    /// Build from CLI arguments layered over settings, then validate
    pub fn from_cli(
        source: &str,
        destination: &str,
        mode: RunMode,
        transfer: &TransferArgs,
        settings: &Settings,
    ) -> Result<Self> {
        let mut args = Self::with_settings(
            Location::parse(source)?,
            Location::parse(destination)?,
            settings,
        );
        args.mode = mode;

        if transfer.concurrency > 0 {
            args.concurrency = transfer.concurrency;
        }
        if transfer.part_threads > 0 {
            args.part_threads = transfer.part_threads;
        }
        if let Some(size) = &transfer.part_size {
            args.part_size = parse_size(size)
                .map_err(|e| SyncError::validation(format!("part size: {}", e)))?;
        }
        if let Some(size) = &transfer.multipart_threshold {
            args.multipart_threshold = parse_size(size)
                .map_err(|e| SyncError::validation(format!("multipart threshold: {}", e)))?;
        }
        if let Some(dir) = &transfer.breakpoint_dir {
            args.breakpoint_dir = dir.clone();
        }

        args.filter = FilterSpec {
            include: transfer.include.clone(),
            exclude: transfer.exclude.clone(),
            newer_than: transfer
                .newer_than
                .as_deref()
                .map(parse_time_bound)
                .transpose()
                .map_err(SyncError::validation)?,
            older_than: transfer
                .older_than
                .as_deref()
                .map(parse_time_bound)
                .transpose()
                .map_err(SyncError::validation)?,
            min_size: transfer
                .min_size
                .as_deref()
                .map(parse_size)
                .transpose()
                .map_err(SyncError::validation)?,
            max_size: transfer
                .max_size
                .as_deref()
                .map(parse_size)
                .transpose()
                .map_err(SyncError::validation)?,
        };
        args.follow_symlinks = transfer.follow_symlinks;
        args.restart = transfer.restart;
        args.dry_run = transfer.dry_run;

        args.validate()?;
        Ok(args)
    }

    /// Check every argument before any transfer I/O happens
    pub fn validate(&self) -> Result<()> {
        self.pairing()?;

        if self.source == self.destination {
            return Err(SyncError::validation(format!(
                "source and destination are the same: {}",
                self.source
            )));
        }
        if let Location::Local(path) = &self.source {
            if !path.exists() {
                return Err(SyncError::NotFound(path.clone()));
            }
        }
        if self.concurrency == 0 {
            return Err(SyncError::validation("concurrency must be at least 1"));
        }
        if self.part_threads == 0 {
            return Err(SyncError::validation("part threads must be at least 1"));
        }
        if self.part_size == 0 {
            return Err(SyncError::validation("part size must be positive"));
        }
        if let (Some(newer), Some(older)) = (self.filter.newer_than, self.filter.older_than) {
            if newer >= older {
                return Err(SyncError::validation("--newer-than must be before --older-than"));
            }
        }

        EntryFilter::new(&self.filter)?;
        EntryFilter::exclude_only(&self.delete_exclude)?;
        Ok(())
    }

    /// Direction of the transfer
    pub fn pairing(&self) -> Result<Pairing> {
        match (&self.source, &self.destination) {
            (Location::Local(_), Location::Remote { .. }) => Ok(Pairing::Upload),
            (Location::Remote { .. }, Location::Local(_)) => Ok(Pairing::Download),
            (Location::Remote { .. }, Location::Remote { .. }) => Ok(Pairing::Copy),
            (Location::Local(_), Location::Local(_)) => Err(SyncError::validation(
                "local to local transfers are not supported, one side must be s3://",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(url: &str) -> Location {
        Location::parse(url).unwrap()
    }

    #[test]
    fn test_pairing() {
        let dir = tempfile::tempdir().unwrap();
        let local = Location::Local(dir.path().to_path_buf());

        let args = SyncArgs::new(local.clone(), remote("s3://b/p"));
        assert_eq!(args.pairing().unwrap(), Pairing::Upload);

        let args = SyncArgs::new(remote("s3://b/p"), local.clone());
        assert_eq!(args.pairing().unwrap(), Pairing::Download);

        let args = SyncArgs::new(remote("s3://a/p"), remote("s3://b/p"));
        assert_eq!(args.pairing().unwrap(), Pairing::Copy);

        let args = SyncArgs::new(local.clone(), local);
        assert!(matches!(args.validate(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_validation_errors() {
        let args = SyncArgs::new(remote("s3://b/p"), remote("s3://b/p"));
        assert!(args.validate().is_err());

        let args = SyncArgs::new(
            Location::Local(PathBuf::from("/definitely/not/here")),
            remote("s3://b/p"),
        );
        assert!(matches!(args.validate(), Err(SyncError::NotFound(_))));

        let mut args = SyncArgs::new(remote("s3://a/p"), remote("s3://b/p"));
        args.concurrency = 0;
        assert!(args.validate().is_err());

        let mut args = SyncArgs::new(remote("s3://a/p"), remote("s3://b/p"));
        args.filter.include = vec!["[".to_string()];
        assert!(matches!(args.validate(), Err(SyncError::Validation(_))));
    }

    #[test]
    fn test_from_cli_overrides() {
        let transfer = TransferArgs {
            concurrency: 3,
            part_size: Some("16M".to_string()),
            exclude: vec!["*.tmp".to_string()],
            dry_run: true,
            ..Default::default()
        };
        let args = SyncArgs::from_cli(
            "s3://a/src",
            "s3://b/dst",
            RunMode::Sync,
            &transfer,
            &Settings::default(),
        )
        .unwrap();

        assert_eq!(args.concurrency, 3);
        assert_eq!(args.part_size, 16 * 1024 * 1024);
        assert_eq!(args.filter.exclude, vec!["*.tmp".to_string()]);
        assert!(args.dry_run);
        assert_eq!(args.part_threads, Settings::default().part_threads);
    }
}
