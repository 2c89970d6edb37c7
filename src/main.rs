//! objsync CLI - resumable sync between local trees and object storage

use clap::Parser;
use objsync::config::{CliArgs, Commands, Location, RunMode, Settings, SyncArgs};
use objsync::core::{
    copy, list, make_bucket, remove_bucket, remove_objects, signed_url, sync, OutputOptions,
    SyncEngine, SyncReport,
};
use objsync::error::{Result, SyncError};
use objsync::storage::ObjectStore;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = CliArgs::parse();

    // RUST_LOG wins; otherwise verbosity flags pick the level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match (args.quiet, args.verbose) {
            (true, _) => "error",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Run one subcommand; `Ok(false)` means it finished with failures
fn run(args: CliArgs) -> Result<bool> {
    let settings = Settings::load(args.config.as_deref())?;
    let store = open_store(&settings)?;
    let quiet = args.quiet;

    match args.command {
        Commands::List { target, recursive } => {
            let location = target.as_deref().map(Location::parse).transpose()?;
            for item in list(store.as_ref(), location.as_ref(), recursive)? {
                println!("{}", item);
            }
            Ok(true)
        }
        Commands::MakeBucket { bucket } => {
            make_bucket(store.as_ref(), &Location::parse(&bucket)?)?;
            Ok(true)
        }
        Commands::RemoveBucket { bucket } => {
            remove_bucket(store.as_ref(), &Location::parse(&bucket)?)?;
            Ok(true)
        }
        Commands::Remove {
            target,
            recursive,
            dry_run,
        } => {
            let removed = remove_objects(&store, &Location::parse(&target)?, recursive, dry_run)?;
            if !quiet && !dry_run {
                println!("Removed {} object(s)", removed);
            }
            Ok(true)
        }
        Commands::Copy {
            source,
            destination,
            recursive,
            transfer,
        } => {
            let sync_args = SyncArgs::from_cli(&source, &destination, RunMode::Copy, &transfer, &settings)?;
            let output = output_options(quiet, &sync_args, transfer.progress);
            let engine = open_engine(sync_args, &store, output)?;
            finish(copy(&engine, recursive)?, quiet)
        }
        Commands::Sync {
            source,
            destination,
            delete,
            delete_exclude,
            strategy,
            transfer,
        } => {
            let mut sync_args =
                SyncArgs::from_cli(&source, &destination, RunMode::Sync, &transfer, &settings)?;
            sync_args.delete = delete;
            sync_args.delete_exclude = delete_exclude;
            sync_args.strategy = strategy;
            sync_args.validate()?;

            let output = output_options(quiet, &sync_args, transfer.progress);
            let engine = open_engine(sync_args, &store, output)?;
            finish(sync(&engine)?, quiet)
        }
        Commands::Sign { target, expires } => {
            let expires = humantime::parse_duration(&expires)
                .map_err(|e| SyncError::validation(format!("expiry '{}': {}", expires, e)))?;
            let (bucket, key) = match Location::parse(&target)? {
                Location::Remote { bucket, prefix } => (bucket, prefix),
                Location::Local(_) => {
                    return Err(SyncError::validation("sign needs an s3://bucket/key URL"))
                }
            };
            println!("{}", signed_url(store.as_ref(), &bucket, &key, expires)?);
            Ok(true)
        }
    }
}

/// Engine whose live breakpoints are saved if the process is interrupted
fn open_engine(
    args: SyncArgs,
    store: &Arc<dyn ObjectStore>,
    output: OutputOptions,
) -> Result<SyncEngine> {
    let engine = SyncEngine::new(args, Arc::clone(store)).with_output(output);
    #[cfg(feature = "native_s3")]
    objsync::core::flush_on_shutdown(Arc::clone(engine.book()))?;
    Ok(engine)
}

fn output_options(quiet: bool, args: &SyncArgs, progress: bool) -> OutputOptions {
    OutputOptions {
        quiet,
        dry_run: args.dry_run,
        progress,
    }
}

fn finish(report: SyncReport, quiet: bool) -> Result<bool> {
    if !quiet {
        report.print_summary();
    }
    let report = report.into_result()?;
    Ok(report.is_success())
}

#[cfg(feature = "native_s3")]
fn open_store(settings: &Settings) -> Result<Arc<dyn ObjectStore>> {
    use objsync::storage::{S3Config, S3Store};
    Ok(Arc::new(S3Store::new(S3Config::from(settings))?))
}

#[cfg(not(feature = "native_s3"))]
fn open_store(_settings: &Settings) -> Result<Arc<dyn ObjectStore>> {
    Err(SyncError::Config(
        "built without the native_s3 feature, no storage backend is available".to_string(),
    ))
}
