// src/cli/scan.rs

use std::env;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use libpromptdex::utils::canonicalize_lossy;
use libpromptdex::{Library, ScanReport};
use tracing::info;

use super::Format;

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Directories to scan in addition to configured and indexed ones
    /// (defaults to the current directory when nothing is configured)
    pub paths: Vec<PathBuf>,

    /// Descend into sub-directories
    #[arg(long, short)]
    pub recursive: bool,
}

/// Roots passed to the scanner for this invocation.
pub fn scan_paths(args: &ScanArgs, lib: &Library) -> Result<Vec<PathBuf>> {
    if args.paths.is_empty() && lib.config().roots.is_empty() {
        return Ok(vec![env::current_dir()?]);
    }
    Ok(args.paths.iter().map(canonicalize_lossy).collect())
}

pub fn run(args: &ScanArgs, lib: &mut Library, fmt: Format) -> Result<()> {
    let roots = scan_paths(args, lib)?;
    let report = lib.scan_report(&roots)?;
    print_report(&report, fmt)
}

pub fn print_report(report: &ScanReport, fmt: Format) -> Result<()> {
    match fmt {
        Format::Text => {
            if report.skipped_busy {
                println!("A scan is already running.");
                return Ok(());
            }
            println!(
                "Indexed {} new image(s), removed {}.",
                report.indexed, report.removed
            );
            if report.failed_files + report.failed_batches > 0 {
                info!(
                    failed_files = report.failed_files,
                    failed_batches = report.failed_batches,
                    "some images were not indexed"
                );
            }
        }
        Format::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}
