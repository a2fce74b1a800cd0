//! promptdex CLI entry-point
//!
//! All heavy lifting lives in the `libpromptdex` crate; this file handles
//! argument parsing, logging and dispatch.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use libpromptdex::{config::Config, logging, Library};
use std::{env, io};
use tracing::info;

use promptdex_cli::cli::{self, Cli, Commands, Format};

fn main() -> Result<()> {
    /* ── CLI parsing & logging ────────────────────────────────── */
    let args = Cli::parse();
    if args.verbose {
        env::set_var("RUST_LOG", "debug");
    }
    logging::init();

    /* ── shell-completion shortcut ────────────────────────────── */
    if let Commands::Completions { shell } = &args.command {
        let mut cmd = Cli::command();
        generate(*shell, &mut cmd, "promptdex", &mut io::stdout());
        return Ok(());
    }

    /* ── config & index ───────────────────────────────────────── */
    let mut cfg = Config::load()?;
    if let Commands::Scan(a) = &args.command {
        cfg.recursive |= a.recursive;
    }
    let mut lib = Library::open_with(cfg)?;

    /* ── command dispatch ─────────────────────────────────────── */
    match args.command {
        Commands::Completions { .. } => {} // handled above

        Commands::Init => {
            let cleaned = lib.normalize_paths()?;
            info!("Database initialised at {}", lib.config().db_path.display());
            let roots = lib.config().roots.clone();
            let report = lib.scan_report(&roots)?;
            match args.format {
                Format::Text => println!(
                    "Index ready at {} ({} image(s) indexed, {} path(s) normalized).",
                    lib.config().db_path.display(),
                    report.indexed,
                    cleaned.normalized + cleaned.deleted
                ),
                Format::Json => println!(
                    "{}",
                    serde_json::json!({
                        "db_path": lib.config().db_path,
                        "indexed": report.indexed,
                        "normalized": cleaned.normalized,
                        "duplicates_removed": cleaned.deleted,
                    })
                ),
            }
        }

        Commands::Scan(a) => cli::scan::run(&a, &mut lib, args.format)?,
        Commands::Search(a) => cli::search::run(&a, &lib, args.format)?,
        Commands::Show(a) => cli::show::run_show(&a, &mut lib, args.format)?,
        Commands::Facets(a) => cli::facets::run(&a, &lib, args.format)?,
        Commands::Rm(a) => cli::show::run_rm(&a, &mut lib, args.format)?,
        Commands::Watch(a) => cli::watch::run(&a, &lib, args.format)?,
    }

    Ok(())
}
