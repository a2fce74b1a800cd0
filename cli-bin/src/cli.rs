//! Argument structs and the per-command runners.

pub mod facets;
pub mod scan;
pub mod search;
pub mod show;
pub mod watch;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

/// Output format for commands that print results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

/// promptdex – search AI-generated images by their generation parameters
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: Format,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create (or upgrade) the index, then index any configured roots
    Init,

    /// Index new images and drop rows for deleted ones
    ///
    /// Example:
    ///     promptdex scan ~/sd-output ~/comfy/output --recursive
    Scan(scan::ScanArgs),

    /// Search by keyword and filters; prints one page of results
    ///
    /// Example:
    ///     promptdex search "cyberpunk" --model sdxl_base --sort name_asc
    Search(search::SearchArgs),

    /// Print the full metadata record of one image
    Show(show::ShowArgs),

    /// Count images per folder, model, LoRA, resolution, sampler and scheduler
    Facets(facets::FacetArgs),

    /// Remove images from the index (files on disk are left alone)
    Rm(show::RmArgs),

    /// Keep the index up to date while images are written
    Watch(watch::WatchArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}
