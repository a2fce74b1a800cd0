// src/cli/facets.rs

use anyhow::Result;
use clap::Args;
use libpromptdex::utils::{canonicalize_lossy, to_db_path};
use libpromptdex::{FacetCount, FacetScope, Library};

use super::Format;

#[derive(Args, Debug)]
pub struct FacetArgs {
    /// Restrict counts to this folder and below
    #[arg(long)]
    pub folder: Option<String>,

    /// Restrict counts to this model (`ALL` for any)
    #[arg(long)]
    pub model: Option<String>,
}

pub fn run(args: &FacetArgs, lib: &Library, fmt: Format) -> Result<()> {
    let scope = FacetScope {
        folder: args.folder.as_ref().map(|f| to_db_path(canonicalize_lossy(f))),
        model: args.model.clone(),
    };
    let facets = lib.facets(&scope)?;
    match fmt {
        Format::Json => println!("{}", serde_json::to_string_pretty(&facets)?),
        Format::Text => {
            section("folders", &facets.folders);
            section("models", &facets.models);
            section("loras", &facets.loras);
            section("resolutions", &facets.resolutions);
            section("samplers", &facets.samplers);
            section("schedulers", &facets.schedulers);
        }
    }
    Ok(())
}

fn section(title: &str, counts: &[FacetCount]) {
    if counts.is_empty() {
        return;
    }
    println!("{title}:");
    for c in counts {
        println!("  {:>6}  {}", c.count, c.value);
    }
}
