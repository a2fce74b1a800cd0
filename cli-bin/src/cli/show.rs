//! `promptdex show` / `promptdex rm`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::DateTime;
use clap::Args;
use libpromptdex::utils::{canonicalize_lossy, to_db_path};
use libpromptdex::{ImageRecord, Library};

use super::Format;

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct RmArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

fn key(p: &Path) -> String {
    to_db_path(canonicalize_lossy(p))
}

pub fn run_show(args: &ShowArgs, lib: &mut Library, fmt: Format) -> Result<()> {
    let Some(rec) = lib.metadata(&key(&args.path))? else {
        bail!("not indexed and not on disk: {}", args.path.display());
    };
    match fmt {
        Format::Text => print_record(&rec),
        Format::Json => println!("{}", serde_json::to_string_pretty(&rec)?),
    }
    Ok(())
}

fn print_record(rec: &ImageRecord) {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    println!("path:      {}", rec.path);
    println!("tool:      {}", rec.tool);
    println!("prompt:    {}", rec.prompt);
    println!("negative:  {}", rec.negative_prompt);
    println!("model:     {}", opt(&rec.model_name));
    println!("sampler:   {}", opt(&rec.sampler));
    println!("scheduler: {}", opt(&rec.scheduler));
    println!(
        "steps:     {}",
        rec.steps.map(|s| s.to_string()).unwrap_or_default()
    );
    println!(
        "cfg:       {}",
        rec.cfg_scale.map(|c| c.to_string()).unwrap_or_default()
    );
    println!("seed:      {}", opt(&rec.seed));
    println!("size:      {}", rec.resolution().unwrap_or_default());
    for l in &rec.loras {
        println!("lora:      {} ({})", l.name, l.weight);
    }
    if let Some(t) = DateTime::from_timestamp(rec.mtime, 0) {
        println!("modified:  {}", t.format("%Y-%m-%d %H:%M:%S"));
    }
}

pub fn run_rm(args: &RmArgs, lib: &mut Library, fmt: Format) -> Result<()> {
    let keys: Vec<String> = args.paths.iter().map(|p| key(p)).collect();
    let removed = lib.delete(&keys)?;
    match fmt {
        Format::Text => println!("Removed {removed} image(s) from the index."),
        Format::Json => println!("{}", serde_json::json!({ "removed": removed })),
    }
    Ok(())
}
