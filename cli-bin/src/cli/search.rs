//! `promptdex search …` – one page of filtered, sorted results.

use anyhow::Result;
use chrono::DateTime;
use clap::Args;
use libpromptdex::utils::{canonicalize_lossy, to_db_path};
use libpromptdex::{Library, Page, SearchQuery, SortOrder};
use tracing::info;

use super::Format;

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Case-insensitive substring of the prompt or file name
    pub keyword: Option<String>,

    /// Only images in this folder or below it
    #[arg(long)]
    pub folder: Option<String>,

    /// Exact model name (`ALL` for any)
    #[arg(long)]
    pub model: Option<String>,

    /// LoRA name (`ALL` for any)
    #[arg(long)]
    pub lora: Option<String>,

    /// time_desc | time_asc | name_asc | name_desc
    #[arg(long, default_value = "time_desc")]
    pub sort: SortOrder,

    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    pub page: usize,

    #[arg(long, default_value_t = 50)]
    pub page_size: usize,
}

impl SearchArgs {
    pub fn query(&self) -> SearchQuery {
        SearchQuery {
            keyword: self.keyword.clone(),
            folder: self.folder.as_ref().map(|f| to_db_path(canonicalize_lossy(f))),
            model: self.model.clone(),
            lora: self.lora.clone(),
            sort: self.sort,
        }
    }
}

pub fn run(args: &SearchArgs, lib: &Library, fmt: Format) -> Result<()> {
    let page = lib.page(&args.query(), args.page, args.page_size)?;
    match fmt {
        Format::Text => print_text(&page),
        Format::Json => println!("{}", serde_json::to_string_pretty(&page)?),
    }
    Ok(())
}

fn print_text(page: &Page) {
    for item in &page.items {
        let when = DateTime::from_timestamp(item.mtime, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{when:16}  {:>11}  {}",
            format!("{}x{}", item.width, item.height),
            item.path
        );
    }
    info!(
        page = page.page,
        shown = page.items.len(),
        total = page.total,
        more = page.has_more,
        "search done"
    );
}
