//! tests/util.rs
//! Small helpers shared across integration tests.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Absolute path to the freshly-built `promptdex` binary.
pub fn bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_promptdex"))
}

/// Build a `Command` for `promptdex` whose index lives in `<tmp>/index.db`
/// and whose thumbnail cache lives in `<tmp>/thumbs`.
///
/// Each call yields a brand-new `Command`, so callers can freely add
/// arguments, change the working directory, etc., without affecting
/// other invocations.
pub fn promptdex(tmp: &TempDir) -> Command {
    let db_path: &Path = &tmp.path().join("index.db");
    let mut cmd = Command::new(bin());
    cmd.env("PROMPTDEX_DB_PATH", db_path)
        .env("PROMPTDEX_CACHE_DIR", tmp.path().join("thumbs"))
        .env_remove("PROMPTDEX_ROOTS")
        .env_remove("PROMPTDEX_FULL_TEXT")
        .env_remove("RUST_LOG");
    cmd
}

/// Write a tiny PNG carrying `tEXt` chunks.
pub fn write_png(path: &Path, width: u32, height: u32, text: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut enc = png::Encoder::new(BufWriter::new(file), width, height);
    enc.set_color(png::ColorType::Rgb);
    enc.set_depth(png::BitDepth::Eight);
    for (k, v) in text {
        enc.add_text_chunk(k.to_string(), v.to_string()).unwrap();
    }
    let mut writer = enc.write_header().unwrap();
    writer
        .write_image_data(&vec![0u8; (width * height * 3) as usize])
        .unwrap();
}

/// A WebUI-style parameter block.
pub fn params(prompt: &str, model: &str, lora: Option<&str>) -> String {
    let lora = lora.map(|l| format!(" <lora:{l}:0.7>")).unwrap_or_default();
    format!(
        "{prompt}{lora}\nNegative prompt: lowres\nSteps: 25, Sampler: DPM++ 2M, Schedule type: Karras, CFG scale: 6, Seed: 99, Size: 64x32, Model: {model}"
    )
}

/// `<tmp>/imgs` with three tagged images.
pub fn gallery(tmp: &TempDir) -> PathBuf {
    let dir = tmp.path().join("imgs");
    std::fs::create_dir_all(&dir).unwrap();
    let a = params("cyberpunk street, neon rain", "sdxl_base", Some("neon"));
    let b = params("cyberpunk alley at dusk", "dreamshaper", None);
    let c = params("portrait of an old sailor", "sdxl_base", Some("film"));
    write_png(&dir.join("street.png"), 4, 2, &[("parameters", a.as_str())]);
    write_png(&dir.join("alley.png"), 4, 2, &[("parameters", b.as_str())]);
    write_png(&dir.join("sailor.png"), 4, 2, &[("parameters", c.as_str())]);
    dir
}
