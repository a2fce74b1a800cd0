//! Metadata extraction: one image file in, one [`ImageRecord`] out.
//!
//! Sources are tried in a fixed order and the first that yields parameters
//! wins:
//!
//! 1. PNG text chunk `parameters` (inline text block)
//! 2. PNG text chunk `prompt` holding a JSON node graph
//! 3. XMP packet with a `parameters="…"` attribute
//! 4. EXIF UserComment / XPComment / tag 10
//! 5. misc text fields (`comment`, `Description`, ImageDescription)
//!
//! [`extract`] never fails and never panics. Anything it cannot make sense
//! of degrades to a record carrying only size, mtime and dimensions.

pub mod a1111;
pub mod comfy;

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::model::{ImageRecord, LoraRef, SourceTool};
use crate::utils::{mtime_secs, to_db_path};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// EXIF tags that may carry a parameter block, in priority order.
const EXIF_PARAM_TAGS: &[u16] = &[37510, 40092, 10];
const EXIF_IMAGE_DESCRIPTION: u16 = 270;

const MISC_TEXT_KEYS: &[&str] = &["comment", "Description", "Description-xmp"];
const MISC_MIN_CHARS: usize = 20;

static XMP_PARAMETERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"parameters="([^"]*)""#).expect("xmp attribute regex must compile")
});

/* ─── policy ──────────────────────────────────────────────────────── */

/// Hand-tuned keyword lists used to guess a checkpoint name from a node
/// graph when no loader node names one.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelHeuristics {
    /// Lower-case file extensions (no dot) that mark a model file.
    pub extensions: Vec<String>,
    /// Substrings that disqualify a candidate (LoRAs, VAEs, encoders, …).
    pub blacklist: Vec<String>,
    /// Substrings that each add one point to a candidate's score.
    pub keywords: Vec<String>,
}

impl Default for ModelHeuristics {
    fn default() -> Self {
        let own = |xs: &[&str]| -> Vec<String> { xs.iter().map(|s| s.to_string()).collect() };
        Self {
            extensions: own(&["safetensors", "ckpt", "pt", "pth", "bin", "gguf", "sft"]),
            blacklist: own(&[
                "lora",
                "lycoris",
                "controlnet",
                "control_",
                "vae",
                "upscale",
                "esrgan",
                "clip",
                "t5xxl",
                "text_encoder",
                "text-encoder",
                "umt5",
                "embedding",
                "ipadapter",
                "ip-adapter",
            ]),
            keywords: own(&[
                "sdxl",
                "xl",
                "sd15",
                "sd1.5",
                "sd3",
                "flux",
                "pony",
                "illustrious",
                "checkpoint",
                "unet",
                "turbo",
                "base",
            ]),
        }
    }
}

impl ModelHeuristics {
    fn model_extension<'a>(&self, name: &'a str) -> Option<(&'a str, &'a str)> {
        let (stem, ext) = name.rsplit_once('.')?;
        let ext_lc = ext.to_ascii_lowercase();
        (!stem.is_empty() && self.extensions.iter().any(|e| *e == ext_lc)).then_some((stem, ext))
    }

    /// Drop a known model extension (`foo.safetensors` → `foo`).
    pub fn strip_extension(&self, name: &str) -> String {
        self.model_extension(name)
            .map(|(stem, _)| stem)
            .unwrap_or(name)
            .to_string()
    }

    /// Score a string input as a model candidate; `None` when it is not one.
    pub fn score(&self, value: &str) -> Option<usize> {
        let value = value.trim();
        if value.is_empty() || value.contains('\n') {
            return None;
        }
        self.model_extension(value)?;
        let lc = value.to_lowercase();
        if self.blacklist.iter().any(|b| lc.contains(b.as_str())) {
            return None;
        }
        Some(self.keywords.iter().filter(|k| lc.contains(k.as_str())).count())
    }
}

/// Knobs for [`extract_with`].
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub heuristics: ModelHeuristics,
}

/* ─── parser output ───────────────────────────────────────────────── */

/// What one of the format parsers recovered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parsed {
    pub prompt: String,
    pub negative_prompt: String,
    pub loras: Vec<LoraRef>,
    pub params: BTreeMap<String, String>,
    pub seed: Option<String>,
    pub steps: Option<i64>,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    pub cfg_scale: Option<f64>,
    pub model_name: Option<String>,
    pub model_hash: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub tool: SourceTool,
    pub prompt_node: Option<String>,
    pub negative_node: Option<String>,
}

impl Parsed {
    /// Move everything into `rec`; parsed dimensions only fill gaps the
    /// container header left.
    fn apply(self, rec: &mut ImageRecord, raw: Vec<u8>) {
        rec.prompt = self.prompt;
        rec.negative_prompt = self.negative_prompt;
        rec.loras = self.loras;
        rec.params = self.params;
        rec.seed = self.seed;
        rec.steps = self.steps;
        rec.sampler = self.sampler;
        rec.scheduler = self.scheduler;
        rec.cfg_scale = self.cfg_scale;
        rec.model_name = self.model_name;
        rec.model_hash = self.model_hash;
        rec.tool = self.tool;
        rec.prompt_node = self.prompt_node;
        rec.negative_node = self.negative_node;
        rec.raw = raw;
        if rec.width.is_none() || rec.height.is_none() {
            rec.width = self.width;
            rec.height = self.height;
        }
    }
}

/* ─── entry points ────────────────────────────────────────────────── */

/// Extract with the default heuristics. Never fails.
pub fn extract<P: AsRef<Path>>(path: P) -> ImageRecord {
    extract_with(path, &ExtractOptions::default())
}

/// Extract with explicit options. Never fails; an unreadable file yields
/// a record with only the identity fields set.
pub fn extract_with<P: AsRef<Path>>(path: P, opts: &ExtractOptions) -> ImageRecord {
    let path = path.as_ref();
    try_extract(path, opts).unwrap_or_else(|e| {
        debug!(file = %path.display(), error = %e, "unreadable, minimal record");
        ImageRecord::for_path(&to_db_path(path))
    })
}

/// Like [`extract_with`] but reports a file that cannot be stat'ed or read,
/// so a scanner can skip it instead of indexing an empty row.
pub fn try_extract<P: AsRef<Path>>(path: P, opts: &ExtractOptions) -> Result<ImageRecord> {
    let path = path.as_ref();
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;

    let mut rec = ImageRecord::for_path(&to_db_path(path));
    rec.file_size = meta.len();
    rec.mtime = mtime_secs(&meta);
    Ok(extract_from_bytes(&bytes, rec, opts))
}

/// Fill `rec` from an in-memory file image.
pub fn extract_from_bytes(bytes: &[u8], mut rec: ImageRecord, opts: &ExtractOptions) -> ImageRecord {
    if bytes.is_empty() {
        return rec;
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        (dimensions(bytes), resolve(bytes, &opts.heuristics))
    }));

    match outcome {
        Ok((dims, parsed)) => {
            if let Some((w, h)) = dims {
                rec.width = Some(w);
                rec.height = Some(h);
            }
            if let Some((parsed, raw)) = parsed {
                parsed.apply(&mut rec, raw);
            }
        }
        Err(_) => warn!(file = %rec.path, "metadata parser panicked, minimal record"),
    }
    rec
}

/* ─── source resolution ───────────────────────────────────────────── */

fn resolve(bytes: &[u8], heuristics: &ModelHeuristics) -> Option<(Parsed, Vec<u8>)> {
    let chunks = png_text_chunks(bytes);
    let chunk = |key: &str| chunks.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());

    if let Some(text) = chunk("parameters") {
        return Some((a1111::parse(text), text.as_bytes().to_vec()));
    }

    if let Some(json) = chunk("prompt") {
        match comfy::parse(json, heuristics) {
            Some(parsed) => return Some((parsed, json.as_bytes().to_vec())),
            None => debug!("`prompt` chunk is not a node graph"),
        }
    }

    let xmp_texts = chunks
        .iter()
        .filter(|(k, _)| k.to_ascii_lowercase().contains("xmp"))
        .map(|(_, v)| v.clone())
        .chain(xmp_packet(bytes));
    for xmp in xmp_texts {
        if let Some(text) = xmp_parameters(&xmp) {
            return Some((a1111::parse(&text), text.into_bytes()));
        }
    }

    let exif = exif_text_fields(bytes);
    for tag in EXIF_PARAM_TAGS {
        let Some((_, raw)) = exif.iter().find(|(t, _)| t == tag) else {
            continue;
        };
        let text = decode_exif_text(raw);
        if text.contains("Steps:") || text.contains("Positive") {
            return Some((a1111::parse(&text), raw.clone()));
        }
    }

    let misc = MISC_TEXT_KEYS
        .iter()
        .filter_map(|key| chunk(key).map(str::to_string))
        .chain(
            exif.iter()
                .filter(|(t, _)| *t == EXIF_IMAGE_DESCRIPTION)
                .map(|(_, raw)| decode_exif_text(raw)),
        );
    for text in misc {
        if text.chars().count() > MISC_MIN_CHARS {
            let raw = text.as_bytes().to_vec();
            return Some((a1111::parse(&text), raw));
        }
    }

    None
}

fn dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// All PNG text chunks (`tEXt`, `zTXt`, `iTXt`) ahead of the image data,
/// as `(keyword, text)` in that order. Non-PNG input yields nothing.
fn png_text_chunks(bytes: &[u8]) -> Vec<(String, String)> {
    if !bytes.starts_with(PNG_SIGNATURE) {
        return Vec::new();
    }
    let reader = match png::Decoder::new(Cursor::new(bytes)).read_info() {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "png header unreadable");
            return Vec::new();
        }
    };
    let info = reader.info();

    let mut out: Vec<(String, String)> = info
        .uncompressed_latin1_text
        .iter()
        .map(|c| (c.keyword.clone(), c.text.clone()))
        .collect();
    out.extend(
        info.compressed_latin1_text
            .iter()
            .filter_map(|c| Some((c.keyword.clone(), c.get_text().ok()?))),
    );
    out.extend(
        info.utf8_text
            .iter()
            .filter_map(|c| Some((c.keyword.clone(), c.get_text().ok()?))),
    );
    out
}

/// The first `<x:xmpmeta …>…</x:xmpmeta>` packet in the raw bytes
/// (JPEG APP1, WebP `XMP ` chunk, uncompressed PNG).
fn xmp_packet(bytes: &[u8]) -> Option<String> {
    const OPEN: &[u8] = b"<x:xmpmeta";
    const CLOSE: &[u8] = b"</x:xmpmeta>";
    let start = find(bytes, OPEN)?;
    let end = find(&bytes[start..], CLOSE)
        .map(|i| start + i + CLOSE.len())
        .unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[start..end]).into_owned())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn xmp_parameters(xmp: &str) -> Option<String> {
    if !xmp.contains("parameters") {
        return None;
    }
    let cap = XMP_PARAMETERS.captures(xmp)?;
    let text = decode_xml_entities(&cap[1]);
    (!text.trim().is_empty()).then_some(text)
}

fn decode_xml_entities(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';').filter(|&i| i <= 10) else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "quot" => Some('"'),
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
                .and_then(|h| u32::from_str_radix(h, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Raw payloads of the EXIF fields we care about, primary IFD only.
fn exif_text_fields(bytes: &[u8]) -> Vec<(u16, Vec<u8>)> {
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    exif.fields()
        .filter(|f| f.ifd_num == exif::In::PRIMARY)
        .filter(|f| matches!(f.tag.context(), exif::Context::Tiff | exif::Context::Exif))
        .filter(|f| {
            let n = f.tag.number();
            EXIF_PARAM_TAGS.contains(&n) || n == EXIF_IMAGE_DESCRIPTION
        })
        .filter_map(|f| {
            let raw = match &f.value {
                exif::Value::Undefined(v, _) | exif::Value::Byte(v) => v.clone(),
                exif::Value::Ascii(parts) => parts.join(&b'\n'),
                _ => return None,
            };
            Some((f.tag.number(), raw))
        })
        .collect()
}

/// Decode an EXIF text payload.
///
/// `ASCII\0\0\0` → UTF-8; `UNICODE\0` → UTF-16 (BOM honoured, otherwise
/// byte order sniffed from zero bytes); bare buffers that look like
/// UTF-16LE (XPComment) → UTF-16LE; anything else → lossy UTF-8.
pub fn decode_exif_text(raw: &[u8]) -> String {
    let text = if let Some(rest) = raw.strip_prefix(b"ASCII\0\0\0") {
        String::from_utf8_lossy(rest).into_owned()
    } else if let Some(rest) = raw.strip_prefix(b"UNICODE\0") {
        decode_utf16(rest, None)
    } else if let Some(rest) = raw.strip_prefix(&[0u8; 8][..]) {
        String::from_utf8_lossy(rest).into_owned()
    } else if looks_utf16le(raw) {
        decode_utf16(raw, Some(false))
    } else {
        String::from_utf8_lossy(raw).into_owned()
    };
    text.trim_end_matches('\0').to_string()
}

fn looks_utf16le(raw: &[u8]) -> bool {
    if raw.len() < 4 || raw.len() % 2 != 0 {
        return false;
    }
    let odd_zeros = raw.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
    odd_zeros * 2 >= raw.len() / 2
}

/// `big_endian = None` → decide from the BOM, then from where the zero
/// bytes sit (ASCII-range text has one zero per code unit).
fn decode_utf16(raw: &[u8], big_endian: Option<bool>) -> String {
    let (body, be) = match raw {
        [0xFE, 0xFF, rest @ ..] => (rest, true),
        [0xFF, 0xFE, rest @ ..] => (rest, false),
        _ => {
            let be = big_endian.unwrap_or_else(|| {
                let even = raw.iter().step_by(2).filter(|b| **b == 0).count();
                let odd = raw.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
                even > odd
            });
            (raw, be)
        }
    };
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|p| {
            if be {
                u16::from_be_bytes([p[0], p[1]])
            } else {
                u16::from_le_bytes([p[0], p[1]])
            }
        })
        .collect();
    String::from_utf16_lossy(&units)
}
