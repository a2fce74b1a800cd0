//! Inline `key: value` parameter blocks (WebUI style).
//!
//! ```text
//! positive prompt, may span lines <lora:foo:0.7>
//! Negative prompt: blurry, lowres
//! Steps: 20, Sampler: Euler a, CFG scale: 7, Seed: 1234, Size: 512x768
//! ```

use std::sync::LazyLock;

use regex::Regex;

use super::Parsed;
use crate::model::{LoraRef, SourceTool};

const NEGATIVE_MARKER: &str = "Negative prompt:";

static LORA_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<lora:([^:>]+):([^>]+)>").expect("lora token regex must compile")
});

/// `key:` at the start of a parameter piece; keys may contain spaces ("CFG scale").
static KEY_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\w[\w \-/]*:").expect("key prefix regex must compile"));

/// Parse a parameter text block. Never fails; text without a parameter line
/// becomes the prompt and the tool stays `Unknown`.
pub fn parse(text: &str) -> Parsed {
    let mut out = Parsed {
        loras: inline_loras(text),
        ..Default::default()
    };

    let lines: Vec<&str> = text
        .trim()
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .collect();

    let param_idx = lines
        .iter()
        .rposition(|l| l.contains("Steps:") && l.contains("Sampler:"));

    let content = match param_idx {
        Some(idx) => {
            out.tool = SourceTool::A1111;
            for (k, v) in split_params(lines[idx]) {
                out.params.insert(k, v);
            }
            lines[..idx].join("\n")
        }
        None => text.to_string(),
    };

    match content.split_once(NEGATIVE_MARKER) {
        Some((pos, neg)) => {
            out.prompt = pos.trim().to_string();
            out.negative_prompt = neg.trim().to_string();
        }
        None => out.prompt = content.trim().to_string(),
    }

    if let Some(hashes) = out.params.get("Lora hashes").cloned() {
        for entry in hashes.split(',') {
            let Some((name, _)) = entry.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() || out.loras.iter().any(|l| l.name == name) {
                continue;
            }
            out.loras.push(LoraRef::new(name, 1.0));
        }
    }

    map_typed_fields(&mut out);
    out
}

fn inline_loras(text: &str) -> Vec<LoraRef> {
    LORA_TOKEN
        .captures_iter(text)
        .map(|cap| {
            let name = cap[1].trim();
            // `<lora:name:0.8:lbw=...>` carries extra fields after the weight
            let weight = cap[2]
                .split(':')
                .next()
                .and_then(|w| w.trim().parse::<f64>().ok())
                .unwrap_or(1.0);
            LoraRef::new(name, weight)
        })
        .collect()
}

/// Split a parameter line into ordered `(key, value)` pairs.
///
/// A comma separates two pairs only when it sits outside double quotes and
/// the text after it starts with a `key:` prefix, so commas inside values
/// survive.
pub fn split_params(line: &str) -> Vec<(String, String)> {
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut in_quotes = false;
    let mut prev = '\0';

    for (i, c) in line.char_indices() {
        match c {
            '"' if prev != '\\' => in_quotes = !in_quotes,
            ',' if !in_quotes && KEY_PREFIX.is_match(&line[i + 1..]) => {
                pieces.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        prev = c;
    }
    pieces.push(&line[start..]);

    pieces
        .into_iter()
        .filter_map(|piece| {
            let (k, v) = piece.split_once(':')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), unquote(v.trim())))
        })
        .collect()
}

fn unquote(v: &str) -> String {
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        v[1..v.len() - 1].replace("\\\"", "\"")
    } else {
        v.to_string()
    }
}

fn map_typed_fields(out: &mut Parsed) {
    let p = &out.params;
    let text = |k: &str| p.get(k).map(|v| v.to_string()).filter(|v| !v.is_empty());

    out.seed = text("Seed");
    out.steps = p.get("Steps").and_then(|v| v.parse().ok());
    out.sampler = text("Sampler");
    out.scheduler = text("Schedule type").or_else(|| text("Scheduler"));
    out.cfg_scale = p.get("CFG scale").and_then(|v| v.parse().ok());
    out.model_name = text("Model");
    out.model_hash = text("Model hash");

    if let Some((w, h)) = p.get("Size").and_then(|s| s.split_once('x')) {
        if let (Ok(w), Ok(h)) = (w.trim().parse::<u32>(), h.trim().parse::<u32>()) {
            out.width = Some(w);
            out.height = Some(h);
        }
    }
}
