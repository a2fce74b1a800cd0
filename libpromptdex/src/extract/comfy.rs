//! JSON node-execution graphs (`{"<id>": {"class_type": .., "inputs": {..}}}`).
//!
//! Nodes are visited in document order; `serde_json` is built with
//! `preserve_order` so "first sampler wins" and tie-breaks are stable.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::{ModelHeuristics, Parsed};
use crate::model::{LoraRef, SourceTool};

static BARE_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\S+\.[A-Za-z][A-Za-z0-9]{1,11}$").expect("filename regex must compile")
});

const SAMPLER_KEYS: &[&str] = &["seed", "noise_seed", "steps", "cfg"];

/// Parse a node graph. `None` when `json` is not a JSON object, so the
/// caller can fall through to the next metadata source.
pub fn parse(json: &str, heuristics: &ModelHeuristics) -> Option<Parsed> {
    let graph: Value = serde_json::from_str(json.trim()).ok()?;
    let nodes = graph.as_object()?;

    let mut out = Parsed {
        tool: SourceTool::ComfyUI,
        ..Default::default()
    };
    let mut sampler_seen = false;
    let mut candidates: Vec<(String, String)> = Vec::new();

    for (id, node) in nodes {
        let Some(inputs) = node.get("inputs").and_then(Value::as_object) else {
            continue;
        };
        let class = node
            .get("class_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();

        if class.contains("lora") {
            if let Some(name) = str_input(inputs, "lora_name") {
                let weight = num_input(inputs, "strength_model")
                    .or_else(|| num_input(inputs, "strength"))
                    .unwrap_or(1.0);
                out.loras
                    .push(LoraRef::new(heuristics.strip_extension(name), weight));
            }
        } else if class.contains("loader") && out.model_name.is_none() {
            out.model_name = str_input(inputs, "ckpt_name")
                .or_else(|| str_input(inputs, "unet_name"))
                .map(|n| heuristics.strip_extension(n));
        }

        if class.contains("sampler")
            && !sampler_seen
            && SAMPLER_KEYS.iter().any(|k| inputs.contains_key(*k))
        {
            sampler_seen = true;
            read_sampler(inputs, &mut out);
        }

        if class.contains("latent") {
            if let (Some(w), Some(h)) = (u32_input(inputs, "width"), u32_input(inputs, "height")) {
                if out.width.is_none() {
                    out.width = Some(w);
                    out.height = Some(h);
                }
            }
        }

        if let Some(text) = encode_text(inputs) {
            if is_prompt_candidate(&text) {
                candidates.push((id.clone(), text));
            }
        }
    }

    // stable: equal lengths keep document order
    candidates.sort_by(|a, b| b.1.chars().count().cmp(&a.1.chars().count()));
    let mut ranked = candidates.into_iter();
    if let Some((id, text)) = ranked.next() {
        out.prompt = text;
        out.prompt_node = Some(id);
    }
    if let Some((id, text)) = ranked.next() {
        out.negative_prompt = text;
        out.negative_node = Some(id);
    }

    if out.model_name.is_none() {
        out.model_name = guess_model(nodes, heuristics);
    }
    if let Some(model) = &out.model_name {
        out.params.insert("model".into(), model.clone());
    }

    Some(out)
}

fn read_sampler(inputs: &Map<String, Value>, out: &mut Parsed) {
    out.seed = scalar_input(inputs, "seed").or_else(|| scalar_input(inputs, "noise_seed"));
    out.steps = scalar_input(inputs, "steps").and_then(|s| s.parse::<f64>().ok().map(|f| f as i64));
    out.cfg_scale = num_input(inputs, "cfg");
    out.sampler = str_input(inputs, "sampler_name").map(str::to_string);
    out.scheduler = str_input(inputs, "scheduler").map(str::to_string);

    if let Some(seed) = &out.seed {
        out.params.insert("seed".into(), seed.clone());
    }
    for key in ["steps", "cfg", "sampler_name", "scheduler", "denoise"] {
        if let Some(v) = scalar_input(inputs, key) {
            out.params.insert(key.into(), v);
        }
    }
}

/// `text`, or the SDXL `text_g`/`text_l` pair joined by a space.
fn encode_text(inputs: &Map<String, Value>) -> Option<String> {
    if let Some(t) = str_input(inputs, "text") {
        return Some(t.trim().to_string());
    }
    let parts: Vec<&str> = ["text_g", "text_l"]
        .iter()
        .filter_map(|k| str_input(inputs, k))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn is_prompt_candidate(text: &str) -> bool {
    text.chars().count() > 2 && !BARE_FILENAME.is_match(text)
}

/// Highest-scoring model-looking file name among all string inputs.
fn guess_model(nodes: &Map<String, Value>, heuristics: &ModelHeuristics) -> Option<String> {
    let mut best: Option<(usize, &str)> = None;
    for node in nodes.values() {
        let Some(inputs) = node.get("inputs").and_then(Value::as_object) else {
            continue;
        };
        for value in inputs.values() {
            let Some(s) = value.as_str() else { continue };
            let Some(score) = heuristics.score(s) else {
                continue;
            };
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, s));
            }
        }
    }
    best.map(|(_, s)| heuristics.strip_extension(s))
}

fn str_input<'a>(inputs: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(Value::as_str)
}

fn num_input(inputs: &Map<String, Value>, key: &str) -> Option<f64> {
    match inputs.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn u32_input(inputs: &Map<String, Value>, key: &str) -> Option<u32> {
    num_input(inputs, key)
        .filter(|v| *v >= 0.0 && *v <= u32::MAX as f64)
        .map(|v| v as u32)
}

/// Scalar input rendered as text. Linked inputs (`[node, slot]`) are not values.
fn scalar_input(inputs: &Map<String, Value>, key: &str) -> Option<String> {
    match inputs.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
