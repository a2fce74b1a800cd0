//! Plain data records shared by the extractor, the index and callers.
//!
//! Everything here is `Serialize` and carries primitive fields only, so a
//! record can cross a process or API boundary unchanged.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::{file_name_of, folder_of, normalize_path};

/// Which embedding convention a record was recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SourceTool {
    /// Inline `key: value` text block (WebUI style).
    A1111,
    /// JSON node-execution graph.
    ComfyUI,
    #[default]
    Unknown,
}

impl SourceTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A1111 => "A1111",
            Self::ComfyUI => "ComfyUI",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SourceTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTool {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "A1111" => Self::A1111,
            "ComfyUI" => Self::ComfyUI,
            _ => Self::Unknown,
        })
    }
}

/// A LoRA referenced by an image, with its strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraRef {
    pub name: String,
    pub weight: f64,
}

impl LoraRef {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// One indexed image. The normalized `path` is the sole identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: String,
    pub file_name: String,
    pub folder: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub seed: Option<String>,
    pub steps: Option<i64>,
    pub sampler: Option<String>,
    pub scheduler: Option<String>,
    pub cfg_scale: Option<f64>,
    pub model_name: Option<String>,
    pub model_hash: Option<String>,
    pub tool: SourceTool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_size: u64,
    /// Raw embedded metadata, kept for audit/debug.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub raw: Vec<u8>,
    pub mtime: i64,
    pub loras: Vec<LoraRef>,
    pub params: BTreeMap<String, String>,
    /// Node graph id the prompt was taken from (FormatB only).
    pub prompt_node: Option<String>,
    /// Node graph id the negative prompt was taken from (FormatB only).
    pub negative_node: Option<String>,
}

impl ImageRecord {
    /// An empty record keyed by `path`; derived name/folder are filled in.
    pub fn for_path(path: &str) -> Self {
        let path = normalize_path(path);
        Self {
            file_name: file_name_of(&path),
            folder: folder_of(&path),
            path,
            ..Default::default()
        }
    }

    /// `true` when no generation metadata was recovered.
    pub fn is_bare(&self) -> bool {
        self.prompt.is_empty()
            && self.negative_prompt.is_empty()
            && self.params.is_empty()
            && self.loras.is_empty()
    }

    /// `WxH` when both dimensions are known.
    pub fn resolution(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{w}x{h}")),
            _ => None,
        }
    }
}

/// Lightweight row used when materializing a result page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub path: String,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub mtime: i64,
}

/// One facet value and the number of images carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub value: String,
    pub count: i64,
}
