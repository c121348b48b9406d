use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RebuildError, RebuildResult};

pub const DEFAULT_IMPLEMENTATION_CLASS_UID: &str = "2.25.302436519843711958362017614826392745171";
pub const DEFAULT_IMPLEMENTATION_VERSION_NAME: &str = concat!("REBUILD_", env!("CARGO_PKG_VERSION"));

/// Knobs for instance assembly. Every field has a default, so a partial JSON
/// file is enough to override a single value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssembleOptions {
    /// Rows assumed when the tag list has none.
    pub default_rows: u16,
    pub default_columns: u16,
    pub default_bits_allocated: u16,

    /// Display window written for JPEG payloads.
    pub default_window_center: f64,
    pub default_window_width: f64,

    /// Unwrap JP2 containers to their `jp2c` codestream.
    pub extract_codestream: bool,

    /// Log and drop tags that fail to parse instead of failing the instance.
    pub skip_invalid_tags: bool,

    /// Derive a missing SOP Class UID from Modality.
    pub infer_sop_class: bool,

    pub implementation_class_uid: String,
    pub implementation_version_name: String,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            default_rows: 512,
            default_columns: 512,
            default_bits_allocated: 16,
            default_window_center: 128.0,
            default_window_width: 256.0,
            extract_codestream: false,
            skip_invalid_tags: false,
            infer_sop_class: false,
            implementation_class_uid: DEFAULT_IMPLEMENTATION_CLASS_UID.to_string(),
            implementation_version_name: DEFAULT_IMPLEMENTATION_VERSION_NAME.to_string(),
        }
    }
}

impl AssembleOptions {
    pub fn from_json_file(path: &Path) -> RebuildResult<Self> {
        let text = fs::read_to_string(path)?;

        serde_json::from_str(&text).map_err(|source| RebuildError::OptionsParse {
            path: path.to_path_buf(),
            source,
        })
    }
}
