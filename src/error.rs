use std::path::PathBuf;
use thiserror::Error;

use crate::model::{Tag, Vr};

/// The main error type for rebuild operations.
#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported VR: {0}")]
    UnsupportedVr(Vr),

    #[error("Cannot read '{raw}' as {vr}: {reason}")]
    InvalidValue {
        vr: Vr,
        raw: String,
        reason: String,
    },

    #[error("Invalid tag: '{0}'")]
    InvalidTag(String),

    #[error("Failed to create directory {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Value of {tag} is too long for {vr} ({len} bytes)")]
    ValueTooLong { tag: Tag, vr: Vr, len: usize },

    #[error("Not a DICOM file: {0}")]
    NotDicom(String),

    #[error("Truncated data at offset {offset}: {needed} more byte(s) expected")]
    Truncated { offset: usize, needed: usize },

    #[error("Unsupported transfer syntax: {0}")]
    UnsupportedTransferSyntax(String),

    #[error("Failed to parse tag list from {path}: {source}")]
    TagListParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read options from {path}: {source}")]
    OptionsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Preview not supported: {0}")]
    PreviewUnsupported(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to initialise logging: {0}")]
    Logging(String),

    #[error("Validation failed: {failed} of {total} file(s) could not be read")]
    ValidationFailed { failed: usize, total: usize },

    #[error("No DICOM files found under {0}")]
    NothingToValidate(PathBuf),
}

pub type RebuildResult<T> = std::result::Result<T, RebuildError>;

impl RebuildError {
    /// Process exit status for the command line: 2 when validation found
    /// unreadable files, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            RebuildError::ValidationFailed { .. } => 2,
            _ => 1,
        }
    }
}
