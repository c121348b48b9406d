//! Rebuilds standalone DICOM Part 10 files from the fragments cloud PACS
//! viewers serve: a flat list of tag/value strings and a pixel blob per
//! instance.
//!
//! The pipeline is [`coerce`] (text to typed values), [`assemble`] (tag list
//! and pixels to an [`model::Instance`]), [`writer`] (Part 10 bytes) and
//! [`SeriesTarget`] (where each file lands on disk).

use lazy_static::lazy_static;

pub mod assembler;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod error;
pub mod inspect;
pub mod logging;
pub mod model;
pub mod pixel;
pub mod preview;
pub mod reader;
pub mod series;
pub mod tags;
pub mod uids;
pub mod util;
pub mod writer;

pub use assembler::{assemble, TagRecord};
pub use coerce::coerce;
pub use config::AssembleOptions;
pub use error::{RebuildError, RebuildResult};
pub use series::SeriesTarget;

lazy_static! {
    pub(crate) static ref TAG_MAPPING: util::TagMapping =
        util::load_and_convert_tag_mapping(include_str!("../assets/dictionary.tsv"));
}
