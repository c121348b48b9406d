//! Turns a viewer's flat tag list and pixel blob into an [`Instance`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::coerce::coerce;
use crate::config::AssembleOptions;
use crate::error::{RebuildError, RebuildResult};
use crate::model::{DataElement, DicomValue, Instance, PixelEncoding, Scalar, Tag, Vr};
use crate::pixel::{self, CodestreamInfo, FrameInfo, PixelGeometry};
use crate::tags;
use crate::uids;
use crate::util;

pub const UTF8_CHARACTER_SET: &str = "ISO_IR 192";

/// One `{ "tag": "GGGG,EEEE", "value": "..." }` record as served by a viewer.
/// Other fields (`name`, `vr`, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub tag: String,
    #[serde(default, deserialize_with = "value_as_text")]
    pub value: String,
}

impl TagRecord {
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }
}

// Some viewers send numbers, nulls or arrays where a string is expected.
fn value_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    fn flatten(value: serde_json::Value) -> String {
        match value {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s,
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(flatten)
                .collect::<Vec<_>>()
                .join("\\"),
            other => other.to_string(),
        }
    }

    Ok(flatten(serde_json::Value::deserialize(deserializer)?))
}

pub fn read_tag_list(path: &Path) -> RebuildResult<Vec<TagRecord>> {
    let text = fs::read_to_string(path)?;

    serde_json::from_str(&text).map_err(|source| RebuildError::TagListParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Build an element with the dictionary VR of `tag`.
fn element(tag: Tag, value: DicomValue) -> DataElement {
    DataElement::new(tag, util::lookup_tag(tag).map(|e| e.vr), value)
}

fn build_element(record: &TagRecord) -> RebuildResult<Option<DataElement>> {
    let tag = util::parse_tag(&record.tag)?;

    if tag.is_group_length() || tag == tags::FILE_META_INFORMATION_VERSION || tag == tags::PIXEL_DATA {
        debug!(%tag, "ignoring element regenerated on write");
        return Ok(None);
    }

    match util::lookup_tag(tag) {
        Some(entry) => {
            let value = coerce(&record.value, entry.vr)?;
            Ok(Some(DataElement::new(tag, Some(entry.vr), value)))
        }
        None if tag.is_meta() => {
            warn!(%tag, "dropping unknown file meta element");
            Ok(None)
        }
        None => {
            let values = record
                .value
                .split('\\')
                .map(|s| Scalar::Text(s.to_string()))
                .collect();
            Ok(Some(DataElement::new(tag, None, DicomValue::Multi(values))))
        }
    }
}

fn non_empty_uid(dataset: &BTreeMap<Tag, DataElement>, tag: Tag) -> Option<String> {
    dataset
        .get(&tag)
        .and_then(|e| e.value.first_str())
        .map(str::trim)
        .filter(|uid| !uid.is_empty())
        .map(str::to_string)
}

fn ensure_identifiers(
    meta: &mut BTreeMap<Tag, DataElement>,
    dataset: &mut BTreeMap<Tag, DataElement>,
    options: &AssembleOptions,
) {
    let sop_class = non_empty_uid(dataset, tags::SOP_CLASS_UID).unwrap_or_else(|| {
        let inferred = options
            .infer_sop_class
            .then(|| {
                dataset
                    .get(&tags::MODALITY)
                    .and_then(|e| e.value.first_str())
                    .and_then(uids::storage_class_for_modality)
            })
            .flatten();

        match inferred {
            Some(uid) => {
                debug!(uid, "SOP Class UID inferred from modality");
                uid.to_string()
            }
            None => util::generate_uid(),
        }
    });

    let sop_instance = non_empty_uid(dataset, tags::SOP_INSTANCE_UID).unwrap_or_else(|| {
        let uid = util::generate_uid();
        debug!(uid = uid.as_str(), "generated SOP Instance UID");
        uid
    });

    for (dataset_tag, meta_tag, uid) in [
        (tags::SOP_CLASS_UID, tags::MEDIA_STORAGE_SOP_CLASS_UID, sop_class),
        (tags::SOP_INSTANCE_UID, tags::MEDIA_STORAGE_SOP_INSTANCE_UID, sop_instance),
    ] {
        dataset.insert(dataset_tag, element(dataset_tag, DicomValue::text(uid.clone())));
        meta.insert(meta_tag, element(meta_tag, DicomValue::text(uid)));
    }
}

fn has_non_ascii_text(dataset: &BTreeMap<Tag, DataElement>) -> bool {
    dataset.values().any(|e| {
        e.value
            .scalars()
            .iter()
            .any(|s| matches!(s, Scalar::Text(t) if !t.is_ascii()))
    })
}

fn is_missing(dataset: &BTreeMap<Tag, DataElement>, tag: Tag) -> bool {
    dataset
        .get(&tag)
        .and_then(|e| e.value.first_i64())
        .map_or(true, |v| v <= 0)
}

fn set_int(dataset: &mut BTreeMap<Tag, DataElement>, tag: Tag, value: i64) {
    dataset.insert(tag, element(tag, DicomValue::int(value)));
}

fn set_text(dataset: &mut BTreeMap<Tag, DataElement>, tag: Tag, value: &str) {
    dataset.insert(tag, element(tag, DicomValue::text(value)));
}

/// The frame header is authoritative for a JPEG payload.
fn apply_jpeg_frame(dataset: &mut BTreeMap<Tag, DataElement>, frame: &FrameInfo, options: &AssembleOptions) {
    let bits_allocated = if frame.precision > 8 { 16 } else { 8 };

    set_int(dataset, tags::ROWS, frame.height as i64);
    set_int(dataset, tags::COLUMNS, frame.width as i64);
    set_int(dataset, tags::SAMPLES_PER_PIXEL, frame.channels as i64);
    set_int(dataset, tags::BITS_ALLOCATED, bits_allocated);
    set_int(dataset, tags::BITS_STORED, frame.precision as i64);
    set_int(dataset, tags::HIGH_BIT, frame.precision.saturating_sub(1) as i64);
    set_int(dataset, tags::PIXEL_REPRESENTATION, 0);

    if frame.channels == 3 {
        set_text(dataset, tags::PHOTOMETRIC_INTERPRETATION, "YBR_FULL_422");
        set_int(dataset, tags::PLANAR_CONFIGURATION, 0);
    } else {
        set_text(dataset, tags::PHOTOMETRIC_INTERPRETATION, "MONOCHROME2");
        dataset.remove(&tags::PLANAR_CONFIGURATION);
    }

    for tag in [
        tags::RESCALE_INTERCEPT,
        tags::RESCALE_SLOPE,
        tags::RESCALE_TYPE,
        tags::WINDOW_CENTER,
        tags::WINDOW_WIDTH,
        tags::WINDOW_CENTER_WIDTH_EXPLANATION,
    ] {
        dataset.remove(&tag);
    }

    set_text(dataset, tags::WINDOW_CENTER, &options.default_window_center.to_string());
    set_text(dataset, tags::WINDOW_WIDTH, &options.default_window_width.to_string());
}

fn fill_codestream_geometry(
    dataset: &mut BTreeMap<Tag, DataElement>,
    info: Option<&CodestreamInfo>,
    options: &AssembleOptions,
) {
    let (rows, columns, bits_allocated) = match info {
        Some(info) => (
            info.height as i64,
            info.width as i64,
            if info.precision > 8 { 16 } else { 8 },
        ),
        None => (
            options.default_rows as i64,
            options.default_columns as i64,
            options.default_bits_allocated as i64,
        ),
    };

    for (tag, value) in [
        (tags::ROWS, rows),
        (tags::COLUMNS, columns),
        (tags::BITS_ALLOCATED, bits_allocated),
    ] {
        if is_missing(dataset, tag) {
            set_int(dataset, tag, value);
        }
    }

    if let Some(info) = info {
        if is_missing(dataset, tags::SAMPLES_PER_PIXEL) {
            set_int(dataset, tags::SAMPLES_PER_PIXEL, info.components as i64);
        }
    }
}

/// Assemble one instance.
///
/// Fails only when a tag cannot be parsed or coerced (unless
/// `skip_invalid_tags` is set); pixel classification never fails.
pub fn assemble(records: &[TagRecord], pixel_bytes: Vec<u8>, options: &AssembleOptions) -> RebuildResult<Instance> {
    let mut meta = BTreeMap::new();
    let mut dataset = BTreeMap::new();

    for record in records {
        let built = match build_element(record) {
            Ok(built) => built,
            Err(error) if options.skip_invalid_tags => {
                warn!(tag = record.tag.as_str(), %error, "skipping invalid tag");
                None
            }
            Err(error) => return Err(error),
        };

        if let Some(element) = built {
            if element.tag.is_meta() {
                meta.insert(element.tag, element);
            } else {
                dataset.insert(element.tag, element);
            }
        }
    }

    ensure_identifiers(&mut meta, &mut dataset, options);

    if !dataset.contains_key(&tags::SPECIFIC_CHARACTER_SET) && has_non_ascii_text(&dataset) {
        debug!("non-ASCII text without a character set, declaring {}", UTF8_CHARACTER_SET);
        set_text(&mut dataset, tags::SPECIFIC_CHARACTER_SET, UTF8_CHARACTER_SET);
    }

    let geometry = PixelGeometry::from_dataset(&dataset, options);
    let classification = pixel::classify(pixel_bytes, &geometry, options.extract_codestream);

    if let Some(frame) = &classification.frame {
        apply_jpeg_frame(&mut dataset, frame, options);
    }

    if classification.eight_bit_plane {
        set_int(&mut dataset, tags::BITS_ALLOCATED, 8);
        set_int(&mut dataset, tags::BITS_STORED, 8);
        set_int(&mut dataset, tags::HIGH_BIT, 7);
    }

    if matches!(classification.encoding, PixelEncoding::RawCodestream { .. }) {
        fill_codestream_geometry(&mut dataset, classification.codestream.as_ref(), options);
    }

    let pixel_encoding = classification.encoding;
    debug!(
        ?pixel_encoding,
        from_archive = classification.from_archive,
        len = classification.payload.len(),
        "classified pixel data"
    );

    meta.insert(
        tags::FILE_META_INFORMATION_VERSION,
        DataElement::new(
            tags::FILE_META_INFORMATION_VERSION,
            Some(Vr::OB),
            DicomValue::Bytes(vec![0x00, 0x01]),
        ),
    );
    meta.insert(
        tags::TRANSFER_SYNTAX_UID,
        element(tags::TRANSFER_SYNTAX_UID, DicomValue::text(pixel_encoding.transfer_syntax())),
    );
    meta.insert(
        tags::IMPLEMENTATION_CLASS_UID,
        element(
            tags::IMPLEMENTATION_CLASS_UID,
            DicomValue::text(options.implementation_class_uid.as_str()),
        ),
    );
    meta.insert(
        tags::IMPLEMENTATION_VERSION_NAME,
        element(
            tags::IMPLEMENTATION_VERSION_NAME,
            DicomValue::text(options.implementation_version_name.as_str()),
        ),
    );

    Ok(Instance {
        meta,
        dataset,
        pixel_data: classification.into_pixel_data(),
        pixel_encoding,
    })
}
