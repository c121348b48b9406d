//! Part 10 serialization: preamble, `DICM`, file meta group and data set, all
//! in explicit VR little endian.

use std::io::Write;
use std::path::Path;

use encoding_rs::Encoding;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{RebuildError, RebuildResult};
use crate::model::{DataElement, DicomValue, Instance, PixelData, Scalar, Tag, Vr, VrFamily};
use crate::tags;
use crate::util;

pub const PREAMBLE_LEN: usize = 128;
pub const MAGIC: &[u8; 4] = b"DICM";
pub const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;

struct WriteContext {
    encoding: &'static Encoding,
    signed_pixels: bool,
}

fn write_tag(out: &mut Vec<u8>, tag: Tag) {
    out.extend_from_slice(&tag.group.to_le_bytes());
    out.extend_from_slice(&tag.element.to_le_bytes());
}

fn write_header(out: &mut Vec<u8>, tag: Tag, vr: Vr, len: usize) -> RebuildResult<()> {
    write_tag(out, tag);
    out.extend_from_slice(vr.code().as_bytes());

    if vr.has_long_length() {
        let len = u32::try_from(len).map_err(|_| RebuildError::ValueTooLong { tag, vr, len })?;
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&len.to_le_bytes());
    } else {
        let len = u16::try_from(len).map_err(|_| RebuildError::ValueTooLong { tag, vr, len })?;
        out.extend_from_slice(&len.to_le_bytes());
    }

    Ok(())
}

fn text_bytes(value: &DicomValue, vr: Vr, ctx: &WriteContext) -> Vec<u8> {
    let text = value
        .scalars()
        .iter()
        .map(Scalar::to_string)
        .collect::<Vec<_>>()
        .join("\\");

    let bytes = if vr.is_charset_dependent() {
        util::encode_text(&text, ctx.encoding)
    } else {
        text.into_bytes()
    };

    util::pad_to_even(bytes, vr.padding())
}

fn resolve_vr(element: &DataElement, ctx: &WriteContext) -> Vr {
    match element.vr {
        Some(Vr::UsOrSs) => {
            let negative = element
                .value
                .scalars()
                .iter()
                .any(|s| s.as_i64().is_some_and(|v| v < 0));

            if ctx.signed_pixels || negative {
                Vr::SS
            } else {
                Vr::US
            }
        }
        Some(vr) => vr,
        None => {
            let len: usize = element.value.scalars().iter().map(|s| s.to_string().len() + 1).sum();
            if len > u16::MAX as usize {
                Vr::UT
            } else {
                Vr::LO
            }
        }
    }
}

fn integer_bytes(tag: Tag, vr: Vr, value: &DicomValue) -> RebuildResult<Vec<u8>> {
    let mut out = Vec::with_capacity(value.scalars().len() * vr.number_width());

    for scalar in value.scalars() {
        let raw = scalar.to_string();
        let invalid = |reason: &str| RebuildError::InvalidValue {
            vr,
            raw: raw.clone(),
            reason: format!("{} in {}", reason, tag),
        };
        let v = scalar.as_i64().ok_or_else(|| invalid("not an integer"))?;

        match vr {
            Vr::US => out.extend_from_slice(&u16::try_from(v).map_err(|_| invalid("out of range"))?.to_le_bytes()),
            Vr::SS => out.extend_from_slice(&i16::try_from(v).map_err(|_| invalid("out of range"))?.to_le_bytes()),
            Vr::UL => out.extend_from_slice(&u32::try_from(v).map_err(|_| invalid("out of range"))?.to_le_bytes()),
            Vr::SL => out.extend_from_slice(&i32::try_from(v).map_err(|_| invalid("out of range"))?.to_le_bytes()),
            Vr::UV => out.extend_from_slice(&u64::try_from(v).map_err(|_| invalid("out of range"))?.to_le_bytes()),
            _ => out.extend_from_slice(&v.to_le_bytes()),
        }
    }

    Ok(out)
}

fn float_bytes(tag: Tag, vr: Vr, value: &DicomValue) -> RebuildResult<Vec<u8>> {
    let mut out = Vec::with_capacity(value.scalars().len() * vr.number_width());

    for scalar in value.scalars() {
        let v = scalar.as_f64().ok_or_else(|| RebuildError::InvalidValue {
            vr,
            raw: scalar.to_string(),
            reason: format!("not a number in {}", tag),
        })?;

        if vr == Vr::FL {
            out.extend_from_slice(&(v as f32).to_le_bytes());
        } else {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    Ok(out)
}

fn tag_bytes(tag: Tag, value: &DicomValue) -> RebuildResult<Vec<u8>> {
    let mut out = Vec::new();

    for scalar in value.scalars() {
        match scalar {
            Scalar::Tag(t) => write_tag(&mut out, *t),
            other => {
                return Err(RebuildError::InvalidValue {
                    vr: Vr::AT,
                    raw: other.to_string(),
                    reason: format!("not a tag in {}", tag),
                })
            }
        }
    }

    Ok(out)
}

fn write_sequence(out: &mut Vec<u8>, tag: Tag, items: &[Vec<DataElement>], ctx: &WriteContext) -> RebuildResult<()> {
    let mut body = Vec::new();

    for item in items {
        let mut item_body = Vec::new();
        for element in item {
            write_element(&mut item_body, element, ctx)?;
        }

        write_tag(&mut body, tags::ITEM);
        let len = u32::try_from(item_body.len()).map_err(|_| RebuildError::ValueTooLong {
            tag,
            vr: Vr::SQ,
            len: item_body.len(),
        })?;
        body.extend_from_slice(&len.to_le_bytes());
        body.extend_from_slice(&item_body);
    }

    write_header(out, tag, Vr::SQ, body.len())?;
    out.extend_from_slice(&body);

    Ok(())
}

fn write_element(out: &mut Vec<u8>, element: &DataElement, ctx: &WriteContext) -> RebuildResult<()> {
    let tag = element.tag;

    if let DicomValue::Sequence(items) = &element.value {
        return write_sequence(out, tag, items, ctx);
    }

    let vr = resolve_vr(element, ctx);

    let value = match (&element.value, vr.family()) {
        (DicomValue::Bytes(bytes), _) => util::pad_to_even(bytes.clone(), 0x00),
        (value, VrFamily::Text) => text_bytes(value, vr, ctx),
        (value, VrFamily::Integer) => integer_bytes(tag, vr, value)?,
        (value, VrFamily::Float) => float_bytes(tag, vr, value)?,
        (value, VrFamily::Tag) => tag_bytes(tag, value)?,
        (_, VrFamily::Binary) => return Err(RebuildError::UnsupportedVr(vr)),
    };

    write_header(out, tag, vr, value.len())?;
    out.extend_from_slice(&value);

    Ok(())
}

fn write_pixel_data(out: &mut Vec<u8>, pixel_data: &PixelData, bits_allocated: i64) -> RebuildResult<()> {
    match pixel_data {
        PixelData::Native(bytes) => {
            let vr = if bits_allocated > 8 { Vr::OW } else { Vr::OB };
            let bytes = util::pad_to_even(bytes.clone(), 0x00);

            write_header(out, tags::PIXEL_DATA, vr, bytes.len())?;
            out.extend_from_slice(&bytes);
        }
        PixelData::Encapsulated {
            offset_table,
            fragments,
        } => {
            write_tag(out, tags::PIXEL_DATA);
            out.extend_from_slice(Vr::OB.code().as_bytes());
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());

            for item in std::iter::once(offset_table).chain(fragments.iter()) {
                let item = util::pad_to_even(item.clone(), 0x00);
                let len = u32::try_from(item.len()).map_err(|_| RebuildError::ValueTooLong {
                    tag: tags::PIXEL_DATA,
                    vr: Vr::OB,
                    len: item.len(),
                })?;

                write_tag(out, tags::ITEM);
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(&item);
            }

            write_tag(out, tags::SEQUENCE_DELIMITATION_ITEM);
            out.extend_from_slice(&0u32.to_le_bytes());
        }
    }

    Ok(())
}

/// Serialize an instance to a complete Part 10 byte stream.
pub fn write_instance(instance: &Instance) -> RebuildResult<Vec<u8>> {
    let ctx = WriteContext {
        encoding: util::text_encoding(instance.str_attr(tags::SPECIFIC_CHARACTER_SET)),
        signed_pixels: instance.int_attr(tags::PIXEL_REPRESENTATION) == Some(1),
    };

    let mut meta = Vec::new();

    if !instance.meta.contains_key(&tags::FILE_META_INFORMATION_VERSION) {
        write_header(&mut meta, tags::FILE_META_INFORMATION_VERSION, Vr::OB, 2)?;
        meta.extend_from_slice(&[0x00, 0x01]);
    }

    for element in instance.meta.values().filter(|e| !e.tag.is_group_length()) {
        write_element(&mut meta, element, &ctx)?;
    }

    let mut out = vec![0u8; PREAMBLE_LEN];
    out.extend_from_slice(MAGIC);

    write_header(&mut out, tags::FILE_META_INFORMATION_GROUP_LENGTH, Vr::UL, 4)?;
    out.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    out.extend_from_slice(&meta);

    let bits_allocated = instance.int_attr(tags::BITS_ALLOCATED).unwrap_or(8);
    let mut pixels_written = false;

    for element in instance.dataset.values() {
        if element.tag.is_meta() || element.tag.is_group_length() || element.tag == tags::PIXEL_DATA {
            continue;
        }

        if !pixels_written && element.tag > tags::PIXEL_DATA {
            write_pixel_data(&mut out, &instance.pixel_data, bits_allocated)?;
            pixels_written = true;
        }

        write_element(&mut out, element, &ctx)?;
    }

    if !pixels_written {
        write_pixel_data(&mut out, &instance.pixel_data, bits_allocated)?;
    }

    Ok(out)
}

/// Serialize `instance` and move it into place at `path` in one rename, so a
/// reader never sees a partially written file.
pub fn save_instance(instance: &Instance, path: &Path) -> RebuildResult<()> {
    let bytes = write_instance(instance)?;

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(&bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| RebuildError::Io(e.error))?;

    debug!(path = %path.display(), len = bytes.len(), "wrote instance");

    Ok(())
}
