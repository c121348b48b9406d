//! Part 10 parsing, used to check what the writer produced and to inspect
//! existing files.
//!
//! Supports explicit and implicit VR little endian, nested sequences of
//! defined or undefined length and encapsulated pixel data. Big endian files
//! are rejected.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use encoding_rs::Encoding;
use tracing::{debug, trace};

use crate::error::{RebuildError, RebuildResult};
use crate::model::{
    CodestreamContainer, DataElement, DicomValue, Instance, PixelData, PixelEncoding, Scalar, Tag, Vr, VrFamily,
};
use crate::tags;
use crate::uids;
use crate::util;
use crate::writer::{MAGIC, PREAMBLE_LEN, UNDEFINED_LENGTH};

struct ByteReader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buffer: &'a [u8], offset: usize) -> Self {
        Self { buffer, offset }
    }

    fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, len: usize) -> RebuildResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(RebuildError::Truncated {
                offset: self.offset,
                needed: len - self.remaining(),
            });
        }

        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;

        Ok(slice)
    }

    fn u16(&mut self) -> RebuildResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> RebuildResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn tag(&mut self) -> RebuildResult<Tag> {
        let group = self.u16()?;
        let element = self.u16()?;
        Ok(Tag::new(group, element))
    }

    fn peek_tag(&self) -> Option<Tag> {
        let bytes = self.buffer.get(self.offset..self.offset + 4)?;
        Some(Tag::new(
            u16::from_le_bytes([bytes[0], bytes[1]]),
            u16::from_le_bytes([bytes[2], bytes[3]]),
        ))
    }
}

struct ReadContext {
    explicit: bool,
    encoding: &'static Encoding,
    pixel_data: Option<PixelData>,
}

pub fn read_instance(path: &Path) -> RebuildResult<Instance> {
    let bytes = fs::read(path)?;

    read_instance_bytes(&bytes)
}

pub fn read_instance_bytes(buffer: &[u8]) -> RebuildResult<Instance> {
    if buffer.len() < PREAMBLE_LEN + MAGIC.len() || &buffer[PREAMBLE_LEN..PREAMBLE_LEN + MAGIC.len()] != MAGIC {
        return Err(RebuildError::NotDicom("missing DICM prefix".to_string()));
    }

    // skip the preamble and DICM prefix
    let mut reader = ByteReader::new(buffer, PREAMBLE_LEN + MAGIC.len());
    let mut ctx = ReadContext {
        explicit: true,
        encoding: encoding_rs::UTF_8,
        pixel_data: None,
    };

    // group 2 runs until the first non-meta tag
    let mut meta = BTreeMap::new();
    while reader.peek_tag().is_some_and(|t| t.is_meta()) {
        let element = read_element(&mut reader, &mut ctx)?;
        if !element.tag.is_group_length() {
            meta.insert(element.tag, element);
        }
    }

    let transfer_syntax = meta
        .get(&tags::TRANSFER_SYNTAX_UID)
        .and_then(|e| e.value.first_str())
        .map(str::to_string)
        .unwrap_or_else(|| uids::EXPLICIT_VR_LITTLE_ENDIAN.to_string());

    match transfer_syntax.as_str() {
        uids::IMPLICIT_VR_LITTLE_ENDIAN => ctx.explicit = false,
        uids::EXPLICIT_VR_BIG_ENDIAN => {
            return Err(RebuildError::UnsupportedTransferSyntax(transfer_syntax));
        }
        _ => {}
    }

    let mut dataset = BTreeMap::new();
    while !reader.is_empty() {
        let element = read_element(&mut reader, &mut ctx)?;

        if element.tag.is_group_length() || element.tag == tags::PIXEL_DATA {
            continue;
        }

        dataset.insert(element.tag, element);
    }

    let pixel_data = ctx.pixel_data.take().unwrap_or(PixelData::Native(Vec::new()));
    let bits_stored = dataset
        .get(&tags::BITS_STORED)
        .and_then(|e: &DataElement| e.value.first_i64());
    let pixel_encoding = encoding_for(&transfer_syntax, &pixel_data, bits_stored);

    debug!(
        transfer_syntax = transfer_syntax.as_str(),
        elements = dataset.len(),
        ?pixel_encoding,
        "read instance"
    );

    Ok(Instance {
        meta,
        dataset,
        pixel_data,
        pixel_encoding,
    })
}

fn encoding_for(transfer_syntax: &str, pixel_data: &PixelData, bits_stored: Option<i64>) -> PixelEncoding {
    match transfer_syntax {
        uids::JPEG_BASELINE | uids::JPEG_EXTENDED => PixelEncoding::BaselineCompressed {
            precision: bits_stored.and_then(|b| u8::try_from(b).ok()).unwrap_or(8),
        },
        uids::JPEG_2000_LOSSLESS | uids::JPEG_2000 => {
            let boxed = pixel_data.first_frame_bytes().windows(4).take(64).any(|w| w == b"ftyp");
            PixelEncoding::RawCodestream {
                container: if boxed {
                    CodestreamContainer::Boxed
                } else {
                    CodestreamContainer::Bare
                },
            }
        }
        _ => match pixel_data {
            PixelData::Native(_) => PixelEncoding::Uncompressed,
            PixelData::Encapsulated { .. } => PixelEncoding::Encapsulated,
        },
    }
}

fn read_element(reader: &mut ByteReader<'_>, ctx: &mut ReadContext) -> RebuildResult<DataElement> {
    let start = reader.offset;
    let tag = reader.tag()?;

    // file meta is always explicit
    let (vr, length) = if ctx.explicit || tag.is_meta() {
        let code = reader.take(2)?;
        let vr = util::process_vec_to_vr(code).ok_or_else(|| {
            RebuildError::NotDicom(format!(
                "unknown VR {:?} for {} at offset {}",
                String::from_utf8_lossy(code),
                tag,
                start
            ))
        })?;

        // OB, OW, SQ, UN, UT and friends: 2 reserved bytes, then a 4-byte length
        let length = if vr.has_long_length() {
            reader.take(2)?;
            reader.u32()?
        } else {
            reader.u16()? as u32
        };

        (vr, length)
    } else {
        // implicit: no VR on the wire, take it from the dictionary
        let vr = match util::lookup_tag(tag).map(|e| e.vr) {
            Some(Vr::UsOrSs) => Vr::US,
            Some(vr) => vr,
            None => Vr::UN,
        };

        (vr, reader.u32()?)
    };

    trace!(%tag, %vr, length, offset = start, "element");

    if tag == tags::PIXEL_DATA {
        ctx.pixel_data = Some(read_pixel_data(reader, length)?);
        return Ok(DataElement::new(tag, Some(vr), DicomValue::Bytes(Vec::new())));
    }

    if vr == Vr::SQ || length == UNDEFINED_LENGTH {
        let items = read_sequence(reader, length, ctx)?;
        return Ok(DataElement::new(tag, Some(Vr::SQ), DicomValue::Sequence(items)));
    }

    let bytes = reader.take(length as usize)?;
    let value = decode_value(bytes, vr, ctx.encoding);

    if tag == tags::SPECIFIC_CHARACTER_SET {
        ctx.encoding = util::text_encoding(value.first_str());
    }

    Ok(DataElement::new(tag, Some(vr), value))
}

fn read_sequence(
    reader: &mut ByteReader<'_>,
    length: u32,
    ctx: &mut ReadContext,
) -> RebuildResult<Vec<Vec<DataElement>>> {
    // undefined length ends at the sequence delimiter instead of a byte count
    let end = (length != UNDEFINED_LENGTH).then(|| reader.offset + length as usize);
    let mut items = Vec::new();

    loop {
        match end {
            Some(end) if reader.offset >= end => break,
            None if reader.is_empty() => break,
            _ => {}
        }

        let tag = reader.tag()?;
        let item_length = reader.u32()?;

        match tag {
            tags::SEQUENCE_DELIMITATION_ITEM => break,
            tags::ITEM => {}
            other => {
                return Err(RebuildError::NotDicom(format!(
                    "expected a sequence item, found {} at offset {}",
                    other,
                    reader.offset - 8
                )))
            }
        }

        let item_end = (item_length != UNDEFINED_LENGTH).then(|| reader.offset + item_length as usize);
        let mut elements = Vec::new();

        loop {
            match item_end {
                Some(item_end) if reader.offset >= item_end => break,
                // item delimiter: tag plus a zero length
                None if reader.peek_tag() == Some(tags::ITEM_DELIMITATION_ITEM) => {
                    reader.take(8)?;
                    break;
                }
                None if reader.is_empty() => break,
                _ => {}
            }

            elements.push(read_element(reader, ctx)?);
        }

        items.push(elements);
    }

    Ok(items)
}

fn read_pixel_data(reader: &mut ByteReader<'_>, length: u32) -> RebuildResult<PixelData> {
    if length != UNDEFINED_LENGTH {
        return Ok(PixelData::Native(reader.take(length as usize)?.to_vec()));
    }

    let mut items = Vec::new();

    loop {
        let tag = reader.tag()?;
        let item_length = reader.u32()?;

        match tag {
            tags::SEQUENCE_DELIMITATION_ITEM => break,
            tags::ITEM => items.push(reader.take(item_length as usize)?.to_vec()),
            other => {
                return Err(RebuildError::NotDicom(format!(
                    "expected a pixel data item, found {}",
                    other
                )))
            }
        }
    }

    // the first item is always the basic offset table, possibly empty
    let mut items = items.into_iter();
    let offset_table = items.next().unwrap_or_default();

    Ok(PixelData::Encapsulated {
        offset_table,
        fragments: items.collect(),
    })
}

fn decode_numbers<const N: usize, F>(bytes: &[u8], convert: F) -> Option<Vec<Scalar>>
where
    F: Fn([u8; N]) -> Scalar,
{
    if bytes.len() % N != 0 {
        return None;
    }

    bytes
        .chunks_exact(N)
        .map(|chunk| chunk.try_into().ok().map(&convert))
        .collect()
}

fn decode_value(bytes: &[u8], vr: Vr, encoding: &'static Encoding) -> DicomValue {
    let scalars = match vr {
        Vr::US | Vr::UsOrSs => decode_numbers(bytes, |b: [u8; 2]| Scalar::Int(u16::from_le_bytes(b) as i64)),
        Vr::SS => decode_numbers(bytes, |b: [u8; 2]| Scalar::Int(i16::from_le_bytes(b) as i64)),
        Vr::UL => decode_numbers(bytes, |b: [u8; 4]| Scalar::Int(u32::from_le_bytes(b) as i64)),
        Vr::SL => decode_numbers(bytes, |b: [u8; 4]| Scalar::Int(i32::from_le_bytes(b) as i64)),
        Vr::UV => decode_numbers(bytes, |b: [u8; 8]| Scalar::Int(u64::from_le_bytes(b) as i64)),
        Vr::SV => decode_numbers(bytes, |b: [u8; 8]| Scalar::Int(i64::from_le_bytes(b))),
        Vr::FL => decode_numbers(bytes, |b: [u8; 4]| Scalar::Float(f32::from_le_bytes(b) as f64)),
        Vr::FD => decode_numbers(bytes, |b: [u8; 8]| Scalar::Float(f64::from_le_bytes(b))),
        Vr::AT => decode_numbers(bytes, |b: [u8; 4]| {
            Scalar::Tag(Tag::new(u16::from_le_bytes([b[0], b[1]]), u16::from_le_bytes([b[2], b[3]])))
        }),
        _ if vr.family() == VrFamily::Text => {
            let text = if vr.is_charset_dependent() {
                util::decode_text(bytes, encoding)
            } else {
                String::from_utf8_lossy(bytes).into_owned()
            };
            // values are padded to even length with NUL or space
            let text = text.trim_end_matches(['\0', ' ']);

            let mut parts = text.split('\\').map(|s| Scalar::Text(s.to_string())).collect::<Vec<_>>();
            return if parts.len() == 1 {
                DicomValue::Single(parts.remove(0))
            } else {
                DicomValue::Multi(parts)
            };
        }
        _ => None,
    };

    match scalars {
        Some(mut scalars) if scalars.len() == 1 => DicomValue::Single(scalars.remove(0)),
        Some(scalars) => DicomValue::Multi(scalars),
        None => DicomValue::Bytes(bytes.to_vec()),
    }
}
