//! Pixel payload classification.
//!
//! Viewers return pixels in whatever form their image service produces: raw
//! native samples, a baseline JPEG, a bare JPEG 2000 codestream, a JP2 file or
//! a ZIP archive holding one of those. The payload is matched against the
//! known signatures in a fixed order; the native-size test only applies when no
//! signature matched.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use tracing::{debug, warn};

use crate::config::AssembleOptions;
use crate::model::{CodestreamContainer, DataElement, PixelData, PixelEncoding, Tag};
use crate::tags;
use crate::util;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const J2K_SOC_SIZ: [u8; 4] = [0xFF, 0x4F, 0xFF, 0x51];
const ZIP_LOCAL_HEADER: [u8; 4] = [b'P', b'K', 0x03, 0x04];
const FTYP_SEARCH_WINDOW: usize = 64;
/// Largest archive entry inflated as a pixel payload.
pub const MAX_ARCHIVE_ENTRY_LEN: u64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    Jpeg,
    Archive,
    BoxedCodestream,
    BareCodestream,
}

/// Match the leading bytes against the known signatures.
///
/// The archive magic is tested before the `ftyp` window search, since a stored
/// ZIP entry can put a JP2 header within the first 64 bytes of the archive.
pub fn detect_signature(bytes: &[u8]) -> Option<Signature> {
    if bytes.starts_with(&JPEG_SOI) {
        Some(Signature::Jpeg)
    } else if bytes.starts_with(&ZIP_LOCAL_HEADER) {
        Some(Signature::Archive)
    } else if has_ftyp_box(bytes) {
        Some(Signature::BoxedCodestream)
    } else if bytes.starts_with(&J2K_SOC_SIZ) {
        Some(Signature::BareCodestream)
    } else {
        None
    }
}

fn has_ftyp_box(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(FTYP_SEARCH_WINDOW)];

    window.windows(4).any(|w| w == b"ftyp")
}

/// Start-of-frame parameters of a JPEG stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub marker: u8,
    pub precision: u8,
    pub height: u16,
    pub width: u16,
    pub channels: u8,
}

fn is_start_of_frame(marker: u8) -> bool {
    matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC)
}

/// Walk the marker segments up to the first SOFn and read the frame header.
pub fn parse_jpeg_frame_header(data: &[u8]) -> Option<FrameInfo> {
    if !data.starts_with(&JPEG_SOI) {
        return None;
    }

    // past SOI, every segment starts with FF xx
    let mut index = 2;

    while index + 1 < data.len() {
        if data[index] != 0xFF {
            index += 1;
            continue;
        }

        let marker = data[index + 1];
        index += 2;

        match marker {
            // fill byte, the next 0xFF may open the marker
            0xFF => {
                index -= 1;
                continue;
            }
            // TEM and RSTn carry no length
            0x01 | 0xD0..=0xD8 => continue,
            // EOI or SOS before any frame header
            0xD9 | 0xDA => return None,
            _ => {}
        }

        // the length counts itself but not the marker
        let length = u16::from_be_bytes([*data.get(index)?, *data.get(index + 1)?]) as usize;

        if is_start_of_frame(marker) {
            // P, Y, X, Nf
            let segment = data.get(index + 2..index + 8)?;

            return Some(FrameInfo {
                marker,
                precision: segment[0],
                height: u16::from_be_bytes([segment[1], segment[2]]),
                width: u16::from_be_bytes([segment[3], segment[4]]),
                channels: segment[5],
            });
        }

        if length < 2 {
            return None;
        }

        index += length;
    }

    None
}

/// Find the payload of the first top-level JP2 box of `box_type`.
pub fn find_jp2_box<'a>(bytes: &'a [u8], box_type: &[u8; 4]) -> Option<&'a [u8]> {
    // boxes may be preceded by junk; resync on ftyp when it is there
    let mut index = bytes
        .windows(4)
        .position(|w| w == b"ftyp")
        .map_or(0, |at| at.saturating_sub(4));

    while index + 8 <= bytes.len() {
        let length = u32::from_be_bytes(bytes[index..index + 4].try_into().ok()?) as u64;
        let kind = &bytes[index + 4..index + 8];

        let (header, size) = match length {
            0 => (8, (bytes.len() - index) as u64),
            1 => {
                let large = bytes.get(index + 8..index + 16)?;
                (16, u64::from_be_bytes(large.try_into().ok()?))
            }
            n => (8, n),
        };

        if size < header as u64 {
            return None;
        }

        let end = index.checked_add(usize::try_from(size).ok()?)?;
        if end > bytes.len() {
            return None;
        }

        if kind == box_type {
            return Some(&bytes[index + header..end]);
        }

        index = end;
    }

    None
}

/// Image parameters from a JPEG 2000 SIZ marker segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodestreamInfo {
    pub width: u32,
    pub height: u32,
    pub components: u16,
    pub precision: u8,
    pub signed: bool,
}

pub fn parse_codestream_header(data: &[u8]) -> Option<CodestreamInfo> {
    if !data.starts_with(&J2K_SOC_SIZ) {
        return None;
    }

    let siz = data.get(4..)?;
    let be32 = |at: usize| -> Option<u32> {
        Some(u32::from_be_bytes(siz.get(at..at + 4)?.try_into().ok()?))
    };

    // Lsiz and Rsiz, then Xsiz Ysiz XOsiz YOsiz; the image is the part past the offsets
    let width = be32(4)?.checked_sub(be32(12)?)?;
    let height = be32(8)?.checked_sub(be32(16)?)?;
    let components = u16::from_be_bytes(siz.get(36..38)?.try_into().ok()?);
    // Ssiz of the first component: sign bit, then depth - 1
    let depth = *siz.get(38)?;

    Some(CodestreamInfo {
        width,
        height,
        components,
        precision: (depth & 0x7F) + 1,
        signed: depth & 0x80 != 0,
    })
}

/// Scan a ZIP archive for the first entry holding JPEG or JPEG 2000 data.
pub fn extract_from_archive(bytes: &[u8]) -> Option<Vec<u8>> {
    extract_limited(bytes, MAX_ARCHIVE_ENTRY_LEN)
}

fn extract_limited(bytes: &[u8], limit: u64) -> Option<Vec<u8>> {
    let mut archive = match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(error) => {
            warn!(%error, "pixel payload has a ZIP signature but cannot be opened");
            return None;
        }
    };

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(error) => {
                debug!(index, %error, "skipping unreadable archive entry");
                continue;
            }
        };

        if entry.is_dir() {
            continue;
        }

        if entry.size() > limit {
            warn!(name = entry.name(), size = entry.size(), "archive entry too large, skipping");
            continue;
        }

        // the declared size can lie, so cap the read as well
        let mut content = Vec::new();
        if let Err(error) = (&mut entry).take(limit + 1).read_to_end(&mut content) {
            debug!(name = entry.name(), %error, "skipping unreadable archive entry");
            continue;
        }

        if content.len() as u64 > limit {
            warn!(name = entry.name(), "archive entry inflates past the size limit, skipping");
            continue;
        }

        if matches!(
            detect_signature(&content),
            Some(Signature::Jpeg | Signature::BoxedCodestream | Signature::BareCodestream)
        ) {
            debug!(name = entry.name(), len = content.len(), "using archive entry as pixel payload");
            return Some(content);
        }
    }

    None
}

/// The attributes the native size of a frame is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelGeometry {
    pub rows: u64,
    pub columns: u64,
    pub bits_allocated: u64,
    pub samples_per_pixel: u64,
    pub frames: u64,
}

impl PixelGeometry {
    pub fn from_dataset(dataset: &BTreeMap<Tag, DataElement>, options: &AssembleOptions) -> Self {
        let positive = |tag: Tag| {
            dataset
                .get(&tag)
                .and_then(|e| e.value.first_i64())
                .filter(|v| *v > 0)
                .map(|v| v as u64)
        };

        Self {
            rows: positive(tags::ROWS).unwrap_or(options.default_rows as u64),
            columns: positive(tags::COLUMNS).unwrap_or(options.default_columns as u64),
            bits_allocated: positive(tags::BITS_ALLOCATED)
                .unwrap_or(options.default_bits_allocated as u64),
            samples_per_pixel: positive(tags::SAMPLES_PER_PIXEL).unwrap_or(1),
            frames: positive(tags::NUMBER_OF_FRAMES).unwrap_or(1),
        }
    }

    /// Native size in bytes, `None` when the attributes overflow a `u64`.
    pub fn expected_len(&self) -> Option<u64> {
        self.eight_bit_len()?.checked_mul(self.bits_allocated.div_ceil(8))
    }

    pub fn eight_bit_len(&self) -> Option<u64> {
        self.rows
            .checked_mul(self.columns)?
            .checked_mul(self.samples_per_pixel)?
            .checked_mul(self.frames)
    }
}

/// Outcome of classifying one pixel payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub encoding: PixelEncoding,
    /// The bytes to store, possibly extracted from an archive or container.
    pub payload: Vec<u8>,
    pub frame: Option<FrameInfo>,
    pub codestream: Option<CodestreamInfo>,
    pub from_archive: bool,
    /// Native data sized for 8 bits although Bits Allocated says more.
    pub eight_bit_plane: bool,
    /// No signature and no size match; kept as an opaque fragment.
    pub ambiguous: bool,
}

impl Classification {
    fn new(encoding: PixelEncoding, payload: Vec<u8>) -> Self {
        Self {
            encoding,
            payload,
            frame: None,
            codestream: None,
            from_archive: false,
            eight_bit_plane: false,
            ambiguous: false,
        }
    }

    fn opaque(payload: Vec<u8>) -> Self {
        Self {
            ambiguous: true,
            ..Self::new(PixelEncoding::Encapsulated, payload)
        }
    }

    /// Pixel data element content for this classification.
    pub fn into_pixel_data(self) -> PixelData {
        if self.encoding.is_encapsulated() {
            encapsulate(self.payload)
        } else {
            PixelData::Native(self.payload)
        }
    }
}

pub fn classify(bytes: Vec<u8>, geometry: &PixelGeometry, extract_codestream: bool) -> Classification {
    match detect_signature(&bytes) {
        Some(Signature::Archive) => match extract_from_archive(&bytes) {
            Some(inner) => {
                let signature = detect_signature(&inner);
                let mut classification = match signature {
                    Some(signature) => classify_signed(inner, signature, extract_codestream),
                    None => Classification::opaque(inner),
                };
                classification.from_archive = true;
                classification
            }
            None => {
                warn!(len = bytes.len(), "no image entry in archive, storing it as an opaque fragment");
                Classification::opaque(bytes)
            }
        },
        Some(signature) => classify_signed(bytes, signature, extract_codestream),
        None => {
            let len = bytes.len() as u64;

            if geometry.expected_len() == Some(len) {
                Classification::new(PixelEncoding::Uncompressed, bytes)
            } else if geometry.bits_allocated > 8 && geometry.eight_bit_len() == Some(len) {
                debug!(len, "pixel data sized for 8 bits per sample");
                Classification {
                    eight_bit_plane: true,
                    ..Classification::new(PixelEncoding::Uncompressed, bytes)
                }
            } else {
                warn!(
                    len,
                    expected = ?geometry.expected_len(),
                    "ambiguous pixel encoding, storing as an opaque fragment"
                );
                Classification::opaque(bytes)
            }
        }
    }
}

fn classify_signed(bytes: Vec<u8>, signature: Signature, extract_codestream: bool) -> Classification {
    match signature {
        Signature::Jpeg => {
            let frame = parse_jpeg_frame_header(&bytes);
            if frame.is_none() {
                warn!("JPEG payload without a readable frame header");
            }

            let precision = frame.map_or(8, |f| f.precision);
            Classification {
                frame,
                ..Classification::new(PixelEncoding::BaselineCompressed { precision }, bytes)
            }
        }
        Signature::BoxedCodestream => {
            let codestream_box = find_jp2_box(&bytes, b"jp2c");
            let codestream = codestream_box.and_then(parse_codestream_header);

            match codestream_box {
                Some(inner) if extract_codestream => {
                    let payload = inner.to_vec();
                    Classification {
                        codestream,
                        ..Classification::new(
                            PixelEncoding::RawCodestream {
                                container: CodestreamContainer::Bare,
                            },
                            payload,
                        )
                    }
                }
                _ => {
                    if extract_codestream {
                        warn!("JP2 payload has no jp2c box, keeping the container");
                    }
                    Classification {
                        codestream,
                        ..Classification::new(
                            PixelEncoding::RawCodestream {
                                container: CodestreamContainer::Boxed,
                            },
                            bytes,
                        )
                    }
                }
            }
        }
        Signature::BareCodestream => Classification {
            codestream: parse_codestream_header(&bytes),
            ..Classification::new(
                PixelEncoding::RawCodestream {
                    container: CodestreamContainer::Bare,
                },
                bytes,
            )
        },
        Signature::Archive => {
            warn!("nested archive in pixel payload, storing it as an opaque fragment");
            Classification::opaque(bytes)
        }
    }
}

/// One even-length fragment behind an empty basic offset table.
pub fn encapsulate(payload: Vec<u8>) -> PixelData {
    PixelData::Encapsulated {
        offset_table: Vec::new(),
        fragments: vec![util::pad_to_even(payload, 0x00)],
    }
}
