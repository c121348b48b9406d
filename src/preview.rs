//! Renders the first frame of an instance to an 8-bit image for a quick
//! visual check of a rebuild.

use std::path::Path;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use tracing::debug;

use crate::error::{RebuildError, RebuildResult};
use crate::model::{Instance, PixelEncoding};
use crate::tags;

fn unsupported(reason: impl Into<String>) -> RebuildError {
    RebuildError::PreviewUnsupported(reason.into())
}

pub fn render_preview(instance: &Instance) -> RebuildResult<DynamicImage> {
    match instance.pixel_encoding {
        PixelEncoding::Uncompressed => render_native(instance),
        PixelEncoding::BaselineCompressed { .. } => Ok(image::load_from_memory_with_format(
            instance.pixel_data.first_frame_bytes(),
            ImageFormat::Jpeg,
        )?),
        other => Err(unsupported(format!("{:?} pixel data", other))),
    }
}

/// Render and save; the format follows the extension of `path`.
pub fn save_preview(instance: &Instance, path: &Path) -> RebuildResult<()> {
    let image = render_preview(instance)?;
    image.save(path)?;

    debug!(path = %path.display(), width = image.width(), height = image.height(), "saved preview");

    Ok(())
}

fn positive_attr(instance: &Instance, tag: crate::model::Tag, name: &str) -> RebuildResult<u32> {
    instance
        .int_attr(tag)
        .filter(|v| *v > 0)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| unsupported(format!("missing {}", name)))
}

fn render_native(instance: &Instance) -> RebuildResult<DynamicImage> {
    let rows = positive_attr(instance, tags::ROWS, "Rows")?;
    let columns = positive_attr(instance, tags::COLUMNS, "Columns")?;
    let samples = instance.int_attr(tags::SAMPLES_PER_PIXEL).unwrap_or(1);
    let bits_allocated = instance.int_attr(tags::BITS_ALLOCATED).unwrap_or(8);
    let bits_stored = instance
        .int_attr(tags::BITS_STORED)
        .filter(|b| (1..=bits_allocated).contains(b))
        .unwrap_or(bits_allocated);
    let signed = instance.int_attr(tags::PIXEL_REPRESENTATION) == Some(1);

    let pixel_count = rows as usize * columns as usize;
    let bytes = instance.pixel_data.first_frame_bytes();

    if samples == 3 {
        if bits_allocated != 8 {
            return Err(unsupported(format!("{}-bit colour", bits_allocated)));
        }

        let frame = bytes
            .get(..pixel_count * 3)
            .ok_or_else(|| unsupported("pixel data shorter than one frame"))?;

        let interleaved = if instance.int_attr(tags::PLANAR_CONFIGURATION) == Some(1) {
            (0..pixel_count)
                .flat_map(|i| [frame[i], frame[pixel_count + i], frame[2 * pixel_count + i]])
                .collect()
        } else {
            frame.to_vec()
        };

        return RgbImage::from_raw(columns, rows, interleaved)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| unsupported("pixel buffer does not fit the image size"));
    }

    if samples != 1 {
        return Err(unsupported(format!("{} samples per pixel", samples)));
    }

    if !matches!(bits_allocated, 8 | 16) {
        return Err(unsupported(format!("{}-bit samples", bits_allocated)));
    }

    let mask = (1u32 << bits_stored) - 1;
    let to_value = |raw: u32| -> f64 {
        let raw = raw & mask;
        if signed && raw & (1 << (bits_stored - 1)) != 0 {
            raw as f64 - (1u64 << bits_stored) as f64
        } else {
            raw as f64
        }
    };

    let values = if bits_allocated == 8 {
        bytes
            .get(..pixel_count)
            .map(|frame| frame.iter().map(|b| to_value(*b as u32)).collect::<Vec<f64>>())
    } else {
        bytes.get(..pixel_count * 2).map(|frame| {
            frame
                .chunks_exact(2)
                .map(|c| to_value(u16::from_le_bytes([c[0], c[1]]) as u32))
                .collect()
        })
    }
    .ok_or_else(|| unsupported("pixel data shorter than one frame"))?;

    let photometric = instance
        .str_attr(tags::PHOTOMETRIC_INTERPRETATION)
        .unwrap_or("MONOCHROME2")
        .trim();
    let window = instance
        .float_attr(tags::WINDOW_CENTER)
        .zip(instance.float_attr(tags::WINDOW_WIDTH))
        .filter(|(_, width)| *width > 0.0);

    let pixels = process_image_pixels(
        &values,
        photometric,
        instance.float_attr(tags::RESCALE_INTERCEPT).unwrap_or(0.0),
        instance.float_attr(tags::RESCALE_SLOPE).unwrap_or(1.0),
        window,
    )?;

    GrayImage::from_raw(columns, rows, pixels)
        .map(DynamicImage::ImageLuma8)
        .ok_or_else(|| unsupported("pixel buffer does not fit the image size"))
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Rescale, clamp to the display window and stretch to 0..=255.
fn process_image_pixels(
    values: &[f64],
    photometric: &str,
    rescale_intercept: f64,
    rescale_slope: f64,
    window: Option<(f64, f64)>,
) -> RebuildResult<Vec<u8>> {
    if photometric != "MONOCHROME1" && photometric != "MONOCHROME2" {
        return Err(unsupported(format!("photometric interpretation {}", photometric)));
    }

    if values.is_empty() {
        return Ok(Vec::new());
    }

    let (data_min, data_max) = min_max(values.iter().copied());
    let data_range = data_max - data_min;

    let windowed = values
        .iter()
        .map(|v| v * rescale_slope + rescale_intercept)
        .map(|v| match window {
            Some((center, width)) => {
                if v <= center - width / 2.0 {
                    data_min
                } else if v > center + width / 2.0 {
                    data_max
                } else {
                    (v - center + width / 2.0) / width * data_range + data_min
                }
            }
            None => v,
        })
        .collect::<Vec<f64>>();

    let (low, high) = min_max(windowed.iter().copied());
    let span = high - low;

    let pixels = windowed.iter().map(|v| {
        if span > 0.0 {
            (((v - low) / span) * 255.0).round() as u8
        } else {
            0
        }
    });

    Ok(if photometric == "MONOCHROME1" {
        pixels.map(|v| 255 - v).collect()
    } else {
        pixels.collect()
    })
}
