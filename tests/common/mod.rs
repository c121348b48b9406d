#![allow(dead_code)]

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use dicom_rebuild::TagRecord;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};

pub fn records(pairs: &[(&str, &str)]) -> Vec<TagRecord> {
    pairs.iter().map(|(tag, value)| TagRecord::new(*tag, *value)).collect()
}

/// A small CT header with explicit identifiers and geometry.
pub fn ct_records(rows: u32, columns: u32, bits: u32) -> Vec<TagRecord> {
    let rows = rows.to_string();
    let columns = columns.to_string();
    let bits = bits.to_string();

    records(&[
        ("0008,0016", "1.2.840.10008.5.1.4.1.1.2"),
        ("0008,0018", "1.2.3.4.5.6"),
        ("0008,0060", "CT"),
        ("0010,0010", "Doe^Jane"),
        ("0020,000D", "1.2.3.4"),
        ("0020,000E", "1.2.3.4.5"),
        ("0020,0013", "1"),
        ("0028,0010", &rows),
        ("0028,0011", &columns),
        ("0028,0100", &bits),
        ("0028,0101", &bits),
        ("0028,0004", "MONOCHROME2"),
    ])
}

pub fn jpeg_gray(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| image::Luma([((x + y) % 256) as u8])));
    encode_jpeg(&image)
}

pub fn jpeg_rgb(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50])));
    encode_jpeg(&image)
}

fn encode_jpeg(image: &DynamicImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Jpeg).expect("encode jpeg");
    out.into_inner()
}

/// SOC + SIZ for a single-component image, then EOC.
pub fn codestream(width: u32, height: u32, depth: u8) -> Vec<u8> {
    let mut bytes = vec![0xFF, 0x4F, 0xFF, 0x51];
    bytes.extend_from_slice(&41u16.to_be_bytes());
    bytes.extend_from_slice(&0u16.to_be_bytes());
    for v in [width, height, 0, 0, width, height, 0, 0] {
        bytes.extend_from_slice(&v.to_be_bytes());
    }
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&[depth - 1, 1, 1]);
    bytes.extend_from_slice(&[0xFF, 0xD9]);
    bytes
}

/// Signature, `ftyp` and `jp2c` boxes around `codestream`.
pub fn jp2(codestream: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0, 0, 0, 12, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A];
    bytes.extend_from_slice(&20u32.to_be_bytes());
    bytes.extend_from_slice(b"ftypjp2 ");
    bytes.extend_from_slice(&0u32.to_be_bytes());
    bytes.extend_from_slice(b"jp2 ");
    bytes.extend_from_slice(&((codestream.len() + 8) as u32).to_be_bytes());
    bytes.extend_from_slice(b"jp2c");
    bytes.extend_from_slice(codestream);
    bytes
}

pub fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(content).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

pub fn ramp_u16(count: usize) -> Vec<u8> {
    (0..count).flat_map(|i| ((i * 7) as u16).to_le_bytes()).collect()
}

/// Write `<index>.tags.json` and `<index>.slice` into a captured series dir.
pub fn write_capture(series_dir: &Path, index: usize, tags: &[TagRecord], pixels: &[u8]) {
    fs::create_dir_all(series_dir).expect("create series dir");
    fs::write(
        series_dir.join(format!("{index}.tags.json")),
        serde_json::to_vec(tags).expect("serialize tags"),
    )
    .expect("write tags");
    fs::write(series_dir.join(format!("{index}.slice")), pixels).expect("write slice");
}
