//! Tags the engine reads or rewrites by name.

use crate::model::Tag;

pub const FILE_META_INFORMATION_GROUP_LENGTH: Tag = Tag::new(0x0002, 0x0000);
pub const FILE_META_INFORMATION_VERSION: Tag = Tag::new(0x0002, 0x0001);
pub const MEDIA_STORAGE_SOP_CLASS_UID: Tag = Tag::new(0x0002, 0x0002);
pub const MEDIA_STORAGE_SOP_INSTANCE_UID: Tag = Tag::new(0x0002, 0x0003);
pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);
pub const IMPLEMENTATION_CLASS_UID: Tag = Tag::new(0x0002, 0x0012);
pub const IMPLEMENTATION_VERSION_NAME: Tag = Tag::new(0x0002, 0x0013);

pub const SPECIFIC_CHARACTER_SET: Tag = Tag::new(0x0008, 0x0005);
pub const SOP_CLASS_UID: Tag = Tag::new(0x0008, 0x0016);
pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
pub const STUDY_DATE: Tag = Tag::new(0x0008, 0x0020);
pub const STUDY_TIME: Tag = Tag::new(0x0008, 0x0030);
pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
pub const STUDY_DESCRIPTION: Tag = Tag::new(0x0008, 0x1030);
pub const SERIES_DESCRIPTION: Tag = Tag::new(0x0008, 0x103E);

pub const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);

pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000D);
pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000E);
pub const SERIES_NUMBER: Tag = Tag::new(0x0020, 0x0011);
pub const INSTANCE_NUMBER: Tag = Tag::new(0x0020, 0x0013);

pub const SAMPLES_PER_PIXEL: Tag = Tag::new(0x0028, 0x0002);
pub const PHOTOMETRIC_INTERPRETATION: Tag = Tag::new(0x0028, 0x0004);
pub const PLANAR_CONFIGURATION: Tag = Tag::new(0x0028, 0x0006);
pub const NUMBER_OF_FRAMES: Tag = Tag::new(0x0028, 0x0008);
pub const ROWS: Tag = Tag::new(0x0028, 0x0010);
pub const COLUMNS: Tag = Tag::new(0x0028, 0x0011);
pub const BITS_ALLOCATED: Tag = Tag::new(0x0028, 0x0100);
pub const BITS_STORED: Tag = Tag::new(0x0028, 0x0101);
pub const HIGH_BIT: Tag = Tag::new(0x0028, 0x0102);
pub const PIXEL_REPRESENTATION: Tag = Tag::new(0x0028, 0x0103);
pub const WINDOW_CENTER: Tag = Tag::new(0x0028, 0x1050);
pub const WINDOW_WIDTH: Tag = Tag::new(0x0028, 0x1051);
pub const RESCALE_INTERCEPT: Tag = Tag::new(0x0028, 0x1052);
pub const RESCALE_SLOPE: Tag = Tag::new(0x0028, 0x1053);
pub const RESCALE_TYPE: Tag = Tag::new(0x0028, 0x1054);
pub const WINDOW_CENTER_WIDTH_EXPLANATION: Tag = Tag::new(0x0028, 0x1055);

pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);

pub const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
pub const ITEM_DELIMITATION_ITEM: Tag = Tag::new(0xFFFE, 0xE00D);
pub const SEQUENCE_DELIMITATION_ITEM: Tag = Tag::new(0xFFFE, 0xE0DD);
