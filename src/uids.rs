//! Transfer syntax and storage class UIDs.

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
pub const JPEG_EXTENDED: &str = "1.2.840.10008.1.2.4.51";
pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";
pub const JPEG_2000: &str = "1.2.840.10008.1.2.4.91";

/// Storage classes by modality, used when a viewer omits SOP Class UID.
pub const MODALITY_STORAGE_CLASSES: &[(&str, &str)] = &[
    ("CT", "1.2.840.10008.5.1.4.1.1.2"),
    ("MR", "1.2.840.10008.5.1.4.1.1.4"),
    ("US", "1.2.840.10008.5.1.4.1.1.6.1"),
    ("CR", "1.2.840.10008.5.1.4.1.1.1"),
    ("DX", "1.2.840.10008.5.1.4.1.1.1.1"),
    ("NM", "1.2.840.10008.5.1.4.1.1.20"),
    ("PT", "1.2.840.10008.5.1.4.1.1.128"),
    ("XA", "1.2.840.10008.5.1.4.1.1.12.1"),
    ("MG", "1.2.840.10008.5.1.4.1.1.1.2"),
    ("RF", "1.2.840.10008.5.1.4.1.1.12.2"),
    ("SR", "1.2.840.10008.5.1.4.1.1.88.33"),
    ("KO", "1.2.840.10008.5.1.4.1.1.88.59"),
    ("OT", "1.2.840.10008.5.1.4.1.1.7"),
];

pub fn storage_class_for_modality(modality: &str) -> Option<&'static str> {
    let modality = modality.trim().to_ascii_uppercase();

    MODALITY_STORAGE_CLASSES
        .iter()
        .find(|(m, _)| *m == modality)
        .map(|(_, uid)| *uid)
}
